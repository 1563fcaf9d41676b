//! Transport adapters.
//!
//! A transport turns a peer ID into an open [`Link`]: an ordered, reliable,
//! message-oriented channel to one remote endpoint. The rest of the crate
//! never sees sockets; it sends [`TransferMessage`]s through a [`LinkHandle`]
//! and drains inbound messages from the link's receiver.
//!
//! Two adapters ship:
//!
//! - [`memory`]: an in-process hub, used by tests and embedders that bridge
//!   to their own signaling layer
//! - [`tcp`]: TCP links between machines on a LAN, with peer IDs resolved by
//!   UDP rendezvous (see [`crate::rendezvous`])

pub mod memory;
pub mod tcp;

pub use memory::{MemoryEndpoint, MemoryHub};
pub use tcp::{TcpTransport, TcpTransportConfig};

use std::future::Future;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::code::PeerId;
use crate::error::{Error, Result};
use crate::protocol::TransferMessage;

/// Sending side of a link.
///
/// Cloning is cheap; all clones feed the same ordered outbound queue.
/// Sending never waits for delivery.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    link_id: Uuid,
    remote: PeerId,
    tx: mpsc::UnboundedSender<TransferMessage>,
}

impl LinkHandle {
    /// Wrap an outbound queue as a link handle.
    #[must_use]
    pub fn new(remote: PeerId, tx: mpsc::UnboundedSender<TransferMessage>) -> Self {
        Self {
            link_id: Uuid::new_v4(),
            remote,
            tx,
        }
    }

    /// Queue a message for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LinkClosed`] if the link has shut down.
    pub fn send(&self, message: TransferMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| Error::LinkClosed(self.remote.to_string()))
    }

    /// Whether the link has shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Peer ID of the remote end.
    #[must_use]
    pub fn remote(&self) -> &PeerId {
        &self.remote
    }

    /// Unique ID of this link, distinguishing reconnections of the same peer.
    #[must_use]
    pub fn link_id(&self) -> Uuid {
        self.link_id
    }
}

/// An open link to a remote endpoint.
#[derive(Debug)]
pub struct Link {
    /// Outbound side
    pub handle: LinkHandle,
    /// Inbound messages, in the order the remote sent them
    pub inbound: mpsc::UnboundedReceiver<TransferMessage>,
}

impl Link {
    /// Peer ID of the remote end.
    #[must_use]
    pub fn remote(&self) -> &PeerId {
        self.handle.remote()
    }
}

/// A connection-establishment service bound to one local peer ID.
pub trait Transport: Send + Sync + 'static {
    /// Peer ID this endpoint is registered under.
    fn local_id(&self) -> &PeerId;

    /// Open a reliable, ordered link to `target`.
    ///
    /// Fails with [`Error::PeerUnavailable`] when nothing answers for the ID
    /// and with [`Error::ConnectionFailed`] for any other failure.
    fn connect(&self, target: &PeerId) -> impl Future<Output = Result<Link>> + Send;

    /// Wait for the next incoming link. Returns `None` once the endpoint
    /// has shut down.
    fn accept(&self) -> impl Future<Output = Option<Link>> + Send;
}
