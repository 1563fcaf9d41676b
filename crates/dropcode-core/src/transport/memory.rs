//! In-process transport.
//!
//! A [`MemoryHub`] plays the role of the signaling service: endpoints
//! register their peer ID with it, and `connect` wires two channel pairs
//! between the caller and the registered endpoint. Delivery is ordered and
//! lossless, like a reliable data channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::{Link, LinkHandle, Transport};
use crate::code::PeerId;
use crate::error::{Error, Result};

type Registrations = HashMap<PeerId, mpsc::UnboundedSender<Link>>;

/// Rendezvous point shared by in-process endpoints.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    endpoints: Arc<Mutex<Registrations>>,
}

impl MemoryHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint under `peer_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IdentifierTaken`] if a live endpoint already holds
    /// the ID.
    pub fn register(&self, peer_id: PeerId) -> Result<MemoryEndpoint> {
        let mut endpoints = self.lock()?;

        if endpoints.get(&peer_id).is_some_and(|tx| !tx.is_closed()) {
            return Err(Error::IdentifierTaken(peer_id.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        endpoints.insert(peer_id.clone(), tx);
        drop(endpoints);

        tracing::debug!(peer_id = %peer_id, "Registered in-memory endpoint");

        Ok(MemoryEndpoint {
            hub: self.clone(),
            local: peer_id,
            incoming: tokio::sync::Mutex::new(rx),
        })
    }

    /// Whether an endpoint is registered under `peer_id`.
    #[must_use]
    pub fn is_registered(&self, peer_id: &PeerId) -> bool {
        self.lock()
            .map(|endpoints| endpoints.contains_key(peer_id))
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Registrations>> {
        self.endpoints
            .lock()
            .map_err(|_| Error::Internal("memory hub lock poisoned".to_string()))
    }

    fn dial(&self, from: &PeerId, target: &PeerId) -> Result<Link> {
        let endpoints = self.lock()?;
        let Some(incoming) = endpoints.get(target) else {
            return Err(Error::PeerUnavailable(target.to_string()));
        };

        let (to_remote_tx, to_remote_rx) = mpsc::unbounded_channel();
        let (to_local_tx, to_local_rx) = mpsc::unbounded_channel();

        let remote_side = Link {
            handle: LinkHandle::new(from.clone(), to_local_tx),
            inbound: to_remote_rx,
        };

        incoming
            .send(remote_side)
            .map_err(|_| Error::ConnectionFailed {
                peer: target.to_string(),
                reason: "peer is not accepting connections".to_string(),
            })?;

        Ok(Link {
            handle: LinkHandle::new(target.clone(), to_remote_tx),
            inbound: to_local_rx,
        })
    }

    fn unregister(&self, peer_id: &PeerId) {
        if let Ok(mut endpoints) = self.lock() {
            endpoints.remove(peer_id);
        }
    }
}

/// An endpoint registered with a [`MemoryHub`].
#[derive(Debug)]
pub struct MemoryEndpoint {
    hub: MemoryHub,
    local: PeerId,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<Link>>,
}

impl MemoryEndpoint {
    /// Keep the ID registered but refuse further incoming links.
    pub async fn stop_accepting(&self) {
        self.incoming.lock().await.close();
    }
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        self.hub.unregister(&self.local);
    }
}

impl Transport for MemoryEndpoint {
    fn local_id(&self) -> &PeerId {
        &self.local
    }

    async fn connect(&self, target: &PeerId) -> Result<Link> {
        self.hub.dial(&self.local, target)
    }

    async fn accept(&self) -> Option<Link> {
        self.incoming.lock().await.recv().await
    }
}
