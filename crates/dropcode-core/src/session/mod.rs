//! A running Dropcode endpoint.
//!
//! A [`Session`] owns the local peer ID (through its transport), the peer
//! registry, the shared progress reporter, and one driver task per open link.
//! It turns transport activity into registry updates and session events:
//!
//! - An outbound connect is keyed by the dialed ID, an inbound link by the ID
//!   the remote advertised
//! - Each link gets its own [`TransferReceiver`]; messages are processed one
//!   at a time in arrival order
//! - Finished files go to the [`DownloadDir`] (if any) and are published as
//!   [`SessionEvent::FileReceived`]
//! - Closed links not seen for `stale_after` are pruned periodically
//!
//! Every background task stops when the session is shut down or dropped.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::code::PeerId;
use crate::error::{Error, Result};
use crate::file::{DownloadDir, SelectedFileSet};
use crate::protocol::TransferMessage;
use crate::registry::PeerRegistry;
use crate::transfer::{
    ProgressReporter, ReceivedFile, Status, TransferOptions, TransferProgress, TransferReceiver,
    TransferSender,
};
use crate::transport::{Link, LinkHandle, Transport};

const EVENT_CAPACITY: usize = 64;

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Chunking and progress settings
    pub transfer: TransferOptions,
    /// Closed links idle for longer than this are pruned
    pub stale_after: Duration,
    /// How often to prune
    pub prune_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transfer: TransferOptions::default(),
            stale_after: Duration::from_secs(300),
            prune_interval: Duration::from_secs(30),
        }
    }
}

/// Something observers of a session may want to show.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A link to a peer opened (or replaced an older one)
    PeerConnected {
        /// Registry key of the peer
        peer_id: PeerId,
        /// Whether the remote dialed us
        inbound: bool,
    },
    /// A peer's link closed; the entry stays until pruned
    PeerDisconnected {
        /// Registry key of the peer
        peer_id: PeerId,
    },
    /// A stale peer was removed from the registry
    PeerExpired {
        /// Removed peer
        peer_id: PeerId,
    },
    /// A transfer finished on some link
    FileReceived {
        /// Peer that sent it
        from: PeerId,
        /// Reassembled file
        file: Arc<ReceivedFile>,
        /// Where the download sink saved it
        saved_to: Option<PathBuf>,
    },
    /// A non-fatal problem worth showing to the user
    Warning {
        /// Human-readable description
        message: String,
    },
}

/// Snapshot of one registry entry.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Peer ID
    pub peer_id: PeerId,
    /// Current link
    pub link_id: Uuid,
    /// Whether the link is still open
    pub connected: bool,
    /// When the peer was first registered
    pub first_seen: Instant,
    /// Last connection or inbound traffic
    pub last_seen: Instant,
}

struct SessionInner<T> {
    transport: T,
    registry: Arc<RwLock<PeerRegistry<LinkHandle>>>,
    progress: ProgressReporter,
    sender: TransferSender,
    events: broadcast::Sender<SessionEvent>,
    sink: Option<DownloadDir>,
    config: SessionConfig,
    last_error: Mutex<Option<String>>,
    shutdown: CancellationToken,
}

/// A running endpoint bound to one transport.
pub struct Session<T: Transport> {
    inner: Arc<SessionInner<T>>,
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("local_id", self.inner.transport.local_id())
            .field("sink", &self.inner.sink)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Session<T> {
    /// Start a session on `transport`.
    ///
    /// Received files are saved to `sink` when one is given; they are always
    /// published as [`SessionEvent::FileReceived`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(transport: T, config: SessionConfig, sink: Option<DownloadDir>) -> Self {
        let registry = Arc::new(RwLock::new(PeerRegistry::new()));
        let progress = ProgressReporter::new();
        let sender = TransferSender::new(
            Arc::clone(&registry),
            progress.clone(),
            config.transfer.clone(),
        );
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let inner = Arc::new(SessionInner {
            transport,
            registry,
            progress,
            sender,
            events,
            sink,
            config,
            last_error: Mutex::new(None),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(accept_loop(Arc::clone(&inner)));
        tokio::spawn(prune_loop(Arc::clone(&inner)));

        tracing::info!(peer_id = %inner.transport.local_id(), "Session started");

        Self { inner }
    }

    /// Peer ID other devices use to reach this session.
    #[must_use]
    pub fn local_id(&self) -> &PeerId {
        self.inner.transport.local_id()
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Connect to a manually entered peer ID.
    ///
    /// The input is upper-cased and validated before the transport is
    /// contacted. A successful connect clears the last connect error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] for malformed input,
    /// [`Error::PeerUnavailable`] if nothing answers for the ID, and
    /// [`Error::ConnectionFailed`] for any other failure.
    pub async fn connect(&self, input: &str) -> Result<PeerId> {
        let target = match PeerId::parse(input) {
            Ok(target) => target,
            Err(e) => {
                self.inner.set_last_error(Some(e.to_string()));
                return Err(e);
            }
        };

        if &target == self.local_id() {
            let err = Error::ConnectionFailed {
                peer: target.to_string(),
                reason: "cannot connect to yourself".to_string(),
            };
            self.inner.report_connect_error(&err);
            return Err(err);
        }

        match self.inner.transport.connect(&target).await {
            Ok(link) => {
                self.inner.set_last_error(None);
                self.inner.attach(link, target.clone(), false).await;
                Ok(target)
            }
            Err(e) => {
                let err = match e {
                    Error::PeerUnavailable(_) | Error::ConnectionFailed { .. } => e,
                    other => Error::ConnectionFailed {
                        peer: target.to_string(),
                        reason: other.to_string(),
                    },
                };
                self.inner.report_connect_error(&err);
                Err(err)
            }
        }
    }

    /// Register a link the caller opened directly on the transport.
    ///
    /// The link is keyed by its remote ID, like an outbound connect.
    pub async fn adopt_link(&self, link: Link) -> PeerId {
        let peer_id = link.remote().clone();
        self.inner.set_last_error(None);
        self.inner.attach(link, peer_id.clone(), false).await;
        peer_id
    }

    /// Send every selected file to every registered peer.
    ///
    /// Peers are served concurrently; each peer gets the files one after
    /// another in selection order.
    pub async fn send_files(&self, files: &SelectedFileSet) -> Vec<(PeerId, Result<()>)> {
        let targets: Vec<PeerId> = self
            .inner
            .registry
            .read()
            .await
            .list()
            .iter()
            .map(|entry| entry.peer_id.clone())
            .collect();

        self.send_files_to(files, &targets).await
    }

    /// Send every selected file to the given peers.
    ///
    /// Unknown peers are skipped. A peer whose link fails stops receiving the
    /// remaining files; other peers are unaffected.
    pub async fn send_files_to(
        &self,
        files: &SelectedFileSet,
        targets: &[PeerId],
    ) -> Vec<(PeerId, Result<()>)> {
        let mut tasks = JoinSet::new();

        for target in targets {
            let sender = self.inner.sender.clone();
            let files = files.clone();
            let target = target.clone();

            tasks.spawn(async move {
                for file in files.files() {
                    if let Err(e) = sender.send(file, &target).await {
                        tracing::warn!("Sending {} to {} failed: {}", file.name(), target, e);
                        return (target, Err(e));
                    }
                }
                (target, Ok(()))
            });
        }

        let mut results = Vec::with_capacity(targets.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!("Send task failed: {}", e),
            }
        }
        results
    }

    /// Registered peers in the order they first connected.
    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.inner
            .registry
            .read()
            .await
            .list()
            .iter()
            .map(|entry| PeerInfo {
                peer_id: entry.peer_id.clone(),
                link_id: entry.handle.link_id(),
                connected: !entry.handle.is_closed(),
                first_seen: entry.first_seen,
                last_seen: entry.last_seen,
            })
            .collect()
    }

    /// Number of registered peers.
    pub async fn peer_count(&self) -> usize {
        self.inner.registry.read().await.count()
    }

    /// Current status indicator.
    pub async fn status(&self) -> Status {
        let count = self.peer_count().await;
        Status::derive(count, &self.inner.progress.current())
    }

    /// Watch transfer progress.
    #[must_use]
    pub fn progress(&self) -> watch::Receiver<TransferProgress> {
        self.inner.progress.subscribe()
    }

    /// Subscribe to session events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Message of the last failed connect, cleared by a successful one.
    #[must_use]
    pub fn last_connect_error(&self) -> Option<String> {
        self.inner
            .last_error
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }

    /// Drop peers whose link closed and that were not seen for
    /// `stale_after`. Runs periodically; exposed for callers that want an
    /// immediate sweep.
    pub async fn prune_stale(&self) -> Vec<PeerId> {
        self.inner.prune().await
    }

    /// Stop accepting links and stop every background task.
    pub fn shutdown(&self) {
        tracing::debug!("Shutting down session {}", self.local_id());
        self.inner.shutdown.cancel();
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl<T: Transport> SessionInner<T> {
    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn set_last_error(&self, message: Option<String>) {
        if let Ok(mut guard) = self.last_error.lock() {
            *guard = message;
        }
    }

    fn report_connect_error(&self, err: &Error) {
        if err.is_reportable() {
            tracing::warn!("{}", err);
            self.set_last_error(Some(err.to_string()));
            self.publish(SessionEvent::Warning {
                message: err.to_string(),
            });
        } else {
            tracing::debug!("{}", err);
        }
    }

    async fn attach(self: &Arc<Self>, link: Link, peer_id: PeerId, inbound: bool) {
        let Link { handle, inbound: messages } = link;
        let link_id = handle.link_id();

        if let Some(previous) = self.registry.write().await.upsert(peer_id.clone(), handle) {
            tracing::debug!(
                "Replaced link {} to {} with {}",
                previous.link_id(),
                peer_id,
                link_id
            );
        }

        tracing::info!(peer_id = %peer_id, inbound, "Peer connected");
        self.publish(SessionEvent::PeerConnected {
            peer_id: peer_id.clone(),
            inbound,
        });

        tokio::spawn(drive_link(Arc::clone(self), peer_id, link_id, messages));
    }

    async fn deliver(&self, from: &PeerId, file: ReceivedFile) {
        let saved_to = match &self.sink {
            Some(sink) => match sink.save(&file).await {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::warn!("Failed to save {}: {}", file.file_name, e);
                    self.publish(SessionEvent::Warning {
                        message: format!("failed to save {}: {e}", file.file_name),
                    });
                    None
                }
            },
            None => None,
        };

        tracing::info!(
            "Received {} from {} ({} bytes)",
            file.file_name,
            from,
            file.data.len()
        );
        self.publish(SessionEvent::FileReceived {
            from: from.clone(),
            file: Arc::new(file),
            saved_to,
        });
    }

    async fn prune(&self) -> Vec<PeerId> {
        let now = Instant::now();
        let stale_after = self.config.stale_after;

        let expired = self
            .registry
            .write()
            .await
            .expire(|entry| entry.handle.is_closed() && entry.idle_for(now) > stale_after);

        for peer_id in &expired {
            tracing::debug!("Pruned stale peer {}", peer_id);
            self.publish(SessionEvent::PeerExpired {
                peer_id: peer_id.clone(),
            });
        }
        expired
    }
}

async fn accept_loop<T: Transport>(inner: Arc<SessionInner<T>>) {
    loop {
        let link = tokio::select! {
            () = inner.shutdown.cancelled() => break,
            link = inner.transport.accept() => match link {
                Some(link) => link,
                None => break,
            },
        };

        let peer_id = link.remote().clone();
        inner.attach(link, peer_id, true).await;
    }

    tracing::debug!("Accept loop stopped");
}

async fn prune_loop<T: Transport>(inner: Arc<SessionInner<T>>) {
    let mut interval = tokio::time::interval(inner.config.prune_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            _ = interval.tick() => {
                inner.prune().await;
            }
        }
    }
}

async fn drive_link<T: Transport>(
    inner: Arc<SessionInner<T>>,
    peer_id: PeerId,
    link_id: Uuid,
    mut messages: mpsc::UnboundedReceiver<TransferMessage>,
) {
    let mut receiver = TransferReceiver::new(inner.progress.clone());

    loop {
        let message = tokio::select! {
            () = inner.shutdown.cancelled() => return,
            message = messages.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        tracing::trace!("{} from {}", message.kind(), peer_id);
        inner.registry.write().await.touch(&peer_id);

        if let Some(file) = receiver.handle(message) {
            inner.progress.reset_after(inner.config.transfer.settle_delay);
            inner.deliver(&peer_id, file).await;
        }
    }

    let still_current = inner
        .registry
        .read()
        .await
        .find(&peer_id)
        .is_some_and(|entry| entry.handle.link_id() == link_id);

    if still_current {
        tracing::info!(peer_id = %peer_id, "Peer disconnected");
        inner.publish(SessionEvent::PeerDisconnected { peer_id });
    } else {
        tracing::debug!("Superseded link {} to {} closed", link_id, peer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryHub;

    fn id(s: &str) -> PeerId {
        PeerId::parse(s).expect("valid id")
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_transport() {
        let hub = MemoryHub::new();
        let session = Session::start(
            hub.register(id("AAAA")).expect("register"),
            SessionConfig::default(),
            None,
        );

        let err = session.connect("abc").await.unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier(_)));
        assert!(session.last_connect_error().is_some());
        assert_eq!(session.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_not_reported() {
        let hub = MemoryHub::new();
        let session = Session::start(
            hub.register(id("AAAA")).expect("register"),
            SessionConfig::default(),
            None,
        );
        let mut events = session.events();

        let err = session.connect("ZZZZ").await.unwrap_err();
        assert!(matches!(err, Error::PeerUnavailable(_)));
        assert!(session.last_connect_error().is_none());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_connect_to_self_fails() {
        let hub = MemoryHub::new();
        let session = Session::start(
            hub.register(id("AAAA")).expect("register"),
            SessionConfig::default(),
            None,
        );

        let err = session.connect("aaaa").await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed { .. }));
    }

    #[tokio::test]
    async fn test_successful_connect_clears_error() {
        let hub = MemoryHub::new();
        let alice = Session::start(
            hub.register(id("AAAA")).expect("register"),
            SessionConfig::default(),
            None,
        );
        let _bob = Session::start(
            hub.register(id("BBBB")).expect("register"),
            SessionConfig::default(),
            None,
        );

        assert!(alice.connect("B").await.is_err());
        assert!(alice.last_connect_error().is_some());

        alice.connect("bbbb").await.expect("connect");
        assert!(alice.last_connect_error().is_none());
        assert_eq!(alice.status().await, Status::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_removes_closed_idle_links() {
        let hub = MemoryHub::new();
        let config = SessionConfig {
            stale_after: Duration::from_secs(10),
            prune_interval: Duration::from_secs(1),
            ..Default::default()
        };
        let alice = Session::start(
            hub.register(id("AAAA")).expect("register"),
            config,
            None,
        );
        let bob = Session::start(
            hub.register(id("BBBB")).expect("register"),
            SessionConfig::default(),
            None,
        );

        alice.connect("BBBB").await.expect("connect");
        assert_eq!(alice.peer_count().await, 1);

        drop(bob);
        tokio::time::sleep(Duration::from_secs(2)).await;
        let peers = alice.peers().await;
        assert_eq!(peers.len(), 1);
        assert!(!peers[0].connected);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(alice.peer_count().await, 0);
    }
}
