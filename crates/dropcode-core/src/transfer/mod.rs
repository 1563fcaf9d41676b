//! File transfer engine for Dropcode.
//!
//! A logical transfer moves one file to one peer as `Start`, then one
//! `Chunk` per fixed-size slice, then `End` (see [`crate::protocol`]).
//!
//! - [`TransferSender`] slices a selected file and queues the sequence on a
//!   peer's link
//! - [`TransferReceiver`] is the per-link reassembly state machine
//! - [`ProgressReporter`] publishes the latest progress of either side
//!
//! ## Transfer Protocol
//!
//! - Default chunk size: 64,000 bytes
//! - No acknowledgments and no sequence numbers; links are ordered
//! - Progress is reset one settle delay after a transfer completes

pub mod receiver;
pub mod sender;

pub use receiver::{ReceivedFile, ReceiverState, TransferReceiver};
pub use sender::TransferSender;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Default chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 64_000;

/// How long finished progress stays visible before it resets.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Number of chunks needed for `size` bytes: `ceil(size / chunk_size)`.
#[must_use]
pub fn chunk_count(size: u64, chunk_size: usize) -> u64 {
    size.div_ceil(chunk_size.max(1) as u64)
}

/// Progress percentage for `done` of `total` chunks, capped at 100.
///
/// A transfer with no chunks is complete.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn percentage(done: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        (done as f64 / total as f64 * 100.0).min(100.0)
    }
}

/// Tuning for senders and receivers.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Chunk size in bytes
    pub chunk_size: usize,
    /// Delay before progress resets after a transfer
    pub settle_delay: Duration,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

/// Which side of a transfer progress belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRole {
    /// Sending a file
    Sending,
    /// Receiving a file
    Receiving,
}

impl TransferRole {
    /// Label shown next to the progress bar.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Sending => "Sending",
            Self::Receiving => "Receiving",
        }
    }
}

/// Latest progress snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransferProgress {
    /// Side that reported it; `None` when idle
    pub role: Option<TransferRole>,
    /// File being transferred
    pub file_name: String,
    /// Progress in percent (0.0 - 100.0)
    pub percentage: f64,
}

impl TransferProgress {
    /// Whether a transfer is being displayed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.role.is_some()
    }
}

/// Last-writer-wins progress channel shared by all transfers of a session.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: Arc<watch::Sender<TransferProgress>>,
    generation: Arc<AtomicU64>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    /// Create an idle reporter.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(TransferProgress::default());
        Self {
            tx: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish progress for a file.
    pub fn report(&self, role: TransferRole, file_name: &str, percentage: f64) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.tx.send_replace(TransferProgress {
            role: Some(role),
            file_name: file_name.to_string(),
            percentage,
        });
    }

    /// Reset to idle now.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.tx.send_replace(TransferProgress::default());
    }

    /// Reset to idle after `delay`, unless newer progress arrives first.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn reset_after(&self, delay: Duration) {
        let scheduled_at = self.generation.load(Ordering::SeqCst);
        let reporter = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if reporter.generation.load(Ordering::SeqCst) == scheduled_at {
                reporter.reset();
            }
        });
    }

    /// Current snapshot.
    #[must_use]
    pub fn current(&self) -> TransferProgress {
        self.tx.borrow().clone()
    }

    /// Watch progress changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<TransferProgress> {
        self.tx.subscribe()
    }
}

/// Session status shown next to the peer ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Waiting for peers
    Ready,
    /// At least one peer connected, no transfer running
    Connected,
    /// Sending a file
    Sending,
    /// Receiving a file
    Receiving,
}

impl Status {
    /// Derive the status from the peer count and current progress.
    #[must_use]
    pub fn derive(peer_count: usize, progress: &TransferProgress) -> Self {
        match progress.role {
            Some(TransferRole::Sending) => Self::Sending,
            Some(TransferRole::Receiving) => Self::Receiving,
            None if peer_count > 0 => Self::Connected,
            None => Self::Ready,
        }
    }

    /// Display label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::Connected => "Connected",
            Self::Sending => "Sending",
            Self::Receiving => "Receiving",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
