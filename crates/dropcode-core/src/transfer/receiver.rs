//! Per-link reassembly of incoming transfers.
//!
//! ```text
//! Idle --Start--> Receiving --Chunk--> Receiving --End--> Idle
//!                     ^                    |
//!                     +------Start---------+   (partial transfer dropped)
//! ```
//!
//! Chunks are appended in arrival order. `End` finalizes whatever was
//! buffered, even if chunks are missing; such a file is flagged incomplete.
//! `Chunk` and `End` without a preceding `Start` are ignored.

use crate::protocol::TransferMessage;

use super::{percentage, ProgressReporter, TransferRole};

/// A fully reassembled file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// Name from the `End` message
    pub file_name: String,
    /// Concatenated chunk payloads
    pub data: Vec<u8>,
    /// Chunks actually buffered
    pub chunks_received: u64,
    /// Chunk count announced by `Start`
    pub expected_chunks: u64,
}

impl ReceivedFile {
    /// Whether every announced chunk arrived.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.chunks_received == self.expected_chunks
    }
}

/// Receiver state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReceiverState {
    /// No transfer in flight
    #[default]
    Idle,
    /// Buffering chunks of a transfer
    Receiving {
        /// Name from `Start`
        file_name: String,
        /// Chunk count from `Start`
        total_chunks: u64,
        /// Payloads in arrival order
        chunks: Vec<Vec<u8>>,
    },
}

/// Reassembles transfers arriving on one link.
#[derive(Debug)]
pub struct TransferReceiver {
    state: ReceiverState,
    progress: ProgressReporter,
}

impl TransferReceiver {
    /// Create an idle receiver reporting to `progress`.
    #[must_use]
    pub fn new(progress: ProgressReporter) -> Self {
        Self {
            state: ReceiverState::Idle,
            progress,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &ReceiverState {
        &self.state
    }

    /// Number of chunks buffered for the transfer in flight.
    #[must_use]
    pub fn buffered_chunks(&self) -> usize {
        match &self.state {
            ReceiverState::Idle => 0,
            ReceiverState::Receiving { chunks, .. } => chunks.len(),
        }
    }

    /// Feed one message. Returns the finished file when `End` closes a
    /// transfer.
    pub fn handle(&mut self, message: TransferMessage) -> Option<ReceivedFile> {
        match message {
            TransferMessage::Start {
                file_name,
                total_chunks,
            } => {
                if let ReceiverState::Receiving {
                    file_name: previous,
                    chunks,
                    ..
                } = &self.state
                {
                    tracing::debug!(
                        "Dropping partial transfer of {} ({} chunks) for {}",
                        previous,
                        chunks.len(),
                        file_name
                    );
                }

                tracing::debug!("Receiving {} in {} chunks", file_name, total_chunks);
                self.progress.report(
                    TransferRole::Receiving,
                    &file_name,
                    percentage(0, total_chunks),
                );
                self.state = ReceiverState::Receiving {
                    file_name,
                    total_chunks,
                    chunks: Vec::new(),
                };
                None
            }

            TransferMessage::Chunk {
                chunk,
                total_chunks,
            } => {
                let ReceiverState::Receiving {
                    file_name, chunks, ..
                } = &mut self.state
                else {
                    tracing::debug!("Ignoring chunk outside of a transfer");
                    return None;
                };

                chunks.push(chunk);
                self.progress.report(
                    TransferRole::Receiving,
                    file_name,
                    percentage(chunks.len() as u64, total_chunks),
                );
                None
            }

            TransferMessage::End { file_name } => {
                let ReceiverState::Receiving {
                    total_chunks,
                    chunks,
                    ..
                } = std::mem::take(&mut self.state)
                else {
                    tracing::debug!("Ignoring end of {} outside of a transfer", file_name);
                    return None;
                };

                let received = ReceivedFile {
                    file_name,
                    chunks_received: chunks.len() as u64,
                    expected_chunks: total_chunks,
                    data: chunks.concat(),
                };

                if received.is_complete() {
                    tracing::debug!(
                        "Reassembled {} ({} bytes)",
                        received.file_name,
                        received.data.len()
                    );
                } else {
                    tracing::warn!(
                        "Transfer of {} ended with {} of {} chunks",
                        received.file_name,
                        received.chunks_received,
                        received.expected_chunks
                    );
                }

                Some(received)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(name: &str, total: u64) -> TransferMessage {
        TransferMessage::Start {
            file_name: name.to_string(),
            total_chunks: total,
        }
    }

    fn chunk(data: &[u8], total: u64) -> TransferMessage {
        TransferMessage::Chunk {
            chunk: data.to_vec(),
            total_chunks: total,
        }
    }

    fn end(name: &str) -> TransferMessage {
        TransferMessage::End {
            file_name: name.to_string(),
        }
    }

    #[test]
    fn test_three_chunk_transfer() {
        let reporter = ProgressReporter::new();
        let mut receiver = TransferReceiver::new(reporter.clone());

        assert!(receiver.handle(start("a.txt", 3)).is_none());
        let progress = reporter.current();
        assert_eq!(progress.role, Some(TransferRole::Receiving));
        assert!(progress.percentage.abs() < f64::EPSILON);

        let expected = [33.333, 66.666, 100.0];
        for (i, data) in [b"abc", b"def", b"gh!"].iter().enumerate() {
            assert!(receiver.handle(chunk(*data, 3)).is_none());
            assert_eq!(receiver.buffered_chunks(), i + 1);

            let progress = reporter.current();
            assert_eq!(progress.role, Some(TransferRole::Receiving));
            assert_eq!(progress.file_name, "a.txt");
            assert!((progress.percentage - expected[i]).abs() < 0.01);
        }

        let file = receiver.handle(end("a.txt")).expect("finished file");
        assert_eq!(file.data, b"abcdefgh!");
        assert_eq!(file.file_name, "a.txt");
        assert!(file.is_complete());
        assert_eq!(receiver.state(), &ReceiverState::Idle);
    }

    #[test]
    fn test_start_mid_transfer_discards_chunks() {
        let mut receiver = TransferReceiver::new(ProgressReporter::new());

        receiver.handle(start("old.bin", 5));
        receiver.handle(chunk(b"stale", 5));
        receiver.handle(chunk(b"stale", 5));

        receiver.handle(start("new.bin", 1));
        assert_eq!(receiver.buffered_chunks(), 0);

        receiver.handle(chunk(b"fresh", 1));
        let file = receiver.handle(end("new.bin")).expect("finished file");
        assert_eq!(file.data, b"fresh");
        assert!(file.is_complete());
    }

    #[test]
    fn test_messages_while_idle_are_ignored() {
        let reporter = ProgressReporter::new();
        let mut receiver = TransferReceiver::new(reporter.clone());

        assert!(receiver.handle(chunk(b"orphan", 2)).is_none());
        assert!(receiver.handle(end("ghost.txt")).is_none());
        assert_eq!(receiver.state(), &ReceiverState::Idle);
        assert!(!reporter.current().is_active());
    }

    #[test]
    fn test_truncated_transfer_is_flagged() {
        let mut receiver = TransferReceiver::new(ProgressReporter::new());

        receiver.handle(start("cut.bin", 3));
        receiver.handle(chunk(b"one", 3));
        let file = receiver.handle(end("cut.bin")).expect("finished file");

        assert_eq!(file.data, b"one");
        assert_eq!(file.chunks_received, 1);
        assert_eq!(file.expected_chunks, 3);
        assert!(!file.is_complete());
    }

    #[test]
    fn test_end_names_the_file() {
        let mut receiver = TransferReceiver::new(ProgressReporter::new());

        receiver.handle(start("draft.txt", 1));
        receiver.handle(chunk(b"x", 1));
        let file = receiver.handle(end("final.txt")).expect("finished file");
        assert_eq!(file.file_name, "final.txt");
    }

    #[test]
    fn test_empty_file() {
        let reporter = ProgressReporter::new();
        let mut receiver = TransferReceiver::new(reporter.clone());

        receiver.handle(start("empty", 0));
        let progress = reporter.current();
        assert_eq!(progress.role, Some(TransferRole::Receiving));
        assert_eq!(progress.file_name, "empty");
        assert!((progress.percentage - 100.0).abs() < f64::EPSILON);

        let file = receiver.handle(end("empty")).expect("finished file");
        assert!(file.data.is_empty());
        assert!(file.is_complete());
    }

    #[test]
    fn test_progress_capped_when_chunks_exceed_total() {
        let reporter = ProgressReporter::new();
        let mut receiver = TransferReceiver::new(reporter.clone());

        receiver.handle(start("more.bin", 1));
        receiver.handle(chunk(b"a", 1));
        receiver.handle(chunk(b"b", 1));
        assert!((reporter.current().percentage - 100.0).abs() < f64::EPSILON);
    }
}
