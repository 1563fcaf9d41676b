//! Sending side of a transfer.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::code::PeerId;
use crate::error::Result;
use crate::file::SelectedFile;
use crate::protocol::TransferMessage;
use crate::registry::PeerRegistry;
use crate::transport::LinkHandle;

use super::{chunk_count, percentage, ProgressReporter, TransferOptions, TransferRole};

/// Slices files into chunks and queues them on peers' links.
#[derive(Debug, Clone)]
pub struct TransferSender {
    registry: Arc<RwLock<PeerRegistry<LinkHandle>>>,
    progress: ProgressReporter,
    options: TransferOptions,
}

impl TransferSender {
    /// Create a sender resolving peers through `registry`.
    #[must_use]
    pub fn new(
        registry: Arc<RwLock<PeerRegistry<LinkHandle>>>,
        progress: ProgressReporter,
        options: TransferOptions,
    ) -> Self {
        Self {
            registry,
            progress,
            options,
        }
    }

    /// Send one file to a registered peer.
    ///
    /// An unknown peer is not an error; nothing is sent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LinkClosed`] if the link shuts down mid-send,
    /// or an I/O error if the file cannot be read.
    pub async fn send(&self, file: &SelectedFile, target: &PeerId) -> Result<()> {
        let handle = self
            .registry
            .read()
            .await
            .find(target)
            .map(|entry| entry.handle.clone());

        let Some(handle) = handle else {
            tracing::debug!("No link to {}, skipping {}", target, file.name());
            return Ok(());
        };

        self.send_via(&handle, file).await
    }

    /// Send one file over a specific link.
    ///
    /// # Errors
    ///
    /// Same as [`TransferSender::send`].
    pub async fn send_via(&self, link: &LinkHandle, file: &SelectedFile) -> Result<()> {
        let chunk_size = self.options.chunk_size;
        let total_chunks = chunk_count(file.size(), chunk_size);
        let mut reader = file.open().await?;

        tracing::debug!(
            "Sending {} to {} in {} chunks",
            file.name(),
            link.remote(),
            total_chunks
        );

        link.send(TransferMessage::Start {
            file_name: file.name().to_string(),
            total_chunks,
        })?;

        for index in 0..total_chunks {
            let chunk = reader.read_chunk(chunk_size).await?;
            link.send(TransferMessage::Chunk {
                chunk,
                total_chunks,
            })?;
            self.progress.report(
                TransferRole::Sending,
                file.name(),
                percentage(index + 1, total_chunks),
            );
        }

        link.send(TransferMessage::End {
            file_name: file.name().to_string(),
        })?;

        tracing::info!("Sent {} to {}", file.name(), link.remote());
        self.progress.reset_after(self.options.settle_delay);

        Ok(())
    }
}
