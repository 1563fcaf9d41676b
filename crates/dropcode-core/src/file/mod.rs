//! File selection and the download sink.
//!
//! This module handles:
//! - The selected file set on the sending side
//! - Sequential chunk reads from disk or memory
//! - Saving received files without overwriting anything
//! - Size formatting for listings
//!
//! ## File Names
//!
//! Names arrive from the wire untrusted. Only the final path component is
//! kept, and names that are empty or consist of dots become
//! [`FALLBACK_FILE_NAME`]. An existing file is never overwritten; the sink
//! picks `name (1).ext`, `name (2).ext`, and so on.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncReadExt;

use crate::error::{Error, Result};
use crate::transfer::ReceivedFile;

/// Name used when a received file name has nothing usable left.
pub const FALLBACK_FILE_NAME: &str = "received-file";

/// Where a selected file's bytes come from.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// A regular file on disk
    Disk(PathBuf),
    /// Bytes already in memory
    Memory(Arc<[u8]>),
}

/// A file chosen for sending.
#[derive(Debug, Clone)]
pub struct SelectedFile {
    name: String,
    size: u64,
    source: FileSource,
}

impl SelectedFile {
    /// Select a file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileNotFound`] if `path` does not exist or is not a
    /// regular file.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|_| Error::FileNotFound(path.display().to_string()))?;

        if !metadata.is_file() {
            return Err(Error::FileNotFound(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .map_or_else(|| FALLBACK_FILE_NAME.to_string(), |n| n.to_string_lossy().into_owned());

        Ok(Self {
            name,
            size: metadata.len(),
            source: FileSource::Disk(path.to_path_buf()),
        })
    }

    /// Select in-memory bytes under the given name.
    #[must_use]
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            source: FileSource::Memory(data),
        }
    }

    /// File name announced to the receiver.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes at selection time.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Where the bytes come from.
    #[must_use]
    pub fn source(&self) -> &FileSource {
        &self.source
    }

    /// Open the file for sequential reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub async fn open(&self) -> Result<FileReader> {
        let inner = match &self.source {
            FileSource::Disk(path) => ReaderInner::Disk(tokio::fs::File::open(path).await?),
            FileSource::Memory(data) => ReaderInner::Memory(Arc::clone(data)),
        };

        Ok(FileReader {
            inner,
            position: 0,
            size: self.size,
        })
    }
}

#[derive(Debug)]
enum ReaderInner {
    Disk(tokio::fs::File),
    Memory(Arc<[u8]>),
}

/// Sequential reader over a [`SelectedFile`].
#[derive(Debug)]
pub struct FileReader {
    inner: ReaderInner,
    position: u64,
    size: u64,
}

impl FileReader {
    /// Bytes not yet read.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.size - self.position
    }

    /// Read the next `[position, min(position + max_len, size))` range.
    ///
    /// Returns an empty vector once the end is reached.
    ///
    /// # Errors
    ///
    /// Returns an error if the file shrank since it was selected or reading
    /// fails.
    pub async fn read_chunk(&mut self, max_len: usize) -> Result<Vec<u8>> {
        let len = usize::try_from(self.remaining())
            .unwrap_or(usize::MAX)
            .min(max_len);

        let buf = match &mut self.inner {
            ReaderInner::Disk(file) => {
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf).await?;
                buf
            }
            ReaderInner::Memory(data) => {
                #[allow(clippy::cast_possible_truncation)]
                let start = self.position as usize;
                data[start..start + len].to_vec()
            }
        };

        self.position += len as u64;
        Ok(buf)
    }
}

/// The files chosen for the next send, in selection order.
///
/// A new selection replaces the previous one entirely.
#[derive(Debug, Clone, Default)]
pub struct SelectedFileSet {
    files: Vec<SelectedFile>,
}

impl SelectedFileSet {
    /// Create an empty selection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the given paths, keeping their order.
    ///
    /// # Errors
    ///
    /// Returns an error for the first path that is not a readable file.
    pub async fn from_paths(paths: &[PathBuf]) -> Result<Self> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(SelectedFile::from_path(path).await?);
        }
        Ok(Self { files })
    }

    /// Replace the selection.
    pub fn replace(&mut self, files: Vec<SelectedFile>) {
        self.files = files;
    }

    /// Selected files in order.
    #[must_use]
    pub fn files(&self) -> &[SelectedFile] {
        &self.files
    }

    /// Number of selected files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sum of all file sizes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(SelectedFile::size).sum()
    }
}

impl From<Vec<SelectedFile>> for SelectedFileSet {
    fn from(files: Vec<SelectedFile>) -> Self {
        Self { files }
    }
}

/// Reduce a file name from the wire to a safe single path component.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    let trimmed = last.trim();

    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        FALLBACK_FILE_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// First path in `dir` for `file_name` that does not exist yet.
#[must_use]
pub fn unique_output_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let as_path = Path::new(file_name);
    let stem = as_path
        .file_stem()
        .map_or_else(|| file_name.to_string(), |s| s.to_string_lossy().into_owned());
    let extension = as_path
        .extension()
        .map(|e| e.to_string_lossy().into_owned());

    (1u32..)
        .map(|n| match &extension {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// Directory that received files are saved into.
#[derive(Debug, Clone)]
pub struct DownloadDir {
    root: PathBuf,
}

impl DownloadDir {
    /// Save into `root`, creating it on first use.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Target directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Write a received file and return where it landed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file cannot
    /// be written.
    pub async fn save(&self, file: &ReceivedFile) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;

        let name = sanitize_file_name(&file.file_name);
        let path = unique_output_path(&self.root, &name);

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        let mut out = options.open(&path).await?;
        tokio::io::AsyncWriteExt::write_all(&mut out, &file.data).await?;
        tokio::io::AsyncWriteExt::flush(&mut out).await?;

        tracing::info!(
            "Saved {} ({}) to {}",
            name,
            format_size(file.data.len() as u64),
            path.display()
        );
        Ok(path)
    }
}

/// Format a file size for display.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
