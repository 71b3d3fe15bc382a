//! Local directory sink.
//!
//! Documents land at `<root>/<court>/<date>/<case type>/<identifier>.<ext>`.
//! Bytes go to a `.part` file next to the target and are renamed into place
//! on commit.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use super::filename::sanitize_component;
use super::{DocumentSink, SinkEntry, SinkError, SinkWriter};

/// Writes documents under a root directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    /// Creates a sink rooted at `root`; directories are created on demand.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final path for an entry.
    #[must_use]
    pub fn path_for(&self, entry: &SinkEntry<'_>) -> PathBuf {
        let court = non_empty_or(sanitize_component(entry.court), "court");
        let stem = non_empty_or(sanitize_component(entry.identifier), "document");
        let extension = non_empty_or(sanitize_component(entry.extension), "bin");
        self.root
            .join(court)
            .join(entry.date.to_string())
            .join(entry.case_type.as_str())
            .join(format!("{stem}.{extension}"))
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

#[async_trait]
impl DocumentSink for DirectorySink {
    async fn open(&self, entry: &SinkEntry<'_>) -> Result<Box<dyn SinkWriter>, SinkError> {
        let target = self.path_for(entry);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError::io(parent, e))?;
        }
        let mut partial = target.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let file = File::create(&partial)
            .await
            .map_err(|e| SinkError::io(&partial, e))?;
        debug!(path = %partial.display(), "opened partial file");
        Ok(Box::new(DirectoryWriter {
            file: BufWriter::new(file),
            partial,
            target,
        }))
    }
}

struct DirectoryWriter {
    file: BufWriter<File>,
    partial: PathBuf,
    target: PathBuf,
}

#[async_trait]
impl SinkWriter for DirectoryWriter {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| SinkError::io(&self.partial, e))
    }

    async fn commit(self: Box<Self>) -> Result<String, SinkError> {
        let Self {
            mut file,
            partial,
            target,
        } = *self;
        file.flush()
            .await
            .map_err(|e| SinkError::io(&partial, e))?;
        file.get_mut()
            .sync_all()
            .await
            .map_err(|e| SinkError::io(&partial, e))?;
        drop(file);
        fs::rename(&partial, &target)
            .await
            .map_err(|e| SinkError::io(&target, e))?;
        debug!(path = %target.display(), "committed document");
        Ok(target.display().to_string())
    }

    async fn abort(self: Box<Self>) {
        let Self { file, partial, .. } = *self;
        drop(file);
        if let Err(error) = fs::remove_file(&partial).await {
            warn!(path = %partial.display(), %error, "failed to remove partial file");
        } else {
            debug!(path = %partial.display(), "discarded partial file");
        }
    }
}
