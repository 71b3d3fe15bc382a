//! Storage destinations for retrieved documents.
//!
//! A [`DocumentSink`] hands out a [`SinkWriter`] per document. Bytes are
//! streamed in with [`SinkWriter::write_chunk`] and only become visible on
//! [`SinkWriter::commit`]; [`SinkWriter::abort`] discards them, so a
//! truncated or failed download never leaves a partial document behind.

mod directory;
mod filename;
mod memory;

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures_util::{Stream, StreamExt};
use thiserror::Error;

pub use directory::DirectorySink;
pub use filename::{content_type_for_extension, extension_from_content_type, sanitize_component};
pub use memory::{MemorySink, StoredDocument};

use crate::paginator::{DocumentDescriptor, document_key};
use crate::query::CaseType;

/// Errors raised by sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Filesystem failure.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The byte source failed mid-stream.
    #[error("byte stream for {identifier} failed: {reason}")]
    Stream {
        /// Document identifier.
        identifier: String,
        /// What failed.
        reason: String,
    },
}

impl SinkError {
    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Where a document belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkEntry<'a> {
    /// Stable document identifier.
    pub identifier: &'a str,
    /// Court label.
    pub court: &'a str,
    /// Cause-list date.
    pub date: NaiveDate,
    /// Case type of the list.
    pub case_type: CaseType,
    /// File extension without the dot.
    pub extension: &'a str,
}

impl<'a> SinkEntry<'a> {
    /// Entry for a descriptor stored with `extension`.
    #[must_use]
    pub fn for_document(descriptor: &'a DocumentDescriptor, extension: &'a str) -> Self {
        Self {
            identifier: descriptor.identifier(),
            court: descriptor.court(),
            date: descriptor.date(),
            case_type: descriptor.case_type(),
            extension,
        }
    }

    /// Job-wide key of the document.
    #[must_use]
    pub fn key(&self) -> String {
        document_key(self.court, self.date, self.case_type, self.identifier)
    }
}

/// Stream of byte chunks fed to [`DocumentSink::write`].
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, SinkError>> + Send>>;

/// A destination for documents.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Starts writing one document.
    async fn open(&self, entry: &SinkEntry<'_>) -> Result<Box<dyn SinkWriter>, SinkError>;

    /// Writes a whole stream and commits it, returning the document's location.
    ///
    /// The write is aborted if the stream or the sink fails.
    async fn write(&self, entry: &SinkEntry<'_>, mut chunks: ByteStream) -> Result<String, SinkError> {
        let mut writer = self.open(entry).await?;
        while let Some(chunk) = chunks.next().await {
            let outcome = match chunk {
                Ok(bytes) => writer.write_chunk(&bytes).await,
                Err(error) => Err(error),
            };
            if let Err(error) = outcome {
                writer.abort().await;
                return Err(error);
            }
        }
        writer.commit().await
    }
}

/// In-progress write of one document.
#[async_trait]
pub trait SinkWriter: Send {
    /// Appends bytes.
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkError>;

    /// Publishes the document and returns its location.
    async fn commit(self: Box<Self>) -> Result<String, SinkError>;

    /// Discards everything written.
    async fn abort(self: Box<Self>);
}
