//! In-memory sink, used by the HTTP service to serve documents back to callers.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{DocumentSink, SinkEntry, SinkError, SinkWriter};

/// A committed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    /// Row identifier the portal listed it under.
    pub identifier: String,
    /// Document bytes.
    pub bytes: Vec<u8>,
    /// File extension without the dot.
    pub extension: String,
}

/// Keeps committed documents in memory, keyed by [`SinkEntry::key`]. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    documents: Arc<DashMap<String, StoredDocument>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The document committed under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<StoredDocument> {
        self.documents.get(key).map(|doc| doc.value().clone())
    }

    /// First document, in key order, listed under `identifier`.
    #[must_use]
    pub fn find(&self, identifier: &str) -> Option<StoredDocument> {
        self.documents
            .iter()
            .filter(|doc| doc.value().identifier == identifier)
            .min_by(|a, b| a.key().cmp(b.key()))
            .map(|doc| doc.value().clone())
    }

    /// Number of committed documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether nothing has been committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Keys of committed documents, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.documents.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Row identifiers of committed documents, sorted. Repeats when
    /// different searches listed the same identifier.
    #[must_use]
    pub fn identifiers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .documents
            .iter()
            .map(|e| e.value().identifier.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn open(&self, entry: &SinkEntry<'_>) -> Result<Box<dyn SinkWriter>, SinkError> {
        Ok(Box::new(MemoryWriter {
            documents: Arc::clone(&self.documents),
            key: entry.key(),
            identifier: entry.identifier.to_string(),
            extension: entry.extension.to_string(),
            buffer: Vec::new(),
        }))
    }
}

struct MemoryWriter {
    documents: Arc<DashMap<String, StoredDocument>>,
    key: String,
    identifier: String,
    extension: String,
    buffer: Vec<u8>,
}

#[async_trait]
impl SinkWriter for MemoryWriter {
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<String, SinkError> {
        let Self {
            documents,
            key,
            identifier,
            extension,
            buffer,
        } = *self;
        let location = format!("memory://{key}");
        documents.insert(
            key,
            StoredDocument {
                identifier,
                bytes: buffer,
                extension,
            },
        );
        Ok(location)
    }

    async fn abort(self: Box<Self>) {}
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::query::CaseType;

    fn entry<'a>(identifier: &'a str, court: &'a str) -> SinkEntry<'a> {
        SinkEntry {
            identifier,
            court,
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            case_type: CaseType::Civil,
            extension: "pdf",
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let sink = MemorySink::new();
        let entry = entry("A", "Delhi HC");
        let mut writer = sink.open(&entry).await.unwrap();
        writer.write_chunk(b"%PDF-1.4").await.unwrap();
        assert!(sink.is_empty());
        writer.abort().await;
        assert!(sink.find("A").is_none());

        let mut writer = sink.open(&entry).await.unwrap();
        writer.write_chunk(b"%PDF-1.4").await.unwrap();
        writer.commit().await.unwrap();
        assert_eq!(sink.identifiers(), vec!["A".to_string()]);
        assert_eq!(sink.keys(), vec!["Delhi HC/2024-03-01/civil/A".to_string()]);
        assert_eq!(sink.get("Delhi HC/2024-03-01/civil/A").unwrap().extension, "pdf");
    }

    #[tokio::test]
    async fn test_same_identifier_from_two_courts_is_kept_twice() {
        let sink = MemorySink::new();
        for (court, body) in [("Court 1", b"%PDF-one"), ("Court 2", b"%PDF-two")] {
            let mut writer = sink.open(&entry("1", court)).await.unwrap();
            writer.write_chunk(body).await.unwrap();
            writer.commit().await.unwrap();
        }

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.identifiers(), vec!["1", "1"]);
        assert_eq!(
            sink.get("Court 2/2024-03-01/civil/1").unwrap().bytes,
            b"%PDF-two"
        );
        assert_eq!(sink.find("1").unwrap().bytes, b"%PDF-one");
    }
}
