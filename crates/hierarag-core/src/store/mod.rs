//! Storage abstraction for hierarag.
//!
//! The [`Store`] trait covers documents, chunks, vectors, and per-document
//! knowledge graphs; [`UserStateStore`] covers profiles and conversation
//! memory. The retriever and the ingestion pipeline only talk to these
//! traits, so the SQLite store in the app crate and [`InMemoryStore`] are
//! interchangeable.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

pub use memory::InMemoryStore;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::graph::KnowledgeGraph;
use crate::memory::ConversationMemory;
use crate::models::{Chunk, ChunkLevel, Document, DocumentMetadata, ProcessingStatus};
use crate::profile::UserProfile;

/// A candidate chunk returned from keyword or vector search.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk_id: String,
    pub document_id: String,
    /// Raw backend score (BM25-derived or cosine similarity). Higher is better.
    pub raw_score: f64,
    /// Text excerpt for display.
    pub snippet: String,
    pub level: ChunkLevel,
    pub parent_id: Option<String>,
    pub page: Option<u32>,
}

/// Vectors for a batch of chunks, index-aligned with the chunk slice.
#[derive(Debug, Clone, Copy)]
pub struct ChunkVectors<'a> {
    pub model: &'a str,
    pub vectors: &'a [Vec<f32>],
}

/// Lightweight document view: everything except the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub owner_id: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub status: ProcessingStatus,
    pub metadata: DocumentMetadata,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Document> for DocumentSummary {
    fn from(d: &Document) -> Self {
        Self {
            id: d.id.clone(),
            owner_id: d.owner_id.clone(),
            filename: d.filename.clone(),
            content_type: d.content_type.clone(),
            size_bytes: d.size_bytes,
            status: d.status,
            metadata: d.metadata.clone(),
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

/// Full document response: metadata, body, and chunks.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub owner_id: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub status: ProcessingStatus,
    pub metadata: DocumentMetadata,
    pub created_at: String,
    pub updated_at: String,
    pub body: String,
    pub chunks: Vec<ChunkResponse>,
}

/// A single chunk within a [`DocumentResponse`].
#[derive(Debug, Clone, Serialize)]
pub struct ChunkResponse {
    pub id: String,
    pub index: i64,
    pub level: ChunkLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub text: String,
}

impl DocumentResponse {
    pub fn from_parts(doc: Document, mut chunks: Vec<Chunk>) -> Self {
        chunks.sort_by_key(|c| c.chunk_index);
        Self {
            created_at: format_ts_iso(doc.created_at),
            updated_at: format_ts_iso(doc.updated_at),
            id: doc.id,
            owner_id: doc.owner_id,
            filename: doc.filename,
            content_type: doc.content_type,
            size_bytes: doc.size_bytes,
            status: doc.status,
            metadata: doc.metadata,
            body: doc.body,
            chunks: chunks
                .into_iter()
                .map(|c| ChunkResponse {
                    id: c.id,
                    index: c.chunk_index,
                    level: c.level,
                    parent_id: c.parent_id,
                    page: c.page,
                    text: c.text,
                })
                .collect(),
        }
    }
}

/// Restrictions applied to keyword and vector search.
///
/// Only `complete` documents are ever searchable; the fields narrow that set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilter {
    pub owner_id: Option<String>,
    /// Restrict to these documents (empty = all).
    pub document_ids: Vec<String>,
    pub language: Option<String>,
    /// Document must carry at least one of these tags (empty = any).
    pub tags: Vec<String>,
    /// Inclusive page range; unpaginated chunks count as page 1.
    pub page_range: Option<(u32, u32)>,
    /// Only documents updated at or after this Unix timestamp.
    pub since: Option<i64>,
    /// Also search `parent` chunks.
    pub include_parents: bool,
}

impl SearchFilter {
    pub fn for_owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ..Self::default()
        }
    }

    pub fn matches_document(&self, doc: &DocumentSummary) -> bool {
        if doc.status != ProcessingStatus::Complete {
            return false;
        }
        if let Some(owner) = &self.owner_id {
            if &doc.owner_id != owner {
                return false;
            }
        }
        if !self.document_ids.is_empty() && !self.document_ids.contains(&doc.id) {
            return false;
        }
        if let Some(lang) = &self.language {
            if doc.metadata.language.as_deref() != Some(lang.as_str()) {
                return false;
            }
        }
        if !self.tags.is_empty()
            && !doc
                .metadata
                .tags
                .iter()
                .any(|t| self.tags.iter().any(|f| f.eq_ignore_ascii_case(t)))
        {
            return false;
        }
        if let Some(since) = self.since {
            if doc.updated_at < since {
                return false;
            }
        }
        true
    }

    pub fn matches_chunk(&self, level: ChunkLevel, page: Option<u32>) -> bool {
        if !self.include_parents && !level.is_leaf() {
            return false;
        }
        if let Some((lo, hi)) = self.page_range {
            let p = page.unwrap_or(1);
            if p < lo || p > hi {
                return false;
            }
        }
        true
    }
}

/// Format a Unix timestamp as ISO 8601.
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Document, chunk, vector, and graph storage.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](Store::upsert_document) | Insert or update a document row |
/// | [`claim_document`](Store::claim_document) | Atomically start a processing run |
/// | [`set_status`](Store::set_status) | Validated lifecycle transition |
/// | [`replace_chunks`](Store::replace_chunks) | Replace all chunks (and optionally vectors) |
/// | [`upsert_embedding`](Store::upsert_embedding) | Store one chunk vector |
/// | [`keyword_search`](Store::keyword_search) / [`vector_search`](Store::vector_search) | Candidate retrieval |
/// | [`replace_document_graph`](Store::replace_document_graph) / [`load_graph`](Store::load_graph) | Knowledge graph persistence |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a document. Returns its id.
    async fn upsert_document(&self, doc: &Document) -> Result<String>;

    /// Start a processing run on `doc.id`.
    ///
    /// Inserts `doc` when no row exists; otherwise leaves the stored fields
    /// alone. Either way the document ends up in `processing` with its error
    /// cleared. The check and the transition happen atomically, so of two
    /// concurrent claims on one id only the first succeeds; the other fails
    /// with [`RagError::InvalidInput`](crate::RagError::InvalidInput) while
    /// the run is in flight.
    async fn claim_document(&self, doc: &Document) -> Result<()>;

    /// Move a document to `status`, validating the transition.
    ///
    /// Entering `failed` records `error` in the metadata; entering
    /// `processing` clears any previous error. Unknown ids fail with
    /// [`RagError::NotFound`](crate::RagError::NotFound).
    async fn set_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Replace all chunks for a document, optionally storing vectors.
    async fn replace_chunks(
        &self,
        doc_id: &str,
        chunks: &[Chunk],
        vectors: Option<ChunkVectors<'_>>,
    ) -> Result<()>;

    /// Store or update the vector for one chunk.
    async fn upsert_embedding(
        &self,
        chunk_id: &str,
        doc_id: &str,
        vector: &[f32],
        model: &str,
        content_hash: &str,
    ) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    async fn get_document_summary(&self, id: &str) -> Result<Option<DocumentSummary>>;

    /// Documents ordered by `updated_at` descending, optionally for one owner.
    async fn list_documents(&self, owner_id: Option<&str>) -> Result<Vec<DocumentSummary>>;

    /// All chunks of a document in index order.
    async fn document_chunks(&self, doc_id: &str) -> Result<Vec<Chunk>>;

    /// Chunks by id, in request order. Unknown ids are skipped.
    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>>;

    /// Delete a document with its chunks, vectors, and graph.
    /// Returns `false` when the document did not exist.
    async fn delete_document(&self, id: &str) -> Result<bool>;

    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkCandidate>>;

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkCandidate>>;

    /// Replace the stored graph of one document.
    async fn replace_document_graph(&self, doc_id: &str, graph: &KnowledgeGraph) -> Result<()>;

    /// One document's graph, or the merge of every document's graph.
    async fn load_graph(&self, doc_id: Option<&str>) -> Result<KnowledgeGraph>;
}

/// Per-user personalization state.
#[async_trait]
pub trait UserStateStore: Send + Sync {
    async fn load_profile(&self, user_id: &str) -> Result<Option<UserProfile>>;
    async fn save_profile(&self, profile: &UserProfile) -> Result<()>;
    async fn load_memory(&self, user_id: &str) -> Result<Option<ConversationMemory>>;
    async fn save_memory(&self, memory: &ConversationMemory) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> DocumentSummary {
        DocumentSummary {
            id: "d1".into(),
            owner_id: "alice".into(),
            filename: "notes.md".into(),
            content_type: "text/markdown".into(),
            size_bytes: 10,
            status: ProcessingStatus::Complete,
            metadata: DocumentMetadata {
                language: Some("en".into()),
                tags: vec!["Databases".into()],
                ..DocumentMetadata::default()
            },
            created_at: 100,
            updated_at: 200,
        }
    }

    #[test]
    fn test_filter_document_fields() {
        let doc = summary();
        assert!(SearchFilter::default().matches_document(&doc));
        assert!(SearchFilter::for_owner("alice").matches_document(&doc));
        assert!(!SearchFilter::for_owner("bob").matches_document(&doc));

        let f = SearchFilter {
            tags: vec!["databases".into()],
            language: Some("en".into()),
            since: Some(150),
            ..SearchFilter::default()
        };
        assert!(f.matches_document(&doc));
        let f = SearchFilter {
            since: Some(201),
            ..SearchFilter::default()
        };
        assert!(!f.matches_document(&doc));
    }

    #[test]
    fn test_filter_requires_complete_status() {
        let mut doc = summary();
        for status in [
            ProcessingStatus::Uploading,
            ProcessingStatus::Processing,
            ProcessingStatus::Indexing,
            ProcessingStatus::Failed,
        ] {
            doc.status = status;
            assert!(!SearchFilter::default().matches_document(&doc), "{}", status);
        }
    }

    #[test]
    fn test_filter_chunk_level_and_pages() {
        let f = SearchFilter::default();
        assert!(f.matches_chunk(ChunkLevel::Child, None));
        assert!(!f.matches_chunk(ChunkLevel::Parent, None));
        let f = SearchFilter {
            page_range: Some((2, 3)),
            include_parents: true,
            ..SearchFilter::default()
        };
        assert!(f.matches_chunk(ChunkLevel::Parent, Some(2)));
        assert!(!f.matches_chunk(ChunkLevel::Flat, None));
        assert!(!f.matches_chunk(ChunkLevel::Flat, Some(4)));
    }

    #[test]
    fn test_format_ts_iso() {
        assert_eq!(format_ts_iso(0), "1970-01-01T00:00:00Z");
    }
}
