//! In-memory [`Store`] and [`UserStateStore`] for tests and embedding.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Vector search is brute-force
//! cosine similarity; keyword search scores chunks by query-term counts.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::RagError;
use crate::graph::KnowledgeGraph;
use crate::memory::ConversationMemory;
use crate::models::{Chunk, Document, ProcessingStatus};
use crate::profile::UserProfile;
use crate::text::{excerpt, terms, tokens};

use super::{ChunkCandidate, ChunkVectors, DocumentSummary, SearchFilter, Store, UserStateStore};

const SNIPPET_CHARS: usize = 240;

struct StoredVector {
    document_id: String,
    vector: Vec<f32>,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<String, Document>,
    /// doc id → chunks in index order
    chunks: HashMap<String, Vec<Chunk>>,
    /// chunk id → vector
    vectors: HashMap<String, StoredVector>,
    graphs: BTreeMap<String, KnowledgeGraph>,
    profiles: HashMap<String, UserProfile>,
    memories: HashMap<String, ConversationMemory>,
}

/// In-memory store. All state lives behind one lock.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

impl Inner {
    /// Chunks passing both the document and chunk parts of `filter`.
    fn searchable<'a>(&'a self, filter: &'a SearchFilter) -> impl Iterator<Item = &'a Chunk> + 'a {
        self.chunks
            .iter()
            .filter(move |(doc_id, _)| {
                self.docs
                    .get(*doc_id)
                    .is_some_and(|d| filter.matches_document(&DocumentSummary::from(d)))
            })
            .flat_map(|(_, chunks)| chunks.iter())
            .filter(move |c| filter.matches_chunk(c.level, c.page))
    }
}

fn candidate(chunk: &Chunk, raw_score: f64) -> ChunkCandidate {
    ChunkCandidate {
        chunk_id: chunk.id.clone(),
        document_id: chunk.document_id.clone(),
        raw_score,
        snippet: excerpt(&chunk.text, SNIPPET_CHARS),
        level: chunk.level,
        parent_id: chunk.parent_id.clone(),
        page: chunk.page,
    }
}

fn rank(mut candidates: Vec<ChunkCandidate>, limit: usize) -> Vec<ChunkCandidate> {
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(limit);
    candidates
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_document(&self, doc: &Document) -> Result<String> {
        let mut inner = self.write()?;
        inner.docs.insert(doc.id.clone(), doc.clone());
        Ok(doc.id.clone())
    }

    async fn claim_document(&self, doc: &Document) -> Result<()> {
        let mut inner = self.write()?;
        match inner.docs.get(&doc.id) {
            Some(existing) if !existing.status.is_terminal() => {
                return Err(RagError::InvalidInput(format!(
                    "document {} is still {}",
                    doc.id, existing.status
                ))
                .into());
            }
            Some(_) => {}
            None => {
                let fresh = Document {
                    status: ProcessingStatus::Uploading,
                    ..doc.clone()
                };
                inner.docs.insert(doc.id.clone(), fresh);
            }
        }
        let stored = inner
            .docs
            .get_mut(&doc.id)
            .ok_or_else(|| RagError::NotFound(format!("document {}", doc.id)))?;
        stored.status = stored.status.transition(ProcessingStatus::Processing)?;
        stored.metadata.error = None;
        stored.updated_at = stored.updated_at.max(chrono::Utc::now().timestamp());
        Ok(())
    }

    async fn set_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.write()?;
        let doc = inner
            .docs
            .get_mut(id)
            .ok_or_else(|| RagError::NotFound(format!("document {}", id)))?;
        doc.status = doc.status.transition(status)?;
        match status {
            ProcessingStatus::Failed => doc.metadata.error = error.map(str::to_string),
            ProcessingStatus::Processing => doc.metadata.error = None,
            _ => {}
        }
        doc.updated_at = doc.updated_at.max(chrono::Utc::now().timestamp());
        Ok(())
    }

    async fn replace_chunks(
        &self,
        doc_id: &str,
        chunks: &[Chunk],
        vectors: Option<ChunkVectors<'_>>,
    ) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.docs.contains_key(doc_id) {
            return Err(RagError::NotFound(format!("document {}", doc_id)).into());
        }
        inner.vectors.retain(|_, v| v.document_id != doc_id);
        if let Some(cv) = vectors {
            for (c, v) in chunks.iter().zip(cv.vectors.iter()) {
                inner.vectors.insert(
                    c.id.clone(),
                    StoredVector {
                        document_id: doc_id.to_string(),
                        vector: v.clone(),
                    },
                );
            }
        }
        let mut sorted = chunks.to_vec();
        sorted.sort_by_key(|c| c.chunk_index);
        inner.chunks.insert(doc_id.to_string(), sorted);
        Ok(())
    }

    async fn upsert_embedding(
        &self,
        chunk_id: &str,
        doc_id: &str,
        vector: &[f32],
        _model: &str,
        _content_hash: &str,
    ) -> Result<()> {
        let mut inner = self.write()?;
        inner.vectors.insert(
            chunk_id.to_string(),
            StoredVector {
                document_id: doc_id.to_string(),
                vector: vector.to_vec(),
            },
        );
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.docs.get(id).cloned())
    }

    async fn get_document_summary(&self, id: &str) -> Result<Option<DocumentSummary>> {
        Ok(self.read()?.docs.get(id).map(DocumentSummary::from))
    }

    async fn list_documents(&self, owner_id: Option<&str>) -> Result<Vec<DocumentSummary>> {
        let inner = self.read()?;
        let mut docs: Vec<DocumentSummary> = inner
            .docs
            .values()
            .filter(|d| owner_id.map_or(true, |o| d.owner_id == o))
            .map(DocumentSummary::from)
            .collect();
        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn document_chunks(&self, doc_id: &str) -> Result<Vec<Chunk>> {
        Ok(self.read()?.chunks.get(doc_id).cloned().unwrap_or_default())
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let inner = self.read()?;
        let by_id: HashMap<&str, &Chunk> = inner
            .chunks
            .values()
            .flatten()
            .map(|c| (c.id.as_str(), c))
            .collect();
        Ok(ids
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).map(|c| (*c).clone()))
            .collect())
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut inner = self.write()?;
        let existed = inner.docs.remove(id).is_some();
        inner.chunks.remove(id);
        inner.vectors.retain(|_, v| v.document_id != id);
        inner.graphs.remove(id);
        Ok(existed)
    }

    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkCandidate>> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.read()?;
        let candidates = inner
            .searchable(filter)
            .filter_map(|c| {
                let chunk_tokens = tokens(&c.text);
                let hits = chunk_tokens
                    .iter()
                    .filter(|t| query_terms.contains(t.as_str()))
                    .count();
                (hits > 0).then(|| candidate(c, hits as f64))
            })
            .collect();
        Ok(rank(candidates, limit))
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkCandidate>> {
        let inner = self.read()?;
        let candidates = inner
            .searchable(filter)
            .filter_map(|c| {
                inner
                    .vectors
                    .get(&c.id)
                    .map(|v| candidate(c, cosine_similarity(query_vec, &v.vector) as f64))
            })
            .collect();
        Ok(rank(candidates, limit))
    }

    async fn replace_document_graph(&self, doc_id: &str, graph: &KnowledgeGraph) -> Result<()> {
        self.write()?
            .graphs
            .insert(doc_id.to_string(), graph.clone());
        Ok(())
    }

    async fn load_graph(&self, doc_id: Option<&str>) -> Result<KnowledgeGraph> {
        let inner = self.read()?;
        match doc_id {
            Some(id) => Ok(inner.graphs.get(id).cloned().unwrap_or_default()),
            None => {
                let mut merged = KnowledgeGraph::new();
                for g in inner.graphs.values() {
                    merged.merge(g.clone());
                }
                Ok(merged)
            }
        }
    }
}

#[async_trait]
impl UserStateStore for InMemoryStore {
    async fn load_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        Ok(self.read()?.profiles.get(user_id).cloned())
    }

    async fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        self.write()?
            .profiles
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn load_memory(&self, user_id: &str) -> Result<Option<ConversationMemory>> {
        Ok(self.read()?.memories.get(user_id).cloned())
    }

    async fn save_memory(&self, memory: &ConversationMemory) -> Result<()> {
        self.write()?
            .memories
            .insert(memory.user_id.clone(), memory.clone());
        Ok(())
    }
}
