//! SQLite-backed [`Store`] and [`UserStateStore`].
//!
//! Keyword search runs against the `chunks_fts` FTS5 table (BM25 rank);
//! vectors live as little-endian f32 BLOBs in `chunk_vectors` and are
//! scanned with cosine similarity. Graphs, profiles, and memories are
//! stored as JSON documents.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};

use hierarag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use hierarag_core::graph::KnowledgeGraph;
use hierarag_core::memory::ConversationMemory;
use hierarag_core::models::{Chunk, ChunkLevel, Document, DocumentMetadata, ProcessingStatus};
use hierarag_core::profile::UserProfile;
use hierarag_core::store::{
    ChunkCandidate, ChunkVectors, DocumentSummary, SearchFilter, Store, UserStateStore,
};
use hierarag_core::text::terms;
use hierarag_core::RagError;

const SNIPPET_CHARS: i64 = 240;

/// SQLite implementation of the store traits.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

/// A chunk whose vector is missing or stale for the current model.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    pub hash: String,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Chunks with no embedding for `model`, or whose text changed since.
    pub async fn pending_chunks(&self, model: &str, limit: Option<usize>) -> Result<Vec<PendingChunk>> {
        let limit_val = limit.map(|l| l as i64).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r#"
            SELECT c.id AS chunk_id, c.document_id, c.text, c.hash
            FROM chunks c
            LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model = ?
            WHERE e.chunk_id IS NULL OR e.hash != c.hash
            ORDER BY c.document_id, c.chunk_index
            LIMIT ?
            "#,
        )
        .bind(model)
        .bind(limit_val)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PendingChunk {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                text: row.get("text"),
                hash: row.get("hash"),
            })
            .collect())
    }

    /// Drop every stored vector.
    pub async fn clear_embeddings(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query("DELETE FROM chunk_vectors")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM embeddings").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(removed)
    }

    /// Ids of documents that pass the document part of `filter`.
    async fn allowed_documents(&self, filter: &SearchFilter) -> Result<HashSet<String>> {
        let docs = self.list_documents(filter.owner_id.as_deref()).await?;
        Ok(docs
            .into_iter()
            .filter(|d| filter.matches_document(d))
            .map(|d| d.id)
            .collect())
    }
}

/// Turn free text into an FTS5 query that cannot fail to parse:
/// every content term quoted, joined with OR.
fn fts_query(query: &str) -> Option<String> {
    let query_terms = terms(query);
    if query_terms.is_empty() {
        return None;
    }
    Some(
        query_terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn parse_metadata(json: &str) -> Result<DocumentMetadata> {
    serde_json::from_str(json).context("corrupt document metadata")
}

fn row_to_summary(row: &SqliteRow) -> Result<DocumentSummary> {
    let status: String = row.get("status");
    let metadata_json: String = row.get("metadata_json");
    let size: i64 = row.get("size_bytes");
    Ok(DocumentSummary {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        filename: row.get("filename"),
        content_type: row.get("content_type"),
        size_bytes: size.max(0) as u64,
        status: status.parse::<ProcessingStatus>()?,
        metadata: parse_metadata(&metadata_json)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
    let level: String = row.get("level");
    let child_ids_json: String = row.get("child_ids_json");
    let page: Option<i64> = row.get("page");
    let start: i64 = row.get("start_offset");
    let end: i64 = row.get("end_offset");
    let tokens: i64 = row.get("token_estimate");
    Ok(Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        hash: row.get("hash"),
        level: level.parse::<ChunkLevel>()?,
        parent_id: row.get("parent_id"),
        child_ids: serde_json::from_str(&child_ids_json).context("corrupt chunk child ids")?,
        page: page.map(|p| p as u32),
        start_offset: start.max(0) as usize,
        end_offset: end.max(0) as usize,
        token_estimate: tokens.max(0) as usize,
    })
}

fn row_to_candidate(row: &SqliteRow, raw_score: f64) -> Result<ChunkCandidate> {
    let level: String = row.get("level");
    let page: Option<i64> = row.get("page");
    Ok(ChunkCandidate {
        chunk_id: row.get("chunk_id"),
        document_id: row.get("document_id"),
        raw_score,
        snippet: row.get("snippet"),
        level: level.parse::<ChunkLevel>()?,
        parent_id: row.get("parent_id"),
        page: page.map(|p| p as u32),
    })
}

const CHUNK_COLUMNS: &str = "id, document_id, chunk_index, text, hash, level, parent_id, \
     child_ids_json, page, start_offset, end_offset, token_estimate";

const SUMMARY_COLUMNS: &str = "id, owner_id, filename, content_type, size_bytes, status, \
     metadata_json, created_at, updated_at";

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_document(&self, doc: &Document) -> Result<String> {
        let metadata_json = serde_json::to_string(&doc.metadata)?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, owner_id, filename, content_type, size_bytes, status,
                                   metadata_json, body, created_at, updated_at, content_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                filename = excluded.filename,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                status = excluded.status,
                metadata_json = excluded.metadata_json,
                body = excluded.body,
                updated_at = excluded.updated_at,
                content_hash = excluded.content_hash
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.owner_id)
        .bind(&doc.filename)
        .bind(&doc.content_type)
        .bind(doc.size_bytes as i64)
        .bind(doc.status.as_str())
        .bind(&metadata_json)
        .bind(&doc.body)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .bind(&doc.content_hash)
        .execute(&self.pool)
        .await?;

        Ok(doc.id.clone())
    }

    async fn claim_document(&self, doc: &Document) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        // The insert takes the write lock, so no other claim can interleave.
        let inserted = sqlx::query(
            r#"
            INSERT INTO documents (id, owner_id, filename, content_type, size_bytes, status,
                                   metadata_json, body, created_at, updated_at, content_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.owner_id)
        .bind(&doc.filename)
        .bind(&doc.content_type)
        .bind(doc.size_bytes as i64)
        .bind(ProcessingStatus::Uploading.as_str())
        .bind(serde_json::to_string(&doc.metadata)?)
        .bind(&doc.body)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .bind(&doc.content_hash)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        let row = sqlx::query("SELECT status, metadata_json, updated_at FROM documents WHERE id = ?")
            .bind(&doc.id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("document {}", doc.id)))?;
        let status: String = row.get("status");
        let current = status.parse::<ProcessingStatus>()?;
        if !inserted && !current.is_terminal() {
            return Err(RagError::InvalidInput(format!(
                "document {} is still {}",
                doc.id, current
            ))
            .into());
        }
        let next = current.transition(ProcessingStatus::Processing)?;

        let metadata_json: String = row.get("metadata_json");
        let updated_at: i64 = row.get("updated_at");
        let mut metadata = parse_metadata(&metadata_json)?;
        metadata.error = None;
        sqlx::query("UPDATE documents SET status = ?, metadata_json = ?, updated_at = ? WHERE id = ?")
            .bind(next.as_str())
            .bind(serde_json::to_string(&metadata)?)
            .bind(updated_at.max(chrono::Utc::now().timestamp()))
            .bind(&doc.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(document = %doc.id, inserted, "claimed for processing");
        Ok(())
    }

    async fn set_status(
        &self,
        id: &str,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        // Take the write lock before reading so concurrent ingests wait instead of failing.
        sqlx::query("UPDATE documents SET status = status WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let row = sqlx::query("SELECT status, metadata_json, updated_at FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("document {}", id)))?;

        let current: String = row.get("status");
        let metadata_json: String = row.get("metadata_json");
        let updated_at: i64 = row.get("updated_at");
        let next = current.parse::<ProcessingStatus>()?.transition(status)?;

        let mut metadata = parse_metadata(&metadata_json)?;
        match next {
            ProcessingStatus::Failed => metadata.error = error.map(str::to_string),
            ProcessingStatus::Processing => metadata.error = None,
            _ => {}
        }

        sqlx::query("UPDATE documents SET status = ?, metadata_json = ?, updated_at = ? WHERE id = ?")
            .bind(next.as_str())
            .bind(serde_json::to_string(&metadata)?)
            .bind(updated_at.max(chrono::Utc::now().timestamp()))
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!(document = id, status = %next, "status changed");
        Ok(())
    }

    async fn replace_chunks(
        &self,
        doc_id: &str,
        chunks: &[Chunk],
        vectors: Option<ChunkVectors<'_>>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(doc_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(doc_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        let now = chrono::Utc::now().timestamp();
        for (i, chunk) in chunks.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, text, hash, level, parent_id,
                                    child_ids_json, page, start_offset, end_offset, token_estimate)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(chunk.level.as_str())
            .bind(&chunk.parent_id)
            .bind(serde_json::to_string(&chunk.child_ids)?)
            .bind(chunk.page.map(|p| p as i64))
            .bind(chunk.start_offset as i64)
            .bind(chunk.end_offset as i64)
            .bind(chunk.token_estimate as i64)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(&chunk.document_id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;

            if let Some(cv) = vectors {
                if let Some(vec) = cv.vectors.get(i) {
                    sqlx::query(
                        "INSERT INTO chunk_vectors (chunk_id, document_id, embedding) VALUES (?, ?, ?)",
                    )
                    .bind(&chunk.id)
                    .bind(doc_id)
                    .bind(vec_to_blob(vec))
                    .execute(&mut *tx)
                    .await?;

                    sqlx::query(
                        "INSERT INTO embeddings (chunk_id, model, dims, created_at, hash) VALUES (?, ?, ?, ?, ?)",
                    )
                    .bind(&chunk.id)
                    .bind(cv.model)
                    .bind(vec.len() as i64)
                    .bind(now)
                    .bind(&chunk.hash)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_embedding(
        &self,
        chunk_id: &str,
        doc_id: &str,
        vector: &[f32],
        model: &str,
        content_hash: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO embeddings (chunk_id, model, dims, created_at, hash)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                created_at = excluded.created_at,
                hash = excluded.hash
            "#,
        )
        .bind(chunk_id)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(now)
        .bind(content_hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, document_id, embedding)
            VALUES (?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                document_id = excluded.document_id,
                embedding = excluded.embedding
            "#,
        )
        .bind(chunk_id)
        .bind(doc_id)
        .bind(vec_to_blob(vector))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {}, body, content_hash FROM documents WHERE id = ?",
            SUMMARY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };
        let s = row_to_summary(&row)?;
        Ok(Some(Document {
            id: s.id,
            owner_id: s.owner_id,
            filename: s.filename,
            content_type: s.content_type,
            size_bytes: s.size_bytes,
            status: s.status,
            metadata: s.metadata,
            body: row.get("body"),
            created_at: s.created_at,
            updated_at: s.updated_at,
            content_hash: row.get("content_hash"),
        }))
    }

    async fn get_document_summary(&self, id: &str) -> Result<Option<DocumentSummary>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            SUMMARY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_summary).transpose()
    }

    async fn list_documents(&self, owner_id: Option<&str>) -> Result<Vec<DocumentSummary>> {
        let rows = match owner_id {
            Some(owner) => {
                sqlx::query(&format!(
                    "SELECT {} FROM documents WHERE owner_id = ? ORDER BY updated_at DESC, id ASC",
                    SUMMARY_COLUMNS
                ))
                .bind(owner)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM documents ORDER BY updated_at DESC, id ASC",
                    SUMMARY_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_summary).collect()
    }

    async fn document_chunks(&self, doc_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC",
            CHUNK_COLUMNS
        ))
        .bind(doc_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_chunk).collect()
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM chunks WHERE id IN ({})",
            CHUNK_COLUMNS, placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut by_id: HashMap<String, Chunk> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let chunk = row_to_chunk(row)?;
            by_id.insert(chunk.id.clone(), chunk);
        }
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM document_graphs WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed > 0)
    }

    async fn keyword_search(
        &self,
        query: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkCandidate>> {
        let fts = match fts_query(query) {
            Some(q) => q,
            None => return Ok(Vec::new()),
        };
        let allowed = self.allowed_documents(filter).await?;
        if allowed.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT chunks_fts.chunk_id, chunks_fts.document_id, chunks_fts.rank AS rank,
                   snippet(chunks_fts, 2, '', '', '...', 48) AS snippet,
                   c.level, c.parent_id, c.page
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH ?
            ORDER BY chunks_fts.rank, chunks_fts.chunk_id
            "#,
        )
        .bind(&fts)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::new();
        for row in &rows {
            let document_id: String = row.get("document_id");
            if !allowed.contains(&document_id) {
                continue;
            }
            let rank: f64 = row.get("rank");
            let cand = row_to_candidate(row, -rank)?;
            if !filter.matches_chunk(cand.level, cand.page) {
                continue;
            }
            candidates.push(cand);
            if candidates.len() >= limit {
                break;
            }
        }
        Ok(candidates)
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ChunkCandidate>> {
        let allowed = self.allowed_documents(filter).await?;
        if allowed.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.document_id, cv.embedding,
                   COALESCE(substr(c.text, 1, ?), '') AS snippet,
                   c.level, c.parent_id, c.page
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            "#,
        )
        .bind(SNIPPET_CHARS)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::new();
        for row in &rows {
            let document_id: String = row.get("document_id");
            if !allowed.contains(&document_id) {
                continue;
            }
            let blob: Vec<u8> = row.get("embedding");
            let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
            let cand = row_to_candidate(row, similarity)?;
            if filter.matches_chunk(cand.level, cand.page) {
                candidates.push(cand);
            }
        }

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn replace_document_graph(&self, doc_id: &str, graph: &KnowledgeGraph) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO document_graphs (document_id, graph_json, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                graph_json = excluded.graph_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(doc_id)
        .bind(serde_json::to_string(graph)?)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_graph(&self, doc_id: Option<&str>) -> Result<KnowledgeGraph> {
        let rows = match doc_id {
            Some(id) => {
                sqlx::query("SELECT graph_json FROM document_graphs WHERE document_id = ?")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT graph_json FROM document_graphs ORDER BY document_id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        let mut merged = KnowledgeGraph::new();
        for row in &rows {
            let json: String = row.get("graph_json");
            let graph: KnowledgeGraph =
                serde_json::from_str(&json).context("corrupt knowledge graph")?;
            merged.merge(graph);
        }
        Ok(merged)
    }
}

#[async_trait]
impl UserStateStore for SqliteStore {
    async fn load_profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT profile_json FROM user_profiles WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        json.map(|j| serde_json::from_str(&j).context("corrupt user profile"))
            .transpose()
    }

    async fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_profiles (user_id, profile_json, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                profile_json = excluded.profile_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&profile.user_id)
        .bind(serde_json::to_string(profile)?)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_memory(&self, user_id: &str) -> Result<Option<ConversationMemory>> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT memory_json FROM user_memory WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        json.map(|j| serde_json::from_str(&j).context("corrupt conversation memory"))
            .transpose()
    }

    async fn save_memory(&self, memory: &ConversationMemory) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_memory (user_id, memory_json, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                memory_json = excluded.memory_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&memory.user_id)
        .bind(serde_json::to_string(memory)?)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
