//! `hrag embed pending|rebuild`: backfill chunk vectors outside ingestion.

use anyhow::{bail, Result};

use hierarag_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, embed_texts};
use crate::sqlite_store::{PendingChunk, SqliteStore};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct EmbedReport {
    pub total: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// Embed `pending` in batches. A failed batch is counted and skipped.
pub async fn embed_chunks(
    store: &SqliteStore,
    config: &Config,
    pending: &[PendingChunk],
    batch_size: usize,
) -> Result<EmbedReport> {
    let provider = create_provider(&config.embedding)?;
    let model = provider.model_name().to_string();
    let mut report = EmbedReport {
        total: pending.len(),
        ..EmbedReport::default()
    };

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        match embed_texts(&config.embedding, &texts).await {
            Ok(vectors) => {
                for (item, vec) in batch.iter().zip(vectors.iter()) {
                    store
                        .upsert_embedding(&item.chunk_id, &item.document_id, vec, &model, &item.hash)
                        .await?;
                    report.embedded += 1;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, batch = batch.len(), "embedding batch failed");
                report.failed += batch.len();
            }
        }
    }
    Ok(report)
}

fn require_embeddings(config: &Config) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    Ok(())
}

pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    require_embeddings(config)?;
    let store = SqliteStore::new(db::connect(config).await?);
    let result = embed_pending(&store, config, limit, batch_size, dry_run).await;
    store.close().await;
    result
}

async fn embed_pending(
    store: &SqliteStore,
    config: &Config,
    limit: Option<usize>,
    batch_size: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let model = create_provider(&config.embedding)?.model_name().to_string();
    let pending = store.pending_chunks(&model, limit).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending.len());
        return Ok(());
    }
    if pending.is_empty() {
        println!("embed pending");
        println!("  all chunks up to date");
        return Ok(());
    }

    let batch = batch_size.unwrap_or(config.embedding.batch_size);
    let report = embed_chunks(store, config, &pending, batch).await?;
    println!("embed pending");
    println!("  total pending: {}", report.total);
    println!("  embedded: {}", report.embedded);
    println!("  failed: {}", report.failed);
    Ok(())
}

pub async fn run_embed_rebuild(config: &Config, batch_size: Option<usize>) -> Result<()> {
    require_embeddings(config)?;
    let store = SqliteStore::new(db::connect(config).await?);
    let result = embed_rebuild(&store, config, batch_size).await;
    store.close().await;
    result
}

async fn embed_rebuild(store: &SqliteStore, config: &Config, batch_size: Option<usize>) -> Result<()> {
    let model = create_provider(&config.embedding)?.model_name().to_string();
    let cleared = store.clear_embeddings().await?;
    println!("embed rebuild: cleared {} vectors", cleared);

    let pending = store.pending_chunks(&model, None).await?;
    if pending.is_empty() {
        println!("  no chunks to embed");
        return Ok(());
    }

    let batch = batch_size.unwrap_or(config.embedding.batch_size);
    let report = embed_chunks(store, config, &pending, batch).await?;
    println!("  total chunks: {}", report.total);
    println!("  embedded: {}", report.embedded);
    println!("  failed: {}", report.failed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use hierarag_core::chunk::{chunk_document, ChunkOptions};
    use hierarag_core::models::{Document, DocumentMetadata, ProcessingStatus};
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_backfill_embeds_pending_chunks() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::migrate(&pool).await.unwrap();
        let store = SqliteStore::new(pool);

        let body = "First paragraph about graphs.\n\nSecond paragraph about vectors.";
        store
            .upsert_document(&Document {
                id: "d1".into(),
                owner_id: "alice".into(),
                filename: "a.md".into(),
                content_type: "text/markdown".into(),
                size_bytes: body.len() as u64,
                status: ProcessingStatus::Uploading,
                metadata: DocumentMetadata::default(),
                body: body.into(),
                created_at: 0,
                updated_at: 0,
                content_hash: String::new(),
            })
            .await
            .unwrap();
        let chunks = chunk_document("d1", body, &ChunkOptions::default()).unwrap();
        store.replace_chunks("d1", &chunks, None).await.unwrap();

        let config = parse_config(
            "[db]\npath = \"x.sqlite\"\n[embedding]\nprovider = \"hash\"\ndims = 16\n",
        )
        .unwrap();
        let pending = store.pending_chunks("hash-16", None).await.unwrap();
        assert_eq!(pending.len(), chunks.len());

        let report = embed_chunks(&store, &config, &pending, 1).await.unwrap();
        assert_eq!(report.embedded, chunks.len());
        assert_eq!(report.failed, 0);
        assert!(store.pending_chunks("hash-16", None).await.unwrap().is_empty());
    }
}
