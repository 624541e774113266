//! Database overview for `hrag stats`.
//!
//! Counts documents per processing status, chunks per level, embedding
//! coverage, graph size, and stored user state.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use hierarag_core::store::Store;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Default, Serialize)]
pub struct IndexStats {
    pub documents: i64,
    pub by_status: Vec<(String, i64)>,
    pub chunks: i64,
    pub by_level: Vec<(String, i64)>,
    pub embedded: i64,
    pub entities: usize,
    pub relationships: usize,
    pub profiles: i64,
    pub memories: i64,
}

impl IndexStats {
    /// Share of chunks with a stored vector, in percent.
    pub fn embedded_percent(&self) -> i64 {
        if self.chunks > 0 {
            (self.embedded * 100) / self.chunks
        } else {
            0
        }
    }
}

async fn grouped_counts(pool: &SqlitePool, sql: &str) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query(sql).fetch_all(pool).await?;
    Ok(rows
        .iter()
        .map(|row| (row.get::<String, _>("key"), row.get::<i64, _>("n")))
        .collect())
}

pub async fn collect_stats(store: &SqliteStore) -> Result<IndexStats> {
    let pool = store.pool();

    let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
        .fetch_one(pool)
        .await?;
    let profiles: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_profiles")
        .fetch_one(pool)
        .await?;
    let memories: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_memory")
        .fetch_one(pool)
        .await?;

    let by_status = grouped_counts(
        pool,
        "SELECT status AS key, COUNT(*) AS n FROM documents GROUP BY status ORDER BY n DESC, key",
    )
    .await?;
    let by_level = grouped_counts(
        pool,
        "SELECT level AS key, COUNT(*) AS n FROM chunks GROUP BY level ORDER BY n DESC, key",
    )
    .await?;

    let graph = store.load_graph(None).await?;

    Ok(IndexStats {
        documents,
        by_status,
        chunks,
        by_level,
        embedded,
        entities: graph.entity_count(),
        relationships: graph.relationship_count(),
        profiles,
        memories,
    })
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteStore::new(db::connect(config).await?);
    let stats = collect_stats(&store).await;
    store.close().await;
    let stats = stats?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("hierarag: index stats");
    println!("=====================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!("  Documents:     {}", stats.documents);
    for (status, n) in &stats.by_status {
        println!("    {:<12} {:>6}", status, n);
    }
    println!("  Chunks:        {}", stats.chunks);
    for (level, n) in &stats.by_level {
        println!("    {:<12} {:>6}", level, n);
    }
    println!(
        "  Embedded:      {} / {} ({}%)",
        stats.embedded,
        stats.chunks,
        stats.embedded_percent()
    );
    println!();
    println!("  Entities:      {}", stats.entities);
    println!("  Relationships: {}", stats.relationships);
    println!("  Profiles:      {}", stats.profiles);
    println!("  Memories:      {}", stats.memories);
    println!();
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate;
    use sqlx::sqlite::SqlitePoolOptions;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[tokio::test]
    async fn test_empty_index_stats() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        let store = SqliteStore::new(pool);

        let stats = collect_stats(&store).await.unwrap();
        assert_eq!(stats.documents, 0);
        assert_eq!(stats.chunks, 0);
        assert_eq!(stats.embedded_percent(), 0);
        assert!(stats.by_status.is_empty());
        assert_eq!(stats.entities, 0);
    }
}
