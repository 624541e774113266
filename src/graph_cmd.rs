//! `hrag graph show|rebuild`.

use anyhow::Result;

use hierarag_core::graph::{build_document_graph, KnowledgeGraph};
use hierarag_core::models::ProcessingStatus;
use hierarag_core::store::Store;
use hierarag_core::RagError;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Rebuild every complete document's graph from its stored chunks.
/// Returns the number of documents rebuilt.
pub async fn rebuild_graphs<S: Store + ?Sized>(store: &S, config: &Config) -> Result<usize> {
    let mut rebuilt = 0;
    for doc in store.list_documents(None).await? {
        if doc.status != ProcessingStatus::Complete {
            continue;
        }
        let chunks = store.document_chunks(&doc.id).await?;
        let graph = build_document_graph(&doc.id, &chunks, &config.graph);
        store.replace_document_graph(&doc.id, &graph).await?;
        rebuilt += 1;
    }
    tracing::info!(documents = rebuilt, "rebuilt knowledge graphs");
    Ok(rebuilt)
}

/// Graph for one document (404 when the document does not exist) or the
/// merged graph of all documents.
pub async fn load_graph<S: Store + ?Sized>(store: &S, doc_id: Option<&str>) -> Result<KnowledgeGraph> {
    if let Some(id) = doc_id {
        if store.get_document_summary(id).await?.is_none() {
            return Err(RagError::NotFound(format!("document {}", id)).into());
        }
    }
    store.load_graph(doc_id).await
}

pub async fn run_graph_show(
    config: &Config,
    doc_id: Option<&str>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let graph = load_graph(&store, doc_id).await;
    store.close().await;
    let graph = graph?;

    if json {
        println!("{}", serde_json::to_string_pretty(&graph)?);
        return Ok(());
    }

    println!(
        "graph {}",
        doc_id.unwrap_or("(all documents)")
    );
    println!("  entities: {}", graph.entity_count());
    println!("  relationships: {}", graph.relationship_count());
    if graph.is_empty() {
        return Ok(());
    }

    let mut entities: Vec<_> = graph.entities().collect();
    entities.sort_by(|a, b| {
        b.importance
            .partial_cmp(&a.importance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.canonical_name.cmp(&b.canonical_name))
    });

    println!();
    for entity in entities.into_iter().take(limit) {
        println!(
            "  {} [{}] importance={:.2} mentions={}",
            entity.name,
            entity.entity_type.as_str(),
            entity.importance,
            entity.frequency
        );
        for (rel, other) in graph.neighbors(&entity.id, 0.0).into_iter().take(5) {
            let arrow = if rel.source_id == entity.id { "->" } else { "<-" };
            println!(
                "      {} {} {} ({:.2})",
                arrow,
                rel.relation_type.as_str(),
                other.name,
                rel.confidence
            );
        }
    }
    Ok(())
}

pub async fn run_graph_rebuild(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let result = rebuild_graphs(&store, config).await;
    let merged = store.load_graph(None).await;
    store.close().await;

    println!("graph rebuild");
    println!("  documents: {}", result?);
    let merged = merged?;
    println!("  entities: {}", merged.entity_count());
    println!("  relationships: {}", merged.relationship_count());
    Ok(())
}
