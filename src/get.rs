//! Document lookup and deletion, shared by `hrag get|delete` and the
//! `/api/documents` routes.

use anyhow::Result;

use hierarag_core::store::{DocumentResponse, DocumentSummary, Store};
use hierarag_core::RagError;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Full document with its chunks; `NotFound` for unknown ids.
pub async fn get_document<S: Store + ?Sized>(store: &S, id: &str) -> Result<DocumentResponse> {
    let doc = store
        .get_document(id)
        .await?
        .ok_or_else(|| RagError::NotFound(format!("document {}", id)))?;
    let chunks = store.document_chunks(id).await?;
    Ok(DocumentResponse::from_parts(doc, chunks))
}

pub async fn delete_document<S: Store + ?Sized>(store: &S, id: &str) -> Result<()> {
    if !store.delete_document(id).await? {
        return Err(RagError::NotFound(format!("document {}", id)).into());
    }
    tracing::info!(document = id, "document deleted");
    Ok(())
}

pub async fn list_documents<S: Store + ?Sized>(
    store: &S,
    owner_id: Option<&str>,
) -> Result<Vec<DocumentSummary>> {
    store.list_documents(owner_id).await
}

pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let store = SqliteStore::new(db::connect(config).await?);
    let doc = get_document(&store, id).await;
    store.close().await;
    let doc = doc?;

    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!("filename:     {}", doc.filename);
    println!("owner:        {}", doc.owner_id);
    println!("status:       {}", doc.status);
    println!("content_type: {}", doc.content_type);
    println!("size:         {} bytes", doc.size_bytes);
    println!("created_at:   {}", doc.created_at);
    println!("updated_at:   {}", doc.updated_at);
    if let Some(pages) = doc.metadata.pages {
        println!("pages:        {}", pages);
    }
    println!(
        "language:     {}",
        doc.metadata.language.as_deref().unwrap_or("unknown")
    );
    println!("complexity:   {:.2}", doc.metadata.complexity_score);
    if !doc.metadata.tags.is_empty() {
        println!("tags:         {}", doc.metadata.tags.join(", "));
    }
    if let Some(err) = &doc.metadata.error {
        println!("error:        {}", err);
    }
    println!();

    println!("--- Body ---");
    println!("{}", doc.body);
    println!();

    println!("--- Chunks ({}) ---", doc.chunks.len());
    for chunk in &doc.chunks {
        let page = chunk.page.map(|p| format!(" p.{}", p)).unwrap_or_default();
        println!("[chunk {} {}{}]", chunk.index, chunk.level.as_str(), page);
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}

pub async fn run_list(config: &Config, owner_id: Option<&str>) -> Result<()> {
    let store = SqliteStore::new(db::connect(config).await?);
    let docs = list_documents(&store, owner_id).await;
    store.close().await;
    let docs = docs?;

    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    println!(
        "{:<36}  {:<10}  {:<12}  {}",
        "ID", "STATUS", "OWNER", "FILENAME"
    );
    for d in &docs {
        println!(
            "{:<36}  {:<10}  {:<12}  {}",
            d.id,
            d.status.as_str(),
            d.owner_id,
            d.filename
        );
    }
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let store = SqliteStore::new(db::connect(config).await?);
    let result = delete_document(&store, id).await;
    store.close().await;
    result?;
    println!("deleted {}", id);
    Ok(())
}
