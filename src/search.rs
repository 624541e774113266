//! Document search shared by `hrag search` and `POST /api/search/semantic`.

use anyhow::Result;
use serde::Deserialize;

use hierarag_core::memory::ConversationMemory;
use hierarag_core::profile::{PersonalContext, UserProfile};
use hierarag_core::retrieve::{search_documents, RetrievalRequest, SearchMode, SearchResultItem};
use hierarag_core::store::{SearchFilter, Store, UserStateStore};
use hierarag_core::RagError;

use crate::config::Config;
use crate::db;
use crate::embedding::embed_query;
use crate::sqlite_store::SqliteStore;

/// A search request, as accepted over HTTP and built by the CLI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub mode: Option<SearchMode>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Personalize ranking with this user's profile and memory.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub filter: SearchFilter,
    #[serde(default)]
    pub explain: bool,
}

/// Profile and memory for a user; both `None` without a user id.
pub async fn load_user_state<S: UserStateStore + ?Sized>(
    store: &S,
    user_id: Option<&str>,
) -> Result<(Option<UserProfile>, Option<ConversationMemory>)> {
    match user_id {
        Some(id) => Ok((store.load_profile(id).await?, store.load_memory(id).await?)),
        None => Ok((None, None)),
    }
}

/// Resolve the effective mode.
///
/// An explicit semantic or hybrid request without an embedding provider is
/// an error; the configured default silently degrades to keyword.
pub fn resolve_mode(config: &Config, requested: Option<SearchMode>) -> Result<SearchMode> {
    match requested {
        Some(mode) if mode.needs_vector() && !config.embedding.is_enabled() => {
            Err(RagError::EmbeddingsDisabled.into())
        }
        Some(mode) => Ok(mode),
        None if config.retrieval.default_mode.needs_vector() && !config.embedding.is_enabled() => {
            tracing::debug!("embeddings disabled, falling back to keyword search");
            Ok(SearchMode::Keyword)
        }
        None => Ok(config.retrieval.default_mode),
    }
}

/// Embed the query when `mode` needs a vector.
pub async fn query_vector(config: &Config, mode: SearchMode, query: &str) -> Result<Option<Vec<f32>>> {
    if mode.needs_vector() && !query.trim().is_empty() {
        Ok(Some(embed_query(&config.embedding, query).await?))
    } else {
        Ok(None)
    }
}

pub async fn search<S: Store + UserStateStore + ?Sized>(
    store: &S,
    config: &Config,
    req: &SearchRequest,
) -> Result<Vec<SearchResultItem>> {
    if req.limit == Some(0) {
        return Err(RagError::InvalidInput("limit must be at least 1".into()).into());
    }
    let mode = resolve_mode(config, req.mode)?;
    let query_vec = query_vector(config, mode, &req.query).await?;
    let (profile, memory) = load_user_state(store, req.user_id.as_deref()).await?;

    let mut retrieval = RetrievalRequest::new(&req.query, mode);
    retrieval.query_vec = query_vec.as_deref();
    retrieval.filter = req.filter.clone();
    retrieval.params = config.retrieval.params(req.limit);
    retrieval.explain = req.explain;
    retrieval.personal = profile.as_ref().map(|p| PersonalContext {
        profile: p,
        memory: memory.as_ref(),
        memory_config: &config.memory,
        now: chrono::Utc::now().timestamp(),
    });

    let results = search_documents(store, &retrieval).await?;
    tracing::info!(
        query = %req.query,
        mode = mode.as_str(),
        personalized = retrieval.personal.is_some(),
        results = results.len(),
        "search"
    );
    Ok(results)
}

/// CLI entry point.
pub async fn run_search(config: &Config, req: SearchRequest) -> Result<()> {
    if req.query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let results = search(&store, config, &req).await;
    store.close().await;
    let results = results?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} ({})",
            i + 1,
            result.score,
            result.filename,
            result.owner_id
        );
        println!("    updated: {}", result.updated_at);
        if let Some(page) = result.page {
            println!("    page: {}", page);
        }
        println!("    uncertainty: {:.2}", result.uncertainty);
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        if let Some(ex) = &result.explain {
            print!(
                "    explain: keyword={:.3} semantic={:.3} alpha={:.2}",
                ex.keyword_score, ex.semantic_score, ex.alpha
            );
            if let Some(p) = ex.personal_score {
                print!(" personal={:.3} share={:.2}", p, ex.personalization_share);
            }
            println!(
                " candidates={}/{}",
                ex.keyword_candidates, ex.vector_candidates
            );
        }
        println!("    id: {}", result.id);
        println!();
    }

    Ok(())
}
