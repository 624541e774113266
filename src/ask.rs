//! Question answering: retrieve, synthesize, then update the asker's
//! profile and conversation memory.

use anyhow::Result;
use serde::Deserialize;
use std::collections::BTreeSet;

use hierarag_core::memory::ConversationMemory;
use hierarag_core::models::{MemoryItem, MemorySource};
use hierarag_core::profile::{DetailLevel, PersonalContext, UserProfile};
use hierarag_core::retrieve::{retrieve, RetrievalRequest, SearchMode};
use hierarag_core::store::{SearchFilter, Store, UserStateStore};
use hierarag_core::synthesize::{synthesize, Answer, SynthesisOptions};
use hierarag_core::text::excerpt;

use crate::config::Config;
use crate::db;
use crate::search::{load_user_state, query_vector, resolve_mode};
use crate::sqlite_store::SqliteStore;

const MEMORY_ANSWER_CHARS: usize = 280;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub mode: Option<SearchMode>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub filter: SearchFilter,
    /// Overrides the profile's preferred detail level.
    #[serde(default)]
    pub detail_level: Option<DetailLevel>,
}

pub async fn ask<S: Store + UserStateStore + ?Sized>(
    store: &S,
    config: &Config,
    req: &AskRequest,
) -> Result<Answer> {
    let mode = resolve_mode(config, req.mode)?;
    let query_vec = query_vector(config, mode, &req.question).await?;
    let (profile, memory) = load_user_state(store, req.user_id.as_deref()).await?;
    let now = chrono::Utc::now().timestamp();

    let mut retrieval = RetrievalRequest::new(&req.question, mode);
    retrieval.query_vec = query_vec.as_deref();
    retrieval.filter = req.filter.clone();
    retrieval.params = config.retrieval.params(req.limit);
    retrieval.personal = profile.as_ref().map(|p| PersonalContext {
        profile: p,
        memory: memory.as_ref(),
        memory_config: &config.memory,
        now,
    });
    let chunks = retrieve(store, &retrieval).await?;

    let graph = store.load_graph(None).await?;
    let opts = SynthesisOptions {
        detail_level: req.detail_level.or(config.synthesis.detail_level),
        ..config.synthesis.clone()
    };
    let answer = synthesize(&req.question, &chunks, &graph, profile.as_ref(), &opts);
    tracing::info!(
        question = %req.question,
        chunks = chunks.len(),
        citations = answer.citations.len(),
        confidence = answer.confidence,
        "answered question"
    );

    if let Some(user_id) = &req.user_id {
        let profile = profile.unwrap_or_else(|| UserProfile::new(user_id.as_str()));
        let memory = memory.unwrap_or_else(|| ConversationMemory::new(user_id.as_str()));
        record_exchange(store, config, profile, memory, &answer, now).await?;
    }

    Ok(answer)
}

/// Remember the exchange and nudge expertise in the domains of cited
/// documents toward the answer's confidence.
async fn record_exchange<S: Store + UserStateStore + ?Sized>(
    store: &S,
    config: &Config,
    mut profile: UserProfile,
    mut memory: ConversationMemory,
    answer: &Answer,
    now: i64,
) -> Result<()> {
    let content = format!(
        "Q: {} A: {}",
        answer.question,
        excerpt(&answer.answer, MEMORY_ANSWER_CHARS)
    );
    memory.remember(
        MemoryItem::new(content, answer.confidence, MemorySource::Conversation, now),
        &config.memory,
        now,
    );
    store.save_memory(&memory).await?;

    let cited: BTreeSet<&str> = answer
        .citations
        .iter()
        .map(|c| c.document_id.as_str())
        .collect();
    let mut domains = BTreeSet::new();
    for doc_id in cited {
        if let Some(doc) = store.get_document_summary(doc_id).await? {
            domains.extend(doc.metadata.tags);
        }
    }
    for domain in &domains {
        profile.update_expertise(domain, answer.confidence);
    }
    profile.updated_at = now;
    store.save_profile(&profile).await?;

    tracing::debug!(
        user_id = %profile.user_id,
        memories = memory.len(),
        domains = domains.len(),
        "recorded exchange"
    );
    Ok(())
}

/// CLI entry point.
pub async fn run_ask(config: &Config, req: AskRequest, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool);
    let answer = ask(&store, config, &req).await;
    store.close().await;
    let answer = answer?;

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("{}", answer.answer);
    println!();
    println!(
        "confidence: {:.2} ({}), uncertainty: {:.2}",
        answer.confidence,
        answer.confidence_level.as_str(),
        answer.uncertainty
    );

    if !answer.citations.is_empty() {
        println!();
        println!("Sources:");
        for c in &answer.citations {
            let page = c.page.map(|p| format!(" p.{}", p)).unwrap_or_default();
            println!("  [{}] {}{} ({:.2})", c.index, c.document_id, page, c.relevance);
            println!("      \"{}\"", c.excerpt.replace('\n', " ").trim());
        }
    }

    if !answer.related_concepts.is_empty() {
        println!();
        println!("Related:");
        for r in &answer.related_concepts {
            println!(
                "  {} ({}) {} {} [{:.2}]",
                r.name,
                r.entity_type.as_str(),
                r.relation.as_str(),
                r.via,
                r.confidence
            );
        }
    }

    Ok(())
}
