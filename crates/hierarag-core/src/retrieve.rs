//! Personalized hybrid retrieval.
//!
//! The retriever operates entirely through the [`Store`] trait. The calling
//! application embeds the query, loads the user's profile and memory, and
//! passes them in a [`RetrievalRequest`].
//!
//! # Scoring
//!
//! 1. Fetch keyword candidates and vector candidates.
//! 2. Min-max normalize each set to `[0, 1]` (all-equal scores → 1.0).
//! 3. `relevance = (1 − α)·keyword + α·semantic` (α = 0 keyword mode, 1 semantic mode).
//! 4. With a profile: `score = (1 − λw)·relevance + λw·personal`, where λ is
//!    the user's personalization level and `w` the configured maximum weight.
//! 5. `uncertainty = 1 − relevance·agreement`, where hybrid agreement is
//!    `1 − |keyword − semantic|`.
//! 6. Sort by score (desc), chunk id (asc); cap chunks per document;
//!    truncate to `final_limit`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::RagError;
use crate::models::{clamp_unit, ChunkLevel};
use crate::profile::PersonalContext;
use crate::store::{format_ts_iso, ChunkCandidate, DocumentSummary, SearchFilter, Store};
use crate::text::excerpt;

const SNIPPET_CHARS: usize = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Keyword,
    Semantic,
    #[default]
    Hybrid,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Keyword => "keyword",
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
        }
    }

    pub fn needs_vector(&self) -> bool {
        !matches!(self, SearchMode::Keyword)
    }
}

impl FromStr for SearchMode {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keyword" => Ok(SearchMode::Keyword),
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(RagError::InvalidInput(format!(
                "unknown search mode: {}. Use keyword, semantic, or hybrid.",
                other
            ))),
        }
    }
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    /// `relevance = (1-α)*keyword + α*semantic` in hybrid mode.
    pub hybrid_alpha: f64,
    pub candidate_k_keyword: usize,
    pub candidate_k_vector: usize,
    pub final_limit: usize,
    pub max_chunks_per_doc: usize,
    /// Upper bound on the personalization share of the final score.
    pub personalization_weight: f64,
    /// Attach the parent chunk's text to child results.
    pub expand_to_parent: bool,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            hybrid_alpha: 0.6,
            candidate_k_keyword: 80,
            candidate_k_vector: 80,
            final_limit: 12,
            max_chunks_per_doc: 3,
            personalization_weight: 0.3,
            expand_to_parent: false,
        }
    }
}

/// Bundles all inputs for a single retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalRequest<'a> {
    pub query: &'a str,
    /// Pre-computed query embedding (required for semantic/hybrid modes).
    pub query_vec: Option<&'a [f32]>,
    pub mode: SearchMode,
    pub filter: SearchFilter,
    pub params: RetrievalParams,
    pub personal: Option<PersonalContext<'a>>,
    /// Populate [`ScoreExplanation`] on document results.
    pub explain: bool,
}

impl<'a> RetrievalRequest<'a> {
    pub fn new(query: &'a str, mode: SearchMode) -> Self {
        Self {
            query,
            query_vec: None,
            mode,
            filter: SearchFilter::default(),
            params: RetrievalParams::default(),
            personal: None,
            explain: false,
        }
    }
}

/// A retrieved chunk with its full text and scores.
#[derive(Debug, Clone, Serialize)]
pub struct RankedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub text: String,
    /// Parent chunk text, when parent expansion is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub level: ChunkLevel,
    pub page: Option<u32>,
    /// Final score in `[0, 1]`.
    pub score: f64,
    /// Score before personalization.
    pub relevance: f64,
    pub keyword_score: f64,
    pub semantic_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_score: Option<f64>,
    pub uncertainty: f64,
}

/// A document-level search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    /// Document id.
    pub id: String,
    pub score: f64,
    pub filename: String,
    pub owner_id: String,
    pub content_type: String,
    /// ISO 8601.
    pub updated_at: String,
    /// Excerpt of the best-matching chunk.
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub uncertainty: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<ScoreExplanation>,
}

/// Scoring breakdown for a search result.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreExplanation {
    pub keyword_score: f64,
    pub semantic_score: f64,
    pub alpha: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_score: Option<f64>,
    /// Effective personalization share `λ·w`.
    pub personalization_share: f64,
    pub keyword_candidates: usize,
    pub vector_candidates: usize,
}

struct Scored {
    chunk_id: String,
    document_id: String,
    keyword: f64,
    semantic: f64,
    relevance: f64,
    personal: Option<f64>,
    score: f64,
    uncertainty: f64,
}

struct Pass {
    ranked: Vec<RankedChunk>,
    summaries: HashMap<String, DocumentSummary>,
    alpha: f64,
    share: f64,
    keyword_candidates: usize,
    vector_candidates: usize,
}

/// Retrieve ranked chunks for a query.
///
/// Returns an empty list for a blank query or when no candidates match.
/// Semantic and hybrid modes fail with [`RagError::InvalidInput`] when no
/// query vector is supplied.
pub async fn retrieve<S: Store + ?Sized>(
    store: &S,
    req: &RetrievalRequest<'_>,
) -> Result<Vec<RankedChunk>> {
    Ok(run(store, req).await?.ranked)
}

async fn run<S: Store + ?Sized>(store: &S, req: &RetrievalRequest<'_>) -> Result<Pass> {
    let alpha = match req.mode {
        SearchMode::Keyword => 0.0,
        SearchMode::Semantic => 1.0,
        SearchMode::Hybrid => clamp_unit(req.params.hybrid_alpha),
    };
    let share = req
        .personal
        .map(|p| clamp_unit(p.profile.personalization_level * req.params.personalization_weight))
        .unwrap_or(0.0);
    let mut pass = Pass {
        ranked: Vec::new(),
        summaries: HashMap::new(),
        alpha,
        share,
        keyword_candidates: 0,
        vector_candidates: 0,
    };

    if req.query.trim().is_empty() {
        return Ok(pass);
    }

    let keyword_candidates = if req.mode != SearchMode::Semantic {
        store
            .keyword_search(req.query, req.params.candidate_k_keyword, &req.filter)
            .await?
    } else {
        Vec::new()
    };

    let vector_candidates = if req.mode.needs_vector() {
        let qv = req.query_vec.ok_or_else(|| {
            RagError::InvalidInput(format!(
                "a query embedding is required for {} mode",
                req.mode.as_str()
            ))
        })?;
        store
            .vector_search(qv, req.params.candidate_k_vector, &req.filter)
            .await?
    } else {
        Vec::new()
    };

    pass.keyword_candidates = keyword_candidates.len();
    pass.vector_candidates = vector_candidates.len();
    if keyword_candidates.is_empty() && vector_candidates.is_empty() {
        return Ok(pass);
    }

    let kw_map: HashMap<&str, f64> = normalize_scores(&keyword_candidates)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.as_str(), s))
        .collect();
    let vec_map: HashMap<&str, f64> = normalize_scores(&vector_candidates)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.as_str(), s))
        .collect();

    let mut all: HashMap<&str, &ChunkCandidate> = HashMap::new();
    for c in keyword_candidates.iter().chain(vector_candidates.iter()) {
        all.entry(c.chunk_id.as_str()).or_insert(c);
    }

    for c in all.values() {
        if !pass.summaries.contains_key(&c.document_id) {
            if let Some(s) = store.get_document_summary(&c.document_id).await? {
                pass.summaries.insert(c.document_id.clone(), s);
            }
        }
    }

    // personal scores look at the whole chunk, not the backend's snippet
    let candidate_texts: HashMap<String, String> = if req.personal.is_some() {
        let ids: Vec<String> = all.keys().map(|id| id.to_string()).collect();
        store
            .get_chunks(&ids)
            .await?
            .into_iter()
            .map(|c| (c.id, c.text))
            .collect()
    } else {
        HashMap::new()
    };

    let mut scored: Vec<Scored> = all
        .iter()
        .map(|(chunk_id, cand)| {
            let k = kw_map.get(chunk_id).copied().unwrap_or(0.0);
            let v = vec_map.get(chunk_id).copied().unwrap_or(0.0);
            let relevance = clamp_unit((1.0 - alpha) * k + alpha * v);
            let agreement = if req.mode == SearchMode::Hybrid {
                1.0 - (k - v).abs()
            } else {
                1.0
            };
            let personal = req.personal.map(|p| {
                let tags = pass
                    .summaries
                    .get(&cand.document_id)
                    .map(|s| s.metadata.tags.as_slice())
                    .unwrap_or(&[]);
                let text = candidate_texts
                    .get(*chunk_id)
                    .map(String::as_str)
                    .unwrap_or(cand.snippet.as_str());
                p.personal_score(tags, text)
            });
            let score = match personal {
                Some(ps) => clamp_unit((1.0 - share) * relevance + share * ps),
                None => relevance,
            };
            Scored {
                chunk_id: chunk_id.to_string(),
                document_id: cand.document_id.clone(),
                keyword: k,
                semantic: v,
                relevance,
                personal,
                score,
                uncertainty: clamp_unit(1.0 - relevance * agreement),
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    let mut per_doc: HashMap<String, usize> = HashMap::new();
    scored.retain(|s| {
        let n = per_doc.entry(s.document_id.clone()).or_default();
        *n += 1;
        *n <= req.params.max_chunks_per_doc.max(1)
    });
    scored.truncate(req.params.final_limit);

    let ids: Vec<String> = scored.iter().map(|s| s.chunk_id.clone()).collect();
    let chunks: HashMap<String, _> = store
        .get_chunks(&ids)
        .await?
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect();

    let parents: HashMap<String, String> = if req.params.expand_to_parent {
        let parent_ids: Vec<String> = chunks
            .values()
            .filter_map(|c| c.parent_id.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        store
            .get_chunks(&parent_ids)
            .await?
            .into_iter()
            .map(|c| (c.id, c.text))
            .collect()
    } else {
        HashMap::new()
    };

    for s in scored {
        let Some(chunk) = chunks.get(&s.chunk_id) else {
            continue;
        };
        let context = chunk
            .parent_id
            .as_ref()
            .and_then(|pid| parents.get(pid).cloned());
        pass.ranked.push(RankedChunk {
            chunk_id: s.chunk_id,
            document_id: s.document_id,
            text: chunk.text.clone(),
            context,
            level: chunk.level,
            page: chunk.page,
            score: s.score,
            relevance: s.relevance,
            keyword_score: s.keyword,
            semantic_score: s.semantic,
            personal_score: s.personal,
            uncertainty: s.uncertainty,
        });
    }

    tracing::debug!(
        mode = req.mode.as_str(),
        keyword_candidates = pass.keyword_candidates,
        vector_candidates = pass.vector_candidates,
        results = pass.ranked.len(),
        "retrieval complete"
    );
    Ok(pass)
}

/// Document-level search: ranked chunks grouped by document (MAX score).
///
/// Sorted by score (desc), `updated_at` (desc), id (asc).
pub async fn search_documents<S: Store + ?Sized>(
    store: &S,
    req: &RetrievalRequest<'_>,
) -> Result<Vec<SearchResultItem>> {
    let pass = run(store, req).await?;

    // ranked is score-sorted, so the first chunk seen per document is its best
    let mut best: Vec<&RankedChunk> = Vec::new();
    for rc in &pass.ranked {
        if !best.iter().any(|b| b.document_id == rc.document_id) {
            best.push(rc);
        }
    }

    let mut results: Vec<(i64, SearchResultItem)> = best
        .into_iter()
        .filter_map(|rc| {
            let meta = pass.summaries.get(&rc.document_id)?;
            let explain = req.explain.then(|| ScoreExplanation {
                keyword_score: rc.keyword_score,
                semantic_score: rc.semantic_score,
                alpha: pass.alpha,
                personal_score: rc.personal_score,
                personalization_share: pass.share,
                keyword_candidates: pass.keyword_candidates,
                vector_candidates: pass.vector_candidates,
            });
            Some((
                meta.updated_at,
                SearchResultItem {
                    id: meta.id.clone(),
                    score: rc.score,
                    filename: meta.filename.clone(),
                    owner_id: meta.owner_id.clone(),
                    content_type: meta.content_type.clone(),
                    updated_at: format_ts_iso(meta.updated_at),
                    snippet: excerpt(&rc.text, SNIPPET_CHARS),
                    page: rc.page,
                    uncertainty: rc.uncertainty,
                    explain,
                },
            ))
        })
        .collect();

    results.sort_by(|(ta, a), (tb, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(tb.cmp(ta))
            .then(a.id.cmp(&b.id))
    });
    results.truncate(req.params.final_limit);
    Ok(results.into_iter().map(|(_, item)| item).collect())
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_document, ChunkOptions, ChunkStrategy};
    use crate::embedding::HashEmbedder;
    use crate::memory::MemoryConfig;
    use crate::models::{Document, DocumentMetadata, ProcessingStatus};
    use crate::profile::UserProfile;
    use crate::store::{ChunkVectors, InMemoryStore};

    fn make_candidate(chunk_id: &str, score: f64) -> ChunkCandidate {
        ChunkCandidate {
            chunk_id: chunk_id.to_string(),
            document_id: "d".to_string(),
            raw_score: score,
            snippet: String::new(),
            level: ChunkLevel::Flat,
            parent_id: None,
            page: None,
        }
    }

    #[test]
    fn test_normalize_range_and_equal() {
        assert!(normalize_scores(&[]).is_empty());
        let c = vec![
            make_candidate("c1", 10.0),
            make_candidate("c2", 5.0),
            make_candidate("c3", 0.0),
        ];
        let n = normalize_scores(&c);
        assert!((n[0].1 - 1.0).abs() < 1e-9);
        assert!((n[1].1 - 0.5).abs() < 1e-9);
        assert!(n[2].1.abs() < 1e-9);

        let c = vec![make_candidate("c1", 3.0), make_candidate("c2", 3.0)];
        assert!(normalize_scores(&c).iter().all(|(_, s)| (*s - 1.0).abs() < 1e-9));
    }

    async fn store_with(docs: &[(&str, &[&str], &str)], strategy: ChunkStrategy) -> InMemoryStore {
        let store = InMemoryStore::new();
        let embedder = HashEmbedder::new(256);
        for (i, (id, tags, body)) in docs.iter().enumerate() {
            let doc = Document {
                id: id.to_string(),
                owner_id: "alice".into(),
                filename: format!("{}.md", id),
                content_type: "text/markdown".into(),
                size_bytes: body.len() as u64,
                status: ProcessingStatus::Complete,
                metadata: DocumentMetadata {
                    tags: tags.iter().map(|t| t.to_string()).collect(),
                    ..DocumentMetadata::default()
                },
                body: body.to_string(),
                created_at: i as i64,
                updated_at: i as i64,
                content_hash: String::new(),
            };
            store.upsert_document(&doc).await.unwrap();
            let opts = ChunkOptions {
                strategy,
                max_tokens: 16,
                overlap_tokens: 0,
                parent_max_tokens: 64,
                min_tokens: 1,
            };
            let chunks = chunk_document(id, body, &opts).unwrap();
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed_batch(&texts);
            store
                .replace_chunks(
                    id,
                    &chunks,
                    Some(ChunkVectors {
                        model: "hash-256",
                        vectors: &vectors,
                    }),
                )
                .await
                .unwrap();
        }
        store
    }

    const CORPUS: &[(&str, &[&str], &str)] = &[
        ("db", &["databases"], "Postgres indexes speed up relational queries."),
        ("ml", &["ml"], "Gradient descent trains neural networks on batches."),
        ("mix", &["ml"], "Vector indexes store neural network embeddings."),
    ];

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let store = store_with(CORPUS, ChunkStrategy::Fixed).await;
        let req = RetrievalRequest::new("   ", SearchMode::Keyword);
        assert!(retrieve(&store, &req).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_semantic_requires_vector() {
        let store = store_with(CORPUS, ChunkStrategy::Fixed).await;
        let req = RetrievalRequest::new("neural", SearchMode::Semantic);
        let err = retrieve(&store, &req).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_keyword_ranking_and_bounds() {
        let store = store_with(CORPUS, ChunkStrategy::Fixed).await;
        let req = RetrievalRequest::new("neural networks", SearchMode::Keyword);
        let ranked = retrieve(&store, &req).await.unwrap();
        assert!(!ranked.is_empty());
        assert!(ranked.iter().all(|r| r.document_id != "db"));
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        for r in &ranked {
            assert!((0.0..=1.0).contains(&r.score));
            assert!((0.0..=1.0).contains(&r.uncertainty));
            assert_eq!(r.semantic_score, 0.0);
        }
    }

    #[tokio::test]
    async fn test_hybrid_uncertainty_reflects_agreement() {
        let store = store_with(CORPUS, ChunkStrategy::Fixed).await;
        let embedder = HashEmbedder::new(256);
        let qv = embedder.embed("neural networks");
        let mut req = RetrievalRequest::new("neural networks", SearchMode::Hybrid);
        req.query_vec = Some(&qv);
        let ranked = retrieve(&store, &req).await.unwrap();
        assert!(!ranked.is_empty());
        for r in &ranked {
            let agreement = 1.0 - (r.keyword_score - r.semantic_score).abs();
            assert!((r.uncertainty - (1.0 - r.relevance * agreement)).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_personalization_reorders_by_domain() {
        let docs: &[(&str, &[&str], &str)] = &[
            ("a", &["databases"], "Indexes make search fast."),
            ("b", &["gardening"], "Indexes make search fast."),
        ];
        let store = store_with(docs, ChunkStrategy::Fixed).await;

        let plain = retrieve(&store, &RetrievalRequest::new("indexes search", SearchMode::Keyword))
            .await
            .unwrap();
        assert_eq!(plain.len(), 2);
        assert_eq!(plain[0].score, plain[1].score);

        let mut profile = UserProfile::new("alice");
        profile.set_personalization_level(1.0);
        profile.preferences.preferred_domains = vec!["gardening".into()];
        let cfg = MemoryConfig::default();
        let mut req = RetrievalRequest::new("indexes search", SearchMode::Keyword);
        req.personal = Some(PersonalContext {
            profile: &profile,
            memory: None,
            memory_config: &cfg,
            now: 0,
        });
        let ranked = retrieve(&store, &req).await.unwrap();
        assert_eq!(ranked[0].document_id, "b");
        assert!(ranked[0].score > ranked[1].score);
        assert!(ranked.iter().all(|r| r.score <= 1.0));

        profile.set_personalization_level(0.0);
        let mut req = RetrievalRequest::new("indexes search", SearchMode::Keyword);
        req.personal = Some(PersonalContext {
            profile: &profile,
            memory: None,
            memory_config: &cfg,
            now: 0,
        });
        let ranked = retrieve(&store, &req).await.unwrap();
        assert_eq!(ranked[0].score, ranked[1].score);
    }

    #[tokio::test]
    async fn test_personal_score_reads_full_chunk_text() {
        let filler = "Indexes make search fast and keep lookups cheap for everyone. ".repeat(5);
        let body = format!("{}Sourdough starters need daily feeding.", filler);
        let store = InMemoryStore::new();
        store
            .upsert_document(&Document {
                id: "long".into(),
                owner_id: "alice".into(),
                filename: "long.md".into(),
                content_type: "text/markdown".into(),
                size_bytes: body.len() as u64,
                status: ProcessingStatus::Complete,
                metadata: DocumentMetadata::default(),
                body: body.clone(),
                created_at: 0,
                updated_at: 0,
                content_hash: String::new(),
            })
            .await
            .unwrap();
        let opts = ChunkOptions {
            strategy: ChunkStrategy::Fixed,
            max_tokens: 512,
            ..ChunkOptions::default()
        };
        let chunks = chunk_document("long", &body, &opts).unwrap();
        assert_eq!(chunks.len(), 1);
        store.replace_chunks("long", &chunks, None).await.unwrap();

        let mut profile = UserProfile::new("alice");
        profile.set_personalization_level(1.0);
        let cfg = MemoryConfig::default();
        let mut memory = crate::memory::ConversationMemory::new("alice");
        memory.remember(
            crate::models::MemoryItem::new(
                "sourdough starters feeding",
                1.0,
                crate::models::MemorySource::Conversation,
                0,
            ),
            &cfg,
            0,
        );
        let ctx = PersonalContext {
            profile: &profile,
            memory: Some(&memory),
            memory_config: &cfg,
            now: 0,
        };
        let mut req = RetrievalRequest::new("indexes search", SearchMode::Keyword);
        req.personal = Some(ctx);
        let ranked = retrieve(&store, &req).await.unwrap();
        assert_eq!(ranked.len(), 1);

        let expected = ctx.personal_score(&[], &body);
        assert!(expected > 0.0);
        assert_eq!(ctx.personal_score(&[], &excerpt(&body, SNIPPET_CHARS)), 0.0);
        assert_eq!(ranked[0].personal_score, Some(expected));
    }

    #[tokio::test]
    async fn test_max_chunks_per_doc_and_limit() {
        let body = (1..=12)
            .map(|i| format!("Search note {}.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let no_tags: &[&str] = &[];
        let docs = [("long", no_tags, body.as_str()), ("short", no_tags, "Search here.")];
        let store = store_with(&docs, ChunkStrategy::Adaptive).await;
        let mut req = RetrievalRequest::new("search", SearchMode::Keyword);
        req.params.max_chunks_per_doc = 2;
        let ranked = retrieve(&store, &req).await.unwrap();
        assert_eq!(ranked.iter().filter(|r| r.document_id == "long").count(), 2);
        assert_eq!(ranked.iter().filter(|r| r.document_id == "short").count(), 1);

        req.params.final_limit = 1;
        assert_eq!(retrieve(&store, &req).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_parent_expansion() {
        let body = "Rust ownership prevents data races. Borrowing is checked at compile time.\n\nLifetimes annotate references.";
        let store = store_with(&[("rust", &[], body)], ChunkStrategy::Hierarchical).await;
        let mut req = RetrievalRequest::new("lifetimes", SearchMode::Keyword);
        req.params.expand_to_parent = true;
        let ranked = retrieve(&store, &req).await.unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].level, ChunkLevel::Child);
        let context = ranked[0].context.as_ref().unwrap();
        assert!(context.contains(&ranked[0].text));
    }

    #[tokio::test]
    async fn test_search_documents_aggregates_and_explains() {
        let store = store_with(CORPUS, ChunkStrategy::Fixed).await;
        let mut req = RetrievalRequest::new("neural network", SearchMode::Keyword);
        req.explain = true;
        let results = search_documents(&store, &req).await.unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert!(ids.contains(&"ml") && ids.contains(&"mix"));
        let unique: std::collections::BTreeSet<&str> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
        let e = results[0].explain.as_ref().unwrap();
        assert_eq!(e.alpha, 0.0);
        assert!(e.keyword_candidates > 0);
    }
}
