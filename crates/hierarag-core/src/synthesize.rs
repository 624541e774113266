//! Extractive answer synthesis with citations and calibrated confidence.
//!
//! The synthesizer never generates text: it selects the retrieved sentences
//! that best cover the question, cites their chunks inline, attaches related
//! concepts from the knowledge graph, and scores how well the evidence
//! supports the answer.
//!
//! ```text
//! analyze ──▶ evidence ──▶ relate ──▶ conclude
//! (terms,     (sentence    (graph     (confidence =
//!  entities)   selection)   neighbors)  0.5·strength + 0.3·coverage + 0.2·graph)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::graph::KnowledgeGraph;
use crate::models::{clamp_unit, EntityType, RelationType};
use crate::profile::{DetailLevel, UserProfile};
use crate::retrieve::RankedChunk;
use crate::text::{excerpt, jaccard, sentences, terms};

/// Answer text used when nothing retrieved supports the question.
pub const INSUFFICIENT_INFORMATION: &str =
    "I could not find enough information in your documents to answer this question.";

const EVIDENCE_WEIGHT: f64 = 0.5;
const COVERAGE_WEIGHT: f64 = 0.3;
const GRAPH_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisOptions {
    /// Overrides the profile's preferred detail level.
    pub detail_level: Option<DetailLevel>,
    /// Minimum edge confidence for related concepts.
    pub min_confidence: f64,
    pub max_related: usize,
    pub excerpt_chars: usize,
    /// Sentences at least this similar to a selected one are skipped.
    pub near_duplicate_threshold: f64,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            detail_level: None,
            min_confidence: 0.3,
            max_related: 5,
            excerpt_chars: 200,
            near_duplicate_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    VeryLow,
}

impl ConfidenceLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else if score >= 0.3 {
            Self::Low
        } else {
            Self::VeryLow
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::VeryLow => "very low",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    /// 1-based marker used in the answer text (`[1]`).
    pub index: usize,
    pub chunk_id: String,
    pub document_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub excerpt: String,
    pub relevance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedConcept {
    pub entity_id: String,
    pub name: String,
    pub entity_type: EntityType,
    pub relation: RelationType,
    pub confidence: f64,
    /// Question entity this concept was reached from.
    pub via: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasoningStep {
    pub step: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub related_concepts: Vec<RelatedConcept>,
    pub reasoning: Vec<ReasoningStep>,
    pub confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub uncertainty: f64,
}

struct Candidate<'a> {
    score: f64,
    chunk: usize,
    order: usize,
    sentence: &'a str,
    terms: BTreeSet<String>,
}

/// Build an answer for `question` from retrieved chunks.
pub fn synthesize(
    question: &str,
    chunks: &[RankedChunk],
    graph: &KnowledgeGraph,
    profile: Option<&UserProfile>,
    opts: &SynthesisOptions,
) -> Answer {
    let mut reasoning = Vec::new();

    // analyze
    let query_terms = terms(question);
    let seeds = graph.find_entities_in(question);
    reasoning.push(ReasoningStep {
        step: "analyze".into(),
        detail: format!(
            "{} query terms; entities: {}",
            query_terms.len(),
            if seeds.is_empty() {
                "none".to_string()
            } else {
                seeds.iter().map(|e| e.name.as_str()).collect::<Vec<_>>().join(", ")
            }
        ),
    });

    // evidence
    let budget = opts
        .detail_level
        .or_else(|| profile.map(|p| p.preferences.detail_level))
        .unwrap_or_default()
        .sentence_budget();
    let selected = select_evidence(&query_terms, chunks, budget, opts.near_duplicate_threshold);
    let used_chunks: BTreeSet<usize> = selected.iter().map(|c| c.chunk).collect();
    reasoning.push(ReasoningStep {
        step: "evidence".into(),
        detail: format!(
            "selected {} sentences from {} of {} retrieved chunks",
            selected.len(),
            used_chunks.len(),
            chunks.len()
        ),
    });

    // relate
    let related = related_concepts(graph, &seeds, opts);
    reasoning.push(ReasoningStep {
        step: "relate".into(),
        detail: format!("{} related concepts above confidence {:.2}", related.len(), opts.min_confidence),
    });

    if selected.is_empty() {
        reasoning.push(ReasoningStep {
            step: "conclude".into(),
            detail: "no supporting evidence".into(),
        });
        return Answer {
            question: question.to_string(),
            answer: INSUFFICIENT_INFORMATION.to_string(),
            citations: Vec::new(),
            related_concepts: related,
            reasoning,
            confidence: 0.0,
            confidence_level: ConfidenceLevel::VeryLow,
            uncertainty: 1.0,
        };
    }

    // citations are numbered by first use in the answer
    let mut citation_index: BTreeMap<usize, usize> = BTreeMap::new();
    let mut citations = Vec::new();
    let mut parts = Vec::with_capacity(selected.len());
    for cand in &selected {
        let next = citation_index.len() + 1;
        let n = *citation_index.entry(cand.chunk).or_insert_with(|| {
            let rc = &chunks[cand.chunk];
            citations.push(Citation {
                index: next,
                chunk_id: rc.chunk_id.clone(),
                document_id: rc.document_id.clone(),
                page: rc.page,
                excerpt: excerpt(&rc.text, opts.excerpt_chars),
                relevance: clamp_unit(rc.score),
            });
            next
        });
        parts.push(format!("{} [{}]", cand.sentence, n));
    }

    // conclude
    let mut top: Vec<f64> = chunks.iter().map(|c| clamp_unit(c.score)).collect();
    top.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    top.truncate(3);
    let evidence_strength = top.iter().sum::<f64>() / top.len() as f64;

    let covered: BTreeSet<&String> = selected.iter().flat_map(|c| c.terms.iter()).collect();
    let coverage = if query_terms.is_empty() {
        0.0
    } else {
        query_terms.iter().filter(|t| covered.contains(t)).count() as f64 / query_terms.len() as f64
    };

    let confidence = if seeds.is_empty() {
        (EVIDENCE_WEIGHT * evidence_strength + COVERAGE_WEIGHT * coverage)
            / (EVIDENCE_WEIGHT + COVERAGE_WEIGHT)
    } else {
        let evidence_text = selected
            .iter()
            .map(|c| c.sentence)
            .collect::<Vec<_>>()
            .join(" ");
        let mentioned = graph.find_entities_in(&evidence_text);
        let supported = seeds
            .iter()
            .filter(|s| mentioned.iter().any(|m| m.id == s.id))
            .count();
        let graph_support = supported as f64 / seeds.len() as f64;
        EVIDENCE_WEIGHT * evidence_strength + COVERAGE_WEIGHT * coverage + GRAPH_WEIGHT * graph_support
    };
    let confidence = clamp_unit(confidence);
    let level = ConfidenceLevel::from_score(confidence);
    reasoning.push(ReasoningStep {
        step: "conclude".into(),
        detail: format!(
            "evidence strength {:.2}, coverage {:.2}, confidence {:.2} ({})",
            evidence_strength,
            coverage,
            confidence,
            level.as_str()
        ),
    });

    Answer {
        question: question.to_string(),
        answer: parts.join(" "),
        citations,
        related_concepts: related,
        reasoning,
        confidence,
        confidence_level: level,
        uncertainty: clamp_unit(1.0 - confidence),
    }
}

/// Top sentences by `query-term coverage × chunk score`, skipping near
/// duplicates (chunk overlap repeats sentences across chunks).
fn select_evidence<'a>(
    query_terms: &BTreeSet<String>,
    chunks: &'a [RankedChunk],
    budget: usize,
    duplicate_threshold: f64,
) -> Vec<Candidate<'a>> {
    if query_terms.is_empty() {
        return Vec::new();
    }

    let mut candidates: Vec<Candidate<'a>> = Vec::new();
    for (ci, chunk) in chunks.iter().enumerate() {
        for (order, sentence) in sentences(&chunk.text).into_iter().enumerate() {
            let st = terms(sentence);
            let hits = query_terms.intersection(&st).count();
            if hits == 0 {
                continue;
            }
            let coverage = hits as f64 / query_terms.len() as f64;
            candidates.push(Candidate {
                score: coverage * clamp_unit(chunk.score),
                chunk: ci,
                order,
                sentence,
                terms: st,
            });
        }
    }

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk.cmp(&b.chunk))
            .then(a.order.cmp(&b.order))
    });

    let mut selected: Vec<Candidate<'a>> = Vec::new();
    for cand in candidates {
        if selected.len() >= budget {
            break;
        }
        if selected
            .iter()
            .any(|s| jaccard(&s.terms, &cand.terms) >= duplicate_threshold)
        {
            continue;
        }
        selected.push(cand);
    }
    selected
}

fn related_concepts(
    graph: &KnowledgeGraph,
    seeds: &[&crate::models::Entity],
    opts: &SynthesisOptions,
) -> Vec<RelatedConcept> {
    let seed_ids: BTreeSet<&str> = seeds.iter().map(|e| e.id.as_str()).collect();
    let mut best: BTreeMap<String, RelatedConcept> = BTreeMap::new();

    for seed in seeds {
        for (rel, other) in graph.neighbors(&seed.id, opts.min_confidence) {
            if seed_ids.contains(other.id.as_str()) {
                continue;
            }
            let replace = best
                .get(&other.id)
                .map_or(true, |existing| rel.confidence > existing.confidence);
            if replace {
                best.insert(
                    other.id.clone(),
                    RelatedConcept {
                        entity_id: other.id.clone(),
                        name: other.name.clone(),
                        entity_type: other.entity_type,
                        relation: rel.relation_type,
                        confidence: rel.confidence,
                        via: seed.name.clone(),
                    },
                );
            }
        }
    }

    let mut related: Vec<RelatedConcept> = best.into_values().collect();
    related.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    related.truncate(opts.max_related);
    related
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_document, ChunkOptions, ChunkStrategy};
    use crate::graph::{build_document_graph, GraphConfig};
    use crate::models::ChunkLevel;

    fn ranked(id: &str, doc: &str, text: &str, score: f64) -> RankedChunk {
        RankedChunk {
            chunk_id: id.into(),
            document_id: doc.into(),
            text: text.into(),
            context: None,
            level: ChunkLevel::Flat,
            page: Some(1),
            score,
            relevance: score,
            keyword_score: score,
            semantic_score: 0.0,
            personal_score: None,
            uncertainty: 1.0 - score,
        }
    }

    fn graph_for(text: &str) -> KnowledgeGraph {
        let opts = ChunkOptions {
            strategy: ChunkStrategy::Adaptive,
            ..ChunkOptions::default()
        };
        let chunks = chunk_document("g", text, &opts).unwrap();
        build_document_graph(
            "g",
            &chunks,
            &GraphConfig {
                min_entity_mentions: 1,
                ..GraphConfig::default()
            },
        )
    }

    #[test]
    fn test_confidence_levels() {
        assert_eq!(ConfidenceLevel::from_score(0.85), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.5), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.3), ConfidenceLevel::Low);
        assert_eq!(ConfidenceLevel::from_score(0.1), ConfidenceLevel::VeryLow);
    }

    #[test]
    fn test_no_evidence_is_fully_uncertain() {
        let a = synthesize(
            "What is hierarchical chunking?",
            &[],
            &KnowledgeGraph::new(),
            None,
            &SynthesisOptions::default(),
        );
        assert_eq!(a.answer, INSUFFICIENT_INFORMATION);
        assert_eq!(a.uncertainty, 1.0);
        assert_eq!(a.confidence, 0.0);
        assert!(a.citations.is_empty());
        assert_eq!(a.reasoning.len(), 4);
    }

    #[test]
    fn test_answer_cites_sources_inline() {
        let chunks = vec![
            ranked("c1", "d1", "Hierarchical chunking keeps parent context. Cats sleep.", 0.9),
            ranked("c2", "d2", "Chunking splits documents into retrieval units.", 0.6),
        ];
        let a = synthesize(
            "How does hierarchical chunking work?",
            &chunks,
            &KnowledgeGraph::new(),
            None,
            &SynthesisOptions::default(),
        );
        assert!(a.answer.starts_with("Hierarchical chunking keeps parent context. [1]"));
        assert!(a.answer.contains("[2]"));
        assert!(!a.answer.contains("Cats"));
        assert_eq!(a.citations.len(), 2);
        assert_eq!(a.citations[0].chunk_id, "c1");
        assert_eq!(a.citations[1].index, 2);
        assert!((a.confidence + a.uncertainty - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_without_entities_renormalizes() {
        let chunks = vec![ranked("c1", "d1", "Hierarchical chunking keeps parent context.", 1.0)];
        let a = synthesize(
            "hierarchical chunking",
            &chunks,
            &KnowledgeGraph::new(),
            None,
            &SynthesisOptions::default(),
        );
        assert!((a.confidence - 1.0).abs() < 1e-9);
        assert_eq!(a.confidence_level, ConfidenceLevel::High);
        assert!(a.uncertainty.abs() < 1e-9);
    }

    #[test]
    fn test_near_duplicates_dropped() {
        let s = "Vector indexes accelerate similarity search.";
        let chunks = vec![ranked("c1", "d1", s, 0.9), ranked("c2", "d1", s, 0.8)];
        let a = synthesize(
            "vector similarity search",
            &chunks,
            &KnowledgeGraph::new(),
            None,
            &SynthesisOptions::default(),
        );
        assert_eq!(a.citations.len(), 1);
        assert_eq!(a.answer.matches("Vector indexes").count(), 1);
    }

    #[test]
    fn test_detail_level_limits_sentences() {
        let text = ["alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf", "hotel"]
            .iter()
            .map(|w| format!("Retrieval covers {}.", w))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = vec![ranked("c1", "d1", &text, 0.9)];
        let mut profile = UserProfile::new("u");
        profile.preferences.detail_level = DetailLevel::Brief;
        let a = synthesize(
            "retrieval",
            &chunks,
            &KnowledgeGraph::new(),
            Some(&profile),
            &SynthesisOptions::default(),
        );
        assert_eq!(a.answer.matches("[1]").count(), 2);

        let opts = SynthesisOptions {
            detail_level: Some(DetailLevel::Detailed),
            ..SynthesisOptions::default()
        };
        let a = synthesize("retrieval", &chunks, &KnowledgeGraph::new(), Some(&profile), &opts);
        assert_eq!(a.answer.matches("[1]").count(), 5);
    }

    #[test]
    fn test_related_concepts_and_graph_support() {
        let g = graph_for("GraphRAG uses PostgreSQL. PostgreSQL extends LanceDB.");
        let chunks = vec![ranked("c1", "d1", "GraphRAG stores its graph in PostgreSQL.", 0.8)];
        let a = synthesize("Where does GraphRAG keep data?", &chunks, &g, None, &SynthesisOptions::default());
        assert_eq!(a.related_concepts.len(), 1);
        assert_eq!(a.related_concepts[0].name, "PostgreSQL");
        assert_eq!(a.related_concepts[0].relation, RelationType::Uses);
        assert_eq!(a.related_concepts[0].via, "GraphRAG");
        // graph support is 1.0 because the evidence mentions GraphRAG
        let q_terms = terms("Where does GraphRAG keep data?");
        let covered = q_terms
            .iter()
            .filter(|t| terms("GraphRAG stores its graph in PostgreSQL.").contains(*t))
            .count() as f64
            / q_terms.len() as f64;
        let expected = 0.5 * 0.8 + 0.3 * covered + 0.2;
        assert!((a.confidence - expected).abs() < 1e-9);
    }
}
