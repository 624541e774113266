//! Knowledge graph construction, merging, and traversal.
//!
//! Entities are extracted from chunk sentences with lightweight lexical
//! patterns (no NLP model), relationships come from sentence-level
//! co-occurrence typed by connecting keywords. Each document gets its own
//! graph; the global graph is the merge of all document graphs.
//!
//! Entity and relationship ids are content-derived, so the same concept
//! extracted from two documents lands on the same node when merged.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::RagError;
use crate::models::{clamp_unit, Chunk, Entity, EntityType, RelationType, Relationship};
use crate::text::{excerpt, paragraph_spans, sentence_spans, tokens, HONORIFICS};

/// Base confidence of a single observation of a typed relationship.
pub const TYPED_BASE_CONFIDENCE: f64 = 0.7;
/// Base confidence of a single co-occurrence without a connecting keyword.
pub const COOCCURRENCE_BASE_CONFIDENCE: f64 = 0.3;

const CONTEXT_MAX_CHARS: usize = 240;

const ORG_SUFFIXES: &[&str] = &[
    "Inc",
    "Corp",
    "Ltd",
    "LLC",
    "University",
    "Institute",
    "Foundation",
    "Company",
    "Labs",
];

/// Connecting phrases, matched as whole words between two mentions.
/// Multi-word phrases come first so they win over their single-word parts.
const RELATION_KEYWORDS: &[(&str, RelationType)] = &[
    ("depends on", RelationType::DependsOn),
    ("relies on", RelationType::DependsOn),
    ("part of", RelationType::PartOf),
    ("consists of", RelationType::PartOf),
    ("leads to", RelationType::Causes),
    ("results in", RelationType::Causes),
    ("is a", RelationType::IsA),
    ("is an", RelationType::IsA),
    ("are a", RelationType::IsA),
    ("uses", RelationType::Uses),
    ("using", RelationType::Uses),
    ("utilizes", RelationType::Uses),
    ("implements", RelationType::Implements),
    ("extends", RelationType::Extends),
    ("requires", RelationType::DependsOn),
    ("causes", RelationType::Causes),
];

/// Graph extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Entities mentioned fewer times are dropped (seed terms are exempt).
    pub min_entity_mentions: usize,
    /// Domain terms always extracted when present.
    pub seed_terms: Vec<String>,
    /// Cap on entities considered per sentence when pairing relationships.
    pub max_entities_per_sentence: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            min_entity_mentions: 2,
            seed_terms: Vec::new(),
            max_entities_per_sentence: 12,
        }
    }
}

/// Entity and relationship sets keyed by id.
///
/// Serializes as `{"entities": [...], "relationships": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "GraphSnapshot", try_from = "GraphSnapshot")]
pub struct KnowledgeGraph {
    entities: BTreeMap<String, Entity>,
    relationships: BTreeMap<String, Relationship>,
}

/// Flat, serializable form of a [`KnowledgeGraph`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

impl From<KnowledgeGraph> for GraphSnapshot {
    fn from(g: KnowledgeGraph) -> Self {
        Self {
            entities: g.entities.into_values().collect(),
            relationships: g.relationships.into_values().collect(),
        }
    }
}

impl TryFrom<GraphSnapshot> for KnowledgeGraph {
    type Error = RagError;

    fn try_from(s: GraphSnapshot) -> Result<Self, Self::Error> {
        let mut g = KnowledgeGraph::new();
        for e in s.entities {
            g.insert_entity(e);
        }
        for r in s.relationships {
            g.insert_relationship(r)?;
        }
        Ok(g)
    }
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Look up an entity by display or canonical name.
    pub fn entity_by_name(&self, name: &str) -> Option<&Entity> {
        self.entities.get(&entity_id(&canonicalize(name)))
    }

    /// Insert or replace an entity.
    pub fn insert_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.id.clone(), entity);
    }

    /// Insert or replace a relationship. Both endpoints must already exist.
    pub fn insert_relationship(&mut self, rel: Relationship) -> Result<(), RagError> {
        for endpoint in [&rel.source_id, &rel.target_id] {
            if !self.entities.contains_key(endpoint) {
                return Err(RagError::DanglingRelationship {
                    relationship: rel.id.clone(),
                    entity: endpoint.clone(),
                });
            }
        }
        self.relationships.insert(rel.id.clone(), rel);
        Ok(())
    }

    /// Merge another graph into this one.
    ///
    /// Entities match by id (derived from the canonical name). Relationships
    /// with the same `(source, type, target)` combine their confidence with a
    /// noisy-OR. Importance is recomputed afterwards.
    pub fn merge(&mut self, other: KnowledgeGraph) {
        for (id, incoming) in other.entities {
            match self.entities.get_mut(&id) {
                Some(existing) => merge_entity(existing, incoming),
                None => {
                    self.entities.insert(id, incoming);
                }
            }
        }
        for (id, incoming) in other.relationships {
            match self.relationships.get_mut(&id) {
                Some(existing) => merge_relationship(existing, incoming),
                None => {
                    self.relationships.insert(id, incoming);
                }
            }
        }
        self.recompute_importance();
    }

    /// `importance = 0.5·freq/max_freq + 0.5·degree/max_degree`.
    pub fn recompute_importance(&mut self) {
        let mut degree: BTreeMap<&str, usize> = BTreeMap::new();
        for r in self.relationships.values() {
            *degree.entry(r.source_id.as_str()).or_default() += 1;
            if r.target_id != r.source_id {
                *degree.entry(r.target_id.as_str()).or_default() += 1;
            }
        }
        let max_freq = self.entities.values().map(|e| e.frequency).max().unwrap_or(0);
        let max_degree = degree.values().copied().max().unwrap_or(0);

        let degrees: BTreeMap<String, usize> = degree
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        for e in self.entities.values_mut() {
            let f = ratio(e.frequency, max_freq);
            let d = ratio(degrees.get(&e.id).copied().unwrap_or(0), max_degree);
            e.importance = clamp_unit(0.5 * f + 0.5 * d);
        }
    }

    /// Entities whose name occurs in `text` as a whole-word phrase, most
    /// important first.
    pub fn find_entities_in(&self, text: &str) -> Vec<&Entity> {
        let padded = pad(text);
        let mut found: Vec<&Entity> = self
            .entities
            .values()
            .filter(|e| !e.canonical_name.is_empty())
            .filter(|e| padded.contains(&format!(" {} ", e.canonical_name)))
            .collect();
        found.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.canonical_name.cmp(&b.canonical_name))
        });
        found
    }

    /// Edges touching `id` (either direction) with confidence at least
    /// `min_confidence`, paired with the entity on the other end.
    pub fn neighbors(&self, id: &str, min_confidence: f64) -> Vec<(&Relationship, &Entity)> {
        let mut out: Vec<(&Relationship, &Entity)> = self
            .relationships
            .values()
            .filter(|r| r.confidence >= min_confidence)
            .filter_map(|r| {
                let other = if r.source_id == id {
                    &r.target_id
                } else if r.target_id == id {
                    &r.source_id
                } else {
                    return None;
                };
                self.entities.get(other).map(|e| (r, e))
            })
            .collect();
        out.sort_by(|a, b| {
            b.0.confidence
                .partial_cmp(&a.0.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        out
    }

    /// Breadth-first expansion from `seeds`, returning `(entity_id, depth)`
    /// in visit order. Seeds are depth 0; unknown seeds are ignored.
    pub fn expand(
        &self,
        seeds: &[String],
        max_depth: usize,
        min_confidence: f64,
    ) -> Vec<(String, usize)> {
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();

        for seed in seeds {
            if self.entities.contains_key(seed) && visited.insert(seed.clone()) {
                queue.push_back((seed.clone(), 0));
            }
        }

        while let Some((id, depth)) = queue.pop_front() {
            order.push((id.clone(), depth));
            if depth >= max_depth {
                continue;
            }
            for (_, neighbor) in self.neighbors(&id, min_confidence) {
                if visited.insert(neighbor.id.clone()) {
                    queue.push_back((neighbor.id.clone(), depth + 1));
                }
            }
        }
        order
    }

    /// The part of the graph observed in one document.
    pub fn subgraph_for(&self, document_id: &str) -> KnowledgeGraph {
        let mut sub = KnowledgeGraph::new();
        for e in self.entities.values() {
            if e.document_ids.iter().any(|d| d == document_id) {
                sub.entities.insert(e.id.clone(), e.clone());
            }
        }
        for r in self.relationships.values() {
            if r.document_ids.iter().any(|d| d == document_id)
                && sub.entities.contains_key(&r.source_id)
                && sub.entities.contains_key(&r.target_id)
            {
                sub.relationships.insert(r.id.clone(), r.clone());
            }
        }
        sub.recompute_importance();
        sub
    }
}

fn ratio(n: usize, max: usize) -> f64 {
    if max == 0 {
        0.0
    } else {
        n as f64 / max as f64
    }
}

fn merge_entity(existing: &mut Entity, incoming: Entity) {
    let incoming_wins = match incoming.frequency.cmp(&existing.frequency) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => {
            (incoming.entity_type, &incoming.name) < (existing.entity_type, &existing.name)
        }
    };
    if incoming_wins {
        existing.entity_type = incoming.entity_type;
        existing.name = incoming.name;
    }
    existing.frequency += incoming.frequency;
    union_into(&mut existing.document_ids, incoming.document_ids);
    union_into(&mut existing.chunk_ids, incoming.chunk_ids);
}

fn merge_relationship(existing: &mut Relationship, incoming: Relationship) {
    if incoming.confidence > existing.confidence {
        existing.context = incoming.context;
    }
    existing.confidence =
        clamp_unit(1.0 - (1.0 - existing.confidence) * (1.0 - incoming.confidence));
    existing.support += incoming.support;
    union_into(&mut existing.document_ids, incoming.document_ids);
    union_into(&mut existing.chunk_ids, incoming.chunk_ids);
}

fn union_into(target: &mut Vec<String>, incoming: Vec<String>) {
    let mut set: BTreeSet<String> = target.drain(..).collect();
    set.extend(incoming);
    target.extend(set);
}

/// Canonical form of an entity name: lowercase alphanumeric tokens joined
/// by single spaces.
pub fn canonicalize(name: &str) -> String {
    tokens(name).join(" ")
}

/// First 16 hex chars of `sha256(canonical_name)`.
pub fn entity_id(canonical_name: &str) -> String {
    short_hash(canonical_name)
}

/// First 16 hex chars of `sha256("source|type|target")`.
pub fn relationship_id(source_id: &str, relation_type: RelationType, target_id: &str) -> String {
    short_hash(&format!("{}|{}|{}", source_id, relation_type.as_str(), target_id))
}

fn short_hash(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Noisy-OR confidence after `support` independent observations.
pub fn observed_confidence(relation_type: RelationType, support: usize) -> f64 {
    let base = if relation_type.is_typed() {
        TYPED_BASE_CONFIDENCE
    } else {
        COOCCURRENCE_BASE_CONFIDENCE
    };
    clamp_unit(1.0 - (1.0 - base).powi(support.min(i32::MAX as usize) as i32))
}

/// Token-normalized text padded with spaces, for whole-word matching.
fn pad(text: &str) -> String {
    format!(" {} ", tokens(text).join(" "))
}

struct Candidate {
    name: String,
    type_counts: BTreeMap<EntityType, usize>,
    frequency: usize,
    chunk_ids: BTreeSet<String>,
    seeded: bool,
}

struct Observation {
    chunk_id: String,
    sentence: String,
    padded: String,
    canonicals: Vec<String>,
}

struct PendingEdge {
    source_id: String,
    target_id: String,
    relation_type: RelationType,
    support: usize,
    context: String,
    chunk_ids: BTreeSet<String>,
}

/// Build the knowledge graph for one document.
///
/// Parent chunks are skipped since their text is covered by their children;
/// sentences repeated by chunk overlap are counted once.
pub fn build_document_graph(
    document_id: &str,
    chunks: &[Chunk],
    config: &GraphConfig,
) -> KnowledgeGraph {
    let seeds: Vec<(String, String)> = config
        .seed_terms
        .iter()
        .map(|s| (canonicalize(s), s.trim().to_string()))
        .filter(|(c, _)| !c.is_empty())
        .collect();

    let mut candidates: BTreeMap<String, Candidate> = BTreeMap::new();
    let mut observations: Vec<Observation> = Vec::new();
    let mut seen_sentences: BTreeSet<usize> = BTreeSet::new();

    for chunk in chunks.iter().filter(|c| c.level.is_leaf()) {
        let text = chunk.text.as_str();
        for (ps, pe) in paragraph_spans(text, 0, text.len()) {
            for (s, e) in sentence_spans(text, ps, pe) {
                if !seen_sentences.insert(chunk.start_offset + s) {
                    continue;
                }
                let sentence = &text[s..e];
                let padded = pad(sentence);
                let mut canonicals = Vec::new();

                for (name, entity_type, seeded) in extract_mentions(sentence, &seeds) {
                    let canonical = canonicalize(&name);
                    if canonical.is_empty() || canonicals.contains(&canonical) {
                        continue;
                    }
                    let count = count_occurrences(&padded, &format!(" {} ", canonical)).max(1);
                    let cand = candidates
                        .entry(canonical.clone())
                        .or_insert_with(|| Candidate {
                            name: name.clone(),
                            type_counts: BTreeMap::new(),
                            frequency: 0,
                            chunk_ids: BTreeSet::new(),
                            seeded: false,
                        });
                    cand.frequency += count;
                    *cand.type_counts.entry(entity_type).or_default() += count;
                    cand.chunk_ids.insert(chunk.id.clone());
                    cand.seeded |= seeded;
                    canonicals.push(canonical);
                }

                if canonicals.len() >= 2 {
                    observations.push(Observation {
                        chunk_id: chunk.id.clone(),
                        sentence: sentence.to_string(),
                        padded,
                        canonicals,
                    });
                }
            }
        }
    }

    let mut graph = KnowledgeGraph::new();
    for (canonical, cand) in &candidates {
        if cand.frequency < config.min_entity_mentions && !cand.seeded {
            continue;
        }
        let entity_type = cand
            .type_counts
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(t, _)| *t)
            .unwrap_or(EntityType::Concept);
        graph.insert_entity(Entity {
            id: entity_id(canonical),
            name: cand.name.clone(),
            canonical_name: canonical.clone(),
            entity_type,
            importance: 0.0,
            frequency: cand.frequency,
            document_ids: vec![document_id.to_string()],
            chunk_ids: cand.chunk_ids.iter().cloned().collect(),
        });
    }

    let mut edges: BTreeMap<String, PendingEdge> = BTreeMap::new();
    for obs in &observations {
        // (needle start, needle end, entity id), ordered by position
        let mut mentions: Vec<(usize, usize, String)> = obs
            .canonicals
            .iter()
            .filter_map(|c| {
                let id = entity_id(c);
                if !graph.entities.contains_key(&id) {
                    return None;
                }
                let needle = format!(" {} ", c);
                obs.padded
                    .find(&needle)
                    .map(|pos| (pos, pos + needle.len() - 1, id))
            })
            .collect();
        mentions.sort();
        mentions.truncate(config.max_entities_per_sentence);

        for i in 0..mentions.len() {
            for j in (i + 1)..mentions.len() {
                let (a_end, a_id) = (mentions[i].1, &mentions[i].2);
                let (b_pos, b_id) = (mentions[j].0, &mentions[j].2);
                if b_pos < a_end || a_id == b_id {
                    continue;
                }
                let relation_type = detect_relation(&obs.padded[a_end..=b_pos]);
                let id = relationship_id(a_id, relation_type, b_id);
                let edge = edges.entry(id).or_insert_with(|| PendingEdge {
                    source_id: a_id.clone(),
                    target_id: b_id.clone(),
                    relation_type,
                    support: 0,
                    context: excerpt(&obs.sentence, CONTEXT_MAX_CHARS),
                    chunk_ids: BTreeSet::new(),
                });
                edge.support += 1;
                edge.chunk_ids.insert(obs.chunk_id.clone());
            }
        }
    }

    for (id, edge) in edges {
        graph.relationships.insert(
            id.clone(),
            Relationship {
                id,
                source_id: edge.source_id,
                target_id: edge.target_id,
                relation_type: edge.relation_type,
                confidence: observed_confidence(edge.relation_type, edge.support),
                support: edge.support,
                context: edge.context,
                document_ids: vec![document_id.to_string()],
                chunk_ids: edge.chunk_ids.into_iter().collect(),
            },
        );
    }

    graph.recompute_importance();
    tracing::debug!(
        document_id,
        entities = graph.entity_count(),
        relationships = graph.relationship_count(),
        "built document graph"
    );
    graph
}

/// Type the edge between two mentions from the words separating them.
/// `between` is token-normalized and space-padded.
fn detect_relation(between: &str) -> RelationType {
    for (keyword, relation_type) in RELATION_KEYWORDS {
        if between.contains(&format!(" {} ", keyword)) {
            return *relation_type;
        }
    }
    RelationType::RelatesTo
}

/// Non-overlapping occurrences of `needle` in `haystack`. Needles are
/// space-padded, so the trailing space is shared with the next match.
fn count_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.trim().is_empty() {
        return 0;
    }
    let step = needle.len().saturating_sub(1).max(1);
    let mut count = 0;
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        count += 1;
        start += pos + step;
        if start >= haystack.len() {
            break;
        }
    }
    count
}

/// Candidate mentions in one sentence: `(surface name, type, seeded)`.
fn extract_mentions(sentence: &str, seeds: &[(String, String)]) -> Vec<(String, EntityType, bool)> {
    let mut out: Vec<(String, EntityType, bool)> = Vec::new();

    for inner in delimited(sentence, '`', '`') {
        out.push((inner.to_string(), EntityType::Term, false));
    }
    for (open, close) in [('"', '"'), ('\u{201c}', '\u{201d}')] {
        for inner in delimited(sentence, open, close) {
            if inner.split_whitespace().count() <= 5 {
                out.push((inner.to_string(), EntityType::Term, false));
            }
        }
    }

    for raw in sentence.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
        if is_acronym(word) {
            out.push((word.to_string(), EntityType::Acronym, false));
        } else if is_camel_case(word) {
            out.push((word.to_string(), EntityType::Technology, false));
        }
    }

    for (phrase, entity_type) in title_case_phrases(sentence) {
        out.push((phrase, entity_type, false));
    }

    let padded = pad(sentence);
    for (canonical, display) in seeds {
        if padded.contains(&format!(" {} ", canonical)) {
            out.push((display.clone(), EntityType::Concept, true));
        }
    }

    out
}

/// Text between matched delimiter pairs, 2 to 60 chars after trimming.
fn delimited(text: &str, open: char, close: char) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(open) {
        let after = &rest[start + open.len_utf8()..];
        let Some(end) = after.find(close) else {
            break;
        };
        let inner = after[..end].trim();
        let len = inner.chars().count();
        if (2..=60).contains(&len) {
            found.push(inner);
        }
        rest = &after[end + close.len_utf8()..];
    }
    found
}

/// 2 to 5 chars, leading capital, capitals and digits only (`API`, `BM25`).
fn is_acronym(word: &str) -> bool {
    (2..=5).contains(&word.len())
        && word.starts_with(|c: char| c.is_ascii_uppercase())
        && word.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// A lowercase letter followed by an uppercase one inside a single token
/// (`PostgreSQL`, `OpenAI`, `iPhone`).
fn is_camel_case(word: &str) -> bool {
    if word.len() < 3 || !word.chars().all(|c| c.is_alphanumeric()) {
        return false;
    }
    let chars: Vec<char> = word.chars().collect();
    chars.windows(2).any(|w| w[0].is_lowercase() && w[1].is_uppercase())
}

fn is_title_word(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) if first.is_uppercase() => {
            word.chars().skip(1).any(|c| c.is_lowercase()) && !is_camel_case(word)
        }
        _ => false,
    }
}

/// Runs of two or more Title-Case words. A run may not begin the sentence
/// unless it is led by an honorific; a word ending in `,;:)` closes the run.
fn title_case_phrases(sentence: &str) -> Vec<(String, EntityType)> {
    let raw: Vec<&str> = sentence.split_whitespace().collect();
    let words: Vec<&str> = raw
        .iter()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .collect();

    let mut phrases = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let honorific = HONORIFICS.contains(&words[i]);
        if !(is_title_word(words[i]) || honorific) {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        let mut closed = closes_run(raw[i]) && !honorific;
        while j < words.len() && !closed && is_title_word(words[j]) {
            closed = closes_run(raw[j]);
            j += 1;
        }

        let mut start = i;
        if start == 0 && !honorific {
            start = 1;
        }
        if j >= start + 2 {
            let phrase = words[start..j].join(" ");
            let entity_type = if HONORIFICS.contains(&words[start]) {
                EntityType::Person
            } else if ORG_SUFFIXES.contains(&words[j - 1]) {
                EntityType::Organization
            } else {
                EntityType::Concept
            };
            phrases.push((phrase, entity_type));
        }
        i = j;
    }
    phrases
}

fn closes_run(raw_word: &str) -> bool {
    raw_word.ends_with([',', ';', ':', ')'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_document, ChunkOptions, ChunkStrategy};

    fn chunks_for(doc: &str, text: &str) -> Vec<Chunk> {
        let opts = ChunkOptions {
            strategy: ChunkStrategy::Adaptive,
            ..ChunkOptions::default()
        };
        chunk_document(doc, text, &opts).unwrap()
    }

    fn cfg() -> GraphConfig {
        GraphConfig {
            min_entity_mentions: 1,
            ..GraphConfig::default()
        }
    }

    #[test]
    fn test_camel_case_and_acronyms() {
        assert!(is_camel_case("PostgreSQL"));
        assert!(is_camel_case("OpenAI"));
        assert!(!is_camel_case("Hello"));
        assert!(!is_camel_case("API"));
        assert!(is_acronym("API"));
        assert!(!is_acronym("A"));
        assert!(!is_acronym("TOOLONG"));
        assert!(is_acronym("BM25"));
        assert!(!is_acronym("25MB"));
    }

    #[test]
    fn test_title_case_phrase_types() {
        let phrases = title_case_phrases("We met Dr Ada Lovelace at Acme Labs, then left.");
        assert!(phrases.contains(&("Dr Ada Lovelace".to_string(), EntityType::Person)));
        assert!(phrases.contains(&("Acme Labs".to_string(), EntityType::Organization)));

        // sentence-start words are not phrase starts
        let phrases = title_case_phrases("Yesterday Vector Search improved.");
        assert_eq!(phrases, vec![("Vector Search".to_string(), EntityType::Concept)]);
        let phrases = title_case_phrases("The Model ran.");
        assert!(phrases.is_empty());
    }

    #[test]
    fn test_person_with_abbreviated_honorific() {
        let chunks = chunks_for("d1", "We met Dr. Ada Lovelace at Acme Labs, then left.");
        let graph = build_document_graph("d1", &chunks, &cfg());
        let person = graph.entity_by_name("Dr Ada Lovelace").unwrap();
        assert_eq!(person.entity_type, EntityType::Person);
        let org = graph.entity_by_name("Acme Labs").unwrap();
        assert_eq!(org.entity_type, EntityType::Organization);
        assert!(graph
            .relationships()
            .any(|r| r.source_id == person.id && r.target_id == org.id));
    }

    #[test]
    fn test_delimited_terms() {
        let found = delimited("Call `embed_batch` with \"query vector\" now.", '`', '`');
        assert_eq!(found, vec!["embed_batch"]);
        let found = delimited("Call `embed_batch` with \"query vector\" now.", '"', '"');
        assert_eq!(found, vec!["query vector"]);
    }

    #[test]
    fn test_relation_detection() {
        assert_eq!(detect_relation(" uses "), RelationType::Uses);
        assert_eq!(detect_relation(" strictly depends on "), RelationType::DependsOn);
        assert_eq!(detect_relation(" is a kind of "), RelationType::IsA);
        assert_eq!(detect_relation(" and "), RelationType::RelatesTo);
        assert_eq!(detect_relation(" reuses "), RelationType::RelatesTo);
    }

    #[test]
    fn test_build_graph_entities_and_typed_edge() {
        let text = "The retriever uses PostgreSQL for storage. PostgreSQL stores every BM25 score.";
        let chunks = chunks_for("doc1", text);
        let g = build_document_graph("doc1", &chunks, &cfg());

        let pg = g.entity_by_name("PostgreSQL").unwrap();
        assert_eq!(pg.entity_type, EntityType::Technology);
        assert_eq!(pg.frequency, 2);
        assert_eq!(pg.document_ids, vec!["doc1".to_string()]);
        let bm25 = g.entity_by_name("BM25").unwrap();
        assert_eq!(bm25.entity_type, EntityType::Acronym);

        let edge = g
            .relationships()
            .find(|r| r.source_id == pg.id && r.target_id == bm25.id)
            .unwrap();
        assert_eq!(edge.relation_type, RelationType::RelatesTo);
        assert!((edge.confidence - COOCCURRENCE_BASE_CONFIDENCE).abs() < 1e-9);
        assert_eq!(edge.context, "PostgreSQL stores every BM25 score.");
    }

    #[test]
    fn test_min_mentions_and_seeds() {
        let text = "Vector search uses HNSW graphs. Some pipelines use reranking.";
        let chunks = chunks_for("doc1", text);
        let config = GraphConfig {
            min_entity_mentions: 2,
            seed_terms: vec!["reranking".into()],
            ..GraphConfig::default()
        };
        let g = build_document_graph("doc1", &chunks, &config);
        assert!(g.entity_by_name("HNSW").is_none());
        assert!(g.entity_by_name("reranking").is_some());
    }

    #[test]
    fn test_support_accumulates_confidence() {
        let text = "GraphRAG uses PostgreSQL heavily. GraphRAG uses PostgreSQL again.\n\nGraphRAG uses PostgreSQL daily.";
        let chunks = chunks_for("doc1", text);
        let g = build_document_graph("doc1", &chunks, &cfg());
        let edge = g
            .relationships()
            .find(|r| r.relation_type == RelationType::Uses)
            .unwrap();
        assert_eq!(edge.support, 3);
        let expected = 1.0 - (1.0 - TYPED_BASE_CONFIDENCE).powi(3);
        assert!((edge.confidence - expected).abs() < 1e-9);
        assert!(edge.confidence <= 1.0);
    }

    #[test]
    fn test_importance_in_unit_range() {
        let text = "GraphRAG uses PostgreSQL. GraphRAG extends LlamaIndex. LlamaIndex uses FAISS.";
        let g = build_document_graph("doc1", &chunks_for("doc1", text), &cfg());
        let top = g
            .entities()
            .max_by(|a, b| a.importance.partial_cmp(&b.importance).unwrap())
            .unwrap();
        assert!((top.importance - 1.0).abs() < 1e-9);
        assert!(g.entities().all(|e| (0.0..=1.0).contains(&e.importance)));
    }

    #[test]
    fn test_merge_noisy_or_and_frequency() {
        let a = build_document_graph("a", &chunks_for("a", "GraphRAG uses PostgreSQL."), &cfg());
        let b = build_document_graph("b", &chunks_for("b", "GraphRAG uses PostgreSQL."), &cfg());
        let mut merged = a.clone();
        merged.merge(b);

        let e = merged.entity_by_name("graphrag").unwrap();
        assert_eq!(e.frequency, 2);
        assert_eq!(e.document_ids, vec!["a".to_string(), "b".to_string()]);

        let r = merged.relationships().next().unwrap();
        let expected = 1.0 - (1.0 - TYPED_BASE_CONFIDENCE) * (1.0 - TYPED_BASE_CONFIDENCE);
        assert!((r.confidence - expected).abs() < 1e-9);
        assert_eq!(r.support, 2);
        assert_eq!(merged.relationship_count(), 1);
    }

    #[test]
    fn test_merge_type_from_more_frequent_side() {
        let mut g = KnowledgeGraph::new();
        let mk = |name: &str, t: EntityType, freq: usize| Entity {
            id: entity_id(&canonicalize(name)),
            name: name.to_string(),
            canonical_name: canonicalize(name),
            entity_type: t,
            importance: 0.0,
            frequency: freq,
            document_ids: vec![],
            chunk_ids: vec![],
        };
        g.insert_entity(mk("Rust", EntityType::Concept, 1));
        let mut other = KnowledgeGraph::new();
        other.insert_entity(mk("RUST", EntityType::Technology, 3));
        g.merge(other);
        let e = g.entity_by_name("rust").unwrap();
        assert_eq!(e.entity_type, EntityType::Technology);
        assert_eq!(e.name, "RUST");
        assert_eq!(e.frequency, 4);
    }

    #[test]
    fn test_dangling_relationship_rejected() {
        let mut g = KnowledgeGraph::new();
        let rel = Relationship {
            id: "r1".into(),
            source_id: "missing".into(),
            target_id: "also-missing".into(),
            relation_type: RelationType::Uses,
            confidence: 0.5,
            support: 1,
            context: String::new(),
            document_ids: vec![],
            chunk_ids: vec![],
        };
        let err = g.insert_relationship(rel).unwrap_err();
        assert!(matches!(err, RagError::DanglingRelationship { .. }));
    }

    #[test]
    fn test_find_neighbors_expand() {
        let text = "GraphRAG uses PostgreSQL. PostgreSQL extends LanceDB. LanceDB uses FAISS.";
        let g = build_document_graph("doc1", &chunks_for("doc1", text), &cfg());

        let found = g.find_entities_in("does graphrag scale?");
        assert_eq!(found.len(), 1);
        let seed = found[0].id.clone();

        let neighbors = g.neighbors(&seed, 0.5);
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].1.canonical_name, "postgresql");

        let expanded = g.expand(&[seed.clone()], 1, 0.5);
        assert_eq!(expanded.len(), 2);
        assert_eq!(expanded[0], (seed.clone(), 0));
        let deep = g.expand(&[seed], 3, 0.5);
        assert_eq!(deep.len(), 4);
        assert_eq!(deep.last().unwrap().1, 3);
    }

    #[test]
    fn test_subgraph_and_serde() {
        let mut g = build_document_graph("a", &chunks_for("a", "GraphRAG uses PostgreSQL."), &cfg());
        g.merge(build_document_graph("b", &chunks_for("b", "LlamaIndex uses FAISS."), &cfg()));
        let sub = g.subgraph_for("b");
        assert_eq!(sub.entity_count(), 2);
        assert!(sub.entity_by_name("graphrag").is_none());

        let json = serde_json::to_value(&g).unwrap();
        assert_eq!(json["entities"].as_array().unwrap().len(), 4);
        let back: KnowledgeGraph = serde_json::from_value(json).unwrap();
        assert_eq!(back.entity_count(), 4);
        assert_eq!(back.relationship_count(), 2);
    }

    #[test]
    fn test_overlapping_chunks_count_sentences_once() {
        let text = (0..8)
            .map(|i| format!("PostgreSQL stores row {} safely.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let opts = ChunkOptions {
            strategy: ChunkStrategy::Adaptive,
            max_tokens: 20,
            overlap_tokens: 10,
            parent_max_tokens: 40,
            min_tokens: 1,
        };
        let chunks = chunk_document("doc1", &text, &opts).unwrap();
        assert!(chunks.len() > 1);
        let g = build_document_graph("doc1", &chunks, &cfg());
        assert_eq!(g.entity_by_name("PostgreSQL").unwrap().frequency, 8);
    }
}
