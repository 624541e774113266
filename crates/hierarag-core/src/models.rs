//! Core data models used throughout hierarag.
//!
//! These types represent the documents, chunks, graph nodes and edges, and
//! memory items that flow through the ingestion and retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RagError;

/// Lifecycle of a document inside the ingestion pipeline.
///
/// ```text
/// uploading → processing → embedding → indexing → complete
///      └──────────┴────────────┴───────────┴──→ failed
/// complete / failed → processing   (re-processing)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Uploading,
    Processing,
    Embedding,
    Indexing,
    Complete,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Uploading => "uploading",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Embedding => "embedding",
            ProcessingStatus::Indexing => "indexing",
            ProcessingStatus::Complete => "complete",
            ProcessingStatus::Failed => "failed",
        }
    }

    /// The next state on the happy path, if any.
    pub fn successor(&self) -> Option<ProcessingStatus> {
        match self {
            ProcessingStatus::Uploading => Some(ProcessingStatus::Processing),
            ProcessingStatus::Processing => Some(ProcessingStatus::Embedding),
            ProcessingStatus::Embedding => Some(ProcessingStatus::Indexing),
            ProcessingStatus::Indexing => Some(ProcessingStatus::Complete),
            ProcessingStatus::Complete | ProcessingStatus::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Complete | ProcessingStatus::Failed)
    }

    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        if self.successor() == Some(next) {
            return true;
        }
        match next {
            ProcessingStatus::Failed => !self.is_terminal(),
            ProcessingStatus::Processing => self.is_terminal(),
            _ => false,
        }
    }

    /// Validate a transition, returning the new state.
    pub fn transition(&self, next: ProcessingStatus) -> Result<ProcessingStatus, RagError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(RagError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(ProcessingStatus::Uploading),
            "processing" => Ok(ProcessingStatus::Processing),
            "embedding" => Ok(ProcessingStatus::Embedding),
            "indexing" => Ok(ProcessingStatus::Indexing),
            "complete" => Ok(ProcessingStatus::Complete),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(RagError::InvalidInput(format!(
                "unknown processing status: {}",
                other
            ))),
        }
    }
}

/// Descriptive metadata computed while processing a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Page count for paginated formats (PDF, PPTX).
    pub pages: Option<u32>,
    /// ISO 639-1 language guess.
    pub language: Option<String>,
    /// Readability-based complexity in `[0.0, 1.0]`.
    #[serde(default)]
    pub complexity_score: f64,
    /// Domain tags used by personalization.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Failure reason when the status is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A document owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub status: ProcessingStatus,
    pub metadata: DocumentMetadata,
    pub body: String,
    pub created_at: i64,
    pub updated_at: i64,
    /// SHA-256 of the body, used to skip unchanged re-ingests.
    pub content_hash: String,
}

/// Position of a chunk in the chunk hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkLevel {
    /// Section-sized context chunk produced by hierarchical chunking.
    Parent,
    /// Retrieval-sized chunk nested under a parent.
    Child,
    /// Chunk from a non-hierarchical strategy.
    Flat,
}

impl ChunkLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkLevel::Parent => "parent",
            ChunkLevel::Child => "child",
            ChunkLevel::Flat => "flat",
        }
    }

    /// Leaf chunks are the ones searched by default.
    pub fn is_leaf(&self) -> bool {
        !matches!(self, ChunkLevel::Parent)
    }
}

impl FromStr for ChunkLevel {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parent" => Ok(ChunkLevel::Parent),
            "child" => Ok(ChunkLevel::Child),
            "flat" => Ok(ChunkLevel::Flat),
            other => Err(RagError::InvalidInput(format!(
                "unknown chunk level: {}",
                other
            ))),
        }
    }
}

/// A span of a document's body text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
    pub level: ChunkLevel,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub child_ids: Vec<String>,
    pub page: Option<u32>,
    /// Byte offset of `text` in the document body.
    pub start_offset: usize,
    /// Exclusive end byte offset of `text` in the document body.
    pub end_offset: usize,
    pub token_estimate: usize,
}

/// Category assigned to an extracted entity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Concept,
    Person,
    Organization,
    Technology,
    Acronym,
    Term,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Concept => "concept",
            EntityType::Person => "person",
            EntityType::Organization => "organization",
            EntityType::Technology => "technology",
            EntityType::Acronym => "acronym",
            EntityType::Term => "term",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "concept" => Ok(EntityType::Concept),
            "person" => Ok(EntityType::Person),
            "organization" | "org" => Ok(EntityType::Organization),
            "technology" => Ok(EntityType::Technology),
            "acronym" => Ok(EntityType::Acronym),
            "term" => Ok(EntityType::Term),
            other => Err(RagError::InvalidInput(format!(
                "unknown entity type: {}",
                other
            ))),
        }
    }
}

/// A node in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// 16 hex chars of `sha256(canonical_name)`.
    pub id: String,
    pub name: String,
    pub canonical_name: String,
    pub entity_type: EntityType,
    pub importance: f64,
    pub frequency: usize,
    pub document_ids: Vec<String>,
    pub chunk_ids: Vec<String>,
}

/// Typed edge label.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Uses,
    Implements,
    Extends,
    DependsOn,
    PartOf,
    IsA,
    Causes,
    RelatesTo,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Uses => "uses",
            RelationType::Implements => "implements",
            RelationType::Extends => "extends",
            RelationType::DependsOn => "depends_on",
            RelationType::PartOf => "part_of",
            RelationType::IsA => "is_a",
            RelationType::Causes => "causes",
            RelationType::RelatesTo => "relates_to",
        }
    }

    /// Plain co-occurrence carries less evidence than a typed phrase.
    pub fn is_typed(&self) -> bool {
        !matches!(self, RelationType::RelatesTo)
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uses" => Ok(RelationType::Uses),
            "implements" => Ok(RelationType::Implements),
            "extends" => Ok(RelationType::Extends),
            "depends_on" => Ok(RelationType::DependsOn),
            "part_of" => Ok(RelationType::PartOf),
            "is_a" => Ok(RelationType::IsA),
            "causes" => Ok(RelationType::Causes),
            "relates_to" => Ok(RelationType::RelatesTo),
            other => Err(RagError::InvalidInput(format!(
                "unknown relation type: {}",
                other
            ))),
        }
    }
}

/// A directed, confidence-scored edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub relation_type: RelationType,
    pub confidence: f64,
    /// Number of sentences that produced this edge.
    pub support: usize,
    /// Supporting sentence.
    pub context: String,
    pub document_ids: Vec<String>,
    pub chunk_ids: Vec<String>,
}

/// Where a memory item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    Conversation,
    Document,
    Feedback,
    System,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::Conversation => "conversation",
            MemorySource::Document => "document",
            MemorySource::Feedback => "feedback",
            MemorySource::System => "system",
        }
    }
}

impl FromStr for MemorySource {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "conversation" => Ok(MemorySource::Conversation),
            "document" => Ok(MemorySource::Document),
            "feedback" => Ok(MemorySource::Feedback),
            "system" => Ok(MemorySource::System),
            other => Err(RagError::InvalidInput(format!(
                "unknown memory source: {}",
                other
            ))),
        }
    }
}

/// A single remembered fact or exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub content: String,
    pub importance: f64,
    /// Unix seconds.
    pub timestamp: i64,
    pub source: MemorySource,
    pub verified: bool,
    #[serde(default)]
    pub access_count: u32,
}

impl MemoryItem {
    pub fn new(content: impl Into<String>, importance: f64, source: MemorySource, timestamp: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            importance: clamp_unit(importance),
            timestamp,
            source,
            verified: false,
            access_count: 0,
        }
    }
}

/// Clamp a score to `[0.0, 1.0]`, mapping NaN to `0.0`.
pub fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut s = ProcessingStatus::Uploading;
        for next in [
            ProcessingStatus::Processing,
            ProcessingStatus::Embedding,
            ProcessingStatus::Indexing,
            ProcessingStatus::Complete,
        ] {
            s = s.transition(next).unwrap();
        }
        assert_eq!(s, ProcessingStatus::Complete);
    }

    #[test]
    fn test_skipping_states_rejected() {
        let err = ProcessingStatus::Uploading
            .transition(ProcessingStatus::Indexing)
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidTransition { .. }));
        assert!(!ProcessingStatus::Embedding.can_transition_to(ProcessingStatus::Processing));
    }

    #[test]
    fn test_failure_and_reprocessing() {
        assert!(ProcessingStatus::Embedding.can_transition_to(ProcessingStatus::Failed));
        assert!(!ProcessingStatus::Complete.can_transition_to(ProcessingStatus::Failed));
        assert!(ProcessingStatus::Complete.can_transition_to(ProcessingStatus::Processing));
        assert!(ProcessingStatus::Failed.can_transition_to(ProcessingStatus::Processing));
        assert!(!ProcessingStatus::Complete.can_transition_to(ProcessingStatus::Complete));
    }

    #[test]
    fn test_status_parse_display() {
        for s in ["uploading", "processing", "embedding", "indexing", "complete", "failed"] {
            let parsed: ProcessingStatus = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("done".parse::<ProcessingStatus>().is_err());
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(0.4), 0.4);
    }

    #[test]
    fn test_memory_item_importance_clamped() {
        let item = MemoryItem::new("x", 3.0, MemorySource::Feedback, 0);
        assert_eq!(item.importance, 1.0);
    }
}
