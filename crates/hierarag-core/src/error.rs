//! Domain errors raised by the core pipeline.
//!
//! Store implementations and the application layer work in
//! [`anyhow::Result`]; they wrap these variants so frontends can recover
//! the kind with `downcast_ref::<RagError>()` and map it to a status code.

use thiserror::Error;

use crate::models::ProcessingStatus;

#[derive(Debug, Error)]
pub enum RagError {
    /// Caller supplied a value outside the accepted domain.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced document, chunk, entity, or user does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A document status change that the lifecycle does not allow.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ProcessingStatus,
        to: ProcessingStatus,
    },

    /// A relationship whose endpoint entity is missing from the graph.
    #[error("relationship {relationship} references missing entity {entity}")]
    DanglingRelationship {
        relationship: String,
        entity: String,
    },

    /// Semantic retrieval was requested without an embedding provider.
    #[error("embeddings are disabled; configure an [embedding] provider")]
    EmbeddingsDisabled,
}

