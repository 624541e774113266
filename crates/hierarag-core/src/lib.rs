//! # hierarag core
//!
//! Shared, runtime-agnostic logic for hierarag: data models, hierarchical
//! chunking, the store abstraction, knowledge-graph construction,
//! personalization state, personalized retrieval, and answer synthesis.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or network code.
//! The `hierarag` application crate supplies the SQLite store, the
//! embedding providers that call out to HTTP APIs, and the CLI/HTTP
//! frontends.
//!
//! ## Pipeline
//!
//! ```text
//! Document ──▶ chunk ──▶ embedding ──▶ Store (vector index)
//!                 │                          │
//!                 ▼                          ▼
//!              graph ───────────────▶ retrieve (+ profile, memory)
//!                                            │
//!                                            ▼
//!                                        synthesize
//! ```

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod memory;
pub mod models;
pub mod profile;
pub mod retrieve;
pub mod store;
pub mod synthesize;
pub mod text;

pub use error::RagError;
