//! # hierarag
//!
//! Personalized hierarchical retrieval-augmented generation over a local
//! SQLite index.
//!
//! Documents are split into parent/child chunks, optionally embedded, and
//! mined for a knowledge graph of entities and relationships. Retrieval
//! blends keyword and vector scores with a per-user profile and
//! conversation memory; answers are synthesized extractively with
//! citations, reasoning steps, and an uncertainty score.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌───────────────────┐   ┌───────────┐
//! │  Files /    │──▶│  Ingest pipeline  │──▶│  SQLite   │
//! │  inline txt │   │ extract+chunk+emb │   │ FTS5+Vec  │
//! └─────────────┘   │     +graph        │   │ +graphs   │
//!                   └───────────────────┘   └─────┬─────┘
//!                                                 │
//!                           ┌─────────────────────┤
//!                           ▼                     ▼
//!                      ┌──────────┐         ┌──────────┐
//!                      │   CLI    │         │   HTTP   │
//!                      │  (hrag)  │         │  (axum)  │
//!                      └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hrag init
//! hrag ingest ./docs --tags kafka,streaming
//! hrag search "consumer groups" --user alice
//! hrag ask "How does Kafka relate to Spark?" --user alice
//! hrag serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`connector_fs`] | Filesystem scanning |
//! | [`extract`] | Text extraction for text, PDF, DOCX, PPTX |
//! | [`ingest`] | Document lifecycle pipeline |
//! | [`embedding`] | Embedding providers |
//! | [`sqlite_store`] | SQLite implementation of the core store traits |
//! | [`search`] | Personalized document search |
//! | [`ask`] | Question answering and memory recording |
//! | [`graph_cmd`] | Knowledge graph inspection and rebuild |
//! | [`profile_cmd`] | User profiles and memory |
//! | [`server`] | HTTP API |
//! | [`db`] / [`migrate`] | Database connection and schema |

pub mod ask;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod extract;
pub mod get;
pub mod graph_cmd;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod profile_cmd;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
