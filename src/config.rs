//! TOML configuration.
//!
//! Only `[db]` is required; every other section falls back to defaults.
//!
//! ```toml
//! [db]
//! path = "./data/hierarag.sqlite"
//!
//! [chunking]
//! strategy = "hierarchical"
//! max_tokens = 256
//!
//! [embedding]
//! provider = "hash"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use hierarag_core::chunk::{ChunkOptions, ChunkStrategy};
use hierarag_core::graph::GraphConfig;
use hierarag_core::memory::MemoryConfig;
use hierarag_core::retrieve::{RetrievalParams, SearchMode};
use hierarag_core::synthesize::SynthesisOptions;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub synthesis: SynthesisOptions,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub strategy: ChunkStrategy,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    #[serde(default = "default_parent_max_tokens")]
    pub parent_max_tokens: usize,
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::default(),
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
            parent_max_tokens: default_parent_max_tokens(),
            min_tokens: default_min_tokens(),
        }
    }
}

impl ChunkingConfig {
    pub fn options(&self) -> ChunkOptions {
        ChunkOptions {
            strategy: self.strategy,
            max_tokens: self.max_tokens,
            overlap_tokens: self.overlap_tokens,
            parent_max_tokens: self.parent_max_tokens,
            min_tokens: self.min_tokens,
        }
    }
}

fn default_max_tokens() -> usize {
    256
}
fn default_overlap() -> usize {
    32
}
fn default_parent_max_tokens() -> usize {
    1024
}
fn default_min_tokens() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub default_mode: SearchMode,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: usize,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_vector: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(default = "default_max_chunks_per_doc")]
    pub max_chunks_per_doc: usize,
    #[serde(default = "default_personalization_weight")]
    pub personalization_weight: f64,
    #[serde(default)]
    pub expand_to_parent: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_mode: SearchMode::default(),
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k_keyword: default_candidate_k(),
            candidate_k_vector: default_candidate_k(),
            final_limit: default_final_limit(),
            max_chunks_per_doc: default_max_chunks_per_doc(),
            personalization_weight: default_personalization_weight(),
            expand_to_parent: false,
        }
    }
}

impl RetrievalConfig {
    /// Retrieval parameters with an optional per-request result limit.
    pub fn params(&self, limit: Option<usize>) -> RetrievalParams {
        RetrievalParams {
            hybrid_alpha: self.hybrid_alpha,
            candidate_k_keyword: self.candidate_k_keyword,
            candidate_k_vector: self.candidate_k_vector,
            final_limit: limit.unwrap_or(self.final_limit),
            max_chunks_per_doc: self.max_chunks_per_doc,
            personalization_weight: self.personalization_weight,
            expand_to_parent: self.expand_to_parent,
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidate_k() -> usize {
    80
}
fn default_final_limit() -> usize {
    12
}
fn default_max_chunks_per_doc() -> usize {
    3
}
fn default_personalization_weight() -> f64 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Documents processed at the same time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Files larger than this are skipped.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Owner recorded when the caller does not name one.
    #[serde(default = "default_owner")]
    pub default_owner: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_concurrent: default_max_concurrent(),
            max_file_bytes: default_max_file_bytes(),
            default_owner: default_owner(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["**/*.md", "**/*.txt", "**/*.pdf", "**/*.docx", "**/*.pptx"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_concurrent() -> usize {
    4
}
fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_owner() -> String {
    "local".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    config
        .chunking
        .options()
        .validate()
        .map_err(|e| anyhow::anyhow!("chunking: {}", e))?;

    let r = &config.retrieval;
    if r.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if !(0.0..=1.0).contains(&r.hybrid_alpha) {
        bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&r.personalization_weight) {
        bail!("retrieval.personalization_weight must be in [0.0, 1.0]");
    }
    if r.max_chunks_per_doc < 1 {
        bail!("retrieval.max_chunks_per_doc must be >= 1");
    }

    let e = &config.embedding;
    match e.provider.as_str() {
        "disabled" | "hash" | "local" => {}
        "openai" | "ollama" => {
            if e.dims.is_none() || e.dims == Some(0) {
                bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
            }
            if e.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    e.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
            other
        ),
    }
    if e.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if e.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    if config.ingest.max_concurrent == 0 {
        bail!("ingest.max_concurrent must be >= 1");
    }
    if config.memory.half_life_days <= 0.0 {
        bail!("memory.half_life_days must be > 0");
    }
    if !(0.0..=1.0).contains(&config.synthesis.min_confidence) {
        bail!("synthesis.min_confidence must be in [0.0, 1.0]");
    }

    Ok(())
}
