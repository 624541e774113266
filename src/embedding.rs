//! Embedding backends.
//!
//! [`create_provider`] turns `[embedding]` config into provider metadata;
//! [`embed_texts`] and [`embed_query`] do the work, dispatching on the
//! provider name:
//!
//! | Provider | Backend |
//! |----------|---------|
//! | `"disabled"` | none; embedding calls fail |
//! | `"hash"` | [`HashEmbedder`], deterministic and offline |
//! | `"openai"` | `POST https://api.openai.com/v1/embeddings` |
//! | `"ollama"` | `POST {url}/api/embed` |
//! | `"local"` | fastembed (requires the `local-embeddings` feature) |
//!
//! HTTP backends retry 429, 5xx, and network errors with exponential
//! backoff (1s, 2s, 4s, ... capped at 32s); other 4xx fail immediately.

use anyhow::{anyhow, bail, Result};
use std::time::Duration;

pub use hierarag_core::embedding::{EmbeddingProvider, HashEmbedder};
use hierarag_core::RagError;

use crate::config::EmbeddingConfig;

const DEFAULT_HASH_DIMS: usize = 256;
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";

/// Placeholder used when embeddings are turned off.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

/// Metadata for an HTTP-backed model (OpenAI or Ollama).
pub struct RemoteProvider {
    model: String,
    dims: usize,
}

impl RemoteProvider {
    fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for {} provider", config.provider))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for {} provider", config.provider))?;
        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for RemoteProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

/// Build provider metadata from config.
///
/// The OpenAI provider checks for `OPENAI_API_KEY` here so misconfiguration
/// surfaces before any document is processed.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "hash" => Ok(Box::new(hash_embedder(config))),
        "openai" => {
            if std::env::var("OPENAI_API_KEY").is_err() {
                bail!("OPENAI_API_KEY environment variable not set");
            }
            Ok(Box::new(RemoteProvider::new(config)?))
        }
        "ollama" => Ok(Box::new(RemoteProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Box::new(local::LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("local embedding provider requires --features local-embeddings"),
        other => bail!("unknown embedding provider: {}", other),
    }
}

fn hash_embedder(config: &EmbeddingConfig) -> HashEmbedder {
    HashEmbedder::new(config.dims.unwrap_or(DEFAULT_HASH_DIMS))
}

/// Embed texts with the configured backend, `batch_size` texts per call.
///
/// Returns one vector per input, in input order.
pub async fn embed_texts(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(texts.len());
    for batch in texts.chunks(config.batch_size.max(1)) {
        let vectors = embed_batch(config, batch).await?;
        if vectors.len() != batch.len() {
            bail!(
                "embedding backend returned {} vectors for {} inputs",
                vectors.len(),
                batch.len()
            );
        }
        out.extend(vectors);
    }
    tracing::debug!(provider = %config.provider, count = out.len(), "embedded texts");
    Ok(out)
}

/// Embed a single query string.
pub async fn embed_query(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    embed_texts(config, &[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("empty embedding response"))
}

async fn embed_batch(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    match config.provider.as_str() {
        "disabled" => Err(RagError::EmbeddingsDisabled.into()),
        "hash" => Ok(hash_embedder(config).embed_batch(texts)),
        "openai" => embed_openai(config, texts).await,
        "ollama" => embed_ollama(config, texts).await,
        #[cfg(feature = "local-embeddings")]
        "local" => local::embed(config, texts).await,
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("local embedding provider requires --features local-embeddings"),
        other => bail!("unknown embedding provider: {}", other),
    }
}

async fn embed_openai(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| anyhow!("OPENAI_API_KEY not set"))?;
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow!("embedding.model required"))?;
    let body = serde_json::json!({ "model": model, "input": texts });

    let json = post_with_retry(config, "OpenAI", OPENAI_URL, Some(&api_key), &body).await?;
    parse_vectors(json.get("data"), |item| item.get("embedding"))
}

async fn embed_ollama(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| anyhow!("embedding.model required"))?;
    let base = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);
    let url = format!("{}/api/embed", base.trim_end_matches('/'));
    let body = serde_json::json!({ "model": model, "input": texts });

    let json = post_with_retry(config, "Ollama", &url, None, &body).await?;
    parse_vectors(json.get("embeddings"), Some)
}

/// POST `body` as JSON, retrying transient failures with backoff.
async fn post_with_retry(
    config: &EmbeddingConfig,
    backend: &str,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let mut last_err = None;
    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::warn!(backend, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(url).json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }
                let text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("{} API error {}: {}", backend, status, text));
                    continue;
                }
                bail!("{} API error {}: {}", backend, status, text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} request to {} failed: {}", backend, url, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} embedding failed after retries", backend)))
}

/// Pull `[[f32]]` out of a response array, using `field` to reach each vector.
fn parse_vectors<'a>(
    array: Option<&'a serde_json::Value>,
    field: impl Fn(&'a serde_json::Value) -> Option<&'a serde_json::Value>,
) -> Result<Vec<Vec<f32>>> {
    let items = array
        .and_then(|a| a.as_array())
        .ok_or_else(|| anyhow!("invalid embedding response: missing vector array"))?;

    items
        .iter()
        .map(|item| {
            let values = field(item)
                .and_then(|v| v.as_array())
                .ok_or_else(|| anyhow!("invalid embedding response: vector is not an array"))?;
            Ok(values
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect())
        })
        .collect()
}

#[cfg(feature = "local-embeddings")]
mod local {
    use anyhow::{anyhow, bail, Result};

    use super::EmbeddingProvider;
    use crate::config::EmbeddingConfig;

    const DEFAULT_MODEL: &str = "all-minilm-l6-v2";

    /// fastembed model, downloaded from Hugging Face on first use.
    pub struct LocalProvider {
        model_name: String,
        dims: usize,
    }

    impl LocalProvider {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let model_name = config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.into());
            let (_, native_dims) = resolve(&model_name)?;
            Ok(Self {
                dims: config.dims.unwrap_or(native_dims),
                model_name,
            })
        }
    }

    impl EmbeddingProvider for LocalProvider {
        fn model_name(&self) -> &str {
            &self.model_name
        }
        fn dims(&self) -> usize {
            self.dims
        }
    }

    fn resolve(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
        use fastembed::EmbeddingModel::*;
        Ok(match name {
            "all-minilm-l6-v2" => (AllMiniLML6V2, 384),
            "bge-small-en-v1.5" => (BGESmallENV15, 384),
            "bge-base-en-v1.5" => (BGEBaseENV15, 768),
            "bge-large-en-v1.5" => (BGELargeENV15, 1024),
            "nomic-embed-text-v1.5" => (NomicEmbedTextV15, 768),
            "multilingual-e5-small" => (MultilingualE5Small, 384),
            "multilingual-e5-base" => (MultilingualE5Base, 768),
            other => bail!("unknown local embedding model: '{}'", other),
        })
    }

    pub async fn embed(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model_name = config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.into());
        let (model, _) = resolve(&model_name)?;
        let batch_size = config.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut engine = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(model).with_show_download_progress(false),
            )
            .map_err(|e| anyhow!("failed to initialize local embedding model: {}", e))?;
            engine
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow!("local embedding failed: {}", e))
        })
        .await?
    }
}
