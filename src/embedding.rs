//! Embedding providers.
//!
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OllamaProvider`]**: calls an Ollama instance. `POST /api/embed` produces
//!   vectors; `POST /api/show` reports the model's embedding length.
//!
//! The embedding space of a collection is the Ollama model name, so one
//! provider instance serves every collection.
//!
//! # Retry Strategy
//!
//! Transient errors are retried with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use kowalski_core::embedding::EmbeddingProvider;
use kowalski_core::EmbeddingSpace;

use crate::config::EmbeddingConfig;

/// A provider that refuses every request.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    async fn embed(&self, _texts: &[String], _space: &EmbeddingSpace) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }

    async fn dims(&self, _space: &EmbeddingSpace) -> Result<usize> {
        bail!("Embedding provider is disabled")
    }
}

pub struct OllamaProvider {
    url: String,
    max_retries: u32,
    client: reqwest::Client,
    /// Dimensionality per model: configured overrides plus looked-up values.
    dims: Mutex<HashMap<String, usize>>,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            url: config.url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            client,
            dims: Mutex::new(config.dims.clone()),
        })
    }

    async fn post(&self, endpoint: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.url, endpoint);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(%url, attempt, ?delay, "retrying Ollama request");
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&url).json(body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Ollama API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Ollama API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow::anyhow!(
                        "Ollama connection error (is Ollama running at {}?): {}",
                        self.url,
                        e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Ollama request failed after retries")))
    }

    fn cached_dims(&self, model: &str) -> Option<usize> {
        self.dims
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(model)
            .copied()
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed(&self, texts: &[String], space: &EmbeddingSpace) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": space.as_str(),
            "input": texts,
        });
        let json = self.post("/api/embed", &body).await?;
        let vectors = parse_embed_response(&json)?;
        if vectors.len() != texts.len() {
            bail!(
                "Ollama returned {} embeddings for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        Ok(vectors)
    }

    async fn dims(&self, space: &EmbeddingSpace) -> Result<usize> {
        if let Some(dims) = self.cached_dims(space.as_str()) {
            return Ok(dims);
        }
        let body = serde_json::json!({ "model": space.as_str() });
        let json = self.post("/api/show", &body).await?;
        let dims = parse_embedding_length(&json)?;
        tracing::debug!(model = %space, dims, "looked up embedding length");
        self.dims
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(space.as_str().to_string(), dims);
        Ok(dims)
    }
}

fn parse_embed_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

/// Read `model_info["<arch>.embedding_length"]` from an `/api/show` reply.
fn parse_embedding_length(json: &serde_json::Value) -> Result<usize> {
    let info = json
        .get("model_info")
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing model_info"))?;
    let arch = info
        .get("general.architecture")
        .and_then(|a| a.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing general.architecture"))?;
    let length = info
        .get(format!("{}.embedding_length", arch))
        .and_then(|l| l.as_u64())
        .ok_or_else(|| anyhow::anyhow!("model architecture {} reports no embedding length", arch))?;
    Ok(length as usize)
}

/// Create the [`EmbeddingProvider`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embed_response() {
        let json = serde_json::json!({
            "model": "nomic-embed-text",
            "embeddings": [[0.5, -1.0], [0.25, 2.0]]
        });
        let vectors = parse_embed_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![0.5, -1.0], vec![0.25, 2.0]]);
        assert!(parse_embed_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_parse_embedding_length() {
        let json = serde_json::json!({
            "model_info": {
                "general.architecture": "nomic-bert",
                "nomic-bert.embedding_length": 768
            }
        });
        assert_eq!(parse_embedding_length(&json).unwrap(), 768);

        let json = serde_json::json!({
            "model_info": { "general.architecture": "llama" }
        });
        assert!(parse_embedding_length(&json).is_err());
    }

    #[tokio::test]
    async fn test_configured_dims_skip_lookup() {
        let mut config = EmbeddingConfig {
            url: "http://127.0.0.1:9".to_string(),
            max_retries: 0,
            ..EmbeddingConfig::default()
        };
        config.dims.insert("m1".to_string(), 3);
        let provider = OllamaProvider::new(&config).unwrap();
        assert_eq!(provider.dims(&EmbeddingSpace::new("m1")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let provider = create_provider(&EmbeddingConfig {
            provider: "disabled".to_string(),
            ..EmbeddingConfig::default()
        })
        .unwrap();
        let space = EmbeddingSpace::new("m1");
        assert!(provider.embed(&["x".to_string()], &space).await.is_err());
        assert!(provider.dims(&space).await.is_err());
    }
}
