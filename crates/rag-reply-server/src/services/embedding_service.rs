use crate::config::EmbeddingConfig;
use crate::error::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

/// OpenAI-compatible `/v1/embeddings` client.
#[derive(Clone)]
pub struct EmbeddingService {
    client: Client,
    config: EmbeddingConfig,
}

impl EmbeddingService {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }
}

fn as_vector(value: &Value) -> Option<Vec<f32>> {
    let values = value.as_array()?;
    Some(
        values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect(),
    )
}

/// Accepts `{"data":[{"embedding":[..]}]}`, `{"embedding":[..]}`,
/// `[{"embedding":[..]}]` and a bare `[..]`.
fn parse_embedding(value: &Value) -> Option<Vec<f32>> {
    if let Some(first) = value.get("data").and_then(|data| data.get(0)) {
        return first.get("embedding").and_then(as_vector);
    }
    if let Some(embedding) = value.get("embedding") {
        return as_vector(embedding);
    }
    match value.get(0) {
        Some(first) if first.is_object() => first.get("embedding").and_then(as_vector),
        Some(_) => as_vector(value),
        None => None,
    }
}

#[async_trait]
impl EmbeddingProvider for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if self.config.base_url.is_empty() {
            return Err(ProviderError::NotConfigured("embedding.base_url".into()));
        }
        debug!("Generating embedding for {} chars", text.len());

        let request = EmbeddingRequest {
            model: &self.config.model,
            input: text,
        };

        let mut builder = self
            .client
            .post(format!("{}/v1/embeddings", self.config.base_url.trim_end_matches('/')))
            .json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let json_value: Value = response.json().await?;
        let embedding = parse_embedding(&json_value).ok_or_else(|| {
            ProviderError::Malformed("unrecognized embedding response format".into())
        })?;

        if embedding.is_empty() {
            return Err(ProviderError::Malformed("empty embedding".into()));
        }
        if embedding.len() != self.config.dimension {
            return Err(ProviderError::Malformed(format!(
                "embedding dimension mismatch: expected {}, got {}",
                self.config.dimension,
                embedding.len()
            )));
        }

        Ok(embedding)
    }
}
