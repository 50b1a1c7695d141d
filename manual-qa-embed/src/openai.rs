//! Hosted embeddings through an OpenAI-compatible `/embeddings` endpoint

use crate::config::{EmbedConfig, ProviderKind};
use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult, to_f16_vectors};
use async_trait::async_trait;
use half::f16;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedding provider backed by a hosted OpenAI-compatible API
#[derive(Clone)]
pub struct OpenAiEmbeddingProvider {
    config: EmbedConfig,
    api_key: String,
    client: Client,
    dimension: usize,
}

impl std::fmt::Debug for OpenAiEmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddingProvider")
            .field("config", &self.config)
            .field("api_key", &"<redacted>")
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: EmbedConfig, api_key: impl Into<String>) -> Result<Self> {
        if config.provider != ProviderKind::OpenAi {
            return Err(EmbedError::invalid_config(format!(
                "OpenAiEmbeddingProvider cannot serve provider {}",
                config.provider
            )));
        }
        config.validate()?;

        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(EmbedError::invalid_config("API key must not be empty"));
        }

        let dimension = config
            .dimension
            .ok_or_else(|| EmbedError::invalid_config("dimension is required"))?;
        let client = Client::builder().timeout(config.timeout()).build()?;

        tracing::info!(
            "OpenAI embedding provider ready: model={}, dimension={}",
            config.model,
            dimension
        );

        Ok(Self {
            config,
            api_key,
            client,
            dimension,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.config.api_base.trim_end_matches('/'))
    }

    /// Only the text-embedding-3 family accepts a requested output size.
    fn requested_dimensions(&self) -> Option<usize> {
        self.config
            .model
            .starts_with("text-embedding-3")
            .then_some(self.dimension)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
            dimensions: self.requested_dimensions(),
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(EmbedError::Api { status, message });
        }

        let parsed: EmbeddingResponse = response.json().await?;
        order_embeddings(parsed, texts.len(), self.dimension)
    }
}

/// Put the returned vectors back in input order and check their shape
fn order_embeddings(
    mut response: EmbeddingResponse,
    expected: usize,
    dimension: usize,
) -> Result<Vec<Vec<f32>>> {
    if response.data.len() != expected {
        return Err(EmbedError::CountMismatch {
            expected,
            actual: response.data.len(),
        });
    }

    response.data.sort_by_key(|item| item.index);
    if response
        .data
        .iter()
        .enumerate()
        .any(|(position, item)| item.index != position)
    {
        return Err(EmbedError::invalid_config(
            "embedding response indices do not cover the request",
        ));
    }

    response
        .data
        .into_iter()
        .map(|item| {
            if item.embedding.len() != dimension {
                Err(EmbedError::DimensionMismatch {
                    expected: dimension,
                    actual: item.embedding.len(),
                })
            } else {
                Ok(item.embedding)
            }
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let result = self.embed_texts(&[text.to_string()]).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::invalid_config("No embedding generated for text"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            tracing::debug!("Requesting embeddings for batch of {} texts", batch.len());
            let vectors = self.embed_batch(batch).await?;
            all_embeddings.extend(to_f16_vectors(vectors, self.config.normalize));
        }

        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
