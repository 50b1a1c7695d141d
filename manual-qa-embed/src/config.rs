//! Configuration for embedding models

use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default OpenAI-compatible API base URL
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Which backend produces the embeddings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Hosted OpenAI-compatible `/embeddings` endpoint
    #[serde(rename = "openai")]
    OpenAi,
    /// Local ONNX model run through FastEmbed
    #[serde(rename = "fastembed")]
    FastEmbed,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::FastEmbed => write!(f, "fastembed"),
        }
    }
}

/// Configuration for embedding models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Backend to use
    pub provider: ProviderKind,
    /// Name of the embedding model to use
    pub model: String,
    /// Expected vector dimension. Required for hosted models; local models report their own.
    pub dimension: Option<usize>,
    /// Maximum batch size for embedding generation
    pub batch_size: usize,
    /// Whether to normalize embeddings
    pub normalize: bool,
    /// Timeout for a single embedding call, in seconds
    pub timeout_secs: u64,
    /// Base URL of the hosted API
    pub api_base: String,
    /// Where local models are downloaded and cached
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: "text-embedding-3-small".to_string(),
            dimension: Some(1536),
            batch_size: 32,
            normalize: true,
            timeout_secs: 60,
            api_base: DEFAULT_API_BASE.to_string(),
            cache_dir: None,
        }
    }
}

impl EmbedConfig {
    /// Create a configuration for a hosted OpenAI embedding model
    pub fn openai(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: model.into(),
            dimension: Some(dimension),
            ..Self::default()
        }
    }

    /// Create a configuration for a local FastEmbed model
    pub fn fastembed(model: impl Into<String>) -> Self {
        Self {
            provider: ProviderKind::FastEmbed,
            model: model.into(),
            dimension: None,
            batch_size: 16,
            ..Self::default()
        }
    }

    /// Set the batch size for embedding generation (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set whether to normalize embeddings (builder style)
    pub fn with_normalize(self, normalize: bool) -> Self {
        Self { normalize, ..self }
    }

    /// Set the per-call timeout (builder style)
    pub fn with_timeout_secs(self, timeout_secs: u64) -> Self {
        Self {
            timeout_secs,
            ..self
        }
    }

    /// Point the hosted provider at a different base URL (builder style)
    pub fn with_api_base<S: Into<String>>(self, api_base: S) -> Self {
        Self {
            api_base: api_base.into(),
            ..self
        }
    }

    /// Set the local model cache directory (builder style)
    pub fn with_cache_dir<P: Into<PathBuf>>(self, cache_dir: P) -> Self {
        Self {
            cache_dir: Some(cache_dir.into()),
            ..self
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate the settings that do not depend on the backend being reachable
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(EmbedError::invalid_config("model name must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("batch_size must be at least 1"));
        }
        if self.timeout_secs == 0 {
            return Err(EmbedError::invalid_config("timeout_secs must be at least 1"));
        }
        if self.dimension == Some(0) {
            return Err(EmbedError::invalid_config("dimension must be at least 1"));
        }
        if self.provider == ProviderKind::OpenAi {
            if self.dimension.is_none() {
                return Err(EmbedError::invalid_config(
                    "dimension is required for openai embedding models",
                ));
            }
            if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
                return Err(EmbedError::invalid_config(format!(
                    "api_base must be an http(s) URL, got {:?}",
                    self.api_base
                )));
            }
        }

        tracing::debug!("Embedding configuration valid for: {}", self.model);
        Ok(())
    }
}
