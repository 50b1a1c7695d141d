//! # manual-qa-embed
//!
//! Text embedding providers for the manual question answerer. A provider maps
//! text to fixed-length vectors, deterministically, so that passages embedded
//! while building an index can be compared with questions embedded later.
//!
//! Two backends are available:
//!
//! - **OpenAI-compatible API**: [`OpenAiEmbeddingProvider`] calls a hosted
//!   `/embeddings` endpoint, batching requests and checking every response.
//! - **Local ONNX models**: [`FastEmbedProvider`] runs a FastEmbed built-in
//!   model in-process, caching loaded models globally.
//!
//! ## Quick Start
//!
//! ```no_run
//! use manual_qa_embed::{EmbedConfig, create_provider};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let provider = create_provider(&EmbedConfig::fastembed("all-minilm-l6-v2"), None).await?;
//!
//! let texts = vec!["Check the brake fluid level.".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//! println!("{} embeddings of dimension {}", result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```
//!
//! Embeddings are returned as half-precision (f16) vectors, L2-normalized unless
//! [`EmbedConfig::normalize`] is turned off.

pub mod config;
pub mod error;
pub mod openai;
pub mod provider;

use std::sync::Arc;

pub use config::{DEFAULT_API_BASE, EmbedConfig, ProviderKind};
pub use error::{EmbedError, Result};
pub use openai::OpenAiEmbeddingProvider;
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider, to_f16_vectors};

/// Build the provider selected by `config.provider`.
///
/// The hosted provider needs an API key; the local one ignores it.
pub async fn create_provider(
    config: &EmbedConfig,
    api_key: Option<&str>,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider {
        ProviderKind::OpenAi => {
            let api_key = api_key.ok_or_else(|| {
                EmbedError::invalid_config("OPENAI_API_KEY is required for openai embeddings")
            })?;
            Ok(Arc::new(OpenAiEmbeddingProvider::new(config.clone(), api_key)?))
        }
        ProviderKind::FastEmbed => Ok(Arc::new(FastEmbedProvider::create(config.clone()).await?)),
    }
}
