//! Embedding provider implementations

use crate::config::{EmbedConfig, ProviderKind};
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use half::f16;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result from a vector of f16 embeddings.
    ///
    /// The dimension is inferred from the first embedding vector.
    /// If the embeddings vector is empty, dimension defaults to 0.
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    /// Returns the number of embedding vectors in this result.
    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    /// Returns `true` if this result contains no embedding vectors.
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text.
///
/// Implementations must be deterministic: the same text always maps to the
/// same vector, otherwise vectors stored in an index cannot be compared with
/// vectors computed for a later query.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>>;

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;

    /// Get the name of the model behind this provider
    fn model_name(&self) -> &str;
}

/// Convert f32 vectors to f16, L2-normalizing them first when asked to.
pub fn to_f16_vectors(embeddings: Vec<Vec<f32>>, normalize: bool) -> Vec<Vec<f16>> {
    embeddings
        .into_iter()
        .map(|mut embedding| {
            if normalize {
                let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for value in &mut embedding {
                        *value /= norm;
                    }
                }
            }
            embedding.into_iter().map(f16::from_f32).collect()
        })
        .collect()
}

/// Type alias for cached model entries (model, dimension)
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Global cache for initialized embedding models to avoid reloading
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

/// Get the global model cache
fn model_cache() -> MutexGuard<'static, HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Map a configured model name onto a FastEmbed built-in model
pub fn fastembed_model(name: &str) -> Result<EmbeddingModel> {
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "multilingual-e5-small" => Ok(EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(EmbeddingModel::MultilingualE5Large),
        "paraphrase-multilingual-minilm-l12-v2" => Ok(EmbeddingModel::ParaphraseMLMiniLML12V2),
        other => Err(EmbedError::invalid_config(format!(
            "unsupported fastembed model: {other}"
        ))),
    }
}

/// FastEmbed-based embedding provider using local ONNX models
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Creates a new uninitialized provider. Call [`initialize`](Self::initialize) before use.
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            dimension: config.dimension.unwrap_or(384),
            config,
            model: None,
        }
    }

    /// Downloads (if needed) and loads the embedding model, reusing a cached instance.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.config.provider != ProviderKind::FastEmbed {
            return Err(EmbedError::invalid_config(format!(
                "FastEmbedProvider cannot serve provider {}",
                self.config.provider
            )));
        }
        self.config.validate()?;
        let embedding_model = fastembed_model(&self.config.model)?;

        tracing::info!(
            "Initializing FastEmbed provider for model: {}",
            self.config.model
        );

        let cache_key = self.create_cache_key();
        let cached = model_cache()
            .get(&cache_key)
            .map(|(model, dim)| (Arc::clone(model), *dim));

        if let Some((cached_model, cached_dimension)) = cached {
            tracing::info!("Using cached model for: {}", self.config.model);
            self.model = Some(cached_model);
            self.dimension = cached_dimension;
            return self.validate_model().await;
        }

        // Load model in a blocking task
        let config = self.config.clone();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                tracing::info!("Loading embedding model: {}", config.model);

                let mut init_options =
                    InitOptions::new(embedding_model).with_show_download_progress(true);
                if let Some(cache_dir) = &config.cache_dir {
                    init_options = init_options.with_cache_dir(cache_dir.clone());
                }

                let mut model = TextEmbedding::try_new(init_options)
                    .map_err(|e| EmbedError::External { source: e })?;

                // Get dimension by generating a test embedding
                let probe = model
                    .embed(vec!["dimension probe".to_string()], None)
                    .map_err(|e| EmbedError::External { source: e })?;
                let dimension = probe
                    .first()
                    .map(|emb| emb.len())
                    .ok_or_else(|| EmbedError::invalid_config("model produced no embedding"))?;

                tracing::info!("Model loaded successfully. Dimension: {}", dimension);
                Ok((model, dimension))
            })
            .await??;

        if let Some(expected) = self.config.dimension {
            if expected != dimension {
                return Err(EmbedError::DimensionMismatch {
                    expected,
                    actual: dimension,
                });
            }
        }

        let model_arc = Arc::new(Mutex::new(model));
        model_cache().insert(cache_key, (Arc::clone(&model_arc), dimension));

        self.model = Some(model_arc);
        self.dimension = dimension;

        self.validate_model().await
    }

    /// Creates and initializes a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    /// Create a cache key from the settings that affect which model is loaded
    fn create_cache_key(&self) -> String {
        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:");
        hasher.write(self.config.model.to_lowercase().as_bytes());
        if let Some(cache_dir) = &self.config.cache_dir {
            hasher.write(cache_dir.to_string_lossy().as_bytes());
        }

        format!("v1:{:x}", hasher.finish())
    }

    fn loaded_model(&self) -> Result<Arc<Mutex<TextEmbedding>>> {
        self.model.as_ref().map(Arc::clone).ok_or_else(|| {
            EmbedError::invalid_config("Model not initialized. Call initialize() first.")
        })
    }

    /// Validate that the model is working correctly
    async fn validate_model(&self) -> Result<()> {
        let result = self.embed_texts(&["validation test".to_string()]).await?;

        let embedding = result.embeddings.first().ok_or_else(|| {
            EmbedError::invalid_config("Model validation failed: no embeddings generated")
        })?;

        if embedding.len() != self.dimension {
            return Err(EmbedError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        if embedding.iter().any(|value| !value.is_finite()) {
            return Err(EmbedError::invalid_config(
                "Model validation failed: non-finite values in embedding",
            ));
        }

        tracing::debug!("Model validation passed for: {}", self.config.model);
        Ok(())
    }

    /// Returns the number of cached models.
    pub fn cache_size() -> usize {
        model_cache().len()
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
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

        let model = self.loaded_model()?;
        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            let chunk = chunk.to_vec();
            let model_clone = Arc::clone(&model);

            let batch_embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                tracing::debug!("Processing batch of {} texts", chunk.len());

                let mut model_guard = model_clone
                    .lock()
                    .map_err(|_| EmbedError::invalid_config("embedding model lock poisoned"))?;
                model_guard
                    .embed(chunk, None)
                    .map_err(|e| EmbedError::External { source: e })
            })
            .await??;

            all_embeddings.extend(to_f16_vectors(batch_embeddings, self.config.normalize));
        }

        if all_embeddings.len() != texts.len() {
            return Err(EmbedError::CountMismatch {
                expected: texts.len(),
                actual: all_embeddings.len(),
            });
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
