//! Configuration loaded once at startup from a TOML file.
//!
//! ```toml
//! document_path = "data/aqua_202005.pdf"
//! page_range = [390, 469]
//! index_location = "data/manual.index.db"
//! chunk_size = 1000
//! chunk_overlap = 200
//! top_k = 4
//! staleness = "warn"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dimension = 1536
//!
//! [generation]
//! model = "gpt-4o-mini"
//! ```
//!
//! Relative paths are resolved against the directory holding the config
//! file. Secrets never live in the file: the API key is read from
//! `OPENAI_API_KEY`, with a `.env` file honoured when present.

use crate::answer::prompt::PromptTemplate;
use crate::error::{QaError, Result};
use crate::extract::{DocumentSource, PageRange};
use crate::index::SimilarityMetric;
use manual_qa_embed::{DEFAULT_API_BASE, EmbedConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "manual-qa.toml";

/// Environment variable holding the API key for hosted models.
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

/// What to do when a stored index was built from a different document version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StalenessPolicy {
    /// Use the stored index without checking.
    Ignore,
    /// Use the stored index but log a warning.
    #[default]
    Warn,
    /// Rebuild the index from the document.
    Rebuild,
}

/// Settings for the language model that writes answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
    pub api_base: String,
    /// Custom template; must contain `{context}` and `{question}`.
    pub prompt_template: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: None,
            timeout_secs: 120,
            api_base: DEFAULT_API_BASE.to_string(),
            prompt_template: None,
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn prompt(&self) -> Result<PromptTemplate> {
        match &self.prompt_template {
            Some(template) => PromptTemplate::new(template.as_str()),
            None => Ok(PromptTemplate::default()),
        }
    }
}

/// Complete configuration for the question answerer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    pub document_path: PathBuf,
    /// Pages `[start, end)`, 0-based
    pub page_range: PageRange,
    pub index_location: PathBuf,
    /// Maximum passage length in characters
    pub chunk_size: usize,
    /// Characters shared by consecutive passages
    pub chunk_overlap: usize,
    /// Passages retrieved per question
    pub top_k: usize,
    pub metric: SimilarityMetric,
    pub staleness: StalenessPolicy,
    pub embedding: EmbedConfig,
    pub generation: GenerationConfig,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            document_path: PathBuf::from("data/aqua_202005.pdf"),
            page_range: PageRange::new(390, 469),
            index_location: PathBuf::from("data/manual.index.db"),
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 4,
            metric: SimilarityMetric::Cosine,
            staleness: StalenessPolicy::Warn,
            embedding: EmbedConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl QaConfig {
    /// Parse a TOML document. Relative paths are kept as written.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| QaError::invalid_config(format!("invalid TOML: {e}")))
    }

    /// Read, parse, and validate a config file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            QaError::invalid_config(format!("cannot read {}: {e}", path.display()))
        })?;

        let mut config = Self::from_toml_str(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        config.validate()?;

        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Make relative document, index, and model cache paths relative to `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() && !path.as_os_str().is_empty() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.document_path);
        resolve(&mut self.index_location);
        if let Some(cache_dir) = self.embedding.cache_dir.as_mut() {
            resolve(cache_dir);
        }
    }

    pub fn document(&self) -> DocumentSource {
        DocumentSource::new(&self.document_path, self.page_range)
    }

    /// Check every constraint that can be checked without touching the network.
    pub fn validate(&self) -> Result<()> {
        if self.document_path.as_os_str().is_empty() {
            return Err(QaError::invalid_config("document_path must not be empty"));
        }
        if self.index_location.as_os_str().is_empty() {
            return Err(QaError::invalid_config("index_location must not be empty"));
        }
        self.page_range.validate()?;

        if self.chunk_size == 0 {
            return Err(QaError::invalid_config("chunk_size must be at least 1"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(QaError::invalid_config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(QaError::invalid_config("top_k must be at least 1"));
        }

        self.embedding
            .validate()
            .map_err(|e| QaError::invalid_config(format!("[embedding] {e}")))?;

        if self.generation.model.trim().is_empty() {
            return Err(QaError::invalid_config("[generation] model must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(QaError::invalid_config(format!(
                "[generation] temperature must be between 0 and 2, got {}",
                self.generation.temperature
            )));
        }
        if self.generation.timeout_secs == 0 {
            return Err(QaError::invalid_config("[generation] timeout_secs must be at least 1"));
        }
        self.generation.prompt()?;

        Ok(())
    }
}

/// Credentials read from the environment.
#[derive(Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl Secrets {
    /// Read secrets from the process environment after loading `.env`, if any.
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }
        Self {
            openai_api_key: std::env::var(API_KEY_VAR)
                .ok()
                .filter(|key| !key.trim().is_empty()),
        }
    }

    pub fn require_openai_key(&self) -> Result<&str> {
        self.openai_api_key.as_deref().ok_or_else(|| {
            QaError::invalid_config(format!("{API_KEY_VAR} is not set in the environment"))
        })
    }
}
