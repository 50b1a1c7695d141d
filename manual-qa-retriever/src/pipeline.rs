//! Startup: load the persisted index or build it from the document, then
//! hand out an [`Answerer`].
//!
//! ```text
//! exists? ── yes ──> staleness check ──> IndexStore::load ──┐
//!    │                                                       ├──> Arc<Index> ──> Answerer
//!    └── no ──> extract ──> split ──> embed ──> save ───────┘
//! ```
//!
//! Nothing is answered until this completes. A corrupt index is reported,
//! never silently rebuilt.

use crate::answer::generator::{Generator, OpenAiGenerator};
use crate::answer::{Answer, Answerer};
use crate::config::{QaConfig, Secrets, StalenessPolicy};
use crate::error::{QaError, Result};
use crate::extract::TextExtractor;
use crate::index::{Index, IndexBuilder};
use crate::store::{IndexStore, IndexSummary};
use manual_qa_context::{PassageSplitter, SplitError};
use manual_qa_embed::{EmbedError, EmbeddingProvider, ProviderKind};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// How the index in memory was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOrigin {
    Built,
    Loaded,
}

impl std::fmt::Display for IndexOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexOrigin::Built => write!(f, "built"),
            IndexOrigin::Loaded => write!(f, "loaded"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedIndex {
    pub index: Arc<Index>,
    pub origin: IndexOrigin,
}

/// Load the index when one exists, otherwise build and persist it.
pub async fn build_or_load(
    config: &QaConfig,
    extractor: &dyn TextExtractor,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<LoadedIndex> {
    prepare_index(config, extractor, embedder, false).await
}

/// Like [`build_or_load`], but `force_rebuild` ignores any stored index.
pub async fn prepare_index(
    config: &QaConfig,
    extractor: &dyn TextExtractor,
    embedder: Arc<dyn EmbeddingProvider>,
    force_rebuild: bool,
) -> Result<LoadedIndex> {
    let store = IndexStore::new(&config.index_location);

    if force_rebuild {
        tracing::info!("Rebuild requested, ignoring any stored index");
    } else if store.exists() {
        if needs_rebuild(config, &store).await? {
            tracing::info!("Stored index is stale, rebuilding");
        } else {
            tracing::info!("Loading index from {}", store.location().display());
            let index = store.load(embedder.as_ref()).await?;
            return Ok(LoadedIndex {
                index: Arc::new(index),
                origin: IndexOrigin::Loaded,
            });
        }
    } else {
        tracing::info!(
            "No index at {}, building from {}",
            store.location().display(),
            config.document_path.display()
        );
    }

    let index = build_index(config, extractor, embedder).await?;
    store.save(&index).await?;
    Ok(LoadedIndex {
        index: Arc::new(index),
        origin: IndexOrigin::Built,
    })
}

/// Extract, split, and embed the configured document. Does not persist.
pub async fn build_index(
    config: &QaConfig,
    extractor: &dyn TextExtractor,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<Index> {
    let started = Instant::now();
    let document = config.document();

    let text = extractor.extract(&document).await?;
    let fingerprint = document.fingerprint().await?;

    let splitter = PassageSplitter::new(config.chunk_size, config.chunk_overlap)?;
    let passages = splitter.split(&text).map_err(|e| match e {
        SplitError::EmptyText => {
            QaError::extraction(&config.document_path, "document produced no text to split")
        }
        other => other.into(),
    })?;
    tracing::info!(
        "Split {} characters into {} passages (size {}, overlap {})",
        text.chars().count(),
        passages.len(),
        splitter.chunk_size(),
        splitter.chunk_overlap()
    );

    let index = IndexBuilder::new(embedder)
        .with_metric(config.metric)
        .with_batch_size(config.embedding.batch_size)
        .with_timeout(config.embedding.timeout())
        .with_chunking(config.chunk_size, config.chunk_overlap)
        .with_fingerprint(fingerprint)
        .build(passages)
        .await?;

    tracing::info!("Index ready in {:.2?}", started.elapsed());
    Ok(index)
}

/// Compare the stored provenance with the current document and settings.
///
/// Returns `None` when the document cannot be fingerprinted, for instance
/// because only the index was shipped.
async fn is_stale(config: &QaConfig, summary: &IndexSummary) -> Option<bool> {
    let provenance = &summary.provenance;
    if provenance.chunk_size != config.chunk_size || provenance.chunk_overlap != config.chunk_overlap {
        return Some(true);
    }

    match config.document().fingerprint().await {
        Ok(current) => Some(provenance.fingerprint.as_deref() != Some(current.as_str())),
        Err(e) => {
            tracing::debug!("Cannot fingerprint document: {e}");
            None
        }
    }
}

async fn needs_rebuild(config: &QaConfig, store: &IndexStore) -> Result<bool> {
    if config.staleness == StalenessPolicy::Ignore {
        return Ok(false);
    }

    let Some(summary) = store.describe().await? else {
        return Ok(true);
    };

    match (is_stale(config, &summary).await, config.staleness) {
        (Some(true), StalenessPolicy::Rebuild) => Ok(true),
        (Some(true), _) => {
            tracing::warn!(
                "Index at {} was built from a different document or chunking; \
                 run `manual-qa index --rebuild` to refresh it",
                store.location().display()
            );
            Ok(false)
        }
        (None, _) => {
            tracing::warn!(
                "Cannot check whether {} is current; using it as is",
                store.location().display()
            );
            Ok(false)
        }
        (Some(false), _) => Ok(false),
    }
}

/// Create the embedder and generator selected by the configuration.
pub async fn connect(
    config: &QaConfig,
    secrets: &Secrets,
) -> Result<(Arc<dyn EmbeddingProvider>, Arc<dyn Generator>)> {
    let embedder = connect_embedder(config, secrets).await?;
    let generator = OpenAiGenerator::new(&config.generation, secrets.require_openai_key()?)
        .map_err(|e| QaError::invalid_config(e.to_string()))?;
    Ok((embedder, Arc::new(generator)))
}

/// Create only the embedder, for commands that never generate.
pub async fn connect_embedder(
    config: &QaConfig,
    secrets: &Secrets,
) -> Result<Arc<dyn EmbeddingProvider>> {
    if config.embedding.provider == ProviderKind::OpenAi {
        secrets.require_openai_key()?;
    }
    manual_qa_embed::create_provider(&config.embedding, secrets.openai_api_key.as_deref())
        .await
        .map_err(|e| match e {
            EmbedError::InvalidConfig { message } => QaError::invalid_config(message),
            other => QaError::embedding(other),
        })
}

/// A ready-to-query system: the index is in memory and the answerer is wired up.
#[derive(Debug, Clone)]
pub struct QaSystem {
    answerer: Answerer,
    origin: IndexOrigin,
    index_location: PathBuf,
}

impl QaSystem {
    /// Run the one-shot startup sequence.
    pub async fn initialize(
        config: &QaConfig,
        extractor: &dyn TextExtractor,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
        force_rebuild: bool,
    ) -> Result<Self> {
        config.validate()?;
        let loaded = prepare_index(config, extractor, embedder.clone(), force_rebuild).await?;

        let answerer = Answerer::create(loaded.index, embedder, generator, config.top_k)?
            .with_prompt_template(config.generation.prompt()?)
            .with_timeouts(config.embedding.timeout(), config.generation.timeout());

        tracing::info!(
            "Ready: {} passages ({}), top_k {}",
            answerer.index().len(),
            loaded.origin,
            config.top_k
        );

        Ok(Self {
            answerer,
            origin: loaded.origin,
            index_location: config.index_location.clone(),
        })
    }

    pub fn answerer(&self) -> &Answerer {
        &self.answerer
    }

    pub fn origin(&self) -> IndexOrigin {
        self.origin
    }

    pub fn index_location(&self) -> &std::path::Path {
        &self.index_location
    }

    pub async fn answer(&self, question: &str) -> Result<Answer> {
        self.answerer.answer(question).await
    }
}

/// What `status` reports about the configured index.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub index_location: PathBuf,
    pub index_present: bool,
    pub summary: Option<IndexSummary>,
    /// Why the stored index could not be described, if it could not
    pub problem: Option<String>,
    pub document_path: PathBuf,
    /// `None` when the document or index could not be compared
    pub up_to_date: Option<bool>,
    pub staleness: StalenessPolicy,
}

/// Inspect the configured index without loading embeddings or calling any model.
pub async fn status(config: &QaConfig) -> StatusReport {
    let store = IndexStore::new(&config.index_location);
    let (summary, problem) = match store.describe().await {
        Ok(summary) => (summary, None),
        Err(e) => (None, Some(e.to_string())),
    };

    let up_to_date = match &summary {
        Some(summary) => is_stale(config, summary).await.map(|stale| !stale),
        None => None,
    };

    StatusReport {
        index_location: config.index_location.clone(),
        index_present: store.exists(),
        summary,
        problem,
        document_path: config.document_path.clone(),
        up_to_date,
        staleness: config.staleness,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{DocumentSource, PageRange, PlainTextExtractor};
    use crate::index::SimilarityMetric;
    use crate::index::tests::sample_index;
    use tempfile::tempdir;
    use tracing_test::traced_test;

    /// A stored index without a matching fingerprint is kept under `warn`
    /// and replaced under `rebuild`.
    #[traced_test]
    #[tokio::test]
    async fn test_stale_index_warns_and_loads() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let document_path = dir.path().join("manual.txt");
        tokio::fs::write(&document_path, "brake fluid").await?;
        let config = QaConfig {
            document_path,
            index_location: dir.path().join("manual.index.db"),
            page_range: PageRange::new(0, 1),
            ..QaConfig::default()
        };

        let store = IndexStore::new(&config.index_location);
        store.save(&sample_index(SimilarityMetric::Cosine)).await?;

        assert!(!needs_rebuild(&config, &store).await?);
        assert!(logs_contain("was built from a different document"));

        let rebuild = QaConfig {
            staleness: StalenessPolicy::Rebuild,
            ..config.clone()
        };
        assert!(needs_rebuild(&rebuild, &store).await?);

        let ignore = QaConfig {
            staleness: StalenessPolicy::Ignore,
            ..config
        };
        assert!(!needs_rebuild(&ignore, &store).await?);
        Ok(())
    }

    #[traced_test]
    #[tokio::test]
    async fn test_missing_document_only_warns() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let config = QaConfig {
            document_path: dir.path().join("shipped-without-document.pdf"),
            index_location: dir.path().join("manual.index.db"),
            staleness: StalenessPolicy::Rebuild,
            ..QaConfig::default()
        };
        let store = IndexStore::new(&config.index_location);
        store.save(&sample_index(SimilarityMetric::Cosine)).await?;

        assert!(!needs_rebuild(&config, &store).await?);
        assert!(logs_contain("Cannot check whether"));
        Ok(())
    }

    #[tokio::test]
    async fn test_status_without_index() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let config = QaConfig {
            document_path: dir.path().join("manual.txt"),
            index_location: dir.path().join("manual.index.db"),
            page_range: PageRange::new(0, 1),
            ..QaConfig::default()
        };

        let report = status(&config).await;
        assert!(!report.index_present);
        assert!(report.summary.is_none());
        assert!(report.problem.is_none());
        assert_eq!(report.up_to_date, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_status_reports_corrupt_index() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let index_location = dir.path().join("manual.index.db");
        tokio::fs::write(&index_location, b"garbage").await?;
        let config = QaConfig {
            index_location,
            ..QaConfig::default()
        };

        let report = status(&config).await;
        assert!(report.index_present);
        assert!(report.problem.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_build_index_rejects_missing_document() {
        let config = QaConfig {
            document_path: PathBuf::from("/nonexistent/manual.txt"),
            page_range: PageRange::new(0, 1),
            ..QaConfig::default()
        };
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
            manual_qa_embed::OpenAiEmbeddingProvider::new(config.embedding.clone(), "sk-test")
                .expect("provider"),
        );

        let result = build_index(&config, &PlainTextExtractor, embedder).await;
        assert!(matches!(result, Err(QaError::ExtractionFailure { .. })));
    }

    /// Reads nothing, whatever the document holds.
    struct BlankExtractor;

    #[async_trait::async_trait]
    impl TextExtractor for BlankExtractor {
        async fn extract(&self, _source: &DocumentSource) -> Result<String> {
            Ok(String::new())
        }

        fn name(&self) -> &str {
            "blank"
        }
    }

    #[tokio::test]
    async fn test_build_index_rejects_blank_document() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let document_path = dir.path().join("manual.txt");
        tokio::fs::write(&document_path, "").await?;
        let config = QaConfig {
            document_path: document_path.clone(),
            page_range: PageRange::new(0, 1),
            ..QaConfig::default()
        };
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
            manual_qa_embed::OpenAiEmbeddingProvider::new(config.embedding.clone(), "sk-test")?,
        );

        let result = build_index(&config, &BlankExtractor, embedder).await;
        match result {
            Err(QaError::ExtractionFailure { path, .. }) => assert_eq!(path, document_path),
            other => panic!("expected an extraction failure, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_connect_requires_key_for_openai() {
        let result = connect(&QaConfig::default(), &Secrets::default()).await;
        assert!(matches!(result, Err(QaError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_origin_display() {
        assert_eq!(IndexOrigin::Built.to_string(), "built");
        assert_eq!(
            serde_json::to_string(&IndexOrigin::Loaded).unwrap(),
            "\"loaded\""
        );
    }
}
