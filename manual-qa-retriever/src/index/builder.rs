//! Embedding passages and assembling them into an [`Index`].

use super::{Index, IndexEntry, IndexProvenance, SimilarityMetric};
use crate::error::{QaError, Result};
use chrono::Utc;
use manual_qa_context::Passage;
use manual_qa_embed::EmbeddingProvider;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Builds an index from passages using an embedding provider.
///
/// The build is all-or-nothing: if any batch fails, times out, or returns
/// vectors of the wrong shape, no index is returned.
pub struct IndexBuilder {
    embedder: Arc<dyn EmbeddingProvider>,
    metric: SimilarityMetric,
    batch_size: usize,
    timeout: Duration,
    chunk_size: usize,
    chunk_overlap: usize,
    fingerprint: Option<String>,
}

impl IndexBuilder {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            metric: SimilarityMetric::default(),
            batch_size: 32,
            timeout: Duration::from_secs(60),
            chunk_size: 0,
            chunk_overlap: 0,
            fingerprint: None,
        }
    }

    pub fn with_metric(mut self, metric: SimilarityMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Number of passages sent to the embedder per call
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Upper bound on each embedder call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Record the chunking settings the passages were produced with
    pub fn with_chunking(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Embed every passage and return the finished index.
    pub async fn build(&self, passages: Vec<Passage>) -> Result<Index> {
        if passages.is_empty() {
            return Err(QaError::invalid_config(
                "cannot build an index from zero passages",
            ));
        }

        let dimension = self.embedder.embedding_dimension();
        let total_batches = passages.len().div_ceil(self.batch_size);
        let started = Instant::now();
        tracing::info!(
            "Embedding {} passages in {} batches with {}/{}",
            passages.len(),
            total_batches,
            self.embedder.provider_name(),
            self.embedder.model_name()
        );

        let mut embeddings = Vec::with_capacity(passages.len());
        for (batch_number, batch) in passages.chunks(self.batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            tracing::debug!(
                "Embedding batch {}/{} ({} passages)",
                batch_number + 1,
                total_batches,
                texts.len()
            );

            let result = tokio::time::timeout(self.timeout, self.embedder.embed_texts(&texts))
                .await
                .map_err(|_| QaError::embedding_timeout(self.timeout))?
                .map_err(QaError::embedding)?;

            if result.len() != texts.len() {
                return Err(QaError::EmbeddingFailure {
                    message: format!(
                        "embedder returned {} vectors for {} passages",
                        result.len(),
                        texts.len()
                    ),
                    source: None,
                });
            }
            if let Some(bad) = result.embeddings.iter().find(|e| e.len() != dimension) {
                return Err(QaError::EmbeddingFailure {
                    message: format!(
                        "embedder returned a vector of dimension {}, declared {dimension}",
                        bad.len()
                    ),
                    source: None,
                });
            }
            if result
                .embeddings
                .iter()
                .any(|e| e.iter().any(|v| !v.is_finite()))
            {
                return Err(QaError::EmbeddingFailure {
                    message: "embedder returned a vector with non-finite components".to_string(),
                    source: None,
                });
            }
            embeddings.extend(result.embeddings);
        }

        let entries = passages
            .into_iter()
            .zip(embeddings)
            .map(|(passage, embedding)| IndexEntry { passage, embedding })
            .collect();

        let provenance = IndexProvenance {
            provider: self.embedder.provider_name().to_string(),
            model: self.embedder.model_name().to_string(),
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            fingerprint: self.fingerprint.clone(),
            created_at: Utc::now(),
        };

        let index = Index::new(dimension, self.metric, entries, provenance)?;
        tracing::info!(
            "Built index of {} passages (dimension {}, {}) in {:.2?}",
            index.len(),
            dimension,
            self.metric,
            started.elapsed()
        );
        Ok(index)
    }
}
