//! The in-memory semantic index: passages paired with their embeddings.
//!
//! An [`Index`] is immutable once built or loaded. Callers share it through
//! an `Arc` and search it concurrently without locking.
//!
//! Similarity is computed in f32 from the stored f16 vectors. Results are
//! ordered by descending score; equal scores are ordered by ascending passage
//! sequence so that retrieval is fully deterministic.

pub mod builder;

use crate::error::{QaError, Result};
use chrono::{DateTime, Utc};
use half::f16;
use manual_qa_context::Passage;
use serde::{Deserialize, Serialize};

pub use builder::IndexBuilder;

/// How query and passage vectors are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMetric {
    /// Cosine similarity; insensitive to vector length.
    #[default]
    Cosine,
    /// Raw inner product; equal to cosine for normalized vectors.
    Dot,
}

impl SimilarityMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMetric::Cosine => "cosine",
            SimilarityMetric::Dot => "dot",
        }
    }

    /// Score two vectors of equal length.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        match self {
            SimilarityMetric::Dot => dot,
            SimilarityMetric::Cosine => {
                let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    0.0
                } else {
                    dot / (norm_a * norm_b)
                }
            }
        }
    }
}

impl std::fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SimilarityMetric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(SimilarityMetric::Cosine),
            "dot" => Ok(SimilarityMetric::Dot),
            _ => Err(format!("Invalid similarity metric: {s}")),
        }
    }
}

/// Where an index came from, recorded so a loaded index can be checked
/// against the current configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexProvenance {
    /// Embedding provider name, e.g. `openai`
    pub provider: String,
    /// Embedding model name
    pub model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// blake3 digest of the document bytes and page range, when known
    pub fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One passage together with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub passage: Passage,
    pub embedding: Vec<f16>,
}

/// A retrieved passage and its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    pub score: f32,
}

/// Searchable mapping from embeddings to passages.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    dimension: usize,
    metric: SimilarityMetric,
    entries: Vec<IndexEntry>,
    provenance: IndexProvenance,
}

impl Index {
    /// Assemble an index, checking its structural invariants.
    ///
    /// Entries must be non-empty, ordered by sequence starting at 0 with no
    /// gaps, and every embedding must have `dimension` finite components.
    pub fn new(
        dimension: usize,
        metric: SimilarityMetric,
        entries: Vec<IndexEntry>,
        provenance: IndexProvenance,
    ) -> Result<Self> {
        if dimension == 0 {
            return Err(QaError::invalid_config("index dimension must be at least 1"));
        }
        if entries.is_empty() {
            return Err(QaError::invalid_config("an index needs at least one passage"));
        }
        for (position, entry) in entries.iter().enumerate() {
            if entry.passage.sequence != position {
                return Err(QaError::invalid_config(format!(
                    "passage at position {position} has sequence {}",
                    entry.passage.sequence
                )));
            }
            if entry.embedding.len() != dimension {
                return Err(QaError::invalid_config(format!(
                    "passage {position} has an embedding of dimension {}, expected {dimension}",
                    entry.embedding.len()
                )));
            }
            if entry.embedding.iter().any(|v| !v.is_finite()) {
                return Err(QaError::invalid_config(format!(
                    "passage {position} has a non-finite embedding component"
                )));
            }
        }

        Ok(Self {
            dimension,
            metric,
            entries,
            provenance,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> SimilarityMetric {
        self.metric
    }

    pub fn provenance(&self) -> &IndexProvenance {
        &self.provenance
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn passages(&self) -> impl Iterator<Item = &Passage> {
        self.entries.iter().map(|entry| &entry.passage)
    }

    /// Return the `top_k` passages most similar to `query`.
    ///
    /// `top_k` larger than the index is clamped to the index size.
    pub fn search(&self, query: &[f16], top_k: usize) -> Result<Vec<ScoredPassage>> {
        if query.len() != self.dimension {
            return Err(QaError::EmbeddingFailure {
                message: format!(
                    "query embedding has dimension {}, index has {}",
                    query.len(),
                    self.dimension
                ),
                source: None,
            });
        }

        let query: Vec<f32> = query.iter().map(|v| v.to_f32()).collect();
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| {
                let candidate: Vec<f32> = entry.embedding.iter().map(|v| v.to_f32()).collect();
                (position, self.metric.score(&query, &candidate))
            })
            .collect();

        // NaN ranks below every real score
        let rank = |score: f32| if score.is_nan() { f32::NEG_INFINITY } else { score };
        scored.sort_by(|(pos_a, score_a), (pos_b, score_b)| {
            rank(*score_b)
                .total_cmp(&rank(*score_a))
                .then(pos_a.cmp(pos_b))
        });

        let results: Vec<ScoredPassage> = scored
            .into_iter()
            .take(top_k.min(self.entries.len()))
            .map(|(position, score)| ScoredPassage {
                passage: self.entries[position].passage.clone(),
                score,
            })
            .collect();

        for hit in &results {
            tracing::debug!("Retrieved passage {} (score {:.4})", hit.passage.sequence, hit.score);
        }
        Ok(results)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn passage(sequence: usize, text: &str) -> Passage {
        let start = sequence * 100;
        Passage {
            sequence,
            text: text.to_string(),
            start_char: start,
            end_char: start + text.chars().count(),
            overlap_chars: 0,
        }
    }

    pub(crate) fn vector(values: &[f32]) -> Vec<f16> {
        values.iter().copied().map(f16::from_f32).collect()
    }

    pub(crate) fn provenance() -> IndexProvenance {
        IndexProvenance {
            provider: "fake".to_string(),
            model: "fake-model".to_string(),
            chunk_size: 1000,
            chunk_overlap: 200,
            fingerprint: None,
            created_at: Utc::now(),
        }
    }

    pub(crate) fn sample_index(metric: SimilarityMetric) -> Index {
        let entries = vec![
            IndexEntry {
                passage: passage(0, "engine oil"),
                embedding: vector(&[1.0, 0.0, 0.0]),
            },
            IndexEntry {
                passage: passage(1, "brake fluid"),
                embedding: vector(&[0.0, 1.0, 0.0]),
            },
            IndexEntry {
                passage: passage(2, "brake pads"),
                embedding: vector(&[0.0, 0.6, 0.8]),
            },
        ];
        Index::new(3, metric, entries, provenance()).unwrap()
    }

    #[test]
    fn test_search_orders_by_score() {
        let index = sample_index(SimilarityMetric::Cosine);
        let results = index.search(&vector(&[0.0, 1.0, 0.0]), 2).unwrap();

        let sequences: Vec<usize> = results.iter().map(|r| r.passage.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
        assert!((results[0].score - 1.0).abs() < 1e-3);
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_ties_prefer_lower_sequence() {
        let entries = (0..4)
            .map(|i| IndexEntry {
                passage: passage(i, "same"),
                embedding: vector(&[1.0, 0.0]),
            })
            .collect();
        let index = Index::new(2, SimilarityMetric::Dot, entries, provenance()).unwrap();

        let results = index.search(&vector(&[1.0, 0.0]), 3).unwrap();
        let sequences: Vec<usize> = results.iter().map(|r| r.passage.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_non_finite_embeddings_rejected() {
        let entries = vec![
            IndexEntry {
                passage: passage(0, "engine oil"),
                embedding: vector(&[1.0, 0.0]),
            },
            IndexEntry {
                passage: passage(1, "brake fluid"),
                embedding: vector(&[f32::INFINITY, 1.0]),
            },
        ];
        let result = Index::new(2, SimilarityMetric::Dot, entries, provenance());
        assert!(matches!(result, Err(QaError::InvalidConfiguration { .. })));
    }

    #[test]
    fn test_nan_scores_rank_last() {
        let entries = (0..6)
            .map(|i| IndexEntry {
                passage: passage(i, "alternating"),
                embedding: if i % 2 == 0 {
                    vector(&[0.0, 1.0])
                } else {
                    vector(&[1.0, 0.0])
                },
            })
            .collect();
        let index = Index::new(2, SimilarityMetric::Dot, entries, provenance()).unwrap();

        // inf * 0 is NaN for the even passages, inf for the odd ones.
        let results = index.search(&vector(&[f32::INFINITY, 0.0]), 6).unwrap();
        let sequences: Vec<usize> = results.iter().map(|r| r.passage.sequence).collect();
        assert_eq!(sequences, vec![1, 3, 5, 0, 2, 4]);
        assert!(results[..3].iter().all(|hit| hit.score == f32::INFINITY));
        assert!(results[3..].iter().all(|hit| hit.score.is_nan()));
    }

    #[test]
    fn test_top_k_is_clamped() {
        let index = sample_index(SimilarityMetric::Cosine);
        let results = index.search(&vector(&[1.0, 0.0, 0.0]), 50).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_query_dimension_checked() {
        let index = sample_index(SimilarityMetric::Cosine);
        let result = index.search(&vector(&[1.0, 0.0]), 1);
        assert!(matches!(result, Err(QaError::EmbeddingFailure { .. })));
    }

    #[test]
    fn test_metrics() {
        let a = [3.0, 4.0];
        let b = [3.0, 4.0];
        assert!((SimilarityMetric::Cosine.score(&a, &b) - 1.0).abs() < 1e-6);
        assert!((SimilarityMetric::Dot.score(&a, &b) - 25.0).abs() < 1e-6);
        assert_eq!(SimilarityMetric::Cosine.score(&[0.0, 0.0], &b), 0.0);
        assert_eq!("DOT".parse::<SimilarityMetric>(), Ok(SimilarityMetric::Dot));
        assert!("euclid".parse::<SimilarityMetric>().is_err());
    }

    #[test]
    fn test_new_rejects_broken_invariants() {
        let gap = vec![IndexEntry {
            passage: passage(1, "starts at one"),
            embedding: vector(&[1.0]),
        }];
        assert!(Index::new(1, SimilarityMetric::Cosine, gap, provenance()).is_err());

        let wrong_dim = vec![IndexEntry {
            passage: passage(0, "short vector"),
            embedding: vector(&[1.0]),
        }];
        assert!(Index::new(2, SimilarityMetric::Cosine, wrong_dim, provenance()).is_err());

        assert!(Index::new(2, SimilarityMetric::Cosine, vec![], provenance()).is_err());
    }
}
