//! Error type shared by every stage of the question-answering pipeline

use crate::answer::generator::GenerateError;
use manual_qa_embed::EmbedError;
use std::path::PathBuf;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, QaError>;

/// Errors produced while building, loading, or querying an index.
///
/// Startup errors (`InvalidConfiguration`, `ExtractionFailure`, `CorruptIndex`,
/// `PersistenceFailure`, and build-time `EmbeddingFailure`) are fatal for the
/// process. Per-question errors are returned to the caller that asked and
/// never affect the loaded index.
#[derive(Debug, thiserror::Error)]
pub enum QaError {
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Text extraction failed for {}: {message}", path.display())]
    ExtractionFailure { path: PathBuf, message: String },

    #[error("Embedding failed: {message}")]
    EmbeddingFailure {
        message: String,
        #[source]
        source: Option<EmbedError>,
    },

    #[error("Index at {} is corrupt: {message}", path.display())]
    CorruptIndex { path: PathBuf, message: String },

    #[error("Failed to persist index at {}: {source}", path.display())]
    PersistenceFailure {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Answer generation failed: {message}")]
    GenerationFailure {
        message: String,
        #[source]
        source: Option<GenerateError>,
    },
}

impl QaError {
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn extraction<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::ExtractionFailure {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn corrupt<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::CorruptIndex {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn persistence<P, E>(path: P, source: E) -> Self
    where
        P: Into<PathBuf>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::PersistenceFailure {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Wrap an error reported by the embedding provider.
    pub fn embedding(source: EmbedError) -> Self {
        Self::EmbeddingFailure {
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub fn embedding_timeout(timeout: std::time::Duration) -> Self {
        Self::EmbeddingFailure {
            message: format!("embedding call timed out after {}s", timeout.as_secs()),
            source: None,
        }
    }

    /// Wrap an error reported by the generator.
    pub fn generation(source: GenerateError) -> Self {
        Self::GenerationFailure {
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub fn generation_timeout(timeout: std::time::Duration) -> Self {
        Self::GenerationFailure {
            message: format!("generator timed out after {}s", timeout.as_secs()),
            source: None,
        }
    }

    /// Whether the caller can simply try another question.
    ///
    /// Embedding failures count as recoverable because at query time they only
    /// affect the question being asked; during startup the caller treats every
    /// error as fatal anyway.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            QaError::InvalidInput { .. }
                | QaError::GenerationFailure { .. }
                | QaError::EmbeddingFailure { .. }
        )
    }
}

impl From<manual_qa_context::SplitError> for QaError {
    fn from(err: manual_qa_context::SplitError) -> Self {
        QaError::invalid_config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_recoverable_classification() {
        assert!(QaError::invalid_input("empty question").is_recoverable());
        assert!(QaError::generation_timeout(Duration::from_secs(5)).is_recoverable());
        assert!(QaError::embedding_timeout(Duration::from_secs(5)).is_recoverable());

        assert!(!QaError::invalid_config("top_k must be at least 1").is_recoverable());
        assert!(!QaError::corrupt("/tmp/x.db", "bad blob").is_recoverable());
        assert!(!QaError::extraction("/tmp/x.pdf", "missing").is_recoverable());
    }

    #[test]
    fn test_messages_include_paths() {
        let err = QaError::corrupt("/data/manual.index.db", "unknown format version 9");
        assert_eq!(
            err.to_string(),
            "Index at /data/manual.index.db is corrupt: unknown format version 9"
        );

        let io = std::io::Error::other("disk full");
        let err = QaError::persistence("/data/manual.index.db", io);
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_embedding_error_keeps_source() {
        let err = QaError::embedding(EmbedError::DimensionMismatch {
            expected: 3,
            actual: 4,
        });
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("expected 3, got 4"));
    }

    #[test]
    fn test_split_error_conversion() {
        let err: QaError = manual_qa_context::PassageSplitter::new(10, 10)
            .unwrap_err()
            .into();
        assert!(matches!(err, QaError::InvalidConfiguration { .. }));
    }
}
