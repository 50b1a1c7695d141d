//! Error types for the embedding system

/// Result type for embedding operations.
///
/// This is a convenience type alias that uses [`EmbedError`] as the error type.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for all embedding operations.
///
/// Covers configuration mistakes, model loading problems, failed HTTP calls to
/// a hosted embedding API, and vectors that do not have the promised shape.
///
/// # Error Categories
///
/// - **Configuration Errors**: Invalid model settings or missing credentials
/// - **Initialization Errors**: Failures during model loading or setup
/// - **Runtime Errors**: Problems during actual embedding generation
/// - **Remote Errors**: Transport failures and non-success API responses
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Error when model configuration is invalid
    #[error("Invalid model configuration: {message}")]
    InvalidConfig { message: String },

    /// Error during model initialization
    #[error("Model initialization failed: {source}")]
    ModelInitialization {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Error during embedding generation
    #[error("Embedding generation failed: {source}")]
    EmbeddingGeneration {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The provider returned vectors of an unexpected size
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The provider returned a different number of vectors than texts sent
    #[error("Embedding count mismatch: sent {expected} texts, received {actual} embeddings")]
    CountMismatch { expected: usize, actual: usize },

    /// HTTP transport errors talking to a hosted provider
    #[error("Embedding request failed: {source}")]
    Request {
        #[from]
        source: reqwest::Error,
    },

    /// The hosted provider answered with a non-success status
    #[error("Embedding API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Async task join errors
    #[error("Async task failed: {source}")]
    AsyncTask {
        #[from]
        source: tokio::task::JoinError,
    },

    /// Generic errors from other libraries
    #[error("External error: {source}")]
    External {
        #[from]
        source: anyhow::Error,
    },
}

impl EmbedError {
    /// Create a model initialization error from any error type.
    pub fn model_init<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ModelInitialization {
            source: Box::new(source),
        }
    }

    /// Create an embedding generation error from any error type.
    pub fn embedding_gen<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::EmbeddingGeneration {
            source: Box::new(source),
        }
    }

    /// Create an invalid configuration error with a custom message.
    ///
    /// # Arguments
    /// * `message` - A descriptive error message explaining what's wrong with the configuration
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EmbedError::invalid_config("batch_size must be positive");
        assert_eq!(
            err.to_string(),
            "Invalid model configuration: batch_size must be positive"
        );

        let err = EmbedError::DimensionMismatch {
            expected: 384,
            actual: 768,
        };
        assert_eq!(
            err.to_string(),
            "Embedding dimension mismatch: expected 384, got 768"
        );
    }

    #[test]
    fn test_embedding_gen_keeps_source() {
        let io = std::io::Error::other("socket closed");
        let err = EmbedError::embedding_gen(io);
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("socket closed"));
    }
}
