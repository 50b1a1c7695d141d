//! Retrieval-augmented answering: embed the question, retrieve passages,
//! prompt the generator.

pub mod generator;
pub mod prompt;

use crate::error::{QaError, Result};
use crate::index::{Index, ScoredPassage};
use generator::Generator;
use manual_qa_embed::EmbeddingProvider;
use prompt::PromptTemplate;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub use generator::{GenerateError, OpenAiGenerator};

/// A generated answer and the passages it was grounded on, in rank order.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<ScoredPassage>,
}

/// Answers questions against a loaded index.
///
/// Cloning is cheap and clones share the index, so one answerer can serve
/// many concurrent requests.
#[derive(Clone)]
pub struct Answerer {
    index: Arc<Index>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn Generator>,
    top_k: usize,
    template: PromptTemplate,
    embed_timeout: Duration,
    generate_timeout: Duration,
}

impl std::fmt::Debug for Answerer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Answerer")
            .field("passages", &self.index.len())
            .field("embedder", &self.embedder.model_name())
            .field("generator", &self.generator.model_name())
            .field("top_k", &self.top_k)
            .finish()
    }
}

impl Answerer {
    /// `embedder` must be the capability the index was built with.
    pub fn create(
        index: Arc<Index>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
        top_k: usize,
    ) -> Result<Self> {
        if top_k == 0 {
            return Err(QaError::invalid_config("top_k must be at least 1"));
        }
        if embedder.embedding_dimension() != index.dimension() {
            return Err(QaError::invalid_config(format!(
                "embedder dimension {} does not match index dimension {}",
                embedder.embedding_dimension(),
                index.dimension()
            )));
        }

        Ok(Self {
            index,
            embedder,
            generator,
            top_k,
            template: PromptTemplate::default(),
            embed_timeout: Duration::from_secs(60),
            generate_timeout: Duration::from_secs(120),
        })
    }

    pub fn with_prompt_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_timeouts(mut self, embed: Duration, generate: Duration) -> Self {
        self.embed_timeout = embed;
        self.generate_timeout = generate;
        self
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn index(&self) -> &Arc<Index> {
        &self.index
    }

    /// The `top_k` passages most similar to `question`, without generating.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredPassage>> {
        let question = validate_question(question)?;

        let query = tokio::time::timeout(self.embed_timeout, self.embedder.embed_text(question))
            .await
            .map_err(|_| QaError::embedding_timeout(self.embed_timeout))?
            .map_err(QaError::embedding)?;

        self.index.search(&query, self.top_k)
    }

    /// Answer `question` using the retrieved passages as grounding context.
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let sources = self.retrieve(question).await?;
        let prompt = self.template.render(question.trim(), &sources);
        tracing::debug!(
            "Prompting {} with {} passages ({} chars)",
            self.generator.model_name(),
            sources.len(),
            prompt.chars().count()
        );

        let text = tokio::time::timeout(self.generate_timeout, self.generator.generate(&prompt))
            .await
            .map_err(|_| QaError::generation_timeout(self.generate_timeout))?
            .map_err(QaError::generation)?;

        Ok(Answer { text, sources })
    }
}

fn validate_question(question: &str) -> Result<&str> {
    let trimmed = question.trim();
    if trimmed.is_empty() {
        return Err(QaError::invalid_input("question must not be empty"));
    }
    Ok(trimmed)
}
