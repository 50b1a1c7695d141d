//! Prompt templates with `{context}` and `{question}` placeholders.

use crate::error::{QaError, Result};
use crate::index::ScoredPassage;

pub const CONTEXT_PLACEHOLDER: &str = "{context}";
pub const QUESTION_PLACEHOLDER: &str = "{question}";

pub const DEFAULT_TEMPLATE: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.

{context}

Question: {question}
Helpful Answer:";

/// A validated prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

impl PromptTemplate {
    pub fn new<S: Into<String>>(template: S) -> Result<Self> {
        let template = template.into();
        for placeholder in [CONTEXT_PLACEHOLDER, QUESTION_PLACEHOLDER] {
            if !template.contains(placeholder) {
                return Err(QaError::invalid_config(format!(
                    "prompt template must contain {placeholder}"
                )));
            }
        }
        Ok(Self { template })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Fill the template. Passages appear in rank order, separated by blank lines.
    ///
    /// Substitution is a single pass over the template, so placeholder text
    /// inside the question or the passages is left alone.
    pub fn render(&self, question: &str, passages: &[ScoredPassage]) -> String {
        let context = passages
            .iter()
            .map(|hit| hit.passage.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut rendered = String::with_capacity(self.template.len() + context.len() + question.len());
        let mut rest = self.template.as_str();
        loop {
            let next = [(CONTEXT_PLACEHOLDER, context.as_str()), (QUESTION_PLACEHOLDER, question)]
                .into_iter()
                .filter_map(|(placeholder, value)| {
                    rest.find(placeholder).map(|at| (at, placeholder, value))
                })
                .min_by_key(|(at, _, _)| *at);

            match next {
                Some((at, placeholder, value)) => {
                    rendered.push_str(&rest[..at]);
                    rendered.push_str(value);
                    rest = &rest[at + placeholder.len()..];
                }
                None => {
                    rendered.push_str(rest);
                    break;
                }
            }
        }
        rendered
    }
}
