//! Language model client used to turn a grounded prompt into an answer.

use crate::config::GenerationConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Errors reported by a [`Generator`].
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("Invalid generator configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Generation request failed: {source}")]
    Request {
        #[from]
        source: reqwest::Error,
    },

    #[error("Generation API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Generation response contained no answer")]
    EmptyResponse,
}

/// Produces text from a prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError>;

    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Generator backed by an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiGenerator {
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    api_base: String,
    api_key: String,
    client: Client,
}

impl std::fmt::Debug for OpenAiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGenerator")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig, api_key: impl Into<String>) -> Result<Self, GenerateError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GenerateError::InvalidConfig {
                message: "API key must not be empty".to_string(),
            });
        }

        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_base: config.api_base.clone(),
            api_key,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    fn request<'a>(&'a self, prompt: &str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

fn first_answer(response: ChatResponse) -> Result<String, GenerateError> {
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(GenerateError::EmptyResponse)
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&self.request(prompt))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(GenerateError::Api { status, message });
        }

        let parsed: ChatResponse = response.json().await?;
        first_answer(parsed)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
