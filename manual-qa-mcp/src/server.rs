use anyhow::Result;
use manual_qa_retriever::Answer;
use manual_qa_retriever::config::QaConfig;
use manual_qa_retriever::pipeline::{self, QaSystem, StatusReport};
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::tool::Parameters;
use rmcp::model::{ServerCapabilities, ServerInfo};
use rmcp::transport::stdio;
use rmcp::{ServerHandler, ServiceExt, schemars, tool, tool_handler, tool_router};
use serde::Deserialize;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{info, warn};

/// Characters of each source passage shown in tool output
const PREVIEW_CHARS: usize = 300;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct AskRequest {
    #[schemars(description = "Question about the vehicle, in natural language")]
    pub question: String,
    #[schemars(description = "Also list the manual passages the answer is based on")]
    pub include_sources: Option<bool>,
}

/// MCP server answering questions from one prepared vehicle manual index
#[derive(Clone)]
pub struct ManualQaServer {
    config: Arc<QaConfig>,
    system: QaSystem,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl ManualQaServer {
    pub fn new(config: QaConfig, system: QaSystem) -> Self {
        Self {
            config: Arc::new(config),
            system,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Answer a question about the vehicle using its owner's manual. Answers say so when the manual does not cover the question."
    )]
    pub async fn ask(
        &self,
        Parameters(request): Parameters<AskRequest>,
    ) -> Result<String, String> {
        info!("Processing ask request: {:?}", request.question);

        match self.system.answer(&request.question).await {
            Ok(answer) => Ok(render_answer(
                &answer,
                request.include_sources.unwrap_or(false),
            )),
            Err(e) => {
                warn!("Question failed: {e}");
                Err(e.to_string())
            }
        }
    }

    #[tool(description = "Show the state of the manual index: size, embedding model, chunking, and whether it matches the document")]
    pub async fn status(&self) -> String {
        let report = pipeline::status(&self.config).await;
        let mut status = format!(
            "Manual QA MCP Server Status\n\
            ===========================\n\
            Server Version: {}\n\
            Serving: {} passages ({}), top_k {}\n\
            Loaded From: {}\n\n",
            env!("CARGO_PKG_VERSION"),
            self.system.answerer().index().len(),
            self.system.origin(),
            self.system.answerer().top_k(),
            self.system.index_location().display(),
        );
        status.push_str(&render_status(&report));
        status
    }

    /// Serve until the client closes the stdio transport.
    pub async fn serve_stdio(self) -> Result<()> {
        let service = self.serve(stdio()).await?;
        let quit_reason = service.waiting().await?;
        info!("MCP server quit: {:?}", quit_reason);
        Ok(())
    }
}

#[tool_handler]
impl ServerHandler for ManualQaServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Answers questions about a vehicle from its owner's manual. Use `ask` for questions and `status` to inspect the index."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

fn render_answer(answer: &Answer, include_sources: bool) -> String {
    let mut output = answer.text.trim().to_string();
    if !include_sources || answer.sources.is_empty() {
        return output;
    }

    output.push_str("\n\nSources:\n");
    for (rank, hit) in answer.sources.iter().enumerate() {
        let preview: String = hit.passage.text.chars().take(PREVIEW_CHARS).collect();
        let _ = writeln!(
            output,
            "{}. Passage {} (chars {}-{}) - Similarity: {:.3}\n   {}",
            rank + 1,
            hit.passage.sequence,
            hit.passage.start_char,
            hit.passage.end_char,
            hit.score,
            preview.replace('\n', " ")
        );
    }
    output
}

fn render_status(report: &StatusReport) -> String {
    let mut status = String::from(
        "Index\n\
        -----\n",
    );
    let _ = writeln!(status, "Location: {}", report.index_location.display());
    let _ = writeln!(status, "Document: {}", report.document_path.display());

    if let Some(problem) = &report.problem {
        let _ = writeln!(status, "Problem: {problem}");
        return status;
    }

    match &report.summary {
        None => status.push_str("Stored: no\n"),
        Some(summary) => {
            let provenance = &summary.provenance;
            let _ = writeln!(status, "Passages: {}", summary.passage_count);
            let _ = writeln!(status, "Dimension: {} ({})", summary.dimension, summary.metric);
            let _ = writeln!(
                status,
                "Embedder: {}/{}",
                provenance.provider, provenance.model
            );
            let _ = writeln!(
                status,
                "Chunking: size {}, overlap {}",
                provenance.chunk_size, provenance.chunk_overlap
            );
            let _ = writeln!(status, "Created: {}", provenance.created_at.to_rfc3339());
            let freshness = match report.up_to_date {
                Some(true) => "up to date",
                Some(false) => "stale",
                None => "unknown",
            };
            let _ = writeln!(
                status,
                "Freshness: {freshness} (policy: {:?})",
                report.staleness
            );
        }
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use half::f16;
    use manual_qa_embed::{EmbedConfig, EmbeddingProvider, EmbeddingResult};
    use manual_qa_retriever::answer::generator::{GenerateError, Generator};
    use manual_qa_retriever::extract::{PageRange, PlainTextExtractor};
    use tempfile::TempDir;
    use tracing_test::traced_test;

    const KEYWORDS: [&str; 3] = ["brake", "oil", "tire"];

    /// One dimension per keyword plus a constant so no vector is zero.
    struct KeywordEmbedder;

    impl KeywordEmbedder {
        fn vector(text: &str) -> Vec<f16> {
            let lower = text.to_lowercase();
            let mut vector: Vec<f32> = KEYWORDS
                .iter()
                .map(|k| lower.matches(k).count() as f32)
                .collect();
            vector.push(0.1);
            vector.into_iter().map(f16::from_f32).collect()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        async fn embed_text(&self, text: &str) -> manual_qa_embed::Result<Vec<f16>> {
            Ok(Self::vector(text))
        }

        async fn embed_texts(&self, texts: &[String]) -> manual_qa_embed::Result<EmbeddingResult> {
            Ok(EmbeddingResult::new(
                texts.iter().map(|t| Self::vector(t)).collect(),
            ))
        }

        fn embedding_dimension(&self) -> usize {
            KEYWORDS.len() + 1
        }

        fn provider_name(&self) -> &str {
            "keywords"
        }

        fn model_name(&self) -> &str {
            "keywords"
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
            if prompt.contains("DOT 3") {
                Ok("Use DOT 3 brake fluid.".to_string())
            } else {
                Ok("I don't know.".to_string())
            }
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    async fn test_server() -> anyhow::Result<(TempDir, ManualQaServer)> {
        let dir = tempfile::tempdir()?;
        let document_path = dir.path().join("manual.txt");
        let pages = [
            "Brake fluid\nUse only DOT 3 brake fluid.",
            "Engine oil\nUse 0W-20 engine oil.",
            "Tire pressure\nInflate the tires to 230 kPa.",
        ];
        tokio::fs::write(&document_path, pages.join("\u{c}")).await?;

        let config = QaConfig {
            document_path,
            page_range: PageRange::new(0, pages.len()),
            index_location: dir.path().join("manual.index.db"),
            chunk_size: 80,
            chunk_overlap: 10,
            top_k: 3,
            embedding: EmbedConfig::openai("keywords", KEYWORDS.len() + 1),
            ..QaConfig::default()
        };

        let system = QaSystem::initialize(
            &config,
            &PlainTextExtractor,
            Arc::new(KeywordEmbedder),
            Arc::new(EchoGenerator),
            false,
        )
        .await?;
        Ok((dir, ManualQaServer::new(config, system)))
    }

    #[tokio::test]
    async fn test_ask_answers_from_manual() -> anyhow::Result<()> {
        let (_dir, server) = test_server().await?;
        let answer = server
            .ask(Parameters(AskRequest {
                question: "Which brake fluid should I use?".to_string(),
                include_sources: None,
            }))
            .await
            .map_err(anyhow::Error::msg)?;

        assert_eq!(answer, "Use DOT 3 brake fluid.");
        Ok(())
    }

    #[tokio::test]
    async fn test_ask_lists_sources_on_request() -> anyhow::Result<()> {
        let (_dir, server) = test_server().await?;
        let answer = server
            .ask(Parameters(AskRequest {
                question: "Which brake fluid should I use?".to_string(),
                include_sources: Some(true),
            }))
            .await
            .map_err(anyhow::Error::msg)?;

        assert!(answer.contains("Sources:"));
        assert!(answer.contains("1. Passage"));
        assert!(answer.contains("Similarity:"));
        Ok(())
    }

    #[traced_test]
    #[tokio::test]
    async fn test_empty_question_is_a_tool_error() -> anyhow::Result<()> {
        let (_dir, server) = test_server().await?;
        let result = server
            .ask(Parameters(AskRequest {
                question: "   ".to_string(),
                include_sources: None,
            }))
            .await;

        assert!(result.is_err());
        assert!(logs_contain("Question failed"));
        Ok(())
    }

    #[tokio::test]
    async fn test_status_reports_index() -> anyhow::Result<()> {
        let (_dir, server) = test_server().await?;
        let status = server.status().await;

        assert!(status.contains("(built)"));
        assert!(status.contains("Loaded From: "));
        assert!(status.contains("manual.index.db"));
        assert!(status.contains("Embedder: keywords/keywords"));
        assert!(status.contains("Chunking: size 80, overlap 10"));
        assert!(status.contains("Freshness: up to date"));
        Ok(())
    }

    #[tokio::test]
    async fn test_server_info_advertises_tools() -> anyhow::Result<()> {
        let (_dir, server) = test_server().await?;
        let info = server.get_info();
        assert!(info.capabilities.tools.is_some());
        assert!(info.instructions.is_some());
        Ok(())
    }
}
