//! # manual-qa-mcp
//!
//! A Model Context Protocol (MCP) server that answers questions about a
//! vehicle manual. AI clients send a question and get back an answer
//! grounded on the manual's passages.
//!
//! The index is built or loaded once, before the server starts accepting
//! requests; every request after that shares the same in-memory index.
//!
//! ## Tools
//!
//! - `ask`: answer a question, optionally listing the passages used
//! - `status`: describe the stored index and whether it matches the document
//!
//! ## Integration with Claude Desktop
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "vehicle-manual": {
//!       "command": "manual-qa-mcp",
//!       "args": ["--config", "/path/to/manual-qa.toml"]
//!     }
//!   }
//! }
//! ```
//!
//! Standard output carries the protocol, so logs go to standard error.

mod server;

pub use server::{AskRequest, ManualQaServer};

use anyhow::Result;
use manual_qa_retriever::config::{DEFAULT_CONFIG_FILE, QaConfig, Secrets};
use manual_qa_retriever::extract::extractor_for;
use manual_qa_retriever::pipeline::{self, QaSystem};
use std::path::PathBuf;
use tracing::info;

/// Configuration for the MCP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path of the `manual-qa.toml` file
    pub config_path: PathBuf,
    /// Rebuild the index before serving even if one is stored
    pub rebuild: bool,
}

impl ServerConfig {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config_path,
            rebuild: false,
        }
    }

    pub fn with_rebuild(mut self, rebuild: bool) -> Self {
        self.rebuild = rebuild;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(PathBuf::from(DEFAULT_CONFIG_FILE))
    }
}

/// Prepare the index and serve MCP over stdio until the client disconnects.
///
/// # Errors
/// - The configuration file is missing or invalid
/// - The index cannot be built or loaded
/// - MCP protocol communication errors
pub async fn run_server(config: ServerConfig) -> Result<()> {
    info!("Starting manual QA MCP server");

    let qa_config = QaConfig::load(&config.config_path).await?;
    let secrets = Secrets::from_env();
    let (embedder, generator) = pipeline::connect(&qa_config, &secrets).await?;
    let extractor = extractor_for(&qa_config.document_path);

    let system = QaSystem::initialize(
        &qa_config,
        extractor.as_ref(),
        embedder,
        generator,
        config.rebuild,
    )
    .await?;

    info!(
        "Index {} with {} passages, starting stdio transport",
        system.origin(),
        system.answerer().index().len()
    );

    ManualQaServer::new(qa_config, system).serve_stdio().await
}
