use anyhow::Result;
use clap::Parser;
use manual_qa_mcp::{ServerConfig, run_server};
use manual_qa_retriever::config::DEFAULT_CONFIG_FILE;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Vehicle manual question answering over the Model Context Protocol
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Rebuild the index before serving
    #[arg(long)]
    rebuild: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout is the protocol channel
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    run_server(ServerConfig::new(args.config).with_rebuild(args.rebuild)).await
}
