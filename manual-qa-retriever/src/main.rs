use clap::{Parser, Subcommand};
use manual_qa_retriever::{
    Answer,
    config::{DEFAULT_CONFIG_FILE, QaConfig, Secrets},
    extract::extractor_for,
    pipeline::{self, QaSystem, StatusReport},
};
use std::io::Write;
use std::path::PathBuf;
use std::process;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Ask questions about a vehicle manual.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the index, or load it if it already exists
    Index {
        /// Rebuild even if an index is already stored
        #[arg(long)]
        rebuild: bool,
    },
    /// Answer a single question
    Ask {
        question: String,
        /// Print the passages the answer was grounded on
        #[arg(long)]
        sources: bool,
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
    /// Answer questions read from standard input, one per line
    Repl {
        /// Print the passages each answer was grounded on
        #[arg(long)]
        sources: bool,
    },
    /// Show information about the stored index
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = QaConfig::load(&args.config).await?;

    match args.command {
        Commands::Index { rebuild } => {
            let secrets = Secrets::from_env();
            let embedder = pipeline::connect_embedder(&config, &secrets).await?;
            let extractor = extractor_for(&config.document_path);
            let loaded =
                pipeline::prepare_index(&config, extractor.as_ref(), embedder, rebuild).await?;
            println!(
                "Index {} with {} passages at {}",
                loaded.origin,
                loaded.index.len(),
                config.index_location.display()
            );
            Ok(())
        }
        Commands::Ask {
            question,
            sources,
            format,
        } => {
            let system = start(&config).await?;
            let answer = system.answer(&question).await?;
            print_answer(&answer, sources, &format)?;
            Ok(())
        }
        Commands::Repl { sources } => {
            let system = start(&config).await?;
            repl(&system, sources).await
        }
        Commands::Status { format } => {
            let report = pipeline::status(&config).await;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => print_status(&report),
            }
            Ok(())
        }
    }
}

async fn start(config: &QaConfig) -> anyhow::Result<QaSystem> {
    let secrets = Secrets::from_env();
    let (embedder, generator) = pipeline::connect(config, &secrets).await?;
    let extractor = extractor_for(&config.document_path);
    Ok(QaSystem::initialize(config, extractor.as_ref(), embedder, generator, false).await?)
}

async fn repl(system: &QaSystem, sources: bool) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }

        match system.answer(question).await {
            Ok(answer) => print_answer(&answer, sources, &OutputFormat::Text)?,
            Err(e) if e.is_recoverable() => eprintln!("Error: {e}"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn print_answer(answer: &Answer, sources: bool, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(answer)?),
        OutputFormat::Text => {
            println!("{}", answer.text);
            if sources {
                println!();
                println!("Sources:");
                for (rank, hit) in answer.sources.iter().enumerate() {
                    println!(
                        "  {}. passage {} (chars {}-{}, score {:.4})",
                        rank + 1,
                        hit.passage.sequence,
                        hit.passage.start_char,
                        hit.passage.end_char,
                        hit.score
                    );
                    let preview: String = hit.passage.text.chars().take(160).collect();
                    println!("     {}", preview.replace('\n', " "));
                }
            }
        }
    }
    Ok(())
}

fn print_status(report: &StatusReport) {
    println!("Index: {}", report.index_location.display());
    println!("Document: {}", report.document_path.display());

    if let Some(problem) = &report.problem {
        println!("  Problem: {problem}");
        println!("  Run `manual-qa index --rebuild` to replace it.");
        return;
    }

    match &report.summary {
        None => println!("  Not built yet. Run `manual-qa index`."),
        Some(summary) => {
            let provenance = &summary.provenance;
            println!("  Passages: {}", summary.passage_count);
            println!("  Dimension: {} ({})", summary.dimension, summary.metric);
            println!("  Embedder: {}/{}", provenance.provider, provenance.model);
            println!(
                "  Chunking: size {}, overlap {}",
                provenance.chunk_size, provenance.chunk_overlap
            );
            println!("  Created: {}", provenance.created_at.to_rfc3339());
            println!("  Size: {} bytes", summary.file_size_bytes);
            let freshness = match report.up_to_date {
                Some(true) => "up to date",
                Some(false) => "stale",
                None => "unknown",
            };
            println!("  Freshness: {freshness} (policy: {:?})", report.staleness);
        }
    }
}
