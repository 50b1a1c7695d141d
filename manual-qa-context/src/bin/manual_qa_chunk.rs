use clap::Parser;
use manual_qa_context::text::{DEFAULT_BOUNDARY_DELIMITERS, PassageSplitter, reconstruct};
use std::fs;
use std::io::{self, Read};
use std::process;

/// A CLI tool to split extracted manual text into JSON passages.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Maximum length of each passage, in characters.
    #[arg(short = 's', long, default_value_t = 1000)]
    chunk_size: usize,

    /// Characters shared between consecutive passages.
    #[arg(short = 'o', long, default_value_t = 200)]
    chunk_overlap: usize,

    /// Comma-separated list of regex patterns for boundaries.
    /// Defaults to paragraph, line, sentence and whitespace boundaries.
    #[arg(short, long, value_delimiter = ',')]
    delimiters: Option<Vec<String>>,

    /// Cut exactly at the window edge, ignoring boundaries.
    #[arg(long, conflicts_with = "delimiters")]
    hard_cut: bool,

    /// Check that the passages reconstruct the input before printing.
    #[arg(long)]
    verify: bool,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let text = if let Some(input_path) = args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let splitter = if args.hard_cut {
        PassageSplitter::hard_cut(args.chunk_size, args.chunk_overlap)?
    } else {
        let patterns_owned: Vec<String> = args.delimiters.unwrap_or_else(|| {
            DEFAULT_BOUNDARY_DELIMITERS
                .iter()
                .map(|&s| s.to_string())
                .collect()
        });
        let patterns: Vec<&str> = patterns_owned.iter().map(|s| s.as_str()).collect();
        PassageSplitter::with_delimiters(args.chunk_size, args.chunk_overlap, &patterns)?
    };

    let passages = splitter.split(&text)?;

    if args.verify && reconstruct(&passages) != text {
        return Err("passages do not reconstruct the input".into());
    }

    println!("{}", serde_json::to_string_pretty(&passages)?);
    Ok(())
}
