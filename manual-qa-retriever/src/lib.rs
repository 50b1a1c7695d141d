//! manual-qa-retriever: retrieval-augmented question answering over a manual
//!
//! This crate turns one reference document into a persisted semantic index and
//! answers natural-language questions against it. Passages most similar to the
//! question are retrieved and handed to a language model as grounding context.
//!
//! ## Key Modules
//!
//! - **[`extract`]**: Document and page range to a single text blob
//! - **[`index`]**: Passage embeddings, similarity search, and the index builder
//! - **[`store`]**: Single-file SQLite persistence with atomic replacement
//! - **[`answer`]**: The retrieval-augmented answerer, prompts, and generators
//! - **[`pipeline`]**: One-shot startup deciding between building and loading
//! - **[`config`]**: TOML configuration and environment secrets
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use manual_qa_retriever::{
//!     config::{QaConfig, Secrets},
//!     extract::extractor_for,
//!     pipeline::{QaSystem, connect},
//! };
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = QaConfig::load(Path::new("manual-qa.toml")).await?;
//! let (embedder, generator) = connect(&config, &Secrets::from_env()).await?;
//! let extractor = extractor_for(&config.document_path);
//!
//! let system = QaSystem::initialize(&config, extractor.as_ref(), embedder, generator, false).await?;
//! let answer = system.answer("How do I check the brake fluid?").await?;
//! println!("{}", answer.text);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Document → Extractor → Chunker → Index Builder → Index Store
//!                                                      ↓
//!               Question → Embedder → Index search → Prompt → Generator → Answer
//! ```

pub mod answer;
pub mod config;
pub mod error;
pub mod extract;
pub mod index;
pub mod pipeline;
pub mod store;

pub use answer::{Answer, Answerer};
pub use error::{QaError, Result};
pub use index::{Index, ScoredPassage, SimilarityMetric};
pub use pipeline::{IndexOrigin, LoadedIndex, QaSystem, build_or_load};
pub use store::IndexStore;
