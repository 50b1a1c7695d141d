//! Deterministic stand-ins for the embedding model and the language model.

#![allow(dead_code)]

use async_trait::async_trait;
use half::f16;
use manual_qa_embed::{EmbeddingProvider, EmbeddingResult};
use manual_qa_retriever::answer::generator::{GenerateError, Generator};
use manual_qa_retriever::config::{QaConfig, StalenessPolicy};
use manual_qa_retriever::extract::PageRange;
use manual_qa_embed::EmbedConfig;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const DIMENSION: usize = 256;

/// Four pages of a vehicle manual, separated by form feeds.
pub const MANUAL_PAGES: [&str; 4] = [
    "Tire pressure\nCheck the tire pressure every month when the tires are cold. \
     The recommended pressure is printed on the label on the driver door pillar.",
    "Engine oil\nUse engine oil that meets the ILSAC GF-6 standard. Check the oil level \
     with the dipstick while the engine is off and the car is on level ground.",
    "Brake fluid\nThe brake fluid type used in this vehicle is SAE J1703 or FMVSS No.116 DOT 3. \
     Check the brake fluid level in the reservoir; it should be between MAX and MIN.",
    "Wiper blades\nReplace the wiper blades when they streak or leave areas of the \
     windshield unwiped.",
];

pub const BRAKE_QUESTION: &str = "What type of brake fluid should be used?";

/// Bag-of-words embedder: each lowercase word is hashed into one of
/// `DIMENSION` buckets and the counts are L2-normalized.
pub struct BagOfWordsEmbedder {
    pub text_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
    pub texts_embedded: AtomicUsize,
    dimension: usize,
}

impl BagOfWordsEmbedder {
    pub fn new() -> Self {
        Self::with_dimension(DIMENSION)
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            text_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            texts_embedded: AtomicUsize::new(0),
            dimension,
        }
    }

    pub fn vector(&self, text: &str) -> Vec<f16> {
        let mut counts = vec![0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = blake3::hash(word.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest.as_bytes()[..8]);
            counts[(u64::from_le_bytes(bucket) % self.dimension as u64) as usize] += 1.0;
        }
        let norm = counts.iter().map(|v| v * v).sum::<f32>().sqrt();
        counts
            .into_iter()
            .map(|v| f16::from_f32(if norm > 0.0 { v / norm } else { 0.0 }))
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for BagOfWordsEmbedder {
    async fn embed_text(&self, text: &str) -> manual_qa_embed::Result<Vec<f16>> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> manual_qa_embed::Result<EmbeddingResult> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(EmbeddingResult::new(
            texts.iter().map(|t| self.vector(t)).collect(),
        ))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "bag-of-words"
    }

    fn model_name(&self) -> &str {
        "blake3-buckets"
    }
}

/// Answers from the prompt alone and remembers every prompt it saw.
pub struct GroundedGenerator {
    pub prompts: Mutex<Vec<String>>,
}

impl GroundedGenerator {
    pub fn new() -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Generator for GroundedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if prompt.contains("DOT 3") {
            Ok("Use SAE J1703 or FMVSS No.116 DOT 3 brake fluid.".to_string())
        } else {
            Ok("I don't know.".to_string())
        }
    }

    fn model_name(&self) -> &str {
        "grounded"
    }
}

/// Write the sample manual into `dir` and return a config pointing at it.
pub async fn manual_config(dir: &Path) -> QaConfig {
    let document_path = dir.join("manual.txt");
    tokio::fs::write(&document_path, MANUAL_PAGES.join("\u{c}"))
        .await
        .expect("write manual");

    QaConfig {
        document_path,
        page_range: PageRange::new(0, MANUAL_PAGES.len()),
        index_location: dir.join("manual.index.db"),
        chunk_size: 200,
        chunk_overlap: 40,
        top_k: 2,
        staleness: StalenessPolicy::Warn,
        embedding: EmbedConfig::openai("bag-of-words", DIMENSION).with_batch_size(2),
        ..QaConfig::default()
    }
}
