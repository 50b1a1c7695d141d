//! Turning a source document into one text blob.
//!
//! Two extractors are provided. [`PdfToTextExtractor`] shells out to the
//! poppler `pdftotext` binary, which handles Japanese text well and keeps the
//! page layout. [`PlainTextExtractor`] reads UTF-8 text files whose pages are
//! separated by form feeds, the same convention `pdftotext` uses, which makes
//! it convenient for fixtures and pre-extracted manuals.
//!
//! Page ranges are 0-based and end-exclusive everywhere in this crate.

use crate::error::{QaError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Form feed, the page separator in extracted text.
pub const PAGE_BREAK: char = '\u{c}';

/// A half-open range of pages `[start, end)`, 0-based.
///
/// Serialized as a two-element array so that configuration files can write
/// `page_range = [390, 469]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[usize; 2]", into = "[usize; 2]")]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(QaError::invalid_config(format!(
                "page range [{}, {}) selects no pages",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

impl From<[usize; 2]> for PageRange {
    fn from([start, end]: [usize; 2]) -> Self {
        Self { start, end }
    }
}

impl From<PageRange> for [usize; 2] {
    fn from(range: PageRange) -> Self {
        [range.start, range.end]
    }
}

impl std::fmt::Display for PageRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// The document the index is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSource {
    pub path: PathBuf,
    pub pages: PageRange,
}

impl DocumentSource {
    pub fn new<P: Into<PathBuf>>(path: P, pages: PageRange) -> Self {
        Self {
            path: path.into(),
            pages,
        }
    }

    /// blake3 digest over the document bytes and the selected page range.
    ///
    /// Two indexes built from the same file but different page ranges get
    /// different fingerprints.
    pub async fn fingerprint(&self) -> Result<String> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| QaError::extraction(&self.path, format!("cannot read document: {e}")))?;

        let mut hasher = blake3::Hasher::new();
        hasher.update(&bytes);
        hasher.update(&(self.pages.start as u64).to_le_bytes());
        hasher.update(&(self.pages.end as u64).to_le_bytes());
        Ok(hex::encode(hasher.finalize().as_bytes()))
    }
}

/// Extracts text from the selected pages of a document.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Returns the text of pages `[start, end)` as a single blob.
    ///
    /// Fails with [`QaError::ExtractionFailure`] when the document cannot be
    /// read or the selected pages contain no text.
    async fn extract(&self, source: &DocumentSource) -> Result<String>;

    fn name(&self) -> &str;
}

/// Extracts PDF text with the `pdftotext` command line tool.
#[derive(Debug, Clone)]
pub struct PdfToTextExtractor {
    binary: PathBuf,
}

impl Default for PdfToTextExtractor {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("pdftotext"),
        }
    }
}

impl PdfToTextExtractor {
    /// Use a specific `pdftotext` binary instead of the one on `PATH`.
    pub fn with_binary<P: Into<PathBuf>>(binary: P) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn arguments(source: &DocumentSource) -> Vec<String> {
        // pdftotext numbers pages from 1 and includes the last page.
        vec![
            "-layout".to_string(),
            "-enc".to_string(),
            "UTF-8".to_string(),
            "-f".to_string(),
            (source.pages.start + 1).to_string(),
            "-l".to_string(),
            source.pages.end.to_string(),
            source.path.to_string_lossy().into_owned(),
            "-".to_string(),
        ]
    }
}

#[async_trait]
impl TextExtractor for PdfToTextExtractor {
    async fn extract(&self, source: &DocumentSource) -> Result<String> {
        source.pages.validate()?;
        if !source.path.is_file() {
            return Err(QaError::extraction(&source.path, "document not found"));
        }

        tracing::info!(
            "Extracting pages {} of {} with {}",
            source.pages,
            source.path.display(),
            self.binary.display()
        );

        let output = Command::new(&self.binary)
            .args(Self::arguments(source))
            .output()
            .await
            .map_err(|e| {
                QaError::extraction(
                    &source.path,
                    format!(
                        "failed to run {}: {e} (is poppler installed?)",
                        self.binary.display()
                    ),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!("pdftotext failed: {}", stderr.trim());
            return Err(QaError::extraction(
                &source.path,
                format!("pdftotext exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        let text = join_pages(raw.split(PAGE_BREAK));
        if text.trim().is_empty() {
            return Err(QaError::extraction(
                &source.path,
                format!("pages {} contain no text", source.pages),
            ));
        }

        tracing::info!("Extracted {} characters", text.chars().count());
        Ok(text)
    }

    fn name(&self) -> &str {
        "pdftotext"
    }
}

/// Reads UTF-8 text whose pages are separated by form feeds.
#[derive(Debug, Clone, Default)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract(&self, source: &DocumentSource) -> Result<String> {
        source.pages.validate()?;

        let content = tokio::fs::read_to_string(&source.path)
            .await
            .map_err(|e| QaError::extraction(&source.path, format!("cannot read document: {e}")))?;

        let pages: Vec<&str> = content.split(PAGE_BREAK).collect();
        if source.pages.start >= pages.len() {
            return Err(QaError::extraction(
                &source.path,
                format!(
                    "page range {} starts past the last page ({} pages)",
                    source.pages,
                    pages.len()
                ),
            ));
        }
        if source.pages.end > pages.len() {
            tracing::warn!(
                "Page range {} extends past the last page of {}, using {} pages",
                source.pages,
                source.path.display(),
                pages.len()
            );
        }

        let end = source.pages.end.min(pages.len());
        let text = join_pages(pages[source.pages.start..end].iter().copied());
        if text.trim().is_empty() {
            return Err(QaError::extraction(
                &source.path,
                format!("pages {} contain no text", source.pages),
            ));
        }

        tracing::info!(
            "Read {} characters from {}",
            text.chars().count(),
            source.path.display()
        );
        Ok(text)
    }

    fn name(&self) -> &str {
        "plain-text"
    }
}

/// Joins page texts with newlines, dropping the empty page `pdftotext`
/// leaves after the final form feed.
fn join_pages<'a>(pages: impl Iterator<Item = &'a str>) -> String {
    let mut pages: Vec<&str> = pages.collect();
    while pages.last().is_some_and(|page| page.trim().is_empty()) {
        pages.pop();
    }
    pages.join("\n")
}

/// Picks an extractor from the document's file extension.
pub fn extractor_for(path: &Path) -> Box<dyn TextExtractor> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    if is_pdf {
        Box::new(PdfToTextExtractor::default())
    } else {
        Box::new(PlainTextExtractor)
    }
}
