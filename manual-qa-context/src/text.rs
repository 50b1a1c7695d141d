//! This module turns the text extracted from a manual into "passages": ordered,
//! overlapping windows of text that can be embedded and retrieved independently.
//!
//! The module defines two main items:
//! - [`PassageSplitter`]: Holds the chunking parameters and the boundary delimiters
//!   used to choose where a window is cut.
//! - [`Passage`]: A single window of text, with its position in the source blob and
//!   the number of leading characters it shares with the previous passage.
//!
//! # Windowing
//!
//! A window of `chunk_size` characters slides across the text. Consecutive windows
//! share exactly `chunk_overlap` characters. When a window does not reach the end of
//! the text, its cut is moved back to the most significant boundary found in the
//! tail of the window (paragraph, line, sentence, whitespace). If there is no usable
//! boundary the window is cut hard at `chunk_size` characters.
//!
//! Lengths are counted in characters, not bytes, so multi-byte scripts are never
//! split inside a character.
//!
//! # Key Features
//!
//! *   **Exact Reconstruction**: The first passage followed by every later passage
//!     with its overlap removed is the original text, byte for byte.
//! *   **Contiguous Sequences**: Passages are numbered from 0 in document order.
//! *   **Bounded Size**: No passage is longer than `chunk_size` characters.
//!
//! # Usage
//!
//! ```
//! use manual_qa_context::text::{reconstruct, split};
//!
//! let manual = "Check the brake fluid level monthly.\n\nReplace the wiper blades \
//!               when they streak. Keep the tyre pressure at the value on the door pillar.";
//! let passages = split(manual, 60, 10).unwrap();
//!
//! assert!(passages.len() > 1);
//! assert_eq!(passages[0].sequence, 0);
//! assert_eq!(passages[1].overlap_chars, 10);
//! assert_eq!(reconstruct(&passages), manual);
//! ```
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Boundary patterns tried when a window has to be cut, most significant first.
///
/// - `\n[ \t]*\n\s*`: Paragraph breaks, including blank lines containing spaces.
/// - `\n`: Line breaks.
/// - `[.!?]+\s+|[。！？]+\s*`: Sentence ends. Latin full stops need trailing
///   whitespace so decimals like `2.5` are not treated as boundaries.
/// - `\s+`: Any whitespace run.
pub const DEFAULT_BOUNDARY_DELIMITERS: &[&str] = &[
    r"\n[ \t]*\n\s*",           // Paragraphs
    r"\n",                      // Line breaks
    r"[.!?]+\s+|[。！？]+\s*", // Sentences
    r"\s+",                     // Whitespace
];

/// Errors produced when splitting text into passages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SplitError {
    /// The overlap must be strictly smaller than the window.
    #[error(
        "Invalid chunking configuration: chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
    )]
    InvalidConfiguration {
        chunk_size: usize,
        chunk_overlap: usize,
    },

    /// A boundary pattern failed to compile.
    #[error("Invalid boundary delimiter {pattern:?}: {message}")]
    InvalidDelimiter { pattern: String, message: String },

    /// There is nothing to split.
    #[error("Cannot split empty text")]
    EmptyText,
}

/// A bounded, retrievable unit of document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    /// Position of this passage in the document (0-indexed, contiguous).
    pub sequence: usize,
    /// The text of the passage, including its overlap prefix.
    pub text: String,
    /// Character offset of the first character in the source blob.
    pub start_char: usize,
    /// Character offset one past the last character in the source blob.
    pub end_char: usize,
    /// Number of leading characters shared with the previous passage.
    pub overlap_chars: usize,
}

impl Passage {
    /// Length of the passage in characters.
    pub fn char_len(&self) -> usize {
        self.end_char - self.start_char
    }

    /// The part of the passage that the previous passage does not already contain.
    pub fn fresh_text(&self) -> &str {
        match self.text.char_indices().nth(self.overlap_chars) {
            Some((byte, _)) => &self.text[byte..],
            None => "",
        }
    }
}

/// Splits text into overlapping passages.
///
/// The splitter is validated once on construction and can then be reused for
/// any number of texts.
#[derive(Debug, Clone)]
pub struct PassageSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    delimiters: Vec<Regex>,
}

impl PassageSplitter {
    /// Creates a splitter that prefers [`DEFAULT_BOUNDARY_DELIMITERS`] when cutting.
    ///
    /// # Errors
    ///
    /// Returns [`SplitError::InvalidConfiguration`] if `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, SplitError> {
        Self::with_delimiters(chunk_size, chunk_overlap, DEFAULT_BOUNDARY_DELIMITERS)
    }

    /// Creates a splitter that always cuts exactly at the window edge.
    ///
    /// With a hard-cut splitter the number of passages for a text of `n`
    /// characters is `max(1, ceil((n - overlap) / (chunk_size - overlap)))`.
    pub fn hard_cut(chunk_size: usize, chunk_overlap: usize) -> Result<Self, SplitError> {
        Self::with_delimiters(chunk_size, chunk_overlap, &[])
    }

    /// Creates a splitter with custom boundary patterns, most significant first.
    pub fn with_delimiters(
        chunk_size: usize,
        chunk_overlap: usize,
        delimiter_patterns: &[&str],
    ) -> Result<Self, SplitError> {
        if chunk_overlap >= chunk_size {
            return Err(SplitError::InvalidConfiguration {
                chunk_size,
                chunk_overlap,
            });
        }

        let delimiters = delimiter_patterns
            .iter()
            .map(|&pattern| {
                Regex::new(pattern).map_err(|e| SplitError::InvalidDelimiter {
                    pattern: pattern.to_string(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            chunk_size,
            chunk_overlap,
            delimiters,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Splits `text` into passages in document order.
    ///
    /// # Examples
    ///
    /// ```
    /// use manual_qa_context::text::PassageSplitter;
    ///
    /// let splitter = PassageSplitter::hard_cut(4, 1).unwrap();
    /// let passages = splitter.split("abcdefghij").unwrap();
    ///
    /// let texts: Vec<&str> = passages.iter().map(|p| p.text.as_str()).collect();
    /// assert_eq!(texts, vec!["abcd", "defg", "ghij"]);
    /// ```
    pub fn split(&self, text: &str) -> Result<Vec<Passage>, SplitError> {
        if text.is_empty() {
            return Err(SplitError::EmptyText);
        }

        // Byte offset of every character, plus the end of the text.
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(byte, _)| byte)
            .chain(std::iter::once(text.len()))
            .collect();
        let total_chars = offsets.len() - 1;

        let mut passages: Vec<Passage> = Vec::new();
        let mut start = 0;

        loop {
            let window_end = (start + self.chunk_size).min(total_chars);
            let end = if window_end == total_chars {
                total_chars
            } else {
                self.find_cut(text, &offsets, start, window_end)
            };

            passages.push(Passage {
                sequence: passages.len(),
                text: text[offsets[start]..offsets[end]].to_string(),
                start_char: start,
                end_char: end,
                overlap_chars: if passages.is_empty() {
                    0
                } else {
                    self.chunk_overlap
                },
            });

            if end == total_chars {
                break;
            }
            start = end - self.chunk_overlap;
        }

        Ok(passages)
    }

    // Picks the character offset at which the window [start, window_end) is cut.
    // The cut always leaves more than `chunk_overlap` characters in the passage so
    // the next window starts strictly after this one.
    fn find_cut(&self, text: &str, offsets: &[usize], start: usize, window_end: usize) -> usize {
        let min_end = start + (self.chunk_overlap + 1).max(self.chunk_size / 2);
        if min_end >= window_end {
            return window_end;
        }

        let region_start = offsets[min_end];
        let region = &text[region_start..offsets[window_end]];

        for delimiter in &self.delimiters {
            if let Some(found) = delimiter.find_iter(region).last() {
                let cut_byte = region_start + found.end();
                return offsets.partition_point(|&offset| offset < cut_byte);
            }
        }

        window_end
    }
}

/// Splits `text` into passages of at most `chunk_size` characters sharing
/// `chunk_overlap` characters, preferring natural boundaries.
pub fn split(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<Passage>, SplitError> {
    PassageSplitter::new(chunk_size, chunk_overlap)?.split(text)
}

/// Rebuilds the original text from passages produced by [`split`].
pub fn reconstruct(passages: &[Passage]) -> String {
    passages.iter().map(Passage::fresh_text).collect()
}
