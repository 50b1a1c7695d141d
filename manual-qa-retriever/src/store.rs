//! Persisting an [`Index`] to a single SQLite file and loading it back.
//!
//! ## File layout
//!
//! ```sql
//! -- Exactly one row describing the index
//! CREATE TABLE index_metadata (
//!     id INTEGER PRIMARY KEY CHECK (id = 1),
//!     format_version INTEGER NOT NULL,
//!     dimension INTEGER NOT NULL,
//!     metric TEXT NOT NULL,            -- "cosine" | "dot"
//!     passage_count INTEGER NOT NULL,
//!     provider TEXT NOT NULL,
//!     model TEXT NOT NULL,
//!     chunk_size INTEGER NOT NULL,
//!     chunk_overlap INTEGER NOT NULL,
//!     fingerprint TEXT,                -- blake3 hex of document + page range
//!     created_at TEXT NOT NULL
//! );
//!
//! -- One row per passage
//! CREATE TABLE passages (
//!     sequence INTEGER PRIMARY KEY,
//!     start_char INTEGER NOT NULL,
//!     end_char INTEGER NOT NULL,
//!     overlap_chars INTEGER NOT NULL,
//!     content TEXT NOT NULL,
//!     embedding BLOB NOT NULL          -- little-endian f16 values
//! );
//! ```
//!
//! Saving writes a complete database next to the target and renames it into
//! place, so readers only ever see a finished index. Loading opens the file
//! read-only and rejects anything that does not satisfy the index invariants.

use crate::error::{QaError, Result};
use crate::index::{Index, IndexEntry, IndexProvenance, SimilarityMetric};
use chrono::{DateTime, Utc};
use half::f16;
use manual_qa_context::Passage;
use manual_qa_embed::EmbeddingProvider;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::future::Future;
use std::path::{Path, PathBuf};

/// Version of the on-disk layout written by [`IndexStore::save`].
pub const FORMAT_VERSION: i64 = 1;

/// Metadata about a persisted index, read without loading embeddings.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub location: PathBuf,
    pub format_version: i64,
    pub dimension: usize,
    pub metric: SimilarityMetric,
    pub passage_count: usize,
    pub provenance: IndexProvenance,
    pub file_size_bytes: u64,
}

/// Location of a persisted index.
#[derive(Debug, Clone)]
pub struct IndexStore {
    location: PathBuf,
}

impl IndexStore {
    pub fn new<P: Into<PathBuf>>(location: P) -> Self {
        Self {
            location: location.into(),
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Whether an index file is present. This alone decides build versus load.
    pub fn exists(&self) -> bool {
        self.location.is_file()
    }

    /// Write `index` to the store location, replacing any previous index atomically.
    pub async fn save(&self, index: &Index) -> Result<()> {
        self.save_with(index, |staging| Self::write_database(staging, index))
            .await
    }

    /// Stage a database with `write`, then rename it over the store location.
    ///
    /// The previous index is untouched unless `write` succeeds.
    async fn save_with<W, F>(&self, index: &Index, write: W) -> Result<()>
    where
        W: FnOnce(PathBuf) -> F,
        F: Future<Output = sqlx::Result<()>>,
    {
        let parent = match self.location.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| QaError::persistence(&self.location, e))?;

        let staging = tempfile::Builder::new()
            .prefix(".manual-qa-")
            .suffix(".db.tmp")
            .tempfile_in(&parent)
            .map_err(|e| QaError::persistence(&self.location, e))?;

        tracing::debug!("Staging index in {}", staging.path().display());
        write(staging.path().to_path_buf())
            .await
            .map_err(|e| QaError::persistence(&self.location, e))?;

        staging
            .persist(&self.location)
            .map_err(|e| QaError::persistence(&self.location, e.error))?;

        tracing::info!(
            "Saved index of {} passages to {}",
            index.len(),
            self.location.display()
        );
        Ok(())
    }

    async fn write_database(path: PathBuf, index: &Index) -> sqlx::Result<()> {
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .journal_mode(SqliteJournalMode::Delete)
                .create_if_missing(true),
        )
        .await?;

        let result = Self::write_tables(&pool, index).await;
        pool.close().await;
        result
    }

    async fn write_tables(pool: &SqlitePool, index: &Index) -> sqlx::Result<()> {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE index_metadata (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                format_version INTEGER NOT NULL,
                dimension INTEGER NOT NULL,
                metric TEXT NOT NULL,
                passage_count INTEGER NOT NULL,
                provider TEXT NOT NULL,
                model TEXT NOT NULL,
                chunk_size INTEGER NOT NULL,
                chunk_overlap INTEGER NOT NULL,
                fingerprint TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE passages (
                sequence INTEGER PRIMARY KEY,
                start_char INTEGER NOT NULL,
                end_char INTEGER NOT NULL,
                overlap_chars INTEGER NOT NULL,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        let provenance = index.provenance();
        sqlx::query(
            r#"
            INSERT INTO index_metadata (
                id, format_version, dimension, metric, passage_count, provider, model,
                chunk_size, chunk_overlap, fingerprint, created_at
            )
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(FORMAT_VERSION)
        .bind(index.dimension() as i64)
        .bind(index.metric().as_str())
        .bind(index.len() as i64)
        .bind(&provenance.provider)
        .bind(&provenance.model)
        .bind(provenance.chunk_size as i64)
        .bind(provenance.chunk_overlap as i64)
        .bind(&provenance.fingerprint)
        .bind(provenance.created_at)
        .execute(&mut *tx)
        .await?;

        for entry in index.entries() {
            let passage = &entry.passage;
            sqlx::query(
                r#"
                INSERT INTO passages (sequence, start_char, end_char, overlap_chars, content, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(passage.sequence as i64)
            .bind(passage.start_char as i64)
            .bind(passage.end_char as i64)
            .bind(passage.overlap_chars as i64)
            .bind(&passage.text)
            .bind(bytemuck::cast_slice::<f16, u8>(&entry.embedding))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    async fn open_read_only(&self) -> Result<SqlitePool> {
        if !self.exists() {
            return Err(self.corrupt("index file does not exist"));
        }
        SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(&self.location)
                .read_only(true)
                .create_if_missing(false),
        )
        .await
        .map_err(|e| self.corrupt(format!("cannot open database: {e}")))
    }

    fn corrupt<S: Into<String>>(&self, message: S) -> QaError {
        QaError::corrupt(&self.location, message)
    }

    /// Read the metadata row without touching passages or embeddings.
    pub async fn describe(&self) -> Result<Option<IndexSummary>> {
        if !self.exists() {
            return Ok(None);
        }

        let pool = self.open_read_only().await?;
        let metadata = self.read_metadata(&pool).await;
        pool.close().await;
        let metadata = metadata?;

        let file_size_bytes = tokio::fs::metadata(&self.location)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(Some(IndexSummary {
            location: self.location.clone(),
            format_version: metadata.format_version,
            dimension: metadata.dimension,
            metric: metadata.metric,
            passage_count: metadata.passage_count,
            provenance: metadata.provenance,
            file_size_bytes,
        }))
    }

    /// Load the index, checking it against the embedder that will query it.
    pub async fn load(&self, embedder: &dyn EmbeddingProvider) -> Result<Index> {
        let pool = self.open_read_only().await?;
        let result = self.read_index(&pool, embedder).await;
        pool.close().await;
        result
    }

    async fn read_index(&self, pool: &SqlitePool, embedder: &dyn EmbeddingProvider) -> Result<Index> {
        let metadata = self.read_metadata(pool).await?;

        if metadata.dimension != embedder.embedding_dimension() {
            return Err(self.corrupt(format!(
                "index dimension {} does not match embedder dimension {}",
                metadata.dimension,
                embedder.embedding_dimension()
            )));
        }
        if metadata.provenance.provider != embedder.provider_name()
            || metadata.provenance.model != embedder.model_name()
        {
            tracing::warn!(
                "Index at {} was built with {}/{} but is being queried with {}/{}",
                self.location.display(),
                metadata.provenance.provider,
                metadata.provenance.model,
                embedder.provider_name(),
                embedder.model_name()
            );
        }

        let rows = sqlx::query(
            "SELECT sequence, start_char, end_char, overlap_chars, content, embedding FROM passages ORDER BY sequence",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| self.corrupt(format!("cannot read passages: {e}")))?;

        if rows.len() != metadata.passage_count {
            return Err(self.corrupt(format!(
                "metadata records {} passages but {} are stored",
                metadata.passage_count,
                rows.len()
            )));
        }

        let mut entries = Vec::with_capacity(rows.len());
        for (position, row) in rows.iter().enumerate() {
            let entry = self.decode_entry(row, metadata.dimension)?;
            if entry.passage.sequence != position {
                return Err(self.corrupt(format!(
                    "passage sequences are not contiguous: expected {position}, found {}",
                    entry.passage.sequence
                )));
            }
            entries.push(entry);
        }

        let index = Index::new(metadata.dimension, metadata.metric, entries, metadata.provenance)
            .map_err(|e| self.corrupt(e.to_string()))?;

        tracing::info!(
            "Loaded index of {} passages from {}",
            index.len(),
            self.location.display()
        );
        Ok(index)
    }

    async fn read_metadata(&self, pool: &SqlitePool) -> Result<StoredMetadata> {
        let row = sqlx::query(
            r#"
            SELECT format_version, dimension, metric, passage_count, provider, model,
                   chunk_size, chunk_overlap, fingerprint, created_at
            FROM index_metadata WHERE id = 1
            "#,
        )
        .fetch_optional(pool)
        .await
        .map_err(|e| self.corrupt(format!("cannot read metadata: {e}")))?
        .ok_or_else(|| self.corrupt("metadata row is missing"))?;

        let format_version: i64 = self.column(&row, "format_version")?;
        if format_version != FORMAT_VERSION {
            return Err(self.corrupt(format!("unknown format version {format_version}")));
        }

        let metric: String = self.column(&row, "metric")?;
        let metric = metric
            .parse::<SimilarityMetric>()
            .map_err(|e| self.corrupt(e))?;
        let created_at: DateTime<Utc> = self.column(&row, "created_at")?;

        Ok(StoredMetadata {
            format_version,
            dimension: self.count_column(&row, "dimension")?,
            metric,
            passage_count: self.count_column(&row, "passage_count")?,
            provenance: IndexProvenance {
                provider: self.column(&row, "provider")?,
                model: self.column(&row, "model")?,
                chunk_size: self.count_column(&row, "chunk_size")?,
                chunk_overlap: self.count_column(&row, "chunk_overlap")?,
                fingerprint: self.column(&row, "fingerprint")?,
                created_at,
            },
        })
    }

    fn decode_entry(&self, row: &SqliteRow, dimension: usize) -> Result<IndexEntry> {
        let sequence = self.count_column(row, "sequence")?;
        let start_char = self.count_column(row, "start_char")?;
        let end_char = self.count_column(row, "end_char")?;
        let overlap_chars = self.count_column(row, "overlap_chars")?;
        let text: String = self.column(row, "content")?;
        let bytes: Vec<u8> = self.column(row, "embedding")?;

        if end_char < start_char || text.chars().count() != end_char - start_char {
            return Err(self.corrupt(format!(
                "passage {sequence} text does not match its character range"
            )));
        }
        if bytes.len() != dimension * std::mem::size_of::<f16>() {
            return Err(self.corrupt(format!(
                "passage {sequence} embedding is {} bytes, expected {}",
                bytes.len(),
                dimension * std::mem::size_of::<f16>()
            )));
        }

        Ok(IndexEntry {
            passage: Passage {
                sequence,
                text,
                start_char,
                end_char,
                overlap_chars,
            },
            embedding: bytemuck::pod_collect_to_vec::<u8, f16>(&bytes),
        })
    }

    fn column<'r, T>(&self, row: &'r SqliteRow, name: &str) -> Result<T>
    where
        T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
    {
        row.try_get(name)
            .map_err(|e| self.corrupt(format!("bad column {name}: {e}")))
    }

    fn count_column(&self, row: &SqliteRow, name: &str) -> Result<usize> {
        let value: i64 = self.column(row, name)?;
        usize::try_from(value).map_err(|_| self.corrupt(format!("negative value in column {name}")))
    }
}

struct StoredMetadata {
    format_version: i64,
    dimension: usize,
    metric: SimilarityMetric,
    passage_count: usize,
    provenance: IndexProvenance,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::tests::{provenance, sample_index};
    use async_trait::async_trait;
    use manual_qa_embed::EmbeddingResult;
    use tempfile::tempdir;

    struct DimensionOnly(usize);

    async fn tamper(path: &Path, statement: &str) -> anyhow::Result<()> {
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .journal_mode(SqliteJournalMode::Delete),
        )
        .await?;
        sqlx::query(statement).execute(&pool).await?;
        pool.close().await;
        Ok(())
    }

    #[async_trait]
    impl EmbeddingProvider for DimensionOnly {
        async fn embed_text(&self, _text: &str) -> manual_qa_embed::Result<Vec<f16>> {
            Ok(vec![f16::ZERO; self.0])
        }

        async fn embed_texts(&self, texts: &[String]) -> manual_qa_embed::Result<EmbeddingResult> {
            Ok(EmbeddingResult::new(vec![vec![f16::ZERO; self.0]; texts.len()]))
        }

        fn embedding_dimension(&self) -> usize {
            self.0
        }

        fn provider_name(&self) -> &str {
            "fake"
        }

        fn model_name(&self) -> &str {
            "fake-model"
        }
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = IndexStore::new(dir.path().join("nested").join("manual.index.db"));
        assert!(!store.exists());

        let index = sample_index(SimilarityMetric::Dot);
        store.save(&index).await?;
        assert!(store.exists());

        let loaded = store.load(&DimensionOnly(3)).await?;
        assert_eq!(loaded.entries(), index.entries());
        assert_eq!(loaded.metric(), SimilarityMetric::Dot);
        assert_eq!(loaded.provenance(), index.provenance());
        Ok(())
    }

    #[tokio::test]
    async fn test_describe() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = IndexStore::new(dir.path().join("manual.index.db"));
        assert!(store.describe().await?.is_none());

        store.save(&sample_index(SimilarityMetric::Cosine)).await?;
        let summary = store.describe().await?.expect("summary");
        assert_eq!(summary.passage_count, 3);
        assert_eq!(summary.dimension, 3);
        assert_eq!(summary.format_version, FORMAT_VERSION);
        assert_eq!(summary.provenance.chunk_size, provenance().chunk_size);
        assert!(summary.file_size_bytes > 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_corrupt() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = IndexStore::new(dir.path().join("manual.index.db"));
        store.save(&sample_index(SimilarityMetric::Cosine)).await?;

        let result = store.load(&DimensionOnly(8)).await;
        assert!(matches!(result, Err(QaError::CorruptIndex { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_garbage_file_is_corrupt() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("manual.index.db");
        tokio::fs::write(&path, b"definitely not sqlite, just some bytes").await?;

        let store = IndexStore::new(&path);
        let result = store.load(&DimensionOnly(3)).await;
        assert!(matches!(result, Err(QaError::CorruptIndex { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_truncated_embedding_is_corrupt() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("manual.index.db");
        let store = IndexStore::new(&path);
        store.save(&sample_index(SimilarityMetric::Cosine)).await?;

        tamper(&path, "UPDATE passages SET embedding = x'0000' WHERE sequence = 1").await?;

        let result = store.load(&DimensionOnly(3)).await;
        assert!(matches!(result, Err(QaError::CorruptIndex { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_non_finite_embedding_is_corrupt() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("manual.index.db");
        let store = IndexStore::new(&path);
        store.save(&sample_index(SimilarityMetric::Cosine)).await?;

        // 0x7c00 is f16 infinity
        tamper(&path, "UPDATE passages SET embedding = x'007c00000000' WHERE sequence = 2").await?;

        let result = store.load(&DimensionOnly(3)).await;
        assert!(matches!(result, Err(QaError::CorruptIndex { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_row_is_corrupt() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("manual.index.db");
        let store = IndexStore::new(&path);
        store.save(&sample_index(SimilarityMetric::Cosine)).await?;

        tamper(&path, "DELETE FROM passages WHERE sequence = 1").await?;

        let result = store.load(&DimensionOnly(3)).await;
        assert!(matches!(result, Err(QaError::CorruptIndex { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_format_version_is_corrupt() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("manual.index.db");
        let store = IndexStore::new(&path);
        store.save(&sample_index(SimilarityMetric::Cosine)).await?;

        tamper(&path, "UPDATE index_metadata SET format_version = 99").await?;

        let describe = store.describe().await;
        assert!(matches!(describe, Err(QaError::CorruptIndex { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_index() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("manual.index.db");
        let store = IndexStore::new(&path);
        store.save(&sample_index(SimilarityMetric::Cosine)).await?;
        let before = tokio::fs::read(&path).await?;

        let replacement = sample_index(SimilarityMetric::Dot);
        let staged = &replacement;
        let result = store
            .save_with(&replacement, move |staging| async move {
                // A complete database is staged, then the write reports failure.
                IndexStore::write_database(staging, staged).await?;
                Err::<(), _>(sqlx::Error::Protocol("disk full".to_string()))
            })
            .await;
        assert!(matches!(result, Err(QaError::PersistenceFailure { .. })));

        assert_eq!(tokio::fs::read(&path).await?, before);
        let loaded = store.load(&DimensionOnly(3)).await?;
        assert_eq!(loaded.metric(), SimilarityMetric::Cosine);

        let names: Vec<String> = std::fs::read_dir(dir.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["manual.index.db".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_save_replaces_previous_index_without_leftovers() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = IndexStore::new(dir.path().join("manual.index.db"));
        store.save(&sample_index(SimilarityMetric::Cosine)).await?;
        store.save(&sample_index(SimilarityMetric::Dot)).await?;

        let loaded = store.load(&DimensionOnly(3)).await?;
        assert_eq!(loaded.metric(), SimilarityMetric::Dot);

        let names: Vec<String> = std::fs::read_dir(dir.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["manual.index.db".to_string()]);
        Ok(())
    }
}
