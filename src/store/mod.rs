//! Durable per-dataset paper store.
//!
//! One [`Store`] wraps one dataset's `papers.sqlite` plus its `pdf/` and
//! `bib/` directories. Listing fields are written only through
//! [`Store::upsert_listing`]; artifact fields only through
//! [`Store::mark_artifact`]. Neither path touches the other's columns.
//!
//! Writes for the same (paper, artifact kind) are serialized in-process, so
//! the last writer wins and a reader never sees a half-written row. Artifact
//! files are written to a `.part` sibling and renamed into place.

mod error;
mod row;

pub use error::{StorageErrorKind, StoreError};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use sqlx::Row;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};

use crate::dataset::{Dataset, DatasetError};
use crate::db::{Database, DatabaseOptions};
use crate::record::{ArtifactKind, ArtifactPayload, ArtifactStatus, PaperKey, PaperRecord};
use row::{PaperRow, encode_json_list};

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Returns `Ok(())` if a row was touched; otherwise [`StoreError::RecordNotFound`].
fn check_affected(key: &PaperKey, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::RecordNotFound(key.clone()))
    } else {
        Ok(())
    }
}

/// Outcome counts for one listing upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Identities seen for the first time.
    pub inserted: usize,
    /// Existing records whose listing fields changed.
    pub updated: usize,
    /// Existing records left untouched.
    pub unchanged: usize,
}

impl UpsertSummary {
    /// Total records processed after deduplication.
    #[must_use]
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }
}

/// Artifact write requested by the fetch pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactUpdate {
    /// A successful fetch with its content.
    Fetched(ArtifactPayload),
    /// A failed fetch attempt for this kind.
    Failed(ArtifactKind),
}

impl ArtifactUpdate {
    /// Artifact kind this update targets.
    #[must_use]
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Fetched(payload) => payload.kind(),
            Self::Failed(kind) => *kind,
        }
    }
}

type WriteLocks = DashMap<(String, ArtifactKind), Arc<Mutex<()>>>;

/// Held (paper, kind) write lock. On drop the map entry is removed unless
/// another writer still holds or waits on the same lock.
struct WriteGuard<'a> {
    locks: &'a WriteLocks,
    key: (String, ArtifactKind),
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Per-dataset persistence for paper records and artifacts.
#[derive(Debug, Clone)]
pub struct Store {
    db: Database,
    dataset: Dataset,
    write_locks: Arc<WriteLocks>,
}

impl Store {
    /// Opens (creating if needed) the store for `dataset` on disk.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ArtifactIo`] if the dataset directories cannot be
    /// created, or [`StoreError::StorageUnavailable`] if the database cannot be
    /// opened or migrated.
    #[instrument(skip(dataset, options), fields(conference = %dataset.conference(), year = dataset.year()))]
    pub async fn open(dataset: Dataset, options: DatabaseOptions) -> Result<Self> {
        dataset.ensure_dirs().map_err(dataset_error)?;
        let db = Database::new_with_options(&dataset.db_path(), options).await?;
        debug!(path = %dataset.db_path().display(), "store opened");
        Ok(Self::with_database(db, dataset))
    }

    /// Wraps an already-open database (used with in-memory databases in tests).
    #[must_use]
    pub fn with_database(db: Database, dataset: Dataset) -> Self {
        Self {
            db,
            dataset,
            write_locks: Arc::new(DashMap::new()),
        }
    }

    /// The dataset this store persists.
    #[must_use]
    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Inserts new records and refreshes listing fields of existing ones.
    ///
    /// The batch is applied in one transaction: either every record lands or
    /// none does. Duplicate identities within the batch collapse to the last
    /// occurrence. Artifact fields are never read from `records` nor modified.
    /// URLs already stored are kept when the incoming listing omits them.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WrongDataset`] if a record belongs to another
    /// dataset (nothing is written), or [`StoreError::StorageUnavailable`] if
    /// the transaction fails.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn upsert_listing(&self, records: &[PaperRecord]) -> Result<UpsertSummary> {
        let mut unique: BTreeMap<&str, &PaperRecord> = BTreeMap::new();
        for record in records {
            if !self.dataset.contains(&record.key) {
                return Err(StoreError::WrongDataset {
                    key: record.key.clone(),
                    conference: self.dataset.conference().to_string(),
                    year: self.dataset.year(),
                });
            }
            unique.insert(record.key.source_id.as_str(), record);
        }

        let mut summary = UpsertSummary::default();
        if unique.is_empty() {
            return Ok(summary);
        }

        let mut tx = self.db.pool().begin().await?;
        for record in unique.values() {
            let authors = encode_json_list(&record.authors)?;
            let keywords = encode_json_list(&record.keywords)?;

            // Writing first keeps the transaction from holding a stale read snapshot.
            let inserted = sqlx::query(
                r"INSERT INTO papers (
                    conference, year, source_id, title, authors, keywords,
                    detail_url, pdf_url, bib_url
                  )
                  VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                  ON CONFLICT (conference, year, source_id) DO NOTHING",
            )
            .bind(&record.key.conference)
            .bind(i64::from(record.key.year))
            .bind(&record.key.source_id)
            .bind(&record.title)
            .bind(&authors)
            .bind(&keywords)
            .bind(record.detail_url.as_deref())
            .bind(record.pdf_url.as_deref())
            .bind(record.bib_url.as_deref())
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if inserted > 0 {
                summary.inserted += 1;
                continue;
            }

            let updated = sqlx::query(
                r"UPDATE papers
                  SET title = ?4,
                      authors = ?5,
                      keywords = ?6,
                      detail_url = COALESCE(?7, detail_url),
                      pdf_url = COALESCE(?8, pdf_url),
                      bib_url = COALESCE(?9, bib_url),
                      listing_updated_at = datetime('now')
                  WHERE conference = ?1 AND year = ?2 AND source_id = ?3
                    AND (
                      title IS NOT ?4
                      OR authors IS NOT ?5
                      OR keywords IS NOT ?6
                      OR (?7 IS NOT NULL AND detail_url IS NOT ?7)
                      OR (?8 IS NOT NULL AND pdf_url IS NOT ?8)
                      OR (?9 IS NOT NULL AND bib_url IS NOT ?9)
                    )",
            )
            .bind(&record.key.conference)
            .bind(i64::from(record.key.year))
            .bind(&record.key.source_id)
            .bind(&record.title)
            .bind(&authors)
            .bind(&keywords)
            .bind(record.detail_url.as_deref())
            .bind(record.pdf_url.as_deref())
            .bind(record.bib_url.as_deref())
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if updated > 0 {
                summary.updated += 1;
            } else {
                summary.unchanged += 1;
            }
        }
        tx.commit().await?;

        info!(
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            "listing upserted"
        );
        Ok(summary)
    }

    /// Records the outcome of one artifact fetch.
    ///
    /// A [`ArtifactUpdate::Fetched`] payload is persisted first (file-backed
    /// kinds are written under the dataset tree) and then the status becomes
    /// `Fetched`. A [`ArtifactUpdate::Failed`] marks the artifact `Failed`
    /// unless it is already `Fetched`, in which case the earlier content is
    /// kept as is.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::RecordNotFound`] for an unknown identity,
    /// [`StoreError::InvalidPayload`] for an empty payload,
    /// [`StoreError::WrongDataset`] for a key from another dataset, and
    /// [`StoreError::ArtifactIo`] / [`StoreError::StorageUnavailable`] when the
    /// write itself fails.
    #[instrument(skip(self, update), fields(key = %key, kind = %update.kind()))]
    pub async fn mark_artifact(&self, key: &PaperKey, update: ArtifactUpdate) -> Result<()> {
        if !self.dataset.contains(key) {
            return Err(StoreError::WrongDataset {
                key: key.clone(),
                conference: self.dataset.conference().to_string(),
                year: self.dataset.year(),
            });
        }
        let kind = update.kind();
        if let ArtifactUpdate::Fetched(payload) = &update
            && payload.is_empty()
        {
            return Err(StoreError::InvalidPayload {
                key: key.clone(),
                reason: format!("empty {kind} content"),
            });
        }

        let _guard = self.write_lock(&key.source_id, kind).await;

        match update {
            ArtifactUpdate::Failed(_) => {
                let result = sqlx::query(failed_sql(kind))
                    .bind(&key.conference)
                    .bind(i64::from(key.year))
                    .bind(&key.source_id)
                    .execute(self.db.pool())
                    .await?;
                check_affected(key, result.rows_affected())
            }
            ArtifactUpdate::Fetched(ArtifactPayload::Abstract(text)) => {
                let result = sqlx::query(
                    r"UPDATE papers
                      SET abstract = ?, abstract_status = 'fetched',
                          artifact_updated_at = datetime('now')
                      WHERE conference = ? AND year = ? AND source_id = ?",
                )
                .bind(text.trim())
                .bind(&key.conference)
                .bind(i64::from(key.year))
                .bind(&key.source_id)
                .execute(self.db.pool())
                .await?;
                check_affected(key, result.rows_affected())
            }
            ArtifactUpdate::Fetched(ArtifactPayload::Pdf(bytes)) => {
                self.store_file(key, ArtifactKind::Pdf, &bytes).await
            }
            ArtifactUpdate::Fetched(ArtifactPayload::Bib(text)) => {
                self.store_file(key, ArtifactKind::Bib, text.trim().as_bytes())
                    .await
            }
        }
    }

    /// Returns every record of `conference`/`year`, ordered by title then source id.
    ///
    /// Each record reflects a committed state; concurrent artifact writes are
    /// either fully visible or not at all.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageUnavailable`] if the query or decoding fails.
    #[instrument(skip(self))]
    pub async fn query(&self, conference: &str, year: u16) -> Result<Vec<PaperRecord>> {
        let rows = sqlx::query_as::<_, PaperRow>(
            r"SELECT * FROM papers
              WHERE conference = ? AND year = ?
              ORDER BY title COLLATE NOCASE ASC, source_id ASC",
        )
        .bind(conference)
        .bind(i64::from(year))
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(PaperRecord::try_from).collect()
    }

    /// Returns every record of this store's dataset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageUnavailable`] if the query or decoding fails.
    pub async fn records(&self) -> Result<Vec<PaperRecord>> {
        self.query(self.dataset.conference(), self.dataset.year())
            .await
    }

    /// Looks up one record by identity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageUnavailable`] if the query or decoding fails.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn get(&self, key: &PaperKey) -> Result<Option<PaperRecord>> {
        let row = sqlx::query_as::<_, PaperRow>(
            r"SELECT * FROM papers WHERE conference = ? AND year = ? AND source_id = ?",
        )
        .bind(&key.conference)
        .bind(i64::from(key.year))
        .bind(&key.source_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(PaperRecord::try_from).transpose()
    }

    /// Counts records in this dataset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageUnavailable`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count(&self) -> Result<i64> {
        let row = sqlx::query(
            r"SELECT COUNT(*) as count FROM papers WHERE conference = ? AND year = ?",
        )
        .bind(self.dataset.conference())
        .bind(i64::from(self.dataset.year()))
        .fetch_one(self.db.pool())
        .await?;

        Ok(row.get("count"))
    }

    /// Resets `Fetched` PDF/BibTeX artifacts whose file has disappeared.
    ///
    /// Such artifacts go back to `Missing` with no path so they are fetched
    /// again. Returns how many artifacts were reset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StorageUnavailable`] if a query fails.
    #[instrument(skip(self))]
    pub async fn reconcile_artifacts(&self) -> Result<usize> {
        let mut reset = 0;
        for record in self.records().await? {
            for kind in [ArtifactKind::Pdf, ArtifactKind::Bib] {
                if record.status(kind) != ArtifactStatus::Fetched {
                    continue;
                }
                if let Some(path) = record.artifact_path(kind)
                    && file_exists(path).await
                {
                    continue;
                }

                let Some(sql) = reset_sql(kind) else {
                    continue;
                };
                let _guard = self.write_lock(&record.key.source_id, kind).await;
                let result = sqlx::query(sql)
                    .bind(&record.key.conference)
                    .bind(i64::from(record.key.year))
                    .bind(&record.key.source_id)
                    .execute(self.db.pool())
                    .await?;
                if result.rows_affected() > 0 {
                    warn!(key = %record.key, %kind, "artifact file missing, reset to missing");
                    reset += 1;
                }
            }
        }
        Ok(reset)
    }

    /// Closes the underlying connection pool.
    pub async fn close(self) {
        self.db.close().await;
    }

    async fn write_lock(&self, source_id: &str, kind: ArtifactKind) -> WriteGuard<'_> {
        let key = (source_id.to_string(), kind);
        let lock = self
            .write_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        WriteGuard {
            locks: &self.write_locks,
            key,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Writes a file-backed artifact and flips its status. Caller holds the write lock.
    async fn store_file(&self, key: &PaperKey, kind: ArtifactKind, content: &[u8]) -> Result<()> {
        let exists = sqlx::query(
            r"SELECT COUNT(*) as count FROM papers
              WHERE conference = ? AND year = ? AND source_id = ?",
        )
        .bind(&key.conference)
        .bind(i64::from(key.year))
        .bind(&key.source_id)
        .fetch_one(self.db.pool())
        .await?
        .get::<i64, _>("count");
        if exists == 0 {
            return Err(StoreError::RecordNotFound(key.clone()));
        }

        let (Some(path), Some(sql)) = (
            self.dataset.artifact_path(kind, &key.source_id),
            fetched_file_sql(kind),
        ) else {
            return Err(StoreError::InvalidPayload {
                key: key.clone(),
                reason: format!("{kind} is not file-backed"),
            });
        };
        write_atomically(&path, content).await?;

        let result = sqlx::query(sql)
            .bind(path.to_string_lossy().as_ref())
            .bind(&key.conference)
            .bind(i64::from(key.year))
            .bind(&key.source_id)
            .execute(self.db.pool())
            .await?;
        debug!(path = %path.display(), bytes = content.len(), "artifact stored");
        check_affected(key, result.rows_affected())
    }
}

/// Status flip for a stored file; `None` for kinds kept in the row.
fn fetched_file_sql(kind: ArtifactKind) -> Option<&'static str> {
    match kind {
        ArtifactKind::Pdf => Some(
            r"UPDATE papers
              SET pdf_path = ?, pdf_status = 'fetched', artifact_updated_at = datetime('now')
              WHERE conference = ? AND year = ? AND source_id = ?",
        ),
        ArtifactKind::Bib => Some(
            r"UPDATE papers
              SET bib_path = ?, bib_status = 'fetched', artifact_updated_at = datetime('now')
              WHERE conference = ? AND year = ? AND source_id = ?",
        ),
        ArtifactKind::Abstract => None,
    }
}

fn failed_sql(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Abstract => {
            r"UPDATE papers
              SET abstract_status = CASE WHEN abstract_status = 'fetched' THEN 'fetched' ELSE 'failed' END,
                  artifact_updated_at = datetime('now')
              WHERE conference = ? AND year = ? AND source_id = ?"
        }
        ArtifactKind::Pdf => {
            r"UPDATE papers
              SET pdf_status = CASE WHEN pdf_status = 'fetched' THEN 'fetched' ELSE 'failed' END,
                  artifact_updated_at = datetime('now')
              WHERE conference = ? AND year = ? AND source_id = ?"
        }
        ArtifactKind::Bib => {
            r"UPDATE papers
              SET bib_status = CASE WHEN bib_status = 'fetched' THEN 'fetched' ELSE 'failed' END,
                  artifact_updated_at = datetime('now')
              WHERE conference = ? AND year = ? AND source_id = ?"
        }
    }
}

fn reset_sql(kind: ArtifactKind) -> Option<&'static str> {
    match kind {
        ArtifactKind::Pdf => Some(
            r"UPDATE papers
              SET pdf_status = 'missing', pdf_path = NULL, artifact_updated_at = datetime('now')
              WHERE conference = ? AND year = ? AND source_id = ? AND pdf_status = 'fetched'",
        ),
        ArtifactKind::Bib => Some(
            r"UPDATE papers
              SET bib_status = 'missing', bib_path = NULL, artifact_updated_at = datetime('now')
              WHERE conference = ? AND year = ? AND source_id = ? AND bib_status = 'fetched'",
        ),
        ArtifactKind::Abstract => None,
    }
}

/// Writes `content` to `<path>.part` and renames it over `path`.
async fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| StoreError::ArtifactIo { path, source }
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(io_err(parent))?;
    }

    let mut part = path.as_os_str().to_owned();
    part.push(".part");
    let part = PathBuf::from(part);

    if let Err(source) = tokio::fs::write(&part, content).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(StoreError::ArtifactIo { path: part, source });
    }
    tokio::fs::rename(&part, path).await.map_err(io_err(path))
}

async fn file_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

fn dataset_error(err: DatasetError) -> StoreError {
    match err {
        DatasetError::Io { path, source } => StoreError::ArtifactIo { path, source },
        other => StoreError::StorageUnavailable {
            kind: StorageErrorKind::Other,
            message: other.to_string(),
        },
    }
}
