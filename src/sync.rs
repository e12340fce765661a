//! Sync engine: pulls a year's listing from an adapter into a store.
//!
//! Sync only ever writes listing fields. A failed listing leaves the stored
//! dataset exactly as it was, and an unpublished year is an empty success.

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::record::PaperRecord;
use crate::source::{SourceAdapter, SourceError};
use crate::store::{Store, StoreError, UpsertSummary};

/// Errors that abort a sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The adapter serves a different conference than the dataset.
    #[error(
        "adapter '{adapter}' cannot sync dataset '{dataset}'\n  Suggestion: Pick the adapter whose slug matches the dataset conference"
    )]
    AdapterMismatch {
        /// Adapter slug.
        adapter: String,
        /// Dataset conference slug.
        dataset: String,
    },

    /// The listing could not be obtained; stored data is untouched.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The listing could not be persisted; no record was written.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a sync changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records returned by the adapter.
    pub listed: usize,
    /// Records dropped because they belonged to another dataset.
    pub skipped: usize,
    /// Upsert counts.
    pub upsert: UpsertSummary,
    /// True when the year has no published listing yet.
    pub empty_year: bool,
}

impl SyncReport {
    /// True when the sync changed stored state.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.upsert.inserted + self.upsert.updated > 0
    }
}

/// Lists the store's dataset year through `adapter` and merges it in.
///
/// Idempotent: re-running against an unchanged listing reports every record
/// as unchanged and leaves the snapshot identical.
///
/// # Errors
///
/// Returns [`SyncError::AdapterMismatch`] if the adapter slug differs from the
/// dataset conference, [`SyncError::Source`] when the listing is unavailable,
/// and [`SyncError::Store`] when the upsert fails.
#[instrument(skip(adapter, store), fields(site = adapter.slug(), year = store.dataset().year()))]
pub async fn sync(adapter: &dyn SourceAdapter, store: &Store) -> Result<SyncReport, SyncError> {
    let dataset = store.dataset();
    if adapter.slug() != dataset.conference() {
        return Err(SyncError::AdapterMismatch {
            adapter: adapter.slug().to_string(),
            dataset: dataset.conference().to_string(),
        });
    }

    let listed = match adapter.list_papers(dataset.year()).await {
        Ok(records) => records,
        Err(SourceError::EmptyYear { .. }) => {
            info!("no published listing yet");
            return Ok(SyncReport {
                empty_year: true,
                ..SyncReport::default()
            });
        }
        Err(error) => {
            warn!(%error, "listing failed, stored data left untouched");
            return Err(error.into());
        }
    };

    let total = listed.len();
    let records: Vec<PaperRecord> = listed
        .into_iter()
        .filter(|record| {
            let ok = dataset.contains(&record.key);
            if !ok {
                warn!(key = %record.key, "adapter returned a record outside the dataset");
            }
            ok
        })
        .map(listing_only)
        .collect();
    let skipped = total - records.len();

    let upsert = store.upsert_listing(&records).await?;
    info!(
        listed = total,
        inserted = upsert.inserted,
        updated = upsert.updated,
        unchanged = upsert.unchanged,
        "sync complete"
    );
    Ok(SyncReport {
        listed: total,
        skipped,
        upsert,
        empty_year: false,
    })
}

/// Strips anything an adapter may have set beyond the listing fields.
fn listing_only(record: PaperRecord) -> PaperRecord {
    let mut clean = PaperRecord::new(record.key, record.title);
    clean.authors = record.authors;
    clean.keywords = record.keywords;
    clean.detail_url = record.detail_url;
    clean.pdf_url = record.pdf_url;
    clean.bib_url = record.bib_url;
    clean
}
