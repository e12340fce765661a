//! Concurrent artifact fetching for one dataset.
//!
//! A [`FetchManager`] turns a selection of records into a batch of jobs (one
//! per record whose artifact is not yet `Fetched`) and drains them with a
//! bounded pool of workers.
//!
//! # Concurrency Model
//!
//! - Workers pull jobs from one shared queue; there is no ordering guarantee
//! - One [`Throttle`] per batch gates every HTTP request the adapter issues,
//!   including the follow-up requests of a multi-step fetch
//! - Results are persisted per job through [`Store::mark_artifact`]
//! - A [`BatchHandle`] cancels cooperatively: no new job starts, in-flight
//!   adapter calls are dropped, and writes that already landed are kept
//!
//! Progress and completion are reported through plain callbacks invoked from
//! worker tasks, so callers must not assume any particular thread.

mod throttle;

pub use throttle::Throttle;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::record::{ArtifactKind, PaperKey, PaperRecord};
use crate::source::{SourceAdapter, SourceError};
use crate::store::{ArtifactUpdate, Store};

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 32;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Error type for fetch manager operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The batch task panicked or was aborted before producing a summary.
    #[error("fetch batch ended abnormally: {0}")]
    BatchPanicked(String),
}

/// Why a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The source has no such artifact; retrying will not help.
    NotFound,
    /// Transport failure, timeout or unrecognized page; worth retrying later.
    SourceUnavailable,
    /// The artifact was fetched but could not be persisted.
    Storage,
}

impl FailureKind {
    fn from_source(error: &SourceError) -> Self {
        if error.is_not_found() {
            Self::NotFound
        } else {
            Self::SourceUnavailable
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotFound => "not found",
            Self::SourceUnavailable => "source unavailable",
            Self::Storage => "storage unavailable",
        };
        f.write_str(label)
    }
}

/// Result of one finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The artifact was fetched and stored.
    Fetched,
    /// The job failed; the artifact is marked `Failed` unless it was already `Fetched`.
    Failed {
        /// Failure class.
        kind: FailureKind,
        /// Human-readable reason.
        message: String,
    },
}

/// Progress event emitted once per finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchProgress {
    /// Paper the job was for.
    pub key: PaperKey,
    /// Artifact kind of the batch.
    pub kind: ArtifactKind,
    /// What happened.
    pub outcome: JobOutcome,
    /// Jobs finished so far, including this one.
    pub finished: usize,
    /// Jobs scheduled in the batch.
    pub total: usize,
}

/// Final counts for a batch.
///
/// `completed + failed + cancelled == scheduled()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Records handed to [`FetchManager::start_batch`].
    pub requested: usize,
    /// Records not scheduled (already fetched, or outside the dataset).
    pub skipped: usize,
    /// Jobs whose artifact reached `Fetched`.
    pub completed: usize,
    /// Jobs that failed.
    pub failed: usize,
    /// Jobs that never finished because the batch was cancelled.
    pub cancelled: usize,
}

impl BatchSummary {
    /// Number of jobs the batch scheduled.
    #[must_use]
    pub fn scheduled(&self) -> usize {
        self.requested - self.skipped
    }

    /// Returns true if cancellation cut the batch short.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.cancelled > 0
    }
}

/// Handle to a running batch.
#[derive(Debug)]
pub struct BatchHandle {
    token: CancellationToken,
    join: JoinHandle<BatchSummary>,
}

impl BatchHandle {
    /// Requests cancellation. Idempotent; a no-op once the batch has finished.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns true once the batch task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// A token that cancels this batch when triggered (for signal handlers).
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Waits for the batch to end and returns its summary.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::BatchPanicked`] if the batch task did not finish
    /// normally.
    pub async fn wait(self) -> Result<BatchSummary, FetchError> {
        self.join
            .await
            .map_err(|e| FetchError::BatchPanicked(e.to_string()))
    }
}

type ProgressFn = Arc<dyn Fn(FetchProgress) + Send + Sync>;

/// Runs fetch batches for one dataset through one adapter.
#[derive(Clone)]
pub struct FetchManager {
    store: Store,
    adapter: Arc<dyn SourceAdapter>,
    concurrency: usize,
}

impl fmt::Debug for FetchManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchManager")
            .field("dataset", self.store.dataset())
            .field("adapter", &self.adapter.slug())
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl FetchManager {
    /// Creates a manager with at most `concurrency` in-flight jobs per batch.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::InvalidConcurrency`] if `concurrency` is outside
    /// `MIN_CONCURRENCY..=MAX_CONCURRENCY`.
    pub fn new(
        store: Store,
        adapter: Arc<dyn SourceAdapter>,
        concurrency: usize,
    ) -> Result<Self, FetchError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(FetchError::InvalidConcurrency { value: concurrency });
        }
        Ok(Self {
            store,
            adapter,
            concurrency,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Starts fetching `kind` for `records` and returns immediately.
    ///
    /// Records already `Fetched` for `kind`, and records from another dataset,
    /// are skipped. `interval` is the minimum spacing between the starts of
    /// any two HTTP requests in the batch. `on_progress` fires once per
    /// finished job; `on_done` fires exactly once with the final counts, also
    /// after cancellation.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[instrument(skip_all, fields(kind = %kind, requested = records.len()))]
    pub fn start_batch<P, D>(
        &self,
        records: Vec<PaperRecord>,
        kind: ArtifactKind,
        interval: Duration,
        on_progress: P,
        on_done: D,
    ) -> BatchHandle
    where
        P: Fn(FetchProgress) + Send + Sync + 'static,
        D: FnOnce(BatchSummary) + Send + 'static,
    {
        let requested = records.len();
        let dataset = self.store.dataset();
        let jobs: VecDeque<PaperRecord> = records
            .into_iter()
            .filter(|record| {
                if !dataset.contains(&record.key) {
                    warn!(key = %record.key, "record outside the dataset, skipping");
                    return false;
                }
                record.needs(kind)
            })
            .collect();
        let total = jobs.len();
        let workers = self.concurrency.min(total);
        info!(scheduled = total, workers, "starting fetch batch");

        let token = CancellationToken::new();
        let context = Arc::new(BatchContext {
            queue: Mutex::new(jobs),
            token: token.clone(),
            throttle: Throttle::new(interval),
            store: self.store.clone(),
            adapter: Arc::clone(&self.adapter),
            kind,
            total,
            on_progress: Arc::new(on_progress),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        });

        let join = tokio::spawn(async move {
            let mut set = JoinSet::new();
            for _ in 0..workers {
                set.spawn(run_worker(Arc::clone(&context)));
            }
            while let Some(joined) = set.join_next().await {
                if let Err(e) = joined {
                    warn!(error = %e, "fetch worker ended abnormally");
                }
            }

            let completed = context.completed.load(Ordering::SeqCst);
            let failed = context.failed.load(Ordering::SeqCst);
            let summary = BatchSummary {
                requested,
                skipped: requested - total,
                completed,
                failed,
                cancelled: total.saturating_sub(completed + failed),
            };
            info!(
                completed = summary.completed,
                failed = summary.failed,
                cancelled = summary.cancelled,
                "fetch batch finished"
            );
            on_done(summary);
            summary
        });

        BatchHandle { token, join }
    }

    /// Cancels a batch started by this manager. Idempotent.
    pub fn cancel(&self, handle: &BatchHandle) {
        handle.cancel();
    }
}

/// State shared by the workers of one batch.
struct BatchContext {
    queue: Mutex<VecDeque<PaperRecord>>,
    token: CancellationToken,
    throttle: Throttle,
    store: Store,
    adapter: Arc<dyn SourceAdapter>,
    kind: ArtifactKind,
    total: usize,
    on_progress: ProgressFn,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl BatchContext {
    async fn next_job(&self) -> Option<PaperRecord> {
        if self.token.is_cancelled() {
            return None;
        }
        self.queue.lock().await.pop_front()
    }

    fn report(&self, key: PaperKey, outcome: JobOutcome) {
        let counter = match outcome {
            JobOutcome::Fetched => &self.completed,
            JobOutcome::Failed { .. } => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        let finished =
            self.completed.load(Ordering::SeqCst) + self.failed.load(Ordering::SeqCst);
        (self.on_progress)(FetchProgress {
            key,
            kind: self.kind,
            outcome,
            finished,
            total: self.total,
        });
    }
}

async fn run_worker(context: Arc<BatchContext>) {
    while let Some(record) = context.next_job().await {
        let fetched = tokio::select! {
            biased;
            () = context.token.cancelled() => {
                debug!(key = %record.key, "fetch interrupted by cancellation");
                break;
            }
            result = context.adapter.fetch_artifact(&record, context.kind, &context.throttle) => result,
        };

        let outcome = match fetched {
            Ok(payload) => {
                match context
                    .store
                    .mark_artifact(&record.key, ArtifactUpdate::Fetched(payload))
                    .await
                {
                    Ok(()) => {
                        debug!(key = %record.key, kind = %context.kind, "artifact stored");
                        JobOutcome::Fetched
                    }
                    Err(e) => {
                        warn!(key = %record.key, error = %e, "failed to store fetched artifact");
                        JobOutcome::Failed {
                            kind: FailureKind::Storage,
                            message: e.to_string(),
                        }
                    }
                }
            }
            Err(error) => {
                info!(key = %record.key, kind = %context.kind, %error, "fetch failed");
                match context
                    .store
                    .mark_artifact(&record.key, ArtifactUpdate::Failed(context.kind))
                    .await
                {
                    Ok(()) => JobOutcome::Failed {
                        kind: FailureKind::from_source(&error),
                        message: error.to_string(),
                    },
                    Err(e) => {
                        warn!(key = %record.key, error = %e, "failed to record fetch failure");
                        JobOutcome::Failed {
                            kind: FailureKind::Storage,
                            message: format!("{e} (after fetch error: {error})"),
                        }
                    }
                }
            }
        };
        context.report(record.key, outcome);
    }
}
