//! Error types for store operations.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::db::DbError;
use crate::record::PaperKey;

/// Structured classification for storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Filesystem or transport IO failure.
    Io,
    /// Schema migration failure while opening the store.
    Migration,
    /// A stored value could not be decoded.
    Decode,
    /// Unclassified database failure.
    Other,
}

impl StorageErrorKind {
    /// Classifies a sqlx error.
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => Self::Decode,
            sqlx::Error::Database(database_error) => {
                classify_database_error(database_error.as_ref())
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::Io => "io",
            Self::Migration => "migration",
            Self::Decode => "decode",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(
    database_error: &(dyn sqlx::error::DatabaseError + 'static),
) -> StorageErrorKind {
    let code = database_error.code();
    if matches!(
        code.as_deref(),
        Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
    ) {
        return StorageErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_check_violation()
        || code
            .as_deref()
            .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return StorageErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked") || message.contains("database is busy") {
        return StorageErrorKind::BusyOrLocked;
    }

    StorageErrorKind::Other
}

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Local persistence failed; the write did not land.
    #[error("storage unavailable ({kind}): {message}")]
    StorageUnavailable {
        /// Typed classification.
        kind: StorageErrorKind,
        /// Human-readable error text.
        message: String,
    },

    /// Artifact file could not be written or inspected.
    #[error("storage unavailable (io): artifact file {path}: {source}")]
    ArtifactIo {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// No record with this identity exists.
    #[error(
        "paper not found: {0}\n  Suggestion: Run `paperspider sync` for this dataset first"
    )]
    RecordNotFound(PaperKey),

    /// Record does not belong to the store's dataset.
    #[error("paper {key} does not belong to dataset {conference}/{year}")]
    WrongDataset {
        /// The offending key.
        key: PaperKey,
        /// Store conference.
        conference: String,
        /// Store year.
        year: u16,
    },

    /// Payload kind disagrees with the requested artifact, or is empty.
    #[error("invalid payload for {key}: {reason}")]
    InvalidPayload {
        /// Target record.
        key: PaperKey,
        /// Why the payload was rejected.
        reason: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageUnavailable {
            kind: StorageErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Connection(inner) => inner.into(),
            DbError::Migration(inner) => Self::StorageUnavailable {
                kind: StorageErrorKind::Migration,
                message: inner.to_string(),
            },
        }
    }
}

impl StoreError {
    /// Builds a decode failure for a malformed stored value.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            kind: StorageErrorKind::Decode,
            message: message.into(),
        }
    }

    /// Returns the storage classification when this is a persistence failure.
    #[must_use]
    pub fn storage_kind(&self) -> Option<StorageErrorKind> {
        match self {
            Self::StorageUnavailable { kind, .. } => Some(*kind),
            Self::ArtifactIo { .. } => Some(StorageErrorKind::Io),
            Self::RecordNotFound(_) | Self::WrongDataset { .. } | Self::InvalidPayload { .. } => {
                None
            }
        }
    }

    /// Returns true when the local store itself failed.
    #[must_use]
    pub fn is_storage_unavailable(&self) -> bool {
        self.storage_kind().is_some()
    }
}
