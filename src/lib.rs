//! Paperspider Core Library
//!
//! Builds local, per-(conference, year) datasets of paper metadata and
//! fetches abstracts, PDFs and BibTeX entries for them, politely and
//! concurrently.
//!
//! # Architecture
//!
//! - [`record`] - Paper identity, listing fields and artifact state
//! - [`dataset`] - Dataset scope and on-disk layout
//! - [`db`] - Database connection and schema management
//! - [`store`] - Durable per-dataset record store
//! - [`source`] - Per-conference adapters behind one async trait
//! - [`sync`] - Listing sync from an adapter into a store
//! - [`fetch`] - Concurrent, throttled, cancellable artifact batches
//! - [`filter`] - Boolean keyword filtering
//! - [`export`] - CSV/JSON/plain-text rendering
//! - [`config`] - Optional TOML defaults

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dataset;
pub mod db;
pub mod export;
pub mod fetch;
pub mod filter;
pub mod record;
pub mod source;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use config::{ConfigError, FileConfig, LoadedConfig, load_default_file_config};
pub use dataset::{Dataset, DatasetError, file_stem_for};
pub use db::{Database, DatabaseOptions, DbError};
pub use export::{ExportError, ExportField, ExportFormat, render};
pub use fetch::{
    BatchHandle, BatchSummary, DEFAULT_CONCURRENCY, FailureKind, FetchError, FetchManager,
    FetchProgress, JobOutcome, Throttle,
};
pub use filter::{ClauseRole, FilterField, FilterRule, FilterSet, MatchMode, evaluate};
pub use record::{ArtifactKind, ArtifactPayload, ArtifactStatus, PaperKey, PaperRecord};
pub use source::{
    HttpSettings, IclrSource, IcmlSource, NeuripsSource, SourceAdapter, SourceError,
    SourceRegistry,
};
pub use store::{ArtifactUpdate, StorageErrorKind, Store, StoreError, UpsertSummary};
pub use sync::{SyncError, SyncReport, sync};
