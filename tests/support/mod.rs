//! Shared helpers for integration tests: an in-memory adapter and temp datasets.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use paperspider_core::{
    Dataset, DatabaseOptions, PaperKey, PaperRecord, SourceAdapter, SourceError, Store, Throttle,
};
use tempfile::TempDir;
use tokio::time::Instant;

/// Adapter serving a fixed listing and synthetic artifacts.
pub struct MockSource {
    slug: String,
    listing: Mutex<Result<Vec<PaperRecord>, SourceError>>,
    not_found: HashSet<String>,
    unavailable: HashSet<String>,
    delay: Duration,
    /// Calls after this many never return (until dropped by cancellation).
    block_after: Option<usize>,
    calls: AtomicUsize,
    starts: Mutex<Vec<Instant>>,
}

impl MockSource {
    pub fn new(slug: &str) -> Self {
        Self {
            slug: slug.to_string(),
            listing: Mutex::new(Ok(Vec::new())),
            not_found: HashSet::new(),
            unavailable: HashSet::new(),
            delay: Duration::ZERO,
            block_after: None,
            calls: AtomicUsize::new(0),
            starts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_listing(self, records: Vec<PaperRecord>) -> Self {
        self.set_listing(Ok(records));
        self
    }

    pub fn set_listing(&self, listing: Result<Vec<PaperRecord>, SourceError>) {
        *self.listing.lock().unwrap() = listing;
    }

    pub fn with_not_found(mut self, source_id: &str) -> Self {
        self.not_found.insert(source_id.to_string());
        self
    }

    pub fn with_unavailable(mut self, source_id: &str) -> Self {
        self.unavailable.insert(source_id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn blocking_after(mut self, calls: usize) -> Self {
        self.block_after = Some(calls);
        self
    }

    /// Artifact calls started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Instants at which each artifact call passed the request gate, in call order.
    pub fn starts(&self) -> Vec<Instant> {
        self.starts.lock().unwrap().clone()
    }

    async fn begin(&self, record: &PaperRecord, gate: &Throttle) -> Result<(), SourceError> {
        gate.acquire().await;
        self.starts.lock().unwrap().push(Instant::now());
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.block_after.is_some_and(|limit| call >= limit) {
            std::future::pending::<()>().await;
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let id = &record.key.source_id;
        if self.not_found.contains(id) {
            return Err(SourceError::not_found(&self.slug, "artifact", record.key.to_string()));
        }
        if self.unavailable.contains(id) {
            return Err(SourceError::unavailable(&self.slug, "simulated outage"));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    fn slug(&self) -> &str {
        &self.slug
    }

    fn name(&self) -> &str {
        "Mock"
    }

    async fn list_papers(&self, _year: u16) -> Result<Vec<PaperRecord>, SourceError> {
        self.listing.lock().unwrap().clone()
    }

    async fn fetch_abstract(&self, record: &PaperRecord, gate: &Throttle) -> Result<String, SourceError> {
        self.begin(record, gate).await?;
        Ok(format!("Abstract of {}", record.title))
    }

    async fn fetch_pdf_bytes(&self, record: &PaperRecord, gate: &Throttle) -> Result<Vec<u8>, SourceError> {
        self.begin(record, gate).await?;
        Ok(format!("%PDF-1.7 {}", record.key.source_id).into_bytes())
    }

    async fn fetch_bibtex(&self, record: &PaperRecord, gate: &Throttle) -> Result<String, SourceError> {
        self.begin(record, gate).await?;
        Ok(format!("@inproceedings{{{},\n  title = {{{}}}\n}}", record.key.source_id, record.title))
    }
}

/// Listing record for `neurips/2024/<id>`.
pub fn paper(id: &str, title: &str) -> PaperRecord {
    PaperRecord::new(PaperKey::new("neurips", 2024, id), title)
        .with_detail_url(format!("https://example.org/{id}.html"))
}

/// `n` listing records `p0..p{n-1}`.
pub fn papers(n: usize) -> Vec<PaperRecord> {
    (0..n)
        .map(|i| paper(&format!("p{i}"), &format!("Paper {i}")))
        .collect()
}

/// File-backed `neurips/2024` store in a fresh temp directory.
pub async fn temp_store() -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    let dataset = Dataset::new(dir.path(), "neurips", 2024).unwrap();
    let store = Store::open(dataset, DatabaseOptions::default()).await.unwrap();
    (dir, store)
}
