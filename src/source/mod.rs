//! Source adapters: one implementation per conference site.
//!
//! # Architecture
//!
//! - [`SourceAdapter`] - Async trait every site implements (listing plus three artifact fetches)
//! - [`SourceRegistry`] - Slug-keyed collection used by the CLI and sync entry points
//! - [`NeuripsSource`], [`IcmlSource`], [`IclrSource`] - Reference adapters
//! - [`HttpSettings`] - Shared timeouts and User-Agent
//!
//! Adapters hold only read-only configuration, so one instance can serve many
//! concurrent fetch workers.

mod error;
mod html;
mod http;
mod iclr;
mod icml;
mod neurips;

pub use error::SourceError;
pub use http::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_READ_TIMEOUT_SECS, HttpSettings, default_user_agent,
};
pub use iclr::IclrSource;
pub use icml::IcmlSource;
pub use neurips::NeuripsSource;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::fetch::Throttle;
use crate::record::{ArtifactKind, ArtifactPayload, PaperRecord};

/// Trait that every conference adapter implements.
///
/// Artifact fetches take the batch's request gate; implementations pass it
/// to every HTTP request they issue, so a fetch that needs several requests
/// stays within the batch's politeness interval.
///
/// # Object Safety
///
/// This trait uses `async_trait` to support dynamic dispatch via
/// `Arc<dyn SourceAdapter>`. Rust 2024 native async traits are not
/// object-safe, so `async_trait` is required for the registry pattern.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Conference slug (e.g. "neurips"); matches the dataset conference.
    fn slug(&self) -> &str;

    /// Human-readable conference name.
    fn name(&self) -> &str;

    /// Lists a year's papers with listing fields only; artifacts start `Missing`.
    ///
    /// Returns [`SourceError::EmptyYear`] when the year has no published list.
    async fn list_papers(&self, year: u16) -> Result<Vec<PaperRecord>, SourceError>;

    /// Fetches the abstract text.
    async fn fetch_abstract(
        &self,
        record: &PaperRecord,
        gate: &Throttle,
    ) -> Result<String, SourceError>;

    /// Fetches the PDF bytes.
    async fn fetch_pdf_bytes(
        &self,
        record: &PaperRecord,
        gate: &Throttle,
    ) -> Result<Vec<u8>, SourceError>;

    /// Fetches the BibTeX entry.
    async fn fetch_bibtex(&self, record: &PaperRecord, gate: &Throttle)
    -> Result<String, SourceError>;

    /// Fetches one artifact kind, dispatching to the matching method.
    ///
    /// An empty result is reported as [`SourceError::NotFound`].
    async fn fetch_artifact(
        &self,
        record: &PaperRecord,
        kind: ArtifactKind,
        gate: &Throttle,
    ) -> Result<ArtifactPayload, SourceError> {
        let payload = match kind {
            ArtifactKind::Abstract => {
                ArtifactPayload::Abstract(self.fetch_abstract(record, gate).await?)
            }
            ArtifactKind::Pdf => ArtifactPayload::Pdf(self.fetch_pdf_bytes(record, gate).await?),
            ArtifactKind::Bib => ArtifactPayload::Bib(self.fetch_bibtex(record, gate).await?),
        };
        if payload.is_empty() {
            return Err(SourceError::not_found(
                self.slug(),
                kind.as_str(),
                record.key.to_string(),
            ));
        }
        Ok(payload)
    }
}

/// Slug-keyed collection of adapters.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: BTreeMap<String, Arc<dyn SourceAdapter>>,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("slugs", &self.slugs())
            .finish()
    }
}

impl SourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the NeurIPS, ICML and ICLR adapters.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if an adapter's HTTP client cannot be built.
    pub fn with_defaults(settings: &HttpSettings) -> Result<Self, SourceError> {
        let mut registry = Self::new();
        registry.register(Arc::new(NeuripsSource::new(settings)?));
        registry.register(Arc::new(IcmlSource::new(settings)?));
        registry.register(Arc::new(IclrSource::new(settings)?));
        Ok(registry)
    }

    /// Adds or replaces the adapter for its slug.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.slug().to_string(), adapter);
    }

    /// Looks up an adapter by slug.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::UnknownSource`] listing the registered slugs.
    pub fn get(&self, slug: &str) -> Result<Arc<dyn SourceAdapter>, SourceError> {
        self.adapters
            .get(slug)
            .cloned()
            .ok_or_else(|| SourceError::UnknownSource {
                slug: slug.to_string(),
                known: self.slugs().join(", "),
            })
    }

    /// Registered slugs in sorted order.
    #[must_use]
    pub fn slugs(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::PaperKey;

    struct StubSource {
        abstract_text: String,
    }

    #[async_trait]
    impl SourceAdapter for StubSource {
        fn slug(&self) -> &str {
            "stub"
        }

        fn name(&self) -> &str {
            "Stub"
        }

        async fn list_papers(&self, year: u16) -> Result<Vec<PaperRecord>, SourceError> {
            Err(SourceError::empty_year("stub", year))
        }

        async fn fetch_abstract(
            &self,
            _record: &PaperRecord,
            _gate: &Throttle,
        ) -> Result<String, SourceError> {
            Ok(self.abstract_text.clone())
        }

        async fn fetch_pdf_bytes(
            &self,
            _record: &PaperRecord,
            _gate: &Throttle,
        ) -> Result<Vec<u8>, SourceError> {
            Ok(b"%PDF".to_vec())
        }

        async fn fetch_bibtex(
            &self,
            record: &PaperRecord,
            _gate: &Throttle,
        ) -> Result<String, SourceError> {
            Err(SourceError::not_found("stub", "bib", record.key.to_string()))
        }
    }

    fn record() -> PaperRecord {
        PaperRecord::new(PaperKey::new("stub", 2024, "p1"), "Paper")
    }

    #[tokio::test]
    async fn test_fetch_artifact_dispatches_by_kind() {
        let source = StubSource {
            abstract_text: "Text".to_string(),
        };
        let gate = Throttle::disabled();
        assert_eq!(
            source.fetch_artifact(&record(), ArtifactKind::Abstract, &gate).await.unwrap(),
            ArtifactPayload::Abstract("Text".to_string())
        );
        assert_eq!(
            source.fetch_artifact(&record(), ArtifactKind::Pdf, &gate).await.unwrap(),
            ArtifactPayload::Pdf(b"%PDF".to_vec())
        );
        assert!(source
            .fetch_artifact(&record(), ArtifactKind::Bib, &gate)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_fetch_artifact_empty_is_not_found() {
        let source = StubSource {
            abstract_text: "   ".to_string(),
        };
        let err = source
            .fetch_artifact(&record(), ArtifactKind::Abstract, &Throttle::disabled())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_registry_defaults_and_lookup() {
        let registry = SourceRegistry::with_defaults(&HttpSettings::default()).unwrap();
        assert_eq!(registry.slugs(), vec!["iclr", "icml", "neurips"]);
        assert_eq!(registry.get("icml").unwrap().name(), "ICML");

        let err = registry.get("cvpr").err().expect("expected lookup error");
        let msg = err.to_string();
        assert!(msg.contains("cvpr"));
        assert!(msg.contains("iclr, icml, neurips"));
    }

    #[test]
    fn test_register_replaces_same_slug() {
        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(StubSource {
            abstract_text: "a".into(),
        }));
        registry.register(Arc::new(StubSource {
            abstract_text: "b".into(),
        }));
        assert_eq!(registry.slugs(), vec!["stub"]);
    }
}
