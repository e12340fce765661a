//! Normalized paper records and the artifact status vocabulary.
//!
//! Every other module speaks in terms of [`PaperRecord`]: adapters produce
//! them from listings, the store persists them, the filter engine evaluates
//! them and the fetch manager updates their artifact columns.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Identity of a paper: unique within the whole store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PaperKey {
    /// Conference slug (e.g. `neurips`).
    pub conference: String,
    /// Proceedings year.
    pub year: u16,
    /// Source-specific paper identifier.
    pub source_id: String,
}

impl PaperKey {
    /// Creates a new key.
    #[must_use]
    pub fn new(conference: impl Into<String>, year: u16, source_id: impl Into<String>) -> Self {
        Self {
            conference: conference.into(),
            year,
            source_id: source_id.into(),
        }
    }
}

impl fmt::Display for PaperKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.conference, self.year, self.source_id)
    }
}

/// Kind of auxiliary artifact fetched per paper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Abstract text, stored inline.
    Abstract,
    /// PDF file, stored under the dataset's `pdf/` directory.
    Pdf,
    /// BibTeX entry, stored under the dataset's `bib/` directory.
    Bib,
}

impl ArtifactKind {
    /// All artifact kinds, in display order.
    pub const ALL: [Self; 3] = [Self::Abstract, Self::Pdf, Self::Bib];

    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Abstract => "abstract",
            Self::Pdf => "pdf",
            Self::Bib => "bib",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abstract" | "abstracts" => Ok(Self::Abstract),
            "pdf" | "pdfs" => Ok(Self::Pdf),
            "bib" | "bibtex" => Ok(Self::Bib),
            other => Err(format!("invalid artifact kind: {other}")),
        }
    }
}

/// Per-artifact fetch status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// Never fetched.
    #[default]
    Missing,
    /// Fetched successfully; content or path is present.
    Fetched,
    /// Last attempt failed; eligible for retry.
    Failed,
}

impl ArtifactStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Fetched => "fetched",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ArtifactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "missing" => Ok(Self::Missing),
            "fetched" => Ok(Self::Fetched),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid artifact status: {s}")),
        }
    }
}

/// Content produced by a successful artifact fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactPayload {
    /// Abstract text.
    Abstract(String),
    /// Raw PDF bytes.
    Pdf(Vec<u8>),
    /// BibTeX entry text.
    Bib(String),
}

impl ArtifactPayload {
    /// Returns the artifact kind this payload belongs to.
    #[must_use]
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Abstract(_) => ArtifactKind::Abstract,
            Self::Pdf(_) => ArtifactKind::Pdf,
            Self::Bib(_) => ArtifactKind::Bib,
        }
    }

    /// Returns true when the payload carries no content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Abstract(text) | Self::Bib(text) => text.trim().is_empty(),
            Self::Pdf(bytes) => bytes.is_empty(),
        }
    }
}

/// A conference paper with listing fields and artifact state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRecord {
    /// Unique identity.
    pub key: PaperKey,
    /// Paper title.
    pub title: String,
    /// Authors in listing order.
    pub authors: Vec<String>,
    /// Keywords (deduplicated, sorted).
    pub keywords: BTreeSet<String>,
    /// Detail page on the source site.
    pub detail_url: Option<String>,
    /// Direct PDF link when the listing provides one.
    pub pdf_url: Option<String>,
    /// Direct BibTeX link when the listing provides one.
    pub bib_url: Option<String>,
    /// Abstract text, present once fetched.
    pub abstract_text: Option<String>,
    /// Abstract fetch status.
    pub abstract_status: ArtifactStatus,
    /// PDF fetch status.
    pub pdf_status: ArtifactStatus,
    /// Local PDF path when fetched.
    pub pdf_path: Option<PathBuf>,
    /// BibTeX fetch status.
    pub bib_status: ArtifactStatus,
    /// Local BibTeX path when fetched.
    pub bib_path: Option<PathBuf>,
}

impl PaperRecord {
    /// Creates a listing-only record; every artifact starts `Missing`.
    #[must_use]
    pub fn new(key: PaperKey, title: impl Into<String>) -> Self {
        Self {
            key,
            title: title.into(),
            authors: Vec::new(),
            keywords: BTreeSet::new(),
            detail_url: None,
            pdf_url: None,
            bib_url: None,
            abstract_text: None,
            abstract_status: ArtifactStatus::Missing,
            pdf_status: ArtifactStatus::Missing,
            pdf_path: None,
            bib_status: ArtifactStatus::Missing,
            bib_path: None,
        }
    }

    /// Sets authors, dropping blank entries.
    #[must_use]
    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors
            .into_iter()
            .map(Into::into)
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        self
    }

    /// Sets keywords, dropping blank entries.
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords
            .into_iter()
            .map(Into::into)
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        self
    }

    /// Sets the detail page URL.
    #[must_use]
    pub fn with_detail_url(mut self, url: impl Into<String>) -> Self {
        self.detail_url = Some(url.into());
        self
    }

    /// Sets the PDF source URL.
    #[must_use]
    pub fn with_pdf_url(mut self, url: impl Into<String>) -> Self {
        self.pdf_url = Some(url.into());
        self
    }

    /// Sets the BibTeX source URL.
    #[must_use]
    pub fn with_bib_url(mut self, url: impl Into<String>) -> Self {
        self.bib_url = Some(url.into());
        self
    }

    /// Returns the status of one artifact.
    #[must_use]
    pub fn status(&self, kind: ArtifactKind) -> ArtifactStatus {
        match kind {
            ArtifactKind::Abstract => self.abstract_status,
            ArtifactKind::Pdf => self.pdf_status,
            ArtifactKind::Bib => self.bib_status,
        }
    }

    /// Returns the local file for file-backed artifacts.
    #[must_use]
    pub fn artifact_path(&self, kind: ArtifactKind) -> Option<&PathBuf> {
        match kind {
            ArtifactKind::Abstract => None,
            ArtifactKind::Pdf => self.pdf_path.as_ref(),
            ArtifactKind::Bib => self.bib_path.as_ref(),
        }
    }

    /// Returns true if the artifact still needs fetching.
    #[must_use]
    pub fn needs(&self, kind: ArtifactKind) -> bool {
        self.status(kind) != ArtifactStatus::Fetched
    }
}
