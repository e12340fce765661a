//! Error types for source adapters.
//!
//! Follows the What/Why/Fix message pattern used across the project.

use thiserror::Error;

/// Errors that can occur while listing papers or fetching artifacts from a site.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The site could not be reached, timed out, or returned an unrecognized shape.
    #[error("{site} unavailable: {reason}\n  Suggestion: {suggestion}")]
    SourceUnavailable {
        /// Adapter slug.
        site: String,
        /// Why the request failed.
        reason: String,
        /// How to fix the issue.
        suggestion: String,
    },

    /// The site answered but carries no such item.
    #[error("{what} not found for {key} on {site}\n  Suggestion: {suggestion}")]
    NotFound {
        /// Adapter slug.
        site: String,
        /// What was looked for (e.g. "abstract", "PDF link").
        what: String,
        /// Paper key or URL that was looked up.
        key: String,
        /// How to fix the issue.
        suggestion: String,
    },

    /// The year has no published listing yet.
    #[error("{site} has no published papers for {year} yet")]
    EmptyYear {
        /// Adapter slug.
        site: String,
        /// Requested year.
        year: u16,
    },

    /// No adapter is registered for the slug.
    #[error("unknown conference '{slug}'\n  Suggestion: Use one of: {known}")]
    UnknownSource {
        /// Requested slug.
        slug: String,
        /// Comma-separated registered slugs.
        known: String,
    },
}

impl SourceError {
    /// Creates a `SourceUnavailable` error.
    #[must_use]
    pub fn unavailable(site: &str, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            site: site.to_string(),
            reason: reason.into(),
            suggestion: "Check your network connection and retry later".to_string(),
        }
    }

    /// Creates a `SourceUnavailable` error for a page whose layout was not understood.
    #[must_use]
    pub fn unrecognized(site: &str, url: &str) -> Self {
        Self::SourceUnavailable {
            site: site.to_string(),
            reason: format!("unrecognized page layout at {url}"),
            suggestion: "The site layout may have changed; check for a newer paperspider release"
                .to_string(),
        }
    }

    /// Creates a `NotFound` error.
    #[must_use]
    pub fn not_found(site: &str, what: &str, key: impl Into<String>) -> Self {
        Self::NotFound {
            site: site.to_string(),
            what: what.to_string(),
            key: key.into(),
            suggestion: "The site does not publish this item; it will not appear on retry"
                .to_string(),
        }
    }

    /// Creates an `EmptyYear` error.
    #[must_use]
    pub fn empty_year(site: &str, year: u16) -> Self {
        Self::EmptyYear {
            site: site.to_string(),
            year,
        }
    }

    /// Returns true for `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true when re-invoking the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SourceUnavailable { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_message() {
        let err = SourceError::unavailable("neurips", "connection refused");
        let msg = err.to_string();
        assert!(msg.contains("neurips unavailable"));
        assert!(msg.contains("connection refused"));
        assert!(msg.contains("Suggestion"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_not_found_is_terminal() {
        let err = SourceError::not_found("icml", "abstract", "icml/2024/x");
        assert!(err.is_not_found());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("abstract not found for icml/2024/x"));
    }

    #[test]
    fn test_empty_year_message() {
        let err = SourceError::empty_year("iclr", 2031);
        assert_eq!(err.to_string(), "iclr has no published papers for 2031 yet");
    }

    #[test]
    fn test_unrecognized_mentions_url() {
        let err = SourceError::unrecognized("icml", "https://proceedings.mlr.press/v1/");
        assert!(err.to_string().contains("https://proceedings.mlr.press/v1/"));
    }
}
