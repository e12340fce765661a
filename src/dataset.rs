//! Dataset identity and on-disk layout.
//!
//! A dataset is one (conference, year) partition rooted at
//! `<base_dir>/<conference>/<year>/`:
//!
//! ```text
//! <base_dir>/neurips/2024/papers.sqlite
//! <base_dir>/neurips/2024/pdf/<file-stem>.pdf
//! <base_dir>/neurips/2024/bib/<file-stem>.bib
//! ```
//!
//! The file stem is derived from the source id alone (see [`file_stem_for`]),
//! so artifact paths can be computed without opening the database.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::record::{ArtifactKind, PaperKey};

/// Earliest accepted proceedings year.
pub const YEAR_MIN: u16 = 1980;

/// Latest accepted proceedings year.
pub const YEAR_MAX: u16 = 2100;

/// SQLite file name inside each dataset root.
pub const DB_FILE_NAME: &str = "papers.sqlite";

/// Maximum length of an artifact file stem.
const MAX_STEM_LEN: usize = 120;

/// Errors raised when creating or scanning datasets.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// Conference slug contains unsupported characters.
    #[error(
        "invalid conference slug '{slug}'\n  Suggestion: use lowercase letters, digits, '-' or '_' (e.g. 'neurips')"
    )]
    InvalidConference {
        /// The rejected slug.
        slug: String,
    },

    /// Year outside the supported range.
    #[error("invalid year {year}: must be between {YEAR_MIN} and {YEAR_MAX}")]
    InvalidYear {
        /// The rejected year.
        year: u16,
    },

    /// Filesystem failure while preparing or scanning dataset directories.
    #[error("IO error at {path}: {source}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// A (conference, year) partition with its own store and artifact tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    conference: String,
    year: u16,
    root: PathBuf,
}

impl Dataset {
    /// Creates a dataset handle under `base_dir`. Nothing is written to disk.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::InvalidConference`] or [`DatasetError::InvalidYear`]
    /// when the identity is malformed.
    pub fn new(base_dir: &Path, conference: &str, year: u16) -> Result<Self, DatasetError> {
        if !is_valid_slug(conference) {
            return Err(DatasetError::InvalidConference {
                slug: conference.to_string(),
            });
        }
        if !(YEAR_MIN..=YEAR_MAX).contains(&year) {
            return Err(DatasetError::InvalidYear { year });
        }
        Ok(Self {
            conference: conference.to_string(),
            year,
            root: base_dir.join(conference).join(year.to_string()),
        })
    }

    /// Conference slug.
    #[must_use]
    pub fn conference(&self) -> &str {
        &self.conference
    }

    /// Proceedings year.
    #[must_use]
    pub fn year(&self) -> u16 {
        self.year
    }

    /// Dataset root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the dataset's SQLite file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILE_NAME)
    }

    /// Directory holding PDFs.
    #[must_use]
    pub fn pdf_dir(&self) -> PathBuf {
        self.root.join("pdf")
    }

    /// Directory holding BibTeX entries.
    #[must_use]
    pub fn bib_dir(&self) -> PathBuf {
        self.root.join("bib")
    }

    /// Builds the key for a source id inside this dataset.
    #[must_use]
    pub fn key(&self, source_id: impl Into<String>) -> PaperKey {
        PaperKey::new(self.conference.clone(), self.year, source_id)
    }

    /// Returns true if the key belongs to this dataset.
    #[must_use]
    pub fn contains(&self, key: &PaperKey) -> bool {
        key.conference == self.conference && key.year == self.year
    }

    /// Predictable location of a file-backed artifact; `None` for abstracts.
    #[must_use]
    pub fn artifact_path(&self, kind: ArtifactKind, source_id: &str) -> Option<PathBuf> {
        let stem = file_stem_for(source_id);
        match kind {
            ArtifactKind::Abstract => None,
            ArtifactKind::Pdf => Some(self.pdf_dir().join(format!("{stem}.pdf"))),
            ArtifactKind::Bib => Some(self.bib_dir().join(format!("{stem}.bib"))),
        }
    }

    /// Creates the root, `pdf/` and `bib/` directories.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Io`] if a directory cannot be created.
    pub fn ensure_dirs(&self) -> Result<(), DatasetError> {
        for dir in [self.root.clone(), self.pdf_dir(), self.bib_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| DatasetError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Scans `base_dir` for existing datasets (directories holding a `papers.sqlite`).
    ///
    /// Hidden directories, non-numeric years and years outside the supported range
    /// are skipped. A missing `base_dir` yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::Io`] if an existing directory cannot be read.
    pub fn discover(base_dir: &Path) -> Result<Vec<Self>, DatasetError> {
        if !base_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut datasets = Vec::new();
        for conf_entry in read_dir(base_dir)? {
            let conf_path = conf_entry.path();
            let Some(conference) = conf_entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if conference.starts_with('.') || !conf_path.is_dir() {
                continue;
            }

            for year_entry in read_dir(&conf_path)? {
                let year_path = year_entry.path();
                if !year_path.join(DB_FILE_NAME).is_file() {
                    continue;
                }
                let Some(year) = year_entry
                    .file_name()
                    .to_str()
                    .and_then(|y| y.parse::<u16>().ok())
                else {
                    continue;
                };
                match Self::new(base_dir, &conference, year) {
                    Ok(dataset) => datasets.push(dataset),
                    Err(error) => debug!(path = %year_path.display(), %error, "skipping dataset"),
                }
            }
        }

        datasets.sort_by(|a, b| (&a.conference, a.year).cmp(&(&b.conference, b.year)));
        Ok(datasets)
    }
}

fn read_dir(path: &Path) -> Result<Vec<std::fs::DirEntry>, DatasetError> {
    let io_err = |source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    };
    std::fs::read_dir(path)
        .map_err(io_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)
}

fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Derives a filesystem-safe file stem from a source id.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`, runs of `_` collapse, and
/// leading/trailing `._-` are trimmed. When that changes the id (or the id is
/// longer than the stem limit) an 8-hex digest suffix keeps distinct ids on
/// distinct files. Ids that sanitize to nothing fall back to a digest prefix.
///
/// ```
/// use paperspider_core::dataset::file_stem_for;
///
/// assert_eq!(file_stem_for("abc123"), "abc123");
/// assert!(file_stem_for("a/b c").starts_with("a_b_c-"));
/// ```
#[must_use]
pub fn file_stem_for(source_id: &str) -> String {
    let mut stem = String::with_capacity(source_id.len());
    for c in source_id.chars() {
        let mapped = if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            c
        } else {
            '_'
        };
        if mapped == '_' && stem.ends_with('_') {
            continue;
        }
        stem.push(mapped);
    }

    let stem = stem.trim_matches(is_stem_separator);
    if stem.is_empty() {
        return short_digest(source_id);
    }
    if stem == source_id && stem.len() <= MAX_STEM_LEN {
        return stem.to_string();
    }

    let digest = short_digest(source_id);
    let suffix = &digest[..8];
    let mut head = stem.to_string();
    head.truncate(MAX_STEM_LEN - suffix.len() - 1);
    let head = head.trim_end_matches(is_stem_separator);
    format!("{head}-{suffix}")
}

fn is_stem_separator(c: char) -> bool {
    matches!(c, '.' | '_' | '-')
}

/// First 16 hex characters of the SHA-256 of `input`.
#[must_use]
pub(crate) fn short_digest(input: &str) -> String {
    Sha256::digest(input.as_bytes())
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_layout_paths() {
        let ds = Dataset::new(Path::new("/data"), "neurips", 2024).unwrap();
        assert_eq!(ds.root(), Path::new("/data/neurips/2024"));
        assert_eq!(ds.db_path(), PathBuf::from("/data/neurips/2024/papers.sqlite"));
        assert_eq!(
            ds.artifact_path(ArtifactKind::Pdf, "abc").unwrap(),
            PathBuf::from("/data/neurips/2024/pdf/abc.pdf")
        );
        assert_eq!(
            ds.artifact_path(ArtifactKind::Bib, "abc").unwrap(),
            PathBuf::from("/data/neurips/2024/bib/abc.bib")
        );
        assert!(ds.artifact_path(ArtifactKind::Abstract, "abc").is_none());
    }

    #[test]
    fn test_dataset_rejects_bad_identity() {
        assert!(matches!(
            Dataset::new(Path::new("/d"), "NeurIPS", 2024),
            Err(DatasetError::InvalidConference { .. })
        ));
        assert!(matches!(
            Dataset::new(Path::new("/d"), "../etc", 2024),
            Err(DatasetError::InvalidConference { .. })
        ));
        assert!(matches!(
            Dataset::new(Path::new("/d"), "icml", 1900),
            Err(DatasetError::InvalidYear { year: 1900 })
        ));
    }

    #[test]
    fn test_file_stem_sanitizes_and_collapses() {
        assert!(file_stem_for("  weird/id:*?  ").starts_with("weird_id-"));
        assert!(file_stem_for("__a__b__").starts_with("a_b-"));
        assert_eq!(file_stem_for("paper24a"), "paper24a");
        assert_eq!(file_stem_for("Hyx-Abc_1.v2"), "Hyx-Abc_1.v2");
    }

    #[test]
    fn test_file_stem_keeps_distinct_ids_apart() {
        assert_ne!(file_stem_for("a/b"), file_stem_for("a b"));
        assert_eq!(file_stem_for("a/b"), file_stem_for("a/b"));
    }

    #[test]
    fn test_file_stem_truncates_long_ids() {
        let long = "x".repeat(300);
        let stem = file_stem_for(&long);
        assert_eq!(stem.len(), 120);
        assert_ne!(stem, file_stem_for(&"x".repeat(301)));
    }

    #[test]
    fn test_file_stem_falls_back_to_digest() {
        let stem = file_stem_for("???");
        assert_eq!(stem.len(), 16);
        assert_eq!(stem, file_stem_for("???"));
        assert_ne!(stem, file_stem_for("!!!"));
    }

    #[test]
    fn test_discover_finds_only_populated_datasets() {
        let temp = tempfile::tempdir().unwrap();
        let base = temp.path();

        for (conf, year) in [("neurips", "2024"), ("icml", "2023")] {
            let dir = base.join(conf).join(year);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(DB_FILE_NAME), b"").unwrap();
        }
        std::fs::create_dir_all(base.join("iclr").join("2022")).unwrap();
        std::fs::create_dir_all(base.join(".trash").join("2020")).unwrap();
        std::fs::write(base.join(".trash").join("2020").join(DB_FILE_NAME), b"").unwrap();
        std::fs::create_dir_all(base.join("icml").join("latest")).unwrap();
        std::fs::write(base.join("icml").join("latest").join(DB_FILE_NAME), b"").unwrap();

        let found = Dataset::discover(base).unwrap();
        let ids: Vec<_> = found
            .iter()
            .map(|d| (d.conference().to_string(), d.year()))
            .collect();
        assert_eq!(
            ids,
            vec![("icml".to_string(), 2023), ("neurips".to_string(), 2024)]
        );
    }

    #[test]
    fn test_discover_missing_base_dir_is_empty() {
        let temp = tempfile::tempdir().unwrap();
        let found = Dataset::discover(&temp.path().join("nope")).unwrap();
        assert!(found.is_empty());
    }
}
