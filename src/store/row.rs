//! Row mapping between the `papers` table and [`PaperRecord`].

use std::collections::BTreeSet;
use std::path::PathBuf;

use sqlx::FromRow;

use super::StoreError;
use crate::record::{ArtifactStatus, PaperKey, PaperRecord};

/// Raw `papers` row as stored by `SQLite`.
#[derive(Debug, Clone, FromRow)]
pub(super) struct PaperRow {
    pub conference: String,
    pub year: i64,
    pub source_id: String,
    pub title: String,
    /// JSON array of author names.
    pub authors: String,
    /// JSON array of keywords.
    pub keywords: String,
    pub detail_url: Option<String>,
    pub pdf_url: Option<String>,
    pub bib_url: Option<String>,
    #[sqlx(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub abstract_status: String,
    pub pdf_status: String,
    pub pdf_path: Option<String>,
    pub bib_status: String,
    pub bib_path: Option<String>,
}

impl TryFrom<PaperRow> for PaperRecord {
    type Error = StoreError;

    fn try_from(row: PaperRow) -> Result<Self, Self::Error> {
        let year = u16::try_from(row.year)
            .map_err(|_| StoreError::decode(format!("year out of range: {}", row.year)))?;
        let authors: Vec<String> = decode_json_list(&row.authors, "authors")?;
        let keywords: BTreeSet<String> = decode_json_list::<Vec<String>>(&row.keywords, "keywords")?
            .into_iter()
            .collect();

        Ok(Self {
            key: PaperKey::new(row.conference, year, row.source_id),
            title: row.title,
            authors,
            keywords,
            detail_url: row.detail_url,
            pdf_url: row.pdf_url,
            bib_url: row.bib_url,
            abstract_text: row.abstract_text,
            abstract_status: decode_status(&row.abstract_status)?,
            pdf_status: decode_status(&row.pdf_status)?,
            pdf_path: row.pdf_path.map(PathBuf::from),
            bib_status: decode_status(&row.bib_status)?,
            bib_path: row.bib_path.map(PathBuf::from),
        })
    }
}

fn decode_status(raw: &str) -> Result<ArtifactStatus, StoreError> {
    raw.parse().map_err(StoreError::decode)
}

fn decode_json_list<T: serde::de::DeserializeOwned>(raw: &str, column: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw)
        .map_err(|e| StoreError::decode(format!("invalid JSON in `{column}` column: {e}")))
}

/// Encodes a list column as a JSON array.
pub(super) fn encode_json_list<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::decode(format!("encode failed: {e}")))
}
