//! Rendering selected records as CSV, JSON or a plain title list.
//!
//! Pure formatting: nothing here touches the store or the network.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::record::PaperRecord;

/// Errors from [`render`].
#[derive(Debug, Error)]
pub enum ExportError {
    /// CSV and JSON need at least one field.
    #[error("no export fields selected\n  Suggestion: Select at least one field (e.g. --fields title,authors)")]
    NoFields,

    /// Unknown format name.
    #[error("unsupported export format '{0}': expected csv, json or txt")]
    UnknownFormat(String),

    /// Unknown field name.
    #[error("unknown export field '{0}': expected one of {known}", known = ExportField::names())]
    UnknownField(String),

    /// CSV writer failure.
    #[error("CSV encoding failed: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encoding failure.
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    /// Header plus one row per record.
    #[default]
    Csv,
    /// Pretty-printed array of objects.
    Json,
    /// One title per line.
    Txt,
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "txt" | "text" => Ok(Self::Txt),
            _ => Err(ExportError::UnknownFormat(s.to_string())),
        }
    }
}

/// A column of the export. Columns always come out in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExportField {
    /// Source-assigned paper id.
    SourceId,
    /// Paper title.
    Title,
    /// Authors.
    Authors,
    /// Abstract text, empty when not fetched.
    Abstract,
    /// Keywords.
    Keywords,
    /// Detail page URL.
    DetailUrl,
}

impl ExportField {
    /// Every field in output order.
    pub const ALL: [Self; 6] = [
        Self::SourceId,
        Self::Title,
        Self::Authors,
        Self::Abstract,
        Self::Keywords,
        Self::DetailUrl,
    ];

    /// Column name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceId => "source_id",
            Self::Title => "title",
            Self::Authors => "authors",
            Self::Abstract => "abstract",
            Self::Keywords => "keywords",
            Self::DetailUrl => "detail_url",
        }
    }

    fn names() -> String {
        Self::ALL.map(|f| f.as_str()).join(", ")
    }

    /// Parses a comma-separated field list.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::UnknownField`] for the first unknown name.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, ExportError> {
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::parse)
            .collect()
    }

    fn json_value(self, record: &PaperRecord) -> Value {
        match self {
            Self::Authors => Value::from(record.authors.clone()),
            Self::Keywords => Value::from(record.keywords.iter().cloned().collect::<Vec<_>>()),
            _ => Value::from(self.text(record)),
        }
    }

    fn text(self, record: &PaperRecord) -> String {
        match self {
            Self::SourceId => record.key.source_id.clone(),
            Self::Title => record.title.clone(),
            Self::Authors => record.authors.join("; "),
            Self::Abstract => record.abstract_text.clone().unwrap_or_default(),
            Self::Keywords => record
                .keywords
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join("; "),
            Self::DetailUrl => record.detail_url.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for ExportField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportField {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == wanted || (wanted == "id" && *f == Self::SourceId))
            .ok_or_else(|| ExportError::UnknownField(s.to_string()))
    }
}

/// Renders `records` in `format`.
///
/// `Txt` ignores `fields` and lists non-empty titles. `Json` and `Csv` emit
/// the selected fields in [`ExportField::ALL`] order; authors are a JSON
/// array or a `"; "`-joined CSV cell.
///
/// # Errors
///
/// Returns [`ExportError::NoFields`] when `Json`/`Csv` get no fields.
pub fn render<'a, I>(
    records: I,
    fields: &[ExportField],
    format: ExportFormat,
) -> Result<String, ExportError>
where
    I: IntoIterator<Item = &'a PaperRecord>,
{
    if format == ExportFormat::Txt {
        let titles: Vec<&str> = records
            .into_iter()
            .map(|r| r.title.trim())
            .filter(|t| !t.is_empty())
            .collect();
        return Ok(titles.join("\n"));
    }

    let columns: Vec<ExportField> = ExportField::ALL
        .into_iter()
        .filter(|f| fields.contains(f))
        .collect();
    if columns.is_empty() {
        return Err(ExportError::NoFields);
    }

    if format == ExportFormat::Json {
        let rows: Vec<Value> = records
            .into_iter()
            .map(|record| {
                let object: Map<String, Value> = columns
                    .iter()
                    .map(|f| (f.as_str().to_string(), f.json_value(record)))
                    .collect();
                Value::Object(object)
            })
            .collect();
        return Ok(serde_json::to_string_pretty(&rows)?);
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns.iter().map(ExportField::as_str))?;
    for record in records {
        writer.write_record(columns.iter().map(|f| f.text(record)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Csv(csv::Error::from(e.into_error())))?;
    Ok(String::from_utf8_lossy(&bytes).trim_end().to_string())
}
