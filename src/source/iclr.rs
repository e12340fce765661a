//! ICLR adapter backed by the OpenReview notes API.
//!
//! Submissions are located by trying several query shapes in order (the
//! invitation names and venue fields changed between OpenReview API versions),
//! each against every API base. Accepted papers are preferred; a year with no
//! decisions yet falls back to every submission.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use super::html::{fallback_id, split_list};
use super::http::{HttpFetcher, HttpSettings};
use super::{SourceAdapter, SourceError};
use crate::fetch::Throttle;
use crate::record::{PaperKey, PaperRecord};

const SLUG: &str = "iclr";

const DEFAULT_API_BASES: [&str; 2] = ["https://api.openreview.net", "https://api2.openreview.net"];
const DEFAULT_WEB_BASE: &str = "https://openreview.net";

/// Notes requested per page.
const PAGE_LIMIT: usize = 1000;

/// Upper bound on pages per query.
const MAX_PAGES: usize = 50;

const REJECTED_VENUE_TOKENS: [&str; 3] = ["submitted", "withdrawn", "reject"];

/// Adapter for ICLR on OpenReview.
#[derive(Debug)]
pub struct IclrSource {
    http: HttpFetcher,
    api_bases: Vec<String>,
    web_base: String,
}

/// Outcome of one paged query across all API bases.
#[derive(Default)]
struct QueryOutcome {
    notes: Vec<Value>,
    answered: bool,
    last_error: Option<SourceError>,
}

impl IclrSource {
    /// Creates the adapter against the public OpenReview endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the HTTP client cannot be built.
    pub fn new(settings: &HttpSettings) -> Result<Self, SourceError> {
        Self::with_endpoints(
            settings,
            DEFAULT_API_BASES.iter().map(ToString::to_string),
            DEFAULT_WEB_BASE,
        )
    }

    /// Creates the adapter with custom API and web bases (for tests and mirrors).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the HTTP client cannot be built.
    pub fn with_endpoints<I, S>(
        settings: &HttpSettings,
        api_bases: I,
        web_base: impl Into<String>,
    ) -> Result<Self, SourceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            http: HttpFetcher::new(SLUG, settings)?,
            api_bases: api_bases
                .into_iter()
                .map(|base| base.into().trim_end_matches('/').to_string())
                .collect(),
            web_base: web_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn notes_url(&self, api_base: &str, params: &[(&str, String)]) -> Result<Url, SourceError> {
        let mut url = Url::parse(&format!("{api_base}/notes"))
            .map_err(|e| SourceError::unavailable(SLUG, format!("invalid API base {api_base}: {e}")))?;
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        Ok(url)
    }

    /// Runs one query, paging until a short page, trying each API base per page.
    async fn query_notes(&self, filter: &[(&str, String)], gate: &Throttle) -> QueryOutcome {
        let mut outcome = QueryOutcome::default();

        for page in 0..MAX_PAGES {
            let mut params = filter.to_vec();
            params.push(("limit", PAGE_LIMIT.to_string()));
            params.push(("offset", (page * PAGE_LIMIT).to_string()));

            let mut page_notes = Vec::new();
            for api_base in &self.api_bases {
                let url = match self.notes_url(api_base, &params) {
                    Ok(url) => url,
                    Err(error) => {
                        outcome.last_error = Some(error);
                        continue;
                    }
                };
                match self.http.get_json(&url, gate).await {
                    Ok(payload) => {
                        outcome.answered = true;
                        page_notes = extract_notes(payload);
                        if !page_notes.is_empty() {
                            break;
                        }
                    }
                    Err(error) if error.is_not_found() => outcome.answered = true,
                    Err(error) => {
                        debug!(url = %url, %error, "notes query failed");
                        outcome.last_error = Some(error);
                    }
                }
            }

            let short_page = page_notes.len() < PAGE_LIMIT;
            outcome.notes.extend(page_notes);
            if short_page {
                return outcome;
            }
        }
        warn!(pages = MAX_PAGES, "notes query hit the page cap");
        outcome
    }

    async fn submission_notes(
        &self,
        year: u16,
        gate: &Throttle,
    ) -> Result<Vec<Value>, SourceError> {
        let mut answered = false;
        let mut last_error = None;

        let single_queries = [
            ("invitation", format!("ICLR.cc/{year}/Conference/-/Blind_Submission")),
            ("invitation", format!("ICLR.cc/{year}/Conference/-/Submission")),
            ("content.venueid", format!("ICLR.cc/{year}/Conference")),
            ("content.venueid", format!("ICLR.cc/{year}/Conference/-/Acceptance")),
        ];
        for (field, value) in single_queries {
            let outcome = self.query_notes(&[(field, value)], gate).await;
            answered |= outcome.answered;
            if outcome.last_error.is_some() {
                last_error = outcome.last_error;
            }
            if !outcome.notes.is_empty() {
                return Ok(dedupe_notes(outcome.notes));
            }
        }

        let mut merged = Vec::new();
        for venue in [format!("ICLR {year} Conference"), format!("Submitted to ICLR {year}")] {
            let outcome = self.query_notes(&[("content.venue", venue)], gate).await;
            answered |= outcome.answered;
            if outcome.last_error.is_some() {
                last_error = outcome.last_error;
            }
            merged.extend(outcome.notes);
        }
        if !merged.is_empty() {
            return Ok(dedupe_notes(merged));
        }

        match last_error {
            Some(error) if !answered => Err(error),
            _ => Err(SourceError::empty_year(SLUG, year)),
        }
    }

    async fn single_note(
        &self,
        forum_id: &str,
        gate: &Throttle,
    ) -> Result<Option<Value>, SourceError> {
        let params = [
            ("forum", forum_id.to_string()),
            ("details", "directReplies,original".to_string()),
            ("limit", "1".to_string()),
        ];
        let mut last_error = None;
        for api_base in &self.api_bases {
            let url = self.notes_url(api_base, &params)?;
            match self.http.get_json(&url, gate).await {
                Ok(payload) => {
                    if let Some(note) = extract_notes(payload).into_iter().next() {
                        return Ok(Some(note));
                    }
                }
                Err(error) if error.is_not_found() => {}
                Err(error) => last_error = Some(error),
            }
        }
        last_error.map_or(Ok(None), Err)
    }
}

#[async_trait]
impl SourceAdapter for IclrSource {
    fn slug(&self) -> &str {
        SLUG
    }

    fn name(&self) -> &str {
        "ICLR"
    }

    #[instrument(skip(self), fields(site = SLUG))]
    async fn list_papers(&self, year: u16) -> Result<Vec<PaperRecord>, SourceError> {
        let notes = self.submission_notes(year, &Throttle::disabled()).await?;
        let accepted: Vec<&Value> = notes.iter().filter(|note| is_accepted(note, year)).collect();
        let selected: Vec<&Value> = if accepted.is_empty() {
            debug!(notes = notes.len(), "no decisions yet, keeping all submissions");
            notes.iter().collect()
        } else {
            accepted
        };

        let papers: Vec<PaperRecord> = selected
            .into_iter()
            .filter_map(|note| note_to_record(note, year, &self.web_base))
            .collect();
        if papers.is_empty() {
            return Err(SourceError::unavailable(
                SLUG,
                format!("no parsable notes for {year}"),
            ));
        }
        Ok(papers)
    }

    async fn fetch_abstract(
        &self,
        record: &PaperRecord,
        gate: &Throttle,
    ) -> Result<String, SourceError> {
        let forum_id = &record.key.source_id;
        self.single_note(forum_id, gate)
            .await?
            .and_then(|note| content_value(&note["content"], "abstract"))
            .filter(|text| !text.is_empty())
            .ok_or_else(|| SourceError::not_found(SLUG, "abstract", record.key.to_string()))
    }

    async fn fetch_pdf_bytes(
        &self,
        record: &PaperRecord,
        gate: &Throttle,
    ) -> Result<Vec<u8>, SourceError> {
        let url = record
            .pdf_url
            .clone()
            .unwrap_or_else(|| format!("{}/pdf?id={}", self.web_base, record.key.source_id));
        self.http.get_bytes(&url, gate).await
    }

    async fn fetch_bibtex(
        &self,
        record: &PaperRecord,
        gate: &Throttle,
    ) -> Result<String, SourceError> {
        let forum_id = &record.key.source_id;
        let mut candidates = Vec::new();
        if let Some(url) = &record.bib_url {
            candidates.push(url.clone());
        }
        candidates.push(format!(
            "{}/citation?id={forum_id}&format=bibtex",
            self.web_base
        ));
        candidates.push(format!("{}/citation?id={forum_id}", self.web_base));

        let mut last_error = None;
        for url in candidates {
            match self.http.get_text(&url, gate).await {
                Ok(text) if text.contains('@') && text.contains('{') => {
                    return Ok(text.trim().to_string());
                }
                Ok(_) => {}
                Err(error) if error.is_not_found() => {}
                Err(error) => last_error = Some(error),
            }
        }
        Err(last_error
            .unwrap_or_else(|| SourceError::not_found(SLUG, "BibTeX entry", record.key.to_string())))
    }
}

/// Notes array from either `{"notes": [...]}` or a bare array.
fn extract_notes(payload: Value) -> Vec<Value> {
    let notes = match payload {
        Value::Object(mut map) => match map.remove("notes") {
            Some(Value::Array(notes)) => notes,
            _ => Vec::new(),
        },
        Value::Array(notes) => notes,
        _ => Vec::new(),
    };
    notes.into_iter().filter(Value::is_object).collect()
}

/// Forum id of a note, falling back to its note id and then a title digest.
fn forum_id(note: &Value) -> Option<String> {
    ["forum", "id"]
        .iter()
        .find_map(|field| note[*field].as_str().filter(|id| !id.is_empty()))
        .map(str::to_string)
        .or_else(|| content_value(&note["content"], "title").map(|title| fallback_id(&title)))
}

/// Deduplicates notes by forum id; later notes replace earlier ones in place.
fn dedupe_notes(notes: Vec<Value>) -> Vec<Value> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<Value> = Vec::new();
    for note in notes {
        let Some(id) = forum_id(&note) else {
            continue;
        };
        if let Some(&index) = positions.get(&id) {
            unique[index] = note;
        } else {
            positions.insert(id, unique.len());
            unique.push(note);
        }
    }
    unique
}

/// Reads a content field that may be a plain value or `{"value": ...}`.
fn content_value(content: &Value, key: &str) -> Option<String> {
    let raw = match &content[key] {
        Value::Object(map) => map.get("value").cloned().unwrap_or(Value::Null),
        other => other.clone(),
    };
    match raw {
        Value::Null => None,
        Value::String(text) => Some(text.trim().to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| item.as_str().map_or_else(|| item.to_string(), str::to_string))
                .collect::<Vec<_>>()
                .join(", "),
        ),
        other => Some(other.to_string()),
    }
}

/// Reads a list-valued content field.
fn content_list(content: &Value, key: &str) -> Vec<String> {
    let raw = match &content[key] {
        Value::Object(map) => map.get("value").unwrap_or(&Value::Null),
        other => other,
    };
    match raw {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::trim))
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        Value::String(text) => split_list(text),
        _ => Vec::new(),
    }
}

fn is_accepted(note: &Value, year: u16) -> bool {
    let venue = content_value(&note["content"], "venue")
        .unwrap_or_default()
        .to_lowercase();
    if venue.contains(&format!("iclr {year}")) && venue.contains("conference") {
        return !REJECTED_VENUE_TOKENS
            .iter()
            .any(|token| venue.contains(token));
    }
    decision_text(note).to_lowercase().contains("accept")
}

fn decision_text(note: &Value) -> String {
    let Some(replies) = note["details"]["directReplies"].as_array() else {
        return String::new();
    };
    replies
        .iter()
        .filter(|reply| {
            reply["invitation"]
                .as_str()
                .is_some_and(|inv| inv.to_lowercase().contains("decision"))
        })
        .find_map(|reply| {
            ["decision", "recommendation"]
                .iter()
                .find_map(|key| content_value(&reply["content"], key))
        })
        .unwrap_or_default()
}

fn normalize_pdf_url(value: &str, forum_id: &str, web_base: &str) -> String {
    if value.starts_with("http://") || value.starts_with("https://") {
        value.to_string()
    } else if value.starts_with('/') {
        format!("{web_base}{value}")
    } else {
        format!("{web_base}/pdf?id={forum_id}")
    }
}

fn note_to_record(note: &Value, year: u16, web_base: &str) -> Option<PaperRecord> {
    let content = &note["content"];
    let title = content_value(content, "title").filter(|title| !title.is_empty())?;
    let forum = forum_id(note)?;

    let pdf_url = content_value(content, "pdf")
        .filter(|pdf| !pdf.is_empty())
        .map_or_else(
            || format!("{web_base}/pdf?id={forum}"),
            |pdf| normalize_pdf_url(&pdf, &forum, web_base),
        );
    let detail_url = format!("{web_base}/forum?id={forum}");

    Some(
        PaperRecord::new(PaperKey::new(SLUG, year, forum), title)
            .with_authors(content_list(content, "authors"))
            .with_keywords(content_list(content, "keywords"))
            .with_detail_url(detail_url)
            .with_pdf_url(pdf_url),
    )
}
