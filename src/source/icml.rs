//! ICML adapter backed by the PMLR proceedings site.
//!
//! The PMLR index lists every volume; the ICML volume for a year is the list
//! item mentioning both the year and the conference. Each volume page holds
//! one `div.paper` block per paper with title, authors and links.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use super::html::{
    ANCHOR, absolutize, collapse_whitespace, element_text, fallback_id, section_paragraphs,
    split_list, static_selector, url_basename,
};
use super::http::{HttpFetcher, HttpSettings};
use super::{SourceAdapter, SourceError};
use crate::fetch::Throttle;
use crate::record::{PaperKey, PaperRecord};

const SLUG: &str = "icml";

const DEFAULT_INDEX_URL: &str = "https://proceedings.mlr.press/";

static LIST_ITEM: LazyLock<Selector> = LazyLock::new(|| static_selector("li"));
static PAPER_BLOCK: LazyLock<Selector> = LazyLock::new(|| static_selector("div.paper"));
static PAPER_TITLE: LazyLock<Selector> = LazyLock::new(|| static_selector("p.title"));
static PAPER_AUTHORS: LazyLock<Selector> = LazyLock::new(|| static_selector("p.authors"));
static ABSTRACT_BLOCK: LazyLock<Selector> =
    LazyLock::new(|| static_selector("#abstract, div.abstract"));
static CODE_BLOCK: LazyLock<Selector> = LazyLock::new(|| static_selector("pre, code"));

/// Fields recovered from a PMLR abstract page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct IcmlDetail {
    pub abstract_text: Option<String>,
    pub bibtex: Option<String>,
    pub pdf_url: Option<String>,
}

/// Adapter for ICML volumes on `proceedings.mlr.press`.
#[derive(Debug)]
pub struct IcmlSource {
    http: HttpFetcher,
    index_url: String,
}

impl IcmlSource {
    /// Creates the adapter against the public PMLR index.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the HTTP client cannot be built.
    pub fn new(settings: &HttpSettings) -> Result<Self, SourceError> {
        Self::with_index_url(settings, DEFAULT_INDEX_URL)
    }

    /// Creates the adapter with a custom volume index (for tests and mirrors).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the HTTP client cannot be built.
    pub fn with_index_url(
        settings: &HttpSettings,
        index_url: impl Into<String>,
    ) -> Result<Self, SourceError> {
        let mut index_url = index_url.into();
        if !index_url.ends_with('/') {
            index_url.push('/');
        }
        Ok(Self {
            http: HttpFetcher::new(SLUG, settings)?,
            index_url,
        })
    }

    async fn detail(
        &self,
        record: &PaperRecord,
        gate: &Throttle,
    ) -> Result<IcmlDetail, SourceError> {
        let Some(detail_url) = record.detail_url.as_deref() else {
            return Err(SourceError::not_found(SLUG, "detail page", record.key.to_string()));
        };
        let html = self.http.get_text(detail_url, gate).await?;
        parse_detail(&html, detail_url)
    }
}

#[async_trait]
impl SourceAdapter for IcmlSource {
    fn slug(&self) -> &str {
        SLUG
    }

    fn name(&self) -> &str {
        "ICML"
    }

    #[instrument(skip(self), fields(site = SLUG))]
    async fn list_papers(&self, year: u16) -> Result<Vec<PaperRecord>, SourceError> {
        let gate = Throttle::disabled();
        let index = self.http.get_text(&self.index_url, &gate).await.map_err(|error| {
            if error.is_not_found() {
                SourceError::unrecognized(SLUG, &self.index_url)
            } else {
                error
            }
        })?;
        let Some(volume_url) = find_volume_url(&index, &self.index_url, year)? else {
            return Err(SourceError::empty_year(SLUG, year));
        };
        debug!(url = %volume_url, "volume located");

        let volume = match self.http.get_text(&volume_url, &gate).await {
            Ok(html) => html,
            Err(error) if error.is_not_found() => return Err(SourceError::empty_year(SLUG, year)),
            Err(error) => return Err(error),
        };
        let papers = parse_volume(&volume, &volume_url, year)?;
        if papers.is_empty() {
            return Err(SourceError::unrecognized(SLUG, &volume_url));
        }
        Ok(papers)
    }

    async fn fetch_abstract(
        &self,
        record: &PaperRecord,
        gate: &Throttle,
    ) -> Result<String, SourceError> {
        self.detail(record, gate)
            .await?
            .abstract_text
            .ok_or_else(|| SourceError::not_found(SLUG, "abstract", record.key.to_string()))
    }

    async fn fetch_pdf_bytes(
        &self,
        record: &PaperRecord,
        gate: &Throttle,
    ) -> Result<Vec<u8>, SourceError> {
        let url = match &record.pdf_url {
            Some(url) => url.clone(),
            None => self
                .detail(record, gate)
                .await?
                .pdf_url
                .ok_or_else(|| SourceError::not_found(SLUG, "PDF link", record.key.to_string()))?,
        };
        self.http.get_bytes(&url, gate).await
    }

    async fn fetch_bibtex(
        &self,
        record: &PaperRecord,
        gate: &Throttle,
    ) -> Result<String, SourceError> {
        if let Some(url) = &record.bib_url {
            let text = self.http.get_text(url, gate).await?;
            if looks_like_bibtex(&text) {
                return Ok(text.trim().to_string());
            }
        }
        self.detail(record, gate)
            .await?
            .bibtex
            .ok_or_else(|| SourceError::not_found(SLUG, "BibTeX entry", record.key.to_string()))
    }
}

/// Finds the volume link for `year` on the PMLR index page.
pub(crate) fn find_volume_url(
    html: &str,
    index_url: &str,
    year: u16,
) -> Result<Option<String>, SourceError> {
    let base = Url::parse(index_url).map_err(|_| SourceError::unrecognized(SLUG, index_url))?;
    let document = Html::parse_document(html);
    let year = year.to_string();

    for item in document.select(&LIST_ITEM) {
        let text = element_text(item).to_lowercase();
        if !text.contains(&year) {
            continue;
        }
        if !text.contains("icml") && !text.contains("international conference on machine learning")
        {
            continue;
        }
        if let Some(href) = item
            .select(&ANCHOR)
            .find_map(|anchor| anchor.value().attr("href"))
        {
            return Ok(absolutize(href, &base));
        }
    }
    Ok(None)
}

/// Parses a volume page into listing records.
pub(crate) fn parse_volume(
    html: &str,
    volume_url: &str,
    year: u16,
) -> Result<Vec<PaperRecord>, SourceError> {
    let base = Url::parse(volume_url).map_err(|_| SourceError::unrecognized(SLUG, volume_url))?;
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut papers = Vec::new();

    for block in document.select(&PAPER_BLOCK) {
        let Some(title) = block
            .select(&PAPER_TITLE)
            .next()
            .map(element_text)
            .filter(|title| !title.is_empty())
        else {
            continue;
        };

        let mut detail_url = None;
        let mut pdf_url = None;
        for anchor in block.select(&ANCHOR) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let label = element_text(anchor).to_lowercase();
            if detail_url.is_none() && label.contains("abs") {
                detail_url = absolutize(href, &base);
            } else if pdf_url.is_none() && label.contains("download pdf") {
                pdf_url = absolutize(href, &base);
            }
        }

        let source_id = detail_url
            .as_deref()
            .and_then(url_basename)
            .and_then(|name| name.strip_suffix(".html"))
            .filter(|id| !id.is_empty())
            .map_or_else(|| fallback_id(&title), str::to_string);
        if !seen.insert(source_id.clone()) {
            continue;
        }

        let authors = block
            .select(&PAPER_AUTHORS)
            .next()
            .map(|node| split_list(&element_text(node)))
            .unwrap_or_default();

        let mut record = PaperRecord::new(PaperKey::new(SLUG, year, source_id), title)
            .with_authors(authors);
        record.detail_url = detail_url;
        record.pdf_url = pdf_url;
        papers.push(record);
    }
    Ok(papers)
}

/// Parses a PMLR abstract page.
pub(crate) fn parse_detail(html: &str, page_url: &str) -> Result<IcmlDetail, SourceError> {
    let base = Url::parse(page_url).map_err(|_| SourceError::unrecognized(SLUG, page_url))?;
    let document = Html::parse_document(html);

    let abstract_text = document
        .select(&ABSTRACT_BLOCK)
        .map(element_text)
        .find(|text| !text.is_empty())
        .or_else(|| section_paragraphs(&document, "Abstract"));

    let bibtex = document
        .select(&CODE_BLOCK)
        .map(|node| node.text().collect::<String>())
        .find(|text| looks_like_bibtex(text))
        .map(|text| text.trim().to_string());

    let pdf_url = document
        .select(&ANCHOR)
        .filter(|anchor| element_text(*anchor).to_lowercase().contains("download pdf"))
        .find_map(|anchor| anchor.value().attr("href"))
        .and_then(|href| absolutize(href, &base));

    Ok(IcmlDetail {
        abstract_text,
        bibtex,
        pdf_url,
    })
}

fn looks_like_bibtex(text: &str) -> bool {
    collapse_whitespace(text)
        .to_ascii_lowercase()
        .contains("@inproceedings")
}
