//! NeurIPS proceedings adapter.
//!
//! The yearly index lists one `<a>` per paper pointing at
//! `<hash>-Abstract[-Conference].html`; the detail page carries the abstract,
//! author list and links to the PDF and BibTeX files.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use super::html::{
    ANCHOR, absolutize, element_text, fallback_id, section_text, split_list, static_regex,
    static_selector, url_basename,
};
use super::http::{HttpFetcher, HttpSettings};
use super::{SourceAdapter, SourceError};
use crate::fetch::Throttle;
use crate::record::{PaperKey, PaperRecord};

const SLUG: &str = "neurips";

/// Index bases, tried in order; the year is appended as a path segment.
const DEFAULT_BASE_URLS: [&str; 2] = [
    "https://proceedings.neurips.cc/paper",
    "https://papers.nips.cc/paper_files/paper",
];

static PAPER_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| static_regex(r"^(.+?)-(?:Abstract|Paper|Title)"));
static AUTHORS_IN_ITEM: LazyLock<Selector> = LazyLock::new(|| static_selector("i"));

/// Fields recovered from a paper's detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct NeuripsDetail {
    pub abstract_text: Option<String>,
    pub authors: Vec<String>,
    pub keywords: Vec<String>,
    pub pdf_url: Option<String>,
    pub bib_url: Option<String>,
}

/// Adapter for `proceedings.neurips.cc`.
#[derive(Debug)]
pub struct NeuripsSource {
    http: HttpFetcher,
    base_urls: Vec<String>,
}

impl NeuripsSource {
    /// Creates the adapter against the public proceedings mirrors.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the HTTP client cannot be built.
    pub fn new(settings: &HttpSettings) -> Result<Self, SourceError> {
        Self::with_base_urls(settings, DEFAULT_BASE_URLS.iter().map(ToString::to_string))
    }

    /// Creates the adapter with custom index bases (for tests and mirrors).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the HTTP client cannot be built.
    pub fn with_base_urls<I, S>(settings: &HttpSettings, base_urls: I) -> Result<Self, SourceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            http: HttpFetcher::new(SLUG, settings)?,
            base_urls: base_urls
                .into_iter()
                .map(|base| base.into().trim_end_matches('/').to_string())
                .collect(),
        })
    }

    async fn detail(
        &self,
        record: &PaperRecord,
        gate: &Throttle,
    ) -> Result<NeuripsDetail, SourceError> {
        let Some(detail_url) = record.detail_url.as_deref() else {
            return Err(SourceError::not_found(SLUG, "detail page", record.key.to_string()));
        };
        let html = self.http.get_text(detail_url, gate).await?;
        parse_detail(&html, detail_url)
    }
}

#[async_trait]
impl SourceAdapter for NeuripsSource {
    fn slug(&self) -> &str {
        SLUG
    }

    fn name(&self) -> &str {
        "NeurIPS"
    }

    #[instrument(skip(self), fields(site = SLUG))]
    async fn list_papers(&self, year: u16) -> Result<Vec<PaperRecord>, SourceError> {
        let gate = Throttle::disabled();
        let mut absent = 0;
        let mut last_error = None;

        for base in &self.base_urls {
            let index_url = format!("{base}/{year}");
            match self.http.get_text(&index_url, &gate).await {
                Ok(html) => {
                    let papers = parse_index(&html, &index_url, year)?;
                    if !papers.is_empty() {
                        debug!(url = %index_url, papers = papers.len(), "index parsed");
                        return Ok(papers);
                    }
                    last_error = Some(SourceError::unrecognized(SLUG, &index_url));
                }
                Err(error) if error.is_not_found() => absent += 1,
                Err(error) => {
                    debug!(url = %index_url, %error, "index candidate failed");
                    last_error = Some(error);
                }
            }
        }

        if absent > 0 && absent == self.base_urls.len() {
            return Err(SourceError::empty_year(SLUG, year));
        }
        Err(last_error.unwrap_or_else(|| SourceError::unavailable(SLUG, "no index base configured")))
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
        let url = match &record.bib_url {
            Some(url) => url.clone(),
            None => self.detail(record, gate).await?.bib_url.ok_or_else(|| {
                SourceError::not_found(SLUG, "BibTeX link", record.key.to_string())
            })?,
        };
        let text = self.http.get_text(&url, gate).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(SourceError::not_found(SLUG, "BibTeX entry", url));
        }
        Ok(text.to_string())
    }
}

/// Parses a yearly index page into listing records.
pub(crate) fn parse_index(
    html: &str,
    index_url: &str,
    year: u16,
) -> Result<Vec<PaperRecord>, SourceError> {
    let base = Url::parse(index_url).map_err(|_| SourceError::unrecognized(SLUG, index_url))?;
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut papers = Vec::new();

    for anchor in document.select(&ANCHOR) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let lowered = href.to_ascii_lowercase();
        if !lowered.contains("abstract") || lowered.contains("bibtex") {
            continue;
        }
        let title = element_text(anchor);
        if title.is_empty() {
            continue;
        }
        let Some(detail_url) = absolutize(href, &base) else {
            continue;
        };

        let source_id = paper_id(&detail_url).unwrap_or_else(|| fallback_id(&title));
        if !seen.insert(source_id.clone()) {
            continue;
        }
        let authors = listed_authors(anchor);
        papers.push(
            PaperRecord::new(PaperKey::new(SLUG, year, source_id), title)
                .with_authors(authors)
                .with_detail_url(detail_url),
        );
    }
    Ok(papers)
}

/// Parses a detail page.
pub(crate) fn parse_detail(html: &str, page_url: &str) -> Result<NeuripsDetail, SourceError> {
    let base = Url::parse(page_url).map_err(|_| SourceError::unrecognized(SLUG, page_url))?;
    let document = Html::parse_document(html);

    let mut pdf_url = None;
    let mut bib_url = None;
    for anchor in document.select(&ANCHOR) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let href_lower = href.to_ascii_lowercase();
        let text = element_text(anchor).to_ascii_lowercase();
        if bib_url.is_none()
            && (text.contains("bibtex")
                || href_lower.contains("bibtex")
                || href_lower.ends_with(".bib"))
        {
            bib_url = absolutize(href, &base);
        } else if pdf_url.is_none() && (href_lower.ends_with(".pdf") || text.contains("pdf")) {
            pdf_url = absolutize(href, &base);
        }
    }

    Ok(NeuripsDetail {
        abstract_text: section_text(&document, "Abstract"),
        authors: section_text(&document, "Authors")
            .map(|text| split_list(&text))
            .unwrap_or_default(),
        keywords: section_text(&document, "Keywords")
            .map(|text| split_list(&text))
            .unwrap_or_default(),
        pdf_url,
        bib_url,
    })
}

/// `<hash>` from `.../<hash>-Abstract-Conference.html`, else the bare page name.
fn paper_id(detail_url: &str) -> Option<String> {
    let basename = url_basename(detail_url)?;
    if let Some(captures) = PAPER_ID_RE.captures(basename) {
        return captures.get(1).map(|m| m.as_str().to_string());
    }
    basename
        .strip_suffix(".html")
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

/// Authors printed in `<i>` next to the title inside the same list item.
fn listed_authors(anchor: ElementRef<'_>) -> Vec<String> {
    anchor
        .parent()
        .and_then(ElementRef::wrap)
        .and_then(|item| item.select(&AUTHORS_IN_ITEM).next())
        .map(|node| split_list(&element_text(node)))
        .unwrap_or_default()
}
