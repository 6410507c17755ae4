//! PubMed E-utilities client: term search restricted to open-access
//! records, then a batch full-record fetch, with field-anchored extraction
//! of the semi-structured XML. Extraction deliberately avoids a
//! schema-validating parser; every field is treated as optional and
//! ambiguous records are dropped rather than guessed at.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{AnalysisError, Result};
use crate::query::SearchQuery;

const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";
const ARTICLE_BASE_URL: &str = "https://pubmed.ncbi.nlm.nih.gov";

/// Document ids requested per search term. Two ids across up to a handful
/// of terms keeps the retrieved set inside the 3..=5 abstract budget.
const IDS_PER_TERM: usize = 2;

/// Bounds on the retrieved abstract set. An explicit cap, not an accident
/// of pagination.
pub const MIN_ABSTRACTS: usize = 3;
pub const MAX_ABSTRACTS: usize = 5;

/// One retrieved literature record. `url` is always derivable from the
/// PMID and is what citations are validated against downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiteratureAbstract {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub pmid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

/// Seam for the literature retrieval stage, so the orchestrator can be
/// exercised against a mock in tests.
#[async_trait]
pub trait LiteratureSearch: Send + Sync {
    /// Retrieve up to `max_results` usable open-access abstracts for the
    /// query, trying terms in order. Fails with
    /// [`AnalysisError::LiteratureUnavailable`] on transport/service
    /// errors and [`AnalysisError::NoAbstractsFound`] when the search
    /// succeeds but yields zero usable records.
    async fn fetch_abstracts(
        &self,
        query: &SearchQuery,
        max_results: usize,
    ) -> Result<Vec<LiteratureAbstract>>;
}

pub struct PubMedClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl PubMedClient {
    pub fn new(timeout: Duration) -> Self {
        Self::with_base_url(EUTILS_BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            timeout,
        }
    }

    /// esearch: one term to a bounded list of PMIDs, restricted to free
    /// full-text records.
    async fn search_ids(&self, term: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/esearch.fcgi?db=pubmed&term={}&retmax={}&retmode=json&sort=relevance&filter={}",
            self.base_url,
            urlencoding::encode(term),
            IDS_PER_TERM,
            urlencoding::encode("free full text[sb]"),
        );

        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AnalysisError::LiteratureUnavailable(format!("search request: {e}")))?
            .error_for_status()
            .map_err(|e| AnalysisError::LiteratureUnavailable(format!("search status: {e}")))?;

        let data: Value = response
            .json()
            .await
            .map_err(|e| AnalysisError::LiteratureUnavailable(format!("search response: {e}")))?;

        let ids = data["esearchresult"]["idlist"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|v| v.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(ids)
    }

    /// efetch: batch full-record fetch for the collected PMIDs.
    async fn fetch_records(&self, pmids: &[String]) -> Result<String> {
        let url = format!(
            "{}/efetch.fcgi?db=pubmed&id={}&retmode=xml&rettype=abstract",
            self.base_url,
            pmids.join(","),
        );

        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AnalysisError::LiteratureUnavailable(format!("fetch request: {e}")))?
            .error_for_status()
            .map_err(|e| AnalysisError::LiteratureUnavailable(format!("fetch status: {e}")))?;

        response
            .text()
            .await
            .map_err(|e| AnalysisError::LiteratureUnavailable(format!("fetch response: {e}")))
    }
}

#[async_trait]
impl LiteratureSearch for PubMedClient {
    async fn fetch_abstracts(
        &self,
        query: &SearchQuery,
        max_results: usize,
    ) -> Result<Vec<LiteratureAbstract>> {
        let max_results = max_results.clamp(MIN_ABSTRACTS, MAX_ABSTRACTS);

        let mut pmids: Vec<String> = Vec::new();
        for term in &query.terms {
            if pmids.len() >= max_results {
                break;
            }
            debug!(%term, "searching literature");
            for id in self.search_ids(term).await? {
                if !pmids.contains(&id) {
                    pmids.push(id);
                }
            }
        }
        pmids.truncate(max_results);

        if pmids.is_empty() {
            info!("literature search returned no document ids");
            return Err(AnalysisError::NoAbstractsFound);
        }

        let xml = self.fetch_records(&pmids).await?;
        let abstracts = extract_abstracts(&xml);

        if abstracts.is_empty() {
            info!("no usable records after extraction");
            return Err(AnalysisError::NoAbstractsFound);
        }

        info!(count = abstracts.len(), "retrieved literature abstracts");
        Ok(abstracts)
    }
}

/// Pull usable records out of the efetch XML. Records missing a title or
/// PMID are dropped, not surfaced with blank fields: downstream citation
/// integrity requires every abstract to carry a dereferenceable URL.
fn extract_abstracts(xml: &str) -> Vec<LiteratureAbstract> {
    let mut abstracts = Vec::new();

    for section in xml.split("<PubmedArticle>").skip(1) {
        let pmid = extract_tag_text(section, "PMID");
        let title = extract_tag_text(section, "ArticleTitle");

        let (pmid, title) = match (pmid, title) {
            (Some(p), Some(t)) if !p.is_empty() && !t.is_empty() => (p, t),
            _ => {
                warn!("dropping record without usable title or PMID");
                continue;
            }
        };

        let abstract_text = extract_tag_text(section, "AbstractText").unwrap_or_default();
        let year = extract_tag_raw(section, "PubDate")
            .and_then(|date| extract_tag_text(date, "Year"))
            .and_then(|y| y.parse::<i32>().ok());
        let doi = extract_doi(section);

        abstracts.push(LiteratureAbstract {
            title,
            abstract_text,
            url: format!("{ARTICLE_BASE_URL}/{pmid}/"),
            pmid,
            doi,
            year,
        });
    }

    abstracts
}

/// Field-anchored extraction: find the first `<tag ...>` opening and return
/// the raw slice up to the matching close. None when the tag is absent or
/// unclosed. Raw because inner text may hold nested tags (PubDate carries
/// Year/Month); callers re-anchor on the inner tag when they need it.
fn extract_tag_raw<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open_anchor = format!("<{tag}");
    let close_tag = format!("</{tag}>");

    let open_at = xml.find(&open_anchor)?;
    let content_start = open_at + xml[open_at..].find('>')? + 1;
    let content_end = content_start + xml[content_start..].find(&close_tag)?;

    Some(&xml[content_start..content_end])
}

fn extract_tag_text(xml: &str, tag: &str) -> Option<String> {
    extract_tag_raw(xml, tag).map(strip_markup)
}

fn extract_doi(section: &str) -> Option<String> {
    let anchor = "<ELocationID EIdType=\"doi\"";
    let at = section.find(anchor)?;
    let rest = &section[at..];
    let content_start = rest.find('>')? + 1;
    let content_end = content_start + rest[content_start..].find("</ELocationID>")?;
    let doi = rest[content_start..content_end].trim();
    (!doi.is_empty()).then(|| doi.to_string())
}

/// Remove inline tags (e.g. `<i>`, `<sup>`) left inside extracted text.
fn strip_markup(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => cleaned.push(ch),
            _ => {}
        }
    }
    cleaned.trim().to_string()
}
