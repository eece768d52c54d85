//! NCBI PubMed E-utilities client.
//!
//! Implements [`LiteratureSource`] on top of two endpoints:
//! - `esearch.fcgi` (JSON) resolves a query term to PubMed identifiers
//! - `efetch.fcgi` (XML) returns full records in batches of identifiers
//!
//! API etiquette (per NCBI docs):
//! - Send `tool` and `email` with every request
//! - An `api_key` raises the allowed request rate
//! - HTTP 429 signals the caller must slow down

use crate::config::SourceConfig;
use crate::error::{IngestError, Result};
use crate::source::{ArticleDraft, LiteratureSource, PublishedDate, RawArticle, RawAuthor};
use async_trait::async_trait;
use chrono::NaiveDate;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::{header::RETRY_AFTER, Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// esearch cannot page past this many hits for one query
const ESEARCH_MAX_HITS: usize = 10_000;

/// PubMed E-utilities client
pub struct PubMedClient {
    client: Client,
    base_url: String,
    tool: String,
    email: String,
    api_key: Option<String>,
    max_results: usize,
    fetch_batch_size: usize,
}

impl PubMedClient {
    /// Create a client from the source section of the configuration
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!(
                "{}/{} (mailto:{})",
                config.tool,
                env!("CARGO_PKG_VERSION"),
                config.contact_email
            ))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| IngestError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tool: config.tool.clone(),
            email: config.contact_email.clone(),
            api_key: config.api_key.clone(),
            max_results: config.max_results.max(1),
            fetch_batch_size: config.fetch_batch_size.max(1),
        })
    }

    /// Parameters sent with every request
    fn identity_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("db", "pubmed".to_string()),
            ("tool", self.tool.clone()),
            ("email", self.email.clone()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    /// Resolve a query term to PubMed identifiers, paging through the full hit count
    pub async fn search_ids(&self, term: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = Vec::new();
        loop {
            let page = self.search_page(term, ids.len()).await?;
            if page.count > ESEARCH_MAX_HITS {
                return Err(IngestError::Config(format!(
                    "Query matched {} records, above the esearch limit of {}; lower schedule.window_days",
                    page.count, ESEARCH_MAX_HITS
                )));
            }

            let received = page.ids.len();
            ids.extend(page.ids);
            if received == 0 || ids.len() >= page.count {
                if ids.len() < page.count {
                    warn!(
                        term = term,
                        expected = page.count,
                        received = ids.len(),
                        "esearch returned fewer ids than its count"
                    );
                }
                debug!(term = term, count = ids.len(), "esearch complete");
                return Ok(ids);
            }
        }
    }

    /// One esearch page starting at `retstart`
    async fn search_page(&self, term: &str, retstart: usize) -> Result<ESearchPage> {
        let mut params = self.identity_params();
        params.push(("term", term.to_string()));
        params.push(("retstart", retstart.to_string()));
        params.push(("retmax", self.max_results.to_string()));
        params.push(("retmode", "json".to_string()));

        let response = self
            .client
            .get(format!("{}/esearch.fcgi", self.base_url))
            .query(&params)
            .send()
            .await?;
        let body = check_status(response, "esearch").await?.text().await?;

        let page = parse_esearch(&body)?;
        debug!(term = term, retstart = retstart, ids = page.ids.len(), total = page.count, "esearch page");
        Ok(page)
    }

    /// Fetch full records for a batch of identifiers
    pub async fn fetch_articles(&self, ids: &[String]) -> Result<Vec<RawArticle>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut params = self.identity_params();
        params.push(("id", ids.join(",")));
        params.push(("retmode", "xml".to_string()));

        let response = self
            .client
            .get(format!("{}/efetch.fcgi", self.base_url))
            .query(&params)
            .send()
            .await?;
        let body = check_status(response, "efetch").await?.text().await?;

        parse_article_set(&body)
    }
}

#[async_trait]
impl LiteratureSource for PubMedClient {
    async fn search(&self, term: &str) -> Result<Vec<RawArticle>> {
        let ids = self.search_ids(term).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut articles = Vec::with_capacity(ids.len());
        for (batch_idx, chunk) in ids.chunks(self.fetch_batch_size).enumerate() {
            debug!(batch = batch_idx + 1, ids = chunk.len(), "efetch batch");
            articles.extend(self.fetch_articles(chunk).await?);
        }

        info!(
            term = term,
            ids = ids.len(),
            records = articles.len(),
            "PubMed query complete"
        );
        Ok(articles)
    }
}

/// Map throttling and error statuses onto the error taxonomy
async fn check_status(response: Response, endpoint: &str) -> Result<Response> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        return Err(IngestError::RateLimited(retry_after));
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(endpoint = endpoint, status = status.as_u16(), "E-utilities error");
        return Err(IngestError::Api {
            code: status.as_u16() as i32,
            message: format!("{} failed: {} {}", endpoint, status, body.trim()),
        });
    }

    Ok(response)
}

// === esearch ===

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    #[serde(default)]
    esearchresult: Option<ESearchResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    /// Total hits, sent as a decimal string
    #[serde(default)]
    count: Option<String>,
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "ERROR", default)]
    error: Option<String>,
}

/// Identifiers of one page plus the total hit count of the query
#[derive(Debug, PartialEq, Eq)]
struct ESearchPage {
    count: usize,
    ids: Vec<String>,
}

fn parse_esearch(body: &str) -> Result<ESearchPage> {
    let response: ESearchResponse = serde_json::from_str(body)
        .map_err(|e| IngestError::Parse(format!("Failed to parse esearch response: {}", e)))?;

    if let Some(message) = response.error {
        // NCBI occasionally reports throttling in the body instead of the status.
        if message.to_lowercase().contains("rate limit") {
            return Err(IngestError::RateLimited(0));
        }
        return Err(IngestError::Api { code: 200, message });
    }

    let result = response
        .esearchresult
        .ok_or_else(|| IngestError::Parse("esearch response has no result".to_string()))?;
    if let Some(message) = result.error {
        return Err(IngestError::Api { code: 200, message });
    }

    let count = match result.count {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|e| IngestError::Parse(format!("esearch count {:?}: {}", raw, e)))?,
        None => result.idlist.len(),
    };
    Ok(ESearchPage {
        count,
        ids: result.idlist,
    })
}

// === efetch XML ===

/// Element whose text is being collected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Pmid,
    Title,
    Journal,
    Abstract,
    Keyword,
    LastName,
    ForeName,
    Affiliation,
    ArticleIdDoi,
    ELocationDoi,
    HistoryYear,
    HistoryMonth,
    HistoryDay,
    PubYear,
    PubMonth,
    PubDay,
    MedlineDate,
}

#[derive(Debug, Default)]
struct DateParts {
    year: Option<String>,
    month: Option<String>,
    day: Option<String>,
}

impl DateParts {
    fn to_date(&self, default_month_day: bool) -> Option<NaiveDate> {
        let year = self.year.as_deref()?.trim().parse::<i32>().ok()?;
        let month = match self.month.as_deref() {
            Some(m) => parse_month(m)?,
            None if default_month_day => 1,
            None => return None,
        };
        let day = match self.day.as_deref() {
            Some(d) => d.trim().parse::<u32>().ok()?,
            None if default_month_day => 1,
            None => return None,
        };
        NaiveDate::from_ymd_opt(year, month, day)
    }

    fn to_text(&self) -> Option<String> {
        let year = self.year.as_deref()?;
        let parts: Vec<&str> = [Some(year), self.month.as_deref(), self.day.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        Some(parts.join(" "))
    }
}

fn parse_month(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let prefix: String = raw.chars().take(3).collect::<String>().to_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .map(|idx| idx as u32 + 1)
}

/// Per-article parse state
#[derive(Debug, Default)]
struct ArticleScratch {
    draft: ArticleDraft,
    abstract_parts: Vec<String>,
    article_doi: Option<String>,
    elocation_doi: Option<String>,
    history: DateParts,
    in_pubmed_history: bool,
    pub_date: DateParts,
    medline_date: Option<String>,
    author: Option<AuthorScratch>,
}

#[derive(Debug, Default)]
struct AuthorScratch {
    first_name: Option<String>,
    last_name: Option<String>,
    affiliations: Vec<String>,
}

impl ArticleScratch {
    fn store(&mut self, field: Field, text: String) {
        if text.is_empty() {
            return;
        }
        match field {
            Field::Pmid => {
                self.draft.id.get_or_insert(text);
            }
            Field::Title => self.draft.title = Some(text),
            Field::Journal => self.draft.journal = Some(text),
            Field::Abstract => self.abstract_parts.push(text),
            Field::Keyword => self.draft.keywords.push(text),
            Field::LastName => {
                if let Some(author) = self.author.as_mut() {
                    author.last_name = Some(text);
                }
            }
            Field::ForeName => {
                if let Some(author) = self.author.as_mut() {
                    author.first_name = Some(text);
                }
            }
            Field::Affiliation => {
                if let Some(author) = self.author.as_mut() {
                    author.affiliations.push(text);
                }
            }
            Field::ArticleIdDoi => {
                self.article_doi.get_or_insert(text);
            }
            Field::ELocationDoi => {
                self.elocation_doi.get_or_insert(text);
            }
            Field::HistoryYear => self.history.year = Some(text),
            Field::HistoryMonth => self.history.month = Some(text),
            Field::HistoryDay => self.history.day = Some(text),
            Field::PubYear => self.pub_date.year = Some(text),
            Field::PubMonth => self.pub_date.month = Some(text),
            Field::PubDay => self.pub_date.day = Some(text),
            Field::MedlineDate => self.medline_date = Some(text),
        }
    }

    fn finish_author(&mut self) {
        if let Some(author) = self.author.take() {
            self.draft.authors.push(RawAuthor {
                first_name: author.first_name,
                last_name: author.last_name,
                affiliation: if author.affiliations.is_empty() {
                    None
                } else {
                    Some(author.affiliations.join("; "))
                },
            });
        }
    }

    fn into_draft(mut self) -> ArticleDraft {
        self.draft.doi = self.article_doi.or(self.elocation_doi);
        if !self.abstract_parts.is_empty() {
            self.draft.abstract_text = Some(self.abstract_parts.join(" "));
        }
        self.draft.published = if let Some(date) = self.history.to_date(true) {
            PublishedDate::Structured(date)
        } else if let Some(date) = self.pub_date.to_date(false) {
            PublishedDate::Structured(date)
        } else if let Some(text) = self.pub_date.to_text() {
            PublishedDate::Text(text)
        } else if let Some(text) = self.medline_date {
            PublishedDate::Text(text)
        } else {
            PublishedDate::Missing
        };
        self.draft
    }
}

fn attribute_is(element: &BytesStart<'_>, key: &[u8], expected: &str) -> Result<bool> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(attr.unescape_value()?.trim().eq_ignore_ascii_case(expected));
        }
    }
    Ok(false)
}

/// Parse an efetch `PubmedArticleSet` document.
///
/// Records failing validation are logged and skipped; a malformed document is
/// an error.
pub fn parse_article_set(xml: &str) -> Result<Vec<RawArticle>> {
    let mut reader = Reader::from_str(xml);
    let mut path: Vec<String> = Vec::new();
    let mut scratch: Option<ArticleScratch> = None;
    // (field, depth at which the capturing element was opened, text)
    let mut capture: Option<(Field, usize, String)> = None;
    let mut articles = Vec::new();
    let mut skipped = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let parent = path.last().map(String::as_str).unwrap_or("");
                let grandparent = path
                    .len()
                    .checked_sub(2)
                    .and_then(|i| path.get(i))
                    .map(String::as_str)
                    .unwrap_or("");

                if name == "PubmedArticle" {
                    scratch = Some(ArticleScratch::default());
                }

                if let Some(article) = scratch.as_mut().filter(|_| capture.is_none()) {
                    let field = match (name.as_str(), parent) {
                        ("PMID", "MedlineCitation") => Some(Field::Pmid),
                        ("ArticleTitle", "Article") => Some(Field::Title),
                        ("Title", "Journal") => Some(Field::Journal),
                        ("AbstractText", "Abstract") => Some(Field::Abstract),
                        ("Keyword", "KeywordList") => Some(Field::Keyword),
                        ("LastName", "Author") => Some(Field::LastName),
                        ("ForeName", "Author") => Some(Field::ForeName),
                        ("Affiliation", "AffiliationInfo") => Some(Field::Affiliation),
                        ("ArticleId", "ArticleIdList")
                            if grandparent == "PubmedData"
                                && attribute_is(&e, b"IdType", "doi")? =>
                        {
                            Some(Field::ArticleIdDoi)
                        }
                        ("ELocationID", "Article") if attribute_is(&e, b"EIdType", "doi")? => {
                            Some(Field::ELocationDoi)
                        }
                        ("Year", "PubMedPubDate") if article.in_pubmed_history => {
                            Some(Field::HistoryYear)
                        }
                        ("Month", "PubMedPubDate") if article.in_pubmed_history => {
                            Some(Field::HistoryMonth)
                        }
                        ("Day", "PubMedPubDate") if article.in_pubmed_history => {
                            Some(Field::HistoryDay)
                        }
                        ("Year", "PubDate") => Some(Field::PubYear),
                        ("Month", "PubDate") => Some(Field::PubMonth),
                        ("Day", "PubDate") => Some(Field::PubDay),
                        ("MedlineDate", "PubDate") => Some(Field::MedlineDate),
                        ("Author", "AuthorList") => {
                            article.author = Some(AuthorScratch::default());
                            None
                        }
                        ("PubMedPubDate", "History") => {
                            article.in_pubmed_history = attribute_is(&e, b"PubStatus", "pubmed")?;
                            None
                        }
                        _ => None,
                    };
                    if let Some(field) = field {
                        capture = Some((field, path.len(), String::new()));
                    }
                }

                path.push(name);
            }
            Event::Text(t) => {
                if let Some((_, _, text)) = capture.as_mut() {
                    text.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some((_, _, text)) = capture.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::End(_) => {
                let name = path.pop().unwrap_or_default();

                let closes_capture = matches!(capture, Some((_, depth, _)) if depth == path.len());
                if closes_capture {
                    if let (Some((field, _, text)), Some(article)) = (capture.take(), scratch.as_mut()) {
                        article.store(field, collapse_whitespace(&text));
                    }
                }

                match name.as_str() {
                    "Author" => {
                        if let Some(article) = scratch.as_mut() {
                            article.finish_author();
                        }
                    }
                    "PubMedPubDate" => {
                        if let Some(article) = scratch.as_mut() {
                            article.in_pubmed_history = false;
                        }
                    }
                    "PubmedArticle" => {
                        if let Some(article) = scratch.take() {
                            match article.into_draft().validate() {
                                Ok(record) => articles.push(record),
                                Err(e) => {
                                    skipped += 1;
                                    warn!(error = %e, "Skipping malformed record");
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    debug!(parsed = articles.len(), skipped = skipped, "Parsed efetch document");
    Ok(articles)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
