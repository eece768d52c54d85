//! Affiliation filtering and row canonicalization.
//!
//! Turns validated source records into [`Paper`] rows, keeping only authors
//! affiliated with the target institution and dropping records with none.

use crate::config::AffiliationConfig;
use crate::source::{PublishedDate, RawArticle};
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Date value stored for records without a usable publication date
pub const UNKNOWN_DATE: &str = "Unknown";

/// DOI resolver prefix
pub const DOI_RESOLVER: &str = "https://doi.org/";

/// Canonical row, identical in the primary and delta stores
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub title: String,
    pub doi: String,
    pub journal: String,
    pub year: Option<i32>,
    /// Qualifying authors' full names, `", "`-delimited
    pub authors: String,
    /// Qualifying authors' surnames, `", "`-delimited
    pub last_names: String,
    pub keywords: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// ISO date, verbatim partial date, or [`UNKNOWN_DATE`]
    pub publication_date: String,
}

/// Author qualification rule for the target institution
#[derive(Debug, Clone)]
pub struct AffiliationFilter {
    location_marker: String,
    institution_names: Vec<String>,
}

impl AffiliationFilter {
    pub fn new(config: &AffiliationConfig) -> Self {
        Self {
            location_marker: config.location_marker.to_lowercase(),
            institution_names: config
                .institution_names
                .iter()
                .map(|n| n.to_lowercase())
                .collect(),
        }
    }

    /// True when the affiliation names the institution at its location
    pub fn qualifies(&self, affiliation: &str) -> bool {
        let affiliation = affiliation.to_lowercase();
        affiliation.contains(&self.location_marker)
            && self
                .institution_names
                .iter()
                .any(|name| affiliation.contains(name.as_str()))
    }

    /// Build the canonical row, or `None` when no author qualifies.
    pub fn to_paper(&self, article: &RawArticle) -> Option<Paper> {
        let mut full_names = Vec::new();
        let mut last_names = Vec::new();

        for author in &article.authors {
            let Some(affiliation) = author.affiliation.as_deref() else {
                continue;
            };
            if !self.qualifies(affiliation) {
                continue;
            }
            let last = author.last_name.as_deref().unwrap_or("").trim();
            if last.is_empty() {
                continue;
            }
            let first = author.first_name.as_deref().unwrap_or("").trim();
            full_names.push(format!("{} {}", first, last).trim().to_string());
            last_names.push(last.to_string());
        }

        if full_names.is_empty() {
            debug!(id = %article.id, "No qualifying author, record discarded");
            return None;
        }

        let (publication_date, year) = normalize_date(&article.published);

        Some(Paper {
            id: article.id.clone(),
            title: article
                .title
                .clone()
                .unwrap_or_else(|| "No Title".to_string()),
            doi: canonical_doi(&article.doi),
            journal: article
                .journal
                .clone()
                .unwrap_or_else(|| "No Journal".to_string()),
            year,
            authors: full_names.join(", "),
            last_names: last_names.join(", "),
            keywords: if article.keywords.is_empty() {
                "No Keywords".to_string()
            } else {
                article.keywords.join(", ")
            },
            abstract_text: article
                .abstract_text
                .as_deref()
                .map(collapse_whitespace)
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| "No Abstract".to_string()),
            publication_date,
        })
    }

    /// Filter a batch, preserving input order
    pub fn filter_batch(&self, articles: &[RawArticle]) -> Vec<Paper> {
        articles.iter().filter_map(|a| self.to_paper(a)).collect()
    }
}

/// Stored date string and numeric year
pub fn normalize_date(published: &PublishedDate) -> (String, Option<i32>) {
    match published {
        PublishedDate::Structured(date) => (date.format("%Y-%m-%d").to_string(), Some(date.year())),
        PublishedDate::Text(text) => match leading_year(text) {
            Some(year) => (text.clone(), Some(year)),
            None => (UNKNOWN_DATE.to_string(), None),
        },
        PublishedDate::Missing => (UNKNOWN_DATE.to_string(), None),
    }
}

fn leading_year(text: &str) -> Option<i32> {
    let head = text.get(..4)?;
    if head.chars().all(|c| c.is_ascii_digit()) {
        head.parse().ok()
    } else {
        None
    }
}

/// Resolver URL for the first line of a raw DOI field
pub fn canonical_doi(raw: &str) -> String {
    let first = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");
    format!("{}{}", DOI_RESOLVER, first)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::RawAuthor;
    use chrono::NaiveDate;

    fn author(first: &str, last: &str, affiliation: Option<&str>) -> RawAuthor {
        RawAuthor {
            first_name: Some(first.to_string()),
            last_name: Some(last.to_string()),
            affiliation: affiliation.map(str::to_string),
        }
    }

    fn article(authors: Vec<RawAuthor>) -> RawArticle {
        RawArticle {
            id: "1".to_string(),
            doi: "10.1000/abc\n10.1000/other".to_string(),
            title: Some("A Title".to_string()),
            journal: None,
            published: PublishedDate::Structured(NaiveDate::from_ymd_opt(2024, 1, 12).unwrap()),
            authors,
            keywords: vec![],
            abstract_text: Some("  Line one\n\n  line   two ".to_string()),
        }
    }

    fn filter() -> AffiliationFilter {
        AffiliationFilter::new(&AffiliationConfig::default())
    }

    #[test]
    fn test_qualifies() {
        let f = filter();
        assert!(f.qualifies("Dept. of Chemistry, University of Massachusetts Amherst, MA"));
        assert!(f.qualifies("UMASS-AMHERST"));
        assert!(!f.qualifies("Stanford University"));
        // Marker present but no canonical phrasing.
        assert!(!f.qualifies("Amherst College, Amherst, MA"));
        // Phrasing present but wrong campus.
        assert!(!f.qualifies("University of Massachusetts Medical School, Worcester"));
    }

    #[test]
    fn test_non_affiliated_record_discarded() {
        let a = article(vec![author("Ann", "Lee", Some("Stanford University"))]);
        assert!(filter().to_paper(&a).is_none());

        let a = article(vec![author("Ann", "Lee", None)]);
        assert!(filter().to_paper(&a).is_none());
    }

    #[test]
    fn test_canonical_row() {
        let a = article(vec![
            author("Jane", "Smith", Some("University of Massachusetts, Amherst")),
            author("Ann", "Lee", Some("Stanford University")),
            author("", "Jones", Some("UMass Amherst")),
            author("Nameless", "", Some("UMass Amherst")),
        ]);
        let paper = filter().to_paper(&a).unwrap();

        assert_eq!(paper.authors, "Jane Smith, Jones");
        assert_eq!(paper.last_names, "Smith, Jones");
        assert_eq!(paper.doi, "https://doi.org/10.1000/abc");
        assert_eq!(paper.journal, "No Journal");
        assert_eq!(paper.keywords, "No Keywords");
        assert_eq!(paper.abstract_text, "Line one line two");
        assert_eq!(paper.publication_date, "2024-01-12");
        assert_eq!(paper.year, Some(2024));
    }

    #[test]
    fn test_normalize_date() {
        assert_eq!(
            normalize_date(&PublishedDate::Text("2023 Nov-Dec".to_string())),
            ("2023 Nov-Dec".to_string(), Some(2023))
        );
        assert_eq!(
            normalize_date(&PublishedDate::Text("Winter 2023".to_string())),
            (UNKNOWN_DATE.to_string(), None)
        );
        assert_eq!(
            normalize_date(&PublishedDate::Missing),
            (UNKNOWN_DATE.to_string(), None)
        );
    }

    #[test]
    fn test_filter_batch_keeps_order() {
        let mut first = article(vec![author("A", "Alpha", Some("UMass Amherst"))]);
        first.id = "first".to_string();
        let mut dropped = article(vec![author("B", "Beta", Some("MIT"))]);
        dropped.id = "dropped".to_string();
        let mut second = article(vec![author("C", "Gamma", Some("UMass Amherst"))]);
        second.id = "second".to_string();

        let papers = filter().filter_batch(&[first, dropped, second]);
        let ids: Vec<&str> = papers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }
}
