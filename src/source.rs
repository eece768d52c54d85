//! Literature source boundary.
//!
//! Raw records arrive from the source as loosely structured drafts and are
//! validated into [`RawArticle`] before any pipeline stage sees them.

use crate::error::{OptionExt, Result};
use async_trait::async_trait;
use chrono::NaiveDate;

/// A searchable bibliographic source.
///
/// Implementations return [`crate::IngestError::RateLimited`] when the source
/// throttles the caller; every other error is treated as fatal by the pipeline.
#[async_trait]
pub trait LiteratureSource: Send + Sync {
    /// Run one query and return every record that passed boundary validation.
    async fn search(&self, term: &str) -> Result<Vec<RawArticle>>;
}

/// Publication date as delivered by the source
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PublishedDate {
    /// Complete calendar date
    Structured(NaiveDate),
    /// Free text such as `2023 Jan` or `2023 Jan-Feb`
    Text(String),
    #[default]
    Missing,
}

/// One author entry on a raw record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawAuthor {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub affiliation: Option<String>,
}

/// Validated raw record.
///
/// `id` and `doi` are guaranteed non-empty; everything else may be absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArticle {
    pub id: String,
    pub doi: String,
    pub title: Option<String>,
    pub journal: Option<String>,
    pub published: PublishedDate,
    pub authors: Vec<RawAuthor>,
    pub keywords: Vec<String>,
    pub abstract_text: Option<String>,
}

/// Unvalidated record as assembled by a source parser
#[derive(Debug, Clone, Default)]
pub struct ArticleDraft {
    pub id: Option<String>,
    pub doi: Option<String>,
    pub title: Option<String>,
    pub journal: Option<String>,
    pub published: PublishedDate,
    pub authors: Vec<RawAuthor>,
    pub keywords: Vec<String>,
    pub abstract_text: Option<String>,
}

impl ArticleDraft {
    /// Validate the draft.
    ///
    /// The identifier is reduced to its first whitespace-separated token and the
    /// DOI to its first non-empty line; a record missing either is rejected.
    pub fn validate(self) -> Result<RawArticle> {
        let id = self
            .id
            .as_deref()
            .and_then(|raw| raw.split_whitespace().next())
            .map(str::to_string)
            .ok_or_invalid("record has no identifier")?;

        let doi = self
            .doi
            .as_deref()
            .and_then(|raw| raw.lines().map(str::trim).find(|line| !line.is_empty()))
            .map(str::to_string)
            .ok_or_invalid(&format!("record {} has no DOI", id))?;

        Ok(RawArticle {
            id,
            doi,
            title: non_blank(self.title),
            journal: non_blank(self.journal),
            published: self.published,
            authors: self.authors,
            keywords: self
                .keywords
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            abstract_text: non_blank(self.abstract_text),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IngestError;

    fn draft() -> ArticleDraft {
        ArticleDraft {
            id: Some("38000001".to_string()),
            doi: Some("10.1000/xyz".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_minimal() {
        let article = draft().validate().unwrap();
        assert_eq!(article.id, "38000001");
        assert_eq!(article.doi, "10.1000/xyz");
        assert_eq!(article.published, PublishedDate::Missing);
        assert!(article.title.is_none());
    }

    #[test]
    fn test_validate_takes_first_token_and_line() {
        let mut d = draft();
        d.id = Some(" 38000001\n12345 ".to_string());
        d.doi = Some("\n 10.1000/first \n10.1000/second".to_string());
        d.title = Some("   ".to_string());
        d.keywords = vec![" genomics ".to_string(), "".to_string()];

        let article = d.validate().unwrap();
        assert_eq!(article.id, "38000001");
        assert_eq!(article.doi, "10.1000/first");
        assert!(article.title.is_none());
        assert_eq!(article.keywords, vec!["genomics".to_string()]);
    }

    #[test]
    fn test_validate_rejects_missing_id_or_doi() {
        let mut d = draft();
        d.id = Some("  ".to_string());
        assert!(matches!(d.validate(), Err(IngestError::Validation(_))));

        let mut d = draft();
        d.doi = None;
        let err = d.validate().unwrap_err();
        assert!(err.to_string().contains("38000001"));
    }
}
