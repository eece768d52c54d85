//! Read-only search over the primary store.
//!
//! Filters by surnames and a date range, ranks by keyword hits:
//! title 2, keywords 1, abstract 0.5 per matching keyword.

use crate::error::Result;
use crate::store::PaperStore;
use rusqlite::params_from_iter;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default and maximum number of hits returned
pub const DEFAULT_LIMIT: usize = 500;

/// Search filters; every list entry is trimmed and lowercased
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperQuery {
    /// Every surname must occur in the row's `last_names`
    pub last_names: Vec<String>,
    /// Applied only when both bounds are set
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// A row matches if any keyword occurs in title, keywords or abstract
    pub keywords: Vec<String>,
    pub limit: usize,
}

impl Default for PaperQuery {
    fn default() -> Self {
        Self {
            last_names: Vec::new(),
            start_date: None,
            end_date: None,
            keywords: Vec::new(),
            limit: DEFAULT_LIMIT,
        }
    }
}

/// Query-string form used by the HTTP endpoint
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogParams {
    pub last_names: String,
    pub start_date: String,
    pub end_date: String,
    pub keywords: String,
}

impl From<CatalogParams> for PaperQuery {
    fn from(params: CatalogParams) -> Self {
        PaperQuery::from_csv_params(
            &params.last_names,
            &params.start_date,
            &params.end_date,
            &params.keywords,
        )
    }
}

impl PaperQuery {
    /// Build a query from comma-separated surname and keyword lists
    pub fn from_csv_params(last_names: &str, start_date: &str, end_date: &str, keywords: &str) -> Self {
        Self {
            last_names: split_csv(last_names),
            start_date: non_empty(start_date),
            end_date: non_empty(end_date),
            keywords: split_csv(keywords),
            limit: DEFAULT_LIMIT,
        }
    }
}

/// One ranked row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub names: String,
    pub title: String,
    pub journal: String,
    pub publication_date: String,
    pub doi: String,
    pub keywords: String,
    pub score: f64,
}

/// Run a query; ordered by score then year, both descending
pub fn search(store: &PaperStore, query: &PaperQuery) -> Result<Vec<SearchHit>> {
    let mut score_parts = Vec::new();
    let mut score_params: Vec<String> = Vec::new();
    for keyword in &query.keywords {
        score_parts.push(
            "(CASE WHEN instr(lower(title), ?) > 0 THEN 2 ELSE 0 END) \
             + (CASE WHEN instr(lower(keywords), ?) > 0 THEN 1 ELSE 0 END) \
             + (CASE WHEN instr(lower(abstract), ?) > 0 THEN 0.5 ELSE 0 END)",
        );
        score_params.extend(std::iter::repeat(keyword.clone()).take(3));
    }
    let score_expr = if score_parts.is_empty() {
        "0".to_string()
    } else {
        score_parts.join(" + ")
    };

    let mut clauses = vec!["1=1".to_string()];
    let mut where_params: Vec<String> = Vec::new();

    for name in &query.last_names {
        clauses.push("instr(lower(last_names), ?) > 0".to_string());
        where_params.push(name.clone());
    }

    if let (Some(start), Some(end)) = (&query.start_date, &query.end_date) {
        clauses.push("publication_date BETWEEN ? AND ?".to_string());
        where_params.push(start.clone());
        where_params.push(end.clone());
    }

    if !query.keywords.is_empty() {
        let any = query
            .keywords
            .iter()
            .map(|_| {
                "(instr(lower(title), ?) > 0 OR instr(lower(keywords), ?) > 0 OR instr(lower(abstract), ?) > 0)"
            })
            .collect::<Vec<_>>()
            .join(" OR ");
        clauses.push(format!("({})", any));
        for keyword in &query.keywords {
            where_params.extend(std::iter::repeat(keyword.clone()).take(3));
        }
    }

    let sql = format!(
        "SELECT authors, title, journal, publication_date, doi, keywords, ({}) AS score \
         FROM papers WHERE {} ORDER BY score DESC, year DESC LIMIT {}",
        score_expr,
        clauses.join(" AND "),
        query.limit.min(DEFAULT_LIMIT)
    );

    let conn = store.connection();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(score_params.iter().chain(&where_params)), |row| {
        Ok(SearchHit {
            names: row.get(0)?,
            title: row.get(1)?,
            journal: row.get(2)?,
            publication_date: row.get(3)?,
            doi: row.get(4)?,
            keywords: row.get(5)?,
            score: row.get(6)?,
        })
    })?;
    let hits = rows.collect::<rusqlite::Result<Vec<_>>>()?;

    debug!(
        store = %store.label(),
        last_names = ?query.last_names,
        keywords = ?query.keywords,
        hits = hits.len(),
        "Catalog search"
    );
    Ok(hits)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|part| part.trim().to_lowercase())
        .filter(|part| !part.is_empty())
        .collect()
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Paper;

    fn paper(id: &str, title: &str, last_names: &str, keywords: &str, abstract_text: &str, date: &str) -> Paper {
        Paper {
            id: id.to_string(),
            title: title.to_string(),
            doi: format!("https://doi.org/10.1000/{}", id),
            journal: "Journal".to_string(),
            year: date.get(..4).and_then(|y| y.parse().ok()),
            authors: last_names.to_string(),
            last_names: last_names.to_string(),
            keywords: keywords.to_string(),
            abstract_text: abstract_text.to_string(),
            publication_date: date.to_string(),
        }
    }

    fn store() -> PaperStore {
        let mut store = PaperStore::open_in_memory().unwrap();
        let writer = store.writer().unwrap();
        for p in [
            paper("1", "Polymer films", "Smith, Jones", "polymers", "No Abstract", "2023-05-01"),
            paper("2", "Soft matter", "Smith", "polymer physics", "We study polymer gels", "2024-02-01"),
            paper("3", "Cell biology", "Lee", "No Keywords", "About polymer scaffolds", "2024-03-01"),
            paper("4", "Unrelated", "Jones", "No Keywords", "No Abstract", "2022-01-01"),
        ] {
            writer.upsert(&p).unwrap();
        }
        writer.commit().unwrap();
        store
    }

    fn ids(hits: &[SearchHit]) -> Vec<String> {
        hits.iter()
            .map(|h| h.doi.trim_start_matches("https://doi.org/10.1000/").to_string())
            .collect()
    }

    #[test]
    fn test_from_csv_params() {
        let q = PaperQuery::from_csv_params(" Smith, ,JONES ", "2024-01-01", "", "Polymer");
        assert_eq!(q.last_names, vec!["smith", "jones"]);
        assert_eq!(q.start_date.as_deref(), Some("2024-01-01"));
        assert_eq!(q.end_date, None);
        assert_eq!(q.keywords, vec!["polymer"]);
        assert_eq!(q.limit, DEFAULT_LIMIT);
    }

    #[test]
    fn test_keyword_scoring_order() {
        let store = store();
        let hits = search(&store, &PaperQuery::from_csv_params("", "", "", "polymer")).unwrap();
        // 1: title + keywords = 3, 2: keywords + abstract = 1.5, 3: abstract = 0.5
        assert_eq!(ids(&hits), vec!["1", "2", "3"]);
        assert_eq!(hits[0].score, 3.0);
        assert_eq!(hits[1].score, 1.5);
        assert_eq!(hits[2].score, 0.5);
    }

    #[test]
    fn test_surname_filter_requires_all() {
        let store = store();
        let hits = search(&store, &PaperQuery::from_csv_params("smith,jones", "", "", "")).unwrap();
        assert_eq!(ids(&hits), vec!["1"]);

        // Without keywords every score is 0, so newest year first.
        let hits = search(&store, &PaperQuery::from_csv_params("smith", "", "", "")).unwrap();
        assert_eq!(ids(&hits), vec!["2", "1"]);
    }

    #[test]
    fn test_date_range_needs_both_bounds() {
        let store = store();
        let hits = search(&store, &PaperQuery::from_csv_params("", "2024-01-01", "2024-12-31", "")).unwrap();
        assert_eq!(hits.len(), 2);

        let hits = search(&store, &PaperQuery::from_csv_params("", "2024-01-01", "", "")).unwrap();
        assert_eq!(hits.len(), 4);
    }

    #[test]
    fn test_limit() {
        let store = store();
        let mut q = PaperQuery::default();
        q.limit = 1;
        assert_eq!(search(&store, &q).unwrap().len(), 1);
    }
}
