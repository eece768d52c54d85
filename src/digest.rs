//! CSV digest of the rows added by the latest run.

use crate::error::Result;
use crate::filter::Paper;
use crate::store::PaperStore;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::info;

#[derive(Debug, Serialize)]
struct DigestRow<'a> {
    #[serde(rename = "Names")]
    names: &'a str,
    #[serde(rename = "Title")]
    title: &'a str,
    #[serde(rename = "Journal")]
    journal: &'a str,
    #[serde(rename = "Year")]
    year: Option<i32>,
    #[serde(rename = "DOI")]
    doi: &'a str,
    #[serde(rename = "Date")]
    date: &'a str,
}

impl<'a> From<&'a Paper> for DigestRow<'a> {
    fn from(paper: &'a Paper) -> Self {
        Self {
            names: &paper.authors,
            title: &paper.title,
            journal: &paper.journal,
            year: paper.year,
            doi: &paper.doi,
            date: &paper.publication_date,
        }
    }
}

/// Write every delta row as CSV; returns the number of rows written.
pub fn write_digest<W: Write>(delta: &PaperStore, out: W) -> Result<usize> {
    let papers = delta.all()?;

    let mut wtr = csv::WriterBuilder::new().has_headers(true).from_writer(out);
    if papers.is_empty() {
        wtr.write_record(["Names", "Title", "Journal", "Year", "DOI", "Date"])?;
    }
    for paper in &papers {
        wtr.serialize(DigestRow::from(paper))?;
    }
    wtr.flush()?;
    Ok(papers.len())
}

pub fn write_digest_file(delta: &PaperStore, path: &Path) -> Result<usize> {
    let file = std::fs::File::create(path)?;
    let rows = write_digest(delta, file)?;
    info!(path = %path.display(), rows = rows, "Digest written");
    Ok(rows)
}
