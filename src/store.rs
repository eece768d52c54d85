//! SQLite persistence for paper rows.
//!
//! The primary and delta stores share one schema. Writes go through a
//! [`StoreWriter`] transaction so a failed run leaves the stores untouched.
//! Rows are keyed by id and never deleted, except by [`PaperStore::reset`].

use crate::dedup::CorpusEntry;
use crate::error::{IngestError, Result};
use crate::filter::Paper;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, Transaction};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS papers (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    doi TEXT NOT NULL UNIQUE,
    journal TEXT NOT NULL,
    year INTEGER,
    authors TEXT NOT NULL,
    last_names TEXT NOT NULL,
    keywords TEXT NOT NULL,
    abstract TEXT NOT NULL,
    publication_date TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_papers_year ON papers(year);
CREATE INDEX IF NOT EXISTS idx_papers_title ON papers(title);
";

const COLUMNS: &str =
    "id, title, doi, journal, year, authors, last_names, keywords, abstract, publication_date";

/// Rows whose date starts with an ISO calendar date
const ISO_DATE_GLOB: &str = "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]*";

/// A paper table in one SQLite file
pub struct PaperStore {
    conn: Connection,
    label: String,
}

impl PaperStore {
    /// Open (creating if needed) a store
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %path.display(), "Opened paper store");
        Ok(Self {
            conn,
            label: path.display().to_string(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            label: ":memory:".to_string(),
        })
    }

    /// Open an existing store without write access
    pub fn open_read_only(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(IngestError::Config(format!(
                "Store {} does not exist",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn,
            label: path.display().to_string(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Delete every row and commit immediately
    pub fn reset(&mut self) -> Result<usize> {
        let removed = self.conn.execute("DELETE FROM papers", [])?;
        info!(store = %self.label, removed = removed, "Store reset");
        Ok(removed)
    }

    /// Latest ISO publication date, ignoring `Unknown` and partial dates
    pub fn high_water_mark(&self) -> Result<Option<NaiveDate>> {
        let latest: Option<String> = self.conn.query_row(
            "SELECT MAX(substr(publication_date, 1, 10)) FROM papers WHERE publication_date GLOB ?1",
            params![ISO_DATE_GLOB],
            |row| row.get(0),
        )?;

        latest
            .map(|s| {
                NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| {
                    IngestError::Parse(format!("Stored publication date {:?}: {}", s, e))
                })
            })
            .transpose()
    }

    /// Id, title and surnames of every row, in insertion order
    pub fn corpus(&self) -> Result<Vec<CorpusEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, title, last_names FROM papers ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok(CorpusEntry {
                id: row.get(0)?,
                title: row.get(1)?,
                last_names: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// DOI to identifier of every stored row
    pub fn doi_holders(&self) -> Result<HashMap<String, String>> {
        let mut stmt = self.conn.prepare("SELECT doi, id FROM papers")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<HashMap<_, _>>>()?)
    }

    pub fn get(&self, id: &str) -> Result<Option<Paper>> {
        let sql = format!("SELECT {} FROM papers WHERE id = ?1", COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![id], row_to_paper)
            .optional()?)
    }

    /// Every row in insertion order
    pub fn all(&self) -> Result<Vec<Paper>> {
        let sql = format!("SELECT {} FROM papers ORDER BY rowid", COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_paper)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM papers", [], |row| row.get(0))?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    /// Start a write transaction; dropped without [`StoreWriter::commit`] it rolls back.
    pub fn writer(&mut self) -> Result<StoreWriter<'_>> {
        Ok(StoreWriter {
            tx: self.conn.transaction()?,
        })
    }
}

/// Pending writes against one store
pub struct StoreWriter<'a> {
    tx: Transaction<'a>,
}

impl StoreWriter<'_> {
    /// Insert, or update the row with the same identifier.
    ///
    /// Returns false without writing when the DOI is already stored under a
    /// different identifier.
    pub fn upsert(&self, paper: &Paper) -> Result<bool> {
        let holder: Option<String> = self
            .tx
            .query_row(
                "SELECT id FROM papers WHERE doi = ?1 AND id <> ?2",
                params![paper.doi, paper.id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(holder) = holder {
            warn!(
                id = %paper.id,
                doi = %paper.doi,
                held_by = %holder,
                "DOI already stored under another id, row skipped"
            );
            return Ok(false);
        }

        let sql = format!(
            "INSERT INTO papers ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(id) DO UPDATE SET \
             title = excluded.title, doi = excluded.doi, journal = excluded.journal, \
             year = excluded.year, authors = excluded.authors, last_names = excluded.last_names, \
             keywords = excluded.keywords, abstract = excluded.abstract, \
             publication_date = excluded.publication_date",
            COLUMNS
        );
        self.tx.execute(
            &sql,
            params![
                paper.id,
                paper.title,
                paper.doi,
                paper.journal,
                paper.year,
                paper.authors,
                paper.last_names,
                paper.keywords,
                paper.abstract_text,
                paper.publication_date,
            ],
        )?;
        Ok(true)
    }

    /// Overwrite a stored title; false when the id is unknown
    pub fn update_title(&self, id: &str, title: &str) -> Result<bool> {
        let changed = self.tx.execute(
            "UPDATE papers SET title = ?1 WHERE id = ?2",
            params![title, id],
        )?;
        Ok(changed > 0)
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }
}

fn row_to_paper(row: &Row<'_>) -> rusqlite::Result<Paper> {
    Ok(Paper {
        id: row.get(0)?,
        title: row.get(1)?,
        doi: row.get(2)?,
        journal: row.get(3)?,
        year: row.get(4)?,
        authors: row.get(5)?,
        last_names: row.get(6)?,
        keywords: row.get(7)?,
        abstract_text: row.get(8)?,
        publication_date: row.get(9)?,
    })
}
