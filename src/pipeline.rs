//! One ingestion run: schedule, harvest, filter, dedupe, persist.
//!
//! Nothing is committed until every earlier stage has succeeded. The delta
//! store is the one exception: it is emptied up front so that downstream
//! readers never see rows from an older run.
//!
//! An interrupt flag is checked after the harvest, after the fuzzy pass and
//! immediately before the commits; once set, the run stops with
//! [`IngestError::Interrupted`] and the pending transactions roll back.

use crate::config::Config;
use crate::dedup::{exact_dedupe, mark_duplicates, CorpusEntry, FuzzyMatcher};
use crate::error::{IngestError, Result};
use crate::filter::{AffiliationFilter, Paper};
use crate::harvest::Harvester;
use crate::normalize::TextNormalizer;
use crate::source::LiteratureSource;
use crate::store::PaperStore;
use crate::window::WindowPlan;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Rows written to the primary store
    pub added: usize,
    /// Pre-existing rows whose title gained the duplicate marker
    pub updated: usize,
    /// Rows written to the delta store
    pub delta_rows: usize,
}

/// Ingestion pipeline over a literature source and the two stores
pub struct Pipeline<S: LiteratureSource> {
    config: Config,
    source: S,
    normalizer: TextNormalizer,
    primary: PaperStore,
    delta: PaperStore,
    interrupt: Arc<AtomicBool>,
}

impl<S: LiteratureSource> Pipeline<S> {
    pub fn new(
        config: Config,
        source: S,
        normalizer: TextNormalizer,
        primary: PaperStore,
        delta: PaperStore,
    ) -> Self {
        Self {
            config,
            source,
            normalizer,
            primary,
            delta,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an interrupt flag, typically set from a signal handler
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn primary(&self) -> &PaperStore {
        &self.primary
    }

    pub fn delta(&self) -> &PaperStore {
        &self.delta
    }

    /// Execute one run with `today` as the upper bound of the fetch range.
    pub async fn run(&mut self, today: NaiveDate) -> Result<RunReport> {
        self.delta.reset()?;

        let high_water_mark = match self.primary.high_water_mark()? {
            Some(date) => date,
            None => {
                info!(epoch = %self.config.schedule.epoch, "Primary store empty, starting from epoch");
                self.config.schedule.epoch
            }
        };

        let Some(plan) = WindowPlan::new(high_water_mark, today, self.config.schedule.window_days)
        else {
            info!(
                high_water_mark = %high_water_mark,
                today = %today,
                "Store is current, nothing to fetch"
            );
            return Ok(RunReport::default());
        };
        info!(
            lower = %plan.lower,
            upper = %plan.upper,
            windows = plan.len(),
            "Planned fetch windows"
        );

        let raw = Harvester::new(
            &self.source,
            &self.config.affiliation.query_variants,
            &self.config.pacing,
        )
        .harvest(&plan)
        .await?;
        ensure_running(&self.interrupt)?;

        let filter = AffiliationFilter::new(&self.config.affiliation);
        let papers = filter.filter_batch(&raw);
        info!(
            fetched = raw.len(),
            affiliated = papers.len(),
            "Affiliation filter complete"
        );

        let papers = exact_dedupe(papers, &self.normalizer);
        let papers = drop_doi_collisions(papers, self.primary.doi_holders()?);
        self.persist(papers).await
    }

    /// Fuzzy-tag the combined corpus and write both stores.
    async fn persist(&mut self, mut papers: Vec<Paper>) -> Result<RunReport> {
        let marker = self.config.dedup.duplicate_marker.clone();
        let incoming: HashSet<&str> = papers.iter().map(|p| p.id.as_str()).collect();

        // Stored copies of re-fetched ids are about to be replaced; only their
        // marker survives.
        let mut refetched_titles: HashMap<String, String> = HashMap::new();
        let mut corpus: Vec<CorpusEntry> = Vec::new();
        for entry in self.primary.corpus()? {
            if incoming.contains(entry.id.as_str()) {
                refetched_titles.insert(entry.id, entry.title);
            } else {
                corpus.push(entry);
            }
        }
        let existing = corpus.len();

        for paper in &mut papers {
            let carries_marker = refetched_titles
                .get(&paper.id)
                .is_some_and(|stored| stored.ends_with(&marker));
            if carries_marker && !paper.title.ends_with(&marker) {
                debug!(id = %paper.id, "Keeping duplicate marker from stored copy");
                paper.title.push_str(&marker);
            }
        }

        corpus.extend(papers.iter().map(|p| CorpusEntry {
            id: p.id.clone(),
            title: p.title.clone(),
            last_names: p.last_names.clone(),
        }));

        // The quadratic pass runs off the async workers.
        let normalizer = self.normalizer.clone();
        let dedup = self.config.dedup.clone();
        let (corpus, changed) = tokio::task::spawn_blocking(move || {
            let mut corpus = corpus;
            let pairs = FuzzyMatcher::new(&normalizer, &dedup).find_pairs(&corpus);
            let changed = mark_duplicates(&mut corpus, &pairs, &dedup.duplicate_marker);
            (corpus, changed)
        })
        .await?;
        ensure_running(&self.interrupt)?;

        for (paper, entry) in papers.iter_mut().zip(&corpus[existing..]) {
            paper.title.clone_from(&entry.title);
        }

        let mut report = RunReport::default();
        let interrupt = Arc::clone(&self.interrupt);

        let primary = self.primary.writer()?;
        for idx in changed.iter().copied().filter(|&idx| idx < existing) {
            let entry = &corpus[idx];
            if primary.update_title(&entry.id, &entry.title)? {
                report.updated += 1;
            }
        }
        for paper in &papers {
            if primary.upsert(paper)? {
                report.added += 1;
            }
        }

        let delta = self.delta.writer()?;
        for paper in &papers {
            if delta.upsert(paper)? {
                report.delta_rows += 1;
            }
        }

        // Dropping the writers here rolls both transactions back.
        ensure_running(&interrupt)?;
        primary.commit()?;
        delta.commit()?;

        info!(
            added = report.added,
            updated = report.updated,
            delta_rows = report.delta_rows,
            refetched = refetched_titles.len(),
            "Run committed"
        );
        Ok(report)
    }
}

fn ensure_running(interrupt: &AtomicBool) -> Result<()> {
    if interrupt.load(Ordering::SeqCst) {
        warn!("Interrupt received, discarding uncommitted work");
        return Err(IngestError::Interrupted);
    }
    Ok(())
}

/// Drop rows whose DOI already belongs to another id, in the store or earlier
/// in the batch.
fn drop_doi_collisions(papers: Vec<Paper>, mut holders: HashMap<String, String>) -> Vec<Paper> {
    papers
        .into_iter()
        .filter(|paper| match holders.get(&paper.doi).cloned() {
            Some(holder) if holder != paper.id => {
                warn!(
                    id = %paper.id,
                    doi = %paper.doi,
                    held_by = %holder,
                    "DOI already belongs to another id, record skipped"
                );
                false
            }
            Some(_) => true,
            None => {
                holders.insert(paper.doi.clone(), paper.id.clone());
                true
            }
        })
        .collect()
}
