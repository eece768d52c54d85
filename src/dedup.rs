//! Duplicate detection.
//!
//! Two stages run on every ingestion batch:
//!
//! 1. [`exact_dedupe`] drops later records whose normalized `(title, last_names)`
//!    equals an earlier one in the same batch.
//! 2. [`FuzzyMatcher`] scores every pair of the full corpus (stored + new) and
//!    [`mark_duplicates`] appends the duplicate marker to both members of each
//!    matching pair. Nothing is merged or deleted: fuzzy hits are flagged for
//!    human review.

use crate::config::DedupConfig;
use crate::filter::Paper;
use crate::normalize::TextNormalizer;
use crate::similarity::{ratio_chars, ratio_upper_bound, token_set_ratio};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info};

/// Drop exact duplicates, keeping the first occurrence in input order.
pub fn exact_dedupe(papers: Vec<Paper>, normalizer: &TextNormalizer) -> Vec<Paper> {
    let before = papers.len();
    let mut seen: HashSet<(String, String)> = HashSet::with_capacity(before);

    let kept: Vec<Paper> = papers
        .into_iter()
        .filter(|p| {
            seen.insert((
                normalizer.normalize(&p.title),
                normalizer.normalize(&p.last_names),
            ))
        })
        .collect();

    info!(
        before = before,
        after = kept.len(),
        "Exact duplicate pass complete"
    );
    kept
}

/// One record of the fuzzy corpus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub id: String,
    pub title: String,
    pub last_names: String,
}

/// A pair of corpus indices that satisfied both thresholds (`left < right`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuplicatePair {
    pub left: usize,
    pub right: usize,
    pub title_sim: f64,
    pub name_sim: f64,
}

/// Pairwise approximate matcher
pub struct FuzzyMatcher<'a> {
    normalizer: &'a TextNormalizer,
    title_threshold: f64,
    name_threshold: f64,
}

impl<'a> FuzzyMatcher<'a> {
    pub fn new(normalizer: &'a TextNormalizer, config: &DedupConfig) -> Self {
        Self {
            normalizer,
            title_threshold: config.title_threshold,
            name_threshold: config.name_threshold,
        }
    }

    /// Both bounds are inclusive.
    pub fn is_possible_duplicate(&self, title_sim: f64, name_sim: f64) -> bool {
        title_sim >= self.title_threshold && name_sim >= self.name_threshold
    }

    /// Every unordered pair of distinct entries satisfying both thresholds.
    ///
    /// Entries are swept in order of normalized title length. Once the length
    /// bound of the title ratio drops below the threshold, no later (longer)
    /// title can match and the inner scan stops. The result equals the full
    /// O(n²) scan.
    pub fn find_pairs(&self, corpus: &[CorpusEntry]) -> Vec<DuplicatePair> {
        let titles: Vec<Vec<char>> = corpus
            .iter()
            .map(|e| self.normalizer.normalize(&e.title).chars().collect())
            .collect();
        let names: Vec<String> = corpus
            .iter()
            .map(|e| self.normalizer.normalize(&e.last_names))
            .collect();

        let mut order: Vec<usize> = (0..corpus.len()).collect();
        order.sort_by_key(|&i| (titles[i].len(), i));

        let mut pairs = Vec::new();
        let mut compared = 0usize;

        for (pos, &a) in order.iter().enumerate() {
            for &b in &order[pos + 1..] {
                if ratio_upper_bound(titles[a].len(), titles[b].len()) < self.title_threshold {
                    break;
                }
                compared += 1;

                let name_sim = token_set_ratio(&names[a], &names[b]);
                if name_sim < self.name_threshold {
                    continue;
                }
                let title_sim = ratio_chars(&titles[a], &titles[b]);
                if !self.is_possible_duplicate(title_sim, name_sim) {
                    continue;
                }

                let (left, right) = if a < b { (a, b) } else { (b, a) };
                debug!(
                    left = %corpus[left].id,
                    right = %corpus[right].id,
                    title_sim = title_sim,
                    name_sim = name_sim,
                    "Possible duplicate"
                );
                pairs.push(DuplicatePair {
                    left,
                    right,
                    title_sim,
                    name_sim,
                });
            }
        }

        pairs.sort_by_key(|p| (p.left, p.right));
        info!(
            corpus = corpus.len(),
            compared = compared,
            pairs = pairs.len(),
            "Fuzzy duplicate pass complete"
        );
        pairs
    }
}

/// Append `marker` to both members of every pair.
///
/// Titles already ending with the marker are left alone. Returns the indices
/// whose title changed, ascending.
pub fn mark_duplicates(corpus: &mut [CorpusEntry], pairs: &[DuplicatePair], marker: &str) -> Vec<usize> {
    let directives: BTreeSet<usize> = pairs.iter().flat_map(|p| [p.left, p.right]).collect();

    let mut changed = Vec::new();
    for idx in directives {
        let Some(entry) = corpus.get_mut(idx) else {
            continue;
        };
        if !entry.title.ends_with(marker) {
            entry.title.push_str(marker);
            changed.push(idx);
        }
    }
    changed
}
