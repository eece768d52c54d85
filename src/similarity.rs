//! Lexical similarity scores on a 0-100 scale.
//!
//! Both scores are built on the rapidfuzz Indel distance (insertions and
//! deletions only), computed over characters:
//!
//! - [`ratio`]: `100 * (|a| + |b| - dist) / (|a| + |b|)`
//! - [`token_set_ratio`]: compares the shared token set and the sorted token
//!   differences, so word order and subset relations do not lower the score

use rapidfuzz::distance::indel;
use std::collections::BTreeSet;

/// Indel distance between two character slices
fn indel_distance(a: &[char], b: &[char]) -> usize {
    indel::distance(a.iter().copied(), b.iter().copied())
}

/// Normalized similarity for a distance over `total` characters
fn normalized(dist: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    100.0 * (total - dist.min(total)) as f64 / total as f64
}

/// Highest score [`ratio`] can reach for strings of the given lengths.
pub fn ratio_upper_bound(len_a: usize, len_b: usize) -> f64 {
    let total = len_a + len_b;
    normalized(total - 2 * len_a.min(len_b), total)
}

/// Character-level similarity of two strings
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

/// [`ratio`] over pre-split characters
pub fn ratio_chars(a: &[char], b: &[char]) -> f64 {
    normalized(indel_distance(a, b), a.len() + b.len())
}

/// Token-set similarity; 0 when either side has no tokens
pub fn token_set_ratio(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersect: Vec<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let diff_ab: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let diff_ba: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    // One side is a subset of the other.
    if !intersect.is_empty() && (diff_ab.is_empty() || diff_ba.is_empty()) {
        return 100.0;
    }

    let diff_ab: Vec<char> = diff_ab.join(" ").chars().collect();
    let diff_ba: Vec<char> = diff_ba.join(" ").chars().collect();
    let sect_len = intersect.join(" ").chars().count();
    let sep = usize::from(sect_len > 0);

    let sect_ab_len = sect_len + sep + diff_ab.len();
    let sect_ba_len = sect_len + sep + diff_ba.len();

    let result = normalized(indel_distance(&diff_ab, &diff_ba), sect_ab_len + sect_ba_len);
    if sect_len == 0 {
        return result;
    }

    // "sect" against "sect + diff" only differs by the diff (and the separator).
    let sect_ab_ratio = normalized(sep + diff_ab.len(), sect_len + sect_ab_len);
    let sect_ba_ratio = normalized(sep + diff_ba.len(), sect_len + sect_ba_len);

    result.max(sect_ab_ratio).max(sect_ba_ratio)
}
