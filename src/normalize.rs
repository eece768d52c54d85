//! Shared text normalization for duplicate detection.

use crate::error::{IngestError, Result};
use regex::Regex;

/// Lowercases text and collapses every run of non-word characters to one space.
///
/// Built once per process and handed to the stages that need it.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    non_word: Regex,
}

impl TextNormalizer {
    pub fn new() -> Result<Self> {
        let non_word = Regex::new(r"\W+")
            .map_err(|e| IngestError::Config(format!("Invalid normalizer pattern: {}", e)))?;
        Ok(Self { non_word })
    }

    pub fn normalize(&self, text: &str) -> String {
        self.non_word
            .replace_all(&text.to_lowercase(), " ")
            .trim()
            .to_string()
    }
}
