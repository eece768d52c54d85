//! Runtime configuration.
//!
//! Every tunable of the ingestion run lives here and is supplied from outside the
//! binary: a JSON file (all keys optional) plus a couple of environment overrides
//! for values that should not be written to disk.

use crate::error::{IngestError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable overriding `source.contact_email`
pub const CONTACT_EMAIL_ENV: &str = "PUBWATCH_CONTACT_EMAIL";

/// Environment variable overriding `source.api_key`
pub const API_KEY_ENV: &str = "NCBI_API_KEY";

/// File name looked up in the working directory when no path is given
const LOCAL_CONFIG_FILE: &str = "pubwatch.json";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cumulative store
    pub primary_db: PathBuf,
    /// Per-run store of newly added rows
    pub delta_db: PathBuf,
    pub source: SourceConfig,
    pub schedule: ScheduleConfig,
    pub pacing: PacingConfig,
    pub affiliation: AffiliationConfig,
    pub dedup: DedupConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            primary_db: PathBuf::from("papers.db"),
            delta_db: PathBuf::from("papers_delta.db"),
            source: SourceConfig::default(),
            schedule: ScheduleConfig::default(),
            pacing: PacingConfig::default(),
            affiliation: AffiliationConfig::default(),
            dedup: DedupConfig::default(),
        }
    }
}

/// NCBI E-utilities connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    /// `tool` parameter sent with every request
    pub tool: String,
    /// `email` parameter sent with every request; required for ingestion
    pub contact_email: String,
    pub api_key: Option<String>,
    /// `retmax` per esearch page; searches page until the hit count is reached
    pub max_results: usize,
    /// Identifiers per efetch request
    pub fetch_batch_size: usize,
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string(),
            tool: "pubwatch".to_string(),
            contact_email: String::new(),
            api_key: None,
            max_results: 1_000,
            fetch_batch_size: 250,
            request_timeout_secs: 60,
        }
    }
}

/// Window scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// High-water mark used when the primary store is empty
    pub epoch: NaiveDate,
    /// Maximum span (end - start) of one fetch window
    pub window_days: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            epoch: NaiveDate::from_ymd_opt(2015, 1, 1).unwrap_or_default(),
            window_days: 60,
        }
    }
}

/// Throttling between requests and rate-limit recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Sleep after every variant query
    pub query_interval_secs: u64,
    /// Extra sleep after every window
    pub window_interval_secs: u64,
    /// Sleep before retrying a rate-limited query
    pub rate_limit_cooldown_secs: u64,
    /// `None` retries forever
    pub max_rate_limit_retries: Option<u32>,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            query_interval_secs: 3,
            window_interval_secs: 1,
            rate_limit_cooldown_secs: 120,
            max_rate_limit_retries: None,
        }
    }
}

impl PacingConfig {
    pub fn query_interval(&self) -> Duration {
        Duration::from_secs(self.query_interval_secs)
    }

    pub fn window_interval(&self) -> Duration {
        Duration::from_secs(self.window_interval_secs)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }
}

/// Target institution description
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AffiliationConfig {
    /// Source query phrasings, one search per window each
    pub query_variants: Vec<String>,
    /// Token every qualifying affiliation must contain
    pub location_marker: String,
    /// Canonical phrasings; one must appear in a qualifying affiliation
    pub institution_names: Vec<String>,
}

impl Default for AffiliationConfig {
    fn default() -> Self {
        Self {
            query_variants: vec![
                "\"University of Massachusetts Amherst\"[AD]".to_string(),
                "\"University of Massachusetts, Amherst\"[AD]".to_string(),
                "\"UMass Amherst\"[AD]".to_string(),
                "\"UMass-Amherst\"[AD]".to_string(),
                "\"University of Massachusetts\"[AD] AND Amherst[AD]".to_string(),
            ],
            location_marker: "amherst".to_string(),
            institution_names: vec![
                "umass-amherst".to_string(),
                "umass amherst".to_string(),
                "university of massachusetts".to_string(),
            ],
        }
    }
}

/// Fuzzy duplicate tagging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Minimum title ratio (0-100, inclusive)
    pub title_threshold: f64,
    /// Minimum surname token-set ratio (0-100, inclusive)
    pub name_threshold: f64,
    /// Suffix appended to flagged titles
    pub duplicate_marker: String,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            title_threshold: 80.0,
            name_threshold: 75.0,
            duplicate_marker: " (possible duplicate)".to_string(),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// Lookup order: explicit `path`, `./pubwatch.json`, then
    /// `<config dir>/pubwatch/config.json`; defaults when none exists.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::discover() {
                Some(found) => Self::from_file(&found)?,
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|dir| dir.join("pubwatch").join("config.json"))
            .filter(|p| p.exists())
    }

    fn apply_env(&mut self) {
        if let Ok(email) = std::env::var(CONTACT_EMAIL_ENV) {
            if !email.trim().is_empty() {
                self.source.contact_email = email.trim().to_string();
            }
        }
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.source.api_key = Some(key.trim().to_string());
            }
        }
    }

    /// Check everything an ingestion run depends on.
    pub fn validate(&self) -> Result<()> {
        if self.source.contact_email.trim().is_empty() {
            return Err(IngestError::Config(format!(
                "source.contact_email is required (or set {})",
                CONTACT_EMAIL_ENV
            )));
        }
        if self.source.fetch_batch_size == 0 {
            return Err(IngestError::Config(
                "source.fetch_batch_size must be positive".to_string(),
            ));
        }
        if self.schedule.window_days == 0 {
            return Err(IngestError::Config(
                "schedule.window_days must be positive".to_string(),
            ));
        }
        if self.affiliation.query_variants.is_empty() {
            return Err(IngestError::Config(
                "affiliation.query_variants must not be empty".to_string(),
            ));
        }
        if self.affiliation.institution_names.is_empty() {
            return Err(IngestError::Config(
                "affiliation.institution_names must not be empty".to_string(),
            ));
        }
        for (name, value) in [
            ("dedup.title_threshold", self.dedup.title_threshold),
            ("dedup.name_threshold", self.dedup.name_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(IngestError::Config(format!(
                    "{} must be within 0..=100, got {}",
                    name, value
                )));
            }
        }
        if self.dedup.duplicate_marker.is_empty() {
            return Err(IngestError::Config(
                "dedup.duplicate_marker must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn valid() -> Config {
        let mut config = Config::default();
        config.source.contact_email = "ops@example.org".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.schedule.window_days, 60);
        assert_eq!(config.pacing.rate_limit_cooldown(), Duration::from_secs(120));
        assert_eq!(config.pacing.max_rate_limit_retries, None);
        assert_eq!(config.affiliation.query_variants.len(), 5);
        assert_eq!(config.dedup.duplicate_marker, " (possible duplicate)");
        assert_eq!(
            config.schedule.epoch,
            NaiveDate::from_ymd_opt(2015, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            file,
            r#"{{"schedule": {{"window_days": 30}}, "source": {{"contact_email": "a@b.org"}}}}"#
        )?;

        let config = Config::from_file(file.path())?;
        assert_eq!(config.schedule.window_days, 30);
        assert_eq!(config.source.contact_email, "a@b.org");
        assert_eq!(config.source.fetch_batch_size, 250);
        assert_eq!(config.dedup.title_threshold, 80.0);
        config.validate()
    }

    #[test]
    fn test_example_file_parses() -> Result<()> {
        let config: Config = serde_json::from_str(include_str!("../pubwatch.example.json"))?;
        assert_eq!(config.pacing.max_rate_limit_retries, None);
        assert_eq!(config.affiliation.institution_names.len(), 3);
        config.validate()
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::from_file(Path::new("/nonexistent/pubwatch.json"));
        assert!(matches!(err, Err(IngestError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(Config::default().validate().is_err());
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.schedule.window_days = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.dedup.name_threshold = 101.0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.affiliation.query_variants.clear();
        assert!(config.validate().is_err());
    }
}
