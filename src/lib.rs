//! # pubwatch
//!
//! Incremental harvester for publications by authors of one institution.
//!
//! ## Modules
//!
//! - [`window`] - Fetch window scheduling from the store's high-water mark
//! - [`source`] / [`pubmed`] - Literature source boundary and the PubMed client
//! - [`harvest`] - Windowed querying with pacing and rate-limit recovery
//! - [`filter`] - Affiliation filter and canonical rows
//! - [`dedup`] - Exact and fuzzy duplicate detection
//! - [`store`] - SQLite primary and delta stores
//! - [`pipeline`] - One complete ingestion run
//! - [`catalog`] / [`digest`] - Read-only consumers of the stores
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pubwatch::{config::Config, pipeline::Pipeline, pubmed::PubMedClient};
//! use pubwatch::{normalize::TextNormalizer, store::PaperStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     let source = PubMedClient::new(&config.source)?;
//!     let primary = PaperStore::open(&config.primary_db)?;
//!     let delta = PaperStore::open(&config.delta_db)?;
//!     let mut pipeline = Pipeline::new(config, source, TextNormalizer::new()?, primary, delta);
//!     let report = pipeline.run(chrono::Local::now().date_naive()).await?;
//!     println!("Added {} papers", report.added);
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod dedup;
pub mod digest;
pub mod error;
pub mod filter;
pub mod harvest;
pub mod normalize;
pub mod pipeline;
pub mod pubmed;
pub mod similarity;
pub mod source;
pub mod store;
pub mod window;

pub use error::{IngestError, Result};
