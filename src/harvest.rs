//! Windowed harvesting from a [`LiteratureSource`].
//!
//! For every window of the plan, newest first, each affiliation query variant is
//! issued once. Rate-limited queries are retried after a cooldown; any other
//! source error aborts the harvest.

use crate::config::PacingConfig;
use crate::error::Result;
use crate::source::{LiteratureSource, RawArticle};
use crate::window::{FetchWindow, WindowPlan};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Source query for one variant and window
pub fn build_query(variant: &str, window: &FetchWindow) -> String {
    format!("{} AND {}[DP]", variant, window.date_range())
}

/// Drives the source over a window plan
pub struct Harvester<'a, S: LiteratureSource + ?Sized> {
    source: &'a S,
    variants: &'a [String],
    pacing: &'a PacingConfig,
}

impl<'a, S: LiteratureSource + ?Sized> Harvester<'a, S> {
    pub fn new(source: &'a S, variants: &'a [String], pacing: &'a PacingConfig) -> Self {
        Self {
            source,
            variants,
            pacing,
        }
    }

    /// Collect every record of the plan, first occurrence of each id wins.
    pub async fn harvest(&self, plan: &WindowPlan) -> Result<Vec<RawArticle>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut articles = Vec::new();

        for (idx, window) in plan.windows.iter().enumerate() {
            info!(
                window = %window,
                index = idx + 1,
                total = plan.len(),
                "Fetching window"
            );

            let before = articles.len();
            for variant in self.variants {
                let term = build_query(variant, window);
                let batch = self.query_with_retry(&term).await?;
                let fetched = batch.len();

                articles.extend(batch.into_iter().filter(|a| seen.insert(a.id.clone())));
                debug!(term = %term, fetched = fetched, "Variant query complete");

                pause(self.pacing.query_interval()).await;
            }

            info!(
                window = %window,
                new_records = articles.len() - before,
                "Window complete"
            );
            pause(self.pacing.window_interval()).await;
        }

        info!(
            windows = plan.len(),
            records = articles.len(),
            "Harvest complete"
        );
        Ok(articles)
    }

    /// Run a query, sleeping through rate limits until it succeeds or the
    /// retry cap is exhausted.
    async fn query_with_retry(&self, term: &str) -> Result<Vec<RawArticle>> {
        let mut retries: u32 = 0;
        loop {
            match self.source.search(term).await {
                Ok(batch) => return Ok(batch),
                Err(e) if e.is_rate_limit() => {
                    if self
                        .pacing
                        .max_rate_limit_retries
                        .is_some_and(|cap| retries >= cap)
                    {
                        warn!(term = %term, retries = retries, "Rate limit retries exhausted");
                        return Err(e);
                    }
                    retries += 1;
                    let wait = self.pacing.rate_limit_cooldown();
                    warn!(
                        term = %term,
                        attempt = retries,
                        wait_secs = wait.as_secs(),
                        "Rate limited, cooling down"
                    );
                    pause(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::source::PublishedDate;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted responses and records every query term
    struct ScriptedSource {
        responses: Mutex<VecDeque<Result<Vec<RawArticle>>>>,
        terms: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Vec<RawArticle>>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                terms: Mutex::new(Vec::new()),
            }
        }

        fn terms(&self) -> Vec<String> {
            self.terms.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LiteratureSource for ScriptedSource {
        async fn search(&self, term: &str) -> Result<Vec<RawArticle>> {
            self.terms.lock().unwrap().push(term.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn article(id: &str) -> RawArticle {
        RawArticle {
            id: id.to_string(),
            doi: format!("10.1000/{}", id),
            title: Some(format!("Title {}", id)),
            journal: None,
            published: PublishedDate::Missing,
            authors: vec![],
            keywords: vec![],
            abstract_text: None,
        }
    }

    fn no_pacing() -> PacingConfig {
        PacingConfig {
            query_interval_secs: 0,
            window_interval_secs: 0,
            rate_limit_cooldown_secs: 0,
            max_rate_limit_retries: None,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_build_query() {
        let window = FetchWindow {
            start: date(2024, 1, 11),
            end: date(2024, 1, 15),
        };
        assert_eq!(
            build_query("\"UMass Amherst\"[AD]", &window),
            "\"UMass Amherst\"[AD] AND 2024/01/11:2024/01/15[DP]"
        );
    }

    #[tokio::test]
    async fn test_queries_every_variant_per_window() {
        let source = ScriptedSource::new(vec![]);
        let variants = vec!["A".to_string(), "B".to_string()];
        let pacing = no_pacing();
        let plan = WindowPlan::new(date(2024, 1, 1), date(2024, 3, 31), 60).unwrap();
        assert_eq!(plan.len(), 2);

        Harvester::new(&source, &variants, &pacing)
            .harvest(&plan)
            .await
            .unwrap();

        let terms = source.terms();
        assert_eq!(terms.len(), 4);
        assert!(terms[0].starts_with("A AND "));
        assert!(terms[1].starts_with("B AND "));
        assert!(terms[0].ends_with("2024/03/31[DP]"));
    }

    #[tokio::test]
    async fn test_dedupes_ids_across_variants() {
        let source = ScriptedSource::new(vec![
            Ok(vec![article("1"), article("2")]),
            Ok(vec![article("2"), article("3")]),
        ]);
        let variants = vec!["A".to_string(), "B".to_string()];
        let pacing = no_pacing();
        let plan = WindowPlan::new(date(2024, 1, 10), date(2024, 1, 15), 60).unwrap();

        let articles = Harvester::new(&source, &variants, &pacing)
            .harvest(&plan)
            .await
            .unwrap();
        let ids: Vec<&str> = articles.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let source = ScriptedSource::new(vec![
            Err(IngestError::RateLimited(0)),
            Err(IngestError::RateLimited(0)),
            Ok(vec![article("1")]),
        ]);
        let variants = vec!["A".to_string()];
        let pacing = no_pacing();
        let plan = WindowPlan::new(date(2024, 1, 10), date(2024, 1, 15), 60).unwrap();

        let articles = Harvester::new(&source, &variants, &pacing)
            .harvest(&plan)
            .await
            .unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(source.terms().len(), 3);
        // Same term every attempt.
        assert!(source.terms().windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_rate_limit_cap() {
        let source = ScriptedSource::new(vec![
            Err(IngestError::RateLimited(0)),
            Err(IngestError::RateLimited(0)),
            Ok(vec![article("1")]),
        ]);
        let variants = vec!["A".to_string()];
        let mut pacing = no_pacing();
        pacing.max_rate_limit_retries = Some(1);
        let plan = WindowPlan::new(date(2024, 1, 10), date(2024, 1, 15), 60).unwrap();

        let err = Harvester::new(&source, &variants, &pacing)
            .harvest(&plan)
            .await
            .unwrap_err();
        assert!(err.is_rate_limit());
        assert_eq!(source.terms().len(), 2);
    }

    #[tokio::test]
    async fn test_other_errors_are_fatal() {
        let source = ScriptedSource::new(vec![
            Err(IngestError::Api {
                code: 500,
                message: "server error".to_string(),
            }),
            Ok(vec![article("1")]),
        ]);
        let variants = vec!["A".to_string(), "B".to_string()];
        let pacing = no_pacing();
        let plan = WindowPlan::new(date(2024, 1, 10), date(2024, 1, 15), 60).unwrap();

        let result = Harvester::new(&source, &variants, &pacing)
            .harvest(&plan)
            .await;
        assert!(matches!(result, Err(IngestError::Api { code: 500, .. })));
        assert_eq!(source.terms().len(), 1);
    }
}
