//! Fetch window scheduling.
//!
//! Turns the primary store's high-water mark into a bounded, backward-scanning
//! sequence of date windows covering everything not yet ingested.

use chrono::{Days, NaiveDate};
use std::fmt;

/// Inclusive date range used for one round of source queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchWindow {
    /// Source query fragment, e.g. `2024/01/11:2024/01/15`
    pub fn date_range(&self) -> String {
        format!("{}:{}", self.start.format("%Y/%m/%d"), self.end.format("%Y/%m/%d"))
    }

    /// Span in days (`end - start`)
    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Range still to be fetched plus the windows tiling it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowPlan {
    pub lower: NaiveDate,
    pub upper: NaiveDate,
    pub windows: Vec<FetchWindow>,
}

impl WindowPlan {
    /// Plan the fetch windows for a run.
    ///
    /// `lower = high_water_mark + 1 day`, `upper = today`. Returns `None` when
    /// `lower > upper`, i.e. the store is already current.
    pub fn new(high_water_mark: NaiveDate, today: NaiveDate, window_days: u32) -> Option<Self> {
        let lower = high_water_mark.checked_add_days(Days::new(1))?;
        let upper = today;
        if lower > upper {
            return None;
        }

        let width = Days::new(u64::from(window_days.max(1)));
        let mut windows = Vec::new();
        let mut end = upper;

        loop {
            let start = end
                .checked_sub_days(width)
                .map_or(lower, |candidate| candidate.max(lower));
            windows.push(FetchWindow { start, end });

            // Next window ends strictly before this one starts.
            match start.checked_sub_days(Days::new(1)) {
                Some(next_end) if next_end >= lower => end = next_end,
                _ => break,
            }
        }

        Some(Self {
            lower,
            upper,
            windows,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }
}
