//! Data models for usage tracking.

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Session id used for events whose record carries none.
pub const UNKNOWN_SESSION: &str = "unknown";

/// Display name for sessions without a project path.
pub const UNKNOWN_PROJECT: &str = "Unknown Project";

/// Token counts for the four billed categories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    /// Input tokens
    pub input: u64,

    /// Output tokens
    pub output: u64,

    /// Cache creation input tokens
    pub cache_creation: u64,

    /// Cache read input tokens
    pub cache_read: u64,
}

impl TokenCounts {
    pub fn new(input: u64, output: u64, cache_creation: u64, cache_read: u64) -> Self {
        Self {
            input,
            output,
            cache_creation,
            cache_read,
        }
    }

    /// Total tokens (input + output + cache), saturating at `u64::MAX`.
    pub fn total(&self) -> u64 {
        self.input
            .saturating_add(self.output)
            .saturating_add(self.cache_creation)
            .saturating_add(self.cache_read)
    }
}

impl Add for TokenCounts {
    type Output = TokenCounts;

    fn add(mut self, rhs: TokenCounts) -> TokenCounts {
        self += rhs;
        self
    }
}

impl AddAssign for TokenCounts {
    fn add_assign(&mut self, rhs: TokenCounts) {
        // Log values are untrusted; a corrupt count must not panic a pass
        self.input = self.input.saturating_add(rhs.input);
        self.output = self.output.saturating_add(rhs.output);
        self.cache_creation = self.cache_creation.saturating_add(rhs.cache_creation);
        self.cache_read = self.cache_read.saturating_add(rhs.cache_read);
    }
}

/// A single API call parsed from one log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// When the call happened
    pub timestamp: DateTime<Utc>,

    /// Session identifier from the log, [`UNKNOWN_SESSION`] when absent
    pub session_id: String,

    /// Working directory of the session (the project path)
    pub project_path: Option<String>,

    /// Model identifier as written in the log (e.g. "claude-sonnet-4-20250514")
    pub model: String,

    /// Token usage of the call
    pub tokens: TokenCounts,
}

impl UsageEvent {
    /// Create an event with no project path.
    pub fn new(
        timestamp: DateTime<Utc>,
        session_id: impl Into<String>,
        model: impl Into<String>,
        tokens: TokenCounts,
    ) -> Self {
        Self {
            timestamp,
            session_id: session_id.into(),
            project_path: None,
            model: model.into(),
            tokens,
        }
    }

    /// Set the project path.
    pub fn with_project(mut self, path: impl Into<String>) -> Self {
        self.project_path = Some(path.into());
        self
    }
}

/// Per-token rates for one model, in USD.
///
/// Costs are per individual token (3e-6 = $3 per million tokens).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Model identifier as it appears in the price list
    pub model_id: String,

    pub input_cost_per_token: f64,

    pub output_cost_per_token: f64,

    pub cache_creation_cost_per_token: Option<f64>,

    pub cache_read_cost_per_token: Option<f64>,
}

impl ModelPricing {
    /// Create pricing from input/output rates, without cache rates.
    pub fn new(model_id: impl Into<String>, input: f64, output: f64) -> Self {
        Self {
            model_id: model_id.into(),
            input_cost_per_token: input,
            output_cost_per_token: output,
            cache_creation_cost_per_token: None,
            cache_read_cost_per_token: None,
        }
    }

    /// Set cache rates.
    pub fn with_cache(mut self, creation: Option<f64>, read: Option<f64>) -> Self {
        self.cache_creation_cost_per_token = creation;
        self.cache_read_cost_per_token = read;
        self
    }
}

/// Tokens and cost attributed to one model inside a larger aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelBreakdown {
    /// Model name
    pub model: String,

    /// Number of API calls
    pub call_count: u64,

    /// Summed tokens for this model
    pub tokens: TokenCounts,

    /// Total cost in USD
    pub cost_usd: f64,
}

/// Usage for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsageAggregate {
    /// Calendar date (serialized as yyyy-mm-dd)
    pub date: NaiveDate,

    /// Number of API calls
    pub call_count: u64,

    /// Summed tokens across all models
    pub tokens: TokenCounts,

    /// Sum of the breakdown costs
    pub total_cost_usd: f64,

    /// One entry per model seen that day, ordered by model name
    pub by_model: Vec<ModelBreakdown>,
}

/// Usage within one hour of one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyAggregate {
    pub date: NaiveDate,

    /// Hour of day, 0-23
    pub hour: u32,

    pub call_count: u64,

    pub tokens: TokenCounts,

    pub cost_usd: f64,
}

/// One usage window of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAggregate {
    /// Session identifier from the log (not unique across windows)
    pub session_id: String,

    /// Last segment of the project path, or [`UNKNOWN_PROJECT`]
    pub display_name: String,

    /// Working directory of the session, when known
    pub project_path: Option<String>,

    /// First event in the window
    pub start: DateTime<Utc>,

    /// Last event in the window
    pub end: DateTime<Utc>,

    pub call_count: u64,

    pub tokens: TokenCounts,

    /// Cost of all tokens at the rate of the first model used
    pub cost_usd: f64,

    /// Distinct models, in first-seen order
    pub models: Vec<String>,
}

impl SessionAggregate {
    /// Derive a display name from a project path.
    pub fn display_name_for(project_path: Option<&str>) -> String {
        project_path
            .map(|p| p.trim_end_matches(['/', '\\']))
            .and_then(|p| p.rsplit(['/', '\\']).next())
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN_PROJECT.to_string())
    }

    /// Duration between the first and last event.
    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

/// Half-open time range `[start, end)`; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Range with no bounds.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| ts >= start) && self.end.is_none_or(|end| ts < end)
    }
}

/// Everything one ingestion pass produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Date the hourly and session views were computed for
    pub target_date: NaiveDate,

    /// Daily aggregates, ascending by date
    pub daily: Vec<DailyUsageAggregate>,

    /// 24 hourly aggregates for the target date
    pub hourly: Vec<HourlyAggregate>,

    /// Session windows on the target date, most expensive first
    pub sessions: Vec<SessionAggregate>,

    /// Pricing the pass was computed with
    pub pricing: BTreeMap<String, ModelPricing>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_token_counts_add() {
        let a = TokenCounts::new(100, 50, 200, 300);
        let b = TokenCounts::new(1, 2, 3, 4);
        let sum = a + b;

        assert_eq!(sum, TokenCounts::new(101, 52, 203, 304));
        assert_eq!(a.total(), 650);
        assert_eq!(TokenCounts::default().total(), 0);
    }

    #[test]
    fn test_token_counts_saturate() {
        let huge = TokenCounts::new(u64::MAX, 1, u64::MAX - 1, 0);
        let sum = huge + TokenCounts::new(5, 2, 7, 3);

        assert_eq!(sum, TokenCounts::new(u64::MAX, 3, u64::MAX, 3));
        assert_eq!(huge.total(), u64::MAX);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(
            SessionAggregate::display_name_for(Some("/home/dev/projects/tokwatch")),
            "tokwatch"
        );
        assert_eq!(
            SessionAggregate::display_name_for(Some("/home/dev/projects/tokwatch/")),
            "tokwatch"
        );
        assert_eq!(
            SessionAggregate::display_name_for(Some("C:\\work\\api")),
            "api"
        );
        assert_eq!(SessionAggregate::display_name_for(None), UNKNOWN_PROJECT);
        assert_eq!(SessionAggregate::display_name_for(Some("")), UNKNOWN_PROJECT);
        assert_eq!(SessionAggregate::display_name_for(Some("/")), UNKNOWN_PROJECT);
    }

    #[test]
    fn test_time_range() {
        let start = Utc.with_ymd_and_hms(2026, 1, 24, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 25, 0, 0, 0).unwrap();
        let range = TimeRange::new(Some(start), Some(end));

        assert!(range.contains(start));
        assert!(!range.contains(end));
        assert!(!range.contains(start - chrono::Duration::seconds(1)));
        assert!(TimeRange::all().contains(end));
    }

    #[test]
    fn test_daily_date_serializes_as_iso_date() {
        let daily = DailyUsageAggregate {
            date: NaiveDate::from_ymd_opt(2026, 1, 24).unwrap(),
            call_count: 0,
            tokens: TokenCounts::default(),
            total_cost_usd: 0.0,
            by_model: Vec::new(),
        };
        let json = serde_json::to_value(&daily).unwrap();
        assert_eq!(json["date"], "2026-01-24");
    }
}
