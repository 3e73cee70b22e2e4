//! Daily, hourly and session aggregation over parsed usage events.
//!
//! [`Aggregator`] is a stateless transform: every call takes the events and a
//! rate table snapshot and returns fresh result values. Calendar days and
//! hours are taken in the aggregator's time zone (local time in the CLI).
//!
//! ## Usage
//!
//! ```
//! use chrono::{NaiveDate, Utc};
//! use tokwatch_usage::{Aggregator, RateTable};
//!
//! let aggregator = Aggregator::new(Utc);
//! let rates = RateTable::bundled();
//! let day = NaiveDate::from_ymd_opt(2026, 1, 24).unwrap();
//!
//! let hourly = aggregator.hourly(&[], day, &rates);
//! assert_eq!(hourly.len(), 24);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Timelike, Utc};
use tracing::debug;

use crate::calculator::CostCalculator;
use crate::models::{
    DailyUsageAggregate, HourlyAggregate, ModelBreakdown, ModelPricing, SessionAggregate,
    TokenCounts, UsageEvent,
};
use crate::pricing::RateTable;

/// Largest gap between two events that keeps them in one session window.
pub const DEFAULT_SESSION_GAP: Duration = Duration::from_secs(5 * 60 * 60);

/// Hours in a day; the hourly view always has this many entries.
pub const HOURS_PER_DAY: u32 = 24;

/// Folds usage events into daily, hourly and session aggregates.
#[derive(Debug, Clone)]
pub struct Aggregator<Tz: TimeZone> {
    tz: Tz,
    session_gap: chrono::Duration,
}

impl Aggregator<Local> {
    /// Aggregator using the machine's local time zone.
    pub fn local() -> Self {
        Self::new(Local)
    }
}

impl<Tz: TimeZone> Aggregator<Tz> {
    /// Create an aggregator for `tz` with the default 5 hour session gap.
    pub fn new(tz: Tz) -> Self {
        Self {
            tz,
            session_gap: chrono::Duration::from_std(DEFAULT_SESSION_GAP)
                .unwrap_or(chrono::Duration::hours(5)),
        }
    }

    /// Set the gap that splits a session into separate windows.
    pub fn with_session_gap(mut self, gap: Duration) -> Self {
        self.session_gap = chrono::Duration::from_std(gap).unwrap_or(chrono::Duration::MAX);
        self
    }

    /// Calendar date of an instant in this aggregator's time zone.
    pub fn local_date(&self, ts: &DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.tz).date_naive()
    }

    fn local_hour(&self, ts: &DateTime<Utc>) -> u32 {
        ts.with_timezone(&self.tz).hour()
    }

    /// Per-day totals with a per-model breakdown, ascending by date.
    ///
    /// Days without events are absent. Pricing is resolved once per model.
    pub fn daily(&self, events: &[UsageEvent], rates: &RateTable) -> Vec<DailyUsageAggregate> {
        let mut by_day: BTreeMap<NaiveDate, BTreeMap<&str, (u64, TokenCounts)>> = BTreeMap::new();

        for event in events {
            let entry = by_day
                .entry(self.local_date(&event.timestamp))
                .or_default()
                .entry(event.model.as_str())
                .or_default();
            entry.0 += 1;
            entry.1 += event.tokens;
        }

        let calculator = CostCalculator::new(rates);
        let mut resolved: HashMap<&str, &ModelPricing> = HashMap::new();

        let daily: Vec<DailyUsageAggregate> = by_day
            .into_iter()
            .map(|(date, models)| {
                let by_model: Vec<ModelBreakdown> = models
                    .into_iter()
                    .map(|(model, (call_count, tokens))| {
                        let pricing = *resolved
                            .entry(model)
                            .or_insert_with(|| calculator.pricing_for(model));
                        ModelBreakdown {
                            model: model.to_string(),
                            call_count,
                            tokens,
                            cost_usd: crate::calculator::calculate_cost(&tokens, pricing),
                        }
                    })
                    .collect();

                DailyUsageAggregate {
                    date,
                    call_count: by_model.iter().map(|m| m.call_count).sum(),
                    tokens: by_model
                        .iter()
                        .fold(TokenCounts::default(), |acc, m| acc + m.tokens),
                    total_cost_usd: by_model.iter().map(|m| m.cost_usd).sum(),
                    by_model,
                }
            })
            .collect();

        debug!(days = daily.len(), events = events.len(), "Aggregated daily usage");
        daily
    }

    /// Usage per hour of `date`, always 24 entries for hours 0..23.
    pub fn hourly(
        &self,
        events: &[UsageEvent],
        date: NaiveDate,
        rates: &RateTable,
    ) -> Vec<HourlyAggregate> {
        let mut buckets: Vec<(u64, BTreeMap<&str, TokenCounts>)> =
            (0..HOURS_PER_DAY).map(|_| (0, BTreeMap::new())).collect();

        for event in events
            .iter()
            .filter(|e| self.local_date(&e.timestamp) == date)
        {
            let bucket = &mut buckets[self.local_hour(&event.timestamp) as usize];
            bucket.0 += 1;
            *bucket.1.entry(event.model.as_str()).or_default() += event.tokens;
        }

        let calculator = CostCalculator::new(rates);

        buckets
            .into_iter()
            .zip(0..HOURS_PER_DAY)
            .map(|((call_count, models), hour)| HourlyAggregate {
                date,
                hour,
                call_count,
                tokens: models
                    .values()
                    .fold(TokenCounts::default(), |acc, t| acc + *t),
                cost_usd: models
                    .iter()
                    .map(|(model, tokens)| calculator.cost(model, tokens))
                    .sum(),
            })
            .collect()
    }

    /// Session windows active on `date`, most expensive first.
    ///
    /// Events are grouped by session id and split wherever two consecutive
    /// events are more than the session gap apart. A window's cost prices
    /// all of its tokens at the first model it used.
    pub fn sessions(
        &self,
        events: &[UsageEvent],
        date: NaiveDate,
        rates: &RateTable,
    ) -> Vec<SessionAggregate> {
        let mut groups: BTreeMap<&str, Vec<&UsageEvent>> = BTreeMap::new();
        for event in events
            .iter()
            .filter(|e| self.local_date(&e.timestamp) == date)
        {
            groups.entry(event.session_id.as_str()).or_default().push(event);
        }

        let calculator = CostCalculator::new(rates);
        let mut sessions = Vec::new();

        for (_, mut group) in groups {
            group.sort_by_key(|e| e.timestamp);

            let mut window: Vec<&UsageEvent> = Vec::new();
            for event in group {
                if let Some(last) = window.last()
                    && event.timestamp - last.timestamp > self.session_gap
                {
                    sessions.push(build_session(&window, &calculator));
                    window.clear();
                }
                window.push(event);
            }
            if !window.is_empty() {
                sessions.push(build_session(&window, &calculator));
            }
        }

        sessions.sort_by(|a, b| {
            b.cost_usd
                .total_cmp(&a.cost_usd)
                .then_with(|| a.start.cmp(&b.start))
                .then_with(|| a.session_id.cmp(&b.session_id))
        });

        debug!(%date, sessions = sessions.len(), "Aggregated sessions");
        sessions
    }
}

/// Build one session aggregate from a non-empty, time-ordered window.
fn build_session(window: &[&UsageEvent], calculator: &CostCalculator<'_>) -> SessionAggregate {
    let first = window[0];
    let last = window[window.len() - 1];

    let mut tokens = TokenCounts::default();
    let mut models: Vec<String> = Vec::new();
    for event in window {
        tokens += event.tokens;
        if !models.contains(&event.model) {
            models.push(event.model.clone());
        }
    }

    let project_path = window.iter().find_map(|e| e.project_path.clone());

    // Single-rate simplification: the whole window is priced at its first model
    let cost_usd = calculator.cost(&first.model, &tokens);

    SessionAggregate {
        session_id: first.session_id.clone(),
        display_name: SessionAggregate::display_name_for(project_path.as_deref()),
        project_path,
        start: first.timestamp,
        end: last.timestamp,
        call_count: window.len() as u64,
        tokens,
        cost_usd,
        models,
    }
}
