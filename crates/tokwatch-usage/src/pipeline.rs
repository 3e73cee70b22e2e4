//! One ingestion pass: scan, parse, price, aggregate, publish.
//!
//! Files are parsed on the blocking pool with bounded concurrency while the
//! pricing resolver loads its table. Per-file results are concatenated and
//! totally ordered before folding, so the output does not depend on which
//! file finished first.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, NaiveDate, TimeZone, Utc};
use futures_util::{StreamExt, stream};
use tokio::sync::Mutex;
use tokwatch_config::TokwatchConfig;
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::error::{Result, UsageError};
use crate::models::{TimeRange, UsageEvent, UsageSnapshot};
use crate::parser::EventParser;
use crate::pricing::PricingResolver;
use crate::scanner::LogScanner;
use crate::store::AggregateStore;

/// Number of log files parsed concurrently unless configured otherwise.
pub const DEFAULT_MAX_PARALLEL_FILES: usize = 8;

/// What a pass should compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestRequest {
    /// Events outside this range are ignored by every view
    pub range: TimeRange,

    /// Day the hourly and session views are computed for
    pub target_date: NaiveDate,
}

impl IngestRequest {
    pub fn new(range: TimeRange, target_date: NaiveDate) -> Self {
        Self { range, target_date }
    }

    /// All events, with hourly and session views for `target_date`.
    pub fn for_date(target_date: NaiveDate) -> Self {
        Self::new(TimeRange::all(), target_date)
    }
}

/// Runs ingestion passes; at most one at a time.
pub struct IngestionPipeline<Tz: TimeZone = Local> {
    scanner: LogScanner,
    parser: EventParser,
    pricing: Arc<PricingResolver>,
    aggregator: Aggregator<Tz>,
    max_parallel_files: usize,
    store: Option<Arc<dyn AggregateStore>>,
    pass_guard: Mutex<()>,
}

impl IngestionPipeline<Local> {
    /// Build a local-time pipeline from configuration.
    pub fn from_config(config: &TokwatchConfig, pricing: Arc<PricingResolver>) -> Self {
        let scanner = LogScanner::new(&config.log_root).with_extension(&config.log_extension);
        let aggregator = Aggregator::local().with_session_gap(config.sessions.gap());

        Self::new(scanner, pricing, aggregator)
            .with_max_parallel_files(config.ingest.max_parallel_files)
    }
}

impl<Tz: TimeZone> IngestionPipeline<Tz> {
    pub fn new(scanner: LogScanner, pricing: Arc<PricingResolver>, aggregator: Aggregator<Tz>) -> Self {
        Self {
            scanner,
            parser: EventParser::new(),
            pricing,
            aggregator,
            max_parallel_files: DEFAULT_MAX_PARALLEL_FILES,
            store: None,
            pass_guard: Mutex::new(()),
        }
    }

    /// Bound on concurrently parsed files (at least 1).
    pub fn with_max_parallel_files(mut self, n: usize) -> Self {
        self.max_parallel_files = n.max(1);
        self
    }

    /// Publish every completed pass to `store`.
    pub fn with_store(mut self, store: Arc<dyn AggregateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run one pass.
    ///
    /// Returns `Ok(None)` without doing anything when another pass is in
    /// flight. Unreadable files and pricing failures are logged and absorbed;
    /// only store failures surface as errors.
    pub async fn run(&self, request: IngestRequest) -> Result<Option<UsageSnapshot>> {
        let Ok(_pass) = self.pass_guard.try_lock() else {
            debug!("Ingestion pass already running, skipping trigger");
            return Ok(None);
        };

        let started = Instant::now();
        let (rates, events) =
            tokio::join!(self.pricing.get_rates(), self.collect_events(request.range));

        let snapshot = UsageSnapshot {
            target_date: request.target_date,
            daily: self.aggregator.daily(&events, &rates),
            hourly: self.aggregator.hourly(&events, request.target_date, &rates),
            sessions: self.aggregator.sessions(&events, request.target_date, &rates),
            pricing: rates.models().clone(),
        };

        if let Some(store) = &self.store {
            self.publish(store.as_ref(), &snapshot)?;
        }

        info!(
            events = events.len(),
            days = snapshot.daily.len(),
            sessions = snapshot.sessions.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Ingestion pass complete"
        );

        Ok(Some(snapshot))
    }

    /// Parse every log file and return the in-range events, totally ordered.
    pub async fn collect_events(&self, range: TimeRange) -> Vec<UsageEvent> {
        let scanner = self.scanner.clone();
        let files = match tokio::task::spawn_blocking(move || scanner.scan()).await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %UsageError::from(e), "Log scan failed");
                return Vec::new();
            }
        };

        let file_count = files.len();
        let parser = self.parser;

        let batches: Vec<Vec<UsageEvent>> = stream::iter(files)
            .map(|path| async move {
                let shown = path.display().to_string();
                match tokio::task::spawn_blocking(move || parser.parse_file(&path)).await {
                    Ok(Ok(events)) => events,
                    Ok(Err(e)) => {
                        warn!(file = %shown, error = %e, "Skipping unreadable log file");
                        Vec::new()
                    }
                    Err(e) => {
                        warn!(file = %shown, error = %UsageError::from(e), "Log parse task failed");
                        Vec::new()
                    }
                }
            })
            .buffer_unordered(self.max_parallel_files)
            .collect()
            .await;

        let mut events: Vec<UsageEvent> = batches
            .into_iter()
            .flatten()
            .filter(|e| range.contains(e.timestamp))
            .collect();

        events.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.session_id.cmp(&b.session_id))
                .then_with(|| a.model.cmp(&b.model))
                .then_with(|| a.project_path.cmp(&b.project_path))
        });

        debug!(files = file_count, events = events.len(), "Collected usage events");
        events
    }

    fn publish(&self, store: &dyn AggregateStore, snapshot: &UsageSnapshot) -> Result<()> {
        store.upsert_daily(&snapshot.daily)?;

        let today = self.aggregator.local_date(&Utc::now());
        if store.cache_sessions(snapshot.target_date, today, &snapshot.sessions)? {
            debug!(date = %snapshot.target_date, "Cached closed-day sessions");
        }

        Ok(())
    }
}
