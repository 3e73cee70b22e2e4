//! # tokwatch-usage
//!
//! Usage ingestion and cost aggregation for Claude session logs.
//!
//! This crate provides:
//! - [`LogScanner`] - Find session log files under a root directory
//! - [`EventParser`] - Decode log lines into [`UsageEvent`]s, skipping junk
//! - [`PricingResolver`] - Remote price list with on-disk cache and bundled fallback
//! - [`Aggregator`] - Daily, hourly and session views with costs
//! - [`IngestionPipeline`] - One single-flight pass over the whole corpus
//! - [`SqliteStore`] - Optional persistence of published aggregates
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chrono::Local;
//! use tokwatch_config::TokwatchConfig;
//! use tokwatch_usage::{IngestRequest, IngestionPipeline, PricingResolver};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = TokwatchConfig::load()?;
//! let pricing = Arc::new(PricingResolver::from_config(&config.pricing)?);
//! let pipeline = IngestionPipeline::from_config(&config, pricing);
//!
//! let today = Local::now().date_naive();
//! if let Some(snapshot) = pipeline.run(IngestRequest::for_date(today)).await? {
//!     let spent: f64 = snapshot.sessions.iter().map(|s| s.cost_usd).sum();
//!     println!("Today's sessions: ${spent:.2}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod calculator;
pub mod error;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod pricing;
pub mod scanner;
pub mod store;

// Re-export main types
pub use aggregator::{Aggregator, DEFAULT_SESSION_GAP};
pub use calculator::{CostCalculator, calculate_cost, default_pricing};
pub use error::{Result, UsageError};
pub use models::{
    DailyUsageAggregate, HourlyAggregate, ModelBreakdown, ModelPricing, SessionAggregate,
    TimeRange, TokenCounts, UsageEvent, UsageSnapshot,
};
pub use parser::EventParser;
pub use pipeline::{IngestRequest, IngestionPipeline};
pub use pricing::{HttpPricingSource, PricingResolver, PricingSource, RateTable};
pub use scanner::LogScanner;
pub use store::{AggregateStore, SqliteStore};
