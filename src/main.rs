//! tokwatch - token usage and cost tracking for Claude session logs
//!
//! Reads the local session logs, prices every call, and prints the result
//! as JSON.
//!
//! ## Usage
//!
//! ```bash
//! # Per-day totals with a per-model breakdown
//! tokwatch daily --since 2026-01-01
//!
//! # Today's 24 hourly buckets
//! tokwatch hourly
//!
//! # Session windows of a given day, most expensive first
//! tokwatch sessions --date 2026-01-24
//!
//! # Force a pricing refresh
//! tokwatch pricing --refresh
//!
//! # Everything at once, with debug logging
//! tokwatch -v snapshot
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use tokwatch_config::TokwatchConfig;
use tokwatch_core::{LogGuard, TokwatchError, init_logging};
use tokwatch_usage::{
    IngestRequest, IngestionPipeline, PricingResolver, SqliteStore, TimeRange, UsageSnapshot,
};
use tracing::{debug, error, info};

/// Token usage and cost tracking over local Claude session logs
#[derive(Parser, Debug)]
#[command(name = "tokwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging (increases log level)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file (defaults to ~/.tokwatch/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for log files (defaults to ~/.tokwatch/logs/)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Per-day usage, ascending by date
    Daily {
        /// First day to include (YYYY-MM-DD, local time)
        #[arg(long)]
        since: Option<NaiveDate>,

        /// Last day to include (YYYY-MM-DD, local time)
        #[arg(long)]
        until: Option<NaiveDate>,
    },

    /// Usage per hour of one day
    Hourly {
        /// Day to show (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Session windows of one day
    Sessions {
        /// Day to show (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Current pricing table
    Pricing {
        /// Fetch the price list now instead of using the cache
        #[arg(long)]
        refresh: bool,
    },

    /// All views for one day plus the pricing used
    Snapshot {
        /// Day for the hourly and session views (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("tokwatch failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            if let Some(hint) = e.downcast_ref::<TokwatchError>().and_then(|e| e.guidance()) {
                eprintln!("Hint: {}", hint);
            }
            ExitCode::from(1)
        }
    }
}

/// Set up logging based on CLI arguments.
fn setup_logging(cli: &Cli) -> tokwatch_core::Result<LogGuard> {
    init_logging(cli.log_dir.clone(), cli.verbose > 0)
}

fn load_config(path: Option<&PathBuf>) -> Result<TokwatchConfig> {
    let config = match path {
        Some(path) => TokwatchConfig::load_from(path)?,
        None => TokwatchConfig::load()?,
    };
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    debug!(log_root = %config.log_root.display(), "Loaded configuration");

    let pricing = Arc::new(
        PricingResolver::from_config(&config.pricing).context("failed to set up pricing")?,
    );

    let today = Local::now().date_naive();
    let request = match &cli.command {
        Command::Pricing { refresh } => return show_pricing(&pricing, *refresh).await,
        Command::Daily { since, until } => {
            IngestRequest::new(local_range(*since, *until)?, today)
        }
        Command::Hourly { date } | Command::Sessions { date } | Command::Snapshot { date } => {
            IngestRequest::for_date(date.unwrap_or(today))
        }
    };

    let mut pipeline = IngestionPipeline::from_config(&config, pricing);
    if let Some(db) = &config.store.database_path {
        let store = SqliteStore::open(db)
            .with_context(|| format!("failed to open store {}", db.display()))?;
        pipeline = pipeline.with_store(Arc::new(store));
    }

    let snapshot = pipeline
        .run(request)
        .await?
        .context("another ingestion pass is already running")?;

    info!(
        target_date = %snapshot.target_date,
        days = snapshot.daily.len(),
        "Usage computed"
    );

    print_view(&cli.command, &snapshot)
}

async fn show_pricing(pricing: &PricingResolver, refresh: bool) -> Result<()> {
    let table = if refresh {
        pricing.refresh().await.context("pricing refresh failed")?
    } else {
        pricing.get_rates().await
    };

    let report = serde_json::json!({
        "fetched_at": pricing.fetched_at().await,
        "cache_path": pricing.cache_path(),
        "models": table.models(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_view(command: &Command, snapshot: &UsageSnapshot) -> Result<()> {
    let json = match command {
        Command::Daily { .. } => serde_json::to_string_pretty(&snapshot.daily)?,
        Command::Hourly { .. } => serde_json::to_string_pretty(&snapshot.hourly)?,
        Command::Sessions { .. } => serde_json::to_string_pretty(&snapshot.sessions)?,
        Command::Snapshot { .. } | Command::Pricing { .. } => {
            serde_json::to_string_pretty(snapshot)?
        }
    };
    println!("{}", json);
    Ok(())
}

/// Convert inclusive local dates to a half-open UTC range.
fn local_range(since: Option<NaiveDate>, until: Option<NaiveDate>) -> Result<TimeRange> {
    if let (Some(since), Some(until)) = (since, until)
        && since > until
    {
        anyhow::bail!("--since {} is after --until {}", since, until);
    }

    let start = since.map(start_of_local_day).transpose()?;
    let end = until
        .map(|d| d.succ_opt().context("--until is out of range"))
        .transpose()?
        .map(start_of_local_day)
        .transpose()?;

    Ok(TimeRange::new(start, end))
}

fn start_of_local_day(date: NaiveDate) -> Result<DateTime<Utc>> {
    Local
        .from_local_datetime(&date.and_time(NaiveTime::MIN))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("{} has no local midnight", date))
}
