//! # tokwatch-config
//!
//! Configuration for tokwatch, loaded from `~/.tokwatch/config.yaml`.
//!
//! Every field has a default, so a missing file or a partial file is fine:
//!
//! ```yaml
//! log_root: /home/me/.claude/projects
//! pricing:
//!   refresh_interval_hours: 12
//! sessions:
//!   gap_hours: 5
//! store:
//!   database_path: /home/me/.tokwatch/usage.db
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokwatch_core::{Result, TokwatchError};
use tracing::debug;

/// LiteLLM's public model price list.
pub const DEFAULT_PRICING_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

/// Pricing older than this is refetched.
pub const DEFAULT_REFRESH_INTERVAL_HOURS: u64 = 24;

/// Transport timeout for the pricing fetch.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 15;

/// Largest gap between two events that still belong to the same session.
pub const DEFAULT_SESSION_GAP_HOURS: u64 = 5;

/// Number of log files parsed concurrently.
pub const DEFAULT_MAX_PARALLEL_FILES: usize = 8;

/// Config file path (`~/.tokwatch/config.yaml`).
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".tokwatch").join("config.yaml"))
}

fn home_or_cwd() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokwatchConfig {
    /// Directory holding the session logs
    pub log_root: PathBuf,

    /// File extension of log files (without the dot)
    pub log_extension: String,

    /// Pricing source and cache
    pub pricing: PricingConfig,

    /// Session windowing
    pub sessions: SessionConfig,

    /// Ingestion tuning
    pub ingest: IngestConfig,

    /// Optional aggregate persistence
    pub store: StoreConfig,
}

impl Default for TokwatchConfig {
    fn default() -> Self {
        Self {
            log_root: home_or_cwd().join(".claude").join("projects"),
            log_extension: "jsonl".to_string(),
            pricing: PricingConfig::default(),
            sessions: SessionConfig::default(),
            ingest: IngestConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Pricing source configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// URL of the remote price list
    pub source_url: String,

    /// Where the last fetched price list is cached
    pub cache_path: PathBuf,

    /// Hours before a fetched price list is considered stale
    pub refresh_interval_hours: u64,

    /// Fetch timeout in seconds
    pub fetch_timeout_secs: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            source_url: DEFAULT_PRICING_URL.to_string(),
            cache_path: home_or_cwd().join(".tokwatch").join("pricing_cache.json"),
            refresh_interval_hours: DEFAULT_REFRESH_INTERVAL_HOURS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

impl PricingConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_hours.saturating_mul(3600))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Session windowing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Gap in hours that splits one session id into separate windows
    pub gap_hours: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gap_hours: DEFAULT_SESSION_GAP_HOURS,
        }
    }
}

impl SessionConfig {
    pub fn gap(&self) -> Duration {
        Duration::from_secs(self.gap_hours.saturating_mul(3600))
    }
}

/// Ingestion configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Maximum number of log files parsed at once
    pub max_parallel_files: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_parallel_files: DEFAULT_MAX_PARALLEL_FILES,
        }
    }
}

/// Aggregate store configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database receiving daily and closed-day session aggregates
    pub database_path: Option<PathBuf>,
}

impl TokwatchConfig {
    /// Load configuration from the default path, falling back to defaults
    /// when the file does not exist.
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path.
    ///
    /// A missing file yields the defaults; an unreadable or invalid file is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| TokwatchError::ConfigUnreadable {
                path: path.to_path_buf(),
                source: e,
            })?;

        let config = Self::parse(&content).map_err(|e| match e {
            TokwatchError::ConfigInvalid { message, .. } => TokwatchError::ConfigInvalid {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;

        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse(content: &str) -> Result<Self> {
        // serde_yaml rejects an empty document, treat it as all defaults
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self =
            serde_yaml::from_str(content).map_err(|e| TokwatchError::ConfigInvalid {
                path: PathBuf::new(),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.sessions.gap_hours == 0 {
            return Err(TokwatchError::config_validation(
                "sessions.gap_hours must be greater than 0",
            ));
        }
        if self.pricing.refresh_interval_hours == 0 {
            return Err(TokwatchError::config_validation(
                "pricing.refresh_interval_hours must be greater than 0",
            ));
        }
        if self.pricing.fetch_timeout_secs == 0 {
            return Err(TokwatchError::config_validation(
                "pricing.fetch_timeout_secs must be greater than 0",
            ));
        }
        if self.ingest.max_parallel_files == 0 {
            return Err(TokwatchError::config_validation(
                "ingest.max_parallel_files must be greater than 0",
            ));
        }
        if self.log_extension.is_empty() || self.log_extension.starts_with('.') {
            return Err(TokwatchError::config_validation(
                "log_extension must be non-empty and given without a leading dot",
            ));
        }
        Ok(())
    }

    /// Override the log root.
    pub fn with_log_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.log_root = root.into();
        self
    }

    /// Override the pricing cache path.
    pub fn with_pricing_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.pricing.cache_path = path.into();
        self
    }

    /// Override the pricing source URL.
    pub fn with_pricing_url(mut self, url: impl Into<String>) -> Self {
        self.pricing.source_url = url.into();
        self
    }
}
