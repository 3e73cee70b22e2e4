//! Model pricing: remote price list, on-disk cache, bundled fallback.
//!
//! [`PricingResolver`] owns the only shared mutable state in the crate: the
//! current [`RateTable`]. Lookups go through an `Arc` snapshot, and a refresh
//! builds a new table and swaps the `Arc`, so readers see either the old or
//! the new table and never a half-written one.
//!
//! Load order on [`PricingResolver::get_rates`]:
//!
//! 1. In-memory table younger than the refresh interval: returned as is.
//! 2. Empty in-memory table: load the cache file (its mtime is the fetch time).
//! 3. Still stale: fetch the remote list, keep Claude/Anthropic entries,
//!    persist the raw document to the cache file.
//! 4. Fetch failed and nothing loaded: bundled rates, left stale so the next
//!    call retries the network.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tokwatch_config::PricingConfig;
use tracing::{debug, info, warn};

use crate::error::{Result, UsageError};
use crate::models::ModelPricing;

/// Pricing older than this is refetched.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Substrings (lowercase) that mark a price list entry as a Claude model.
const MODEL_MARKERS: &[&str] = &["claude", "anthropic"];

const SLASH_PREFIX: &str = "anthropic/";
const DOT_PREFIX: &str = "anthropic.";

/// Version suffixes used by hosted-platform model ids.
const HOSTED_SUFFIXES: &[&str] = &["-v1:0", "-v2:0"];

#[derive(Debug, Deserialize)]
struct RawPricingEntry {
    input_cost_per_token: Option<f64>,
    output_cost_per_token: Option<f64>,
    cache_creation_input_token_cost: Option<f64>,
    cache_read_input_token_cost: Option<f64>,
}

/// Immutable model → pricing table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateTable {
    models: BTreeMap<String, ModelPricing>,
}

impl RateTable {
    /// Build a table from pricing entries keyed by their model id.
    pub fn from_entries(entries: impl IntoIterator<Item = ModelPricing>) -> Self {
        Self {
            models: entries
                .into_iter()
                .map(|p| (p.model_id.clone(), p))
                .collect(),
        }
    }

    /// Parse a remote price list document.
    ///
    /// Keeps entries whose id mentions Claude or Anthropic and that carry
    /// numeric input and output rates; everything else is dropped.
    pub fn from_price_list(document: &str) -> Result<Self> {
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(document)?;
        let mut models = BTreeMap::new();

        for (model_id, value) in raw {
            let lower = model_id.to_lowercase();
            if !MODEL_MARKERS.iter().any(|marker| lower.contains(marker)) {
                continue;
            }

            let Ok(entry) = serde_json::from_value::<RawPricingEntry>(value) else {
                continue;
            };

            if let (Some(input), Some(output)) = (entry.input_cost_per_token, entry.output_cost_per_token)
            {
                let pricing = ModelPricing::new(model_id.clone(), input, output).with_cache(
                    entry.cache_creation_input_token_cost,
                    entry.cache_read_input_token_cost,
                );
                models.insert(model_id, pricing);
            }
        }

        Ok(Self { models })
    }

    /// Rates shipped with the binary for the best-known models.
    pub fn bundled() -> Self {
        Self::from_entries([
            ModelPricing::new("claude-opus-4-5-20251101", 5e-6, 25e-6)
                .with_cache(Some(6.25e-6), Some(0.5e-6)),
            ModelPricing::new("claude-opus-4-1-20250805", 15e-6, 75e-6)
                .with_cache(Some(18.75e-6), Some(1.5e-6)),
            ModelPricing::new("claude-opus-4-20250514", 15e-6, 75e-6)
                .with_cache(Some(18.75e-6), Some(1.5e-6)),
            ModelPricing::new("claude-sonnet-4-5-20250929", 3e-6, 15e-6)
                .with_cache(Some(3.75e-6), Some(0.3e-6)),
            ModelPricing::new("claude-sonnet-4-20250514", 3e-6, 15e-6)
                .with_cache(Some(3.75e-6), Some(0.3e-6)),
            ModelPricing::new("claude-haiku-4-5-20251001", 1e-6, 5e-6)
                .with_cache(Some(1.25e-6), Some(0.1e-6)),
            ModelPricing::new("claude-3-5-haiku-20241022", 0.8e-6, 4e-6)
                .with_cache(Some(1e-6), Some(0.08e-6)),
        ])
    }

    pub fn get(&self, model_id: &str) -> Option<&ModelPricing> {
        self.models.get(model_id)
    }

    /// Look up pricing for a model id, trying provider-decorated variants.
    ///
    /// First match wins; `None` means the caller applies the default rate.
    pub fn resolve(&self, model_id: &str) -> Option<&ModelPricing> {
        candidate_ids(model_id)
            .iter()
            .find_map(|candidate| self.models.get(candidate))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn models(&self) -> &BTreeMap<String, ModelPricing> {
        &self.models
    }
}

/// Lookup order for a model id.
///
/// Exact id, `anthropic/` + id, the id with its `anthropic/` or `anthropic.`
/// prefix removed, then generated variants of that bare name.
pub fn candidate_ids(model_id: &str) -> Vec<String> {
    let bare = model_id
        .strip_prefix(SLASH_PREFIX)
        .or_else(|| model_id.strip_prefix(DOT_PREFIX))
        .unwrap_or(model_id);

    let mut candidates = vec![
        model_id.to_string(),
        format!("{SLASH_PREFIX}{model_id}"),
        bare.to_string(),
        format!("{SLASH_PREFIX}{bare}"),
        format!("{DOT_PREFIX}{bare}"),
    ];

    if !has_hosted_suffix(bare) {
        for suffix in HOSTED_SUFFIXES {
            candidates.push(format!("{bare}{suffix}"));
            candidates.push(format!("{DOT_PREFIX}{bare}{suffix}"));
        }
    }

    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.clone()));
    candidates
}

/// True for ids already ending in a `-vN:0` platform suffix.
fn has_hosted_suffix(model_id: &str) -> bool {
    model_id
        .rsplit_once("-v")
        .and_then(|(_, version)| version.strip_suffix(":0"))
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Where price lists come from.
#[async_trait]
pub trait PricingSource: Send + Sync {
    /// Fetch the raw price list document.
    async fn fetch(&self) -> Result<String>;
}

/// Fetches the price list over HTTP.
pub struct HttpPricingSource {
    client: reqwest::Client,
    url: String,
}

impl HttpPricingSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl PricingSource for HttpPricingSource {
    async fn fetch(&self) -> Result<String> {
        let response = self.client.get(&self.url).send().await?;

        if !response.status().is_success() {
            return Err(UsageError::PricingFetch(format!("HTTP {}", response.status())));
        }

        Ok(response.text().await?)
    }
}

struct PricingState {
    table: Arc<RateTable>,
    fetched_at: Option<DateTime<Utc>>,
}

/// Owns the rate table and its refresh lifecycle.
pub struct PricingResolver {
    source: Arc<dyn PricingSource>,
    cache_path: PathBuf,
    refresh_interval: chrono::Duration,
    state: RwLock<PricingState>,
    refresh_lock: Mutex<()>,
}

impl PricingResolver {
    /// Create a resolver with the default 24 hour refresh interval.
    pub fn new(source: impl PricingSource + 'static, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            source: Arc::new(source),
            cache_path: cache_path.into(),
            refresh_interval: to_chrono(DEFAULT_REFRESH_INTERVAL),
            state: RwLock::new(PricingState {
                table: Arc::new(RateTable::default()),
                fetched_at: None,
            }),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Create a resolver fetching over HTTP as configured.
    pub fn from_config(config: &PricingConfig) -> Result<Self> {
        let source = HttpPricingSource::new(&config.source_url, config.fetch_timeout())?;
        Ok(Self::new(source, &config.cache_path).with_refresh_interval(config.refresh_interval()))
    }

    /// Set how long a fetched table stays fresh.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = to_chrono(interval);
        self
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Current rates, refreshing from cache or network when stale.
    ///
    /// Never fails: fetch and cache problems degrade to the cached or
    /// bundled rates.
    pub async fn get_rates(&self) -> Arc<RateTable> {
        if let Some(table) = self.fresh_table().await {
            return table;
        }

        let _refresh = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(table) = self.fresh_table().await {
            return table;
        }

        let (mut table, mut fetched_at) = {
            let state = self.state.read().await;
            (Arc::clone(&state.table), state.fetched_at)
        };

        if table.is_empty() {
            match self.load_cache().await {
                Ok(Some((cached, modified))) => {
                    info!(
                        path = %self.cache_path.display(),
                        models = cached.len(),
                        "Loaded cached pricing"
                    );
                    table = Arc::new(cached);
                    fetched_at = Some(modified);
                }
                Ok(None) => debug!(path = %self.cache_path.display(), "No pricing cache"),
                Err(e) => warn!(path = %self.cache_path.display(), error = %e, "Ignoring unreadable pricing cache"),
            }
        }

        if !self.is_fresh(fetched_at) {
            match self.fetch_and_persist().await {
                Ok(fetched) => {
                    table = Arc::new(fetched);
                    fetched_at = Some(Utc::now());
                }
                Err(e) if table.is_empty() => {
                    warn!(error = %e, "Pricing fetch failed and no cache, using bundled rates");
                    table = Arc::new(RateTable::bundled());
                    fetched_at = None;
                }
                Err(e) => {
                    warn!(error = %e, models = table.len(), "Pricing fetch failed, keeping stale rates");
                }
            }
        }

        self.publish(Arc::clone(&table), fetched_at).await;
        table
    }

    /// Fetch the remote price list now, regardless of staleness.
    ///
    /// On failure the current table is left untouched.
    pub async fn refresh(&self) -> Result<Arc<RateTable>> {
        let _refresh = self.refresh_lock.lock().await;
        let table = Arc::new(self.fetch_and_persist().await?);
        self.publish(Arc::clone(&table), Some(Utc::now())).await;
        Ok(table)
    }

    /// Resolve pricing for a model against the current table without I/O.
    ///
    /// Errors with [`UsageError::PricingUnavailable`] when no table was ever
    /// loaded; call [`PricingResolver::get_rates`] first.
    pub async fn resolve(&self, model_id: &str) -> Result<Option<ModelPricing>> {
        let state = self.state.read().await;
        if state.table.is_empty() {
            return Err(UsageError::PricingUnavailable);
        }
        Ok(state.table.resolve(model_id).cloned())
    }

    /// When the current table was fetched, if it came from the network or cache.
    pub async fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.fetched_at
    }

    async fn fresh_table(&self) -> Option<Arc<RateTable>> {
        let state = self.state.read().await;
        (!state.table.is_empty() && self.is_fresh(state.fetched_at)).then(|| Arc::clone(&state.table))
    }

    fn is_fresh(&self, fetched_at: Option<DateTime<Utc>>) -> bool {
        fetched_at.is_some_and(|at| Utc::now() - at < self.refresh_interval)
    }

    async fn publish(&self, table: Arc<RateTable>, fetched_at: Option<DateTime<Utc>>) {
        let mut state = self.state.write().await;
        state.table = table;
        state.fetched_at = fetched_at;
    }

    async fn load_cache(&self) -> Result<Option<(RateTable, DateTime<Utc>)>> {
        let metadata = match tokio::fs::metadata(&self.cache_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified: DateTime<Utc> = metadata.modified()?.into();

        let document = tokio::fs::read_to_string(&self.cache_path).await?;
        let table = RateTable::from_price_list(&document)?;
        if table.is_empty() {
            return Ok(None);
        }

        Ok(Some((table, modified)))
    }

    async fn fetch_and_persist(&self) -> Result<RateTable> {
        let document = self.source.fetch().await?;
        let table = RateTable::from_price_list(&document)?;
        if table.is_empty() {
            return Err(UsageError::PricingFetch(
                "price list has no Claude/Anthropic entries".into(),
            ));
        }

        info!(models = table.len(), "Fetched pricing");

        if let Err(e) = self.write_cache(&document).await {
            warn!(path = %self.cache_path.display(), error = %e, "Failed to persist pricing cache");
        }

        Ok(table)
    }

    async fn write_cache(&self, document: &str) -> Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write then rename so a reader never sees a partial file
        let tmp = self.cache_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, document).await?;
        tokio::fs::rename(&tmp, &self.cache_path).await?;
        Ok(())
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
