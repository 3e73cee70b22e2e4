//! SQLite persistence for computed aggregates.
//!
//! Aggregates are always recomputable from the logs; the store only keeps
//! the last published result so other tools (and later runs) can read it
//! without a full pass. Session lists are cached only for closed days,
//! since the current day's sessions are still growing.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, Transaction, params};
use tracing::{debug, info, warn};

use crate::error::{Result, UsageError};
use crate::models::{DailyUsageAggregate, ModelBreakdown, SessionAggregate, TokenCounts};

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

/// Maximum retries for database lock errors.
const DB_LOCK_MAX_RETRIES: u32 = 5;

/// Initial delay for database lock retry (in milliseconds).
const DB_LOCK_INITIAL_DELAY_MS: u64 = 50;

/// Maximum delay for database lock retry.
const DB_LOCK_MAX_DELAY: Duration = Duration::from_secs(5);

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Where published aggregates go.
pub trait AggregateStore: Send + Sync {
    /// Insert daily aggregates, replacing every field and the model
    /// breakdown of dates already stored. Returns the number written.
    fn upsert_daily(&self, aggregates: &[DailyUsageAggregate]) -> Result<usize>;

    /// Read back one day.
    fn daily(&self, date: NaiveDate) -> Result<Option<DailyUsageAggregate>>;

    /// Cache the session list of `date` if the day is closed (`date < today`).
    ///
    /// Returns whether anything was stored.
    fn cache_sessions(
        &self,
        date: NaiveDate,
        today: NaiveDate,
        sessions: &[SessionAggregate],
    ) -> Result<bool>;

    /// Cached session list of a closed day, in the order it was stored.
    fn cached_sessions(&self, date: NaiveDate) -> Result<Option<Vec<SessionAggregate>>>;
}

/// SQLite-backed [`AggregateStore`].
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| UsageError::Database(rusqlite::Error::InvalidParameterName(e.to_string())))
    }

    /// Execute a database operation with retry on lock errors.
    fn with_retry<T, F>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0;
        let mut delay = Duration::from_millis(DB_LOCK_INITIAL_DELAY_MS);

        loop {
            attempt += 1;

            match f() {
                Ok(result) => {
                    if attempt > 1 {
                        info!(attempt, operation, "Database operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(ref e) if e.is_database_locked() && attempt <= DB_LOCK_MAX_RETRIES => {
                    warn!(
                        attempt,
                        max_retries = DB_LOCK_MAX_RETRIES,
                        delay_ms = delay.as_millis(),
                        operation,
                        "Database locked, retrying with backoff"
                    );

                    std::thread::sleep(delay);
                    delay = std::cmp::min(delay * 2, DB_LOCK_MAX_DELAY);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run database migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| UsageError::Migration(format!("failed to acquire lock: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < SCHEMA_VERSION {
            info!(
                current = current_version,
                target = SCHEMA_VERSION,
                "Running database migrations"
            );
            if current_version < 1 {
                migration_v1(&conn)?;
            }
        }

        Ok(())
    }

    fn upsert_in_tx(tx: &Transaction, aggregates: &[DailyUsageAggregate]) -> Result<usize> {
        let now = Utc::now().to_rfc3339();

        let mut daily_stmt = tx.prepare_cached(
            "INSERT INTO daily_usage
             (date, call_count, input_tokens, output_tokens, cache_creation_tokens,
              cache_read_tokens, total_cost_usd, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(date) DO UPDATE SET
                call_count = excluded.call_count,
                input_tokens = excluded.input_tokens,
                output_tokens = excluded.output_tokens,
                cache_creation_tokens = excluded.cache_creation_tokens,
                cache_read_tokens = excluded.cache_read_tokens,
                total_cost_usd = excluded.total_cost_usd,
                updated_at = excluded.updated_at",
        )?;
        let mut clear_stmt = tx.prepare_cached("DELETE FROM daily_model_usage WHERE date = ?1")?;
        let mut model_stmt = tx.prepare_cached(
            "INSERT INTO daily_model_usage
             (date, model, call_count, input_tokens, output_tokens, cache_creation_tokens,
              cache_read_tokens, cost_usd)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;

        for aggregate in aggregates {
            let date = aggregate.date.format(DATE_FORMAT).to_string();
            let t = &aggregate.tokens;

            daily_stmt.execute(params![
                date,
                aggregate.call_count as i64,
                t.input as i64,
                t.output as i64,
                t.cache_creation as i64,
                t.cache_read as i64,
                aggregate.total_cost_usd,
                now,
            ])?;

            // Breakdowns are replaced wholesale; a model can disappear from a day
            clear_stmt.execute(params![date])?;
            for breakdown in &aggregate.by_model {
                let t = &breakdown.tokens;
                model_stmt.execute(params![
                    date,
                    breakdown.model,
                    breakdown.call_count as i64,
                    t.input as i64,
                    t.output as i64,
                    t.cache_creation as i64,
                    t.cache_read as i64,
                    breakdown.cost_usd,
                ])?;
            }
        }

        Ok(aggregates.len())
    }
}

impl AggregateStore for SqliteStore {
    fn upsert_daily(&self, aggregates: &[DailyUsageAggregate]) -> Result<usize> {
        if aggregates.is_empty() {
            return Ok(0);
        }

        let count = self.with_retry("upsert_daily", || {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let count = Self::upsert_in_tx(&tx, aggregates)?;
            tx.commit()?;
            Ok(count)
        })?;

        debug!(count, "Upserted daily aggregates");
        Ok(count)
    }

    fn daily(&self, date: NaiveDate) -> Result<Option<DailyUsageAggregate>> {
        let conn = self.lock()?;
        let date_str = date.format(DATE_FORMAT).to_string();

        let row: Option<(i64, TokenCounts, f64)> = match conn.query_row(
            "SELECT call_count, input_tokens, output_tokens, cache_creation_tokens,
                    cache_read_tokens, total_cost_usd
             FROM daily_usage WHERE date = ?1",
            params![date_str],
            |row| Ok((row.get(0)?, tokens_from_row(row, 1)?, row.get(5)?)),
        ) {
            Ok(r) => Some(r),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let Some((call_count, tokens, total_cost_usd)) = row else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT model, call_count, input_tokens, output_tokens, cache_creation_tokens,
                    cache_read_tokens, cost_usd
             FROM daily_model_usage WHERE date = ?1 ORDER BY model",
        )?;

        let by_model = stmt
            .query_map(params![date_str], |row| {
                Ok(ModelBreakdown {
                    model: row.get(0)?,
                    call_count: row.get::<_, i64>(1)? as u64,
                    tokens: tokens_from_row(row, 2)?,
                    cost_usd: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Some(DailyUsageAggregate {
            date,
            call_count: call_count as u64,
            tokens,
            total_cost_usd,
            by_model,
        }))
    }

    fn cache_sessions(
        &self,
        date: NaiveDate,
        today: NaiveDate,
        sessions: &[SessionAggregate],
    ) -> Result<bool> {
        if date >= today {
            debug!(%date, "Not caching sessions of an open day");
            return Ok(false);
        }

        let date_str = date.format(DATE_FORMAT).to_string();
        let payloads = sessions
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.with_retry("cache_sessions", || {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM session_cache WHERE date = ?1", params![date_str])?;
            tx.execute(
                "INSERT OR REPLACE INTO session_cache_days (date, session_count, cached_at)
                 VALUES (?1, ?2, ?3)",
                params![date_str, payloads.len() as i64, Utc::now().to_rfc3339()],
            )?;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO session_cache (date, position, payload) VALUES (?1, ?2, ?3)",
                )?;
                for (position, payload) in payloads.iter().enumerate() {
                    stmt.execute(params![date_str, position as i64, payload])?;
                }
            }
            tx.commit()?;
            Ok(())
        })?;

        debug!(%date, sessions = sessions.len(), "Cached sessions");
        Ok(true)
    }

    fn cached_sessions(&self, date: NaiveDate) -> Result<Option<Vec<SessionAggregate>>> {
        let conn = self.lock()?;
        let date_str = date.format(DATE_FORMAT).to_string();

        let cached: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM session_cache_days WHERE date = ?1)",
            params![date_str],
            |row| row.get(0),
        )?;
        if !cached {
            return Ok(None);
        }

        let mut stmt =
            conn.prepare("SELECT payload FROM session_cache WHERE date = ?1 ORDER BY position")?;
        let payloads = stmt
            .query_map(params![date_str], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let sessions = payloads
            .iter()
            .map(|p| serde_json::from_str(p))
            .collect::<std::result::Result<Vec<SessionAggregate>, _>>()?;

        Ok(Some(sessions))
    }
}

/// Migration to version 1: initial schema.
fn migration_v1(conn: &Connection) -> Result<()> {
    debug!("Running migration v1: initial schema");

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS daily_usage (
            date TEXT PRIMARY KEY,
            call_count INTEGER NOT NULL,
            input_tokens INTEGER NOT NULL,
            output_tokens INTEGER NOT NULL,
            cache_creation_tokens INTEGER NOT NULL DEFAULT 0,
            cache_read_tokens INTEGER NOT NULL DEFAULT 0,
            total_cost_usd REAL NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS daily_model_usage (
            date TEXT NOT NULL,
            model TEXT NOT NULL,
            call_count INTEGER NOT NULL,
            input_tokens INTEGER NOT NULL,
            output_tokens INTEGER NOT NULL,
            cache_creation_tokens INTEGER NOT NULL DEFAULT 0,
            cache_read_tokens INTEGER NOT NULL DEFAULT 0,
            cost_usd REAL NOT NULL,
            PRIMARY KEY (date, model)
        );

        CREATE TABLE IF NOT EXISTS session_cache_days (
            date TEXT PRIMARY KEY,
            session_count INTEGER NOT NULL,
            cached_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS session_cache (
            date TEXT NOT NULL,
            position INTEGER NOT NULL,
            payload TEXT NOT NULL,
            PRIMARY KEY (date, position)
        );

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;

    info!("Migration v1 completed: initial schema");
    Ok(())
}

fn tokens_from_row(row: &rusqlite::Row, start: usize) -> rusqlite::Result<TokenCounts> {
    Ok(TokenCounts::new(
        row.get::<_, i64>(start)? as u64,
        row.get::<_, i64>(start + 1)? as u64,
        row.get::<_, i64>(start + 2)? as u64,
        row.get::<_, i64>(start + 3)? as u64,
    ))
}
