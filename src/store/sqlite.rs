//! SQLite observation store
//!
//! One row per reading: `(trial_name, time, metric_name, value)`. Values are
//! stored as opaque text and parsed on read. Times are stored as fixed-width
//! UTC text (`YYYY-MM-DD HH:MM:SS.ffffff`) so that lexical order is
//! chronological order.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{ObservationQuery, ObservationStore};
use crate::observation::{parse_metric_value, MetricObservation, ObservationLog};
use crate::{Error, Result};

/// Storage format for the `time` column.
const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Parse format for the `time` column.
const DB_TIME_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Schema, applied idempotently.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS observation_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trial_name TEXT NOT NULL,
    time TEXT NOT NULL,
    metric_name TEXT NOT NULL,
    value TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS observation_logs_trial_time
    ON observation_logs (trial_name, time);
";

const INSERT_OBSERVATION: &str =
    "INSERT INTO observation_logs (trial_name, time, metric_name, value) VALUES (?1, ?2, ?3, ?4)";

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default interval between connection attempts (ms).
const DEFAULT_CONNECT_INTERVAL_MS: u64 = 5_000;
/// Default deadline for acquiring a connection (ms).
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 60_000;

/// Configuration for the SQLite observation store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteStoreConfig {
    /// Path to the database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Interval between connection attempts in milliseconds.
    #[serde(default = "default_connect_interval_ms")]
    pub connect_interval_ms: u64,
    /// Give up acquiring a connection after this many milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl SqliteStoreConfig {
    /// Configuration with defaults for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            connect_interval_ms: DEFAULT_CONNECT_INTERVAL_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

const fn default_connect_interval_ms() -> u64 {
    DEFAULT_CONNECT_INTERVAL_MS
}

const fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

/// SQLite-backed observation store.
///
/// Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct SqliteObservationStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteObservationStore {
    /// Open the database once and probe it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Sqlite`] if the database cannot be opened or probed.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self> {
        let connection = Connection::open(&config.path)?;
        connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        connection.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Acquire a connection, retrying every `connect_interval_ms` until
    /// `connect_timeout_ms` has elapsed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] with the last failure once the deadline passes.
    pub async fn connect(config: &SqliteStoreConfig) -> Result<Self> {
        let interval = Duration::from_millis(config.connect_interval_ms);
        let deadline = Instant::now() + Duration::from_millis(config.connect_timeout_ms);
        loop {
            match Self::open(config) {
                Ok(store) => {
                    info!(path = %config.path.display(), "Observation store connected");
                    return Ok(store);
                }
                Err(e) if Instant::now() + interval > deadline => {
                    return Err(Error::Timeout(format!(
                        "waiting for observation store {} to open: {e}",
                        config.path.display()
                    )));
                }
                Err(e) => {
                    warn!(path = %config.path.display(), error = %e, "Observation store not reachable, retrying");
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&connection)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::StorageError(format!("store task failed: {e}")))?
    }
}

fn lock(connection: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    connection
        .lock()
        .map_err(|_| Error::StorageError("connection mutex poisoned".to_string()))
}

fn format_db_time(ts: DateTime<Utc>) -> String {
    ts.format(DB_TIME_FORMAT).to_string()
}

fn parse_db_time(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, DB_TIME_PARSE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::ParseError(format!("stored time {raw:?}: {e}")))
}

impl ObservationStore for SqliteObservationStore {
    async fn init_schema(&self) -> Result<()> {
        self.with_connection(|conn| {
            debug!("Initializing observation_logs schema");
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
    }

    async fn register_observation_log(&self, trial_name: &str, log: &ObservationLog) -> Result<()> {
        let rows: Vec<(String, String, String)> = log
            .iter()
            .filter_map(|o| {
                let ts = o.timestamp()?;
                Some((format_db_time(ts), o.name().to_string(), o.value_string()))
            })
            .collect();
        if rows.len() < log.len() {
            debug!(
                trial = trial_name,
                skipped = log.len() - rows.len(),
                "Skipping observations without timestamp"
            );
        }
        if rows.is_empty() {
            return Ok(());
        }

        let trial_name = trial_name.to_string();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(INSERT_OBSERVATION)?;
                for (time, metric, value) in &rows {
                    stmt.execute(params![trial_name, time, metric, value])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_observation_log(
        &self,
        trial_name: &str,
        query: &ObservationQuery,
    ) -> Result<ObservationLog> {
        let mut sql = String::from(
            "SELECT time, metric_name, value FROM observation_logs WHERE trial_name = ?",
        );
        let mut args = vec![trial_name.to_string()];
        if let Some(metric) = query.metric_name_filter() {
            sql.push_str(" AND metric_name = ?");
            args.push(metric.to_string());
        }
        if let Some(start) = query.start_time_filter() {
            sql.push_str(" AND time >= ?");
            args.push(format_db_time(start));
        }
        if let Some(end) = query.end_time_filter() {
            sql.push_str(" AND time <= ?");
            args.push(format_db_time(end));
        }
        sql.push_str(" ORDER BY time, id");

        let rows = self
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(args.iter()), |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        let mut log = ObservationLog::new();
        for (time, metric, value) in rows {
            let parsed = parse_db_time(&time).and_then(|ts| Ok((ts, parse_metric_value(&value)?)));
            match parsed {
                Ok((ts, value)) => log.push(MetricObservation::at(metric, value, ts)),
                Err(e) => warn!(trial = trial_name, metric, error = %e, "Skipping unreadable observation row"),
            }
        }
        Ok(log)
    }

    async fn delete_observation_log(&self, trial_name: &str) -> Result<()> {
        let trial_name = trial_name.to_string();
        self.with_connection(move |conn| {
            conn.execute(
                "DELETE FROM observation_logs WHERE trial_name = ?1",
                params![trial_name],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn temp_store() -> (tempfile::TempDir, SqliteObservationStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteObservationStore::open(&SqliteStoreConfig::new(dir.path().join("obs.db"))).unwrap();
        store.init_schema().await.unwrap();
        (dir, store)
    }

    #[test]
    fn test_db_time_is_fixed_width_and_round_trips() {
        let ts = Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap();
        let raw = format_db_time(ts);
        assert_eq!(raw, "2024-02-03 04:05:06.000000");
        assert_eq!(parse_db_time(&raw).unwrap(), ts);
    }

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let (_dir, store) = temp_store().await;
        store.init_schema().await.unwrap();
        store.init_schema().await.unwrap();
    }

    #[tokio::test]
    async fn test_unreadable_rows_are_skipped() {
        let (_dir, store) = temp_store().await;
        store
            .with_connection(|conn| {
                conn.execute(
                    INSERT_OBSERVATION,
                    params!["t1", "2024-01-01 00:00:00.000000", "loss", "not-a-number"],
                )?;
                conn.execute(
                    INSERT_OBSERVATION,
                    params!["t1", "2024-01-01 00:00:01.000000", "loss", "0.25"],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let log = store
            .get_observation_log("t1", &ObservationQuery::new())
            .await
            .unwrap();
        assert_eq!(log.len(), 1);
        assert!((log.observations()[0].value() - 0.25).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_connect_times_out_on_unopenable_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SqliteStoreConfig::new(dir.path().join("missing").join("obs.db"));
        config.connect_interval_ms = 10;
        config.connect_timeout_ms = 50;

        let err = SqliteObservationStore::connect(&config).await.err().unwrap();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
