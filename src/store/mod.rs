//! Observation store: persistence contract for per-trial observation logs
//!
//! Provides the register / query / delete operations the reporting path
//! uses, with two backends:
//! - [`SqliteObservationStore`]: relational, one row per reading
//! - [`MemoryObservationStore`]: in-process, for tests and local runs
//!
//! # Example
//!
//! ```rust,no_run
//! use metrics_collector::observation::{MetricObservation, ObservationLog};
//! use metrics_collector::store::{MemoryObservationStore, ObservationQuery, ObservationStore};
//! use chrono::Utc;
//!
//! # async fn example() -> metrics_collector::Result<()> {
//! let store = MemoryObservationStore::new();
//! store.init_schema().await?;
//!
//! let log = ObservationLog::from_observations(vec![MetricObservation::at("loss", 0.5, Utc::now())]);
//! store.register_observation_log("trial-1", &log).await?;
//!
//! let loss = store
//!     .get_observation_log("trial-1", &ObservationQuery::new().metric_name("loss"))
//!     .await?;
//! assert_eq!(loss.len(), 1);
//!
//! store.delete_observation_log("trial-1").await?;
//! # Ok(())
//! # }
//! ```

mod memory;
mod sqlite;

pub use memory::MemoryObservationStore;
pub use sqlite::{SqliteObservationStore, SqliteStoreConfig};

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::observation::{MetricObservation, ObservationLog};
use crate::{Error, Result};

/// Fractional-second digits kept for stored timestamps.
///
/// Every backend truncates to microseconds on register, so a log reads back
/// the same whichever store holds it.
pub const STORED_TIME_PRECISION: u16 = 6;

/// Persistence contract for observation logs, keyed by trial name.
///
/// Timestamps are stored at [`STORED_TIME_PRECISION`] (microseconds).
pub trait ObservationStore: Send + Sync {
    /// Create tables and indexes. Safe to call on every start.
    fn init_schema(&self) -> impl Future<Output = Result<()>> + Send;

    /// Insert every observation of `log` for `trial_name` in one batch.
    ///
    /// Observations without a timestamp are skipped and timestamps are
    /// truncated to microseconds. An empty log is a no-op.
    fn register_observation_log(
        &self,
        trial_name: &str,
        log: &ObservationLog,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Observations of `trial_name` matching `query`, ascending by time.
    fn get_observation_log(
        &self,
        trial_name: &str,
        query: &ObservationQuery,
    ) -> impl Future<Output = Result<ObservationLog>> + Send;

    /// Remove every observation of `trial_name`. No-op if there are none.
    fn delete_observation_log(&self, trial_name: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Optional filters for [`ObservationStore::get_observation_log`].
///
/// Filters combine with AND; time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationQuery {
    metric_name: Option<String>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
}

impl ObservationQuery {
    /// Query with no filters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a query from the string form used on the wire, where an empty
    /// string means "no filter".
    ///
    /// # Errors
    ///
    /// Returns [`Error::ParseError`] if a non-empty time is not RFC3339.
    pub fn from_wire(metric_name: &str, start_time: &str, end_time: &str) -> Result<Self> {
        let parse = |label: &str, raw: &str| -> Result<Option<DateTime<Utc>>> {
            if raw.is_empty() {
                return Ok(None);
            }
            DateTime::parse_from_rfc3339(raw)
                .map(|ts| Some(ts.with_timezone(&Utc)))
                .map_err(|e| Error::ParseError(format!("error parsing {label} time {raw:?}: {e}")))
        };
        Ok(Self {
            metric_name: (!metric_name.is_empty()).then(|| metric_name.to_string()),
            start_time: parse("start", start_time)?,
            end_time: parse("end", end_time)?,
        })
    }

    /// Only observations of this metric.
    #[must_use]
    pub fn metric_name(mut self, name: impl Into<String>) -> Self {
        self.metric_name = Some(name.into());
        self
    }

    /// Only observations at or after `start`.
    #[must_use]
    pub const fn start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    /// Only observations at or before `end`.
    #[must_use]
    pub const fn end_time(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    /// Metric name filter.
    #[must_use]
    pub fn metric_name_filter(&self) -> Option<&str> {
        self.metric_name.as_deref()
    }

    /// Lower time bound.
    #[must_use]
    pub const fn start_time_filter(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// Upper time bound.
    #[must_use]
    pub const fn end_time_filter(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    /// Whether a stored observation passes every filter.
    #[must_use]
    pub fn matches(&self, observation: &MetricObservation) -> bool {
        if self
            .metric_name
            .as_deref()
            .is_some_and(|name| name != observation.name())
        {
            return false;
        }
        let Some(ts) = observation.timestamp() else {
            return self.start_time.is_none() && self.end_time.is_none();
        };
        self.start_time.map_or(true, |start| ts >= start) && self.end_time.map_or(true, |end| ts <= end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, secs).unwrap()
    }

    #[test]
    fn test_empty_query_matches_everything() {
        let query = ObservationQuery::new();
        assert!(query.matches(&MetricObservation::at("loss", 1.0, at(0))));
        assert!(query.matches(&MetricObservation::new("loss", 1.0)));
    }

    #[test]
    fn test_filters_combine_with_and() {
        let query = ObservationQuery::new()
            .metric_name("loss")
            .start_time(at(10))
            .end_time(at(20));

        assert!(query.matches(&MetricObservation::at("loss", 1.0, at(10))));
        assert!(query.matches(&MetricObservation::at("loss", 1.0, at(20))));
        assert!(!query.matches(&MetricObservation::at("loss", 1.0, at(21))));
        assert!(!query.matches(&MetricObservation::at("acc", 1.0, at(15))));
        assert!(!query.matches(&MetricObservation::new("loss", 1.0)));
    }

    #[test]
    fn test_from_wire() {
        let query = ObservationQuery::from_wire("", "", "").unwrap();
        assert_eq!(query, ObservationQuery::new());

        let query = ObservationQuery::from_wire("F1", "2024-01-01T00:00:10Z", "").unwrap();
        assert_eq!(query.metric_name_filter(), Some("F1"));
        assert_eq!(query.start_time_filter(), Some(at(10)));
        assert_eq!(query.end_time_filter(), None);

        assert!(matches!(
            ObservationQuery::from_wire("", "yesterday", ""),
            Err(Error::ParseError(_))
        ));
    }
}
