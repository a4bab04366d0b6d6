//! In-memory observation store using `DashMap`.
//!
//! Data is lost on process restart. For persistence, use
//! [`super::SqliteObservationStore`].

use super::{ObservationQuery, ObservationStore, STORED_TIME_PRECISION};
use crate::observation::{MetricObservation, ObservationLog};
use crate::Result;
use chrono::SubsecRound;
use dashmap::DashMap;

/// In-memory observation store using a lock-free concurrent hashmap.
///
/// Thread-safe; each trial's observations are kept in insertion order and
/// sorted by time on read.
///
/// # Example
///
/// ```rust
/// use metrics_collector::observation::{MetricObservation, ObservationLog};
/// use metrics_collector::store::{MemoryObservationStore, ObservationQuery, ObservationStore};
/// use chrono::Utc;
///
/// # async fn example() -> metrics_collector::Result<()> {
/// let store = MemoryObservationStore::new();
/// let log = ObservationLog::from_observations(vec![MetricObservation::at("F1", 0.7, Utc::now())]);
/// store.register_observation_log("trial", &log).await?;
/// assert_eq!(store.get_observation_log("trial", &ObservationQuery::new()).await?.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct MemoryObservationStore {
    logs: DashMap<String, Vec<MetricObservation>>,
}

impl MemoryObservationStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            logs: DashMap::new(),
        }
    }

    /// Number of trials with at least one stored observation.
    #[must_use]
    pub fn trial_count(&self) -> usize {
        self.logs.len()
    }

    /// Total number of stored observations.
    #[must_use]
    pub fn observation_count(&self) -> usize {
        self.logs.iter().map(|entry| entry.value().len()).sum()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    /// Clear all trials.
    pub fn clear(&self) {
        self.logs.clear();
    }
}

impl Default for MemoryObservationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObservationStore for MemoryObservationStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn register_observation_log(&self, trial_name: &str, log: &ObservationLog) -> Result<()> {
        let rows: Vec<MetricObservation> = log
            .iter()
            .filter_map(|o| {
                o.timestamp()
                    .map(|ts| o.clone().with_timestamp(ts.trunc_subsecs(STORED_TIME_PRECISION)))
            })
            .collect();
        if rows.is_empty() {
            return Ok(());
        }
        self.logs
            .entry(trial_name.to_string())
            .or_default()
            .extend(rows);
        Ok(())
    }

    async fn get_observation_log(
        &self,
        trial_name: &str,
        query: &ObservationQuery,
    ) -> Result<ObservationLog> {
        let mut log: ObservationLog = self
            .logs
            .get(trial_name)
            .map(|rows| rows.iter().filter(|o| query.matches(o)).cloned().collect())
            .unwrap_or_default();
        log.sort_by_time();
        Ok(log)
    }

    async fn delete_observation_log(&self, trial_name: &str) -> Result<()> {
        self.logs.remove(trial_name);
        Ok(())
    }
}
