//! Collector configuration
//!
//! [`CollectorConfig`] is loaded from JSON (`--config`) and/or assembled from
//! command-line flags. Durations are carried in milliseconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{ObjectiveDirection, ObjectiveTracker};
use crate::extract::MetricExtractor;
use crate::process::WaitOptions;
use crate::report::RetryPolicy;
use crate::rules::StoppingRule;
use crate::{Error, Result};

/// Default metrics file written by the training container.
pub const DEFAULT_METRICS_FILE: &str = "/var/log/katib/metrics.log";
/// Default delay between liveness checks and at end of file.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
/// Default process wait timeout (0 = unbounded).
pub const DEFAULT_TIMEOUT_MS: u64 = 0;
/// Default bound on waiting for the main process after early stopping.
pub const DEFAULT_EARLY_STOP_TIMEOUT_MS: u64 = 60_000;
/// Initial delay while waiting for the metrics file to appear.
pub const DEFAULT_FILE_WAIT_INITIAL_MS: u64 = 100;
/// Maximum delay while waiting for the metrics file to appear.
pub const DEFAULT_FILE_WAIT_MAX_MS: u64 = 5_000;
/// Default attempts per RPC.
pub const DEFAULT_RPC_ATTEMPTS: u32 = 3;
/// Default backoff after the first failed RPC.
pub const DEFAULT_RPC_BACKOFF_MS: u64 = 500;
/// Default backoff ceiling.
pub const DEFAULT_RPC_MAX_BACKOFF_MS: u64 = 10_000;
/// Default per-attempt RPC deadline.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 30_000;

/// Everything a collector session needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Trial being watched
    pub trial_name: String,
    /// Metrics file to follow
    pub metrics_file: PathBuf,
    /// Metrics to collect; the first one is the objective
    pub metric_names: Vec<String>,
    /// Optimization direction of the objective
    pub objective_type: ObjectiveDirection,
    /// Metric filter regexes, each capturing a name and a value
    pub metric_filters: Vec<String>,
    /// Early stopping rules
    pub stop_rules: Vec<StoppingRule>,
    /// Liveness and end-of-file poll interval
    pub poll_interval_ms: u64,
    /// Bound on waiting for the main processes (0 = unbounded)
    pub timeout_ms: u64,
    /// Wait for every main process, not only the main one
    pub wait_all: bool,
    /// Bound on waiting for the main process after early stopping
    pub early_stop_timeout_ms: u64,
    /// Initial delay while waiting for the metrics file
    pub file_wait_initial_ms: u64,
    /// Maximum delay while waiting for the metrics file
    pub file_wait_max_ms: u64,
    /// DB manager service address (`host:port`)
    pub db_manager_addr: Option<String>,
    /// Early stopping service address (`host:port`)
    pub early_stop_addr: Option<String>,
    /// Local SQLite store, used when no DB manager is configured
    pub sqlite_path: Option<PathBuf>,
    /// Attempts per RPC
    pub rpc_attempts: u32,
    /// Backoff after the first failed RPC
    pub rpc_backoff_ms: u64,
    /// Backoff ceiling
    pub rpc_max_backoff_ms: u64,
    /// Per-attempt RPC deadline
    pub rpc_timeout_ms: u64,
    /// Exit non-zero when the final report fails
    pub fail_on_report_error: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            trial_name: String::new(),
            metrics_file: PathBuf::from(DEFAULT_METRICS_FILE),
            metric_names: Vec::new(),
            objective_type: ObjectiveDirection::default(),
            metric_filters: Vec::new(),
            stop_rules: Vec::new(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            wait_all: true,
            early_stop_timeout_ms: DEFAULT_EARLY_STOP_TIMEOUT_MS,
            file_wait_initial_ms: DEFAULT_FILE_WAIT_INITIAL_MS,
            file_wait_max_ms: DEFAULT_FILE_WAIT_MAX_MS,
            db_manager_addr: None,
            early_stop_addr: None,
            sqlite_path: None,
            rpc_attempts: DEFAULT_RPC_ATTEMPTS,
            rpc_backoff_ms: DEFAULT_RPC_BACKOFF_MS,
            rpc_max_backoff_ms: DEFAULT_RPC_MAX_BACKOFF_MS,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            fail_on_report_error: false,
        }
    }
}

impl CollectorConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be read, or
    /// [`Error::InvalidInput`] if it is not a valid configuration.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
            .map_err(|e| Error::InvalidInput(format!("config {}: {e}", path.display())))
    }

    /// Parse a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on malformed JSON or invalid rules.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::InvalidInput(e.to_string()))
    }

    /// Check the configuration is usable for a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.trial_name.trim().is_empty() {
            return Err(Error::InvalidInput("trial name is required".to_string()));
        }
        if self.metric_names.iter().all(|m| m.trim().is_empty()) {
            return Err(Error::InvalidInput(
                "at least one metric name is required".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidInput("poll interval must be positive".to_string()));
        }
        if self.file_wait_initial_ms == 0 || self.file_wait_max_ms < self.file_wait_initial_ms {
            return Err(Error::InvalidInput(format!(
                "file wait backoff {}ms..{}ms is not a valid range",
                self.file_wait_initial_ms, self.file_wait_max_ms
            )));
        }
        if self.db_manager_addr.is_none() && self.sqlite_path.is_none() {
            return Err(Error::InvalidInput(
                "either a DB manager address or a SQLite path is required".to_string(),
            ));
        }
        self.extractor().map(|_| ())
    }

    /// Metric names with blanks dropped and whitespace trimmed.
    #[must_use]
    pub fn metric_names(&self) -> Vec<String> {
        self.metric_names
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Objective metric: the first non-blank metric name.
    #[must_use]
    pub fn objective_metric(&self) -> Option<&str> {
        self.metric_names.iter().map(|m| m.trim()).find(|m| !m.is_empty())
    }

    /// Objective tracker for the session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if no metric name is configured.
    pub fn objective(&self) -> Result<ObjectiveTracker> {
        let metric = self
            .objective_metric()
            .ok_or_else(|| Error::InvalidInput("at least one metric name is required".to_string()))?;
        Ok(ObjectiveTracker::new(metric, self.objective_type))
    }

    /// Extractor over the configured filters (default filter when none).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on an invalid regex.
    pub fn extractor(&self) -> Result<MetricExtractor> {
        MetricExtractor::from_patterns(&self.metric_filters)
    }

    /// Directory holding the metrics file and the completion markers.
    #[must_use]
    pub fn marker_dir(&self) -> PathBuf {
        self.metrics_file
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }

    /// Liveness and end-of-file poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Bound on waiting for the main process after early stopping.
    #[must_use]
    pub const fn early_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.early_stop_timeout_ms)
    }

    /// Backoff range while waiting for the metrics file.
    #[must_use]
    pub const fn file_wait_backoff(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.file_wait_initial_ms),
            Duration::from_millis(self.file_wait_max_ms),
        )
    }

    /// How to wait for the main processes.
    #[must_use]
    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            poll_interval: self.poll_interval(),
            timeout: Duration::from_millis(self.timeout_ms),
            wait_all: self.wait_all,
            marker_dir: Some(self.marker_dir()),
        }
    }

    /// Retry policy for reporting RPCs.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.rpc_attempts,
            initial_backoff: Duration::from_millis(self.rpc_backoff_ms),
            max_backoff: Duration::from_millis(self.rpc_max_backoff_ms),
            call_timeout: Duration::from_millis(self.rpc_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Comparison;

    fn valid() -> CollectorConfig {
        CollectorConfig {
            trial_name: "random-abc".to_string(),
            metric_names: vec!["accuracy".to_string(), "loss".to_string()],
            db_manager_addr: Some("katib-db-manager:6789".to_string()),
            ..CollectorConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = CollectorConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.early_stop_timeout(), Duration::from_secs(60));
        assert_eq!(
            config.file_wait_backoff(),
            (Duration::from_millis(100), Duration::from_secs(5))
        );
        assert!(config.wait_all);
        assert_eq!(config.marker_dir(), PathBuf::from("/var/log/katib"));
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.trial_name.clear();
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));

        let mut config = valid();
        config.metric_names.clear();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.db_manager_addr = None;
        assert!(config.validate().is_err());
        config.sqlite_path = Some(PathBuf::from("/tmp/obs.db"));
        assert!(config.validate().is_ok());

        let mut config = valid();
        config.metric_filters = vec!["([a-z".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_objective_is_first_metric() {
        let mut config = valid();
        config.objective_type = ObjectiveDirection::Minimize;
        let objective = config.objective().unwrap();
        assert_eq!(objective.metric_name(), "accuracy");
        assert_eq!(objective.direction(), ObjectiveDirection::Minimize);

        config.metric_names = vec!["  ".to_string(), " loss ".to_string()];
        assert_eq!(config.metric_names(), vec!["loss".to_string()]);
        assert_eq!(config.objective().unwrap().metric_name(), "loss");

        config.metric_names.clear();
        assert!(matches!(config.objective(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_from_json_with_rules() {
        let config = CollectorConfig::from_json(
            r#"{
                "trial_name": "t1",
                "metric_names": ["loss"],
                "objective_type": "minimize",
                "stop_rules": [{"name": "loss", "value": "0.1", "comparison": "less", "start_step": 3}],
                "poll_interval_ms": 250
            }"#,
        )
        .unwrap();

        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.stop_rules.len(), 1);
        assert_eq!(config.stop_rules[0].comparison(), Comparison::Less);
        assert_eq!(config.stop_rules[0].start_step(), 3);
        assert_eq!(config.early_stop_timeout_ms, DEFAULT_EARLY_STOP_TIMEOUT_MS);
    }

    #[test]
    fn test_from_json_rejects_bad_rule() {
        let err = CollectorConfig::from_json(
            r#"{"stop_rules": [{"name": "loss", "value": "abc", "comparison": "less"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
