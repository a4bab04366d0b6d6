//! Metric Observation - one `(name, value, timestamp)` reading from a log line

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Value reported for the objective metric when the training log never
/// printed it. Held in memory as `NaN`.
pub const UNAVAILABLE_METRIC_VALUE: &str = "unavailable";

/// Metric Observation represents a single metric reading.
///
/// Produced by the extractor from one log line and consumed by the
/// early stopping engine and the reporting path. The timestamp is optional:
/// it is only known when the log line starts with an RFC3339 instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricObservation {
    name: String,
    value: f64,
    timestamp: Option<DateTime<Utc>>,
}

impl MetricObservation {
    /// Create a new observation without a timestamp.
    #[must_use]
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp: None,
        }
    }

    /// Create an observation that is known to have been logged at `timestamp`.
    #[must_use]
    pub fn at(name: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp: Some(timestamp),
        }
    }

    /// Create the placeholder observation reported when a metric never appeared.
    #[must_use]
    pub fn unavailable(name: impl Into<String>) -> Self {
        Self::at(name, f64::NAN, unknown_timestamp())
    }

    /// Set or replace the timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Get the metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the metric value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Get the timestamp, if the log line carried one.
    #[must_use]
    pub const fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Whether this is the "unavailable" placeholder value.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        self.value.is_nan()
    }

    /// Value rendered the way it is persisted and sent over the wire.
    #[must_use]
    pub fn value_string(&self) -> String {
        format_metric_value(self.value)
    }
}

/// Render a metric value as an opaque string.
///
/// `NaN` renders as [`UNAVAILABLE_METRIC_VALUE`].
#[must_use]
pub fn format_metric_value(value: f64) -> String {
    if value.is_nan() {
        UNAVAILABLE_METRIC_VALUE.to_string()
    } else {
        value.to_string()
    }
}

/// Parse an opaque metric value string.
///
/// # Errors
///
/// Returns [`Error::ParseError`] if the string is neither a float nor
/// [`UNAVAILABLE_METRIC_VALUE`].
pub fn parse_metric_value(raw: &str) -> Result<f64> {
    let raw = raw.trim();
    if raw == UNAVAILABLE_METRIC_VALUE {
        return Ok(f64::NAN);
    }
    raw.parse::<f64>()
        .map_err(|e| Error::ParseError(format!("metric value {raw:?} is not a number: {e}")))
}

/// Timestamp given to observations whose log line has no leading timestamp:
/// `0001-01-01T00:00:00Z`.
#[must_use]
pub fn unknown_timestamp() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map_or(DateTime::<Utc>::MIN_UTC, |naive| naive.and_utc())
}
