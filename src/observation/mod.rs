//! Observation model: single metric readings and per-trial observation logs
//!
//! ```text
//! Trial (1) ──< ObservationLog (1) ──< MetricObservation (N) [time-ordered]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use metrics_collector::observation::{MetricObservation, ObservationLog};
//!
//! let mut log = ObservationLog::new();
//! log.push(MetricObservation::new("loss", 0.5));
//! log.push(MetricObservation::new("F1", 0.4));
//!
//! assert_eq!(log.len(), 2);
//! assert_eq!(log.for_metric("loss").count(), 1);
//! ```

mod metric_observation;
mod observation_log;

pub use metric_observation::{
    format_metric_value, parse_metric_value, unknown_timestamp, MetricObservation,
    UNAVAILABLE_METRIC_VALUE,
};
pub use observation_log::ObservationLog;
