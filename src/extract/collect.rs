//! Whole-file observation-log collection for reporting

use std::path::Path;

use tracing::{info, warn};

use super::{leading_timestamp, mentions_any, MetricExtractor};
use crate::observation::{unknown_timestamp, MetricObservation, ObservationLog};
use crate::{Error, Result};

/// Build the observation log for a trial from its metrics file.
///
/// Only metrics named in `metric_names` are kept; the first name is the
/// objective. Lines without a leading RFC3339 timestamp get
/// [`unknown_timestamp`]. If the objective metric never appears, the log is
/// replaced by a single "unavailable" reading for it.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read and
/// [`Error::InvalidInput`] if `metric_names` is empty.
pub async fn collect_observation_log<S: AsRef<str>>(
    path: impl AsRef<Path>,
    metric_names: &[S],
    extractor: &MetricExtractor,
) -> Result<ObservationLog> {
    let content = tokio::fs::read_to_string(path.as_ref()).await?;
    observation_log_from_text(&content, metric_names, extractor)
}

/// Same as [`collect_observation_log`] for in-memory text.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `metric_names` is empty.
pub fn observation_log_from_text<S: AsRef<str>>(
    content: &str,
    metric_names: &[S],
    extractor: &MetricExtractor,
) -> Result<ObservationLog> {
    let objective = metric_names
        .first()
        .map(AsRef::as_ref)
        .ok_or_else(|| Error::InvalidInput("at least one metric name is required".to_string()))?;

    let mut log = ObservationLog::new();
    for line in content.lines() {
        if !mentions_any(line, metric_names) {
            continue;
        }
        let timestamp = leading_timestamp(line).unwrap_or_else(|| {
            warn!(line, "Metrics will not have timestamp since line doesn't begin with timestamp string");
            unknown_timestamp()
        });
        extractor
            .extract(line)
            .into_iter()
            .filter(|o| metric_names.iter().any(|m| m.as_ref() == o.name()))
            .for_each(|o| log.push(MetricObservation::at(o.name(), o.value(), timestamp)));
    }

    if !log.contains_metric(objective) {
        info!(metric = objective, "Objective metric is not found in training logs, reporting it as unavailable");
        return Ok(ObservationLog::from_observations(vec![
            MetricObservation::unavailable(objective),
        ]));
    }
    Ok(log)
}
