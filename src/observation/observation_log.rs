//! Observation Log - the ordered readings captured for one trial

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MetricObservation;

/// Ordered collection of metric observations for one trial.
///
/// The log is built up while a session runs and handed to the reporting
/// path once. Ordering is by timestamp; [`ObservationLog::sort_by_time`]
/// is stable so readings logged within the same instant keep their order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ObservationLog {
    observations: Vec<MetricObservation>,
}

impl ObservationLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log from existing observations, keeping their order.
    #[must_use]
    pub fn from_observations(observations: Vec<MetricObservation>) -> Self {
        Self { observations }
    }

    /// Append an observation.
    pub fn push(&mut self, observation: MetricObservation) {
        self.observations.push(observation);
    }

    /// Number of observations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Check if the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// All observations, in log order.
    #[must_use]
    pub fn observations(&self) -> &[MetricObservation] {
        &self.observations
    }

    /// Iterate over observations.
    pub fn iter(&self) -> std::slice::Iter<'_, MetricObservation> {
        self.observations.iter()
    }

    /// Observations of a single metric.
    pub fn for_metric<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a MetricObservation> + 'a {
        self.observations.iter().filter(move |o| o.name() == name)
    }

    /// Whether any observation of `name` is present.
    #[must_use]
    pub fn contains_metric(&self, name: &str) -> bool {
        self.observations.iter().any(|o| o.name() == name)
    }

    /// Sort ascending by timestamp. Observations without a timestamp sort first.
    pub fn sort_by_time(&mut self) {
        self.observations
            .sort_by_key(|o| o.timestamp().unwrap_or(DateTime::<Utc>::MIN_UTC));
    }

    /// Consume the log, returning its observations.
    #[must_use]
    pub fn into_observations(self) -> Vec<MetricObservation> {
        self.observations
    }
}

impl FromIterator<MetricObservation> for ObservationLog {
    fn from_iter<I: IntoIterator<Item = MetricObservation>>(iter: I) -> Self {
        Self {
            observations: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ObservationLog {
    type Item = MetricObservation;
    type IntoIter = std::vec::IntoIter<MetricObservation>;

    fn into_iter(self) -> Self::IntoIter {
        self.observations.into_iter()
    }
}

impl<'a> IntoIterator for &'a ObservationLog {
    type Item = &'a MetricObservation;
    type IntoIter = std::slice::Iter<'a, MetricObservation>;

    fn into_iter(self) -> Self::IntoIter {
        self.observations.iter()
    }
}
