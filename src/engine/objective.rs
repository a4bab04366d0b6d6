//! Objective tracking - running best value of the objective metric

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Optimization direction of the objective metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveDirection {
    /// Larger is better.
    #[default]
    Maximize,
    /// Smaller is better.
    Minimize,
}

impl ObjectiveDirection {
    /// Configuration token.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Maximize => "maximize",
            Self::Minimize => "minimize",
        }
    }

    /// Whether `candidate` is strictly better than `current`.
    #[must_use]
    pub fn improves(self, candidate: f64, current: f64) -> bool {
        match self {
            Self::Maximize => candidate > current,
            Self::Minimize => candidate < current,
        }
    }
}

impl fmt::Display for ObjectiveDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectiveDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "maximize" => Ok(Self::Maximize),
            "minimize" => Ok(Self::Minimize),
            other => Err(Error::InvalidInput(format!(
                "unknown objective type {other:?} (expected maximize or minimize)"
            ))),
        }
    }
}

/// Running best value of the objective metric for one trial.
///
/// The best value only ever moves in the configured direction. `NaN`
/// readings are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveTracker {
    metric_name: String,
    direction: ObjectiveDirection,
    best: Option<f64>,
}

impl ObjectiveTracker {
    /// Create a tracker with no observations yet.
    #[must_use]
    pub fn new(metric_name: impl Into<String>, direction: ObjectiveDirection) -> Self {
        Self {
            metric_name: metric_name.into(),
            direction,
            best: None,
        }
    }

    /// Objective metric name.
    #[must_use]
    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    /// Optimization direction.
    #[must_use]
    pub const fn direction(&self) -> ObjectiveDirection {
        self.direction
    }

    /// Best value seen so far.
    #[must_use]
    pub const fn best(&self) -> Option<f64> {
        self.best
    }

    /// Record a reading and return the best value so far.
    ///
    /// The first reading always becomes the initial best.
    pub fn observe(&mut self, value: f64) -> f64 {
        if value.is_nan() {
            return self.best.unwrap_or(value);
        }
        match self.best {
            Some(best) if !self.direction.improves(value, best) => best,
            _ => {
                self.best = Some(value);
                value
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maximize_keeps_best() {
        let mut tracker = ObjectiveTracker::new("F1", ObjectiveDirection::Maximize);
        let seen: Vec<f64> = [0.4, 0.3, 0.7].into_iter().map(|v| tracker.observe(v)).collect();
        assert_eq!(seen, vec![0.4, 0.4, 0.7]);
        assert_eq!(tracker.best(), Some(0.7));
    }

    #[test]
    fn test_minimize_keeps_best() {
        let mut tracker = ObjectiveTracker::new("loss", ObjectiveDirection::Minimize);
        let seen: Vec<f64> = [0.5, 0.6, 0.2, 0.3].into_iter().map(|v| tracker.observe(v)).collect();
        assert_eq!(seen, vec![0.5, 0.5, 0.2, 0.2]);
    }

    #[test]
    fn test_nan_is_ignored() {
        let mut tracker = ObjectiveTracker::new("F1", ObjectiveDirection::Maximize);
        assert!(tracker.observe(f64::NAN).is_nan());
        assert_eq!(tracker.best(), None);
        tracker.observe(0.5);
        assert!((tracker.observe(f64::NAN) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("Maximize".parse::<ObjectiveDirection>().unwrap(), ObjectiveDirection::Maximize);
        assert_eq!("minimize".parse::<ObjectiveDirection>().unwrap(), ObjectiveDirection::Minimize);
        assert!("sideways".parse::<ObjectiveDirection>().is_err());
    }
}
