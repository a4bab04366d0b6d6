//! Metric extraction from training log lines
//!
//! Training code prints metrics as `name=value` pairs; each configured
//! [`MetricFilter`] is a regular expression whose first two capture groups
//! are the metric name and the metric value. Filters are applied in order
//! and every match of every filter yields an observation.
//!
//! ```text
//! epoch 1:
//! batch1 loss=0.8
//! F1=0.4
//! ```
//!
//! A line may start with an RFC3339 timestamp, in which case every
//! observation extracted from it carries that instant.

mod collect;

pub use collect::{collect_observation_log, observation_log_from_text};

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::warn;

use crate::observation::MetricObservation;
use crate::{Error, Result};

/// Filter used when none is configured: captures `name=value`.
pub const DEFAULT_FILTER: &str = r"([\w|-]+)\s*=\s*([+-]?\d*(\.\d+)?([Ee][+-]?\d+)?)";

/// Separator between filters in the `--metric-filters` flag.
pub const FILTER_SEPARATOR: char = ';';

/// A named pattern that captures `(metric name, metric value)` pairs.
#[derive(Debug, Clone)]
pub struct MetricFilter {
    name: String,
    pattern: Regex,
}

impl MetricFilter {
    /// Compile a filter named after its own pattern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the pattern does not compile.
    pub fn new(pattern: &str) -> Result<Self> {
        Self::named(pattern, pattern)
    }

    /// Compile a filter with an explicit name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the pattern does not compile.
    pub fn named(name: impl Into<String>, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::InvalidInput(format!("invalid metric filter {pattern:?}: {e}")))?;
        Ok(Self {
            name: name.into(),
            pattern,
        })
    }

    /// Filter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Raw `(name, value)` captures of every match in `line`.
    ///
    /// Matches where either of the first two groups did not participate are
    /// dropped silently.
    pub fn captures<'l>(&'l self, line: &'l str) -> impl Iterator<Item = (&'l str, &'l str)> + 'l {
        self.pattern.captures_iter(line).filter_map(|caps| {
            let name = caps.get(1)?.as_str().trim();
            let value = caps.get(2)?.as_str().trim();
            Some((name, value))
        })
    }
}

/// Applies an ordered list of filters to log lines.
#[derive(Debug, Clone)]
pub struct MetricExtractor {
    filters: Vec<MetricFilter>,
}

impl MetricExtractor {
    /// Create an extractor from compiled filters.
    ///
    /// An empty list falls back to [`DEFAULT_FILTER`].
    #[must_use]
    pub fn new(filters: Vec<MetricFilter>) -> Self {
        if filters.is_empty() {
            return Self::default();
        }
        Self { filters }
    }

    /// Compile filters from their source patterns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for the first pattern that does not compile.
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let filters = patterns
            .into_iter()
            .filter(|p| !p.as_ref().is_empty())
            .map(|p| MetricFilter::new(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(filters))
    }

    /// Compile filters from the `;`-separated flag form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for the first pattern that does not compile.
    pub fn from_flag(flag: &str) -> Result<Self> {
        Self::from_patterns(flag.split(FILTER_SEPARATOR))
    }

    /// Configured filters, in application order.
    #[must_use]
    pub fn filters(&self) -> &[MetricFilter] {
        &self.filters
    }

    /// Extract every metric in `line`.
    ///
    /// Values that fail numeric parsing are dropped with a warning and
    /// extraction continues with the remaining matches.
    #[must_use]
    pub fn extract(&self, line: &str) -> Vec<MetricObservation> {
        let timestamp = leading_timestamp(line);
        let mut observations = Vec::new();
        for filter in &self.filters {
            for (name, raw) in filter.captures(line) {
                match raw.parse::<f64>() {
                    Ok(value) => {
                        let observation = MetricObservation::new(name, value);
                        observations.push(match timestamp {
                            Some(ts) => observation.with_timestamp(ts),
                            None => observation,
                        });
                    }
                    Err(e) => {
                        warn!(metric = name, value = raw, filter = filter.name(), error = %e,
                            "Unable to parse metric value as float");
                    }
                }
            }
        }
        observations
    }
}

/// [`DEFAULT_FILTER`], compiled once per process.
fn default_filter() -> &'static MetricFilter {
    static FILTER: OnceLock<MetricFilter> = OnceLock::new();
    FILTER.get_or_init(|| MetricFilter {
        name: "default".to_string(),
        pattern: Regex::new(DEFAULT_FILTER).expect("Valid regex"),
    })
}

impl Default for MetricExtractor {
    fn default() -> Self {
        Self {
            filters: vec![default_filter().clone()],
        }
    }
}

/// Whether `line` mentions any of `names`.
///
/// Cheap substring pre-check run before the filters.
#[must_use]
pub fn mentions_any<S: AsRef<str>>(line: &str, names: &[S]) -> bool {
    names.iter().any(|name| line.contains(name.as_ref()))
}

/// Timestamp at the start of `line`, if its first space-separated token is RFC3339.
#[must_use]
pub fn leading_timestamp(line: &str) -> Option<DateTime<Utc>> {
    let (head, _) = line.split_once(' ')?;
    DateTime::parse_from_rfc3339(head)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
