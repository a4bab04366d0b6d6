//! Early stopping rules
//!
//! A rule is serialized as four `;`-separated fields:
//!
//! ```text
//! <metric name>;<threshold value>;<equal|less|greater>;<start step>
//! ```
//!
//! A start step of `0` (or an empty field) makes the rule eligible on the
//! first matching observation.
//!
//! ```rust
//! use metrics_collector::rules::{Comparison, StoppingRule};
//!
//! let rule: StoppingRule = "loss;0.1;less;0".parse()?;
//! assert_eq!(rule.name(), "loss");
//! assert_eq!(rule.comparison(), Comparison::Less);
//! assert!(rule.is_satisfied_by(0.05));
//! # Ok::<(), metrics_collector::Error>(())
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Comparison applied between an observed value and a rule threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// `value == threshold`
    Equal,
    /// `value < threshold`
    Less,
    /// `value > threshold`
    Greater,
}

impl Comparison {
    /// Configuration token for this comparison.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::Less => "less",
            Self::Greater => "greater",
        }
    }

    /// Apply the comparison.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Equal => value == threshold,
            Self::Less => value < threshold,
            Self::Greater => value > threshold,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Comparison {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equal" => Ok(Self::Equal),
            "less" => Ok(Self::Less),
            "greater" => Ok(Self::Greater),
            other => Err(Error::InvalidRule(format!(
                "unknown comparison {other:?} (expected equal, less or greater)"
            ))),
        }
    }
}

/// A condition on a named metric that contributes to an early stop.
///
/// The threshold keeps its configured text next to the parsed value so the
/// rule renders back exactly as it was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RuleSpec", into = "RuleSpec")]
pub struct StoppingRule {
    name: String,
    threshold_value: String,
    threshold: f64,
    comparison: Comparison,
    start_step: u32,
}

impl StoppingRule {
    /// Create a rule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRule`] if the name is empty or the threshold
    /// is not a number.
    pub fn new(
        name: impl Into<String>,
        threshold_value: impl Into<String>,
        comparison: Comparison,
        start_step: u32,
    ) -> Result<Self> {
        let name = name.into().trim().to_string();
        let threshold_value = threshold_value.into().trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidRule("metric name is empty".to_string()));
        }
        let threshold = threshold_value.parse::<f64>().map_err(|e| {
            Error::InvalidRule(format!(
                "threshold {threshold_value:?} for metric {name:?} is not a number: {e}"
            ))
        })?;
        Ok(Self {
            name,
            threshold_value,
            threshold,
            comparison,
            start_step,
        })
    }

    /// Metric name the rule applies to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Threshold as configured.
    #[must_use]
    pub fn threshold_value(&self) -> &str {
        &self.threshold_value
    }

    /// Parsed threshold.
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Comparison operator.
    #[must_use]
    pub const fn comparison(&self) -> Comparison {
        self.comparison
    }

    /// Number of observations of the metric required before the rule is evaluated.
    #[must_use]
    pub const fn start_step(&self) -> u32 {
        self.start_step
    }

    /// Whether `value` satisfies the rule.
    #[must_use]
    pub fn is_satisfied_by(&self, value: f64) -> bool {
        self.comparison.holds(value, self.threshold)
    }
}

impl fmt::Display for StoppingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{};{}",
            self.name, self.threshold_value, self.comparison, self.start_step
        )
    }
}

impl FromStr for StoppingRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(';').collect();
        let [name, value, comparison, start_step] = fields.as_slice() else {
            return Err(Error::InvalidRule(format!(
                "{s:?} has {} fields, expected 4",
                fields.len()
            )));
        };

        let start_step = match start_step.trim() {
            "" => 0,
            raw => raw.parse::<u32>().map_err(|e| {
                Error::InvalidRule(format!("start step {raw:?} is not a non-negative integer: {e}"))
            })?,
        };

        Self::new(*name, *value, comparison.parse()?, start_step)
    }
}

/// Serialized form of a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleSpec {
    name: String,
    value: String,
    comparison: Comparison,
    #[serde(default)]
    start_step: u32,
}

impl TryFrom<RuleSpec> for StoppingRule {
    type Error = Error;

    fn try_from(spec: RuleSpec) -> Result<Self> {
        Self::new(spec.name, spec.value, spec.comparison, spec.start_step)
    }
}

impl From<StoppingRule> for RuleSpec {
    fn from(rule: StoppingRule) -> Self {
        Self {
            name: rule.name,
            value: rule.threshold_value,
            comparison: rule.comparison,
            start_step: rule.start_step,
        }
    }
}

/// Parse every `--stop-rule` value, failing on the first malformed one.
///
/// # Errors
///
/// Returns [`Error::InvalidRule`] for the first rule that does not parse.
pub fn parse_rules<I, S>(raw: I) -> Result<Vec<StoppingRule>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter().map(|r| r.as_ref().parse()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rule() {
        let rule: StoppingRule = "accuracy;0.8;greater;3".parse().unwrap();
        assert_eq!(rule.name(), "accuracy");
        assert_eq!(rule.threshold_value(), "0.8");
        assert_eq!(rule.comparison(), Comparison::Greater);
        assert_eq!(rule.start_step(), 3);
    }

    #[test]
    fn test_parse_rule_empty_start_step_means_zero() {
        let rule: StoppingRule = "loss;0.1;less;".parse().unwrap();
        assert_eq!(rule.start_step(), 0);
    }

    #[test]
    fn test_parse_rule_wrong_field_count() {
        let err = "loss;0.1;less".parse::<StoppingRule>().unwrap_err();
        assert!(matches!(err, Error::InvalidRule(_)));
        assert!(err.to_string().contains("expected 4"));
    }

    #[test]
    fn test_parse_rule_rejects_bad_threshold() {
        let err = "loss;low;less;0".parse::<StoppingRule>().unwrap_err();
        assert!(matches!(err, Error::InvalidRule(_)));
    }

    #[test]
    fn test_parse_rule_rejects_negative_start_step() {
        assert!("loss;0.1;less;-1".parse::<StoppingRule>().is_err());
    }

    #[test]
    fn test_comparison_tokens_case_insensitive() {
        assert_eq!("EQUAL".parse::<Comparison>().unwrap(), Comparison::Equal);
        assert_eq!(" less ".parse::<Comparison>().unwrap(), Comparison::Less);
        assert!("gte".parse::<Comparison>().is_err());
    }

    #[test]
    fn test_comparison_holds() {
        assert!(Comparison::Equal.holds(1.0, 1.0));
        assert!(!Comparison::Equal.holds(1.0, 1.5));
        assert!(Comparison::Less.holds(0.05, 0.1));
        assert!(!Comparison::Less.holds(0.1, 0.1));
        assert!(Comparison::Greater.holds(0.95, 0.9));
        assert!(!Comparison::Greater.holds(0.9, 0.9));
    }

    #[test]
    fn test_display_matches_flag_format() {
        let rule = StoppingRule::new("F1", "0.7", Comparison::Less, 2).unwrap();
        assert_eq!(rule.to_string(), "F1;0.7;less;2");
        assert_eq!(rule.to_string().parse::<StoppingRule>().unwrap(), rule);
    }

    #[test]
    fn test_rule_serde_json() {
        let rule = StoppingRule::new("acc", "0.9", Comparison::Greater, 1).unwrap();
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "acc", "value": "0.9", "comparison": "greater", "start_step": 1})
        );

        let bad = serde_json::json!({"name": "acc", "value": "x", "comparison": "greater"});
        assert!(serde_json::from_value::<StoppingRule>(bad).is_err());
    }

    #[test]
    fn test_parse_rules_collects_all() {
        let rules = parse_rules(["loss;0.1;less;0", "acc;0.9;greater;2"]).unwrap();
        assert_eq!(rules.len(), 2);
        assert!(parse_rules(["loss;0.1;less;0", "bogus"]).is_err());
    }
}
