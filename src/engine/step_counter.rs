//! Per-metric countdown before stopping rules become eligible

use std::collections::HashMap;

use crate::rules::StoppingRule;

/// Remaining observations per metric before its rules are evaluated.
///
/// Only metrics whose rules have a non-zero start step get an entry. When
/// several rules on the same metric set a start step, the last one wins.
/// A counter that reaches zero stays there: the metric is eligible from then on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepCounter {
    remaining: HashMap<String, u32>,
}

impl StepCounter {
    /// Build counters from the configured rules.
    #[must_use]
    pub fn from_rules<'a>(rules: impl IntoIterator<Item = &'a StoppingRule>) -> Self {
        let remaining = rules
            .into_iter()
            .filter(|rule| rule.start_step() > 0)
            .map(|rule| (rule.name().to_string(), rule.start_step()))
            .collect();
        Self { remaining }
    }

    /// Count one observation of `metric` and report whether its rules are eligible.
    pub fn tick(&mut self, metric: &str) -> bool {
        match self.remaining.get_mut(metric) {
            None | Some(0) => true,
            Some(left) => {
                *left -= 1;
                *left == 0
            }
        }
    }

    /// Observations still required for `metric`; `None` when it has no counter.
    #[must_use]
    pub fn remaining(&self, metric: &str) -> Option<u32> {
        self.remaining.get(metric).copied()
    }
}
