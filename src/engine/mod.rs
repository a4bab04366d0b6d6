//! Early stopping decision engine
//!
//! The engine holds the live set of unsatisfied stopping rules and consumes
//! metric observations one at a time. For each observation:
//!
//! 1. observations of metrics no live rule references are ignored;
//! 2. objective-metric readings are replaced by the running best value;
//! 3. the metric's step counter is ticked, and while it is still counting
//!    down its rules are not evaluated;
//! 4. every live rule on the metric is evaluated and satisfied rules are
//!    removed for good.
//!
//! When the last live rule is removed the engine emits a [`TriggerDecision`]
//! and becomes terminal: further observations are ignored.
//!
//! ```rust
//! use metrics_collector::engine::{EarlyStoppingEngine, ObjectiveDirection, ObjectiveTracker};
//! use metrics_collector::observation::MetricObservation;
//!
//! let rules = vec!["loss;0.1;less;0".parse()?];
//! let objective = ObjectiveTracker::new("accuracy", ObjectiveDirection::Maximize);
//! let mut engine = EarlyStoppingEngine::new(rules, objective);
//!
//! assert!(engine.consume(&MetricObservation::new("loss", 0.5)).is_none());
//! assert!(engine.consume(&MetricObservation::new("loss", 0.05)).is_some());
//! assert!(engine.is_triggered());
//! # Ok::<(), metrics_collector::Error>(())
//! ```

mod objective;
mod step_counter;

pub use objective::{ObjectiveDirection, ObjectiveTracker};
pub use step_counter::StepCounter;

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::extract::MetricExtractor;
use crate::observation::MetricObservation;
use crate::rules::StoppingRule;

/// Identity of a rule within one engine, assigned in configuration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(usize);

impl RuleId {
    /// Position of the rule in the configured list.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// At least one rule is still live.
    Running,
    /// Every rule has been satisfied; the trial must be stopped.
    Triggered,
}

/// Emitted once, when the live rule set becomes empty.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerDecision {
    satisfied_rules: Vec<StoppingRule>,
    observations_consumed: u64,
}

impl TriggerDecision {
    /// Rules in the order they were satisfied.
    #[must_use]
    pub fn satisfied_rules(&self) -> &[StoppingRule] {
        &self.satisfied_rules
    }

    /// Observations consumed up to and including the triggering one.
    #[must_use]
    pub const fn observations_consumed(&self) -> u64 {
        self.observations_consumed
    }
}

/// Stateful early stopping engine.
#[derive(Debug, Clone)]
pub struct EarlyStoppingEngine {
    live_rules: BTreeMap<RuleId, StoppingRule>,
    satisfied: Vec<StoppingRule>,
    steps: StepCounter,
    objective: ObjectiveTracker,
    state: EngineState,
    observations_consumed: u64,
}

impl EarlyStoppingEngine {
    /// Create an engine over `rules`.
    #[must_use]
    pub fn new(rules: Vec<StoppingRule>, objective: ObjectiveTracker) -> Self {
        let steps = StepCounter::from_rules(&rules);
        let live_rules = rules
            .into_iter()
            .enumerate()
            .map(|(idx, rule)| (RuleId(idx), rule))
            .collect();
        Self {
            live_rules,
            satisfied: Vec::new(),
            steps,
            objective,
            state: EngineState::Running,
            observations_consumed: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Whether the engine has emitted its trigger decision.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.state == EngineState::Triggered
    }

    /// Number of rules not yet satisfied.
    #[must_use]
    pub fn live_rule_count(&self) -> usize {
        self.live_rules.len()
    }

    /// Rules not yet satisfied.
    pub fn live_rules(&self) -> impl Iterator<Item = (RuleId, &StoppingRule)> {
        self.live_rules.iter().map(|(id, rule)| (*id, rule))
    }

    /// Objective tracker state.
    #[must_use]
    pub const fn objective(&self) -> &ObjectiveTracker {
        &self.objective
    }

    /// Step counters.
    #[must_use]
    pub const fn steps(&self) -> &StepCounter {
        &self.steps
    }

    /// Whether any live rule references `metric`.
    #[must_use]
    pub fn references(&self, metric: &str) -> bool {
        self.live_rules.values().any(|rule| rule.name() == metric)
    }

    /// Whether `line` mentions the metric of any live rule.
    #[must_use]
    pub fn line_is_relevant(&self, line: &str) -> bool {
        self.live_rules.values().any(|rule| line.contains(rule.name()))
    }

    /// Consume one observation.
    ///
    /// Returns the trigger decision when this observation satisfies the last
    /// live rule. Once triggered, always returns `None`.
    pub fn consume(&mut self, observation: &MetricObservation) -> Option<TriggerDecision> {
        if self.is_triggered() {
            return None;
        }
        self.observations_consumed += 1;

        let metric = observation.name();
        if !self.references(metric) {
            return None;
        }

        let value = if metric == self.objective.metric_name() {
            self.objective.observe(observation.value())
        } else {
            observation.value()
        };

        if !self.steps.tick(metric) {
            debug!(metric, remaining = ?self.steps.remaining(metric), "Stopping rule not yet eligible");
            return None;
        }

        let satisfied: Vec<RuleId> = self
            .live_rules
            .iter()
            .filter(|(_, rule)| rule.name() == metric && rule.is_satisfied_by(value))
            .map(|(id, _)| *id)
            .collect();
        for id in satisfied {
            if let Some(rule) = self.live_rules.remove(&id) {
                debug!(rule = %rule, index = id.index(), value, live = self.live_rules.len(), "Early stopping rule satisfied");
                self.satisfied.push(rule);
            }
        }

        if !self.live_rules.is_empty() {
            return None;
        }

        self.state = EngineState::Triggered;
        info!(
            rules = self.satisfied.len(),
            observations = self.observations_consumed,
            "All early stopping rules satisfied"
        );
        Some(TriggerDecision {
            satisfied_rules: self.satisfied.clone(),
            observations_consumed: self.observations_consumed,
        })
    }

    /// Extract metrics from `line` and consume them in order.
    ///
    /// Stops at the observation that triggers; the rest of the line is not
    /// evaluated.
    pub fn consume_line(
        &mut self,
        line: &str,
        extractor: &MetricExtractor,
    ) -> Option<TriggerDecision> {
        if self.is_triggered() || !self.line_is_relevant(line) {
            return None;
        }
        extractor
            .extract(line)
            .iter()
            .find_map(|observation| self.consume(observation))
    }
}
