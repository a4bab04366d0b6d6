//! Collector session
//!
//! A session runs two activities side by side:
//! - the watch task follows the metrics file and feeds the
//!   [`EarlyStoppingEngine`]; when every rule is satisfied it stops the trial
//! - the supervisor waits for the container's main processes to exit
//!
//! Whichever reaches a terminal state first claims the [`ReportGuard`] and is
//! the only one to report.

mod tail;

pub use tail::{wait_for_file, FileTail};

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::CollectorConfig;
use crate::engine::{EarlyStoppingEngine, ObjectiveTracker, TriggerDecision};
use crate::extract::{collect_observation_log, MetricExtractor};
use crate::process::{
    main_processes, wait_for_exit, wait_main_processes, write_marker, MainProcesses,
    ProcessController, WaitOptions, MARKER_EARLY_STOPPED,
};
use crate::report::{ReportingClient, TrialStatus};
use crate::rules::StoppingRule;
use crate::{Error, Result};

/// How a trial session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialOutcome {
    /// Stopped by the early stopping rules
    EarlyStopped,
    /// Main processes exited on their own
    Completed,
}

/// Result of [`Collector::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Terminal outcome
    pub outcome: TrialOutcome,
    /// Set when the final report (or status update) failed
    pub report_error: Option<String>,
}

impl SessionReport {
    /// Whether reporting succeeded.
    #[must_use]
    pub const fn is_reported(&self) -> bool {
        self.report_error.is_none()
    }
}

/// Single-assignment claim on the right to report.
#[derive(Debug, Default)]
pub struct ReportGuard {
    claimed: OnceLock<TrialOutcome>,
}

impl ReportGuard {
    /// Unclaimed guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the guard for `outcome`. Only the first claim succeeds.
    pub fn try_claim(&self, outcome: TrialOutcome) -> bool {
        self.claimed.set(outcome).is_ok()
    }

    /// Outcome of the successful claim, if any.
    #[must_use]
    pub fn claimed(&self) -> Option<TrialOutcome> {
        self.claimed.get().copied()
    }
}

/// A collector session for one trial.
pub struct Collector<R, P> {
    trial_name: String,
    metrics_file: PathBuf,
    metric_names: Vec<String>,
    extractor: MetricExtractor,
    rules: Vec<StoppingRule>,
    objective: ObjectiveTracker,
    poll_interval: Duration,
    early_stop_timeout: Duration,
    file_wait: (Duration, Duration),
    wait: WaitOptions,
    reporter: Arc<R>,
    processes: Arc<P>,
}

impl<R, P> Collector<R, P>
where
    R: ReportingClient + 'static,
    P: ProcessController + 'static,
{
    /// Build a session from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the configuration is unusable.
    pub fn new(config: &CollectorConfig, reporter: Arc<R>, processes: Arc<P>) -> Result<Self> {
        let objective = config.objective()?;
        Ok(Self {
            trial_name: config.trial_name.clone(),
            metrics_file: config.metrics_file.clone(),
            extractor: config.extractor()?,
            objective,
            metric_names: config.metric_names(),
            rules: config.stop_rules.clone(),
            poll_interval: config.poll_interval(),
            early_stop_timeout: config.early_stop_timeout(),
            file_wait: config.file_wait_backoff(),
            wait: config.wait_options(),
            reporter,
            processes,
        })
    }

    /// Run the session to its end.
    ///
    /// Failures along the way are logged; a failed final report is returned in
    /// [`SessionReport::report_error`].
    pub async fn run(self) -> SessionReport {
        let session = Arc::new(self);
        let guard = Arc::new(ReportGuard::new());

        let main = match main_processes(&*session.processes, session.wait.marker_dir.as_deref()) {
            Ok(main) => Some(main),
            Err(e) => {
                error!(trial = %session.trial_name, error = %e, "Cannot find main processes");
                None
            }
        };

        let watch = tokio::spawn(Arc::clone(&session).watch(Arc::clone(&guard), main.clone()));

        match &main {
            Some(main) => {
                match wait_main_processes(&*session.processes, main, &session.wait).await {
                    Ok(exit) => debug!(exit = ?exit, "Main processes exited"),
                    Err(e) => error!(trial = %session.trial_name, error = %e, "Failed to wait for main processes"),
                }
            }
            None => warn!("No main process to wait for; reporting immediately"),
        }

        if guard.try_claim(TrialOutcome::Completed) {
            watch.abort();
            let report_error = session.report_observations().await.err().map(|e| e.to_string());
            return SessionReport {
                outcome: TrialOutcome::Completed,
                report_error,
            };
        }

        // The watch task claimed first and owns the report.
        let report_error = match watch.await {
            Ok(report_error) => report_error,
            Err(e) => Some(format!("early stopping task failed: {e}")),
        };
        SessionReport {
            outcome: TrialOutcome::EarlyStopped,
            report_error,
        }
    }

    /// Follow the metrics file until the rules trigger.
    ///
    /// Returns the report error of the trigger path, if it ran and failed.
    async fn watch(self: Arc<Self>, guard: Arc<ReportGuard>, main: Option<MainProcesses>) -> Option<String> {
        let (initial, max) = self.file_wait;
        wait_for_file(&self.metrics_file, initial, max).await;

        let mut tail = match FileTail::open(&self.metrics_file, self.poll_interval).await {
            Ok(tail) => tail,
            Err(e) => {
                error!(path = %self.metrics_file.display(), error = %e, "Cannot open metrics file");
                return None;
            }
        };

        let mut engine = (!self.rules.is_empty())
            .then(|| EarlyStoppingEngine::new(self.rules.clone(), self.objective.clone()));

        loop {
            let line = match tail.next_line().await {
                Ok(line) => line,
                Err(e) => {
                    error!(path = %self.metrics_file.display(), error = %e, "Failed to read metrics file");
                    return None;
                }
            };
            debug!("{line}");

            let Some(engine) = engine.as_mut() else {
                continue;
            };
            let Some(decision) = engine.consume_line(&line, &self.extractor) else {
                continue;
            };
            if !guard.try_claim(TrialOutcome::EarlyStopped) {
                debug!("Trial already completed; skipping early stop");
                return None;
            }
            return self
                .stop_trial(main.as_ref(), &decision)
                .await
                .err()
                .map(|e| e.to_string());
        }
    }

    /// Early stop: mark, terminate, wait, report, update status.
    async fn stop_trial(&self, main: Option<&MainProcesses>, decision: &TriggerDecision) -> Result<()> {
        info!(
            trial = %self.trial_name,
            rules = decision.satisfied_rules().len(),
            observations = decision.observations_consumed(),
            "Training container is early stopped"
        );

        match main {
            Some(main) => {
                self.mark_and_terminate(main.main_pid).await;
                if !wait_for_exit(&*self.processes, main.main_pid, self.poll_interval, self.early_stop_timeout).await {
                    warn!(
                        pid = main.main_pid,
                        timeout = ?self.early_stop_timeout,
                        "Main process still running after early stop"
                    );
                }
            }
            None => error!(trial = %self.trial_name, "No main process known; cannot terminate training"),
        }

        let report = self.report_observations().await;
        let status = self
            .reporter
            .set_trial_status(&self.trial_name, TrialStatus::EarlyStopped)
            .await;
        if let Err(e) = &status {
            error!(trial = %self.trial_name, error = %e, "Failed to set trial status");
        }
        match (report, status) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(report), Err(status)) => Err(Error::Transport(format!("{report}; {status}"))),
        }
    }

    async fn mark_and_terminate(&self, main_pid: u32) {
        if let Some(dir) = &self.wait.marker_dir {
            if let Err(e) = write_marker(dir, main_pid, MARKER_EARLY_STOPPED).await {
                error!(pid = main_pid, error = %e, "Failed to write early stop marker");
            }
        }

        let child = match self.processes.find_single_child(main_pid) {
            Ok(child) => child,
            Err(e) => {
                error!(pid = main_pid, error = %e, "Cannot pick the training process to terminate");
                return;
            }
        };
        match self.processes.terminate(child.pid) {
            Ok(()) => info!(pid = child.pid, cmdline = %child.cmdline, "Terminated training process"),
            Err(e) => error!(pid = child.pid, error = %e, "Failed to terminate training process"),
        }
    }

    /// Collect the whole metrics file and report it.
    async fn report_observations(&self) -> Result<()> {
        let result = self.collect_and_report().await;
        if let Err(e) = &result {
            error!(trial = %self.trial_name, error = %e, "Failed to report observation log");
        }
        result
    }

    async fn collect_and_report(&self) -> Result<()> {
        let log =
            collect_observation_log(&self.metrics_file, &self.metric_names, &self.extractor).await?;
        self.reporter
            .report_observation_log(&self.trial_name, &log)
            .await
    }
}
