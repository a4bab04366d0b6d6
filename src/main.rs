//! metrics-collector: trial metrics sidecar
//!
//! Follows the training container's metrics file, applies early stopping
//! rules, and reports the observation log when the trial ends.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info};

use metrics_collector::collector::{Collector, SessionReport};
use metrics_collector::config::CollectorConfig;
use metrics_collector::engine::ObjectiveDirection;
use metrics_collector::logging::{self, DEFAULT_LOG_LEVEL};
use metrics_collector::process::ProcfsController;
use metrics_collector::report::{ReportingClient, StoreReportingClient};
use metrics_collector::rules::StoppingRule;
use metrics_collector::store::{ObservationStore, SqliteObservationStore, SqliteStoreConfig};

#[derive(Parser, Debug)]
#[command(name = "metrics-collector")]
#[command(about = "Collect trial metrics from a log file and apply early stopping", long_about = None)]
struct Args {
    /// JSON configuration file; flags override its values
    #[arg(long, env = "METRICS_COLLECTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Trial name
    #[arg(short = 't', long)]
    trial_name: Option<String>,

    /// Metrics file path
    #[arg(long)]
    path: Option<PathBuf>,

    /// Metric names, `;`-separated; the first one is the objective
    #[arg(short = 'm', long)]
    metric_names: Option<String>,

    /// Objective type: maximize or minimize
    #[arg(long, alias = "o-type")]
    objective_type: Option<ObjectiveDirection>,

    /// Metric filter regexes, `;`-separated
    #[arg(short = 'f', long)]
    metric_filters: Option<String>,

    /// Early stopping rule `<metric>;<value>;<equal|less|greater>;<start step>` (repeatable)
    #[arg(long = "stop-rule")]
    stop_rules: Vec<StoppingRule>,

    /// Poll interval for process checks and end of file (e.g. `1s`, `500ms`)
    #[arg(short = 'p', long, value_parser = parse_duration)]
    poll_interval: Option<Duration>,

    /// Give up waiting for the main processes after this long (0 = never)
    #[arg(long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Wait for every main process of the container to exit
    #[arg(short = 'w', long)]
    wait_all: Option<bool>,

    /// DB manager service address
    #[arg(long, alias = "s-db", env = "DB_MANAGER_ADDR")]
    db_manager_addr: Option<String>,

    /// Early stopping service address
    #[arg(long, alias = "s-earlystop", env = "EARLY_STOP_ADDR")]
    early_stop_addr: Option<String>,

    /// Local SQLite observation store (used without a DB manager)
    #[arg(long)]
    sqlite_path: Option<PathBuf>,

    /// Attempts per reporting RPC
    #[arg(long)]
    rpc_retries: Option<u32>,

    /// Deadline for a single reporting RPC (e.g. `30s`)
    #[arg(long, value_parser = parse_duration)]
    rpc_timeout: Option<Duration>,

    /// Exit non-zero when the final report fails
    #[arg(long)]
    fail_on_report_error: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = DEFAULT_LOG_LEVEL)]
    log_level: String,
}

/// Parse `500ms`, `2s`, `1m`, `1h`, or plain seconds.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration {raw:?}"))?;
    let seconds = match unit {
        "ms" => value / 1000.0,
        "" | "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => return Err(format!("unknown duration unit {other:?} in {raw:?}")),
    };
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid duration {raw:?}: {e}"))
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Args {
    fn into_config(self) -> anyhow::Result<CollectorConfig> {
        let mut config = match &self.config {
            Some(path) => CollectorConfig::from_json_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => CollectorConfig::default(),
        };

        if let Some(trial_name) = self.trial_name {
            config.trial_name = trial_name;
        }
        if let Some(path) = self.path {
            config.metrics_file = path;
        }
        if let Some(names) = self.metric_names {
            config.metric_names = split_list(&names);
        }
        if let Some(direction) = self.objective_type {
            config.objective_type = direction;
        }
        if let Some(filters) = self.metric_filters {
            config.metric_filters = split_list(&filters);
        }
        config.stop_rules.extend(self.stop_rules);
        if let Some(interval) = self.poll_interval {
            config.poll_interval_ms = millis(interval);
        }
        if let Some(timeout) = self.timeout {
            config.timeout_ms = millis(timeout);
        }
        if let Some(wait_all) = self.wait_all {
            config.wait_all = wait_all;
        }
        if self.db_manager_addr.is_some() {
            config.db_manager_addr = self.db_manager_addr;
        }
        if self.early_stop_addr.is_some() {
            config.early_stop_addr = self.early_stop_addr;
        }
        if self.sqlite_path.is_some() {
            config.sqlite_path = self.sqlite_path;
        }
        if let Some(attempts) = self.rpc_retries {
            config.rpc_attempts = attempts;
        }
        if let Some(timeout) = self.rpc_timeout {
            config.rpc_timeout_ms = millis(timeout);
        }
        config.fail_on_report_error |= self.fail_on_report_error;

        config.validate()?;
        Ok(config)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

async fn run_session<R: ReportingClient + 'static>(
    config: &CollectorConfig,
    reporter: R,
) -> anyhow::Result<SessionReport> {
    let collector = Collector::new(config, Arc::new(reporter), Arc::new(ProcfsController::new()))?;
    Ok(collector.run().await)
}

#[cfg(feature = "grpc")]
async fn run_grpc(config: &CollectorConfig, db_manager_addr: &str) -> anyhow::Result<SessionReport> {
    use metrics_collector::report::GrpcReportingClient;

    let early_stop_addr = match (&config.early_stop_addr, config.stop_rules.is_empty()) {
        (Some(addr), _) => addr.as_str(),
        (None, true) => db_manager_addr,
        (None, false) => bail!("--early-stop-addr is required when stop rules are set"),
    };
    let client = GrpcReportingClient::new(db_manager_addr, early_stop_addr, config.retry_policy())?;
    run_session(config, client).await
}

#[cfg(not(feature = "grpc"))]
async fn run_grpc(_config: &CollectorConfig, _db_manager_addr: &str) -> anyhow::Result<SessionReport> {
    bail!("built without gRPC support; use --sqlite-path")
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = args.into_config().context("invalid configuration")?;
    info!(
        trial = %config.trial_name,
        path = %config.metrics_file.display(),
        metrics = ?config.metric_names,
        rules = config.stop_rules.len(),
        "Starting metrics collector"
    );

    let report = match (&config.db_manager_addr, &config.sqlite_path) {
        (Some(addr), _) => run_grpc(&config, addr).await?,
        (None, Some(path)) => {
            let store = SqliteObservationStore::connect(&SqliteStoreConfig::new(path))
                .await
                .context("connecting to observation store")?;
            store.init_schema().await.context("initializing observation store")?;
            run_session(&config, StoreReportingClient::new(Arc::new(store))).await?
        }
        (None, None) => bail!("either --db-manager-addr or --sqlite-path is required"),
    };

    match &report.report_error {
        None => {
            info!(outcome = ?report.outcome, "Metrics reported");
            Ok(ExitCode::SUCCESS)
        }
        Some(e) if config.fail_on_report_error => {
            error!(outcome = ?report.outcome, error = %e, "Reporting failed");
            Ok(ExitCode::FAILURE)
        }
        Some(e) => {
            error!(outcome = ?report.outcome, error = %e, "Reporting failed; exiting cleanly");
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = logging::init_logging(&args.log_level) {
        eprintln!("Error: {e}");
        return ExitCode::from(2);
    }

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("1d").is_err());
    }

    #[test]
    fn test_flags_map_onto_config() {
        let args = Args::parse_from([
            "metrics-collector",
            "-t",
            "trial-1",
            "--path",
            "/var/log/katib/metrics.log",
            "-m",
            "accuracy;loss",
            "--o-type",
            "maximize",
            "--stop-rule",
            "loss;0.1;less;0",
            "--stop-rule",
            "accuracy;0.9;greater;2",
            "-p",
            "250ms",
            "--s-db",
            "katib-db-manager:6789",
            "--rpc-retries",
            "5",
        ]);
        let config = args.into_config().unwrap();

        assert_eq!(config.trial_name, "trial-1");
        assert_eq!(config.metric_names, vec!["accuracy", "loss"]);
        assert_eq!(config.stop_rules.len(), 2);
        assert_eq!(config.stop_rules[1].start_step(), 2);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.rpc_attempts, 5);
        assert_eq!(config.db_manager_addr.as_deref(), Some("katib-db-manager:6789"));
    }

    #[test]
    fn test_bad_stop_rule_is_rejected() {
        let result = Args::try_parse_from([
            "metrics-collector",
            "--stop-rule",
            "loss;0.1;sideways;0",
        ]);
        assert!(result.is_err());
    }
}
