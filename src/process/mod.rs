//! Process supervision
//!
//! The collector runs beside the training container's main processes. It needs
//! to find them, wait for them to exit and, when early stopping fires, send
//! `SIGTERM` to the single training child. [`ProcessController`] is the seam;
//! [`ProcfsController`] implements it on Linux.

mod procfs;

pub use procfs::ProcfsController;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Marker contents written by the training wrapper on normal completion.
pub const MARKER_COMPLETED: &str = "completed";

/// Marker contents written by the collector when it stops the trial early.
pub const MARKER_EARLY_STOPPED: &str = "early-stopped";

/// A running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Process id
    pub pid: u32,
    /// Parent process id (0 for the roots of a container)
    pub ppid: u32,
    /// Command line, arguments joined by spaces
    pub cmdline: String,
}

impl ProcessInfo {
    /// Create a process record.
    pub fn new(pid: u32, ppid: u32, cmdline: impl Into<String>) -> Self {
        Self {
            pid,
            ppid,
            cmdline: cmdline.into(),
        }
    }
}

/// OS process primitives used by the collector.
pub trait ProcessController: Send + Sync {
    /// Every visible process.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Process`] if the process table cannot be read.
    fn list_processes(&self) -> Result<Vec<ProcessInfo>>;

    /// Whether `pid` is still alive. Exited (or zombie) processes are not.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Process`] if liveness cannot be determined.
    fn is_running(&self, pid: u32) -> Result<bool>;

    /// Ask `pid` to terminate (`SIGTERM`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Process`] if the signal cannot be delivered.
    fn terminate(&self, pid: u32) -> Result<()>;

    /// Pid of the collector itself.
    fn current_pid(&self) -> u32 {
        std::process::id()
    }

    /// Direct children of `pid`.
    ///
    /// # Errors
    ///
    /// Propagates [`ProcessController::list_processes`] failures.
    fn children(&self, pid: u32) -> Result<Vec<ProcessInfo>> {
        Ok(self
            .list_processes()?
            .into_iter()
            .filter(|p| p.ppid == pid)
            .collect())
    }

    /// The one child of `pid`.
    ///
    /// Only a single training child per main process is supported.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Process`] when `pid` has no child or more than one.
    fn find_single_child(&self, pid: u32) -> Result<ProcessInfo> {
        let mut children = self.children(pid)?;
        match children.len() {
            1 => Ok(children.remove(0)),
            0 => Err(Error::Process(format!(
                "main process {pid} has no child process to terminate"
            ))),
            n => Err(Error::Process(format!(
                "main process {pid} has {n} child processes (pids {:?}); only a single child is supported",
                children.iter().map(|c| c.pid).collect::<Vec<_>>()
            ))),
        }
    }
}

/// The main processes of the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainProcesses {
    /// All root processes other than init and the collector
    pub pids: BTreeSet<u32>,
    /// The training wrapper
    pub main_pid: u32,
}

/// Shell command the training wrapper runs on completion.
#[must_use]
pub fn completed_marker_command(marker_dir: &Path) -> String {
    format!(
        "echo {MARKER_COMPLETED} > {}/$$$$.pid",
        marker_dir.display()
    )
}

/// Pid-independent part of [`completed_marker_command`].
///
/// The container runtime collapses `$$$$` to `$$` before the shell starts, so
/// the command line seen in `/proc` is matched without the file name.
#[must_use]
pub fn completed_marker_prefix(marker_dir: &Path) -> String {
    format!("echo {MARKER_COMPLETED} > {}/", marker_dir.display())
}

/// Marker file for `pid` inside `marker_dir`.
#[must_use]
pub fn marker_path(marker_dir: &Path, pid: u32) -> PathBuf {
    marker_dir.join(format!("{pid}.pid"))
}

/// Find the main processes: parent pid 0, excluding pid 1 and the collector.
///
/// The main pid is the process whose command line writes a completion marker
/// into `marker_dir`, or else the lowest such pid.
///
/// # Errors
///
/// Returns [`Error::Process`] if no main process is found.
pub fn main_processes<C>(controller: &C, marker_dir: Option<&Path>) -> Result<MainProcesses>
where
    C: ProcessController + ?Sized,
{
    let own_pid = controller.current_pid();
    let roots: Vec<ProcessInfo> = controller
        .list_processes()?
        .into_iter()
        .filter(|p| p.ppid == 0 && p.pid != 1 && p.pid != own_pid)
        .collect();

    let marker_prefix = marker_dir.map(completed_marker_prefix);
    let marked = marker_prefix
        .as_deref()
        .and_then(|prefix| roots.iter().find(|p| p.cmdline.contains(prefix)));

    let pids: BTreeSet<u32> = roots.iter().map(|p| p.pid).collect();
    let main_pid = match marked {
        Some(p) => p.pid,
        None => *pids
            .iter()
            .next()
            .ok_or_else(|| Error::Process("no main process found".to_string()))?,
    };

    debug!(main_pid, pids = ?pids, "Found main processes");
    Ok(MainProcesses { pids, main_pid })
}

/// How [`wait_main_processes`] polls.
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Delay between liveness checks
    pub poll_interval: Duration,
    /// Give up after this long; zero waits forever
    pub timeout: Duration,
    /// Wait for every main process, not only the main pid
    pub wait_all: bool,
    /// Directory holding completion markers
    pub marker_dir: Option<PathBuf>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::ZERO,
            wait_all: true,
            marker_dir: None,
        }
    }
}

/// How the main process finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainProcessExit {
    /// Ran to completion
    Completed,
    /// Stopped by the collector
    EarlyStopped,
}

/// Read the completion marker of `pid`.
///
/// # Errors
///
/// Returns [`Error::Process`] if the marker is missing or holds anything else
/// than a known state.
pub fn read_marker(marker_dir: &Path, pid: u32) -> Result<MainProcessExit> {
    let path = marker_path(marker_dir, pid);
    let contents = std::fs::read_to_string(&path).map_err(|e| {
        Error::Process(format!(
            "main process {pid} exited without completion marker {}: {e}",
            path.display()
        ))
    })?;
    match contents.trim() {
        MARKER_COMPLETED => Ok(MainProcessExit::Completed),
        MARKER_EARLY_STOPPED => Ok(MainProcessExit::EarlyStopped),
        other => Err(Error::Process(format!(
            "unexpected marker {other:?} in {}",
            path.display()
        ))),
    }
}

/// Write `contents` as the marker of `pid`.
///
/// # Errors
///
/// Returns [`Error::Io`] if the marker cannot be written.
pub async fn write_marker(marker_dir: &Path, pid: u32, contents: &str) -> Result<()> {
    tokio::fs::write(marker_path(marker_dir, pid), contents).await?;
    Ok(())
}

/// Poll until the main processes exit.
///
/// # Errors
///
/// - [`Error::Timeout`] once `opts.timeout` (if non-zero) elapses
/// - [`Error::Process`] on a missing or bad completion marker
///
/// Failed liveness checks are logged and the process is polled again.
pub async fn wait_main_processes<C>(
    controller: &C,
    processes: &MainProcesses,
    opts: &WaitOptions,
) -> Result<MainProcessExit>
where
    C: ProcessController + ?Sized,
{
    let started = Instant::now();
    let mut remaining = processes.pids.clone();
    remaining.insert(processes.main_pid);
    let mut exit = None;

    loop {
        let mut exited = Vec::new();
        for &pid in &remaining {
            match controller.is_running(pid) {
                Ok(false) => exited.push(pid),
                Ok(true) => {}
                Err(e) => warn!(pid, error = %e, "Liveness check failed, polling again"),
            }
        }
        for pid in exited {
            remaining.remove(&pid);
            debug!(pid, "Main process exited");
            if pid == processes.main_pid {
                let outcome = match &opts.marker_dir {
                    Some(dir) => read_marker(dir, pid)?,
                    None => MainProcessExit::Completed,
                };
                info!(pid, outcome = ?outcome, "Main process finished");
                exit = Some(outcome);
            }
        }

        if let Some(outcome) = exit {
            if !opts.wait_all || remaining.is_empty() {
                return Ok(outcome);
            }
        }

        if !opts.timeout.is_zero() && started.elapsed() >= opts.timeout {
            return Err(Error::Timeout(format!(
                "main processes {remaining:?} still running after {:?}",
                opts.timeout
            )));
        }
        tokio::time::sleep(opts.poll_interval).await;
    }
}

/// Poll `pid` until it exits or `timeout` elapses. Returns whether it exited.
///
/// Liveness errors are treated as "still running".
pub async fn wait_for_exit<C>(
    controller: &C,
    pid: u32,
    poll_interval: Duration,
    timeout: Duration,
) -> bool
where
    C: ProcessController + ?Sized,
{
    let deadline = Instant::now() + timeout;
    loop {
        match controller.is_running(pid) {
            Ok(false) => return true,
            Ok(true) => {}
            Err(e) => debug!(pid, error = %e, "Liveness check failed"),
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll_interval).await;
    }
}
