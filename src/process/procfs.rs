//! `/proc` based process controller

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{ProcessController, ProcessInfo};
use crate::{Error, Result};

const DEFAULT_PROC_ROOT: &str = "/proc";

/// Linux process controller reading `/proc` and signalling via `kill(2)`.
#[derive(Debug, Clone)]
pub struct ProcfsController {
    root: PathBuf,
}

impl Default for ProcfsController {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsController {
    /// Controller over the host `/proc`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root(DEFAULT_PROC_ROOT)
    }

    /// Controller over a procfs mounted at `root`.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_process(&self, pid: u32) -> Result<Option<(ProcStat, String)>> {
        let dir = self.root.join(pid.to_string());
        let stat = match std::fs::read_to_string(dir.join("stat")) {
            Ok(raw) => parse_stat(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Process(format!("read stat of {pid}: {e}"))),
        };
        let cmdline = match std::fs::read(dir.join("cmdline")) {
            Ok(raw) => parse_cmdline(&raw),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Process(format!("read cmdline of {pid}: {e}"))),
        };
        Ok(Some((stat, cmdline)))
    }
}

/// Fields of `/proc/<pid>/stat` the controller needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProcStat {
    state: char,
    ppid: u32,
}

/// Parse `/proc/<pid>/stat`.
///
/// Format: `pid (comm) state ppid ...`; `comm` may itself hold spaces and
/// parentheses, so fields are read after the last `)`.
fn parse_stat(raw: &str) -> Result<ProcStat> {
    let rest = raw
        .rfind(')')
        .map(|idx| &raw[idx + 1..])
        .ok_or_else(|| Error::ParseError(format!("malformed stat line: {raw:?}")))?;
    let mut fields = rest.split_whitespace();
    let state = fields
        .next()
        .and_then(|s| s.chars().next())
        .ok_or_else(|| Error::ParseError(format!("stat line without state: {raw:?}")))?;
    let ppid = fields
        .next()
        .ok_or_else(|| Error::ParseError(format!("stat line without ppid: {raw:?}")))?
        .parse::<u32>()
        .map_err(|e| Error::ParseError(format!("stat ppid: {e}")))?;
    Ok(ProcStat { state, ppid })
}

/// NUL-separated arguments joined by spaces.
fn parse_cmdline(raw: &[u8]) -> String {
    raw.split(|b| *b == 0)
        .filter(|arg| !arg.is_empty())
        .map(String::from_utf8_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

fn pid_of_dir(path: &Path) -> Option<u32> {
    path.file_name()?.to_str()?.parse().ok()
}

impl ProcessController for ProcfsController {
    fn list_processes(&self) -> Result<Vec<ProcessInfo>> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| Error::Process(format!("list {}: {e}", self.root.display())))?;

        let mut processes = Vec::new();
        for entry in entries.flatten() {
            let Some(pid) = pid_of_dir(&entry.path()) else {
                continue;
            };
            // Processes may exit between readdir and the reads below.
            match self.read_process(pid) {
                Ok(Some((stat, cmdline))) => processes.push(ProcessInfo {
                    pid,
                    ppid: stat.ppid,
                    cmdline,
                }),
                Ok(None) => {}
                Err(e) => warn!(pid, error = %e, "Skipping unreadable process"),
            }
        }
        processes.sort_by_key(|p| p.pid);
        Ok(processes)
    }

    fn is_running(&self, pid: u32) -> Result<bool> {
        let path = self.root.join(pid.to_string()).join("stat");
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(!matches!(parse_stat(&raw)?.state, 'Z' | 'X')),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Process(format!("check process {pid}: {e}"))),
        }
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        let raw_pid = libc::pid_t::try_from(pid)
            .map_err(|_| Error::Process(format!("pid {pid} out of range")))?;
        debug!(pid, "Sending SIGTERM");
        // SAFETY: kill(2) takes plain integers and touches no memory we own.
        let rc = unsafe { libc::kill(raw_pid, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(Error::Process(format!(
                "terminate {pid}: {}",
                std::io::Error::last_os_error()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_proc(dir: &Path, pid: u32, stat: &str, cmdline: &[u8]) {
        let pid_dir = dir.join(pid.to_string());
        std::fs::create_dir_all(&pid_dir).unwrap();
        std::fs::write(pid_dir.join("stat"), stat).unwrap();
        std::fs::write(pid_dir.join("cmdline"), cmdline).unwrap();
    }

    #[test]
    fn test_parse_stat_with_tricky_comm() {
        let stat = parse_stat("42 (my (odd) proc) S 7 42 42 0 -1").unwrap();
        assert_eq!(stat, ProcStat { state: 'S', ppid: 7 });
        assert!(parse_stat("garbage").is_err());
    }

    #[test]
    fn test_parse_cmdline() {
        assert_eq!(parse_cmdline(b"python\0train.py\0--lr=0.1\0"), "python train.py --lr=0.1");
        assert_eq!(parse_cmdline(b""), "");
    }

    #[test]
    fn test_list_processes_from_fake_root() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(dir.path(), 1, "1 (pause) S 0 1 1", b"/pause\0");
        fake_proc(dir.path(), 15, "15 (sh) S 0 15 15", b"sh\0-c\0train\0");
        fake_proc(dir.path(), 16, "16 (python) R 15 15 15", b"python\0train.py\0");
        std::fs::create_dir_all(dir.path().join("self")).unwrap();

        let controller = ProcfsController::with_root(dir.path());
        let processes = controller.list_processes().unwrap();
        assert_eq!(processes.len(), 3);
        assert_eq!(processes[2], ProcessInfo::new(16, 15, "python train.py"));
        assert_eq!(controller.find_single_child(15).unwrap().pid, 16);
    }

    #[test]
    fn test_is_running_treats_zombies_as_exited() {
        let dir = tempfile::tempdir().unwrap();
        fake_proc(dir.path(), 20, "20 (python) Z 15", b"");
        fake_proc(dir.path(), 21, "21 (python) S 15", b"python\0");

        let controller = ProcfsController::with_root(dir.path());
        assert!(!controller.is_running(20).unwrap());
        assert!(controller.is_running(21).unwrap());
        assert!(!controller.is_running(22).unwrap());
    }

    #[test]
    fn test_own_process_is_running() {
        let controller = ProcfsController::new();
        if Path::new(DEFAULT_PROC_ROOT).join("self").exists() {
            assert!(controller.is_running(std::process::id()).unwrap());
        }
    }
}
