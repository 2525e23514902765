//! Process-id record for single-instance operation.
//!
//! The record's whole content is the decimal pid of the live daemon. Any
//! record found at startup is treated as stale: its pid is killed (best
//! effort) and the file removed regardless of the outcome.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// How long to wait for a killed instance to release its port.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// What the record says about a daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Missing,
    /// Record exists but the process is gone (or the content is garbage).
    Stale(Option<i32>),
    Running(i32),
}

#[derive(Debug, Clone)]
pub struct ProcessRecord {
    path: PathBuf,
}

impl ProcessRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Parse the recorded pid. `None` if missing or unparseable.
    pub fn read(&self) -> Option<i32> {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok())
    }

    pub fn write(&self, pid: u32) -> io::Result<()> {
        fs::write(&self.path, pid.to_string())
    }

    /// Remove the record, ignoring a missing file.
    pub fn remove(&self) {
        let _ = fs::remove_file(&self.path);
    }

    /// Kill whatever instance the record names, then delete the record.
    ///
    /// Never fails: the target may already be gone. Returns the pid that was
    /// signalled, if any.
    pub fn reclaim_stale(&self) -> Option<i32> {
        if !self.exists() {
            return None;
        }

        let pid = self.read();
        let signalled = match pid {
            Some(pid) if signal(pid, libc::SIGKILL) => {
                info!(pid, "terminated prior instance");
                wait_for_exit(pid, REAP_TIMEOUT);
                Some(pid)
            }
            Some(pid) => {
                debug!(pid, "prior instance not running");
                None
            }
            None => {
                debug!(path = %self.path.display(), "unparseable process record");
                None
            }
        };

        self.remove();
        signalled
    }

    pub fn status(&self) -> RecordStatus {
        if !self.exists() {
            return RecordStatus::Missing;
        }
        match self.read() {
            Some(pid) if is_alive(pid) => RecordStatus::Running(pid),
            pid => RecordStatus::Stale(pid),
        }
    }

    /// Ask the recorded daemon to stop (SIGTERM) and remove the record.
    pub fn stop(&self) -> Option<i32> {
        let pid = self.read();
        let stopped = pid.filter(|&pid| signal(pid, libc::SIGTERM));
        self.remove();
        stopped
    }
}

/// Only real, foreign processes may be signalled: pid 0 and negative pids
/// address process groups, pid 1 is init.
fn signallable(pid: i32) -> bool {
    pid > 1 && pid as u32 != std::process::id()
}

fn signal(pid: i32, sig: libc::c_int) -> bool {
    if !signallable(pid) {
        return false;
    }
    unsafe { libc::kill(pid, sig) == 0 }
}

fn wait_for_exit(pid: i32, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while is_alive(pid) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
}

/// Whether a process with this pid exists.
pub fn is_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM: exists but owned by someone else
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
