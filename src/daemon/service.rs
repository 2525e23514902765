//! Daemon service - routes decoded requests to the three primitive handlers.
//!
//! Handlers never fail the serve loop: every outcome, including missing
//! fields and I/O errors, becomes a `Response`.
//!
//! Commands run synchronously with no timeout. A long-running command holds
//! the channel until it finishes; only the session TTL bounds it.
//!
//! CHANGELOG:
//! - 10/19/2026 - Added keepalive and configurable shell
//! - 10/19/2026 - Initial implementation

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::daemon::protocol::{Request, Response};

/// Shell used when a command request does not name one.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Request dispatcher.
pub struct DaemonService {
    started_at: String, // ISO timestamp
}

impl Default for DaemonService {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonService {
    pub fn new() -> Self {
        Self {
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn started_at(&self) -> &str {
        &self.started_at
    }

    /// Parse a decrypted payload and dispatch it.
    ///
    /// Malformed payloads, missing fields and unknown modes produce a
    /// failure response naming the problem.
    pub fn handle_payload(&self, payload: &[u8]) -> Response {
        match Request::from_slice(payload) {
            Ok(request) => self.dispatch(request),
            Err(e) => {
                warn!(error = %e, "rejected request");
                e.into()
            }
        }
    }

    /// Dispatch request to appropriate handler.
    pub fn dispatch(&self, request: Request) -> Response {
        let mode = request.mode();
        let start = Instant::now();

        let response = match request {
            Request::Command {
                cmd,
                tmp_path,
                executable,
            } => self.command(&cmd, &tmp_path, executable.as_deref()),
            Request::Fetch { in_path } => self.fetch(&in_path),
            Request::Put { data, out_path } => self.put(&data, &out_path),
            Request::Keepalive => Response::empty(),
        };

        info!(
            mode,
            failed = response.failed,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "request handled"
        );
        response
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Run `cmd` through the shell and return both streams verbatim.
    /// Exit status is not reported.
    fn command(&self, cmd: &str, tmp_path: &Path, executable: Option<&str>) -> Response {
        let shell = executable.unwrap_or(DEFAULT_SHELL);
        debug!(shell, cmd, tmp_path = %tmp_path.display(), "running command");

        let output = Command::new(shell)
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .output();

        match output {
            Ok(output) => Response::command(
                String::from_utf8_lossy(&output.stdout).into_owned(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ),
            Err(e) => Response::failure(format!("failed to run command with {}: {}", shell, e)),
        }
    }

    /// Read the whole file into the response.
    fn fetch(&self, in_path: &Path) -> Response {
        match fs::read(in_path) {
            Ok(contents) => {
                debug!(path = %in_path.display(), bytes = contents.len(), "fetched file");
                Response::fetch(&contents)
            }
            Err(e) => Response::failure(format!("failed to read {}: {}", in_path.display(), e)),
        }
    }

    /// Write `data` to `out_path`, truncating existing content.
    fn put(&self, data: &[u8], out_path: &Path) -> Response {
        match fs::write(out_path, data) {
            Ok(()) => {
                debug!(path = %out_path.display(), bytes = data.len(), "wrote file");
                Response::empty()
            }
            Err(e) => Response::failure(format!("failed to write {}: {}", out_path.display(), e)),
        }
    }
}
