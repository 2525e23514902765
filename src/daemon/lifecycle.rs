//! Daemon lifecycle: reclaim, detach, serve, expire.
//!
//! ```text
//! Starting -> Reclaiming -> Detaching -> Serving -> { Expired | Terminated | Crashed }
//!                      \________________/
//!                        (--foreground)
//! ```
//!
//! Key material, configuration and the listening socket are all settled
//! before any fork, so a bad key, bad TTL or busy port aborts in the
//! launching process. Detaching is a double fork via `daemonize`; the final
//! process inherits the bound listener. The launcher waits on a socket pair
//! until that process reports in, and only then prints the startup
//! acknowledgment.
//!
//! CHANGELOG:
//! - 10/19/2026 - Split pre-fork preparation out of start
//! - 10/19/2026 - Acknowledge only after bind
//! - 10/19/2026 - Initial implementation

use anyhow::{anyhow, Context, Result};
use daemonize::{Daemonize, Outcome};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;
use tracing::{error, info, Dispatch};

use crate::config::{ensure_parent, DaemonConfig};
use crate::daemon::pidfile::ProcessRecord;
use crate::daemon::server::Server;
use crate::daemon::ttl::{Watchdog, DEFAULT_GRACE};
use crate::error::DaemonError;
use crate::logging::{self, LogTarget};
use crate::security::SessionKey;

/// How long the launcher waits for the detached daemon to report.
const READY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Reclaiming,
    Detaching,
    Serving,
    Expired,
    Terminated,
    Crashed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LifecycleState::Expired | LifecycleState::Terminated | LifecycleState::Crashed
        )
    }

    fn can_advance_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Crashed) | (_, Terminated) => true,
            (Starting, Reclaiming) => true,
            (Reclaiming, Detaching) | (Reclaiming, Serving) => true,
            (Detaching, Serving) => true,
            (Serving, Expired) => true,
            _ => false,
        }
    }
}

/// Tracks the session's state and refuses out-of-order transitions.
#[derive(Debug)]
pub struct Lifecycle {
    state: LifecycleState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Starting,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn advance(&mut self, next: LifecycleState) -> Result<(), DaemonError> {
        if !self.state.can_advance_to(next) {
            return Err(DaemonError::Unexpected(format!(
                "invalid lifecycle transition {:?} -> {:?}",
                self.state, next
            )));
        }
        info!(from = ?self.state, to = ?next, "lifecycle");
        self.state = next;
        Ok(())
    }
}

/// Startup acknowledgment printed to the launching caller.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartupAck {
    pub started: u8,
    pub pid: u32,
    pub port: u16,
    pub ttl: u64,
}

/// Message the detached daemon sends back over the readiness channel.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum Readiness {
    Ready { pid: u32, port: u16 },
    Failed { msg: String },
}

/// Start a daemon session according to `config`.
///
/// In the launching process this returns once the acknowledgment has been
/// printed (detached mode) or once the session ends (foreground mode). The
/// detached daemon itself never returns from here; it exits the process.
pub fn start(config: DaemonConfig, launcher_log: &Dispatch) -> Result<()> {
    let mut lifecycle = Lifecycle::new();

    let (server, record) = tracing::dispatcher::with_default(launcher_log, || {
        prepare(&config, &mut lifecycle)
    })?;

    if config.foreground {
        return tracing::dispatcher::with_default(launcher_log, || {
            run_foreground(lifecycle, &config, server, record)
        });
    }

    tracing::dispatcher::with_default(launcher_log, || {
        lifecycle.advance(LifecycleState::Detaching)
    })?;
    detach(lifecycle, &config, server, record, launcher_log)
}

/// Everything that must succeed before detaching: validate the config and
/// key, reclaim a stale instance, and bind the listener.
///
/// Leaves `lifecycle` in `Reclaiming`.
pub fn prepare(
    config: &DaemonConfig,
    lifecycle: &mut Lifecycle,
) -> Result<(Server, ProcessRecord)> {
    config.validate()?;
    let key = SessionKey::load(&config.key)
        .map_err(|e| DaemonError::Infrastructure(format!("invalid key material: {}", e)))?;
    ensure_parent(&config.pid_file)
        .with_context(|| format!("Failed to create directory for {:?}", config.pid_file))?;
    ensure_parent(&config.log_file)
        .with_context(|| format!("Failed to create directory for {:?}", config.log_file))?;

    lifecycle.advance(LifecycleState::Reclaiming)?;
    let record = ProcessRecord::new(&config.pid_file);
    record.reclaim_stale();

    // Bound before any fork; the detached process inherits the socket
    let server = Server::bind(config.listen_addr(), key)?.with_idle_timeout(config.idle_timeout());
    Ok((server, record))
}

fn run_foreground(
    mut lifecycle: Lifecycle,
    config: &DaemonConfig,
    server: Server,
    record: ProcessRecord,
) -> Result<()> {
    record
        .write(std::process::id())
        .with_context(|| format!("Failed to write process record {:?}", record.path()))?;

    print_ack(&StartupAck {
        started: 1,
        pid: std::process::id(),
        port: server.local_addr().port(),
        ttl: config.ttl_minutes,
    })?;

    let state = serve_session(&mut lifecycle, server, config.ttl(), &record);
    match state {
        LifecycleState::Crashed => Err(anyhow!("daemon crashed")),
        _ => Ok(()),
    }
}

fn detach(
    lifecycle: Lifecycle,
    config: &DaemonConfig,
    server: Server,
    record: ProcessRecord,
    launcher_log: &Dispatch,
) -> Result<()> {
    let (launcher_end, daemon_end) =
        UnixStream::pair().context("Failed to create readiness channel")?;

    let daemonize = Daemonize::new()
        .pid_file(record.path())
        .working_directory("/")
        .umask(0o022u32);

    match daemonize.execute() {
        Outcome::Parent(Ok(_)) => {
            drop(daemon_end);
            drop(server);
            tracing::dispatcher::with_default(launcher_log, || {
                await_readiness(launcher_end, config.ttl_minutes)
            })
        }
        Outcome::Parent(Err(e)) => Err(anyhow!("Failed to daemonize: {}", e)),
        Outcome::Child(Ok(_)) => {
            drop(launcher_end);
            let code = run_detached(lifecycle, config, server, record, daemon_end);
            std::process::exit(code);
        }
        Outcome::Child(Err(e)) => {
            let _ = report(&daemon_end, &Readiness::Failed {
                msg: format!("daemonize failed: {}", e),
            });
            std::process::exit(1);
        }
    }
}

/// Body of the detached process. Returns the exit code.
fn run_detached(
    mut lifecycle: Lifecycle,
    config: &DaemonConfig,
    server: Server,
    record: ProcessRecord,
    ready: UnixStream,
) -> i32 {
    let dispatch = match logging::dispatch(&LogTarget::File(config.log_file.clone())) {
        Ok(d) => d,
        Err(e) => {
            let _ = report(&ready, &Readiness::Failed { msg: e.to_string() });
            record.remove();
            return 1;
        }
    };

    tracing::dispatcher::with_default(&dispatch, || {
        let ack = Readiness::Ready {
            pid: std::process::id(),
            port: server.local_addr().port(),
        };
        if let Err(e) = report(&ready, &ack) {
            // Launcher gone; keep serving, the record still identifies us
            error!(error = %e, "could not report readiness");
        }
        drop(ready);

        match serve_session(&mut lifecycle, server, config.ttl(), &record) {
            LifecycleState::Crashed => 1,
            _ => 0,
        }
    })
}

/// Serving state through to a terminal state. Always removes the record.
fn serve_session(
    lifecycle: &mut Lifecycle,
    server: Server,
    ttl: Duration,
    record: &ProcessRecord,
) -> LifecycleState {
    if let Err(e) = lifecycle.advance(LifecycleState::Serving) {
        error!(error = %e, "cannot enter serving state");
        record.remove();
        return LifecycleState::Crashed;
    }

    let watchdog = Watchdog::spawn(
        ttl,
        DEFAULT_GRACE,
        server.shutdown_handle(),
        Some(record.clone()),
    );
    let result = server.serve();
    drop(server);

    let terminal = match result {
        Ok(()) if watchdog.fired() => LifecycleState::Expired,
        Ok(()) => LifecycleState::Terminated,
        Err(e) => {
            error!(error = %e, "serve loop failed");
            LifecycleState::Crashed
        }
    };
    watchdog.disarm();
    record.remove();

    let _ = lifecycle.advance(terminal);
    info!(state = ?terminal, "daemon exiting");
    terminal
}

fn report(mut stream: &UnixStream, readiness: &Readiness) -> Result<()> {
    let line = serde_json::to_string(readiness)?;
    writeln!(stream, "{}", line)?;
    stream.flush()?;
    Ok(())
}

/// Launcher side: wait for the daemon's report and print the outcome.
fn await_readiness(stream: UnixStream, ttl_minutes: u64) -> Result<()> {
    stream.set_read_timeout(Some(READY_TIMEOUT))?;
    let mut line = String::new();
    let read = BufReader::new(&stream).read_line(&mut line);

    let readiness = match read {
        Ok(0) => Readiness::Failed {
            msg: "daemon exited before reporting readiness".into(),
        },
        Ok(_) => serde_json::from_str(line.trim()).unwrap_or_else(|e| Readiness::Failed {
            msg: format!("unreadable readiness report: {}", e),
        }),
        Err(e) => Readiness::Failed {
            msg: format!("no readiness report: {}", e),
        },
    };

    match readiness {
        Readiness::Ready { pid, port } => {
            info!(pid, port, "daemon started");
            print_ack(&StartupAck {
                started: 1,
                pid,
                port,
                ttl: ttl_minutes,
            })
        }
        Readiness::Failed { msg } => {
            println!(
                "{}",
                serde_json::json!({ "failed": true, "msg": msg })
            );
            Err(anyhow!("daemon failed to start: {}", msg))
        }
    }
}

fn print_ack(ack: &StartupAck) -> Result<()> {
    println!("{}", serde_json::to_string(ack)?);
    Ok(())
}
