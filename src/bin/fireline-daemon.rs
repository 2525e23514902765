//! fireline-daemon - Ephemeral encrypted command daemon.
//!
//! CHANGELOG:
//! - 10/19/2026 - --idle-timeout flag
//! - 10/19/2026 - Initial implementation

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

use fireline::config::{
    self, DaemonConfig, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_PORT, DEFAULT_TTL_MINUTES, KEY_ENV,
};
use fireline::daemon::lifecycle;
use fireline::daemon::pidfile::{ProcessRecord, RecordStatus};
use fireline::logging::{self, LogTarget};

#[derive(Parser)]
#[command(name = "fireline-daemon")]
#[command(about = "Ephemeral encrypted command daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start {
        /// Port to listen on
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Minutes until the daemon exits on its own
        #[arg(long, default_value_t = DEFAULT_TTL_MINUTES)]
        ttl: u64,

        /// Seconds a connected peer may stay silent before it is dropped
        #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
        idle_timeout: u64,

        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        bind: IpAddr,

        /// Base64 key material
        #[arg(long, env = KEY_ENV, hide_env_values = true)]
        key: Option<String>,

        /// File holding base64 key material
        #[arg(long)]
        key_file: Option<String>,

        /// Process record path
        #[arg(long, default_value = "~/.fireline/daemon.pid")]
        pid_file: String,

        /// Log file for the detached daemon
        #[arg(long, default_value = "~/.fireline/daemon.log")]
        log_file: String,

        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the daemon
    Stop {
        /// Process record path
        #[arg(long, default_value = "~/.fireline/daemon.pid")]
        pid_file: String,
    },

    /// Check daemon status
    Status {
        /// Process record path
        #[arg(long, default_value = "~/.fireline/daemon.pid")]
        pid_file: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            port,
            ttl,
            idle_timeout,
            bind,
            key,
            key_file,
            pid_file,
            log_file,
            foreground,
        } => {
            let key_file: Option<PathBuf> = key_file.map(|p| config::expand_path(&p));
            let key = config::resolve_key(key, key_file.as_deref())?;

            let mut config = DaemonConfig::new(key);
            config.bind = bind;
            config.port = port;
            config.ttl_minutes = ttl;
            config.idle_timeout_secs = idle_timeout;
            config.pid_file = config::expand_path(&pid_file);
            config.log_file = config::expand_path(&log_file);
            config.foreground = foreground;

            cmd_start(config)
        }
        Commands::Stop { pid_file } => cmd_stop(&pid_file),
        Commands::Status { pid_file } => cmd_status(&pid_file),
    }
}

fn cmd_start(config: DaemonConfig) -> Result<()> {
    let launcher_log = logging::dispatch(&LogTarget::Stderr)?;
    lifecycle::start(config, &launcher_log)
}

fn cmd_stop(pid_file: &str) -> Result<()> {
    let record = ProcessRecord::new(config::expand_path(pid_file));

    match record.stop() {
        Some(pid) => println!("Daemon stopped (pid {})", pid),
        None => println!("Daemon not running"),
    }

    Ok(())
}

fn cmd_status(pid_file: &str) -> Result<()> {
    let record = ProcessRecord::new(config::expand_path(pid_file));

    match record.status() {
        RecordStatus::Running(pid) => {
            println!("Daemon running (pid {})", pid);
            Ok(())
        }
        RecordStatus::Stale(_) | RecordStatus::Missing => {
            println!("Daemon not running");
            std::process::exit(1);
        }
    }
}
