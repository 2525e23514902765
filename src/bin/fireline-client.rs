//! fireline-client - Thin controller client for the daemon.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use fireline::client::DaemonClient;
use fireline::config::{self, DEFAULT_PORT, KEY_ENV};
use fireline::security::SessionKey;

#[derive(Parser)]
#[command(name = "fireline-client")]
#[command(about = "Thin client for the fireline daemon")]
struct Cli {
    #[command(flatten)]
    conn: ConnArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ConnArgs {
    /// Daemon host
    #[arg(long, global = true, default_value = "127.0.0.1")]
    host: String,

    /// Daemon port
    #[arg(long, global = true, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Base64 key material
    #[arg(long, global = true, env = KEY_ENV, hide_env_values = true)]
    key: Option<String>,

    /// File holding base64 key material
    #[arg(long, global = true)]
    key_file: Option<String>,

    /// Request timeout (seconds, 0 = wait forever)
    #[arg(long, global = true, default_value = "30.0")]
    timeout: f64,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh base64 key
    Keygen,

    /// Run a shell command on the node
    Exec {
        cmd: String,

        /// Remote scratch directory
        #[arg(long, default_value = "/tmp")]
        tmp_path: PathBuf,

        /// Shell to interpret the command
        #[arg(long)]
        executable: Option<String>,
    },

    /// Copy a remote file to stdout or a local path
    Fetch {
        remote: PathBuf,

        #[arg(long)]
        dest: Option<PathBuf>,
    },

    /// Copy a local file to the node
    Put { local: PathBuf, remote: PathBuf },

    /// Check that the daemon answers
    Ping,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen => {
            let (_, material) = SessionKey::generate();
            println!("{}", material.expose_secret());
        }
        Commands::Exec {
            cmd,
            tmp_path,
            executable,
        } => {
            let mut client = connect(&cli.conn)?;
            let (stdout, stderr) = client.command(&cmd, &tmp_path, executable.as_deref())?;
            print!("{}", stdout);
            eprint!("{}", stderr);
        }
        Commands::Fetch { remote, dest } => {
            let data = connect(&cli.conn)?.fetch(&remote)?;
            match dest {
                Some(path) => std::fs::write(&path, &data)
                    .with_context(|| format!("Failed to write {:?}", path))?,
                None => std::io::stdout().write_all(&data)?,
            }
        }
        Commands::Put { local, remote } => {
            let data = std::fs::read(&local).with_context(|| format!("Failed to read {:?}", local))?;
            connect(&cli.conn)?.put(&data, &remote)?;
        }
        Commands::Ping => {
            connect(&cli.conn)?.keepalive()?;
            println!("ok");
        }
    }

    Ok(())
}

fn connect(conn: &ConnArgs) -> Result<DaemonClient> {
    let key_file = conn.key_file.as_deref().map(config::expand_path);
    let material = config::resolve_key(conn.key.clone(), key_file.as_deref())?;
    let key = SessionKey::load(&material).context("Invalid key material")?;

    let timeout = (conn.timeout > 0.0).then(|| Duration::from_secs_f64(conn.timeout));
    DaemonClient::connect((conn.host.as_str(), conn.port), key, timeout)
        .with_context(|| format!("Failed to connect to {}:{}", conn.host, conn.port))
}
