//! Logging setup.
//!
//! Library code only emits `tracing` events. The binary builds a subscriber
//! here and hands the resulting `Dispatch` down to the code that serves the
//! session, which runs it with `tracing::dispatcher::with_default`.
//!
//! The detached daemon has no usable stderr, so it logs to a file.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::Dispatch;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV: &str = "FIRELINE_LOG";

/// Where log output goes.
#[derive(Debug, Clone)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Build a dispatcher for the given target without installing it globally.
pub fn dispatch(target: &LogTarget) -> Result<Dispatch> {
    match target {
        LogTarget::Stderr => {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .finish();
            Ok(Dispatch::new(subscriber))
        }
        LogTarget::File(path) => {
            let appender = file_appender(path)?;
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(false)
                .with_writer(appender)
                .finish();
            Ok(Dispatch::new(subscriber))
        }
    }
}

/// Synchronous appender writing to exactly `path` (no rotation), so nothing
/// is buffered when the process exits.
fn file_appender(path: &Path) -> Result<RollingFileAppender> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .with_context(|| format!("log path has no file name: {:?}", path))?;

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name.to_string_lossy())
        .build(dir)
        .with_context(|| format!("Failed to open log file {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_dispatch_writes_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.log");
        let dispatch = dispatch(&LogTarget::File(path.clone())).unwrap();

        tracing::dispatcher::with_default(&dispatch, || {
            tracing::warn!(port = 5099, "daemon listening");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("daemon listening"));
        assert!(contents.contains("port=5099"));
    }

    #[test]
    fn test_missing_file_name_rejected() {
        assert!(dispatch(&LogTarget::File(PathBuf::from("/"))).is_err());
    }
}
