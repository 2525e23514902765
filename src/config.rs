//! Daemon configuration assembled from CLI flags and environment.
//!
//! CHANGELOG:
//! - 10/19/2026 - Idle peer timeout
//! - 10/19/2026 - Initial implementation

use secrecy::SecretString;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::DaemonError;

pub const DEFAULT_PORT: u16 = 5099;
pub const DEFAULT_TTL_MINUTES: u64 = 30;

/// Seconds a connected peer may stay silent before it is dropped.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Environment variable consulted for key material.
pub const KEY_ENV: &str = "FIRELINE_KEY";

/// Per-user state directory (`~/.fireline`).
pub fn state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".fireline")
}

/// Default ProcessRecord path.
pub fn default_pid_path() -> PathBuf {
    state_dir().join("daemon.pid")
}

/// Default log file for the detached daemon.
pub fn default_log_path() -> PathBuf {
    state_dir().join("daemon.log")
}

/// Expand a leading `~` in a user-supplied path.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Settings for one daemon session.
#[derive(Debug)]
pub struct DaemonConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub ttl_minutes: u64,
    pub idle_timeout_secs: u64,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub foreground: bool,
    pub key: SecretString,
}

impl DaemonConfig {
    /// Config with defaults for everything but the key.
    pub fn new(key: SecretString) -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            ttl_minutes: DEFAULT_TTL_MINUTES,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            pid_file: default_pid_path(),
            log_file: default_log_path(),
            foreground: false,
            key,
        }
    }

    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.ttl_minutes == 0 {
            return Err(DaemonError::Infrastructure(
                "ttl must be at least one minute".into(),
            ));
        }
        if self.idle_timeout_secs == 0 {
            return Err(DaemonError::Infrastructure(
                "idle timeout must be at least one second".into(),
            ));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes.saturating_mul(60))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

/// Resolve key material from exactly one of: inline value (flag or
/// `FIRELINE_KEY`), or a key file.
pub fn resolve_key(
    inline: Option<String>,
    key_file: Option<&Path>,
) -> Result<SecretString, DaemonError> {
    match (inline, key_file) {
        (Some(_), Some(_)) => Err(DaemonError::Infrastructure(
            "key given both inline and as a file; pass only one".into(),
        )),
        (Some(material), None) => Ok(SecretString::from(material)),
        (None, Some(path)) => {
            let material = std::fs::read_to_string(path).map_err(|e| {
                DaemonError::Infrastructure(format!(
                    "cannot read key file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            Ok(SecretString::from(material.trim().to_string()))
        }
        (None, None) => Err(DaemonError::Infrastructure(format!(
            "no key material: pass --key, --key-file or set {}",
            KEY_ENV
        ))),
    }
}

/// Create the parent directory of `path` if it is missing.
pub fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::new(SecretString::from("k".to_string()));
        assert_eq!(config.port, 5099);
        assert_eq!(config.ttl(), Duration::from_secs(30 * 60));
        assert!(config.pid_file.ends_with(".fireline/daemon.pid"));
        assert_eq!(config.listen_addr().port(), 5099);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = DaemonConfig::new(SecretString::from("k".to_string()));
        config.ttl_minutes = 0;
        assert!(matches!(config.validate(), Err(DaemonError::Infrastructure(_))));
    }

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_path("~/x.pid");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_path("/abs/x.pid"), PathBuf::from("/abs/x.pid"));
    }

    #[test]
    fn test_resolve_key_sources() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("key");
        std::fs::write(&file, "c2VjcmV0\n").unwrap();

        let from_file = resolve_key(None, Some(&file)).unwrap();
        assert_eq!(from_file.expose_secret(), "c2VjcmV0");

        let inline = resolve_key(Some("abc".into()), None).unwrap();
        assert_eq!(inline.expose_secret(), "abc");

        assert!(resolve_key(None, None).is_err());
        assert!(resolve_key(Some("abc".into()), Some(&file)).is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let config = DaemonConfig::new(SecretString::from("topsecret".to_string()));
        assert!(!format!("{:?}", config).contains("topsecret"));
    }
}
