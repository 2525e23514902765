//! Error taxonomy for the daemon.
//!
//! Protocol and validation errors are recovered inside the serve loop;
//! infrastructure and unexpected errors end the daemon.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use thiserror::Error;

/// Key loading and per-frame encryption failures.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key material is not valid base64: {0}")]
    KeyEncoding(#[from] base64::DecodeError),

    #[error("key material must be {expected} bytes, got {got}")]
    KeyLength { expected: usize, got: usize },

    /// Frame too short to carry a nonce and tag.
    #[error("frame too short: {0} bytes")]
    Truncated(usize),

    /// Authentication tag mismatch (wrong key or tampered frame).
    #[error("frame failed authentication")]
    Authentication,

    #[error("encryption failed")]
    Seal,
}

/// A request that decrypted fine but cannot be executed as sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("unsupported mode: {0}")]
    UnsupportedMode(String),

    #[error("malformed request: {0}")]
    Malformed(String),
}

/// Wire framing errors. Any of these ends the current peer session.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame too large: max {max_frame_bytes} got {got_bytes}")]
    TooLarge {
        max_frame_bytes: usize,
        got_bytes: usize,
    },
}

/// Daemon-level failures.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Required capability unavailable at startup. Raised before detaching.
    #[error("infrastructure unavailable: {0}")]
    Infrastructure(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other fault while detaching or serving. Ends the daemon.
    #[error("unexpected: {0}")]
    Unexpected(String),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
