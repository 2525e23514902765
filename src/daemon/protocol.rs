//! Request/response types carried inside encrypted frames.
//!
//! The decrypted payload is a JSON object discriminated by `mode`:
//!
//! ```json
//! {"mode": "command", "cmd": "uname -a", "tmp_path": "/tmp/.fl-1234"}
//! {"mode": "fetch", "in_path": "/etc/hostname", "data": ""}
//! {"mode": "put", "data": "<base64>", "out_path": "/tmp/file"}
//! {"mode": "keepalive"}
//! ```
//!
//! Replies carry the mode's success fields, or `{"failed": true, "msg": ...}`.
//! File contents travel base64-encoded in `data` so binary files survive.
//!
//! CHANGELOG:
//! - 10/19/2026 - Replaced loose field lookup with typed request variants
//! - 10/19/2026 - Initial implementation

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;

use crate::error::ValidationError;

/// Decoded request. Mode-required fields are guaranteed present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Run `cmd` through a shell, capturing stdout and stderr.
    Command {
        cmd: String,
        tmp_path: PathBuf,
        /// Shell used to interpret `cmd` (defaults to `/bin/sh`)
        executable: Option<String>,
    },
    /// Read a file's full contents.
    Fetch { in_path: PathBuf },
    /// Write `data` to `out_path`, replacing any existing content.
    Put { data: Vec<u8>, out_path: PathBuf },
    /// Channel probe; no side effects.
    Keepalive,
}

/// Raw wire shape before validation. Every field is optional here so that a
/// missing one becomes a `ValidationError` instead of a parse failure.
#[derive(Debug, Default, Deserialize)]
struct Envelope {
    mode: Option<String>,
    cmd: Option<String>,
    tmp_path: Option<String>,
    executable: Option<String>,
    in_path: Option<String>,
    data: Option<String>,
    out_path: Option<String>,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, ValidationError> {
    value.ok_or(ValidationError::MissingField(field))
}

impl TryFrom<Envelope> for Request {
    type Error = ValidationError;

    fn try_from(env: Envelope) -> Result<Self, Self::Error> {
        let mode = required(env.mode, "mode")?;
        match mode.as_str() {
            "command" => Ok(Request::Command {
                cmd: required(env.cmd, "cmd")?,
                tmp_path: required(env.tmp_path, "tmp_path")?.into(),
                executable: env.executable,
            }),
            // `data` is a conventional placeholder on fetch and is ignored
            "fetch" => Ok(Request::Fetch {
                in_path: required(env.in_path, "in_path")?.into(),
            }),
            "put" => {
                let data = required(env.data, "data")?;
                let out_path = required(env.out_path, "out_path")?;
                let data = STANDARD
                    .decode(data.as_bytes())
                    .map_err(|e| ValidationError::InvalidField {
                        field: "data",
                        reason: e.to_string(),
                    })?;
                Ok(Request::Put {
                    data,
                    out_path: out_path.into(),
                })
            }
            "keepalive" => Ok(Request::Keepalive),
            _ => Err(ValidationError::UnsupportedMode(mode)),
        }
    }
}

impl Request {
    /// Parse and validate a decrypted request payload.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
        let env: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Self::try_from(env)
    }

    /// Wire name of the request's mode.
    pub fn mode(&self) -> &'static str {
        match self {
            Request::Command { .. } => "command",
            Request::Fetch { .. } => "fetch",
            Request::Put { .. } => "put",
            Request::Keepalive => "keepalive",
        }
    }

    /// Serialize to the JSON payload expected by the daemon.
    pub fn to_value(&self) -> serde_json::Value {
        match self {
            Request::Command {
                cmd,
                tmp_path,
                executable,
            } => {
                let mut value = json!({
                    "mode": "command",
                    "cmd": cmd,
                    "tmp_path": tmp_path.to_string_lossy(),
                });
                if let Some(exe) = executable {
                    value["executable"] = json!(exe);
                }
                value
            }
            Request::Fetch { in_path } => json!({
                "mode": "fetch",
                "in_path": in_path.to_string_lossy(),
                "data": "",
            }),
            Request::Put { data, out_path } => json!({
                "mode": "put",
                "data": STANDARD.encode(data),
                "out_path": out_path.to_string_lossy(),
            }),
            Request::Keepalive => json!({ "mode": "keepalive" }),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.to_value())
    }
}

/// Reply payload. Absent fields are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Base64 file contents (fetch only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl Response {
    /// Captured command output.
    pub fn command(stdout: String, stderr: String) -> Self {
        Self {
            stdout: Some(stdout),
            stderr: Some(stderr),
            ..Self::default()
        }
    }

    /// File contents for a fetch.
    pub fn fetch(contents: &[u8]) -> Self {
        Self {
            data: Some(STANDARD.encode(contents)),
            ..Self::default()
        }
    }

    /// Empty success body (put, keepalive).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a failure response.
    pub fn failure(msg: impl Into<String>) -> Self {
        Self {
            failed: true,
            msg: Some(msg.into()),
            ..Self::default()
        }
    }

    /// Decode the base64 `data` field, if present.
    pub fn decoded_data(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        self.data.as_ref().map(|d| STANDARD.decode(d.as_bytes()))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl From<ValidationError> for Response {
    fn from(err: ValidationError) -> Self {
        Response::failure(err.to_string())
    }
}
