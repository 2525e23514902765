//! fireline library
//!
//! An ephemeral daemon a controller launches on a node so that later
//! operations skip re-establishing a heavyweight transport. The daemon
//! accepts encrypted requests over TCP and does one of three things: run a
//! shell command, read a file, or write a file. It exits on signal, on TTL
//! expiry, or on an unrecoverable error.
//!
//! # Security contract
//!
//! Holding the session key is the only authorization. Any peer that can
//! seal a frame under the key can run arbitrary commands and read or write
//! any file with the daemon's privileges. There is no second layer.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial library structure

pub mod client;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod security;
