//! Daemon mode implementation: keyed listener, dispatcher and lifecycle.
//!
//! CHANGELOG:
//! - 10/19/2026 - Added lifecycle, process record and TTL watchdog
//! - 10/19/2026 - Initial module structure

pub mod frame;
pub mod lifecycle;
pub mod pidfile;
pub mod protocol;
pub mod server;
pub mod service;
pub mod ttl;
