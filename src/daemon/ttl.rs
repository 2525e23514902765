//! Time-to-live watchdog.
//!
//! Sleeps for the session TTL, then stops the server. If the serve loop is
//! stuck (a hung command holds the channel) and has not returned within the
//! grace period, the watchdog removes the process record and exits the
//! process itself.
//!
//! CHANGELOG:
//! - 10/19/2026 - Initial implementation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::daemon::pidfile::ProcessRecord;
use crate::daemon::server::ShutdownHandle;

/// How long the serve loop gets to wind down after expiry.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

pub struct Watchdog {
    fired: Arc<AtomicBool>,
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Start the timer. Events are logged through the caller's dispatcher.
    pub fn spawn(
        ttl: Duration,
        grace: Duration,
        shutdown: ShutdownHandle,
        record: Option<ProcessRecord>,
    ) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let (cancel, cancelled) = mpsc::channel::<()>();
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());

        let fired_flag = Arc::clone(&fired);
        let handle = thread::spawn(move || {
            tracing::dispatcher::with_default(&dispatch, || {
                if !matches!(cancelled.recv_timeout(ttl), Err(RecvTimeoutError::Timeout)) {
                    return;
                }

                info!(ttl_secs = ttl.as_secs(), "time-to-live expired, stopping");
                fired_flag.store(true, Ordering::SeqCst);
                shutdown.trigger();

                if !matches!(cancelled.recv_timeout(grace), Err(RecvTimeoutError::Timeout)) {
                    return;
                }

                warn!(grace_secs = grace.as_secs(), "serve loop did not stop in time, exiting");
                if let Some(record) = record {
                    record.remove();
                }
                std::process::exit(0);
            })
        });

        Self {
            fired,
            cancel: Some(cancel),
            handle: Some(handle),
        }
    }

    /// Whether the TTL elapsed.
    pub fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Stop the timer and wait for the thread.
    pub fn disarm(mut self) {
        self.cancel.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        // Dropping the sender wakes the thread.
        self.cancel.take();
    }
}
