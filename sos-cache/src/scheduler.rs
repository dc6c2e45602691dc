//! Periodic full rebuild on a background thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::controller::CacheController;
use crate::error::{CacheError, Result};

/// Longest uninterrupted sleep, bounds shutdown latency
const POLL_SLICE: Duration = Duration::from_millis(25);

/// Submits a full rebuild to a controller every `interval`
///
/// The thread holds only a weak reference, so it never keeps a controller
/// alive. It exits when the controller is gone or shut down.
pub struct RebuildScheduler {
    controller: Weak<CacheController>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl RebuildScheduler {
    pub fn new(controller: Weak<CacheController>, interval: Duration) -> Self {
        Self {
            controller,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the scheduler thread
    pub fn start(self) -> Result<SchedulerHandle> {
        let shutdown = self.shutdown.clone();
        let handle = thread::Builder::new()
            .name("sos-cache-rebuild".to_string())
            .spawn(move || self.run_loop())?;
        Ok(SchedulerHandle {
            shutdown,
            handle: Some(handle),
        })
    }

    fn run_loop(self) {
        debug!(interval_ms = self.interval.as_millis() as u64, "Rebuild scheduler started");
        let mut next = Instant::now() + self.interval;

        while !self.shutdown.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now < next {
                thread::sleep((next - now).min(POLL_SLICE));
                continue;
            }

            let Some(controller) = self.controller.upgrade() else {
                break;
            };
            match controller.update_cache_from_datasource() {
                Ok(()) => debug!("Scheduled rebuild finished"),
                Err(CacheError::ShutDown) => break,
                Err(e) => warn!(error = %e, "Scheduled rebuild failed"),
            }
            drop(controller);
            next = Instant::now() + self.interval;
        }

        self.shutdown.store(true, Ordering::Relaxed);
        info!("Rebuild scheduler stopped");
    }
}

/// Handle to a running [`RebuildScheduler`]
pub struct SchedulerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Signal the scheduler to stop
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Stop the scheduler and wait for its thread
    ///
    /// Called from the scheduler thread itself this only signals.
    pub fn join(mut self) -> thread::Result<()> {
        self.shutdown();
        match self.handle.take() {
            Some(handle) if handle.thread().id() != thread::current().id() => handle.join(),
            _ => Ok(()),
        }
    }

    /// Check if the scheduler is still running
    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Relaxed)
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        // Signal shutdown on drop
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
