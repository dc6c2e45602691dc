//! Fixed-size worker pool for per-offering rebuild tasks
//!
//! ```text
//!   offerings ──► channel ──► worker 1 ─┐
//!                        ├──► worker 2 ─┼──► store(slice) / failures
//!                        └──► worker N ─┘
//!                 WaitGroup (one token per offering) gates completion
//! ```
//!
//! A failing or panicking task records an [`OfferingFailure`] and still
//! releases its token, so sibling tasks always run to completion.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use std::time::Instant;

use crossbeam::channel;
use crossbeam::sync::WaitGroup;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{OfferingFailure, Result};

/// Pool that runs one task per offering on a bounded number of threads
#[derive(Debug, Clone, Copy)]
pub struct RebuildWorkers {
    threads: usize,
}

impl RebuildWorkers {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `fetch` for every offering and hand each result to `store`
    ///
    /// Blocks until every offering was processed. Returns the failures in
    /// no particular order.
    pub fn run<R, F, S>(&self, offerings: &[String], fetch: F, store: S) -> Vec<OfferingFailure>
    where
        R: Send,
        F: Fn(&str) -> Result<R> + Sync,
        S: Fn(&str, R) + Sync,
    {
        if offerings.is_empty() {
            return Vec::new();
        }
        let started = Instant::now();
        let failures = Mutex::new(Vec::new());
        let pool_size = self.threads.min(offerings.len());
        let (tx, rx) = channel::unbounded::<(&str, WaitGroup)>();
        let barrier = WaitGroup::new();

        thread::scope(|scope| {
            for _ in 0..pool_size {
                let rx = rx.clone();
                let fetch = &fetch;
                let store = &store;
                let failures = &failures;
                scope.spawn(move || {
                    for (offering, token) in rx.iter() {
                        let outcome = catch_unwind(AssertUnwindSafe(|| fetch(offering).map(|r| store(offering, r))));
                        let reason = match outcome {
                            Ok(Ok(())) => None,
                            Ok(Err(e)) => Some(e.to_string()),
                            Err(_) => Some("worker panicked".to_string()),
                        };
                        if let Some(reason) = reason {
                            warn!(offering, %reason, "Offering fetch failed");
                            failures.lock().push(OfferingFailure {
                                offering: offering.to_string(),
                                reason,
                            });
                        }
                        drop(token);
                    }
                });
            }

            for offering in offerings {
                if tx.send((offering.as_str(), barrier.clone())).is_err() {
                    break;
                }
            }
            drop(tx);
            barrier.wait();
        });

        let failures = failures.into_inner();
        debug!(
            offerings = offerings.len(),
            threads = pool_size,
            failed = failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rebuild workers finished"
        );
        failures
    }
}
