//! Cache controller and the full-rebuild state machine
//!
//! The controller owns the published [`ContentCache`] and serializes every
//! change to it. Readers call [`CacheController::cache`] and keep the
//! returned `Arc` for as long as they like; it never changes underneath them.
//!
//! # Full rebuild units
//!
//! ```text
//!   Waiting ──► Running ──► ApplyingQueuedPartials ──► Finished
//!      │           │
//!      └───────────┴──────────────────────────────────► Failed
//! ```
//!
//! At most one unit occupies the running slot and at most one more waits in
//! the queued slot. A caller that finds both slots taken blocks until the
//! queued unit resolves and then tries again. All waits share one deadline,
//! [`ControllerConfig::update_timeout`], counted from submission.
//!
//! Rebuilds execute outside the scheduler lock. Partial updates take the
//! lock, are applied copy-on-write to the published cache, and are recorded
//! on the running and the queued unit. Each replays them onto its new cache
//! before publishing it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::cache::ContentCache;
use crate::config::ControllerConfig;
use crate::datasource::{DataSource, FeatureQueryHandler};
use crate::error::{CacheError, Result};
use crate::request::{
    DeleteSensorRequest, InsertObservationRequest, InsertResultRequest, InsertResultTemplateRequest,
    InsertResultTemplateResponse, InsertSensorRequest, InsertSensorResponse,
};
use crate::scheduler::{RebuildScheduler, SchedulerHandle};
use crate::snapshot::{FileSnapshotStore, NullSnapshotStore, SnapshotStore};
use crate::update::{CacheUpdate, UpdateKind};

/// Lifecycle state of a full-rebuild unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildState {
    /// Holds the running slot but has not started executing
    Waiting,
    /// Querying the data source
    Running,
    /// Replaying partial updates onto the new cache
    ApplyingQueuedPartials,
    /// New cache published
    Finished,
    /// Previous cache kept
    Failed,
}

impl fmt::Display for RebuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RebuildState::Waiting => "waiting",
            RebuildState::Running => "running",
            RebuildState::ApplyingQueuedPartials => "applying_queued_partials",
            RebuildState::Finished => "finished",
            RebuildState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Snapshot of one rebuild unit for introspection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitStatus {
    pub unit: u64,
    pub state: RebuildState,
    /// Partial updates recorded for replay
    pub pending_partials: usize,
}

/// Occupancy of the rebuild slots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildStatus {
    pub running: Option<UnitStatus>,
    pub queued: Option<UnitStatus>,
    /// Most recently resolved unit
    pub last: Option<UnitStatus>,
}

/// How a unit ended, seen by callers blocked on it
#[derive(Debug)]
enum UnitOutcome {
    Finished,
    Failed(Arc<CacheError>),
    /// Left the queue without executing; waiters retry
    Abandoned,
}

#[derive(Debug)]
struct RebuildUnit {
    id: u64,
    outcome: OnceLock<UnitOutcome>,
}

impl RebuildUnit {
    fn new(id: u64) -> Self {
        Self {
            id,
            outcome: OnceLock::new(),
        }
    }

    fn is_done(&self) -> bool {
        self.outcome.get().is_some()
    }

    fn resolve(&self, outcome: UnitOutcome) {
        let _ = self.outcome.set(outcome);
    }
}

/// A unit holding the running or the queued slot
#[derive(Debug)]
struct SlotUnit {
    unit: Arc<RebuildUnit>,
    phase: RebuildState,
    /// Partial updates accepted since the unit entered a slot
    pending: Vec<CacheUpdate>,
}

impl SlotUnit {
    fn new(unit: Arc<RebuildUnit>) -> Self {
        Self {
            unit,
            phase: RebuildState::Waiting,
            pending: Vec::new(),
        }
    }

    /// Partials submitted now would be missing from this unit's result
    fn accepts_partials(&self) -> bool {
        matches!(self.phase, RebuildState::Waiting | RebuildState::Running)
    }

    fn status(&self) -> UnitStatus {
        UnitStatus {
            unit: self.unit.id,
            state: self.phase,
            pending_partials: self.pending.len(),
        }
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    running: Option<SlotUnit>,
    queued: Option<SlotUnit>,
    last: Option<UnitStatus>,
}

/// What a full-rebuild submitter found in the slots
enum Slot {
    Free,
    /// Running unit is executing and nothing is queued
    Queue,
    /// Block on this unit, then start over
    Wait(Arc<RebuildUnit>),
}

/// Owns the published cache and applies updates to it
///
/// Share it between request handlers as `Arc<CacheController>`. Dropping the
/// last reference shuts it down.
pub struct CacheController {
    config: ControllerConfig,
    source: Arc<dyn DataSource>,
    features: Arc<dyn FeatureQueryHandler>,
    store: Arc<dyn SnapshotStore>,
    published: RwLock<Arc<ContentCache>>,
    state: Mutex<SchedulerState>,
    resolved: Condvar,
    next_unit: AtomicU64,
    initialized: AtomicBool,
    shut_down: AtomicBool,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl fmt::Debug for CacheController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheController")
            .field("source", &self.source.name())
            .field("store", &self.store.name())
            .field("initialized", &self.is_initialized())
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish()
    }
}

impl CacheController {
    /// Create a controller persisting to `config.snapshot_path`, if set
    pub fn new(
        config: ControllerConfig,
        source: Arc<dyn DataSource>,
        features: Arc<dyn FeatureQueryHandler>,
    ) -> Self {
        let store: Arc<dyn SnapshotStore> = match &config.snapshot_path {
            Some(path) => Arc::new(FileSnapshotStore::new(path.clone())),
            None => Arc::new(NullSnapshotStore),
        };
        Self::with_store(config, source, features, store)
    }

    /// Create a controller with an explicit snapshot store
    ///
    /// A usable snapshot becomes the published cache and marks the
    /// controller initialized. Any snapshot problem is logged and the
    /// controller starts with an empty cache.
    pub fn with_store(
        config: ControllerConfig,
        source: Arc<dyn DataSource>,
        features: Arc<dyn FeatureQueryHandler>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        let (cache, initialized) = match store.load() {
            Ok(Some(mut cache)) => {
                cache.set_default_epsg(config.default_epsg);
                info!(
                    store = store.name(),
                    offerings = cache.offerings().len(),
                    "Restored cache from snapshot"
                );
                (cache, true)
            }
            Ok(None) => {
                debug!(store = store.name(), "No cache snapshot, starting empty");
                (ContentCache::new(config.default_epsg), false)
            }
            Err(e) => {
                warn!(store = store.name(), error = %e, "Ignoring unusable cache snapshot");
                (ContentCache::new(config.default_epsg), false)
            }
        };
        if config.discard_snapshot_after_load {
            if let Err(e) = store.discard() {
                warn!(store = store.name(), error = %e, "Failed to discard cache snapshot");
            }
        }

        Self {
            config,
            source,
            features,
            store,
            published: RwLock::new(Arc::new(cache)),
            state: Mutex::new(SchedulerState::default()),
            resolved: Condvar::new(),
            next_unit: AtomicU64::new(1),
            initialized: AtomicBool::new(initialized),
            shut_down: AtomicBool::new(false),
            scheduler: Mutex::new(None),
        }
    }

    /// Start the periodic rebuild thread if `rebuild_interval` is configured
    ///
    /// Returns whether a scheduler is running afterwards.
    pub fn start_scheduler(self: &Arc<Self>) -> Result<bool> {
        let Some(interval) = self.config.rebuild_interval() else {
            return Ok(false);
        };
        if self.is_shut_down() {
            return Err(CacheError::ShutDown);
        }
        let mut slot = self.scheduler.lock();
        if slot.is_none() {
            *slot = Some(RebuildScheduler::new(Arc::downgrade(self), interval).start()?);
        }
        Ok(true)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// The currently published cache
    pub fn cache(&self) -> Arc<ContentCache> {
        self.published.read().clone()
    }

    /// Alias of [`CacheController::cache`]
    pub fn get_cache(&self) -> Arc<ContentCache> {
        self.cache()
    }

    /// True once a snapshot was loaded or a rebuild finished
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub fn rebuild_state(&self) -> RebuildStatus {
        let state = self.state.lock();
        RebuildStatus {
            running: state.running.as_ref().map(SlotUnit::status),
            queued: state.queued.as_ref().map(SlotUnit::status),
            last: state.last.clone(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Operation entry points
    // ═══════════════════════════════════════════════════════════════════════

    /// Rebuild the whole cache from the data source
    pub fn update_cache_from_datasource(&self) -> Result<()> {
        self.submit(CacheUpdate::full_rebuild(
            self.source.clone(),
            self.features.clone(),
            self.config.rebuild_threads,
            self.config.default_epsg,
        ))
    }

    pub fn update_after_sensor_insertion(
        &self,
        request: InsertSensorRequest,
        response: InsertSensorResponse,
    ) -> Result<()> {
        self.submit(CacheUpdate::sensor_insertion(request, response)?)
    }

    pub fn update_after_sensor_deletion(&self, request: DeleteSensorRequest) -> Result<()> {
        self.submit(CacheUpdate::sensor_deletion(request)?)
    }

    pub fn update_after_observation_insertion(&self, request: InsertObservationRequest) -> Result<()> {
        self.submit(CacheUpdate::observation_insertion(request)?)
    }

    pub fn update_after_result_template_insertion(
        &self,
        request: InsertResultTemplateRequest,
        response: InsertResultTemplateResponse,
    ) -> Result<()> {
        self.submit(CacheUpdate::result_template_insertion(request, response)?)
    }

    pub fn update_after_result_insertion(&self, request: InsertResultRequest) -> Result<()> {
        self.submit(CacheUpdate::result_insertion(request)?)
    }

    /// Apply an update
    ///
    /// Partial updates return once the published cache reflects them. Full
    /// rebuilds return once their unit finished or failed.
    pub fn submit(&self, update: CacheUpdate) -> Result<()> {
        if self.is_shut_down() {
            return Err(CacheError::ShutDown);
        }
        match update.kind() {
            UpdateKind::Partial => self.apply_partial(update),
            UpdateKind::Complete => self.run_rebuild(update),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Partial updates
    // ═══════════════════════════════════════════════════════════════════════

    fn apply_partial(&self, update: CacheUpdate) -> Result<()> {
        let started = Instant::now();
        let mut state = self.lock_state(started, started + self.config.update_timeout())?;

        let mut next = ContentCache::clone(&self.cache());
        update.execute(&mut next)?;
        *self.published.write() = Arc::new(next);
        trace!(update = update.name(), "Published partial update");

        // each unit replays these before it publishes
        let state = &mut *state;
        for slot in [state.running.as_mut(), state.queued.as_mut()].into_iter().flatten() {
            if slot.accepts_partials() {
                debug!(
                    unit = slot.unit.id,
                    update = update.name(),
                    "Recorded partial update for replay"
                );
                slot.pending.push(update.clone());
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Full rebuilds
    // ═══════════════════════════════════════════════════════════════════════

    fn run_rebuild(&self, update: CacheUpdate) -> Result<()> {
        let started = Instant::now();
        let deadline = started + self.config.update_timeout();
        let unit = Arc::new(RebuildUnit::new(self.next_unit.fetch_add(1, Ordering::Relaxed)));

        {
            let mut state = self.lock_state(started, deadline)?;
            self.claim_running_slot(&mut state, &unit, started, deadline)?;
            debug!(unit = unit.id, state = %RebuildState::Waiting, "Rebuild unit holds running slot");
        }

        {
            let mut state = self.state.lock();
            if let Some(running) = state.running.as_mut() {
                running.phase = RebuildState::Running;
            }
        }
        debug!(unit = unit.id, state = %RebuildState::Running, update = update.name(), "Rebuild unit executing");

        let mut fresh = ContentCache::new(self.config.default_epsg);
        let result = update.execute(&mut fresh);
        self.finish_rebuild(&unit, fresh, result, started)
    }

    /// Loop until `unit` owns the running slot
    fn claim_running_slot(
        &self,
        state: &mut MutexGuard<'_, SchedulerState>,
        unit: &Arc<RebuildUnit>,
        started: Instant,
        deadline: Instant,
    ) -> Result<()> {
        loop {
            if self.is_shut_down() {
                return Err(CacheError::ShutDown);
            }
            let slot = match (&state.running, &state.queued) {
                (None, None) => Slot::Free,
                (Some(running), None) if running.phase != RebuildState::Waiting => Slot::Queue,
                (Some(running), None) => Slot::Wait(running.unit.clone()),
                (_, Some(queued)) => Slot::Wait(queued.unit.clone()),
            };
            match slot {
                Slot::Free => {
                    state.running = Some(SlotUnit::new(unit.clone()));
                    return Ok(());
                }
                Slot::Queue => {
                    state.queued = Some(SlotUnit::new(unit.clone()));
                    debug!(unit = unit.id, "Rebuild unit queued");
                    return self.await_promotion(state, unit, started, deadline);
                }
                Slot::Wait(blocker) => {
                    trace!(unit = unit.id, blocker = blocker.id, "Waiting for rebuild unit");
                    self.await_unit(state, &blocker, started, deadline)?;
                }
            }
        }
    }

    /// Block until `blocker` resolves; its failure is re-raised
    fn await_unit(
        &self,
        state: &mut MutexGuard<'_, SchedulerState>,
        blocker: &RebuildUnit,
        started: Instant,
        deadline: Instant,
    ) -> Result<()> {
        while !blocker.is_done() {
            if self.is_shut_down() {
                return Err(CacheError::ShutDown);
            }
            if self.resolved.wait_until(state, deadline).timed_out() && !blocker.is_done() {
                return Err(timed_out("rebuild unit", started));
            }
        }
        match blocker.outcome.get() {
            Some(UnitOutcome::Failed(cause)) => Err(CacheError::RebuildFailed {
                unit: blocker.id,
                cause: cause.clone(),
            }),
            _ => Ok(()),
        }
    }

    /// Block in the queued slot until the running slot frees up
    ///
    /// Promotion keeps the partial updates recorded while queued. A caller
    /// that gives up vacates the queued slot and resolves its unit as
    /// abandoned so that callers waiting behind it move on.
    fn await_promotion(
        &self,
        state: &mut MutexGuard<'_, SchedulerState>,
        unit: &Arc<RebuildUnit>,
        started: Instant,
        deadline: Instant,
    ) -> Result<()> {
        loop {
            if state.running.is_none() {
                let promoted = match state.queued.take() {
                    Some(queued) if Arc::ptr_eq(&queued.unit, unit) => queued,
                    other => {
                        state.queued = other;
                        SlotUnit::new(unit.clone())
                    }
                };
                debug!(
                    unit = unit.id,
                    pending = promoted.pending.len(),
                    "Queued rebuild unit promoted"
                );
                state.running = Some(promoted);
                return Ok(());
            }
            let error = if self.is_shut_down() {
                Some(CacheError::ShutDown)
            } else if self.resolved.wait_until(state, deadline).timed_out() && state.running.is_some() {
                Some(timed_out("running rebuild unit", started))
            } else {
                None
            };
            if let Some(error) = error {
                state.queued = None;
                unit.resolve(UnitOutcome::Abandoned);
                self.resolved.notify_all();
                debug!(unit = unit.id, "Queued rebuild unit abandoned");
                return Err(error);
            }
        }
    }

    fn finish_rebuild(
        &self,
        unit: &RebuildUnit,
        mut fresh: ContentCache,
        result: Result<()>,
        started: Instant,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let mut replayed = 0;

        let outcome = match result {
            Ok(()) => {
                let pending = match state.running.as_mut() {
                    Some(running) => {
                        running.phase = RebuildState::ApplyingQueuedPartials;
                        std::mem::take(&mut running.pending)
                    }
                    None => Vec::new(),
                };
                debug!(
                    unit = unit.id,
                    state = %RebuildState::ApplyingQueuedPartials,
                    partials = pending.len(),
                    "Replaying partial updates"
                );
                for partial in &pending {
                    if let Err(e) = partial.execute(&mut fresh) {
                        warn!(unit = unit.id, update = partial.name(), error = %e, "Replay failed");
                    }
                }
                replayed = pending.len();
                *self.published.write() = Arc::new(fresh);
                self.initialized.store(true, Ordering::Release);
                info!(
                    unit = unit.id,
                    replayed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Published rebuilt cache"
                );
                UnitOutcome::Finished
            }
            Err(e) => {
                error!(unit = unit.id, error = %e, "Full rebuild failed, keeping previous cache");
                UnitOutcome::Failed(Arc::new(e))
            }
        };

        let final_state = match outcome {
            UnitOutcome::Finished => RebuildState::Finished,
            _ => RebuildState::Failed,
        };
        state.running = None;
        state.last = Some(UnitStatus {
            unit: unit.id,
            state: final_state,
            pending_partials: replayed,
        });
        let result = match &outcome {
            UnitOutcome::Failed(cause) => Err(CacheError::RebuildFailed {
                unit: unit.id,
                cause: cause.clone(),
            }),
            _ => Ok(()),
        };
        unit.resolve(outcome);
        debug!(unit = unit.id, state = %final_state, "Rebuild unit resolved");
        drop(state);
        self.resolved.notify_all();
        result
    }

    fn lock_state(&self, started: Instant, deadline: Instant) -> Result<MutexGuard<'_, SchedulerState>> {
        self.state
            .try_lock_until(deadline)
            .ok_or_else(|| timed_out("controller lock", started))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Shutdown
    // ═══════════════════════════════════════════════════════════════════════

    /// Stop the scheduler, wake blocked callers and save a snapshot
    ///
    /// Safe to call more than once; only the first call has an effect. A
    /// rebuild that is already executing still runs to completion.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let _state = self.state.lock();
            self.resolved.notify_all();
        }
        if let Some(handle) = self.scheduler.lock().take() {
            if handle.join().is_err() {
                warn!("Rebuild scheduler thread panicked");
            }
        }

        if !self.config.persist_on_shutdown {
            return;
        }
        if !self.is_initialized() {
            debug!("Cache never initialized, not saving snapshot");
            return;
        }
        match self.store.save(&self.cache()) {
            Ok(()) => info!(store = self.store.name(), "Saved cache snapshot"),
            Err(e) => error!(store = self.store.name(), error = %e, "Failed to save cache snapshot"),
        }
    }
}

impl Drop for CacheController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn timed_out(waiting_for: &'static str, started: Instant) -> CacheError {
    let waited_ms = started.elapsed().as_millis() as u64;
    warn!(waiting_for, waited_ms, "Cache update timed out");
    CacheError::LockTimeout {
        waiting_for,
        waited_ms,
    }
}
