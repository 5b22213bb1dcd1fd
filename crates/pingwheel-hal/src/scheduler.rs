//! [`RoundRobinScheduler`] – fires registered devices one at a time.
//!
//! A single background worker walks the [`DeviceRegistry`], triggers the
//! current device if it is enabled, then waits a fixed interval before moving
//! on.  The interval is a hardware constraint: two ultrasonic sensors pinging
//! within the same acoustic round trip hear each other's echo.
//!
//! # State machine
//!
//! | From | Call | To |
//! |---|---|---|
//! | `Stopped` | [`activate`] (non-empty registry) | `Running` |
//! | `Stopped` | [`activate`] (empty registry) | `Stopped` |
//! | `Running` | [`activate`] | `Running` |
//! | `Running` | [`deactivate`] | `Stopping`, then `Stopped` before the call returns |
//! | `Running` | [`deregister`] of the last device | `Stopping`, then `Stopped` before the call returns |
//! | `Stopped` | [`deactivate`] | `Stopped` |
//!
//! # Locking
//!
//! The registry and the state live behind one mutex.  The worker holds it
//! while it triggers a device and releases it only while waiting out the
//! interval on a condition variable, so:
//!
//! - a device removed by [`deregister`] is never triggered after the call
//!   returns;
//! - [`deactivate`] wakes the worker mid-interval instead of waiting the
//!   interval out;
//! - once [`deactivate`] returns the worker is parked and no trigger is in
//!   flight.
//!
//! Device methods run with the lock held and must not call back into the
//! scheduler.
//!
//! [`activate`]: RoundRobinScheduler::activate
//! [`deactivate`]: RoundRobinScheduler::deactivate
//! [`deregister`]: RoundRobinScheduler::deregister

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use pingwheel_types::{FaultRecord, PollError, SchedulerState, SchedulerStats};
use tracing::{debug, error, info, warn};

use crate::device::Device;
use crate::registry::{DeviceRegistry, Slot};

/// Time allowed for one ping to return before the next device fires.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// Shortest interval that keeps neighbouring sensors from cross-talking.
pub const MIN_INTERVAL: Duration = DEFAULT_INTERVAL;

const WORKER_THREAD_NAME: &str = "pingwheel-round-robin";

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tunables for a [`RoundRobinScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    interval: Duration,
}

impl SchedulerConfig {
    /// # Errors
    ///
    /// Returns [`PollError::Configuration`] when `interval` is shorter than
    /// [`MIN_INTERVAL`].
    pub fn new(interval: Duration) -> Result<Self, PollError> {
        if interval < MIN_INTERVAL {
            return Err(PollError::Configuration(format!(
                "inter-device interval {interval:?} is below the {MIN_INTERVAL:?} minimum"
            )));
        }
        Ok(Self { interval })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

struct Inner {
    registry: DeviceRegistry,
    state: SchedulerState,
    /// Set once, when the scheduler is dropped.
    shutdown: bool,
    worker_alive: bool,
    /// Abnormal worker exit not yet reported to a caller.
    fault: Option<String>,
    stats: SchedulerStats,
    spawns: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    changed: Condvar,
    interval: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Inner>) -> MutexGuard<'a, Inner> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, Inner>,
        timeout: Duration,
    ) -> MutexGuard<'a, Inner> {
        self.changed
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner)
            .0
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RoundRobinScheduler
// ────────────────────────────────────────────────────────────────────────────

/// Cooperative round-robin poller over a dynamic set of devices.
///
/// # Example
///
/// ```rust
/// use pingwheel_hal::scheduler::RoundRobinScheduler;
/// use pingwheel_hal::sim::SimDevice;
/// use pingwheel_types::SchedulerState;
///
/// let scheduler = RoundRobinScheduler::new();
/// let front = SimDevice::new("front");
/// scheduler.register(front.clone());
///
/// scheduler.activate().unwrap();
/// assert_eq!(scheduler.state(), SchedulerState::Running);
///
/// scheduler.deactivate().unwrap();
/// assert_eq!(scheduler.state(), SchedulerState::Stopped);
/// ```
pub struct RoundRobinScheduler {
    shared: Arc<Shared>,
    /// Also serialises activations so at most one worker is ever spawned.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Default for RoundRobinScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundRobinScheduler {
    /// Create a stopped scheduler with the default 100 ms interval.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    registry: DeviceRegistry::new(),
                    state: SchedulerState::Stopped,
                    shutdown: false,
                    worker_alive: false,
                    fault: None,
                    stats: SchedulerStats::default(),
                    spawns: 0,
                }),
                changed: Condvar::new(),
                interval: config.interval(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SchedulerState::Running
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.lock().stats.clone()
    }

    pub fn len(&self) -> usize {
        self.shared.lock().registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.lock().registry.is_empty()
    }

    pub fn is_registered<D: Device + ?Sized>(&self, device: &Arc<D>) -> bool {
        self.shared.lock().registry.contains(device)
    }

    /// Snapshot of the registered devices, in rotation order.
    pub fn devices(&self) -> Vec<Arc<dyn Device>> {
        self.shared.lock().registry.devices()
    }

    /// Add `device` to the rotation.  Safe while running: the worker sees the
    /// new device no later than its next step.
    ///
    /// Returns `false` if the handle was already registered.
    pub fn register(&self, device: Arc<dyn Device>) -> bool {
        let mut inner = self.shared.lock();
        let id = device.id().to_string();
        let added = inner.registry.register(device);
        if added {
            debug!(device = %id, devices = inner.registry.len(), "device registered");
        }
        added
    }

    /// Remove `device` from the rotation.
    ///
    /// If this empties the registry while running, polling stops and this
    /// call blocks until the worker has parked, exactly like
    /// [`deactivate`][Self::deactivate].
    ///
    /// Returns `false` if the handle was not registered.
    pub fn deregister<D: Device + ?Sized>(&self, device: &Arc<D>) -> bool {
        let mut inner = self.shared.lock();
        if !inner.registry.deregister(device) {
            return false;
        }
        debug!(device = %device.id(), devices = inner.registry.len(), "device deregistered");
        if inner.registry.is_empty() && inner.state == SchedulerState::Running {
            info!("last device deregistered; stopping round-robin polling");
            // A worker fault seen here stays queued for the next
            // activate/deactivate.
            drop(self.quiesce(inner));
        }
        true
    }

    /// Start round-robin polling.
    ///
    /// No-op when already running, and (with a warning) when no device is
    /// registered.  Otherwise every device is reset and the worker, spawned
    /// on first use, starts a fresh pass at the head of the registry.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::InternalScheduler`] if the worker terminated
    /// abnormally since the last activate/deactivate (the scheduler is left
    /// `Stopped` and the next call proceeds normally), or if a worker thread
    /// cannot be spawned.
    pub fn activate(&self) -> Result<(), PollError> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let mut inner = self.shared.lock();
        while inner.state == SchedulerState::Stopping {
            inner = self.shared.wait(inner);
        }
        if let Some(reason) = inner.fault.take() {
            return Err(PollError::InternalScheduler(reason));
        }
        if inner.state == SchedulerState::Running {
            return Ok(());
        }
        if inner.registry.is_empty() {
            warn!("activate() with no registered devices; staying stopped");
            return Ok(());
        }

        inner.registry.reset_all();

        if !inner.worker_alive {
            // The previous worker (if any) has already published its exit.
            if let Some(dead) = worker.take()
                && dead.join().is_err()
            {
                error!("previous round-robin worker could not be joined cleanly");
            }
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(WORKER_THREAD_NAME.to_string())
                .spawn(move || worker_main(shared))
                .map_err(|e| {
                    PollError::InternalScheduler(format!("failed to spawn worker: {e}"))
                })?;
            *worker = Some(handle);
            inner.worker_alive = true;
            inner.spawns += 1;
        }

        inner.state = SchedulerState::Running;
        self.shared.changed.notify_all();
        info!(
            devices = inner.registry.len(),
            interval = ?self.shared.interval,
            "round-robin polling started"
        );
        Ok(())
    }

    /// Stop round-robin polling and wait for the worker to park.
    ///
    /// When this returns no trigger is in flight and none will fire until the
    /// next [`activate`][Self::activate].  Every device is reset afterwards
    /// since its last reading is now stale.  No-op when already stopped.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::InternalScheduler`] if the worker terminated
    /// abnormally; the scheduler is `Stopped` either way.
    pub fn deactivate(&self) -> Result<(), PollError> {
        let inner = self.shared.lock();
        let mut inner = self.quiesce(inner);
        match inner.fault.take() {
            Some(reason) => Err(PollError::InternalScheduler(reason)),
            None => Ok(()),
        }
    }

    /// Fire a single device once from the calling thread.
    ///
    /// Automatic polling is stopped first (synchronously) so the manual ping
    /// cannot collide with a scheduled one; the device's measurement state is
    /// reset before the trigger.  Polling is not restarted.
    ///
    /// # Errors
    ///
    /// Returns the trigger's [`PollError::DeviceFault`], or
    /// [`PollError::InternalScheduler`] as for [`deactivate`][Self::deactivate].
    pub fn ping(&self, device: &dyn Device) -> Result<(), PollError> {
        let inner = self.shared.lock();
        let mut inner = self.quiesce(inner);
        if let Some(reason) = inner.fault.take() {
            return Err(PollError::InternalScheduler(reason));
        }
        device.reset();
        device.trigger()
    }

    /// Drive a `Running` scheduler to `Stopped` and reset every device.
    fn quiesce<'a>(&'a self, mut inner: MutexGuard<'a, Inner>) -> MutexGuard<'a, Inner> {
        match inner.state {
            SchedulerState::Stopped => return inner,
            SchedulerState::Running => {
                inner.state = SchedulerState::Stopping;
                self.shared.changed.notify_all();
            }
            SchedulerState::Stopping => {}
        }
        while inner.state == SchedulerState::Stopping {
            inner = self.shared.wait(inner);
        }
        inner.registry.reset_all();
        info!("round-robin polling stopped");
        inner
    }

    /// Number of worker threads spawned so far.  Stays at one unless a
    /// worker died and was replaced.
    pub fn worker_spawns(&self) -> u64 {
        self.shared.lock().spawns
    }
}

impl Drop for RoundRobinScheduler {
    fn drop(&mut self) {
        {
            let mut inner = self.shared.lock();
            inner.shutdown = true;
            self.shared.changed.notify_all();
        }
        let handle = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!("round-robin worker could not be joined on shutdown");
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Worker
// ────────────────────────────────────────────────────────────────────────────

fn worker_main(shared: Arc<Shared>) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker_loop(&shared)));

    let mut inner = shared.lock();
    shared.inner.clear_poison();
    inner.worker_alive = false;
    inner.state = SchedulerState::Stopped;
    if let Err(payload) = outcome {
        let reason = panic_message(payload.as_ref());
        error!(reason = %reason, "round-robin worker terminated abnormally");
        inner.fault = Some(format!("worker terminated abnormally: {reason}"));
    }
    shared.changed.notify_all();
}

/// Park until running, poll until told to stop, repeat until shutdown.
fn worker_loop(shared: &Shared) {
    let mut inner = shared.lock();
    loop {
        if inner.shutdown {
            return;
        }
        match inner.state {
            SchedulerState::Stopped => inner = shared.wait(inner),
            // Stop requested before the worker ever got going.
            SchedulerState::Stopping => {
                inner.state = SchedulerState::Stopped;
                shared.changed.notify_all();
            }
            SchedulerState::Running => inner = poll_round_robin(shared, inner),
        }
    }
}

/// One activation's worth of polling.  Returns with the state `Stopped`.
fn poll_round_robin<'a>(
    shared: &'a Shared,
    mut inner: MutexGuard<'a, Inner>,
) -> MutexGuard<'a, Inner> {
    let mut cursor: Option<Slot> = None;

    while inner.state == SchedulerState::Running && !inner.shutdown {
        let Some(visit) = inner.registry.next_after(cursor) else {
            info!("registry empty; round-robin polling stopped");
            break;
        };
        cursor = Some(visit.slot);
        let wrapped = visit.wrapped;
        let device = Arc::clone(visit.device);

        if wrapped {
            inner.stats.passes += 1;
        }

        if device.enabled() {
            match device.trigger() {
                Ok(()) => {
                    inner.stats.triggers += 1;
                    debug!(device = %device.id(), "triggered");
                }
                Err(e) => {
                    warn!(device = %device.id(), error = %e, "trigger failed; moving on");
                    inner.stats.failures += 1;
                    inner.stats.last_fault = Some(FaultRecord {
                        device: device.id().to_string(),
                        message: e.to_string(),
                        at: Utc::now(),
                    });
                }
            }
        }

        inner = wait_interval(shared, inner);
    }

    inner.state = SchedulerState::Stopped;
    shared.changed.notify_all();
    inner
}

/// Sleep for the inter-device interval, waking early on stop or shutdown.
///
/// An interval too long to express as an [`Instant`] waits until stopped.
fn wait_interval<'a>(
    shared: &'a Shared,
    mut inner: MutexGuard<'a, Inner>,
) -> MutexGuard<'a, Inner> {
    let Some(deadline) = Instant::now().checked_add(shared.interval) else {
        while inner.state == SchedulerState::Running && !inner.shutdown {
            inner = shared.wait(inner);
        }
        return inner;
    };
    while inner.state == SchedulerState::Running && !inner.shutdown {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        inner = shared.wait_timeout(inner, deadline - now);
    }
    inner
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimDevice, SimEchoCounter, SimPingOutput, TriggerTrace};
    use crate::ultrasonic::Ultrasonic;

    fn intervals(n: u32) -> Duration {
        DEFAULT_INTERVAL * n
    }

    #[test]
    fn config_rejects_interval_below_minimum() {
        let result = SchedulerConfig::new(Duration::from_millis(50));
        assert!(matches!(result, Err(PollError::Configuration(_))));

        let cfg = SchedulerConfig::new(Duration::from_millis(250)).unwrap();
        assert_eq!(cfg.interval(), Duration::from_millis(250));
        assert_eq!(SchedulerConfig::default().interval(), DEFAULT_INTERVAL);
    }

    #[test]
    fn unrepresentable_interval_waits_until_stopped() {
        let cfg = SchedulerConfig::new(Duration::MAX).unwrap();
        let scheduler = RoundRobinScheduler::with_config(cfg);
        let d1 = SimDevice::new("d1");
        scheduler.register(d1.clone());

        scheduler.activate().unwrap();
        let waited = Instant::now();
        while d1.triggers() == 0 && waited.elapsed() < Duration::from_secs(1) {
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(20));
        assert!(scheduler.is_active());

        let started = Instant::now();
        assert!(scheduler.deactivate().is_ok());
        assert!(started.elapsed() < DEFAULT_INTERVAL);
        assert_eq!(d1.triggers(), 1);
        assert_eq!(scheduler.stats().failures, 0);
    }

    #[test]
    fn activate_on_empty_registry_is_noop() {
        let scheduler = RoundRobinScheduler::new();
        assert!(scheduler.activate().is_ok());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(scheduler.worker_spawns(), 0);
    }

    #[test]
    fn deactivate_when_stopped_is_noop() {
        let scheduler = RoundRobinScheduler::new();
        assert!(scheduler.deactivate().is_ok());
        assert!(scheduler.deactivate().is_ok());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn activate_twice_spawns_one_worker() {
        let scheduler = RoundRobinScheduler::new();
        let d1 = SimDevice::new("d1");
        scheduler.register(d1.clone());

        scheduler.activate().unwrap();
        scheduler.activate().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert_eq!(scheduler.worker_spawns(), 1);

        thread::sleep(intervals(3) + Duration::from_millis(50));
        scheduler.deactivate().unwrap();
        // One device at one trigger per interval: t=0, 100, 200, 300.
        let n = d1.triggers();
        assert!((1..=4).contains(&n), "expected at most one trigger per interval, got {n}");
    }

    #[test]
    fn concurrent_callers_share_one_worker() {
        let scheduler = Arc::new(RoundRobinScheduler::new());
        let d1 = SimDevice::new("d1");
        let d2 = SimDevice::new("d2");
        let spare = SimDevice::new("spare");
        scheduler.register(d1.clone());
        scheduler.register(d2.clone());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let scheduler = scheduler.clone();
                let spare = spare.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        if (t + i) % 2 == 0 {
                            scheduler.activate().unwrap();
                        } else {
                            scheduler.deactivate().unwrap();
                        }
                        if t == 0 && i % 10 == 0 {
                            scheduler.register(spare.clone());
                            scheduler.deregister(&spare);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        scheduler.deactivate().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(scheduler.worker_spawns(), 1);
        assert!(!scheduler.is_registered(&spare));

        let before = (d1.triggers(), d2.triggers(), spare.triggers());
        thread::sleep(intervals(3) + Duration::from_millis(50));
        assert_eq!((d1.triggers(), d2.triggers(), spare.triggers()), before);
    }

    #[test]
    fn worker_is_reused_across_activations() {
        let scheduler = RoundRobinScheduler::new();
        let d1 = SimDevice::new("d1");
        scheduler.register(d1.clone());

        for _ in 0..3 {
            scheduler.activate().unwrap();
            thread::sleep(Duration::from_millis(20));
            scheduler.deactivate().unwrap();
        }
        assert_eq!(scheduler.worker_spawns(), 1);
        assert!(d1.triggers() >= 1);
    }

    #[test]
    fn no_trigger_after_deactivate_returns() {
        let scheduler = RoundRobinScheduler::new();
        let d1 = SimDevice::new("d1");
        let d2 = SimDevice::new("d2");
        scheduler.register(d1.clone());
        scheduler.register(d2.clone());

        scheduler.activate().unwrap();
        thread::sleep(intervals(2) + Duration::from_millis(50));
        scheduler.deactivate().unwrap();

        let before = (d1.triggers(), d2.triggers());
        thread::sleep(intervals(3) + Duration::from_millis(50));
        assert_eq!((d1.triggers(), d2.triggers()), before);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn deactivate_interrupts_interval_wait() {
        let scheduler = RoundRobinScheduler::new();
        scheduler.register(SimDevice::new("d1"));
        scheduler.activate().unwrap();
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        scheduler.deactivate().unwrap();
        let latency = started.elapsed();
        assert!(
            latency < DEFAULT_INTERVAL / 2,
            "deactivate took {latency:?}, expected well under one interval"
        );
    }

    #[test]
    fn activate_and_deactivate_reset_devices() {
        let scheduler = RoundRobinScheduler::new();
        let d1 = SimDevice::new("d1");
        scheduler.register(d1.clone());

        scheduler.activate().unwrap();
        assert_eq!(d1.resets(), 1);
        scheduler.deactivate().unwrap();
        assert_eq!(d1.resets(), 2);
    }

    #[test]
    fn deregistering_last_device_stops_scheduler() {
        let scheduler = RoundRobinScheduler::new();
        let d1 = SimDevice::new("d1");
        scheduler.register(d1.clone());
        scheduler.activate().unwrap();
        thread::sleep(Duration::from_millis(150));

        assert!(scheduler.deregister(&d1));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(scheduler.is_empty());

        let count = d1.triggers();
        thread::sleep(intervals(2));
        assert_eq!(d1.triggers(), count);
    }

    #[test]
    fn immediate_deregister_after_activate_stops_without_further_triggers() {
        let scheduler = RoundRobinScheduler::new();
        let d1 = SimDevice::new("d1");
        scheduler.register(d1.clone());

        scheduler.activate().unwrap();
        scheduler.deregister(&d1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        let count = d1.triggers();
        thread::sleep(intervals(3));
        assert_eq!(d1.triggers(), count);
        // Activating the now-empty scheduler stays a no-op.
        assert!(scheduler.activate().is_ok());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn deregister_unknown_device_returns_false() {
        let scheduler = RoundRobinScheduler::new();
        scheduler.register(SimDevice::new("d1"));
        let stranger = SimDevice::new("d1");
        assert!(!scheduler.deregister(&stranger));
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn deregister_while_running_keeps_others_polling() {
        let trace = TriggerTrace::new();
        let scheduler = RoundRobinScheduler::new();
        let d1 = SimDevice::traced("d1", &trace);
        let d2 = SimDevice::traced("d2", &trace);
        scheduler.register(d1.clone());
        scheduler.register(d2.clone());

        scheduler.activate().unwrap();
        thread::sleep(Duration::from_millis(50));
        scheduler.deregister(&d2);
        let d2_count = d2.triggers();
        thread::sleep(intervals(3));
        scheduler.deactivate().unwrap();

        assert_eq!(d2.triggers(), d2_count);
        assert!(d1.triggers() >= 2);
        assert!(!scheduler.is_registered(&d2));
    }

    #[test]
    fn disabled_device_is_never_triggered() {
        let scheduler = RoundRobinScheduler::new();
        let d1 = SimDevice::new("d1");
        let d2 = SimDevice::new("d2");
        d2.set_enabled(false);
        scheduler.register(d1.clone());
        scheduler.register(d2.clone());

        scheduler.activate().unwrap();
        // d1 at t=0 and t=200; d2's slots at t=100 and t=300 are skipped.
        thread::sleep(intervals(2) + Duration::from_millis(50));
        scheduler.deactivate().unwrap();

        let n = d1.triggers();
        assert!((1..=2).contains(&n), "expected d1 to fire once or twice, got {n}");
        assert_eq!(d2.triggers(), 0);
    }

    #[test]
    fn three_devices_fire_in_registration_order() {
        let trace = TriggerTrace::new();
        let scheduler = RoundRobinScheduler::new();
        for id in ["d1", "d2", "d3"] {
            scheduler.register(SimDevice::traced(id, &trace));
        }

        scheduler.activate().unwrap();
        thread::sleep(intervals(3) + Duration::from_millis(50));
        scheduler.deactivate().unwrap();

        let fired = trace.snapshot();
        assert!(fired.len() >= 3, "expected a full pass, got {fired:?}");
        for (i, id) in fired.iter().enumerate() {
            assert_eq!(id, ["d1", "d2", "d3"][i % 3], "out of order: {fired:?}");
        }
    }

    #[test]
    fn each_pass_triggers_each_device_once() {
        let trace = TriggerTrace::new();
        let scheduler = RoundRobinScheduler::new();
        let devices: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|id| SimDevice::traced(id, &trace))
            .collect();
        for d in &devices {
            scheduler.register(d.clone());
        }

        scheduler.activate().unwrap();
        thread::sleep(intervals(9) + Duration::from_millis(50));
        scheduler.deactivate().unwrap();

        let counts: Vec<u64> = devices.iter().map(|d| d.triggers()).collect();
        let max = *counts.iter().max().unwrap();
        let min = *counts.iter().min().unwrap();
        assert!(min >= 3, "expected at least three passes, got {counts:?}");
        assert!(max - min <= 1, "unfair rotation: {counts:?}");
        assert!(scheduler.stats().passes >= 2);
    }

    #[test]
    fn device_registered_while_running_joins_rotation() {
        let scheduler = RoundRobinScheduler::new();
        let d1 = SimDevice::new("d1");
        scheduler.register(d1.clone());
        scheduler.activate().unwrap();

        let late = SimDevice::new("late");
        assert!(scheduler.register(late.clone()));
        thread::sleep(intervals(3));
        scheduler.deactivate().unwrap();

        assert!(late.triggers() >= 1);
    }

    #[test]
    fn failing_device_does_not_stop_the_loop() {
        let scheduler = RoundRobinScheduler::new();
        let bad = SimDevice::new("bad");
        bad.set_failing(true);
        let good = SimDevice::new("good");
        scheduler.register(bad.clone());
        scheduler.register(good.clone());

        scheduler.activate().unwrap();
        thread::sleep(intervals(3) + Duration::from_millis(50));
        assert_eq!(scheduler.state(), SchedulerState::Running);
        scheduler.deactivate().unwrap();

        assert!(good.triggers() >= 2);
        let stats = scheduler.stats();
        assert!(stats.failures >= 2);
        assert_eq!(stats.last_fault.unwrap().device, "bad");
    }

    #[test]
    fn panicking_device_surfaces_internal_error_and_recovers() {
        let scheduler = RoundRobinScheduler::new();
        let d1 = SimDevice::new("d1");
        d1.set_panicking(true);
        scheduler.register(d1.clone());

        scheduler.activate().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        match scheduler.activate() {
            Err(PollError::InternalScheduler(reason)) => {
                assert!(reason.contains("simulated driver crash"), "{reason}");
            }
            other => panic!("expected InternalScheduler, got {other:?}"),
        }

        // Reported once; the next activation spawns a fresh worker.
        d1.set_panicking(false);
        scheduler.activate().unwrap();
        thread::sleep(Duration::from_millis(50));
        scheduler.deactivate().unwrap();
        assert!(d1.triggers() >= 1);
        assert_eq!(scheduler.worker_spawns(), 2);
    }

    #[test]
    fn deactivate_reports_worker_death() {
        let scheduler = RoundRobinScheduler::new();
        let d1 = SimDevice::new("d1");
        d1.set_panicking(true);
        scheduler.register(d1.clone());

        scheduler.activate().unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(matches!(
            scheduler.deactivate(),
            Err(PollError::InternalScheduler(_))
        ));
        assert!(scheduler.deactivate().is_ok());
    }

    #[test]
    fn ping_stops_polling_and_fires_once() {
        let scheduler = RoundRobinScheduler::new();
        let echo = SimEchoCounter::new(Duration::from_millis(2));
        let ping = SimPingOutput::wired_to(echo.clone());
        let sensor = Ultrasonic::new("front", ping.clone(), echo);
        scheduler.register(sensor.clone());

        scheduler.activate().unwrap();
        thread::sleep(Duration::from_millis(20));
        let pulses_before = ping.pulses();

        scheduler.ping(sensor.as_ref()).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(ping.pulses(), pulses_before + 1);
        assert!(sensor.is_range_valid());
    }

    #[test]
    fn ultrasonic_bank_produces_ranges() {
        let scheduler = RoundRobinScheduler::new();
        let mut sensors = Vec::new();
        for (id, micros) in [("left", 1000u64), ("right", 3000)] {
            let echo = SimEchoCounter::new(Duration::from_micros(micros));
            let ping = SimPingOutput::wired_to(echo.clone());
            let sensor = Ultrasonic::new(id, ping, echo);
            scheduler.register(sensor.clone());
            sensors.push(sensor);
        }

        scheduler.activate().unwrap();
        thread::sleep(intervals(2) + Duration::from_millis(50));
        // Readings are available while running.
        assert!(sensors.iter().all(|s| s.is_range_valid()));
        assert!(sensors[1].range_inches() > sensors[0].range_inches());

        // And invalidated once polling stops.
        scheduler.deactivate().unwrap();
        assert!(sensors.iter().all(|s| !s.is_range_valid()));
    }

    #[test]
    fn drop_joins_running_worker() {
        let d1 = SimDevice::new("d1");
        {
            let scheduler = RoundRobinScheduler::new();
            scheduler.register(d1.clone());
            scheduler.activate().unwrap();
            thread::sleep(Duration::from_millis(20));
        }
        let count = d1.triggers();
        thread::sleep(intervals(2));
        assert_eq!(d1.triggers(), count);
    }
}
