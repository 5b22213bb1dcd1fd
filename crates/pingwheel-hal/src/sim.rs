//! In-process simulation doubles for tests and the CLI demo.
//!
//! Nothing here touches real hardware.  The doubles record what was asked of
//! them so tests can assert on trigger counts, ordering, and reset behaviour.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use pingwheel_hal::sim::{SimEchoCounter, SimPingOutput};
//! use pingwheel_hal::ultrasonic::Ultrasonic;
//! use pingwheel_hal::device::Device;
//!
//! let echo = SimEchoCounter::new(Duration::from_micros(1770));
//! let ping = SimPingOutput::wired_to(echo.clone());
//! let sensor = Ultrasonic::new("front", ping, echo);
//!
//! sensor.trigger().unwrap();
//! assert!(sensor.is_range_valid());
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use pingwheel_types::PollError;

use crate::device::Device;
use crate::ultrasonic::{EchoCounter, PingOutput};

// ────────────────────────────────────────────────────────────────────────────
// Trigger trace
// ────────────────────────────────────────────────────────────────────────────

/// Shared, append-only log of device ids in the order they were triggered.
#[derive(Clone, Default)]
pub struct TriggerTrace(Arc<Mutex<Vec<String>>>);

impl TriggerTrace {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, id: &str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id.to_string());
    }

    /// Copy of everything recorded so far.
    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Counting device
// ────────────────────────────────────────────────────────────────────────────

/// A simulated device that counts triggers and resets.
///
/// Can be switched into a failing mode (every trigger returns
/// [`PollError::DeviceFault`]) or a panicking mode (every trigger panics),
/// which exercises the scheduler's error paths.
pub struct SimDevice {
    id: String,
    enabled: AtomicBool,
    failing: AtomicBool,
    panicking: AtomicBool,
    triggers: AtomicU64,
    resets: AtomicU64,
    trace: Option<TriggerTrace>,
}

impl SimDevice {
    /// Create an enabled device with the given identifier.
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Self::build(id.into(), None)
    }

    /// Create an enabled device that also appends its id to `trace` on every
    /// successful trigger.
    pub fn traced(id: impl Into<String>, trace: &TriggerTrace) -> Arc<Self> {
        Self::build(id.into(), Some(trace.clone()))
    }

    fn build(id: String, trace: Option<TriggerTrace>) -> Arc<Self> {
        Arc::new(Self {
            id,
            enabled: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            panicking: AtomicBool::new(false),
            triggers: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            trace,
        })
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }

    /// Number of successful triggers so far.
    pub fn triggers(&self) -> u64 {
        self.triggers.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }
}

impl Device for SimDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn trigger(&self) -> Result<(), PollError> {
        if self.panicking.load(Ordering::SeqCst) {
            panic!("simulated driver crash in '{}'", self.id);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(PollError::device(&self.id, "simulated trigger fault"));
        }
        self.triggers.fetch_add(1, Ordering::SeqCst);
        if let Some(trace) = &self.trace {
            trace.record(&self.id);
        }
        Ok(())
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Echo counter
// ────────────────────────────────────────────────────────────────────────────

/// A simulated semi-period counter on an echo line.
///
/// The echo period is fixed at construction (and adjustable with
/// [`SimEchoCounter::set_period`]); every [`SimEchoCounter::complete_echo`]
/// registers the rising and falling edge of one echo pulse.
pub struct SimEchoCounter {
    period_nanos: AtomicU64,
    edges: AtomicU32,
}

impl SimEchoCounter {
    pub fn new(period: Duration) -> Arc<Self> {
        Arc::new(Self {
            period_nanos: AtomicU64::new(period.as_nanos() as u64),
            edges: AtomicU32::new(0),
        })
    }

    pub fn set_period(&self, period: Duration) {
        self.period_nanos
            .store(period.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Simulate a full echo pulse arriving (two edges).
    pub fn complete_echo(&self) {
        self.edges.fetch_add(2, Ordering::SeqCst);
    }
}

impl EchoCounter for SimEchoCounter {
    fn count(&self) -> u32 {
        self.edges.load(Ordering::SeqCst)
    }

    fn period(&self) -> Duration {
        Duration::from_nanos(self.period_nanos.load(Ordering::SeqCst))
    }

    fn reset(&self) {
        self.edges.store(0, Ordering::SeqCst);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Ping output
// ────────────────────────────────────────────────────────────────────────────

/// A simulated digital output that records trigger pulses.
///
/// When wired to a [`SimEchoCounter`] every pulse immediately produces an
/// echo on it.
pub struct SimPingOutput {
    echo: Option<Arc<SimEchoCounter>>,
    pulses: AtomicU64,
    last_width_nanos: AtomicU64,
    fault: Mutex<Option<String>>,
}

impl SimPingOutput {
    /// An output with nothing listening on the other end.
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// An output whose pulses complete an echo on `echo`.
    pub fn wired_to(echo: Arc<SimEchoCounter>) -> Arc<Self> {
        Self::build(Some(echo))
    }

    fn build(echo: Option<Arc<SimEchoCounter>>) -> Arc<Self> {
        Arc::new(Self {
            echo,
            pulses: AtomicU64::new(0),
            last_width_nanos: AtomicU64::new(0),
            fault: Mutex::new(None),
        })
    }

    /// Make every subsequent pulse fail with `details` (`None` clears it).
    pub fn set_fault(&self, details: Option<&str>) {
        *self.fault.lock().unwrap_or_else(PoisonError::into_inner) = details.map(str::to_string);
    }

    pub fn pulses(&self) -> u64 {
        self.pulses.load(Ordering::SeqCst)
    }

    pub fn last_width(&self) -> Duration {
        Duration::from_nanos(self.last_width_nanos.load(Ordering::SeqCst))
    }
}

impl PingOutput for SimPingOutput {
    fn pulse(&self, width: Duration) -> Result<(), PollError> {
        if let Some(details) = self
            .fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
        {
            return Err(PollError::device("sim_ping_output", details));
        }
        self.pulses.fetch_add(1, Ordering::SeqCst);
        self.last_width_nanos
            .store(width.as_nanos() as u64, Ordering::SeqCst);
        if let Some(echo) = &self.echo {
            echo.complete_echo();
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
