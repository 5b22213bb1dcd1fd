//! Generic `Device` trait for anything the round-robin scheduler can poll
//! (ultrasonic rangefinders, beacons, any sensor that must be stimulated
//! before it produces a reading).

use pingwheel_types::PollError;

/// A pollable hardware device.
///
/// Devices are owned by the caller and shared with a
/// [`RoundRobinScheduler`][crate::scheduler::RoundRobinScheduler] as
/// `Arc<dyn Device>`.  Identity inside the scheduler is the `Arc` allocation,
/// not [`Device::id`], so two distinct devices may share a label.
///
/// All methods take `&self`; implementations keep their mutable state behind
/// atomics or locks.  Implementations must not call back into the scheduler
/// from any of these methods.
pub trait Device: Send + Sync {
    /// Human-readable label used in logs and fault records, e.g. `"front"`.
    fn id(&self) -> &str;

    /// Whether the device currently wants to be triggered.
    ///
    /// Disabled devices keep their place in the rotation but are skipped.
    fn enabled(&self) -> bool;

    /// Fire the device's stimulus.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::DeviceFault`] if the stimulus could not be issued.
    fn trigger(&self) -> Result<(), PollError>;

    /// Discard any accumulated measurement so stale data is never reported.
    fn reset(&self);
}
