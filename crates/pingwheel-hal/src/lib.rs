//! `pingwheel-hal` – Devices and the round-robin poller
//!
//! # Modules
//!
//! - [`device`] – [`Device`][device::Device]: the capability every pollable
//!   device implements (`trigger`, `enabled`, `reset`).
//! - [`registry`] – [`DeviceRegistry`][registry::DeviceRegistry]: ordered,
//!   duplicate-free device set whose traversal cursor survives removals.
//! - [`scheduler`] – [`RoundRobinScheduler`][scheduler::RoundRobinScheduler]:
//!   one background worker firing devices one at a time with a fixed,
//!   cancellable inter-device wait and a synchronous stop.
//! - [`ultrasonic`] – [`Ultrasonic`][ultrasonic::Ultrasonic]: ping/echo
//!   rangefinder built on the [`PingOutput`][ultrasonic::PingOutput] and
//!   [`EchoCounter`][ultrasonic::EchoCounter] seams.
//! - [`sim`] – in-process doubles for tests and the CLI demo.

pub mod device;
pub mod registry;
pub mod scheduler;
pub mod sim;
pub mod ultrasonic;

pub use device::Device;
pub use registry::DeviceRegistry;
pub use scheduler::{RoundRobinScheduler, SchedulerConfig, DEFAULT_INTERVAL, MIN_INTERVAL};
pub use ultrasonic::{EchoCounter, PingOutput, Ultrasonic};
