//! Ultrasonic rangefinder built on two digital-I/O seams.
//!
//! A ping is a short pulse on the [`PingOutput`] line; the sensor answers by
//! holding its echo line high for the acoustic round-trip time, which an
//! [`EchoCounter`] in semi-period mode measures.  Range is half the round
//! trip multiplied by the speed of sound.
//!
//! Sensors sharing a space interfere with each other, so they are normally
//! fired one at a time by a
//! [`RoundRobinScheduler`][crate::scheduler::RoundRobinScheduler].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use pingwheel_types::{DistanceUnit, PollError};

use crate::device::Device;

/// Width of the trigger pulse.
pub const PING_PULSE_WIDTH: Duration = Duration::from_micros(10);

pub const SPEED_OF_SOUND_INCHES_PER_SEC: f64 = 1130.0 * 12.0;

const MM_PER_INCH: f64 = 25.4;

/// Digital output that starts a ping.
pub trait PingOutput: Send + Sync {
    /// Drive the line high for `width`, then low again.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::DeviceFault`] if the pulse cannot be generated.
    fn pulse(&self, width: Duration) -> Result<(), PollError>;
}

/// Semi-period counter on the echo line.
pub trait EchoCounter: Send + Sync {
    /// Edges seen since the last reset.
    fn count(&self) -> u32;

    /// Duration of the most recent high semi-period.
    fn period(&self) -> Duration;

    fn reset(&self);
}

/// An ultrasonic rangefinder (SRF04-style ping/echo pair).
pub struct Ultrasonic {
    id: String,
    ping: Arc<dyn PingOutput>,
    echo: Arc<dyn EchoCounter>,
    enabled: AtomicBool,
    units: Mutex<DistanceUnit>,
}

impl Ultrasonic {
    /// Create an enabled sensor reporting in inches.
    pub fn new(
        id: impl Into<String>,
        ping: Arc<dyn PingOutput>,
        echo: Arc<dyn EchoCounter>,
    ) -> Arc<Self> {
        Self::with_units(id, ping, echo, DistanceUnit::Inches)
    }

    /// Create an enabled sensor reporting in `units`.
    pub fn with_units(
        id: impl Into<String>,
        ping: Arc<dyn PingOutput>,
        echo: Arc<dyn EchoCounter>,
        units: DistanceUnit,
    ) -> Arc<Self> {
        echo.reset();
        Arc::new(Self {
            id: id.into(),
            ping,
            echo,
            enabled: AtomicBool::new(true),
            units: Mutex::new(units),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Include or exclude this sensor from round-robin pinging.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// A range is valid once both edges of an echo have been counted.
    pub fn is_range_valid(&self) -> bool {
        self.echo.count() > 1
    }

    /// Range in inches, or `0.0` when no echo has completed yet.
    pub fn range_inches(&self) -> f64 {
        if !self.is_range_valid() {
            return 0.0;
        }
        self.echo.period().as_secs_f64() * SPEED_OF_SOUND_INCHES_PER_SEC / 2.0
    }

    /// Range in millimetres, or `0.0` when no echo has completed yet.
    pub fn range_mm(&self) -> f64 {
        self.range_inches() * MM_PER_INCH
    }

    pub fn distance_units(&self) -> DistanceUnit {
        *self.units.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_distance_units(&self, units: DistanceUnit) {
        *self.units.lock().unwrap_or_else(PoisonError::into_inner) = units;
    }

    /// Range in the configured [`DistanceUnit`].
    pub fn measure(&self) -> f64 {
        match self.distance_units() {
            DistanceUnit::Inches => self.range_inches(),
            DistanceUnit::Millimeters => self.range_mm(),
        }
    }
}

impl Device for Ultrasonic {
    fn id(&self) -> &str {
        &self.id
    }

    fn enabled(&self) -> bool {
        self.is_enabled()
    }

    fn trigger(&self) -> Result<(), PollError> {
        self.ping
            .pulse(PING_PULSE_WIDTH)
            .map_err(|e| PollError::device(&self.id, e.to_string()))
    }

    fn reset(&self) {
        self.echo.reset();
    }
}
