//! Builds the simulated ultrasonic bank described by the config.

use std::sync::Arc;
use std::time::Duration;

use pingwheel_hal::sim::{SimEchoCounter, SimPingOutput};
use pingwheel_hal::{RoundRobinScheduler, Ultrasonic};

use crate::config::Config;

/// Create one simulated [`Ultrasonic`] per configured sensor and register
/// each with `scheduler`.  Returns the sensors in config order.
pub fn build(cfg: &Config, scheduler: &RoundRobinScheduler) -> Vec<Arc<Ultrasonic>> {
    cfg.sensors
        .iter()
        .map(|sensor| {
            let echo = SimEchoCounter::new(Duration::from_micros(sensor.echo_period_us));
            let ping = SimPingOutput::wired_to(echo.clone());
            let ultrasonic = Ultrasonic::with_units(&sensor.name, ping, echo, cfg.units);
            ultrasonic.set_enabled(sensor.enabled);
            scheduler.register(ultrasonic.clone());
            ultrasonic
        })
        .collect()
}
