use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of the round-robin worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// No pass is in progress; no trigger will fire.
    Stopped,
    /// The worker is walking the registry.
    Running,
    /// A stop was requested and the worker has not yet acknowledged it.
    Stopping,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Stopped => write!(f, "stopped"),
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Unit a rangefinder reports its measurement in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    #[default]
    Inches,
    Millimeters,
}

impl std::fmt::Display for DistanceUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistanceUnit::Inches => write!(f, "in"),
            DistanceUnit::Millimeters => write!(f, "mm"),
        }
    }
}

impl std::str::FromStr for DistanceUnit {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" | "inch" | "inches" => Ok(DistanceUnit::Inches),
            "mm" | "millimeter" | "millimeters" => Ok(DistanceUnit::Millimeters),
            other => Err(PollError::Configuration(format!(
                "unknown distance unit '{other}'"
            ))),
        }
    }
}

/// A trigger failure remembered by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub device: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Counters accumulated by a scheduler over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Full walks of the registry (wrap-arounds to the first device).
    pub passes: u64,
    /// Successful `trigger()` calls.
    pub triggers: u64,
    /// `trigger()` calls that returned an error.
    pub failures: u64,
    pub last_fault: Option<FaultRecord>,
}

/// Error type shared by devices and the scheduler.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PollError {
    #[error("Device Fault on {device}: {details}")]
    DeviceFault { device: String, details: String },

    #[error("Configuration Error: {0}")]
    Configuration(String),

    #[error("Internal Scheduler Error: {0}")]
    InternalScheduler(String),
}

impl PollError {
    /// Convenience constructor for [`PollError::DeviceFault`].
    pub fn device(device: impl Into<String>, details: impl Into<String>) -> Self {
        PollError::DeviceFault {
            device: device.into(),
            details: details.into(),
        }
    }
}
