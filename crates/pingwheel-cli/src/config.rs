//! Poller configuration – reads/writes `~/.pingwheel/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use pingwheel_hal::SchedulerConfig;
use pingwheel_types::{DistanceUnit, PollError};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// One simulated rangefinder in the bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    pub name: String,

    /// Round-trip time of the simulated echo, in microseconds.
    #[serde(default = "default_echo_period_us")]
    pub echo_period_us: u64,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl SensorConfig {
    fn new(name: &str, echo_period_us: u64) -> Self {
        Self {
            name: name.to_string(),
            echo_period_us,
            enabled: true,
        }
    }
}

/// Persisted configuration stored in `~/.pingwheel/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Wait between two consecutive device triggers.  Never below 100 ms.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default)]
    pub units: DistanceUnit,

    /// How often the CLI prints the current ranges.
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,

    #[serde(default)]
    pub log_format: LogFormat,

    // Array of tables: must stay the last field for TOML serialization.
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorConfig>,
}

fn default_interval_ms() -> u64 {
    100
}
fn default_report_interval_ms() -> u64 {
    500
}
fn default_echo_period_us() -> u64 {
    1770
}
fn default_enabled() -> bool {
    true
}
fn default_sensors() -> Vec<SensorConfig> {
    vec![
        SensorConfig::new("front", 1770),
        SensorConfig::new("left", 2950),
        SensorConfig::new("right", 4400),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            units: DistanceUnit::default(),
            report_interval_ms: default_report_interval_ms(),
            log_format: LogFormat::default(),
            sensors: default_sensors(),
        }
    }
}

impl Config {
    /// Scheduler settings derived from this config.
    ///
    /// # Errors
    ///
    /// Returns [`PollError::Configuration`] if `interval_ms` is below the
    /// hardware minimum.
    pub fn scheduler_config(&self) -> Result<SchedulerConfig, PollError> {
        SchedulerConfig::new(Duration::from_millis(self.interval_ms))
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms.max(1))
    }
}

/// Return the path to `~/.pingwheel/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".pingwheel").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
///
/// Environment overrides are not applied here; call [`apply_env_overrides`]
/// on whichever config ends up in use, including the defaults.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `PINGWHEEL_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `PINGWHEEL_INTERVAL_MS` | `interval_ms` |
/// | `PINGWHEEL_UNITS` | `units` |
/// | `PINGWHEEL_REPORT_INTERVAL_MS` | `report_interval_ms` |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("PINGWHEEL_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.interval_ms = ms;
    }
    if let Ok(v) = std::env::var("PINGWHEEL_UNITS")
        && let Ok(units) = v.parse::<DistanceUnit>()
    {
        cfg.units = units;
    }
    if let Ok(v) = std::env::var("PINGWHEEL_REPORT_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.report_interval_ms = ms;
    }
}

/// Save the config to disk, creating `~/.pingwheel/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
