//! `pingwheel-cli` – round-robin ultrasonic poller demo
//!
//! 1. Loads `~/.pingwheel/config.toml`, writing the defaults on first run,
//!    then applies any `PINGWHEEL_*` environment overrides.
//! 2. Builds the simulated sensor bank and starts round-robin polling.
//! 3. Prints the latest range of every sensor once per report interval.
//! 4. On **Ctrl-C** stops polling synchronously and prints the run
//!    statistics as JSON.

mod bank;
mod config;
mod telemetry;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use pingwheel_hal::{Device, RoundRobinScheduler, SchedulerConfig, Ultrasonic};
use tracing::{error, info, warn};

fn main() {
    let mut cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  Wrote default config to {}",
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Config error".red(), e),
            }
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);

    let _guard = telemetry::init_tracing("pingwheel", cfg.log_format);

    let scheduler_cfg = cfg.scheduler_config().unwrap_or_else(|e| {
        warn!(error = %e, "using the default inter-device interval");
        SchedulerConfig::default()
    });
    let scheduler = RoundRobinScheduler::with_config(scheduler_cfg);
    let sensors = bank::build(&cfg, &scheduler);

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; stop the process another way");
    }

    if let Err(e) = scheduler.activate() {
        error!(error = %e, "could not start round-robin polling");
        std::process::exit(1);
    }

    println!(
        "  Polling {} sensor(s) every {} ms. Press {} to stop.\n",
        sensors.len(),
        scheduler.interval().as_millis(),
        "Ctrl-C".bold()
    );

    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(cfg.report_interval());
        if !scheduler.is_active() {
            warn!(state = %scheduler.state(), "polling is no longer running");
            break;
        }
        println!("{}", format_ranges(&sensors));
    }

    println!();
    match scheduler.deactivate() {
        Ok(()) => info!("stopped cleanly"),
        Err(e) => error!(error = %e, "worker fault detected during shutdown"),
    }

    match serde_json::to_string_pretty(&scheduler.stats()) {
        Ok(json) => println!("{json}"),
        Err(e) => error!(error = %e, "could not serialise run statistics"),
    }
}

fn format_ranges(sensors: &[Arc<Ultrasonic>]) -> String {
    sensors
        .iter()
        .map(|s| {
            let label = format!("{:>8}", s.id()).bold();
            let value = if !s.is_enabled() {
                "disabled".dimmed().to_string()
            } else if s.is_range_valid() {
                format!("{:>8.2} {}", s.measure(), s.distance_units())
                    .green()
                    .to_string()
            } else {
                format!("{:>11}", "--").yellow().to_string()
            };
            format!("{label} {value}")
        })
        .collect::<Vec<_>>()
        .join("  ")
}
