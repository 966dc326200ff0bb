//! Lightpen daemon entry point.
//!
//! Binds the lightpen or timestamp device to a simulated edge source, runs
//! the consumer or the speed measurement loop, and tears the device down on
//! SIGTERM/SIGINT. SIGHUP dumps diagnostics.

mod consumer;
mod diagnostics;
mod signals;
mod speedometer;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lightpen_common::{Clock, DriverConfig, ManualClock, SystemClock};
use lightpen_core::{
    FrameSimulator, LightpenDevice, ReadMode, SimulatedEdgeSource, TimestampDevice,
    WheelSimulator,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::consumer::{run_consumer, ConsumerOptions, OutputFormat};
use crate::diagnostics::{format_prometheus_metrics, DiagnosticsCollector, DiagnosticsSnapshot};
use crate::signals::{SignalHandler, SignalKind};
use crate::speedometer::run_speedometer;

/// Lightpen daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "lightpend",
    about = "GPIO lightpen daemon - edge timing, exclusive sample channels and speed measurement",
    version,
    long_about = None
)]
struct Args {
    /// Path to a driver configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info", global = true)]
    log_level: String,

    /// Stop after this long (e.g. "10s", "2m").
    #[arg(long, value_parser = humantime::parse_duration, global = true)]
    duration: Option<Duration>,

    /// Print Prometheus metrics to stdout on exit.
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Bind the lightpen device and print decoded samples.
    Run {
        /// Use non-blocking reads gated by poll.
        #[arg(long)]
        non_blocking: bool,

        /// Output encoding.
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Stop after this many samples (0 = until shutdown).
        #[arg(long, default_value = "0")]
        max_samples: u64,

        /// Emit simulated frames as fast as possible.
        #[arg(long)]
        unpaced: bool,
    },

    /// Bind the timestamp device and print pair speeds.
    Speedometer {
        /// Fire the second sensor of each pair first.
        #[arg(long)]
        swapped: bool,

        /// Stop after this many readings (0 = until shutdown).
        #[arg(long, default_value = "0")]
        max_readings: u64,

        /// Emit simulated revolutions as fast as possible.
        #[arg(long)]
        unpaced: bool,
    },

    /// Validate the configuration and print it as TOML.
    CheckConfig,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "starting lightpen daemon");

    let config = load_config(&args)?;

    let result = match &args.command {
        Command::Run {
            non_blocking,
            format,
            max_samples,
            unpaced,
        } => {
            let options = ConsumerOptions {
                mode: if *non_blocking {
                    ReadMode::NonBlocking
                } else {
                    ReadMode::Blocking
                },
                format: *format,
                max_samples: *max_samples,
                poll_timeout: config.speedometer.poll_timeout,
            };
            run_lightpen(&config, &options, !unpaced, &args)
        }
        Command::Speedometer {
            swapped,
            max_readings,
            unpaced,
        } => run_wheel(&config, *swapped, *max_readings, !unpaced, &args),
        Command::CheckConfig => check_config(&config),
    };

    if let Err(e) = &result {
        error!(error = %e, "daemon failed");
    }
    result
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "lightpen_daemon={level},lightpend={level},lightpen_core={level},lightpen_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `LIGHTPEN_CONFIG_PATH` environment variable
/// 3. `/etc/lightpen/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<DriverConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "loading config from command-line argument");
        return DriverConfig::from_file(config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()));
    }

    if let Ok(env_path) = std::env::var("LIGHTPEN_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "loading config from LIGHTPEN_CONFIG_PATH");
            return DriverConfig::from_file(&config_path).with_context(|| {
                format!("failed to load config from LIGHTPEN_CONFIG_PATH={env_path}")
            });
        }
        warn!(
            path = %env_path,
            "LIGHTPEN_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for path in ["/etc/lightpen/config.toml", "config/default.toml"] {
        let config_path = PathBuf::from(path);
        if config_path.exists() {
            info!(?config_path, "loading config file");
            return DriverConfig::from_file(&config_path)
                .with_context(|| format!("failed to load config from {path}"));
        }
    }

    info!("no config file found, using built-in defaults");
    Ok(DriverConfig::default())
}

fn check_config(config: &DriverConfig) -> Result<()> {
    config.validate().context("configuration is invalid")?;
    let text = config.to_toml().context("failed to render configuration")?;
    print!("{text}");
    Ok(())
}

/// Simulated time starts at the wall clock and is advanced by the simulator.
fn simulated_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(SystemClock.now()))
}

/// Raise `on_timeout` once `duration` elapses.
fn spawn_deadline(duration: Option<Duration>, on_timeout: impl FnOnce() + Send + 'static) {
    let Some(duration) = duration else {
        return;
    };
    let spawned = std::thread::Builder::new()
        .name("lightpen-deadline".into())
        .spawn(move || {
            std::thread::sleep(duration);
            info!(?duration, "run duration elapsed");
            on_timeout();
        });
    if let Err(e) = spawned {
        warn!(error = %e, "failed to start deadline timer, running until signalled");
    }
}

fn join_simulator(stop: &AtomicBool, handle: JoinHandle<()>) -> Result<()> {
    stop.store(true, Ordering::Release);
    handle
        .join()
        .map_err(|_| anyhow::anyhow!("simulator thread panicked"))
}

fn report(snapshot: &DiagnosticsSnapshot, args: &Args, signals: &SignalHandler) {
    info!(
        accepted = snapshot.counters.accepted,
        rejected = snapshot.counters.rejected(),
        signals = signals.state().signal_count(),
        uptime_secs = snapshot.uptime.as_secs(),
        final_state = %snapshot.state,
        health = %snapshot.health,
        "daemon shutdown complete"
    );
    if args.metrics {
        print!("{}", format_prometheus_metrics(snapshot));
    }
}

fn dump(snapshot: &DiagnosticsSnapshot) {
    match serde_json::to_string(snapshot) {
        Ok(json) => info!(diagnostics = %json, "diagnostics dump"),
        Err(e) => warn!(error = %e, "failed to serialize diagnostics"),
    }
}

/// Bind the lightpen device to a frame simulator and consume samples.
fn run_lightpen(
    config: &DriverConfig,
    options: &ConsumerOptions,
    paced: bool,
    args: &Args,
) -> Result<()> {
    let clock = simulated_clock();
    let source = SimulatedEdgeSource::new();
    let mut sim = FrameSimulator::new(
        Arc::clone(&source),
        Arc::clone(&clock),
        config.lines.clone(),
        config.timing.line_length,
        config.simulation.clone(),
    );
    let device = Arc::new(
        LightpenDevice::bind(config, sim.button(), sim.odd_even(), clock)
            .context("failed to bind lightpen device")?,
    );
    let collector = Arc::new(DiagnosticsCollector::new());

    let signals = {
        let device = Arc::clone(&device);
        let collector = Arc::clone(&collector);
        SignalHandler::install(Box::new(move |kind: SignalKind| {
            if kind.is_shutdown() {
                device.request_shutdown();
            } else {
                dump(&collector.snapshot(
                    device.state(),
                    device.counters().snapshot(),
                    device.channel_states(),
                    None,
                ));
            }
        }))
        .context("failed to set up signal handlers")?
    };
    {
        let device = Arc::clone(&device);
        spawn_deadline(args.duration, move || device.request_shutdown());
    }

    device
        .start(source.as_ref())
        .context("failed to start lightpen device")?;

    let stop = Arc::new(AtomicBool::new(false));
    let sim_thread = {
        let stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("lightpen-sim".into())
            .spawn(move || sim.run(&stop, paced))
            .context("failed to start frame simulator")?
    };

    let consumed = {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        run_consumer(&device, options, &mut out)
    };

    info!("shutting down");
    device.request_shutdown();
    join_simulator(&stop, sim_thread)?;
    if let Err(e) = device.shutdown(source.as_ref()) {
        warn!(error = %e, "lightpen teardown incomplete");
    }

    let consumed = consumed?;
    info!(samples = consumed, "consumer finished");
    report(
        &collector.snapshot(
            device.state(),
            device.counters().snapshot(),
            device.channel_states(),
            None,
        ),
        args,
        &signals,
    );
    Ok(())
}

/// Bind the timestamp device to a wheel simulator and measure speed.
fn run_wheel(
    config: &DriverConfig,
    swapped: bool,
    max_readings: u64,
    paced: bool,
    args: &Args,
) -> Result<()> {
    let clock = simulated_clock();
    let source = SimulatedEdgeSource::new();
    let device = Arc::new(
        TimestampDevice::bind(config, Arc::clone(&clock) as Arc<dyn Clock>)
            .context("failed to bind timestamp device")?,
    );
    let collector = Arc::new(DiagnosticsCollector::new());

    let signals = {
        let device = Arc::clone(&device);
        let collector = Arc::clone(&collector);
        SignalHandler::install(Box::new(move |kind: SignalKind| {
            if kind.is_shutdown() {
                device.request_shutdown();
            } else {
                dump(&collector.snapshot(
                    device.state(),
                    device.counters().snapshot(),
                    device.channel_states(),
                    None,
                ));
            }
        }))
        .context("failed to set up signal handlers")?
    };
    {
        let device = Arc::clone(&device);
        spawn_deadline(args.duration, move || device.request_shutdown());
    }

    device
        .start(source.as_ref())
        .context("failed to start timestamp device")?;

    let stop = Arc::new(AtomicBool::new(false));
    let sim_thread = {
        let stop = Arc::clone(&stop);
        let mut wheel = WheelSimulator::new(
            Arc::clone(&source),
            clock,
            config.timestamp.lines.clone(),
            &config.simulation,
        )
        .swapped(swapped);
        std::thread::Builder::new()
            .name("lightpen-wheel".into())
            .spawn(move || wheel.run(&stop, paced))
            .context("failed to start wheel simulator")?
    };

    let meter = {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        run_speedometer(&device, &config.speedometer, max_readings, &mut out)
    };

    info!("shutting down");
    device.request_shutdown();
    join_simulator(&stop, sim_thread)?;
    if let Err(e) = device.shutdown(source.as_ref()) {
        warn!(error = %e, "timestamp teardown incomplete");
    }

    let meter = meter?;
    report(
        &collector.snapshot(
            device.state(),
            device.counters().snapshot(),
            device.channel_states(),
            Some(meter.metrics()),
        ),
        args,
        &signals,
    );
    Ok(())
}
