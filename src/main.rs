//! Main entry point for the fan controller

use anyhow::Context;
use clap::Parser;
use log::info;
use penta_fan::{
    args::Args,
    config::{ControllerConfig, LineConfig, SensorConfig},
    cpu_temp::{FallbackSource, SimulatedSource, TemperatureSource, ThermalZoneSource, VcgencmdSource},
    daemon::{FanDaemon, ShutdownSignals},
    fan_control::{Actuator, DryRunLine, FanLine},
    gpio::{GpioLine, PwmLine},
    logging,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Print version and build metadata for binary identity verification
    let pkg_version = env!("CARGO_PKG_VERSION");
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let git_desc = option_env!("GIT_DESC").unwrap_or("unknown");
    let build_time = option_env!("BUILD_TIME").unwrap_or("unknown");
    eprintln!(
        "penta-fan v{} (git {} / {}) built {}",
        pkg_version, git_hash, git_desc, build_time
    );

    let args = Args::parse();

    logging::setup(args.verbose).context("failed to set up logging")?;

    let config = ControllerConfig::from_args(&args).context("invalid configuration")?;
    let sensor = build_sensor(&SensorConfig::from_args(&args));

    let mut signals = ShutdownSignals::install().context("failed to install signal handlers")?;

    let line = build_line(LineConfig::from_args(&args), args.dry_run);
    let actuator = Actuator::open(line, config.mode).context("failed to acquire fan line")?;

    let daemon = FanDaemon::new(config, sensor, actuator);
    daemon
        .run(async move {
            signals.recv().await;
        })
        .await;

    info!("daemon exited from loop");
    Ok(())
}

fn build_sensor(config: &SensorConfig) -> Box<dyn TemperatureSource> {
    if config.simulate {
        info!("Using simulated temperature source");
        return Box::new(SimulatedSource::default());
    }

    Box::new(FallbackSource::platform(
        VcgencmdSource::new(config.vcgencmd.clone(), config.timeout),
        ThermalZoneSource::new(config.thermal_zone.clone()),
    ))
}

fn build_line(config: LineConfig, dry_run: bool) -> Box<dyn FanLine> {
    if dry_run {
        return Box::new(DryRunLine::new());
    }

    match config {
        LineConfig::Gpio { chip, line } => Box::new(GpioLine::new(chip, line)),
        LineConfig::Pwm { chip, channel } => Box::new(PwmLine::new(chip, channel)),
    }
}
