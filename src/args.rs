//! Command line argument parsing for the fan controller
//!
//! Every option can also be supplied through a `PENTA_FAN_*` environment
//! variable, which is how a service unit usually overrides the defaults.

use crate::fan::CurveTable;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Temperature-driven fan controller
///
/// Samples the CPU temperature every interval and drives a GPIO or PWM fan
/// line through a stepped curve with hysteresis. The fan is always switched
/// off when the controller exits.
#[derive(Parser, Debug)]
#[command(name = "penta-fan")]
#[command(about = "Temperature-driven GPIO/PWM fan controller")]
#[command(version)]
pub struct Args {
    /// Increase verbosity (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Seconds between temperature checks
    #[arg(long, env = "PENTA_FAN_INTERVAL", default_value_t = 2.0)]
    pub interval: f64,

    /// How the fan line is driven
    #[arg(long, env = "PENTA_FAN_MODE", value_enum, default_value_t = Mode::Binary)]
    pub mode: Mode,

    /// GPIO chip index (binary mode)
    #[arg(long, env = "PENTA_FAN_CHIP", default_value_t = 0)]
    pub chip: u32,

    /// GPIO line offset on the chip (binary mode)
    #[arg(long, env = "PENTA_FAN_LINE", default_value_t = 27)]
    pub line: u32,

    /// PWM chip index (pwm mode)
    #[arg(long, env = "PENTA_FAN_PWM_CHIP", default_value_t = 0)]
    pub pwm_chip: u32,

    /// PWM channel on the chip (pwm mode)
    #[arg(long, env = "PENTA_FAN_PWM_CHANNEL", default_value_t = 0)]
    pub pwm_channel: u32,

    /// PWM carrier frequency in Hz
    #[arg(long, env = "PENTA_FAN_PWM_FREQUENCY", default_value_t = 25_000)]
    pub pwm_frequency: u32,

    /// Length of the re-arm pulse when PWM restarts, 0 disables it
    #[arg(long, env = "PENTA_FAN_KICK_MS", default_value_t = 200)]
    pub kick_ms: u64,

    /// Duty of the re-arm pulse
    #[arg(long, env = "PENTA_FAN_KICK_DUTY", default_value_t = 100)]
    pub kick_duty: u8,

    /// Binary mode switches the fan on above this duty
    #[arg(long, env = "PENTA_FAN_BINARY_THRESHOLD", default_value_t = 50)]
    pub binary_threshold: u8,

    /// Fan curve as comma separated <temp>:<duty> steps
    #[arg(long, env = "PENTA_FAN_CURVE", default_value_t = CurveTable::quiet())]
    pub curve: CurveTable,

    /// Hysteresis policy
    #[arg(long, env = "PENTA_FAN_HYSTERESIS", value_enum, default_value_t = Hysteresis::Band)]
    pub hysteresis: Hysteresis,

    /// Band policy: degrees below a level's threshold before stepping down
    #[arg(long, env = "PENTA_FAN_HYST", default_value_t = 2.0)]
    pub hyst_margin: f32,

    /// Two-point policy: switch the fan on at this temperature
    #[arg(long, env = "PENTA_FAN_ON_TEMP", default_value_t = 56.0)]
    pub on_temp: f32,

    /// Two-point policy: switch the fan off at this temperature
    #[arg(long, env = "PENTA_FAN_OFF_TEMP", default_value_t = 54.0)]
    pub off_temp: f32,

    /// What to do when the temperature cannot be read
    #[arg(long, env = "PENTA_FAN_ON_SENSOR_FAILURE", value_enum, default_value_t = SensorFailure::Hold)]
    pub on_sensor_failure: SensorFailure,

    /// Thermal zone node used when vcgencmd is unavailable
    #[arg(
        long,
        env = "PENTA_FAN_THERMAL_ZONE",
        default_value = crate::cpu_temp::DEFAULT_THERMAL_ZONE
    )]
    pub thermal_zone: PathBuf,

    /// vcgencmd executable
    #[arg(long, env = "PENTA_FAN_VCGENCMD", default_value = crate::cpu_temp::DEFAULT_VCGENCMD)]
    pub vcgencmd: String,

    /// Upper bound on one sensor read in milliseconds
    #[arg(long, env = "PENTA_FAN_SENSOR_TIMEOUT_MS", default_value_t = 1000)]
    pub sensor_timeout_ms: u64,

    /// Log line writes instead of touching hardware
    #[arg(long)]
    pub dry_run: bool,

    /// Use a simulated temperature instead of the real sensor
    #[arg(long)]
    pub simulate: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// On/off through a plain GPIO line
    Binary,
    /// Variable speed through a hardware PWM channel
    Pwm,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hysteresis {
    /// Per-level band below each curve threshold
    Band,
    /// Single on/off temperature pair
    TwoPoint,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorFailure {
    /// Keep the previous duty
    Hold,
    /// Run the fan at the curve's highest duty
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_match_the_reference_board() {
        let args = Args::try_parse_from(["penta-fan"]).unwrap();

        assert_eq!(args.interval, 2.0);
        assert_eq!(args.mode, Mode::Binary);
        assert_eq!(args.chip, 0);
        assert_eq!(args.line, 27);
        assert_eq!(args.curve, CurveTable::quiet());
        assert_eq!(args.hysteresis, Hysteresis::Band);
        assert_eq!(args.hyst_margin, 2.0);
        assert_eq!(args.on_sensor_failure, SensorFailure::Hold);
        assert!(!args.dry_run);
    }

    #[test]
    fn parses_overrides() {
        let args = Args::try_parse_from([
            "penta-fan",
            "--mode",
            "pwm",
            "--curve",
            "0:0,50:40,70:100",
            "--hysteresis",
            "two-point",
            "--on-sensor-failure",
            "full",
            "-vv",
        ])
        .unwrap();

        assert_eq!(args.mode, Mode::Pwm);
        assert_eq!(args.curve.max_duty(), 100);
        assert_eq!(args.curve.duty_for(55.0), 40);
        assert_eq!(args.hysteresis, Hysteresis::TwoPoint);
        assert_eq!(args.on_sensor_failure, SensorFailure::Full);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn rejects_a_broken_curve() {
        assert!(Args::try_parse_from(["penta-fan", "--curve", "60:50,50:60"]).is_err());
    }
}
