//! Validated controller configuration

use crate::args::{Args, Hysteresis, Mode, SensorFailure};
use crate::errors::{FanError, Result};
use crate::fan::{CurveTable, MAX_DUTY};
use crate::fan_control::{ActuatorMode, Kick};
use crate::hysteresis::HysteresisPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Default time between ticks
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);

/// What the loop does with a tick whose temperature could not be read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SensorFailurePolicy {
    /// Keep whatever duty was last applied
    #[default]
    HoldLast,
    /// Run at the curve's highest duty until readings return
    FullDuty,
}

/// Where the fan is wired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineConfig {
    Gpio { chip: u32, line: u32 },
    Pwm { chip: u32, channel: u32 },
}

/// Where the temperature comes from
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    pub vcgencmd: String,
    pub thermal_zone: PathBuf,
    pub timeout: Duration,
    pub simulate: bool,
}

/// Everything the control loop needs, checked for consistency
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub interval: Duration,
    pub curve: CurveTable,
    pub policy: HysteresisPolicy,
    pub mode: ActuatorMode,
    pub on_sensor_failure: SensorFailurePolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            curve: CurveTable::quiet(),
            policy: HysteresisPolicy::default(),
            mode: ActuatorMode::default(),
            on_sensor_failure: SensorFailurePolicy::default(),
        }
    }
}

impl ControllerConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        if !args.interval.is_finite() || args.interval <= 0.0 {
            return Err(FanError::Config(format!(
                "interval must be a positive number of seconds, got {}",
                args.interval
            )));
        }

        let interval = Duration::try_from_secs_f64(args.interval).map_err(|_| {
            FanError::Config(format!("interval of {} seconds is too large", args.interval))
        })?;

        let policy = match args.hysteresis {
            Hysteresis::Band => {
                if !args.hyst_margin.is_finite() || args.hyst_margin < 0.0 {
                    return Err(FanError::Config(format!(
                        "hysteresis margin must be zero or more, got {}",
                        args.hyst_margin
                    )));
                }
                HysteresisPolicy::Band {
                    margin: args.hyst_margin,
                }
            }
            Hysteresis::TwoPoint => {
                // Negated so NaN fails the check too.
                if !(args.off_temp < args.on_temp) {
                    return Err(FanError::Config(format!(
                        "off temperature ({}°C) must be below on temperature ({}°C)",
                        args.off_temp, args.on_temp
                    )));
                }
                HysteresisPolicy::TwoPoint {
                    on: args.on_temp,
                    off: args.off_temp,
                }
            }
        };

        let mode = match args.mode {
            Mode::Binary => {
                if args.binary_threshold > MAX_DUTY {
                    return Err(FanError::Config(format!(
                        "binary threshold must be 0-100%, got {}",
                        args.binary_threshold
                    )));
                }
                ActuatorMode::Binary {
                    threshold: args.binary_threshold,
                }
            }
            Mode::Pwm => {
                if args.pwm_frequency == 0 {
                    return Err(FanError::Config("PWM frequency must be above 0 Hz".to_string()));
                }
                if args.kick_duty > MAX_DUTY {
                    return Err(FanError::Config(format!(
                        "kick duty must be 0-100%, got {}",
                        args.kick_duty
                    )));
                }
                let kick = (args.kick_ms > 0).then(|| Kick {
                    duty: args.kick_duty,
                    duration: Duration::from_millis(args.kick_ms),
                });
                ActuatorMode::Pwm {
                    frequency_hz: args.pwm_frequency,
                    kick,
                }
            }
        };

        let on_sensor_failure = match args.on_sensor_failure {
            SensorFailure::Hold => SensorFailurePolicy::HoldLast,
            SensorFailure::Full => SensorFailurePolicy::FullDuty,
        };

        Ok(Self {
            interval,
            curve: args.curve.clone(),
            policy,
            mode,
            on_sensor_failure,
        })
    }
}

impl LineConfig {
    pub fn from_args(args: &Args) -> Self {
        match args.mode {
            Mode::Binary => Self::Gpio {
                chip: args.chip,
                line: args.line,
            },
            Mode::Pwm => Self::Pwm {
                chip: args.pwm_chip,
                channel: args.pwm_channel,
            },
        }
    }
}

impl SensorConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            vcgencmd: args.vcgencmd.clone(),
            thermal_zone: args.thermal_zone.clone(),
            timeout: Duration::from_millis(args.sensor_timeout_ms.max(1)),
            simulate: args.simulate,
        }
    }
}
