//! Fan actuation: turning a duty percentage into line writes

use crate::errors::{ActuatorError, ResourceError};
use crate::fan::MAX_DUTY;
use log::{debug, error, info, warn};
use std::fmt;
use std::thread;
use std::time::Duration;

/// Default PWM carrier frequency (standard 4-pin fan PWM)
pub const DEFAULT_PWM_FREQUENCY: u32 = 25_000;
/// Binary mode switches the fan on above this duty
pub const DEFAULT_BINARY_THRESHOLD: u8 = 50;

/// The hardware operations the actuator needs from a fan line.
///
/// Implementations own the underlying GPIO or PWM resource from
/// `claim_output` until `release`.
pub trait FanLine {
    /// Take exclusive ownership of the line as an output, driven low
    fn claim_output(&mut self) -> Result<(), ResourceError>;

    /// Drive the line to a logic level, bypassing any PWM configuration
    fn write_level(&mut self, high: bool) -> Result<(), ActuatorError>;

    /// Generate PWM at `frequency_hz` with `duty` percent on-time
    fn configure_pwm(&mut self, frequency_hz: u32, duty: u8) -> Result<(), ActuatorError>;

    /// Stop PWM generation. A no-op for lines that never ran PWM.
    fn stop_pwm(&mut self) -> Result<(), ActuatorError>;

    /// Give the line back to the system
    fn release(&mut self) -> Result<(), ResourceError>;

    /// Where this line lives, for log lines
    fn describe(&self) -> String;
}

impl<T: FanLine + ?Sized> FanLine for Box<T> {
    fn claim_output(&mut self) -> Result<(), ResourceError> {
        (**self).claim_output()
    }

    fn write_level(&mut self, high: bool) -> Result<(), ActuatorError> {
        (**self).write_level(high)
    }

    fn configure_pwm(&mut self, frequency_hz: u32, duty: u8) -> Result<(), ActuatorError> {
        (**self).configure_pwm(frequency_hz, duty)
    }

    fn stop_pwm(&mut self) -> Result<(), ActuatorError> {
        (**self).stop_pwm()
    }

    fn release(&mut self) -> Result<(), ResourceError> {
        (**self).release()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Short full-power pulse issued before PWM restarts.
///
/// Platform quirk: some PWM blocks stay idle after being disabled unless
/// they see a strong duty first. This is not part of the control algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kick {
    pub duty: u8,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorMode {
    /// On/off only: high when the duty exceeds `threshold`
    Binary { threshold: u8 },
    /// Hardware PWM at a fixed carrier frequency
    Pwm { frequency_hz: u32, kick: Option<Kick> },
}

impl Default for ActuatorMode {
    fn default() -> Self {
        Self::Binary {
            threshold: DEFAULT_BINARY_THRESHOLD,
        }
    }
}

impl fmt::Display for ActuatorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary { threshold } => write!(f, "binary (on above {}%)", threshold),
            Self::Pwm { frequency_hz, kick } => {
                write!(f, "pwm at {} Hz", frequency_hz)?;
                if let Some(kick) = kick {
                    write!(f, ", kick {}% for {:?}", kick.duty, kick.duration)?;
                }
                Ok(())
            }
        }
    }
}

/// Exclusive handle on the fan line.
///
/// Dropping the handle without calling [`Actuator::shutdown`] still turns
/// the fan off and releases the line, so unwinding never leaves it running.
pub struct Actuator<L: FanLine> {
    line: L,
    mode: ActuatorMode,
    pwm_running: bool,
    released: bool,
}

impl<L: FanLine> Actuator<L> {
    /// Claim `line` as an output and wrap it
    pub fn open(mut line: L, mode: ActuatorMode) -> Result<Self, ResourceError> {
        line.claim_output()?;
        info!("Claimed fan line {} in {} mode", line.describe(), mode);

        Ok(Self {
            line,
            mode,
            pwm_running: false,
            released: false,
        })
    }

    pub fn mode(&self) -> ActuatorMode {
        self.mode
    }

    pub fn line(&self) -> &L {
        &self.line
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Drive the fan at `duty` percent (clamped to 0..=100).
    ///
    /// Repeating a duty re-issues the same writes and is never an error.
    pub fn apply(&mut self, duty: u8) -> Result<(), ActuatorError> {
        if self.released {
            return Err(ActuatorError::NotClaimed);
        }

        let duty = duty.min(MAX_DUTY);
        match self.mode {
            ActuatorMode::Binary { threshold } => {
                let high = duty > threshold;
                debug!("Fan line {} -> {}", self.line.describe(), u8::from(high));
                self.line.write_level(high)
            }
            ActuatorMode::Pwm { .. } if duty == 0 => {
                // Some PWM blocks leave residual voltage at 0% duty.
                // Both writes are attempted even if the first one fails.
                self.pwm_running = false;
                let stop = self.line.stop_pwm();
                let low = self.line.write_level(false);
                stop.and(low)
            }
            ActuatorMode::Pwm { frequency_hz, kick } => {
                if !self.pwm_running {
                    if let Some(kick) = kick {
                        debug!("Kicking PWM at {}% for {:?}", kick.duty, kick.duration);
                        self.line.configure_pwm(frequency_hz, kick.duty.min(MAX_DUTY))?;
                        thread::sleep(kick.duration);
                    }
                }
                self.line.configure_pwm(frequency_hz, duty)?;
                self.pwm_running = true;
                Ok(())
            }
        }
    }

    /// Turn the fan off and release the line
    pub fn shutdown(mut self) {
        self.shut_off();
    }

    fn shut_off(&mut self) {
        if self.released {
            return;
        }

        if let Err(e) = self.apply(0) {
            warn!("Failed to stop fan cleanly: {}; forcing line low", e);
            if let Err(e) = self.line.write_level(false) {
                error!("Failed to force fan line {} low: {}", self.line.describe(), e);
            }
        }
        self.pwm_running = false;

        if let Err(e) = self.line.release() {
            warn!("Failed to release fan line {}: {}", self.line.describe(), e);
        } else {
            info!("Released fan line {}", self.line.describe());
        }
        self.released = true;
    }
}

impl<L: FanLine> Drop for Actuator<L> {
    fn drop(&mut self) {
        self.shut_off();
    }
}

/// Logs every operation instead of touching hardware
#[derive(Debug, Default)]
pub struct DryRunLine {
    claimed: bool,
}

impl DryRunLine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FanLine for DryRunLine {
    fn claim_output(&mut self) -> Result<(), ResourceError> {
        info!("[dry-run] claim fan line, drive low");
        self.claimed = true;
        Ok(())
    }

    fn write_level(&mut self, high: bool) -> Result<(), ActuatorError> {
        if !self.claimed {
            return Err(ActuatorError::NotClaimed);
        }
        info!("[dry-run] write level {}", u8::from(high));
        Ok(())
    }

    fn configure_pwm(&mut self, frequency_hz: u32, duty: u8) -> Result<(), ActuatorError> {
        if !self.claimed {
            return Err(ActuatorError::NotClaimed);
        }
        info!("[dry-run] pwm {} Hz at {}%", frequency_hz, duty);
        Ok(())
    }

    fn stop_pwm(&mut self) -> Result<(), ActuatorError> {
        info!("[dry-run] stop pwm");
        Ok(())
    }

    fn release(&mut self) -> Result<(), ResourceError> {
        info!("[dry-run] release fan line");
        self.claimed = false;
        Ok(())
    }

    fn describe(&self) -> String {
        "dry-run".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Claim,
        Level(bool),
        Pwm(u32, u8),
        StopPwm,
        Release,
    }

    #[derive(Clone, Default)]
    struct Recorder {
        ops: Arc<Mutex<Vec<Op>>>,
        fail_stop: bool,
        fail_levels: bool,
    }

    impl Recorder {
        fn ops(&self) -> Vec<Op> {
            self.ops.lock().unwrap().clone()
        }

        fn push(&self, op: Op) {
            self.ops.lock().unwrap().push(op);
        }
    }

    impl FanLine for Recorder {
        fn claim_output(&mut self) -> Result<(), ResourceError> {
            self.push(Op::Claim);
            Ok(())
        }

        fn write_level(&mut self, high: bool) -> Result<(), ActuatorError> {
            self.push(Op::Level(high));
            if self.fail_levels {
                return Err(ActuatorError::Unsupported("test"));
            }
            Ok(())
        }

        fn configure_pwm(&mut self, frequency_hz: u32, duty: u8) -> Result<(), ActuatorError> {
            self.push(Op::Pwm(frequency_hz, duty));
            Ok(())
        }

        fn stop_pwm(&mut self) -> Result<(), ActuatorError> {
            self.push(Op::StopPwm);
            if self.fail_stop {
                return Err(ActuatorError::Unsupported("test"));
            }
            Ok(())
        }

        fn release(&mut self) -> Result<(), ResourceError> {
            self.push(Op::Release);
            Ok(())
        }

        fn describe(&self) -> String {
            "recorder".to_string()
        }
    }

    fn pwm(kick: Option<Kick>) -> ActuatorMode {
        ActuatorMode::Pwm {
            frequency_hz: 25_000,
            kick,
        }
    }

    #[test]
    fn binary_mode_switches_above_threshold() {
        let line = Recorder::default();
        let mut actuator = Actuator::open(line.clone(), ActuatorMode::default()).unwrap();

        actuator.apply(50).unwrap();
        actuator.apply(65).unwrap();
        actuator.apply(20).unwrap();

        assert_eq!(
            line.ops(),
            vec![Op::Claim, Op::Level(false), Op::Level(true), Op::Level(false)]
        );
    }

    #[test]
    fn apply_clamps_duty() {
        let line = Recorder::default();
        let mut actuator = Actuator::open(line.clone(), pwm(None)).unwrap();

        actuator.apply(250).unwrap();

        assert_eq!(line.ops().last(), Some(&Op::Pwm(25_000, 100)));
    }

    #[test]
    fn repeated_apply_is_harmless() {
        let line = Recorder::default();
        let mut actuator = Actuator::open(line.clone(), pwm(None)).unwrap();

        actuator.apply(40).unwrap();
        actuator.apply(40).unwrap();
        actuator.apply(0).unwrap();
        actuator.apply(0).unwrap();
    }

    #[test]
    fn pwm_zero_stops_and_drives_low() {
        let line = Recorder::default();
        let mut actuator = Actuator::open(line.clone(), pwm(None)).unwrap();

        actuator.apply(35).unwrap();
        actuator.apply(0).unwrap();

        assert_eq!(
            line.ops(),
            vec![
                Op::Claim,
                Op::Pwm(25_000, 35),
                Op::StopPwm,
                Op::Level(false)
            ]
        );
    }

    #[test]
    fn pwm_zero_drives_low_when_stop_fails() {
        let line = Recorder {
            fail_stop: true,
            ..Recorder::default()
        };
        let mut actuator = Actuator::open(line.clone(), pwm(None)).unwrap();

        actuator.apply(80).unwrap();
        assert!(actuator.apply(0).is_err());

        assert_eq!(
            line.ops(),
            vec![
                Op::Claim,
                Op::Pwm(25_000, 80),
                Op::StopPwm,
                Op::Level(false)
            ]
        );
    }

    #[test]
    fn pwm_kicks_only_when_starting_from_stopped() {
        let line = Recorder::default();
        let kick = Kick {
            duty: 100,
            duration: Duration::from_millis(1),
        };
        let mut actuator = Actuator::open(line.clone(), pwm(Some(kick))).unwrap();

        actuator.apply(35).unwrap();
        actuator.apply(50).unwrap();
        actuator.apply(0).unwrap();
        actuator.apply(20).unwrap();

        assert_eq!(
            line.ops(),
            vec![
                Op::Claim,
                Op::Pwm(25_000, 100),
                Op::Pwm(25_000, 35),
                Op::Pwm(25_000, 50),
                Op::StopPwm,
                Op::Level(false),
                Op::Pwm(25_000, 100),
                Op::Pwm(25_000, 20),
            ]
        );
    }

    #[test]
    fn shutdown_falls_back_to_forcing_low() {
        let line = Recorder {
            fail_stop: true,
            ..Recorder::default()
        };
        let mut actuator = Actuator::open(line.clone(), pwm(None)).unwrap();
        actuator.apply(80).unwrap();

        actuator.shutdown();

        assert_eq!(
            line.ops(),
            vec![
                Op::Claim,
                Op::Pwm(25_000, 80),
                Op::StopPwm,
                Op::Level(false),
                Op::Level(false),
                Op::Release
            ]
        );
    }

    #[test]
    fn shutdown_releases_even_when_every_write_fails() {
        let line = Recorder {
            fail_stop: true,
            fail_levels: true,
            ..Recorder::default()
        };
        let actuator = Actuator::open(line.clone(), pwm(None)).unwrap();

        actuator.shutdown();

        assert_eq!(line.ops().last(), Some(&Op::Release));
    }

    #[test]
    fn drop_turns_the_fan_off_once() {
        let line = Recorder::default();
        {
            let mut actuator = Actuator::open(line.clone(), ActuatorMode::default()).unwrap();
            actuator.apply(100).unwrap();
        }

        assert_eq!(
            line.ops(),
            vec![Op::Claim, Op::Level(true), Op::Level(false), Op::Release]
        );
    }

    #[test]
    fn dry_run_line_accepts_everything_once_claimed() {
        let mut line = DryRunLine::new();
        assert!(line.write_level(true).is_err());

        let mut actuator = Actuator::open(line, pwm(None)).unwrap();
        actuator.apply(60).unwrap();
        actuator.apply(0).unwrap();
        actuator.shutdown();
    }
}
