//! Linux sysfs fan lines
//!
//! [`GpioLine`] drives a plain GPIO through `/sys/class/gpio`, [`PwmLine`]
//! a hardware PWM channel through `/sys/class/pwm`. Both export the line on
//! claim if needed and unexport it again on release when they exported it.

use crate::errors::{ActuatorError, ResourceError};
use crate::fan::MAX_DUTY;
use crate::fan_control::{FanLine, DEFAULT_PWM_FREQUENCY};
use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

pub const GPIO_SYSFS_ROOT: &str = "/sys/class/gpio";
pub const PWM_SYSFS_ROOT: &str = "/sys/class/pwm";

/// How long udev gets to create the node after an export
const EXPORT_WAIT: Duration = Duration::from_secs(1);
const NANOS_PER_SEC: u64 = 1_000_000_000;

fn write_attr(path: &Path, value: &str) -> io::Result<()> {
    fs::write(path, value)
}

fn read_u32(path: &Path) -> Result<u32, ResourceError> {
    let content = fs::read_to_string(path).map_err(|e| ResourceError::io(path, e))?;
    content.trim().parse().map_err(|_| {
        ResourceError::io(
            path,
            io::Error::new(io::ErrorKind::InvalidData, format!("not a number: {:?}", content.trim())),
        )
    })
}

fn wait_for(path: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !path.exists() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
    true
}

/// A GPIO line in binary (on/off) use
pub struct GpioLine {
    root: PathBuf,
    chip: u32,
    line: u32,
    number: Option<u32>,
    exported: bool,
}

impl GpioLine {
    pub fn new(chip: u32, line: u32) -> Self {
        Self::with_root(GPIO_SYSFS_ROOT, chip, line)
    }

    pub fn with_root(root: impl Into<PathBuf>, chip: u32, line: u32) -> Self {
        Self {
            root: root.into(),
            chip,
            line,
            number: None,
            exported: false,
        }
    }

    /// Map (chip index, line offset) to the global sysfs GPIO number.
    ///
    /// Chips are numbered in order of their `base`, matching the order the
    /// kernel registers them in.
    pub fn resolve_number(&self) -> Result<u32, ResourceError> {
        let entries = fs::read_dir(&self.root).map_err(|e| ResourceError::io(&self.root, e))?;

        let mut chips = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ResourceError::io(&self.root, e))?;
            let path = entry.path();
            let is_chip = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with("gpiochip"));
            if !is_chip {
                continue;
            }
            let base = read_u32(&path.join("base"))?;
            let ngpio = read_u32(&path.join("ngpio"))?;
            chips.push((base, ngpio));
        }
        chips.sort_unstable();

        let (base, ngpio) = chips
            .get(self.chip as usize)
            .copied()
            .ok_or_else(|| ResourceError::ChipNotFound {
                chip: self.chip,
                root: self.root.clone(),
            })?;

        if self.line >= ngpio {
            return Err(ResourceError::LineOutOfRange {
                chip: self.chip,
                line: self.line,
                ngpio,
            });
        }

        Ok(base + self.line)
    }

    fn line_dir(&self, number: u32) -> PathBuf {
        self.root.join(format!("gpio{}", number))
    }

    fn export_as_output(&mut self, number: u32) -> Result<(), ResourceError> {
        let dir = self.line_dir(number);
        if !dir.exists() {
            let export = self.root.join("export");
            write_attr(&export, &number.to_string()).map_err(|e| ResourceError::io(&export, e))?;
            self.exported = true;
            if !wait_for(&dir, EXPORT_WAIT) {
                return Err(ResourceError::ExportTimeout { path: dir });
            }
        }

        // "low" sets output direction and drives 0 in one step.
        let direction = dir.join("direction");
        write_attr(&direction, "low").map_err(|e| ResourceError::io(&direction, e))
    }

    fn unexport(&mut self, number: u32) -> Result<(), ResourceError> {
        let unexport = self.root.join("unexport");
        write_attr(&unexport, &number.to_string()).map_err(|e| ResourceError::io(&unexport, e))?;
        self.exported = false;
        Ok(())
    }
}

impl FanLine for GpioLine {
    fn claim_output(&mut self) -> Result<(), ResourceError> {
        let number = self.resolve_number()?;
        if let Err(e) = self.export_as_output(number) {
            // Don't leave a half-claimed line exported.
            if self.exported {
                if let Err(e) = self.unexport(number) {
                    warn!("{}", e);
                }
            }
            return Err(e);
        }

        debug!("GPIO chip {} line {} is sysfs gpio{}", self.chip, self.line, number);
        self.number = Some(number);
        Ok(())
    }

    fn write_level(&mut self, high: bool) -> Result<(), ActuatorError> {
        let number = self.number.ok_or(ActuatorError::NotClaimed)?;
        let value = self.line_dir(number).join("value");
        write_attr(&value, if high { "1" } else { "0" }).map_err(|e| ActuatorError::io(&value, e))
    }

    fn configure_pwm(&mut self, _frequency_hz: u32, _duty: u8) -> Result<(), ActuatorError> {
        Err(ActuatorError::Unsupported("PWM on a plain GPIO line"))
    }

    fn stop_pwm(&mut self) -> Result<(), ActuatorError> {
        Ok(())
    }

    fn release(&mut self) -> Result<(), ResourceError> {
        let Some(number) = self.number.take() else {
            return Ok(());
        };

        if self.exported {
            self.unexport(number)?;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("gpiochip{}/line{}", self.chip, self.line)
    }
}

/// A hardware PWM channel
pub struct PwmLine {
    root: PathBuf,
    chip: u32,
    channel: u32,
    period_ns: Option<u64>,
    claimed: bool,
    exported: bool,
}

impl PwmLine {
    pub fn new(chip: u32, channel: u32) -> Self {
        Self::with_root(PWM_SYSFS_ROOT, chip, channel)
    }

    pub fn with_root(root: impl Into<PathBuf>, chip: u32, channel: u32) -> Self {
        Self {
            root: root.into(),
            chip,
            channel,
            period_ns: None,
            claimed: false,
            exported: false,
        }
    }

    fn chip_dir(&self) -> PathBuf {
        self.root.join(format!("pwmchip{}", self.chip))
    }

    fn channel_dir(&self) -> PathBuf {
        self.chip_dir().join(format!("pwm{}", self.channel))
    }

    fn write(&self, attr: &str, value: &str) -> Result<(), ActuatorError> {
        if !self.claimed {
            return Err(ActuatorError::NotClaimed);
        }
        let path = self.channel_dir().join(attr);
        write_attr(&path, value).map_err(|e| ActuatorError::io(&path, e))
    }

    fn export_stopped(&mut self) -> Result<(), ResourceError> {
        let dir = self.channel_dir();
        if !dir.exists() {
            let export = self.chip_dir().join("export");
            write_attr(&export, &self.channel.to_string())
                .map_err(|e| ResourceError::io(&export, e))?;
            self.exported = true;
            if !wait_for(&dir, EXPORT_WAIT) {
                return Err(ResourceError::ExportTimeout { path: dir });
            }
        }

        let enable = dir.join("enable");
        write_attr(&enable, "0").map_err(|e| ResourceError::io(&enable, e))?;
        let duty = dir.join("duty_cycle");
        write_attr(&duty, "0").map_err(|e| ResourceError::io(&duty, e))
    }

    fn unexport(&mut self) -> Result<(), ResourceError> {
        let unexport = self.chip_dir().join("unexport");
        write_attr(&unexport, &self.channel.to_string())
            .map_err(|e| ResourceError::io(&unexport, e))?;
        self.exported = false;
        Ok(())
    }

    fn set_period(&mut self, period_ns: u64) -> Result<(), ActuatorError> {
        if self.period_ns == Some(period_ns) {
            return Ok(());
        }
        // duty_cycle may never exceed period, so clear it first.
        self.write("duty_cycle", "0")?;
        self.write("period", &period_ns.to_string())?;
        self.period_ns = Some(period_ns);
        Ok(())
    }
}

/// Period in nanoseconds for a carrier frequency
pub fn period_ns(frequency_hz: u32) -> u64 {
    NANOS_PER_SEC / u64::from(frequency_hz.max(1))
}

/// On-time in nanoseconds for `duty` percent of `period_ns`
pub fn duty_ns(period_ns: u64, duty: u8) -> u64 {
    period_ns * u64::from(duty.min(MAX_DUTY)) / u64::from(MAX_DUTY)
}

impl FanLine for PwmLine {
    fn claim_output(&mut self) -> Result<(), ResourceError> {
        if !self.chip_dir().is_dir() {
            return Err(ResourceError::ChipNotFound {
                chip: self.chip,
                root: self.root.clone(),
            });
        }

        if let Err(e) = self.export_stopped() {
            if self.exported {
                if let Err(e) = self.unexport() {
                    warn!("{}", e);
                }
            }
            return Err(e);
        }

        self.claimed = true;
        self.period_ns = None;
        Ok(())
    }

    fn write_level(&mut self, high: bool) -> Result<(), ActuatorError> {
        if high {
            let period = self
                .period_ns
                .unwrap_or_else(|| period_ns(DEFAULT_PWM_FREQUENCY));
            self.set_period(period)?;
            self.write("duty_cycle", &period.to_string())?;
            return self.write("enable", "1");
        }

        // Attempt both writes even if the first fails.
        let duty = self.write("duty_cycle", "0");
        let enable = self.write("enable", "0");
        duty.and(enable)
    }

    fn configure_pwm(&mut self, frequency_hz: u32, duty: u8) -> Result<(), ActuatorError> {
        let period = period_ns(frequency_hz);
        self.set_period(period)?;
        self.write("duty_cycle", &duty_ns(period, duty).to_string())?;
        self.write("enable", "1")
    }

    fn stop_pwm(&mut self) -> Result<(), ActuatorError> {
        self.write("enable", "0")
    }

    fn release(&mut self) -> Result<(), ResourceError> {
        if !self.claimed {
            return Ok(());
        }

        let enable = self.channel_dir().join("enable");
        if let Err(e) = write_attr(&enable, "0") {
            warn!("Failed to disable {}: {}", enable.display(), e);
        }
        self.claimed = false;

        if self.exported {
            self.unexport()?;
            info!("Unexported PWM channel {}", self.describe());
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("pwmchip{}/pwm{}", self.chip, self.channel)
    }
}
