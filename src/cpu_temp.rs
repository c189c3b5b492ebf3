//! CPU temperature sources
//!
//! The primary source asks the firmware through `vcgencmd measure_temp`; the
//! fallback reads the kernel thermal zone. [`FallbackSource`] chains them.

use crate::errors::SensorError;
use log::{debug, trace};
use rand::Rng;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Default kernel thermal zone node for the SoC
pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";
/// Default firmware query utility
pub const DEFAULT_VCGENCMD: &str = "vcgencmd";
/// Default bound on a single sensor read
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Readings outside this window are treated as sensor faults
const VALID_RANGE: std::ops::RangeInclusive<f32> = -50.0..=200.0;
const POLL_STEP: Duration = Duration::from_millis(10);

/// Something that can report the current CPU temperature in °C
pub trait TemperatureSource {
    /// Point-read the temperature. Must return within a short bounded time.
    fn read(&mut self) -> Result<f32, SensorError>;

    /// Short human-readable name for log lines
    fn name(&self) -> &str;
}

impl<T: TemperatureSource + ?Sized> TemperatureSource for Box<T> {
    fn read(&mut self) -> Result<f32, SensorError> {
        (**self).read()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

fn validate(celsius: f32) -> Result<f32, SensorError> {
    if VALID_RANGE.contains(&celsius) {
        Ok(celsius)
    } else {
        Err(SensorError::OutOfRange(celsius))
    }
}

/// Reads the SoC temperature via `vcgencmd measure_temp`
pub struct VcgencmdSource {
    program: String,
    timeout: Duration,
}

impl VcgencmdSource {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Parse output of the form `temp=48.3'C`
    pub fn parse_output(output: &str) -> Result<f32, SensorError> {
        let value = output
            .trim()
            .strip_prefix("temp=")
            .map(|rest| rest.trim_end_matches("'C").trim_end_matches("°C"))
            .ok_or_else(|| SensorError::Parse(output.trim().to_string()))?;

        value
            .parse::<f32>()
            .map_err(|_| SensorError::Parse(output.trim().to_string()))
    }

    fn run(&self) -> Result<String, SensorError> {
        let mut child = Command::new(&self.program)
            .arg("measure_temp")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| SensorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SensorError::Timeout {
                        program: self.program.clone(),
                        timeout: self.timeout,
                    });
                }
                Ok(None) => thread::sleep(POLL_STEP),
                Err(source) => {
                    return Err(SensorError::Spawn {
                        program: self.program.clone(),
                        source,
                    })
                }
            }
        };

        if !status.success() {
            return Err(SensorError::CommandFailed {
                program: self.program.clone(),
                status: status.to_string(),
            });
        }

        let mut output = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout
                .read_to_string(&mut output)
                .map_err(|source| SensorError::Spawn {
                    program: self.program.clone(),
                    source,
                })?;
        }
        Ok(output)
    }
}

impl Default for VcgencmdSource {
    fn default() -> Self {
        Self::new(DEFAULT_VCGENCMD, DEFAULT_TIMEOUT)
    }
}

impl TemperatureSource for VcgencmdSource {
    fn read(&mut self) -> Result<f32, SensorError> {
        let output = self.run()?;
        trace!("{} output: {:?}", self.program, output);
        validate(Self::parse_output(&output)?)
    }

    fn name(&self) -> &str {
        "vcgencmd"
    }
}

/// Reads a kernel thermal zone node (integer millidegrees Celsius)
pub struct ThermalZoneSource {
    path: PathBuf,
}

impl ThermalZoneSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for ThermalZoneSource {
    fn default() -> Self {
        Self::new(DEFAULT_THERMAL_ZONE)
    }
}

impl TemperatureSource for ThermalZoneSource {
    fn read(&mut self) -> Result<f32, SensorError> {
        let content = fs::read_to_string(&self.path).map_err(|source| SensorError::Io {
            path: self.path.clone(),
            source,
        })?;

        let millidegrees: i64 = content
            .trim()
            .parse()
            .map_err(|_| SensorError::Parse(content.trim().to_string()))?;

        validate(millidegrees as f32 / 1000.0)
    }

    fn name(&self) -> &str {
        "thermal-zone"
    }
}

/// Tries each source in order and returns the first reading that succeeds
pub struct FallbackSource {
    sources: Vec<Box<dyn TemperatureSource>>,
}

impl FallbackSource {
    pub fn new(sources: Vec<Box<dyn TemperatureSource>>) -> Self {
        Self { sources }
    }

    /// `vcgencmd` first, thermal zone second
    pub fn platform(vcgencmd: VcgencmdSource, zone: ThermalZoneSource) -> Self {
        Self::new(vec![Box::new(vcgencmd), Box::new(zone)])
    }
}

impl TemperatureSource for FallbackSource {
    fn read(&mut self) -> Result<f32, SensorError> {
        let mut last_error = None;

        for source in &mut self.sources {
            match source.read() {
                Ok(celsius) => return Ok(celsius),
                Err(e) => {
                    debug!("{} read failed: {}", source.name(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.map_or(SensorError::NoSource, |e| {
            SensorError::Exhausted(Box::new(e))
        }))
    }

    fn name(&self) -> &str {
        "fallback"
    }
}

/// Random walk around a base temperature, for running without hardware
pub struct SimulatedSource {
    current: f32,
    base: f32,
}

impl SimulatedSource {
    pub fn new(base: f32) -> Self {
        Self {
            current: base,
            base,
        }
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new(55.0)
    }
}

impl TemperatureSource for SimulatedSource {
    fn read(&mut self) -> Result<f32, SensorError> {
        let mut rng = rand::thread_rng();
        let drift = rng.gen_range(-1.5..1.5);
        // Pull gently back toward the base so the walk stays plausible.
        let pull = (self.base - self.current) * 0.1;
        self.current = (self.current + drift + pull).clamp(20.0, 95.0);
        Ok(self.current)
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Failing;

    impl TemperatureSource for Failing {
        fn read(&mut self) -> Result<f32, SensorError> {
            Err(SensorError::Parse("garbage".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct Fixed(f32);

    impl TemperatureSource for Fixed {
        fn read(&mut self) -> Result<f32, SensorError> {
            Ok(self.0)
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn parses_vcgencmd_output() {
        assert_eq!(VcgencmdSource::parse_output("temp=48.3'C\n").unwrap(), 48.3);
        assert_eq!(VcgencmdSource::parse_output("temp=61.0'C").unwrap(), 61.0);
        assert!(matches!(
            VcgencmdSource::parse_output("error=1 error_msg=\"Command not registered\""),
            Err(SensorError::Parse(_))
        ));
        assert!(VcgencmdSource::parse_output("temp=abc'C").is_err());
    }

    #[test]
    fn missing_vcgencmd_is_a_spawn_error() {
        let mut source =
            VcgencmdSource::new("/nonexistent/penta-fan/vcgencmd", Duration::from_millis(50));
        assert!(matches!(source.read(), Err(SensorError::Spawn { .. })));
    }

    #[test]
    fn thermal_zone_converts_millidegrees() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("temp");
        fs::write(&path, "52375\n").unwrap();

        let mut source = ThermalZoneSource::new(&path);
        assert_eq!(source.read().unwrap(), 52.375);
    }

    #[test]
    fn thermal_zone_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("temp");

        let mut source = ThermalZoneSource::new(&path);
        assert!(matches!(source.read(), Err(SensorError::Io { .. })));

        fs::write(&path, "hot").unwrap();
        assert!(matches!(source.read(), Err(SensorError::Parse(_))));

        fs::write(&path, "250000").unwrap();
        assert!(matches!(source.read(), Err(SensorError::OutOfRange(_))));
    }

    #[test]
    fn fallback_uses_first_success() {
        let mut source = FallbackSource::new(vec![Box::new(Failing), Box::new(Fixed(47.5))]);
        assert_eq!(source.read().unwrap(), 47.5);

        let mut source = FallbackSource::new(vec![Box::new(Fixed(40.0)), Box::new(Fixed(90.0))]);
        assert_eq!(source.read().unwrap(), 40.0);
    }

    #[test]
    fn fallback_reports_exhaustion() {
        let mut source = FallbackSource::new(vec![Box::new(Failing), Box::new(Failing)]);
        assert!(matches!(source.read(), Err(SensorError::Exhausted(_))));

        let mut empty = FallbackSource::new(Vec::new());
        assert!(matches!(empty.read(), Err(SensorError::NoSource)));
    }

    #[test]
    fn simulated_source_stays_in_range() {
        let mut source = SimulatedSource::default();
        for _ in 0..500 {
            let t = source.read().unwrap();
            assert!((20.0..=95.0).contains(&t));
        }
    }
}
