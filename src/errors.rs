//! Error types for the fan controller

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for the fan controller
pub type Result<T> = std::result::Result<T, FanError>;

/// Top-level error type for the fan controller
#[derive(Error, Debug)]
pub enum FanError {
    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("Actuator error: {0}")]
    Actuator(#[from] ActuatorError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Invalid fan curve: {0}")]
    Curve(#[from] CurveError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// The temperature could not be read this tick
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} did not answer within {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with {status}")]
    CommandFailed { program: String, status: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unparseable temperature output: {0:?}")]
    Parse(String),

    #[error("temperature reading out of range: {0:.1}°C")]
    OutOfRange(f32),

    #[error("all temperature sources failed, last error: {0}")]
    Exhausted(Box<SensorError>),

    #[error("no temperature source configured")]
    NoSource,
}

/// A write to the fan line failed
#[derive(Error, Debug)]
pub enum ActuatorError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fan line is not claimed")]
    NotClaimed,

    #[error("operation not supported by this fan line: {0}")]
    Unsupported(&'static str),
}

/// The fan line could not be acquired or released
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("GPIO chip {chip} not found under {}", root.display())]
    ChipNotFound { chip: u32, root: PathBuf },

    #[error("line {line} is out of range for GPIO chip {chip} ({ngpio} lines)")]
    LineOutOfRange { chip: u32, line: u32, ngpio: u32 },

    #[error("PWM channel {} did not appear after export", path.display())]
    ExportTimeout { path: PathBuf },

    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The fan curve table violates its invariants
#[derive(Error, Debug, PartialEq)]
pub enum CurveError {
    #[error("curve must contain at least one step")]
    Empty,

    #[error("invalid curve step: temperature {temp}°C, duty {duty}%")]
    InvalidStep { temp: f32, duty: u16 },

    #[error("thresholds must be strictly increasing ({previous}°C then {next}°C)")]
    ThresholdOrder { previous: f32, next: f32 },

    #[error("duty must not decrease with temperature ({previous}% then {next}%)")]
    DutyOrder { previous: u8, next: u8 },

    #[error("cannot parse curve step {0:?}, expected <temp>:<duty>")]
    Syntax(String),
}

impl ActuatorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl ResourceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
