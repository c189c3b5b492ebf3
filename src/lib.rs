//! Penta Fan
//!
//! Closed-loop thermal fan controller for single-board computers: samples the
//! CPU temperature, maps it through a stepped curve with hysteresis and drives
//! a GPIO or PWM fan line, switching the fan off on every exit path.

pub mod args;
pub mod config;
pub mod cpu_temp;
pub mod daemon;
pub mod errors;
pub mod fan;
pub mod fan_control;
pub mod gpio;
pub mod hysteresis;
pub mod logging;

/// Prefix of the per-tick log line
pub const COMPONENT: &str = "penta-fan";

// Re-export commonly used types
pub use config::{ControllerConfig, SensorFailurePolicy};
pub use daemon::{FanDaemon, LoopState, TickReport};
pub use errors::{FanError, Result};
pub use fan::{CurveStep, CurveTable};
pub use fan_control::{Actuator, ActuatorMode, FanLine};
pub use hysteresis::{ControllerState, HysteresisPolicy};
