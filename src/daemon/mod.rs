//! Control loop for the fan controller
//!
//! One tick reads the temperature, runs it through the curve and the
//! hysteresis gate, writes the duty if it changed and logs the result.
//! Ticks never overlap: the sleep starts once the tick has finished, and a
//! termination request is only acted on between ticks.

use crate::{
    config::{ControllerConfig, SensorFailurePolicy},
    cpu_temp::TemperatureSource,
    fan_control::{Actuator, FanLine},
    hysteresis::ControllerState,
    COMPONENT,
};
use log::{debug, info, warn};
use std::future::Future;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::time::sleep;

/// Lifecycle of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    ShuttingDown,
}

/// What happened during one tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickReport {
    /// `None` when the sensor could not be read
    pub temperature: Option<f32>,
    /// Duty the controller decided on
    pub duty: u8,
    /// Whether a write reached the actuator and succeeded
    pub applied: bool,
}

/// The per-tick status line, e.g. `penta-fan: Temp=52.4°C, duty=20%`
pub fn tick_line(temperature: f32, duty: u8) -> String {
    format!("{}: Temp={:.1}°C, duty={}%", COMPONENT, temperature, duty)
}

/// The fan daemon: owns the sensor, the actuator handle and the state
pub struct FanDaemon<S: TemperatureSource, L: FanLine> {
    config: ControllerConfig,
    sensor: S,
    actuator: Actuator<L>,
    state: ControllerState,
    phase: LoopState,
}

impl<S: TemperatureSource, L: FanLine> FanDaemon<S, L> {
    /// Create a daemon around an already claimed actuator
    pub fn new(config: ControllerConfig, sensor: S, actuator: Actuator<L>) -> Self {
        Self {
            config,
            sensor,
            actuator,
            state: ControllerState::default(),
            phase: LoopState::Running,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn phase(&self) -> LoopState {
        self.phase
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Run one sense-decide-act cycle
    pub fn tick(&mut self) -> TickReport {
        match self.sensor.read() {
            Ok(temperature) => {
                let (duty, gated) =
                    self.config
                        .policy
                        .decide(&self.config.curve, temperature, &self.state);
                self.state.fan_enabled = gated.fan_enabled;

                let applied = self.actuate(duty);
                info!("{}", tick_line(temperature, duty));

                TickReport {
                    temperature: Some(temperature),
                    duty,
                    applied,
                }
            }
            Err(e) => self.sensor_failed(e),
        }
    }

    fn sensor_failed(&mut self, error: crate::errors::SensorError) -> TickReport {
        match self.config.on_sensor_failure {
            SensorFailurePolicy::HoldLast => {
                let duty = self.state.last_applied_duty.unwrap_or(0);
                warn!(
                    "{}: Temp=unknown ({}), holding duty={}%",
                    COMPONENT, error, duty
                );
                TickReport {
                    temperature: None,
                    duty,
                    applied: false,
                }
            }
            SensorFailurePolicy::FullDuty => {
                let duty = self.config.curve.max_duty();
                // Readings resume from a running fan under the two-point gate.
                self.state.fan_enabled = true;
                let applied = self.actuate(duty);
                warn!(
                    "{}: Temp=unknown ({}), forcing duty={}%",
                    COMPONENT, error, duty
                );
                TickReport {
                    temperature: None,
                    duty,
                    applied,
                }
            }
        }
    }

    /// Write `duty` unless it is already applied. Failures are retried on
    /// the next tick because `last_applied_duty` stays unchanged.
    fn actuate(&mut self, duty: u8) -> bool {
        if self.state.last_applied_duty == Some(duty) {
            return false;
        }

        match self.actuator.apply(duty) {
            Ok(()) => {
                debug!(
                    "Applied duty {}% (was {:?})",
                    duty, self.state.last_applied_duty
                );
                self.state.last_applied_duty = Some(duty);
                true
            }
            Err(e) => {
                warn!("Failed to apply duty {}%: {}; retrying next tick", duty, e);
                false
            }
        }
    }

    /// Tick until `shutdown` resolves, then switch the fan off.
    ///
    /// `shutdown` is only polled between ticks, so a request arriving
    /// mid-tick takes effect once that tick has finished.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Starting fan control: every {:?}, curve {}, {:?}, {:?} on sensor failure",
            self.config.interval, self.config.curve, self.config.policy, self.config.on_sensor_failure
        );
        tokio::pin!(shutdown);

        while self.phase == LoopState::Running {
            self.tick();

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    self.phase = LoopState::ShuttingDown;
                }
                _ = sleep(self.config.interval) => {}
            }
        }

        self.shutdown();
    }

    /// Turn the fan off and release the line
    pub fn shutdown(mut self) {
        self.phase = LoopState::ShuttingDown;
        info!("{}: shutting down, turning fan off", COMPONENT);
        self.actuator.shutdown();
    }
}

/// Termination signals the daemon listens for
pub struct ShutdownSignals {
    int: Signal,
    hup: Signal,
    term: Signal,
}

impl ShutdownSignals {
    /// Install the handlers. Done before the fan line is claimed so a
    /// failure here never leaves hardware behind.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            int: signal(SignalKind::interrupt())?,
            hup: signal(SignalKind::hangup())?,
            term: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the first termination signal and return its name
    pub async fn recv(&mut self) -> &'static str {
        let sig = tokio::select! {
            _ = self.int.recv() => "SIGINT",
            _ = self.hup.recv() => "SIGHUP",
            _ = self.term.recv() => "SIGTERM",
        };

        info!("caught signal: {}", sig);
        sig
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_line_rounds_to_one_decimal() {
        assert_eq!(tick_line(52.375, 20), "penta-fan: Temp=52.4°C, duty=20%");
        assert_eq!(tick_line(48.0, 0), "penta-fan: Temp=48.0°C, duty=0%");
        assert_eq!(tick_line(-3.0, 100), "penta-fan: Temp=-3.0°C, duty=100%");
    }
}
