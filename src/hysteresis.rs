//! Hysteresis gate between the duty curve and the actuator
//!
//! Two interchangeable policies keep the fan from toggling while the
//! temperature hovers around a curve threshold:
//!
//! - [`HysteresisPolicy::Band`] lets the duty rise immediately but only lets
//!   it fall once the temperature is `margin` degrees below the threshold of
//!   the level currently applied.
//! - [`HysteresisPolicy::TwoPoint`] switches the fan as a whole on at `on`
//!   and off at `off`; while on, the curve decides the duty.
//!
//! Both are pure: the outcome depends only on the reading and the
//! [`ControllerState`] passed in.

use crate::fan::CurveTable;

/// Default band margin in °C
pub const DEFAULT_MARGIN: f32 = 2.0;
/// Default two-point switch-on temperature in °C
pub const DEFAULT_ON_TEMP: f32 = 56.0;
/// Default two-point switch-off temperature in °C
pub const DEFAULT_OFF_TEMP: f32 = 54.0;

/// The control loop's only mutable state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerState {
    /// Duty last written successfully to the fan line
    pub last_applied_duty: Option<u8>,
    /// Two-point gate latch; unused by the band policy
    pub fan_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HysteresisPolicy {
    /// Per-level band around each curve threshold
    Band { margin: f32 },
    /// Single on/off temperature pair gating the whole curve
    TwoPoint { on: f32, off: f32 },
}

impl Default for HysteresisPolicy {
    fn default() -> Self {
        Self::Band {
            margin: DEFAULT_MARGIN,
        }
    }
}

impl HysteresisPolicy {
    /// Decide the duty for this reading.
    ///
    /// Returns the gated duty and the state to carry into the next tick.
    /// `last_applied_duty` is passed through untouched; the loop updates it
    /// once the actuator has accepted the new duty.
    pub fn decide(
        &self,
        curve: &CurveTable,
        temperature: f32,
        state: &ControllerState,
    ) -> (u8, ControllerState) {
        match *self {
            Self::Band { margin } => {
                let target = curve.duty_for(temperature);
                let last = state.last_applied_duty.unwrap_or(0);
                (band(curve, margin, temperature, target, last), *state)
            }
            Self::TwoPoint { on, off } => {
                let fan_enabled = if state.fan_enabled {
                    temperature > off
                } else {
                    temperature >= on
                };
                let duty = if fan_enabled {
                    curve.duty_for(temperature)
                } else {
                    0
                };
                (
                    duty,
                    ControllerState {
                        fan_enabled,
                        ..*state
                    },
                )
            }
        }
    }
}

fn band(curve: &CurveTable, margin: f32, temperature: f32, target: u8, last: u8) -> u8 {
    if target >= last {
        return target;
    }

    match curve.threshold_for(last) {
        Some(threshold) if temperature >= threshold - margin => last,
        // Cooled past the band, or `last` is not a level of this curve.
        _ => target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applied(duty: u8) -> ControllerState {
        ControllerState {
            last_applied_duty: Some(duty),
            fan_enabled: false,
        }
    }

    #[test]
    fn band_holds_inside_margin_and_drops_below_it() {
        let curve = CurveTable::quiet();
        let policy = HysteresisPolicy::Band { margin: 2.0 };

        let (duty, _) = policy.decide(&curve, 63.5, &applied(50));
        assert_eq!(duty, 50);

        let (duty, _) = policy.decide(&curve, 62.9, &applied(50));
        assert_eq!(duty, 35);
    }

    #[test]
    fn band_boundary_is_exclusive() {
        let curve = CurveTable::quiet();
        let policy = HysteresisPolicy::Band { margin: 2.0 };

        let (duty, _) = policy.decide(&curve, 63.0, &applied(50));
        assert_eq!(duty, 50);
    }

    #[test]
    fn band_rises_immediately() {
        let curve = CurveTable::quiet();
        let policy = HysteresisPolicy::default();

        let (duty, _) = policy.decide(&curve, 86.0, &applied(20));
        assert_eq!(duty, 100);

        let (duty, _) = policy.decide(&curve, 56.0, &ControllerState::default());
        assert_eq!(duty, 20);
    }

    #[test]
    fn band_adopts_target_when_last_is_not_a_level() {
        let curve = CurveTable::quiet();
        let policy = HysteresisPolicy::default();

        let (duty, _) = policy.decide(&curve, 60.5, &applied(90));
        assert_eq!(duty, 35);
    }

    #[test]
    fn band_scenario_sequence() {
        let curve = CurveTable::quiet();
        let policy = HysteresisPolicy::Band { margin: 2.0 };
        let mut state = ControllerState::default();
        let mut duties = Vec::new();

        for temp in [40.0, 50.0, 56.0, 70.0, 90.0, 60.0, 40.0] {
            let (duty, next) = policy.decide(&curve, temp, &state);
            state = ControllerState {
                last_applied_duty: Some(duty),
                ..next
            };
            duties.push(duty);
        }

        assert_eq!(duties, vec![0, 0, 20, 65, 100, 35, 0]);
    }

    #[test]
    fn band_leaves_state_untouched() {
        let curve = CurveTable::quiet();
        let policy = HysteresisPolicy::default();
        let state = applied(35);

        let (_, next) = policy.decide(&curve, 70.0, &state);
        assert_eq!(next, state);
    }

    #[test]
    fn two_point_latches_between_on_and_off() {
        let curve = CurveTable::quiet();
        let policy = HysteresisPolicy::TwoPoint {
            on: 56.0,
            off: 54.0,
        };
        let mut state = ControllerState::default();
        let mut enabled = Vec::new();

        for temp in [55.9, 56.1, 54.5, 53.9] {
            let (_, next) = policy.decide(&curve, temp, &state);
            state = next;
            enabled.push(state.fan_enabled);
        }

        assert_eq!(enabled, vec![false, true, true, false]);
    }

    #[test]
    fn two_point_overrides_curve_output() {
        let curve: CurveTable = "0:25,60:60,80:100".parse().unwrap();
        let policy = HysteresisPolicy::TwoPoint {
            on: 56.0,
            off: 54.0,
        };

        let (duty, state) = policy.decide(&curve, 50.0, &ControllerState::default());
        assert_eq!(duty, 0);
        assert!(!state.fan_enabled);

        let (duty, state) = policy.decide(&curve, 58.0, &state);
        assert_eq!(duty, 25);
        assert!(state.fan_enabled);

        let (duty, state) = policy.decide(&curve, 55.0, &state);
        assert_eq!(duty, 25);

        let (duty, state) = policy.decide(&curve, 54.0, &state);
        assert_eq!(duty, 0);
        assert!(!state.fan_enabled);
    }
}
