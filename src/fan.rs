//! Duty curve: a monotonic step function from temperature to fan duty

use crate::errors::CurveError;
use std::fmt;
use std::str::FromStr;

/// Highest duty the fan line accepts
pub const MAX_DUTY: u8 = 100;

/// One step of the curve: at `threshold` °C and above, run at `duty` percent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveStep {
    pub threshold: f32,
    pub duty: u8,
}

impl CurveStep {
    pub fn new(threshold: f32, duty: u8) -> Self {
        Self { threshold, duty }
    }
}

/// Ordered, validated list of curve steps.
///
/// Thresholds are finite and strictly increasing, duties never decrease
/// and never exceed [`MAX_DUTY`]. The table is never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveTable {
    steps: Vec<CurveStep>,
}

impl CurveTable {
    /// Build a table, checking the ordering invariants
    pub fn new(steps: Vec<CurveStep>) -> Result<Self, CurveError> {
        if steps.is_empty() {
            return Err(CurveError::Empty);
        }

        for step in &steps {
            if !step.threshold.is_finite() || step.duty > MAX_DUTY {
                return Err(CurveError::InvalidStep {
                    temp: step.threshold,
                    duty: step.duty.into(),
                });
            }
        }

        for pair in steps.windows(2) {
            let (previous, next) = (pair[0], pair[1]);
            if next.threshold <= previous.threshold {
                return Err(CurveError::ThresholdOrder {
                    previous: previous.threshold,
                    next: next.threshold,
                });
            }
            if next.duty < previous.duty {
                return Err(CurveError::DutyOrder {
                    previous: previous.duty,
                    next: next.duty,
                });
            }
        }

        Ok(Self { steps })
    }

    /// The quiet curve: silent until 55°C, full power from 85°C
    pub fn quiet() -> Self {
        Self {
            steps: vec![
                CurveStep::new(0.0, 0),
                CurveStep::new(55.0, 20),
                CurveStep::new(60.0, 35),
                CurveStep::new(65.0, 50),
                CurveStep::new(70.0, 65),
                CurveStep::new(75.0, 80),
                CurveStep::new(85.0, 100),
            ],
        }
    }

    pub fn steps(&self) -> &[CurveStep] {
        &self.steps
    }

    /// Duty of the first step, returned below the first threshold
    pub fn min_duty(&self) -> u8 {
        self.steps.first().map_or(0, |s| s.duty)
    }

    /// Duty of the last step, returned at and above the last threshold
    pub fn max_duty(&self) -> u8 {
        self.steps.last().map_or(MAX_DUTY, |s| s.duty)
    }

    /// Duty for a temperature.
    ///
    /// Picks the highest step whose threshold is at or below `temperature`.
    /// Defined for every input: below the table it returns the minimum duty,
    /// above it the last step's duty, and NaN is treated as too hot.
    pub fn duty_for(&self, temperature: f32) -> u8 {
        if temperature.is_nan() {
            return self.max_duty();
        }

        self.steps
            .iter()
            .rev()
            .find(|step| step.threshold <= temperature)
            .map_or(self.min_duty(), |step| step.duty)
    }

    /// Temperature at which `duty` is first produced, if it is a curve level
    pub fn threshold_for(&self, duty: u8) -> Option<f32> {
        self.steps
            .iter()
            .find(|step| step.duty == duty)
            .map(|step| step.threshold)
    }
}

impl Default for CurveTable {
    fn default() -> Self {
        Self::quiet()
    }
}

impl fmt::Display for CurveTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", step.threshold, step.duty)?;
        }
        Ok(())
    }
}

/// Parses `"<temp>:<duty>,<temp>:<duty>,..."`, e.g. `"0:0,55:30,70:100"`
impl FromStr for CurveTable {
    type Err = CurveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut steps = Vec::new();

        for item in s.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            let (temp, duty) = item
                .split_once(':')
                .ok_or_else(|| CurveError::Syntax(item.to_string()))?;
            let temp: f32 = temp
                .trim()
                .parse()
                .map_err(|_| CurveError::Syntax(item.to_string()))?;
            let duty: u16 = duty
                .trim()
                .parse()
                .map_err(|_| CurveError::Syntax(item.to_string()))?;

            let duty = u8::try_from(duty)
                .ok()
                .filter(|d| *d <= MAX_DUTY)
                .ok_or(CurveError::InvalidStep { temp, duty })?;
            steps.push(CurveStep::new(temp, duty));
        }

        Self::new(steps)
    }
}
