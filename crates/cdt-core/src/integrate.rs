//! Coulomb counting: running charge and discharge capacity from a current
//! trace.
//!
//! Capacity only accumulates while the sign of the current matches the
//! requested [`Direction`]; otherwise it holds its previous value. Both
//! traces therefore start at zero and never decrease for non-negative time
//! deltas. Callers sort samples by time first; a negative delta is not
//! detected here.

use serde::{Deserialize, Serialize};

/// Which sign of current accumulates capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Positive current
    Charge,
    /// Negative current
    Discharge,
}

impl Direction {
    fn accumulates(self, current: f64) -> bool {
        match self {
            Direction::Charge => current > 0.0,
            Direction::Discharge => current < 0.0,
        }
    }
}

/// Unit of the time column, fixed per adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBase {
    Seconds,
    Milliseconds,
}

impl TimeBase {
    /// Divisor turning `A * <time unit>` into ampere-hours.
    pub const fn divisor(self) -> f64 {
        match self {
            TimeBase::Seconds => 3600.0,
            TimeBase::Milliseconds => 3.6e6,
        }
    }
}

/// Integrate `current` over `time` in one direction.
///
/// `capacity[0] = 0` and
/// `capacity[i] = capacity[i-1] + |current[i]| * (time[i] - time[i-1]) / divisor`
/// when `current[i]` has the requested sign, `capacity[i-1]` otherwise.
/// The output has as many samples as the shorter input.
pub fn integrate_capacity(
    current: &[f64],
    time: &[f64],
    direction: Direction,
    base: TimeBase,
) -> Vec<f64> {
    let len = current.len().min(time.len());
    let divisor = base.divisor();
    let mut capacity = Vec::with_capacity(len);
    let mut acc = 0.0;
    for i in 0..len {
        if i > 0 && direction.accumulates(current[i]) {
            acc += current[i].abs() * (time[i] - time[i - 1]) / divisor;
        }
        capacity.push(acc);
    }
    capacity
}

/// Charge and discharge capacity traces over the same samples.
pub fn charge_and_discharge(current: &[f64], time: &[f64], base: TimeBase) -> (Vec<f64>, Vec<f64>) {
    (
        integrate_capacity(current, time, Direction::Charge, base),
        integrate_capacity(current, time, Direction::Discharge, base),
    )
}
