//! Discharge-capacity outlier detection policies.
//!
//! Every policy maps the per-cycle discharge-capacity series to a flag per
//! position. NaN capacities never compare above a threshold and are left
//! unflagged.

use serde::{Deserialize, Serialize};

use crate::stats::median;

/// Threshold rule applied to the shift-difference series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ShiftRule {
    /// Flag `diff > multiple * median(diff[diff > 0])`.
    MedianRatio { multiple: f64 },
    /// Hampel test on the differences: flag
    /// `|diff - med| > multiple * median(|diff - med|)` with `med = median(diff)`.
    MedianAbsoluteDeviation { multiple: f64 },
}

/// Outlier detection policy, chosen per dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum DetectionPolicy {
    /// Flag cycles deviating from a centered median filter by more than
    /// `multiple` times the median deviation.
    MedianFilter { window: usize, multiple: f64 },
    /// Compare each cycle with its neighbours `1..=shifts` positions away on
    /// either side; a cycle flagged under any shift is flagged.
    ShiftDifference { shifts: usize, rule: ShiftRule },
    /// Flag a cycle that differs by more than `eps` from both the median of
    /// the `window` cycles before it and the median of the `window` cycles
    /// starting at it.
    LocalMedian { eps: f64, window: usize },
}

impl DetectionPolicy {
    pub fn flag(&self, capacity: &[f64]) -> Vec<bool> {
        match *self {
            DetectionPolicy::MedianFilter { window, multiple } => {
                median_filter_flags(capacity, window, multiple)
            }
            DetectionPolicy::ShiftDifference { shifts, rule } => {
                let mut flags = vec![false; capacity.len()];
                for shift in 1..=shifts {
                    let diff = shift_difference(capacity, shift);
                    for (flag, hit) in flags.iter_mut().zip(rule.flag(&diff)) {
                        *flag |= hit;
                    }
                }
                flags
            }
            DetectionPolicy::LocalMedian { eps, window } => {
                local_median_flags(capacity, eps, window)
            }
        }
    }
}

impl ShiftRule {
    fn flag(&self, diff: &[f64]) -> Vec<bool> {
        match *self {
            ShiftRule::MedianRatio { multiple } => {
                let positive: Vec<f64> = diff.iter().copied().filter(|d| *d > 0.0).collect();
                let threshold = median(&positive) * multiple;
                diff.iter().map(|d| *d > threshold).collect()
            }
            ShiftRule::MedianAbsoluteDeviation { multiple } => {
                let med = median(diff);
                let deviation: Vec<f64> = diff.iter().map(|d| (d - med).abs()).collect();
                let threshold = median(&deviation) * multiple;
                deviation.iter().map(|d| *d > threshold).collect()
            }
        }
    }
}

/// Median filter truncated at the series edges (odd `window`).
pub fn median_filter(values: &[f64], window: usize) -> Vec<f64> {
    crate::stats::rolling_median(values, window / 2)
}

fn median_filter_flags(capacity: &[f64], window: usize, multiple: f64) -> Vec<bool> {
    let filtered = median_filter(capacity, window);
    let deviation: Vec<f64> = capacity
        .iter()
        .zip(&filtered)
        .map(|(q, m)| (q - m).abs())
        .collect();
    let finite: Vec<f64> = deviation.iter().copied().filter(|d| !d.is_nan()).collect();
    let threshold = median(&finite) * multiple;
    deviation.iter().map(|d| *d > threshold).collect()
}

/// `min(|q[i] - q[i-shift]|, |q[i] - q[i+shift]|)`, with a missing
/// neighbour contributing infinity.
pub fn shift_difference(capacity: &[f64], shift: usize) -> Vec<f64> {
    let n = capacity.len();
    (0..n)
        .map(|i| {
            let left = if i >= shift {
                (capacity[i] - capacity[i - shift]).abs()
            } else {
                f64::INFINITY
            };
            let right = if i + shift < n {
                (capacity[i] - capacity[i + shift]).abs()
            } else {
                f64::INFINITY
            };
            left.min(right)
        })
        .collect()
}

fn local_median_flags(capacity: &[f64], eps: f64, window: usize) -> Vec<bool> {
    let n = capacity.len();
    let mut flags = vec![false; n];
    if n < 2 * window {
        return flags;
    }
    for i in window..n - window {
        let before = median(&capacity[i - window..i]);
        let after = median(&capacity[i..i + window]);
        if (capacity[i] - before).abs() > eps && (capacity[i] - after).abs() > eps {
            flags[i] = true;
        }
    }
    flags
}
