//! Discharge capacity resampled onto a fixed voltage grid ("Qdlin").

use cdt_core::{CdtError, CdtResult, CellRecord, CycleRecord};

use crate::stats::rolling_median;

/// Samples with current below this value (A) belong to the discharge region.
pub const DISCHARGE_CURRENT_THRESHOLD: f64 = -0.1;
/// Half-width of the rolling median used to smooth curves.
pub const SMOOTH_RADIUS: usize = 10;

/// `n` evenly spaced points from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            let mut grid: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
            grid[n - 1] = stop;
            grid
        }
    }
}

/// Piecewise-linear interpolation of `y(x)` at `x_new`.
///
/// Samples are sorted by `x` (stable for ties) and NaN pairs are dropped.
/// Points outside `[min(x), max(x)]` are NaN, and so are points whose
/// bracketing samples share an `x` value. Fewer than 3 usable samples give
/// an all-zero result.
pub fn interpolate(x: &[f64], y: &[f64], x_new: &[f64]) -> Vec<f64> {
    let mut pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter(|(a, b)| !a.is_nan() && !b.is_nan())
        .map(|(a, b)| (*a, *b))
        .collect();
    if pairs.len() < 3 {
        return vec![0.0; x_new.len()];
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let first = pairs[0].0;
    let last = pairs[pairs.len() - 1].0;

    x_new
        .iter()
        .map(|&xn| {
            if xn.is_nan() || xn < first || xn > last {
                return f64::NAN;
            }
            // first sample with x >= xn, clipped so both neighbours exist
            let idx = pairs
                .partition_point(|p| p.0 < xn)
                .clamp(1, pairs.len() - 1);
            let (x_lo, y_lo) = pairs[idx - 1];
            let (x_hi, y_hi) = pairs[idx];
            let slope = (y_hi - y_lo) / (x_hi - x_lo);
            let value = slope * (xn - x_lo) + y_lo;
            if value.is_finite() {
                value
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Qdlin of one cycle over `[min_v, max_v]`, ordered by increasing
/// discharge capacity.
pub fn compute_qdlin(cycle: &CycleRecord, min_v: f64, max_v: f64, dims: usize) -> Vec<f64> {
    let (voltage, capacity): (Vec<f64>, Vec<f64>) = cycle
        .current_a
        .iter()
        .zip(cycle.voltage_v.iter().zip(&cycle.discharge_capacity_ah))
        .filter(|(i, _)| **i < DISCHARGE_CURRENT_THRESHOLD)
        .map(|(_, (v, q))| (*v, *q))
        .unzip();
    let mut curve = interpolate(&voltage, &capacity, &linspace(min_v, max_v, dims));
    curve.reverse();
    curve
}

/// Qdlin for a cycle of `cell`, taken from the cycler's precomputed curve
/// when requested and available.
pub fn cycle_qdlin(
    cell: &CellRecord,
    cycle: &CycleRecord,
    dims: usize,
    use_precalculated: bool,
) -> CdtResult<Vec<f64>> {
    if use_precalculated {
        if let Some(curve) = &cycle.extra.qdlin {
            return Ok(curve.clone());
        }
    }
    let (min_v, max_v) = cell.voltage_bounds().ok_or_else(|| {
        CdtError::Validation(format!(
            "cell '{}' has no voltage limits for the interpolation grid",
            cell.cell_id
        ))
    })?;
    Ok(compute_qdlin(cycle, min_v, max_v, dims))
}

/// Smoothed trend of a curve: the centered rolling median with radius
/// [`SMOOTH_RADIUS`]. A window containing NaN yields NaN.
pub fn smooth(curve: &[f64]) -> Vec<f64> {
    rolling_median(curve, SMOOTH_RADIUS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn discharge_cycle(points: usize) -> CycleRecord {
        // linear discharge from 3.5 V to 2.0 V delivering 1.1 Ah
        let voltage: Vec<f64> = linspace(3.5, 2.0, points);
        let capacity: Vec<f64> = linspace(0.0, 1.1, points);
        CycleRecord::new(
            1,
            (0..points).map(|i| i as f64).collect(),
            vec![-4.4; points],
            voltage,
            vec![0.0; points],
            capacity,
        )
    }

    #[test]
    fn linspace_hits_both_ends() {
        let grid = linspace(2.0, 3.5, 4);
        assert_eq!(grid, vec![2.0, 2.5, 3.0, 3.5]);
        assert_eq!(linspace(1.0, 2.0, 1), vec![1.0]);
    }

    #[test]
    fn interpolation_outside_range_is_nan() {
        let out = interpolate(&[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0], &[0.5, 1.5, 3.0, 3.5]);
        assert!(out[0].is_nan());
        assert_relative_eq!(out[1], 15.0);
        assert_relative_eq!(out[2], 30.0);
        assert!(out[3].is_nan());
    }

    #[test]
    fn interpolation_sorts_unsorted_samples() {
        let out = interpolate(&[3.0, 1.0, 2.0], &[30.0, 10.0, 20.0], &[2.5]);
        assert_relative_eq!(out[0], 25.0);
    }

    #[test]
    fn two_discharge_samples_give_zeros() {
        let cycle = discharge_cycle(2);
        let curve = compute_qdlin(&cycle, 2.0, 3.5, 1000);
        assert_eq!(curve.len(), 1000);
        assert!(curve.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn qdlin_is_ordered_by_increasing_capacity() {
        let cycle = discharge_cycle(50);
        let curve = compute_qdlin(&cycle, 2.0, 3.5, 100);
        assert_relative_eq!(curve[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(curve[99], 1.1, epsilon = 1e-9);
        assert!(curve.windows(2).all(|w| w[1] >= w[0] - 1e-12));
    }

    #[test]
    fn rest_and_charge_samples_are_ignored() {
        let mut cycle = discharge_cycle(50);
        cycle.current_a[0] = 1.0;
        cycle.current_a[1] = -0.05;
        let curve = compute_qdlin(&cycle, 2.0, 3.5, 100);
        // the top of the voltage grid is now outside the discharge samples
        assert!(curve[0].is_nan());
        assert!(!curve[99].is_nan());
    }

    #[test]
    fn precalculated_curve_is_preferred_when_asked() {
        let mut cycle = discharge_cycle(50);
        cycle.extra.qdlin = Some(vec![0.5; 3]);
        let mut cell = CellRecord::new("c", vec![cycle.clone()]);
        assert!(cycle_qdlin(&cell, &cycle, 10, false).is_err());
        cell.min_voltage_limit_v = Some(2.0);
        cell.max_voltage_limit_v = Some(3.5);
        assert_eq!(cycle_qdlin(&cell, &cycle, 10, true).unwrap(), vec![0.5; 3]);
        assert_eq!(cycle_qdlin(&cell, &cycle, 10, false).unwrap().len(), 10);
    }

    #[test]
    fn smooth_returns_rolling_median() {
        let mut curve = vec![0.0; 30];
        curve[15] = 5.0;
        let smoothed = smooth(&curve);
        assert!(smoothed.iter().all(|v| *v == 0.0));
        curve[3] = f64::NAN;
        assert!(smooth(&curve)[0].is_nan());
        assert!(!smooth(&curve)[29].is_nan());
    }
}
