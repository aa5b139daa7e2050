//! Scalar degradation features over the early/late Qdlin difference curve,
//! the capacity fade curve, and auxiliary per-cycle measurements.

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use cdt_core::{CdtError, CdtResult, CellRecord};

use super::qdlin::{cycle_qdlin, smooth};
use crate::stats::{linear_fit, nan_mean};

/// Guard added before taking logarithms and ratios.
pub const EPS: f64 = 1e-8;
/// Number of leading cycles averaged by [`ScalarFeature::AvgChargeTime`].
pub const EARLY_CHARGE_CYCLES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarFeature {
    DiffMinimum,
    DiffVariance,
    DiffSkewness,
    DiffKurtosis,
    FadeEarly,
    FadeMaxMinusEarly,
    FadeSlope,
    FadeIntercept,
    AvgChargeTime,
    AvgTemperature,
    MinInternalResistance,
    InternalResistanceChange,
}

impl ScalarFeature {
    pub fn name(&self) -> &'static str {
        match self {
            ScalarFeature::DiffMinimum => "diff_qdlin_minimum",
            ScalarFeature::DiffVariance => "diff_qdlin_variance",
            ScalarFeature::DiffSkewness => "diff_qdlin_skewness",
            ScalarFeature::DiffKurtosis => "diff_qdlin_kurtosis",
            ScalarFeature::FadeEarly => "early_discharge_capacity",
            ScalarFeature::FadeMaxMinusEarly => "max_minus_early_discharge_capacity",
            ScalarFeature::FadeSlope => "fade_slope",
            ScalarFeature::FadeIntercept => "fade_intercept",
            ScalarFeature::AvgChargeTime => "avg_early_charge_time",
            ScalarFeature::AvgTemperature => "avg_temperature",
            ScalarFeature::MinInternalResistance => "min_internal_resistance",
            ScalarFeature::InternalResistanceChange => "internal_resistance_change",
        }
    }

    fn uses_diff_curve(&self) -> bool {
        matches!(
            self,
            ScalarFeature::DiffMinimum
                | ScalarFeature::DiffVariance
                | ScalarFeature::DiffSkewness
                | ScalarFeature::DiffKurtosis
        )
    }
}

/// Parameters shared by the scalar feature sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalarConfig {
    pub interp_dims: usize,
    /// Three reference cycle positions: fade window start, early and late
    /// Qdlin cycles (sorted before use).
    pub critical_cycles: Vec<usize>,
    pub smooth_diff_qdlin: bool,
    pub use_precalculated_qdlin: bool,
}

impl Default for ScalarConfig {
    fn default() -> Self {
        Self {
            interp_dims: 1000,
            critical_cycles: vec![1, 9, 99],
            smooth_diff_qdlin: true,
            use_precalculated_qdlin: false,
        }
    }
}

impl ScalarConfig {
    fn reference_cycles(&self) -> CdtResult<[usize; 3]> {
        let mut sorted = self.critical_cycles.clone();
        sorted.sort_unstable();
        match sorted.as_slice() {
            [a, b, c] => Ok([*a, *b, *c]),
            _ => Err(CdtError::Config(format!(
                "critical_cycles needs exactly 3 entries, got {}",
                sorted.len()
            ))),
        }
    }
}

/// Extract `features` from `cell`, in order. Non-finite values become 0.
pub fn extract_scalar(
    cell: &CellRecord,
    features: &[ScalarFeature],
    config: &ScalarConfig,
) -> CdtResult<Array1<f64>> {
    let [start, early, late] = config.reference_cycles()?;
    if cell.cycle_data.len() <= late {
        return Err(CdtError::InsufficientCycles {
            cell_id: cell.cell_id.clone(),
            required: late + 1,
            available: cell.cycle_data.len(),
        });
    }

    let diff = if features.iter().any(ScalarFeature::uses_diff_curve) {
        difference_curve(cell, early, late, config)?
    } else {
        Vec::new()
    };
    let fade: Vec<f64> = cell.discharge_capacity_trend()[start..late].to_vec();

    let mut values = Vec::with_capacity(features.len());
    for feature in features {
        let value = match feature {
            ScalarFeature::DiffMinimum => {
                let min = diff.iter().copied().fold(f64::INFINITY, f64::min);
                (min.abs() + EPS).log10()
            }
            ScalarFeature::DiffVariance => (diff.iter().variance() + EPS).log10(),
            ScalarFeature::DiffSkewness => {
                let std = diff.iter().std_dev();
                (central_moment(&diff, 3).abs() / (std.powi(3) + EPS) + EPS).log10()
            }
            ScalarFeature::DiffKurtosis => {
                let var = diff.iter().variance();
                (central_moment(&diff, 4) / (var.powi(2) + EPS) + EPS).log10()
            }
            ScalarFeature::FadeEarly => fade_early(&fade, start)?,
            ScalarFeature::FadeMaxMinusEarly => {
                let max = fade.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                max - fade_early(&fade, start)?
            }
            ScalarFeature::FadeSlope => linear_fit(&fade).0,
            ScalarFeature::FadeIntercept => linear_fit(&fade).1,
            ScalarFeature::AvgChargeTime => avg_charge_time(cell),
            ScalarFeature::AvgTemperature => avg_temperature(cell, start, late),
            ScalarFeature::MinInternalResistance => min_internal_resistance(cell, start, late),
            ScalarFeature::InternalResistanceChange => {
                match (
                    cell.cycle_data[start].internal_resistance_ohm,
                    cell.cycle_data[late].internal_resistance_ohm,
                ) {
                    (Some(first), Some(last)) => last - first,
                    _ => 0.0,
                }
            }
        };
        values.push(if value.is_finite() { value } else { 0.0 });
    }
    Ok(Array1::from(values))
}

/// Late-minus-early Qdlin, optionally smoothed, with NaN points removed.
pub fn difference_curve(
    cell: &CellRecord,
    early: usize,
    late: usize,
    config: &ScalarConfig,
) -> CdtResult<Vec<f64>> {
    let early_curve = cycle_qdlin(
        cell,
        &cell.cycle_data[early],
        config.interp_dims,
        config.use_precalculated_qdlin,
    )?;
    let late_curve = cycle_qdlin(
        cell,
        &cell.cycle_data[late],
        config.interp_dims,
        config.use_precalculated_qdlin,
    )?;
    if late_curve.len() != early_curve.len() {
        return Err(CdtError::Validation(format!(
            "cell '{}': Qdlin of cycle {} has {} points, cycle {} has {}",
            cell.cell_id,
            cell.cycle_data[late].cycle_number,
            late_curve.len(),
            cell.cycle_data[early].cycle_number,
            early_curve.len()
        )));
    }
    let mut diff: Vec<f64> = late_curve
        .iter()
        .zip(&early_curve)
        .map(|(l, e)| l - e)
        .collect();
    if config.smooth_diff_qdlin {
        diff = smooth(&diff);
    }
    diff.retain(|v| !v.is_nan());
    if diff.len() < 2 {
        return Err(CdtError::DegenerateCurve {
            cell_id: cell.cell_id.clone(),
            finite_points: diff.len(),
        });
    }
    Ok(diff)
}

fn central_moment(values: &[f64], order: i32) -> f64 {
    let mean = values.iter().mean();
    values.iter().map(|v| (v - mean).powi(order)).sum::<f64>() / values.len() as f64
}

// The fade window already starts at `start`, so the early reference is
// looked up at offset `start` inside the window.
fn fade_early(fade: &[f64], start: usize) -> CdtResult<f64> {
    fade.get(start).copied().ok_or_else(|| {
        CdtError::Config(format!(
            "fade window of {} cycles has no early reference at offset {start}",
            fade.len()
        ))
    })
}

fn avg_charge_time(cell: &CellRecord) -> f64 {
    let times: Vec<f64> = cell
        .cycle_data
        .iter()
        .take(EARLY_CHARGE_CYCLES)
        .map(|cycle| {
            let mut total = 0.0;
            for i in 1..cycle.current_a.len().min(cycle.time_s.len()) {
                if cycle.current_a[i] < 0.0 {
                    total += cycle.time_s[i] - cycle.time_s[i - 1];
                }
            }
            total
        })
        .collect();
    let mean = if times.is_empty() {
        0.0
    } else {
        times.iter().mean()
    };
    (mean + EPS).ln()
}

fn avg_temperature(cell: &CellRecord, start: usize, late: usize) -> f64 {
    let per_cycle: Vec<f64> = cell.cycle_data[start..=late]
        .iter()
        .filter_map(|cycle| cycle.temperature_c.as_deref().and_then(nan_mean))
        .collect();
    let mean = if per_cycle.is_empty() {
        0.0
    } else {
        per_cycle.iter().mean()
    };
    (mean + EPS).ln()
}

fn min_internal_resistance(cell: &CellRecord, start: usize, late: usize) -> f64 {
    let ir: Vec<f64> = cell.cycle_data[start..=late]
        .iter()
        .filter_map(|cycle| cycle.internal_resistance_ohm)
        .collect();
    if ir.is_empty() {
        return 0.0;
    }
    if ir.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    ir.iter().copied().fold(f64::INFINITY, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::qdlin::linspace;
    use approx::assert_relative_eq;
    use cdt_core::CycleRecord;

    /// Discharge from 3.5 V to 2.0 V whose delivered capacity shrinks by
    /// `fade` per cycle.
    pub(crate) fn fading_cell(cycles: usize, fade: f64) -> CellRecord {
        let data = (0..cycles)
            .map(|n| {
                let capacity = 1.1 - fade * n as f64;
                let points = 60;
                CycleRecord::new(
                    n as u32 + 1,
                    (0..points).map(|i| 10.0 * i as f64).collect(),
                    vec![-4.4; points],
                    linspace(3.5, 2.0, points),
                    vec![0.0; points],
                    linspace(0.0, capacity, points),
                )
                .with_temperature(vec![30.0; points])
                .with_internal_resistance(0.016 + 0.0001 * n as f64)
            })
            .collect();
        let mut cell = CellRecord::new("fade", data);
        cell.min_voltage_limit_v = Some(2.0);
        cell.max_voltage_limit_v = Some(3.5);
        cell.nominal_capacity_ah = Some(1.1);
        cell
    }

    fn small_config() -> ScalarConfig {
        ScalarConfig {
            interp_dims: 200,
            critical_cycles: vec![9, 1, 19],
            ..ScalarConfig::default()
        }
    }

    #[test]
    fn fade_features_follow_capacity_curve() {
        let cell = fading_cell(20, 0.001);
        let values = extract_scalar(
            &cell,
            &[
                ScalarFeature::FadeEarly,
                ScalarFeature::FadeMaxMinusEarly,
                ScalarFeature::FadeSlope,
                ScalarFeature::FadeIntercept,
            ],
            &small_config(),
        )
        .unwrap();
        // window covers cycles 1..19, early reference sits at window offset 1
        assert_relative_eq!(values[0], 1.1 - 0.002, epsilon = 1e-12);
        assert_relative_eq!(values[1], 0.001, epsilon = 1e-12);
        assert_relative_eq!(values[2], -0.001, epsilon = 1e-12);
        assert_relative_eq!(values[3], 1.099, epsilon = 1e-12);
    }

    #[test]
    fn auxiliary_features() {
        let cell = fading_cell(20, 0.001);
        let values = extract_scalar(
            &cell,
            &[
                ScalarFeature::AvgChargeTime,
                ScalarFeature::AvgTemperature,
                ScalarFeature::MinInternalResistance,
                ScalarFeature::InternalResistanceChange,
            ],
            &small_config(),
        )
        .unwrap();
        // 59 negative-current steps of 10 s
        assert_relative_eq!(values[0], (590.0 + EPS).ln(), epsilon = 1e-12);
        assert_relative_eq!(values[1], (30.0 + EPS).ln(), epsilon = 1e-12);
        assert_relative_eq!(values[2], 0.0161, epsilon = 1e-12);
        assert_relative_eq!(values[3], 0.0018, epsilon = 1e-12);
    }

    #[test]
    fn missing_internal_resistance_is_zero() {
        let mut cell = fading_cell(20, 0.001);
        for cycle in &mut cell.cycle_data {
            cycle.internal_resistance_ohm = None;
        }
        let values = extract_scalar(
            &cell,
            &[
                ScalarFeature::MinInternalResistance,
                ScalarFeature::InternalResistanceChange,
            ],
            &small_config(),
        )
        .unwrap();
        assert_eq!(values.to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn diff_curve_statistics_are_finite() {
        let cell = fading_cell(20, 0.001);
        let values = extract_scalar(
            &cell,
            &[
                ScalarFeature::DiffMinimum,
                ScalarFeature::DiffVariance,
                ScalarFeature::DiffSkewness,
                ScalarFeature::DiffKurtosis,
            ],
            &small_config(),
        )
        .unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
        // linear loss of 0.01 Ah at the bottom of the grid; the edge of the
        // rolling median sits five grid points in
        let deepest = 0.01 * 194.0 / 199.0;
        assert_relative_eq!(values[0], (deepest + EPS).log10(), epsilon = 1e-6);
    }

    #[test]
    fn all_zero_curves_collapse_to_guarded_logs() {
        let mut cell = fading_cell(20, 0.0);
        for cycle in &mut cell.cycle_data {
            cycle.current_a = vec![0.0; cycle.len()];
        }
        let values = extract_scalar(
            &cell,
            &[ScalarFeature::DiffMinimum, ScalarFeature::DiffVariance],
            &small_config(),
        )
        .unwrap();
        assert_relative_eq!(values[0], -8.0, epsilon = 1e-9);
        assert_relative_eq!(values[1], -8.0, epsilon = 1e-9);
    }

    #[test]
    fn degenerate_curve_is_an_error() {
        let mut cell = fading_cell(20, 0.001);
        // a grid entirely outside the discharged voltage window
        cell.min_voltage_limit_v = Some(4.0);
        cell.max_voltage_limit_v = Some(4.2);
        let err = extract_scalar(&cell, &[ScalarFeature::DiffVariance], &small_config())
            .unwrap_err();
        assert!(matches!(
            err,
            CdtError::DegenerateCurve { finite_points: 0, .. }
        ));
    }

    #[test]
    fn curves_of_different_width_are_rejected() {
        let mut cell = fading_cell(20, 0.001);
        cell.cycle_data[9].extra.qdlin = Some(vec![0.5; 50]);
        let config = ScalarConfig {
            use_precalculated_qdlin: true,
            ..small_config()
        };
        let err = difference_curve(&cell, 1, 9, &config).unwrap_err();
        assert!(matches!(err, CdtError::Validation(_)));
        assert!(err.to_string().contains("has 50 points"));
        assert!(difference_curve(&cell, 1, 8, &config).is_ok());
    }

    #[test]
    fn too_few_cycles_is_reported() {
        let cell = fading_cell(10, 0.001);
        let err = extract_scalar(&cell, &[ScalarFeature::FadeSlope], &small_config())
            .unwrap_err();
        assert!(matches!(
            err,
            CdtError::InsufficientCycles {
                required: 20,
                available: 10,
                ..
            }
        ));
    }

    #[test]
    fn critical_cycles_must_have_three_entries() {
        let cell = fading_cell(20, 0.001);
        let config = ScalarConfig {
            critical_cycles: vec![1, 9],
            ..ScalarConfig::default()
        };
        assert!(matches!(
            extract_scalar(&cell, &[ScalarFeature::FadeSlope], &config),
            Err(CdtError::Config(_))
        ));
    }
}
