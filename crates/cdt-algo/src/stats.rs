//! Small robust-statistics helpers shared by the cleaner and the feature
//! extractor.

use statrs::statistics::Statistics;

/// Median of `values`. NaN when `values` is empty or contains a NaN;
/// even-length inputs average the two middle values.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Mean over the non-NaN entries, `None` when there are none.
pub fn nan_mean(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if finite.is_empty() {
        None
    } else {
        Some(finite.iter().mean())
    }
}

/// Centered rolling median with a window of `radius` samples on each side,
/// truncated at the edges of the series.
pub fn rolling_median(values: &[f64], radius: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(values.len());
            median(&values[lo..hi])
        })
        .collect()
}

/// Ordinary least squares fit of `y` against `0..y.len()`, as
/// `(slope, intercept)`.
pub fn linear_fit(y: &[f64]) -> (f64, f64) {
    let x: Vec<f64> = (0..y.len()).map(|i| i as f64).collect();
    let x_mean = x.iter().mean();
    let y_mean = y.iter().mean();
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (xi, yi) in x.iter().zip(y) {
        sxy += (xi - x_mean) * (yi - y_mean);
        sxx += (xi - x_mean) * (xi - x_mean);
    }
    let slope = sxy / sxx;
    (slope, y_mean - slope * x_mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn median_odd_even_and_nan() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[1.0, f64::NAN]).is_nan());
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn nan_mean_skips_missing() {
        assert_eq!(nan_mean(&[1.0, f64::NAN, 3.0]), Some(2.0));
        assert_eq!(nan_mean(&[f64::NAN]), None);
    }

    #[test]
    fn rolling_median_truncates_edges() {
        let r = rolling_median(&[1.0, 9.0, 1.0, 1.0, 5.0], 1);
        assert_eq!(r, vec![5.0, 1.0, 1.0, 1.0, 3.0]);
    }

    #[test]
    fn linear_fit_recovers_line() {
        let y: Vec<f64> = (0..10).map(|i| 1.08 - 0.002 * i as f64).collect();
        let (slope, intercept) = linear_fit(&y);
        assert_relative_eq!(slope, -0.002, epsilon = 1e-12);
        assert_relative_eq!(intercept, 1.08, epsilon = 1e-12);
    }
}
