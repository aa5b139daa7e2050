//! Cycle boundary detection.
//!
//! Two strategies:
//!
//! - **Marker runs**: when the raw export carries a cycle or step marker per
//!   row, a change of marker value starts a new cycle. Keys may be compound
//!   (e.g. `(file, marker)`) so equal markers from different files stay
//!   separate runs.
//! - **Waveform**: when only the current trace is available, a cycle starts
//!   where the current enters a sustained discharge. [`WaveformSegmenter`]
//!   debounces the entry, suppresses boundaries that follow a previous one too
//!   closely, and ignores single-sample current glitches.

use std::ops::Range;

/// Consecutive negative samples needed before a discharge entry counts.
pub const DEFAULT_DEBOUNCE: usize = 10;
/// Trailing window (in samples) inside which a second boundary is dropped.
pub const DEFAULT_SUPPRESSION: usize = 500;
/// Jump (in amperes) on both sides that marks a sample as a glitch.
pub const DEFAULT_GLITCH_TOLERANCE: f64 = 0.1;

// ============================================================================
// Marker runs
// ============================================================================

/// Contiguous index ranges over runs of equal keys, in input order.
pub fn segment_by_marker<K: PartialEq>(keys: &[K]) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..keys.len() {
        if keys[i] != keys[i - 1] {
            runs.push(start..i);
            start = i;
        }
    }
    if !keys.is_empty() {
        runs.push(start..keys.len());
    }
    runs
}

/// Replace raw markers with a contiguous 1-based cycle number that advances
/// on every change of marker value.
pub fn renumber_markers<K: PartialEq>(keys: &[K]) -> Vec<u32> {
    let mut numbers = Vec::with_capacity(keys.len());
    let mut current = 0u32;
    for i in 0..keys.len() {
        if i == 0 || keys[i] != keys[i - 1] {
            current += 1;
        }
        numbers.push(current);
    }
    numbers
}

// ============================================================================
// Waveform boundaries
// ============================================================================

/// Replace each isolated single-sample glitch by its right neighbour.
///
/// A sample is a glitch when it differs from both neighbours by more than
/// `tolerance`. Neighbours are taken from the unmodified input, and the first
/// and last samples are never replaced.
pub fn despike_current(current: &[f64], tolerance: f64) -> Vec<f64> {
    let mut cleaned = current.to_vec();
    for i in 1..current.len().saturating_sub(1) {
        if (current[i] - current[i - 1]).abs() > tolerance
            && (current[i] - current[i + 1]).abs() > tolerance
        {
            cleaned[i] = current[i + 1];
        }
    }
    cleaned
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformSegmenter {
    pub debounce: usize,
    pub suppression: usize,
    pub glitch_tolerance: f64,
}

impl Default for WaveformSegmenter {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            suppression: DEFAULT_SUPPRESSION,
            glitch_tolerance: DEFAULT_GLITCH_TOLERANCE,
        }
    }
}

impl WaveformSegmenter {
    pub fn with_debounce(mut self, debounce: usize) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_suppression(mut self, suppression: usize) -> Self {
        self.suppression = suppression;
        self
    }

    /// Sample indices where a new cycle starts, ascending.
    ///
    /// The boundary is placed at the first sample of a run of `debounce`
    /// negative-current samples. A candidate is dropped when an earlier
    /// boundary lies within the `suppression` samples before it; the window
    /// is clipped at the start of the trace.
    pub fn find_cycle_starts(&self, current: &[f64]) -> Vec<usize> {
        let cleaned = despike_current(current, self.glitch_tolerance);
        let mut starts: Vec<usize> = Vec::new();
        let mut run = 0usize;
        for (i, value) in cleaned.iter().enumerate() {
            if *value < 0.0 {
                run += 1;
            } else {
                run = 0;
            }
            if self.debounce == 0 || run != self.debounce {
                continue;
            }
            let start = i + 1 - self.debounce;
            let window_begin = start.saturating_sub(self.suppression);
            if starts.last().is_some_and(|last| *last >= window_begin) {
                continue;
            }
            starts.push(start);
        }
        starts
    }
}

/// Sample ranges between consecutive cycle starts.
///
/// The first `discard_leading` starts are skipped (an incomplete
/// begin-of-life segment is an adapter decision), and samples after the last
/// start are not part of any cycle.
pub fn cycle_ranges(starts: &[usize], discard_leading: usize) -> Vec<Range<usize>> {
    let kept = starts.get(discard_leading..).unwrap_or(&[]);
    kept.windows(2).map(|w| w[0]..w[1]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_runs_split_on_change() {
        let markers = [1, 1, 1, 2, 2, 3, 3, 3, 3];
        let runs = segment_by_marker(&markers);
        assert_eq!(runs, vec![0..3, 3..5, 5..9]);
        let counts: Vec<usize> = runs.iter().map(|r| r.len()).collect();
        assert_eq!(counts, vec![3, 2, 4]);
        assert_eq!(renumber_markers(&markers), vec![1, 1, 1, 2, 2, 3, 3, 3, 3]);
    }

    #[test]
    fn repeated_markers_across_files_stay_separate() {
        let keys = [("a", 5), ("a", 5), ("b", 5), ("b", 6)];
        assert_eq!(renumber_markers(&keys), vec![1, 1, 2, 3]);
    }

    #[test]
    fn non_contiguous_markers_are_renumbered() {
        assert_eq!(renumber_markers(&[7, 7, 9, 4, 4]), vec![1, 1, 2, 3, 3]);
        assert!(segment_by_marker::<u32>(&[]).is_empty());
    }

    #[test]
    fn glitch_replaced_by_right_neighbour() {
        let current = [1.0, 1.0, -3.0, 1.0, 1.0];
        assert_eq!(despike_current(&current, 0.1), vec![1.0; 5]);
        // a step is not a glitch
        let step = [1.0, 1.0, -1.0, -1.0];
        assert_eq!(despike_current(&step, 0.1), step.to_vec());
    }

    fn square_wave(periods: usize, half: usize) -> Vec<f64> {
        (0..periods * 2 * half)
            .map(|i| if (i / half) % 2 == 0 { 1.0 } else { -1.0 })
            .collect()
    }

    #[test]
    fn detects_discharge_entries() {
        let current = square_wave(3, 20);
        let seg = WaveformSegmenter::default().with_suppression(5);
        assert_eq!(seg.find_cycle_starts(&current), vec![20, 60, 100]);
    }

    #[test]
    fn short_negative_runs_are_debounced() {
        let mut current = vec![1.0; 40];
        for value in current.iter_mut().skip(10).take(5) {
            *value = -1.0;
        }
        assert!(WaveformSegmenter::default().find_cycle_starts(&current).is_empty());
    }

    #[test]
    fn nearby_boundaries_are_suppressed() {
        let current = square_wave(3, 20);
        let seg = WaveformSegmenter::default().with_suppression(50);
        // 60 is within 50 samples of 20; 100 is not within 50 of 20
        assert_eq!(seg.find_cycle_starts(&current), vec![20, 100]);
    }

    #[test]
    fn single_sample_glitch_does_not_break_a_run() {
        let mut current = vec![1.0; 10];
        current.extend(vec![-1.0; 4]);
        current.push(1.0);
        current.extend(vec![-1.0; 10]);
        let starts = WaveformSegmenter::default().find_cycle_starts(&current);
        assert_eq!(starts, vec![10]);
    }

    #[test]
    fn ranges_between_starts() {
        assert_eq!(cycle_ranges(&[3, 10, 20, 35], 1), vec![10..20, 20..35]);
        assert_eq!(cycle_ranges(&[3, 10], 0), vec![3..10]);
        assert!(cycle_ranges(&[3], 1).is_empty());
    }
}
