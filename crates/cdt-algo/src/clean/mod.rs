//! Cycle-level anomaly detection and resolution.
//!
//! A [`CycleCleaner`] runs in three steps over one cell:
//!
//! 1. **Exclusions**: hard per-cell overrides (first cycle, capacity floor)
//!    are flagged before any statistics run.
//! 2. **Detection**: the configured [`DetectionPolicy`] flags outliers in the
//!    per-cycle discharge-capacity series.
//! 3. **Resolution**: flagged cycles are either imputed from the nearest
//!    valid neighbour (searching backward, then forward) or dropped with the
//!    survivors renumbered from 1.
//!
//! Imputation also fills cycle numbers missing from the raw data. Only the
//! cycle number of an imputed copy differs from its donor.

pub mod detect;

use std::collections::{BTreeMap, BTreeSet};

use cdt_core::{CdtError, CdtResult, CycleRecord, Diagnostics};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use detect::{DetectionPolicy, ShiftRule};

/// What happens to a flagged cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Replace the cycle with a copy of its nearest valid neighbour.
    Impute,
    /// Remove the cycle and renumber the survivors contiguously from 1.
    Drop,
}

/// Per-cell overrides applied before detection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exclusions {
    pub exclude_first_cycle: bool,
    pub capacity_floor: Option<CapacityFloor>,
    /// Clean cycles removed from the front after resolution.
    pub drop_leading_clean: usize,
}

/// Discharge capacity threshold for flagging dead cycles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CapacityFloor {
    /// Flag cycles strictly below the value.
    Below(f64),
    /// Flag cycles at or below the value.
    AtOrBelow(f64),
}

impl CapacityFloor {
    /// NaN capacities are never excluded by the floor.
    pub fn excludes(&self, capacity: f64) -> bool {
        match *self {
            CapacityFloor::Below(floor) => capacity < floor,
            CapacityFloor::AtOrBelow(floor) => capacity <= floor,
        }
    }
}

/// What the cleaner did to one cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanReport {
    /// Present cycles flagged by an exclusion or the detector
    pub flagged: BTreeSet<u32>,
    /// Cycle numbers absent from the raw data (imputation only)
    pub missing: BTreeSet<u32>,
    /// Flagged or missing cycle -> donor cycle
    pub donors: BTreeMap<u32, u32>,
    /// Original numbers of cycles removed under [`Resolution::Drop`]
    pub dropped: Vec<u32>,
}

impl CleanReport {
    pub fn is_clean(&self) -> bool {
        self.flagged.is_empty() && self.missing.is_empty() && self.dropped.is_empty()
    }

    /// Copy the report into a cell's diagnostics.
    pub fn record(&self, diagnostics: &mut Diagnostics) {
        for (cycle, donor) in &self.donors {
            let reason = if self.missing.contains(cycle) {
                "missing cycle"
            } else {
                "capacity outlier"
            };
            diagnostics.add_cycle_warning(
                "cleaning",
                &format!("{reason} imputed from cycle {donor}"),
                *cycle,
            );
        }
        for cycle in &self.dropped {
            diagnostics.add_cycle_warning("cleaning", "cycle dropped", *cycle);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleCleaner {
    pub policy: DetectionPolicy,
    pub resolution: Resolution,
    pub exclusions: Exclusions,
}

impl CycleCleaner {
    pub fn new(policy: DetectionPolicy, resolution: Resolution) -> Self {
        Self {
            policy,
            resolution,
            exclusions: Exclusions::default(),
        }
    }

    pub fn with_exclusions(mut self, exclusions: Exclusions) -> Self {
        self.exclusions = exclusions;
        self
    }

    /// Clean the cycles of one cell.
    ///
    /// `capacity` is the per-cycle discharge capacity as `(cycle_number,
    /// value)` pairs when the cycler reports its own summary; otherwise the
    /// maximum of each cycle's discharge-capacity trace is used.
    pub fn clean(
        &self,
        cell_id: &str,
        mut cycles: Vec<CycleRecord>,
        capacity: Option<&[(u32, f64)]>,
    ) -> CdtResult<(Vec<CycleRecord>, CleanReport)> {
        cycles.sort_by_key(|c| c.cycle_number);
        let series: Vec<(u32, f64)> = match capacity {
            Some(summary) => summary.to_vec(),
            None => cycles
                .iter()
                .map(|c| (c.cycle_number, c.max_discharge_capacity()))
                .collect(),
        };
        let values: Vec<f64> = series.iter().map(|(_, q)| *q).collect();

        let mut flags = self.policy.flag(&values);
        if self.exclusions.exclude_first_cycle {
            if let Some(first) = flags.first_mut() {
                *first = true;
            }
        }
        if let Some(floor) = self.exclusions.capacity_floor {
            for (flag, q) in flags.iter_mut().zip(&values) {
                *flag |= floor.excludes(*q);
            }
        }
        let flagged: BTreeSet<u32> = series
            .iter()
            .zip(&flags)
            .filter(|(_, hit)| **hit)
            .map(|((n, _), _)| *n)
            .collect();
        debug!(cell_id, flagged = flagged.len(), "capacity outliers detected");

        let mut report = CleanReport {
            flagged,
            ..CleanReport::default()
        };
        let cleaned = match self.resolution {
            Resolution::Impute => impute(cell_id, cycles, &mut report)?,
            Resolution::Drop => drop_flagged(cycles, self.exclusions.drop_leading_clean, &mut report),
        };
        if !report.is_clean() {
            warn!(
                cell_id,
                flagged = report.flagged.len(),
                missing = report.missing.len(),
                dropped = report.dropped.len(),
                "cycles cleaned"
            );
        }
        Ok((cleaned, report))
    }
}

/// Nearest cycle number not in `flagged`: backward while above zero, then
/// forward. Cycle 0 is never a donor.
pub fn find_donor(cycle: u32, flagged: &BTreeSet<u32>) -> u32 {
    let mut candidate = cycle;
    while candidate > 0 && flagged.contains(&candidate) {
        candidate -= 1;
    }
    while candidate == 0 || flagged.contains(&candidate) {
        candidate += 1;
    }
    candidate
}

fn impute(
    cell_id: &str,
    cycles: Vec<CycleRecord>,
    report: &mut CleanReport,
) -> CdtResult<Vec<CycleRecord>> {
    let by_number: BTreeMap<u32, CycleRecord> =
        cycles.into_iter().map(|c| (c.cycle_number, c)).collect();
    let last = by_number.keys().next_back().copied().unwrap_or(0);
    report.missing = (1..=last).filter(|n| !by_number.contains_key(n)).collect();

    let to_fill: BTreeSet<u32> = report.flagged.union(&report.missing).copied().collect();
    let mut out: BTreeMap<u32, CycleRecord> = by_number
        .iter()
        .filter(|(n, _)| !to_fill.contains(n))
        .map(|(n, c)| (*n, c.clone()))
        .collect();
    for cycle in &to_fill {
        let donor = find_donor(*cycle, &to_fill);
        let record = by_number.get(&donor).ok_or_else(|| CdtError::Imputation {
            cell_id: cell_id.to_string(),
            cycle: *cycle,
            candidate: donor,
        })?;
        out.insert(*cycle, record.renumbered(*cycle));
        report.donors.insert(*cycle, donor);
    }
    Ok(out.into_values().collect())
}

fn drop_flagged(
    cycles: Vec<CycleRecord>,
    drop_leading_clean: usize,
    report: &mut CleanReport,
) -> Vec<CycleRecord> {
    let mut kept = Vec::with_capacity(cycles.len());
    for cycle in cycles {
        if report.flagged.contains(&cycle.cycle_number) {
            report.dropped.push(cycle.cycle_number);
        } else {
            kept.push(cycle);
        }
    }
    let skip = drop_leading_clean.min(kept.len());
    report
        .dropped
        .extend(kept.iter().take(skip).map(|c| c.cycle_number));
    kept.into_iter()
        .skip(skip)
        .enumerate()
        .map(|(i, mut cycle)| {
            cycle.cycle_number = i as u32 + 1;
            cycle
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(n: u32, qd: f64) -> CycleRecord {
        CycleRecord::new(
            n,
            vec![0.0, 1.0],
            vec![-1.0, -1.0],
            vec![4.0, 3.0],
            vec![0.0, 0.0],
            vec![0.0, qd],
        )
    }

    fn median_filter() -> DetectionPolicy {
        DetectionPolicy::MedianFilter {
            window: 21,
            multiple: 3.0,
        }
    }

    #[test]
    fn donor_search_goes_back_then_forward() {
        let flagged: BTreeSet<u32> = [1, 2, 5].into_iter().collect();
        assert_eq!(find_donor(5, &flagged), 4);
        assert_eq!(find_donor(2, &flagged), 3);
        assert_eq!(find_donor(1, &flagged), 3);
        assert_eq!(find_donor(7, &flagged), 7);
    }

    #[test]
    fn imputes_outlier_from_previous_cycle() {
        let qd = [1.0, 1.0, 1.0, 0.1, 1.0, 1.0];
        let mut cycles: Vec<CycleRecord> = qd
            .iter()
            .enumerate()
            .map(|(i, q)| cycle(i as u32 + 1, *q))
            .collect();
        // make the donor distinguishable from its neighbours
        cycles[2].voltage_v = vec![4.1, 2.9];
        let cleaner = CycleCleaner::new(median_filter(), Resolution::Impute);
        let (cleaned, report) = cleaner.clean("cell", cycles.clone(), None).unwrap();

        assert_eq!(report.flagged.iter().copied().collect::<Vec<_>>(), vec![4]);
        assert_eq!(report.donors.get(&4), Some(&3));
        assert_eq!(cleaned.len(), 6);
        assert_eq!(cleaned[3], cycles[2].renumbered(4));
        let numbers: Vec<u32> = cleaned.iter().map(|c| c.cycle_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn cleaning_is_idempotent() {
        let qd = [1.0, 1.0, 1.0, 0.1, 1.0, 1.0];
        let cycles: Vec<CycleRecord> = qd
            .iter()
            .enumerate()
            .map(|(i, q)| cycle(i as u32 + 1, *q))
            .collect();
        let cleaner = CycleCleaner::new(median_filter(), Resolution::Impute);
        let (once, _) = cleaner.clean("cell", cycles, None).unwrap();
        let (twice, report) = cleaner.clean("cell", once.clone(), None).unwrap();
        assert!(report.is_clean());
        assert_eq!(once, twice);
    }

    #[test]
    fn missing_cycles_are_filled() {
        let cycles = vec![cycle(1, 1.0), cycle(2, 1.0), cycle(4, 1.0)];
        let cleaner = CycleCleaner::new(median_filter(), Resolution::Impute);
        let (cleaned, report) = cleaner.clean("cell", cycles, None).unwrap();
        assert!(report.missing.contains(&3));
        assert_eq!(report.donors.get(&3), Some(&2));
        assert_eq!(cleaned.len(), 4);
        assert_eq!(cleaned[2].cycle_number, 3);
    }

    #[test]
    fn missing_donor_is_an_error() {
        // cycle 1 is absent and every later cycle is excluded by the floor
        let cycles = vec![cycle(2, 0.05), cycle(3, 0.05)];
        let cleaner = CycleCleaner::new(median_filter(), Resolution::Impute).with_exclusions(
            Exclusions {
                capacity_floor: Some(CapacityFloor::AtOrBelow(0.1)),
                ..Exclusions::default()
            },
        );
        let err = cleaner.clean("cell", cycles, None).unwrap_err();
        assert!(matches!(err, CdtError::Imputation { candidate: 4, .. }));
    }

    #[test]
    fn floor_boundary_follows_its_kind() {
        let cycles = vec![cycle(1, 1.0), cycle(2, 1.5), cycle(3, 1.4), cycle(4, 1.6)];
        let flagged_by = |floor: CapacityFloor| {
            // too few cycles for the local median to flag anything itself
            let detector = DetectionPolicy::LocalMedian { eps: 0.01, window: 3 };
            let cleaner = CycleCleaner::new(detector, Resolution::Drop).with_exclusions(Exclusions {
                capacity_floor: Some(floor),
                ..Exclusions::default()
            });
            let (_, report) = cleaner.clean("cell", cycles.clone(), None).unwrap();
            report.flagged.into_iter().collect::<Vec<_>>()
        };
        assert_eq!(flagged_by(CapacityFloor::Below(1.5)), vec![1, 3]);
        assert_eq!(flagged_by(CapacityFloor::AtOrBelow(1.5)), vec![1, 2, 3]);
        assert!(!CapacityFloor::Below(1.5).excludes(f64::NAN));
    }

    #[test]
    fn drop_renumbers_survivors() {
        let qd = [1.0, 1.0, 1.0, 0.1, 1.0, 1.0];
        let cycles: Vec<CycleRecord> = qd
            .iter()
            .enumerate()
            .map(|(i, q)| cycle(i as u32 + 1, *q))
            .collect();
        let cleaner = CycleCleaner::new(median_filter(), Resolution::Drop).with_exclusions(
            Exclusions {
                exclude_first_cycle: true,
                drop_leading_clean: 1,
                ..Exclusions::default()
            },
        );
        let (cleaned, report) = cleaner.clean("cell", cycles, None).unwrap();
        assert_eq!(report.dropped, vec![1, 4, 2]);
        let numbers: Vec<u32> = cleaned.iter().map(|c| c.cycle_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn summary_capacity_overrides_trace_maximum() {
        let cycles = vec![cycle(1, 1.0), cycle(2, 1.0), cycle(3, 1.0)];
        let summary = [(1, 1.0), (2, 0.2), (3, 1.0)];
        let cleaner = CycleCleaner::new(median_filter(), Resolution::Impute);
        let (_, report) = cleaner.clean("cell", cycles, Some(&summary)).unwrap();
        assert_eq!(report.donors.get(&2), Some(&1));
    }

    #[test]
    fn report_lands_in_diagnostics() {
        let mut report = CleanReport::default();
        report.flagged.insert(4);
        report.donors.insert(4, 3);
        let mut diag = Diagnostics::new();
        report.record(&mut diag);
        assert_eq!(diag.warning_count(), 1);
        assert_eq!(diag.issues[0].cycle, Some(4));
    }
}
