//! Rebuilding one cell from several raw fragments.
//!
//! Two shapes occur in practice:
//!
//! - **Chronological merge** (CALCE): a cell's test is spread over many
//!   files, each stamped with a capture date. Rows are ordered by
//!   `(date, time)` regardless of which file or in what order they arrived,
//!   and a new cycle starts whenever the `(date, marker)` pair changes.
//! - **Batch splice** (MATR): a cell tested in one batch continued as a
//!   differently named cell in the next. The continuation is appended to the
//!   head cell and the tail disappears from the output.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use cdt_core::segment::segment_by_marker;
use cdt_core::{CdtError, CdtResult};

use crate::overrides::Continuation;

/// One raw sample tagged with the capture date of the file it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedRow {
    pub date: NaiveDate,
    pub time_s: f64,
    /// Cycle marker as written by the cycler
    pub marker: i64,
    pub current_a: f64,
    pub voltage_v: f64,
}

/// Merge per-file rows into cycles. Cycle `n` is element `n - 1`.
pub fn merge_chronological(files: Vec<Vec<TimedRow>>) -> Vec<Vec<TimedRow>> {
    let mut rows: Vec<TimedRow> = files.into_iter().flatten().collect();
    rows.sort_by(|a, b| a.date.cmp(&b.date).then(a.time_s.total_cmp(&b.time_s)));

    let keys: Vec<(NaiveDate, i64)> = rows.iter().map(|r| (r.date, r.marker)).collect();
    let ranges = segment_by_marker(&keys);
    let mut rest = rows.into_iter();
    ranges
        .into_iter()
        .map(|range| rest.by_ref().take(range.len()).collect())
        .collect()
}

fn nan_series<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<f64>, D::Error> {
    let raw: Option<Vec<Option<f64>>> = Option::deserialize(de)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

fn nan_summary<'de, D: Deserializer<'de>>(de: D) -> Result<BTreeMap<String, Vec<f64>>, D::Error> {
    let raw: BTreeMap<String, Vec<Option<f64>>> = BTreeMap::deserialize(de)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| (k, v.into_iter().map(|x| x.unwrap_or(f64::NAN)).collect()))
        .collect())
}

/// One cycle of a MATR batch cell, field names as in the published struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCycle {
    #[serde(rename = "I", default, deserialize_with = "nan_series")]
    pub current: Vec<f64>,
    #[serde(rename = "Qc", default, deserialize_with = "nan_series")]
    pub charge_capacity: Vec<f64>,
    #[serde(rename = "Qd", default, deserialize_with = "nan_series")]
    pub discharge_capacity: Vec<f64>,
    #[serde(rename = "Qdlin", default, deserialize_with = "nan_series")]
    pub qdlin: Vec<f64>,
    #[serde(rename = "T", default, deserialize_with = "nan_series")]
    pub temperature: Vec<f64>,
    #[serde(rename = "Tdlin", default, deserialize_with = "nan_series")]
    pub tdlin: Vec<f64>,
    #[serde(rename = "V", default, deserialize_with = "nan_series")]
    pub voltage: Vec<f64>,
    #[serde(rename = "discharge_dQdV", default, deserialize_with = "nan_series")]
    pub discharge_dqdv: Vec<f64>,
    #[serde(rename = "t", default, deserialize_with = "nan_series")]
    pub time: Vec<f64>,
}

/// One cell of a MATR batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchCell {
    /// `b<batch>c<index>`, taken from the file name when absent.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub cycle_life: Option<f64>,
    #[serde(rename = "policy_readable", alias = "charge_policy", default)]
    pub policy: String,
    /// Per-cycle summary series (`IR`, `QDischarge`, `cycle`, ...)
    #[serde(default, deserialize_with = "nan_summary")]
    pub summary: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub cycles: Vec<RawCycle>,
}

/// Append `tail` to `head`.
///
/// Only summary series the head already has are extended. The `cycle`
/// series of the tail is offset by the head's length so numbering continues.
pub fn splice(head: &mut BatchCell, tail: BatchCell, cycle_life_extension: f64) {
    head.cycle_life = head.cycle_life.map(|life| life + cycle_life_extension);
    for (name, values) in head.summary.iter_mut() {
        let Some(extra) = tail.summary.get(name) else {
            continue;
        };
        if name == "cycle" {
            let offset = values.len() as f64;
            values.extend(extra.iter().map(|c| c + offset));
        } else {
            values.extend_from_slice(extra);
        }
    }
    head.cycles.extend(tail.cycles);
}

/// Splice every continuation into its head cell and remove the tails.
///
/// A head or tail named by the table but absent from `cells` is a
/// [`CdtError::Reconstruction`].
pub fn apply_continuations(
    cells: &mut BTreeMap<String, BatchCell>,
    continuations: &[Continuation],
) -> CdtResult<()> {
    for continuation in continuations {
        let tail = cells.remove(continuation.tail).ok_or_else(|| {
            CdtError::Reconstruction(format!(
                "continuation cell '{}' of '{}' is missing",
                continuation.tail, continuation.head
            ))
        })?;
        let head = cells.get_mut(continuation.head).ok_or_else(|| {
            CdtError::Reconstruction(format!(
                "head cell '{}' continued by '{}' is missing",
                continuation.head, continuation.tail
            ))
        })?;
        debug!(
            head = continuation.head,
            tail = continuation.tail,
            cycles = tail.cycles.len(),
            "splicing continuation"
        );
        splice(head, tail, continuation.cycle_life_extension);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rows(day: NaiveDate, marker: i64, count: usize) -> Vec<TimedRow> {
        (0..count)
            .map(|i| TimedRow {
                date: day,
                time_s: i as f64,
                marker,
                current_a: -1.0,
                voltage_v: 4.0 - 0.1 * i as f64,
            })
            .collect()
    }

    #[test]
    fn files_merge_in_date_order_whatever_the_input_order() {
        let d1 = date(2010, 8, 16);
        let d2 = date(2010, 8, 18);
        let d3 = date(2010, 9, 2);
        let orders = [[0, 1, 2], [2, 0, 1], [1, 2, 0], [2, 1, 0]];
        for order in orders {
            let files = [rows(d1, 1, 3), rows(d2, 1, 4), rows(d3, 1, 5)];
            let shuffled: Vec<Vec<TimedRow>> = order.iter().map(|i| files[*i].clone()).collect();
            let cycles = merge_chronological(shuffled);
            assert_eq!(cycles.len(), 3);
            assert_eq!(cycles[0][0].date, d1);
            assert_eq!(cycles[1][0].date, d2);
            assert_eq!(cycles[2][0].date, d3);
            let sizes: Vec<usize> = cycles.iter().map(Vec::len).collect();
            assert_eq!(sizes, vec![3, 4, 5]);
        }
    }

    #[test]
    fn marker_changes_split_within_a_file() {
        let day = date(2011, 1, 5);
        let mut file = rows(day, 7, 2);
        file.extend(rows(day, 8, 2).into_iter().map(|mut r| {
            r.time_s += 10.0;
            r
        }));
        let cycles = merge_chronological(vec![file]);
        assert_eq!(cycles.len(), 2);
        assert!(cycles[1].iter().all(|r| r.marker == 8));
    }

    fn batch_cell(key: &str, cycles: usize, life: f64) -> BatchCell {
        let mut summary = BTreeMap::new();
        summary.insert("cycle".to_string(), (1..=cycles).map(|c| c as f64).collect());
        summary.insert("QDischarge".to_string(), vec![1.0; cycles]);
        BatchCell {
            key: key.to_string(),
            cycle_life: Some(life),
            policy: "3.6C(80%)-3.6C".into(),
            summary,
            cycles: vec![RawCycle::default(); cycles],
        }
    }

    #[test]
    fn splice_offsets_cycle_numbers() {
        let mut head = batch_cell("b1c0", 3, 100.0);
        let mut tail = batch_cell("b2c7", 2, 50.0);
        tail.summary.insert("Tmax".into(), vec![30.0, 31.0]);
        splice(&mut head, tail, 662.0);
        assert_eq!(head.cycle_life, Some(762.0));
        assert_eq!(head.summary["cycle"], vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(head.summary["QDischarge"].len(), 5);
        assert!(!head.summary.contains_key("Tmax"));
        assert_eq!(head.cycles.len(), 5);
    }

    #[test]
    fn continuations_consume_tails() {
        let table = [Continuation {
            head: "b1c0",
            tail: "b2c7",
            cycle_life_extension: 662.0,
        }];
        let mut cells = BTreeMap::new();
        cells.insert("b1c0".to_string(), batch_cell("b1c0", 3, 1.0));
        cells.insert("b2c7".to_string(), batch_cell("b2c7", 4, 1.0));
        cells.insert("b2c0".to_string(), batch_cell("b2c0", 4, 1.0));
        apply_continuations(&mut cells, &table).unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells["b1c0"].cycles.len(), 7);
    }

    #[test]
    fn missing_continuation_is_fatal() {
        let table = [Continuation {
            head: "b1c1",
            tail: "b2c8",
            cycle_life_extension: 981.0,
        }];
        let mut cells = BTreeMap::new();
        cells.insert("b1c1".to_string(), batch_cell("b1c1", 3, 1.0));
        let err = apply_continuations(&mut cells, &table).unwrap_err();
        assert!(err.is_batch_fatal());
        assert!(err.to_string().contains("b2c8"));
    }

    #[test]
    fn batch_cell_reads_nulls_as_nan() {
        let json = r#"{
            "policy_readable": "5.4C(40%)-3.6C",
            "cycle_life": null,
            "summary": {"IR": [0.016, null]},
            "cycles": [{"I": [0.0, -4.4], "V": [3.3, null], "t": [0.0, 1.0]}]
        }"#;
        let cell: BatchCell = serde_json::from_str(json).unwrap();
        assert_eq!(cell.cycle_life, None);
        assert!(cell.summary["IR"][1].is_nan());
        assert!(cell.cycles[0].voltage[1].is_nan());
        assert!(cell.cycles[0].qdlin.is_empty());
    }
}
