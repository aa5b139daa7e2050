//! Shared steps for generic cycler exports (Arbin, Neware).
//!
//! After an adapter has read its vendor format into a [`RawTable`] and
//! renamed the headers through the conversion config, the rest is the same:
//! pull the canonical columns, scale them, group rows by `cycle_index` and
//! attach the optional per-cell metadata document.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use cdt_core::{CellRecord, CycleExtra, CycleRecord, Diagnostics};

use crate::config::{load_cell_metadata, metadata_path, ConversionConfig, REQUIRED_COLUMNS};
use crate::table::RawTable;

/// Canonical numeric columns, keyed by name.
pub type Columns = BTreeMap<String, Vec<f64>>;

/// Canonical column names an adapter may produce.
pub const KNOWN_COLUMNS: &[&str] = &[
    "cycle_index",
    "test_time",
    "current",
    "voltage",
    "charge_capacity",
    "discharge_capacity",
    "step_index",
    "charge_energy",
    "discharge_energy",
    "temperature",
    "internal_resistance",
    "data_point",
    "step_time",
];

/// Known canonical columns present in `table`, parsed as numbers.
pub fn columns_from_table(table: &RawTable) -> Result<Columns> {
    let mut columns = Columns::new();
    for name in KNOWN_COLUMNS {
        if table.has_column(name) {
            columns.insert(name.to_string(), table.floats(name)?);
        }
    }
    Ok(columns)
}

/// Multiply every column that has a configured scale.
pub fn apply_scales(columns: &mut Columns, config: &ConversionConfig) {
    for (name, values) in columns.iter_mut() {
        if let Some(scale) = config.scale(name) {
            values.iter_mut().for_each(|v| *v *= scale);
        }
    }
}

fn required<'a>(columns: &'a Columns, name: &str) -> Result<&'a [f64]> {
    columns
        .get(name)
        .map(Vec::as_slice)
        .with_context(|| format!("missing canonical column '{name}'"))
}

/// Group rows into cycles by `cycle_index`.
///
/// Cycles are renumbered from 1 in index order. Time is made relative to
/// the cycle's first sample, and the last finite internal resistance of a
/// cycle stands for the whole cycle. Gaps in `0..=max(cycle_index)` are
/// reported, not filled.
pub fn group_cycles(columns: &Columns, cell_id: &str, diagnostics: &mut Diagnostics) -> Result<Vec<CycleRecord>> {
    for name in REQUIRED_COLUMNS.iter().chain(&["test_time"]) {
        required(columns, name)?;
    }
    let index = required(columns, "cycle_index")?;
    let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (row, value) in index.iter().enumerate() {
        if value.is_finite() && *value >= 0.0 {
            groups.entry(*value as u32).or_default().push(row);
        }
    }

    if let Some(max) = groups.keys().next_back().copied() {
        for missing in (0..=max).filter(|c| !groups.contains_key(c)) {
            warn!(cell_id, cycle = missing, "data of cycle missing");
            diagnostics.add_cycle_warning("missing-cycle", &format!("data of cycle {missing} missing"), missing);
        }
    }

    let pick = |name: &str, rows: &[usize]| -> Option<Vec<f64>> {
        columns
            .get(name)
            .map(|series| rows.iter().map(|r| series[*r]).collect())
    };
    let mut cycles = Vec::with_capacity(groups.len());
    for (position, rows) in groups.values().enumerate() {
        let series = |name: &str| pick(name, rows).unwrap_or_default();
        let time = series("test_time");
        let start = time.iter().copied().filter(|t| t.is_finite()).fold(f64::INFINITY, f64::min);
        let time = time.into_iter().map(|t| t - start).collect();

        let extra = CycleExtra {
            step_index: pick("step_index", rows),
            charge_energy_wh: pick("charge_energy", rows),
            discharge_energy_wh: pick("discharge_energy", rows),
            data_point: Some((1..=rows.len()).map(|p| p as f64).collect()),
            ..CycleExtra::default()
        };
        let mut cycle = CycleRecord::new(
            position as u32 + 1,
            time,
            series("current"),
            series("voltage"),
            series("charge_capacity"),
            series("discharge_capacity"),
        )
        .with_extra(extra);
        if let Some(temperature) = pick("temperature", rows) {
            cycle = cycle.with_temperature(temperature);
        }
        let resistance = pick("internal_resistance", rows)
            .and_then(|ir| ir.last().copied())
            .filter(|r| r.is_finite());
        if let Some(ohm) = resistance {
            cycle = cycle.with_internal_resistance(ohm);
        }
        cycles.push(cycle);
    }
    debug!(cell_id, cycles = cycles.len(), "grouped by cycle index");
    Ok(cycles)
}

/// Apply `<stem>.metadata.yaml` next to `cell_file` when it exists.
pub fn apply_metadata(record: &mut CellRecord, cell_file: &Path, diagnostics: &mut Diagnostics) -> Result<()> {
    let path = metadata_path(cell_file);
    if !path.is_file() {
        warn!(cell_id = %record.cell_id, path = %path.display(), "no metadata document");
        diagnostics.add_warning_with_entity(
            "metadata",
            &format!("no metadata document at '{}'", path.display()),
            &record.cell_id,
        );
        return Ok(());
    }
    load_cell_metadata(&path)?.apply(record);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(index: &[f64]) -> Columns {
        let n = index.len();
        let mut columns = Columns::new();
        columns.insert("cycle_index".into(), index.to_vec());
        columns.insert("test_time".into(), (0..n).map(|i| 100.0 + i as f64).collect());
        columns.insert("current".into(), vec![1.0; n]);
        columns.insert("voltage".into(), vec![3.7; n]);
        columns.insert("charge_capacity".into(), vec![0.0; n]);
        columns.insert("discharge_capacity".into(), vec![0.0; n]);
        columns.insert(
            "internal_resistance".into(),
            (0..n).map(|i| if i == n - 1 { f64::NAN } else { 0.01 * i as f64 }).collect(),
        );
        columns
    }

    #[test]
    fn cycles_renumber_and_rebase_time() {
        let mut diagnostics = Diagnostics::new();
        let cycles = group_cycles(&columns(&[0.0, 0.0, 2.0, 2.0, 2.0]), "ARBIN_x", &mut diagnostics).unwrap();
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[1].cycle_number, 2);
        assert_eq!(cycles[1].time_s, vec![0.0, 1.0, 2.0]);
        assert_eq!(cycles[0].internal_resistance_ohm, Some(0.01));
        assert_eq!(cycles[1].internal_resistance_ohm, None);
        assert_eq!(cycles[1].extra.data_point, Some(vec![1.0, 2.0, 3.0]));
        let missing: Vec<Option<u32>> = diagnostics.in_category("missing-cycle").map(|d| d.cycle).collect();
        assert_eq!(missing, vec![Some(1)]);
    }

    #[test]
    fn missing_required_column_is_an_error() {
        let mut cols = columns(&[1.0]);
        cols.remove("voltage");
        let err = group_cycles(&cols, "x", &mut Diagnostics::new()).unwrap_err();
        assert!(err.to_string().contains("voltage"));
    }

    #[test]
    fn scales_apply_only_to_configured_columns() {
        let mut cols = columns(&[1.0, 1.0]);
        let mut config = ConversionConfig::default();
        config.scales.insert("current".into(), 0.001);
        apply_scales(&mut cols, &config);
        assert_eq!(cols["current"], vec![0.001, 0.001]);
        assert_eq!(cols["voltage"], vec![3.7, 3.7]);
    }
}
