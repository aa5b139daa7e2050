//! Cells published through the Battery Archive: SNL, UL-PUR and OX.
//!
//! Every cell is a `<cell>_timeseries.csv` with a shared column layout, and
//! SNL and UL-PUR cells also ship a `<cell>_cycle_data.csv` summary whose
//! discharge capacity drives cleaning. Rows are grouped by `Cycle_Index`;
//! capacities are the cycler's own. OX cells are renumbered from 1 since
//! their index may start late or skip cycles.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

use cdt_algo::{CycleCleaner, DetectionPolicy, Resolution, ShiftRule};
use cdt_core::{CellRecord, CycleRecord, CyclingProtocol, Diagnostics};

use super::{file_name, file_stem, files_in, finish, AdapterContext, ProcessedCell, SourceKind, WorkUnit};
use crate::table::{CsvOptions, RawTable};

pub const SNL_SHIFTS: usize = 2;
pub const SNL_RATIO_MULTIPLE: f64 = 10.0;
pub const UL_PUR_SHIFTS: usize = 4;
pub const UL_PUR_MAD_MULTIPLE: f64 = 3.0;
/// UL-PUR cycles before this index are break-in and discarded.
pub const UL_PUR_FIRST_CYCLE: u32 = 12;
/// Below the 0.74 Ah rating; no OX cell reaches the rating.
pub const OX_NOMINAL_CAPACITY: f64 = 0.72;

const CYCLE_INDEX: &str = "Cycle_Index";
const VOLTAGE: &str = "Voltage (V)";
const CURRENT: &str = "Current (A)";
const TEMPERATURE: &str = "Cell_Temperature (C)";
const DISCHARGE_CAPACITY: &str = "Discharge_Capacity (Ah)";
const CHARGE_CAPACITY: &str = "Charge_Capacity (Ah)";
const TEST_TIME: &str = "Test_Time (s)";

const TIMESERIES: &str = "_timeseries";
const CYCLE_DATA: &str = "cycle_data";

pub fn discover(kind: SourceKind, raw_dir: &Path, ctx: &AdapterContext) -> Result<Vec<WorkUnit>> {
    let files = files_in(raw_dir, false)?;
    let mut cells: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in &files {
        let name = file_name(path);
        if !name.contains("timeseries") || (kind == SourceKind::UlPur && !name.contains("UL-PUR_N")) {
            continue;
        }
        let stem = file_stem(path);
        let cell = stem.split(TIMESERIES).next().unwrap_or(stem).to_string();
        if kind == SourceKind::Snl && ctx.overrides.is_snl_dropped(&cell) {
            debug!(cell = %cell, "dropped by override table");
            continue;
        }
        cells.entry(cell).or_insert_with(|| path.clone());
    }

    Ok(cells
        .into_iter()
        .map(|(cell, timeseries)| {
            let mut unit = WorkUnit::single(kind, cell.clone(), timeseries, cell.clone());
            if kind != SourceKind::Ox {
                let summary = files.iter().find(|p| {
                    let name = file_name(p);
                    name.contains(cell.as_str()) && name.contains(CYCLE_DATA)
                });
                if let Some(summary) = summary {
                    unit.inputs.push(summary.clone());
                }
            }
            unit
        })
        .collect())
}

pub fn process(kind: SourceKind, unit: &WorkUnit, ctx: &AdapterContext) -> Result<Vec<ProcessedCell>> {
    let name = unit.id.as_str();
    let timeseries = RawTable::from_csv_path(unit.first_input()?, &CsvOptions::default())?;
    if timeseries.is_empty() {
        warn!(cell_id = %name, "empty timeseries, cell skipped");
        return Ok(Vec::new());
    }
    let cycles = group_by_cycle_index(&timeseries)
        .with_context(|| format!("grouping cycles of '{name}'"))?;
    debug!(cell_id = %name, cycles = cycles.len(), "grouped");

    let mut diagnostics = Diagnostics::new();
    let (cycles, mut record) = match kind {
        SourceKind::Snl => {
            let cleaner = CycleCleaner::new(
                DetectionPolicy::ShiftDifference {
                    shifts: SNL_SHIFTS,
                    rule: ShiftRule::MedianRatio {
                        multiple: SNL_RATIO_MULTIPLE,
                    },
                },
                Resolution::Impute,
            )
            .with_exclusions(ctx.overrides.exclusions_for(name));
            let summary = read_summary(unit)?;
            let (cycles, report) = cleaner.clean(name, cycles, Some(summary.as_slice()))?;
            report.record(&mut diagnostics);
            (cycles, snl_cell(name)?)
        }
        SourceKind::UlPur => {
            let cleaner = CycleCleaner::new(
                DetectionPolicy::ShiftDifference {
                    shifts: UL_PUR_SHIFTS,
                    rule: ShiftRule::MedianAbsoluteDeviation {
                        multiple: UL_PUR_MAD_MULTIPLE,
                    },
                },
                Resolution::Impute,
            );
            let summary = read_summary(unit)?;
            let (cycles, report) = cleaner.clean(name, cycles, Some(summary.as_slice()))?;
            report.record(&mut diagnostics);
            let cycles: Vec<CycleRecord> = cycles
                .into_iter()
                .filter(|c| c.cycle_number >= UL_PUR_FIRST_CYCLE)
                .map(|c| {
                    let number = c.cycle_number - UL_PUR_FIRST_CYCLE + 1;
                    c.renumbered(number)
                })
                .collect();
            (cycles, ul_pur_cell(name))
        }
        SourceKind::Ox => (renumber_from_one(name, cycles, &mut diagnostics), ox_cell(name)),
        other => return Err(anyhow!("{other} is not a Battery Archive source")),
    };

    record.cycle_data = cycles;
    info!(cell_id = %record.cell_id, cycles = record.cycle_data.len(), "cell processed");
    Ok(finish(record, diagnostics))
}

/// Cycles keyed by `Cycle_Index`, rows kept in file order within a cycle.
/// Rows with a missing or negative index are ignored.
fn group_by_cycle_index(table: &RawTable) -> Result<Vec<CycleRecord>> {
    let index = table.floats(CYCLE_INDEX)?;
    let time = table.floats(TEST_TIME)?;
    let current = table.floats(CURRENT)?;
    let voltage = table.floats(VOLTAGE)?;
    let charge = table.floats(CHARGE_CAPACITY)?;
    let discharge = table.floats(DISCHARGE_CAPACITY)?;
    let temperature = if table.has_column(TEMPERATURE) {
        Some(table.floats(TEMPERATURE)?)
    } else {
        None
    };

    let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (row, value) in index.iter().enumerate() {
        if value.is_finite() && *value >= 0.0 {
            groups.entry(*value as u32).or_default().push(row);
        }
    }
    let pick = |series: &[f64], rows: &[usize]| -> Vec<f64> { rows.iter().map(|r| series[*r]).collect() };
    Ok(groups
        .into_iter()
        .map(|(number, rows)| {
            let cycle = CycleRecord::new(
                number,
                pick(&time, &rows),
                pick(&current, &rows),
                pick(&voltage, &rows),
                pick(&charge, &rows),
                pick(&discharge, &rows),
            );
            match &temperature {
                Some(t) => cycle.with_temperature(pick(t, &rows)),
                None => cycle,
            }
        })
        .collect())
}

/// Renumber cycles 1..n in `Cycle_Index` order. Indices the cycler skipped
/// between the first and last recorded cycle are reported as missing.
fn renumber_from_one(name: &str, cycles: Vec<CycleRecord>, diagnostics: &mut Diagnostics) -> Vec<CycleRecord> {
    for pair in cycles.windows(2) {
        for missing in pair[0].cycle_number + 1..pair[1].cycle_number {
            warn!(cell_id = %name, cycle = missing, "cycle index absent from timeseries");
            diagnostics.add_cycle_warning("missing-cycle", &format!("data of cycle {missing} missing"), missing);
        }
    }
    cycles
        .iter()
        .zip(1u32..)
        .map(|(cycle, number)| cycle.renumbered(number))
        .collect()
}

/// `(Cycle_Index, Discharge_Capacity)` pairs from the cycle summary.
fn read_summary(unit: &WorkUnit) -> Result<Vec<(u32, f64)>> {
    let path = unit
        .inputs
        .get(1)
        .ok_or_else(|| anyhow!("no cycle_data file for '{}'", unit.id))?;
    let table = RawTable::from_csv_path(path, &CsvOptions::default())?;
    let index = table.floats(CYCLE_INDEX)?;
    let capacity = table.floats(DISCHARGE_CAPACITY)?;
    Ok(index
        .into_iter()
        .zip(capacity)
        .filter(|(i, _)| i.is_finite() && *i >= 0.0)
        .map(|(i, q)| (i as u32, q))
        .collect())
}

fn constant_rates(charge: f64, discharge: f64, record: &mut CellRecord) {
    record.charge_protocol = vec![CyclingProtocol::c_rate(charge, 0.0, 1.0)];
    record.discharge_protocol = vec![CyclingProtocol::c_rate(discharge, 1.0, 0.0)];
}

/// Nominal capacity of an SNL cell, derated for partial SOC windows and
/// low temperature.
pub fn snl_capacity(name: &str) -> f64 {
    if name.contains("NMC") {
        if name.contains("15C") {
            return 3.0 * 0.9;
        }
        return 3.0;
    }
    if name.contains("NCA") {
        if name.contains("20-80") {
            return 1.92;
        }
        if name.contains("15C") {
            return 3.2 * 0.9;
        }
        return 3.2;
    }
    1.1
}

/// Metadata decoded from an SNL cell name such as
/// `SNL_18650_NCA_25C_0-100_0.5-1C_a`.
fn snl_cell(name: &str) -> Result<CellRecord> {
    let fields: Vec<&str> = name.split('_').collect();
    if fields.len() < 3 {
        return Err(anyhow!("SNL cell name '{name}' has too few fields"));
    }
    let cathode = fields[2];
    let rates_field = fields[fields.len() - 2];
    let rates: Vec<f64> = rates_field
        .strip_suffix('C')
        .unwrap_or(rates_field)
        .split('-')
        .map(|r| r.parse::<f64>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("reading C-rates from '{name}'"))?;
    let &[charge, discharge] = rates.as_slice() else {
        return Err(anyhow!("expected charge-discharge rates in '{name}'"));
    };

    let mut record = CellRecord::new(name, Vec::new());
    record.form_factor = Some("cylindrical_18650".into());
    record.anode_material = Some("graphite".into());
    record.cathode_material = Some(cathode.to_string());
    record.nominal_capacity_ah = Some(snl_capacity(name));
    record.min_voltage_limit_v = Some(if cathode == "NCA" { 2.5 } else { 2.0 });
    record.max_voltage_limit_v = Some(if cathode == "LFP" { 3.6 } else { 4.2 });
    record.max_current_limit_a = Some(match cathode {
        "LFP" => 30.0,
        "NCA" => 6.0,
        _ => 20.0,
    });
    constant_rates(charge, discharge, &mut record);
    Ok(record)
}

pub fn ul_pur_capacity(name: &str) -> f64 {
    let capacity = 3.4;
    if name.contains("2.5-96.5") {
        capacity * 0.94 * 3.4
    } else {
        capacity
    }
}

fn ul_pur_cell(name: &str) -> CellRecord {
    let mut record = CellRecord::new(name, Vec::new());
    record.form_factor = Some("cylindrical_18650".into());
    record.anode_material = Some("graphite".into());
    record.cathode_material = Some("LCO".into());
    record.nominal_capacity_ah = Some(ul_pur_capacity(name));
    record.min_voltage_limit_v = Some(2.7);
    record.max_voltage_limit_v = Some(4.2);
    constant_rates(2.0, 1.0, &mut record);
    record
}

fn ox_cell(name: &str) -> CellRecord {
    let mut record = CellRecord::new(name, Vec::new());
    record.form_factor = Some("pouch".into());
    record.anode_material = Some("graphite".into());
    record.cathode_material = Some("LCO".into());
    record.nominal_capacity_ah = Some(OX_NOMINAL_CAPACITY);
    record.min_voltage_limit_v = Some(2.7);
    record.max_voltage_limit_v = Some(4.2);
    constant_rates(2.0, 1.0, &mut record);
    record
}
