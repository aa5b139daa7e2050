//! MIT-Stanford-Toyota fast-charging LFP cells.
//!
//! Cells come from the published `MATR_batch_<date>.mat` files, read through
//! [`matlab`](super::matlab) with the `hdf5` feature, or from `bKcN.json`
//! mirrors of one entry of the batch struct. Five batch-1 cells continued in
//! batch 2 under another name; their work unit carries both inputs and the
//! continuation is spliced in before any cycle is built.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use tracing::{debug, info, warn};

use cdt_core::{CdtError, CellRecord, CycleExtra, CycleRecord, CyclingProtocol, Diagnostics};

use super::matlab;
use super::{
    file_name, file_stem, files_in, finish, has_extension, AdapterContext, ProcessedCell, SourceKind, WorkUnit,
};
use crate::reconstruct::{apply_continuations, BatchCell, RawCycle};

pub const NOMINAL_CAPACITY: f64 = 1.1;
pub const DISCHARGE_RATE_C: f64 = 4.0;
pub const MIN_VOLTAGE: f64 = 2.0;
pub const MAX_VOLTAGE: f64 = 3.5;
/// SOC width of one stage in a multi-step charge policy.
const POLICY_STEP_SOC: f64 = 0.2;

pub fn discover(raw_dir: &Path, ctx: &AdapterContext) -> Result<Vec<WorkUnit>> {
    let pattern = Regex::new(r"^b(\d+)c(\d+)\.json$")?;
    let mut found: BTreeMap<(u32, u32), (String, PathBuf)> = BTreeMap::new();
    for path in files_in(raw_dir, true)? {
        let Some(captures) = pattern.captures(file_name(&path)) else {
            continue;
        };
        let batch: u32 = captures[1].parse()?;
        let index: u32 = captures[2].parse()?;
        found.insert((batch, index), (file_stem(&path).to_string(), path));
    }
    for (batch, path) in matlab::batch_files(raw_dir)? {
        let cells = matlab::open(&path)?
            .num_cells()
            .with_context(|| format!("counting cells in '{}'", path.display()))?;
        debug!(file = %path.display(), batch, cells, "batch file");
        for cell in 0..cells {
            found
                .entry((batch, cell as u32))
                .or_insert_with(|| (matlab::batch_key(batch, cell), path.clone()));
        }
    }
    let by_key: BTreeMap<&str, &PathBuf> =
        found.values().map(|(key, path)| (key.as_str(), path)).collect();

    for continuation in ctx.overrides.continuations {
        let head = by_key.contains_key(continuation.head);
        let tail = by_key.contains_key(continuation.tail);
        if head != tail {
            let missing = if head { continuation.tail } else { continuation.head };
            return Err(CdtError::Reconstruction(format!(
                "'{}' continues '{}' but '{missing}' is not in '{}'",
                continuation.tail,
                continuation.head,
                raw_dir.display()
            ))
            .into());
        }
    }

    let mut units = Vec::new();
    for (key, path) in found.values() {
        if ctx.overrides.continuation_of(key).is_some() {
            continue;
        }
        let mut unit = WorkUnit::single(SourceKind::Matr, key.clone(), path.clone(), cell_id(key));
        if let Some(continuation) = ctx.overrides.continuation_for(key) {
            if let Some(tail) = by_key.get(continuation.tail) {
                unit.inputs.push((*tail).clone());
            }
        }
        units.push(unit);
    }
    Ok(units)
}

fn cell_id(key: &str) -> String {
    format!("MATR_{key}")
}

pub fn load_batch_cell(path: &Path) -> Result<BatchCell> {
    let file = File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
    let mut cell: BatchCell = serde_json::from_reader(BufReader::new(file))
        .map_err(|err| CdtError::parse(path, err.to_string()))?;
    if cell.key.is_empty() {
        cell.key = file_stem(path).to_string();
    }
    Ok(cell)
}

/// Cell `key` out of a `.mat` batch file.
pub fn load_matlab_cell(path: &Path, key: &str) -> Result<BatchCell> {
    let (batch, cell) = matlab::parse_key(key)?;
    let store = matlab::open(path)?;
    matlab::read_batch_cell(store.as_ref(), batch, cell)
        .with_context(|| format!("reading '{key}' from '{}'", path.display()))
}

pub fn process(unit: &WorkUnit, ctx: &AdapterContext) -> Result<Vec<ProcessedCell>> {
    let continuations: Vec<_> = ctx
        .overrides
        .continuation_for(&unit.id)
        .into_iter()
        .copied()
        .collect();
    // inputs are the head followed by its continuation
    let keys = std::iter::once(unit.id.as_str()).chain(continuations.iter().map(|c| c.tail));
    let mut cells = BTreeMap::new();
    for (key, path) in keys.zip(&unit.inputs) {
        debug!(unit = %unit.id, file = %path.display(), "loading batch cell");
        let cell = if has_extension(path, &["mat"]) {
            load_matlab_cell(path, key)?
        } else {
            load_batch_cell(path)?
        };
        cells.insert(cell.key.clone(), cell);
    }
    apply_continuations(&mut cells, &continuations)?;
    let batch_cell = cells
        .remove(&unit.id)
        .ok_or_else(|| anyhow!("work unit '{}' did not load its own cell", unit.id))?;

    let (record, diagnostics) = organize_cell(batch_cell);
    info!(cell_id = %record.cell_id, cycles = record.cycle_data.len(), "cell processed");
    Ok(finish(record, diagnostics))
}

fn non_empty(series: Vec<f64>) -> Option<Vec<f64>> {
    (!series.is_empty()).then_some(series)
}

fn build_cycle(cycle_number: u32, raw: RawCycle, internal_resistance: Option<f64>) -> CycleRecord {
    let extra = CycleExtra {
        qdlin: non_empty(raw.qdlin),
        tdlin: non_empty(raw.tdlin),
        discharge_dqdv: non_empty(raw.discharge_dqdv),
        ..CycleExtra::default()
    };
    let mut cycle = CycleRecord::new(
        cycle_number,
        raw.time,
        raw.current,
        raw.voltage,
        raw.charge_capacity,
        raw.discharge_capacity,
    )
    .with_extra(extra);
    if !raw.temperature.is_empty() {
        cycle = cycle.with_temperature(raw.temperature);
    }
    if let Some(ohm) = internal_resistance.filter(|r| r.is_finite()) {
        cycle = cycle.with_internal_resistance(ohm);
    }
    cycle
}

fn organize_cell(cell: BatchCell) -> (CellRecord, Diagnostics) {
    let mut diagnostics = Diagnostics::new();
    let resistance = cell.summary.get("IR").cloned().unwrap_or_default();
    // the first recorded cycle is a formation artifact
    let cycles: Vec<CycleRecord> = cell
        .cycles
        .into_iter()
        .enumerate()
        .skip(1)
        .map(|(position, raw)| build_cycle(position as u32, raw, resistance.get(position).copied()))
        .collect();

    let mut record = CellRecord::new(cell_id(&cell.key), cycles);
    record.form_factor = Some("cylindrical_18650".into());
    record.anode_material = Some("graphite".into());
    record.cathode_material = Some("LFP".into());
    record.nominal_capacity_ah = Some(NOMINAL_CAPACITY);
    record.min_voltage_limit_v = Some(MIN_VOLTAGE);
    record.max_voltage_limit_v = Some(MAX_VOLTAGE);
    record.discharge_protocol = vec![CyclingProtocol::c_rate(DISCHARGE_RATE_C, 1.0, 0.0)];
    match parse_charge_policy(&cell.policy) {
        Ok(stages) => record.charge_protocol = stages,
        Err(err) => {
            warn!(cell_id = %record.cell_id, policy = %cell.policy, "unreadable charge policy");
            diagnostics.add_warning_with_entity("charge-policy", &format!("{err:#}"), &record.cell_id);
        }
    }
    let life = cell
        .cycle_life
        .map_or_else(|| "unknown".to_string(), |life| format!("{life}"));
    record.description = Some(format!("charge policy {}, cycle life {life}", cell.policy));
    (record, diagnostics)
}

/// Parse a readable charge policy into protocol stages.
///
/// `5.4C(40%)-3.6C` is a two-step policy switching at 40% SOC. Longer
/// policies such as `8C-4.4C-3C-2.8C` are 20% SOC steps. Stages naming a
/// `new` structure are ignored.
pub fn parse_charge_policy(policy: &str) -> Result<Vec<CyclingProtocol>> {
    let stages: Vec<&str> = policy
        .split('-')
        .map(str::trim)
        .filter(|stage| !stage.contains("new"))
        .collect();
    let rate = |stage: &str| -> Result<f64> {
        stage
            .trim_end_matches('C')
            .parse::<f64>()
            .with_context(|| format!("invalid C-rate '{stage}' in policy '{policy}'"))
    };

    if stages.len() == 2 {
        let pattern = Regex::new(r"(.*?)C\((.*?)%\)")?;
        let captures = pattern
            .captures(stages[0])
            .ok_or_else(|| anyhow!("first stage '{}' of '{policy}' has no switch SOC", stages[0]))?;
        let first = rate(&captures[1])?;
        let switch = captures[2]
            .parse::<f64>()
            .with_context(|| format!("invalid switch SOC '{}' in policy '{policy}'", &captures[2]))?
            / 100.0;
        return Ok(vec![
            CyclingProtocol::c_rate(first, 0.0, switch),
            CyclingProtocol::c_rate(rate(stages[1])?, switch, 1.0),
        ]);
    }

    stages
        .iter()
        .enumerate()
        .map(|(i, stage)| {
            let start = i as f64 * POLICY_STEP_SOC;
            Ok(CyclingProtocol::c_rate(rate(stage)?, start, start + POLICY_STEP_SOC))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_step_policy_switches_at_soc() {
        let stages = parse_charge_policy("5.4C(40%)-3.6C").unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].rate_c, Some(5.4));
        assert_eq!(stages[0].end_soc, Some(0.4));
        assert_eq!(stages[1].rate_c, Some(3.6));
        assert_eq!(stages[1].start_soc, Some(0.4));
        assert_eq!(stages[1].end_soc, Some(1.0));
    }

    #[test]
    fn multi_step_policy_uses_fixed_soc_steps() {
        let stages = parse_charge_policy("8C-4.4C-3C-2.8C").unwrap();
        let rates: Vec<f64> = stages.iter().filter_map(|s| s.rate_c).collect();
        assert_eq!(rates, vec![8.0, 4.4, 3.0, 2.8]);
        assert!((stages[3].start_soc.unwrap() - 0.6).abs() < 1e-12);
        assert!(parse_charge_policy("fast-ish").is_err());
    }

    #[test]
    fn new_structure_stages_are_ignored() {
        let stages = parse_charge_policy("3.6C(80%)-3.6C-newstructure").unwrap();
        assert_eq!(stages.len(), 2);
    }

    #[cfg(not(feature = "hdf5"))]
    #[test]
    fn batch_files_need_hdf5_support() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("MATR_batch_20170512.mat"), b"").unwrap();
        let err = discover(dir.path(), &AdapterContext::new()).unwrap_err();
        assert!(err.to_string().contains("`hdf5` feature"));
    }

    #[test]
    fn formation_cycle_is_skipped_and_ir_attached() {
        let raw = |v: f64| RawCycle {
            current: vec![0.0, -4.4],
            voltage: vec![3.3, v],
            time: vec![0.0, 1.0],
            charge_capacity: vec![0.0, 0.0],
            discharge_capacity: vec![0.0, 1.0],
            qdlin: vec![0.1; 3],
            ..RawCycle::default()
        };
        let mut summary = BTreeMap::new();
        summary.insert("IR".to_string(), vec![0.0, 0.016, f64::NAN]);
        let cell = BatchCell {
            key: "b1c5".into(),
            cycle_life: Some(1000.0),
            policy: "3.6C(80%)-3.6C".into(),
            summary,
            cycles: vec![raw(2.0), raw(2.1), raw(2.2)],
        };
        let (record, diagnostics) = organize_cell(cell);
        assert!(diagnostics.is_empty());
        assert_eq!(record.cell_id, "MATR_b1c5");
        let numbers: Vec<u32> = record.cycle_data.iter().map(|c| c.cycle_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(record.cycle_data[0].internal_resistance_ohm, Some(0.016));
        assert_eq!(record.cycle_data[1].internal_resistance_ohm, None);
        assert_eq!(record.cycle_data[0].extra.qdlin.as_ref().map(Vec::len), Some(3));
        assert!(record.cycle_data[0].temperature_c.is_none());
        assert_eq!(record.charge_protocol.len(), 2);
    }
}
