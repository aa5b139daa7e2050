//! RWTH Aachen NMC cells cycled between 3.5 V and 3.9 V.
//!
//! Raw exports are CSVs whose second row holds units. A cell's files are
//! concatenated, de-duplicated on the `Zeit` timestamp and sorted by it.
//! Rows after an implausible jump in `Programmdauer` (ms) are dropped until
//! the clock returns. Cycles are found from the current waveform; the first
//! boundary is discarded because the discharge before it is incomplete.

use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use cdt_algo::{CycleCleaner, DetectionPolicy, Resolution};
use cdt_core::segment::cycle_ranges;
use cdt_core::{CellRecord, CycleRecord, CyclingProtocol, Diagnostics, TimeBase, WaveformSegmenter};

use super::{file_name, files_in, finish, has_extension, ProcessedCell, SourceKind, WorkUnit};
use crate::table::{CsvOptions, RawTable};

pub const NOMINAL_CAPACITY: f64 = 1.11;
pub const MIN_VOLTAGE: f64 = 3.5;
pub const MAX_VOLTAGE: f64 = 3.9;
pub const MAX_CURRENT: f64 = 4.0;
/// Largest plausible forward step of `Programmdauer`, in ms.
pub const TIME_JUMP_TOLERANCE_MS: f64 = 1e5;
pub const LOCAL_MEDIAN_EPS: f64 = 0.05;
pub const LOCAL_MEDIAN_WINDOW: usize = 5;
/// Cell numbers that belong to the aging study.
pub const CELLS: std::ops::RangeInclusive<u32> = 2..=49;

const TIMESTAMP: &str = "Zeit";
const TIME: &str = "Programmdauer";
const CURRENT: &str = "Strom";
const VOLTAGE: &str = "Spannung";

pub fn discover(raw_dir: &Path) -> Result<Vec<WorkUnit>> {
    let pattern = Regex::new(r"(\d{3})=ZYK.*Zyk.*\.(csv|zip)$")?;
    let mut units: Vec<WorkUnit> = Vec::new();
    for path in files_in(raw_dir, true)? {
        let name = file_name(&path);
        if name.contains("BOL") {
            continue;
        }
        let Some(captures) = pattern.captures(name) else {
            continue;
        };
        let id = captures[1].to_string();
        if !id.parse::<u32>().is_ok_and(|n| CELLS.contains(&n)) {
            continue;
        }
        match units.iter_mut().find(|u| u.id == id) {
            Some(unit) => unit.inputs.push(path),
            None => {
                let cell_id = format!("RWTH_{id}");
                units.push(WorkUnit::single(SourceKind::Rwth, id, path, cell_id));
            }
        }
    }
    units.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(units)
}

fn read_inputs(inputs: &[std::path::PathBuf]) -> Result<RawTable> {
    let options = CsvOptions {
        skip_rows: 1,
        ..CsvOptions::default()
    };
    let mut table = RawTable::default();
    for path in inputs {
        debug!(file = %path.display(), "loading");
        if has_extension(path, &["zip"]) {
            let file = File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
            let mut archive = ZipArchive::new(file)
                .with_context(|| format!("reading zip archive '{}'", path.display()))?;
            for index in 0..archive.len() {
                let mut entry = archive.by_index(index)?;
                if entry.is_dir() || !entry.name().to_lowercase().ends_with(".csv") {
                    continue;
                }
                let mut text = String::new();
                entry
                    .read_to_string(&mut text)
                    .with_context(|| format!("extracting '{}'", entry.name()))?;
                let part = RawTable::from_csv_reader(text.as_bytes(), &options)
                    .with_context(|| format!("parsing '{}' in '{}'", entry.name(), path.display()))?;
                table.append(part);
            }
        } else {
            table.append(RawTable::from_csv_path(path, &options)?);
        }
    }
    Ok(table)
}

/// Keep the first row of each timestamp, then order rows by timestamp.
fn dedupe_and_sort(table: &mut RawTable) -> Result<()> {
    let stamps: Vec<String> = table.texts(TIMESTAMP)?.into_iter().map(str::to_string).collect();
    let mut seen = HashSet::new();
    let keep: Vec<bool> = stamps.iter().map(|s| seen.insert(s.clone())).collect();
    table.retain_rows(&keep);

    let kept: Vec<&String> = stamps.iter().zip(&keep).filter(|(_, k)| **k).map(|(s, _)| s).collect();
    let mut order: Vec<usize> = (0..kept.len()).collect();
    order.sort_by(|a, b| kept[*a].cmp(kept[*b]));
    table.reorder_rows(&order);
    Ok(())
}

/// Keep mask over `time`: a row more than `tolerance` after the last kept
/// row is dropped.
pub fn time_anomalies(time: &[f64], tolerance: f64) -> Vec<bool> {
    let mut keep = vec![true; time.len()];
    let Some(mut prev) = time.first().copied() else {
        return keep;
    };
    for (i, t) in time.iter().enumerate().skip(1) {
        if t - prev > tolerance {
            keep[i] = false;
        } else {
            prev = *t;
        }
    }
    keep
}

pub fn process(unit: &WorkUnit) -> Result<Vec<ProcessedCell>> {
    let cell_id = format!("RWTH_{}", unit.id);
    let mut table = read_inputs(&unit.inputs)?;
    if table.is_empty() {
        warn!(cell_id = %cell_id, "no rows in raw files");
        return Ok(Vec::new());
    }
    dedupe_and_sort(&mut table)?;
    let keep = time_anomalies(&table.floats(TIME)?, TIME_JUMP_TOLERANCE_MS);
    let dropped = keep.iter().filter(|k| !**k).count();
    if dropped > 0 {
        warn!(cell_id = %cell_id, rows = dropped, "rows after a time jump dropped");
    }
    table.retain_rows(&keep);

    let time = table.floats(TIME)?;
    let current = table.floats(CURRENT)?;
    let voltage = table.floats(VOLTAGE)?;
    let starts = WaveformSegmenter::default().find_cycle_starts(&current);
    let cycles: Vec<CycleRecord> = cycle_ranges(&starts, 1)
        .into_iter()
        .enumerate()
        .map(|(i, range)| {
            CycleRecord::from_current(
                i as u32 + 1,
                time[range.clone()].to_vec(),
                current[range.clone()].to_vec(),
                voltage[range].to_vec(),
                TimeBase::Milliseconds,
            )
        })
        .collect();
    debug!(cell_id = %cell_id, boundaries = starts.len(), cycles = cycles.len(), "segmented");

    let cleaner = CycleCleaner::new(
        DetectionPolicy::LocalMedian {
            eps: LOCAL_MEDIAN_EPS,
            window: LOCAL_MEDIAN_WINDOW,
        },
        Resolution::Drop,
    );
    let (cycles, report) = cleaner.clean(&cell_id, cycles, None)?;
    let mut diagnostics = Diagnostics::new();
    report.record(&mut diagnostics);
    if dropped > 0 {
        diagnostics.add_warning("time-jump", &format!("{dropped} rows dropped after time jumps"));
    }

    let mut record = CellRecord::new(cell_id, cycles);
    record.form_factor = Some("cylindrical_18650".into());
    record.anode_material = Some("graphite".into());
    record.cathode_material = Some("NMC".into());
    record.nominal_capacity_ah = Some(NOMINAL_CAPACITY);
    record.min_voltage_limit_v = Some(MIN_VOLTAGE);
    record.max_voltage_limit_v = Some(MAX_VOLTAGE);
    record.max_current_limit_a = Some(MAX_CURRENT);
    record.charge_protocol = vec![
        CyclingProtocol {
            current_a: Some(MAX_CURRENT),
            start_voltage_v: Some(MIN_VOLTAGE),
            end_voltage_v: Some(MAX_VOLTAGE),
            ..CyclingProtocol::default()
        },
        CyclingProtocol {
            voltage_v: Some(MAX_VOLTAGE),
            start_voltage_v: Some(MAX_VOLTAGE),
            end_soc: Some(1.0),
            ..CyclingProtocol::default()
        },
    ];
    record.discharge_protocol = vec![
        CyclingProtocol {
            current_a: Some(MAX_CURRENT),
            start_voltage_v: Some(MAX_VOLTAGE),
            end_voltage_v: Some(MIN_VOLTAGE),
            ..CyclingProtocol::default()
        },
        CyclingProtocol {
            voltage_v: Some(MIN_VOLTAGE),
            start_voltage_v: Some(MIN_VOLTAGE),
            end_soc: Some(0.0),
            ..CyclingProtocol::default()
        },
    ];
    info!(cell_id = %record.cell_id, cycles = record.cycle_data.len(), "cell processed");
    Ok(finish(record, diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn time_jump_drops_until_clock_returns() {
        let time = [0.0, 1000.0, 500_000.0, 2000.0, 3000.0];
        assert_eq!(
            time_anomalies(&time, TIME_JUMP_TOLERANCE_MS),
            vec![true, true, false, true, true]
        );
        assert!(time_anomalies(&[], 1.0).is_empty());
    }

    #[test]
    fn duplicates_keep_first_and_rows_sort_by_timestamp() {
        let text = "Zeit,Programmdauer,Strom,Spannung\n-,ms,A,V\n\
                    2018-01-01 00:00:02,2000,1,3.6\n\
                    2018-01-01 00:00:01,1000,1,3.5\n\
                    2018-01-01 00:00:02,9999,1,3.9\n";
        let options = CsvOptions {
            skip_rows: 1,
            ..CsvOptions::default()
        };
        let mut table = RawTable::from_csv_reader(text.as_bytes(), &options).unwrap();
        dedupe_and_sort(&mut table).unwrap();
        assert_eq!(table.floats("Programmdauer").unwrap(), vec![1000.0, 2000.0]);
    }

    #[test]
    fn discovery_groups_files_by_cell_and_skips_bol() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "OCV_003=ZYK_Zyk1.csv",
            "OCV_003=ZYK_Zyk2.csv",
            "OCV_002=ZYK_Zyk1.zip",
            "BOL_004=ZYK_Zyk1.csv",
            "OCV_050=ZYK_Zyk1.csv",
            "readme.txt",
        ] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let units = discover(dir.path()).unwrap();
        let ids: Vec<&str> = units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["002", "003"]);
        assert_eq!(units[1].inputs.len(), 2);
        assert_eq!(units[0].cells, vec!["RWTH_002".to_string()]);
    }
}
