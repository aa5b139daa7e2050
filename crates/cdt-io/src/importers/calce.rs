//! CALCE CS2/CX2 prismatic LCO cells.
//!
//! A cell's test is spread over many `.txt` (tab separated) and `.xlsx`/`.xls`
//! exports, either zipped as `<cell>.zip` or unpacked into `<cell>/`. Each
//! file name carries its capture date, which orders the files; see
//! [`crate::reconstruct::merge_chronological`]. Capacities are integrated
//! from the current in seconds. Cycles are cleaned with a median filter and
//! flagged cycles are dropped.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use cdt_algo::{CapacityFloor, CycleCleaner, DetectionPolicy, Resolution};
use cdt_core::{CdtError, CellRecord, CycleRecord, Diagnostics, TimeBase};

use super::{file_name, files_in, finish, has_extension, AdapterContext, ProcessedCell, SourceKind, WorkUnit};
use crate::reconstruct::{merge_chronological, TimedRow};
use crate::table::{parse_float, workbook_sheets, CsvOptions, RawTable};

pub const MEDIAN_WINDOW: usize = 21;
pub const MAD_MULTIPLE: f64 = 3.0;
/// Cycles whose discharge capacity is not above this are dropped.
pub const CAPACITY_FLOOR: f64 = 0.1;
pub const NOMINAL_CAPACITY_CS: f64 = 1.1;
pub const NOMINAL_CAPACITY_CX: f64 = 1.35;
pub const MIN_VOLTAGE: f64 = 2.7;
pub const MAX_VOLTAGE: f64 = 4.2;

const CACHE_SUFFIX: &str = "_cache.csv";

pub fn discover(raw_dir: &Path) -> Result<Vec<WorkUnit>> {
    // keyed case-insensitively: some archives unpack into a lower-case folder
    let mut cells: BTreeMap<String, (String, PathBuf)> = BTreeMap::new();
    for path in files_in(raw_dir, false)? {
        if has_extension(&path, &["zip"]) {
            let name = super::file_stem(&path).to_string();
            cells.insert(name.to_uppercase(), (name, path));
        }
    }
    for entry in fs::read_dir(raw_dir).with_context(|| format!("listing '{}'", raw_dir.display()))? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let name = file_name(&path).to_string();
        cells
            .entry(name.to_uppercase())
            .and_modify(|(_, input)| *input = path.clone())
            .or_insert((name, path));
    }
    Ok(cells
        .into_values()
        .map(|(name, input)| {
            let cell_id = format!("CALCE_{name}");
            WorkUnit::single(SourceKind::Calce, name, input, cell_id)
        })
        .collect())
}

pub fn process(unit: &WorkUnit, ctx: &AdapterContext) -> Result<Vec<ProcessedCell>> {
    let name = unit.id.as_str();
    let cell_id = format!("CALCE_{name}");
    let sources = collect_sources(unit.first_input()?)?;
    if sources.is_empty() {
        warn!(cell_id = %cell_id, "no raw files in archive");
        return Ok(Vec::new());
    }

    let files = sources
        .iter()
        .map(|source| {
            debug!(cell_id = %cell_id, file = %source.name, "loading");
            load_rows(source).map_err(|err| CdtError::parse(&source.name, format!("{err:#}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let cycles: Vec<CycleRecord> = merge_chronological(files)
        .iter()
        .enumerate()
        .map(|(i, rows)| cycle_from_rows(i as u32 + 1, rows))
        .collect();

    let mut exclusions = ctx.overrides.exclusions_for(name);
    exclusions
        .capacity_floor
        .get_or_insert(CapacityFloor::AtOrBelow(CAPACITY_FLOOR));
    let cleaner = CycleCleaner::new(
        DetectionPolicy::MedianFilter {
            window: MEDIAN_WINDOW,
            multiple: MAD_MULTIPLE,
        },
        Resolution::Drop,
    )
    .with_exclusions(exclusions);
    let (cycles, report) = cleaner.clean(&cell_id, cycles, None)?;
    let mut diagnostics = Diagnostics::new();
    report.record(&mut diagnostics);

    let nominal = if name.to_uppercase().contains("CS") {
        NOMINAL_CAPACITY_CS
    } else {
        NOMINAL_CAPACITY_CX
    };
    let mut record = CellRecord::new(cell_id, cycles);
    record.form_factor = Some("prismatic".into());
    record.anode_material = Some("graphite".into());
    record.cathode_material = Some("LCO".into());
    record.nominal_capacity_ah = Some(nominal);
    record.min_voltage_limit_v = Some(MIN_VOLTAGE);
    record.max_voltage_limit_v = Some(MAX_VOLTAGE);
    info!(cell_id = %record.cell_id, cycles = record.cycle_data.len(), "cell processed");
    Ok(finish(record, diagnostics))
}

/// Raw export read into memory, named by its base file name.
struct RawFile {
    name: String,
    bytes: Vec<u8>,
}

fn is_data_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    !name.starts_with("._")
        && (lower.ends_with(".txt")
            || lower.ends_with(".xlsx")
            || lower.ends_with(".xls")
            || lower.ends_with(CACHE_SUFFIX))
}

fn collect_sources(input: &Path) -> Result<Vec<RawFile>> {
    let mut files = Vec::new();
    if input.is_dir() {
        for path in files_in(input, true)? {
            let name = file_name(&path).to_string();
            if is_data_file(&name) {
                let bytes = fs::read(&path).with_context(|| format!("reading '{}'", path.display()))?;
                files.push(RawFile { name, bytes });
            }
        }
    } else {
        let file = File::open(input).with_context(|| format!("opening '{}'", input.display()))?;
        let mut archive = ZipArchive::new(file)
            .with_context(|| format!("reading zip archive '{}'", input.display()))?;
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() || entry.name().contains("__MACOSX") {
                continue;
            }
            let name = entry
                .name()
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string();
            if !is_data_file(&name) {
                continue;
            }
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .with_context(|| format!("extracting '{}'", entry.name()))?;
            files.push(RawFile { name, bytes });
        }
    }

    // a cached csv stands in for the workbook it was made from
    let cached: Vec<String> = files
        .iter()
        .filter_map(|f| f.name.strip_suffix(CACHE_SUFFIX).map(str::to_lowercase))
        .collect();
    files.retain(|f| {
        let lower = f.name.to_lowercase();
        let workbook_stem = lower
            .strip_suffix(".xlsx")
            .or_else(|| lower.strip_suffix(".xls"));
        workbook_stem.map_or(true, |stem| !cached.iter().any(|c| c == stem))
    });
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

fn load_rows(file: &RawFile) -> Result<Vec<TimedRow>> {
    let lower = file.name.to_lowercase();
    if lower.ends_with(CACHE_SUFFIX) {
        let table = RawTable::from_csv_reader(file.bytes.as_slice(), &CsvOptions::default())?;
        let dates = table
            .texts("date")?
            .into_iter()
            .map(parse_cache_date)
            .collect::<Result<Vec<_>>>()?;
        return timed_rows(
            dates,
            table.floats("Cycle_Index")?,
            table.floats("Test_Time(s)")?,
            table.floats("Current(A)")?,
            table.floats("Voltage(V)")?,
        );
    }

    let stem = file
        .name
        .rsplit_once('.')
        .map_or(file.name.as_str(), |(stem, _)| stem);
    let date = capture_date(stem)?;
    if lower.ends_with(".txt") {
        let table = RawTable::from_csv_reader(file.bytes.as_slice(), &CsvOptions::tab_separated())?;
        let markers = table
            .floats("Charge count")?
            .into_iter()
            .map(|c| (c / 2.0).floor() + 1.0)
            .collect();
        let current = table.floats("mA")?.into_iter().map(|i| i / 1000.0).collect();
        let voltage = table.floats("mV")?.into_iter().map(|v| v / 1000.0).collect();
        return timed_rows(vec![date; table.len()], markers, table.floats("Time")?, current, voltage);
    }

    let sheets = workbook_sheets(file.bytes.clone(), false)?;
    let has_channels = sheets.iter().any(|(name, _)| name.starts_with("Channel"));
    let mut table = RawTable::default();
    for (name, sheet) in sheets {
        if !has_channels || name.starts_with("Channel") {
            table.append(sheet);
        }
    }
    timed_rows(
        vec![date; table.len()],
        table.floats("Cycle_Index")?,
        table.floats("Test_Time(s)")?,
        table.floats("Current(A)")?,
        table.floats("Voltage(V)")?,
    )
}

fn timed_rows(
    dates: Vec<NaiveDate>,
    markers: Vec<f64>,
    time: Vec<f64>,
    current: Vec<f64>,
    voltage: Vec<f64>,
) -> Result<Vec<TimedRow>> {
    Ok(dates
        .into_iter()
        .zip(markers)
        .zip(time)
        .zip(current.into_iter().zip(voltage))
        .map(|(((date, marker), time_s), (current_a, voltage_v))| TimedRow {
            date,
            time_s,
            marker: marker as i64,
            current_a,
            voltage_v,
        })
        .collect())
}

fn parse_cache_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date '{raw}'"))
}

/// Capture date encoded in a CALCE file name, e.g. `CX2_16_8_16_10` or
/// `CS2_35_1_10_11B` (month, day, two-digit year), or `8_16_10_CX2_32`.
pub fn capture_date(stem: &str) -> Result<NaiveDate> {
    let upper = stem.to_uppercase();
    let primary = Regex::new(r"C[XS]2?_\d+_(\d+)_(\d+)B?_(\d+)")?;
    let fallback = Regex::new(r"(\d+)_(\d+)_(\d+)_CX2_32")?;
    let captures = primary
        .captures(&upper)
        .or_else(|| fallback.captures(&upper))
        .ok_or_else(|| anyhow!("no capture date in file name '{stem}'"))?;
    let field = |i: usize| -> Result<u32> {
        captures[i]
            .parse::<u32>()
            .with_context(|| format!("date field '{}' in '{stem}'", &captures[i]))
    };
    let (month, day, year) = (field(1)?, field(2)?, field(3)?);
    let year = if year < 100 { 2000 + year } else { year };
    NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or_else(|| anyhow!("invalid capture date {month}/{day}/{year} in '{stem}'"))
}

fn cycle_from_rows(cycle_number: u32, rows: &[TimedRow]) -> CycleRecord {
    CycleRecord::from_current(
        cycle_number,
        rows.iter().map(|r| r.time_s).collect(),
        rows.iter().map(|r| r.current_a).collect(),
        rows.iter().map(|r| r.voltage_v).collect(),
        TimeBase::Seconds,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_dates_from_both_name_patterns() {
        assert_eq!(
            capture_date("CX2_16_8_16_10").unwrap(),
            NaiveDate::from_ymd_opt(2010, 8, 16).unwrap()
        );
        assert_eq!(
            capture_date("cs2_35_1_10_11b").unwrap(),
            NaiveDate::from_ymd_opt(2011, 1, 10).unwrap()
        );
        assert_eq!(
            capture_date("12_3_10_CX2_32").unwrap(),
            NaiveDate::from_ymd_opt(2010, 12, 3).unwrap()
        );
        assert!(capture_date("notes").is_err());
    }

    #[test]
    fn txt_rows_scale_units_and_markers() {
        let text = "Time\tCharge count\tmA\tmV\n0\t0\t500\t3700\n1\t1\t-500\t3600\n2\t2\t500\t3650\n";
        let rows = load_rows(&RawFile {
            name: "CS2_35_1_10_11.txt".into(),
            bytes: text.as_bytes().to_vec(),
        })
        .unwrap();
        let markers: Vec<i64> = rows.iter().map(|r| r.marker).collect();
        assert_eq!(markers, vec![1, 1, 2]);
        assert_eq!(rows[1].current_a, -0.5);
        assert_eq!(rows[0].voltage_v, 3.7);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2011, 1, 10).unwrap());
    }

    #[test]
    fn cache_rows_carry_their_own_dates() {
        let text = "date,Cycle_Index,Test_Time(s),Current(A),Voltage(V)\n2010-08-16,1,0,0.5,3.7\n";
        let rows = load_rows(&RawFile {
            name: "CX2_16_8_16_10_cache.csv".into(),
            bytes: text.as_bytes().to_vec(),
        })
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2010, 8, 16).unwrap());
    }
}
