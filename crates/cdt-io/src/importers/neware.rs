//! Neware cycler text logs.
//!
//! The log nests three line kinds. A cycle line starts a cycle, a step line
//! (leading `,"`) starts a step and carries that step's DCIR, and record
//! lines (leading `,,`) hold samples. The first three lines are the headers
//! of the three kinds. Records inherit the cycle number, step number and
//! DCIR of the lines above them. Files are Latin-1.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info};

use cdt_core::{CellRecord, Diagnostics};

use super::cycler::{apply_metadata, apply_scales, columns_from_table, group_cycles, Columns};
use super::{file_stem, files_in, finish, has_extension, AdapterContext, ProcessedCell, SourceKind, WorkUnit};
use crate::table::RawTable;

/// DCIR column of the step header, quoted as written by the cycler.
const IR_COLUMN: &str = "\"DCIR(O)\"";
/// Record-header slot that receives the step's DCIR.
const IR_SLOT: usize = 22;
const TIME_COLUMN: &str = "Time(h:min:s.ms)";

pub fn discover(raw_dir: &Path) -> Result<Vec<WorkUnit>> {
    Ok(files_in(raw_dir, false)?
        .into_iter()
        .filter(|path| !has_extension(path, &["yaml", "yml"]))
        .map(|path| {
            let stem = file_stem(&path).to_string();
            let cell_id = format!("NEWARE_{stem}");
            WorkUnit::single(SourceKind::Neware, stem, path, cell_id)
        })
        .collect())
}

fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|b| char::from(*b)).collect()
}

fn strip_cell(raw: &str) -> String {
    raw.replace(['\t', '"'], "").trim().to_string()
}

/// `h:min:s.ms` to seconds, using the last three fields.
pub fn parse_duration(raw: &str) -> Result<f64> {
    let mut fields = raw.trim().rsplit(':');
    let mut next = |unit: &str| -> Result<f64> {
        let field = fields
            .next()
            .ok_or_else(|| anyhow!("duration '{raw}' has no {unit} field"))?;
        field
            .trim()
            .parse::<f64>()
            .with_context(|| format!("invalid {unit} '{field}' in duration '{raw}'"))
    };
    let seconds = next("seconds")?;
    let minutes = next("minutes")?;
    let hours = next("hours")?;
    Ok(3600.0 * hours + 60.0 * minutes + seconds)
}

/// Flatten a log into one table of records.
pub fn parse_log(text: &str) -> Result<RawTable> {
    let mut lines = text.lines();
    let mut header = |what: &str| -> Result<String> {
        lines
            .next()
            .map(|l| l.replace('\t', ""))
            .ok_or_else(|| anyhow!("log ends before the {what} header"))
    };
    let cycle_header = header("cycle")?;
    let step_header = header("step")?;
    let record_header = header("record")?;

    let step_fields: Vec<&str> = step_header.split(',').collect();
    let ir_index = step_fields
        .iter()
        .position(|f| f.trim() == IR_COLUMN)
        .ok_or_else(|| anyhow!("step header has no {IR_COLUMN} column"))?;
    let mut headers: Vec<String> = record_header.split(',').map(str::to_string).collect();
    if headers.len() <= IR_SLOT {
        headers.resize(IR_SLOT + 1, String::new());
    }
    headers[0] = cycle_header.split(',').next().unwrap_or_default().to_string();
    headers[1] = step_fields.get(1).copied().unwrap_or_default().to_string();
    headers[IR_SLOT] = IR_COLUMN.to_string();
    let headers: Vec<String> = headers
        .iter()
        .map(|h| strip_cell(&h.chars().filter(char::is_ascii).collect::<String>()))
        .collect();
    let time_index = headers.iter().position(|h| h == TIME_COLUMN);

    let mut cycle = String::new();
    let mut step = String::new();
    let mut ir = String::new();
    let mut rows = Vec::new();
    for (number, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if line.starts_with(",\"") {
            step = fields.get(1).copied().unwrap_or_default().to_string();
            ir = fields.get(ir_index).copied().unwrap_or_default().to_string();
        } else if line.starts_with(",,") {
            let mut row: Vec<String> = fields.iter().map(|f| strip_cell(f)).collect();
            if row.len() <= IR_SLOT {
                row.resize(IR_SLOT + 1, String::new());
            }
            row[0] = strip_cell(&cycle);
            row[1] = strip_cell(&step);
            row[IR_SLOT] = strip_cell(&ir);
            if let Some(index) = time_index {
                let seconds = parse_duration(&row[index])
                    .with_context(|| format!("record on line {}", number + 4))?;
                row[index] = seconds.to_string();
            }
            rows.push(row);
        } else {
            cycle = fields.first().copied().unwrap_or_default().to_string();
        }
    }
    Ok(RawTable::new(headers, rows))
}

/// Forward-fill then back-fill missing values.
fn fill_gaps(values: &mut [f64]) {
    let mut last = None;
    for v in values.iter_mut() {
        match (v.is_finite(), last) {
            (true, _) => last = Some(*v),
            (false, Some(previous)) => *v = previous,
            (false, None) => {}
        }
    }
    if let Some(first) = values.iter().copied().find(|v| v.is_finite()) {
        for v in values.iter_mut().take_while(|v| !v.is_finite()) {
            *v = first;
        }
    }
}

/// Running test time from per-step time, ignoring resets between steps.
fn test_time_from_step_time(step_time: &[f64]) -> Vec<f64> {
    let mut total = 0.0;
    let mut previous: Option<f64> = None;
    step_time
        .iter()
        .map(|t| {
            if let Some(p) = previous {
                let delta = t - p;
                if delta.is_finite() && delta > 0.0 {
                    total += delta;
                }
            }
            previous = Some(*t);
            total
        })
        .collect()
}

fn derive_columns(columns: &mut Columns) {
    if let Some(ir) = columns.get_mut("internal_resistance") {
        fill_gaps(ir);
    }
    if let Some(step_time) = columns.get("step_time") {
        let test_time = test_time_from_step_time(step_time);
        columns.insert("test_time".into(), test_time);
    }
}

pub fn process(unit: &WorkUnit, ctx: &AdapterContext) -> Result<Vec<ProcessedCell>> {
    let config = ctx.conversion_for(SourceKind::Neware)?;
    let input = unit.first_input()?;
    let cell_id = format!("NEWARE_{}", unit.id);

    let bytes = fs::read(input).with_context(|| format!("reading '{}'", input.display()))?;
    let mut table = parse_log(&decode_latin1(&bytes))
        .with_context(|| format!("parsing Neware log '{}'", input.display()))?;
    debug!(cell_id = %cell_id, records = table.len(), "log parsed");
    table.rename_columns(&config.raw_to_canonical());
    let mut columns = columns_from_table(&table)?;
    apply_scales(&mut columns, config);
    derive_columns(&mut columns);

    let mut diagnostics = Diagnostics::new();
    let cycles = group_cycles(&columns, &cell_id, &mut diagnostics)?;
    let mut record = CellRecord::new(cell_id, cycles);
    apply_metadata(&mut record, input, &mut diagnostics)?;
    info!(cell_id = %record.cell_id, cycles = record.cycle_data.len(), "cell processed");
    Ok(finish(record, diagnostics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionConfig;

    fn record_line(id: u32, time: &str, mv: u32, ma: i32) -> String {
        let mut fields = vec![String::new(), String::new(), id.to_string(), time.to_string()];
        fields.push(mv.to_string());
        fields.push(ma.to_string());
        fields.push("\t10".into());
        fields.push("0".into());
        while fields.len() < 24 {
            fields.push("0".into());
        }
        fields.join(",")
    }

    fn log() -> String {
        let mut record_header: Vec<String> = vec![
            String::new(),
            String::new(),
            "Record ID".into(),
            TIME_COLUMN.into(),
            "Voltage(mV)".into(),
            "Current(mA)".into(),
            "Capacity_Chg(mAh)".into(),
            "Capacity_DChg(mAh)".into(),
        ];
        while record_header.len() < 24 {
            record_header.push(format!("Col{}", record_header.len()));
        }
        let lines = [
            "Cycle ID\t,Cap_Chg(mAh),Cap_DChg(mAh)".to_string(),
            ",Step ID,Step Name,\"DCIR(O)\"".to_string(),
            record_header.join(",").replace("Capacity_Chg", "Capacity_Chg\u{b0}"),
            "1,100,90".into(),
            ",\"1\",\"CC_Chg\",\"-\"".into(),
            record_line(1, "0:00:00.000", 3600, 500),
            record_line(2, "0:00:30.500", 3700, 500),
            ",\"2\",\"CC_DChg\",\"0.021\"".into(),
            record_line(3, "0:00:00.000", 3500, -500),
            record_line(4, "1:00:01.000", 3400, -500),
            "2,100,90".into(),
            ",\"3\",\"CC_Chg\",\"0.022\"".into(),
            record_line(5, "0:00:10.000", 3600, 500),
        ];
        lines.join("\n")
    }

    #[test]
    fn durations_use_last_three_fields() {
        assert_eq!(parse_duration("1:02:03.5").unwrap(), 3723.5);
        assert_eq!(parse_duration("2:1:00:00.000").unwrap(), 3600.0);
        assert!(parse_duration("12.5").is_err());
    }

    #[test]
    fn log_lines_inherit_cycle_step_and_dcir() {
        let table = parse_log(&log()).unwrap();
        assert_eq!(table.len(), 5);
        assert_eq!(table.headers()[0], "Cycle ID");
        assert_eq!(table.headers()[1], "Step ID");
        assert_eq!(table.headers()[IR_SLOT], "DCIR(O)");
        assert_eq!(table.headers()[6], "Capacity_Chg(mAh)");
        assert_eq!(table.floats("Cycle ID").unwrap(), vec![1.0, 1.0, 1.0, 1.0, 2.0]);
        assert_eq!(table.floats("Step ID").unwrap(), vec![1.0, 1.0, 2.0, 2.0, 3.0]);
        assert_eq!(table.floats(TIME_COLUMN).unwrap(), vec![0.0, 30.5, 0.0, 3601.0, 10.0]);
        let ir = table.floats("DCIR(O)").unwrap();
        assert!(ir[0].is_nan());
        assert_eq!(ir[2], 0.021);
        assert_eq!(table.floats("Capacity_Chg(mAh)").unwrap()[0], 10.0);
    }

    #[test]
    fn gaps_fill_forward_then_backward() {
        let mut values = vec![f64::NAN, 0.02, f64::NAN, 0.03, f64::NAN];
        fill_gaps(&mut values);
        assert_eq!(values, vec![0.02, 0.02, 0.02, 0.03, 0.03]);
        assert_eq!(test_time_from_step_time(&[0.0, 30.0, 0.0, 10.0]), vec![0.0, 30.0, 30.0, 40.0]);
    }

    #[test]
    fn log_becomes_cell() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cell7.txt");
        fs::write(&path, log()).unwrap();
        let mut config = ConversionConfig::default();
        for (canonical, raw) in [
            ("cycle_index", "Cycle ID"),
            ("step_index", "Step ID"),
            ("step_time", TIME_COLUMN),
            ("voltage", "Voltage(mV)"),
            ("current", "Current(mA)"),
            ("charge_capacity", "Capacity_Chg(mAh)"),
            ("discharge_capacity", "Capacity_DChg(mAh)"),
            ("internal_resistance", "DCIR(O)"),
        ] {
            config.column_names.insert(canonical.into(), raw.into());
        }
        for name in ["voltage", "current", "charge_capacity", "discharge_capacity"] {
            config.scales.insert(name.into(), 0.001);
        }
        let ctx = AdapterContext::new().with_conversion(config);
        let units = SourceKind::Neware.discover(dir.path(), &ctx).unwrap();
        let cells = SourceKind::Neware.process(&units[0], &ctx).unwrap();
        let record = &cells[0].record;
        assert_eq!(record.cell_id, "NEWARE_cell7");
        assert_eq!(record.cycle_data.len(), 2);
        let first = &record.cycle_data[0];
        assert_eq!(first.time_s, vec![0.0, 30.5, 30.5, 3631.5]);
        assert!((first.voltage_v[0] - 3.6).abs() < 1e-12);
        assert_eq!(first.internal_resistance_ohm, Some(0.021));
        assert_eq!(record.cycle_data[1].time_s, vec![0.0]);
        assert_eq!(record.cycle_data[1].internal_resistance_ohm, Some(0.022));
    }
}
