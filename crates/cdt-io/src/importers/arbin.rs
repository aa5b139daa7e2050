//! Arbin cycler exports: `.csv` with a leading row index, or a workbook
//! whose data sheets are concatenated (the `Info` sheet is skipped).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use cdt_core::{CellRecord, Diagnostics};

use super::cycler::{apply_metadata, apply_scales, columns_from_table, group_cycles};
use super::{file_stem, files_in, finish, has_extension, AdapterContext, ProcessedCell, SourceKind, WorkUnit};
use crate::table::{workbook_sheets, CsvOptions, RawTable};

const INFO_SHEET: &str = "Info";

pub fn discover(raw_dir: &Path) -> Result<Vec<WorkUnit>> {
    Ok(files_in(raw_dir, false)?
        .into_iter()
        .filter(|path| has_extension(path, &["csv", "xlsx", "xls"]))
        .map(|path| {
            let stem = file_stem(&path).to_string();
            let cell_id = format!("ARBIN_{stem}");
            WorkUnit::single(SourceKind::Arbin, stem, path, cell_id)
        })
        .collect())
}

fn read_export(path: &Path) -> Result<RawTable> {
    if has_extension(path, &["csv"]) {
        let options = CsvOptions {
            drop_index_column: true,
            ..CsvOptions::default()
        };
        return RawTable::from_csv_path(path, &options);
    }
    let bytes = fs::read(path).with_context(|| format!("reading '{}'", path.display()))?;
    let mut table = RawTable::default();
    for (name, sheet) in workbook_sheets(bytes, true)? {
        if name == INFO_SHEET {
            continue;
        }
        debug!(sheet = %name, rows = sheet.len(), "sheet loaded");
        table.append(sheet);
    }
    Ok(table)
}

pub fn process(unit: &WorkUnit, ctx: &AdapterContext) -> Result<Vec<ProcessedCell>> {
    let config = ctx.conversion_for(SourceKind::Arbin)?;
    let input = unit.first_input()?;
    let cell_id = format!("ARBIN_{}", unit.id);

    let mut table = read_export(input).with_context(|| format!("reading Arbin export '{}'", input.display()))?;
    table.rename_columns(&config.raw_to_canonical());
    let mut columns = columns_from_table(&table)?;
    apply_scales(&mut columns, config);

    let mut diagnostics = Diagnostics::new();
    let cycles = group_cycles(&columns, &cell_id, &mut diagnostics)?;
    let mut record = CellRecord::new(cell_id, cycles);
    apply_metadata(&mut record, input, &mut diagnostics)?;
    info!(cell_id = %record.cell_id, cycles = record.cycle_data.len(), "cell processed");
    Ok(finish(record, diagnostics))
}
