//! Quick look at a processed cell record or a batch manifest.

use std::path::Path;

use anyhow::{bail, Result};
use cdt_batch::{load_batch_manifest, JobStatus, MANIFEST_FILE};
use cdt_core::CellRecord;
use cdt_io::read_cell;

pub fn handle(file: &Path, cycles: bool) -> Result<()> {
    if !file.is_file() {
        bail!("'{}' is not a file", file.display());
    }
    let is_manifest = file.file_name().and_then(|n| n.to_str()) == Some(MANIFEST_FILE);
    if is_manifest {
        return inspect_manifest(file);
    }
    let cell = read_cell(file)?;
    print_cell(&cell, cycles);
    Ok(())
}

fn print_cell(cell: &CellRecord, cycles: bool) {
    print!("{}", cell.describe());
    match cell.validate() {
        Ok(()) => println!("  validation: ok"),
        Err(err) => println!("  validation: {err}"),
    }
    let trend = cell.discharge_capacity_trend();
    if let (Some(first), Some(last)) = (trend.first(), trend.last()) {
        println!("  discharge capacity: {first:.4} Ah -> {last:.4} Ah");
    }

    if cycles {
        println!();
        println!("  CYCLE  SAMPLES  Q_DIS (Ah)  IR (Ohm)");
        for cycle in &cell.cycle_data {
            let ir = cycle
                .internal_resistance_ohm
                .map_or_else(|| "-".to_string(), |r| format!("{r:.5}"));
            println!(
                "  {:>5}  {:>7}  {:>10.4}  {:>8}",
                cycle.cycle_number,
                cycle.len(),
                cycle.max_discharge_capacity(),
                ir
            );
        }
    }
}

fn inspect_manifest(path: &Path) -> Result<()> {
    let manifest = load_batch_manifest(path)?;
    println!("Batch {} ({})", manifest.source, manifest.created_at.to_rfc3339());
    println!("  overrides version: {}", manifest.overrides_version);
    println!(
        "  cells: {}  ok: {}  failed: {}  skipped: {}",
        manifest.num_cells, manifest.success, manifest.failure, manifest.skipped
    );
    let warnings: usize = manifest.cells.iter().map(|c| c.diagnostics.warning_count()).sum();
    println!("  warnings: {warnings}");
    for cell in manifest.cells.iter().filter(|c| c.status == JobStatus::Error) {
        println!("  ✗ {} - {}", cell.cell_id, cell.error.as_deref().unwrap_or("unknown error"));
    }
    Ok(())
}
