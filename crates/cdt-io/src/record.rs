//! Canonical record store: one pretty-printed JSON document per cell,
//! `<dir>/<cell_id>.json`.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use cdt_core::CellRecord;

/// Files in an output directory that are not cell records.
const RESERVED: &[&str] = &["batch_manifest.json"];

pub fn cell_path(dir: &Path, cell_id: &str) -> PathBuf {
    dir.join(format!("{cell_id}.json"))
}

pub fn write_cell(dir: &Path, cell: &CellRecord) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating record directory '{}'", dir.display()))?;
    let path = cell_path(dir, &cell.cell_id);
    let json = serde_json::to_string_pretty(cell)
        .with_context(|| format!("serializing cell '{}'", cell.cell_id))?;
    fs::write(&path, json).with_context(|| format!("writing '{}'", path.display()))?;
    debug!(cell_id = %cell.cell_id, path = %path.display(), "cell record written");
    Ok(path)
}

pub fn read_cell(path: &Path) -> Result<CellRecord> {
    let file = File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing cell record '{}'", path.display()))
}

/// Record files in `dir`, sorted by name.
pub fn list_cells(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("listing '{}'", dir.display()))?
    {
        let path = entry?.path();
        let is_record = path.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some("json")
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !RESERVED.contains(&n));
        if is_record {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Read every record in `dir`, or a single record when `path` is a file.
pub fn load_cells(path: &Path) -> Result<Vec<CellRecord>> {
    if path.is_file() {
        return Ok(vec![read_cell(path)?]);
    }
    list_cells(path)?.iter().map(|p| read_cell(p)).collect()
}
