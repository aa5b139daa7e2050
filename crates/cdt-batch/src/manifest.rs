use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::Path;

use crate::job::CellJobRecord;

pub const MANIFEST_FILE: &str = "batch_manifest.json";

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchManifest {
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub overrides_version: u32,
    pub num_cells: usize,
    pub success: usize,
    pub failure: usize,
    pub skipped: usize,
    pub cells: Vec<CellJobRecord>,
}

pub fn write_batch_manifest(path: &Path, manifest: &BatchManifest) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating manifest directory '{}'", parent.display()))?;
    }
    let json =
        serde_json::to_string_pretty(manifest).context("serializing batch manifest to JSON")?;
    fs::write(path, json)
        .with_context(|| format!("writing batch manifest '{}'", path.display()))?;
    Ok(())
}

pub fn load_batch_manifest(path: &Path) -> Result<BatchManifest> {
    let file = File::open(path)
        .with_context(|| format!("opening batch manifest '{}'", path.display()))?;
    serde_json::from_reader(file)
        .with_context(|| format!("parsing batch manifest '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use cdt_core::Diagnostics;
    use tempfile::NamedTempFile;

    #[test]
    fn manifest_writes_and_reads_back() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.add_cycle_warning("cleaning", "cycle 4 imputed", 4);
        let record = CellJobRecord {
            cell_id: "CS2_35".into(),
            unit: "CS2_35".into(),
            status: JobStatus::Ok,
            error: None,
            output: Some("out/CS2_35.json".into()),
            num_cycles: 880,
            diagnostics,
        };
        let manifest = BatchManifest {
            created_at: Utc::now(),
            source: "calce".into(),
            overrides_version: 1,
            num_cells: 1,
            success: 1,
            failure: 0,
            skipped: 0,
            cells: vec![record.clone()],
        };
        let tmp = NamedTempFile::new().unwrap();
        write_batch_manifest(tmp.path(), &manifest).unwrap();
        let parsed = load_batch_manifest(tmp.path()).unwrap();
        assert_eq!(parsed.source, "calce");
        let cell = parsed.cells.first().unwrap();
        assert_eq!(cell.cell_id, record.cell_id);
        assert_eq!(cell.diagnostics, record.diagnostics);
    }
}
