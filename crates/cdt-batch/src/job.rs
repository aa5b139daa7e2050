use std::path::Path;

use serde::{Deserialize, Serialize};

use cdt_core::Diagnostics;
use cdt_io::WorkUnit;

/// Outcome of one cell in a batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Ok,
    Error,
    /// Output already present and left alone
    Skipped,
    /// Unit processed but nothing usable came out of it
    Empty,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ok => "ok",
            JobStatus::Error => "error",
            JobStatus::Skipped => "skipped",
            JobStatus::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellJobRecord {
    pub cell_id: String,
    /// Work unit the cell came from
    pub unit: String,
    pub status: JobStatus,
    pub error: Option<String>,
    pub output: Option<String>,
    pub num_cycles: usize,
    #[serde(default, skip_serializing_if = "Diagnostics::is_empty")]
    pub diagnostics: Diagnostics,
}

impl CellJobRecord {
    pub fn ok(unit: &WorkUnit, cell_id: &str, output: &Path, num_cycles: usize, diagnostics: Diagnostics) -> Self {
        Self {
            cell_id: cell_id.to_string(),
            unit: unit.id.clone(),
            status: JobStatus::Ok,
            error: None,
            output: Some(output.display().to_string()),
            num_cycles,
            diagnostics,
        }
    }

    pub fn failed(unit: &WorkUnit, cell_id: &str, error: String) -> Self {
        Self {
            cell_id: cell_id.to_string(),
            unit: unit.id.clone(),
            status: JobStatus::Error,
            error: Some(error),
            output: None,
            num_cycles: 0,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn skipped(unit: &WorkUnit, cell_id: &str, output: &Path) -> Self {
        Self {
            cell_id: cell_id.to_string(),
            unit: unit.id.clone(),
            status: JobStatus::Skipped,
            error: None,
            output: Some(output.display().to_string()),
            num_cycles: 0,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn empty(unit: &WorkUnit, cell_id: &str) -> Self {
        Self {
            cell_id: cell_id.to_string(),
            unit: unit.id.clone(),
            status: JobStatus::Empty,
            error: None,
            output: None,
            num_cycles: 0,
            diagnostics: Diagnostics::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdt_io::SourceKind;
    use std::path::PathBuf;

    #[test]
    fn status_serializes_lowercase() {
        let unit = WorkUnit::single(SourceKind::Ox, "Cell1", PathBuf::from("raw/Cell1_timeseries.csv"), "Cell1".into());
        let record = CellJobRecord::empty(&unit, "Cell1");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "empty");
        assert_eq!(json["unit"], "Cell1");
        assert!(json.get("diagnostics").is_none());
        assert_eq!(JobStatus::Skipped.as_str(), "skipped");
    }
}
