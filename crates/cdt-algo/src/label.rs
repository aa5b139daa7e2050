//! Regression targets: remaining useful life and state of health.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use cdt_core::{CdtError, CdtResult, CellRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulLabeler {
    /// End of life is reached once capacity falls to this fraction of nominal.
    pub eol_soh: f64,
    /// Cells that never reach end of life are labelled one past their last
    /// cycle instead of NaN.
    pub pad_eol: bool,
    /// Labels at or below this value become NaN.
    pub min_rul_limit: f64,
}

impl Default for RulLabeler {
    fn default() -> Self {
        Self {
            eol_soh: 0.8,
            pad_eol: true,
            min_rul_limit: 100.0,
        }
    }
}

impl RulLabeler {
    pub fn label(&self, cell: &CellRecord) -> CdtResult<f64> {
        let nominal = cell.nominal_capacity_ah.ok_or_else(|| {
            CdtError::Validation(format!(
                "cell '{}' has no nominal capacity for an end-of-life threshold",
                cell.cell_id
            ))
        })?;
        let threshold = nominal * self.eol_soh;

        let mut label = 1.0;
        let mut found_eol = false;
        for cycle in &cell.cycle_data {
            label += 1.0;
            if cycle.max_discharge_capacity() <= threshold {
                found_eol = true;
                break;
            }
        }
        if !found_eol {
            label = if self.pad_eol { label + 1.0 } else { f64::NAN };
        }
        if label <= self.min_rul_limit {
            label = f64::NAN;
        }
        Ok(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SohMode {
    /// Capacity divided by nominal (or first-cycle) capacity.
    Relative,
    /// Capacity in Ah.
    Absolute,
}

impl SohMode {
    fn key(&self) -> &'static str {
        match self {
            SohMode::Relative => "relative",
            SohMode::Absolute => "absolute",
        }
    }
}

/// Externally measured SOH values: cell id, then cycle index, then mode.
pub type SohReference = BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SohLabeler {
    /// 1-based position of the labelled cycle.
    pub cycle_index: usize,
    pub mode: SohMode,
    #[serde(skip)]
    pub reference: Option<SohReference>,
}

impl Default for SohLabeler {
    fn default() -> Self {
        Self {
            cycle_index: 100,
            mode: SohMode::Relative,
            reference: None,
        }
    }
}

impl SohLabeler {
    /// Take labels from a JSON reference file instead of the cycle data.
    pub fn with_reference_file(mut self, path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading SOH reference '{}'", path.display()))?;
        let reference: SohReference = serde_json::from_str(&data)
            .with_context(|| format!("parsing SOH reference '{}'", path.display()))?;
        self.reference = Some(reference);
        Ok(self)
    }

    pub fn label(&self, cell: &CellRecord) -> f64 {
        if let Some(reference) = &self.reference {
            return reference
                .get(&cell.cell_id)
                .and_then(|cycles| cycles.get(&self.cycle_index.to_string()))
                .and_then(|modes| modes.get(self.mode.key()))
                .copied()
                .unwrap_or(f64::NAN);
        }
        if self.cycle_index == 0 || cell.cycle_data.len() < self.cycle_index {
            return f64::NAN;
        }
        let capacity = cell.cycle_data[self.cycle_index - 1].max_discharge_capacity();
        match self.mode {
            SohMode::Absolute => capacity,
            SohMode::Relative => {
                let reference = cell
                    .nominal_capacity_ah
                    .filter(|c| *c != 0.0)
                    .unwrap_or_else(|| cell.cycle_data[0].max_discharge_capacity());
                capacity / reference
            }
        }
    }
}

/// Label selection for a run over many cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LabelConfig {
    Rul(RulLabeler),
    Soh(SohLabeler),
}

impl LabelConfig {
    pub fn name(&self) -> &'static str {
        match self {
            LabelConfig::Rul(_) => "rul",
            LabelConfig::Soh(_) => "soh",
        }
    }

    pub fn label(&self, cell: &CellRecord) -> CdtResult<f64> {
        match self {
            LabelConfig::Rul(rul) => rul.label(cell),
            LabelConfig::Soh(soh) => Ok(soh.label(cell)),
        }
    }
}
