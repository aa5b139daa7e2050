//! Cycler conversion configuration and per-cell metadata documents.
//!
//! Both are plain serde structs read from YAML or JSON. The extension picks
//! the format; anything else is tried as YAML first, then JSON.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use cdt_core::{CdtError, CdtResult, CellRecord, CyclingProtocol};

/// Canonical columns every conversion config must map.
pub const REQUIRED_COLUMNS: [&str; 5] = [
    "cycle_index",
    "current",
    "voltage",
    "charge_capacity",
    "discharge_capacity",
];

/// Maps a cycler's raw headers onto canonical column names.
///
/// ```yaml
/// column_names:
///   cycle_index: Cycle_Index
///   current: Current(A)
/// scales:
///   current: 0.001
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// canonical name -> raw header
    pub column_names: BTreeMap<String, String>,
    /// canonical name -> multiplier applied after renaming
    #[serde(default)]
    pub scales: BTreeMap<String, f64>,
}

impl ConversionConfig {
    /// Inverse of `column_names`, for renaming raw headers.
    pub fn raw_to_canonical(&self) -> BTreeMap<String, String> {
        self.column_names
            .iter()
            .map(|(canonical, raw)| (raw.clone(), canonical.clone()))
            .collect()
    }

    pub fn scale(&self, canonical: &str) -> Option<f64> {
        self.scales.get(canonical).copied()
    }

    pub fn validate(&self) -> CdtResult<()> {
        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| !self.column_names.contains_key(*c))
            .collect();
        if !missing.is_empty() {
            return Err(CdtError::Config(format!(
                "column_names is missing {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<CyclingProtocol>, D::Error> {
    Ok(Option::<Vec<CyclingProtocol>>::deserialize(de)?.unwrap_or_default())
}

/// Descriptive metadata for one cell, usually `<stem>.metadata.yaml` next to
/// the raw export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellMetadata {
    pub form_factor: Option<String>,
    pub anode_material: Option<String>,
    pub cathode_material: Option<String>,
    pub electrolyte_material: Option<String>,
    #[serde(alias = "nominal_capacity_in_Ah")]
    pub nominal_capacity_ah: Option<f64>,
    #[serde(alias = "min_voltage_limit_in_V")]
    pub min_voltage_limit_v: Option<f64>,
    #[serde(alias = "max_voltage_limit_in_V")]
    pub max_voltage_limit_v: Option<f64>,
    #[serde(deserialize_with = "null_as_empty")]
    pub charge_protocol: Vec<CyclingProtocol>,
    #[serde(deserialize_with = "null_as_empty")]
    pub discharge_protocol: Vec<CyclingProtocol>,
    pub reference: Option<String>,
    pub description: Option<String>,
}

impl CellMetadata {
    pub fn apply(self, cell: &mut CellRecord) {
        cell.form_factor = self.form_factor;
        cell.anode_material = self.anode_material;
        cell.cathode_material = self.cathode_material;
        cell.electrolyte_material = self.electrolyte_material;
        cell.nominal_capacity_ah = self.nominal_capacity_ah;
        cell.min_voltage_limit_v = self.min_voltage_limit_v;
        cell.max_voltage_limit_v = self.max_voltage_limit_v;
        cell.charge_protocol = self.charge_protocol;
        cell.discharge_protocol = self.discharge_protocol;
        cell.reference = self.reference;
        cell.description = self.description;
    }
}

/// `raw/cell1.csv` -> `raw/cell1.metadata.yaml`
pub fn metadata_path(cell_file: &Path) -> PathBuf {
    cell_file.with_extension("metadata.yaml")
}

fn load_document<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading {what} '{}'", path.display()))?;
    let parsed = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
            serde_yaml::from_str(&data).with_context(|| format!("parsing {what} yaml"))?
        }
        Some(ext) if ext.eq_ignore_ascii_case("json") => {
            serde_json::from_str(&data).with_context(|| format!("parsing {what} json"))?
        }
        _ => serde_yaml::from_str(&data)
            .or_else(|_| serde_json::from_str(&data))
            .with_context(|| format!("parsing {what}"))?,
    };
    Ok(parsed)
}

pub fn load_conversion_config(path: &Path) -> Result<ConversionConfig> {
    let config: ConversionConfig = load_document(path, "conversion config")?;
    config
        .validate()
        .with_context(|| format!("validating '{}'", path.display()))?;
    Ok(config)
}

pub fn load_cell_metadata(path: &Path) -> Result<CellMetadata> {
    load_document(path, "cell metadata")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    const ARBIN_CONFIG: &str = "\
column_names:
  cycle_index: Cycle_Index
  current: Current(A)
  voltage: Voltage(V)
  charge_capacity: Charge_Capacity(Ah)
  discharge_capacity: Discharge_Capacity(Ah)
  test_time: Test_Time(s)
data_types:
  cycle_index: int
";

    #[test]
    fn conversion_config_ignores_data_types() {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(ARBIN_CONFIG.as_bytes()).unwrap();
        let config = load_conversion_config(file.path()).unwrap();
        let inverse = config.raw_to_canonical();
        assert_eq!(inverse["Current(A)"], "current");
        assert!(config.scales.is_empty());
    }

    #[test]
    fn incomplete_column_map_is_rejected() {
        let config: ConversionConfig =
            serde_yaml::from_str("column_names:\n  cycle_index: Cycle\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("current"));
    }

    #[test]
    fn metadata_accepts_unit_suffixed_keys() {
        let yaml = "\
form_factor: cylindrical_18650
nominal_capacity_in_Ah: 2.5
min_voltage_limit_in_V: 2.5
max_voltage_limit_in_V: 4.2
charge_protocol:
  - rate_in_C: 0.5
    start_soc: 0.0
    end_soc: 1.0
discharge_protocol: null
";
        let meta: CellMetadata = serde_yaml::from_str(yaml).unwrap();
        let mut cell = CellRecord::new("ARBIN_cell1", Vec::new());
        meta.apply(&mut cell);
        assert_eq!(cell.nominal_capacity_ah, Some(2.5));
        assert_eq!(cell.voltage_bounds(), Some((2.5, 4.2)));
        assert_eq!(cell.charge_protocol[0].rate_c, Some(0.5));
        assert!(cell.discharge_protocol.is_empty());
    }

    #[test]
    fn metadata_path_replaces_extension() {
        assert_eq!(
            metadata_path(Path::new("raw/cell1.csv")),
            PathBuf::from("raw/cell1.metadata.yaml")
        );
    }

    #[test]
    fn json_documents_load_without_extension_hint() {
        let mut file = Builder::new().suffix(".cfg").tempfile().unwrap();
        write!(file, r#"{{"nominal_capacity_ah": 1.1}}"#).unwrap();
        let meta = load_cell_metadata(file.path()).unwrap();
        assert_eq!(meta.nominal_capacity_ah, Some(1.1));
    }
}
