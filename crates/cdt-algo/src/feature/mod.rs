//! Degradation feature extraction.
//!
//! A [`FeatureSetConfig`] selects one of the scalar feature sets or the
//! voltage-capacity matrix. [`extract_features`] runs the selected set over
//! many cells in parallel; a cell that cannot be characterized is left out
//! of the table and listed in [`FeatureTable::failures`].

pub mod matrix;
pub mod qdlin;
pub mod scalar;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::{Array1, Array2, Array3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use cdt_core::{CdtError, CdtResult, CellRecord};

pub use matrix::{extract_matrix, MatrixConfig};
pub use qdlin::{compute_qdlin, cycle_qdlin, interpolate, smooth};
pub use scalar::{extract_scalar, ScalarConfig, ScalarFeature};

/// Scalar features of one cell, non-finite entries replaced by 0.
pub type FeatureVector = Array1<f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureSetConfig {
    /// Variance of the Qdlin difference curve only.
    Variance(ScalarConfig),
    /// Difference-curve statistics plus early capacity features.
    Discharge(ScalarConfig),
    /// Difference curve, fade curve, charge time, temperature and resistance.
    Full(ScalarConfig),
    VoltageCapacityMatrix(MatrixConfig),
}

impl FeatureSetConfig {
    /// Scalar features of this set, empty for the matrix set.
    pub fn scalar_features(&self) -> &'static [ScalarFeature] {
        use ScalarFeature::*;
        match self {
            FeatureSetConfig::Variance(_) => &[DiffVariance],
            FeatureSetConfig::Discharge(_) => &[
                DiffMinimum,
                DiffVariance,
                DiffSkewness,
                DiffKurtosis,
                FadeEarly,
                FadeMaxMinusEarly,
            ],
            FeatureSetConfig::Full(_) => &[
                DiffMinimum,
                DiffVariance,
                FadeSlope,
                FadeIntercept,
                FadeEarly,
                AvgChargeTime,
                AvgTemperature,
                MinInternalResistance,
                InternalResistanceChange,
            ],
            FeatureSetConfig::VoltageCapacityMatrix(_) => &[],
        }
    }

    /// Column names of the scalar table, or row labels of each matrix.
    pub fn feature_names(&self) -> Vec<String> {
        match self {
            FeatureSetConfig::VoltageCapacityMatrix(config) => config
                .kept_positions()
                .into_iter()
                .map(|p| format!("cycle_{p}"))
                .collect(),
            _ => self
                .scalar_features()
                .iter()
                .map(|f| f.name().to_string())
                .collect(),
        }
    }

    pub fn validate(&self) -> CdtResult<()> {
        match self {
            FeatureSetConfig::VoltageCapacityMatrix(config) => config.validate(),
            FeatureSetConfig::Variance(config)
            | FeatureSetConfig::Discharge(config)
            | FeatureSetConfig::Full(config) => {
                if config.critical_cycles.len() != 3 {
                    return Err(CdtError::Config(format!(
                        "critical_cycles needs exactly 3 entries, got {}",
                        config.critical_cycles.len()
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Features of a single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellFeatures {
    Vector(FeatureVector),
    Matrix(Array2<f64>),
}

/// Extract the configured features from one cell.
pub fn extract_cell(cell: &CellRecord, config: &FeatureSetConfig) -> CdtResult<CellFeatures> {
    match config {
        FeatureSetConfig::VoltageCapacityMatrix(matrix) => {
            extract_matrix(cell, matrix).map(CellFeatures::Matrix)
        }
        FeatureSetConfig::Variance(scalar)
        | FeatureSetConfig::Discharge(scalar)
        | FeatureSetConfig::Full(scalar) => {
            extract_scalar(cell, config.scalar_features(), scalar).map(CellFeatures::Vector)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFailure {
    pub cell_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureValues {
    /// `(cells, features)`
    Scalar(Array2<f64>),
    /// `(cells, rows, grid)`
    Matrix(Array3<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub cell_ids: Vec<String>,
    pub feature_names: Vec<String>,
    pub values: FeatureValues,
    pub failures: Vec<FeatureFailure>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.cell_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cell_ids.is_empty()
    }
}

/// Extract features from every cell in parallel, preserving input order.
///
/// Configuration errors abort the run; per-cell errors are collected in
/// `failures`.
pub fn extract_features(cells: &[CellRecord], config: &FeatureSetConfig) -> CdtResult<FeatureTable> {
    config.validate()?;
    info!(cells = cells.len(), "extracting features");

    let results: Vec<(String, CdtResult<CellFeatures>)> = cells
        .par_iter()
        .map(|cell| (cell.cell_id.clone(), extract_cell(cell, config)))
        .collect();

    let mut cell_ids = Vec::new();
    let mut extracted = Vec::new();
    let mut failures = Vec::new();
    for (cell_id, result) in results {
        let result = result.and_then(|features| conform(&cell_id, features, config));
        match result {
            Ok(features) => {
                cell_ids.push(cell_id);
                extracted.push(features);
            }
            Err(err) => {
                warn!(cell_id = %cell_id, error = %err, "feature extraction failed");
                failures.push(FeatureFailure {
                    cell_id,
                    reason: err.to_string(),
                });
            }
        }
    }

    let values = match config {
        FeatureSetConfig::VoltageCapacityMatrix(matrix) => {
            let views: Vec<_> = extracted
                .iter()
                .filter_map(|f| match f {
                    CellFeatures::Matrix(m) => Some(m.view()),
                    CellFeatures::Vector(_) => None,
                })
                .collect();
            if views.is_empty() {
                FeatureValues::Matrix(Array3::zeros((0, matrix.rows(), matrix.columns())))
            } else {
                let stacked = ndarray::stack(Axis(0), &views)
                    .map_err(|err| CdtError::Other(format!("stacking matrices: {err}")))?;
                FeatureValues::Matrix(stacked)
            }
        }
        _ => {
            let width = config.scalar_features().len();
            let flat: Vec<f64> = extracted
                .iter()
                .filter_map(|f| match f {
                    CellFeatures::Vector(v) => Some(v.iter().copied()),
                    CellFeatures::Matrix(_) => None,
                })
                .flatten()
                .collect();
            let table = Array2::from_shape_vec((cell_ids.len(), width), flat)
                .map_err(|err| CdtError::Other(format!("feature table shape: {err}")))?;
            FeatureValues::Scalar(table)
        }
    };

    Ok(FeatureTable {
        cell_ids,
        feature_names: config.feature_names(),
        values,
        failures,
    })
}

/// Reject features whose shape differs from what `config` promises, so
/// every row of the table has the same width.
fn conform(cell_id: &str, features: CellFeatures, config: &FeatureSetConfig) -> CdtResult<CellFeatures> {
    let (found, expected) = match (&features, config) {
        (CellFeatures::Matrix(m), FeatureSetConfig::VoltageCapacityMatrix(matrix)) => {
            (m.dim(), (matrix.rows(), matrix.columns()))
        }
        (CellFeatures::Vector(v), _) => ((1, v.len()), (1, config.scalar_features().len())),
        (CellFeatures::Matrix(m), _) => (m.dim(), (1, config.scalar_features().len())),
    };
    if found != expected {
        return Err(CdtError::Validation(format!(
            "cell '{cell_id}' features have shape {found:?}, expected {expected:?}"
        )));
    }
    Ok(features)
}

pub fn load_feature_config(path: &Path) -> Result<FeatureSetConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading feature config '{}'", path.display()))?;
    let config: FeatureSetConfig = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
            serde_yaml::from_str(&data).context("parsing feature config yaml")?
        }
        Some(ext) if ext.eq_ignore_ascii_case("json") => {
            serde_json::from_str(&data).context("parsing feature config json")?
        }
        _ => serde_yaml::from_str(&data)
            .or_else(|_| serde_json::from_str(&data))
            .context("parsing feature config")?,
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn kind_selects_feature_set_with_defaults() {
        let config: FeatureSetConfig = serde_yaml::from_str("kind: full\n").unwrap();
        assert_eq!(config, FeatureSetConfig::Full(ScalarConfig::default()));
        assert_eq!(config.feature_names().len(), 9);

        let config: FeatureSetConfig =
            serde_json::from_str(r#"{"kind": "voltage_capacity_matrix", "diff_base": 5}"#)
                .unwrap();
        match config {
            FeatureSetConfig::VoltageCapacityMatrix(m) => {
                assert_eq!(m.diff_base, 5);
                assert_eq!(m.interp_dims, 1000);
            }
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn feature_set_orders() {
        let names = FeatureSetConfig::Discharge(ScalarConfig::default()).feature_names();
        assert_eq!(names[0], "diff_qdlin_minimum");
        assert_eq!(names[5], "max_minus_early_discharge_capacity");
        assert_eq!(
            FeatureSetConfig::Variance(ScalarConfig::default()).feature_names(),
            vec!["diff_qdlin_variance".to_string()]
        );
    }

    #[test]
    fn config_loads_from_yaml_file() {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "kind: variance\ninterp_dims: 500\ncritical_cycles: [1, 9, 99]").unwrap();
        let config = load_feature_config(file.path()).unwrap();
        match config {
            FeatureSetConfig::Variance(s) => assert_eq!(s.interp_dims, 500),
            other => panic!("unexpected config {other:?}"),
        }
    }

    #[test]
    fn invalid_config_is_rejected_on_load() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(file, r#"{{"kind": "discharge", "critical_cycles": [1]}}"#).unwrap();
        assert!(load_feature_config(file.path()).is_err());
    }
}
