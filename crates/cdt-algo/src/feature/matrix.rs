//! Voltage-capacity matrix: one smoothed Qdlin difference curve per kept
//! cycle, taken against a base cycle.

use ndarray::Array2;
use serde::{Deserialize, Deserializer, Serialize};

use cdt_core::{CdtError, CdtResult, CellRecord};

use super::qdlin::{cycle_qdlin, smooth};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    pub interp_dims: usize,
    /// Cycle position every row is compared against.
    pub diff_base: usize,
    /// Restrict rows to these cycle positions (a single integer is accepted).
    #[serde(deserialize_with = "one_or_many", skip_serializing_if = "Option::is_none")]
    pub cycles_to_keep: Option<Vec<usize>>,
    pub min_cycle_index: usize,
    pub max_cycle_index: usize,
    pub use_precalculated_qdlin: bool,
    pub smooth: bool,
    /// Keep every `cycle_average`-th grid point of each curve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_average: Option<usize>,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            interp_dims: 1000,
            diff_base: 9,
            cycles_to_keep: None,
            min_cycle_index: 0,
            max_cycle_index: 99,
            use_precalculated_qdlin: false,
            smooth: true,
            cycle_average: None,
        }
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Vec<usize>>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(usize),
        Many(Vec<usize>),
    }
    Ok(match Option::<OneOrMany>::deserialize(de)? {
        None => None,
        Some(OneOrMany::One(cycle)) => Some(vec![cycle]),
        Some(OneOrMany::Many(cycles)) => Some(cycles),
    })
}

impl MatrixConfig {
    pub fn validate(&self) -> CdtResult<()> {
        if self.diff_base < self.min_cycle_index || self.diff_base > self.max_cycle_index {
            return Err(CdtError::Config(format!(
                "diff_base {} outside [{}, {}]",
                self.diff_base, self.min_cycle_index, self.max_cycle_index
            )));
        }
        if self.cycle_average == Some(0) {
            return Err(CdtError::Config("cycle_average must be at least 1".into()));
        }
        Ok(())
    }

    fn stride(&self) -> usize {
        self.cycle_average.unwrap_or(1)
    }

    /// Curve width after striding.
    pub fn columns(&self) -> usize {
        self.interp_dims.div_ceil(self.stride())
    }

    fn keeps(&self, position: usize) -> bool {
        position >= self.min_cycle_index
            && position <= self.max_cycle_index
            && self
                .cycles_to_keep
                .as_ref()
                .map_or(true, |keep| keep.contains(&position))
    }

    /// Cycle positions that become matrix rows, ascending.
    pub fn kept_positions(&self) -> Vec<usize> {
        (self.min_cycle_index..=self.max_cycle_index)
            .filter(|p| self.keeps(*p))
            .collect()
    }

    pub fn rows(&self) -> usize {
        self.kept_positions().len()
    }
}

/// Matrix features of one cell, shape `(rows, columns)`. Non-finite values
/// become 0.
pub fn extract_matrix(cell: &CellRecord, config: &MatrixConfig) -> CdtResult<Array2<f64>> {
    config.validate()?;
    let positions = config.kept_positions();
    let needed = positions
        .last()
        .map_or(config.diff_base, |last| config.diff_base.max(*last));
    if cell.cycle_data.len() <= needed {
        return Err(CdtError::InsufficientCycles {
            cell_id: cell.cell_id.clone(),
            required: needed + 1,
            available: cell.cycle_data.len(),
        });
    }

    let prepare = |position: usize| -> CdtResult<Vec<f64>> {
        let mut curve = cycle_qdlin(
            cell,
            &cell.cycle_data[position],
            config.interp_dims,
            config.use_precalculated_qdlin,
        )?;
        if config.smooth {
            curve = smooth(&curve);
        }
        Ok(curve.into_iter().step_by(config.stride()).collect())
    };

    let base = prepare(config.diff_base)?;
    let columns = base.len();
    let mut values = Vec::with_capacity(positions.len() * columns);
    for &position in &positions {
        let curve = prepare(position)?;
        if curve.len() != columns {
            return Err(CdtError::Validation(format!(
                "cell '{}' cycle position {position} has {} grid points, base has {columns}",
                cell.cell_id,
                curve.len()
            )));
        }
        let mut diff: Vec<f64> = curve.iter().zip(&base).map(|(q, b)| q - b).collect();
        if config.smooth {
            diff = smooth(&diff);
        }
        values.extend(diff.into_iter().map(|v| if v.is_finite() { v } else { 0.0 }));
    }

    Array2::from_shape_vec((positions.len(), columns), values)
        .map_err(|err| CdtError::Other(format!("matrix shape: {err}")))
}
