//! MATLAB v7.3 batch files (`MATR_batch_<date>.mat`).
//!
//! A v7.3 `.mat` file is an HDF5 file. Its `batch` group holds one row of
//! object references per cell (`cycle_life`, `policy_readable`, `summary`,
//! `cycles`), and every reference leads to the data of that cell. The walk
//! from references to a [`BatchCell`] goes through [`BatchStore`]; the HDF5
//! backed store is only built with the `hdf5` feature.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use tracing::debug;

use cdt_core::CdtError;

use super::{file_name, files_in};
use crate::reconstruct::{BatchCell, RawCycle};

/// Per-cycle summary series stored under `batch/summary`.
pub const SUMMARY_SERIES: &[&str] = &[
    "IR",
    "QCharge",
    "QDischarge",
    "Tavg",
    "Tmin",
    "Tmax",
    "chargetime",
    "cycle",
];

/// In-cycle series stored under `batch/cycles`.
pub const CYCLE_SERIES: &[&str] = &["I", "Qc", "Qd", "Qdlin", "T", "Tdlin", "V", "discharge_dQdV", "t"];

/// Read access to the cells of one batch file.
pub trait BatchStore {
    fn num_cells(&self) -> Result<usize>;
    /// Numeric `batch/<field>` entry of a cell (`cycle_life`).
    fn cell_values(&self, cell: usize, field: &str) -> Result<Vec<f64>>;
    /// Character `batch/<field>` entry of a cell as MATLAB UTF-16 code units.
    fn cell_chars(&self, cell: usize, field: &str) -> Result<Vec<u16>>;
    fn summary_series(&self, cell: usize, name: &str) -> Result<Vec<f64>>;
    /// One `batch/cycles` series of a cell, one vector per recorded cycle.
    fn cycle_series(&self, cell: usize, name: &str) -> Result<Vec<Vec<f64>>>;
}

pub fn batch_key(batch: u32, cell: usize) -> String {
    format!("b{batch}c{cell}")
}

/// Batch files under `raw_dir`, numbered from 1 in date order.
pub fn batch_files(raw_dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let pattern = Regex::new(r"^MATR_batch_(\d{8})\.mat$")?;
    let mut files: Vec<(String, PathBuf)> = files_in(raw_dir, true)?
        .into_iter()
        .filter_map(|path| {
            let date = pattern.captures(file_name(&path))?[1].to_string();
            Some((date, path))
        })
        .collect();
    files.sort();
    Ok(files
        .into_iter()
        .zip(1u32..)
        .map(|((_, path), batch)| (batch, path))
        .collect())
}

/// MATLAB stores text as UTF-16 code units, padded with NUL.
pub fn decode_chars(codes: &[u16]) -> String {
    char::decode_utf16(codes.iter().copied())
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect::<String>()
        .trim_end_matches('\0')
        .to_string()
}

fn series_mut<'a>(cycle: &'a mut RawCycle, name: &str) -> Option<&'a mut Vec<f64>> {
    Some(match name {
        "I" => &mut cycle.current,
        "Qc" => &mut cycle.charge_capacity,
        "Qd" => &mut cycle.discharge_capacity,
        "Qdlin" => &mut cycle.qdlin,
        "T" => &mut cycle.temperature,
        "Tdlin" => &mut cycle.tdlin,
        "V" => &mut cycle.voltage,
        "discharge_dQdV" => &mut cycle.discharge_dqdv,
        "t" => &mut cycle.time,
        _ => return None,
    })
}

/// Read cell `cell` of batch `batch` into the same shape the JSON batch
/// mirrors deserialize to.
pub fn read_batch_cell<S: BatchStore + ?Sized>(store: &S, batch: u32, cell: usize) -> Result<BatchCell> {
    let key = batch_key(batch, cell);
    let cycle_life = store
        .cell_values(cell, "cycle_life")
        .with_context(|| format!("reading cycle life of '{key}'"))?
        .first()
        .copied()
        .filter(|life| life.is_finite());
    let policy = decode_chars(
        &store
            .cell_chars(cell, "policy_readable")
            .with_context(|| format!("reading charge policy of '{key}'"))?,
    );

    let mut summary = BTreeMap::new();
    for name in SUMMARY_SERIES {
        let values = store
            .summary_series(cell, name)
            .with_context(|| format!("reading summary '{name}' of '{key}'"))?;
        summary.insert((*name).to_string(), values);
    }

    let mut cycles: Option<Vec<RawCycle>> = None;
    for name in CYCLE_SERIES {
        let per_cycle = store
            .cycle_series(cell, name)
            .with_context(|| format!("reading cycle series '{name}' of '{key}'"))?;
        let cycles = cycles.get_or_insert_with(|| vec![RawCycle::default(); per_cycle.len()]);
        if per_cycle.len() != cycles.len() {
            return Err(CdtError::Parse {
                path: key,
                message: format!(
                    "series '{name}' covers {} cycles, '{}' covers {}",
                    per_cycle.len(),
                    CYCLE_SERIES[0],
                    cycles.len()
                ),
            }
            .into());
        }
        for (cycle, values) in cycles.iter_mut().zip(per_cycle) {
            if let Some(series) = series_mut(cycle, name) {
                *series = values;
            }
        }
    }
    let cycles = cycles.unwrap_or_default();
    debug!(cell = %key, cycles = cycles.len(), "batch cell read");

    Ok(BatchCell {
        key,
        cycle_life,
        policy,
        summary,
        cycles,
    })
}

/// `(batch, cell)` from a `b<batch>c<cell>` key.
pub fn parse_key(key: &str) -> Result<(u32, usize)> {
    let pattern = Regex::new(r"^b(\d+)c(\d+)$")?;
    let captures = pattern
        .captures(key)
        .ok_or_else(|| anyhow!("'{key}' is not a batch cell key"))?;
    Ok((captures[1].parse()?, captures[2].parse()?))
}

/// Open a batch file for reading.
#[cfg(feature = "hdf5")]
pub fn open(path: &Path) -> Result<Box<dyn BatchStore>> {
    Ok(Box::new(hdf5_store::Mat73Batch::open(path)?))
}

#[cfg(not(feature = "hdf5"))]
pub fn open(path: &Path) -> Result<Box<dyn BatchStore>> {
    Err(anyhow!(
        "reading '{}' needs cdt-io built with the `hdf5` feature",
        path.display()
    ))
}

#[cfg(feature = "hdf5")]
mod hdf5_store {
    use std::path::Path;

    use anyhow::{anyhow, Context, Result};
    use hdf5_metno::{Dataset, File, Group, ObjectReference1, ReferencedObject};

    use super::BatchStore;

    pub struct Mat73Batch {
        file: File,
        batch: Group,
    }

    impl Mat73Batch {
        pub fn open(path: &Path) -> Result<Self> {
            let file = File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
            let batch = file
                .group("batch")
                .with_context(|| format!("'{}' has no batch struct", path.display()))?;
            Ok(Self { file, batch })
        }

        fn references(dataset: &Dataset) -> Result<Vec<ObjectReference1>> {
            Ok(dataset.read_raw::<ObjectReference1>()?)
        }

        fn cell_reference(&self, field: &str, cell: usize) -> Result<ObjectReference1> {
            Self::references(&self.batch.dataset(field)?)?
                .into_iter()
                .nth(cell)
                .ok_or_else(|| anyhow!("batch/{field} has no entry for cell {cell}"))
        }

        fn dataset(&self, reference: &ObjectReference1) -> Result<Dataset> {
            match self.file.dereference(reference)? {
                ReferencedObject::Dataset(dataset) => Ok(dataset),
                _ => Err(anyhow!("object reference does not lead to a dataset")),
            }
        }

        fn group(&self, reference: &ObjectReference1) -> Result<Group> {
            match self.file.dereference(reference)? {
                ReferencedObject::Group(group) => Ok(group),
                _ => Err(anyhow!("object reference does not lead to a group")),
            }
        }
    }

    impl BatchStore for Mat73Batch {
        fn num_cells(&self) -> Result<usize> {
            Ok(self.batch.dataset("summary")?.shape().first().copied().unwrap_or(0))
        }

        fn cell_values(&self, cell: usize, field: &str) -> Result<Vec<f64>> {
            let dataset = self.dataset(&self.cell_reference(field, cell)?)?;
            Ok(dataset.read_raw::<f64>()?)
        }

        fn cell_chars(&self, cell: usize, field: &str) -> Result<Vec<u16>> {
            let dataset = self.dataset(&self.cell_reference(field, cell)?)?;
            Ok(dataset.read_raw::<u16>()?)
        }

        fn summary_series(&self, cell: usize, name: &str) -> Result<Vec<f64>> {
            let summary = self.group(&self.cell_reference("summary", cell)?)?;
            Ok(summary.dataset(name)?.read_raw::<f64>()?)
        }

        fn cycle_series(&self, cell: usize, name: &str) -> Result<Vec<Vec<f64>>> {
            let cycles = self.group(&self.cell_reference("cycles", cell)?)?;
            Self::references(&cycles.dataset(name)?)?
                .iter()
                .map(|reference| Ok(self.dataset(reference)?.read_raw::<f64>()?))
                .collect()
        }
    }
}
