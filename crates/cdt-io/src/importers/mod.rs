//! Source adapters for public battery-cycling datasets and generic cyclers.
//!
//! Each [`SourceKind`] knows how to find its raw files under a directory
//! ([`SourceKind::discover`]) and how to turn one [`WorkUnit`] into canonical
//! [`CellRecord`]s ([`SourceKind::process`]). Adapters parse, segment,
//! integrate and clean; they never write output themselves.
//!
//! | Source | Raw form | Cleaning |
//! |--------|----------|----------|
//! | `calce` | per-cell `.zip` or directory of `.txt` / `.xlsx` | median filter, drop |
//! | `matr` | `MATR_batch_*.mat` (feature `hdf5`) or per-cell `bKcN.json` mirrors | none |
//! | `rwth` | per-cell `*NNN=ZYK*Zyk*.csv` (or `.zip`) | local median, drop |
//! | `snl` | `*_timeseries.csv` + `*_cycle_data.csv` | shift difference, impute |
//! | `ul-pur` | `*UL-PUR_N*_timeseries.csv` + `*_cycle_data.csv` | shift difference, impute |
//! | `ox` | `*_timeseries.csv` | none |
//! | `arbin` | `.csv` / `.xlsx` export + conversion config | none |
//! | `neware` | vendor text log + conversion config | none |
//!
//! ## Work units
//!
//! A work unit is the smallest independent piece of processing. Usually it
//! is one cell's files; for spliced MATR cells it carries the head and its
//! continuation together, so the continuation never becomes a unit of its
//! own. Discovery fails when a declared continuation is half present.

pub mod arbin;
pub mod battery_archive;
pub mod calce;
pub mod cycler;
pub mod matlab;
pub mod matr;
pub mod neware;
pub mod rwth;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use tracing::warn;
use walkdir::WalkDir;

use cdt_core::{CellRecord, Diagnostics};

use crate::config::ConversionConfig;
use crate::overrides::Overrides;

/// Supported raw data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Calce,
    Matr,
    Rwth,
    Snl,
    UlPur,
    Ox,
    Arbin,
    Neware,
}

impl SourceKind {
    pub const ALL: &'static [SourceKind] = &[
        SourceKind::Calce,
        SourceKind::Matr,
        SourceKind::Rwth,
        SourceKind::Snl,
        SourceKind::UlPur,
        SourceKind::Ox,
        SourceKind::Arbin,
        SourceKind::Neware,
    ];

    /// CLI name of this source.
    pub fn command_name(&self) -> &'static str {
        match self {
            SourceKind::Calce => "calce",
            SourceKind::Matr => "matr",
            SourceKind::Rwth => "rwth",
            SourceKind::Snl => "snl",
            SourceKind::UlPur => "ul-pur",
            SourceKind::Ox => "ox",
            SourceKind::Arbin => "arbin",
            SourceKind::Neware => "neware",
        }
    }

    pub fn friendly_name(&self) -> &'static str {
        match self {
            SourceKind::Calce => "CALCE CS2/CX2",
            SourceKind::Matr => "MIT-Stanford-Toyota (MATR)",
            SourceKind::Rwth => "RWTH Aachen",
            SourceKind::Snl => "Sandia National Laboratories",
            SourceKind::UlPur => "UL-Purdue",
            SourceKind::Ox => "Oxford",
            SourceKind::Arbin => "Arbin cycler export",
            SourceKind::Neware => "Neware cycler log",
        }
    }

    /// Generic cycler sources need a column mapping.
    pub fn requires_conversion_config(&self) -> bool {
        matches!(self, SourceKind::Arbin | SourceKind::Neware)
    }

    /// Find the work units under `raw_dir`, in a stable order.
    pub fn discover(&self, raw_dir: &Path, ctx: &AdapterContext) -> Result<Vec<WorkUnit>> {
        if !raw_dir.is_dir() {
            bail!("raw data directory '{}' does not exist", raw_dir.display());
        }
        let units = match self {
            SourceKind::Calce => calce::discover(raw_dir)?,
            SourceKind::Matr => matr::discover(raw_dir, ctx)?,
            SourceKind::Rwth => rwth::discover(raw_dir)?,
            SourceKind::Snl | SourceKind::UlPur | SourceKind::Ox => {
                battery_archive::discover(*self, raw_dir, ctx)?
            }
            SourceKind::Arbin => arbin::discover(raw_dir)?,
            SourceKind::Neware => neware::discover(raw_dir)?,
        };
        if units.is_empty() {
            warn!(source = %self, dir = %raw_dir.display(), "no raw files found");
        }
        Ok(units)
    }

    /// Parse, segment and clean one work unit.
    pub fn process(&self, unit: &WorkUnit, ctx: &AdapterContext) -> Result<Vec<ProcessedCell>> {
        let processed = match self {
            SourceKind::Calce => calce::process(unit, ctx),
            SourceKind::Matr => matr::process(unit, ctx),
            SourceKind::Rwth => rwth::process(unit),
            SourceKind::Snl | SourceKind::UlPur | SourceKind::Ox => {
                battery_archive::process(*self, unit, ctx)
            }
            SourceKind::Arbin => arbin::process(unit, ctx),
            SourceKind::Neware => neware::process(unit, ctx),
        };
        processed.with_context(|| format!("processing {} unit '{}'", self, unit.id))
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command_name())
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.command_name() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|k| k.command_name()).collect();
                anyhow!("unknown source '{s}' (expected one of: {})", names.join(", "))
            })
    }
}

/// Files that together produce one or more cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub source: SourceKind,
    /// Raw cell name, or the head cell for spliced units
    pub id: String,
    pub inputs: Vec<PathBuf>,
    /// Cell ids this unit is expected to produce
    pub cells: Vec<String>,
}

impl WorkUnit {
    pub fn single(source: SourceKind, id: impl Into<String>, input: PathBuf, cell_id: String) -> Self {
        Self {
            source,
            id: id.into(),
            inputs: vec![input],
            cells: vec![cell_id],
        }
    }

    fn first_input(&self) -> Result<&Path> {
        self.inputs
            .first()
            .map(PathBuf::as_path)
            .ok_or_else(|| anyhow!("work unit '{}' has no input files", self.id))
    }
}

/// A normalized cell and what happened to it on the way.
#[derive(Debug, Clone)]
pub struct ProcessedCell {
    pub record: CellRecord,
    pub diagnostics: Diagnostics,
}

/// Everything an adapter may consult besides its raw files.
#[derive(Debug, Clone, Default)]
pub struct AdapterContext {
    pub overrides: Overrides,
    pub conversion: Option<ConversionConfig>,
}

impl AdapterContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conversion(mut self, conversion: ConversionConfig) -> Self {
        self.conversion = Some(conversion);
        self
    }

    fn conversion_for(&self, source: SourceKind) -> Result<&ConversionConfig> {
        self.conversion
            .as_ref()
            .ok_or_else(|| anyhow!("{source} input needs a conversion config"))
    }
}

/// Regular files under `dir` sorted by path, optionally descending into
/// subdirectories.
pub(crate) fn files_in(dir: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    let depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(depth)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("listing '{}'", dir.display()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

pub(crate) fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

pub(crate) fn file_stem(path: &Path) -> &str {
    path.file_stem().and_then(|n| n.to_str()).unwrap_or("")
}

pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Wrap a finished record, leaving out cells that ended up without cycles.
pub(crate) fn finish(record: CellRecord, diagnostics: Diagnostics) -> Vec<ProcessedCell> {
    if record.cycle_data.is_empty() {
        warn!(cell_id = %record.cell_id, "no usable cycles, cell skipped");
        return Vec::new();
    }
    vec![ProcessedCell {
        record,
        diagnostics,
    }]
}
