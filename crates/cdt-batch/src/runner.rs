use crate::job::{CellJobRecord, JobStatus};
use crate::manifest::{write_batch_manifest, BatchManifest, MANIFEST_FILE};
use anyhow::{bail, Context, Result};
use cdt_core::CdtError;
use cdt_io::{cell_path, write_cell, AdapterContext, ConversionConfig, Overrides, SourceKind, WorkUnit};
use chrono::Utc;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// Settings for one conversion run of a raw source directory.
pub struct BatchRunnerConfig {
    pub source: SourceKind,
    pub input: PathBuf,
    pub output_root: PathBuf,
    pub conversion: Option<ConversionConfig>,
    pub overrides: Overrides,
    /// 0 means one worker per CPU
    pub threads: usize,
    pub skip_existing: bool,
}

impl BatchRunnerConfig {
    pub fn new(source: SourceKind, input: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            source,
            input: input.into(),
            output_root: output_root.into(),
            conversion: None,
            overrides: Overrides::default(),
            threads: 0,
            skip_existing: false,
        }
    }
}

/// Counts and manifest location, returned so callers can report the run.
pub struct BatchSummary {
    pub success: usize,
    pub failure: usize,
    pub skipped: usize,
    pub manifest_path: PathBuf,
    pub cells: Vec<CellJobRecord>,
}

/// Discover, process and write every cell of `config.source`.
///
/// Records are validated before they are written; a cell that fails
/// validation or processing is recorded and the run goes on. Reconstruction errors
/// (a declared continuation that is half present) abort the whole run
/// before the manifest is written.
pub fn run_batch(config: &BatchRunnerConfig) -> Result<BatchSummary> {
    fs::create_dir_all(&config.output_root).with_context(|| {
        format!(
            "creating batch output directory '{}'",
            config.output_root.display()
        )
    })?;
    if config.source.requires_conversion_config() && config.conversion.is_none() {
        bail!("{} input needs a conversion config", config.source);
    }

    let ctx = AdapterContext {
        overrides: config.overrides,
        conversion: config.conversion.clone(),
    };
    let units = config
        .source
        .discover(&config.input, &ctx)
        .with_context(|| format!("discovering {} inputs", config.source))?;
    info!(source = %config.source, units = units.len(), "work units discovered");

    let pool = ThreadPoolBuilder::new()
        .num_threads(if config.threads == 0 {
            num_cpus::get()
        } else {
            config.threads
        })
        .build()
        .context("building Rayon thread pool for batch conversion")?;

    let per_unit: Vec<Vec<CellJobRecord>> = pool.install(|| {
        units
            .par_iter()
            .map(|unit| run_unit(unit, config, &ctx))
            .collect::<Result<Vec<_>>>()
    })?;
    let cells: Vec<CellJobRecord> = per_unit.into_iter().flatten().collect();

    let count = |status: JobStatus| cells.iter().filter(|c| c.status == status).count();
    let success = count(JobStatus::Ok);
    let failure = count(JobStatus::Error);
    let skipped = cells.len() - success - failure;

    let manifest = BatchManifest {
        created_at: Utc::now(),
        source: config.source.command_name().to_string(),
        overrides_version: config.overrides.version,
        num_cells: cells.len(),
        success,
        failure,
        skipped,
        cells: cells.clone(),
    };
    let manifest_path = config.output_root.join(MANIFEST_FILE);
    write_batch_manifest(&manifest_path, &manifest)?;
    info!(success, failure, skipped, manifest = %manifest_path.display(), "batch finished");

    Ok(BatchSummary {
        success,
        failure,
        skipped,
        manifest_path,
        cells,
    })
}

fn is_batch_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|e| e.downcast_ref::<CdtError>().is_some_and(CdtError::is_batch_fatal))
}

fn run_unit(unit: &WorkUnit, config: &BatchRunnerConfig, ctx: &AdapterContext) -> Result<Vec<CellJobRecord>> {
    let out = config.output_root.as_path();
    if config.skip_existing
        && !unit.cells.is_empty()
        && unit.cells.iter().all(|id| cell_path(out, id).is_file())
    {
        return Ok(unit
            .cells
            .iter()
            .map(|id| CellJobRecord::skipped(unit, id, &cell_path(out, id)))
            .collect());
    }

    let processed = match config.source.process(unit, ctx) {
        Ok(processed) => processed,
        Err(err) if is_batch_fatal(&err) => return Err(err),
        Err(err) => {
            warn!(unit = %unit.id, error = %format!("{err:#}"), "unit failed");
            return Ok(unit
                .cells
                .iter()
                .map(|id| CellJobRecord::failed(unit, id, format!("{err:#}")))
                .collect());
        }
    };
    if processed.is_empty() {
        return Ok(unit.cells.iter().map(|id| CellJobRecord::empty(unit, id)).collect());
    }

    let mut records = Vec::with_capacity(processed.len());
    for cell in processed {
        let id = cell.record.cell_id.as_str();
        let path = cell_path(out, id);
        if config.skip_existing && path.is_file() {
            records.push(CellJobRecord::skipped(unit, id, &path));
            continue;
        }
        if let Err(err) = cell.record.validate() {
            warn!(cell_id = %id, error = %err, "invalid record not written");
            records.push(CellJobRecord::failed(unit, id, err.to_string()));
            continue;
        }
        let record = match write_cell(out, &cell.record) {
            Ok(path) => CellJobRecord::ok(unit, id, &path, cell.record.cycle_data.len(), cell.diagnostics),
            Err(err) => {
                warn!(cell_id = %id, error = %format!("{err:#}"), "writing cell failed");
                CellJobRecord::failed(unit, id, format!("{err:#}"))
            }
        };
        records.push(record);
    }
    Ok(records)
}
