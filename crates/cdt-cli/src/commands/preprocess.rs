use std::time::Instant;

use anyhow::{anyhow, Result};
use cdt_batch::{run_batch, BatchRunnerConfig, BatchSummary, JobStatus};
use cdt_cli::cli::Commands;
use cdt_io::load_conversion_config;
use tracing::info;

use crate::commands::util::parse_threads;

fn print_summary(summary: &BatchSummary, source: &str, elapsed_s: f64) {
    println!("Preprocessed {source}: {} cell(s) in {elapsed_s:.1}s", summary.cells.len());
    println!("  ok: {}  failed: {}  skipped: {}", summary.success, summary.failure, summary.skipped);
    println!("  manifest: {}", summary.manifest_path.display());

    if summary.failure > 0 {
        println!();
        println!("Failed cells:");
        for cell in summary.cells.iter().filter(|c| c.status == JobStatus::Error) {
            println!("  ✗ {} - {}", cell.cell_id, cell.error.as_deref().unwrap_or("unknown error"));
        }
    }
}

pub fn handle(command: &Commands) -> Result<()> {
    let Commands::Preprocess {
        source,
        input,
        out,
        config,
        threads,
        skip_existing,
    } = command
    else {
        return Err(anyhow!("preprocess handler called with a different command"));
    };

    let mut runner = BatchRunnerConfig::new(*source, input, out);
    runner.threads = parse_threads(threads)?;
    runner.skip_existing = *skip_existing;
    if let Some(path) = config {
        runner.conversion = Some(load_conversion_config(path)?);
    }

    info!(source = %source, input = %input.display(), out = %out.display(), "preprocessing");
    let start = Instant::now();
    let summary = run_batch(&runner)?;
    print_summary(&summary, source.friendly_name(), start.elapsed().as_secs_f64());
    Ok(())
}
