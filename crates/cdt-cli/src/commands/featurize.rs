use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use cdt_algo::{extract_features, load_feature_config, FeatureTable, FeatureValues};
use cdt_cli::cli::Commands;
use cdt_io::load_cells;
use polars::prelude::{DataFrame, NamedFrom, Series};
use tracing::info;

use crate::commands::util::{configure_threads, extension, write_table};

/// One row per cell: `cell_id` followed by the feature columns.
fn scalar_frame(table: &FeatureTable) -> Result<DataFrame> {
    let FeatureValues::Scalar(values) = &table.values else {
        bail!("matrix features cannot be written as a table; use a .json output");
    };
    let mut columns = vec![Series::new("cell_id", table.cell_ids.clone())];
    for (j, name) in table.feature_names.iter().enumerate() {
        let column: Vec<f64> = values.column(j).iter().copied().collect();
        columns.push(Series::new(name, column));
    }
    DataFrame::new(columns).context("building feature table")
}

fn write_json(table: &FeatureTable, out: &Path) -> Result<()> {
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory '{}'", parent.display()))?;
    }
    let file = File::create(out).with_context(|| format!("creating '{}'", out.display()))?;
    serde_json::to_writer(BufWriter::new(file), table)
        .with_context(|| format!("writing features to '{}'", out.display()))
}

pub fn handle(command: &Commands) -> Result<()> {
    let Commands::Featurize {
        input,
        config,
        out,
        threads,
    } = command
    else {
        return Err(anyhow!("featurize handler called with a different command"));
    };

    configure_threads(threads)?;
    let feature_config = load_feature_config(config)?;
    let cells = load_cells(input)?;
    info!(cells = cells.len(), input = %input.display(), "records loaded");

    let table = extract_features(&cells, &feature_config)?;
    if extension(out) == "json" {
        write_json(&table, out)?;
    } else {
        let mut df = scalar_frame(&table)?;
        write_table(&mut df, out)?;
    }

    println!(
        "Extracted features for {} of {} cell(s) -> {}",
        table.len(),
        cells.len(),
        out.display()
    );
    for failure in &table.failures {
        println!("  ✗ {} - {}", failure.cell_id, failure.reason);
    }
    Ok(())
}
