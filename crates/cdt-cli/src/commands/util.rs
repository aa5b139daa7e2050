use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use polars::prelude::{CsvWriter, DataFrame, SerWriter};
#[cfg(feature = "parquet")]
use polars::prelude::ParquetWriter;
use rayon::ThreadPoolBuilder;

/// Worker count for a `--threads` value; 0 stands for one per CPU.
pub fn parse_threads(spec: &str) -> Result<usize> {
    if spec.eq_ignore_ascii_case("auto") {
        return Ok(0);
    }
    spec.parse()
        .with_context(|| format!("invalid thread count '{spec}' (expected 'auto' or a number)"))
}

pub fn configure_threads(spec: &str) -> Result<()> {
    let count = match parse_threads(spec)? {
        0 => num_cpus::get(),
        n => n,
    };
    // a second call in the same process keeps the first pool
    let _ = ThreadPoolBuilder::new().num_threads(count).build_global();
    Ok(())
}

pub fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default()
}

/// Write a table as Parquet or CSV, chosen by file extension.
pub fn write_table(df: &mut DataFrame, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory '{}'", parent.display()))?;
    }
    match extension(output).as_str() {
        #[cfg(feature = "parquet")]
        "parquet" => {
            let mut file = File::create(output)
                .with_context(|| format!("creating output file '{}'", output.display()))?;
            ParquetWriter::new(&mut file)
                .finish(df)
                .with_context(|| format!("writing Parquet to '{}'", output.display()))?;
        }
        #[cfg(not(feature = "parquet"))]
        "parquet" => bail!("Parquet output requires the 'parquet' feature"),
        "json" => bail!("tables are written as .csv or .parquet"),
        _ => {
            let mut file = File::create(output)
                .with_context(|| format!("creating output file '{}'", output.display()))?;
            CsvWriter::new(&mut file)
                .finish(df)
                .with_context(|| format!("writing CSV to '{}'", output.display()))?;
        }
    }
    Ok(())
}
