use cdt_algo::SohMode;
use cdt_io::SourceKind;
use clap::{Parser, Subcommand, ValueEnum, ValueHint};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cdt", author, version, about = "Battery cell degradation data toolkit", long_about = None)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info", global = true)]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert a raw dataset directory into canonical cell records
    Preprocess {
        /// Source adapter (calce, matr, rwth, snl, ul-pur, ox, arbin, neware)
        #[arg(value_parser = parse_source)]
        source: SourceKind,
        /// Directory holding the raw files
        #[arg(long, value_hint = ValueHint::DirPath)]
        input: PathBuf,
        /// Directory receiving `<cell_id>.json` and the batch manifest
        #[arg(long, value_hint = ValueHint::DirPath)]
        out: PathBuf,
        /// Conversion config (required for arbin and neware)
        #[arg(long, value_hint = ValueHint::FilePath)]
        config: Option<PathBuf>,
        /// Worker threads ("auto" = CPU count)
        #[arg(long, default_value = "auto")]
        threads: String,
        /// Leave cells that already have a record untouched
        #[arg(long)]
        skip_existing: bool,
    },
    /// Extract degradation features from processed cells
    Featurize {
        /// Processed record directory or a single record
        #[arg(long, value_hint = ValueHint::AnyPath)]
        input: PathBuf,
        /// Feature-set config (YAML or JSON)
        #[arg(long, value_hint = ValueHint::FilePath)]
        config: PathBuf,
        /// Output table (.csv, .parquet; .json for matrix features)
        #[arg(long, value_hint = ValueHint::FilePath)]
        out: PathBuf,
        #[arg(long, default_value = "auto")]
        threads: String,
    },
    /// Compute regression labels for processed cells
    Label {
        #[arg(value_enum)]
        kind: LabelKind,
        #[arg(long, value_hint = ValueHint::AnyPath)]
        input: PathBuf,
        /// Output table (.csv or .parquet)
        #[arg(long, value_hint = ValueHint::FilePath)]
        out: PathBuf,
        /// RUL: end-of-life fraction of nominal capacity
        #[arg(long, default_value_t = 0.8)]
        eol_soh: f64,
        /// RUL: label cells that never reach end of life as NaN
        #[arg(long)]
        no_pad_eol: bool,
        /// RUL: labels at or below this value become NaN
        #[arg(long, default_value_t = 100.0)]
        min_rul_limit: f64,
        /// SOH: 1-based cycle position to label
        #[arg(long, default_value_t = 100)]
        cycle_index: usize,
        #[arg(long, value_enum, default_value = "relative")]
        mode: SohModeArg,
        /// SOH: JSON file of measured values (cell, cycle, mode)
        #[arg(long, value_hint = ValueHint::FilePath)]
        reference: Option<PathBuf>,
    },
    /// Summarize a cell record or a batch manifest
    Inspect {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        /// Also list every cycle
        #[arg(long)]
        cycles: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Rul,
    Soh,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SohModeArg {
    Relative,
    Absolute,
}

impl From<SohModeArg> for SohMode {
    fn from(mode: SohModeArg) -> Self {
        match mode {
            SohModeArg::Relative => SohMode::Relative,
            SohModeArg::Absolute => SohMode::Absolute,
        }
    }
}

fn parse_source(s: &str) -> Result<SourceKind, String> {
    s.parse().map_err(|err: anyhow::Error| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn preprocess_parses_source_names() {
        let cli = Cli::try_parse_from([
            "cdt", "preprocess", "ul_pur", "--input", "raw", "--out", "out", "--skip-existing",
        ])
        .unwrap();
        match cli.command {
            Commands::Preprocess {
                source,
                skip_existing,
                threads,
                ..
            } => {
                assert_eq!(source, SourceKind::UlPur);
                assert!(skip_existing);
                assert_eq!(threads, "auto");
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["cdt", "preprocess", "hust", "--input", "r", "--out", "o"]).is_err());
    }
}
