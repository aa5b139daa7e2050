use std::process::ExitCode;

use cdt_cli::cli::{Cli, Commands};
use clap::Parser;
use tracing::error;
use tracing_subscriber::FmtSubscriber;

mod commands;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {err}");
    }

    let result = match &cli.command {
        Commands::Preprocess { .. } => commands::preprocess::handle(&cli.command),
        Commands::Featurize { .. } => commands::featurize::handle(&cli.command),
        Commands::Label { .. } => commands::label::handle(&cli.command),
        Commands::Inspect { file, cycles } => commands::inspect::handle(file, *cycles),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
