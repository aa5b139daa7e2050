use anyhow::{anyhow, Context, Result};
use cdt_algo::{LabelConfig, RulLabeler, SohLabeler};
use cdt_cli::cli::{Commands, LabelKind};
use cdt_io::load_cells;
use polars::prelude::{DataFrame, NamedFrom, Series};
use tracing::{info, warn};

use crate::commands::util::write_table;

fn label_config(command: &Commands) -> Result<LabelConfig> {
    let Commands::Label {
        kind,
        eol_soh,
        no_pad_eol,
        min_rul_limit,
        cycle_index,
        mode,
        reference,
        ..
    } = command
    else {
        return Err(anyhow!("label handler called with a different command"));
    };
    Ok(match kind {
        LabelKind::Rul => LabelConfig::Rul(RulLabeler {
            eol_soh: *eol_soh,
            pad_eol: !no_pad_eol,
            min_rul_limit: *min_rul_limit,
        }),
        LabelKind::Soh => {
            let mut soh = SohLabeler {
                cycle_index: *cycle_index,
                mode: (*mode).into(),
                ..SohLabeler::default()
            };
            if let Some(path) = reference {
                soh = soh.with_reference_file(path)?;
            }
            LabelConfig::Soh(soh)
        }
    })
}

pub fn handle(command: &Commands) -> Result<()> {
    let Commands::Label { input, out, .. } = command else {
        return Err(anyhow!("label handler called with a different command"));
    };
    let config = label_config(command)?;
    let cells = load_cells(input)?;
    info!(cells = cells.len(), label = config.name(), "labelling");

    let mut ids = Vec::with_capacity(cells.len());
    let mut labels = Vec::with_capacity(cells.len());
    for cell in &cells {
        match config.label(cell) {
            Ok(value) => {
                ids.push(cell.cell_id.clone());
                labels.push(value);
            }
            Err(err) => warn!(cell_id = %cell.cell_id, error = %err, "cell left out of labels"),
        }
    }

    let mut df = DataFrame::new(vec![
        Series::new("cell_id", ids),
        Series::new(config.name(), labels),
    ])
    .context("building label table")?;
    write_table(&mut df, out)?;
    println!(
        "Labelled {} of {} cell(s) with {} -> {}",
        df.height(),
        cells.len(),
        config.name(),
        out.display()
    );
    Ok(())
}
