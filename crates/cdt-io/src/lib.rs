//! # cdt-io: Raw Battery Data In, Canonical Records Out
//!
//! Source adapters, reconstruction of cells split across files, the
//! hand-curated override tables and the canonical JSON record store.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`importers`] | one adapter per dataset or cycler, behind [`SourceKind`] |
//! | [`reconstruct`] | chronological merge (CALCE) and batch splice (MATR) |
//! | [`overrides`] | versioned per-cell fixes: drop list, continuations, exclusions |
//! | [`config`] | cycler conversion config and per-cell metadata documents |
//! | [`table`] | column-addressed view over CSV and spreadsheet inputs |
//! | [`record`] | `<dir>/<cell_id>.json` read and write |
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use cdt_io::{write_cell, AdapterContext, SourceKind};
//!
//! let ctx = AdapterContext::new();
//! let source: SourceKind = "calce".parse()?;
//! for unit in source.discover(Path::new("raw/calce"), &ctx)? {
//!     for cell in source.process(&unit, &ctx)? {
//!         write_cell(Path::new("processed/calce"), &cell.record)?;
//!     }
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod config;
pub mod importers;
pub mod overrides;
pub mod reconstruct;
pub mod record;
pub mod table;

pub use config::{load_cell_metadata, load_conversion_config, CellMetadata, ConversionConfig};
pub use importers::{AdapterContext, ProcessedCell, SourceKind, WorkUnit};
pub use overrides::{Overrides, OVERRIDES_VERSION};
pub use record::{cell_path, list_cells, load_cells, read_cell, write_cell};
