//! # cdt-core: Battery Cycle Data Core
//!
//! Data model and leaf algorithms shared by every cdt crate.
//!
//! ## Data model
//!
//! - [`CycleRecord`]: one charge/discharge cycle. Time, current, voltage and
//!   the two running capacity traces are equal-length sample series; the
//!   capacity traces never decrease within a cycle.
//! - [`CellRecord`]: one physical cell. Cycles are ordered by cycle number
//!   and, after cleaning, numbered contiguously. Protocol stages and
//!   operating limits are descriptive metadata; the voltage limits also
//!   bound the feature extractor's interpolation grid.
//! - [`CycleExtra`]: typed home for dataset-specific per-cycle series (such
//!   as a cycler-computed `Qdlin` curve) plus a small map of primitive values.
//!
//! ## Leaf algorithms
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`integrate`] | Coulomb counting into charge/discharge capacity |
//! | [`segment`] | Cycle boundaries from marker runs or the current waveform |
//! | [`diagnostics`] | Per-cell data-quality notes |
//! | [`error`] | Shared error taxonomy |
//!
//! ## Quick Start
//!
//! ```
//! use cdt_core::{CellRecord, CycleRecord, TimeBase};
//!
//! let cycle = CycleRecord::from_current(
//!     1,
//!     vec![0.0, 1800.0, 3600.0],
//!     vec![-1.1, -1.1, -1.1],
//!     vec![3.4, 3.1, 2.6],
//!     TimeBase::Seconds,
//! );
//! assert!((cycle.max_discharge_capacity() - 1.1).abs() < 1e-12);
//!
//! let cell = CellRecord::new("MATR_b1c0", vec![cycle]);
//! assert!(cell.validate().is_ok());
//! ```

pub mod cell;
pub mod diagnostics;
pub mod error;
pub mod integrate;
pub mod segment;

pub use cell::{CellRecord, CycleExtra, CycleRecord, CyclingProtocol, ExtraValue};
pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{CdtError, CdtResult};
pub use integrate::{charge_and_discharge, integrate_capacity, Direction, TimeBase};
pub use segment::WaveformSegmenter;
