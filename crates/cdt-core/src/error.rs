//! Unified error types for the cdt toolkit
//!
//! [`CdtError`] is the typed taxonomy shared by every crate in the workspace.
//! File-level and cell-level failures (parse, imputation, degenerate curves)
//! are isolated per cell by the batch runner; [`CdtError::Reconstruction`] is
//! the only variant that aborts a whole batch.
//!
//! # Example
//!
//! ```
//! use cdt_core::{CdtError, CdtResult};
//!
//! fn require_cycles(cell_id: &str, available: usize) -> CdtResult<()> {
//!     if available < 100 {
//!         return Err(CdtError::InsufficientCycles {
//!             cell_id: cell_id.to_string(),
//!             required: 100,
//!             available,
//!         });
//!     }
//!     Ok(())
//! }
//!
//! assert!(require_cycles("MATR_b1c0", 12).is_err());
//! ```

use std::path::Path;
use thiserror::Error;

/// Unified error type for all cdt operations.
#[derive(Error, Debug)]
pub enum CdtError {
    /// I/O errors (file access, directory listing)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A raw file cannot be read in its expected format
    #[error("Parse error in '{path}': {message}")]
    Parse { path: String, message: String },

    /// A declared continuation or merge cell is missing from its batch
    #[error("Reconstruction error: {0}")]
    Reconstruction(String),

    /// No non-flagged donor cycle exists for a flagged cycle
    #[error("Imputation error for cell '{cell_id}': cycle {cycle} has no valid donor (searched up to cycle {candidate})")]
    Imputation {
        cell_id: String,
        cycle: u32,
        candidate: u32,
    },

    /// Fewer than two finite points remain in a required difference curve
    #[error("Degenerate curve for cell '{cell_id}': only {finite_points} finite points remain")]
    DegenerateCurve {
        cell_id: String,
        finite_points: usize,
    },

    /// The cell does not contain the cycles a feature set refers to
    #[error("Cell '{cell_id}' has {available} cycles but {required} are required")]
    InsufficientCycles {
        cell_id: String,
        required: usize,
        available: usize,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Record validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using CdtError.
pub type CdtResult<T> = Result<T, CdtError>;

impl CdtError {
    pub fn parse(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        CdtError::Parse {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    /// Whether this error must abort every cell of a batch run rather than
    /// just the cell that raised it.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, CdtError::Reconstruction(_))
    }
}

impl From<anyhow::Error> for CdtError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<CdtError>() {
            Ok(inner) => inner,
            Err(other) => CdtError::Other(format!("{other:#}")),
        }
    }
}

impl From<String> for CdtError {
    fn from(s: String) -> Self {
        CdtError::Other(s)
    }
}

impl From<&str> for CdtError {
    fn from(s: &str) -> Self {
        CdtError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for CdtError {
    fn from(err: serde_json::Error) -> Self {
        CdtError::Parse {
            path: "<json>".to_string(),
            message: err.to_string(),
        }
    }
}
