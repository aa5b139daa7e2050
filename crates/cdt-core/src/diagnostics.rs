//! Per-cell data-quality notes collected while a cell is parsed and cleaned.
//!
//! Adapters and the cleaner record what they dropped, imputed or defaulted
//! here so the batch manifest can report it next to the cell's status:
//!
//! - Severity levels (Warning, Error)
//! - Categories for grouping issues (parse, cleaning, missing-cycle, ...)
//! - Optional cycle numbers and entity references (cell id, file name)
//!
//! # Example
//!
//! ```
//! use cdt_core::diagnostics::Diagnostics;
//!
//! let mut diag = Diagnostics::new();
//! diag.add_cycle_warning("cleaning", "discharge capacity outlier imputed", 42);
//! diag.add_error_with_entity("parse", "unreadable sheet", "CX2_34_8_16_10.xlsx");
//!
//! assert_eq!(diag.warning_count(), 1);
//! assert_eq!(diag.error_count(), 1);
//! ```

use serde::{Deserialize, Serialize};

/// Severity level for diagnostic issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Unusual but processing continued (e.g. a cycle was imputed)
    Warning,
    /// Part of the input could not be used
    Error,
}

/// A single diagnostic issue encountered while processing a cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticIssue {
    pub severity: Severity,
    /// Category for grouping (e.g. "parse", "cleaning", "missing-cycle")
    pub category: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

impl DiagnosticIssue {
    pub fn new(
        severity: Severity,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category: category.into(),
            message: message.into(),
            cycle: None,
            entity: None,
        }
    }

    pub fn with_cycle(mut self, cycle: u32) -> Self {
        self.cycle = Some(cycle);
        self
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

impl std::fmt::Display for DiagnosticIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };

        write!(f, "[{}:{}] {}", severity, self.category, self.message)?;

        if let Some(cycle) = self.cycle {
            write!(f, " (cycle {})", cycle)?;
        }
        if let Some(entity) = &self.entity {
            write!(f, " ({})", entity)?;
        }

        Ok(())
    }
}

/// Collection of diagnostic issues for one cell
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<DiagnosticIssue>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, issue: DiagnosticIssue) {
        self.issues.push(issue);
    }

    // =========================================================================
    // Warning Methods
    // =========================================================================

    pub fn add_warning(&mut self, category: &str, message: &str) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Warning, category, message));
    }

    pub fn add_cycle_warning(&mut self, category: &str, message: &str, cycle: u32) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Warning, category, message).with_cycle(cycle));
    }

    pub fn add_warning_with_entity(&mut self, category: &str, message: &str, entity: &str) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Warning, category, message).with_entity(entity));
    }

    // =========================================================================
    // Error Methods
    // =========================================================================

    pub fn add_error(&mut self, category: &str, message: &str) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Error, category, message));
    }

    pub fn add_error_with_entity(&mut self, category: &str, message: &str, entity: &str) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Error, category, message).with_entity(entity));
    }

    // =========================================================================
    // Query Methods
    // =========================================================================

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count()
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Issues of one category, in insertion order
    pub fn in_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a DiagnosticIssue> {
        self.issues.iter().filter(move |i| i.category == category)
    }

    /// Move all issues of `other` into this collection
    pub fn merge(&mut self, other: Diagnostics) {
        self.issues.extend(other.issues);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_severity() {
        let mut diag = Diagnostics::new();
        diag.add_warning("missing-cycle", "cycle 7 absent from raw data");
        diag.add_cycle_warning("cleaning", "outlier", 3);
        diag.add_error("parse", "bad header");
        assert_eq!(diag.warning_count(), 2);
        assert_eq!(diag.error_count(), 1);
        assert_eq!(diag.in_category("cleaning").count(), 1);
    }

    #[test]
    fn display_includes_cycle_and_entity() {
        let issue = DiagnosticIssue::new(Severity::Warning, "cleaning", "imputed from cycle 2")
            .with_cycle(3)
            .with_entity("CALCE_CS2_35");
        assert_eq!(
            issue.to_string(),
            "[warning:cleaning] imputed from cycle 2 (cycle 3) (CALCE_CS2_35)"
        );
    }

    #[test]
    fn merge_appends_issues() {
        let mut a = Diagnostics::new();
        a.add_warning("parse", "a");
        let mut b = Diagnostics::new();
        b.add_error("parse", "b");
        a.merge(b);
        assert_eq!(a.issues.len(), 2);
        assert_eq!(a.issues[1].message, "b");
    }

    #[test]
    fn empty_diagnostics_serialize_compactly() {
        let json = serde_json::to_string(&Diagnostics::new()).unwrap();
        assert_eq!(json, "{}");
        let back: Diagnostics = serde_json::from_str(&json).unwrap();
        assert!(back.is_empty());
    }
}
