//! # cdt-algo: Cleaning, Features and Labels for Cell Degradation Data
//!
//! Algorithms that run over a normalized [`cdt_core::CellRecord`].
//!
//! ## Cleaning
//!
//! [`CycleCleaner`] flags anomalous cycles from the per-cycle discharge
//! capacity and either imputes or drops them:
//!
//! | Policy | Rule |
//! |--------|------|
//! | [`DetectionPolicy::MedianFilter`] | deviation from a rolling median above a multiple of the median deviation |
//! | [`DetectionPolicy::ShiftDifference`] | Hampel-style comparison against shifted neighbours |
//! | [`DetectionPolicy::LocalMedian`] | disagreement with the medians before and after a cycle |
//!
//! ## Features
//!
//! [`extract_features`] produces a [`FeatureTable`] for a batch of cells,
//! selected by a [`FeatureSetConfig`]:
//!
//! - `variance`, `discharge`, `full`: scalar sets built from the Qdlin
//!   difference curve, the capacity fade curve and auxiliary measurements
//! - `voltage_capacity_matrix`: stacked per-cycle Qdlin difference curves
//!
//! ## Labels
//!
//! - [`RulLabeler`]: cycles until capacity reaches an end-of-life fraction
//! - [`SohLabeler`]: capacity at a fixed cycle, absolute or relative

pub mod clean;
pub mod feature;
pub mod label;
pub mod stats;

pub use clean::{
    CapacityFloor, CleanReport, CycleCleaner, DetectionPolicy, Exclusions, Resolution, ShiftRule,
};
pub use feature::{
    extract_cell, extract_features, load_feature_config, CellFeatures, FeatureFailure,
    FeatureSetConfig, FeatureTable, FeatureValues, FeatureVector, MatrixConfig, ScalarConfig,
    ScalarFeature,
};
pub use label::{LabelConfig, RulLabeler, SohLabeler, SohMode};
