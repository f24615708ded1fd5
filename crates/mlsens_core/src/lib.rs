//! Multi-level sensitivity engine for building energy simulations
//!
//! Given the parameter modifications applied to simulation variants and the
//! resulting baseline/variant output series, this crate quantifies how much
//! each parameter influences each output across the building → zone →
//! equipment hierarchy. It supports:
//! - A relationship graph resolving raw entity names to hierarchy scopes
//! - Per-timestep deltas with undefined-percent handling
//! - Zone → building roll-ups (sum, weighted mean, max) with coverage tracking
//! - Correlation, elasticity, regression, mutual information and Sobol estimators
//! - Breakpoint detection (tree split, CUSUM, PELT) and regional sensitivity
//! - Bootstrap intervals, uncertainty propagation and conjugate updates
//!
//! # Running an analysis
//!
//! ```ignore
//! use mlsens_core::{AnalysisConfig, AnalysisInputs, run_analysis};
//!
//! let config: AnalysisConfig = serde_json::from_str(r#"{
//!     "requests": [{
//!         "source_level": "zone",
//!         "target_level": "building",
//!         "methods": [{ "method": "elasticity" }]
//!     }]
//! }"#)?;
//! let inputs = AnalysisInputs { zones, equipment, geometry, series, ledger, ..Default::default() };
//! let report = run_analysis(&config, &inputs)?;
//! for result in &report.results {
//!     println!("{} -> {}: {:?}", result.key.parameter_name, result.key.output_variable, result.score);
//! }
//! ```

#![warn(clippy::all)]

// ============================================================================
// Core modules
// ============================================================================

pub mod aggregate;
pub mod analysis;
pub mod budget;
pub mod delta;
pub mod error;
pub mod graph;
pub mod ledger;
pub mod regional;
pub mod sensitivity;
pub mod stats;
pub mod threshold;
pub mod uncertainty;

// ============================================================================
// Type definition modules
// ============================================================================

pub mod config;
pub mod model;

// ============================================================================
// Test modules
// ============================================================================

#[cfg(test)]
mod tests;

// ============================================================================
// Public re-exports for convenience
// ============================================================================

pub use analysis::{AnalysisError, AnalysisInputs, AnalysisReport, rank_results, run_analysis};
pub use config::{AnalysisConfig, AnalysisRequest};
pub use graph::RelationshipGraph;
pub use ledger::ModificationLedger;
pub use sensitivity::{SensitivityEngine, SobolEvaluations};
