//! Command-line runner for the multi-level sensitivity engine
//!
//! Reads the mapping, series and ledger tables from CSV, the analysis
//! configuration from YAML, and writes the result and diagnostics tables.

pub mod logging;
pub mod runner;
pub mod tables;

#[cfg(test)]
mod tests;

pub use logging::init_logging;
pub use runner::{RunOptions, RunSummary, run};
