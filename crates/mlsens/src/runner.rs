//! Load tables, run the engine, write the report.

use std::fs;
use std::path::{Path, PathBuf};

use color_eyre::eyre::{Result, WrapErr};
use mlsens_core::{AnalysisConfig, AnalysisInputs, run_analysis};

use crate::tables::{
    DiagnosticRow, ResultRow, read_optional_table, read_sobol, read_table, write_table,
};

pub const RESULTS_FILE_NAME: &str = "sensitivity_results.csv";
pub const DIAGNOSTICS_FILE_NAME: &str = "diagnostics.csv";

/// Paths and overrides of one invocation
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub zones: PathBuf,
    pub equipment: Option<PathBuf>,
    pub geometry: Option<PathBuf>,
    pub series: PathBuf,
    pub ledger: PathBuf,
    pub sobol: Option<PathBuf>,
    pub config: PathBuf,
    pub out_dir: PathBuf,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub results: usize,
    pub scored: usize,
    pub failed_units: usize,
    pub results_path: PathBuf,
    pub diagnostics_path: PathBuf,
}

pub fn load_config(path: &Path) -> Result<AnalysisConfig> {
    let content =
        fs::read_to_string(path).wrap_err_with(|| format!("Failed to read {}", path.display()))?;
    serde_saphyr::from_str(&content)
        .wrap_err_with(|| format!("Failed to parse analysis config {}", path.display()))
}

pub fn load_inputs(options: &RunOptions) -> Result<AnalysisInputs> {
    let inputs = AnalysisInputs {
        zones: read_table(&options.zones)?,
        equipment: read_optional_table(options.equipment.as_deref())?,
        geometry: read_optional_table(options.geometry.as_deref())?,
        series: read_table(&options.series)?,
        ledger: read_table(&options.ledger)?,
        sobol: match &options.sobol {
            Some(path) => read_sobol(path)?,
            None => Vec::new(),
        },
    };
    tracing::info!(
        zones = inputs.zones.len(),
        equipment = inputs.equipment.len(),
        series_rows = inputs.series.len(),
        ledger_rows = inputs.ledger.len(),
        sobol_outputs = inputs.sobol.len(),
        "Loaded input tables"
    );
    Ok(inputs)
}

pub fn run(options: &RunOptions) -> Result<RunSummary> {
    let mut config = load_config(&options.config)?;
    if let Some(workers) = options.workers {
        config.workers = workers;
    }
    let inputs = load_inputs(options)?;

    let report = run_analysis(&config, &inputs).wrap_err("Analysis could not start")?;

    fs::create_dir_all(&options.out_dir)?;
    let results_path = options.out_dir.join(RESULTS_FILE_NAME);
    let diagnostics_path = options.out_dir.join(DIAGNOSTICS_FILE_NAME);
    let result_rows: Vec<ResultRow> = report.results.iter().map(ResultRow::from).collect();
    let diagnostic_rows: Vec<DiagnosticRow> =
        report.diagnostics.iter().map(DiagnosticRow::from).collect();
    write_table(&results_path, &result_rows)?;
    write_table(&diagnostics_path, &diagnostic_rows)?;

    let totals = report.totals();
    let summary = RunSummary {
        results: report.results.len(),
        scored: report.results.iter().filter(|r| r.score.is_some()).count(),
        failed_units: totals.unit_errors.len(),
        results_path,
        diagnostics_path,
    };
    tracing::info!(
        results = summary.results,
        scored = summary.scored,
        failed_units = summary.failed_units,
        "Report written"
    );
    Ok(summary)
}
