//! CSV and YAML boundary of the runner.
//!
//! Input tables are read with serde straight into the core's row types;
//! results and diagnostics are flattened into one CSV row each.

use std::path::Path;

use color_eyre::eyre::{Result, WrapErr};
use mlsens_core::model::{Diagnostics, Level, SensitivityResult};
use mlsens_core::sensitivity::SobolEvaluations;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Read every row of a headed CSV file
pub fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .wrap_err_with(|| format!("Failed to open {}", path.display()))?;
    reader
        .deserialize()
        .enumerate()
        // +2: one for the header, one for 1-based line numbers
        .map(|(i, row)| row.wrap_err_with(|| format!("{}: bad row at line {}", path.display(), i + 2)))
        .collect()
}

/// Read a table that may be omitted
pub fn read_optional_table<T: DeserializeOwned>(path: Option<&Path>) -> Result<Vec<T>> {
    path.map_or_else(|| Ok(Vec::new()), read_table::<T>)
}

pub fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .wrap_err_with(|| format!("Failed to create {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Saltelli evaluations are matrices, so they travel as YAML rather than CSV
pub fn read_sobol(path: &Path) -> Result<Vec<SobolEvaluations>> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
    serde_saphyr::from_str(&content)
        .wrap_err_with(|| format!("Failed to parse Saltelli evaluations in {}", path.display()))
}

/// One row of the sensitivity result table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Empty for results pooled across buildings
    pub building_id: Option<String>,
    pub source_level: Level,
    pub target_level: Level,
    pub parameter_name: String,
    pub output_variable: String,
    pub method: String,
    pub score: Option<f64>,
    pub rank: Option<usize>,
    pub ci_lower: Option<f64>,
    pub ci_upper: Option<f64>,
    pub p_value: Option<f64>,
    pub sample_size: usize,
    pub excluded_count: usize,
    /// `;`-separated flags
    pub flags: String,
    pub skip_reason: Option<String>,
    pub skip_detail: Option<String>,
    /// `;`-separated `detector@index` entries
    pub breakpoints: String,
    pub regional_max_score: Option<f64>,
    pub bootstrap_lower: Option<f64>,
    pub bootstrap_upper: Option<f64>,
    pub propagated_sigma: Option<f64>,
    pub posterior_mean: Option<f64>,
    pub posterior_variance: Option<f64>,
}

impl From<&SensitivityResult> for ResultRow {
    fn from(result: &SensitivityResult) -> Self {
        let uncertainty = result.uncertainty.as_ref();
        let bootstrap = uncertainty.and_then(|u| u.bootstrap.as_ref());
        let posterior = uncertainty.and_then(|u| u.posterior.as_ref());
        Self {
            building_id: result.key.building_id.as_ref().map(|b| b.0.clone()),
            source_level: result.key.source_level,
            target_level: result.key.target_level,
            parameter_name: result.key.parameter_name.clone(),
            output_variable: result.key.output_variable.clone(),
            method: result.method.label(),
            score: result.score,
            rank: result.rank,
            ci_lower: result.confidence_interval.map(|ci| ci.0),
            ci_upper: result.confidence_interval.map(|ci| ci.1),
            p_value: result.p_value,
            sample_size: result.sample_size,
            excluded_count: result.excluded_count,
            flags: result
                .flags
                .iter()
                .map(|f| f.as_str())
                .collect::<Vec<_>>()
                .join(";"),
            skip_reason: result.skip_reason.as_ref().map(|r| r.code().to_string()),
            skip_detail: result.skip_reason.as_ref().map(|r| r.describe()),
            breakpoints: result
                .breakpoints
                .iter()
                .map(|b| format!("{}@{}", b.detector.as_str(), b.index))
                .collect::<Vec<_>>()
                .join(";"),
            regional_max_score: result.regional.as_ref().and_then(|r| r.max_score()),
            bootstrap_lower: bootstrap.map(|b| b.lower),
            bootstrap_upper: bootstrap.map(|b| b.upper),
            propagated_sigma: uncertainty
                .and_then(|u| u.propagated.as_ref())
                .map(|p| p.absolute_sigma),
            posterior_mean: posterior.map(|p| p.mean),
            posterior_variance: posterior.map(|p| p.variance),
        }
    }
}

/// One row of the coverage/diagnostics table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRow {
    /// Empty for the pooled pseudo-unit
    pub building_id: Option<String>,
    pub results_emitted: usize,
    pub skipped_total: usize,
    /// `;`-separated `reason=count` entries
    pub skipped: String,
    pub flagged: String,
    pub unit_errors: String,
    pub undefined_points: usize,
    pub heuristic_matches: usize,
    pub min_coverage: Option<f64>,
}

impl From<&Diagnostics> for DiagnosticRow {
    fn from(diagnostics: &Diagnostics) -> Self {
        let counts = |map: &std::collections::BTreeMap<String, usize>| {
            map.iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(";")
        };
        Self {
            building_id: diagnostics.building_id.as_ref().map(|b| b.0.clone()),
            results_emitted: diagnostics.results_emitted,
            skipped_total: diagnostics.skipped.values().sum(),
            skipped: counts(&diagnostics.skipped),
            flagged: counts(&diagnostics.flagged),
            unit_errors: diagnostics
                .unit_errors
                .iter()
                .map(|e| format!("{}: {}", e.kind, e.message))
                .collect::<Vec<_>>()
                .join(";"),
            undefined_points: diagnostics.undefined_points,
            heuristic_matches: diagnostics.heuristic_matches.len(),
            min_coverage: diagnostics
                .coverage
                .iter()
                .map(|c| c.coverage_fraction)
                .reduce(f64::min),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlsens_core::ledger::LedgerRow;
    use mlsens_core::model::{Method, PairKey, ResultFlag, SkipReason};

    #[test]
    fn test_read_ledger_with_blank_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        std::fs::write(
            &path,
            "building_id,variant_id,entity_name,parameter_name,original_value,new_value,timestamp\n\
             B1,v1,ZONE_1,Thickness,0.1,0.15,\n\
             B1,v2,ALL_ZONES, Infiltration Rate ,0.5,0.3,2024-01-15T00:00:00\n",
        )
        .unwrap();

        let rows: Vec<LedgerRow> = read_table(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, None);
        assert_eq!(rows[1].parameter_name, "Infiltration Rate");
        assert_eq!(
            rows[1].timestamp,
            Some(jiff::civil::datetime(2024, 1, 15, 0, 0, 0, 0))
        );
    }

    #[test]
    fn test_bad_row_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        std::fs::write(
            &path,
            "building_id,variant_id,entity_name,parameter_name,original_value,new_value,timestamp\n\
             B1,v1,ZONE_1,Thickness,not-a-number,0.15,\n",
        )
        .unwrap();

        let err = read_table::<LedgerRow>(&path).unwrap_err();
        assert!(format!("{err}").contains("line 2"), "{err}");
    }

    #[test]
    fn test_skipped_result_row() {
        let mut result = SensitivityResult::skipped(
            PairKey {
                building_id: None,
                source_level: Level::Zone,
                target_level: Level::Building,
                parameter_name: "Thickness".into(),
                output_variable: "Heating".into(),
            },
            Method::Elasticity,
            0,
            SkipReason::NoDefinedElasticity { excluded: 3 },
        );
        result.flag(ResultFlag::HeuristicMatch);

        let row = ResultRow::from(&result);
        assert_eq!(row.building_id, None);
        assert_eq!(row.method, "elasticity");
        assert_eq!(row.score, None);
        assert_eq!(row.skip_reason.as_deref(), Some("no_defined_elasticity"));
        assert_eq!(row.flags, "heuristic_match");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        write_table(&path, &[row.clone()]).unwrap();
        let back: Vec<ResultRow> = read_table(&path).unwrap();
        assert_eq!(back, vec![row]);
    }
}
