//! Scenario tests for the sensitivity engine
//!
//! Tests are organized by topic:
//! - `scenario` - The three-zone heating fixture end to end
//! - `failures` - Unit isolation: scope, alignment and reconciliation errors
//! - `properties` - Numerical guarantees of the estimators and detectors
//! - `reporting` - Completeness, ranking, pooling and determinism of reports

mod reporting;

use jiff::civil::DateTime;

use crate::analysis::AnalysisInputs;
use crate::config::{AnalysisConfig, AnalysisRequest};
use crate::graph::{ZoneGeometryRow, ZoneMappingRow};
use crate::ledger::LedgerRow;
use crate::model::{Level, Method, SeriesRow};

pub(super) const HEATING: &str = "Zone Ideal Loads Zone Total Heating Energy";
pub(super) const THICKNESS: &str = "Thickness";

pub(super) fn hour(h: i8) -> DateTime {
    jiff::civil::datetime(2024, 1, 15, h, 0, 0, 0)
}

pub(super) fn zone_rows(building: &str, zones: &[&str]) -> Vec<ZoneMappingRow> {
    zones
        .iter()
        .map(|z| ZoneMappingRow {
            building_id: building.into(),
            idf_zone_name: (*z).into(),
            sql_zone_name: z.replace('_', " "),
        })
        .collect()
}

pub(super) fn geometry_rows(building: &str, zones: &[(&str, f64)]) -> Vec<ZoneGeometryRow> {
    zones
        .iter()
        .map(|(z, area)| ZoneGeometryRow {
            building_id: building.into(),
            zone_id: (*z).into(),
            floor_area: Some(*area),
            volume: Some(area * 3.0),
        })
        .collect()
}

/// Rows of one series split evenly over two hourly timesteps
pub(super) fn series_rows(
    building: &str,
    variant: &str,
    variable: &str,
    entity: &str,
    total: f64,
) -> Vec<SeriesRow> {
    (0..2)
        .map(|h| SeriesRow {
            building_id: building.into(),
            variant_id: variant.into(),
            variable_name: variable.into(),
            entity_name: entity.into(),
            timestamp: hour(h),
            value: total / 2.0,
        })
        .collect()
}

pub(super) fn ledger_row(
    building: &str,
    variant: &str,
    entity: &str,
    parameter: &str,
    original: f64,
    new: f64,
) -> LedgerRow {
    LedgerRow {
        building_id: building.into(),
        variant_id: variant.into(),
        entity_name: entity.into(),
        parameter_name: parameter.into(),
        original_value: original,
        new_value: new,
        timestamp: None,
    }
}

/// Three zones with baseline heating `[1000, 1500, 500]` and variant
/// `[900, 1500, 450]`; insulation thickness was raised in zones 1 and 3.
pub(super) fn three_zone_inputs(building: &str) -> AnalysisInputs {
    let zones = ["ZONE_1", "ZONE_2", "ZONE_3"];
    let baseline = [1000.0, 1500.0, 500.0];
    let modified = [900.0, 1500.0, 450.0];
    let mut series = Vec::new();
    for ((zone, base), modified) in zones.iter().zip(baseline).zip(modified) {
        series.extend(series_rows(building, "base", HEATING, zone, base));
        series.extend(series_rows(building, "v1", HEATING, zone, modified));
    }
    AnalysisInputs {
        zones: zone_rows(building, &zones),
        geometry: geometry_rows(building, &[("ZONE_1", 100.0), ("ZONE_2", 150.0), ("ZONE_3", 50.0)]),
        series,
        ledger: vec![
            ledger_row(building, "v1", "ZONE_1", THICKNESS, 0.10, 0.15),
            ledger_row(building, "v1", "ZONE_3", THICKNESS, 0.10, 0.15),
        ],
        ..Default::default()
    }
}

pub(super) fn request(
    source_level: Level,
    target_level: Level,
    parameter: &str,
    output: &str,
    methods: Vec<Method>,
) -> AnalysisRequest {
    AnalysisRequest {
        source_level,
        target_level,
        parameter: parameter.into(),
        output: output.into(),
        methods,
    }
}

/// Small, fast configuration: two workers and a modest bootstrap
pub(super) fn config(requests: Vec<AnalysisRequest>) -> AnalysisConfig {
    let mut config = AnalysisConfig {
        requests,
        workers: 2,
        ..Default::default()
    };
    config.uncertainty.bootstrap_resamples = 200;
    config.uncertainty.seed = 7;
    config
}

/// Merge several buildings' inputs into one run
pub(super) fn merge_inputs(parts: Vec<AnalysisInputs>) -> AnalysisInputs {
    let mut merged = AnalysisInputs::default();
    for part in parts {
        merged.zones.extend(part.zones);
        merged.equipment.extend(part.equipment);
        merged.geometry.extend(part.geometry);
        merged.series.extend(part.series);
        merged.ledger.extend(part.ledger);
        merged.sobol.extend(part.sobol);
    }
    merged
}
