//! Tests for the file-based runner
//!
//! These tests verify:
//! - YAML configuration with tagged methods
//! - The three-zone heating fixture through CSV tables
//! - Failed buildings appear in the diagnostics table

use std::fs;
use std::path::Path;

use crate::runner::{RunOptions, load_config, run};
use crate::tables::{DiagnosticRow, ResultRow, read_table};
use mlsens_core::model::{Level, Method};

const HEATING: &str = "Zone Ideal Loads Zone Total Heating Energy";

const CONFIG_YAML: &str = r#"
requests:
  - source_level: zone
    target_level: zone
    parameter: Thickness
    output: Zone Ideal Loads Zone Total Heating Energy
    methods:
      - method: elasticity
      - method: correlation
        kind: pearson
      - method: mutual_information
uncertainty:
  bootstrap_resamples: 100
  seed: 5
workers: 2
"#;

fn write_fixture(dir: &Path, extra_ledger: &str) -> RunOptions {
    let zones = "building_id,idf_zone_name,sql_zone_name\n\
                 B1,ZONE_1,ZONE 1\nB1,ZONE_2,ZONE 2\nB1,ZONE_3,ZONE 3\n\
                 B2,ZONE_1,ZONE 1\nB2,ZONE_2,ZONE 2\nB2,ZONE_3,ZONE 3\n";
    let geometry = "building_id,zone_id,floor_area,volume\n\
                    B1,ZONE_1,100,300\nB1,ZONE_2,150,\nB1,ZONE_3,50,150\n";

    let mut series =
        String::from("building_id,variant_id,variable_name,entity_name,timestamp,value\n");
    for building in ["B1", "B2"] {
        for (zone, base, modified) in [
            ("ZONE_1", 1000.0, 900.0),
            ("ZONE_2", 1500.0, 1500.0),
            ("ZONE_3", 500.0, 450.0),
        ] {
            for (variant, total) in [("base", base), ("v1", modified)] {
                for hour in 0..2 {
                    series.push_str(&format!(
                        "{building},{variant},{HEATING},{zone},2024-01-15T{hour:02}:00:00,{}\n",
                        total / 2.0
                    ));
                }
            }
        }
    }

    let ledger = format!(
        "building_id,variant_id,entity_name,parameter_name,original_value,new_value,timestamp\n\
         B1,v1,ZONE_1,Thickness,0.1,0.15,\n\
         B1,v1,ZONE_3,Thickness,0.1,0.15,\n\
         B2,v1,ZONE_1,Thickness,0.1,0.15,\n\
         B2,v1,ZONE_3,Thickness,0.1,0.15,\n{extra_ledger}"
    );

    let write = |name: &str, content: &str| {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    };
    RunOptions {
        zones: write("zones.csv", zones),
        equipment: None,
        geometry: Some(write("geometry.csv", geometry)),
        series: write("series.csv", &series),
        ledger: write("ledger.csv", &ledger),
        sobol: None,
        config: write("config.yaml", CONFIG_YAML),
        out_dir: dir.join("out"),
        workers: None,
    }
}

#[test]
fn test_yaml_config_parses_tagged_methods() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    fs::write(&path, CONFIG_YAML).unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.requests.len(), 1);
    assert_eq!(config.requests[0].source_level, Level::Zone);
    assert_eq!(config.requests[0].methods[0], Method::Elasticity);
    assert_eq!(config.requests[0].methods[2], Method::MutualInformation { k: 3 });
    assert_eq!(config.uncertainty.bootstrap_resamples, 100);
    assert!((config.uncertainty.alpha - 0.05).abs() < 1e-12);
    assert_eq!(config.workers, 2);
}

#[test]
fn test_run_writes_result_tables() {
    let dir = tempfile::tempdir().unwrap();
    let options = write_fixture(dir.path(), "");

    let summary = run(&options).unwrap();
    assert_eq!(summary.results, 6);
    assert_eq!(summary.failed_units, 0);

    let rows: Vec<ResultRow> = read_table(&summary.results_path).unwrap();
    assert_eq!(rows.len(), 6);
    for row in rows.iter().filter(|r| r.method == "elasticity") {
        assert!(row.score.unwrap() < 0.0);
        assert_eq!(row.excluded_count, 1);
        assert_eq!(row.rank, Some(1));
    }
    // Three observations cannot support k = 3 neighbours
    assert!(
        rows.iter()
            .filter(|r| r.method.starts_with("mutual_information"))
            .all(|r| r.skip_reason.as_deref() == Some("k_too_large"))
    );

    let diagnostics: Vec<DiagnosticRow> = read_table(&summary.diagnostics_path).unwrap();
    assert_eq!(diagnostics.len(), 2);
    assert!(diagnostics.iter().all(|d| d.results_emitted == 3));
}

#[test]
fn test_failed_building_in_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let options = write_fixture(dir.path(), "B2,v1,ATTIC_FAN,Thickness,0.1,0.2,\n");

    let summary = run(&options).unwrap();
    assert_eq!(summary.results, 6);
    assert_eq!(summary.failed_units, 1);

    let diagnostics: Vec<DiagnosticRow> = read_table(&summary.diagnostics_path).unwrap();
    let b2 = diagnostics
        .iter()
        .find(|d| d.building_id.as_deref() == Some("B2"))
        .unwrap();
    assert!(b2.unit_errors.starts_with("scope_resolution"));
    assert_eq!(b2.skipped, "unit_failed=3");
    assert_eq!(b2.results_emitted, 3);
}
