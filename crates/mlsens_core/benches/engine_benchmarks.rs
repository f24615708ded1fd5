//! Criterion benchmarks for the sensitivity engine
//!
//! Run with: cargo bench -p mlsens_core

use std::f64::consts::PI;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use mlsens_core::analysis::{AnalysisInputs, run_analysis};
use mlsens_core::budget::TimeBudget;
use mlsens_core::config::{AnalysisConfig, AnalysisRequest};
use mlsens_core::graph::{ZoneGeometryRow, ZoneMappingRow};
use mlsens_core::ledger::LedgerRow;
use mlsens_core::model::{CorrelationKind, Level, Method, RegressionKind, SeriesRow};
use mlsens_core::sensitivity::{ParameterBounds, SaltelliDesign};
use mlsens_core::threshold::{Detector, pelt};

const HEATING: &str = "Zone Ideal Loads Zone Total Heating Energy";

fn step_series(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let level = if i < n / 2 { 10.0 } else { 20.0 };
            level + ((i * 7919) % 13) as f64 / 13.0 - 0.5
        })
        .collect()
}

fn ishigami(x: &[f64]) -> f64 {
    x[0].sin() + 7.0 * x[1].sin().powi(2) + 0.1 * x[2].powi(4) * x[0].sin()
}

/// `buildings` buildings of `zones` zones, each swept over `variants` variants
fn create_inputs(buildings: usize, zones: usize, variants: usize) -> AnalysisInputs {
    let mut inputs = AnalysisInputs::default();
    for b in 0..buildings {
        let building = format!("B{b}");
        for z in 0..zones {
            let zone = format!("ZONE_{z}");
            inputs.zones.push(ZoneMappingRow {
                building_id: building.as_str().into(),
                idf_zone_name: zone.clone(),
                sql_zone_name: zone.clone(),
            });
            inputs.geometry.push(ZoneGeometryRow {
                building_id: building.as_str().into(),
                zone_id: zone.clone(),
                floor_area: Some(50.0 + z as f64),
                volume: None,
            });
            for v in 0..=variants {
                let variant = if v == 0 { "base".to_string() } else { format!("v{v:03}") };
                let thickness = 0.1 + 0.002 * v as f64 * ((z % 3) as f64);
                for hour in 0..24 {
                    inputs.series.push(SeriesRow {
                        building_id: building.as_str().into(),
                        variant_id: variant.as_str().into(),
                        variable_name: HEATING.into(),
                        entity_name: zone.clone(),
                        timestamp: jiff::civil::datetime(2024, 1, 15, hour, 0, 0, 0),
                        value: 100.0 / thickness + f64::from(hour),
                    });
                }
                if v > 0 {
                    inputs.ledger.push(LedgerRow {
                        building_id: building.as_str().into(),
                        variant_id: variant.as_str().into(),
                        entity_name: zone.clone(),
                        parameter_name: "Thickness".into(),
                        original_value: 0.1,
                        new_value: thickness,
                        timestamp: None,
                    });
                }
            }
        }
    }
    inputs
}

fn create_config() -> AnalysisConfig {
    let mut config = AnalysisConfig {
        requests: vec![AnalysisRequest {
            source_level: Level::Zone,
            target_level: Level::Zone,
            parameter: "*".into(),
            output: "*".into(),
            methods: vec![
                Method::Elasticity,
                Method::Correlation {
                    kind: CorrelationKind::Spearman,
                },
                Method::Regression {
                    kind: RegressionKind::Linear,
                },
                Method::MutualInformation { k: 3 },
            ],
        }],
        ..Default::default()
    };
    config.threshold.detectors = vec![Detector::Tree, Detector::Pelt];
    config.uncertainty.bootstrap_resamples = 100;
    config
}

fn bench_pelt(c: &mut Criterion) {
    let mut group = c.benchmark_group("pelt");
    for n in [100, 1_000, 5_000] {
        let y = step_series(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &y, |b, y| {
            b.iter(|| pelt(black_box(y), None, 2, &TimeBudget::unlimited()))
        });
    }
    group.finish();
}

fn bench_sobol(c: &mut Criterion) {
    let mut group = c.benchmark_group("sobol");
    group.sample_size(20);
    for n in [1_024, 8_192] {
        let bounds = ["x1", "x2", "x3"]
            .iter()
            .map(|name| ParameterBounds {
                name: (*name).to_string(),
                lower: -PI,
                upper: PI,
            })
            .collect();
        let design = SaltelliDesign::generate(bounds, n, true, 42);
        let Ok(evaluations) = design.evaluate("y", ishigami, &TimeBudget::unlimited()) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::new("indices", n), &evaluations, |b, evals| {
            b.iter(|| evals.indices(black_box(true), &TimeBudget::unlimited()))
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    let config = create_config();
    for buildings in [1, 8] {
        let inputs = create_inputs(buildings, 6, 30);
        group.bench_with_input(
            BenchmarkId::new("buildings", buildings),
            &inputs,
            |b, inputs| b.iter(|| run_analysis(black_box(&config), black_box(inputs))),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_pelt, bench_sobol, bench_pipeline);
criterion_main!(benches);
