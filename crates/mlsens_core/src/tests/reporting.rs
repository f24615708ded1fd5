//! Report-level behaviour
//!
//! These tests verify:
//! - Every requested (pair, method) appears exactly once, even when repeated
//! - Ranking by absolute score within comparable groups
//! - Results pooled across buildings
//! - Breakpoint and regional annotations on a parameter sweep
//! - Time budgets surface as `timed_out` instead of partial results
//! - Identical output regardless of worker count

use std::collections::BTreeMap;

use super::{
    HEATING, THICKNESS, config, ledger_row, merge_inputs, request, series_rows, three_zone_inputs,
    zone_rows,
};
use crate::analysis::{AnalysisInputs, rank_results, run_analysis};
use crate::model::{
    CorrelationKind, Level, Method, PairKey, RegressionKind, ResultFlag, SensitivityResult,
    SkipReason,
};
use crate::regional::PartitionStrategy;
use crate::threshold::Detector;

const SWEEP: usize = 40;

/// One zone swept over forty variants; heating drops by ~10 for small
/// thickness increases and by ~100 once the increase passes 0.1.
fn sweep_inputs() -> AnalysisInputs {
    let mut series = series_rows("B1", "base", HEATING, "ZONE_1", 1000.0);
    let mut ledger = Vec::new();
    for i in 0..SWEEP {
        let variant = format!("v{i:02}");
        let step = if i < SWEEP / 2 { 10.0 } else { 100.0 };
        let noise = 0.5 * ((i * 7 % 5) as f64 - 2.0);
        series.extend(series_rows("B1", &variant, HEATING, "ZONE_1", 1000.0 - step - noise));
        ledger.push(ledger_row(
            "B1",
            &variant,
            "ZONE_1",
            THICKNESS,
            0.1,
            0.1 + 0.005 * (i + 1) as f64,
        ));
    }
    AnalysisInputs {
        zones: zone_rows("B1", &["ZONE_1"]),
        series,
        ledger,
        ..Default::default()
    }
}

fn pearson() -> Method {
    Method::Correlation {
        kind: CorrelationKind::Pearson,
    }
}

#[test]
fn test_every_requested_pair_reported_once() {
    let inputs = merge_inputs(vec![three_zone_inputs("B1"), three_zone_inputs("B2")]);
    let config = config(vec![
        request(
            Level::Zone,
            Level::Zone,
            "*",
            "*",
            vec![Method::Elasticity, pearson()],
        ),
        request(
            Level::Zone,
            Level::Zone,
            THICKNESS,
            HEATING,
            vec![
                pearson(),
                Method::Correlation {
                    kind: CorrelationKind::Kendall,
                },
                Method::Regression {
                    kind: RegressionKind::Ridge { alpha: 0.1 },
                },
                Method::MutualInformation { k: 3 },
                Method::Sobol {
                    second_order: false,
                },
            ],
        ),
    ]);

    let report = run_analysis(&config, &inputs).unwrap();
    assert_eq!(report.results.len(), 12);

    let mut seen: BTreeMap<(String, String), usize> = BTreeMap::new();
    for result in &report.results {
        assert!(
            result.score.is_some() != result.skip_reason.is_some(),
            "result must carry a score or a reason: {result:?}"
        );
        let building = result.key.building_id.clone().unwrap().0;
        *seen.entry((building, result.method.label())).or_default() += 1;
    }
    assert!(seen.values().all(|&count| count == 1));

    let mi = report
        .results
        .iter()
        .find(|r| matches!(r.method, Method::MutualInformation { .. }))
        .unwrap();
    assert_eq!(
        mi.skip_reason,
        Some(SkipReason::KTooLarge { k: 3, n: 3 })
    );
    let totals = report.totals();
    assert_eq!(totals.results_emitted, 12);
    assert_eq!(totals.skipped.get("missing_sobol_design"), Some(&2));
}

#[test]
fn test_repeated_method_in_one_request_reported_once() {
    let inputs = three_zone_inputs("B1");
    let config = config(vec![request(
        Level::Zone,
        Level::Zone,
        THICKNESS,
        HEATING,
        vec![pearson(), Method::Elasticity, pearson()],
    )]);

    let report = run_analysis(&config, &inputs).unwrap();
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.results[0].method, pearson());
    assert_eq!(report.results[1].method, Method::Elasticity);
    assert_eq!(report.totals().results_emitted, 2);
}

#[test]
fn test_rank_by_absolute_score() {
    let key = |parameter: &str| PairKey {
        building_id: Some("B1".into()),
        source_level: Level::Zone,
        target_level: Level::Building,
        parameter_name: parameter.into(),
        output_variable: HEATING.into(),
    };
    let mut results = vec![
        SensitivityResult::scored(key("a"), Method::Elasticity, 5, 0.2),
        SensitivityResult::scored(key("b"), Method::Elasticity, 5, -0.9),
        SensitivityResult::scored(key("c"), Method::Elasticity, 5, 0.5),
        SensitivityResult::skipped(key("d"), Method::Elasticity, 0, SkipReason::NoObservations),
        SensitivityResult::scored(key("a"), pearson(), 5, 0.1),
    ];

    rank_results(&mut results);
    let ranks: Vec<Option<usize>> = results.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![Some(3), Some(1), Some(2), None, Some(1)]);
}

#[test]
fn test_pooled_results_span_buildings() {
    let inputs = merge_inputs(vec![three_zone_inputs("B1"), three_zone_inputs("B2")]);
    let mut config = config(vec![request(
        Level::Zone,
        Level::Zone,
        THICKNESS,
        HEATING,
        vec![Method::Elasticity],
    )]);
    config.pool_buildings = true;

    let report = run_analysis(&config, &inputs).unwrap();
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.diagnostics.len(), 3);

    let pooled = report
        .results
        .iter()
        .find(|r| r.key.building_id.is_none())
        .expect("pooled result");
    assert_eq!(pooled.sample_size, 4);
    assert_eq!(pooled.excluded_count, 2);
    let per_building = report.results[0].score.unwrap();
    assert!((pooled.score.unwrap() - per_building).abs() < 1e-12);
}

#[test]
fn test_sweep_breakpoints_and_regions() {
    let inputs = sweep_inputs();
    let mut config = config(vec![request(
        Level::Zone,
        Level::Zone,
        THICKNESS,
        HEATING,
        vec![pearson()],
    )]);
    config.threshold.detectors = vec![Detector::Tree, Detector::Pelt];
    config.regional = Some(PartitionStrategy::Quantile { bins: 2 });

    let report = run_analysis(&config, &inputs).unwrap();
    let result = &report.results[0];
    assert_eq!(result.sample_size, SWEEP);
    assert!(result.score.unwrap() < -0.8);
    assert!(result.p_value.unwrap() < 1e-6);

    let tree = result
        .breakpoints
        .iter()
        .find(|b| b.detector == Detector::Tree)
        .expect("tree split");
    assert_eq!(tree.index, SWEEP / 2);
    let pelt = result
        .breakpoints
        .iter()
        .find(|b| b.detector == Detector::Pelt)
        .expect("pelt breakpoint");
    assert!(pelt.index.abs_diff(SWEEP / 2) <= 2);

    let regional = result.regional.as_ref().expect("regional summary");
    assert_eq!(regional.regions.len(), 2);
    assert_eq!(
        regional.regions.iter().map(|r| r.sample_size).sum::<usize>(),
        SWEEP
    );
}

#[test]
fn test_zero_budget_reports_timed_out() {
    let inputs = sweep_inputs();
    let mut config = config(vec![request(
        Level::Zone,
        Level::Zone,
        THICKNESS,
        HEATING,
        vec![pearson()],
    )]);
    config.threshold.detectors = vec![Detector::Pelt];
    config.time_budget_ms = Some(0);

    let report = run_analysis(&config, &inputs).unwrap();
    let result = &report.results[0];
    assert!(result.score.is_some());
    assert!(result.has_flag(ResultFlag::TimedOut));
    assert!(result.breakpoints.is_empty());
    assert!(
        result
            .uncertainty
            .as_ref()
            .is_none_or(|u| u.bootstrap.is_none())
    );
}

#[test]
fn test_worker_count_does_not_change_results() {
    let inputs = merge_inputs(vec![sweep_inputs(), three_zone_inputs("B2")]);
    let requests = vec![request(
        Level::Zone,
        Level::Zone,
        "*",
        "*",
        vec![
            pearson(),
            Method::Regression {
                kind: RegressionKind::Linear,
            },
            Method::MutualInformation { k: 3 },
        ],
    )];
    let mut single = config(requests.clone());
    single.workers = 1;
    let mut many = config(requests);
    many.workers = 4;

    let first = run_analysis(&single, &inputs).unwrap();
    let second = run_analysis(&many, &inputs).unwrap();
    assert_eq!(first, second);
}
