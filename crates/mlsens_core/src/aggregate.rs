//! Zone → building roll-up of delta records.

use std::collections::BTreeMap;

use crate::delta::{DeltaRecord, UNDEFINED_EPSILON};
use crate::error::{AggregationError, DataAlignmentError, ReconciliationError};
use crate::graph::{RelationshipGraph, WeightMethod};
use crate::model::{AggregationMethod, BuildingId, EntityId, Level};

/// Rolls zone deltas up to building level using the graph's zone weights
#[derive(Debug, Clone, Copy)]
pub struct AggregationEngine<'g> {
    graph: &'g RelationshipGraph,
    weight_method: WeightMethod,
}

impl<'g> AggregationEngine<'g> {
    #[must_use]
    pub fn new(graph: &'g RelationshipGraph, weight_method: WeightMethod) -> Self {
        Self {
            graph,
            weight_method,
        }
    }

    /// Aggregate the zone deltas of one (variant, variable) into a building delta.
    pub fn aggregate_building(
        &self,
        building: &BuildingId,
        variable: &str,
        zone_deltas: &[&DeltaRecord],
        method: AggregationMethod,
    ) -> Result<DeltaRecord, AggregationError> {
        let expected = self
            .graph
            .zones(building)
            .map(|z| z.len())
            .unwrap_or_default();
        let weights = match method {
            AggregationMethod::WeightedMean => {
                Some(self.graph.zone_weights(building, self.weight_method)?)
            }
            AggregationMethod::Sum | AggregationMethod::Max => None,
        };
        aggregate(building, variable, zone_deltas, method, weights.as_ref(), expected)
    }
}

/// Combine zone deltas into one building-level delta.
///
/// `weights` are only used for `WeightedMean` and are renormalised over the
/// zones that reported data; `None` means equal weights. The result carries
/// `coverage_fraction = reporting / expected_zones`.
pub fn aggregate(
    building: &BuildingId,
    variable: &str,
    zone_deltas: &[&DeltaRecord],
    method: AggregationMethod,
    weights: Option<&BTreeMap<EntityId, f64>>,
    expected_zones: usize,
) -> Result<DeltaRecord, AggregationError> {
    let Some(first) = zone_deltas.first() else {
        return Err(AggregationError::NoData {
            variable: variable.to_string(),
        });
    };
    for record in zone_deltas {
        if record.aggregation_method != method {
            return Err(AggregationError::MixedMethods {
                variable: record.variable_name.clone(),
                expected: method.as_str(),
                found: record.aggregation_method.as_str(),
            });
        }
        if record.len() != first.len() {
            return Err(DataAlignmentError::SeriesLength {
                entity: record.entity_id.clone(),
                expected: first.len(),
                found: record.len(),
            }
            .into());
        }
        if let Some(index) = record
            .timestamps
            .iter()
            .zip(&first.timestamps)
            .position(|(a, b)| a != b)
        {
            return Err(DataAlignmentError::TimestampMismatch {
                entity: record.entity_id.clone(),
                variable: record.variable_name.clone(),
                index,
            }
            .into());
        }
    }

    let len = first.len();
    let (baseline, modified) = match method {
        AggregationMethod::Sum => (
            pointwise(zone_deltas, len, 0.0, |acc, _, v| acc + v, |r| &r.baseline),
            pointwise(zone_deltas, len, 0.0, |acc, _, v| acc + v, |r| &r.modified),
        ),
        AggregationMethod::Max => (
            pointwise(zone_deltas, len, f64::NEG_INFINITY, |acc, _, v| acc.max(v), |r| {
                &r.baseline
            }),
            pointwise(zone_deltas, len, f64::NEG_INFINITY, |acc, _, v| acc.max(v), |r| {
                &r.modified
            }),
        ),
        AggregationMethod::WeightedMean => {
            let w = reporting_weights(building, zone_deltas, weights)?;
            (
                pointwise(zone_deltas, len, 0.0, |acc, i, v| acc + w[i] * v, |r| &r.baseline),
                pointwise(zone_deltas, len, 0.0, |acc, i, v| acc + w[i] * v, |r| &r.modified),
            )
        }
    };

    let mut record = DeltaRecord::from_parts(
        building.clone(),
        first.variant_id.clone(),
        EntityId::from(building),
        Level::Building,
        first.variable_name.clone(),
        method,
        first.timestamps.clone(),
        baseline,
        modified,
        UNDEFINED_EPSILON,
    );
    record.coverage_fraction = if expected_zones == 0 {
        1.0
    } else {
        (zone_deltas.len() as f64 / expected_zones as f64).min(1.0)
    };
    Ok(record)
}

/// Fold one series per zone into a single series
fn pointwise(
    records: &[&DeltaRecord],
    len: usize,
    init: f64,
    fold: impl Fn(f64, usize, f64) -> f64,
    values: impl Fn(&DeltaRecord) -> &Vec<f64>,
) -> Vec<f64> {
    (0..len)
        .map(|t| {
            records
                .iter()
                .enumerate()
                .fold(init, |acc, (i, r)| fold(acc, i, values(r)[t]))
        })
        .collect()
}

/// Weights of the reporting zones, renormalised to sum to one
fn reporting_weights(
    building: &BuildingId,
    records: &[&DeltaRecord],
    weights: Option<&BTreeMap<EntityId, f64>>,
) -> Result<Vec<f64>, ReconciliationError> {
    let Some(weights) = weights else {
        return Ok(vec![1.0 / records.len() as f64; records.len()]);
    };
    let raw = records
        .iter()
        .map(|r| {
            weights
                .get(&r.entity_id)
                .copied()
                .ok_or_else(|| ReconciliationError::MissingGeometry {
                    zone: r.entity_id.clone(),
                    quantity: "weight",
                })
        })
        .collect::<Result<Vec<f64>, _>>()?;
    let total: f64 = raw.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(ReconciliationError::WeightSum {
            building: building.clone(),
            method: "reporting",
            sum: total,
        });
    }
    Ok(raw.into_iter().map(|w| w / total).collect())
}

/// Check an aggregated sum-class total against a building-level series.
pub fn reconcile(
    aggregated: &DeltaRecord,
    reported: &DeltaRecord,
    tolerance: f64,
) -> Result<(), ReconciliationError> {
    let a = aggregated.summary().modified;
    let r = reported.summary().modified;
    let a_base = aggregated.summary().baseline;
    let r_base = reported.summary().baseline;
    let close = |x: f64, y: f64| (x - y).abs() <= tolerance * x.abs().max(y.abs()) + 1e-6;
    if close(a, r) && close(a_base, r_base) {
        Ok(())
    } else {
        Err(ReconciliationError::LevelMismatch {
            building: aggregated.building_id.clone(),
            variable: aggregated.variable_name.clone(),
            aggregated: a,
            reported: r,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::DeltaCalculator;
    use crate::model::{PairedSeries, VariableClass};
    use jiff::civil::datetime;

    fn zone(name: &str, baseline: Vec<f64>, modified: Vec<f64>, class: VariableClass) -> DeltaRecord {
        let ts = (0..baseline.len())
            .map(|d| datetime(2024, 1, 1 + d as i8, 0, 0, 0, 0))
            .collect();
        let series = PairedSeries::new(
            "B1".into(),
            "v1".into(),
            name.into(),
            "var",
            ts,
            baseline,
            modified,
        )
        .unwrap();
        DeltaCalculator::default().compute(&series, Level::Zone, class)
    }

    #[test]
    fn test_sum_equals_total_of_zone_deltas() {
        let zones = [
            zone("Z1", vec![0.0], vec![100.0], VariableClass::Energy),
            zone("Z2", vec![0.0], vec![200.0], VariableClass::Energy),
            zone("Z3", vec![0.0], vec![50.0], VariableClass::Energy),
        ];
        let refs: Vec<&DeltaRecord> = zones.iter().collect();
        let building = aggregate(&"B1".into(), "var", &refs, AggregationMethod::Sum, None, 3).unwrap();
        assert!((building.delta[0] - 350.0).abs() < 1e-6);
        assert_eq!(building.level, Level::Building);
        assert_eq!(building.coverage_fraction, 1.0);
    }

    #[test]
    fn test_equal_weighted_mean_is_arithmetic_mean() {
        let zones = [
            zone("Z1", vec![20.0], vec![20.0], VariableClass::Temperature),
            zone("Z2", vec![22.0], vec![22.0], VariableClass::Temperature),
            zone("Z3", vec![24.0], vec![24.0], VariableClass::Temperature),
        ];
        let refs: Vec<&DeltaRecord> = zones.iter().collect();
        let weights: BTreeMap<EntityId, f64> =
            ["Z1", "Z2", "Z3"].iter().map(|z| (EntityId::from(*z), 1.0 / 3.0)).collect();
        let building = aggregate(
            &"B1".into(),
            "var",
            &refs,
            AggregationMethod::WeightedMean,
            Some(&weights),
            3,
        )
        .unwrap();
        assert!((building.baseline[0] - 22.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_mean_renormalizes_over_reporting_zones() {
        let zones = [
            zone("Z1", vec![20.0], vec![21.0], VariableClass::Temperature),
            zone("Z3", vec![24.0], vec![24.0], VariableClass::Temperature),
        ];
        let refs: Vec<&DeltaRecord> = zones.iter().collect();
        let weights: BTreeMap<EntityId, f64> = [("Z1", 0.25), ("Z2", 0.5), ("Z3", 0.25)]
            .iter()
            .map(|(z, w)| (EntityId::from(*z), *w))
            .collect();
        let building = aggregate(
            &"B1".into(),
            "var",
            &refs,
            AggregationMethod::WeightedMean,
            Some(&weights),
            3,
        )
        .unwrap();
        assert!((building.baseline[0] - 22.0).abs() < 1e-9);
        assert!((building.delta[0] - 0.5).abs() < 1e-9);
        assert!((building.coverage_fraction - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_takes_pointwise_peak() {
        let zones = [
            zone("Z1", vec![5.0, 9.0], vec![6.0, 7.0], VariableClass::PeakDemand),
            zone("Z2", vec![8.0, 3.0], vec![4.0, 8.0], VariableClass::PeakDemand),
        ];
        let refs: Vec<&DeltaRecord> = zones.iter().collect();
        let building = aggregate(&"B1".into(), "var", &refs, AggregationMethod::Max, None, 2).unwrap();
        assert_eq!(building.baseline, vec![8.0, 9.0]);
        assert_eq!(building.modified, vec![6.0, 8.0]);
        assert_eq!(building.delta, vec![-2.0, -1.0]);
    }

    #[test]
    fn test_mixed_methods_are_rejected() {
        let zones = [
            zone("Z1", vec![1.0], vec![2.0], VariableClass::Energy),
            zone("Z2", vec![20.0], vec![21.0], VariableClass::Temperature),
        ];
        let refs: Vec<&DeltaRecord> = zones.iter().collect();
        let err = aggregate(&"B1".into(), "var", &refs, AggregationMethod::Sum, None, 2).unwrap_err();
        assert!(matches!(err, AggregationError::MixedMethods { .. }));
    }

    #[test]
    fn test_no_reporting_zone_is_an_error() {
        let err = aggregate(&"B1".into(), "var", &[], AggregationMethod::Sum, None, 3).unwrap_err();
        assert_eq!(
            err,
            AggregationError::NoData {
                variable: "var".into()
            }
        );
        assert_eq!(err.to_string(), "no zone reported data for var");
    }

    #[test]
    fn test_length_mismatch_is_alignment_error() {
        let zones = [
            zone("Z1", vec![1.0, 2.0], vec![2.0, 3.0], VariableClass::Energy),
            zone("Z2", vec![1.0], vec![2.0], VariableClass::Energy),
        ];
        let refs: Vec<&DeltaRecord> = zones.iter().collect();
        let err = aggregate(&"B1".into(), "var", &refs, AggregationMethod::Sum, None, 2).unwrap_err();
        assert!(matches!(err, AggregationError::Alignment(_)));
    }

    #[test]
    fn test_reconcile_detects_mismatch() {
        let zones = [
            zone("Z1", vec![10.0], vec![12.0], VariableClass::Energy),
            zone("Z2", vec![10.0], vec![12.0], VariableClass::Energy),
        ];
        let refs: Vec<&DeltaRecord> = zones.iter().collect();
        let aggregated = aggregate(&"B1".into(), "var", &refs, AggregationMethod::Sum, None, 2).unwrap();
        let matching = zone("B1", vec![20.0], vec![24.0], VariableClass::Energy);
        assert!(reconcile(&aggregated, &matching, 0.01).is_ok());
        let off = zone("B1", vec![20.0], vec![30.0], VariableClass::Energy);
        assert!(matches!(
            reconcile(&aggregated, &off, 0.01),
            Err(ReconciliationError::LevelMismatch { .. })
        ));
    }
}
