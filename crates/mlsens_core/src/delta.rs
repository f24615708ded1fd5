//! Pointwise modified − baseline deltas.

use jiff::civil::DateTime;
use serde::{Deserialize, Serialize};

use crate::model::{
    AggregationMethod, BuildingId, EntityId, Level, PairedSeries, VariableClass, VariantId, reduce,
};

/// Baselines with magnitude at or below this make a percentage undefined
pub const UNDEFINED_EPSILON: f64 = 1e-9;

/// Deltas of one variable on one entity for one variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaRecord {
    pub building_id: BuildingId,
    pub variant_id: VariantId,
    pub entity_id: EntityId,
    pub level: Level,
    pub variable_name: String,
    pub aggregation_method: AggregationMethod,
    pub timestamps: Vec<DateTime>,
    pub baseline: Vec<f64>,
    pub modified: Vec<f64>,
    pub delta: Vec<f64>,
    /// `delta / baseline` per timestep; `None` where the baseline is ~0
    pub percent: Vec<Option<f64>>,
    pub undefined_count: usize,
    /// Share of expected children that contributed (1.0 for measured series)
    pub coverage_fraction: f64,
}

/// Scalar reduction of a delta record over time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeltaSummary {
    pub baseline: f64,
    pub modified: f64,
    pub delta: f64,
    /// Relative change in percent; `None` when the baseline is ~0
    pub percent: Option<f64>,
}

impl DeltaRecord {
    /// Assemble a record from already aligned baseline and modified values.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        building_id: BuildingId,
        variant_id: VariantId,
        entity_id: EntityId,
        level: Level,
        variable_name: String,
        aggregation_method: AggregationMethod,
        timestamps: Vec<DateTime>,
        baseline: Vec<f64>,
        modified: Vec<f64>,
        epsilon: f64,
    ) -> Self {
        let delta: Vec<f64> = baseline
            .iter()
            .zip(&modified)
            .map(|(b, m)| m - b)
            .collect();
        let percent: Vec<Option<f64>> = baseline
            .iter()
            .zip(&delta)
            .map(|(b, d)| (b.abs() > epsilon).then(|| d / b))
            .collect();
        let undefined_count = percent.iter().filter(|p| p.is_none()).count();
        Self {
            building_id,
            variant_id,
            entity_id,
            level,
            variable_name,
            aggregation_method,
            timestamps,
            baseline,
            modified,
            delta,
            percent,
            undefined_count,
            coverage_fraction: 1.0,
        }
    }

    pub fn len(&self) -> usize {
        self.delta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delta.is_empty()
    }

    /// Percentages with undefined timesteps dropped
    pub fn defined_percent(&self) -> impl Iterator<Item = f64> + '_ {
        self.percent.iter().flatten().copied()
    }

    /// Reduce the record over time with its own aggregation rule
    #[must_use]
    pub fn summary(&self) -> DeltaSummary {
        let baseline = reduce(&self.baseline, self.aggregation_method);
        let modified = reduce(&self.modified, self.aggregation_method);
        let delta = modified - baseline;
        DeltaSummary {
            baseline,
            modified,
            delta,
            percent: (baseline.abs() > UNDEFINED_EPSILON).then(|| delta / baseline.abs() * 100.0),
        }
    }
}

/// Computes delta records from paired series
#[derive(Debug, Clone, Copy)]
pub struct DeltaCalculator {
    epsilon: f64,
}

impl Default for DeltaCalculator {
    fn default() -> Self {
        Self {
            epsilon: UNDEFINED_EPSILON,
        }
    }
}

impl DeltaCalculator {
    #[must_use]
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    /// Delta record of `series` at `level`, aggregated later with the class rule.
    #[must_use]
    pub fn compute(&self, series: &PairedSeries, level: Level, class: VariableClass) -> DeltaRecord {
        let record = DeltaRecord::from_parts(
            series.building_id.clone(),
            series.variant_id.clone(),
            series.entity_id.clone(),
            level,
            series.variable_name.clone(),
            class.aggregation(),
            series.timestamps().to_vec(),
            series.baseline().to_vec(),
            series.modified().to_vec(),
            self.epsilon,
        );
        if record.undefined_count > 0 {
            tracing::debug!(
                entity = %record.entity_id,
                variable = %record.variable_name,
                undefined = record.undefined_count,
                "Timesteps with ~0 baseline excluded from percentages"
            );
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::civil::datetime;

    fn series(baseline: Vec<f64>, modified: Vec<f64>) -> PairedSeries {
        let ts = (0..baseline.len())
            .map(|h| datetime(2024, 7, 1, h as i8, 0, 0, 0))
            .collect();
        PairedSeries::new(
            "B1".into(),
            "v1".into(),
            "Z1".into(),
            "Zone Air System Sensible Cooling Energy",
            ts,
            baseline,
            modified,
        )
        .unwrap()
    }

    #[test]
    fn test_pointwise_delta_and_percent() {
        let record = DeltaCalculator::default().compute(
            &series(vec![10.0, 20.0, 40.0], vec![12.0, 15.0, 40.0]),
            Level::Zone,
            VariableClass::Energy,
        );
        assert_eq!(record.delta, vec![2.0, -5.0, 0.0]);
        assert_eq!(record.percent, vec![Some(0.2), Some(-0.25), Some(0.0)]);
        assert_eq!(record.undefined_count, 0);
        assert_eq!(record.aggregation_method, AggregationMethod::Sum);
    }

    #[test]
    fn test_zero_baseline_marks_undefined_instead_of_nan() {
        let record = DeltaCalculator::default().compute(
            &series(vec![0.0, 1e-12, 5.0], vec![3.0, 1.0, 6.0]),
            Level::Zone,
            VariableClass::Energy,
        );
        assert_eq!(record.percent[0], None);
        assert_eq!(record.percent[1], None);
        assert_eq!(record.undefined_count, 2);
        let defined: Vec<f64> = record.defined_percent().collect();
        assert_eq!(defined, vec![0.2]);
        assert!(defined.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_summary_uses_class_rule() {
        let energy = DeltaCalculator::default().compute(
            &series(vec![1000.0, 500.0], vec![900.0, 450.0]),
            Level::Zone,
            VariableClass::Energy,
        );
        let s = energy.summary();
        assert_eq!(s.baseline, 1500.0);
        assert_eq!(s.delta, -150.0);
        assert!((s.percent.unwrap() + 10.0).abs() < 1e-12);

        let temp = DeltaCalculator::default().compute(
            &series(vec![20.0, 22.0], vec![21.0, 23.0]),
            Level::Zone,
            VariableClass::Temperature,
        );
        assert_eq!(temp.summary().baseline, 21.0);
        assert_eq!(temp.summary().delta, 1.0);
    }
}
