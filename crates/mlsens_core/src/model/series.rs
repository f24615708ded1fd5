//! Paired baseline/modified time series.

use jiff::civil::DateTime;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::{AggregationMethod, BuildingId, EntityId, VariantId};
use crate::error::DataAlignmentError;

/// Reporting frequency of a time index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Hourly,
    Daily,
    Monthly,
}

impl Frequency {
    /// Bucket key of a timestamp at this frequency
    fn bucket(self, ts: DateTime) -> DateTime {
        let date = ts.date();
        match self {
            Frequency::Hourly => jiff::civil::datetime(
                date.year(),
                date.month(),
                date.day(),
                ts.hour(),
                0,
                0,
                0,
            ),
            Frequency::Daily => date.to_datetime(jiff::civil::Time::midnight()),
            Frequency::Monthly => jiff::civil::date(date.year(), date.month(), 1)
                .to_datetime(jiff::civil::Time::midnight()),
        }
    }
}

/// One long-format row of a simulation output table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub building_id: BuildingId,
    pub variant_id: VariantId,
    pub variable_name: String,
    pub entity_name: String,
    pub timestamp: DateTime,
    pub value: f64,
}

/// Baseline and modified values of one variable on one entity, aligned on a
/// shared time index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedSeries {
    pub building_id: BuildingId,
    pub variant_id: VariantId,
    pub entity_id: EntityId,
    pub variable_name: String,
    timestamps: Vec<DateTime>,
    baseline: Vec<f64>,
    modified: Vec<f64>,
}

impl PairedSeries {
    /// Build a paired series; lengths must agree exactly.
    pub fn new(
        building_id: BuildingId,
        variant_id: VariantId,
        entity_id: EntityId,
        variable_name: impl Into<String>,
        timestamps: Vec<DateTime>,
        baseline: Vec<f64>,
        modified: Vec<f64>,
    ) -> Result<Self, DataAlignmentError> {
        let variable_name = variable_name.into();
        if baseline.len() != modified.len() || timestamps.len() != baseline.len() {
            return Err(DataAlignmentError::LengthMismatch {
                entity: entity_id,
                variable: variable_name,
                timestamps: timestamps.len(),
                baseline: baseline.len(),
                modified: modified.len(),
            });
        }
        Ok(Self {
            building_id,
            variant_id,
            entity_id,
            variable_name,
            timestamps,
            baseline,
            modified,
        })
    }

    /// Pair two single-entity timelines, which must carry identical timestamps.
    pub fn align(
        building_id: BuildingId,
        variant_id: VariantId,
        entity_id: EntityId,
        variable_name: &str,
        baseline: &Timeline,
        modified: &Timeline,
    ) -> Result<Self, DataAlignmentError> {
        if baseline.points.len() != modified.points.len() {
            return Err(DataAlignmentError::LengthMismatch {
                entity: entity_id,
                variable: variable_name.to_string(),
                timestamps: baseline.points.len(),
                baseline: baseline.points.len(),
                modified: modified.points.len(),
            });
        }
        if let Some(index) = baseline
            .points
            .iter()
            .zip(&modified.points)
            .position(|(b, m)| b.0 != m.0)
        {
            return Err(DataAlignmentError::TimestampMismatch {
                entity: entity_id,
                variable: variable_name.to_string(),
                index,
            });
        }
        Self::new(
            building_id,
            variant_id,
            entity_id,
            variable_name,
            baseline.points.iter().map(|p| p.0).collect(),
            baseline.points.iter().map(|p| p.1).collect(),
            modified.points.iter().map(|p| p.1).collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime] {
        &self.timestamps
    }

    pub fn baseline(&self) -> &[f64] {
        &self.baseline
    }

    pub fn modified(&self) -> &[f64] {
        &self.modified
    }

    /// Re-bucket to a coarser frequency, combining values with `method`.
    ///
    /// `WeightedMean` uses an unweighted mean over the timesteps of a bucket.
    pub fn resample(&self, frequency: Frequency, method: AggregationMethod) -> Self {
        let mut keys: Vec<DateTime> = Vec::new();
        let mut base_groups: Vec<Vec<f64>> = Vec::new();
        let mut mod_groups: Vec<Vec<f64>> = Vec::new();
        for ((ts, b), m) in self.timestamps.iter().zip(&self.baseline).zip(&self.modified) {
            let key = frequency.bucket(*ts);
            if keys.last() != Some(&key) {
                keys.push(key);
                base_groups.push(Vec::new());
                mod_groups.push(Vec::new());
            }
            if let (Some(bg), Some(mg)) = (base_groups.last_mut(), mod_groups.last_mut()) {
                bg.push(*b);
                mg.push(*m);
            }
        }
        Self {
            building_id: self.building_id.clone(),
            variant_id: self.variant_id.clone(),
            entity_id: self.entity_id.clone(),
            variable_name: self.variable_name.clone(),
            timestamps: keys,
            baseline: base_groups.iter().map(|g| reduce(g, method)).collect(),
            modified: mod_groups.iter().map(|g| reduce(g, method)).collect(),
        }
    }
}

/// Reduce values to a scalar using an aggregation rule
pub fn reduce(values: &[f64], method: AggregationMethod) -> f64 {
    match method {
        AggregationMethod::Sum => values.iter().sum(),
        AggregationMethod::WeightedMean => {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        }
        AggregationMethod::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}

/// Sorted (timestamp, value) points of one entity/variable in one variant
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    pub points: Vec<(DateTime, f64)>,
}

/// Key of one timeline inside a building's output table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimelineKey {
    pub variant_id: VariantId,
    pub entity_name: String,
    pub variable_name: String,
}

/// Group long-format rows into sorted timelines, rejecting duplicate timestamps.
pub fn collect_timelines(
    rows: &[SeriesRow],
) -> Result<FxHashMap<TimelineKey, Timeline>, DataAlignmentError> {
    let mut timelines: FxHashMap<TimelineKey, Timeline> = FxHashMap::default();
    for row in rows {
        timelines
            .entry(TimelineKey {
                variant_id: row.variant_id.clone(),
                entity_name: row.entity_name.clone(),
                variable_name: row.variable_name.clone(),
            })
            .or_default()
            .points
            .push((row.timestamp, row.value));
    }
    for (key, timeline) in &mut timelines {
        timeline.points.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some(w) = timeline.points.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(DataAlignmentError::DuplicateTimestamp {
                entity: EntityId(key.entity_name.clone()),
                variable: key.variable_name.clone(),
                timestamp: w[0].0.to_string(),
            });
        }
    }
    Ok(timelines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::civil::datetime;

    fn hourly(n: usize) -> Vec<DateTime> {
        (0..n)
            .map(|h| datetime(2024, 1, 1 + (h / 24) as i8, (h % 24) as i8, 0, 0, 0))
            .collect()
    }

    #[test]
    fn test_new_rejects_length_mismatch() {
        let err = PairedSeries::new(
            "B1".into(),
            "v1".into(),
            "Z1".into(),
            "Heating",
            hourly(3),
            vec![1.0, 2.0, 3.0],
            vec![1.0, 2.0],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DataAlignmentError::LengthMismatch { modified: 2, .. }
        ));
    }

    #[test]
    fn test_align_rejects_shifted_timestamps() {
        let ts = hourly(4);
        let baseline = Timeline {
            points: ts.iter().map(|t| (*t, 1.0)).collect(),
        };
        let modified = Timeline {
            points: ts.iter().skip(1).map(|t| (*t, 1.0)).collect(),
        };
        // Different lengths are caught before timestamps are compared
        assert!(PairedSeries::align(
            "B1".into(),
            "v1".into(),
            "Z1".into(),
            "Heating",
            &baseline,
            &modified
        )
        .is_err());

        let shifted = Timeline {
            points: hourly(5).iter().skip(1).map(|t| (*t, 1.0)).collect(),
        };
        let err = PairedSeries::align(
            "B1".into(),
            "v1".into(),
            "Z1".into(),
            "Heating",
            &baseline,
            &shifted,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DataAlignmentError::TimestampMismatch { index: 0, .. }
        ));
    }

    #[test]
    fn test_collect_timelines_sorts_and_rejects_duplicates() {
        let ts = hourly(2);
        let row = |t: DateTime, v: f64| SeriesRow {
            building_id: "B1".into(),
            variant_id: "base".into(),
            variable_name: "Heating".into(),
            entity_name: "Z1".into(),
            timestamp: t,
            value: v,
        };
        let timelines = collect_timelines(&[row(ts[1], 2.0), row(ts[0], 1.0)]).unwrap();
        let timeline = timelines.values().next().unwrap();
        assert_eq!(timeline.points[0].1, 1.0);

        let err = collect_timelines(&[row(ts[0], 1.0), row(ts[0], 2.0)]).unwrap_err();
        assert!(matches!(err, DataAlignmentError::DuplicateTimestamp { .. }));
    }

    #[test]
    fn test_resample_hourly_to_daily() {
        let ts = hourly(48);
        let series = PairedSeries::new(
            "B1".into(),
            "v1".into(),
            "Z1".into(),
            "Heating",
            ts,
            vec![1.0; 48],
            vec![2.0; 48],
        )
        .unwrap();
        let daily = series.resample(Frequency::Daily, AggregationMethod::Sum);
        assert_eq!(daily.len(), 2);
        assert_eq!(daily.baseline(), &[24.0, 24.0]);
        assert_eq!(daily.modified(), &[48.0, 48.0]);

        let mean = series.resample(Frequency::Monthly, AggregationMethod::WeightedMean);
        assert_eq!(mean.len(), 1);
        assert_eq!(mean.modified(), &[2.0]);
    }
}
