//! Local sensitivity over partitions of the parameter range.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::stats;

const KMEANS_MAX_ITERATIONS: usize = 100;
/// Regions smaller than this report no local statistics
const MIN_REGION_SAMPLES: usize = 3;

/// How the parameter range is cut into regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PartitionStrategy {
    KMeans { k: usize },
    Quantile { bins: usize },
    Grid { bins: usize },
}

/// Statistics of one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionStats {
    pub lower: f64,
    pub upper: f64,
    pub sample_size: usize,
    pub correlation: Option<f64>,
    /// Regional slope rescaled by the global `σ_X / σ_Y`
    pub normalized_slope: Option<f64>,
    /// `1 − SSE_quadratic / SSE_linear`, clamped to `[0, 1]`
    pub nonlinearity: f64,
    /// `(1 − NL)·|ρ_R| + NL·|β_normalized|`
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionalSummary {
    pub strategy: PartitionStrategy,
    pub regions: Vec<RegionStats>,
}

impl RegionalSummary {
    /// Highest regional score, if any region could be scored
    #[must_use]
    pub fn max_score(&self) -> Option<f64> {
        self.regions
            .iter()
            .filter_map(|r| r.score)
            .max_by(f64::total_cmp)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RegionalAnalyzer {
    strategy: PartitionStrategy,
}

impl RegionalAnalyzer {
    #[must_use]
    pub fn new(strategy: PartitionStrategy) -> Self {
        Self { strategy }
    }

    /// Partition `x` and compute the local statistics of `y` in every non-empty region
    #[must_use]
    pub fn analyze(&self, x: &[f64], y: &[f64]) -> RegionalSummary {
        let n = x.len().min(y.len());
        let labels = partition(&x[..n], self.strategy);
        let regions_count = labels.iter().copied().max().map_or(0, |m| m + 1);
        let sd_x = stats::std_dev(&x[..n]);
        let sd_y = stats::std_dev(&y[..n]);

        let regions = (0..regions_count)
            .filter_map(|region| {
                let (rx, ry): (Vec<f64>, Vec<f64>) = labels
                    .iter()
                    .zip(x.iter().zip(y))
                    .filter(|(l, _)| **l == region)
                    .map(|(_, (a, b))| (*a, *b))
                    .unzip();
                (!rx.is_empty()).then(|| region_stats(&rx, &ry, sd_x, sd_y))
            })
            .collect();

        RegionalSummary {
            strategy: self.strategy,
            regions,
        }
    }
}

fn region_stats(x: &[f64], y: &[f64], sd_x: f64, sd_y: f64) -> RegionStats {
    let lower = x.iter().copied().fold(f64::INFINITY, f64::min);
    let upper = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut stats = RegionStats {
        lower,
        upper,
        sample_size: x.len(),
        correlation: None,
        normalized_slope: None,
        nonlinearity: 0.0,
        score: None,
    };
    if x.len() < MIN_REGION_SAMPLES {
        return stats;
    }

    let Some(linear) = stats::linear_fit(x, y) else {
        return stats;
    };
    stats.correlation = stats::pearson(x, y);
    if sd_y > 0.0 {
        stats.normalized_slope = Some(linear.slope * sd_x / sd_y);
    }
    stats.nonlinearity = match quadratic_sse(x, y) {
        Some(quadratic) if linear.sse > 0.0 => (1.0 - quadratic / linear.sse).clamp(0.0, 1.0),
        _ => 0.0,
    };
    let nl = stats.nonlinearity;
    stats.score = match (stats.correlation, stats.normalized_slope) {
        (Some(rho), Some(beta)) => Some((1.0 - nl) * rho.abs() + nl * beta.abs()),
        (None, Some(beta)) => Some(nl * beta.abs()),
        _ => None,
    };
    stats
}

/// Residual sum of squares of `y = a + b·x + c·x²`; `None` below four points
fn quadratic_sse(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() < 4 {
        return None;
    }
    let design = DMatrix::from_fn(x.len(), 3, |i, j| x[i].powi(j as i32));
    let target = DVector::from_column_slice(y);
    let coefficients = design.clone().svd(true, true).solve(&target, 1e-12).ok()?;
    Some((target - design * coefficients).norm_squared())
}

/// Region label of every value, labels ordered by position on the axis
#[must_use]
pub fn partition(x: &[f64], strategy: PartitionStrategy) -> Vec<usize> {
    if x.is_empty() {
        return Vec::new();
    }
    match strategy {
        PartitionStrategy::Quantile { bins } => {
            let bins = bins.max(1);
            let edges: Vec<f64> = (1..bins)
                .map(|j| stats::quantile(x, j as f64 / bins as f64))
                .collect();
            x.iter()
                .map(|v| edges.iter().filter(|e| v > e).count())
                .collect()
        }
        PartitionStrategy::Grid { bins } => {
            let bins = bins.max(1);
            let lo = x.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let width = (hi - lo) / bins as f64;
            x.iter()
                .map(|v| {
                    if width > 0.0 {
                        (((v - lo) / width) as usize).min(bins - 1)
                    } else {
                        0
                    }
                })
                .collect()
        }
        PartitionStrategy::KMeans { k } => kmeans_1d(x, k.max(1)),
    }
}

/// Lloyd's algorithm on one dimension with quantile initialisation
fn kmeans_1d(x: &[f64], k: usize) -> Vec<usize> {
    let mut centers: Vec<f64> = (0..k)
        .map(|i| stats::quantile(x, (i as f64 + 0.5) / k as f64))
        .collect();
    let mut labels = vec![0; x.len()];
    for _ in 0..KMEANS_MAX_ITERATIONS {
        let assigned: Vec<usize> = x
            .iter()
            .map(|v| {
                centers
                    .iter()
                    .enumerate()
                    .min_by(|a, b| (v - a.1).abs().total_cmp(&(v - b.1).abs()))
                    .map_or(0, |(i, _)| i)
            })
            .collect();
        let changed = assigned != labels;
        labels = assigned;
        for (c, center) in centers.iter_mut().enumerate() {
            let members: Vec<f64> = x
                .iter()
                .zip(&labels)
                .filter(|(_, l)| **l == c)
                .map(|(v, _)| *v)
                .collect();
            if !members.is_empty() {
                *center = stats::mean(&members);
            }
        }
        if !changed {
            break;
        }
    }

    // Relabel so that region 0 is the lowest occupied cluster.
    let mut order: Vec<usize> = (0..k).filter(|c| labels.contains(c)).collect();
    order.sort_by(|a, b| centers[*a].total_cmp(&centers[*b]));
    labels
        .iter()
        .map(|l| order.iter().position(|c| c == l).unwrap_or(0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantile_bins_are_balanced() {
        let x: Vec<f64> = (0..12).map(f64::from).collect();
        let labels = partition(&x, PartitionStrategy::Quantile { bins: 3 });
        for bin in 0..3 {
            assert_eq!(labels.iter().filter(|l| **l == bin).count(), 4);
        }
    }

    #[test]
    fn test_grid_puts_maximum_in_last_bin() {
        let labels = partition(&[0.0, 1.0, 2.0, 10.0], PartitionStrategy::Grid { bins: 5 });
        assert_eq!(labels, vec![0, 0, 1, 4]);
    }

    #[test]
    fn test_kmeans_separates_clusters() {
        let x = [1.0, 1.1, 0.9, 10.0, 10.2, 9.8];
        let labels = partition(&x, PartitionStrategy::KMeans { k: 2 });
        assert_eq!(labels, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_linear_region_has_no_nonlinearity() {
        let x: Vec<f64> = (0..10).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0 + if *v as i32 % 2 == 0 { 0.01 } else { -0.01 }).collect();
        let summary = RegionalAnalyzer::new(PartitionStrategy::Grid { bins: 1 }).analyze(&x, &y);
        let region = &summary.regions[0];
        assert!(region.nonlinearity < 0.05);
        assert!(region.score.unwrap() > 0.95);
    }

    #[test]
    fn test_quadratic_region_is_nonlinear() {
        let x: Vec<f64> = (-5..=5).map(f64::from).collect();
        let y: Vec<f64> = x.iter().map(|v| v * v + 0.5 * v).collect();
        let summary = RegionalAnalyzer::new(PartitionStrategy::Grid { bins: 1 }).analyze(&x, &y);
        assert!(summary.regions[0].nonlinearity > 0.9);
    }

    #[test]
    fn test_small_regions_are_not_scored() {
        let summary = RegionalAnalyzer::new(PartitionStrategy::Quantile { bins: 2 })
            .analyze(&[1.0, 2.0, 3.0, 4.0], &[1.0, 2.0, 3.0, 5.0]);
        assert!(summary.regions.iter().all(|r| r.score.is_none()));
        assert_eq!(summary.max_score(), None);
    }
}
