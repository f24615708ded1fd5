//! Breakpoint detection over parameter–output series.

use serde::{Deserialize, Serialize};

use crate::budget::TimeBudget;
use crate::error::TimeoutError;
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detector {
    Tree,
    Cusum,
    Pelt,
}

impl Detector {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Detector::Tree => "tree",
            Detector::Cusum => "cusum",
            Detector::Pelt => "pelt",
        }
    }
}

/// A detected change; `index` is the first position of the new regime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub detector: Detector,
    pub index: usize,
    /// Parameter value at the break when the series is ordered by parameter
    pub parameter_value: Option<f64>,
    /// Detector-specific strength (SSE reduction, normalised |S|, mean shift)
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default)]
    pub detectors: Vec<Detector>,
    /// Smallest leaf of a tree split
    #[serde(default = "default_min_leaf")]
    pub min_leaf: usize,
    /// PELT penalty; BIC `2·ln(n)` when absent
    #[serde(default)]
    pub penalty: Option<f64>,
    #[serde(default = "default_min_segment")]
    pub min_segment: usize,
}

fn default_min_leaf() -> usize {
    2
}

fn default_min_segment() -> usize {
    2
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            detectors: Vec::new(),
            min_leaf: default_min_leaf(),
            penalty: None,
            min_segment: default_min_segment(),
        }
    }
}

/// Runs the configured detectors on one (x, y) sample
#[derive(Debug, Clone, Default)]
pub struct ThresholdDetector {
    config: ThresholdConfig,
}

impl ThresholdDetector {
    #[must_use]
    pub fn new(config: ThresholdConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.config.detectors.is_empty()
    }

    /// Order the sample by `x` and run every configured detector on `y`.
    ///
    /// A PELT run that exceeds the budget aborts the whole detection.
    pub fn detect(
        &self,
        x: &[f64],
        y: &[f64],
        budget: &TimeBudget,
    ) -> Result<Vec<Breakpoint>, TimeoutError> {
        let n = x.len().min(y.len());
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));
        let xs: Vec<f64> = order.iter().map(|&i| x[i]).collect();
        let ys: Vec<f64> = order.iter().map(|&i| y[i]).collect();

        let mut found = Vec::new();
        for detector in &self.config.detectors {
            match detector {
                Detector::Tree => found.extend(tree_split(&xs, &ys, self.config.min_leaf)),
                Detector::Cusum => found.extend(cusum(&xs, &ys)),
                Detector::Pelt => {
                    let changes = pelt(&ys, self.config.penalty, self.config.min_segment, budget)?;
                    found.extend(segment_breakpoints(&ys, &changes).into_iter().map(|mut b| {
                        b.parameter_value = xs.get(b.index).copied();
                        b
                    }));
                }
            }
        }
        Ok(found)
    }
}

/// Best single split of `y` (ordered by `x`) minimising `SSE_left + SSE_right`.
///
/// Splits never separate equal `x` values. Score is the fraction of total SSE removed.
#[must_use]
pub fn tree_split(x: &[f64], y: &[f64], min_leaf: usize) -> Option<Breakpoint> {
    let n = y.len();
    let min_leaf = min_leaf.max(1);
    if n < 2 * min_leaf {
        return None;
    }
    let prefix = PrefixSums::new(y);
    let total = prefix.sse(0, n);
    if total <= 0.0 {
        return None;
    }

    let mut best: Option<(usize, f64)> = None;
    for i in min_leaf..=(n - min_leaf) {
        if x[i - 1] == x[i] {
            continue;
        }
        let sse = prefix.sse(0, i) + prefix.sse(i, n);
        if best.is_none_or(|(_, b)| sse < b) {
            best = Some((i, sse));
        }
    }
    best.map(|(index, sse)| Breakpoint {
        detector: Detector::Tree,
        index,
        parameter_value: Some((x[index - 1] + x[index]) / 2.0),
        score: 1.0 - sse / total,
    })
}

/// CUSUM of residuals from a linear fit of `y` on `x`.
///
/// `S_i = Σ_{j≤i}(r_j − mean(r))`; every interior local extremum of `|S_i|`
/// is a candidate, scored by `|S_i| / (σ_r·√n)`. Falls back to a fit on the
/// index when `x` is constant.
#[must_use]
pub fn cusum(x: &[f64], y: &[f64]) -> Vec<Breakpoint> {
    let n = y.len();
    if n < 3 {
        return Vec::new();
    }
    let index: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let fit = stats::linear_fit(x, y).or_else(|| stats::linear_fit(&index, y));
    let residuals: Vec<f64> = match fit {
        Some(fit) => x.iter().zip(y).map(|(a, b)| b - fit.predict(*a)).collect(),
        None => y.to_vec(),
    };
    let mean = stats::mean(&residuals);
    let sigma = stats::std_dev(&residuals);
    if sigma <= 0.0 {
        return Vec::new();
    }

    let mut running = 0.0;
    let magnitude: Vec<f64> = residuals
        .iter()
        .map(|r| {
            running += r - mean;
            running.abs()
        })
        .collect();
    let scale = sigma * (n as f64).sqrt();

    (1..n - 1)
        .filter(|&i| {
            magnitude[i] > 1e-12 * scale
                && magnitude[i] >= magnitude[i - 1]
                && magnitude[i] > magnitude[i + 1]
        })
        .map(|i| Breakpoint {
            detector: Detector::Cusum,
            index: i + 1,
            parameter_value: x.get(i + 1).copied(),
            score: magnitude[i] / scale,
        })
        .collect()
}

/// Exact PELT changepoints under a Gaussian mean-and-variance cost.
///
/// Returns the start index of every segment after the first. The penalty
/// defaults to `2·ln(n)`. Segment variances are floored so that constant
/// segments do not produce infinite likelihood.
pub fn pelt(
    y: &[f64],
    penalty: Option<f64>,
    min_segment: usize,
    budget: &TimeBudget,
) -> Result<Vec<usize>, TimeoutError> {
    let n = y.len();
    let min_segment = min_segment.max(2);
    if n < 2 * min_segment {
        return Ok(Vec::new());
    }
    let beta = penalty.unwrap_or_else(|| 2.0 * (n as f64).ln());
    let prefix = PrefixSums::new(y);
    let floor = (stats::population_variance(y) * 1e-6).max(f64::EPSILON);
    let cost = |s: usize, t: usize| {
        let m = (t - s) as f64;
        let var = prefix.sse(s, t) / m;
        m * var.max(floor).ln()
    };

    let mut best = vec![f64::INFINITY; n + 1];
    let mut last = vec![0usize; n + 1];
    best[0] = -beta;
    let mut candidates: Vec<usize> = vec![0];

    for t in min_segment..=n {
        budget.check("pelt")?;
        let mut scored = Vec::with_capacity(candidates.len());
        for &s in candidates.iter().filter(|&&s| t - s >= min_segment) {
            let value = best[s] + cost(s, t) + beta;
            scored.push((s, value - beta));
            if value < best[t] {
                best[t] = value;
                last[t] = s;
            }
        }
        // Prune candidates that can never be optimal again.
        let bound = best[t];
        candidates.retain(|&s| {
            scored
                .iter()
                .find(|(c, _)| *c == s)
                .is_none_or(|(_, v)| *v <= bound)
        });
        if t < n {
            candidates.push(t + 1 - min_segment);
        }
        candidates.sort_unstable();
        candidates.dedup();
    }

    let mut changes = Vec::new();
    let mut t = n;
    while t > 0 {
        let s = last[t];
        if s > 0 {
            changes.push(s);
        }
        t = s;
    }
    changes.reverse();
    Ok(changes)
}

/// Breakpoints scored by the absolute mean shift between adjacent segments
fn segment_breakpoints(y: &[f64], changes: &[usize]) -> Vec<Breakpoint> {
    let mut bounds = vec![0];
    bounds.extend_from_slice(changes);
    bounds.push(y.len());
    bounds
        .windows(3)
        .map(|w| Breakpoint {
            detector: Detector::Pelt,
            index: w[1],
            parameter_value: None,
            score: (stats::mean(&y[w[1]..w[2]]) - stats::mean(&y[w[0]..w[1]])).abs(),
        })
        .collect()
}

/// Prefix sums for O(1) segment sums of squares
struct PrefixSums {
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl PrefixSums {
    fn new(y: &[f64]) -> Self {
        let mut sum = Vec::with_capacity(y.len() + 1);
        let mut sum_sq = Vec::with_capacity(y.len() + 1);
        sum.push(0.0);
        sum_sq.push(0.0);
        for v in y {
            sum.push(sum[sum.len() - 1] + v);
            sum_sq.push(sum_sq[sum_sq.len() - 1] + v * v);
        }
        Self { sum, sum_sq }
    }

    /// Sum of squared deviations from the mean over `[s, t)`
    fn sse(&self, s: usize, t: usize) -> f64 {
        if t <= s {
            return 0.0;
        }
        let m = (t - s) as f64;
        let total = self.sum[t] - self.sum[s];
        let squares = self.sum_sq[t] - self.sum_sq[s];
        (squares - total * total / m).max(0.0)
    }
}
