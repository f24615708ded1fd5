//! Kraskov–Stögbauer–Grassberger nearest-neighbour mutual information.

use rand::SeedableRng;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, Normal};
use statrs::function::gamma::digamma;

use super::{EstimationContext, Estimator};
use crate::model::{Method, MethodDetails, SensitivityResult, SkipReason};
use crate::stats;

/// Scale of the tie-breaking noise added to standardised samples
const JITTER: f64 = 1e-10;

#[derive(Debug, Clone, Copy)]
pub struct MutualInformationEstimator {
    pub k: usize,
}

impl Estimator for MutualInformationEstimator {
    fn estimate(&self, ctx: &EstimationContext<'_>) -> SensitivityResult {
        let method = Method::MutualInformation { k: self.k };
        let samples = ctx.samples;
        let key = samples.key.clone();
        let x = samples.parameter_deltas();
        let y = samples.output_deltas();
        let n = x.len();

        if n == 0 {
            return SensitivityResult::skipped(key, method, 0, SkipReason::NoObservations);
        }
        if self.k == 0 || 2 * self.k >= n {
            return SensitivityResult::skipped(key, method, n, SkipReason::KTooLarge { k: self.k, n });
        }
        for (values, variable) in [(&x, &key.parameter_name), (&y, &key.output_variable)] {
            if stats::is_constant(values) {
                return SensitivityResult::skipped(
                    key.clone(),
                    method,
                    n,
                    SkipReason::ZeroVariance {
                        variable: variable.clone(),
                    },
                );
            }
        }

        let mi = ksg(&x, &y, self.k, ctx.settings.seed);
        let mut result = SensitivityResult::scored(key, method, n, mi);
        result.details = MethodDetails::MutualInformation { k: self.k };
        result
    }
}

/// KSG estimator (algorithm 1) in nats, clamped at zero.
///
/// `I(X;Y) = ψ(k) + ψ(n) − ⟨ψ(n_x + 1) + ψ(n_y + 1)⟩` with max-norm neighbour
/// distances on standardised, jittered samples.
#[must_use]
pub fn ksg(x: &[f64], y: &[f64], k: usize, seed: u64) -> f64 {
    let n = x.len().min(y.len());
    let mut rng = SmallRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, JITTER).ok();
    let mut jittered = |values: &[f64]| -> Vec<f64> {
        stats::standardize(&values[..n])
            .into_iter()
            .map(|v| match &noise {
                Some(d) => v + d.sample(&mut rng),
                None => v,
            })
            .collect()
    };
    let xs = jittered(x);
    let ys = jittered(y);

    let mut neighbours = Vec::with_capacity(n);
    let mut total = 0.0;
    for i in 0..n {
        neighbours.clear();
        neighbours.extend(
            (0..n)
                .filter(|&j| j != i)
                .map(|j| (xs[i] - xs[j]).abs().max((ys[i] - ys[j]).abs())),
        );
        neighbours.sort_by(f64::total_cmp);
        let radius = neighbours[k - 1];
        let nx = (0..n)
            .filter(|&j| j != i && (xs[i] - xs[j]).abs() < radius)
            .count();
        let ny = (0..n)
            .filter(|&j| j != i && (ys[i] - ys[j]).abs() < radius)
            .count();
        total += digamma(nx as f64 + 1.0) + digamma(ny as f64 + 1.0);
    }

    let mi = digamma(k as f64) + digamma(n as f64) - total / n as f64;
    mi.max(0.0)
}
