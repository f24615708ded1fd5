//! Pearson, Spearman and Kendall correlation with Fisher-z intervals.

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

use super::{EstimationContext, Estimator};
use crate::model::{CorrelationKind, Method, MethodDetails, ResultFlag, SensitivityResult, SkipReason};
use crate::stats;

/// Fisher-z intervals need `n - 3 > 0`
pub const MIN_FISHER_SAMPLES: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct CorrelationEstimator {
    pub kind: CorrelationKind,
}

impl Estimator for CorrelationEstimator {
    fn estimate(&self, ctx: &EstimationContext<'_>) -> SensitivityResult {
        let method = Method::Correlation { kind: self.kind };
        let samples = ctx.samples;
        let x = samples.parameter_deltas();
        let y = samples.output_deltas();
        let n = x.len();
        let key = samples.key.clone();

        if n == 0 {
            return SensitivityResult::skipped(key, method, 0, SkipReason::NoObservations);
        }
        if n < 2 {
            return SensitivityResult::skipped(
                key,
                method,
                n,
                SkipReason::InsufficientSamples {
                    required: 2,
                    available: n,
                },
            );
        }
        if stats::is_constant(&x) {
            return SensitivityResult::skipped(
                key.clone(),
                method,
                n,
                SkipReason::ZeroVariance {
                    variable: key.parameter_name,
                },
            );
        }
        if stats::is_constant(&y) {
            return SensitivityResult::skipped(
                key.clone(),
                method,
                n,
                SkipReason::ZeroVariance {
                    variable: key.output_variable,
                },
            );
        }

        let Some(r) = coefficient(self.kind, &x, &y) else {
            return SensitivityResult::skipped(
                key.clone(),
                method,
                n,
                SkipReason::ZeroVariance {
                    variable: key.parameter_name,
                },
            );
        };

        let mut result = SensitivityResult::scored(key, method, n, r);
        result.details = MethodDetails::Correlation { kind: self.kind };
        result.p_value = p_value(self.kind, r, n);
        match fisher_interval(r, n, ctx.settings.alpha) {
            Some(ci) => result.confidence_interval = Some(ci),
            None => result.flag(ResultFlag::InsufficientData),
        }
        result
    }
}

/// Correlation coefficient of the requested kind; `None` on zero variance
#[must_use]
pub fn coefficient(kind: CorrelationKind, x: &[f64], y: &[f64]) -> Option<f64> {
    match kind {
        CorrelationKind::Pearson => stats::pearson(x, y),
        CorrelationKind::Spearman => stats::pearson(&stats::ranks(x), &stats::ranks(y)),
        CorrelationKind::Kendall => kendall_tau_b(x, y),
    }
}

/// Kendall's tau-b, which corrects for ties in either variable
#[must_use]
pub fn kendall_tau_b(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len().min(y.len());
    let mut concordant = 0i64;
    let mut discordant = 0i64;
    let mut ties_x = 0i64;
    let mut ties_y = 0i64;
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = if x[i] == x[j] { 0.0 } else { (x[i] - x[j]).signum() };
            let dy = if y[i] == y[j] { 0.0 } else { (y[i] - y[j]).signum() };
            match (dx == 0.0, dy == 0.0) {
                (true, true) => {}
                (true, false) => ties_x += 1,
                (false, true) => ties_y += 1,
                (false, false) if dx == dy => concordant += 1,
                (false, false) => discordant += 1,
            }
        }
    }
    let left = (concordant + discordant + ties_x) as f64;
    let right = (concordant + discordant + ties_y) as f64;
    let denom = (left * right).sqrt();
    if denom <= 0.0 {
        return None;
    }
    Some(((concordant - discordant) as f64 / denom).clamp(-1.0, 1.0))
}

/// Two-sided p-value of `H0: rho = 0`
#[must_use]
pub fn p_value(kind: CorrelationKind, r: f64, n: usize) -> Option<f64> {
    match kind {
        CorrelationKind::Pearson | CorrelationKind::Spearman => {
            if n < 3 {
                return None;
            }
            if r.abs() >= 1.0 {
                return Some(0.0);
            }
            let df = (n - 2) as f64;
            let t = r * (df / (1.0 - r * r)).sqrt();
            let dist = StudentsT::new(0.0, 1.0, df).ok()?;
            Some((2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0))
        }
        CorrelationKind::Kendall => {
            let n = n as f64;
            let z = 3.0 * r * (n * (n - 1.0)).sqrt() / (2.0 * (2.0 * n + 5.0)).sqrt();
            let dist = Normal::new(0.0, 1.0).ok()?;
            Some((2.0 * (1.0 - dist.cdf(z.abs()))).clamp(0.0, 1.0))
        }
    }
}

/// Fisher-z confidence interval at level `1 - alpha`.
///
/// `z = atanh(r)`, `SE = 1/sqrt(n - 3)`, bounds back-transformed with `tanh`.
/// `None` below [`MIN_FISHER_SAMPLES`].
#[must_use]
pub fn fisher_interval(r: f64, n: usize, alpha: f64) -> Option<(f64, f64)> {
    if n < MIN_FISHER_SAMPLES || !(0.0..1.0).contains(&alpha) || alpha == 0.0 {
        return None;
    }
    let normal = Normal::new(0.0, 1.0).ok()?;
    let critical = normal.inverse_cdf(1.0 - alpha / 2.0);
    let z = r.clamp(-1.0 + 1e-12, 1.0 - 1e-12).atanh();
    let se = 1.0 / ((n - 3) as f64).sqrt();
    Some(((z - critical * se).tanh(), (z + critical * se).tanh()))
}
