//! Linear, ridge and lasso regression of output deltas on parameter deltas.

use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, StudentsT};

use super::{EstimationContext, Estimator};
use crate::model::{Method, MethodDetails, RegressionKind, SensitivityResult, SkipReason};
use crate::stats;

const LASSO_MAX_ITERATIONS: usize = 10_000;
const LASSO_TOLERANCE: f64 = 1e-10;
/// Smallest Cholesky pivot, relative to the largest, accepted as non-singular
const CONDITION_FLOOR: f64 = 1e-7;

#[derive(Debug, Clone, Copy)]
pub struct RegressionEstimator {
    pub kind: RegressionKind,
}

/// Fit on standardised columns
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionFit {
    pub coefficients: Vec<f64>,
    /// Two-sided t-test p-values, only for ordinary least squares
    pub p_values: Option<Vec<f64>>,
    pub r_squared: f64,
}

impl Estimator for RegressionEstimator {
    fn estimate(&self, ctx: &EstimationContext<'_>) -> SensitivityResult {
        let method = Method::Regression { kind: self.kind };
        let samples = ctx.samples;
        let key = samples.key.clone();
        let n = samples.len();
        if n == 0 {
            return SensitivityResult::skipped(key, method, 0, SkipReason::NoObservations);
        }
        let Some(target) = samples.target_covariate() else {
            return SensitivityResult::skipped(
                key.clone(),
                method,
                n,
                SkipReason::ZeroVariance {
                    variable: key.parameter_name,
                },
            );
        };

        let y = samples.output_deltas();
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

        // Constant covariates carry no information and make the design singular.
        let columns: Vec<Vec<f64>> = (0..samples.covariates.len())
            .map(|c| samples.observations.iter().map(|o| o.covariates[c]).collect())
            .collect();
        let kept: Vec<usize> = (0..columns.len())
            .filter(|&c| !stats::is_constant(&columns[c]))
            .collect();
        let Some(target_pos) = kept.iter().position(|&c| c == target) else {
            return SensitivityResult::skipped(
                key.clone(),
                method,
                n,
                SkipReason::ZeroVariance {
                    variable: key.parameter_name,
                },
            );
        };

        let p = kept.len();
        let required = match self.kind {
            RegressionKind::Linear => p + 2,
            RegressionKind::Ridge { .. } | RegressionKind::Lasso { .. } => 3,
        };
        if n < required {
            return SensitivityResult::skipped(
                key,
                method,
                n,
                SkipReason::InsufficientSamples {
                    required,
                    available: n,
                },
            );
        }

        let design: Vec<Vec<f64>> = kept.iter().map(|&c| stats::standardize(&columns[c])).collect();
        let y_std = stats::standardize(&y);
        let Some(fit) = fit(self.kind, &design, &y_std) else {
            return SensitivityResult::skipped(key, method, n, SkipReason::SingularDesign);
        };

        let standardized = fit.coefficients[target_pos];
        let sd_y = stats::std_dev(&y);
        let raw: Vec<f64> = kept
            .iter()
            .zip(&fit.coefficients)
            .map(|(&c, b)| b * sd_y / stats::std_dev(&columns[c]))
            .collect();
        let intercept = stats::mean(&y)
            - kept
                .iter()
                .zip(&raw)
                .map(|(&c, b)| b * stats::mean(&columns[c]))
                .sum::<f64>();

        let mut result = SensitivityResult::scored(key, method, n, standardized);
        result.p_value = fit.p_values.as_ref().map(|p| p[target_pos]);
        result.details = MethodDetails::Regression {
            raw_coefficient: raw[target_pos],
            standardized_coefficient: standardized,
            intercept,
            r_squared: fit.r_squared,
            predictors: p,
        };
        result
    }
}

/// Fit standardised `y` on standardised columns without an intercept.
///
/// Returns `None` when the normal equations are singular.
#[must_use]
pub fn fit(kind: RegressionKind, columns: &[Vec<f64>], y: &[f64]) -> Option<RegressionFit> {
    let n = y.len();
    let p = columns.len();
    let x = DMatrix::from_fn(n, p, |i, j| columns[j][i]);
    let yv = DVector::from_column_slice(y);

    let coefficients = match kind {
        RegressionKind::Linear => solve_normal(&x, &yv, 0.0)?,
        RegressionKind::Ridge { alpha } => solve_normal(&x, &yv, alpha.max(0.0))?,
        RegressionKind::Lasso { alpha } => coordinate_descent(columns, y, alpha.max(0.0)),
    };

    let beta = DVector::from_column_slice(&coefficients);
    let residuals = &yv - &x * &beta;
    let sse = residuals.norm_squared();
    let sst: f64 = stats::sum_squares(y);
    let r_squared = if sst > 0.0 { 1.0 - sse / sst } else { 0.0 };

    let p_values = match kind {
        RegressionKind::Linear => ols_p_values(&x, &coefficients, sse),
        RegressionKind::Ridge { .. } | RegressionKind::Lasso { .. } => None,
    };

    Some(RegressionFit {
        coefficients,
        p_values,
        r_squared,
    })
}

/// `(XᵀX + αI) β = Xᵀy`
fn solve_normal(x: &DMatrix<f64>, y: &DVector<f64>, alpha: f64) -> Option<Vec<f64>> {
    let p = x.ncols();
    let xtx = x.transpose() * x + DMatrix::<f64>::identity(p, p) * alpha;
    let xty = x.transpose() * y;
    let cholesky = xtx.cholesky()?;
    let diagonal = cholesky.l().diagonal();
    let (lo, hi) = diagonal
        .iter()
        .fold((f64::INFINITY, 0.0_f64), |(lo, hi), d| (lo.min(*d), hi.max(*d)));
    if lo.is_nan() || lo <= hi * CONDITION_FLOOR {
        return None;
    }
    let beta = cholesky.solve(&xty);
    beta.iter().all(|b| b.is_finite()).then(|| beta.iter().copied().collect())
}

fn ols_p_values(x: &DMatrix<f64>, beta: &[f64], sse: f64) -> Option<Vec<f64>> {
    let (n, p) = x.shape();
    // One extra degree of freedom for the intercept removed by centring.
    let df = n.checked_sub(p + 1).filter(|&d| d > 0)? as f64;
    let sigma2 = sse / df;
    let inverse = (x.transpose() * x).try_inverse()?;
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    Some(
        beta.iter()
            .enumerate()
            .map(|(j, b)| {
                let se = (sigma2 * inverse[(j, j)]).sqrt();
                if se > 0.0 {
                    (2.0 * (1.0 - dist.cdf((b / se).abs()))).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .collect(),
    )
}

/// Minimise `(1/2n)·||y − Xβ||² + α·||β||₁` by cyclic coordinate descent
fn coordinate_descent(columns: &[Vec<f64>], y: &[f64], alpha: f64) -> Vec<f64> {
    let n = y.len() as f64;
    let p = columns.len();
    let mut beta = vec![0.0; p];
    let mut residual = y.to_vec();
    let norms: Vec<f64> = columns
        .iter()
        .map(|c| c.iter().map(|v| v * v).sum::<f64>() / n)
        .collect();

    for _ in 0..LASSO_MAX_ITERATIONS {
        let mut max_change: f64 = 0.0;
        for j in 0..p {
            if norms[j] <= 0.0 {
                continue;
            }
            let rho = columns[j]
                .iter()
                .zip(&residual)
                .map(|(x, r)| x * r)
                .sum::<f64>()
                / n
                + norms[j] * beta[j];
            let updated = soft_threshold(rho, alpha) / norms[j];
            let change = updated - beta[j];
            if change != 0.0 {
                for (r, x) in residual.iter_mut().zip(&columns[j]) {
                    *r -= change * x;
                }
                beta[j] = updated;
                max_change = max_change.max(change.abs());
            }
        }
        if max_change < LASSO_TOLERANCE {
            break;
        }
    }
    beta
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}
