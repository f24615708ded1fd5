//! Bootstrap intervals, analytical error propagation and conjugate updates.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::budget::TimeBudget;
use crate::error::{InsufficientSampleError, UncertaintyError};
use crate::stats;

/// Stated with every propagated uncertainty
pub const INDEPENDENCE_ASSUMPTION: &str = "independent relative errors in parameter and output";

/// Gaussian prior on a sensitivity score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prior {
    pub mean: f64,
    pub variance: f64,
}

/// Prior attached to one (parameter, output) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorEntry {
    pub parameter: String,
    pub output: String,
    pub mean: f64,
    pub variance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyConfig {
    /// Bootstrap replicates per result; 0 disables bootstrapping
    #[serde(default = "default_resamples")]
    pub bootstrap_resamples: usize,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default)]
    pub seed: u64,
    /// Explicit priors; pairs without one never get a posterior
    #[serde(default)]
    pub priors: Vec<PriorEntry>,
}

fn default_resamples() -> usize {
    1000
}

fn default_alpha() -> f64 {
    0.05
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        Self {
            bootstrap_resamples: default_resamples(),
            alpha: default_alpha(),
            seed: 0,
            priors: Vec::new(),
        }
    }
}

/// Percentile bootstrap interval `[P(α/2), P(1 − α/2)]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapInterval {
    pub lower: f64,
    pub upper: f64,
    pub alpha: f64,
    pub resamples: usize,
    /// Replicates for which the statistic was defined
    pub valid_resamples: usize,
    /// Standard deviation of the replicate statistics
    pub std_error: f64,
}

impl BootstrapInterval {
    #[must_use]
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagatedUncertainty {
    /// `√(σ_X,rel² + σ_Y,rel²)`
    pub relative_sigma: f64,
    /// `|score| · relative_sigma`
    pub absolute_sigma: f64,
    pub assumption: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posterior {
    pub mean: f64,
    pub variance: f64,
    pub prior: Prior,
    pub observation_variance: f64,
}

/// Uncertainty qualifiers attached to a scored result
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UncertaintyAnnotation {
    pub bootstrap: Option<BootstrapInterval>,
    pub propagated: Option<PropagatedUncertainty>,
    pub posterior: Option<Posterior>,
}

impl UncertaintyAnnotation {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bootstrap.is_none() && self.propagated.is_none() && self.posterior.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct UncertaintyQuantifier {
    config: UncertaintyConfig,
}

impl UncertaintyQuantifier {
    #[must_use]
    pub fn new(config: UncertaintyConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &UncertaintyConfig {
        &self.config
    }

    /// Explicit prior for a pair, if the caller supplied one
    #[must_use]
    pub fn prior_for(&self, parameter: &str, output: &str) -> Option<Prior> {
        self.config
            .priors
            .iter()
            .find(|p| p.parameter == parameter && p.output == output)
            .map(|p| Prior {
                mean: p.mean,
                variance: p.variance,
            })
    }

    /// Bootstrap `statistic` over `rows` resampled rows with the configured settings
    pub fn bootstrap<F>(
        &self,
        rows: usize,
        budget: &TimeBudget,
        statistic: F,
    ) -> Result<BootstrapInterval, UncertaintyError>
    where
        F: Fn(&[usize]) -> Option<f64>,
    {
        bootstrap(
            rows,
            self.config.bootstrap_resamples,
            self.config.alpha,
            self.config.seed,
            budget,
            statistic,
        )
    }
}

/// Percentile bootstrap of `statistic` evaluated on resampled row indices.
///
/// Replicate `b` draws from its own generator seeded from `seed` and `b`, so
/// results do not depend on scheduling. Replicates where the statistic is
/// undefined are dropped and counted.
pub fn bootstrap<F>(
    rows: usize,
    resamples: usize,
    alpha: f64,
    seed: u64,
    budget: &TimeBudget,
    statistic: F,
) -> Result<BootstrapInterval, UncertaintyError>
where
    F: Fn(&[usize]) -> Option<f64>,
{
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(UncertaintyError::InvalidAlpha(alpha));
    }
    if rows < 2 {
        return Err(InsufficientSampleError {
            what: "bootstrap",
            required: 2,
            available: rows,
        }
        .into());
    }

    let mut replicates = Vec::with_capacity(resamples);
    let mut indices = vec![0usize; rows];
    for b in 0..resamples {
        budget.check("bootstrap")?;
        let mut rng = replicate_rng(seed, b);
        for slot in indices.iter_mut() {
            *slot = rng.random_range(0..rows);
        }
        if let Some(value) = statistic(&indices).filter(|v| v.is_finite()) {
            replicates.push(value);
        }
    }

    if replicates.len() < 2 {
        return Err(InsufficientSampleError {
            what: "bootstrap replicates",
            required: 2,
            available: replicates.len(),
        }
        .into());
    }
    let std_error = stats::std_dev(&replicates);
    replicates.sort_by(f64::total_cmp);
    Ok(BootstrapInterval {
        lower: stats::quantile_sorted(&replicates, alpha / 2.0),
        upper: stats::quantile_sorted(&replicates, 1.0 - alpha / 2.0),
        alpha,
        resamples,
        valid_resamples: replicates.len(),
        std_error,
    })
}

fn replicate_rng(seed: u64, replicate: usize) -> SmallRng {
    SmallRng::seed_from_u64(seed ^ (replicate as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// `σ / (√n · |mean|)`; `None` for fewer than two values or a ~0 mean
#[must_use]
pub fn relative_standard_error(values: &[f64], epsilon: f64) -> Option<f64> {
    let m = stats::mean(values);
    if values.len() < 2 || !m.is_finite() || m.abs() <= epsilon {
        return None;
    }
    Some(stats::std_dev(values) / (values.len() as f64).sqrt() / m.abs())
}

/// Combine relative uncertainties assuming independence
#[must_use]
pub fn propagate(relative_x: f64, relative_y: f64, score: f64) -> PropagatedUncertainty {
    let relative_sigma = (relative_x.powi(2) + relative_y.powi(2)).sqrt();
    PropagatedUncertainty {
        relative_sigma,
        absolute_sigma: score.abs() * relative_sigma,
        assumption: INDEPENDENCE_ASSUMPTION.to_string(),
    }
}

/// Gaussian conjugate update of `prior` with one observation.
///
/// `τ = 1/σ²_prior + 1/σ²_obs`, `μ = (μ_prior/σ²_prior + obs/σ²_obs) / τ`.
pub fn bayesian_update(
    prior: Prior,
    observation: f64,
    observation_variance: f64,
) -> Result<Posterior, UncertaintyError> {
    for variance in [prior.variance, observation_variance] {
        if !(variance.is_finite() && variance > 0.0) {
            return Err(UncertaintyError::InvalidVariance(variance));
        }
    }
    let precision = 1.0 / prior.variance + 1.0 / observation_variance;
    let mean = (prior.mean / prior.variance + observation / observation_variance) / precision;
    Ok(Posterior {
        mean,
        variance: 1.0 / precision,
        prior,
        observation_variance,
    })
}
