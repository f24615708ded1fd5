//! Per-pair sensitivity estimation.
//!
//! Each [`Method`] variant has exactly one [`Estimator`]; [`SensitivityEngine`]
//! dispatches with an exhaustive match and never falls back from one method
//! to another.

mod correlation;
mod elasticity;
mod mutual_info;
mod regression;
mod samples;
mod sobol;

pub use correlation::{
    CorrelationEstimator, MIN_FISHER_SAMPLES, coefficient, fisher_interval, kendall_tau_b,
    p_value,
};
pub use elasticity::{ElasticityEstimator, elasticity};
pub use mutual_info::{MutualInformationEstimator, ksg};
pub use regression::{RegressionEstimator, RegressionFit, fit};
pub use samples::{Observation, OutputIndex, SampleSet, arc_change};
pub use sobol::{
    ParameterBounds, SaltelliDesign, SobolEstimator, SobolEvaluations, SobolIndices,
    check_consistency,
};

use crate::budget::TimeBudget;
use crate::delta::UNDEFINED_EPSILON;
use crate::model::{Method, ResultFlag, SensitivityResult};

/// Knobs shared by all estimators
#[derive(Debug, Clone, PartialEq)]
pub struct EstimatorSettings {
    /// Changes at or below this magnitude count as zero
    pub epsilon: f64,
    /// Confidence intervals are reported at level `1 - alpha`
    pub alpha: f64,
    /// Scored results with fewer samples are flagged `low_confidence`
    pub low_confidence_below: usize,
    pub sobol_tolerance: f64,
    pub sobol_min_samples: usize,
    /// Seed for estimators that need noise (MI tie-breaking)
    pub seed: u64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            epsilon: UNDEFINED_EPSILON,
            alpha: 0.05,
            low_confidence_below: 3,
            sobol_tolerance: 0.05,
            sobol_min_samples: 4,
            seed: 0,
        }
    }
}

/// Everything an estimator may read for one pair
#[derive(Debug, Clone, Copy)]
pub struct EstimationContext<'a> {
    pub samples: &'a SampleSet,
    /// Saltelli evaluations of the pair's output, if any were supplied
    pub sobol: Option<&'a SobolEvaluations>,
    pub settings: &'a EstimatorSettings,
    pub budget: &'a TimeBudget,
}

/// One estimation strategy
pub trait Estimator {
    /// Score the pair, or explain through `skip_reason` why it cannot be scored
    fn estimate(&self, ctx: &EstimationContext<'_>) -> SensitivityResult;
}

/// Dispatches requested methods to their estimators
#[derive(Debug, Clone, Default)]
pub struct SensitivityEngine {
    settings: EstimatorSettings,
}

impl SensitivityEngine {
    #[must_use]
    pub fn new(settings: EstimatorSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &EstimatorSettings {
        &self.settings
    }

    /// Build the context for one pair
    #[must_use]
    pub fn context<'a>(
        &'a self,
        samples: &'a SampleSet,
        sobol: Option<&'a SobolEvaluations>,
        budget: &'a TimeBudget,
    ) -> EstimationContext<'a> {
        EstimationContext {
            samples,
            sobol,
            settings: &self.settings,
            budget,
        }
    }

    /// Run exactly the requested method and qualify the result.
    #[must_use]
    pub fn estimate(&self, method: &Method, ctx: &EstimationContext<'_>) -> SensitivityResult {
        let mut result = raw_estimate(method, ctx);

        if !result.is_skipped() && result.sample_size < self.settings.low_confidence_below {
            result.flag(ResultFlag::LowConfidence);
        }
        if ctx.samples.heuristic {
            result.flag(ResultFlag::HeuristicMatch);
        }

        match &result.skip_reason {
            Some(reason) => tracing::debug!(
                parameter = %result.key.parameter_name,
                output = %result.key.output_variable,
                method = %method.label(),
                reason = reason.code(),
                "Estimator skipped"
            ),
            None => tracing::debug!(
                parameter = %result.key.parameter_name,
                output = %result.key.output_variable,
                method = %method.label(),
                score = result.score,
                n = result.sample_size,
                "Estimator scored"
            ),
        }
        result
    }

    /// Number of independently resamplable rows behind `method`
    #[must_use]
    pub fn resample_rows(&self, method: &Method, ctx: &EstimationContext<'_>) -> usize {
        match method {
            Method::Sobol { .. } => ctx.sobol.map_or(0, SobolEvaluations::base_samples),
            _ => ctx.samples.len(),
        }
    }

    /// Re-run `method` on a bootstrap resample and return only the score
    #[must_use]
    pub fn resampled_score(
        &self,
        method: &Method,
        ctx: &EstimationContext<'_>,
        rows: &[usize],
    ) -> Option<f64> {
        match method {
            Method::Sobol { .. } => {
                let evaluations = ctx.sobol?.subset(rows);
                let sub = EstimationContext {
                    sobol: Some(&evaluations),
                    ..*ctx
                };
                raw_estimate(method, &sub).score
            }
            _ => {
                let samples = ctx.samples.subset(rows);
                let sub = EstimationContext {
                    samples: &samples,
                    ..*ctx
                };
                raw_estimate(method, &sub).score
            }
        }
    }
}

/// The one place a method is mapped to its estimator
fn raw_estimate(method: &Method, ctx: &EstimationContext<'_>) -> SensitivityResult {
    match *method {
        Method::Correlation { kind } => CorrelationEstimator { kind }.estimate(ctx),
        Method::Elasticity => ElasticityEstimator.estimate(ctx),
        Method::Regression { kind } => RegressionEstimator { kind }.estimate(ctx),
        Method::MutualInformation { k } => MutualInformationEstimator { k }.estimate(ctx),
        Method::Sobol { second_order } => SobolEstimator { second_order }.estimate(ctx),
    }
}
