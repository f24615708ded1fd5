//! Arc elasticity of an output with respect to a parameter.

use super::{EstimationContext, Estimator};
use crate::model::{EntityElasticity, Method, MethodDetails, SensitivityResult, SkipReason};
use crate::stats;

/// Pooled arc elasticity: the mean of per-observation `%Δoutput / %Δparameter`.
///
/// Observations whose parameter change (or output midpoint) is ~0 are
/// excluded and counted, never treated as zero elasticity.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElasticityEstimator;

impl Estimator for ElasticityEstimator {
    fn estimate(&self, ctx: &EstimationContext<'_>) -> SensitivityResult {
        let samples = ctx.samples;
        let epsilon = ctx.settings.epsilon;
        if samples.is_empty() {
            return SensitivityResult::skipped(
                samples.key.clone(),
                Method::Elasticity,
                0,
                SkipReason::NoObservations,
            );
        }

        let entities: Vec<EntityElasticity> = samples
            .observations
            .iter()
            .map(|obs| EntityElasticity {
                variant_id: obs.variant_id.clone(),
                entity_id: obs.entity_id.clone(),
                elasticity: elasticity(
                    obs.parameter_original,
                    obs.parameter_new,
                    obs.output_baseline,
                    obs.output_modified,
                    epsilon,
                ),
            })
            .collect();
        let defined: Vec<f64> = entities.iter().filter_map(|e| e.elasticity).collect();
        let excluded = entities.len() - defined.len();

        let mut result = if defined.is_empty() {
            SensitivityResult::skipped(
                samples.key.clone(),
                Method::Elasticity,
                0,
                SkipReason::NoDefinedElasticity { excluded },
            )
        } else {
            SensitivityResult::scored(
                samples.key.clone(),
                Method::Elasticity,
                defined.len(),
                stats::mean(&defined),
            )
        };
        result.excluded_count = excluded;
        result.details = MethodDetails::Elasticity { entities, excluded };
        result
    }
}

/// Arc elasticity of one observation, `None` when undefined.
///
/// The output change may be zero (elasticity 0); the parameter change may not.
#[must_use]
pub fn elasticity(
    parameter_original: f64,
    parameter_new: f64,
    output_baseline: f64,
    output_modified: f64,
    epsilon: f64,
) -> Option<f64> {
    let parameter = super::samples::arc_change(parameter_original, parameter_new, epsilon)?;
    let mid = (output_baseline + output_modified) / 2.0;
    if mid.abs() <= epsilon {
        return None;
    }
    Some(((output_modified - output_baseline) / mid.abs()) / parameter)
}
