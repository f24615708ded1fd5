//! Variance-based (Sobol) indices from Saltelli sample matrices.
//!
//! First order uses the Saltelli (2010) estimator
//! `S_i = mean(f_B · (f_ABi − f_A)) / V`, total effect uses the Jansen
//! half-squared-difference estimator `S_Ti = mean((f_A − f_ABi)²) / (2V)`,
//! where `V` is the variance of the pooled `f_A` and `f_B` evaluations.
//! Second-order indices need the `BA_i` matrices as well.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{EstimationContext, Estimator};
use crate::budget::TimeBudget;
use crate::error::{DataAlignmentError, SobolInconsistencyError, TimeoutError};
use crate::model::{BuildingId, Method, MethodDetails, ResultFlag, SensitivityResult, SkipReason};
use crate::stats;

/// Sampling range of one design parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBounds {
    pub name: String,
    pub lower: f64,
    pub upper: f64,
}

/// Saltelli sample matrices A, B (N × k) with the cross matrices derived on demand
#[derive(Debug, Clone, PartialEq)]
pub struct SaltelliDesign {
    pub parameters: Vec<ParameterBounds>,
    pub a: Vec<Vec<f64>>,
    pub b: Vec<Vec<f64>>,
    pub second_order: bool,
}

impl SaltelliDesign {
    /// Draw A and B uniformly within the bounds from a seeded generator
    #[must_use]
    pub fn generate(
        parameters: Vec<ParameterBounds>,
        base_samples: usize,
        second_order: bool,
        seed: u64,
    ) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        let draw = |rng: &mut SmallRng| -> Vec<Vec<f64>> {
            (0..base_samples)
                .map(|_| {
                    parameters
                        .iter()
                        .map(|p| p.lower + (p.upper - p.lower) * rng.random::<f64>())
                        .collect()
                })
                .collect()
        };
        let a = draw(&mut rng);
        let b = draw(&mut rng);
        Self {
            parameters,
            a,
            b,
            second_order,
        }
    }

    #[must_use]
    pub fn base_samples(&self) -> usize {
        self.a.len()
    }

    /// `N(k + 2)`, or `N(2k + 2)` with second-order matrices
    #[must_use]
    pub fn evaluation_count(&self) -> usize {
        let k = self.parameters.len();
        let per_row = if self.second_order { 2 * k + 2 } else { k + 2 };
        self.base_samples() * per_row
    }

    /// A with column `i` taken from B
    #[must_use]
    pub fn ab(&self, i: usize) -> Vec<Vec<f64>> {
        swap_column(&self.a, &self.b, i)
    }

    /// B with column `i` taken from A
    #[must_use]
    pub fn ba(&self, i: usize) -> Vec<Vec<f64>> {
        swap_column(&self.b, &self.a, i)
    }

    /// Run `model` on every design row.
    ///
    /// Aborts with [`TimeoutError`] once the budget is spent; partial
    /// evaluations are discarded.
    pub fn evaluate<F>(
        &self,
        output: &str,
        model: F,
        budget: &TimeBudget,
    ) -> Result<SobolEvaluations, TimeoutError>
    where
        F: Fn(&[f64]) -> f64 + Sync,
    {
        let k = self.parameters.len();
        let f_a = run_rows(&self.a, &model, budget)?;
        let f_b = run_rows(&self.b, &model, budget)?;
        let f_ab = (0..k)
            .map(|i| run_rows(&self.ab(i), &model, budget))
            .collect::<Result<Vec<_>, _>>()?;
        let f_ba = if self.second_order {
            Some(
                (0..k)
                    .map(|i| run_rows(&self.ba(i), &model, budget))
                    .collect::<Result<Vec<_>, _>>()?,
            )
        } else {
            None
        };
        Ok(SobolEvaluations {
            building_id: None,
            output: output.to_string(),
            parameters: self.parameters.iter().map(|p| p.name.clone()).collect(),
            f_a,
            f_b,
            f_ab,
            f_ba,
        })
    }
}

fn swap_column(base: &[Vec<f64>], other: &[Vec<f64>], i: usize) -> Vec<Vec<f64>> {
    base.iter()
        .zip(other)
        .map(|(row, donor)| {
            let mut row = row.clone();
            row[i] = donor[i];
            row
        })
        .collect()
}

#[cfg(feature = "parallel")]
fn run_rows<F>(rows: &[Vec<f64>], model: &F, budget: &TimeBudget) -> Result<Vec<f64>, TimeoutError>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    rows.par_iter()
        .map(|row| {
            budget.check("sobol evaluation")?;
            Ok(model(row))
        })
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn run_rows<F>(rows: &[Vec<f64>], model: &F, budget: &TimeBudget) -> Result<Vec<f64>, TimeoutError>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    rows.iter()
        .map(|row| {
            budget.check("sobol evaluation")?;
            Ok(model(row))
        })
        .collect()
}

/// Model outputs on a Saltelli design for one output variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SobolEvaluations {
    /// Restricts the evaluations to one building; `None` applies everywhere
    #[serde(default)]
    pub building_id: Option<BuildingId>,
    pub output: String,
    pub parameters: Vec<String>,
    pub f_a: Vec<f64>,
    pub f_b: Vec<f64>,
    /// One vector per parameter, evaluated on `AB_i`
    pub f_ab: Vec<Vec<f64>>,
    /// Evaluations on `BA_i`, present only when second order was requested
    #[serde(default)]
    pub f_ba: Option<Vec<Vec<f64>>>,
}

/// First, total and (optionally) second-order indices of all design parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SobolIndices {
    pub first_order: Vec<f64>,
    pub total_order: Vec<f64>,
    /// `(i, j, S_ij)` with `i < j`
    pub second_order: Vec<(usize, usize, f64)>,
    pub variance: f64,
}

impl SobolEvaluations {
    #[must_use]
    pub fn base_samples(&self) -> usize {
        self.f_a.len()
    }

    /// Every evaluation vector must have N entries and one per parameter
    pub fn validate(&self) -> Result<(), DataAlignmentError> {
        let n = self.f_a.len();
        let k = self.parameters.len();
        let shape = |what: &str, expected: usize, found: usize| {
            if expected == found {
                Ok(())
            } else {
                Err(DataAlignmentError::SobolShape {
                    output: self.output.clone(),
                    what: what.to_string(),
                    expected,
                    found,
                })
            }
        };
        shape("f_b", n, self.f_b.len())?;
        shape("f_ab", k, self.f_ab.len())?;
        for (i, column) in self.f_ab.iter().enumerate() {
            shape(&format!("f_ab[{}]", self.parameters[i]), n, column.len())?;
        }
        if let Some(ba) = &self.f_ba {
            shape("f_ba", k, ba.len())?;
            for (i, column) in ba.iter().enumerate() {
                shape(&format!("f_ba[{}]", self.parameters[i]), n, column.len())?;
            }
        }
        Ok(())
    }

    /// Resampled copy of the given base rows (repeats allowed)
    #[must_use]
    pub fn subset(&self, rows: &[usize]) -> Self {
        let pick = |values: &[f64]| -> Vec<f64> {
            rows.iter().filter_map(|&i| values.get(i).copied()).collect()
        };
        Self {
            building_id: self.building_id.clone(),
            output: self.output.clone(),
            parameters: self.parameters.clone(),
            f_a: pick(&self.f_a),
            f_b: pick(&self.f_b),
            f_ab: self.f_ab.iter().map(|c| pick(c)).collect(),
            f_ba: self
                .f_ba
                .as_ref()
                .map(|ba| ba.iter().map(|c| pick(c)).collect()),
        }
    }

    /// Whether these evaluations may be used for `building` (`None` = pooled)
    #[must_use]
    pub fn applies_to(&self, building: Option<&BuildingId>) -> bool {
        match (&self.building_id, building) {
            (None, _) => true,
            (Some(own), Some(b)) => own == b,
            (Some(_), None) => false,
        }
    }

    /// Indices of every parameter; `None` when the output variance is ~0
    pub fn indices(
        &self,
        second_order: bool,
        budget: &TimeBudget,
    ) -> Result<Option<SobolIndices>, TimeoutError> {
        let pooled: Vec<f64> = self.f_a.iter().chain(&self.f_b).copied().collect();
        let variance = stats::population_variance(&pooled);
        let floor = f64::EPSILON * stats::mean(&pooled).abs().max(1.0);
        if variance.is_nan() || variance <= floor {
            return Ok(None);
        }

        let mut first_order = Vec::with_capacity(self.parameters.len());
        let mut total_order = Vec::with_capacity(self.parameters.len());
        for f_ab in &self.f_ab {
            budget.check("sobol")?;
            first_order.push(first_order_index(&self.f_a, &self.f_b, f_ab, variance));
            total_order.push(total_order_index(&self.f_a, f_ab, variance));
        }

        let mut pairs = Vec::new();
        if let (true, Some(f_ba)) = (second_order, &self.f_ba) {
            let k = self.parameters.len();
            for j in 0..k {
                budget.check("sobol")?;
                for l in (j + 1)..k {
                    let joint = self
                        .f_a
                        .iter()
                        .zip(&self.f_b)
                        .zip(f_ba[j].iter().zip(&self.f_ab[l]))
                        .map(|((a, b), (ba, ab))| ba * ab - a * b)
                        .sum::<f64>()
                        / self.base_samples() as f64
                        / variance;
                    pairs.push((j, l, joint - first_order[j] - first_order[l]));
                }
            }
        }

        Ok(Some(SobolIndices {
            first_order,
            total_order,
            second_order: pairs,
            variance,
        }))
    }
}

fn first_order_index(f_a: &[f64], f_b: &[f64], f_ab: &[f64], variance: f64) -> f64 {
    let n = f_a.len() as f64;
    f_b.iter()
        .zip(f_ab.iter().zip(f_a))
        .map(|(b, (ab, a))| b * (ab - a))
        .sum::<f64>()
        / n
        / variance
}

fn total_order_index(f_a: &[f64], f_ab: &[f64], variance: f64) -> f64 {
    let n = f_a.len() as f64;
    f_a.iter()
        .zip(f_ab)
        .map(|(a, ab)| (a - ab).powi(2))
        .sum::<f64>()
        / (2.0 * n)
        / variance
}

/// `0 ≤ S_i ≤ S_Ti ≤ 1`, each inequality allowed to fail by `tolerance`
pub fn check_consistency(
    parameter: &str,
    first_order: f64,
    total: f64,
    tolerance: f64,
) -> Result<(), SobolInconsistencyError> {
    let ok = first_order >= -tolerance
        && first_order <= total + tolerance
        && total <= 1.0 + tolerance
        && first_order.is_finite()
        && total.is_finite();
    if ok {
        Ok(())
    } else {
        Err(SobolInconsistencyError {
            parameter: parameter.to_string(),
            first_order,
            total,
            tolerance,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SobolEstimator {
    pub second_order: bool,
}

impl Estimator for SobolEstimator {
    fn estimate(&self, ctx: &EstimationContext<'_>) -> SensitivityResult {
        let method = Method::Sobol {
            second_order: self.second_order,
        };
        let key = ctx.samples.key.clone();
        let Some(evaluations) = ctx.sobol else {
            return SensitivityResult::skipped(key, method, 0, SkipReason::MissingSobolDesign);
        };
        let Some(index) = evaluations
            .parameters
            .iter()
            .position(|p| p == &key.parameter_name)
        else {
            return SensitivityResult::skipped(key, method, 0, SkipReason::MissingSobolDesign);
        };
        if let Err(err) = evaluations.validate() {
            tracing::warn!(error = %err, "Ignoring malformed Saltelli evaluations");
            return SensitivityResult::skipped(key, method, 0, SkipReason::MissingSobolDesign);
        }

        let n = evaluations.base_samples();
        let required = ctx.settings.sobol_min_samples;
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

        let indices = match evaluations.indices(self.second_order, ctx.budget) {
            Ok(Some(indices)) => indices,
            Ok(None) => {
                return SensitivityResult::skipped(
                    key.clone(),
                    method,
                    n,
                    SkipReason::ZeroVariance {
                        variable: key.output_variable,
                    },
                );
            }
            Err(err) => {
                tracing::warn!(error = %err, "Sobol decomposition timed out");
                return SensitivityResult::skipped(
                    key,
                    method,
                    n,
                    SkipReason::TimedOut {
                        budget_ms: err.budget_ms,
                    },
                );
            }
        };

        let first = indices.first_order[index];
        let total = indices.total_order[index];
        let mut result = SensitivityResult::scored(key, method, n, total);
        if let Err(err) = check_consistency(
            &result.key.parameter_name,
            first,
            total,
            ctx.settings.sobol_tolerance,
        ) {
            tracing::warn!(error = %err, "Sobol indices inconsistent");
            result.flag(ResultFlag::SobolInconsistent);
        }
        if self.second_order && evaluations.f_ba.is_none() {
            result.flag(ResultFlag::InsufficientData);
        }
        result.details = MethodDetails::Sobol {
            first_order: first,
            total_order: total,
            second_order: indices
                .second_order
                .iter()
                .filter(|(j, l, _)| *j == index || *l == index)
                .map(|&(j, l, s)| {
                    let other = if j == index { l } else { j };
                    (evaluations.parameters[other].clone(), s)
                })
                .collect(),
            base_samples: n,
        };
        result
    }
}
