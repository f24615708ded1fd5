//! Analysis configuration.
//!
//! Every field has a default so that a minimal YAML file only needs the
//! requests.

use serde::{Deserialize, Serialize};

use crate::delta::UNDEFINED_EPSILON;
use crate::error::ConfigError;
use crate::graph::WeightMethod;
use crate::model::{
    Frequency, Level, Method, ParameterCatalog, ParameterCategory, RegressionKind, VariableCatalog,
    VariableClass,
};
use crate::regional::PartitionStrategy;
use crate::sensitivity::EstimatorSettings;
use crate::threshold::ThresholdConfig;
use crate::uncertainty::UncertaintyConfig;

/// Wildcard for `parameter` / `output` in a request
pub const ALL: &str = "*";

/// One requested (level pair, parameter, output) with the methods to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub source_level: Level,
    pub target_level: Level,
    /// Parameter name or `*` for every ledger parameter
    #[serde(default = "default_wildcard")]
    pub parameter: String,
    /// Output variable or `*` for every variable with deltas
    #[serde(default = "default_wildcard")]
    pub output: String,
    pub methods: Vec<Method>,
}

fn default_wildcard() -> String {
    ALL.to_string()
}

/// Extra variable-class entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableEntry {
    pub name: String,
    pub class: VariableClass,
}

/// Extra parameter-category entry; without a level it applies everywhere
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterEntry {
    #[serde(default)]
    pub level: Option<Level>,
    pub name: String,
    pub category: ParameterCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub requests: Vec<AnalysisRequest>,
    /// Zone weights for weighted-mean roll-ups
    #[serde(default)]
    pub weight_method: WeightMethod,
    #[serde(default = "default_epsilon")]
    pub undefined_epsilon: f64,
    #[serde(default = "default_low_confidence_below")]
    pub low_confidence_below: usize,
    #[serde(default = "default_sobol_tolerance")]
    pub sobol_tolerance: f64,
    #[serde(default = "default_sobol_min_samples")]
    pub sobol_min_samples: usize,
    #[serde(default)]
    pub threshold: ThresholdConfig,
    #[serde(default)]
    pub regional: Option<PartitionStrategy>,
    #[serde(default)]
    pub uncertainty: UncertaintyConfig,
    /// Size of the worker pool (defaults to CPU count)
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Budget for each PELT, Sobol or bootstrap run
    #[serde(default)]
    pub time_budget_ms: Option<u64>,
    /// Also emit results pooled across all buildings
    #[serde(default)]
    pub pool_buildings: bool,
    /// Check aggregated zone totals against building-level series
    #[serde(default)]
    pub reconcile_levels: bool,
    #[serde(default = "default_reconcile_tolerance")]
    pub reconcile_tolerance: f64,
    /// Resample paired series to a coarser frequency before taking deltas
    #[serde(default)]
    pub frequency: Option<Frequency>,
    #[serde(default)]
    pub variables: Vec<VariableEntry>,
    #[serde(default)]
    pub parameters: Vec<ParameterEntry>,
}

fn default_epsilon() -> f64 {
    UNDEFINED_EPSILON
}

fn default_low_confidence_below() -> usize {
    3
}

fn default_sobol_tolerance() -> f64 {
    0.05
}

fn default_sobol_min_samples() -> usize {
    4
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_reconcile_tolerance() -> f64 {
    0.01
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            weight_method: WeightMethod::default(),
            undefined_epsilon: default_epsilon(),
            low_confidence_below: default_low_confidence_below(),
            sobol_tolerance: default_sobol_tolerance(),
            sobol_min_samples: default_sobol_min_samples(),
            threshold: ThresholdConfig::default(),
            regional: None,
            uncertainty: UncertaintyConfig::default(),
            workers: default_workers(),
            time_budget_ms: None,
            pool_buildings: false,
            reconcile_levels: false,
            reconcile_tolerance: default_reconcile_tolerance(),
            frequency: None,
            variables: Vec::new(),
            parameters: Vec::new(),
        }
    }
}

impl AnalysisConfig {
    /// Reject settings that would make estimators meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = |field: &'static str, value: f64| {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(ConfigError::OutOfRange {
                    field,
                    expected: "positive and finite",
                    value,
                })
            }
        };
        positive("undefined_epsilon", self.undefined_epsilon)?;
        positive("sobol_tolerance", self.sobol_tolerance)?;
        positive("reconcile_tolerance", self.reconcile_tolerance)?;
        let alpha = self.uncertainty.alpha;
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "uncertainty.alpha",
                expected: "in (0, 1)",
                value: alpha,
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        for prior in &self.uncertainty.priors {
            positive("uncertainty.priors.variance", prior.variance)?;
        }
        if let Some(penalty) = self.threshold.penalty {
            positive("threshold.penalty", penalty)?;
        }

        for (index, request) in self.requests.iter().enumerate() {
            if request.methods.is_empty() {
                return Err(ConfigError::NoMethods { index });
            }
            for method in &request.methods {
                match method {
                    Method::MutualInformation { k: 0 } => {
                        return Err(ConfigError::InvalidK {
                            index,
                            method: method.label(),
                        });
                    }
                    Method::Regression {
                        kind: RegressionKind::Ridge { alpha } | RegressionKind::Lasso { alpha },
                    } if !(alpha.is_finite() && *alpha >= 0.0) => {
                        return Err(ConfigError::OutOfRange {
                            field: "regression alpha",
                            expected: "non-negative",
                            value: *alpha,
                        });
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn estimator_settings(&self) -> EstimatorSettings {
        EstimatorSettings {
            epsilon: self.undefined_epsilon,
            alpha: self.uncertainty.alpha,
            low_confidence_below: self.low_confidence_below,
            sobol_tolerance: self.sobol_tolerance,
            sobol_min_samples: self.sobol_min_samples,
            seed: self.uncertainty.seed,
        }
    }

    /// Built-in variable classes extended with the configured entries
    #[must_use]
    pub fn variable_catalog(&self) -> VariableCatalog {
        let mut catalog = VariableCatalog::default();
        for entry in &self.variables {
            catalog.insert(&entry.name, entry.class);
        }
        catalog
    }

    #[must_use]
    pub fn parameter_catalog(&self) -> ParameterCatalog {
        let mut catalog = ParameterCatalog::default();
        for entry in &self.parameters {
            catalog.insert(entry.level, &entry.name, entry.category);
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CorrelationKind;

    #[test]
    fn test_minimal_json_uses_defaults() {
        let json = r#"{
            "requests": [{
                "source_level": "zone",
                "target_level": "zone",
                "methods": [{"method": "elasticity"}, {"method": "mutual_information"}]
            }]
        }"#;
        let config: AnalysisConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.weight_method, WeightMethod::Area);
        assert_eq!(config.undefined_epsilon, 1e-9);
        assert_eq!(config.uncertainty.bootstrap_resamples, 1000);
        assert_eq!(config.requests[0].parameter, ALL);
        assert_eq!(
            config.requests[0].methods[1],
            Method::MutualInformation { k: 3 }
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AnalysisConfig {
            workers: 2,
            ..Default::default()
        };
        config.uncertainty.alpha = 1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "uncertainty.alpha", .. })
        ));

        let config = AnalysisConfig {
            requests: vec![AnalysisRequest {
                source_level: Level::Zone,
                target_level: Level::Building,
                parameter: ALL.into(),
                output: ALL.into(),
                methods: vec![
                    Method::Correlation {
                        kind: CorrelationKind::Pearson,
                    },
                    Method::Regression {
                        kind: RegressionKind::Ridge { alpha: -1.0 },
                    },
                ],
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_catalog_extras_are_applied() {
        let config = AnalysisConfig {
            variables: vec![VariableEntry {
                name: "Custom Load".into(),
                class: VariableClass::Energy,
            }],
            ..Default::default()
        };
        let hit = config.variable_catalog().lookup("custom load").unwrap();
        assert_eq!(hit.value, VariableClass::Energy);
        assert!(!hit.heuristic);
    }
}
