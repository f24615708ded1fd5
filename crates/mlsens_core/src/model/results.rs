//! Sensitivity results and per-unit diagnostics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{BuildingId, EntityId, Level, VariantId};
use crate::regional::RegionalSummary;
use crate::threshold::Breakpoint;
use crate::uncertainty::UncertaintyAnnotation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationKind {
    Pearson,
    Spearman,
    Kendall,
}

/// Regression flavour; regularisation strength is always caller supplied
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegressionKind {
    Linear,
    Ridge { alpha: f64 },
    Lasso { alpha: f64 },
}

/// Estimation method requested for a (parameter, output) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Method {
    Correlation { kind: CorrelationKind },
    Elasticity,
    Regression { kind: RegressionKind },
    MutualInformation {
        #[serde(default = "default_mi_k")]
        k: usize,
    },
    Sobol {
        #[serde(default)]
        second_order: bool,
    },
}

fn default_mi_k() -> usize {
    3
}

impl Method {
    /// Stable label used in output tables
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Method::Correlation { kind } => match kind {
                CorrelationKind::Pearson => "correlation_pearson".to_string(),
                CorrelationKind::Spearman => "correlation_spearman".to_string(),
                CorrelationKind::Kendall => "correlation_kendall".to_string(),
            },
            Method::Elasticity => "elasticity".to_string(),
            Method::Regression { kind } => match kind {
                RegressionKind::Linear => "regression_linear".to_string(),
                RegressionKind::Ridge { alpha } => format!("regression_ridge(alpha={alpha})"),
                RegressionKind::Lasso { alpha } => format!("regression_lasso(alpha={alpha})"),
            },
            Method::MutualInformation { k } => format!("mutual_information(k={k})"),
            Method::Sobol { second_order } => {
                if *second_order {
                    "sobol(second_order)".to_string()
                } else {
                    "sobol".to_string()
                }
            }
        }
    }
}

/// Why an estimator produced no score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    NoObservations,
    InsufficientSamples { required: usize, available: usize },
    ZeroVariance { variable: String },
    NoDefinedElasticity { excluded: usize },
    KTooLarge { k: usize, n: usize },
    SingularDesign,
    MissingSobolDesign,
    TimedOut { budget_ms: u64 },
    UnitFailed { kind: String, message: String },
}

impl SkipReason {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            SkipReason::NoObservations => "no_observations",
            SkipReason::InsufficientSamples { .. } => "insufficient_samples",
            SkipReason::ZeroVariance { .. } => "zero_variance",
            SkipReason::NoDefinedElasticity { .. } => "no_defined_elasticity",
            SkipReason::KTooLarge { .. } => "k_too_large",
            SkipReason::SingularDesign => "singular_design",
            SkipReason::MissingSobolDesign => "missing_sobol_design",
            SkipReason::TimedOut { .. } => "timed_out",
            SkipReason::UnitFailed { .. } => "unit_failed",
        }
    }

    /// Human-readable explanation for report tables
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            SkipReason::NoObservations => "no paired observations for this pair".to_string(),
            SkipReason::InsufficientSamples {
                required,
                available,
            } => format!("needs {required} samples, got {available}"),
            SkipReason::ZeroVariance { variable } => format!("{variable} has zero variance"),
            SkipReason::NoDefinedElasticity { excluded } => {
                format!("all {excluded} observations had no parameter change")
            }
            SkipReason::KTooLarge { k, n } => format!("k={k} must be below n/2 (n={n})"),
            SkipReason::SingularDesign => "regression design matrix is singular".to_string(),
            SkipReason::MissingSobolDesign => {
                "no Saltelli evaluations supplied for this output".to_string()
            }
            SkipReason::TimedOut { budget_ms } => format!("exceeded time budget of {budget_ms} ms"),
            SkipReason::UnitFailed { kind, message } => format!("{kind}: {message}"),
        }
    }
}

/// Qualifiers attached to a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultFlag {
    LowConfidence,
    InsufficientData,
    SobolInconsistent,
    HeuristicMatch,
    TimedOut,
}

impl ResultFlag {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ResultFlag::LowConfidence => "low_confidence",
            ResultFlag::InsufficientData => "insufficient_data",
            ResultFlag::SobolInconsistent => "sobol_inconsistent",
            ResultFlag::HeuristicMatch => "heuristic_match",
            ResultFlag::TimedOut => "timed_out",
        }
    }
}

/// Arc elasticity of one (variant, entity) observation; `None` when undefined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityElasticity {
    pub variant_id: VariantId,
    pub entity_id: EntityId,
    pub elasticity: Option<f64>,
}

/// Method-specific values reported next to the headline score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "details", rename_all = "snake_case")]
pub enum MethodDetails {
    #[default]
    None,
    Correlation {
        kind: CorrelationKind,
    },
    Elasticity {
        entities: Vec<EntityElasticity>,
        excluded: usize,
    },
    Regression {
        raw_coefficient: f64,
        standardized_coefficient: f64,
        intercept: f64,
        r_squared: f64,
        predictors: usize,
    },
    MutualInformation {
        k: usize,
    },
    Sobol {
        first_order: f64,
        total_order: f64,
        /// Second-order indices against the other design parameters
        second_order: Vec<(String, f64)>,
        base_samples: usize,
    },
}

/// Identity of a (level pair, parameter, output) computation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    /// `None` for results pooled across buildings
    pub building_id: Option<BuildingId>,
    pub source_level: Level,
    pub target_level: Level,
    pub parameter_name: String,
    pub output_variable: String,
}

/// One row of the sensitivity result table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityResult {
    pub key: PairKey,
    pub method: Method,
    pub score: Option<f64>,
    pub confidence_interval: Option<(f64, f64)>,
    pub p_value: Option<f64>,
    pub sample_size: usize,
    /// Observations excluded as undefined (e.g. zero parameter change)
    pub excluded_count: usize,
    pub flags: Vec<ResultFlag>,
    pub skip_reason: Option<SkipReason>,
    pub details: MethodDetails,
    pub breakpoints: Vec<Breakpoint>,
    pub regional: Option<RegionalSummary>,
    pub uncertainty: Option<UncertaintyAnnotation>,
    pub rank: Option<usize>,
}

impl SensitivityResult {
    #[must_use]
    pub fn skipped(key: PairKey, method: Method, sample_size: usize, reason: SkipReason) -> Self {
        let mut result = Self::empty(key, method, sample_size);
        if matches!(reason, SkipReason::TimedOut { .. }) {
            result.flag(ResultFlag::TimedOut);
        }
        result.skip_reason = Some(reason);
        result
    }

    #[must_use]
    pub fn scored(key: PairKey, method: Method, sample_size: usize, score: f64) -> Self {
        let mut result = Self::empty(key, method, sample_size);
        result.score = Some(score);
        result
    }

    fn empty(key: PairKey, method: Method, sample_size: usize) -> Self {
        Self {
            key,
            method,
            score: None,
            confidence_interval: None,
            p_value: None,
            sample_size,
            excluded_count: 0,
            flags: Vec::new(),
            skip_reason: None,
            details: MethodDetails::None,
            breakpoints: Vec::new(),
            regional: None,
            uncertainty: None,
            rank: None,
        }
    }

    /// Add a flag once
    pub fn flag(&mut self, flag: ResultFlag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
            self.flags.sort();
        }
    }

    #[must_use]
    pub fn has_flag(&self, flag: ResultFlag) -> bool {
        self.flags.contains(&flag)
    }

    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.score.is_none()
    }
}

/// Completeness of one building-level roll-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageEntry {
    pub variant_id: VariantId,
    pub variable_name: String,
    pub coverage_fraction: f64,
}

/// A unit that was aborted, with the reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub kind: String,
    pub message: String,
}

/// Per-building account of what was skipped or degraded.
///
/// Each computation returns its own value; callers merge them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub building_id: Option<BuildingId>,
    pub results_emitted: usize,
    pub skipped: BTreeMap<String, usize>,
    pub flagged: BTreeMap<String, usize>,
    pub unit_errors: Vec<UnitFailure>,
    pub undefined_points: usize,
    pub heuristic_matches: Vec<String>,
    pub coverage: Vec<CoverageEntry>,
}

impl Diagnostics {
    #[must_use]
    pub fn for_building(building_id: &BuildingId) -> Self {
        Self {
            building_id: Some(building_id.clone()),
            ..Default::default()
        }
    }

    pub fn record_result(&mut self, result: &SensitivityResult) {
        self.results_emitted += 1;
        if let Some(reason) = &result.skip_reason {
            *self.skipped.entry(reason.code().to_string()).or_default() += 1;
        }
        for flag in &result.flags {
            *self.flagged.entry(flag.as_str().to_string()).or_default() += 1;
        }
    }

    pub fn record_heuristic(&mut self, description: String) {
        if !self.heuristic_matches.contains(&description) {
            self.heuristic_matches.push(description);
        }
    }

    pub fn merge(&mut self, other: Diagnostics) {
        if self.building_id.is_none() {
            self.building_id = other.building_id;
        }
        self.results_emitted += other.results_emitted;
        for (reason, count) in other.skipped {
            *self.skipped.entry(reason).or_default() += count;
        }
        for (flag, count) in other.flagged {
            *self.flagged.entry(flag).or_default() += count;
        }
        self.unit_errors.extend(other.unit_errors);
        self.undefined_points += other.undefined_points;
        for h in other.heuristic_matches {
            self.record_heuristic(h);
        }
        self.coverage.extend(other.coverage);
    }
}
