//! Error taxonomy for the sensitivity engine.
//!
//! Alignment, scope and reconciliation failures abort one computation unit
//! (one building). Insufficient samples and Sobol inconsistencies are normally
//! surfaced as result states instead; the error types exist for the low-level
//! routines that report them.

use thiserror::Error;

use crate::model::{BuildingId, EntityId, VariantId};

/// Paired series or sample matrices that do not line up
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataAlignmentError {
    #[error(
        "series {entity}/{variable}: length mismatch (timestamps={timestamps}, baseline={baseline}, modified={modified})"
    )]
    LengthMismatch {
        entity: EntityId,
        variable: String,
        timestamps: usize,
        baseline: usize,
        modified: usize,
    },
    #[error("series {entity}/{variable}: timestamps differ from baseline at index {index}")]
    TimestampMismatch {
        entity: EntityId,
        variable: String,
        index: usize,
    },
    #[error("series {entity}/{variable}: duplicate timestamp {timestamp}")]
    DuplicateTimestamp {
        entity: EntityId,
        variable: String,
        timestamp: String,
    },
    #[error("series {entity}/{variable}: variant {variant} has no baseline counterpart")]
    MissingBaseline {
        entity: EntityId,
        variable: String,
        variant: VariantId,
    },
    #[error("cannot combine series of length {found} from {entity} with series of length {expected}")]
    SeriesLength {
        entity: EntityId,
        expected: usize,
        found: usize,
    },
    #[error("sobol evaluations for {output}: {what} has {found} values, expected {expected}")]
    SobolShape {
        output: String,
        what: String,
        expected: usize,
        found: usize,
    },
}

/// An entity name that cannot be placed in the building hierarchy
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScopeResolutionError {
    #[error("building {0} is not present in the relationship graph")]
    UnknownBuilding(BuildingId),
    #[error("entity {name:?} in building {building} matches no zone or equipment")]
    Unmapped { building: BuildingId, name: String },
    #[error("entity {name:?} in building {building} is ambiguous between {candidates:?}")]
    Ambiguous {
        building: BuildingId,
        name: String,
        candidates: Vec<EntityId>,
    },
}

/// Weights or cross-level totals that do not reconcile
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconciliationError {
    #[error("{method} weights for building {building} sum to {sum}, expected 1.0")]
    WeightSum {
        building: BuildingId,
        method: &'static str,
        sum: f64,
    },
    #[error("zone {zone} has invalid {quantity} {value}")]
    InvalidGeometry {
        zone: EntityId,
        quantity: &'static str,
        value: f64,
    },
    #[error("zone {zone} has no {quantity} recorded")]
    MissingGeometry {
        zone: EntityId,
        quantity: &'static str,
    },
    #[error(
        "building {building} {variable}: aggregated zone total {aggregated} disagrees with building total {reported}"
    )]
    LevelMismatch {
        building: BuildingId,
        variable: String,
        aggregated: f64,
        reported: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{what} needs at least {required} samples, got {available}")]
pub struct InsufficientSampleError {
    pub what: &'static str,
    pub required: usize,
    pub available: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "sobol indices for {parameter} violate 0 <= S1 ({first_order:.4}) <= ST ({total:.4}) <= 1 beyond tolerance {tolerance}"
)]
pub struct SobolInconsistencyError {
    pub parameter: String,
    pub first_order: f64,
    pub total: f64,
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{operation} exceeded its time budget of {budget_ms} ms")]
pub struct TimeoutError {
    pub operation: &'static str,
    pub budget_ms: u64,
}

/// Invalid mapping tables
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("zone {zone} is mapped twice in building {building}")]
    DuplicateZone { building: BuildingId, zone: EntityId },
    #[error("equipment {equipment} is assigned to more than one zone")]
    DuplicateEquipment { equipment: EntityId },
    #[error("equipment {equipment} references unknown zone {zone} in building {building}")]
    UnknownZone {
        building: BuildingId,
        zone: String,
        equipment: EntityId,
    },
    #[error("geometry row references unknown zone {zone} in building {building}")]
    UnknownGeometryZone { building: BuildingId, zone: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Scope(#[from] ScopeResolutionError),
    #[error("modification of {parameter} on {entity} has non-finite values ({original} -> {new})")]
    NonFinite {
        entity: String,
        parameter: String,
        original: f64,
        new: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    #[error("no zone reported data for {variable}")]
    NoData { variable: String },
    #[error("cannot roll up {variable}: zone deltas use {found} but {expected} was requested")]
    MixedMethods {
        variable: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error(transparent)]
    Alignment(#[from] DataAlignmentError),
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UncertaintyError {
    #[error("variance must be positive and finite, got {0}")]
    InvalidVariance(f64),
    #[error("confidence level alpha must lie in (0, 1), got {0}")]
    InvalidAlpha(f64),
    #[error(transparent)]
    Insufficient(#[from] InsufficientSampleError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

/// Analysis settings that cannot be used as given
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: f64,
    },
    #[error("request {index} lists no methods")]
    NoMethods { index: usize },
    #[error("request {index}: {method} needs k >= 1")]
    InvalidK { index: usize, method: String },
    #[error("workers must be at least 1")]
    NoWorkers,
}

/// Reason a whole computation unit (one building) was aborted
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitError {
    #[error(transparent)]
    Alignment(#[from] DataAlignmentError),
    #[error(transparent)]
    Scope(#[from] ScopeResolutionError),
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

impl UnitError {
    /// Short category name used in diagnostics tables
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            UnitError::Alignment(_) => "data_alignment",
            UnitError::Scope(_) | UnitError::Ledger(LedgerError::Scope(_)) => "scope_resolution",
            UnitError::Ledger(_) => "ledger",
            UnitError::Reconciliation(_)
            | UnitError::Aggregation(AggregationError::Reconciliation(_)) => "reconciliation",
            UnitError::Aggregation(AggregationError::Alignment(_)) => "data_alignment",
            UnitError::Aggregation(_) => "aggregation",
            UnitError::Timeout(_) => "timeout",
        }
    }
}
