mod catalog;
mod ids;
mod results;
mod series;

pub use catalog::{
    AggregationMethod, CatalogMatch, ParameterCatalog, ParameterCategory, VariableCatalog,
    VariableClass,
};
pub use ids::{BASELINE_VARIANT, BuildingId, EntityId, Level, VariantId};
pub use results::{
    CorrelationKind, CoverageEntry, Diagnostics, EntityElasticity, Method, MethodDetails, PairKey,
    RegressionKind, ResultFlag, SensitivityResult, SkipReason, UnitFailure,
};
pub use series::{
    Frequency, PairedSeries, SeriesRow, Timeline, TimelineKey, collect_timelines, reduce,
};
