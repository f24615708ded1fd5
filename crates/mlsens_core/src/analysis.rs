//! End-to-end analysis: tables in, ranked and qualified results out.
//!
//! Each building is an independent computation unit. A unit that fails with
//! an alignment, scope, ledger or reconciliation error contributes an
//! explicit `unit_failed` result for each of its requested pairs, so every
//! requested (level pair, parameter, output, method) appears exactly once.

use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use thiserror::Error;

use crate::aggregate::{AggregationEngine, reconcile};
use crate::budget::TimeBudget;
use crate::config::{ALL, AnalysisConfig};
use crate::delta::{DeltaCalculator, DeltaRecord};
use crate::error::{ConfigError, DataAlignmentError, GraphError, UncertaintyError, UnitError};
use crate::graph::{
    EquipmentAssignmentRow, RelationshipGraph, ScopeResolution, ZoneGeometryRow, ZoneMappingRow,
};
use crate::ledger::{LedgerRow, ModificationLedger, ModificationRecord};
use crate::model::{
    AggregationMethod, BuildingId, CoverageEntry, Diagnostics, Level, Method, PairKey,
    PairedSeries, ParameterCatalog, ResultFlag, SensitivityResult, SeriesRow, SkipReason,
    TimelineKey, UnitFailure, VariableCatalog, VariantId, collect_timelines,
};
use crate::regional::RegionalAnalyzer;
use crate::sensitivity::{
    EstimationContext, OutputIndex, SampleSet, SensitivityEngine, SobolEvaluations,
};
use crate::threshold::ThresholdDetector;
use crate::uncertainty::{
    UncertaintyAnnotation, UncertaintyQuantifier, bayesian_update, propagate,
    relative_standard_error,
};

/// The tabular inputs of one analysis run
#[derive(Debug, Clone, Default)]
pub struct AnalysisInputs {
    pub zones: Vec<ZoneMappingRow>,
    pub equipment: Vec<EquipmentAssignmentRow>,
    pub geometry: Vec<ZoneGeometryRow>,
    pub series: Vec<SeriesRow>,
    pub ledger: Vec<LedgerRow>,
    pub sobol: Vec<SobolEvaluations>,
}

/// Problems that prevent the run from starting at all
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("invalid analysis configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid mapping tables: {0}")]
    Graph(#[from] GraphError),
    #[error("malformed Saltelli evaluations: {0}")]
    Sobol(#[from] DataAlignmentError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisReport {
    pub results: Vec<SensitivityResult>,
    /// One entry per building, plus one for pooled results when enabled
    pub diagnostics: Vec<Diagnostics>,
}

impl AnalysisReport {
    /// All diagnostics merged into one
    #[must_use]
    pub fn totals(&self) -> Diagnostics {
        let mut total = Diagnostics::default();
        for d in &self.diagnostics {
            total.merge(d.clone());
        }
        total.building_id = None;
        total
    }
}

/// (source level, target level, parameter, output)
type PlanKey = (Level, Level, String, String);

/// One expanded request with the methods to run on it
#[derive(Debug, Clone, PartialEq)]
struct PairPlan {
    source_level: Level,
    target_level: Level,
    parameter: String,
    output: String,
    methods: Vec<Method>,
}

impl PairPlan {
    fn key(&self) -> PlanKey {
        (
            self.source_level,
            self.target_level,
            self.parameter.clone(),
            self.output.clone(),
        )
    }

    fn pair_key(&self, building: Option<&BuildingId>) -> PairKey {
        PairKey {
            building_id: building.cloned(),
            source_level: self.source_level,
            target_level: self.target_level,
            parameter_name: self.parameter.clone(),
            output_variable: self.output.clone(),
        }
    }
}

/// Everything one building unit reads
struct BuildingInput {
    building: BuildingId,
    ledger: Vec<LedgerRow>,
    series: Vec<SeriesRow>,
    plans: Vec<PairPlan>,
}

/// Deltas and modifications of one building, ready for estimation
struct PreparedUnit {
    records: Vec<ModificationRecord>,
    outputs: OutputIndex,
}

struct UnitOutcome {
    results: Vec<SensitivityResult>,
    diagnostics: Diagnostics,
    samples: BTreeMap<PlanKey, SampleSet>,
}

/// Run the whole pipeline with a bounded worker pool.
pub fn run_analysis(
    config: &AnalysisConfig,
    inputs: &AnalysisInputs,
) -> Result<AnalysisReport, AnalysisError> {
    config.validate()?;
    for evaluations in &inputs.sobol {
        evaluations.validate()?;
    }
    let graph = RelationshipGraph::from_tables(&inputs.zones, &inputs.equipment, &inputs.geometry)?;
    let analyzer = Analyzer::new(config, graph, &inputs.sobol);
    let units = analyzer.units(inputs);
    tracing::info!(
        buildings = units.len(),
        ledger_rows = inputs.ledger.len(),
        series_rows = inputs.series.len(),
        "Starting sensitivity analysis"
    );

    #[cfg(feature = "parallel")]
    let outcomes = match rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build()
    {
        Ok(pool) => pool.install(|| analyzer.run_units(&units)),
        Err(err) => {
            tracing::warn!(error = %err, "Could not build worker pool, using the global pool");
            analyzer.run_units(&units)
        }
    };
    #[cfg(not(feature = "parallel"))]
    let outcomes = analyzer.run_units(&units);

    let mut report = AnalysisReport::default();
    let mut pooled_samples: BTreeMap<PlanKey, Vec<SampleSet>> = BTreeMap::new();
    let mut pooled_plans: BTreeMap<PlanKey, PairPlan> = BTreeMap::new();
    for (unit, outcome) in units.iter().zip(outcomes) {
        report.results.extend(outcome.results);
        report.diagnostics.push(outcome.diagnostics);
        for (key, samples) in outcome.samples {
            pooled_samples.entry(key).or_default().push(samples);
        }
        for plan in &unit.plans {
            merge_plan(&mut pooled_plans, plan.clone());
        }
    }

    if config.pool_buildings {
        let (results, diagnostics) = analyzer.run_pooled(&pooled_plans, &pooled_samples);
        report.results.extend(results);
        report.diagnostics.push(diagnostics);
    }

    rank_results(&mut report.results);
    let totals = report.totals();
    tracing::info!(
        results = totals.results_emitted,
        skipped = totals.skipped.values().sum::<usize>(),
        failed_units = totals.unit_errors.len(),
        "Sensitivity analysis complete"
    );
    Ok(report)
}

/// Rank scored results by |score| within (building, level pair, output, method)
pub fn rank_results(results: &mut [SensitivityResult]) {
    let mut groups: BTreeMap<(Option<BuildingId>, Level, Level, String, String), Vec<usize>> =
        BTreeMap::new();
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = None;
        if result.score.is_some() {
            groups
                .entry((
                    result.key.building_id.clone(),
                    result.key.source_level,
                    result.key.target_level,
                    result.key.output_variable.clone(),
                    result.method.label(),
                ))
                .or_default()
                .push(i);
        }
    }
    for mut members in groups.into_values() {
        members.sort_by(|&a, &b| {
            let sa = results[a].score.map_or(0.0, f64::abs);
            let sb = results[b].score.map_or(0.0, f64::abs);
            sb.total_cmp(&sa)
                .then_with(|| results[a].key.parameter_name.cmp(&results[b].key.parameter_name))
        });
        for (rank, i) in members.into_iter().enumerate() {
            results[i].rank = Some(rank + 1);
        }
    }
}

/// Add `plan` to `plans`, keeping each method at most once per pair
fn merge_plan(plans: &mut BTreeMap<PlanKey, PairPlan>, plan: PairPlan) {
    let PairPlan { methods, .. } = plan.clone();
    let entry = plans.entry(plan.key()).or_insert(PairPlan {
        methods: Vec::new(),
        ..plan
    });
    for method in methods {
        if !entry.methods.contains(&method) {
            entry.methods.push(method);
        }
    }
}

struct Analyzer<'a> {
    config: &'a AnalysisConfig,
    graph: RelationshipGraph,
    sobol: &'a [SobolEvaluations],
    engine: SensitivityEngine,
    detector: ThresholdDetector,
    regional: Option<RegionalAnalyzer>,
    quantifier: UncertaintyQuantifier,
    variables: VariableCatalog,
    parameters: ParameterCatalog,
    budget: TimeBudget,
}

impl<'a> Analyzer<'a> {
    fn new(
        config: &'a AnalysisConfig,
        graph: RelationshipGraph,
        sobol: &'a [SobolEvaluations],
    ) -> Self {
        Self {
            config,
            graph,
            sobol,
            engine: SensitivityEngine::new(config.estimator_settings()),
            detector: ThresholdDetector::new(config.threshold.clone()),
            regional: config.regional.map(RegionalAnalyzer::new),
            quantifier: UncertaintyQuantifier::new(config.uncertainty.clone()),
            variables: config.variable_catalog(),
            parameters: config.parameter_catalog(),
            budget: TimeBudget::from_millis(config.time_budget_ms),
        }
    }

    /// Split the input tables by building and expand each building's requests
    fn units(&self, inputs: &AnalysisInputs) -> Vec<BuildingInput> {
        let buildings: BTreeSet<BuildingId> = self
            .graph
            .buildings()
            .cloned()
            .chain(inputs.ledger.iter().map(|r| r.building_id.clone()))
            .chain(inputs.series.iter().map(|r| r.building_id.clone()))
            .collect();

        buildings
            .into_iter()
            .map(|building| {
                let ledger: Vec<LedgerRow> = inputs
                    .ledger
                    .iter()
                    .filter(|r| r.building_id == building)
                    .cloned()
                    .collect();
                let series: Vec<SeriesRow> = inputs
                    .series
                    .iter()
                    .filter(|r| r.building_id == building)
                    .cloned()
                    .collect();
                let parameters: BTreeSet<String> =
                    ledger.iter().map(|r| r.parameter_name.clone()).collect();
                let outputs: BTreeSet<String> =
                    series.iter().map(|r| r.variable_name.clone()).collect();
                let plans = self.expand(&parameters, &outputs);
                BuildingInput {
                    building,
                    ledger,
                    series,
                    plans,
                }
            })
            .collect()
    }

    fn expand(&self, parameters: &BTreeSet<String>, outputs: &BTreeSet<String>) -> Vec<PairPlan> {
        let mut plans: BTreeMap<PlanKey, PairPlan> = BTreeMap::new();
        for request in &self.config.requests {
            let chosen_parameters: Vec<String> = if request.parameter == ALL {
                parameters.iter().cloned().collect()
            } else {
                vec![request.parameter.clone()]
            };
            let chosen_outputs: Vec<String> = if request.output == ALL {
                outputs.iter().cloned().collect()
            } else {
                vec![request.output.clone()]
            };
            for parameter in &chosen_parameters {
                for output in &chosen_outputs {
                    merge_plan(
                        &mut plans,
                        PairPlan {
                            source_level: request.source_level,
                            target_level: request.target_level,
                            parameter: parameter.clone(),
                            output: output.clone(),
                            methods: request.methods.clone(),
                        },
                    );
                }
            }
        }
        plans.into_values().collect()
    }

    #[cfg(feature = "parallel")]
    fn run_units(&self, units: &[BuildingInput]) -> Vec<UnitOutcome> {
        units.par_iter().map(|unit| self.run_unit(unit)).collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn run_units(&self, units: &[BuildingInput]) -> Vec<UnitOutcome> {
        units.iter().map(|unit| self.run_unit(unit)).collect()
    }

    fn run_unit(&self, unit: &BuildingInput) -> UnitOutcome {
        let span = tracing::info_span!("building", building = %unit.building);
        let _guard = span.enter();
        let mut diagnostics = Diagnostics::for_building(&unit.building);

        match self.prepare(unit, &mut diagnostics) {
            Ok(prepared) => {
                let (results, samples) = self.evaluate_unit(unit, &prepared);
                for result in &results {
                    diagnostics.record_result(result);
                }
                UnitOutcome {
                    results,
                    diagnostics,
                    samples,
                }
            }
            Err(err) => {
                tracing::warn!(kind = err.kind(), error = %err, "Building unit aborted");
                let reason = SkipReason::UnitFailed {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                };
                diagnostics.unit_errors.push(UnitFailure {
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                });
                let results: Vec<SensitivityResult> = unit
                    .plans
                    .iter()
                    .flat_map(|plan| {
                        let key = plan.pair_key(Some(&unit.building));
                        let reason = reason.clone();
                        plan.methods.iter().map(move |method| {
                            SensitivityResult::skipped(key.clone(), *method, 0, reason.clone())
                        })
                    })
                    .collect();
                for result in &results {
                    diagnostics.record_result(result);
                }
                UnitOutcome {
                    results,
                    diagnostics,
                    samples: BTreeMap::new(),
                }
            }
        }
    }

    /// Ledger resolution, series pairing, deltas and the zone → building roll-up
    fn prepare(
        &self,
        unit: &BuildingInput,
        diagnostics: &mut Diagnostics,
    ) -> Result<PreparedUnit, UnitError> {
        let building = &unit.building;
        let ledger = ModificationLedger::load(&unit.ledger, &self.graph, &self.parameters)?;
        for record in ledger.records().iter().filter(|r| r.heuristic_match) {
            diagnostics.record_heuristic(format!(
                "modification entity {} resolved as equipment of {}",
                record.entity_name,
                record.parent_chain.first().map_or("?", |z| z.0.as_str())
            ));
        }

        let timelines = collect_timelines(&unit.series)?;
        let mut keys: Vec<&TimelineKey> = timelines
            .keys()
            .filter(|k| !k.variant_id.is_baseline())
            .collect();
        keys.sort();

        let calculator = DeltaCalculator::new(self.config.undefined_epsilon);
        let mut scopes: BTreeMap<&str, ScopeResolution> = BTreeMap::new();
        let mut deltas: Vec<DeltaRecord> = Vec::new();
        for key in keys {
            let Some(class) = self.variables.lookup(&key.variable_name) else {
                tracing::warn!(variable = %key.variable_name, "Unknown output variable class, skipping");
                continue;
            };
            if class.heuristic {
                diagnostics.record_heuristic(format!(
                    "variable {} classified as {:?}",
                    key.variable_name, class.value
                ));
            }
            let baseline_key = TimelineKey {
                variant_id: VariantId::baseline(),
                ..key.clone()
            };
            let baseline =
                timelines
                    .get(&baseline_key)
                    .ok_or_else(|| DataAlignmentError::MissingBaseline {
                        entity: key.entity_name.as_str().into(),
                        variable: key.variable_name.clone(),
                        variant: key.variant_id.clone(),
                    })?;
            let scope = match scopes.get(key.entity_name.as_str()) {
                Some(scope) => scope.clone(),
                None => {
                    let scope = self.graph.resolve_scope(building, &key.entity_name)?;
                    if scope.heuristic {
                        diagnostics.record_heuristic(format!(
                            "series entity {} resolved as equipment of {}",
                            key.entity_name,
                            scope.owning_zone().map_or("?", |z| z.0.as_str())
                        ));
                    }
                    scopes.insert(key.entity_name.as_str(), scope.clone());
                    scope
                }
            };
            let mut series = PairedSeries::align(
                building.clone(),
                key.variant_id.clone(),
                scope.entity_id.clone(),
                &key.variable_name,
                baseline,
                &timelines[key],
            )?;
            if let Some(frequency) = self.config.frequency {
                series = series.resample(frequency, class.value.aggregation());
            }
            let record = calculator.compute(&series, scope.level, class.value);
            diagnostics.undefined_points += record.undefined_count;
            deltas.push(record);
        }

        let rolled_up = self.roll_up(building, &deltas, diagnostics)?;
        let mut outputs = OutputIndex::default();
        for record in deltas.iter().chain(&rolled_up) {
            outputs.insert(record);
        }
        Ok(PreparedUnit {
            records: ledger.records().to_vec(),
            outputs,
        })
    }

    /// Building-level records aggregated from zones where none were reported
    fn roll_up(
        &self,
        building: &BuildingId,
        deltas: &[DeltaRecord],
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<DeltaRecord>, UnitError> {
        let mut zones: BTreeMap<(VariantId, String), Vec<&DeltaRecord>> = BTreeMap::new();
        let mut reported: BTreeMap<(VariantId, String), &DeltaRecord> = BTreeMap::new();
        for record in deltas {
            let key = (record.variant_id.clone(), record.variable_name.clone());
            match record.level {
                Level::Zone => zones.entry(key).or_default().push(record),
                Level::Building => {
                    reported.insert(key, record);
                }
                Level::Equipment => {}
            }
        }

        let engine = AggregationEngine::new(&self.graph, self.config.weight_method);
        let mut rolled_up = Vec::new();
        for (key, members) in zones {
            let method = members[0].aggregation_method;
            let aggregated = engine.aggregate_building(building, &key.1, &members, method)?;
            diagnostics.coverage.push(CoverageEntry {
                variant_id: key.0.clone(),
                variable_name: key.1.clone(),
                coverage_fraction: aggregated.coverage_fraction,
            });
            match reported.get(&key) {
                Some(reported) => {
                    if self.config.reconcile_levels && method == AggregationMethod::Sum {
                        reconcile(&aggregated, reported, self.config.reconcile_tolerance)?;
                    }
                }
                None => rolled_up.push(aggregated),
            }
        }
        Ok(rolled_up)
    }

    fn evaluate_unit(
        &self,
        unit: &BuildingInput,
        prepared: &PreparedUnit,
    ) -> (Vec<SensitivityResult>, BTreeMap<PlanKey, SampleSet>) {
        let records: Vec<&ModificationRecord> = prepared.records.iter().collect();
        let evaluated = self.map_plans(&unit.plans, |plan| {
            let samples = SampleSet::collect(
                plan.pair_key(Some(&unit.building)),
                &unit.building,
                &records,
                &prepared.outputs,
                &self.graph,
            );
            let results = self.estimate_plan(plan, &samples, Some(&unit.building));
            (plan.key(), samples, results)
        });

        let mut results = Vec::new();
        let mut samples = BTreeMap::new();
        for (key, set, plan_results) in evaluated {
            results.extend(plan_results);
            samples.insert(key, set);
        }
        (results, samples)
    }

    fn run_pooled(
        &self,
        plans: &BTreeMap<PlanKey, PairPlan>,
        samples: &BTreeMap<PlanKey, Vec<SampleSet>>,
    ) -> (Vec<SensitivityResult>, Diagnostics) {
        let span = tracing::info_span!("pooled");
        let _guard = span.enter();
        let plans: Vec<PairPlan> = plans.values().cloned().collect();
        let results: Vec<SensitivityResult> = self
            .map_plans(&plans, |plan| {
                let sets: Vec<&SampleSet> = samples
                    .get(&plan.key())
                    .map(|s| s.iter().collect())
                    .unwrap_or_default();
                let pooled = SampleSet::pooled(plan.pair_key(None), &sets);
                self.estimate_plan(plan, &pooled, None)
            })
            .into_iter()
            .flatten()
            .collect();
        let mut diagnostics = Diagnostics::default();
        for result in &results {
            diagnostics.record_result(result);
        }
        (results, diagnostics)
    }

    #[cfg(feature = "parallel")]
    fn map_plans<R, F>(&self, plans: &[PairPlan], f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(&PairPlan) -> R + Sync + Send,
    {
        plans.par_iter().map(f).collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn map_plans<R, F>(&self, plans: &[PairPlan], f: F) -> Vec<R>
    where
        F: Fn(&PairPlan) -> R,
    {
        plans.iter().map(f).collect()
    }

    fn sobol_for(&self, building: Option<&BuildingId>, output: &str) -> Option<&SobolEvaluations> {
        // Building-specific evaluations win over shared ones.
        self.sobol
            .iter()
            .filter(|e| e.output == output && e.applies_to(building))
            .max_by_key(|e| e.building_id.is_some())
    }

    fn estimate_plan(
        &self,
        plan: &PairPlan,
        samples: &SampleSet,
        building: Option<&BuildingId>,
    ) -> Vec<SensitivityResult> {
        let sobol = self.sobol_for(building, &plan.output);
        plan.methods
            .iter()
            .map(|method| {
                let budget = self.budget.restarted();
                let ctx = self.engine.context(samples, sobol, &budget);
                let mut result = self.engine.estimate(method, &ctx);
                self.annotate(&mut result, method, &ctx);
                result
            })
            .collect()
    }

    /// Breakpoints, regional statistics and uncertainty for a scored result
    fn annotate(&self, result: &mut SensitivityResult, method: &Method, ctx: &EstimationContext<'_>) {
        let Some(score) = result.score else {
            return;
        };
        let is_sobol = matches!(method, Method::Sobol { .. });
        let x = ctx.samples.parameter_deltas();
        let y = ctx.samples.output_deltas();

        if !is_sobol {
            if self.detector.is_enabled() {
                match self.detector.detect(&x, &y, &self.budget.restarted()) {
                    Ok(breakpoints) => result.breakpoints = breakpoints,
                    Err(err) => {
                        tracing::warn!(error = %err, parameter = %result.key.parameter_name, "Breakpoint detection timed out");
                        result.flag(ResultFlag::TimedOut);
                    }
                }
            }
            if let Some(regional) = &self.regional {
                if x.len() >= 3 {
                    result.regional = Some(regional.analyze(&x, &y));
                }
            }
        }

        let mut annotation = UncertaintyAnnotation::default();
        if self.quantifier.config().bootstrap_resamples > 0 {
            let budget = self.budget.restarted();
            let boot_ctx = EstimationContext {
                budget: &budget,
                ..*ctx
            };
            let rows = self.engine.resample_rows(method, &boot_ctx);
            match self.quantifier.bootstrap(rows, &budget, |sample| {
                self.engine.resampled_score(method, &boot_ctx, sample)
            }) {
                Ok(interval) => {
                    if result.confidence_interval.is_none() {
                        result.confidence_interval = Some((interval.lower, interval.upper));
                    }
                    annotation.bootstrap = Some(interval);
                }
                Err(UncertaintyError::Timeout(err)) => {
                    tracing::warn!(error = %err, parameter = %result.key.parameter_name, "Bootstrap timed out");
                    result.flag(ResultFlag::TimedOut);
                }
                Err(err) => {
                    tracing::debug!(error = %err, "No bootstrap interval");
                }
            }
        }

        if !is_sobol {
            let epsilon = self.config.undefined_epsilon;
            if let (Some(rx), Some(ry)) = (
                relative_standard_error(&x, epsilon),
                relative_standard_error(&y, epsilon),
            ) {
                annotation.propagated = Some(propagate(rx, ry, score));
            }
        }

        if let Some(prior) = self
            .quantifier
            .prior_for(&result.key.parameter_name, &result.key.output_variable)
        {
            // A degenerate bootstrap (all replicates equal) carries no variance.
            let variance = annotation
                .bootstrap
                .as_ref()
                .map(|b| b.std_error.powi(2))
                .filter(|v| *v > 0.0)
                .or_else(|| annotation.propagated.as_ref().map(|p| p.absolute_sigma.powi(2)));
            match variance.map(|v| bayesian_update(prior, score, v)) {
                Some(Ok(posterior)) => annotation.posterior = Some(posterior),
                Some(Err(err)) => {
                    tracing::warn!(error = %err, parameter = %result.key.parameter_name, "Posterior update skipped");
                }
                None => {
                    tracing::debug!(parameter = %result.key.parameter_name, "No observation variance for posterior update");
                }
            }
        }

        if !annotation.is_empty() {
            result.uncertainty = Some(annotation);
        }
    }
}
