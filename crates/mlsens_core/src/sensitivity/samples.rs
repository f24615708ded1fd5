//! Observation sets: (parameter change, output change) pairs per variant and entity.

use std::collections::{BTreeMap, BTreeSet};

use crate::delta::{DeltaRecord, DeltaSummary};
use crate::graph::RelationshipGraph;
use crate::ledger::ModificationRecord;
use crate::model::{BuildingId, EntityId, Level, PairKey, VariantId};

/// Temporal summaries of every delta record of one building, keyed for lookup
#[derive(Debug, Clone, Default)]
pub struct OutputIndex {
    summaries: BTreeMap<OutputKey, (Level, DeltaSummary)>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct OutputKey {
    variable_name: String,
    variant_id: VariantId,
    entity_id: EntityId,
}

impl OutputIndex {
    pub fn insert(&mut self, record: &DeltaRecord) {
        self.summaries.insert(
            OutputKey {
                variable_name: record.variable_name.clone(),
                variant_id: record.variant_id.clone(),
                entity_id: record.entity_id.clone(),
            },
            (record.level, record.summary()),
        );
    }

    #[must_use]
    pub fn get(
        &self,
        variable: &str,
        variant: &VariantId,
        entity: &EntityId,
    ) -> Option<&DeltaSummary> {
        self.summaries
            .get(&OutputKey {
                variable_name: variable.to_string(),
                variant_id: variant.clone(),
                entity_id: entity.clone(),
            })
            .map(|(_, s)| s)
    }

    /// Output variables that have at least one delta
    pub fn variables(&self) -> BTreeSet<&str> {
        self.summaries
            .keys()
            .map(|k| k.variable_name.as_str())
            .collect()
    }

    /// (variant, entity) pairs reporting `variable` at `level`, in stable order
    pub fn entities(&self, variable: &str, level: Level) -> Vec<(&VariantId, &EntityId)> {
        self.summaries
            .iter()
            .filter(|(k, (l, _))| k.variable_name == variable && *l == level)
            .map(|(k, _)| (&k.variant_id, &k.entity_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

/// One (variant, target entity) sample
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub building_id: BuildingId,
    pub variant_id: VariantId,
    pub entity_id: EntityId,
    pub parameter_original: f64,
    pub parameter_new: f64,
    pub output_baseline: f64,
    pub output_modified: f64,
    /// Parameter deltas in `SampleSet::covariates` order
    pub covariates: Vec<f64>,
}

impl Observation {
    #[must_use]
    pub fn parameter_delta(&self) -> f64 {
        self.parameter_new - self.parameter_original
    }

    #[must_use]
    pub fn output_delta(&self) -> f64 {
        self.output_modified - self.output_baseline
    }

    /// Midpoint percentage change of the parameter, `None` when below `epsilon`
    #[must_use]
    pub fn parameter_arc_change(&self, epsilon: f64) -> Option<f64> {
        arc_change(self.parameter_original, self.parameter_new, epsilon)
    }

    #[must_use]
    pub fn output_arc_change(&self, epsilon: f64) -> Option<f64> {
        arc_change(self.output_baseline, self.output_modified, epsilon)
    }
}

/// `(b - a) / ((a + b) / 2)`; undefined for a ~0 change or a ~0 midpoint
#[must_use]
pub fn arc_change(a: f64, b: f64, epsilon: f64) -> Option<f64> {
    let mid = (a + b) / 2.0;
    if mid.abs() <= epsilon {
        return None;
    }
    let change = (b - a) / mid.abs();
    (change.abs() > epsilon).then_some(change)
}

/// All observations of one (level pair, parameter, output) computation
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    pub key: PairKey,
    /// Parameter names of the covariate columns (every parameter modified at the source level)
    pub covariates: Vec<String>,
    pub observations: Vec<Observation>,
    /// Some contributing modification was resolved by name pattern
    pub heuristic: bool,
}

#[derive(Debug, Default)]
struct Accumulator {
    original: f64,
    new: f64,
    count: usize,
}

impl Accumulator {
    fn push(&mut self, record: &ModificationRecord) {
        self.original += record.original_value;
        self.new += record.new_value;
        self.count += 1;
    }

    fn mean(&self) -> Option<(f64, f64)> {
        (self.count > 0).then(|| {
            let n = self.count as f64;
            (self.original / n, self.new / n)
        })
    }
}

impl SampleSet {
    /// Build observations for `key` from one building's modifications and outputs.
    ///
    /// A record is mapped to its source-level entity (equipment bubbles up to
    /// its zone, building-wide records apply to every zone) and from there to
    /// the target level (itself, its ancestor, or its descendants). Every
    /// (variant, target entity) with an output delta is an observation;
    /// entities the parameter was not applied to contribute a zero change.
    #[must_use]
    pub fn collect(
        key: PairKey,
        building: &BuildingId,
        records: &[&ModificationRecord],
        outputs: &OutputIndex,
        graph: &RelationshipGraph,
    ) -> Self {
        let mut accumulators: BTreeMap<(VariantId, EntityId, String), Accumulator> = BTreeMap::new();
        let mut covariates = BTreeSet::new();
        let mut reference = Accumulator::default();
        let mut heuristic = false;

        for record in records.iter().filter(|r| &r.building_id == building) {
            let sources = source_entities(record, key.source_level, graph);
            if sources.is_empty() {
                continue;
            }
            covariates.insert(record.parameter_name.as_str());
            if record.parameter_name == key.parameter_name {
                reference.push(record);
                heuristic |= record.heuristic_match;
            }
            for (entity, chain) in sources {
                let targets = target_entities(
                    building,
                    &entity,
                    &chain,
                    key.source_level,
                    key.target_level,
                    graph,
                );
                for target in targets {
                    accumulators
                        .entry((record.variant_id.clone(), target, record.parameter_name.clone()))
                        .or_default()
                        .push(record);
                }
            }
        }

        let covariates: Vec<String> = covariates.into_iter().map(str::to_string).collect();
        let fallback = reference
            .mean()
            .map_or(0.0, |(original, _)| original);

        let observations = outputs
            .entities(&key.output_variable, key.target_level)
            .into_iter()
            .filter(|(variant, _)| !variant.is_baseline())
            .filter_map(|(variant, entity)| {
                let output = outputs.get(&key.output_variable, variant, entity)?;
                let lookup = |parameter: &str| {
                    accumulators
                        .get(&(variant.clone(), entity.clone(), parameter.to_string()))
                        .and_then(Accumulator::mean)
                };
                let (parameter_original, parameter_new) =
                    lookup(&key.parameter_name).unwrap_or((fallback, fallback));
                Some(Observation {
                    building_id: building.clone(),
                    variant_id: variant.clone(),
                    entity_id: entity.clone(),
                    parameter_original,
                    parameter_new,
                    output_baseline: output.baseline,
                    output_modified: output.modified,
                    covariates: covariates
                        .iter()
                        .map(|p| lookup(p).map_or(0.0, |(o, n)| n - o))
                        .collect(),
                })
            })
            .collect();

        Self {
            key,
            covariates,
            observations,
            heuristic,
        }
    }

    /// Concatenate per-building sets into one cross-building set
    #[must_use]
    pub fn pooled(key: PairKey, sets: &[&SampleSet]) -> Self {
        let covariates: Vec<String> = sets
            .iter()
            .flat_map(|s| s.covariates.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let observations = sets
            .iter()
            .flat_map(|set| {
                let columns: Vec<Option<usize>> = covariates
                    .iter()
                    .map(|c| set.covariates.iter().position(|p| p == c))
                    .collect();
                set.observations.iter().map(move |obs| Observation {
                    covariates: columns
                        .iter()
                        .map(|col| col.map_or(0.0, |i| obs.covariates[i]))
                        .collect(),
                    ..obs.clone()
                })
            })
            .collect();
        Self {
            key,
            covariates,
            observations,
            heuristic: sets.iter().any(|s| s.heuristic),
        }
    }

    /// Resampled copy containing the given rows (repeats allowed)
    #[must_use]
    pub fn subset(&self, rows: &[usize]) -> Self {
        Self {
            key: self.key.clone(),
            covariates: self.covariates.clone(),
            observations: rows
                .iter()
                .filter_map(|&i| self.observations.get(i).cloned())
                .collect(),
            heuristic: self.heuristic,
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    #[must_use]
    pub fn parameter_deltas(&self) -> Vec<f64> {
        self.observations.iter().map(Observation::parameter_delta).collect()
    }

    #[must_use]
    pub fn output_deltas(&self) -> Vec<f64> {
        self.observations.iter().map(Observation::output_delta).collect()
    }

    /// Column of the pair's own parameter among the covariates
    #[must_use]
    pub fn target_covariate(&self) -> Option<usize> {
        self.covariates
            .iter()
            .position(|c| c == &self.key.parameter_name)
    }
}

/// Source-level entities of a record together with their ancestors, nearest first
fn source_entities(
    record: &ModificationRecord,
    source: Level,
    graph: &RelationshipGraph,
) -> Vec<(EntityId, Vec<EntityId>)> {
    let building = EntityId::from(&record.building_id);
    match (source, record.level) {
        (Level::Zone, Level::Building) => graph
            .zones(&record.building_id)
            .unwrap_or_default()
            .into_iter()
            .map(|z| (z, vec![building.clone()]))
            .collect(),
        (Level::Zone, Level::Equipment) => record
            .analysis_zone()
            .map(|z| vec![(z.clone(), vec![building])])
            .unwrap_or_default(),
        (s, l) if s == l => vec![(record.entity_id.clone(), record.parent_chain.clone())],
        _ => Vec::new(),
    }
}

fn target_entities(
    building: &BuildingId,
    entity: &EntityId,
    chain: &[EntityId],
    source: Level,
    target: Level,
    graph: &RelationshipGraph,
) -> Vec<EntityId> {
    if source == target {
        return vec![entity.clone()];
    }
    if target.depth() < source.depth() {
        let steps = usize::from(source.depth() - target.depth());
        return chain.get(steps - 1).cloned().into_iter().collect();
    }
    let zones = match source {
        Level::Building => graph.zones(building).unwrap_or_default(),
        _ => vec![entity.clone()],
    };
    match target {
        Level::Zone => zones,
        _ => zones
            .iter()
            .flat_map(|z| graph.equipment_of(building, z).to_vec())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::DeltaCalculator;
    use crate::graph::{EquipmentAssignmentRow, ZoneMappingRow};
    use crate::model::{PairedSeries, ParameterCategory, VariableClass};
    use jiff::civil::datetime;

    fn graph() -> RelationshipGraph {
        let zones: Vec<ZoneMappingRow> = ["Z1", "Z2"]
            .iter()
            .map(|z| ZoneMappingRow {
                building_id: "B1".into(),
                idf_zone_name: (*z).into(),
                sql_zone_name: (*z).into(),
            })
            .collect();
        let equipment = vec![EquipmentAssignmentRow {
            building_id: "B1".into(),
            equipment_id: "Z1_FAN".into(),
            zone_id: "Z1".into(),
        }];
        RelationshipGraph::from_tables(&zones, &equipment, &[]).unwrap()
    }

    fn record(variant: &str, entity: &str, level: Level, chain: &[&str], orig: f64, new: f64) -> ModificationRecord {
        ModificationRecord {
            building_id: "B1".into(),
            variant_id: variant.into(),
            entity_id: entity.into(),
            entity_name: entity.into(),
            level,
            parent_chain: chain.iter().map(|c| EntityId::from(*c)).collect(),
            parameter_name: "fan_efficiency".into(),
            category: ParameterCategory::Hvac,
            original_value: orig,
            new_value: new,
            percent_change: None,
            timestamp: None,
            heuristic_match: false,
        }
    }

    fn outputs(values: &[(&str, &str, f64, f64)]) -> OutputIndex {
        let mut index = OutputIndex::default();
        for (variant, zone, base, modified) in values {
            let series = PairedSeries::new(
                "B1".into(),
                (*variant).into(),
                (*zone).into(),
                "Fan Electricity",
                vec![datetime(2024, 1, 1, 0, 0, 0, 0)],
                vec![*base],
                vec![*modified],
            )
            .unwrap();
            index.insert(&DeltaCalculator::default().compute(&series, Level::Zone, VariableClass::Energy));
        }
        index
    }

    fn key() -> PairKey {
        PairKey {
            building_id: Some("B1".into()),
            source_level: Level::Zone,
            target_level: Level::Zone,
            parameter_name: "fan_efficiency".into(),
            output_variable: "Fan Electricity".into(),
        }
    }

    #[test]
    fn test_equipment_record_bubbles_up_to_zone() {
        let rec = record("v1", "Z1_FAN", Level::Equipment, &["Z1", "B1"], 0.6, 0.7);
        let index = outputs(&[("v1", "Z1", 100.0, 90.0), ("v1", "Z2", 50.0, 50.0)]);
        let set = SampleSet::collect(key(), &"B1".into(), &[&rec], &index, &graph());
        assert_eq!(set.len(), 2);
        let z1 = set.observations.iter().find(|o| o.entity_id.0 == "Z1").unwrap();
        assert!((z1.parameter_delta() - 0.1).abs() < 1e-12);
        assert_eq!(z1.output_delta(), -10.0);
        let z2 = set.observations.iter().find(|o| o.entity_id.0 == "Z2").unwrap();
        assert_eq!(z2.parameter_delta(), 0.0);
        assert_eq!(z2.parameter_arc_change(1e-9), None);
    }

    #[test]
    fn test_records_on_same_target_are_averaged() {
        let a = record("v1", "Z1", Level::Zone, &["B1"], 1.0, 2.0);
        let b = record("v1", "Z1", Level::Zone, &["B1"], 1.0, 4.0);
        let index = outputs(&[("v1", "Z1", 100.0, 90.0)]);
        let set = SampleSet::collect(key(), &"B1".into(), &[&a, &b], &index, &graph());
        assert_eq!(set.observations[0].parameter_delta(), 2.0);
    }

    #[test]
    fn test_building_record_broadcasts_to_zones() {
        let rec = record("v1", "B1", Level::Building, &[], 1.0, 2.0);
        let index = outputs(&[("v1", "Z1", 100.0, 90.0), ("v1", "Z2", 50.0, 40.0)]);
        let set = SampleSet::collect(key(), &"B1".into(), &[&rec], &index, &graph());
        assert!(set.observations.iter().all(|o| o.parameter_delta() == 1.0));
    }

    #[test]
    fn test_arc_change_is_symmetric() {
        let up = arc_change(100.0, 110.0, 1e-9).unwrap();
        let down = arc_change(110.0, 100.0, 1e-9).unwrap();
        assert!((up + down).abs() < 1e-12);
        assert_eq!(arc_change(5.0, 5.0, 1e-9), None);
        assert_eq!(arc_change(-1.0, 1.0, 1e-9), None);
    }
}
