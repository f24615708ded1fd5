//! Ledger of parameter modifications with resolved hierarchy scope.

use std::collections::BTreeSet;

use jiff::civil::DateTime;
use serde::{Deserialize, Serialize};

use crate::delta::UNDEFINED_EPSILON;
use crate::error::LedgerError;
use crate::graph::RelationshipGraph;
use crate::model::{BuildingId, EntityId, Level, ParameterCatalog, ParameterCategory, VariantId};

/// `{building_id, variant_id, entity_name, parameter_name, original_value, new_value, timestamp}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub building_id: BuildingId,
    pub variant_id: VariantId,
    pub entity_name: String,
    pub parameter_name: String,
    pub original_value: f64,
    pub new_value: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime>,
}

/// A modification whose entity has been placed in the hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModificationRecord {
    pub building_id: BuildingId,
    pub variant_id: VariantId,
    pub entity_id: EntityId,
    pub entity_name: String,
    pub level: Level,
    /// Ancestors of the entity, nearest first
    pub parent_chain: Vec<EntityId>,
    pub parameter_name: String,
    pub category: ParameterCategory,
    pub original_value: f64,
    pub new_value: f64,
    /// `(new - original) / |original| * 100`, `None` when the original is ~0
    pub percent_change: Option<f64>,
    pub timestamp: Option<DateTime>,
    pub heuristic_match: bool,
}

impl ModificationRecord {
    #[must_use]
    pub fn parameter_delta(&self) -> f64 {
        self.new_value - self.original_value
    }

    /// Zone used for zone-level analysis; equipment bubbles up to its owner
    #[must_use]
    pub fn analysis_zone(&self) -> Option<&EntityId> {
        match self.level {
            Level::Building => None,
            Level::Zone => Some(&self.entity_id),
            Level::Equipment => self.parent_chain.first(),
        }
    }

    /// Scope used for zone-level analysis (equipment counts as zone)
    #[must_use]
    pub fn analysis_level(&self) -> Level {
        match self.level {
            Level::Equipment => Level::Zone,
            level => level,
        }
    }

    /// Ancestor (or self) of this record's entity at `level`, if one exists
    #[must_use]
    pub fn entity_at(&self, level: Level) -> Option<&EntityId> {
        if level == self.level {
            return Some(&self.entity_id);
        }
        if level.depth() > self.level.depth() {
            return None;
        }
        let steps = usize::from(self.level.depth() - level.depth());
        self.parent_chain.get(steps - 1)
    }
}

/// All modifications of an analysis run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModificationLedger {
    records: Vec<ModificationRecord>,
}

impl ModificationLedger {
    /// Resolve every row against the graph; any unresolved entity rejects the load.
    pub fn load(
        rows: &[LedgerRow],
        graph: &RelationshipGraph,
        catalog: &ParameterCatalog,
    ) -> Result<Self, LedgerError> {
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            if !row.original_value.is_finite() || !row.new_value.is_finite() {
                return Err(LedgerError::NonFinite {
                    entity: row.entity_name.clone(),
                    parameter: row.parameter_name.clone(),
                    original: row.original_value,
                    new: row.new_value,
                });
            }
            let scope = graph.resolve_scope(&row.building_id, &row.entity_name)?;
            let category = catalog.lookup(scope.level, &row.parameter_name);
            if category.heuristic {
                tracing::debug!(
                    parameter = %row.parameter_name,
                    category = ?category.value,
                    "Parameter category matched by keyword"
                );
            }
            records.push(ModificationRecord {
                building_id: row.building_id.clone(),
                variant_id: row.variant_id.clone(),
                entity_id: scope.entity_id,
                entity_name: row.entity_name.clone(),
                level: scope.level,
                parent_chain: scope.parent_chain,
                parameter_name: row.parameter_name.clone(),
                category: category.value,
                original_value: row.original_value,
                new_value: row.new_value,
                percent_change: percent_change(row.original_value, row.new_value),
                timestamp: row.timestamp,
                heuristic_match: scope.heuristic,
            });
        }
        Ok(Self { records })
    }

    #[must_use]
    pub fn from_records(records: Vec<ModificationRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[ModificationRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn variants(&self) -> BTreeSet<VariantId> {
        self.records.iter().map(|r| r.variant_id.clone()).collect()
    }

    pub fn parameters(&self) -> BTreeSet<String> {
        self.records.iter().map(|r| r.parameter_name.clone()).collect()
    }

    pub fn by_parameter<'a>(
        &'a self,
        parameter: &'a str,
    ) -> impl Iterator<Item = &'a ModificationRecord> + 'a {
        self.records
            .iter()
            .filter(move |r| r.parameter_name == parameter)
    }

    /// Zones touched by a record: all zones for building scope, the owning zone otherwise
    pub fn affected_zones(
        record: &ModificationRecord,
        graph: &RelationshipGraph,
    ) -> Vec<EntityId> {
        match record.analysis_zone() {
            Some(zone) => vec![zone.clone()],
            None => graph.zones(&record.building_id).unwrap_or_default(),
        }
    }
}

/// Simple percentage change relative to the original value
#[must_use]
pub fn percent_change(original: f64, new: f64) -> Option<f64> {
    (original.abs() > UNDEFINED_EPSILON).then(|| (new - original) / original.abs() * 100.0)
}
