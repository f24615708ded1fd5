//! Static building → zone → equipment hierarchy.
//!
//! Built once from the authoritative mapping tables and never mutated
//! afterwards, so it can be shared by reference across worker threads.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, ReconciliationError, ScopeResolutionError};
use crate::model::{BuildingId, EntityId, Level};

/// Entity names that always denote the whole building
pub const BUILDING_MARKERS: &[&str] = &["ALL_ZONES", "ALL ZONES", "BUILDING", "WHOLE_BUILDING", "*"];

/// Tolerance on the sum of sibling zone weights
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// `{building_id, idf_zone_name, sql_zone_name}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneMappingRow {
    pub building_id: BuildingId,
    pub idf_zone_name: String,
    pub sql_zone_name: String,
}

/// `{building_id, equipment_id, zone_id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentAssignmentRow {
    pub building_id: BuildingId,
    pub equipment_id: String,
    pub zone_id: String,
}

/// Zone geometry used for area/volume weighting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneGeometryRow {
    pub building_id: BuildingId,
    pub zone_id: String,
    pub floor_area: Option<f64>,
    pub volume: Option<f64>,
}

/// How sibling zones are weighted in intensive roll-ups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WeightMethod {
    #[default]
    Area,
    Volume,
    Equal,
}

impl WeightMethod {
    fn as_str(self) -> &'static str {
        match self {
            WeightMethod::Area => "area",
            WeightMethod::Volume => "volume",
            WeightMethod::Equal => "equal",
        }
    }
}

/// Where an entity name sits in the hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeResolution {
    pub level: Level,
    pub entity_id: EntityId,
    /// Ancestors, nearest first (zone then building for equipment)
    pub parent_chain: Vec<EntityId>,
    /// Resolved by name pattern rather than by a mapping table
    pub heuristic: bool,
}

impl ScopeResolution {
    /// The zone this entity rolls up to, if it is below building level
    #[must_use]
    pub fn owning_zone(&self) -> Option<&EntityId> {
        match self.level {
            Level::Building => None,
            Level::Zone => Some(&self.entity_id),
            Level::Equipment => self.parent_chain.first(),
        }
    }
}

#[derive(Debug, Clone)]
struct ZoneNode {
    id: EntityId,
    sql_name: String,
    floor_area: Option<f64>,
    volume: Option<f64>,
    equipment: Vec<EntityId>,
}

#[derive(Debug, Clone)]
struct BuildingNode {
    id: BuildingId,
    zones: Vec<ZoneNode>,
    /// Normalised idf and sql zone names → index into `zones`
    zone_index: FxHashMap<String, usize>,
    /// Normalised equipment id → index of owning zone
    equipment_owner: FxHashMap<String, usize>,
}

impl BuildingNode {
    fn zone_by_name(&self, name: &str) -> Option<&ZoneNode> {
        self.zone_index.get(&normalize(name)).map(|&i| &self.zones[i])
    }
}

/// Immutable ownership tree of all buildings in an analysis run
#[derive(Debug, Clone, Default)]
pub struct RelationshipGraph {
    buildings: BTreeMap<BuildingId, BuildingNode>,
}

impl RelationshipGraph {
    /// Build the graph from the zone-mapping, equipment-assignment and geometry tables.
    pub fn from_tables(
        zones: &[ZoneMappingRow],
        equipment: &[EquipmentAssignmentRow],
        geometry: &[ZoneGeometryRow],
    ) -> Result<Self, GraphError> {
        let mut buildings: BTreeMap<BuildingId, BuildingNode> = BTreeMap::new();

        for row in zones {
            let node = buildings
                .entry(row.building_id.clone())
                .or_insert_with(|| BuildingNode {
                    id: row.building_id.clone(),
                    zones: Vec::new(),
                    zone_index: FxHashMap::default(),
                    equipment_owner: FxHashMap::default(),
                });
            let idf_key = normalize(&row.idf_zone_name);
            if node.zone_index.contains_key(&idf_key) {
                return Err(GraphError::DuplicateZone {
                    building: row.building_id.clone(),
                    zone: EntityId(row.idf_zone_name.clone()),
                });
            }
            let idx = node.zones.len();
            node.zones.push(ZoneNode {
                id: EntityId(row.idf_zone_name.clone()),
                sql_name: row.sql_zone_name.clone(),
                floor_area: None,
                volume: None,
                equipment: Vec::new(),
            });
            node.zone_index.insert(idf_key, idx);
            node.zone_index.entry(normalize(&row.sql_zone_name)).or_insert(idx);
        }

        for row in equipment {
            let Some(node) = buildings.get_mut(&row.building_id) else {
                return Err(GraphError::UnknownZone {
                    building: row.building_id.clone(),
                    zone: row.zone_id.clone(),
                    equipment: EntityId(row.equipment_id.clone()),
                });
            };
            let Some(&zone_idx) = node.zone_index.get(&normalize(&row.zone_id)) else {
                return Err(GraphError::UnknownZone {
                    building: row.building_id.clone(),
                    zone: row.zone_id.clone(),
                    equipment: EntityId(row.equipment_id.clone()),
                });
            };
            let key = normalize(&row.equipment_id);
            if node.equipment_owner.insert(key, zone_idx).is_some() {
                return Err(GraphError::DuplicateEquipment {
                    equipment: EntityId(row.equipment_id.clone()),
                });
            }
            node.zones[zone_idx]
                .equipment
                .push(EntityId(row.equipment_id.clone()));
        }

        for row in geometry {
            let zone_idx = buildings
                .get(&row.building_id)
                .and_then(|node| node.zone_index.get(&normalize(&row.zone_id)).copied());
            let (Some(zone_idx), Some(node)) = (zone_idx, buildings.get_mut(&row.building_id))
            else {
                return Err(GraphError::UnknownGeometryZone {
                    building: row.building_id.clone(),
                    zone: row.zone_id.clone(),
                });
            };
            let zone = &mut node.zones[zone_idx];
            zone.floor_area = row.floor_area;
            zone.volume = row.volume;
        }

        tracing::debug!(buildings = buildings.len(), "Relationship graph built");
        Ok(Self { buildings })
    }

    pub fn buildings(&self) -> impl Iterator<Item = &BuildingId> {
        self.buildings.keys()
    }

    #[must_use]
    pub fn contains_building(&self, building: &BuildingId) -> bool {
        self.buildings.contains_key(building)
    }

    fn building(&self, building: &BuildingId) -> Result<&BuildingNode, ScopeResolutionError> {
        self.buildings
            .get(building)
            .ok_or_else(|| ScopeResolutionError::UnknownBuilding(building.clone()))
    }

    /// Zones of a building in mapping-table order
    pub fn zones(&self, building: &BuildingId) -> Result<Vec<EntityId>, ScopeResolutionError> {
        Ok(self
            .building(building)?
            .zones
            .iter()
            .map(|z| z.id.clone())
            .collect())
    }

    /// Equipment assigned to a zone; empty for unknown zones
    #[must_use]
    pub fn equipment_of(&self, building: &BuildingId, zone: &EntityId) -> &[EntityId] {
        self.buildings
            .get(building)
            .and_then(|b| b.zone_by_name(&zone.0))
            .map(|z| z.equipment.as_slice())
            .unwrap_or(&[])
    }

    /// SQL-side name of a zone
    #[must_use]
    pub fn sql_zone_name(&self, building: &BuildingId, zone: &EntityId) -> Option<&str> {
        self.buildings
            .get(building)
            .and_then(|b| b.zone_by_name(&zone.0))
            .map(|z| z.sql_name.as_str())
    }

    /// Resolve an entity name to its level and ancestors.
    ///
    /// Priority: building-wide marker, exact zone, exact equipment, then a
    /// unique zone name appearing as whole tokens of the entity name,
    /// reported as heuristic.
    pub fn resolve_scope(
        &self,
        building: &BuildingId,
        name: &str,
    ) -> Result<ScopeResolution, ScopeResolutionError> {
        let node = self.building(building)?;
        let key = normalize(name);
        let building_entity = EntityId::from(&node.id);

        if key == normalize(&node.id.0) || BUILDING_MARKERS.iter().any(|m| normalize(m) == key) {
            return Ok(ScopeResolution {
                level: Level::Building,
                entity_id: building_entity,
                parent_chain: Vec::new(),
                heuristic: false,
            });
        }

        if let Some(zone) = node.zone_by_name(&key) {
            return Ok(ScopeResolution {
                level: Level::Zone,
                entity_id: zone.id.clone(),
                parent_chain: vec![building_entity],
                heuristic: false,
            });
        }

        if let Some(&zone_idx) = node.equipment_owner.get(&key) {
            let zone = &node.zones[zone_idx];
            let equipment = zone
                .equipment
                .iter()
                .find(|e| normalize(&e.0) == key)
                .cloned()
                .unwrap_or_else(|| EntityId(name.to_string()));
            return Ok(ScopeResolution {
                level: Level::Equipment,
                entity_id: equipment,
                parent_chain: vec![zone.id.clone(), building_entity],
                heuristic: false,
            });
        }

        self.resolve_heuristic(node, name, &key)
    }

    fn resolve_heuristic(
        &self,
        node: &BuildingNode,
        name: &str,
        key: &str,
    ) -> Result<ScopeResolution, ScopeResolutionError> {
        let entity_tokens = tokens(key);
        let mut best: Vec<&ZoneNode> = Vec::new();
        let mut best_len = 0;
        for zone in &node.zones {
            let len = [normalize(&zone.id.0), normalize(&zone.sql_name)]
                .iter()
                .filter(|zone_key| contains_token_run(&entity_tokens, &tokens(zone_key)))
                .map(String::len)
                .max()
                .unwrap_or(0);
            if len == 0 {
                continue;
            }
            if len > best_len {
                best_len = len;
                best = vec![zone];
            } else if len == best_len {
                best.push(zone);
            }
        }

        match best.as_slice() {
            [zone] => {
                tracing::warn!(
                    building = %node.id,
                    entity = name,
                    zone = %zone.id,
                    heuristic_match = true,
                    "Entity resolved by zone-name pattern"
                );
                Ok(ScopeResolution {
                    level: Level::Equipment,
                    entity_id: EntityId(name.to_string()),
                    parent_chain: vec![zone.id.clone(), EntityId::from(&node.id)],
                    heuristic: true,
                })
            }
            [] => Err(ScopeResolutionError::Unmapped {
                building: node.id.clone(),
                name: name.to_string(),
            }),
            many => Err(ScopeResolutionError::Ambiguous {
                building: node.id.clone(),
                name: name.to_string(),
                candidates: many.iter().map(|z| z.id.clone()).collect(),
            }),
        }
    }

    /// Normalised weights of all zones of a building.
    pub fn zone_weights(
        &self,
        building: &BuildingId,
        method: WeightMethod,
    ) -> Result<BTreeMap<EntityId, f64>, ReconciliationError> {
        let Some(node) = self.buildings.get(building) else {
            return Err(ReconciliationError::WeightSum {
                building: building.clone(),
                method: method.as_str(),
                sum: 0.0,
            });
        };

        let raw: Vec<(EntityId, f64)> = match method {
            WeightMethod::Equal => node.zones.iter().map(|z| (z.id.clone(), 1.0)).collect(),
            WeightMethod::Area => geometry_values(node, "floor_area", |z| z.floor_area)?,
            WeightMethod::Volume => geometry_values(node, "volume", |z| z.volume)?,
        };

        let total: f64 = raw.iter().map(|(_, v)| v).sum();
        let weights: BTreeMap<EntityId, f64> =
            raw.into_iter().map(|(id, v)| (id, v / total)).collect();
        let sum: f64 = weights.values().sum();
        if !sum.is_finite() || (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ReconciliationError::WeightSum {
                building: building.clone(),
                method: method.as_str(),
                sum,
            });
        }
        Ok(weights)
    }

    /// Weight of one zone among its siblings
    pub fn zone_weight(
        &self,
        building: &BuildingId,
        zone: &EntityId,
        method: WeightMethod,
    ) -> Result<f64, ReconciliationError> {
        let weights = self.zone_weights(building, method)?;
        weights
            .get(zone)
            .copied()
            .ok_or_else(|| ReconciliationError::MissingGeometry {
                zone: zone.clone(),
                quantity: "weight",
            })
    }
}

fn geometry_values(
    node: &BuildingNode,
    quantity: &'static str,
    get: impl Fn(&ZoneNode) -> Option<f64>,
) -> Result<Vec<(EntityId, f64)>, ReconciliationError> {
    node.zones
        .iter()
        .map(|z| match get(z) {
            None => Err(ReconciliationError::MissingGeometry {
                zone: z.id.clone(),
                quantity,
            }),
            Some(v) if !v.is_finite() || v < 0.0 => Err(ReconciliationError::InvalidGeometry {
                zone: z.id.clone(),
                quantity,
                value: v,
            }),
            Some(v) => Ok((z.id.clone(), v)),
        })
        .collect()
}

fn normalize(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Name tokens split on whitespace, `_` and `-`
fn tokens(key: &str) -> Vec<&str> {
    key.split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|t| !t.is_empty())
        .collect()
}

/// Whole tokens of `needle` appear consecutively in `haystack`
fn contains_token_run(haystack: &[&str], needle: &[&str]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> RelationshipGraph {
        let zones = vec![
            ZoneMappingRow {
                building_id: "B1".into(),
                idf_zone_name: "Core_ZN".into(),
                sql_zone_name: "CORE_ZN".into(),
            },
            ZoneMappingRow {
                building_id: "B1".into(),
                idf_zone_name: "Perimeter_ZN_1".into(),
                sql_zone_name: "PERIMETER_ZN_1".into(),
            },
        ];
        let equipment = vec![EquipmentAssignmentRow {
            building_id: "B1".into(),
            equipment_id: "Core_ZN PTAC".into(),
            zone_id: "Core_ZN".into(),
        }];
        let geometry = vec![
            ZoneGeometryRow {
                building_id: "B1".into(),
                zone_id: "Core_ZN".into(),
                floor_area: Some(300.0),
                volume: Some(900.0),
            },
            ZoneGeometryRow {
                building_id: "B1".into(),
                zone_id: "PERIMETER_ZN_1".into(),
                floor_area: Some(100.0),
                volume: None,
            },
        ];
        RelationshipGraph::from_tables(&zones, &equipment, &geometry).unwrap()
    }

    #[test]
    fn test_all_zones_resolves_to_building() {
        let g = graph();
        let scope = g.resolve_scope(&"B1".into(), "ALL_ZONES").unwrap();
        assert_eq!(scope.level, Level::Building);
        assert_eq!(scope.entity_id, EntityId::from("B1"));
        assert!(!scope.heuristic);
    }

    #[test]
    fn test_zone_resolves_by_idf_or_sql_name() {
        let g = graph();
        let by_sql = g.resolve_scope(&"B1".into(), "PERIMETER_ZN_1").unwrap();
        let by_idf = g.resolve_scope(&"B1".into(), "perimeter_zn_1").unwrap();
        assert_eq!(by_sql, by_idf);
        assert_eq!(by_sql.level, Level::Zone);
        assert_eq!(by_sql.parent_chain, vec![EntityId::from("B1")]);
    }

    #[test]
    fn test_equipment_resolves_with_parent_chain() {
        let g = graph();
        let scope = g.resolve_scope(&"B1".into(), "CORE_ZN PTAC").unwrap();
        assert_eq!(scope.level, Level::Equipment);
        assert_eq!(scope.entity_id, EntityId::from("Core_ZN PTAC"));
        assert_eq!(scope.owning_zone(), Some(&EntityId::from("Core_ZN")));
        assert_eq!(
            g.equipment_of(&"B1".into(), &"Core_ZN".into()),
            &[EntityId::from("Core_ZN PTAC")]
        );
    }

    #[test]
    fn test_name_pattern_fallback_is_flagged() {
        let g = graph();
        let scope = g.resolve_scope(&"B1".into(), "CORE_ZN_LIGHTS").unwrap();
        assert!(scope.heuristic);
        assert_eq!(scope.level, Level::Equipment);
        assert_eq!(scope.owning_zone(), Some(&EntityId::from("Core_ZN")));
    }

    #[test]
    fn test_name_pattern_needs_whole_tokens() {
        let zones = ["A", "Core"]
            .iter()
            .map(|z| ZoneMappingRow {
                building_id: "B1".into(),
                idf_zone_name: (*z).into(),
                sql_zone_name: (*z).into(),
            })
            .collect::<Vec<_>>();
        let g = RelationshipGraph::from_tables(&zones, &[], &[]).unwrap();

        // "A" occurs inside "MAIN" but is not a token of it
        let err = g.resolve_scope(&"B1".into(), "Main Boiler").unwrap_err();
        assert!(matches!(err, ScopeResolutionError::Unmapped { .. }));
        let err = g.resolve_scope(&"B1".into(), "CoreFan").unwrap_err();
        assert!(matches!(err, ScopeResolutionError::Unmapped { .. }));

        let scope = g.resolve_scope(&"B1".into(), "Core-Boiler").unwrap();
        assert!(scope.heuristic);
        assert_eq!(scope.owning_zone(), Some(&EntityId::from("Core")));
        let scope = g.resolve_scope(&"B1".into(), "A_LIGHTS").unwrap();
        assert_eq!(scope.owning_zone(), Some(&EntityId::from("A")));
    }

    #[test]
    fn test_unknown_entity_is_an_error() {
        let g = graph();
        let err = g.resolve_scope(&"B1".into(), "ATTIC").unwrap_err();
        assert!(matches!(err, ScopeResolutionError::Unmapped { .. }));

        let err = g.resolve_scope(&"B9".into(), "ALL_ZONES").unwrap_err();
        assert!(matches!(err, ScopeResolutionError::UnknownBuilding(_)));
    }

    #[test]
    fn test_area_weights_sum_to_one() {
        let g = graph();
        let w = g.zone_weights(&"B1".into(), WeightMethod::Area).unwrap();
        assert!((w[&EntityId::from("Core_ZN")] - 0.75).abs() < 1e-12);
        assert!((w.values().sum::<f64>() - 1.0).abs() < WEIGHT_SUM_TOLERANCE);

        let equal = g
            .zone_weight(&"B1".into(), &"Core_ZN".into(), WeightMethod::Equal)
            .unwrap();
        assert!((equal - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_missing_geometry_is_a_reconciliation_error() {
        let g = graph();
        let err = g.zone_weights(&"B1".into(), WeightMethod::Volume).unwrap_err();
        assert!(matches!(err, ReconciliationError::MissingGeometry { .. }));
    }

    #[test]
    fn test_zero_total_area_does_not_renormalize() {
        let zones = vec![ZoneMappingRow {
            building_id: "B2".into(),
            idf_zone_name: "Z".into(),
            sql_zone_name: "Z".into(),
        }];
        let geometry = vec![ZoneGeometryRow {
            building_id: "B2".into(),
            zone_id: "Z".into(),
            floor_area: Some(0.0),
            volume: None,
        }];
        let g = RelationshipGraph::from_tables(&zones, &[], &geometry).unwrap();
        let err = g.zone_weights(&"B2".into(), WeightMethod::Area).unwrap_err();
        assert!(matches!(err, ReconciliationError::WeightSum { .. }));
    }

    #[test]
    fn test_equipment_in_unknown_zone_is_rejected() {
        let zones = vec![ZoneMappingRow {
            building_id: "B1".into(),
            idf_zone_name: "Z".into(),
            sql_zone_name: "Z".into(),
        }];
        let equipment = vec![EquipmentAssignmentRow {
            building_id: "B1".into(),
            equipment_id: "Fan".into(),
            zone_id: "Nowhere".into(),
        }];
        assert!(matches!(
            RelationshipGraph::from_tables(&zones, &equipment, &[]),
            Err(GraphError::UnknownZone { .. })
        ));
    }
}
