//! Identifiers for hierarchy entities
//!
//! Each kind of identifier has its own newtype so building, variant and entity
//! ids cannot be mixed up at call sites.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Variant id reserved for the unmodified simulation run
pub const BASELINE_VARIANT: &str = "base";

/// Identifier of a building (one simulated model)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuildingId(pub String);

/// Identifier of a simulation variant (`base` or a modified run)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VariantId(pub String);

/// Stable identifier of a building, zone or equipment instance
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl VariantId {
    pub fn baseline() -> Self {
        Self(BASELINE_VARIANT.to_string())
    }

    #[must_use]
    pub fn is_baseline(&self) -> bool {
        self.0 == BASELINE_VARIANT
    }
}

impl From<&BuildingId> for EntityId {
    fn from(id: &BuildingId) -> Self {
        EntityId(id.0.clone())
    }
}

macro_rules! impl_display {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<&str> for $ty {
                fn from(s: &str) -> Self {
                    Self(s.to_string())
                }
            }
        )*
    };
}

impl_display!(BuildingId, VariantId, EntityId);

/// Hierarchy level of an entity, modification or result
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Building,
    Zone,
    Equipment,
}

impl Level {
    /// Depth in the ownership tree (building = 0)
    #[must_use]
    pub fn depth(self) -> u8 {
        match self {
            Level::Building => 0,
            Level::Zone => 1,
            Level::Equipment => 2,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Building => "building",
            Level::Zone => "zone",
            Level::Equipment => "equipment",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_variant() {
        assert!(VariantId::baseline().is_baseline());
        assert!(!VariantId::from("v1").is_baseline());
    }

    #[test]
    fn test_level_ordering_follows_depth() {
        assert!(Level::Building < Level::Zone);
        assert!(Level::Zone < Level::Equipment);
        assert_eq!(Level::Equipment.depth(), 2);
    }
}
