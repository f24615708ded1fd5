//! Keyed lookup tables for output variables and modified parameters.
//!
//! Lookups try an exact key first. A keyword fallback exists for names that
//! are not in the table, and every fallback hit is reported as a heuristic
//! match so callers can surface it.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::Level;

/// How zone (or timestep) values of a variable combine into one value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    Sum,
    WeightedMean,
    Max,
}

impl AggregationMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AggregationMethod::Sum => "sum",
            AggregationMethod::WeightedMean => "weighted_mean",
            AggregationMethod::Max => "max",
        }
    }
}

/// Physical class of an output variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableClass {
    Energy,
    Flow,
    Temperature,
    Ratio,
    PeakDemand,
}

impl VariableClass {
    /// Aggregation rule fixed per class
    #[must_use]
    pub fn aggregation(self) -> AggregationMethod {
        match self {
            VariableClass::Energy | VariableClass::Flow => AggregationMethod::Sum,
            VariableClass::Temperature | VariableClass::Ratio => AggregationMethod::WeightedMean,
            VariableClass::PeakDemand => AggregationMethod::Max,
        }
    }
}

/// Category of a modified parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterCategory {
    Envelope,
    Hvac,
    Lighting,
    Equipment,
    Ventilation,
    Shading,
    Dhw,
    Other,
}

/// Result of a catalog lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogMatch<T> {
    pub value: T,
    pub heuristic: bool,
}

/// Output variable name → class
#[derive(Debug, Clone)]
pub struct VariableCatalog {
    entries: FxHashMap<String, VariableClass>,
}

const VARIABLE_DEFAULTS: &[(&str, VariableClass)] = &[
    ("Zone Air System Sensible Heating Energy", VariableClass::Energy),
    ("Zone Air System Sensible Cooling Energy", VariableClass::Energy),
    ("Zone Ideal Loads Zone Total Heating Energy", VariableClass::Energy),
    ("Zone Ideal Loads Zone Total Cooling Energy", VariableClass::Energy),
    ("Zone Lights Electricity Energy", VariableClass::Energy),
    ("Zone Electric Equipment Electricity Energy", VariableClass::Energy),
    ("Electricity:Facility", VariableClass::Energy),
    ("NaturalGas:Facility", VariableClass::Energy),
    ("Heating:EnergyTransfer", VariableClass::Energy),
    ("Cooling:EnergyTransfer", VariableClass::Energy),
    ("Water Heater Heating Energy", VariableClass::Energy),
    ("Zone Mechanical Ventilation Mass Flow Rate", VariableClass::Flow),
    ("Zone Infiltration Mass", VariableClass::Flow),
    ("Zone Mean Air Temperature", VariableClass::Temperature),
    ("Zone Operative Temperature", VariableClass::Temperature),
    ("Zone Air Relative Humidity", VariableClass::Ratio),
    ("Zone Thermal Comfort Fanger Model PMV", VariableClass::Ratio),
    ("Zone Thermal Comfort Fanger Model PPD", VariableClass::Ratio),
    ("Facility Total Electricity Demand Rate", VariableClass::PeakDemand),
    ("Facility Total Building Electricity Demand Rate", VariableClass::PeakDemand),
];

// Checked in order; the first keyword contained in the name wins.
const VARIABLE_KEYWORDS: &[(&str, VariableClass)] = &[
    ("demand", VariableClass::PeakDemand),
    ("peak", VariableClass::PeakDemand),
    ("temperature", VariableClass::Temperature),
    ("humidity", VariableClass::Ratio),
    ("fraction", VariableClass::Ratio),
    ("ratio", VariableClass::Ratio),
    ("pmv", VariableClass::Ratio),
    ("ppd", VariableClass::Ratio),
    ("flow", VariableClass::Flow),
    ("energy", VariableClass::Energy),
    ("electricity", VariableClass::Energy),
    ("gas", VariableClass::Energy),
];

impl Default for VariableCatalog {
    fn default() -> Self {
        let mut catalog = Self {
            entries: FxHashMap::default(),
        };
        for (name, class) in VARIABLE_DEFAULTS {
            catalog.insert(name, *class);
        }
        catalog
    }
}

impl VariableCatalog {
    /// Add or replace an exact entry
    pub fn insert(&mut self, name: &str, class: VariableClass) {
        self.entries.insert(normalize(name), class);
    }

    pub fn lookup(&self, name: &str) -> Option<CatalogMatch<VariableClass>> {
        let key = normalize(name);
        if let Some(class) = self.entries.get(&key) {
            return Some(CatalogMatch {
                value: *class,
                heuristic: false,
            });
        }
        VARIABLE_KEYWORDS
            .iter()
            .find(|(keyword, _)| key.contains(keyword))
            .map(|(_, class)| CatalogMatch {
                value: *class,
                heuristic: true,
            })
    }
}

/// (level, parameter name) → category
///
/// Entries keyed with `None` apply at every level.
#[derive(Debug, Clone)]
pub struct ParameterCatalog {
    entries: FxHashMap<(Option<Level>, String), ParameterCategory>,
}

const PARAMETER_DEFAULTS: &[(Option<Level>, &str, ParameterCategory)] = &[
    (None, "Conductivity", ParameterCategory::Envelope),
    (None, "Thickness", ParameterCategory::Envelope),
    (None, "U-Factor", ParameterCategory::Envelope),
    (None, "Solar Heat Gain Coefficient", ParameterCategory::Envelope),
    (None, "Infiltration Rate", ParameterCategory::Envelope),
    (None, "Watts per Zone Floor Area", ParameterCategory::Lighting),
    (None, "Lighting Level", ParameterCategory::Lighting),
    (Some(Level::Equipment), "Design Level", ParameterCategory::Equipment),
    (None, "Equipment Power Density", ParameterCategory::Equipment),
    (None, "Outdoor Air Flow per Person", ParameterCategory::Ventilation),
    (None, "Outdoor Air Flow per Zone Floor Area", ParameterCategory::Ventilation),
    (None, "Heating Setpoint", ParameterCategory::Hvac),
    (None, "Cooling Setpoint", ParameterCategory::Hvac),
    (None, "Gross Rated COP", ParameterCategory::Hvac),
    (None, "Burner Efficiency", ParameterCategory::Hvac),
    (None, "Fan Total Efficiency", ParameterCategory::Hvac),
    (None, "Shading Setpoint", ParameterCategory::Shading),
    (None, "Slat Angle", ParameterCategory::Shading),
    (None, "Use Flow Rate Fraction", ParameterCategory::Dhw),
    (None, "Water Heater Setpoint", ParameterCategory::Dhw),
];

const PARAMETER_KEYWORDS: &[(&str, ParameterCategory)] = &[
    ("water", ParameterCategory::Dhw),
    ("dhw", ParameterCategory::Dhw),
    ("shad", ParameterCategory::Shading),
    ("blind", ParameterCategory::Shading),
    ("light", ParameterCategory::Lighting),
    ("outdoor air", ParameterCategory::Ventilation),
    ("ventilation", ParameterCategory::Ventilation),
    ("setpoint", ParameterCategory::Hvac),
    ("cop", ParameterCategory::Hvac),
    ("efficiency", ParameterCategory::Hvac),
    ("equipment", ParameterCategory::Equipment),
    ("insulation", ParameterCategory::Envelope),
    ("window", ParameterCategory::Envelope),
    ("wall", ParameterCategory::Envelope),
    ("roof", ParameterCategory::Envelope),
    ("infiltration", ParameterCategory::Envelope),
];

impl Default for ParameterCatalog {
    fn default() -> Self {
        let mut catalog = Self {
            entries: FxHashMap::default(),
        };
        for (level, name, category) in PARAMETER_DEFAULTS {
            catalog.insert(*level, name, *category);
        }
        catalog
    }
}

impl ParameterCatalog {
    pub fn insert(&mut self, level: Option<Level>, name: &str, category: ParameterCategory) {
        self.entries.insert((level, normalize(name)), category);
    }

    /// Level-specific entry, then any-level entry, then keywords, then `Other`
    pub fn lookup(&self, level: Level, name: &str) -> CatalogMatch<ParameterCategory> {
        let key = normalize(name);
        let exact = self
            .entries
            .get(&(Some(level), key.clone()))
            .or_else(|| self.entries.get(&(None, key.clone())));
        if let Some(category) = exact {
            return CatalogMatch {
                value: *category,
                heuristic: false,
            };
        }
        match PARAMETER_KEYWORDS.iter().find(|(kw, _)| key.contains(kw)) {
            Some((_, category)) => CatalogMatch {
                value: *category,
                heuristic: true,
            },
            None => CatalogMatch {
                value: ParameterCategory::Other,
                heuristic: false,
            },
        }
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}
