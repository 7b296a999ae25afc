//! Unit conversion between compatible measurement units.
//!
//! Two disjoint categories exist:
//! - weight: `mg`, `g`, `kg`, `oz` (base: `kg`)
//! - volume: `cup`, `ml`, `cl`, `l` (base: `ml`)
//!
//! Conversion inside a category is a fixed linear scale through the base unit.
//! Conversion across categories is always rejected, whatever the value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{CL_PER_ML, CUP_PER_ML, G_PER_KG, L_PER_ML, MG_PER_KG, OZ_PER_KG};
use crate::error::{CoreError, Result};

/// Measurement category of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitCategory {
    /// Mass units.
    Weight,
    /// Volume units.
    Volume,
}

impl UnitCategory {
    /// The unit every conversion in this category goes through.
    pub const fn base_unit(&self) -> Unit {
        match self {
            UnitCategory::Weight => Unit::Kg,
            UnitCategory::Volume => Unit::Ml,
        }
    }
}

/// A known measurement unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    /// Milligram.
    Mg,
    /// Gram.
    G,
    /// Kilogram.
    Kg,
    /// Ounce.
    Oz,
    /// Cup.
    Cup,
    /// Millilitre.
    Ml,
    /// Centilitre.
    Cl,
    /// Litre.
    L,
}

impl Unit {
    /// Every known unit, weight first.
    pub const ALL: [Unit; 8] = [
        Unit::Mg,
        Unit::G,
        Unit::Kg,
        Unit::Oz,
        Unit::Cup,
        Unit::Ml,
        Unit::Cl,
        Unit::L,
    ];

    /// Canonical lowercase name, as stored in the database.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Unit::Mg => "mg",
            Unit::G => "g",
            Unit::Kg => "kg",
            Unit::Oz => "oz",
            Unit::Cup => "cup",
            Unit::Ml => "ml",
            Unit::Cl => "cl",
            Unit::L => "l",
        }
    }

    /// Category this unit belongs to.
    pub const fn category(&self) -> UnitCategory {
        match self {
            Unit::Mg | Unit::G | Unit::Kg | Unit::Oz => UnitCategory::Weight,
            Unit::Cup | Unit::Ml | Unit::Cl | Unit::L => UnitCategory::Volume,
        }
    }

    /// How many of this unit make one base unit of its category.
    pub const fn per_base(&self) -> f64 {
        match self {
            Unit::Mg => MG_PER_KG,
            Unit::G => G_PER_KG,
            Unit::Kg => 1.0,
            Unit::Oz => OZ_PER_KG,
            Unit::Cup => CUP_PER_ML,
            Unit::Ml => 1.0,
            Unit::Cl => CL_PER_ML,
            Unit::L => L_PER_ML,
        }
    }

    /// Whether a value in this unit can be expressed in `other`.
    pub fn is_compatible_with(&self, other: Unit) -> bool {
        self.category() == other.category()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Unit::ALL
            .into_iter()
            .find(|unit| unit.as_str() == s)
            .ok_or_else(|| CoreError::InvalidUnit(s.to_string()))
    }
}

impl Serialize for Unit {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// Route deserialization through FromStr so unknown units surface as InvalidUnit.
impl<'de> Deserialize<'de> for Unit {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Convert `value` between two unit names.
///
/// Both names are validated against the known set before the categories are
/// compared, so an unknown unit is always reported as [`CoreError::InvalidUnit`].
///
/// # Example
///
/// ```
/// use footprint_core::units::convert;
///
/// assert_eq!(convert(100.0, "g", "kg").unwrap(), 0.1);
/// assert!(convert(1.0, "kg", "l").is_err());
/// assert!(convert(1.0, "stone", "kg").is_err());
/// ```
pub fn convert(value: f64, from: &str, to: &str) -> Result<f64> {
    let from: Unit = from.parse()?;
    let to: Unit = to.parse()?;
    convert_units(value, from, to)
}

/// Convert `value` between two already-validated units.
pub fn convert_units(value: f64, from: Unit, to: Unit) -> Result<f64> {
    if !from.is_compatible_with(to) {
        return Err(CoreError::IncompatibleUnits { from, to });
    }
    if from == to {
        return Ok(value);
    }
    Ok(value / from.per_base() * to.per_base())
}
