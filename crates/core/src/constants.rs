//! Reference conversion factors for the measurement system.
//!
//! Every unit is expressed as "how many of this unit make one base unit".
//! The weight base is the kilogram, the volume base is the millilitre.

/// Milligrams in one kilogram.
pub const MG_PER_KG: f64 = 1_000_000.0;

/// Grams in one kilogram.
pub const G_PER_KG: f64 = 1_000.0;

/// Ounces in one kilogram.
pub const OZ_PER_KG: f64 = 35.274;

/// Centilitres in one millilitre.
pub const CL_PER_ML: f64 = 0.1;

/// Litres in one millilitre.
pub const L_PER_ML: f64 = 0.001;

/// Cups in one litre.
pub const CUP_PER_L: f64 = 4.16667;

/// Cups in one millilitre.
pub const CUP_PER_ML: f64 = CUP_PER_L * L_PER_ML;

/// Canonical lowercase unit names accepted by the converter.
pub const UNIT_NAMES: [&str; 8] = ["mg", "g", "kg", "oz", "cup", "ml", "cl", "l"];
