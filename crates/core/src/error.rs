//! Error types for the core crate.

use thiserror::Error;

use crate::units::Unit;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Unit string outside the known measurement system.
    #[error("Invalid unit: {0}")]
    InvalidUnit(String),

    /// Conversion between a weight unit and a volume unit.
    #[error("Cannot convert from {from} to {to}")]
    IncompatibleUnits {
        /// Source unit.
        from: Unit,
        /// Target unit.
        to: Unit,
    },

    /// Ingredient quantity that is negative or not finite.
    #[error("Invalid quantity: {0} (must be finite and >= 0)")]
    InvalidQuantity(f64),

    /// Emission factor that is not strictly positive or not finite.
    #[error("Invalid emission factor: {0} (must be finite and > 0)")]
    InvalidEmissionFactor(f64),

    /// A pending change must reference exactly one of product or factor.
    #[error("Pending change must reference exactly one target (product={product:?}, factor={factor:?})")]
    InvalidChangeRef {
        /// Product column value.
        product: Option<i64>,
        /// Factor column value.
        factor: Option<i64>,
    },

    /// Unknown pending-change status string.
    #[error("Unknown pending status: {0}")]
    UnknownStatus(String),
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
