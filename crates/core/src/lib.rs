//! # Footprint Core
//!
//! Shared building blocks for footprint scoring: the measurement system and
//! the value types that flow between the store, the score engine and the
//! recomputation worker.
//!
//! ## Features
//!
//! - **Units**: weight/volume units and a category-checked linear converter
//! - **Domain Types**: Product, Ingredient, EmissionFactor, Contribution,
//!   PendingChange, each keyed by an explicit row id
//! - **Reports**: footprint totals with per-ingredient percentages

#![warn(missing_docs)]

pub mod constants;
pub mod error;
pub mod types;
pub mod units;

// Re-export commonly used items
pub use error::{CoreError, Result};
pub use types::*;
pub use units::{convert, convert_units, Unit, UnitCategory};
