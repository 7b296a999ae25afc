//! Write-side inputs and read-side records for the storage layer.

use footprint_core::types::{EmissionFactor, PendingChange, Product};
use footprint_core::Unit;
use serde::{Deserialize, Serialize};

/// A product to insert or replace, as handed over by the catalog layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    /// Unique product name.
    pub name: String,

    /// Full ingredient set; replaces any previous set for this name.
    pub ingredients: Vec<NewIngredientQuantity>,
}

/// One ingredient line of a [`NewProduct`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIngredientQuantity {
    /// Ingredient name (created on first reference).
    pub name: String,

    /// Unit of `quantity`.
    pub unit: Unit,

    /// Amount of the ingredient.
    pub quantity: f64,
}

/// An emission factor to insert or update (keyed by name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFactor {
    /// Unique factor name, matching an ingredient name.
    pub name: String,

    /// Unit the factor is expressed per.
    pub unit: Unit,

    /// Kilograms of CO2e per unit.
    #[serde(alias = "emissionCO2eInKgPerUnit")]
    pub co2e_per_unit: f64,

    /// Citation for the value.
    pub source: String,
}

/// The entity a claimed change refers to, loaded after the claim.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimedSubject {
    /// Product change; `None` if the product vanished after it was enqueued.
    Product(Option<Product>),

    /// Emission factor change; `None` if the factor vanished after it was enqueued.
    Factor(Option<EmissionFactor>),
}

/// A claimed pending change together with its referenced graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedChange {
    /// The queue entry, in `processing` state.
    pub pending: PendingChange,

    /// The entity it references.
    pub subject: ClaimedSubject,
}

/// Queue statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Entries waiting to be claimed.
    pub pending: u64,

    /// Entries currently claimed.
    pub processing: u64,

    /// Creation time (unix millis) of the oldest entry, if any.
    pub oldest_created_at: Option<i64>,
}

/// Database statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    /// Number of products.
    pub product_count: u64,

    /// Number of emission factors.
    pub factor_count: u64,

    /// Number of persisted contributions.
    pub contribution_count: u64,

    /// Number of products with a complete footprint.
    pub scored_product_count: u64,

    /// Pending-change queue statistics.
    pub queue: QueueStats,
}
