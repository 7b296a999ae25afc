//! Core value types for footprint scoring.
//!
//! Every persisted entity is an explicit value keyed by an integer row id.
//! Relations are loaded eagerly by the storage layer; nothing here holds a
//! back-reference to its owner.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::units::Unit;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Raw row id.
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                $name(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Row id of a product.
    ProductId
);
row_id!(
    /// Row id of an ingredient.
    IngredientId
);
row_id!(
    /// Row id of an ingredient quantity (one ingredient within one product).
    QuantityId
);
row_id!(
    /// Row id of an emission factor.
    FactorId
);
row_id!(
    /// Row id of a pending change.
    PendingId
);

/// Validate an ingredient quantity.
pub fn validate_quantity(value: f64) -> Result<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(CoreError::InvalidQuantity(value));
    }
    Ok(value)
}

/// Validate a CO2e-per-unit emission value.
pub fn validate_emission_factor(value: f64) -> Result<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(CoreError::InvalidEmissionFactor(value));
    }
    Ok(value)
}

/// An ingredient, shared across products and unique by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    /// Row id.
    pub id: IngredientId,
    /// Unique name.
    pub name: String,
    /// Unit every quantity of this ingredient is stored in.
    pub unit: Unit,
}

/// The amount of one ingredient within one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientQuantity {
    /// Row id.
    pub id: QuantityId,
    /// Owning product.
    pub product_id: ProductId,
    /// The ingredient, loaded with the quantity.
    pub ingredient: Ingredient,
    /// Amount, expressed in `ingredient.unit`.
    pub quantity: f64,
}

/// A product together with its full ingredient set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Row id.
    pub id: ProductId,
    /// Unique name.
    pub name: String,
    /// Ingredient quantities; order carries no meaning.
    pub ingredients: Vec<IngredientQuantity>,
}

impl Product {
    /// Names of every ingredient in the product.
    pub fn ingredient_names(&self) -> Vec<String> {
        self.ingredients
            .iter()
            .map(|q| q.ingredient.name.clone())
            .collect()
    }

    /// Row ids of every ingredient quantity in the product.
    pub fn quantity_ids(&self) -> Vec<QuantityId> {
        self.ingredients.iter().map(|q| q.id).collect()
    }

    /// Lightweight reference to this product.
    pub fn to_ref(&self) -> ProductRef {
        ProductRef {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

/// A product without its ingredients (fan-out results).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductRef {
    /// Row id.
    pub id: ProductId,
    /// Unique name.
    pub name: String,
}

/// CO2e emitted per unit of an ingredient.
///
/// Matched to ingredients by name, not by foreign key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmissionFactor {
    /// Row id.
    pub id: FactorId,
    /// Unique name, equal to the ingredient name it applies to.
    pub name: String,
    /// Unit the factor is expressed per.
    pub unit: Unit,
    /// Kilograms of CO2e per `unit`.
    pub co2e_per_unit: f64,
    /// Citation for the value.
    pub source: String,
}

/// Persisted score attributable to one ingredient within one product.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    /// Factor used for the score.
    pub factor_id: FactorId,
    /// Ingredient quantity the score belongs to.
    pub quantity_id: QuantityId,
    /// Kilograms of CO2e.
    pub score: f64,
}

/// What a pending change points at. Exactly one target, by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeRef {
    /// A product row was inserted or updated.
    Product(ProductId),
    /// An emission factor row was inserted or updated.
    Factor(FactorId),
}

impl ChangeRef {
    /// Rebuild from the nullable `(product_id, factor_id)` column pair.
    pub fn from_columns(product: Option<i64>, factor: Option<i64>) -> Result<Self> {
        match (product, factor) {
            (Some(id), None) => Ok(ChangeRef::Product(ProductId(id))),
            (None, Some(id)) => Ok(ChangeRef::Factor(FactorId(id))),
            _ => Err(CoreError::InvalidChangeRef { product, factor }),
        }
    }

    /// Value for the `product_id` column.
    pub fn product_column(&self) -> Option<i64> {
        match self {
            ChangeRef::Product(id) => Some(id.get()),
            ChangeRef::Factor(_) => None,
        }
    }

    /// Value for the `factor_id` column.
    pub fn factor_column(&self) -> Option<i64> {
        match self {
            ChangeRef::Product(_) => None,
            ChangeRef::Factor(id) => Some(id.get()),
        }
    }
}

impl fmt::Display for ChangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeRef::Product(id) => write!(f, "product#{id}"),
            ChangeRef::Factor(id) => write!(f, "factor#{id}"),
        }
    }
}

/// Lifecycle of a pending change: `pending -> processing -> (deleted)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker.
    Processing,
}

impl PendingStatus {
    /// Convert to database string representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Pending => "pending",
            PendingStatus::Processing => "processing",
        }
    }
}

impl FromStr for PendingStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PendingStatus::Pending),
            "processing" => Ok(PendingStatus::Processing),
            _ => Err(CoreError::UnknownStatus(s.to_string())),
        }
    }
}

/// A queued signal that derived scores may be stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    /// Row id.
    pub id: PendingId,
    /// Changed entity.
    pub target: ChangeRef,
    /// Current status.
    pub status: PendingStatus,
    /// Creation time (unix millis).
    pub created_at: i64,
    /// Last status change (unix millis); also the lease start while processing.
    pub last_update: i64,
    /// Claim counter, bumped by every claim. Only the holder of the current
    /// value may renew or resolve the entry.
    pub lease: i64,
}

/// Share of one ingredient in a product footprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributionShare {
    /// Ingredient name.
    pub ingredient: String,
    /// Kilograms of CO2e.
    pub score: f64,
    /// Percentage of the product total.
    pub percentage: f64,
}

/// Readable footprint of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootprintReport {
    /// Product name.
    pub product: String,
    /// Sum of every contribution, in kilograms of CO2e.
    pub score: f64,
    /// Per-ingredient breakdown.
    pub contributions: Vec<ContributionShare>,
}

impl FootprintReport {
    /// Build a report from `(ingredient, score)` pairs.
    pub fn from_scores(product: impl Into<String>, scores: Vec<(String, f64)>) -> Self {
        let total: f64 = scores.iter().map(|(_, score)| score).sum();
        let contributions = scores
            .into_iter()
            .map(|(ingredient, score)| ContributionShare {
                ingredient,
                score,
                percentage: if total > 0.0 {
                    score / total * 100.0
                } else {
                    0.0
                },
            })
            .collect();

        FootprintReport {
            product: product.into(),
            score: total,
            contributions,
        }
    }
}
