//! Footprint score engine.
//!
//! This crate implements the deterministic scoring rule:
//! - Every ingredient must have an emission factor with the exact same name,
//!   otherwise the whole computation fails (no partial results)
//! - Each quantity is converted from its stored unit to the factor's unit
//! - `score(ingredient) = converted_quantity * co2e_per_unit`
//! - `total = sum(score)`
//!
//! Everything here is pure: no I/O, no clock, no shared state.

#![warn(missing_docs)]

use std::collections::{BTreeMap, HashMap};

use footprint_core::types::{Contribution, EmissionFactor, Product};
use footprint_core::units::{convert_units, Unit};
use footprint_core::CoreError;

/// Why a score could not be computed.
///
/// Both variants mean the same thing to callers: the product has no complete
/// footprint and any stored contributions must be invalidated.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ScoreError {
    /// No emission factor carries the ingredient's name.
    #[error("no emission factor for ingredient '{ingredient}'")]
    MissingFactor {
        /// Ingredient without a factor.
        ingredient: String,
    },

    /// The ingredient's unit cannot be expressed in the factor's unit.
    #[error("cannot convert quantity of '{ingredient}': {source}")]
    Conversion {
        /// Ingredient whose quantity could not be converted.
        ingredient: String,
        /// Converter error.
        #[source]
        source: CoreError,
    },
}

/// One ingredient line of a product.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantityInput<'a> {
    /// Ingredient name (matched exactly against factor names).
    pub ingredient: &'a str,
    /// Amount in `unit`.
    pub quantity: f64,
    /// Unit the amount is stored in.
    pub unit: Unit,
}

/// Emission data for one ingredient name.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorInput {
    /// Unit the factor is expressed per.
    pub unit: Unit,
    /// Kilograms of CO2e per `unit`.
    pub co2e_per_unit: f64,
}

impl From<&EmissionFactor> for FactorInput {
    fn from(factor: &EmissionFactor) -> Self {
        FactorInput {
            unit: factor.unit,
            co2e_per_unit: factor.co2e_per_unit,
        }
    }
}

/// Per-ingredient scores of one product.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreSheet {
    /// Ingredient name -> kilograms of CO2e.
    pub scores: BTreeMap<String, f64>,
}

impl ScoreSheet {
    /// Sum of all ingredient scores.
    pub fn total(&self) -> f64 {
        self.scores.values().sum()
    }

    /// Score of one ingredient, if present.
    pub fn get(&self, ingredient: &str) -> Option<f64> {
        self.scores.get(ingredient).copied()
    }

    /// Number of scored ingredients.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether no ingredient was scored.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Compute per-ingredient scores.
///
/// Factor presence is checked for every ingredient before any conversion, so a
/// missing factor is reported even when another line would fail to convert.
pub fn compute_scores(
    quantities: &[QuantityInput<'_>],
    factors: &HashMap<String, FactorInput>,
) -> Result<ScoreSheet, ScoreError> {
    if let Some(missing) = quantities
        .iter()
        .find(|line| !factors.contains_key(line.ingredient))
    {
        return Err(ScoreError::MissingFactor {
            ingredient: missing.ingredient.to_string(),
        });
    }

    let mut scores = BTreeMap::new();
    for line in quantities {
        let factor = factors[line.ingredient];
        let converted = convert_units(line.quantity, line.unit, factor.unit).map_err(|source| {
            ScoreError::Conversion {
                ingredient: line.ingredient.to_string(),
                source,
            }
        })?;
        scores.insert(line.ingredient.to_string(), converted * factor.co2e_per_unit);
    }

    Ok(ScoreSheet { scores })
}

/// Compute the contributions of a loaded product.
///
/// `factors` is keyed by factor name. On success there is exactly one
/// contribution per ingredient quantity of `product`.
pub fn score_product(
    product: &Product,
    factors: &HashMap<String, EmissionFactor>,
) -> Result<Vec<Contribution>, ScoreError> {
    let quantities: Vec<QuantityInput<'_>> = product
        .ingredients
        .iter()
        .map(|q| QuantityInput {
            ingredient: q.ingredient.name.as_str(),
            quantity: q.quantity,
            unit: q.ingredient.unit,
        })
        .collect();
    let inputs: HashMap<String, FactorInput> = factors
        .iter()
        .map(|(name, factor)| (name.clone(), FactorInput::from(factor)))
        .collect();

    let sheet = compute_scores(&quantities, &inputs)?;

    Ok(product
        .ingredients
        .iter()
        .map(|q| Contribution {
            factor_id: factors[&q.ingredient.name].id,
            quantity_id: q.id,
            score: sheet.scores[&q.ingredient.name],
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use footprint_core::types::{
        FactorId, Ingredient, IngredientId, IngredientQuantity, ProductId, QuantityId,
    };

    fn kg_factors(entries: &[(&str, f64)]) -> HashMap<String, FactorInput> {
        entries
            .iter()
            .map(|(name, co2e)| {
                (
                    name.to_string(),
                    FactorInput {
                        unit: Unit::Kg,
                        co2e_per_unit: *co2e,
                    },
                )
            })
            .collect()
    }

    fn pizza_lines() -> Vec<QuantityInput<'static>> {
        vec![
            QuantityInput {
                ingredient: "flour",
                quantity: 100.0,
                unit: Unit::G,
            },
            QuantityInput {
                ingredient: "ham",
                quantity: 50.0,
                unit: Unit::G,
            },
            QuantityInput {
                ingredient: "oliveOil",
                quantity: 10.0,
                unit: Unit::G,
            },
        ]
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-12,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn pizza_scores_match_reference_values() {
        let factors = kg_factors(&[("flour", 0.14), ("ham", 0.11), ("oliveOil", 0.15)]);
        let sheet = compute_scores(&pizza_lines(), &factors).unwrap();

        assert_eq!(sheet.len(), 3);
        assert_close(sheet.get("flour").unwrap(), 0.014);
        assert_close(sheet.get("ham").unwrap(), 0.0055);
        assert_close(sheet.get("oliveOil").unwrap(), 0.0015);
        assert_close(sheet.total(), 0.021);
    }

    #[test]
    fn one_missing_factor_fails_whole_product() {
        let factors = kg_factors(&[("flour", 0.14), ("oliveOil", 0.15)]);
        let err = compute_scores(&pizza_lines(), &factors).unwrap_err();
        assert_eq!(
            err,
            ScoreError::MissingFactor {
                ingredient: "ham".to_string()
            }
        );
    }

    #[test]
    fn factor_names_match_exactly() {
        let factors = kg_factors(&[("Flour", 0.14), ("ham", 0.11), ("oliveOil", 0.15)]);
        assert!(matches!(
            compute_scores(&pizza_lines(), &factors),
            Err(ScoreError::MissingFactor { ingredient }) if ingredient == "flour"
        ));
    }

    #[test]
    fn incompatible_units_fail_whole_product() {
        let mut factors = kg_factors(&[("flour", 0.14), ("ham", 0.11)]);
        factors.insert(
            "oliveOil".to_string(),
            FactorInput {
                unit: Unit::L,
                co2e_per_unit: 0.15,
            },
        );

        let err = compute_scores(&pizza_lines(), &factors).unwrap_err();
        assert_eq!(
            err,
            ScoreError::Conversion {
                ingredient: "oliveOil".to_string(),
                source: CoreError::IncompatibleUnits {
                    from: Unit::G,
                    to: Unit::L,
                },
            }
        );
    }

    #[test]
    fn missing_factor_reported_before_conversion_error() {
        let mut factors = kg_factors(&[("flour", 0.14)]);
        factors.insert(
            "oliveOil".to_string(),
            FactorInput {
                unit: Unit::Ml,
                co2e_per_unit: 0.15,
            },
        );
        let lines = pizza_lines();
        assert!(matches!(
            compute_scores(&lines, &factors),
            Err(ScoreError::MissingFactor { .. })
        ));
    }

    #[test]
    fn volume_ingredient_converted_to_factor_unit() {
        let lines = [QuantityInput {
            ingredient: "milk",
            quantity: 25.0,
            unit: Unit::Cl,
        }];
        let factors = HashMap::from([(
            "milk".to_string(),
            FactorInput {
                unit: Unit::L,
                co2e_per_unit: 1.2,
            },
        )]);

        let sheet = compute_scores(&lines, &factors).unwrap();
        assert_close(sheet.get("milk").unwrap(), 0.3);
    }

    #[test]
    fn computation_is_deterministic() {
        let factors = kg_factors(&[("flour", 0.14), ("ham", 0.11), ("oliveOil", 0.15)]);
        let first = compute_scores(&pizza_lines(), &factors).unwrap();
        let second = compute_scores(&pizza_lines(), &factors).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_product_scores_zero() {
        let sheet = compute_scores(&[], &HashMap::new()).unwrap();
        assert!(sheet.is_empty());
        assert_eq!(sheet.total(), 0.0);
    }

    #[test]
    fn score_product_keys_contributions_by_ids() {
        let product = Product {
            id: ProductId(1),
            name: "toast".to_string(),
            ingredients: vec![
                IngredientQuantity {
                    id: QuantityId(10),
                    product_id: ProductId(1),
                    ingredient: Ingredient {
                        id: IngredientId(100),
                        name: "flour".to_string(),
                        unit: Unit::G,
                    },
                    quantity: 200.0,
                },
                IngredientQuantity {
                    id: QuantityId(11),
                    product_id: ProductId(1),
                    ingredient: Ingredient {
                        id: IngredientId(101),
                        name: "cheese".to_string(),
                        unit: Unit::Kg,
                    },
                    quantity: 0.05,
                },
            ],
        };
        let factors = HashMap::from([
            (
                "flour".to_string(),
                EmissionFactor {
                    id: FactorId(7),
                    name: "flour".to_string(),
                    unit: Unit::Kg,
                    co2e_per_unit: 0.14,
                    source: "Agrybalise".to_string(),
                },
            ),
            (
                "cheese".to_string(),
                EmissionFactor {
                    id: FactorId(8),
                    name: "cheese".to_string(),
                    unit: Unit::Kg,
                    co2e_per_unit: 0.12,
                    source: "Agrybalise".to_string(),
                },
            ),
        ]);

        let contributions = score_product(&product, &factors).unwrap();
        assert_eq!(contributions.len(), 2);
        assert_eq!(contributions[0].factor_id, FactorId(7));
        assert_eq!(contributions[0].quantity_id, QuantityId(10));
        assert_close(contributions[0].score, 0.028);
        assert_eq!(contributions[1].factor_id, FactorId(8));
        assert_eq!(contributions[1].quantity_id, QuantityId(11));
        assert_close(contributions[1].score, 0.006);
    }
}
