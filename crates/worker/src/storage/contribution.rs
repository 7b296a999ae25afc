//! Contribution storage: rescore, invalidate and report product footprints.
//!
//! For any product, either every ingredient quantity has a contribution or
//! none has. Writes are whole-product and happen inside a [`Rescore`]
//! transaction, which holds the store's write lock from the moment it is
//! opened until it commits.

use super::catalog::{delete_product_contributions, load_factors_matching, load_product_by_id};
use super::Storage;
use anyhow::{bail, Context, Result};
use footprint_core::types::{
    Contribution, EmissionFactor, FactorId, FootprintReport, Product, ProductId, QuantityId,
};
use sqlx::{Row, Sqlite, Transaction};
use std::collections::{BTreeSet, HashMap};

/// A product recomputation in progress.
///
/// The product and its factors were read after the write lock was taken, so
/// no other writer can change them until this commits. Dropping it without
/// calling [`Rescore::write`] or [`Rescore::invalidate`] rolls back.
pub struct Rescore {
    tx: Transaction<'static, Sqlite>,
    product: Product,
    factors: HashMap<String, EmissionFactor>,
    cleared: u64,
}

impl std::fmt::Debug for Rescore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rescore")
            .field("product", &self.product)
            .field("factors", &self.factors)
            .field("cleared", &self.cleared)
            .finish_non_exhaustive()
    }
}

impl Rescore {
    /// The product as currently committed.
    pub fn product(&self) -> &Product {
        &self.product
    }

    /// Factors matching the product's ingredient names, keyed by name.
    pub fn factors(&self) -> &HashMap<String, EmissionFactor> {
        &self.factors
    }

    /// Persist one contribution per ingredient quantity and commit.
    ///
    /// Fails, writing nothing, unless `contributions` covers every quantity of
    /// the product exactly once with one of the loaded factors.
    pub async fn write(mut self, contributions: &[Contribution]) -> Result<usize> {
        let expected: BTreeSet<QuantityId> = self.product.quantity_ids().into_iter().collect();
        let covered: BTreeSet<QuantityId> = contributions.iter().map(|c| c.quantity_id).collect();
        let known: BTreeSet<FactorId> = self.factors.values().map(|f| f.id).collect();

        if covered != expected || contributions.len() != expected.len() {
            bail!(
                "Contributions for product {} do not cover its {} ingredients",
                self.product.name,
                expected.len()
            );
        }
        if let Some(c) = contributions.iter().find(|c| !known.contains(&c.factor_id)) {
            bail!(
                "Contribution for product {} references unknown factor {}",
                self.product.name,
                c.factor_id
            );
        }

        for contribution in contributions {
            sqlx::query(
                r#"
                INSERT INTO contributions (factor_id, quantity_id, score)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(contribution.factor_id.get())
            .bind(contribution.quantity_id.get())
            .bind(contribution.score)
            .execute(&mut *self.tx)
            .await
            .context("Failed to insert contribution")?;
        }

        self.tx
            .commit()
            .await
            .context("Failed to commit contributions")?;

        Ok(contributions.len())
    }

    /// Leave the product without contributions and commit.
    ///
    /// Returns the number of contributions removed.
    pub async fn invalidate(self) -> Result<u64> {
        self.tx
            .commit()
            .await
            .context("Failed to commit invalidation")?;

        Ok(self.cleared)
    }
}

impl Storage {
    /// Open a recomputation of one product.
    ///
    /// The transaction starts by deleting the product's contributions, which
    /// takes the write lock, then reads the product and the factors for its
    /// ingredient names. Concurrent catalog writes and other recomputations
    /// wait until it commits, so the scores written always derive from the
    /// latest committed data. Returns `None` if the product no longer exists.
    pub async fn begin_rescore(&self, product_id: ProductId) -> Result<Option<Rescore>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin contribution transaction")?;

        let cleared = delete_product_contributions(&mut tx, product_id).await?;

        let Some(product) = load_product_by_id(&mut tx, product_id).await? else {
            tx.commit()
                .await
                .context("Failed to commit contribution transaction")?;
            return Ok(None);
        };
        let factors = load_factors_matching(&mut tx, &product.ingredient_names()).await?;

        Ok(Some(Rescore {
            tx,
            product,
            factors,
            cleared,
        }))
    }

    /// Persisted contributions of a product, in quantity order.
    pub async fn find_contributions(&self, product_id: ProductId) -> Result<Vec<Contribution>> {
        let rows = sqlx::query(
            r#"
            SELECT c.factor_id, c.quantity_id, c.score
            FROM contributions c
            JOIN ingredient_quantities q ON q.id = c.quantity_id
            WHERE q.product_id = ?
            ORDER BY c.quantity_id ASC
            "#,
        )
        .bind(product_id.get())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch contributions")?;

        Ok(rows
            .iter()
            .map(|row| Contribution {
                factor_id: FactorId(row.get::<i64, _>("factor_id")),
                quantity_id: QuantityId(row.get::<i64, _>("quantity_id")),
                score: row.get::<f64, _>("score"),
            })
            .collect())
    }

    /// Footprint of a product by name.
    ///
    /// `None` when the product does not exist or has no complete footprint.
    pub async fn footprint_report(&self, name: &str) -> Result<Option<FootprintReport>> {
        let Some(product) = self.find_product_by_name(name).await? else {
            return Ok(None);
        };

        let rows = sqlx::query(
            r#"
            SELECT i.name, c.score
            FROM contributions c
            JOIN ingredient_quantities q ON q.id = c.quantity_id
            JOIN ingredients i ON i.id = q.ingredient_id
            WHERE q.product_id = ?
            ORDER BY q.id ASC
            "#,
        )
        .bind(product.id.get())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch footprint")?;

        if rows.is_empty() || rows.len() != product.ingredients.len() {
            return Ok(None);
        }

        let scores = rows
            .iter()
            .map(|row| (row.get::<String, _>("name"), row.get::<f64, _>("score")))
            .collect();

        Ok(Some(FootprintReport::from_scores(product.name, scores)))
    }
}
