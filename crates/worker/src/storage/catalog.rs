//! Catalog storage: products, ingredients and emission factors.
//!
//! Every insert or update of a product or factor enqueues a pending change in
//! the same transaction.

use super::pending::insert_pending;
use super::{now_millis, NewFactor, NewProduct, Storage};
use anyhow::{Context, Result};
use footprint_core::types::{
    validate_emission_factor, validate_quantity, ChangeRef, EmissionFactor, FactorId, Ingredient,
    IngredientId, IngredientQuantity, Product, ProductId, ProductRef, QuantityId,
};
use footprint_core::units::{convert_units, Unit};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

fn parse_unit(row: &SqliteRow, column: &str) -> Result<Unit> {
    Ok(row.get::<String, _>(column).parse::<Unit>()?)
}

fn row_to_factor(row: &SqliteRow) -> Result<EmissionFactor> {
    Ok(EmissionFactor {
        id: FactorId(row.get::<i64, _>("id")),
        name: row.get::<String, _>("name"),
        unit: parse_unit(row, "unit")?,
        co2e_per_unit: row.get::<f64, _>("co2e_per_unit"),
        source: row.get::<String, _>("source"),
    })
}

/// Load a product and its ingredient quantities on an open connection.
async fn load_product(
    conn: &mut SqliteConnection,
    id: ProductId,
    name: String,
) -> Result<Product> {
    let rows = sqlx::query(
        r#"
        SELECT q.id, q.quantity, i.id AS ingredient_id, i.name, i.unit
        FROM ingredient_quantities q
        JOIN ingredients i ON i.id = q.ingredient_id
        WHERE q.product_id = ?
        ORDER BY q.id ASC
        "#,
    )
    .bind(id.get())
    .fetch_all(&mut *conn)
    .await
    .with_context(|| format!("Failed to load ingredients of product {name}"))?;

    let mut ingredients = Vec::with_capacity(rows.len());
    for row in &rows {
        ingredients.push(IngredientQuantity {
            id: QuantityId(row.get::<i64, _>("id")),
            product_id: id,
            ingredient: Ingredient {
                id: IngredientId(row.get::<i64, _>("ingredient_id")),
                name: row.get::<String, _>("name"),
                unit: parse_unit(row, "unit")?,
            },
            quantity: row.get::<f64, _>("quantity"),
        });
    }

    Ok(Product {
        id,
        name,
        ingredients,
    })
}

/// Load a product by id on an open connection or transaction.
pub(crate) async fn load_product_by_id(
    conn: &mut SqliteConnection,
    id: ProductId,
) -> Result<Option<Product>> {
    let name: Option<String> = sqlx::query_scalar("SELECT name FROM products WHERE id = ?")
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch product")?;

    match name {
        Some(name) => Ok(Some(load_product(conn, id, name).await?)),
        None => Ok(None),
    }
}

/// Emission factors matching any of `names`, keyed by name, on an open
/// connection or transaction.
pub(crate) async fn load_factors_matching(
    conn: &mut SqliteConnection,
    names: &[String],
) -> Result<HashMap<String, EmissionFactor>> {
    if names.is_empty() {
        return Ok(HashMap::new());
    }

    let mut query = QueryBuilder::<Sqlite>::new(
        "SELECT id, name, unit, co2e_per_unit, source FROM emission_factors WHERE name IN (",
    );
    let mut separated = query.separated(", ");
    for name in names {
        separated.push_bind(name.as_str());
    }
    separated.push_unseparated(")");

    let rows = query
        .build()
        .fetch_all(&mut *conn)
        .await
        .context("Failed to fetch emission factors")?;

    rows.iter()
        .map(|row| row_to_factor(row).map(|factor| (factor.name.clone(), factor)))
        .collect()
}

/// Delete every contribution of a product.
pub(crate) async fn delete_product_contributions(
    conn: &mut SqliteConnection,
    product_id: ProductId,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM contributions
        WHERE quantity_id IN (
            SELECT id FROM ingredient_quantities WHERE product_id = ?
        )
        "#,
    )
    .bind(product_id.get())
    .execute(&mut *conn)
    .await
    .with_context(|| format!("Failed to delete contributions of product {product_id}"))?;

    Ok(result.rows_affected())
}

impl Storage {
    /// Insert or replace a product and its ingredient set.
    ///
    /// Ingredients are created on first reference. When an ingredient already
    /// exists in another unit, the quantity is converted to that unit. If the set
    /// of ingredient names changes, the product's contributions are dropped so
    /// they never cover only part of the new set. A product pending change is
    /// enqueued in the same transaction.
    pub async fn save_product(&self, product: &NewProduct) -> Result<ProductId> {
        let mut names = HashSet::with_capacity(product.ingredients.len());
        for line in &product.ingredients {
            if !names.insert(line.name.as_str()) {
                anyhow::bail!(
                    "Duplicate ingredient '{}' in product '{}'",
                    line.name,
                    product.name
                );
            }
            validate_quantity(line.quantity)
                .with_context(|| format!("Invalid quantity for ingredient '{}'", line.name))?;
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin product transaction")?;

        // Upsert first so the transaction takes the write lock up front.
        let product_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO products (name)
            VALUES (?)
            ON CONFLICT(name) DO UPDATE SET name = excluded.name
            RETURNING id
            "#,
        )
        .bind(&product.name)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("Failed to upsert product {}", product.name))?;
        let product_id = ProductId(product_id);

        let previous: BTreeSet<String> = sqlx::query_scalar::<_, String>(
            r#"
            SELECT i.name
            FROM ingredient_quantities q
            JOIN ingredients i ON i.id = q.ingredient_id
            WHERE q.product_id = ?
            "#,
        )
        .bind(product_id.get())
        .fetch_all(&mut *tx)
        .await
        .context("Failed to load previous ingredient set")?
        .into_iter()
        .collect();

        let mut kept_ingredient_ids = Vec::with_capacity(product.ingredients.len());
        for line in &product.ingredients {
            let existing = sqlx::query("SELECT id, unit FROM ingredients WHERE name = ?")
                .bind(&line.name)
                .fetch_optional(&mut *tx)
                .await
                .with_context(|| format!("Failed to look up ingredient {}", line.name))?;

            let (ingredient_id, quantity) = match existing {
                Some(row) => {
                    let unit = parse_unit(&row, "unit")?;
                    let quantity = convert_units(line.quantity, line.unit, unit).with_context(
                        || format!("Cannot store '{}' in {} (stored as {})", line.name, line.unit, unit),
                    )?;
                    (row.get::<i64, _>("id"), quantity)
                }
                None => {
                    let id: i64 = sqlx::query_scalar(
                        "INSERT INTO ingredients (name, unit) VALUES (?, ?) RETURNING id",
                    )
                    .bind(&line.name)
                    .bind(line.unit.as_str())
                    .fetch_one(&mut *tx)
                    .await
                    .with_context(|| format!("Failed to insert ingredient {}", line.name))?;
                    (id, line.quantity)
                }
            };

            sqlx::query(
                r#"
                INSERT INTO ingredient_quantities (product_id, ingredient_id, quantity)
                VALUES (?, ?, ?)
                ON CONFLICT(product_id, ingredient_id) DO UPDATE SET quantity = excluded.quantity
                "#,
            )
            .bind(product_id.get())
            .bind(ingredient_id)
            .bind(quantity)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to store quantity of {}", line.name))?;

            kept_ingredient_ids.push(ingredient_id);
        }

        let current: BTreeSet<String> = product
            .ingredients
            .iter()
            .map(|line| line.name.clone())
            .collect();

        if previous != current {
            let cleared = delete_product_contributions(&mut tx, product_id).await?;
            if cleared > 0 {
                debug!(
                    "Cleared {} contributions of product {} after ingredient set change",
                    cleared, product.name
                );
            }

            let mut delete = QueryBuilder::<Sqlite>::new(
                "DELETE FROM ingredient_quantities WHERE product_id = ",
            );
            delete.push_bind(product_id.get());
            if !kept_ingredient_ids.is_empty() {
                delete.push(" AND ingredient_id NOT IN (");
                let mut ids = delete.separated(", ");
                for id in &kept_ingredient_ids {
                    ids.push_bind(*id);
                }
                ids.push_unseparated(")");
            }
            delete
                .build()
                .execute(&mut *tx)
                .await
                .context("Failed to remove dropped ingredient quantities")?;
        }

        insert_pending(&mut tx, ChangeRef::Product(product_id), now_millis()).await?;

        tx.commit()
            .await
            .context("Failed to commit product transaction")?;

        debug!("Saved product {} ({})", product.name, product_id);

        Ok(product_id)
    }

    /// Delete a product by name.
    ///
    /// Its quantities, contributions and pending changes go with it.
    /// Ingredients are shared and kept. Returns `false` if no such product.
    pub async fn delete_product(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM products WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete product {name}"))?;

        Ok(result.rows_affected() > 0)
    }

    /// Get a product with its ingredient quantities by name.
    pub async fn find_product_by_name(&self, name: &str) -> Result<Option<Product>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection")?;

        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM products WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch product")?;

        match id {
            Some(id) => Ok(Some(
                load_product(&mut conn, ProductId(id), name.to_string()).await?,
            )),
            None => Ok(None),
        }
    }

    /// Get a product with its ingredient quantities by id.
    pub async fn find_product_by_id(&self, id: ProductId) -> Result<Option<Product>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        load_product_by_id(&mut conn, id).await
    }

    /// Products that contain an ingredient of the given name.
    pub async fn find_products_by_ingredient_name(&self, name: &str) -> Result<Vec<ProductRef>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT p.id, p.name
            FROM products p
            JOIN ingredient_quantities q ON q.product_id = p.id
            JOIN ingredients i ON i.id = q.ingredient_id
            WHERE i.name = ?
            ORDER BY p.id ASC
            "#,
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to find products using {name}"))?;

        Ok(rows
            .iter()
            .map(|row| ProductRef {
                id: ProductId(row.get::<i64, _>("id")),
                name: row.get::<String, _>("name"),
            })
            .collect())
    }

    /// Insert or update an emission factor by name.
    ///
    /// Enqueues a factor pending change in the same transaction.
    pub async fn save_factor(&self, factor: &NewFactor) -> Result<FactorId> {
        validate_emission_factor(factor.co2e_per_unit)
            .with_context(|| format!("Invalid emission factor for {}", factor.name))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin factor transaction")?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO emission_factors (name, unit, co2e_per_unit, source)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                unit = excluded.unit,
                co2e_per_unit = excluded.co2e_per_unit,
                source = excluded.source
            RETURNING id
            "#,
        )
        .bind(&factor.name)
        .bind(factor.unit.as_str())
        .bind(factor.co2e_per_unit)
        .bind(&factor.source)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("Failed to upsert emission factor {}", factor.name))?;
        let id = FactorId(id);

        insert_pending(&mut tx, ChangeRef::Factor(id), now_millis()).await?;

        tx.commit()
            .await
            .context("Failed to commit factor transaction")?;

        debug!("Saved emission factor {} ({})", factor.name, id);

        Ok(id)
    }

    /// Delete an emission factor by name.
    ///
    /// Every product using an ingredient of that name loses all of its
    /// contributions and gets a product pending change, in one transaction.
    /// Returns the affected products, or `None` if no such factor.
    pub async fn delete_factor(&self, name: &str) -> Result<Option<Vec<ProductRef>>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin factor transaction")?;

        // Contributions must go before the factor they reference.
        let cleared = sqlx::query(
            r#"
            DELETE FROM contributions
            WHERE quantity_id IN (
                SELECT q.id
                FROM ingredient_quantities q
                WHERE q.product_id IN (
                    SELECT u.product_id
                    FROM ingredient_quantities u
                    JOIN ingredients i ON i.id = u.ingredient_id
                    WHERE i.name = ?
                )
            )
            "#,
        )
        .bind(name)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to invalidate products using {name}"))?;

        let deleted: Option<i64> =
            sqlx::query_scalar("DELETE FROM emission_factors WHERE name = ? RETURNING id")
                .bind(name)
                .fetch_optional(&mut *tx)
                .await
                .with_context(|| format!("Failed to delete emission factor {name}"))?;

        if deleted.is_none() {
            tx.rollback().await.context("Failed to roll back")?;
            return Ok(None);
        }

        let rows = sqlx::query(
            r#"
            SELECT DISTINCT p.id, p.name
            FROM products p
            JOIN ingredient_quantities q ON q.product_id = p.id
            JOIN ingredients i ON i.id = q.ingredient_id
            WHERE i.name = ?
            ORDER BY p.id ASC
            "#,
        )
        .bind(name)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to find dependent products")?;

        let now = now_millis();
        let mut affected = Vec::with_capacity(rows.len());
        for row in &rows {
            let product = ProductRef {
                id: ProductId(row.get::<i64, _>("id")),
                name: row.get::<String, _>("name"),
            };
            insert_pending(&mut tx, ChangeRef::Product(product.id), now).await?;
            affected.push(product);
        }

        tx.commit()
            .await
            .context("Failed to commit factor deletion")?;

        debug!(
            "Deleted emission factor {}, invalidated {} products ({} contributions)",
            name,
            affected.len(),
            cleared.rows_affected()
        );

        Ok(Some(affected))
    }

    /// Get an emission factor by id.
    pub async fn find_factor_by_id(&self, id: FactorId) -> Result<Option<EmissionFactor>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, unit, co2e_per_unit, source
            FROM emission_factors
            WHERE id = ?
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch emission factor")?;

        row.as_ref().map(row_to_factor).transpose()
    }

    /// Get an emission factor by name.
    pub async fn find_factor_by_name(&self, name: &str) -> Result<Option<EmissionFactor>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, unit, co2e_per_unit, source
            FROM emission_factors
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch emission factor")?;

        row.as_ref().map(row_to_factor).transpose()
    }

    /// Emission factors matching any of `names`, keyed by name.
    ///
    /// Names without a factor are simply absent from the map.
    pub async fn find_factors_matching(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, EmissionFactor>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        load_factors_matching(&mut conn, names).await
    }

    /// Emission factors for exactly `names`, or `None` if any is missing.
    pub async fn find_factors_by_names(
        &self,
        names: &[String],
    ) -> Result<Option<HashMap<String, EmissionFactor>>> {
        let found = self.find_factors_matching(names).await?;
        let complete = names.iter().all(|name| found.contains_key(name));
        Ok(complete.then_some(found))
    }
}
