//! Seed files: emission factors and products loaded through the catalog.
//!
//! ```toml
//! [[factors]]
//! name = "ham"
//! unit = "kg"
//! co2e_per_unit = 0.11
//! source = "Agrybalise"
//!
//! [[products]]
//! name = "pizza"
//! ingredients = [
//!     { name = "ham", unit = "g", quantity = 50.0 },
//! ]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::storage::{NewFactor, NewProduct, Storage};

/// Contents of a seed file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedData {
    /// Emission factors, saved first.
    #[serde(default)]
    pub factors: Vec<NewFactor>,

    /// Products, saved after the factors.
    #[serde(default)]
    pub products: Vec<NewProduct>,
}

/// Number of rows written by [`SeedData::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    /// Emission factors saved.
    pub factors: usize,
    /// Products saved.
    pub products: usize,
}

impl SeedData {
    /// Parse a seed file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file: {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse seed file: {}", path.display()))
    }

    /// Parse seed data from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        toml::from_str(toml).context("Invalid seed data")
    }

    /// Save every factor and product; each save enqueues its pending change.
    pub async fn apply(&self, storage: &Storage) -> Result<SeedSummary> {
        for factor in &self.factors {
            storage.save_factor(factor).await?;
        }
        for product in &self.products {
            storage.save_product(product).await?;
        }

        info!(
            "Seeded {} emission factors and {} products",
            self.factors.len(),
            self.products.len()
        );

        Ok(SeedSummary {
            factors: self.factors.len(),
            products: self.products.len(),
        })
    }
}
