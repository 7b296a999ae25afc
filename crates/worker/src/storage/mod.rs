//! Storage layer for the footprint worker.
//!
//! A single SQLite database is both the source of truth and the queue.
//! This module provides database operations for:
//! - Catalog (products, ingredients, emission factors) with change capture
//! - Pending changes (enqueue, claim, reclaim, resolve)
//! - Contributions (rescore, invalidate, report)

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseConfig;

pub mod catalog;
pub mod contribution;
pub mod pending;
pub mod types;

pub use contribution::Rescore;
pub use types::*;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Database storage for the worker.
///
/// Provides async access to SQLite database with connection pooling.
/// Cloning is cheap and shares the pool.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance with the given database URL.
    ///
    /// This will create the database file if it doesn't exist. Call
    /// [`Storage::run_migrations`] before use.
    ///
    /// # Arguments
    /// * `database_url` - SQLite database URL (e.g., "sqlite://footprint.db")
    /// * `max_connections` - Pool ceiling (default 5)
    /// * `min_connections` - Pool floor (default 1)
    ///
    /// # Example
    /// ```no_run
    /// # use footprint_worker::storage::Storage;
    /// # async fn example() -> anyhow::Result<()> {
    /// let storage = Storage::new("sqlite://footprint.db", None, None).await?;
    /// storage.run_migrations().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(
        database_url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        Self::connect(
            database_url,
            max_connections.unwrap_or(5),
            min_connections.unwrap_or(1),
            DEFAULT_BUSY_TIMEOUT,
        )
        .await
    }

    /// Create a storage instance from the `[database]` configuration section.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::connect(
            &config.url,
            config.max_connections,
            config.min_connections,
            Duration::from_millis(config.busy_timeout_ms),
        )
        .await
    }

    /// Create a new storage instance with a specific file path.
    pub async fn new_with_path<P: AsRef<Path>>(
        path: P,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        let database_url = format!("sqlite://{}", path.as_ref().display());
        Self::new(&database_url, max_connections, min_connections).await
    }

    async fn connect(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        busy_timeout: Duration,
    ) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        // Writers are serialized by SQLite; concurrent claimers wait on the
        // busy timeout instead of failing.
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {database_url}"))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    ///
    /// This should be called once during initialization to ensure the schema is up to date.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Migrations completed successfully");

        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }

    /// Get database statistics.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let product_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;

        let factor_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM emission_factors")
            .fetch_one(&self.pool)
            .await?;

        let contribution_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contributions")
            .fetch_one(&self.pool)
            .await?;

        let scored_product_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(DISTINCT q.product_id)
            FROM contributions c
            JOIN ingredient_quantities q ON q.id = c.quantity_id
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let queue = self.queue_stats().await?;

        Ok(DatabaseStats {
            product_count: product_count as u64,
            factor_count: factor_count as u64,
            contribution_count: contribution_count as u64,
            scored_product_count: scored_product_count as u64,
            queue,
        })
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;

        Ok(())
    }
}
