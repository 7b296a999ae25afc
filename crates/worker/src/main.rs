//! Footprint worker - keeps product footprint scores in sync with their sources
//!
//! This binary provides:
//! - The claim/dispatch loop over the pending-change queue
//! - One-shot maintenance commands (process once, reclaim, recompute)
//! - Seeding and inspection of the store

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use footprint_worker::config::{Config, LoggingConfig};
use footprint_worker::recompute::{recompute_product_named, RecomputeOutcome};
use footprint_worker::scheduler::ClaimScheduler;
use footprint_worker::seed::SeedData;
use footprint_worker::storage::{now_millis, Storage};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "footprint-worker")]
#[command(version, about = "Footprint score recomputation worker", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "worker.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the claim/dispatch loop until Ctrl+C
    Run,

    /// Run a single claim/dispatch cycle and exit
    ProcessOnce,

    /// Recompute one product immediately, bypassing the queue
    Recompute {
        /// Product name
        product: String,
    },

    /// Print the footprint of a product as JSON
    Footprint {
        /// Product name
        product: String,
    },

    /// Hand expired leases back to the queue and exit
    Reclaim,

    /// Show queue and store statistics
    Status,

    /// Load emission factors and products from a TOML seed file
    Seed {
        /// Seed file path
        file: String,
    },

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = "sqlite://footprint.db")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::InitDb { database_url } = &command {
        init_logging(cli.debug, &LoggingConfig::default())?;
        return init_database(database_url).await;
    }

    let config = Config::from_file(&cli.config).context("Failed to load configuration")?;
    init_logging(cli.debug, &config.logging)?;

    info!("Footprint worker starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let storage = open_storage(&config).await?;
    let result = run_command(command, &config, &storage).await;
    storage.close().await;

    result
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool, logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("footprint_worker=debug,sqlx=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("footprint_worker={}", logging.level)))
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
            .context("Failed to initialize logging")?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .try_init()
            .context("Failed to initialize logging")?;
    }

    Ok(())
}

async fn open_storage(config: &Config) -> Result<Storage> {
    info!("Database: {}", config.database.url);

    let storage = Storage::from_config(&config.database)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    Ok(storage)
}

async fn run_command(command: Commands, config: &Config, storage: &Storage) -> Result<()> {
    match command {
        Commands::Run => run_worker(config, storage).await,
        Commands::ProcessOnce => {
            let scheduler = ClaimScheduler::from_config(storage.clone(), &config.worker);
            let report = scheduler.run_cycle().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Recompute { product } => {
            match recompute_product_named(storage, &product).await? {
                RecomputeOutcome::Updated {
                    total,
                    contributions,
                } => println!("{product}: {total} kg CO2e ({contributions} contributions)"),
                RecomputeOutcome::Invalidated { reason, .. } => {
                    println!("{product}: no footprint ({reason})")
                }
                RecomputeOutcome::Missing => anyhow::bail!("Product '{product}' not found"),
            }
            Ok(())
        }
        Commands::Footprint { product } => {
            let report = storage.footprint_report(&product).await?;
            if report.is_none() {
                warn!("Product {} has no complete footprint", product);
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Reclaim => {
            let reclaimed = storage
                .reclaim_expired(config.worker.lease_ttl(), now_millis())
                .await?;
            println!("Reclaimed {reclaimed} pending changes");
            Ok(())
        }
        Commands::Status => show_status(storage).await,
        Commands::Seed { file } => {
            let seed = SeedData::from_file(&file)?;
            let summary = seed.apply(storage).await?;
            println!(
                "Seeded {} emission factors and {} products",
                summary.factors, summary.products
            );
            Ok(())
        }
        Commands::InitDb { database_url } => init_database(&database_url).await,
    }
}

/// Main worker service - runs the claim loop until shutdown
async fn run_worker(config: &Config, storage: &Storage) -> Result<()> {
    let scheduler = ClaimScheduler::from_config(storage.clone(), &config.worker);
    let handle = tokio::spawn(async move { scheduler.run().await });

    info!("Worker is running. Press Ctrl+C to stop.");

    tokio::select! {
        result = handle => {
            match result {
                Ok(Ok(())) => {
                    warn!("Claim scheduler exited unexpectedly");
                    Ok(())
                }
                Ok(Err(e)) => Err(e).context("Claim scheduler failed"),
                Err(e) => Err(anyhow::anyhow!("Claim scheduler task panicked: {}", e)),
            }
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received shutdown signal, gracefully shutting down...");
            Ok(())
        }
    }
}

async fn show_status(storage: &Storage) -> Result<()> {
    let stats = storage.stats().await?;

    println!("\n=== Footprint Worker Status ===\n");
    println!("Catalog:");
    println!("  Products: {}", stats.product_count);
    println!("  Emission Factors: {}", stats.factor_count);
    println!("  Products With Footprint: {}", stats.scored_product_count);
    println!("  Contributions: {}", stats.contribution_count);

    println!("\nQueue:");
    println!("  Pending: {}", stats.queue.pending);
    println!("  Processing: {}", stats.queue.processing);
    println!(
        "  Oldest Entry: {}",
        stats
            .queue
            .oldest_created_at
            .and_then(chrono::DateTime::from_timestamp_millis)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "none".to_string())
    );

    println!();

    Ok(())
}

/// Initialize the database
async fn init_database(database_url: &str) -> Result<()> {
    info!("Initializing database: {}", database_url);

    let storage = Storage::new(database_url, None, None)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    info!("Database initialized successfully!");
    info!("  Products: {}", stats.product_count);
    info!("  Emission factors: {}", stats.factor_count);
    info!("  Pending changes: {}", stats.queue.pending);

    storage.close().await;

    Ok(())
}
