//! Anne migration tool
//!
//! Usage: `anne-migrate [--config <path>] <check|phase1..phase6|all>`

use anne_core::config::DestinationSettings;
use anne_core::{init_logging, DestinationKind, DocumentStore, LocalStore, MigrationConfig};
use anne_migrate::{format_duration, run_check, source, MigrationContext, Migrator, Phase};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

const USAGE: &str = "Usage: anne-migrate [--config <path>] <phase>

Phases:
  check     Validate target schemas and report source tables
  phase1    Countries, zones, languages, product options
  phase2    Categories
  phase3    Admins, customers and addresses
  phase4    Products
  phase5    Carts and wishlists
  phase6    Orders
  all       Run phase1 to phase6, stopping at the first failure";

#[derive(Parser)]
#[command(name = "anne-migrate")]
#[command(about = "Migrate the legacy OpenCart store into the Anne document store")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "anne-migrate.toml")]
    config: PathBuf,

    /// check, phase1..phase6 or all
    phase: Option<String>,
}

enum Target {
    Check,
    Phase(Phase),
    All,
}

fn parse_target(token: &str) -> Option<Target> {
    match token {
        "check" => Some(Target::Check),
        "all" => Some(Target::All),
        other => other.parse().ok().map(Target::Phase),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(target) = cli.phase.as_deref().and_then(parse_target) else {
        if let Some(token) = &cli.phase {
            eprintln!("Unknown phase: {token}\n");
        }
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };

    match run(&cli.config, target).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("Migration failed: {:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: &Path, target: Target) -> Result<bool> {
    let config = MigrationConfig::load(config_path)?;
    init_logging(&config.logging)?;

    let run_id = Uuid::new_v4();
    let started = Instant::now();
    info!(%run_id, "Starting anne-migrate {}", env!("CARGO_PKG_VERSION"));

    let source = source::connect(&config.source)
        .await
        .context("Failed to open source store")?;
    info!("Source: {}", source.describe());

    if let Target::Check = target {
        let report = run_check(source.as_ref()).await?;
        report.print();
        return Ok(report.passed());
    }

    let store = open_store(&config.destination).await?;
    info!("Destination: {}", store.backend());

    let ctx = MigrationContext::new(source, store, config.migration, config.verification);
    let mut migrator = Migrator::new(ctx)?;

    let success = match target {
        Target::Phase(phase) => {
            let success = migrator.run_phase(phase).await;
            migrator.print_summary();
            success
        }
        Target::All | Target::Check => migrator.run_all().await,
    };

    let elapsed = format_duration(started.elapsed());
    println!("Finished in {elapsed}: {}", if success { "success" } else { "failed" });
    info!(%run_id, success, "Migration finished in {}", elapsed);
    Ok(success)
}

async fn open_store(settings: &DestinationSettings) -> Result<Arc<dyn DocumentStore>> {
    match settings.kind {
        DestinationKind::Local => match &settings.data_dir {
            Some(dir) => {
                let store = LocalStore::open(dir)
                    .with_context(|| format!("Failed to open data directory {}", dir.display()))?;
                Ok(Arc::new(store))
            }
            None => Ok(Arc::new(LocalStore::in_memory())),
        },
        #[cfg(feature = "mongo-sink")]
        DestinationKind::Mongodb => {
            let store = anne_core::MongoStore::connect(&settings.uri, &settings.database)
                .await
                .context("Failed to connect to MongoDB")?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "mongo-sink"))]
        DestinationKind::Mongodb => {
            anyhow::bail!("MongoDB destination requires building with the mongo-sink feature")
        }
    }
}
