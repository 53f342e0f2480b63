//! chapter-sync CLI
//!
//! Registers parent items and runs synchronization passes against the local
//! SQLite catalog.

use std::path::PathBuf;
use std::sync::Arc;

use chapter_sync::{
    error::{AppError, Result},
    models::{Config, LoggingConfig, RunReport},
    pipeline::{self, SyncOrchestrator},
    sources::SourceRegistry,
    storage::{CatalogStore, SqliteCatalog},
};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

/// chapter-sync - Incremental Web Novel Chapter Synchronizer
#[derive(Parser, Debug)]
#[command(
    name = "chapter-sync",
    version,
    about = "Incremental web novel chapter synchronizer"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Catalog database (overrides storage.database_path)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a parent item to track
    Add {
        /// Source id from the configuration
        source: String,

        /// URL of the item's main page
        url: String,

        #[arg(long)]
        title: Option<String>,
    },

    /// Register every parent item listed in a source's sitemap
    Discover {
        /// Source id from the configuration
        source: String,
    },

    /// List tracked parent items and their watermarks
    List,

    /// Run a synchronization pass
    Sync {
        /// Parent item ids
        ids: Vec<i64>,

        /// Sync every tracked parent item
        #[arg(long, conflicts_with = "ids")]
        all: bool,

        /// Print run reports as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration file
    Validate,
}

/// Initialize logging with a default filter; `RUST_LOG` still wins.
fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Cancel the token on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted; letting in-flight fetches finish");
            trigger.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = Config::load(&cli.config);
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        loaded
            .as_ref()
            .map(|c| c.logging.level.clone())
            .unwrap_or_else(|_| LoggingConfig::default().level)
    };
    init_logging(&level);

    let config = loaded.unwrap_or_else(|e| {
        log::warn!(
            "Config load failed from {}: {}. Using defaults.",
            cli.config.display(),
            e
        );
        Config::default()
    });

    let command = match cli.command {
        Command::Validate => return validate(&config),
        command => command,
    };

    config.validate()?;
    let database = cli
        .database
        .clone()
        .unwrap_or_else(|| config.storage.database_path.clone());
    let catalog = Arc::new(SqliteCatalog::connect(&database).await?);
    log::debug!("Catalog opened at {}", database.display());

    let result = run_command(command, &config, Arc::clone(&catalog)).await;
    catalog.close().await;
    result
}

fn validate(config: &Config) -> Result<()> {
    log::info!("Validating configuration...");
    if let Err(e) = config.validate() {
        log::error!("Config validation failed: {}", e);
        return Err(e);
    }
    log::info!("✓ Config OK ({} source(s))", config.sources.len());
    Ok(())
}

async fn run_command(command: Command, config: &Config, catalog: Arc<SqliteCatalog>) -> Result<()> {
    match command {
        Command::Add { source, url, title } => {
            if config.source(&source).is_none() {
                return Err(AppError::UnknownSource(source));
            }
            url::Url::parse(&url)?;
            let parent = catalog
                .register_parent(&source, &url, title.as_deref())
                .await?;
            log::info!("Tracking parent {}: {}", parent.id, parent.label());
        }

        Command::Discover { source } => {
            let registry = SourceRegistry::from_config(config)?;
            let report = pipeline::discover(&*catalog, &registry, &source).await?;
            log::info!(
                "✓ {} new parent item(s) from {} ({} already tracked)",
                report.registered,
                report.source_id,
                report.already_tracked
            );
        }

        Command::List => {
            let parents = catalog.list_parents().await?;
            if parents.is_empty() {
                log::info!("No parent items tracked yet. Use 'add' first.");
            }
            for parent in parents {
                let status = match parent.details.is_completed {
                    Some(true) => "completed",
                    Some(false) => "ongoing",
                    None => "-",
                };
                let synced = parent
                    .last_synced_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:>5}  {:<10} observed {:>5}  stored {:>5}  {:<9}  synced {}  {}",
                    parent.id,
                    parent.source_id,
                    parent.observed_remote_max_sequence,
                    parent.stored_max_sequence,
                    status,
                    synced,
                    parent.label()
                );
            }
        }

        Command::Sync { ids, all, json } => {
            if ids.is_empty() && !all {
                return Err(AppError::validation("Give parent ids or --all"));
            }

            let registry = SourceRegistry::from_config(config)?;
            let orchestrator = SyncOrchestrator::new(catalog, registry, &config.sync);
            let cancel = cancel_on_ctrl_c();

            let outcome = if all {
                pipeline::run_all(&orchestrator, &cancel).await?
            } else {
                pipeline::run_batch(&orchestrator, &ids, &cancel).await
            };

            if json {
                let reports: Vec<&RunReport> = outcome.reports().collect();
                println!("{}", serde_json::to_string_pretty(&reports)?);
            }
            let failed = outcome.failure_count();
            if failed > 0 {
                return Err(AppError::validation(format!("{failed} pass(es) failed")));
            }
        }

        Command::Validate => validate(config)?,
    }

    Ok(())
}
