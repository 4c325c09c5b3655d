//! testpost CLI - publish test-runner result files to a test-run store.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::FutureExt;
use tracing::{Level, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use testpost::config::{self, Config};
use testpost::exit_codes::ExitCode;
use testpost::publish::RunTarget;
use testpost::publish::http::AzureDevOpsFactory;
use testpost::publish::pool::PublishWorkerPool;
use testpost::report;
use testpost::run::{self, RunOptions};

#[derive(Parser)]
#[command(name = "testpost")]
#[command(about = "Publish test-runner result files to a test-run store", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "testpost.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read result files and publish them
    Publish {
        /// Override the number of publish workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Override the number of results per batch
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Override the run results are added to
        #[arg(long)]
        run_id: Option<u64>,

        /// Override the search roots (repeatable)
        #[arg(long = "root")]
        roots: Vec<PathBuf>,

        /// Override the placeholder work item name
        #[arg(long)]
        work_item: Option<String>,

        /// Exit code of the step that produced the result files
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        upstream_exit_code: i32,
    },

    /// Read result files and print what was found, without publishing
    Scan {
        /// Directories to search (defaults to the configured roots)
        roots: Vec<PathBuf>,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Failed to set up logging: {}", e);
        std::process::exit(ExitCode::UNHANDLED_ERROR);
    }

    let code = match AssertUnwindSafe(dispatch(cli)).catch_unwind().await {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            error!("{:#}", e);
            ExitCode::UNHANDLED_ERROR
        }
        Err(_) => {
            error!("Unexpected panic");
            ExitCode::UNHANDLED_ERROR
        }
    };
    std::process::exit(code);
}

fn init_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_writer(std::io::stderr);

    // RUST_LOG takes precedence over --verbose when set.
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        let subscriber = builder.with_env_filter(EnvFilter::from_default_env()).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = builder.with_max_level(log_level).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

async fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Publish {
            workers,
            batch_size,
            run_id,
            roots,
            work_item,
            upstream_exit_code,
        } => {
            let mut config = config::load_config(&cli.config)
                .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
            if let Some(workers) = workers {
                config.publish.workers = workers;
            }
            if let Some(batch_size) = batch_size {
                config.publish.batch_size = batch_size;
            }
            if !roots.is_empty() {
                config.search.roots = roots;
            }
            if let Some(work_item) = work_item {
                config.search.work_item = work_item;
            }
            publish(config, run_id, upstream_exit_code).await
        }
        Commands::Scan { roots } => {
            let config = load_or_default(&cli.config)?;
            let roots = if roots.is_empty() {
                config.search.roots
            } else {
                roots
            };
            scan(&roots, config.publish.batch_size)
        }
        Commands::Validate => validate_config(&cli.config),
    }
}

/// Loads the config file, falling back to defaults if it does not exist.
fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        info!("No config file at {}; using defaults", path.display());
        Ok(Config::default())
    }
}

async fn publish(config: Config, run_id: Option<u64>, upstream_exit_code: i32) -> Result<i32> {
    let store = config
        .store
        .as_ref()
        .context("The [store] section is required to publish")?;
    let run_id = run_id
        .or(store.run_id)
        .context("No run id: set store.run_id or pass --run-id")?;

    let factory = AzureDevOpsFactory::from_config(store)?;
    let target = RunTarget {
        project: store.team_project.clone(),
        run_id,
    };
    let pool = PublishWorkerPool::new(factory, target, config.publish.workers)
        .with_limits(config.publish.limits());

    let options = RunOptions {
        roots: config.search.roots.clone(),
        work_item: config.search.work_item.clone(),
        batch_size: config.publish.batch_size,
        upstream_exit_code,
    };

    let summary = run::publish(&pool, &options).await?;
    report::print_summary(&summary);
    Ok(summary.exit_code())
}

fn scan(roots: &[PathBuf], batch_size: usize) -> Result<i32> {
    let stats = run::scan(roots, batch_size);
    report::print_scan(&stats);
    Ok(ExitCode::OK)
}

fn validate_config(config_path: &Path) -> Result<i32> {
    let config = config::load_config(config_path)?;

    println!("Configuration is valid!");
    println!();
    println!("Settings:");
    println!("  Workers: {}", config.publish.workers);
    println!("  Batch size: {}", config.publish.batch_size);
    match config.publish.max_attachments {
        Some(max) => println!("  Max attachments per worker: {}", max),
        None => println!("  Max attachments per worker: unlimited"),
    }
    println!(
        "  Max attachment size: {} bytes",
        config.publish.max_attachment_bytes
    );
    let roots: Vec<String> = config
        .search
        .roots
        .iter()
        .map(|r| r.display().to_string())
        .collect();
    println!("  Search roots: {}", roots.join(", "));
    println!("  Work item: {}", config.search.work_item);

    match &config.store {
        Some(store) => {
            println!("  Store: {}{}", store.collection_uri, store.team_project);
            match store.run_id {
                Some(run_id) => println!("  Run id: {}", run_id),
                None => println!("  Run id: (from --run-id)"),
            }
            println!("  API version: {}", store.api_version);
            println!(
                "  Auth: {:?} from ${}",
                store.auth.kind, store.auth.token_env
            );
        }
        None => println!("  Store: not configured (scan only)"),
    }

    Ok(ExitCode::OK)
}
