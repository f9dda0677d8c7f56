use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facedex_core::OnnxFaceEncoder;
use facedex_store::Store;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod output;

use config::Config;
use output::SearchResponse;

#[derive(Parser)]
#[command(name = "facedex", version, about = "Enroll faces and identify photos against a face database")]
struct Cli {
    /// SQLite database file (overrides config and FACEDEX_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    #[command(alias = "init_db")]
    InitDb,
    /// Enroll a new person from one or more photos
    #[command(alias = "add_person")]
    AddPerson {
        name: String,
        #[arg(required = true)]
        image_paths: Vec<PathBuf>,
    },
    /// Add more photos to an enrolled person
    #[command(alias = "update_person")]
    UpdatePerson {
        name: String,
        #[arg(required = true)]
        image_paths: Vec<PathBuf>,
        /// Maximum embedding distance to accept a photo
        #[arg(long)]
        tolerance: Option<f64>,
    },
    /// Identify the person in a photo (prints JSON)
    #[command(alias = "search_person")]
    SearchPerson {
        image_path: PathBuf,
        /// Maximum embedding distance to report a match
        #[arg(long)]
        tolerance: Option<f64>,
    },
    /// Look up enrolled people by name (prints JSON)
    #[command(alias = "search_name")]
    SearchName { name: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::InitDb => {
            let config = resolve_config(&cli)?;
            let store = Store::open(&config.db_path)
                .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
            commands::init_db(&store)?;
            println!("Initialized the database.");
        }
        Commands::AddPerson { name, image_paths } => {
            let config = resolve_config(&cli)?;
            let mut store = open_initialized_store(&config)?;
            let mut encoder = load_encoder(&config)?;
            let outcome = commands::add_person(
                &mut store,
                &mut encoder,
                name,
                image_paths,
                config.max_images_per_person,
            )?;
            println!("{outcome}");
        }
        Commands::UpdatePerson {
            name,
            image_paths,
            tolerance,
        } => {
            let config = resolve_config(&cli)?;
            let store = open_initialized_store(&config)?;
            let mut encoder = load_encoder(&config)?;
            let outcomes = commands::update_person(
                &store,
                &mut encoder,
                name,
                image_paths,
                tolerance.unwrap_or(config.update_tolerance),
                config.max_images_per_person,
            )?;
            for outcome in outcomes {
                println!("{outcome}");
            }
        }
        Commands::SearchPerson {
            image_path,
            tolerance,
        } => {
            // Failures are reported in the JSON body, not via the exit code.
            let response = run_search(&cli, image_path, *tolerance).unwrap_or_else(|err| {
                tracing::error!(error = %format!("{err:#}"), "search failed");
                SearchResponse::from_error(&err)
            });
            println!("{}", serde_json::to_string(&response)?);
        }
        Commands::SearchName { name } => {
            let config = resolve_config(&cli)?;
            let store = open_initialized_store(&config)?;
            let response = commands::search_name(&store, name)?;
            println!("{}", serde_json::to_string(&response)?);
        }
    }

    Ok(())
}

/// Config file and environment, with `--db` and `--model-dir` applied on top.
fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(dir) = &cli.model_dir {
        config.model_dir = dir.clone();
    }
    tracing::debug!(?config, "configuration resolved");
    Ok(config)
}

fn run_search(cli: &Cli, image_path: &Path, tolerance: Option<f64>) -> Result<SearchResponse> {
    let config = resolve_config(cli)?;
    let store = open_initialized_store(&config)?;
    let mut encoder = load_encoder(&config)?;
    commands::search_person(
        &store,
        &mut encoder,
        image_path,
        tolerance.unwrap_or(config.search_tolerance),
    )
}

fn open_initialized_store(config: &Config) -> Result<Store> {
    let store = Store::open_existing(&config.db_path)
        .with_context(|| format!("failed to open database {}", config.db_path.display()))?;
    store.ensure_initialized()?;
    Ok(store)
}

fn load_encoder(config: &Config) -> Result<OnnxFaceEncoder> {
    OnnxFaceEncoder::from_model_dir(&config.model_dir).context("failed to load face models")
}
