//! Wikivoyage import.
//!
//! Fetches a city's guide page and its district pages, parses the listings
//! and stores areas and POIs in the local database.

mod batch;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use citywiki::config::{CityConfig, Config, ConfigError};
use citywiki::pipeline::Importer;
use citywiki::store::Store;
use citywiki::wikivoyage::{ListingParser, WikivoyageFetcher};

#[derive(Parser, Debug, Clone)]
#[command(name = "import")]
#[command(about = "Import cities and their districts from Wikivoyage")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// City to import (defaults to every [[cities]] entry of the config)
    #[arg(long)]
    city: Option<String>,

    /// Maximum district depth below the city
    #[arg(long)]
    depth: Option<u32>,

    /// Database directory (overrides global.db_path)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Maximum number of district pages imported at once
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::load_or_default(args.config.as_deref())?;
    let db_path = config.require_db_path(args.db.as_deref())?;

    let cities = match &args.city {
        Some(name) => vec![CityConfig {
            name: name.clone(),
            max_depth: args.depth.unwrap_or(2),
        }],
        None if config.cities.is_empty() => return Err(ConfigError::NoCities.into()),
        None => config
            .cities
            .iter()
            .map(|c| CityConfig {
                name: c.name.clone(),
                max_depth: args.depth.unwrap_or(c.max_depth),
            })
            .collect(),
    };

    info!("Citywiki Import");
    info!("Database: {}", db_path.display());

    let store = Store::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let fetcher = WikivoyageFetcher::new(
        &config.global.wiki_api_url,
        &config.global.user_agent,
        config.global.request_timeout(),
        config.global.max_fetch_attempts,
    )
    .context("Failed to create Wikivoyage client")?;

    let importer = Importer::new(
        store.clone(),
        fetcher,
        ListingParser::default(),
        args.max_concurrent
            .unwrap_or(config.global.max_concurrent_imports),
    );

    let summaries = batch::run_batch(&importer, &cities).await;
    store.flush()?;

    let failed_roots = summaries.iter().filter(|s| !s.root.is_success()).count();
    if failed_roots > 0 {
        error!("{} of {} cities could not be imported", failed_roots, summaries.len());
    }

    println!("{}", serde_json::to_string_pretty(&summaries)?);
    Ok(())
}
