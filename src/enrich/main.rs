//! Enrichment passes over an imported city.
//!
//! Duplicate detection and merging, OSM identity matching, geocoding and
//! JSON export.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use citywiki::config::{require_extract, Config};
use citywiki::dedup::{auto_merge, find_duplicates, DedupScope, DuplicateDetector, DuplicatePair, RuleKind};
use citywiki::geocode::{
    fill_missing_addresses, fill_missing_coordinates, geocode_area_coordinates, NominatimGeocoder,
};
use citywiki::models::{Area, AreaId};
use citywiki::osm::{match_missing_osm_ids, MatchConfig, MatchReport, OsmExtract};
use citywiki::pipeline::DumpDocument;
use citywiki::store::Store;

#[derive(Parser, Debug)]
#[command(name = "enrich")]
#[command(about = "Deduplicate, match and geocode imported cities")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database directory (overrides global.db_path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List duplicate POI candidates
    Duplicates {
        city: String,

        #[arg(long, value_enum, default_value = "tree")]
        scope: Vec<ScopeArg>,

        /// Override the configured decision rule
        #[arg(long)]
        rule: Option<RuleKind>,

        /// Write the pairs as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Detect and merge duplicate POIs
    Dedup {
        city: String,

        #[arg(long, value_enum, default_value = "main")]
        scope: Vec<ScopeArg>,

        #[arg(long)]
        rule: Option<RuleKind>,
    },

    /// Assign OSM ids from a local PBF extract
    Osm {
        city: String,

        /// OSM PBF extract covering the city
        #[arg(long)]
        extract: Option<PathBuf>,

        /// Search radius in meters (overrides matching.batch_radius_m)
        #[arg(long)]
        radius: Option<f64>,

        #[arg(long)]
        workers: Option<usize>,
    },

    /// Fill in coordinates and addresses with a geocoder
    Geocode {
        city: String,

        #[arg(long, value_enum, default_value = "all")]
        task: GeocodeTask,
    },

    /// Write a city, its districts and POIs as JSON
    Dump {
        city: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List recorded validation events
    Validations,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ScopeArg {
    /// POIs owned by the city itself
    Main,
    /// Every POI in the city and its districts
    Tree,
}

impl From<ScopeArg> for DedupScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::Main => DedupScope::MainArea,
            ScopeArg::Tree => DedupScope::WholeTree,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum GeocodeTask {
    Areas,
    Addresses,
    Coordinates,
    All,
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

    // fail on a missing extract before opening anything
    let extract_path = match &args.command {
        Command::Osm { extract, .. } => Some(require_extract(extract.as_deref())?),
        _ => None,
    };

    let store = Store::open(&db_path)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    match args.command {
        Command::Duplicates {
            city,
            scope,
            rule,
            csv,
        } => {
            let root = find_city(&store, &city)?;
            let detector = detector(&config, rule);
            let scopes: Vec<DedupScope> = scope.into_iter().map(Into::into).collect();
            let pairs = find_duplicates(&store, root.id, &scopes, &detector)?;

            match csv {
                Some(path) => {
                    write_pairs_csv(&path, &pairs)?;
                    info!("Wrote {} pairs to {}", pairs.len(), path.display());
                }
                None => {
                    for pair in &pairs {
                        println!(
                            "{} ({}) <-> {} ({}): {}",
                            pair.first.name,
                            pair.first.id,
                            pair.second.name,
                            pair.second.id,
                            pair.reasons.join("; ")
                        );
                    }
                }
            }
        }

        Command::Dedup { city, scope, rule } => {
            let root = find_city(&store, &city)?;
            let detector = detector(&config, rule);
            let scopes: Vec<DedupScope> = scope.into_iter().map(Into::into).collect();
            let report = auto_merge(&store, root.id, None, &detector, &scopes)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Osm {
            city,
            radius,
            workers,
            ..
        } => {
            let root = find_city(&store, &city)?;
            let mut matching = config.matching.clone();
            if let Some(radius) = radius {
                matching.batch_radius_m = radius;
            }
            if let Some(workers) = workers {
                matching.max_workers = workers;
            }
            let path = extract_path.context("OSM extract path missing")?;

            let report = run_osm_matching(store.clone(), root.id, path, matching).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Geocode { city, task } => {
            let root = find_city(&store, &city)?;
            let geocoder = NominatimGeocoder::new(
                &config.geocoding.url,
                &config.geocoding.user_agent,
                config.global.request_timeout(),
            )
            .context("Failed to create geocoding client")?;
            let delay = config.geocoding.request_delay();

            if matches!(task, GeocodeTask::Areas | GeocodeTask::All) {
                geocode_area_coordinates(&store, &geocoder, root.id, delay).await?;
            }
            if matches!(task, GeocodeTask::Addresses | GeocodeTask::All) {
                fill_missing_addresses(&store, &geocoder, root.id, delay).await?;
            }
            if matches!(task, GeocodeTask::Coordinates | GeocodeTask::All) {
                fill_missing_coordinates(&store, &geocoder, root.id, delay).await?;
            }
        }

        Command::Dump { city, output } => {
            let root = find_city(&store, &city)?;
            let json = DumpDocument::build(&store, root.id)?.to_json()?;
            match output {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Data written to {}", path.display());
                }
                None => println!("{}", json),
            }
        }

        Command::Validations => {
            for event in store.validations()? {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
    }

    store.flush()?;
    Ok(())
}

fn find_city(store: &Store, name: &str) -> Result<Area> {
    store
        .find_root(name)?
        .with_context(|| format!("City \"{}\" not found", name))
}

fn detector(config: &Config, rule: Option<RuleKind>) -> DuplicateDetector {
    let mut dedup = config.dedup.clone();
    if let Some(rule) = rule {
        dedup.rule = rule;
    }
    let detector = DuplicateDetector::new(dedup);
    info!("Using duplicate rule {}", detector.rule_name());
    detector
}

fn write_pairs_csv(path: &Path, pairs: &[DuplicatePair]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(["first_id", "first_name", "second_id", "second_name", "reasons"])?;
    for pair in pairs {
        writer.write_record([
            pair.first.id.to_string(),
            pair.first.name.clone(),
            pair.second.id.to_string(),
            pair.second.name.clone(),
            pair.reasons.join("; "),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Load the extract and match on the blocking pool
async fn run_osm_matching(
    store: Store,
    root: AreaId,
    path: PathBuf,
    matching: MatchConfig,
) -> Result<MatchReport> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(format!("Reading {}", path.display()));

    let progress = spinner.clone();
    let report = tokio::task::spawn_blocking(move || -> Result<_> {
        let extract = OsmExtract::load(&path)?;
        if extract.is_empty() {
            warn!("{} contains no candidate features", path.display());
        }
        progress.set_message(format!("Matching against {} features", extract.len()));
        Ok(match_missing_osm_ids(&store, root, &extract, &matching)?)
    })
    .await??;

    spinner.finish_with_message(format!(
        "Matched {} of {} POIs",
        report.matched, report.processed
    ));
    Ok(report)
}
