//! disastercache - command line front end for the disaster location cache.
//!
//! Reads locations and skeets through the same caches the dashboard uses, so
//! repeated runs are served from the local snapshot until it goes stale.

use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use disastercache_core::utils::{format_timestamp, truncate_string};
use disastercache_core::{
    Category, Config, DocumentStore, FileStorage, FirestoreClient, Location, LocationCache,
    LocationSort, Skeet, SkeetCache, StorageBackend,
};

// ============================================================================
// Constants
// ============================================================================

/// Skeet text is cut to this many characters in listings.
const SKEET_PREVIEW_CHARS: usize = 100;

const LOG_FILE_PREFIX: &str = "disastercache.log";

// ============================================================================
// Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "disastercache", version, about = "Cached access to disaster locations and skeets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List active locations, refreshing the cache when it is stale
    Locations {
        /// Discard the local snapshot and fetch everything again
        #[arg(long)]
        refresh: bool,
        #[arg(long, value_enum, default_value_t = SortArg::Newest)]
        sort: SortArg,
        /// Only show locations of this category
        #[arg(long, value_enum)]
        category: Option<CategoryArg>,
    },
    /// Refresh and show a single location
    Location { id: String },
    /// Show skeets for a location, fetching any newer than the cached ones
    Skeets {
        location_id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show the newest skeets across all locations
    Latest {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Remove all cached data
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Name,
    NameDesc,
    Oldest,
    Newest,
}

impl From<SortArg> for LocationSort {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Name => LocationSort::NameAsc,
            SortArg::NameDesc => LocationSort::NameDesc,
            SortArg::Oldest => LocationSort::OldestFirst,
            SortArg::Newest => LocationSort::NewestFirst,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CategoryArg {
    Wildfire,
    Hurricane,
    Earthquake,
    Other,
}

impl From<CategoryArg> for Category {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Wildfire => Category::Wildfire,
            CategoryArg::Hurricane => Category::Hurricane,
            CategoryArg::Earthquake => Category::Earthquake,
            CategoryArg::Other => Category::Other,
        }
    }
}

// ============================================================================
// Setup
// ============================================================================

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr; with `log_dir` set they are also written to a daily
/// rolling file. The returned guard must be kept alive to flush the file.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

struct Caches {
    locations: LocationCache,
    skeets: SkeetCache,
}

fn build_caches(config: &Config) -> Result<Caches> {
    let project_id = config.require_project_id()?;
    let client = FirestoreClient::new(project_id, config.api_key.clone())?
        .with_database(&config.database);
    let remote: Arc<dyn DocumentStore> = Arc::new(client);

    let cache_dir = config.cache_dir()?;
    let storage: Arc<dyn StorageBackend> = Arc::new(
        FileStorage::new(cache_dir.clone())
            .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?,
    );
    debug!(cache_dir = %cache_dir.display(), persist = config.persist_to_disk, "Opening caches");

    let options = config.cache_options();
    let locations = LocationCache::new(Arc::clone(&remote), Arc::clone(&storage), options);
    let skeets = SkeetCache::new(remote, storage, options);

    // Log every state change the caches announce
    let watched = locations.clone();
    let _ = locations.subscribe(move || {
        debug!(
            loading = watched.get_loading(),
            count = watched.len(),
            error = ?watched.get_error(),
            "Location cache changed"
        );
    });
    let watched = skeets.clone();
    let _ = skeets.subscribe(move || {
        debug!(
            loading = watched.any_loading(),
            error = ?watched.get_error(),
            "Skeet cache changed"
        );
    });

    Ok(Caches { locations, skeets })
}

// ============================================================================
// Output
// ============================================================================

fn print_location_line(location: &Location) {
    let last_seen = location
        .last_seen
        .as_deref()
        .map(format_timestamp)
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:<24} {:<32} {:<10} {:>6} skeets  last {}",
        location.id,
        truncate_string(location.display_name(), 32),
        location.category.to_string(),
        location.latest_skeets_amount.unwrap_or_default(),
        last_seen
    );
}

fn print_location_detail(location: &Location) {
    println!("{} ({})", location.display_name(), location.id);
    println!("  Address:   {}", location.formatted_address);
    println!("  Position:  {:.4}, {:.4}", location.lat, location.long);
    println!("  Category:  {}", location.category);
    if let Some(sentiment) = location.latest_sentiment {
        println!("  Sentiment: {:.3}", sentiment);
    }
    if let Some(first) = location.first_seen.as_deref() {
        println!("  First:     {}", format_timestamp(first));
    }
    if let Some(last) = location.last_seen.as_deref() {
        println!("  Last:      {}", format_timestamp(last));
    }
    if !location.avg_sentiment_list.is_empty() {
        println!("  History:");
        for sample in &location.avg_sentiment_list {
            println!(
                "    {}  {:>6} skeets  avg {:+.3}",
                format_timestamp(&sample.timestamp),
                sample.post_count,
                sample.average_sentiment
            );
        }
    }
}

fn print_skeet(skeet: &Skeet) {
    println!(
        "[{}] {} (@{}) {}",
        format_timestamp(&skeet.timestamp),
        skeet.display_name,
        skeet.handle,
        skeet.category()
    );
    println!("  {}", truncate_string(&skeet.content, SKEET_PREVIEW_CHARS));
    if let Some(link) = skeet.external_link.as_deref() {
        println!("  {}", link);
    }
}

/// Print a cache error to stderr. Returns the exit code to use.
fn report(error: Option<String>) -> ExitCode {
    match error {
        Some(message) => {
            eprintln!("Error: {}", message);
            ExitCode::FAILURE
        }
        None => ExitCode::SUCCESS,
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn run(command: Command, caches: Caches) -> ExitCode {
    match command {
        Command::Locations {
            refresh,
            sort,
            category,
        } => {
            let locations = &caches.locations;
            if refresh {
                locations.clear();
            }
            locations.initialize().await;

            let mut listed = locations.sorted(sort.into());
            if let Some(category) = category {
                let category = Category::from(category);
                listed.retain(|l| l.category == category);
            }
            for location in &listed {
                print_location_line(location);
            }
            eprintln!(
                "{} of {} locations, updated {}",
                listed.len(),
                locations.len(),
                locations.age_display()
            );
            report(locations.get_error())
        }
        Command::Location { id } => {
            let locations = &caches.locations;
            locations.fetch_and_update(&id).await;
            match locations.get(&id) {
                Some(location) => print_location_detail(&location),
                None => eprintln!("Location {} not found", id),
            }
            report(locations.get_error())
        }
        Command::Skeets { location_id, limit } => {
            let skeets = &caches.skeets;
            skeets.fetch_skeets(&location_id).await;
            let cached = skeets.get_skeets(&location_id);
            for skeet in cached.iter().take(limit) {
                print_skeet(skeet);
            }
            eprintln!("Showing {} of {} cached skeets", cached.len().min(limit), cached.len());
            report(skeets.get_error())
        }
        Command::Latest { limit } => {
            let skeets = &caches.skeets;
            for skeet in skeets.fetch_latest_global(limit).await {
                print_skeet(&skeet);
            }
            report(skeets.get_error())
        }
        Command::Clear => {
            caches.locations.clear();
            caches.skeets.clear();
            eprintln!("Cache cleared");
            ExitCode::SUCCESS
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load()?;

    // Initialize logging
    let _guard = init_tracing(config.log_dir.as_deref());
    info!("disastercache starting");

    let caches = build_caches(&config)?;
    Ok(run(cli.command, caches).await)
}
