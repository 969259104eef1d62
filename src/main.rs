use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use streamtally::aggregate::{ArtistAnalyticsSummary, ReleaseAnalytics};
use streamtally::cache::SystemClock;
use streamtally::catalog::CatalogExport;
use streamtally::query::{AnalyticsQuery, AnalyticsService};

#[derive(Parser)]
#[command(name = "streamtally", version, about = "Streaming report ingestion and release analytics")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a distributor CSV report
    Import {
        /// Report CSV file
        file: PathBuf,

        /// Report date (YYYY-MM-DD or RFC 3339)
        #[arg(long)]
        date: String,
    },

    /// Show per-release and per-artist analytics
    Analytics {
        /// Only this release id
        #[arg(long)]
        release: Option<String>,

        /// Only releases credited to this artist id
        #[arg(long)]
        artist: Option<String>,

        /// Earliest report date (inclusive, YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// Latest report date (inclusive, YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Number of releases to show
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Mirror a JSON export of the release and artist directories
    SyncCatalog {
        /// Export file with `artists` and `releases` arrays
        file: PathBuf,
    },

    /// Run the HTTP server
    Serve {
        /// Listen address (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Show snapshot statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let mut config = streamtally::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(streamtally::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = streamtally::db::Database::open(&db_path).context("Failed to open database")?;
    let service = AnalyticsService::new(db, &config, Arc::new(SystemClock));

    match cli.command {
        Commands::Import { file, date } => {
            let report_date = streamtally::ingest::parse_report_date(&date)?;
            let payload = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "report.csv".to_string());

            let summary = service
                .upload(&payload, report_date, &filename)
                .with_context(|| format!("Failed to import {}", file.display()))?;

            println!(
                "Imported {}: {} of {} records stored ({} skipped)",
                filename, summary.records_processed, summary.total_records, summary.skipped
            );
        }

        Commands::Analytics {
            release,
            artist,
            from,
            to,
            limit,
            json,
        } => {
            let query = AnalyticsQuery {
                release,
                artist,
                from: from
                    .as_deref()
                    .map(streamtally::query::parse_date_filter)
                    .transpose()?,
                to: to
                    .as_deref()
                    .map(streamtally::query::parse_date_filter)
                    .transpose()?,
                limit,
            };
            let response = service.query(&query).context("Failed to query analytics")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }

            if let Some(artist) = &response.current_artist {
                println!("Artist: {} ({})", artist.name, artist.id);
                println!();
            }

            if response.analytics.is_empty() {
                println!("No analytics found.");
                return Ok(());
            }

            print_release_table(&response.analytics);
            println!();
            print_artist_table(&response.artists);
            println!();

            let recent: Vec<String> = response.recent_reports.iter().map(|d| d.to_string()).collect();
            println!("Recent reports: {}", recent.join(", "));
        }

        Commands::SyncCatalog { file } => {
            let export = CatalogExport::from_path(&file)?;
            let result = service.sync_catalog(&export)?;
            println!(
                "Synced {} artists and {} releases ({} with track ids)",
                result.artists, result.releases, result.linked_releases
            );
        }

        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(streamtally::server::run_server(
                Arc::new(service),
                &config.server,
                &config.cache,
            ))?;
        }

        Commands::Stats => {
            let db = service.db();
            let stats = db.snapshot_stats().context("Failed to get stats")?;
            let latest = db.get_report_dates(5).context("Failed to get report dates")?;
            println!("Report Statistics");
            println!("=================");
            println!("Snapshots:              {}", stats.total_snapshots);
            println!("Report dates:           {}", stats.report_dates);
            println!("Releases:               {}", stats.total_releases);
            println!("Releases with track id: {}", stats.linked_releases);
            println!("Releases with data:     {}", stats.releases_with_snapshots);
            if stats.linked_releases > 0 {
                println!(
                    "Coverage:               {:.1}%",
                    stats.releases_with_snapshots as f64 / stats.linked_releases as f64 * 100.0
                );
            }
            if !latest.is_empty() {
                let dates: Vec<String> = latest.iter().map(|d| d.to_string()).collect();
                println!("Latest reports:         {}", dates.join(", "));
            }
            println!();

            if !stats.report_files.is_empty() {
                println!("Report files:");
                for (file, count) in &stats.report_files {
                    println!("  {:<40} {}", file, count);
                }
            }
        }
    }

    Ok(())
}

/// Truncate to `width` characters, marking the cut with "...".
fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() > width {
        let kept: String = s.chars().take(width.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        s.to_string()
    }
}

/// Print a table of release totals.
fn print_release_table(releases: &[ReleaseAnalytics]) {
    println!(
        "{:<30} {:<20} {:>12} {:>10}  {:>10}",
        "Release", "Artists", "Streams", "Downloads", "Latest"
    );
    println!("{}", "-".repeat(88));

    for r in releases {
        let artists: Vec<&str> = r.artists.iter().map(|a| a.name.as_str()).collect();
        println!(
            "{:<30} {:<20} {:>12} {:>10}  {:>10}",
            truncate(&r.title, 30),
            truncate(&artists.join(", "), 20),
            r.total_streams,
            r.total_downloads,
            r.latest_date,
        );
    }
}

/// Print a table of artist rollups.
fn print_artist_table(artists: &[ArtistAnalyticsSummary]) {
    println!("{:<30} {:>8} {:>12}", "Artist", "Releases", "Streams");
    println!("{}", "-".repeat(52));

    for a in artists {
        println!(
            "{:<30} {:>8} {:>12}",
            truncate(&a.name, 30),
            a.release_count,
            a.total_streams
        );
    }
}
