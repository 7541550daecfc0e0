//! watch-sync CLI - convert watch exports to GPX and sync them to Strava
//!
//! Usage:
//!   watch-sync inspect <file>
//!   watch-sync convert <file> [--output <gpx>] [--fill-lead-in]
//!   watch-sync reanchor <file> --lat <lat> --lon <lon> [--output <gpx>]
//!   watch-sync list <folder>
//!   watch-sync sync <folder> [--fill-lead-in]
//!   watch-sync refresh
//!
//! Tokens are read from `MAPBOX_ACCESS_TOKEN` and `STRAVA_ACCESS_TOKEN`.
//! Tunables are read from `WATCH_SYNC_*` (see `SyncConfig::from_env`).

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use log::{error, warn};
use watch_sync::sync::{load_activities, load_activity};
use watch_sync::synthesis::loop_ratio;
use watch_sync::{
    choose_heuristic, fill_missing_lead_in, gpx, reanchor, upload_activities, ActivityListProvider, ActivityRecord,
    GpsPoint, MapboxDirections, RemoteActivity, SqliteStore, StravaClient, SyncConfig, SyncError, SyncLedger,
};

#[derive(Parser)]
#[command(name = "watch-sync")]
#[command(about = "Convert watch fitness exports to GPX and sync them to Strava", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Ledger database
    #[arg(long, global = true, default_value = "watch-sync.db")]
    db: PathBuf,

    /// Enable verbose debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what the reconciler makes of a watch file
    Inspect {
        file: PathBuf,
    },

    /// Write a watch file as GPX
    Convert {
        file: PathBuf,

        /// Output path (defaults to the input with a .gpx extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Synthesize the route walked before the first GPS fix (needs Mapbox)
        #[arg(long)]
        fill_lead_in: bool,
    },

    /// Move the start of an activity and write it as GPX
    Reanchor {
        file: PathBuf,

        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        #[arg(long, allow_hyphen_values = true)]
        lon: f64,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the activities in a folder and whether they are synced
    List {
        folder: PathBuf,
    },

    /// Upload every unsynced activity in a folder
    Sync {
        folder: PathBuf,

        /// Synthesize the route walked before the first GPS fix (needs Mapbox)
        #[arg(long)]
        fill_lead_in: bool,
    },

    /// Rebuild the ledger from the Strava activity list
    Refresh,
}

/// Remote list used when no Strava token is configured.
struct OfflineRemote;

#[async_trait]
impl ActivityListProvider for OfflineRemote {
    async fn list_activities(&self, _page: u32, _per_page: u32) -> watch_sync::Result<Vec<RemoteActivity>> {
        Err(SyncError::Config {
            message: "STRAVA_ACCESS_TOKEN is not set".to_string(),
        })
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| writeln!(buf, "[{:5}] {}", record.level(), record.args()))
        .init();

    if let Err(e) = run(cli).await {
        error!("{}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> watch_sync::Result<()> {
    let config = SyncConfig::from_env()?;

    match cli.command {
        Commands::Inspect { file } => run_inspect(&file, &config),
        Commands::Convert {
            file,
            output,
            fill_lead_in,
        } => run_convert(&file, output, fill_lead_in, &config).await,
        Commands::Reanchor {
            file,
            lat,
            lon,
            output,
        } => run_reanchor(&file, GpsPoint::new(lat, lon), output, &config).await,
        Commands::List { folder } => run_list(&folder, &cli.db, &config).await,
        Commands::Sync { folder, fill_lead_in } => run_sync(&folder, &cli.db, fill_lead_in, &config).await,
        Commands::Refresh => run_refresh(&cli.db, &config).await,
    }
}

fn token(name: &str) -> watch_sync::Result<String> {
    std::env::var(name)
        .ok()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| SyncError::Config {
            message: format!("{} is not set", name),
        })
}

fn mapbox() -> watch_sync::Result<MapboxDirections> {
    MapboxDirections::new(&token("MAPBOX_ACCESS_TOKEN")?)
}

fn strava() -> watch_sync::Result<StravaClient> {
    StravaClient::new(&token("STRAVA_ACCESS_TOKEN")?)
}

fn open_ledger(db: &Path, config: &SyncConfig) -> watch_sync::Result<SyncLedger<SqliteStore>> {
    let store = SqliteStore::new(&db.to_string_lossy())?;
    Ok(SyncLedger::new(store, config))
}

fn write_gpx(
    activity: &ActivityRecord,
    input: &Path,
    output: Option<PathBuf>,
    config: &SyncConfig,
) -> watch_sync::Result<()> {
    let output = output.unwrap_or_else(|| input.with_extension("gpx"));
    let xml = gpx::encode(activity, config)?;
    std::fs::write(&output, xml).map_err(|e| SyncError::InvalidFile {
        path: output.display().to_string(),
        message: e.to_string(),
    })?;
    println!("Wrote {} ({} points)", output.display(), activity.waypoints.len());
    Ok(())
}

fn run_inspect(file: &Path, config: &SyncConfig) -> watch_sync::Result<()> {
    let activity = load_activity(file, config)?;

    println!("\n{}", "=".repeat(60));
    println!("{}", file.display());
    println!("{}", "=".repeat(60));
    println!("  id:                {}", activity.id);
    println!("  sport:             {} ({})", activity.sport_type, activity.sport_type.activity_name());
    println!("  waypoints:         {}", activity.waypoints.len());
    println!("  distance (device): {:.2} km", activity.total_distance / 1000.0);
    println!(
        "  first fix:         ({:.5}, {:.5}) {:.0}s after start",
        activity.first_fix.latitude,
        activity.first_fix.longitude,
        (activity.start_time_gps - activity.start_time) as f64 / 1000.0
    );
    println!("  gap heart rate:    {:.0} bpm", activity.avg_heart_rate_during_gap);

    if let Some(bbox) = activity.bounding_box(&config.bounds) {
        println!(
            "  map center:        ({:.5}, {:.5}) span {:.4} x {:.4}",
            bbox.center_latitude, bbox.center_longitude, bbox.latitude_delta, bbox.longitude_delta
        );
    }
    match loop_ratio(&activity) {
        Some(ratio) => println!(
            "  loop ratio:        {:.3} -> {:?} lead-in",
            ratio,
            choose_heuristic(&activity, &config.lead_in)
        ),
        None => println!("  loop ratio:        n/a"),
    }
    Ok(())
}

async fn run_convert(
    file: &Path,
    output: Option<PathBuf>,
    fill_lead_in: bool,
    config: &SyncConfig,
) -> watch_sync::Result<()> {
    let mut activity = load_activity(file, config)?;
    if fill_lead_in {
        activity = fill_missing_lead_in(&activity, &mapbox()?, config).await?;
    }
    write_gpx(&activity, file, output, config)
}

async fn run_reanchor(
    file: &Path,
    new_start: GpsPoint,
    output: Option<PathBuf>,
    config: &SyncConfig,
) -> watch_sync::Result<()> {
    if !new_start.is_valid() {
        return Err(SyncError::Config {
            message: format!("invalid start ({}, {})", new_start.latitude, new_start.longitude),
        });
    }
    let activity = load_activity(file, config)?;
    let anchored = reanchor(&activity, new_start, &mapbox()?, config).await?;
    write_gpx(&anchored, file, output, config)
}

async fn run_list(folder: &Path, db: &Path, config: &SyncConfig) -> watch_sync::Result<()> {
    let loaded = load_activities(folder, config)?;
    let ledger = open_ledger(db, config)?;

    let synced = match strava() {
        Ok(client) => ledger.synced_ids(&client).await,
        Err(_) => {
            warn!("STRAVA_ACCESS_TOKEN not set, showing locally recorded uploads only");
            ledger.synced_ids(&OfflineRemote).await
        }
    };

    for activity in &loaded.activities {
        let mark = if synced.contains(&activity.id) { "synced" } else { "new" };
        println!(
            "  [{:6}] {} - {}, {} points, {:.1}km",
            mark,
            activity.id,
            activity.sport_type,
            activity.waypoints.len(),
            activity.total_distance / 1000.0
        );
    }
    for (path, e) in &loaded.failures {
        eprintln!("  [ERR   ] {}: {}", path.display(), e);
    }
    Ok(())
}

async fn run_sync(folder: &Path, db: &Path, fill_lead_in: bool, config: &SyncConfig) -> watch_sync::Result<()> {
    let client = strava()?;
    let ledger = open_ledger(db, config)?;
    let mut activities = load_activities(folder, config)?.activities;

    if fill_lead_in {
        let directions = mapbox()?;
        for activity in activities.iter_mut() {
            match fill_missing_lead_in(activity, &directions, config).await {
                Ok(filled) => *activity = filled,
                Err(e) => warn!("Keeping '{}' without lead-in: {}", activity.id, e),
            }
        }
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let on_signal = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current upload...");
            on_signal.store(true, Ordering::Relaxed);
        }
    });

    let report = upload_activities(&mut activities, &client, &client, &ledger, config, &cancel).await;

    for (id, result) in &report.results {
        match result {
            Ok(outcome) => println!("  [OK ] {} - {:?}", id, outcome),
            Err(e) => eprintln!("  [ERR] {} - {}", id, e),
        }
    }
    println!(
        "\n{} uploaded, {} skipped, {} failed{}",
        report.uploaded(),
        report.skipped(),
        report.failed(),
        if report.cancelled { " (cancelled)" } else { "" }
    );

    if report.failed() > 0 {
        process::exit(1);
    }
    Ok(())
}

async fn run_refresh(db: &Path, config: &SyncConfig) -> watch_sync::Result<()> {
    let client = strava()?;
    let ledger = open_ledger(db, config)?;
    let ids = ledger.refresh(&client).await?;
    println!("Ledger holds {} synced activities", ids.len());
    Ok(())
}
