// playtally - Spotify listening tracker
// `run` keeps the poller going; the other commands are one-shot chores

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use playtally::generator::{build_prompt_playlist, OpenAiGenerator};
use playtally::playlists::{publish_chart, sweep_inactive, threshold_from_days};
use playtally::{Config, PollLoop, Scheduler, SpotifyClient, StatsDatabase, Window};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "playtally")]
#[command(about = "Tracks Spotify playtime and turns it into charts and playlists")]
struct Args {
    /// Enable developer logging (stderr + debug output)
    #[arg(long)]
    dev: bool,

    /// Use this config file instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll playback and run weekly/monthly maintenance until Ctrl-C
    Run,
    /// Show the current leaders of a window
    Chart {
        #[arg(default_value = "weekly")]
        window: Window,
        /// How many tracks (defaults to rollover.chart_size)
        #[arg(long)]
        limit: Option<usize>,
        /// Also create a Spotify playlist from the chart
        #[arg(long)]
        publish: bool,
    },
    /// Build a playlist from a free-text description
    Generate { prompt: String },
    /// Unfollow playlists that haven't been played in a while
    Sweep {
        /// Inactivity threshold (defaults to rollover.inactive_threshold_days)
        #[arg(long)]
        days: Option<i64>,
    },
    /// Write the default config file and print where it is
    InitConfig,
}

fn init_logging(dev: bool) -> Result<WorkerGuard> {
    let log_dir = PathBuf::from("logs");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotating file appender
    let file_appender = tracing_appender::rolling::daily(&log_dir, "playtally.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let base_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,playtally=debug"));

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false);

    // dev mode mirrors everything to stderr as well
    let stderr_layer = dev.then(|| fmt::layer().with_writer(std::io::stderr).with_target(true));

    tracing_subscriber::registry()
        .with(base_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    Ok(guard)
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn open_database(config: &Config) -> Result<StatsDatabase> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }
    StatsDatabase::new(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.dev)?;

    match args.command {
        Command::InitConfig => {
            let path = match &args.config {
                Some(path) => path.clone(),
                None => Config::config_path()?,
            };
            if path.exists() {
                println!("Config already exists at {}", path.display());
            } else {
                Config::default().save_to(&path)?;
                println!("Wrote default config to {}", path.display());
            }
            Ok(())
        }
        command => {
            let config = load_config(args.config.as_deref())?;
            execute(command, config).await
        }
    }
}

async fn execute(command: Command, config: Config) -> Result<()> {
    let timeout = Duration::from_millis(config.polling.request_timeout_ms);
    let spotify = Arc::new(SpotifyClient::new(&config.spotify, timeout)?);

    match command {
        Command::Run => {
            info!("playtally starting up");
            let db = open_database(&config)?;
            let poll_loop = PollLoop::new(spotify.clone(), config.polling.interval_ms, timeout);
            let mut scheduler = Scheduler::new(poll_loop, db, spotify, &config)?;
            scheduler.run().await?;
        }
        Command::Chart { window, limit, publish } => {
            let db = open_database(&config)?;
            let limit = limit.unwrap_or(config.rollover.chart_size);
            let entries = db.top_n(window, limit)?;

            if entries.is_empty() {
                println!("No {} data yet", window);
            }
            for (rank, entry) in entries.iter().enumerate() {
                println!(
                    "{:>2}. {} - {} ({})",
                    rank + 1,
                    entry.track_name,
                    entry.artist_name,
                    entry.playtime_string()
                );
            }

            if publish {
                let today = chrono::Local::now().date_naive();
                match publish_chart(&db, spotify.as_ref(), window, limit, today).await? {
                    Some(chart) => println!("Created '{}' with {} tracks", chart.name, chart.added),
                    None => println!("Nothing to publish"),
                }
            }
        }
        Command::Generate { prompt } => {
            // completions are much slower than a player poll
            let generator = OpenAiGenerator::new(&config.generator, timeout * 6)?;
            let report = build_prompt_playlist(
                &generator,
                spotify.as_ref(),
                &prompt,
                config.generator.max_reprompts,
            )
            .await?;

            println!("Created '{}' with {} tracks", report.title, report.added);
            if !report.is_complete() {
                warn!("{} suggested tracks could not be found", report.unresolved.len());
                for missing in &report.unresolved {
                    println!("  missing: {}", missing);
                }
            }
        }
        Command::Sweep { days } => {
            let db = open_database(&config)?;
            let days = days.unwrap_or(config.rollover.inactive_threshold_days);
            let threshold = threshold_from_days(days).context("--days")?;
            let report = sweep_inactive(&db, spotify.as_ref(), threshold, chrono::Utc::now()).await?;

            println!("Removed {} playlists", report.removed.len());
            for (playlist_id, reason) in &report.failed {
                println!("  failed {}: {}", playlist_id, reason);
            }
        }
        Command::InitConfig => {}
    }

    Ok(())
}
