use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod client;
mod collector;
mod config;
mod curation;
mod error;
mod library;
mod models;
mod provider;
mod recipe;
mod schedule;
mod scheduler;
mod service;
mod store;
mod sync;

#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod test_support;

use crate::client::SubsonicClient;
use crate::collector::CandidateCollector;
use crate::config::load_config;
use crate::curation::{CurationEngine, CurationResult};
use crate::library::LibraryClient;
use crate::provider::build_provider;
use crate::recipe::{PlaylistType, RecipeStore};
use crate::schedule::Cadence;
use crate::scheduler::{DueCheckOutcome, RefreshScheduler};
use crate::service::{CreatePlaylistRequest, PlaylistService, RefreshOutcome};
use crate::store::{ManagedPlaylist, PlaylistStore, SqlitePlaylistStore};
use crate::sync::DeleteOutcome;

#[derive(Parser)]
#[command(name = "magiclists")]
#[command(about = "AI-curated, self-refreshing playlists for OpenSubsonic servers")]
#[command(version)]
struct Cli {
    /// Path to the SQLite database holding managed playlists
    #[arg(long = "db", global = true)]
    database: Option<PathBuf>,

    /// Directory containing recipe JSON files
    #[arg(long = "recipes", global = true)]
    recipes_dir: Option<PathBuf>,

    /// Quiet mode - only warnings and errors are logged
    #[arg(short = 'q', long = "quiet", global = true)]
    quiet: bool,

    /// Debug logging
    #[arg(short = 'd', long = "debug", global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the refresh scheduler until interrupted
    Serve,
    /// Curate a new playlist and create it on the server
    Create {
        #[command(flatten)]
        playlist: PlaylistArgs,

        /// Refresh cadence: none, daily, weekly or monthly
        #[arg(long, default_value = "none")]
        cadence: Cadence,
    },
    /// Curate a playlist and print it without writing anything
    Preview {
        #[command(flatten)]
        playlist: PlaylistArgs,
    },
    /// Refresh a managed playlist now
    Refresh { id: i64 },
    /// Delete a managed playlist and its server copy
    Delete { id: i64 },
    /// List managed playlists
    List,
    /// Run one due check and exit
    RunDue,
    /// Change how often a playlist refreshes
    SetCadence { id: i64, cadence: Cadence },
    /// List loaded recipes
    Recipes,
    /// Check library and AI provider connectivity
    Check,
    /// Show the last scheduler heartbeat
    Status,
}

#[derive(Args)]
struct PlaylistArgs {
    /// artist_radio, genre_mix or re_discover
    #[arg(value_name = "TYPE")]
    playlist_type: PlaylistType,

    /// Artist name or id (repeatable), or the genre name
    #[arg(short, long = "seed")]
    seeds: Vec<String>,

    /// Playlist name; derived from the seed when omitted
    #[arg(short, long)]
    name: Option<String>,

    /// Number of tracks
    #[arg(short, long)]
    length: Option<usize>,

    /// Ask the AI to explain its choices
    #[arg(short, long)]
    reasoning: bool,
}

impl PlaylistArgs {
    fn into_request(self, cadence: Cadence) -> CreatePlaylistRequest {
        CreatePlaylistRequest {
            playlist_type: self.playlist_type,
            seed_inputs: self.seeds,
            name: self.name,
            target_length: self.length,
            cadence,
            with_reasoning: self.reasoning,
        }
    }
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.debug {
        LevelFilter::DEBUG
    } else if cli.quiet {
        LevelFilter::WARN
    } else {
        LevelFilter::INFO
    };

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    // Load configuration from .env and the environment
    let mut config = load_config()?;
    if let Some(db) = cli.database {
        config.database_path = db;
    }
    if let Some(dir) = cli.recipes_dir {
        config.recipes_dir = dir;
    }

    let library: Arc<dyn LibraryClient> = Arc::new(SubsonicClient::new(config.library.clone()));
    let provider = build_provider(&config.provider);
    let recipes = RecipeStore::load_dir(&config.recipes_dir)
        .with_context(|| format!("Failed to load recipes from {}", config.recipes_dir.display()))?;
    let store: Arc<dyn PlaylistStore> = Arc::new(SqlitePlaylistStore::open(&config.database_path)?);

    let service = Arc::new(PlaylistService::new(
        Arc::new(recipes),
        CandidateCollector::new(library.clone()),
        CurationEngine::new(provider.clone()),
        store.clone(),
        config.default_playlist_length,
        config.scheduler.grace_period,
    ));

    match cli.command {
        Command::Serve => {
            let scheduler = RefreshScheduler::new(service, config.scheduler.clone());
            scheduler.start();
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C, stopping scheduler");
            scheduler.stop().await;
        }
        Command::Create { playlist, cadence } => {
            let run = service.create(&playlist.into_request(cadence)).await?;
            println!("✓ Created '{}' (#{})", run.playlist.name, run.playlist.id);
            print_curation(&run.curation);
            print_playlist(&run.playlist);
        }
        Command::Preview { playlist } => {
            let preview = service.preview(&playlist.into_request(Cadence::None)).await?;
            println!("{}", preview.name);
            println!("{}", "=".repeat(preview.name.len()));
            println!(
                "Seed: {} | Recipe: {} | Pool: {} tracks",
                preview.seed.describe(),
                preview.recipe_version,
                preview.pool_size
            );
            print_curation(&preview.curation);
            for (i, track) in preview.tracks.iter().enumerate() {
                let plays = if track.play_count > 0 {
                    format!(" ({}x)", track.play_count)
                } else {
                    String::new()
                };
                println!("  {:>3}. \"{}\" by {}{}", i + 1, track.title, track.artist, plays);
            }
        }
        Command::Refresh { id } => match service.refresh(id).await? {
            RefreshOutcome::Refreshed(run) => {
                println!("✓ Refreshed '{}'", run.playlist.name);
                print_curation(&run.curation);
                print_playlist(&run.playlist);
            }
            RefreshOutcome::Coalesced(playlist) | RefreshOutcome::NotDue(playlist) => {
                println!("'{}' was refreshed by another request", playlist.name);
                print_playlist(&playlist);
            }
            RefreshOutcome::Busy(playlist) => {
                println!("'{}' is being refreshed by another process", playlist.name);
            }
        },
        Command::Delete { id } => match service.delete(id).await? {
            DeleteOutcome::Deleted => println!("✓ Deleted playlist #{id}"),
            DeleteOutcome::Partial(e) => {
                println!("⚠ {e}");
                println!("  Remove playlist {} from the server manually.", e.external_id);
            }
        },
        Command::List => {
            let playlists = service.list()?;
            if playlists.is_empty() {
                println!("No managed playlists.");
            }
            for playlist in &playlists {
                print_playlist(playlist);
            }
        }
        Command::RunDue => {
            let scheduler = RefreshScheduler::new(service, config.scheduler.clone());
            match scheduler.run_due_check().await {
                DueCheckOutcome::Completed(report) => println!(
                    "Due: {} | Refreshed: {} | Failed: {} | Unchanged: {} | Missed beyond grace: {}",
                    report.due, report.refreshed, report.failed, report.unchanged, report.beyond_grace
                ),
                DueCheckOutcome::Skipped => println!("Another due check is in progress (possibly in `magiclists serve`)."),
                DueCheckOutcome::Failed(e) => anyhow::bail!("Due check failed: {e}"),
            }
        }
        Command::SetCadence { id, cadence } => {
            let playlist = service.set_cadence(id, cadence).await?;
            println!("✓ '{}' now refreshes {}", playlist.name, playlist.cadence);
            print_playlist(&playlist);
        }
        Command::Recipes => {
            for recipe in service.recipes().list() {
                println!(
                    "{} {}{} [{}] {}",
                    recipe.playlist_type,
                    recipe.version,
                    if recipe.current { " (current)" } else { "" },
                    if recipe.uses_ai { "ai" } else { "algorithmic" },
                    recipe.description
                );
            }
            for rejected in service.recipes().rejected() {
                println!("✗ {}: {}", rejected.source, rejected.errors.join("; "));
            }
        }
        Command::Check => {
            match library.ping().await {
                Ok(()) => println!("✓ Library connection successful"),
                Err(e) => println!("✗ Library connection failed: {e}"),
            }
            match &provider {
                None => println!("- AI provider disabled, fallback curation only"),
                Some(provider) => match provider.health_check().await {
                    Ok(()) => println!("✓ AI provider {} ({}) reachable", provider.name(), provider.model()),
                    Err(e) => println!("✗ AI provider {} failed: {e}", provider.name()),
                },
            }
        }
        Command::Status => {
            match store.last_heartbeat()? {
                Some(hb) => println!(
                    "Last due check: {} ({}) | Due: {} | Refreshed: {} | Failed: {}",
                    hb.at.format("%Y-%m-%d %H:%M:%S UTC"),
                    hb.outcome,
                    hb.due,
                    hb.refreshed,
                    hb.failed
                ),
                None => println!("The scheduler has never run."),
            }
            let due = store.list_due(service.now())?;
            println!("Playlists currently due: {}", due.len());
        }
    }

    Ok(())
}

fn print_curation(curation: &CurationResult) {
    match &curation.fallback_reason {
        None => println!("Curated by AI: {} tracks", curation.track_ids.len()),
        Some(reason) => println!(
            "Curated by fallback scoring: {} tracks ({reason})",
            curation.track_ids.len()
        ),
    }
    if let Some(reasoning) = &curation.reasoning {
        println!("Reasoning: {reasoning}");
    }
}

fn print_playlist(playlist: &ManagedPlaylist) {
    let format_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string())
    };

    println!(
        "#{} {} [{} | {}] {} tracks, recipe {}, {}",
        playlist.id,
        playlist.name,
        playlist.playlist_type,
        playlist.seed.describe(),
        playlist.track_count,
        playlist.recipe_version,
        playlist.cadence
    );
    println!(
        "   Last refreshed: {} | Next due: {} | Source: {}",
        format_time(playlist.last_refreshed),
        format_time(playlist.next_due),
        playlist
            .last_provenance
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
}
