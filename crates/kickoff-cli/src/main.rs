use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use kickoff_storage::PgStore;
use kickoff_sync::{pipeline_from_config, SyncConfig, SyncPipeline};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kickoff-cli")]
#[command(about = "Fixture sync and gameweek resolution for kickoff")]
struct Cli {
    /// Read provider responses from this directory instead of the live API.
    #[arg(long, global = true)]
    recorded: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Full season sync.
    Sync {
        /// Print what would be written without writing it.
        #[arg(long)]
        dry_run: bool,
    },
    /// Score-only sync over the recent date window.
    Scores,
    /// Update-only sync for a single matchday.
    Matchday { matchday: u32 },
    /// Delete predictions, fixtures and gameweeks, then rebuild.
    Resync {
        #[arg(long)]
        confirm: bool,
    },
    /// Show the provider's current matchday.
    Anchor,
    /// Resolve the current gameweek from stored fixtures.
    Current,
    Migrate,
    Serve,
    /// Run the cron scheduler until interrupted.
    Schedule,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn pipeline(recorded: Option<PathBuf>) -> Result<SyncPipeline> {
    let mut config = SyncConfig::from_env();
    if recorded.is_some() {
        config.recorded_dir = recorded;
    }
    pipeline_from_config(config).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command.unwrap_or(Commands::Sync { dry_run: false }) {
        Commands::Sync { dry_run: true } => {
            let plan = pipeline(cli.recorded).await?.plan_full_sync().await?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Sync { dry_run: false } => {
            let summary = pipeline(cli.recorded).await?.run_full_sync().await?;
            println!(
                "sync complete: run_id={} gameweeks={} inserted={} updated={} failed={} current=GW{} snapshots={:?}",
                summary.run_id,
                summary.gameweeks_written,
                summary.fixtures_inserted,
                summary.fixtures_updated,
                summary.fixtures_failed,
                summary.current_gameweek,
                summary.snapshotted_gameweeks
            );
        }
        Commands::Scores => {
            let summary = pipeline(cli.recorded).await?.run_score_only_sync().await?;
            println!(
                "score sync complete: run_id={} checked={} updated={} newly_finished={}",
                summary.run_id, summary.matches_checked, summary.updated, summary.newly_finished_count
            );
        }
        Commands::Matchday { matchday } => {
            let summary = pipeline(cli.recorded).await?.run_matchday_sync(matchday).await?;
            println!(
                "matchday {matchday} sync complete: checked={} updated={} newly_finished={}",
                summary.matches_checked, summary.updated, summary.newly_finished_count
            );
        }
        Commands::Resync { confirm } => {
            if !confirm {
                bail!("resync deletes every prediction, fixture and gameweek; pass --confirm");
            }
            let summary = pipeline(cli.recorded).await?.run_destructive_resync().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Anchor => {
            let matchday = pipeline(cli.recorded).await?.provider_anchor().await?;
            println!("provider current matchday: {matchday}");
        }
        Commands::Current => {
            let resolution = pipeline(cli.recorded).await?.resolve_stored_current().await?;
            println!(
                "current gameweek: {} ({:?})",
                resolution.gameweek_id, resolution.rule
            );
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            PgStore::connect(&config.database_url).await?.migrate().await?;
            println!("migrations applied");
        }
        Commands::Serve => {
            kickoff_web::serve_from_env().await?;
        }
        Commands::Schedule => {
            let pipeline = Arc::new(pipeline(cli.recorded).await?);
            kickoff_sync::run_scheduler_until_shutdown(pipeline).await?;
        }
    }

    Ok(())
}
