//! WarTrack - clan war league tracker
//!
//! Keeps a local database of league groups, wars, rosters and attacks in
//! sync with the remote API across repeated runs.

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wartrack_backend::{Config, SyncEngine};

#[derive(Parser)]
#[command(name = "wartrack", about = "Clan war league tracker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sync league groups for a set of clan tags
    League {
        /// Clan tags (with or without leading #)
        tags: Vec<String>,
        /// Season month, e.g. 2026-08 (defaults to the current month)
        #[arg(long)]
        season: Option<String>,
    },
    /// Ingest war logs for a set of clan tags
    Warlog { tags: Vec<String> },
    /// Sync the current war of one clan
    Current { tag: String },
    /// Refresh clan member rosters
    Members { tags: Vec<String> },
    /// Refetch all persisted wars that have not ended
    Refresh,
}

fn parse_season(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("bad season '{}' (expected YYYY-MM): {}", s, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "wartrack_backend=info,wartrack=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let engine = SyncEngine::new(Config::from_env())?;

    match cli.command {
        Command::League { tags, season } => {
            let season = season.as_deref().map(parse_season).transpose()?;
            let mut synced = 0usize;
            let mut skipped = 0usize;
            let mut failed = 0usize;
            for tag in &tags {
                match engine.sync_league_group(tag, season).await {
                    Ok(Some(group_id)) => {
                        synced += 1;
                        info!(%tag, group_id, "synced");
                    }
                    Ok(None) => skipped += 1,
                    Err(e) => {
                        failed += 1;
                        error!(%tag, error = %e, "league sync failed");
                    }
                }
            }
            println!("{} synced, {} skipped, {} failed", synced, skipped, failed);
        }
        Command::Warlog { tags } => {
            let report = engine.sync_war_logs(&tags).await;
            println!("{}", report);
        }
        Command::Current { tag } => match engine.sync_current_war(&tag).await? {
            Some(stats) => println!(
                "war reconciled: {} inserted, {} updated, {} touched",
                stats.inserted, stats.updated, stats.touched
            ),
            None => println!("no current war"),
        },
        Command::Members { tags } => {
            let report = engine.update_members(&tags).await;
            println!("{}", report);
        }
        Command::Refresh => {
            let report = engine.refresh_unfinished().await?;
            println!("{}", report);
        }
    }
    Ok(())
}
