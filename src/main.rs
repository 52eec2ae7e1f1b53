//! training-load command-line entry point

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use training_load::commands::load::{
  activity_breakdown, distance_report, render_activity, render_distance, render_series, tail,
  training_load, ActivityLookup, LoadOutput,
};
use training_load::commands::strava::{
  strava_auth_status, strava_import_token, strava_sync_activities,
};
use training_load::db::initialize_db;
use training_load::{AppConfig, SqliteActivityStore};

#[derive(Parser)]
#[command(
  name = "training-load",
  version,
  about = "Grade-adjusted training load from Strava running history"
)]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Sync new running activities and backfill laps and altitude
  Sync,

  /// Print the fitness / fatigue / form series
  Load {
    /// Days projected past today
    #[arg(long)]
    horizon: Option<i64>,

    /// Only show the last N days
    #[arg(long)]
    days: Option<usize>,

    /// Emit per-metric (date, value) points as JSON instead of a table
    #[arg(long)]
    json: bool,
  },

  /// Per-lap metrics for one activity
  Activity {
    id: i64,

    #[arg(long)]
    json: bool,
  },

  /// Cumulative distance in km
  Distance {
    /// Annual distance target in km
    #[arg(long)]
    target_km: Option<f64>,

    #[arg(long)]
    json: bool,
  },

  /// Store a Strava token-exchange JSON response
  ImportToken { file: PathBuf },

  /// Show whether a Strava token is stored and still valid
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .init();

  let cli = Cli::parse();
  let config = AppConfig::from_env().context("Failed to load configuration")?;
  let db = initialize_db(&config.database_path)
    .await
    .context("Failed to open database")?;
  let store = SqliteActivityStore::new(db.clone());
  let today = Local::now().date_naive();

  match cli.command {
    Command::Sync => {
      let result = strava_sync_activities(&config, &db).await?;
      println!(
        "{} new activities ({} fetched), {} detailed",
        result.new_activities, result.total_fetched, result.details_fetched
      );
      if result.capped {
        println!("Page limit reached, older activities were not listed (raise STRAVA_MAX_PAGES)");
      }
      if !result.not_found.is_empty() {
        println!("Missing on Strava: {:?}", result.not_found);
      }
    }
    Command::Load {
      horizon,
      days,
      json,
    } => {
      let report = training_load(&store, &config.load, horizon, today).await?;
      if json {
        println!("{}", serde_json::to_string_pretty(&LoadOutput::new(&report, days))?);
      } else {
        print!("{}", render_series(tail(&report.series, days)));
        if !report.skipped.is_empty() {
          println!("{} activities without detail were skipped", report.skipped.len());
        }
      }
    }
    Command::Activity { id, json } => {
      match activity_breakdown(&store, id, config.load.fts_kmh).await? {
        ActivityLookup::Found(breakdown) if json => {
          println!("{}", serde_json::to_string_pretty(&breakdown)?)
        }
        ActivityLookup::Found(breakdown) => print!("{}", render_activity(&breakdown)),
        ActivityLookup::NoDetail(id) => {
          anyhow::bail!("Activity {} has no laps or altitude stored yet, run sync", id)
        }
        ActivityLookup::Unknown(id) => anyhow::bail!("No activity {} in the store", id),
      }
    }
    Command::Distance { target_km, json } => {
      let report = distance_report(&store, target_km, today).await?;
      if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
      } else {
        print!("{}", render_distance(&report));
      }
    }
    Command::ImportToken { file } => {
      let tokens = strava_import_token(&db, &file).await?;
      println!("Token stored, expires at {}", tokens.expires_at.to_rfc3339());
    }
    Command::Status => {
      let status = strava_auth_status(&db).await?;
      println!("{}", serde_json::to_string_pretty(&status)?);
    }
  }

  db.close().await;
  Ok(())
}
