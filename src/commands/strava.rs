use crate::config::AppConfig;
use crate::db::{DbPool, SqliteActivityStore};
use crate::strava::{StravaClient, StravaError, StravaTokens};
use crate::sync::{SyncError, SyncOrchestrator};
use crate::token::{
  import_token_file, last_sync_time, load_tokens, update_sync_time, StoredTokenProvider,
};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// ---------------------------------------------------------------------------
/// Check Authentication Status
/// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StravaAuthStatus {
  pub is_authenticated: bool,
  pub expires_at: Option<String>,
  pub needs_refresh: bool,
  pub last_sync_at: Option<String>,
}

pub async fn strava_auth_status(db: &DbPool) -> Result<StravaAuthStatus, StravaError> {
  let last_sync_at = last_sync_time(db).await?.map(|t| t.to_rfc3339());

  match load_tokens(db).await? {
    Some(tokens) => Ok(StravaAuthStatus {
      is_authenticated: true,
      expires_at: Some(tokens.expires_at.to_rfc3339()),
      needs_refresh: !tokens.is_valid(),
      last_sync_at,
    }),
    None => Ok(StravaAuthStatus {
      is_authenticated: false,
      expires_at: None,
      needs_refresh: false,
      last_sync_at,
    }),
  }
}

/// ---------------------------------------------------------------------------
/// Import Token
/// ---------------------------------------------------------------------------

/// Store the token-exchange response saved at `path`
pub async fn strava_import_token(db: &DbPool, path: &Path) -> Result<StravaTokens, StravaError> {
  import_token_file(db, path).await
}

/// ---------------------------------------------------------------------------
/// Sync Activities from Strava
/// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SyncResult {
  pub new_activities: usize,
  pub total_fetched: usize,
  pub details_fetched: usize,
  pub not_found: Vec<i64>,
  /// Summary paging hit the page cap; older activities were not listed
  pub capped: bool,
}

/// Sync running activity summaries, then backfill laps and altitude for any
/// stored activity still missing them
pub async fn strava_sync_activities(
  config: &AppConfig,
  db: &DbPool,
) -> Result<SyncResult, SyncError> {
  let client = StravaClient::new(config.strava.clone())?;
  let tokens = StoredTokenProvider::new(db.clone(), client.http().clone(), config.strava.clone());
  let store = SqliteActivityStore::new(db.clone());

  let sync = SyncOrchestrator::new(&client, &tokens, &store, &config.sync);
  let (summaries, details) = sync.run().await?;

  update_sync_time(db).await?;

  info!(
    "Strava sync complete: {} new activities (fetched {}), {} detailed",
    summaries.new_activities, summaries.total_fetched, details.fetched
  );

  Ok(SyncResult {
    new_activities: summaries.new_activities,
    total_fetched: summaries.total_fetched,
    details_fetched: details.fetched,
    not_found: details.not_found,
    capped: summaries.capped,
  })
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
