//! Access-token accessor consumed by the sync pipeline
//!
//! Tokens are obtained out of band (authorization-code exchange) and kept in
//! the `sync_state` table. This module only reads them, reports whether they
//! are still valid and exchanges the refresh token when they are not.

use crate::config::StravaConfig;
use crate::db::DbPool;
use crate::strava::{refresh_tokens, StravaError, StravaTokens, TokenResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::path::Path;
use tracing::info;

const SOURCE: &str = "strava";

#[async_trait]
pub trait TokenProvider: Send + Sync {
  /// Current token and whether it is still valid
  async fn get_token(&self) -> Result<(StravaTokens, bool), StravaError>;

  /// Exchange the refresh token for a new token pair
  async fn refresh(&self, token: &StravaTokens) -> Result<StravaTokens, StravaError>;
}

/// Token provider backed by the `sync_state` table
pub struct StoredTokenProvider {
  db: DbPool,
  http: Client,
  config: StravaConfig,
}

impl StoredTokenProvider {
  pub fn new(db: DbPool, http: Client, config: StravaConfig) -> Self {
    Self { db, http, config }
  }
}

#[async_trait]
impl TokenProvider for StoredTokenProvider {
  async fn get_token(&self) -> Result<(StravaTokens, bool), StravaError> {
    let tokens = load_tokens(&self.db)
      .await?
      .ok_or(StravaError::NotAuthenticated)?;
    let valid = tokens.is_valid();
    Ok((tokens, valid))
  }

  async fn refresh(&self, token: &StravaTokens) -> Result<StravaTokens, StravaError> {
    let new_tokens = refresh_tokens(&self.http, &self.config, &token.refresh_token).await?;
    save_tokens(&self.db, &new_tokens).await?;

    info!("Strava tokens refreshed");
    Ok(new_tokens)
  }
}

/// ---------------------------------------------------------------------------
/// Database Helpers
/// ---------------------------------------------------------------------------

pub async fn save_tokens(db: &DbPool, tokens: &StravaTokens) -> Result<(), StravaError> {
  sqlx::query(
    r#"
        INSERT INTO sync_state (source, access_token, refresh_token, token_expires_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(source) DO UPDATE SET
            access_token = excluded.access_token,
            refresh_token = excluded.refresh_token,
            token_expires_at = excluded.token_expires_at
        "#,
  )
  .bind(SOURCE)
  .bind(&tokens.access_token)
  .bind(&tokens.refresh_token)
  .bind(tokens.expires_at)
  .execute(db)
  .await
  .map_err(|e| StravaError::Database(e.to_string()))?;

  Ok(())
}

pub async fn load_tokens(db: &DbPool) -> Result<Option<StravaTokens>, StravaError> {
  let row: Option<(Option<String>, Option<String>, Option<DateTime<Utc>>)> = sqlx::query_as(
    "SELECT access_token, refresh_token, token_expires_at
             FROM sync_state WHERE source = ?1",
  )
  .bind(SOURCE)
  .fetch_optional(db)
  .await
  .map_err(|e| StravaError::Database(e.to_string()))?;

  match row {
    Some((Some(access), Some(refresh), Some(expires))) => Ok(Some(StravaTokens {
      access_token: access,
      refresh_token: refresh,
      expires_at: expires,
    })),
    _ => Ok(None),
  }
}

/// Record the time of the last completed sync
pub async fn update_sync_time(db: &DbPool) -> Result<(), StravaError> {
  sqlx::query("UPDATE sync_state SET last_sync_at = ?1 WHERE source = ?2")
    .bind(Utc::now())
    .bind(SOURCE)
    .execute(db)
    .await
    .map_err(|e| StravaError::Database(e.to_string()))?;

  Ok(())
}

/// Time of the last completed sync, if any
pub async fn last_sync_time(db: &DbPool) -> Result<Option<DateTime<Utc>>, StravaError> {
  let last: Option<Option<DateTime<Utc>>> =
    sqlx::query_scalar("SELECT last_sync_at FROM sync_state WHERE source = ?1")
      .bind(SOURCE)
      .fetch_optional(db)
      .await
      .map_err(|e| StravaError::Database(e.to_string()))?;

  Ok(last.flatten())
}

/// Store the JSON body of a Strava token-exchange response read from `path`
pub async fn import_token_file(db: &DbPool, path: &Path) -> Result<StravaTokens, StravaError> {
  let raw = tokio::fs::read_to_string(path)
    .await
    .map_err(|e| StravaError::OAuth(format!("Cannot read {}: {}", path.display(), e)))?;

  let response: TokenResponse =
    serde_json::from_str(&raw).map_err(|e| StravaError::Parse(e.to_string()))?;
  let tokens = StravaTokens::from_response(response);
  save_tokens(db, &tokens).await?;

  info!("Imported Strava token expiring at {}", tokens.expires_at);
  Ok(tokens)
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
