//! Test utilities and helpers for unit testing
//!
//! This module provides common test infrastructure including:
//! - Database setup/teardown
//! - Mock data factories
//! - In-memory fakes for the remote API and token provider
//! - Helper assertions

use crate::config::{LoadSettings, RetryPolicy, StravaConfig, DEFAULT_FTS_KMH};
use crate::models::{Activity, AltitudeStream, Lap};
use crate::strava::{
  RemoteActivityApi, StravaActivity, StravaActivityDetail, StravaError, StravaLap, StravaTokens,
};
use crate::token::TokenProvider;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Mutex;

/// Functional threshold speed used across tests, in km/h
pub const DEFAULT_FTS: f64 = DEFAULT_FTS_KMH;

/// Access token handed out by fakes after a refresh
pub const REFRESHED_TOKEN: &str = "refreshed-access";

/// ---------------------------------------------------------------------------
/// Database Test Utilities
/// ---------------------------------------------------------------------------

/// Create an in-memory SQLite database for testing
/// Runs all migrations and returns a ready-to-use pool
///
/// Uses max_connections(1) to prevent multiple pool connections from creating
/// isolated in-memory databases, which would cause intermittent test failures
pub async fn setup_test_db() -> SqlitePool {
  let pool = sqlx::sqlite::SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("Failed to create in-memory database");

  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .expect("Failed to run migrations");

  pool
}

/// Close a test database pool
pub async fn teardown_test_db(pool: SqlitePool) {
  pool.close().await;
}

/// ---------------------------------------------------------------------------
/// Mock Data Factories
/// ---------------------------------------------------------------------------

/// Lap of activity 1 covering altitude samples `start..=end`
pub fn mock_lap(start_index: usize, end_index: usize, moving_time_s: i64, distance_m: f64) -> Lap {
  Lap {
    activity_id: 1,
    start_index,
    end_index,
    distance_m,
    moving_time_s,
    total_elevation_gain_m: 0.0,
  }
}

/// One-hour activity starting at the given RFC 3339 timestamp
pub fn mock_activity(id: i64, start: &str, distance_m: f64) -> Activity {
  Activity {
    id,
    start_date: parse_time(start),
    distance_m,
    elapsed_time_s: 3700,
    moving_time_s: 3600,
    total_elevation_gain_m: 0.0,
  }
}

pub fn mock_load_settings() -> LoadSettings {
  LoadSettings {
    fts_kmh: DEFAULT_FTS,
    ..LoadSettings::default()
  }
}

/// Strava config pointed at a mock server, with near-instant retries
pub fn mock_strava_config(server_url: &str) -> StravaConfig {
  StravaConfig {
    client_id: "test-client".to_string(),
    client_secret: "test-secret".to_string(),
    api_base: server_url.to_string(),
    token_url: format!("{}/oauth/token", server_url),
    timeout_secs: 5,
    connect_timeout_secs: 2,
    retry: RetryPolicy {
      max_attempts: 3,
      initial_backoff_ms: 1,
    },
  }
}

pub fn mock_tokens(expires_at: DateTime<Utc>) -> StravaTokens {
  StravaTokens {
    access_token: "test-access".to_string(),
    refresh_token: "test-refresh".to_string(),
    expires_at,
  }
}

/// Raw Strava summary of a 10 km run
pub fn raw_run(id: i64, start: &str) -> StravaActivity {
  StravaActivity {
    id,
    activity_type: "Run".to_string(),
    start_date_local: parse_time(start),
    distance: 10000.0,
    elapsed_time: 3700,
    total_elevation_gain: 50.0,
    moving_time: 3600,
  }
}

/// Raw Strava summary of a ride, filtered out by the default settings
pub fn raw_ride(id: i64, start: &str) -> StravaActivity {
  StravaActivity {
    activity_type: "Ride".to_string(),
    distance: 40000.0,
    ..raw_run(id, start)
  }
}

fn parse_time(rfc3339: &str) -> DateTime<Utc> {
  DateTime::parse_from_rfc3339(rfc3339)
    .expect("Invalid RFC 3339 timestamp in test")
    .with_timezone(&Utc)
}

/// ---------------------------------------------------------------------------
/// Fake Remote API
/// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeStravaState {
  list_calls: usize,
  detail_calls: usize,
  altitude_calls: usize,
  tokens_seen: Vec<String>,
  failing_details: HashSet<i64>,
  missing_details: HashSet<i64>,
  fail_listing: bool,
}

/// Serves fixed pages of summaries and a single-lap detail for any activity
pub struct FakeStrava {
  pages: Vec<Vec<StravaActivity>>,
  state: Mutex<FakeStravaState>,
}

impl FakeStrava {
  /// Page `n` (1-based) returns `pages[n - 1]`, later pages are empty
  pub fn with_pages(pages: Vec<Vec<StravaActivity>>) -> Self {
    Self {
      pages,
      state: Mutex::new(FakeStravaState::default()),
    }
  }

  /// Answer detail requests for `id` with a 500
  pub fn fail_detail_for(&self, id: i64) {
    self.state.lock().unwrap().failing_details.insert(id);
  }

  /// Answer detail requests for `id` with a 404
  pub fn missing_detail_for(&self, id: i64) {
    self.state.lock().unwrap().missing_details.insert(id);
  }

  pub fn fail_listing(&self) {
    self.state.lock().unwrap().fail_listing = true;
  }

  pub fn clear_failures(&self) {
    let mut state = self.state.lock().unwrap();
    state.failing_details.clear();
    state.missing_details.clear();
    state.fail_listing = false;
  }

  pub fn list_calls(&self) -> usize {
    self.state.lock().unwrap().list_calls
  }

  pub fn detail_calls(&self) -> usize {
    self.state.lock().unwrap().detail_calls
  }

  pub fn altitude_calls(&self) -> usize {
    self.state.lock().unwrap().altitude_calls
  }

  /// Access tokens presented to `list_activities`, in call order
  pub fn tokens_seen(&self) -> Vec<String> {
    self.state.lock().unwrap().tokens_seen.clone()
  }
}

#[async_trait]
impl RemoteActivityApi for FakeStrava {
  async fn list_activities(
    &self,
    access_token: &str,
    _after: i64,
    page: u32,
    _per_page: u32,
  ) -> Result<Vec<StravaActivity>, StravaError> {
    let mut state = self.state.lock().unwrap();
    state.list_calls += 1;
    state.tokens_seen.push(access_token.to_string());
    if state.fail_listing {
      return Err(StravaError::Api {
        status: 503,
        body: "unavailable".to_string(),
      });
    }

    let index = page.saturating_sub(1) as usize;
    Ok(self.pages.get(index).cloned().unwrap_or_default())
  }

  async fn get_activity_detail(
    &self,
    _access_token: &str,
    activity_id: i64,
  ) -> Result<StravaActivityDetail, StravaError> {
    let mut state = self.state.lock().unwrap();
    state.detail_calls += 1;
    if state.missing_details.contains(&activity_id) {
      return Err(StravaError::NotFound(format!("/activities/{}", activity_id)));
    }
    if state.failing_details.contains(&activity_id) {
      return Err(StravaError::Api {
        status: 500,
        body: "boom".to_string(),
      });
    }

    Ok(StravaActivityDetail {
      id: activity_id,
      laps: vec![StravaLap {
        start_index: 0,
        end_index: 2,
        distance: 1000.0,
        moving_time: 300,
        total_elevation_gain: 2.0,
      }],
    })
  }

  async fn get_altitude_stream(
    &self,
    _access_token: &str,
    _activity_id: i64,
  ) -> Result<AltitudeStream, StravaError> {
    self.state.lock().unwrap().altitude_calls += 1;
    Ok(AltitudeStream::new(vec![100.0, 101.0, 102.0]))
  }
}

/// ---------------------------------------------------------------------------
/// Fake Token Provider
/// ---------------------------------------------------------------------------

pub struct FakeTokens {
  current: Mutex<StravaTokens>,
  refresh_calls: Mutex<usize>,
  refresh_fails: bool,
}

impl FakeTokens {
  fn holding(tokens: StravaTokens, refresh_fails: bool) -> Self {
    Self {
      current: Mutex::new(tokens),
      refresh_calls: Mutex::new(0),
      refresh_fails,
    }
  }

  pub fn valid() -> Self {
    Self::holding(mock_tokens(Utc::now() + Duration::hours(6)), false)
  }

  pub fn expired() -> Self {
    Self::holding(mock_tokens(Utc::now() - Duration::minutes(5)), false)
  }

  pub fn expired_and_unrefreshable() -> Self {
    Self::holding(mock_tokens(Utc::now() - Duration::minutes(5)), true)
  }

  pub fn refresh_calls(&self) -> usize {
    *self.refresh_calls.lock().unwrap()
  }
}

#[async_trait]
impl TokenProvider for FakeTokens {
  async fn get_token(&self) -> Result<(StravaTokens, bool), StravaError> {
    let tokens = self.current.lock().unwrap().clone();
    let valid = tokens.is_valid();
    Ok((tokens, valid))
  }

  async fn refresh(&self, _token: &StravaTokens) -> Result<StravaTokens, StravaError> {
    *self.refresh_calls.lock().unwrap() += 1;
    if self.refresh_fails {
      return Err(StravaError::OAuth("invalid refresh token".to_string()));
    }

    let refreshed = StravaTokens {
      access_token: REFRESHED_TOKEN.to_string(),
      refresh_token: "refreshed-refresh".to_string(),
      expires_at: Utc::now() + Duration::hours(6),
    };
    *self.current.lock().unwrap() = refreshed.clone();
    Ok(refreshed)
  }
}

/// ---------------------------------------------------------------------------
/// Test Macros
/// ---------------------------------------------------------------------------

/// Assert two floats are approximately equal within a tolerance
#[macro_export]
macro_rules! assert_approx_eq {
  ($left:expr, $right:expr, $tolerance:expr) => {
    let diff = ($left - $right).abs();
    assert!(
      diff < $tolerance,
      "Values not approximately equal: {} vs {} (diff: {}, tolerance: {})",
      $left,
      $right,
      diff,
      $tolerance
    );
  };
}

/// ---------------------------------------------------------------------------
/// Tests for Test Utilities
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_setup_db_creates_schema() {
    let pool = setup_test_db().await;

    let tables: Vec<(String,)> = sqlx::query_as(
      "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('activities', 'activity_altitude', 'activity_laps', 'sync_state')"
    )
    .fetch_all(&pool)
    .await
    .expect("Failed to query tables");

    assert_eq!(tables.len(), 4, "Expected 4 tables, got {}", tables.len());

    teardown_test_db(pool).await;
  }

  #[test]
  fn test_mock_factories_create_valid_data() {
    let activity = mock_activity(9, "2024-03-01T06:30:00Z", 8000.0);
    assert_eq!(activity.day().to_string(), "2024-03-01");
    assert!(activity.moving_time_s > 0);

    let ride = raw_ride(2, "2024-03-01T06:30:00Z");
    assert_eq!(ride.activity_type, "Ride");
    assert_eq!(ride.id, 2);

    assert!(mock_tokens(Utc::now() + Duration::hours(1)).is_valid());
    assert!(!mock_tokens(Utc::now() - Duration::hours(1)).is_valid());
  }

  #[tokio::test]
  async fn test_fake_strava_pages_then_empty() {
    let api = FakeStrava::with_pages(vec![vec![raw_run(1, "2024-01-01T07:00:00Z")]]);

    assert_eq!(api.list_activities("t", 0, 1, 50).await.unwrap().len(), 1);
    assert!(api.list_activities("t", 0, 2, 50).await.unwrap().is_empty());
    assert_eq!(api.list_calls(), 2);
  }
}
