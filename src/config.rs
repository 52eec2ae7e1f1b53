//! Runtime configuration
//!
//! Built once at startup from the environment (a `.env` file is honoured)
//! and passed by reference into each component.

use crate::load::{ALPHA_ATL, ALPHA_CTL, DEFAULT_HORIZON_DAYS, MAX_HORIZON_DAYS};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// ---------------------------------------------------------------------------
/// Defaults
/// ---------------------------------------------------------------------------

pub const STRAVA_TOKEN_URL: &str = "https://www.strava.com/oauth/token";
pub const STRAVA_API_BASE: &str = "https://www.strava.com/api/v3";

/// Threshold pace of 3:56/km expressed as a speed in km/h
pub const DEFAULT_FTS_KMH: f64 = 15.254237288135592;

/// 2019-12-31T09:02:11Z
pub const DEFAULT_SYNC_AFTER: i64 = 1577782931;

pub const DEFAULT_PER_PAGE: u32 = 50;
pub const DEFAULT_MAX_PAGES: u32 = 10;

const DATA_DIR_NAME: &str = ".stravaapi";
const DB_FILE_NAME: &str = "athlete.db";

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Missing credential: {0} is not set")]
  MissingCredential(String),

  #[error("Invalid value for {key}: {value:?}")]
  InvalidValue { key: String, value: String },

  #[error("Could not determine home directory")]
  NoHomeDir,
}

/// ---------------------------------------------------------------------------
/// Configuration Structures
/// ---------------------------------------------------------------------------

/// Credentials, endpoints and HTTP policy for the Strava API
#[derive(Debug, Clone)]
pub struct StravaConfig {
  pub client_id: String,
  pub client_secret: String,
  pub api_base: String,
  pub token_url: String,
  pub timeout_secs: u64,
  pub connect_timeout_secs: u64,
  pub retry: RetryPolicy,
}

impl StravaConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    Ok(Self {
      client_id: required("STRAVA_CLIENT_ID")?,
      client_secret: required("STRAVA_CLIENT_SECRET")?,
      api_base: env::var("STRAVA_API_BASE").unwrap_or_else(|_| STRAVA_API_BASE.to_string()),
      token_url: env::var("STRAVA_TOKEN_URL").unwrap_or_else(|_| STRAVA_TOKEN_URL.to_string()),
      timeout_secs: parsed("STRAVA_HTTP_TIMEOUT_SECS", 30)?,
      connect_timeout_secs: parsed("STRAVA_CONNECT_TIMEOUT_SECS", 10)?,
      retry: RetryPolicy {
        max_attempts: parsed("STRAVA_MAX_ATTEMPTS", 3)?,
        initial_backoff_ms: parsed("STRAVA_BACKOFF_MS", 1000)?,
      },
    })
  }
}

/// Bounded exponential backoff for idempotent GET requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Total attempts including the first one
  pub max_attempts: u32,
  pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_backoff_ms: 1000,
    }
  }
}

impl RetryPolicy {
  /// Delay before retry number `attempt` (1-based)
  pub fn backoff_ms(&self, attempt: u32) -> u64 {
    self
      .initial_backoff_ms
      .saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)))
  }
}

/// Summary sync settings
#[derive(Debug, Clone)]
pub struct SyncSettings {
  /// Only activities starting after this unix timestamp are listed
  pub after: i64,
  pub per_page: u32,
  /// Safety cap on the number of pages fetched in one summary sync
  pub max_pages: u32,
  /// Raw Strava `type` values treated as running
  pub activity_types: Vec<String>,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      after: DEFAULT_SYNC_AFTER,
      per_page: DEFAULT_PER_PAGE,
      max_pages: DEFAULT_MAX_PAGES,
      activity_types: vec!["Run".to_string()],
    }
  }
}

/// Training load model settings
#[derive(Debug, Clone)]
pub struct LoadSettings {
  pub fts_kmh: f64,
  pub horizon_days: i64,
  pub ctl_days: f64,
  pub atl_days: f64,
}

impl Default for LoadSettings {
  fn default() -> Self {
    Self {
      fts_kmh: DEFAULT_FTS_KMH,
      horizon_days: DEFAULT_HORIZON_DAYS,
      ctl_days: ALPHA_CTL,
      atl_days: ALPHA_ATL,
    }
  }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub strava: StravaConfig,
  pub database_path: PathBuf,
  pub sync: SyncSettings,
  pub load: LoadSettings,
}

impl AppConfig {
  /// Load configuration from `.env` and the process environment.
  ///
  /// Fails fast with `MissingCredential` when the Strava client id or secret
  /// is absent.
  pub fn from_env() -> Result<Self, ConfigError> {
    dotenvy::dotenv().ok();

    let strava = StravaConfig::from_env()?;

    let data_dir = match env::var("TRAINING_LOAD_DATA_DIR") {
      Ok(dir) => PathBuf::from(dir),
      Err(_) => default_data_dir()?,
    };
    let database_path = env::var("TRAINING_LOAD_DB")
      .map(PathBuf::from)
      .unwrap_or_else(|_| data_dir.join(DB_FILE_NAME));

    let defaults = SyncSettings::default();
    let sync = SyncSettings {
      after: parsed("STRAVA_SYNC_AFTER", defaults.after)?,
      per_page: parsed("STRAVA_PER_PAGE", defaults.per_page)?,
      max_pages: parsed("STRAVA_MAX_PAGES", defaults.max_pages)?,
      activity_types: match env::var("STRAVA_ACTIVITY_TYPES") {
        Ok(types) => types
          .split(',')
          .map(|t| t.trim().to_string())
          .filter(|t| !t.is_empty())
          .collect(),
        Err(_) => defaults.activity_types,
      },
    };

    let defaults = LoadSettings::default();
    let load = LoadSettings {
      fts_kmh: parsed("TRAINING_LOAD_FTS", defaults.fts_kmh)?,
      horizon_days: parsed("TRAINING_LOAD_HORIZON_DAYS", defaults.horizon_days)?,
      ctl_days: parsed("TRAINING_LOAD_CTL_DAYS", defaults.ctl_days)?,
      atl_days: parsed("TRAINING_LOAD_ATL_DAYS", defaults.atl_days)?,
    };

    if load.fts_kmh <= 0.0 {
      return Err(ConfigError::InvalidValue {
        key: "TRAINING_LOAD_FTS".into(),
        value: load.fts_kmh.to_string(),
      });
    }
    if !(0..=MAX_HORIZON_DAYS).contains(&load.horizon_days) {
      return Err(ConfigError::InvalidValue {
        key: "TRAINING_LOAD_HORIZON_DAYS".into(),
        value: load.horizon_days.to_string(),
      });
    }

    Ok(Self {
      strava,
      database_path,
      sync,
      load,
    })
  }
}

/// ---------------------------------------------------------------------------
/// Environment Helpers
/// ---------------------------------------------------------------------------

fn required(key: &str) -> Result<String, ConfigError> {
  match env::var(key) {
    Ok(value) if !value.trim().is_empty() => Ok(value),
    _ => Err(ConfigError::MissingCredential(key.to_string())),
  }
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
  match env::var(key) {
    Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
      key: key.to_string(),
      value: raw,
    }),
    Err(_) => Ok(default),
  }
}

fn default_data_dir() -> Result<PathBuf, ConfigError> {
  directories::BaseDirs::new()
    .map(|dirs| dirs.home_dir().join(DATA_DIR_NAME))
    .ok_or(ConfigError::NoHomeDir)
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
