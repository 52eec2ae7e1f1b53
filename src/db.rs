use crate::models::{Activity, ActivityDetail, AltitudeStream, Lap};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

pub type DbPool = SqlitePool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("Database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("Migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),

  #[error("Corrupt payload for activity {activity_id}: {source}")]
  Payload {
    activity_id: i64,
    source: serde_json::Error,
  },

  #[error("Failed to prepare database directory: {0}")]
  Io(#[from] std::io::Error),
}

/// Open the SQLite database at `path` (creating it if needed) and run
/// migrations
pub async fn initialize_db(path: &Path) -> Result<DbPool, StoreError> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }

  info!("Initializing database at: {}", path.display());

  let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
    .create_if_missing(true);

  // One connection: writes are serialized and the process is the only writer
  let pool = SqlitePoolOptions::new()
    .max_connections(1)
    .connect_with(options)
    .await?;

  sqlx::migrate!("./migrations").run(&pool).await?;

  info!("Database initialized successfully");

  Ok(pool)
}

/// ---------------------------------------------------------------------------
/// Activity Store
/// ---------------------------------------------------------------------------

/// Persistence for activity summaries, lap lists and altitude streams.
///
/// Every write is insert-or-ignore keyed by activity id, so re-running a
/// sync never overwrites or duplicates a stored record.
#[async_trait]
pub trait ActivityStore: Send + Sync {
  /// Store summaries not seen before. Returns how many rows were new.
  async fn upsert_activity_summaries(&self, rows: &[Activity]) -> Result<usize, StoreError>;

  /// True only when both the altitude and the lap rows exist
  async fn has_detail(&self, activity_id: i64) -> Result<bool, StoreError>;

  async fn save_detail(
    &self,
    activity_id: i64,
    altitude: &AltitudeStream,
    laps: &[Lap],
  ) -> Result<(), StoreError>;

  /// All stored activities, oldest first
  async fn all_activities(&self) -> Result<Vec<Activity>, StoreError>;

  /// Stored detail, or `None` when either payload is absent or null
  async fn detail_for(&self, activity_id: i64) -> Result<Option<ActivityDetail>, StoreError>;
}

#[derive(Clone)]
pub struct SqliteActivityStore {
  pool: DbPool,
}

impl SqliteActivityStore {
  pub fn new(pool: DbPool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl ActivityStore for SqliteActivityStore {
  async fn upsert_activity_summaries(&self, rows: &[Activity]) -> Result<usize, StoreError> {
    let mut inserted = 0;

    for activity in rows {
      let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO activities (
          id, start_date, distance_m, elapsed_time_s, moving_time_s, total_elevation_gain_m
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
      )
      .bind(activity.id)
      .bind(activity.start_date)
      .bind(activity.distance_m)
      .bind(activity.elapsed_time_s)
      .bind(activity.moving_time_s)
      .bind(activity.total_elevation_gain_m)
      .execute(&self.pool)
      .await?;

      if result.rows_affected() > 0 {
        inserted += 1;
      } else {
        debug!(activity_id = activity.id, "Activity already stored");
      }
    }

    Ok(inserted)
  }

  async fn has_detail(&self, activity_id: i64) -> Result<bool, StoreError> {
    let found: i64 = sqlx::query_scalar(
      r#"
      SELECT
        EXISTS(SELECT 1 FROM activity_altitude WHERE id = ?1)
        AND EXISTS(SELECT 1 FROM activity_laps WHERE id = ?1)
      "#,
    )
    .bind(activity_id)
    .fetch_one(&self.pool)
    .await?;

    Ok(found != 0)
  }

  async fn save_detail(
    &self,
    activity_id: i64,
    altitude: &AltitudeStream,
    laps: &[Lap],
  ) -> Result<(), StoreError> {
    let altitude_json = serde_json::to_string(altitude)
      .map_err(|source| StoreError::Payload { activity_id, source })?;
    let laps_json =
      serde_json::to_string(laps).map_err(|source| StoreError::Payload { activity_id, source })?;

    sqlx::query("INSERT OR IGNORE INTO activity_altitude (id, altitude_json) VALUES (?1, ?2)")
      .bind(activity_id)
      .bind(&altitude_json)
      .execute(&self.pool)
      .await?;

    sqlx::query("INSERT OR IGNORE INTO activity_laps (id, laps_json) VALUES (?1, ?2)")
      .bind(activity_id)
      .bind(&laps_json)
      .execute(&self.pool)
      .await?;

    Ok(())
  }

  async fn all_activities(&self) -> Result<Vec<Activity>, StoreError> {
    let activities = sqlx::query_as::<_, Activity>(
      r#"
      SELECT id, start_date, distance_m, elapsed_time_s, moving_time_s, total_elevation_gain_m
      FROM activities
      ORDER BY start_date ASC, id ASC
      "#,
    )
    .fetch_all(&self.pool)
    .await?;

    Ok(activities)
  }

  async fn detail_for(&self, activity_id: i64) -> Result<Option<ActivityDetail>, StoreError> {
    let row: Option<(Option<String>, Option<String>)> = sqlx::query_as(
      r#"
      SELECT a.altitude_json, l.laps_json
      FROM activity_altitude a
      JOIN activity_laps l ON l.id = a.id
      WHERE a.id = ?1
      "#,
    )
    .bind(activity_id)
    .fetch_optional(&self.pool)
    .await?;

    let (altitude_json, laps_json) = match row {
      Some((Some(altitude), Some(laps))) => (altitude, laps),
      Some(_) => {
        warn!(activity_id, "Stored detail payload is null");
        return Ok(None);
      }
      None => return Ok(None),
    };

    // A JSON `null` payload reads the same as a SQL NULL
    let altitude: Option<AltitudeStream> = serde_json::from_str(&altitude_json)
      .map_err(|source| StoreError::Payload { activity_id, source })?;
    let laps: Option<Vec<Lap>> = serde_json::from_str(&laps_json)
      .map_err(|source| StoreError::Payload { activity_id, source })?;

    match (altitude, laps) {
      (Some(altitude), Some(laps)) => Ok(Some(ActivityDetail { altitude, laps })),
      _ => {
        warn!(activity_id, "Stored detail payload is null");
        Ok(None)
      }
    }
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
