use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A running activity summary as stored locally.
///
/// `start_date` carries Strava's `start_date_local`, so its calendar date is
/// the athlete's local day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Activity {
  pub id: i64,
  pub start_date: DateTime<Utc>,
  pub distance_m: f64,
  pub elapsed_time_s: i64,
  pub moving_time_s: i64,
  pub total_elevation_gain_m: f64,
}

impl Activity {
  /// Local calendar day the activity started on
  pub fn day(&self) -> NaiveDate {
    self.start_date.date_naive()
  }

  pub fn distance_km(&self) -> f64 {
    self.distance_m / 1000.0
  }
}
