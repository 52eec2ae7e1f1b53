//! Training impulse per lap
//!
//! TSS = (t * NGS * IF) / (FTS * 36) = t * IF^2 / 36
//!
//! - t:   moving time of the lap in seconds
//! - NGS: normalized (grade adjusted) speed in km/h
//! - IF:  intensity factor, NGS / FTS
//! - FTS: functional threshold speed in km/h

use crate::gap::{adjustment_factor, format_pace, speed_to_pace};
use crate::models::{ActivityDetail, AltitudeStream, Lap};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

const MS_TO_KMH: f64 = 3.6;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrimpError {
  #[error("Invalid lap data for activity {activity_id}: {reason}")]
  InvalidLapData { activity_id: i64, reason: String },

  #[error("Altitude data missing for activity {0}")]
  MissingAltitudeData(i64),
}

impl TrimpError {
  fn invalid(lap: &Lap, reason: impl Into<String>) -> Self {
    TrimpError::InvalidLapData {
      activity_id: lap.activity_id,
      reason: reason.into(),
    }
  }
}

/// Values derived for a single lap
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LapMetrics {
  pub alt_diff_m: f64,
  pub gradient_pct: f64,
  pub pace_s_per_km: f64,
  pub normalized_pace_s_per_km: f64,
  pub normalized_speed_kmh: f64,
  pub intensity_factor: f64,
  pub trimp: f64,
}

impl fmt::Display for LapMetrics {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "TRIMP {:.1} | alt {:+.0} m | grade {:+.1}% | pace {} | GAP {} | IF {:.2}",
      self.trimp,
      self.alt_diff_m,
      self.gradient_pct,
      format_pace(self.pace_s_per_km),
      format_pace(self.normalized_pace_s_per_km),
      self.intensity_factor
    )
  }
}

/// Altitude change over the lap, end sample minus start sample
pub fn altitude_difference(lap: &Lap, stream: &AltitudeStream) -> Result<f64, TrimpError> {
  let samples = stream
    .altitude
    .as_ref()
    .ok_or(TrimpError::MissingAltitudeData(lap.activity_id))?;

  if lap.start_index > lap.end_index {
    return Err(TrimpError::invalid(
      lap,
      format!("start index {} after end index {}", lap.start_index, lap.end_index),
    ));
  }

  match (samples.get(lap.start_index), samples.get(lap.end_index)) {
    (Some(start), Some(end)) => Ok(end - start),
    _ => Err(TrimpError::invalid(
      lap,
      format!(
        "lap indices {}..={} outside altitude stream of {} samples",
        lap.start_index,
        lap.end_index,
        samples.len()
      ),
    )),
  }
}

/// Compute the grade adjusted metrics and TRIMP for one lap.
///
/// `fts_kmh` is the athlete's functional threshold speed.
pub fn compute_lap_trimp(
  lap: &Lap,
  altitude: &AltitudeStream,
  fts_kmh: f64,
) -> Result<LapMetrics, TrimpError> {
  let alt_diff_m = altitude_difference(lap, altitude)?;
  debug!(activity_id = lap.activity_id, "alt_diff = {}", alt_diff_m);

  if !(lap.distance_m > 0.0) {
    return Err(TrimpError::invalid(
      lap,
      format!("lap distance must be positive, got {}", lap.distance_m),
    ));
  }
  let gradient_pct = alt_diff_m / lap.distance_m * 100.0;
  debug!(activity_id = lap.activity_id, "gradient = {}", gradient_pct);

  if lap.moving_time_s <= 0 {
    return Err(TrimpError::invalid(
      lap,
      format!("lap moving time must be positive, got {}", lap.moving_time_s),
    ));
  }
  let moving_time_s = lap.moving_time_s as f64;
  let speed_kmh = lap.distance_m / moving_time_s * MS_TO_KMH;
  debug!(activity_id = lap.activity_id, "speed = {}", speed_kmh);

  let pace_s_per_km = speed_to_pace(speed_kmh);
  debug!(activity_id = lap.activity_id, "pace = {}", format_pace(pace_s_per_km));

  let normalized_speed_kmh = speed_kmh * adjustment_factor(gradient_pct);
  let normalized_pace_s_per_km = speed_to_pace(normalized_speed_kmh);
  debug!(
    activity_id = lap.activity_id,
    "NGS = {}, NGP = {}",
    normalized_speed_kmh,
    format_pace(normalized_pace_s_per_km)
  );

  let intensity_factor = normalized_speed_kmh / fts_kmh;
  debug!(activity_id = lap.activity_id, "IF = {}", intensity_factor);

  let trimp = moving_time_s * intensity_factor.powi(2) / 36.0;

  Ok(LapMetrics {
    alt_diff_m,
    gradient_pct,
    pace_s_per_km,
    normalized_pace_s_per_km,
    normalized_speed_kmh,
    intensity_factor,
    trimp,
  })
}

/// ---------------------------------------------------------------------------
/// Per-Activity Totals
/// ---------------------------------------------------------------------------

/// TRIMP of one activity, summed over the laps that could be computed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityTrimp {
  pub activity_id: i64,
  pub total: f64,
  pub laps: Vec<LapMetrics>,
  pub skipped_laps: usize,
}

/// Sum lap TRIMP for an activity. Laps that fail are logged and left out.
pub fn activity_trimp(activity_id: i64, detail: &ActivityDetail, fts_kmh: f64) -> ActivityTrimp {
  let mut laps = Vec::with_capacity(detail.laps.len());
  let mut skipped_laps = 0;

  for (index, lap) in detail.laps.iter().enumerate() {
    match compute_lap_trimp(lap, &detail.altitude, fts_kmh) {
      Ok(metrics) => {
        debug!(activity_id, lap = index + 1, "{}", metrics);
        laps.push(metrics);
      }
      Err(e) => {
        warn!(activity_id, lap = index + 1, "Skipping lap: {}", e);
        skipped_laps += 1;
      }
    }
  }

  let total: f64 = laps.iter().map(|m| m.trimp).sum();
  debug!(activity_id, "activity TRIMP = {}", total);

  ActivityTrimp {
    activity_id,
    total,
    laps,
    skipped_laps,
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
