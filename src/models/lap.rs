use serde::{Deserialize, Serialize};

/// A lap of an activity.
///
/// `start_index` and `end_index` point into the parent activity's altitude
/// stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lap {
  pub activity_id: i64,
  pub start_index: usize,
  pub end_index: usize,
  pub distance_m: f64,
  pub moving_time_s: i64,
  #[serde(default)]
  pub total_elevation_gain_m: f64,
}

/// Altitude samples for an activity, aligned index-for-index with the lap
/// index space. `altitude` is `None` when the remote source had no altitude
/// channel (manual entries, treadmill runs).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AltitudeStream {
  pub altitude: Option<Vec<f64>>,
}

impl AltitudeStream {
  pub fn new(samples: Vec<f64>) -> Self {
    Self {
      altitude: Some(samples),
    }
  }

  pub fn missing() -> Self {
    Self { altitude: None }
  }

  pub fn len(&self) -> usize {
    self.altitude.as_ref().map(Vec::len).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Lap and altitude detail stored for one activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDetail {
  pub altitude: AltitudeStream,
  pub laps: Vec<Lap>,
}
