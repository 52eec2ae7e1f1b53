//! Grade-adjusted training load for Strava running history.
//!
//! Activity summaries, laps and altitude streams are synced from Strava into
//! SQLite. Each lap is scored with a grade adjusted pace TRIMP and the daily
//! totals are folded into fitness, fatigue and form series.

pub mod commands;
pub mod config;
pub mod db;
pub mod gap;
pub mod load;
pub mod models;
pub mod strava;
pub mod sync;
pub mod token;
pub mod trimp;

#[cfg(test)]
mod test_utils;

pub use config::AppConfig;
pub use db::{ActivityStore, SqliteActivityStore, StoreError};
pub use load::{compute_training_load, DailyLoad, LoadReport};
pub use models::{Activity, ActivityDetail, AltitudeStream, Lap};
pub use sync::{SyncError, SyncOrchestrator};
pub use trimp::{activity_trimp, compute_lap_trimp, LapMetrics, TrimpError};
