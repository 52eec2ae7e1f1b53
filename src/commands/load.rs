use crate::config::LoadSettings;
use crate::db::{ActivityStore, StoreError};
use crate::gap::format_pace;
use crate::load::{
  compute_training_load, cumulative_distance, distance_target_series, series_points, ActivityLoad,
  DailyLoad, LoadMetric, LoadReport, SkippedActivity, MAX_HORIZON_DAYS,
};
use crate::models::Activity;
use crate::trimp::{activity_trimp, ActivityTrimp};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::fmt::Write;

/// ---------------------------------------------------------------------------
/// Training Load
/// ---------------------------------------------------------------------------

/// Fitness/fatigue/form series, optionally overriding the projection horizon
pub async fn training_load(
  store: &dyn ActivityStore,
  settings: &LoadSettings,
  horizon_days: Option<i64>,
  today: NaiveDate,
) -> Result<LoadReport, StoreError> {
  let mut settings = settings.clone();
  if let Some(horizon) = horizon_days {
    settings.horizon_days = horizon.clamp(0, MAX_HORIZON_DAYS);
  }

  compute_training_load(store, &settings, today).await
}

/// Last `days` entries of the series, or all of it
pub fn tail(series: &[DailyLoad], days: Option<usize>) -> &[DailyLoad] {
  match days {
    Some(n) if n < series.len() => &series[series.len() - n..],
    _ => series,
  }
}

/// One `(date, value)` line per metric, ready for plotting
#[derive(Debug, Serialize)]
pub struct LoadPoints {
  pub trimp: Vec<(NaiveDate, f64)>,
  pub fitness: Vec<(NaiveDate, f64)>,
  pub fatigue: Vec<(NaiveDate, f64)>,
  pub form: Vec<(NaiveDate, f64)>,
}

impl LoadPoints {
  pub fn from_series(series: &[DailyLoad]) -> Self {
    Self {
      trimp: series_points(series, LoadMetric::Trimp),
      fitness: series_points(series, LoadMetric::Fitness),
      fatigue: series_points(series, LoadMetric::Fatigue),
      form: series_points(series, LoadMetric::Form),
    }
  }
}

/// JSON shape of the `load` command
#[derive(Debug, Serialize)]
pub struct LoadOutput<'a> {
  pub points: LoadPoints,
  pub activities: &'a [ActivityLoad],
  pub skipped: &'a [SkippedActivity],
}

impl<'a> LoadOutput<'a> {
  /// Points for the last `days` of the series, or all of it
  pub fn new(report: &'a LoadReport, days: Option<usize>) -> Self {
    Self {
      points: LoadPoints::from_series(tail(&report.series, days)),
      activities: &report.activities,
      skipped: &report.skipped,
    }
  }
}

pub fn render_series(series: &[DailyLoad]) -> String {
  let mut out = format!(
    "{:<10}  {:>7}  {:>7}  {:>7}  {:>7}\n",
    "date", "trimp", "fitness", "fatigue", "form"
  );
  for day in series {
    let _ = writeln!(
      out,
      "{}  {:>7.1}  {:>7.1}  {:>7.1}  {:>7.1}",
      day.date, day.trimp_total, day.fitness, day.fatigue, day.form
    );
  }
  out
}

/// ---------------------------------------------------------------------------
/// Single Activity
/// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ActivityBreakdown {
  pub activity: Activity,
  pub trimp: ActivityTrimp,
}

#[derive(Debug, Serialize)]
pub enum ActivityLookup {
  Found(ActivityBreakdown),
  /// Summary stored but laps or altitude are not
  NoDetail(i64),
  Unknown(i64),
}

/// Per-lap metrics and TRIMP total for one stored activity
pub async fn activity_breakdown(
  store: &dyn ActivityStore,
  activity_id: i64,
  fts_kmh: f64,
) -> Result<ActivityLookup, StoreError> {
  let activity = match store
    .all_activities()
    .await?
    .into_iter()
    .find(|a| a.id == activity_id)
  {
    Some(activity) => activity,
    None => return Ok(ActivityLookup::Unknown(activity_id)),
  };

  let detail = match store.detail_for(activity_id).await? {
    Some(detail) => detail,
    None => return Ok(ActivityLookup::NoDetail(activity_id)),
  };

  let trimp = activity_trimp(activity_id, &detail, fts_kmh);
  Ok(ActivityLookup::Found(ActivityBreakdown { activity, trimp }))
}

pub fn render_activity(breakdown: &ActivityBreakdown) -> String {
  let activity = &breakdown.activity;
  let avg_pace = if activity.distance_m > 0.0 {
    activity.moving_time_s as f64 / activity.distance_km()
  } else {
    f64::NAN
  };

  let mut out = format!(
    "Activity {} on {}: {:.2} km, avg pace {}\n",
    activity.id,
    activity.day(),
    activity.distance_km(),
    format_pace(avg_pace)
  );
  for (i, lap) in breakdown.trimp.laps.iter().enumerate() {
    let _ = writeln!(out, "  lap {:>2}: {}", i + 1, lap);
  }
  if breakdown.trimp.skipped_laps > 0 {
    let _ = writeln!(out, "  ({} laps skipped)", breakdown.trimp.skipped_laps);
  }
  let _ = writeln!(out, "Total TRIMP {:.1}", breakdown.trimp.total);
  out
}

/// ---------------------------------------------------------------------------
/// Distance
/// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct DistanceReport {
  pub cumulative_km: Vec<(NaiveDate, f64)>,
  /// Even-pace line toward an annual target, from January 1st to today
  pub target_km: Vec<(NaiveDate, f64)>,
}

pub async fn distance_report(
  store: &dyn ActivityStore,
  annual_target_km: Option<f64>,
  today: NaiveDate,
) -> Result<DistanceReport, StoreError> {
  let activities = store.all_activities().await?;
  let cumulative_km = cumulative_distance(&activities);

  let target_km = match (annual_target_km, NaiveDate::from_ymd_opt(today.year(), 1, 1)) {
    (Some(target), Some(jan1)) => distance_target_series(jan1, today, target),
    _ => Vec::new(),
  };

  Ok(DistanceReport {
    cumulative_km,
    target_km,
  })
}

pub fn render_distance(report: &DistanceReport) -> String {
  let mut out = String::new();
  for (date, km) in &report.cumulative_km {
    let _ = writeln!(out, "{}  {:>9.2} km", date, km);
  }
  if let Some((date, km)) = report.target_km.last() {
    let _ = writeln!(out, "Target through {}: {:.2} km", date, km);
  }
  out
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
