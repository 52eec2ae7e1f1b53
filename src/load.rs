//! Fitness / fatigue / form series
//!
//! Daily TRIMP totals are folded left to right through two exponentially
//! weighted averages:
//!
//! - Fitness (CTL): `fitness(n) = fitness(n-1) * exp(-1/45) + trimp(n)`
//! - Fatigue (ATL): `fatigue(n) = fatigue(n-1) * exp(-1/15) + trimp(n)`
//! - Form (TSB):    `fitness(n) - fatigue(n)`
//!
//! Each day depends on the previous one, so the series is always built in
//! ascending date order from the first recorded activity.

use crate::config::LoadSettings;
use crate::db::{ActivityStore, StoreError};
use crate::models::Activity;
use crate::trimp::{activity_trimp, ActivityTrimp};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Fitness time constant in days
pub const ALPHA_CTL: f64 = 45.0;

/// Fatigue time constant in days
pub const ALPHA_ATL: f64 = 15.0;

pub const DEFAULT_HORIZON_DAYS: i64 = 30;

/// Longest projection past today, in days
pub const MAX_HORIZON_DAYS: i64 = 3650;

/// Load values for one calendar day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyLoad {
  pub date: NaiveDate,
  pub trimp_total: f64,
  pub fitness: f64,
  pub fatigue: f64,
  pub form: f64,
}

/// Decay constants of the fitness/fatigue model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadModel {
  pub ctl_days: f64,
  pub atl_days: f64,
}

impl Default for LoadModel {
  fn default() -> Self {
    Self {
      ctl_days: ALPHA_CTL,
      atl_days: ALPHA_ATL,
    }
  }
}

impl LoadModel {
  pub fn new(ctl_days: f64, atl_days: f64) -> Self {
    Self { ctl_days, atl_days }
  }

  /// Advance one day from the previous day's values
  pub fn step(&self, prev: Option<&DailyLoad>, date: NaiveDate, trimp: f64) -> DailyLoad {
    let (prev_fitness, prev_fatigue) = prev.map(|p| (p.fitness, p.fatigue)).unwrap_or((0.0, 0.0));

    let fitness = prev_fitness * (-1.0 / self.ctl_days).exp() + trimp;
    let fatigue = prev_fatigue * (-1.0 / self.atl_days).exp() + trimp;

    DailyLoad {
      date,
      trimp_total: trimp,
      fitness,
      fatigue,
      form: fitness - fatigue,
    }
  }

  /// Build the contiguous daily series from the first input date through
  /// `today + horizon_days`.
  ///
  /// Input dates may be unordered and may repeat; repeated dates are summed.
  /// If the last input date lies beyond the horizon the series runs through it.
  /// The horizon is clamped to `0..=MAX_HORIZON_DAYS`.
  pub fn build_series(
    &self,
    daily_trimp: &[(NaiveDate, f64)],
    horizon_days: i64,
    today: NaiveDate,
  ) -> Vec<DailyLoad> {
    let totals = bucket_by_day(daily_trimp.iter().copied());

    let (first, last) = match (totals.keys().next(), totals.keys().next_back()) {
      (Some(first), Some(last)) => (*first, *last),
      _ => return Vec::new(),
    };
    let horizon = Duration::days(horizon_days.clamp(0, MAX_HORIZON_DAYS));
    let end = today.checked_add_signed(horizon).unwrap_or(today).max(last);

    let mut series: Vec<DailyLoad> = Vec::with_capacity(((end - first).num_days() + 1) as usize);
    for date in first.iter_days().take_while(|d| *d <= end) {
      let trimp = totals.get(&date).copied().unwrap_or(0.0);
      let day = self.step(series.last(), date, trimp);
      series.push(day);
    }

    debug!(
      "Built load series {} -> {} ({} days)",
      first,
      end,
      series.len()
    );
    series
  }
}

/// Build the load series with the default 45/15 day model
pub fn build_load_series(
  daily_trimp: &[(NaiveDate, f64)],
  horizon_days: i64,
  today: NaiveDate,
) -> Vec<DailyLoad> {
  LoadModel::default().build_series(daily_trimp, horizon_days, today)
}

/// Sum values per calendar day
pub fn bucket_by_day<I>(values: I) -> BTreeMap<NaiveDate, f64>
where
  I: IntoIterator<Item = (NaiveDate, f64)>,
{
  let mut totals = BTreeMap::new();
  for (date, value) in values {
    *totals.entry(date).or_insert(0.0) += value;
  }
  totals
}

/// ---------------------------------------------------------------------------
/// Plain (date, value) Series for Reporting
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMetric {
  Trimp,
  Fitness,
  Fatigue,
  Form,
}

pub fn series_points(series: &[DailyLoad], metric: LoadMetric) -> Vec<(NaiveDate, f64)> {
  series
    .iter()
    .map(|day| {
      let value = match metric {
        LoadMetric::Trimp => day.trimp_total,
        LoadMetric::Fitness => day.fitness,
        LoadMetric::Fatigue => day.fatigue,
        LoadMetric::Form => day.form,
      };
      (day.date, value)
    })
    .collect()
}

/// Running total of distance in km, one point per activity in start order
pub fn cumulative_distance(activities: &[Activity]) -> Vec<(NaiveDate, f64)> {
  let mut sorted: Vec<&Activity> = activities.iter().collect();
  sorted.sort_by_key(|a| (a.start_date, a.id));

  let mut total_km = 0.0;
  sorted
    .into_iter()
    .map(|a| {
      total_km += a.distance_km();
      (a.day(), total_km)
    })
    .collect()
}

/// Straight-line distance target: `annual_km` spread evenly over the days of
/// `start`'s year, accumulated from `start` through `end` inclusive.
pub fn distance_target_series(
  start: NaiveDate,
  end: NaiveDate,
  annual_km: f64,
) -> Vec<(NaiveDate, f64)> {
  let km_per_day = annual_km / days_in_year(start.year()) as f64;

  start
    .iter_days()
    .take_while(|d| *d <= end)
    .enumerate()
    .map(|(i, date)| (date, km_per_day * (i + 1) as f64))
    .collect()
}

fn days_in_year(year: i32) -> i64 {
  match (NaiveDate::from_ymd_opt(year, 1, 1), NaiveDate::from_ymd_opt(year + 1, 1, 1)) {
    (Some(start), Some(next)) => (next - start).num_days(),
    _ => 365,
  }
}

/// ---------------------------------------------------------------------------
/// Load Pass over Stored Activities
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
  /// Lap or altitude payload missing or null in the store
  MissingDetailData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedActivity {
  pub activity_id: i64,
  pub reason: SkipReason,
}

/// TRIMP of one stored activity, keyed by the day it started
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLoad {
  pub date: NaiveDate,
  pub trimp: ActivityTrimp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReport {
  pub activities: Vec<ActivityLoad>,
  pub skipped: Vec<SkippedActivity>,
  pub series: Vec<DailyLoad>,
}

impl LoadReport {
  /// The day matching `date`, if it is inside the series
  pub fn day(&self, date: NaiveDate) -> Option<&DailyLoad> {
    self
      .series
      .binary_search_by_key(&date, |d| d.date)
      .ok()
      .map(|i| &self.series[i])
  }
}

/// Compute TRIMP for every stored activity and fold the daily totals into the
/// fitness/fatigue/form series.
///
/// Activities without detail data are skipped. They still anchor the start of
/// the series when they are the earliest recorded activity.
pub async fn compute_training_load<S>(
  store: &S,
  settings: &LoadSettings,
  today: NaiveDate,
) -> Result<LoadReport, StoreError>
where
  S: ActivityStore + ?Sized,
{
  let activities = store.all_activities().await?;
  let mut loads = Vec::with_capacity(activities.len());
  let mut skipped = Vec::new();
  let mut daily: Vec<(NaiveDate, f64)> = Vec::with_capacity(activities.len());

  for activity in &activities {
    daily.push((activity.day(), 0.0));

    let detail = match store.detail_for(activity.id).await? {
      Some(detail) => detail,
      None => {
        warn!(activity_id = activity.id, "Skipping activity: missing detail data");
        skipped.push(SkippedActivity {
          activity_id: activity.id,
          reason: SkipReason::MissingDetailData,
        });
        continue;
      }
    };

    let trimp = activity_trimp(activity.id, &detail, settings.fts_kmh);
    daily.push((activity.day(), trimp.total));
    loads.push(ActivityLoad {
      date: activity.day(),
      trimp,
    });
  }

  let model = LoadModel::new(settings.ctl_days, settings.atl_days);
  let series = model.build_series(&daily, settings.horizon_days, today);

  info!(
    "Training load: {} activities scored, {} skipped, {} days",
    loads.len(),
    skipped.len(),
    series.len()
  );

  Ok(LoadReport {
    activities: loads,
    skipped,
    series,
  })
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
