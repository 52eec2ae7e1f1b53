//! Incremental Strava synchronization
//!
//! Two phases, each safe to re-run:
//!
//! 1. Summary sync pages through the athlete's activities after the configured
//!    cutoff and upserts the running ones.
//! 2. Detail backfill fetches laps and the altitude stream for every stored
//!    activity that does not have them yet.
//!
//! Remote calls are awaited one at a time; nothing is fetched concurrently.

use crate::config::SyncSettings;
use crate::db::{ActivityStore, StoreError};
use crate::models::Activity;
use crate::strava::{RemoteActivityApi, StravaError};
use crate::token::TokenProvider;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  #[error("Strava request failed: {0}")]
  Remote(#[from] StravaError),

  #[error("Store error: {0}")]
  Store(#[from] StoreError),

  #[error("Token refresh failed: {0}")]
  TokenRefresh(#[source] StravaError),

  #[error("Stopped after {pages} pages with data still coming ({new_activities} new activities kept)")]
  TooManyPages { pages: u32, new_activities: usize },
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SummarySyncReport {
  pub pages_fetched: u32,
  pub total_fetched: usize,
  pub runs_seen: usize,
  pub new_activities: usize,
  pub rejected: usize,
  /// Paging stopped at `max_pages` with more data still listed
  pub capped: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
  pub checked: usize,
  pub fetched: usize,
  pub already_detailed: usize,
  /// Activities the remote no longer knows about
  pub not_found: Vec<i64>,
}

pub struct SyncOrchestrator<'a> {
  api: &'a dyn RemoteActivityApi,
  tokens: &'a dyn TokenProvider,
  store: &'a dyn ActivityStore,
  settings: &'a SyncSettings,
}

impl<'a> SyncOrchestrator<'a> {
  pub fn new(
    api: &'a dyn RemoteActivityApi,
    tokens: &'a dyn TokenProvider,
    store: &'a dyn ActivityStore,
    settings: &'a SyncSettings,
  ) -> Self {
    Self {
      api,
      tokens,
      store,
      settings,
    }
  }

  /// A usable access token, refreshed first if it has expired
  async fn access_token(&self) -> Result<String, SyncError> {
    let (token, valid) = self.tokens.get_token().await?;
    if valid {
      return Ok(token.access_token);
    }

    info!("Strava token expired, refreshing");
    let refreshed = self
      .tokens
      .refresh(&token)
      .await
      .map_err(SyncError::TokenRefresh)?;
    Ok(refreshed.access_token)
  }

  /// Page through activity summaries and upsert the running ones.
  ///
  /// Stops on the first empty page. After `max_pages` non-empty pages it stops
  /// with `TooManyPages`; everything upserted so far stays in the store.
  pub async fn sync_summaries(&self) -> Result<SummarySyncReport, SyncError> {
    let report = self.page_summaries().await?;
    if report.capped {
      return Err(SyncError::TooManyPages {
        pages: report.pages_fetched,
        new_activities: report.new_activities,
      });
    }
    Ok(report)
  }

  /// Paging loop shared by `sync_summaries` and `run`; hitting the page cap
  /// is recorded on the report instead of failing.
  async fn page_summaries(&self) -> Result<SummarySyncReport, SyncError> {
    let mut report = SummarySyncReport::default();
    let mut page = 1;

    loop {
      if page > self.settings.max_pages {
        warn!(
          "More than {} pages of activities, stopping summary sync",
          self.settings.max_pages
        );
        report.capped = true;
        return Ok(report);
      }

      let access_token = self.access_token().await?;
      let raw = self
        .api
        .list_activities(&access_token, self.settings.after, page, self.settings.per_page)
        .await?;
      report.pages_fetched += 1;

      if raw.is_empty() {
        break;
      }
      report.total_fetched += raw.len();

      let mut rows: Vec<Activity> = Vec::with_capacity(raw.len());
      for item in raw
        .into_iter()
        .filter(|a| a.is_type(&self.settings.activity_types))
      {
        report.runs_seen += 1;
        match Activity::try_from(item) {
          Ok(activity) => rows.push(activity),
          Err(reason) => {
            warn!("Ignoring activity summary: {}", reason);
            report.rejected += 1;
          }
        }
      }

      report.new_activities += self.store.upsert_activity_summaries(&rows).await?;
      page += 1;
    }

    info!(
      "Summary sync complete: {} new activities ({} runs in {} fetched, {} pages)",
      report.new_activities, report.runs_seen, report.total_fetched, report.pages_fetched
    );
    Ok(report)
  }

  /// Fetch laps and altitude for every stored activity lacking them.
  ///
  /// Activities that already have detail are never fetched again. Activities
  /// deleted on the remote (404) are logged and left without detail.
  pub async fn backfill_details(&self) -> Result<BackfillReport, SyncError> {
    let mut report = BackfillReport::default();

    for activity in self.store.all_activities().await? {
      report.checked += 1;

      if self.store.has_detail(activity.id).await? {
        report.already_detailed += 1;
        continue;
      }

      let access_token = self.access_token().await?;
      let detail = match self.api.get_activity_detail(&access_token, activity.id).await {
        Ok(detail) => detail,
        Err(StravaError::NotFound(_)) => {
          warn!(activity_id = activity.id, "Activity not found on Strava, skipping detail");
          report.not_found.push(activity.id);
          continue;
        }
        Err(e) => return Err(e.into()),
      };
      let altitude = self.api.get_altitude_stream(&access_token, activity.id).await?;
      let laps = detail.to_laps();

      self.store.save_detail(activity.id, &altitude, &laps).await?;
      report.fetched += 1;
      info!(
        activity_id = activity.id,
        "Stored {} laps and {} altitude samples",
        laps.len(),
        altitude.len()
      );
    }

    info!(
      "Detail backfill complete: {} fetched, {} already stored",
      report.fetched, report.already_detailed
    );
    Ok(report)
  }

  /// Summary sync followed by detail backfill.
  ///
  /// A capped summary sync still backfills what it stored; the cap is
  /// reported through `SummarySyncReport::capped`.
  pub async fn run(&self) -> Result<(SummarySyncReport, BackfillReport), SyncError> {
    let summaries = self.page_summaries().await?;
    let details = self.backfill_details().await?;
    Ok((summaries, details))
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
