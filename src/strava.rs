use crate::config::{RetryPolicy, StravaConfig};
use crate::models::{Activity, AltitudeStream, Lap};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};
use url::Url;

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StravaError {
  #[error("HTTP request failed: {0}")]
  Request(#[from] reqwest::Error),

  #[error("Strava API returned {status}: {body}")]
  Api { status: u16, body: String },

  #[error("Not found on Strava: {0}")]
  NotFound(String),

  #[error("Invalid URL: {0}")]
  Url(#[from] url::ParseError),

  #[error("Failed to parse Strava response: {0}")]
  Parse(String),

  #[error("OAuth error: {0}")]
  OAuth(String),

  #[error("Database error: {0}")]
  Database(String),

  #[error("Not authenticated with Strava")]
  NotAuthenticated,
}

/// ---------------------------------------------------------------------------
/// OAuth Data Structures
/// ---------------------------------------------------------------------------

/// Response from Strava token endpoint
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
  pub access_token: String,
  pub refresh_token: String,
  pub expires_at: i64,
}

/// Stored token state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StravaTokens {
  pub access_token: String,
  pub refresh_token: String,
  pub expires_at: DateTime<Utc>,
}

impl StravaTokens {
  pub fn from_response(resp: TokenResponse) -> Self {
    Self {
      access_token: resp.access_token,
      refresh_token: resp.refresh_token,
      expires_at: DateTime::from_timestamp(resp.expires_at, 0).unwrap_or_else(Utc::now),
    }
  }

  /// A token is valid while its expiry instant is in the future
  pub fn is_valid(&self) -> bool {
    Utc::now() < self.expires_at
  }
}

/// Exchange a refresh token for a new token pair. Not retried.
pub async fn refresh_tokens(
  http: &Client,
  config: &StravaConfig,
  refresh_token: &str,
) -> Result<StravaTokens, StravaError> {
  let response = http
    .post(&config.token_url)
    .form(&[
      ("client_id", config.client_id.as_str()),
      ("client_secret", config.client_secret.as_str()),
      ("refresh_token", refresh_token),
      ("grant_type", "refresh_token"),
    ])
    .send()
    .await?;

  if !response.status().is_success() {
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    return Err(StravaError::OAuth(format!(
      "Token refresh failed ({}): {}",
      status, error_text
    )));
  }

  let token_response: TokenResponse = response.json().await?;
  Ok(StravaTokens::from_response(token_response))
}

/// ---------------------------------------------------------------------------
/// Raw API Records
/// ---------------------------------------------------------------------------

/// Activity summary as listed by `/athlete/activities`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StravaActivity {
  pub id: i64,
  /// Legacy activity type ("Run", "Ride", ...)
  #[serde(rename = "type", default)]
  pub activity_type: String,
  pub start_date_local: DateTime<Utc>,
  #[serde(default)]
  pub distance: f64,
  #[serde(default)]
  pub elapsed_time: i64,
  #[serde(default)]
  pub total_elevation_gain: f64,
  #[serde(default)]
  pub moving_time: i64,
}

impl StravaActivity {
  pub fn is_type(&self, types: &[String]) -> bool {
    types.iter().any(|t| t == &self.activity_type)
  }
}

impl TryFrom<StravaActivity> for Activity {
  type Error = String;

  fn try_from(raw: StravaActivity) -> Result<Self, Self::Error> {
    if !(raw.distance >= 0.0) {
      return Err(format!("activity {} has distance {}", raw.id, raw.distance));
    }
    if raw.elapsed_time < 0 {
      return Err(format!("activity {} has elapsed time {}", raw.id, raw.elapsed_time));
    }
    if raw.moving_time <= 0 {
      return Err(format!("activity {} has moving time {}", raw.id, raw.moving_time));
    }

    Ok(Activity {
      id: raw.id,
      start_date: raw.start_date_local,
      distance_m: raw.distance,
      elapsed_time_s: raw.elapsed_time,
      moving_time_s: raw.moving_time,
      total_elevation_gain_m: raw.total_elevation_gain,
    })
  }
}

/// Lap as embedded in a detailed activity
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StravaLap {
  pub start_index: usize,
  pub end_index: usize,
  #[serde(default)]
  pub distance: f64,
  #[serde(default)]
  pub moving_time: i64,
  #[serde(default)]
  pub total_elevation_gain: f64,
}

/// Detailed activity from `/activities/{id}`; only the laps are kept
#[derive(Debug, Clone, Deserialize)]
pub struct StravaActivityDetail {
  pub id: i64,
  #[serde(default)]
  pub laps: Vec<StravaLap>,
}

impl StravaActivityDetail {
  pub fn to_laps(&self) -> Vec<Lap> {
    self
      .laps
      .iter()
      .map(|lap| Lap {
        activity_id: self.id,
        start_index: lap.start_index,
        end_index: lap.end_index,
        distance_m: lap.distance,
        moving_time_s: lap.moving_time,
        total_elevation_gain_m: lap.total_elevation_gain,
      })
      .collect()
  }
}

/// Stream format when key_by_type=true (object format)
#[derive(Debug, Clone, Deserialize)]
pub struct StravaStreamKeyed {
  pub data: Vec<serde_json::Value>,
}

/// Pull the altitude channel out of a keyed streams response.
///
/// Samples must stay aligned with lap indices, so a channel with any
/// non-numeric sample is treated as missing.
pub fn altitude_from_streams(streams: &HashMap<String, StravaStreamKeyed>) -> AltitudeStream {
  let stream = match streams.get("altitude") {
    Some(stream) => stream,
    None => return AltitudeStream::missing(),
  };

  match stream.data.iter().map(|v| v.as_f64()).collect::<Option<Vec<f64>>>() {
    Some(samples) => AltitudeStream::new(samples),
    None => {
      warn!(
        "Altitude stream has non-numeric samples, storing it as missing ({} samples)",
        stream.data.len()
      );
      AltitudeStream::missing()
    }
  }
}

/// ---------------------------------------------------------------------------
/// Remote API
/// ---------------------------------------------------------------------------

/// The remote calls the sync pipeline needs
#[async_trait]
pub trait RemoteActivityApi: Send + Sync {
  async fn list_activities(
    &self,
    access_token: &str,
    after: i64,
    page: u32,
    per_page: u32,
  ) -> Result<Vec<StravaActivity>, StravaError>;

  async fn get_activity_detail(
    &self,
    access_token: &str,
    activity_id: i64,
  ) -> Result<StravaActivityDetail, StravaError>;

  async fn get_altitude_stream(
    &self,
    access_token: &str,
    activity_id: i64,
  ) -> Result<AltitudeStream, StravaError>;
}

/// Strava v3 REST client with timeouts and bounded retry on transient failures
#[derive(Clone)]
pub struct StravaClient {
  http: Client,
  config: StravaConfig,
}

impl StravaClient {
  pub fn new(config: StravaConfig) -> Result<Self, StravaError> {
    let http = ClientBuilder::new()
      .timeout(StdDuration::from_secs(config.timeout_secs))
      .connect_timeout(StdDuration::from_secs(config.connect_timeout_secs))
      .build()?;

    Ok(Self { http, config })
  }

  pub fn http(&self) -> &Client {
    &self.http
  }

  pub fn config(&self) -> &StravaConfig {
    &self.config
  }

  fn endpoint(&self, path: &str) -> Result<Url, StravaError> {
    Ok(Url::parse(&format!(
      "{}/{}",
      self.config.api_base.trim_end_matches('/'),
      path
    ))?)
  }

  /// GET a JSON resource, retrying 429/5xx and transport failures
  async fn get_json<T: DeserializeOwned>(&self, url: Url, access_token: &str) -> Result<T, StravaError> {
    let policy: RetryPolicy = self.config.retry;
    let mut attempt = 0;

    loop {
      attempt += 1;
      debug!("GET {} (attempt {}/{})", url, attempt, policy.max_attempts);

      let result = self
        .http
        .get(url.clone())
        .header("Authorization", format!("Bearer {}", access_token))
        .send()
        .await;

      let response = match result {
        Ok(response) => response,
        Err(e) if is_transient_error(&e) && attempt < policy.max_attempts => {
          let backoff_ms = policy.backoff_ms(attempt);
          warn!("Strava request failed ({}), retry {} after {}ms", e, attempt, backoff_ms);
          tokio::time::sleep(StdDuration::from_millis(backoff_ms)).await;
          continue;
        }
        Err(e) => return Err(StravaError::Request(e)),
      };

      let status = response.status();

      if is_transient_status(status) && attempt < policy.max_attempts {
        let backoff_ms = policy.backoff_ms(attempt);
        warn!(
          "Strava returned {} - retry {}/{} after {}ms backoff",
          status,
          attempt,
          policy.max_attempts - 1,
          backoff_ms
        );
        tokio::time::sleep(StdDuration::from_millis(backoff_ms)).await;
        continue;
      }

      if status == StatusCode::UNAUTHORIZED {
        return Err(StravaError::NotAuthenticated);
      }

      if status == StatusCode::NOT_FOUND {
        return Err(StravaError::NotFound(url.path().to_string()));
      }

      if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StravaError::Api {
          status: status.as_u16(),
          body,
        });
      }

      let response_text = response.text().await?;
      return serde_json::from_str(&response_text).map_err(|e| {
        let preview: String = response_text.chars().take(500).collect();
        warn!("Failed to parse Strava response: {} (first 500 chars: {})", e, preview);
        StravaError::Parse(e.to_string())
      });
    }
  }
}

fn is_transient_status(status: StatusCode) -> bool {
  status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_transient_error(e: &reqwest::Error) -> bool {
  e.is_timeout() || e.is_connect()
}

#[async_trait]
impl RemoteActivityApi for StravaClient {
  async fn list_activities(
    &self,
    access_token: &str,
    after: i64,
    page: u32,
    per_page: u32,
  ) -> Result<Vec<StravaActivity>, StravaError> {
    let mut url = self.endpoint("athlete/activities")?;
    url
      .query_pairs_mut()
      .append_pair("after", &after.to_string())
      .append_pair("page", &page.to_string())
      .append_pair("per_page", &per_page.to_string());

    let activities: Vec<StravaActivity> = self.get_json(url, access_token).await?;
    info!("Fetched page {} with {} activities", page, activities.len());
    Ok(activities)
  }

  async fn get_activity_detail(
    &self,
    access_token: &str,
    activity_id: i64,
  ) -> Result<StravaActivityDetail, StravaError> {
    let mut url = self.endpoint(&format!("activities/{}", activity_id))?;
    url.query_pairs_mut().append_pair("include_all_efforts", "true");

    self.get_json(url, access_token).await
  }

  async fn get_altitude_stream(
    &self,
    access_token: &str,
    activity_id: i64,
  ) -> Result<AltitudeStream, StravaError> {
    let mut url = self.endpoint(&format!("activities/{}/streams", activity_id))?;
    url
      .query_pairs_mut()
      .append_pair("keys", "altitude")
      .append_pair("key_by_type", "true");

    // 404 means no streams for this activity (manual entry etc.)
    match self
      .get_json::<HashMap<String, StravaStreamKeyed>>(url, access_token)
      .await
    {
      Ok(streams) => Ok(altitude_from_streams(&streams)),
      Err(StravaError::NotFound(_)) => Ok(AltitudeStream::missing()),
      Err(e) => Err(e),
    }
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_utils::mock_strava_config;
  use mockito::Matcher;

  fn client_for(server: &mockito::ServerGuard) -> StravaClient {
    StravaClient::new(mock_strava_config(&server.url())).unwrap()
  }

  #[tokio::test]
  async fn test_list_activities_sends_paging_params() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/athlete/activities")
      .match_query(Matcher::AllOf(vec![
        Matcher::UrlEncoded("after".into(), "1577782931".into()),
        Matcher::UrlEncoded("page".into(), "2".into()),
        Matcher::UrlEncoded("per_page".into(), "50".into()),
      ]))
      .match_header("authorization", "Bearer abc")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(
        r#"[{"id": 11, "type": "Run", "start_date_local": "2024-01-01T07:30:00Z",
            "distance": 10000.0, "elapsed_time": 3100, "total_elevation_gain": 55.0,
            "moving_time": 3000, "name": "Morning Run"}]"#,
      )
      .create_async()
      .await;

    let client = client_for(&server);
    let activities = client.list_activities("abc", 1577782931, 2, 50).await.unwrap();

    mock.assert_async().await;
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].id, 11);
    assert_eq!(activities[0].activity_type, "Run");
    assert_eq!(activities[0].moving_time, 3000);
  }

  #[tokio::test]
  async fn test_server_error_is_retried_then_reported() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/athlete/activities")
      .match_query(Matcher::Any)
      .with_status(503)
      .with_body("unavailable")
      .expect(3)
      .create_async()
      .await;

    let client = client_for(&server);
    let err = client.list_activities("abc", 0, 1, 50).await.unwrap_err();

    mock.assert_async().await;
    assert!(matches!(err, StravaError::Api { status: 503, .. }));
  }

  #[tokio::test]
  async fn test_client_error_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/athlete/activities")
      .match_query(Matcher::Any)
      .with_status(400)
      .with_body("bad request")
      .expect(1)
      .create_async()
      .await;

    let client = client_for(&server);
    let err = client.list_activities("abc", 0, 1, 50).await.unwrap_err();

    mock.assert_async().await;
    assert!(matches!(err, StravaError::Api { status: 400, ref body } if body == "bad request"));
  }

  #[tokio::test]
  async fn test_unauthorized() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/activities/5")
      .match_query(Matcher::Any)
      .with_status(401)
      .create_async()
      .await;

    let client = client_for(&server);
    let err = client.get_activity_detail("abc", 5).await.unwrap_err();
    assert!(matches!(err, StravaError::NotAuthenticated));
  }

  #[tokio::test]
  async fn test_activity_detail_laps() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/activities/42")
      .match_query(Matcher::UrlEncoded("include_all_efforts".into(), "true".into()))
      .with_status(200)
      .with_body(
        r#"{"id": 42, "name": "Hills", "laps": [
            {"id": 1, "lap_index": 1, "start_index": 0, "end_index": 120,
             "distance": 1000.0, "moving_time": 300, "elapsed_time": 310,
             "total_elevation_gain": 12.0},
            {"id": 2, "lap_index": 2, "start_index": 121, "end_index": 250,
             "distance": 1000.0, "moving_time": 290, "elapsed_time": 290}
          ]}"#,
      )
      .create_async()
      .await;

    let client = client_for(&server);
    let detail = client.get_activity_detail("abc", 42).await.unwrap();
    let laps = detail.to_laps();

    assert_eq!(laps.len(), 2);
    assert_eq!(laps[0].activity_id, 42);
    assert_eq!(laps[0].end_index, 120);
    assert_eq!(laps[0].total_elevation_gain_m, 12.0);
    assert_eq!(laps[1].start_index, 121);
    assert_eq!(laps[1].total_elevation_gain_m, 0.0);
  }

  #[tokio::test]
  async fn test_altitude_stream() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/activities/42/streams")
      .match_query(Matcher::AllOf(vec![
        Matcher::UrlEncoded("keys".into(), "altitude".into()),
        Matcher::UrlEncoded("key_by_type".into(), "true".into()),
      ]))
      .with_status(200)
      .with_body(
        r#"{"altitude": {"data": [10.0, 10.4, 11.2], "series_type": "distance",
            "original_size": 3, "resolution": "high"},
            "distance": {"data": [0.0, 5.0, 10.0], "series_type": "distance",
            "original_size": 3, "resolution": "high"}}"#,
      )
      .create_async()
      .await;

    let client = client_for(&server);
    let stream = client.get_altitude_stream("abc", 42).await.unwrap();
    assert_eq!(stream, AltitudeStream::new(vec![10.0, 10.4, 11.2]));
  }

  #[test]
  fn test_altitude_with_null_sample_is_missing() {
    let streams: HashMap<String, StravaStreamKeyed> =
      serde_json::from_str(r#"{"altitude": {"data": [10.0, null, 30.0, 40.0]}}"#).unwrap();

    // Dropping the null would shift later samples off their lap indices
    assert_eq!(altitude_from_streams(&streams), AltitudeStream::missing());

    let streams: HashMap<String, StravaStreamKeyed> =
      serde_json::from_str(r#"{"altitude": {"data": [10.0, 20, 30.5]}}"#).unwrap();
    assert_eq!(
      altitude_from_streams(&streams),
      AltitudeStream::new(vec![10.0, 20.0, 30.5])
    );
  }

  #[tokio::test]
  async fn test_unparseable_body_with_multibyte_text_is_parse_error() {
    let mut server = mockito::Server::new_async().await;
    // 'é' straddles byte 500; start_date_local is missing
    let body = format!(r#"[{{"id": 1, "name": "{}é"}}]"#, "a".repeat(479));
    assert!(!body.is_char_boundary(500));
    server
      .mock("GET", "/athlete/activities")
      .match_query(Matcher::Any)
      .with_status(200)
      .with_body(body)
      .create_async()
      .await;

    let client = client_for(&server);
    let err = client.list_activities("abc", 0, 1, 50).await.unwrap_err();
    assert!(matches!(err, StravaError::Parse(_)));
  }

  #[tokio::test]
  async fn test_altitude_stream_not_found_is_missing_channel() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("GET", "/activities/9/streams")
      .match_query(Matcher::Any)
      .with_status(404)
      .create_async()
      .await;

    let client = client_for(&server);
    let stream = client.get_altitude_stream("abc", 9).await.unwrap();
    assert_eq!(stream.altitude, None);
  }

  #[tokio::test]
  async fn test_refresh_tokens() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/oauth/token")
      .match_body(Matcher::AllOf(vec![
        Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
        Matcher::UrlEncoded("refresh_token".into(), "old-refresh".into()),
      ]))
      .with_status(200)
      .with_body(
        r#"{"token_type": "Bearer", "access_token": "new-access",
            "refresh_token": "new-refresh", "expires_at": 4102444800, "expires_in": 21600}"#,
      )
      .create_async()
      .await;

    let client = client_for(&server);
    let tokens = refresh_tokens(client.http(), client.config(), "old-refresh")
      .await
      .unwrap();

    mock.assert_async().await;
    assert_eq!(tokens.access_token, "new-access");
    assert_eq!(tokens.refresh_token, "new-refresh");
    assert_eq!(tokens.expires_at.timestamp(), 4102444800);
    assert!(tokens.is_valid());
  }

  #[tokio::test]
  async fn test_refresh_failure_is_oauth_error() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/oauth/token")
      .with_status(400)
      .with_body(r#"{"message": "Bad Request"}"#)
      .expect(1)
      .create_async()
      .await;

    let client = client_for(&server);
    let err = refresh_tokens(client.http(), client.config(), "old")
      .await
      .unwrap_err();

    mock.assert_async().await;
    assert!(matches!(err, StravaError::OAuth(_)));
  }

  #[test]
  fn test_activity_conversion_validates_record() {
    let raw: StravaActivity = serde_json::from_str(
      r#"{"id": 1, "type": "Run", "start_date_local": "2024-01-01T07:30:00Z",
          "distance": 5000.0, "elapsed_time": 1600, "moving_time": 1500}"#,
    )
    .unwrap();
    let activity = Activity::try_from(raw.clone()).unwrap();
    assert_eq!(activity.distance_m, 5000.0);
    assert_eq!(activity.total_elevation_gain_m, 0.0);

    let mut manual = raw;
    manual.moving_time = 0;
    assert!(Activity::try_from(manual).is_err());
  }

  #[test]
  fn test_is_type() {
    let raw: StravaActivity = serde_json::from_str(
      r#"{"id": 1, "type": "Ride", "start_date_local": "2024-01-01T07:30:00Z"}"#,
    )
    .unwrap();
    assert!(!raw.is_type(&["Run".to_string()]));
    assert!(raw.is_type(&["Run".to_string(), "Ride".to_string()]));
  }

  #[test]
  fn test_token_validity() {
    let expired = StravaTokens {
      access_token: "a".into(),
      refresh_token: "r".into(),
      expires_at: Utc::now() - chrono::Duration::minutes(1),
    };
    assert!(!expired.is_valid());
  }
}
