//! HTTP adapters for Mapbox Directions and the Strava API.
//!
//! Both clients share the same setup: a pooled reqwest client with a 30 s
//! request timeout and a ready-to-use access token. Token acquisition and
//! refresh happen elsewhere.
//!
//! Strava list requests retry on 429 with exponential backoff. Uploads are
//! not retried: a repeated POST could create a duplicate activity.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::error::{Result, SyncError};
use crate::providers::{ActivityListProvider, DirectionsProvider, RemoteActivity, UploadProvider, UploadRequest};
use crate::GpsPoint;

pub const MAPBOX_BASE_URL: &str = "https://api.mapbox.com/directions/v5/mapbox";
pub const STRAVA_BASE_URL: &str = "https://www.strava.com/api/v3";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
/// Longest error body kept in an error message
const MAX_ERROR_BODY: usize = 300;

fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| SyncError::Http {
            message: format!("Failed to create HTTP client: {}", e),
            status_code: None,
        })
}

fn request_error(e: reqwest::Error) -> SyncError {
    SyncError::Http {
        message: format!("Request error: {}", e),
        status_code: e.status().map(|s| s.as_u16()),
    }
}

/// Turn a non-2xx response into an [`SyncError::Http`] carrying its status.
async fn error_for_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let mut body = resp.text().await.unwrap_or_default();
    body.truncate(floor_char_boundary(&body, MAX_ERROR_BODY));
    Err(SyncError::Http {
        message: format!("HTTP {}: {}", status, body),
        status_code: Some(status.as_u16()),
    })
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

/// Send a request, retrying on 429 and transport errors.
async fn send_with_retry<F>(build: F, label: &str) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut retries = 0;
    loop {
        match build().send().await {
            Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(SyncError::Http {
                        message: "Max retries exceeded (429)".to_string(),
                        status_code: Some(429),
                    });
                }
                // 1s, 2s, 4s
                let backoff = Duration::from_millis(1000 * (1 << (retries - 1)));
                warn!("[Http] 429 for {}, retry {} after {:?}", label, retries, backoff);
                tokio::time::sleep(backoff).await;
            }
            Ok(resp) => return Ok(resp),
            Err(e) => {
                retries += 1;
                if retries > MAX_RETRIES {
                    return Err(request_error(e));
                }
                let backoff = Duration::from_millis(500 * (1 << retries));
                warn!("[Http] Error for {}: {}, retry {} after {:?}", label, e, retries, backoff);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

// ============================================================================
// Mapbox Directions
// ============================================================================

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
}

#[derive(Debug, Deserialize)]
struct DirectionsRoute {
    geometry: RouteGeometry,
}

#[derive(Debug, Deserialize)]
struct RouteGeometry {
    coordinates: Vec<[f64; 2]>,
}

impl DirectionsResponse {
    /// Geometry of the first route as `[lon, lat]` pairs.
    fn into_coordinates(self) -> Result<Vec<[f64; 2]>> {
        if self.code != "Ok" {
            let detail = self.message.map(|m| format!(" ({})", m)).unwrap_or_default();
            return Err(SyncError::route(format!("Mapbox API error: {}{}", self.code, detail)));
        }
        self.routes
            .into_iter()
            .next()
            .map(|route| route.geometry.coordinates)
            .ok_or_else(|| SyncError::route("Mapbox returned no routes"))
    }
}

/// Walking directions from the Mapbox Directions API.
pub struct MapboxDirections {
    client: Client,
    token: String,
    base_url: String,
}

impl MapboxDirections {
    pub fn new(access_token: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            token: access_token.to_string(),
            base_url: MAPBOX_BASE_URL.to_string(),
        })
    }

    /// Point the client at another host (proxies, test servers).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn route_path(&self, start: GpsPoint, end: GpsPoint) -> String {
        format!(
            "{}/walking/{},{};{},{}",
            self.base_url, start.longitude, start.latitude, end.longitude, end.latitude
        )
    }
}

#[async_trait]
impl DirectionsProvider for MapboxDirections {
    async fn route(&self, start: GpsPoint, end: GpsPoint) -> Result<Vec<[f64; 2]>> {
        let path = self.route_path(start, end);
        debug!("[Mapbox] GET {}", path);

        let resp = self
            .client
            .get(&path)
            .query(&[("geometries", "geojson"), ("access_token", self.token.as_str())])
            .send()
            .await
            .map_err(request_error)?;

        let status = resp.status();
        // error responses still carry a JSON `code`
        let body: DirectionsResponse = match resp.json().await {
            Ok(body) => body,
            Err(e) => {
                return Err(SyncError::Http {
                    message: format!("Parse error: {}", e),
                    status_code: Some(status.as_u16()),
                })
            }
        };

        let coordinates = body.into_coordinates()?;
        debug!("[Mapbox] Route with {} points", coordinates.len());
        Ok(coordinates)
    }
}

// ============================================================================
// Strava
// ============================================================================

/// Response of `POST /uploads`.
#[derive(Debug, Deserialize)]
struct UploadStatus {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Strava upload and activity-list client.
pub struct StravaClient {
    client: Client,
    auth_header: String,
    base_url: String,
}

impl StravaClient {
    pub fn new(access_token: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            auth_header: format!("Bearer {}", access_token),
            base_url: STRAVA_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl UploadProvider for StravaClient {
    async fn upload(&self, gpx: Vec<u8>, request: &UploadRequest) -> Result<()> {
        let file = Part::bytes(gpx)
            .file_name(format!("{}.gpx", request.external_id))
            .mime_str("application/gpx+xml")
            .map_err(request_error)?;
        let form = Form::new()
            .part("file", file)
            .text("data_type", "gpx")
            .text("activity_type", request.activity_type.clone())
            .text("name", request.name.clone())
            .text("external_id", request.external_id.clone());

        let resp = self
            .client
            .post(format!("{}/uploads", self.base_url))
            .header("Authorization", &self.auth_header)
            .multipart(form)
            .send()
            .await
            .map_err(request_error)?;

        let status = resp.status();
        let resp = error_for_status(resp).await?;
        let upload: UploadStatus = resp.json().await.map_err(request_error)?;

        if let Some(error) = upload.error {
            return Err(SyncError::Http {
                message: format!("Upload rejected: {}", error),
                status_code: Some(status.as_u16()),
            });
        }

        info!(
            "[Strava] Upload {} accepted for '{}': {}",
            upload.id.map(|id| id.to_string()).unwrap_or_else(|| "?".to_string()),
            request.external_id,
            upload.status.as_deref().unwrap_or("queued")
        );
        Ok(())
    }
}

#[async_trait]
impl ActivityListProvider for StravaClient {
    async fn list_activities(&self, page: u32, per_page: u32) -> Result<Vec<RemoteActivity>> {
        let url = format!("{}/athlete/activities", self.base_url);
        let resp = send_with_retry(
            || {
                self.client
                    .get(&url)
                    .header("Authorization", &self.auth_header)
                    .query(&[("page", page), ("per_page", per_page)])
            },
            "athlete/activities",
        )
        .await?;

        let activities: Vec<RemoteActivity> = error_for_status(resp).await?.json().await.map_err(request_error)?;
        debug!("[Strava] Page {}: {} activities", page, activities.len());
        Ok(activities)
    }
}
