//! HTTP client for the track backend.
//!
//! Thin typed wrappers around the backend's track endpoints:
//! - Search and viewport queries return summaries and features
//! - Upload, rename and delete publish a [`TrackEvent`] so open sessions can
//!   update without refetching
//! - Export returns the file bytes together with the server-chosen filename
//!
//! Failures become [`TrackError::Http`]. Nothing is retried; the caller
//! decides whether to show an inline error or try again.

use std::time::Instant;

use log::{debug, info, warn};
use percent_encoding::percent_decode_str;
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};

use crate::config::HttpConfig;
use crate::error::{Result, TrackError};
use crate::events::{EventBus, TrackEvent};
use crate::{Bounds, TrackFeature};

/// One row of a search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSummary {
    #[serde(deserialize_with = "crate::string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub length_km: Option<f64>,
}

/// Backend response to an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    #[serde(deserialize_with = "crate::string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A downloaded track file.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Viewport queries come back either as a bare array or wrapped in a
/// feature collection.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeaturesResponse {
    Collection { features: Vec<TrackFeature> },
    List(Vec<TrackFeature>),
}

impl FeaturesResponse {
    fn into_features(self) -> Vec<TrackFeature> {
        match self {
            FeaturesResponse::Collection { features } | FeaturesResponse::List(features) => {
                features
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct DuplicateResponse {
    #[serde(alias = "duplicate", alias = "exists")]
    is_duplicate: bool,
}

#[derive(Serialize)]
struct RenameRequest<'a> {
    name: &'a str,
}

pub struct TrackApiClient {
    client: Client,
    base_url: Url,
    events: EventBus,
}

impl TrackApiClient {
    /// Create a client for `config.base_url`. Mutations are announced on
    /// `events`.
    pub fn new(config: &HttpConfig, events: EventBus) -> Result<Self> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/')).map_err(|e| {
            TrackError::Config {
                message: format!("invalid base URL '{}': {}", config.base_url, e),
            }
        })?;
        if base_url.cannot_be_a_base() {
            return Err(TrackError::Config {
                message: format!("base URL '{}' cannot carry a path", config.base_url),
            });
        }

        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            base_url,
            events,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// `tracks/{id}[/{action}]` with the id escaped as a single path segment.
    fn track_endpoint(&self, id: &str, action: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| TrackError::Config {
                message: format!("base URL '{}' cannot carry a path", self.base_url),
            })?;
            segments.pop_if_empty().push("tracks").push(id);
            if let Some(action) = action {
                segments.push(action);
            }
        }
        Ok(url)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn search(&self, query: &str) -> Result<Vec<TrackSummary>> {
        let resp = self
            .client
            .get(self.endpoint("tracks/search"))
            .query(&[("query", query)])
            .send()
            .await?;
        let results: Vec<TrackSummary> = check(resp).await?.json().await?;
        debug!("[TrackApi] Search '{}' -> {} results", query, results.len());
        Ok(results)
    }

    /// Tracks intersecting `bounds`.
    pub async fn tracks_in_bounds(&self, bounds: &Bounds) -> Result<Vec<TrackFeature>> {
        let start = Instant::now();
        let resp = self
            .client
            .get(self.endpoint("tracks"))
            .query(&bounds_query(bounds))
            .send()
            .await?;
        let features = check(resp)
            .await?
            .json::<FeaturesResponse>()
            .await?
            .into_features();
        info!(
            "[TrackApi] Loaded {} tracks in {:.0}ms",
            features.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(features)
    }

    /// Whether the backend already has a file with this name and size.
    pub async fn check_duplicate(&self, filename: &str, size: u64) -> Result<bool> {
        let size = size.to_string();
        let resp = self
            .client
            .get(self.endpoint("tracks/check-duplicate"))
            .query(&[("filename", filename), ("size", size.as_str())])
            .send()
            .await?;
        let body: DuplicateResponse = check(resp).await?.json().await?;
        Ok(body.is_duplicate)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<UploadResult> {
        let size = bytes.len();
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(self.endpoint("tracks/upload"))
            .multipart(form)
            .send()
            .await?;
        let result: UploadResult = check(resp).await?.json().await?;

        info!(
            "[TrackApi] Uploaded '{}' ({} bytes) as track {}",
            filename, size, result.id
        );
        self.events.publish(&TrackEvent::Uploaded {
            id: result.id.clone(),
        });
        Ok(result)
    }

    pub async fn export(&self, id: &str) -> Result<ExportedFile> {
        let resp = self
            .client
            .get(self.track_endpoint(id, Some("export"))?)
            .send()
            .await?;
        let resp = check(resp).await?;

        let headers = resp.headers();
        let filename = headers
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_content_disposition)
            .unwrap_or_else(|| format!("track-{}.gpx", id));
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let bytes = resp.bytes().await?.to_vec();
        debug!("[TrackApi] Exported track {} as '{}'", id, filename);
        Ok(ExportedFile {
            filename,
            content_type,
            bytes,
        })
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TrackError::Config {
                message: "track name must not be empty".to_string(),
            });
        }

        let resp = self
            .client
            .patch(self.track_endpoint(id, Some("name"))?)
            .json(&RenameRequest { name })
            .send()
            .await?;
        check(resp).await?;

        self.events.publish(&TrackEvent::Renamed {
            id: id.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.track_endpoint(id, None)?)
            .send()
            .await?;
        check(resp).await?;

        info!("[TrackApi] Deleted track {}", id);
        self.events.publish(&TrackEvent::Deleted { id: id.to_string() });
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn bounds_query(bounds: &Bounds) -> [(&'static str, String); 4] {
    [
        ("min_lat", bounds.min_lat.to_string()),
        ("max_lat", bounds.max_lat.to_string()),
        ("min_lng", bounds.min_lng.to_string()),
        ("max_lng", bounds.max_lng.to_string()),
    ]
}

/// Turn a non-2xx response into an error carrying the backend's message.
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = error_message(&body)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    warn!("[TrackApi] {} {}", status.as_u16(), message);
    Err(TrackError::Http {
        message,
        status_code: Some(status.as_u16()),
    })
}

/// Extract `detail` / `message` / `error` from a JSON error body.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["detail", "message", "error"]
        .iter()
        .find_map(|k| value.get(*k).and_then(|v| v.as_str()))
        .map(str::to_string)
}

/// Filename from a `Content-Disposition` header.
///
/// Prefers the RFC 5987 `filename*=` form over plain `filename=`.
pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for param in header.split(';').map(str::trim) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                // charset'lang'percent-encoded
                if let Some(encoded) = value.trim().splitn(3, '\'').nth(2) {
                    extended = percent_decode_str(encoded)
                        .decode_utf8()
                        .ok()
                        .map(|name| name.into_owned());
                }
            }
            "filename" => {
                plain = Some(value.trim().trim_matches('"').to_string());
            }
            _ => {}
        }
    }

    extended.or(plain).filter(|name| !name.is_empty())
}
