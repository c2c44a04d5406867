use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Number of image slots in the carousel template.
pub const IMAGE_SLOTS: usize = 3;

/// One listing to turn into copy, screenshots and a video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingJob {
    pub id: String,
    pub product_name: String,
    pub product_description: String,
    pub image_links: Vec<String>,
}

impl ListingJob {
    pub fn from_message(message: QueueMessage) -> Self {
        Self {
            id: message.product_id,
            product_name: message.product_name,
            product_description: message.product_description,
            image_links: split_image_links(&message.image_links),
        }
    }
}

/// Splits the comma-joined link column by position. Producers append one
/// trailing comma, which is stripped; any other empty segment is kept so a
/// blank slot fails validation instead of shifting later links forward.
pub fn split_image_links(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    let raw = raw.strip_suffix(',').unwrap_or(raw);
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(',').map(|entry| entry.trim().to_string()).collect()
}

/// Payload published on the listing queue channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    #[serde(deserialize_with = "string_or_number")]
    pub product_id: String,
    pub product_name: String,
    pub product_description: String,
    pub image_links: String,
    #[serde(default = "requested_status")]
    pub status: String,
}

fn requested_status() -> String {
    "requested".to_string()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(value) => Ok(value),
        Value::Number(value) => Ok(value.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "product_id must be a string or number, got {other}"
        ))),
    }
}

/// Intake body accepted by `POST /listings`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRequest {
    pub product_name: String,
    pub product_description: String,
    pub image_urls: Vec<String>,
}

/// Marketing copy for the three carousel pages, keyed by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratedCopy {
    pub page_1: String,
    pub page_2: String,
    pub page_3: String,
}

impl GeneratedCopy {
    pub fn pages(&self) -> [&str; IMAGE_SLOTS] {
        [&self.page_1, &self.page_2, &self.page_3]
    }
}

/// Files written by a capture run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureResult {
    pub full_page_path: PathBuf,
    pub page_paths: Vec<PathBuf>,
}

impl CaptureResult {
    /// True when the document had no `.page` elements, which usually means
    /// the template changed shape.
    pub fn is_empty(&self) -> bool {
        self.page_paths.is_empty()
    }
}

/// Outcome of the external video-assembly command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RunReport {
    pub job_id: String,
    pub images_dir: PathBuf,
    /// Path under `/videos` where the assembled video is served, when the
    /// video command wrote one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
