use crate::face::MatchThreshold;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

pub const DRIVE_MAX_PAGE_SIZE: u32 = 1000;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ListingMode {
    /// Call the Drive API from this process with `drive_api_key`.
    Direct,
    /// Ask a relay server, which holds the key, for each page.
    Relay,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    SearchApi,
    Descriptor,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_listing_mode")]
    pub listing_mode: ListingMode,
    #[serde(default = "default_drive_api_url")]
    pub drive_api_url: String,
    /// Base of the direct-content download URLs.
    #[serde(default = "default_drive_content_url")]
    pub drive_content_url: String,
    #[serde(default)]
    pub drive_api_key: Option<String>,
    #[serde(default)]
    pub relay_url: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    pub face_api_url: String,
    /// Confidence percentage for `search_api`, maximum distance for `descriptor`.
    #[serde(default)]
    pub similarity_threshold: Option<f32>,
    #[serde(default = "default_max_faces")]
    pub max_faces: u32,
    #[serde(default = "default_scan_delay_ms")]
    pub scan_delay_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_listing_mode() -> ListingMode {
    ListingMode::Direct
}

fn default_drive_api_url() -> String {
    "https://www.googleapis.com/drive/v3/files".into()
}

fn default_drive_content_url() -> String {
    "https://drive.google.com/uc".into()
}

fn default_page_size() -> u32 {
    DRIVE_MAX_PAGE_SIZE
}

fn default_backend() -> BackendKind {
    BackendKind::SearchApi
}

fn default_max_faces() -> u32 {
    1
}

fn default_scan_delay_ms() -> u64 {
    100
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_web_port() -> u16 {
    10000
}

fn default_log_level() -> String {
    "info".into()
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        // Secrets usually come from a local .env file.
        dotenv::dotenv().ok();

        let env = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default"))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("FACE_FINDER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.clamp(1, DRIVE_MAX_PAGE_SIZE)
    }

    pub fn threshold(&self) -> MatchThreshold {
        match self.backend {
            BackendKind::SearchApi => {
                MatchThreshold::MinConfidence(self.similarity_threshold.unwrap_or(70.0))
            }
            BackendKind::Descriptor => {
                MatchThreshold::MaxDistance(self.similarity_threshold.unwrap_or(0.6))
            }
        }
    }

    pub fn scan_delay(&self) -> Duration {
        Duration::from_millis(self.scan_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    serde_json::from_value(serde_json::json!({
        "face_api_url": "http://127.0.0.1:5000",
        "drive_api_key": "test-key",
    }))
    .expect("test config deserializes")
}
