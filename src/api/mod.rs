pub mod http_client;
pub mod token;

use crate::config::ApiConfig;
use crate::models::DateRange;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use self::http_client::HttpClient;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} from {url}: {body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },

    #[error("response from {url} is not JSON: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("missing configuration: {0}")]
    Config(String),

    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("credential store: {0}")]
    Io(#[from] std::io::Error),
}

/// `(code, message)` when the envelope reports a non-zero API code.
pub fn api_failure(payload: &Value) -> Option<(i64, String)> {
    let code = payload.get("code").and_then(Value::as_i64)?;
    if code == 0 {
        return None;
    }
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((code, message))
}

// ── Fetcher trait ─────────────────────────────────────────────────────────────

/// Source of raw analytics payloads.
#[async_trait]
pub trait MetricsFetcher: Send + Sync {
    async fn fetch_profile(&self, access_token: &str, range: &DateRange)
        -> Result<Value, ApiError>;
    async fn fetch_videos(&self, access_token: &str, range: &DateRange)
        -> Result<Value, ApiError>;
}

// ── TikTok Business API ───────────────────────────────────────────────────────

pub struct TikTokClient {
    client: HttpClient,
    base_url: String,
    business_id: String,
    fields: Vec<String>,
    video_fields: Vec<String>,
}

impl TikTokClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        if config.business_id.trim().is_empty() {
            return Err(ApiError::Config("api.business_id / TIKTOK_BUSINESS_ID".into()));
        }
        Ok(Self {
            client: HttpClient::new(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            business_id: config.business_id.clone(),
            fields: config.fields.clone(),
            video_fields: config.video_fields.clone(),
        })
    }

    /// `{base}/business/get/?business_id=…&fields=[…]&start_date=…&end_date=…`
    pub fn profile_url(&self, range: &DateRange) -> Result<Url, ApiError> {
        self.ranged_url("business/get/", &self.fields, range)
    }

    pub fn video_list_url(&self, range: &DateRange) -> Result<Url, ApiError> {
        self.ranged_url("business/video/list/", &self.video_fields, range)
    }

    fn ranged_url(
        &self,
        path: &str,
        fields: &[String],
        range: &DateRange,
    ) -> Result<Url, ApiError> {
        // The API wants `fields` as a JSON array literal.
        let fields_json = Value::from(fields.to_vec()).to_string();
        let start = range.start().to_string();
        let end = range.end().to_string();

        Ok(Url::parse_with_params(
            &format!("{}/{}", self.base_url, path),
            &[
                ("business_id", self.business_id.as_str()),
                ("fields", fields_json.as_str()),
                ("start_date", start.as_str()),
                ("end_date", end.as_str()),
            ],
        )?)
    }
}

#[async_trait]
impl MetricsFetcher for TikTokClient {
    async fn fetch_profile(
        &self,
        access_token: &str,
        range: &DateRange,
    ) -> Result<Value, ApiError> {
        let url = self.profile_url(range)?;
        info!("Fetching profile metrics for {}", range);

        let payload = self.client.get_json(url, access_token).await?;
        if let Some((code, message)) = api_failure(&payload) {
            warn!("Profile API returned code {} ({}) for {}", code, message, range);
        }
        Ok(payload)
    }

    async fn fetch_videos(
        &self,
        access_token: &str,
        range: &DateRange,
    ) -> Result<Value, ApiError> {
        let url = self.video_list_url(range)?;
        info!("Fetching video list for {}", range);

        let mut payload = self.client.get_json(url, access_token).await?;
        if let Some((code, message)) = api_failure(&payload) {
            warn!("Video API returned code {} ({}) for {}", code, message, range);
        }
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("post_date".into(), Value::String(range.end().to_string()));
        }
        Ok(payload)
    }
}
