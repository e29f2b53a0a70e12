use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::aggregator::{DEFAULT_INCREASE_METRICS, DEFAULT_SUM_METRICS};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// TikTok Business API client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub business_id: String,

    /// Fields requested from `/business/get/`.
    #[serde(default = "default_profile_fields")]
    pub fields: Vec<String>,

    /// Fields requested from `/business/video/list/`.
    #[serde(default = "default_video_fields")]
    pub video_fields: Vec<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// OAuth app credentials and the `.env` file tokens are persisted to
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub app_id: String,

    #[serde(default)]
    pub secret: String,

    #[serde(default)]
    pub access_token: String,

    #[serde(default)]
    pub refresh_token: String,

    #[serde(default = "default_credentials_file")]
    pub credentials_file: PathBuf,

    /// Refresh the access token before every `profile` run.
    #[serde(default = "default_true")]
    pub refresh_on_start: bool,
}

/// Metric lists driving the aggregator
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_sum_fields")]
    pub sum_fields: Vec<String>,

    #[serde(default = "default_increase_fields")]
    pub increase_fields: Vec<String>,
}

/// Warehouse configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Worksheet + raw archive locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_sheet_path")]
    pub sheet_path: PathBuf,

    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,

    #[serde(default = "default_true")]
    pub archive_raw: bool,

    /// Worksheet header text per column name; unmapped columns keep their name.
    #[serde(default)]
    pub header_labels: HashMap<String, String>,
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// One-row CSV export of the sheet's date cells (A..D).
    #[serde(default)]
    pub dates_file: Option<PathBuf>,

    #[serde(default = "default_start_days_ago")]
    pub default_start_days_ago: i64,

    #[serde(default = "default_end_days_ago")]
    pub default_end_days_ago: i64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_base_url() -> String {
    "https://business-api.tiktok.com/open_api/v1.3".to_string()
}
fn default_profile_fields() -> Vec<String> {
    [
        "username",
        "display_name",
        "followers_count",
        "total_likes",
        "video_views",
        "unique_video_views",
        "profile_views",
        "shares",
        "comments",
        "engaged_audience",
        "bio_link_clicks",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_video_fields() -> Vec<String> {
    [
        "item_id",
        "create_time",
        "thumbnail_url",
        "share_url",
        "caption",
        "video_views",
        "likes",
        "comments",
        "shares",
        "reach",
        "video_duration",
        "full_video_watched_rate",
        "total_time_watched",
        "average_time_watched",
        "new_followers",
        "profile_views",
        "website_clicks",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    200
}
fn default_jitter_ms() -> u64 {
    300
}
fn default_user_agent() -> String {
    "tiktok-insights/0.1".to_string()
}
fn default_credentials_file() -> PathBuf {
    PathBuf::from(".env")
}
fn default_sum_fields() -> Vec<String> {
    DEFAULT_SUM_METRICS.iter().map(|s| s.to_string()).collect()
}
fn default_increase_fields() -> Vec<String> {
    DEFAULT_INCREASE_METRICS.iter().map(|s| s.to_string()).collect()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/tiktok.duckdb")
}
fn default_sheet_path() -> PathBuf {
    PathBuf::from("data/profile_sheet.csv")
}
fn default_raw_dir() -> PathBuf {
    PathBuf::from("data/raw")
}
fn default_true() -> bool {
    true
}
fn default_concurrency() -> usize {
    2
}
fn default_start_days_ago() -> i64 {
    3
}
fn default_end_days_ago() -> i64 {
    2
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            business_id: String::new(),
            fields: default_profile_fields(),
            video_fields: default_video_fields(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            secret: String::new(),
            access_token: String::new(),
            refresh_token: String::new(),
            credentials_file: default_credentials_file(),
            refresh_on_start: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sum_fields: default_sum_fields(),
            increase_fields: default_increase_fields(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sheet_path: default_sheet_path(),
            raw_dir: default_raw_dir(),
            archive_raw: true,
            header_labels: HashMap::new(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            dates_file: None,
            default_start_days_ago: default_start_days_ago(),
            default_end_days_ago: default_end_days_ago(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::load_with(&env)
    }

    fn load_with(env: &HashMap<String, String>) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(env_source(env))
            .build()
            .context("Failed to assemble configuration sources")?;

        let mut app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Invalid configuration")?;
        app_cfg.keep_raw_credentials(env);
        app_cfg.apply_legacy_env(|key| env.get(key).cloned());
        Ok(app_cfg)
    }

    /// `try_parsing` turns `000123` into the integer `123`; identifiers and
    /// secrets are taken from the variables verbatim instead.
    fn keep_raw_credentials(&mut self, env: &HashMap<String, String>) {
        let slots: [(&str, &mut String); 5] = [
            ("TIKTOK__API__BUSINESS_ID", &mut self.api.business_id),
            ("TIKTOK__AUTH__APP_ID", &mut self.auth.app_id),
            ("TIKTOK__AUTH__SECRET", &mut self.auth.secret),
            ("TIKTOK__AUTH__ACCESS_TOKEN", &mut self.auth.access_token),
            ("TIKTOK__AUTH__REFRESH_TOKEN", &mut self.auth.refresh_token),
        ];
        for (key, slot) in slots {
            if let Some(v) = env.get(key) {
                *slot = v.trim().to_string();
            }
        }
    }

    /// Fill empty credentials from the flat `TIKTOK_*` variables the `.env`
    /// file has always used.
    pub fn apply_legacy_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fill = |slot: &mut String, key: &str| {
            if slot.is_empty() {
                if let Some(v) = lookup(key).filter(|v| !v.trim().is_empty()) {
                    *slot = v.trim().to_string();
                }
            }
        };

        fill(&mut self.api.business_id, "TIKTOK_BUSINESS_ID");
        fill(&mut self.auth.app_id, "TIKTOK_APP_ID");
        fill(&mut self.auth.secret, "TIKTOK_SECRET");
        fill(&mut self.auth.access_token, "TIKTOK_ACCESS_TOKEN");
        fill(&mut self.auth.refresh_token, "TIKTOK_REFRESH_TOKEN");
    }
}

/// `TIKTOK__SECTION__KEY` variables; list keys take comma-separated values.
fn env_source(env: &HashMap<String, String>) -> config::Environment {
    let vars: config::Map<String, String> =
        env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    config::Environment::with_prefix("TIKTOK")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("api.fields")
        .with_list_parse_key("api.video_fields")
        .with_list_parse_key("metrics.sum_fields")
        .with_list_parse_key("metrics.increase_fields")
        .source(Some(vars))
}
