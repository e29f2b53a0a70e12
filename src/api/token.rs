//! Access-token providers.
//!
//! `RefreshingTokenProvider` trades the stored refresh token for a new token
//! pair once per process and writes both back to the `.env` credential file,
//! so the next run starts from the rotated refresh token.

use crate::api::http_client::HttpClient;
use crate::api::ApiError;
use crate::config::{ApiConfig, AppConfig, AuthConfig};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use url::Url;

pub const ACCESS_TOKEN_KEY: &str = "TIKTOK_ACCESS_TOKEN";
pub const REFRESH_TOKEN_KEY: &str = "TIKTOK_REFRESH_TOKEN";

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, ApiError>;
}

/// Refresh when the app credentials allow it, otherwise use the stored token.
pub fn from_config(config: &AppConfig) -> Result<Box<dyn TokenProvider>, ApiError> {
    let auth = &config.auth;
    let can_refresh = !auth.app_id.is_empty() && !auth.secret.is_empty();

    if auth.refresh_on_start && can_refresh {
        debug!("Using refreshing token provider");
        return Ok(Box::new(RefreshingTokenProvider::new(&config.api, auth)?));
    }
    if auth.refresh_on_start {
        warn!("auth.app_id / auth.secret not set; using the stored access token as-is");
    }
    Ok(Box::new(StaticToken::new(auth.access_token.clone())))
}

// ── Static token ──────────────────────────────────────────────────────────────

pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, ApiError> {
        if self.0.trim().is_empty() {
            return Err(ApiError::Auth(format!("{} is not set", ACCESS_TOKEN_KEY)));
        }
        Ok(self.0.clone())
    }
}

// ── Refreshing token ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    code: Option<i64>,
    #[serde(default)]
    message: String,
    data: Option<TokenData>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Extract the token pair from a `/tt_user/oauth2/refresh_token/` response.
pub fn parse_token_response(payload: &Value) -> Result<TokenPair, ApiError> {
    let env: TokenEnvelope = serde_json::from_value(payload.clone())
        .map_err(|e| ApiError::Auth(format!("unexpected token response: {}", e)))?;

    if let Some(code) = env.code.filter(|c| *c != 0) {
        return Err(ApiError::Auth(format!("code {}: {}", code, env.message)));
    }

    let data = env
        .data
        .ok_or_else(|| ApiError::Auth("token response has no data".into()))?;
    let access_token = data
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Auth("token response has no access_token".into()))?;

    Ok(TokenPair {
        access_token,
        refresh_token: data.refresh_token.filter(|t| !t.is_empty()),
    })
}

struct TokenState {
    access_token: Option<String>,
    refresh_token: String,
}

pub struct RefreshingTokenProvider {
    client: HttpClient,
    url: Url,
    app_id: String,
    secret: String,
    store: CredentialStore,
    state: Mutex<TokenState>,
}

impl RefreshingTokenProvider {
    pub fn new(api: &ApiConfig, auth: &AuthConfig) -> Result<Self, ApiError> {
        if auth.app_id.is_empty() || auth.secret.is_empty() {
            return Err(ApiError::Config("auth.app_id / auth.secret".into()));
        }

        let store = CredentialStore::new(&auth.credentials_file);
        // The credential file may hold a newer refresh token than the config snapshot.
        let refresh_token = store
            .read()
            .ok()
            .and_then(|vars| vars.get(REFRESH_TOKEN_KEY).cloned())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| auth.refresh_token.clone());

        if refresh_token.is_empty() {
            return Err(ApiError::Auth(format!("{} is not set", REFRESH_TOKEN_KEY)));
        }

        let url = Url::parse(&format!(
            "{}/tt_user/oauth2/refresh_token/",
            api.base_url.trim_end_matches('/')
        ))?;

        Ok(Self {
            client: HttpClient::new(api)?,
            url,
            app_id: auth.app_id.clone(),
            secret: auth.secret.clone(),
            store,
            state: Mutex::new(TokenState {
                access_token: None,
                refresh_token,
            }),
        })
    }

    /// Exchange the refresh token and persist the new pair.
    pub async fn refresh(&self) -> Result<TokenPair, ApiError> {
        let mut state = self.state.lock().await;
        let pair = self.exchange(&state.refresh_token).await?;
        self.adopt(&mut state, &pair);
        Ok(pair)
    }

    /// Take over a freshly issued pair. The old refresh token is already
    /// revoked upstream, so memory is updated even when the file write fails.
    fn adopt(&self, state: &mut TokenState, pair: &TokenPair) {
        state.access_token = Some(pair.access_token.clone());
        if let Some(rt) = &pair.refresh_token {
            state.refresh_token = rt.clone();
        }

        let mut updates = vec![(ACCESS_TOKEN_KEY, pair.access_token.as_str())];
        if let Some(rt) = pair.refresh_token.as_deref() {
            updates.push((REFRESH_TOKEN_KEY, rt));
        }
        match self.store.update(&updates) {
            Ok(()) => info!("Access token refreshed; saved to {:?}", self.store.path()),
            Err(e) => error!(
                "Access token refreshed but {:?} could not be written: {}. \
                 The rotated {} is only held in memory for this run",
                self.store.path(),
                e,
                REFRESH_TOKEN_KEY
            ),
        }
    }

    async fn exchange(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let body = json!({
            "client_id": self.app_id,
            "client_secret": self.secret,
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
        });

        let resp = self
            .client
            .post_json(self.url.clone(), &body)
            .await
            .map_err(|e| match e {
                ApiError::Http { status, body, .. } => {
                    ApiError::Auth(format!("token endpoint returned HTTP {}: {}", status, body))
                }
                other => other,
            })?;

        parse_token_response(&resp).inspect_err(|e| warn!("Token refresh rejected: {}", e))
    }
}

#[async_trait]
impl TokenProvider for RefreshingTokenProvider {
    async fn access_token(&self) -> Result<String, ApiError> {
        if let Some(token) = self.state.lock().await.access_token.clone() {
            debug!("Reusing access token refreshed earlier in this run");
            return Ok(token);
        }
        Ok(self.refresh().await?.access_token)
    }
}

// ── Credential store ──────────────────────────────────────────────────────────

/// `.env`-style `KEY=VALUE` file.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<HashMap<String, String>, ApiError> {
        #[allow(deprecated)]
        let iter = dotenv::from_path_iter(&self.path).map_err(|e| match e {
            dotenv::Error::Io(e) => ApiError::Auth(format!("cannot read {:?}: {}", self.path, e)),
            e => ApiError::Auth(format!("cannot read {:?}: {}", self.path, e)),
        })?;
        let mut vars = HashMap::new();
        for item in iter {
            match item {
                Ok((k, v)) => {
                    vars.insert(k, v);
                }
                Err(e) => warn!("Skipping unreadable line in {:?}: {}", self.path, e),
            }
        }
        Ok(vars)
    }

    /// Rewrite the given keys in place, appending any that are missing.
    pub fn update(&self, pairs: &[(&str, &str)]) -> Result<(), ApiError> {
        let current = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, upsert_env_lines(&current, pairs))?;
        Ok(())
    }
}

pub fn upsert_env_lines(content: &str, pairs: &[(&str, &str)]) -> String {
    let mut seen = vec![false; pairs.len()];
    let mut out: Vec<String> = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim_start();
        let body = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let key = body.split('=').next().unwrap_or("").trim();

        match pairs.iter().position(|(k, _)| *k == key && body.contains('=')) {
            Some(i) => {
                out.push(format!("{}={}", pairs[i].0, pairs[i].1));
                seen[i] = true;
            }
            None => out.push(line.to_string()),
        }
    }

    for (i, (k, v)) in pairs.iter().enumerate() {
        if !seen[i] {
            out.push(format!("{}={}", k, v));
        }
    }

    let mut s = out.join("\n");
    s.push('\n');
    s
}
