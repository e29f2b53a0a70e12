use crate::api::ApiError;
use crate::config::ApiConfig;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use url::Url;

/// Thin JSON-over-HTTP wrapper. One attempt per call; callers decide what a
/// failure means.
#[derive(Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    config: ApiConfig,
}

impl HttpClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .map_err(ApiError::Client)?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    /// GET with the `Access-Token` header, returning the decoded body.
    pub async fn get_json(&self, url: Url, access_token: &str) -> Result<Value, ApiError> {
        self.polite_delay().await;
        debug!("GET {}", redact(&url));

        let resp = self
            .inner
            .get(url.clone())
            .header("Access-Token", access_token)
            .send()
            .await
            .map_err(|source| ApiError::Request {
                url: redact(&url),
                source,
            })?;

        read_json(resp, &url).await
    }

    /// POST a JSON body (no auth header; used by the token endpoint).
    pub async fn post_json(&self, url: Url, body: &Value) -> Result<Value, ApiError> {
        self.polite_delay().await;
        debug!("POST {}", redact(&url));

        let resp = self
            .inner
            .post(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|source| ApiError::Request {
                url: redact(&url),
                source,
            })?;

        read_json(resp, &url).await
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        let jitter = rand::random_range(0..=self.config.jitter_ms);
        let total = Duration::from_millis(self.config.request_delay_ms + jitter);
        if !total.is_zero() {
            sleep(total).await;
        }
    }
}

async fn read_json(resp: reqwest::Response, url: &Url) -> Result<Value, ApiError> {
    let status = resp.status();
    let text = resp.text().await.map_err(|source| ApiError::Request {
        url: redact(url),
        source,
    })?;

    if !status.is_success() {
        return Err(ApiError::Http {
            url: redact(url),
            status: status.as_u16(),
            body: text,
        });
    }

    serde_json::from_str(&text).map_err(|source| ApiError::Decode {
        url: redact(url),
        source,
    })
}

/// URL without its query string, safe for logs.
pub fn redact(url: &Url) -> String {
    let mut u = url.clone();
    u.set_query(None);
    u.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_drops_query() {
        let url = Url::parse_with_params(
            "https://business-api.tiktok.com/open_api/v1.3/business/get/",
            &[("business_id", "secret-id")],
        )
        .unwrap();
        assert_eq!(
            redact(&url),
            "https://business-api.tiktok.com/open_api/v1.3/business/get/"
        );
    }
}
