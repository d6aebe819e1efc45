//! Gateway REST client.
//!
//! `GatewayApi` is the seam between the diagnostic engine and the transport:
//! production code uses [`RestClient`] (reqwest), tests use
//! [`FakeGateway`](crate::fake::FakeGateway) with scripted responses.
//!
//! Paths are relative to the versioned API root (`/rest/v1`).

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::GatewaySection;
use crate::error::{ApiError, GatewayError, Result};

/// Outcome of a single REST call
pub type ApiResult = std::result::Result<Value, ApiError>;

/// Endpoints consumed by the diagnostic engine
pub mod paths {
    pub const CABLEMODEM_STATE: &str = "/cablemodem/state_";
    pub const PROVISIONING: &str = "/system/gateway/provisioning";
    pub const MTA_LINES: &str = "/mta/lines";
    pub const WIFI_BAND_2G: &str = "/wifi/band2g/state_";
    pub const WIFI_BAND_5G: &str = "/wifi/band5g/state_";
    pub const ETHERNET_HOSTS: &str = "/network/hosts_?connectedOnly=true&interface=ethernet";
    pub const WIFI_HOSTS: &str = "/network/hosts_?connectedOnly=true&interface=wifi";
    pub const CONNECTED_HOSTS: &str = "/network/hosts?connectedOnly=true";
    pub const LOGIN: &str = "/user/login";
}

/// Minimal REST contract used by the engine.
///
/// Every call returns the parsed JSON body (`Value::Null` for an empty body)
/// or an [`ApiError`]. Implementations apply their own default timeout;
/// callers needing a tighter deadline wrap the future in
/// `tokio::time::timeout`.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    async fn get(&self, path: &str) -> ApiResult;

    async fn post(&self, path: &str, body: &Value) -> ApiResult;

    async fn delete(&self, path: &str) -> ApiResult;

    /// End the authenticated session, if any. Safe to call more than once.
    async fn logout(&self) -> std::result::Result<(), ApiError> {
        Ok(())
    }
}

/// Retry policy for GET requests answered with 503 Service Unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(10_000),
            retries: 2,
        }
    }
}

/// reqwest-backed gateway client
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    token: Mutex<Option<String>>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl RestClient {
    /// Create a client from the `[gateway]` config section
    pub fn new(section: &GatewaySection) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::Runtime {
                details: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: section.api_base(),
            token: Mutex::new(None),
            timeout: section.request_timeout(),
            retry: RetryPolicy {
                delay: section.retry_delay(),
                retries: section.retry_count,
            },
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        *self.token.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_some()
    }

    fn session(&self) -> MutexGuard<'_, Option<String>> {
        self.token.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Log in with the admin password and keep the session token
    pub async fn login(&self, password: &str) -> Result<()> {
        let body = json!({ "password": password });
        let reply = self
            .send(reqwest::Method::POST, paths::LOGIN, Some(&body))
            .await
            .map_err(|e| match e.status() {
                Some(401) | Some(403) => GatewayError::Auth {
                    details: e.to_string(),
                },
                _ => GatewayError::api(paths::LOGIN, e),
            })?;

        let token = reply
            .get("created")
            .and_then(|c| c.get("token"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| GatewayError::Auth {
                details: "login reply carries no token".to_string(),
            })?;

        *self.session() = Some(token.to_string());
        info!("logged in to {}", self.base_url);
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, method: reqwest::Method, path: &str, body: Option<&Value>) -> ApiResult {
        let mut request = self
            .client
            .request(method.clone(), self.url(path))
            .timeout(self.timeout);

        let token = self.session().clone();
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!("{} {}", method, path);
        let response = request.send().await.map_err(classify_error)?;
        let status = response.status();
        let text = response.text().await.map_err(classify_error)?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()));
        }

        // Error bodies are `{ message, errorCode }` when the backend parsed the request
        let parsed: Option<Value> = serde_json::from_str(&text).ok();
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or(text);
        let error_code = parsed
            .as_ref()
            .and_then(|v| v.get("errorCode"))
            .and_then(|c| c.as_u64())
            .unwrap_or(0) as u32;

        Err(ApiError::Status {
            code: status.as_u16(),
            message,
            error_code,
        })
    }
}

#[async_trait]
impl GatewayApi for RestClient {
    async fn get(&self, path: &str) -> ApiResult {
        let mut retries_left = self.retry.retries;
        loop {
            match self.send(reqwest::Method::GET, path, None).await {
                Err(e) if e.is_unavailable() && retries_left > 0 => {
                    retries_left -= 1;
                    warn!(
                        "{} returned 503, retrying in {:?} ({} left)",
                        path, self.retry.delay, retries_left
                    );
                    sleep(self.retry.delay).await;
                }
                other => return other,
            }
        }
    }

    async fn post(&self, path: &str, body: &Value) -> ApiResult {
        self.send(reqwest::Method::POST, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> ApiResult {
        self.send(reqwest::Method::DELETE, path, None).await
    }

    /// A missing session is not an error
    async fn logout(&self) -> std::result::Result<(), ApiError> {
        if !self.is_authenticated() {
            return Ok(());
        }
        match self.send(reqwest::Method::DELETE, paths::LOGIN, None).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() || e.status() == Some(401) => {
                debug!("session already gone: {}", e);
            }
            Err(e) => return Err(e),
        }
        *self.session() = None;
        info!("logged out of {}", self.base_url);
        Ok(())
    }
}

/// Classify a transport-level reqwest error
fn classify_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else if let Some(status) = err.status() {
        ApiError::Status {
            code: status.as_u16(),
            message: err.to_string(),
            error_code: 0,
        }
    } else if err.is_decode() {
        ApiError::Decode(err.to_string())
    } else {
        ApiError::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_url_building() {
        let section = GatewaySection {
            url: "http://192.168.0.1/".to_string(),
            ..GatewaySection::default()
        };
        let client = RestClient::new(&section).unwrap();
        assert_eq!(client.base_url(), "http://192.168.0.1/rest/v1");
        assert_eq!(
            client.url(paths::CABLEMODEM_STATE),
            "http://192.168.0.1/rest/v1/cablemodem/state_"
        );
        assert!(!client.is_authenticated());
        assert!(client.with_token("abc").is_authenticated());
    }

    #[test]
    fn test_retry_policy_from_section() {
        let section = GatewaySection {
            retry_count: 5,
            retry_delay_ms: 250,
            ..GatewaySection::default()
        };
        let client = RestClient::new(&section).unwrap();
        assert_eq!(client.retry.retries, 5);
        assert_eq!(client.retry.delay, Duration::from_millis(250));
    }
}
