//! Shared HTTP transport: rate limiting, retries, status routing, auth.

use crate::auth::{AuthConfig, TokenCache};
use intake_core::{redact_secrets, ConnectorError, Record};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Default request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connect-phase timeout.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default retry budget for transient failures.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (`base · 2^attempt`).
const DEFAULT_RETRY_BASE_SECS: u64 = 1;

/// Transport tuning parsed from an API connector config.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Sustained request rate (requests per second).
    pub rate_limit: f64,
    /// Transient-failure retry budget.
    pub max_retries: u32,
    /// Backoff base delay in seconds.
    pub retry_base_secs: u64,
    /// Whether to verify TLS certificates.
    pub verify_ssl: bool,
}

impl TransportSettings {
    /// Parse settings, applying the given default request rate
    /// (10 req/s for REST, 5 req/s for FHIR).
    pub fn from_record(config: &Record, default_rate: f64) -> Self {
        Self {
            timeout_secs: config
                .get("timeout")
                .and_then(|v| v.as_u64())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            rate_limit: config
                .get("rate_limit")
                .and_then(|v| v.as_f64())
                .filter(|r| *r > 0.0)
                .unwrap_or(default_rate),
            max_retries: config
                .get("max_retries")
                .and_then(|v| v.as_u64())
                .map_or(DEFAULT_MAX_RETRIES, |v| v as u32),
            retry_base_secs: config
                .get("retry_delay")
                .and_then(|v| v.as_u64())
                .unwrap_or(DEFAULT_RETRY_BASE_SECS),
            verify_ssl: config
                .get("verify_ssl")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
        }
    }
}

/// A decoded HTTP response.
#[derive(Debug)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Parsed JSON body.
    pub body: serde_json::Value,
    /// Response headers (Link-header pagination reads these).
    pub headers: reqwest::header::HeaderMap,
}

struct TransportInner {
    client: reqwest::Client,
    auth: AuthConfig,
    tokens: TokenCache,
    last_request: Mutex<Option<Instant>>,
    request_interval: Duration,
    max_retries: u32,
    retry_base: Duration,
}

/// Shared HTTP machinery for the REST and FHIR connectors.
///
/// Cheap to clone; clones share the rate limiter and token cache, which is
/// what keeps one connector's request rate bounded regardless of how many
/// tasks hold a handle.
#[derive(Clone)]
pub struct HttpTransport {
    inner: Arc<TransportInner>,
}

impl HttpTransport {
    /// Build a transport from settings and an auth mode.
    pub fn new(settings: &TransportSettings, auth: AuthConfig) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .danger_accept_invalid_certs(!settings.verify_ssl)
            .build()
            .map_err(|e| ConnectorError::Configuration(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(TransportInner {
                client,
                auth,
                tokens: TokenCache::default(),
                last_request: Mutex::new(None),
                request_interval: Duration::from_secs_f64(1.0 / settings.rate_limit),
                max_retries: settings.max_retries,
                retry_base: Duration::from_secs(settings.retry_base_secs),
            }),
        })
    }

    /// Sleep so that `now − last_request ≥ 1/rate`, then stamp the clock.
    async fn pace(&self) {
        let mut last = self.inner.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.inner.request_interval {
                tokio::time::sleep(self.inner.request_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn auth_headers(&self) -> Result<Vec<(String, String)>, ConnectorError> {
        match &self.inner.auth {
            AuthConfig::None => Ok(Vec::new()),
            AuthConfig::ApiKey { key, header } => Ok(vec![(header.clone(), key.clone())]),
            AuthConfig::Basic { username, password } => {
                use base64::engine::general_purpose::STANDARD;
                use base64::Engine as _;
                let credentials = STANDARD.encode(format!("{username}:{password}"));
                Ok(vec![(
                    "authorization".to_string(),
                    format!("Basic {credentials}"),
                )])
            }
            AuthConfig::Bearer { token } => Ok(vec![(
                "authorization".to_string(),
                format!("Bearer {token}"),
            )]),
            AuthConfig::OAuth2(config) => {
                let token = self
                    .inner
                    .tokens
                    .access_token(&self.inner.client, config)
                    .await?;
                Ok(vec![(
                    "authorization".to_string(),
                    format!("Bearer {token}"),
                )])
            }
        }
    }

    /// GET a JSON document with rate limiting, retries, and status routing.
    ///
    /// - `429` becomes [`ConnectorError::RateLimit`] carrying `Retry-After`,
    ///   retried (sleeping the advertised delay) within the retry budget.
    /// - `5xx` and transport-level failures are retried with exponential
    ///   backoff; exhaustion escalates to a terminal connection error.
    /// - Other `4xx` are terminal immediately.
    pub async fn get_json(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<HttpResponse, ConnectorError> {
        let mut last_error: Option<ConnectorError> = None;

        for attempt in 0..=self.inner.max_retries {
            self.pace().await;

            let mut request = self.inner.client.get(url);
            if !params.is_empty() {
                request = request.query(params);
            }
            for (name, value) in self.auth_headers().await? {
                request = request.header(name, value);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 429 {
                        let retry_after = response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok());
                        let error = ConnectorError::RateLimit {
                            message: format!("rate limit exceeded for {url}"),
                            retry_after,
                        };
                        if attempt < self.inner.max_retries {
                            let delay = retry_after
                                .map(Duration::from_secs)
                                .unwrap_or_else(|| self.backoff(attempt));
                            tracing::warn!(url, attempt, delay_secs = delay.as_secs(),
                                "rate limited, backing off");
                            tokio::time::sleep(delay).await;
                            last_error = Some(error);
                            continue;
                        }
                        return Err(error);
                    }

                    if status.is_server_error() {
                        last_error = Some(ConnectorError::Connection(format!(
                            "server error {status} from {url}"
                        )));
                    } else if status.is_client_error() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(ConnectorError::Extraction(format!(
                            "client error {status} from {url}: {}",
                            redact_secrets(&body.chars().take(200).collect::<String>())
                        )));
                    } else {
                        let headers = response.headers().clone();
                        let text = response.text().await.map_err(|e| {
                            ConnectorError::Connection(redact_secrets(&e.to_string()))
                        })?;
                        let body = if text.is_empty() {
                            serde_json::Value::Null
                        } else {
                            serde_json::from_str(&text).map_err(|e| {
                                ConnectorError::Extraction(format!("invalid JSON response: {e}"))
                            })?
                        };
                        return Ok(HttpResponse {
                            status: status.as_u16(),
                            body,
                            headers,
                        });
                    }
                }
                Err(e) => {
                    last_error =
                        Some(ConnectorError::Connection(redact_secrets(&e.to_string())));
                }
            }

            if attempt < self.inner.max_retries {
                let delay = self.backoff(attempt);
                tracing::warn!(url, attempt, delay_secs = delay.as_secs(),
                    "request failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }

        Err(ConnectorError::Connection(format!(
            "request to {url} failed after {} attempts: {}",
            self.inner.max_retries + 1,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.inner.retry_base * 2u32.saturating_pow(attempt)
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("request_interval", &self.inner.request_interval)
            .field("max_retries", &self.inner.max_retries)
            .finish()
    }
}
