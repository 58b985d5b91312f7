//! API client capability and the generic HTTP implementation.
//!
//! Every registered endpoint is reached through the [`ApiClient`] trait.
//! Implementations never panic: protocol failures are converted into the
//! classified error taxonomy, and context cancellation is honored at the
//! I/O suspension point.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::context::InvestigationContext;
use crate::error::{Error, Result};

/// Invocation parameters: a flat JSON object.
pub type Params = serde_json::Map<String, Value>;

/// Opaque per-API payload, tagged with its source and fetch time.
///
/// The federation layer does not unify schemas; the graph builder does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    /// Endpoint that produced this payload
    pub endpoint_id: String,
    /// When the payload was fetched
    pub fetched_at: DateTime<Utc>,
    /// The untouched response body
    pub payload: Value,
}

impl RawResult {
    /// Create a raw result fetched now.
    pub fn new(endpoint_id: impl Into<String>, payload: Value) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            fetched_at: Utc::now(),
            payload,
        }
    }

    /// Create a raw result with an explicit fetch time (tests, replays).
    pub fn at(endpoint_id: impl Into<String>, fetched_at: DateTime<Utc>, payload: Value) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            fetched_at,
            payload,
        }
    }
}

/// The uniform capability a registered endpoint implements.
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Invoke a method with parameters, returning the raw payload.
    ///
    /// Implementations must classify protocol errors into the error
    /// taxonomy and honor cancellation through the context token.
    async fn invoke(
        &self,
        ctx: &InvestigationContext,
        method: &str,
        params: &Params,
    ) -> Result<RawResult>;

    /// The registry id of the endpoint this client serves.
    fn endpoint_id(&self) -> &str;
}

/// Configuration for [`HttpApiClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL of the API
    pub base_url: String,
    /// Optional API key sent as a header
    pub api_key: Option<String>,
    /// Header name carrying the API key
    pub api_key_header: String,
    /// Request timeout
    pub timeout: Duration,
}

impl HttpClientConfig {
    /// Create a config for a base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            api_key_header: "chave-api-dados".to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Attach an API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Override the API key header name.
    pub fn with_api_key_header(mut self, header: impl Into<String>) -> Self {
        self.api_key_header = header.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Generic JSON-over-HTTP client for government transparency APIs.
///
/// The invocation method names a resource path relative to the base URL;
/// parameters become the query string. Responses are kept opaque.
pub struct HttpApiClient {
    endpoint_id: String,
    config: HttpClientConfig,
    http: reqwest::Client,
}

impl HttpApiClient {
    /// Create a client for a registered endpoint.
    pub fn new(endpoint_id: impl Into<String>, config: HttpClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            endpoint_id: endpoint_id.into(),
            config,
            http,
        })
    }

    fn classify_status(&self, status: StatusCode, retry_after: Option<Duration>, body: &str) -> Error {
        let endpoint_id = self.endpoint_id.clone();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Error::AuthenticationFailed { endpoint_id }
            }
            StatusCode::NOT_FOUND => Error::not_found(endpoint_id, truncate(body, 200)),
            StatusCode::TOO_MANY_REQUESTS => Error::RateLimited {
                endpoint_id,
                retry_after,
            },
            s if s.is_client_error() => Error::invalid_request(endpoint_id, truncate(body, 200)),
            s => Error::transient(endpoint_id, format!("status {}", s)),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn invoke(
        &self,
        ctx: &InvestigationContext,
        method: &str,
        params: &Params,
    ) -> Result<RawResult> {
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            method.trim_start_matches('/')
        );

        let query: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| {
                let rendered = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), rendered)
            })
            .collect();

        let mut request = self.http.get(&url).query(&query);
        if let Some(key) = &self.config.api_key {
            request = request.header(self.config.api_key_header.as_str(), key);
        }

        let cancel = ctx.cancel_token();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = request.send() => result,
        };

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(Error::timeout(self.config.timeout)),
            Err(e) => return Err(Error::transient(&self.endpoint_id, e.to_string())),
        };

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            result = response.text() => {
                result.map_err(|e| Error::transient(&self.endpoint_id, e.to_string()))?
            }
        };

        if !status.is_success() {
            return Err(self.classify_status(status, retry_after, &body));
        }

        let payload: Value = serde_json::from_str(&body)
            .unwrap_or_else(|_| Value::String(body));

        Ok(RawResult::new(&self.endpoint_id, payload))
    }

    fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_result_round_trip() {
        let raw = RawResult::new("portal-federal", json!({"contratos": []}));
        let serialized = serde_json::to_string(&raw).unwrap();
        let back: RawResult = serde_json::from_str(&serialized).unwrap();
        assert_eq!(raw, back);
    }

    #[test]
    fn test_status_classification() {
        let client = HttpApiClient::new(
            "portal-federal",
            HttpClientConfig::new("https://api.example.gov.br"),
        )
        .unwrap();

        assert!(matches!(
            client.classify_status(StatusCode::UNAUTHORIZED, None, ""),
            Error::AuthenticationFailed { .. }
        ));
        assert!(matches!(
            client.classify_status(StatusCode::NOT_FOUND, None, "no record"),
            Error::NotFound { .. }
        ));
        assert!(matches!(
            client.classify_status(
                StatusCode::TOO_MANY_REQUESTS,
                Some(Duration::from_secs(30)),
                ""
            ),
            Error::RateLimited {
                retry_after: Some(d),
                ..
            } if d == Duration::from_secs(30)
        ));
        assert!(matches!(
            client.classify_status(StatusCode::BAD_REQUEST, None, "ano inválido"),
            Error::InvalidRequest { .. }
        ));
        assert!(matches!(
            client.classify_status(StatusCode::BAD_GATEWAY, None, ""),
            Error::TransientFailure { .. }
        ));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "ção".repeat(100);
        let t = truncate(&s, 10);
        assert!(t.len() <= 14); // bounded, plus ellipsis
    }
}
