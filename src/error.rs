//! Error types for lupa-core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using lupa-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during an investigation.
///
/// The first group mirrors the classified outcomes of an endpoint
/// invocation; the resilience layer and executor branch on these kinds.
/// The second group covers construction, planning and ingestion failures.
#[derive(Error, Debug)]
pub enum Error {
    /// 4xx indicating bad parameters; never retried
    #[error("invalid request to {endpoint_id}: {message}")]
    InvalidRequest {
        endpoint_id: String,
        message: String,
    },

    /// 401/403; never retried, endpoint marked unhealthy for a short window
    #[error("authentication failed for {endpoint_id}")]
    AuthenticationFailed { endpoint_id: String },

    /// 404; not retried, recorded but not treated as stage failure
    #[error("not found at {endpoint_id}: {message}")]
    NotFound {
        endpoint_id: String,
        message: String,
    },

    /// 429; retried honoring Retry-After when present
    #[error("rate limited by {endpoint_id}")]
    RateLimited {
        endpoint_id: String,
        retry_after: Option<Duration>,
    },

    /// Network error, 5xx, or unclassified IO failure; retried per policy
    #[error("transient failure at {endpoint_id}: {message}")]
    TransientFailure {
        endpoint_id: String,
        message: String,
    },

    /// Deadline exceeded; retried if attempts remain
    #[error("operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Short-circuited by an open breaker; never retried, triggers fallback
    #[error("circuit open for {endpoint_id}")]
    CircuitOpen { endpoint_id: String },

    /// Context cancellation; propagated, never retried
    #[error("operation cancelled")]
    Cancelled,

    /// Bug in a mapper/analyzer/planner caught at a recovery boundary
    #[error("internal error: {0}")]
    Internal(String),

    /// Registry construction failed validation
    #[error("registry invalid: {0}")]
    RegistryInvalid(String),

    /// The planner could not fill required stage parameters
    #[error("insufficient context, missing: {}", missing.join(", "))]
    InsufficientContext { missing: Vec<String> },

    /// Write attempted against a frozen entity graph
    #[error("entity graph is frozen")]
    GraphFrozen,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Investigation repository error
    #[error("storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Create an invalid-request error.
    pub fn invalid_request(endpoint_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            endpoint_id: endpoint_id.into(),
            message: message.into(),
        }
    }

    /// Create a transient-failure error.
    pub fn transient(endpoint_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientFailure {
            endpoint_id: endpoint_id.into(),
            message: message.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(endpoint_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            endpoint_id: endpoint_id.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(elapsed: Duration) -> Self {
        Self::Timeout {
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The classified kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::AuthenticationFailed { .. } => ErrorKind::AuthenticationFailed,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::TransientFailure { .. } => ErrorKind::TransientFailure,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_)
            | Self::RegistryInvalid(_)
            | Self::InsufficientContext { .. }
            | Self::GraphFrozen
            | Self::Config(_)
            | Self::Serialization(_)
            | Self::Storage(_) => ErrorKind::InternalError,
        }
    }

    /// Whether the retry policy may re-issue the call after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::TransientFailure { .. } | Self::Timeout { .. }
        )
    }

    /// Whether the executor may walk the fallback list after this error.
    ///
    /// Per-endpoint retries must already be exhausted; rate-limit errors
    /// stay on the same endpoint because a fallback shares the quota class.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::CircuitOpen { .. } | Self::TransientFailure { .. }
        )
    }

    /// Whether the failure counts against the circuit breaker.
    ///
    /// Client-side mistakes and lookups that legitimately miss do not
    /// indicate endpoint ill health.
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(
            self,
            Self::TransientFailure { .. }
                | Self::Timeout { .. }
                | Self::RateLimited { .. }
                | Self::AuthenticationFailed { .. }
        )
    }

    /// The endpoint this error is attributed to, when known.
    pub fn endpoint_id(&self) -> Option<&str> {
        match self {
            Self::InvalidRequest { endpoint_id, .. }
            | Self::AuthenticationFailed { endpoint_id }
            | Self::NotFound { endpoint_id, .. }
            | Self::RateLimited { endpoint_id, .. }
            | Self::TransientFailure { endpoint_id, .. }
            | Self::CircuitOpen { endpoint_id } => Some(endpoint_id),
            _ => None,
        }
    }
}

/// Classified error kinds, the wire-visible projection of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    AuthenticationFailed,
    NotFound,
    RateLimited,
    TransientFailure,
    Timeout,
    CircuitOpen,
    Cancelled,
    InternalError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidRequest => "invalid_request",
            Self::AuthenticationFailed => "authentication_failed",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::TransientFailure => "transient_failure",
            Self::Timeout => "timeout",
            Self::CircuitOpen => "circuit_open",
            Self::Cancelled => "cancelled",
            Self::InternalError => "internal_error",
        };
        write!(f, "{}", s)
    }
}

/// A recorded error attached to a stage result and to traceability.
///
/// Carries the classified kind, the endpoint it is attributed to, and a
/// human-readable message. Never carries credentials or raw payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Classified error kind
    pub kind: ErrorKind,
    /// Endpoint the error is attributed to, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<String>,
    /// Human-readable description
    pub message: String,
    /// When the error was recorded
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Record an error at the current instant.
    pub fn from_error(error: &Error) -> Self {
        Self {
            kind: error.kind(),
            endpoint_id: error.endpoint_id().map(str::to_string),
            message: error.to_string(),
            at: Utc::now(),
        }
    }

    /// Record an error with an explicit endpoint attribution.
    pub fn for_endpoint(error: &Error, endpoint_id: impl Into<String>) -> Self {
        Self {
            kind: error.kind(),
            endpoint_id: Some(endpoint_id.into()),
            message: error.to_string(),
            at: Utc::now(),
        }
    }
}
