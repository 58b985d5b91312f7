//! Investigation context and sortable identifiers.
//!
//! Every investigation carries one [`InvestigationContext`]: the sortable
//! id, caller identity, the clock anchoring relative date extraction, and
//! the cancellation token that propagates into every stage, invocation and
//! analyzer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Crockford base32 alphabet (no I, L, O, U).
const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// A sortable, 26-character investigation identifier.
///
/// Encodes the 128 bits of a time-ordered UUIDv7 in Crockford base32, so
/// lexicographic order follows creation order. The textual form is the
/// canonical representation; equality and ordering operate on it directly.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvestigationId(String);

impl InvestigationId {
    /// Allocate a fresh id from the current instant.
    pub fn new() -> Self {
        Self::from_uuid(Uuid::now_v7())
    }

    /// Encode an existing UUID. Used by tests to pin ids.
    pub fn from_uuid(uuid: Uuid) -> Self {
        let value = uuid.as_u128();
        let mut out = String::with_capacity(26);
        for i in 0..26 {
            let shift = 5 * (25 - i);
            let index = ((value >> shift) & 0x1F) as usize;
            out.push(CROCKFORD[index] as char);
        }
        Self(out)
    }

    /// The canonical 26-character string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InvestigationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InvestigationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serializable slice of the context embedded in the final result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextInfo {
    /// Caller-supplied user identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Caller-supplied session identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Original query text
    pub query: String,
}

/// Per-investigation runtime context.
///
/// Created by the orchestrator at the top of `investigate` and threaded
/// through every component. The reference clock is fixed here so that
/// relative date expressions ("últimos 6 meses") extract deterministically.
#[derive(Debug, Clone)]
pub struct InvestigationContext {
    /// Sortable investigation identifier
    pub investigation_id: InvestigationId,
    /// Caller-supplied user identifier
    pub user_id: Option<String>,
    /// Caller-supplied session identifier
    pub session_id: Option<String>,
    /// When the investigation started
    pub started_at: DateTime<Utc>,
    /// Clock anchoring relative date extraction
    pub reference_clock: DateTime<Utc>,
    cancel: CancellationToken,
}

impl InvestigationContext {
    /// Create a context starting now, with a fresh id and token.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            investigation_id: InvestigationId::new(),
            user_id: None,
            session_id: None,
            started_at: now,
            reference_clock: now,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a user id.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach a session id.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Pin the reference clock. Callers fix this for deterministic
    /// extraction of relative dates.
    pub fn with_reference_clock(mut self, clock: DateTime<Utc>) -> Self {
        self.reference_clock = clock;
        self
    }

    /// Use an externally created cancellation token, e.g. one derived from
    /// a caller-side deadline.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The cancellation token threaded through stages and invocations.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal cancellation to every in-flight operation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation has been signaled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Serializable slice for the final result.
    pub fn info(&self, query: impl Into<String>) -> ContextInfo {
        ContextInfo {
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            query: query.into(),
        }
    }
}

impl Default for InvestigationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_26_chars() {
        let id = InvestigationId::new();
        assert_eq!(id.as_str().len(), 26);
        assert!(id
            .as_str()
            .chars()
            .all(|c| CROCKFORD.contains(&(c as u8))));
    }

    #[test]
    fn test_ids_sort_by_creation_time() {
        // UUIDv7 embeds a millisecond timestamp in the top 48 bits, so ids
        // minted from increasing timestamps must sort ascending.
        let early = Uuid::new_v7(uuid::Timestamp::from_unix(uuid::NoContext, 1_700_000_000, 0));
        let late = Uuid::new_v7(uuid::Timestamp::from_unix(uuid::NoContext, 1_700_000_060, 0));
        let a = InvestigationId::from_uuid(early);
        let b = InvestigationId::from_uuid(late);
        assert!(a < b);
    }

    #[test]
    fn test_id_encoding_is_deterministic() {
        let uuid = Uuid::from_u128(0x0123_4567_89AB_CDEF_0123_4567_89AB_CDEF);
        assert_eq!(
            InvestigationId::from_uuid(uuid),
            InvestigationId::from_uuid(uuid)
        );
    }

    #[test]
    fn test_cancellation_propagates_to_clones() {
        let ctx = InvestigationContext::new();
        let token = ctx.cancel_token();
        assert!(!token.is_cancelled());
        ctx.cancel();
        assert!(token.is_cancelled());
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_context_info_slice() {
        let ctx = InvestigationContext::new()
            .with_user_id("u-1")
            .with_session_id("s-1");
        let info = ctx.info("contratos de saúde");
        assert_eq!(info.user_id.as_deref(), Some("u-1"));
        assert_eq!(info.session_id.as_deref(), Some("s-1"));
        assert_eq!(info.query, "contratos de saúde");
    }
}
