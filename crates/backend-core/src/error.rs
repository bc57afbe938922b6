use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::PollState;

/// Error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FeedErrorKind {
    /// Unreachable service or timeout. Polls retry on the next tick.
    Network,
    /// Credential missing, invalid or expired. Terminal for the session.
    Unauthorized,
    /// The acting identity is not the author of the target message.
    Forbidden,
    /// The target message no longer exists.
    NotFound,
    /// Input failed validation (locally or on the server).
    Rejected,
    /// 5xx-equivalent failure or malformed response.
    ServerError,
    /// Another mutation on the same message is still in flight.
    Busy,
}

impl FeedErrorKind {
    /// Whether the next poll tick may recover from this failure.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::ServerError)
    }
}

/// Stable error payload emitted across the command/event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{kind:?}:{code}: {message}")]
pub struct FeedError {
    pub kind: FeedErrorKind,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl FeedError {
    pub fn new(kind: FeedErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind == FeedErrorKind::Unauthorized
    }

    pub fn credential_missing() -> Self {
        Self::new(
            FeedErrorKind::Unauthorized,
            "credential_missing",
            "no credential is available; sign in first",
        )
    }

    pub fn empty_content() -> Self {
        Self::new(
            FeedErrorKind::Rejected,
            "empty_content",
            "message content must not be empty",
        )
    }

    pub fn busy(id: impl std::fmt::Display) -> Self {
        Self::new(
            FeedErrorKind::Busy,
            "message_busy",
            format!("message {id} already has a mutation in flight"),
        )
    }

    pub fn not_author(id: impl std::fmt::Display) -> Self {
        Self::new(
            FeedErrorKind::Forbidden,
            "not_author",
            format!("only the author may modify message {id}"),
        )
    }

    pub fn unknown_message(id: impl std::fmt::Display) -> Self {
        Self::new(
            FeedErrorKind::NotFound,
            "message_not_found",
            format!("message {id} is not in the feed"),
        )
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(
            FeedErrorKind::Network,
            "request_timeout",
            format!("{operation} did not complete in time"),
        )
    }

    /// The request was abandoned because the feed was torn down.
    pub fn cancelled(operation: &str) -> Self {
        Self::new(
            FeedErrorKind::Network,
            "cancelled",
            format!("{operation} was abandoned before the service answered"),
        )
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: PollState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            FeedErrorKind::Rejected,
            "invalid_state_transition",
            format!("cannot run '{action}' while polling is {current:?}"),
        )
    }
}

/// Map HTTP status codes to feed error categories.
pub fn classify_http_status(status: u16) -> FeedErrorKind {
    match status {
        401 => FeedErrorKind::Unauthorized,
        403 => FeedErrorKind::Forbidden,
        404 | 410 => FeedErrorKind::NotFound,
        408 => FeedErrorKind::Network,
        429 => FeedErrorKind::ServerError,
        400..=499 => FeedErrorKind::Rejected,
        _ => FeedErrorKind::ServerError,
    }
}
