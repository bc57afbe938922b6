use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

const DEFAULT_POLL_INTERVAL_MS: u64 = 3_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Message identifier.
///
/// Positive values are assigned by the remote service. Negative values are
/// temporary ids for local sends that have not been acknowledged yet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl MessageId {
    /// `true` for temporary ids of unacknowledged local sends.
    pub fn is_local(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Feed message record as exchanged with the remote service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    /// Username of the authoring identity.
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_edited: bool,
}

/// Render-ready message row handed to the presentation surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageView {
    pub id: MessageId,
    pub content: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_edited: bool,
    /// A create/update/delete for this message is in flight.
    pub pending: bool,
    /// Authored by the signed-in identity.
    pub is_own: bool,
}

/// Poll scheduler state reported to the frontend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PollState {
    /// Not polling (view not attached, or signed out).
    #[default]
    Idle,
    /// Polling the feed on a fixed cadence.
    Polling,
    /// Polling halted because the credential was rejected.
    Suspended,
}

/// Read-only projection of the feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FeedSnapshot {
    /// Messages in display order.
    pub messages: Vec<MessageView>,
    pub poll_state: PollState,
    /// Most recent fetch failure; cleared by the next successful fetch.
    pub error: Option<FeedError>,
}

/// Resolved identity of the credential owner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub id: i64,
    pub username: String,
}

/// Profile record returned by the auth resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub date_joined: Option<DateTime<Utc>>,
}

/// Partial profile change; `None` fields are left untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.first_name.is_none() && self.last_name.is_none()
    }
}

/// Successful login: credential plus the identity it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthGrant {
    pub token: String,
    pub user: Identity,
}

/// Runtime tuning values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedRuntimeConfig {
    /// Delay between two polls of the feed.
    pub poll_interval_ms: u64,
    /// Upper bound for a single feed/auth request.
    pub request_timeout_ms: u64,
}

impl FeedRuntimeConfig {
    pub fn new(poll_interval_ms: u64, request_timeout_ms: u64) -> Self {
        Self {
            poll_interval_ms: poll_interval_ms.max(1),
            request_timeout_ms: request_timeout_ms.max(1),
        }
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

impl Default for FeedRuntimeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL_MS, DEFAULT_REQUEST_TIMEOUT_MS)
    }
}

/// Command channel input accepted by the feed runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FeedCommand {
    /// Exchange username/password for a credential.
    Login {
        username: String,
        password: String,
    },
    /// Create a new account. Does not sign in.
    Register {
        username: String,
        password: String,
    },
    /// Invalidate the credential remotely and locally.
    Logout,
    /// Feed view mounted: start polling.
    Attach,
    /// Feed view unmounted: stop polling and drop in-flight responses.
    Detach,
    /// Poll now, unless a poll is already outstanding.
    Refresh,
    /// Fetch the signed-in user's profile.
    LoadProfile,
    /// Change email and/or display names of the signed-in user.
    UpdateProfile(ProfileUpdate),
    /// Post a new message.
    Send {
        /// Frontend-provided transaction ID echoed in `MutationAck`.
        client_txn_id: String,
        content: String,
    },
    /// Replace the content of an own message.
    Edit {
        /// Frontend-provided transaction ID echoed in `MutationAck`.
        client_txn_id: String,
        id: MessageId,
        content: String,
    },
    /// Delete an own message.
    Delete {
        /// Frontend-provided transaction ID echoed in `MutationAck`.
        client_txn_id: String,
        id: MessageId,
    },
}

impl FeedCommand {
    /// Stable label for logs; never includes user content or secrets.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Register { .. } => "register",
            Self::Logout => "logout",
            Self::Attach => "attach",
            Self::Detach => "detach",
            Self::Refresh => "refresh",
            Self::LoadProfile => "load_profile",
            Self::UpdateProfile(_) => "update_profile",
            Self::Send { .. } => "send",
            Self::Edit { .. } => "edit",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Mutation intent kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MutationKind {
    Send,
    Edit,
    Delete,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

/// Final outcome of one mutation intent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutationAck {
    /// Original frontend transaction ID.
    pub client_txn_id: String,
    pub kind: MutationKind,
    /// Server id of the affected message on success.
    pub message_id: Option<MessageId>,
    /// Failure details; `None` on success.
    pub error: Option<FeedError>,
}

impl MutationAck {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Event channel output emitted by the feed runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FeedEvent {
    /// Credential presence changed.
    SessionChanged {
        authenticated: bool,
        /// Username of the credential owner, when resolved.
        identity: Option<String>,
    },
    /// Result of a login attempt.
    AuthResult {
        success: bool,
        error: Option<FeedError>,
    },
    /// Result of a registration attempt.
    RegisterResult {
        success: bool,
        error: Option<FeedError>,
    },
    /// Poll scheduler transition.
    PollStateChanged { state: PollState },
    /// New projection of the feed.
    FeedUpdated(FeedSnapshot),
    /// Current profile, after `LoadProfile` or `UpdateProfile`.
    ProfileLoaded(Profile),
    /// Mutation outcome (`Send`, `Edit`, `Delete`).
    MutationAck(MutationAck),
    /// A command could not be run (for example `Attach` while signed out).
    CommandFailed {
        command: String,
        error: FeedError,
    },
}
