//! Core feed contract shared between runtime and frontend consumers.
//!
//! This crate defines the command/event protocol, the poll scheduler, the
//! optimistic reconciliation engine, the remote API seams, and common
//! error/channel abstractions. Nothing here performs I/O.

/// Remote feed/auth trait seams.
pub mod api;
/// Async command/event channel primitives.
pub mod channel;
/// Stable feed error types and HTTP classification helpers.
pub mod error;
/// Event normalization helpers (mutation acknowledgements).
pub mod normalization;
/// Optimistic feed projection.
pub mod reconcile;
/// Poll cadence state machine.
pub mod scheduler;
/// Frontend-facing protocol types (commands, events, payloads).
pub mod types;

pub use api::{AuthApi, CredentialSource, FeedApi};
pub use channel::{EventStream, FeedChannelError, FeedChannels};
pub use error::{FeedError, FeedErrorKind, classify_http_status};
pub use normalization::{MutationOutcome, normalize_command_failure, normalize_mutation_outcome};
pub use reconcile::{DeleteTicket, EditTicket, FeedEngine, SendTicket};
pub use scheduler::PollScheduler;
pub use types::{
    AuthGrant, FeedCommand, FeedEvent, FeedRuntimeConfig, FeedSnapshot, Identity, Message,
    MessageId, MessageView, MutationAck, MutationKind, PollState, Profile, ProfileUpdate,
};
