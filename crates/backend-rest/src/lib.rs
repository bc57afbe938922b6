//! REST adapter for the feed contract.
//!
//! `client` talks HTTP to the message and auth resources; `runtime` drives
//! the reconciliation engine and poll scheduler from a single tokio task.

/// reqwest-backed `FeedApi`/`AuthApi` implementations.
pub mod client;
/// Feed actor runtime and its handle.
pub mod runtime;

pub use client::{RestAuthClient, RestFeedClient, rest_clients};
pub use runtime::{FeedHandle, spawn_runtime};
