//! Trait seams between the runtime and the remote service.
//!
//! The runtime only talks to these traits, so tests can drive it with
//! scripted doubles instead of a live server.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::FeedError,
    types::{AuthGrant, Message, MessageId, Profile, ProfileUpdate},
};

/// Read access to the current credential.
pub trait CredentialSource: Send + Sync {
    /// Current credential token, if any.
    fn credential(&self) -> Option<String>;
}

/// Remote message resource.
///
/// Every call attaches the current credential and fails with
/// `Unauthorized` when none is available.
#[async_trait]
pub trait FeedApi: Send + Sync {
    /// Full feed in server order.
    async fn list(&self) -> Result<Vec<Message>, FeedError>;

    /// Post a new message.
    async fn create(&self, content: &str) -> Result<Message, FeedError>;

    /// Replace the content of a message.
    async fn update(&self, id: MessageId, content: &str) -> Result<Message, FeedError>;

    /// Delete a message.
    async fn delete(&self, id: MessageId) -> Result<(), FeedError>;
}

/// Remote auth resource.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<AuthGrant, FeedError>;

    async fn register(&self, username: &str, password: &str) -> Result<(), FeedError>;

    /// Invalidate the current credential on the server.
    async fn logout(&self) -> Result<(), FeedError>;

    /// Profile of the current credential owner.
    async fn profile(&self) -> Result<Profile, FeedError>;

    /// Apply a partial profile change and return the full profile.
    async fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile, FeedError>;
}

#[async_trait]
impl<T: FeedApi + ?Sized> FeedApi for Arc<T> {
    async fn list(&self) -> Result<Vec<Message>, FeedError> {
        (**self).list().await
    }

    async fn create(&self, content: &str) -> Result<Message, FeedError> {
        (**self).create(content).await
    }

    async fn update(&self, id: MessageId, content: &str) -> Result<Message, FeedError> {
        (**self).update(id, content).await
    }

    async fn delete(&self, id: MessageId) -> Result<(), FeedError> {
        (**self).delete(id).await
    }
}

#[async_trait]
impl<T: AuthApi + ?Sized> AuthApi for Arc<T> {
    async fn login(&self, username: &str, password: &str) -> Result<AuthGrant, FeedError> {
        (**self).login(username, password).await
    }

    async fn register(&self, username: &str, password: &str) -> Result<(), FeedError> {
        (**self).register(username, password).await
    }

    async fn logout(&self) -> Result<(), FeedError> {
        (**self).logout().await
    }

    async fn profile(&self) -> Result<Profile, FeedError> {
        (**self).profile().await
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile, FeedError> {
        (**self).update_profile(update).await
    }
}

impl<T: CredentialSource + ?Sized> CredentialSource for Arc<T> {
    fn credential(&self) -> Option<String> {
        (**self).credential()
    }
}
