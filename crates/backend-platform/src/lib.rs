//! Durable secret storage and the session store built on top of it.
//!
//! Secrets are addressed by `(service, account)`. The session keeps its
//! credential under the account it was loaded with and the resolved identity
//! under a sibling `"{account}.identity"` entry.

use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use thiserror::Error;

/// JSON-file secret backend.
pub mod file_store;
/// Credential and identity holder shared across the runtime.
pub mod session;

pub use file_store::FileSecretStore;
pub use session::SessionStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretStoreError {
    #[error("secret not found")]
    NotFound,
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
    #[error("secret store backend failure: {0}")]
    Backend(String),
}

/// Key/value backend for session secrets.
pub trait SecretStore: Send + Sync {
    fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), SecretStoreError>;

    /// Returns `NotFound` when nothing is stored for the pair.
    fn get_secret(&self, service: &str, account: &str) -> Result<String, SecretStoreError>;

    /// Returns `NotFound` when nothing is stored for the pair.
    fn delete_secret(&self, service: &str, account: &str) -> Result<(), SecretStoreError>;
}

impl<T: SecretStore + ?Sized> SecretStore for Arc<T> {
    fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), SecretStoreError> {
        (**self).set_secret(service, account, secret)
    }

    fn get_secret(&self, service: &str, account: &str) -> Result<String, SecretStoreError> {
        (**self).get_secret(service, account)
    }

    fn delete_secret(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
        (**self).delete_secret(service, account)
    }
}

type ServiceSecrets = BTreeMap<String, BTreeMap<String, String>>;

/// Process-local backend; nothing survives a restart.
#[derive(Clone, Default)]
pub struct InMemorySecretStore {
    services: Arc<RwLock<ServiceSecrets>>,
}

impl SecretStore for InMemorySecretStore {
    fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), SecretStoreError> {
        let mut services = self
            .services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        services
            .entry(service.to_owned())
            .or_default()
            .insert(account.to_owned(), secret.to_owned());
        Ok(())
    }

    fn get_secret(&self, service: &str, account: &str) -> Result<String, SecretStoreError> {
        let services = self
            .services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        services
            .get(service)
            .and_then(|accounts| accounts.get(account))
            .cloned()
            .ok_or(SecretStoreError::NotFound)
    }

    fn delete_secret(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
        let mut services = self
            .services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let accounts = services.get_mut(service).ok_or(SecretStoreError::NotFound)?;
        accounts.remove(account).ok_or(SecretStoreError::NotFound)?;
        if accounts.is_empty() {
            services.remove(service);
        }
        Ok(())
    }
}

/// Platform keychain backend (macOS Keychain, Windows Credential Manager,
/// Secret Service on Linux).
#[cfg(feature = "os-keyring")]
#[derive(Default, Clone, Copy)]
pub struct OsKeyringSecretStore;

#[cfg(feature = "os-keyring")]
impl OsKeyringSecretStore {
    fn entry(service: &str, account: &str) -> Result<keyring::Entry, SecretStoreError> {
        keyring::Entry::new(service, account).map_err(keyring_error)
    }
}

#[cfg(feature = "os-keyring")]
fn keyring_error(err: keyring::Error) -> SecretStoreError {
    match err {
        keyring::Error::NoEntry => SecretStoreError::NotFound,
        keyring::Error::NoStorageAccess(inner) | keyring::Error::PlatformFailure(inner) => {
            SecretStoreError::Unavailable(inner.to_string())
        }
        other => SecretStoreError::Backend(other.to_string()),
    }
}

#[cfg(feature = "os-keyring")]
impl SecretStore for OsKeyringSecretStore {
    fn set_secret(
        &self,
        service: &str,
        account: &str,
        secret: &str,
    ) -> Result<(), SecretStoreError> {
        Self::entry(service, account)?
            .set_password(secret)
            .map_err(keyring_error)
    }

    fn get_secret(&self, service: &str, account: &str) -> Result<String, SecretStoreError> {
        Self::entry(service, account)?
            .get_password()
            .map_err(keyring_error)
    }

    fn delete_secret(&self, service: &str, account: &str) -> Result<(), SecretStoreError> {
        Self::entry(service, account)?
            .delete_credential()
            .map_err(keyring_error)
    }
}

/// A backend pinned to one service name.
#[derive(Clone)]
pub struct ScopedSecretStore<S: SecretStore> {
    inner: S,
    service: String,
}

impl<S: SecretStore> ScopedSecretStore<S> {
    pub fn new(inner: S, service: impl Into<String>) -> Self {
        Self {
            inner,
            service: service.into(),
        }
    }

    pub fn set(&self, account: &str, secret: &str) -> Result<(), SecretStoreError> {
        self.inner.set_secret(&self.service, account, secret)
    }

    /// Like `get_secret`, but an absent entry is `Ok(None)`.
    pub fn find(&self, account: &str) -> Result<Option<String>, SecretStoreError> {
        match self.inner.get_secret(&self.service, account) {
            Ok(secret) => Ok(Some(secret)),
            Err(SecretStoreError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Remove an entry; removing an absent entry succeeds.
    pub fn remove(&self, account: &str) -> Result<(), SecretStoreError> {
        match self.inner.delete_secret(&self.service, account) {
            Ok(()) | Err(SecretStoreError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_reports_missing_entries() {
        let store = InMemorySecretStore::default();
        assert_eq!(
            store.get_secret("chatfeed", "http://127.0.0.1:8000"),
            Err(SecretStoreError::NotFound)
        );

        store
            .set_secret("chatfeed", "http://127.0.0.1:8000", "9944b09199c62bcf")
            .expect("set should work");
        store
            .delete_secret("chatfeed", "http://127.0.0.1:8000")
            .expect("delete should work");
        assert_eq!(
            store.delete_secret("chatfeed", "http://127.0.0.1:8000"),
            Err(SecretStoreError::NotFound)
        );
    }

    #[test]
    fn scoped_find_and_remove_treat_absence_as_empty() {
        let base: Arc<dyn SecretStore> = Arc::new(InMemorySecretStore::default());
        let scope = ScopedSecretStore::new(base, "chatfeed");

        assert_eq!(scope.find("default").expect("find"), None);
        scope.remove("default").expect("removing nothing is fine");

        scope.set("default", "tok").expect("set");
        assert_eq!(scope.find("default").expect("find"), Some("tok".to_owned()));
        scope.remove("default").expect("remove");
        assert_eq!(scope.find("default").expect("find"), None);
    }

    #[test]
    fn scopes_sharing_a_backend_do_not_see_each_other() {
        let base: Arc<dyn SecretStore> = Arc::new(InMemorySecretStore::default());
        let staging = ScopedSecretStore::new(base.clone(), "chatfeed-staging");
        let prod = ScopedSecretStore::new(base, "chatfeed-prod");

        staging.set("default", "one").expect("set staging");

        assert_eq!(prod.find("default").expect("find prod"), None);
        assert_eq!(staging.service(), "chatfeed-staging");
    }

    struct OfflineStore;

    impl SecretStore for OfflineStore {
        fn set_secret(&self, _: &str, _: &str, _: &str) -> Result<(), SecretStoreError> {
            Err(SecretStoreError::Unavailable("keychain locked".to_owned()))
        }

        fn get_secret(&self, _: &str, _: &str) -> Result<String, SecretStoreError> {
            Err(SecretStoreError::Unavailable("keychain locked".to_owned()))
        }

        fn delete_secret(&self, _: &str, _: &str) -> Result<(), SecretStoreError> {
            Err(SecretStoreError::Unavailable("keychain locked".to_owned()))
        }
    }

    #[test]
    fn backend_failures_are_not_mistaken_for_absence() {
        let scope = ScopedSecretStore::new(OfflineStore, "chatfeed");
        let unavailable = SecretStoreError::Unavailable("keychain locked".to_owned());

        assert_eq!(scope.find("default"), Err(unavailable.clone()));
        assert_eq!(scope.remove("default"), Err(unavailable));
    }
}
