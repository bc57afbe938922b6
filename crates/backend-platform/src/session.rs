use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use backend_core::{CredentialSource, Identity};
use tracing::{debug, warn};

use crate::{ScopedSecretStore, SecretStore};

#[derive(Debug, Default)]
struct SessionState {
    credential: Option<String>,
    identity: Option<Identity>,
}

/// Current credential plus the identity it resolves to.
///
/// Cloned handles share one state. Every change is written through to the
/// backing secret store; write failures are logged and the in-memory state
/// stays authoritative for the rest of the run.
#[derive(Clone)]
pub struct SessionStore {
    state: Arc<RwLock<SessionState>>,
    store: ScopedSecretStore<Arc<dyn SecretStore>>,
    account: String,
}

impl SessionStore {
    /// Initialize from whatever the backing store already holds.
    pub fn load(
        store: Arc<dyn SecretStore>,
        service: impl Into<String>,
        account: impl Into<String>,
    ) -> Self {
        let store = ScopedSecretStore::new(store, service);
        let account = account.into();

        let credential = read_optional(&store, &account, "credential");
        let identity = credential
            .as_ref()
            .and_then(|_| read_optional(&store, &identity_account(&account), "identity"))
            .and_then(|raw| match serde_json::from_str::<Identity>(&raw) {
                Ok(identity) => Some(identity),
                Err(err) => {
                    warn!(error = %err, "ignoring unreadable stored identity");
                    None
                }
            });

        debug!(
            service = store.service(),
            restored = credential.is_some(),
            "session store loaded"
        );

        Self {
            state: Arc::new(RwLock::new(SessionState {
                credential,
                identity,
            })),
            store,
            account,
        }
    }

    /// Volatile session, for tests and one-shot tools.
    pub fn in_memory() -> Self {
        Self::load(
            Arc::new(crate::InMemorySecretStore::default()),
            "chatfeed",
            "default",
        )
    }

    pub fn has_credential(&self) -> bool {
        self.read().credential.is_some()
    }

    pub fn credential(&self) -> Option<String> {
        self.read().credential.clone()
    }

    pub fn set_credential(&self, token: impl Into<String>) {
        let token = token.into();
        if let Err(err) = self.store.set(&self.account, &token) {
            warn!(error = %err, "failed persisting credential; keeping it for this run only");
        }
        self.write().credential = Some(token);
    }

    /// Drop the credential and the identity resolved for it.
    pub fn clear_credential(&self) {
        {
            let mut state = self.write();
            state.credential = None;
            state.identity = None;
        }
        self.forget(&self.account, "credential");
        self.forget(&identity_account(&self.account), "identity");
    }

    pub fn identity(&self) -> Option<Identity> {
        self.read().identity.clone()
    }

    pub fn username(&self) -> Option<String> {
        self.read()
            .identity
            .as_ref()
            .map(|identity| identity.username.clone())
    }

    pub fn set_identity(&self, identity: Identity) {
        match serde_json::to_string(&identity) {
            Ok(encoded) => {
                if let Err(err) = self.store.set(&identity_account(&self.account), &encoded) {
                    warn!(error = %err, "failed persisting identity");
                }
            }
            Err(err) => warn!(error = %err, "failed encoding identity"),
        }
        self.write().identity = Some(identity);
    }

    fn forget(&self, account: &str, what: &str) {
        if let Err(err) = self.store.remove(account) {
            warn!(error = %err, what, "failed removing persisted session data");
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialSource for SessionStore {
    fn credential(&self) -> Option<String> {
        SessionStore::credential(self)
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("SessionStore")
            .field("service", &self.store.service())
            .field("account", &self.account)
            .field("has_credential", &state.credential.is_some())
            .field("identity", &state.identity)
            .finish()
    }
}

fn identity_account(account: &str) -> String {
    format!("{account}.identity")
}

fn read_optional(
    store: &ScopedSecretStore<Arc<dyn SecretStore>>,
    account: &str,
    what: &str,
) -> Option<String> {
    store.find(account).unwrap_or_else(|err| {
        warn!(error = %err, what, "failed reading persisted session data");
        None
    })
}
