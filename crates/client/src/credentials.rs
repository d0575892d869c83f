//! Access/refresh credential pair and its single persisted home.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::storage::{self, SharedStore, keys};

/// Bearer credentials issued by the backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Short-lived token sent as `Authorization: Bearer`.
    pub access: String,
    /// Longer-lived token exchanged for a new access token.
    pub refresh: String,
    /// Unix timestamp when `access` was issued. Absent in records written
    /// by older clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obtained_at: Option<i64>,
}

impl Credentials {
    /// Create a freshly issued credential pair.
    #[must_use]
    pub fn issued_now(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
            obtained_at: Some(Utc::now().timestamp()),
        }
    }

    /// Whether the access token has outlived `ttl` (with a 60s buffer).
    ///
    /// Tokens with an unknown issue time are assumed to still be valid;
    /// the backend decides.
    #[must_use]
    pub fn is_likely_expired(&self, ttl: chrono::Duration) -> bool {
        self.obtained_at.is_some_and(|obtained_at| {
            let now = Utc::now().timestamp();
            let expires_at = obtained_at + ttl.num_seconds();
            now >= (expires_at - 60)
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access", &"[REDACTED]")
            .field("refresh", &"[REDACTED]")
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// Shared holder of the current credentials.
///
/// The session manager and the HTTP gateway both read and replace the
/// credential pair; the vault is the only code that writes
/// [`keys::CREDENTIALS`], so memory and storage never disagree.
#[derive(Clone)]
pub struct CredentialVault {
    inner: Arc<VaultInner>,
}

struct VaultInner {
    current: RwLock<Option<Credentials>>,
    store: SharedStore,
}

impl CredentialVault {
    /// Create an empty vault writing through to `store`.
    ///
    /// Nothing is read from `store` until [`CredentialVault::restore`].
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self {
            inner: Arc::new(VaultInner {
                current: RwLock::new(None),
                store,
            }),
        }
    }

    /// Load persisted credentials into memory, returning them.
    pub fn restore(&self) -> Option<Credentials> {
        let restored: Option<Credentials> = storage::load(self.inner.store.as_ref(), keys::CREDENTIALS);
        self.set_in_memory(restored.clone());
        restored
    }

    /// The current credentials, if any.
    #[must_use]
    pub fn current(&self) -> Option<Credentials> {
        self.inner
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The current access token, if any.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.current().map(|credentials| credentials.access)
    }

    /// The current refresh token, if any.
    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.current().map(|credentials| credentials.refresh)
    }

    /// Replace the credential pair and persist it.
    pub fn replace(&self, credentials: Credentials) {
        if let Err(e) = storage::save(self.inner.store.as_ref(), keys::CREDENTIALS, &credentials) {
            tracing::warn!(error = %e, "Failed to persist credentials");
        }
        self.set_in_memory(Some(credentials));
    }

    /// Swap in a new access token (and optionally a rotated refresh token).
    ///
    /// Returns `false` when there is no credential pair to update, which
    /// happens if the session was cleared while a refresh was in flight.
    pub fn set_access(&self, access: String, refresh: Option<String>) -> bool {
        let Some(mut credentials) = self.current() else {
            return false;
        };
        credentials.access = access;
        if let Some(refresh) = refresh {
            credentials.refresh = refresh;
        }
        credentials.obtained_at = Some(Utc::now().timestamp());
        self.replace(credentials);
        true
    }

    /// Forget the credentials, in memory and in storage.
    pub fn clear(&self) {
        storage::discard(self.inner.store.as_ref(), keys::CREDENTIALS);
        self.set_in_memory(None);
    }

    fn set_in_memory(&self, credentials: Option<Credentials>) {
        *self
            .inner
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = credentials;
    }
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault")
            .field("present", &self.current().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::{LocalStore, MemoryStore};

    fn vault() -> (CredentialVault, Arc<MemoryStore>) {
        let store = MemoryStore::shared();
        (CredentialVault::new(store.clone()), store)
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let credentials = Credentials::issued_now("secret-access", "secret-refresh");
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_is_likely_expired() {
        let ttl = chrono::Duration::minutes(60);
        let fresh = Credentials::issued_now("a", "r");
        assert!(!fresh.is_likely_expired(ttl));

        let stale = Credentials {
            obtained_at: Some(Utc::now().timestamp() - 3600),
            ..fresh.clone()
        };
        assert!(stale.is_likely_expired(ttl));

        let unknown = Credentials {
            obtained_at: None,
            ..fresh
        };
        assert!(!unknown.is_likely_expired(ttl));
    }

    #[test]
    fn test_reads_legacy_record_without_timestamp() {
        let (vault, store) = vault();
        store
            .write(keys::CREDENTIALS, r#"{"access":"a1","refresh":"r1"}"#)
            .unwrap();

        let restored = vault.restore().unwrap();
        assert_eq!(restored.access, "a1");
        assert_eq!(restored.obtained_at, None);
        assert_eq!(vault.refresh_token().as_deref(), Some("r1"));
    }

    #[test]
    fn test_replace_persists() {
        let (vault, store) = vault();
        vault.replace(Credentials::issued_now("a1", "r1"));

        let persisted: Credentials = storage::load(store.as_ref(), keys::CREDENTIALS).unwrap();
        assert_eq!(persisted.access, "a1");
        assert_eq!(vault.access_token().as_deref(), Some("a1"));
    }

    #[test]
    fn test_set_access_keeps_refresh_unless_rotated() {
        let (vault, _store) = vault();
        assert!(!vault.set_access("a0".to_string(), None));

        vault.replace(Credentials::issued_now("a1", "r1"));
        assert!(vault.set_access("a2".to_string(), None));
        assert_eq!(vault.refresh_token().as_deref(), Some("r1"));

        assert!(vault.set_access("a3".to_string(), Some("r2".to_string())));
        let current = vault.current().unwrap();
        assert_eq!(current.access, "a3");
        assert_eq!(current.refresh, "r2");
    }

    #[test]
    fn test_clear_removes_persisted_pair() {
        let (vault, store) = vault();
        vault.replace(Credentials::issued_now("a1", "r1"));
        vault.clear();

        assert!(vault.current().is_none());
        assert_eq!(store.read(keys::CREDENTIALS).unwrap(), None);
    }
}
