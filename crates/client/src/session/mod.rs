//! Authentication session.
//!
//! [`SessionManager`] owns the signed-in user and, through the shared
//! [`CredentialVault`], the access/refresh credential pair. It restores a
//! persisted session at startup, signs users in and out, and keeps the
//! credentials fresh with a background renewal task.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized -> Restoring -> Authenticated | Unauthenticated
//! Authenticated -> Unauthenticated   (sign-out, failed renewal, expiry)
//! ```
//!
//! Only verified identities are published on [`SessionManager::subscribe`];
//! a user restored from storage stays tentative until the backend confirms it.

mod renewal;
mod state;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cartwheel_core::{Email, EmailError, UserId, UserProfile};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

pub use state::{SessionSnapshot, SessionStatus, UserState};

use crate::config::SessionConfig;
use crate::credentials::{CredentialVault, Credentials};
use crate::gateway::{AuthPayload, GatewayError, Registration, RemoteGateway};
use crate::notify::{Notification, SharedNotifier};
use crate::storage::{self, SharedStore, keys};
use state::SessionState;

/// Errors returned by sign-in and sign-up.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The email address is malformed.
    #[error("Invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// No password was given.
    #[error("Password is required")]
    EmptyPassword,

    /// A required field was blank.
    #[error("{0} is required")]
    MissingField(&'static str),

    /// The backend call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl SessionError {
    /// Text suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Gateway(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// Session manager handle.
///
/// Cheap to clone; clones share the same session.
pub struct SessionManager<G> {
    inner: Arc<SessionInner<G>>,
}

impl<G> Clone for SessionManager<G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct SessionInner<G> {
    gateway: G,
    vault: CredentialVault,
    store: SharedStore,
    notifier: SharedNotifier,
    config: SessionConfig,
    state: Mutex<SessionState>,
    identity: watch::Sender<Option<UserId>>,
    /// Serializes refresh sequences; holds the time of the last attempt.
    refresh_gate: tokio::sync::Mutex<Option<Instant>>,
    renewal: Mutex<Option<JoinHandle<()>>>,
}

impl<G> Drop for SessionInner<G> {
    fn drop(&mut self) {
        if let Some(handle) = self
            .renewal
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl<G: RemoteGateway> SessionManager<G> {
    /// Create an uninitialized session. Call [`SessionManager::restore`] next.
    #[must_use]
    pub fn new(
        gateway: G,
        vault: CredentialVault,
        store: SharedStore,
        notifier: SharedNotifier,
        config: SessionConfig,
    ) -> Self {
        let (identity, _) = watch::channel(None);

        Self {
            inner: Arc::new(SessionInner {
                gateway,
                vault,
                store,
                notifier,
                config,
                state: Mutex::new(SessionState::default()),
                identity,
                refresh_gate: tokio::sync::Mutex::new(None),
                renewal: Mutex::new(None),
            }),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current session state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::from(&*self.state())
    }

    /// The signed-in user, including a tentative one being verified.
    #[must_use]
    pub fn user(&self) -> Option<UserProfile> {
        self.state().user.as_ref().map(|user| user.profile().clone())
    }

    /// Whether a verified user is signed in.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state().status == SessionStatus::Authenticated
    }

    /// Whether startup restoration is still running.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(
            self.state().status,
            SessionStatus::Uninitialized | SessionStatus::Restoring
        )
    }

    /// Watch the verified user ID. Changes only when the identity changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.inner.identity.subscribe()
    }

    /// Shared credential holder.
    #[must_use]
    pub fn vault(&self) -> &CredentialVault {
        &self.inner.vault
    }

    /// Whether the background renewal task is running.
    #[must_use]
    pub fn is_renewing(&self) -> bool {
        self.renewal()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Restore a persisted session and verify it with the backend.
    ///
    /// Returns once the session is either authenticated or cleared. Failures
    /// are logged, never returned.
    #[instrument(skip(self))]
    pub async fn restore(&self) {
        self.state().status = SessionStatus::Restoring;

        let credentials = self.inner.vault.restore();
        let user: Option<UserProfile> = storage::load(self.inner.store.as_ref(), keys::USER);

        match (credentials, user) {
            (Some(_), Some(user)) => {
                debug!(user_id = %user.id, "Verifying restored session");
                self.state().user = Some(UserState::Tentative(user));

                match self.inner.gateway.get_profile().await {
                    Ok(record) => self.establish(record.into()),
                    Err(e) => {
                        debug!(error = %e, "Restored credentials rejected, refreshing");
                        self.renew().await;
                    }
                }
            }
            (Some(_), None) => {
                debug!("Credentials without a user, refreshing");
                self.renew().await;
            }
            (None, Some(_)) => {
                debug!("Discarding user snapshot without credentials");
                storage::discard(self.inner.store.as_ref(), keys::USER);
                self.state().reset();
            }
            (None, None) => self.state().reset(),
        }

        // Restoring must not outlive restore().
        let mut state = self.state();
        if state.status == SessionStatus::Restoring {
            state.status = SessionStatus::Unauthenticated;
        }
        info!(status = ?state.status, "Session restored");
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is invalid or the backend rejects it.
    /// The failure is also reported through the notifier.
    #[instrument(skip(self, password))]
    pub async fn sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<UserProfile, SessionError> {
        let result = self.try_sign_in(email, password).await;
        self.report_auth_result(&result, "Welcome back");
        result
    }

    async fn try_sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<UserProfile, SessionError> {
        let email = Email::parse(email)?;
        if password.expose_secret().is_empty() {
            return Err(SessionError::EmptyPassword);
        }

        let payload = self.inner.gateway.sign_in(&email, password).await?;
        Ok(self.adopt(payload))
    }

    /// Create an account and sign into it.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is invalid or the backend rejects it.
    /// The failure is also reported through the notifier.
    #[instrument(skip(self, password))]
    pub async fn sign_up(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &SecretString,
    ) -> Result<UserProfile, SessionError> {
        let result = self
            .try_sign_up(first_name, last_name, email, password)
            .await;
        self.report_auth_result(&result, "Welcome");
        result
    }

    async fn try_sign_up(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &SecretString,
    ) -> Result<UserProfile, SessionError> {
        let first_name = first_name.trim();
        if first_name.is_empty() {
            return Err(SessionError::MissingField("First name"));
        }
        let email = Email::parse(email)?;
        if password.expose_secret().is_empty() {
            return Err(SessionError::EmptyPassword);
        }

        let registration = Registration {
            first_name: first_name.to_string(),
            last_name: last_name.trim().to_string(),
            email,
            password: password.clone(),
        };
        let payload = self.inner.gateway.sign_up(&registration).await?;
        Ok(self.adopt(payload))
    }

    /// Sign out, forgetting all persisted session state.
    pub fn sign_out(&self) {
        self.clear();
        info!("Signed out");
        self.notify(Notification::success("Signed out"));
    }

    /// Tear the session down after the backend rejected its credentials.
    pub fn expire(&self) {
        self.clear();
        info!("Session expired");
        self.notify(Notification::error(
            "Your session has expired. Please sign in again.",
        ));
    }

    /// Make sure the session is still valid, refreshing the access token if
    /// needed.
    ///
    /// Calls within the refresh debounce window of the previous attempt do
    /// nothing and report the current status. Concurrent calls wait for the
    /// running one. Returns whether a verified user is signed in afterwards.
    #[instrument(skip(self))]
    pub async fn refresh_token(&self) -> bool {
        let mut last_attempt = self.inner.refresh_gate.lock().await;

        let now = Instant::now();
        if let Some(previous) = *last_attempt
            && now.duration_since(previous) < self.inner.config.refresh_debounce
        {
            debug!("Refresh attempted recently, skipping");
            return self.is_authenticated();
        }
        *last_attempt = Some(now);
        self.state().last_refresh_attempt = Some(Utc::now());

        let access_usable = self
            .inner
            .vault
            .current()
            .is_some_and(|credentials| !credentials.is_likely_expired(self.inner.config.access_token_ttl));

        if access_usable {
            match self.inner.gateway.get_profile().await {
                Ok(record) => {
                    self.establish(record.into());
                    return true;
                }
                Err(e) => debug!(error = %e, "Access token rejected, refreshing"),
            }
        }

        self.renew().await && self.is_authenticated()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Renewal tick: refresh under the gate, ignoring the debounce.
    pub(crate) async fn renew_on_schedule(&self) -> bool {
        let mut last_attempt = self.inner.refresh_gate.lock().await;
        *last_attempt = Some(Instant::now());
        self.state().last_refresh_attempt = Some(Utc::now());
        self.renew().await
    }

    /// Exchange the refresh token and re-fetch the profile.
    ///
    /// Returns `false`, with the session cleared, when the refresh fails. A
    /// profile failure after a successful refresh is tolerated when a user is
    /// already known; with no user to vouch for, the session is cleared too.
    async fn renew(&self) -> bool {
        let Some(refresh) = self.inner.vault.refresh_token() else {
            debug!("No refresh token, clearing session");
            self.clear();
            return false;
        };

        let payload = match self.inner.gateway.refresh(&refresh).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Credential refresh failed, clearing session");
                self.clear();
                return false;
            }
        };

        if !self.inner.vault.set_access(payload.access, payload.refresh) {
            debug!("Session cleared during refresh");
            return false;
        }

        match self.inner.gateway.get_profile().await {
            Ok(record) => self.establish(record.into()),
            Err(e) => {
                if !self.promote_tentative() {
                    warn!(error = %e, "Profile fetch failed after refresh with no known user, clearing session");
                    self.clear();
                    return false;
                }
                warn!(error = %e, "Profile fetch failed after refresh");
            }
        }
        true
    }

    /// Store fresh credentials and the user they belong to.
    fn adopt(&self, payload: AuthPayload) -> UserProfile {
        self.inner
            .vault
            .replace(Credentials::issued_now(payload.access, payload.refresh));
        let profile = UserProfile::from(payload.user);
        self.establish(profile.clone());
        profile
    }

    /// Mark `profile` as the verified user and start renewal.
    fn establish(&self, profile: UserProfile) {
        if let Err(e) = storage::save(self.inner.store.as_ref(), keys::USER, &profile) {
            warn!(error = %e, "Failed to persist user");
        }

        let id = profile.id;
        {
            let mut state = self.state();
            state.user = Some(UserState::Verified(profile));
            state.status = SessionStatus::Authenticated;
        }

        self.publish(Some(id));
        self.ensure_renewal();
    }

    /// A successful refresh confirms a restored user even without a profile.
    /// Returns `false` when there is no user to confirm.
    fn promote_tentative(&self) -> bool {
        let promoted = {
            let mut state = self.state();
            match state.user.take() {
                Some(UserState::Tentative(profile) | UserState::Verified(profile)) => {
                    let id = profile.id;
                    state.user = Some(UserState::Verified(profile));
                    state.status = SessionStatus::Authenticated;
                    Some(id)
                }
                None => None,
            }
        };

        let Some(id) = promoted else {
            return false;
        };
        self.publish(Some(id));
        self.ensure_renewal();
        true
    }

    /// Forget everything: credentials, persisted user, renewal.
    fn clear(&self) {
        self.inner.vault.clear();
        storage::discard(self.inner.store.as_ref(), keys::USER);
        self.state().reset();

        if let Some(handle) = self.renewal().take() {
            handle.abort();
        }
        self.publish(None);
    }

    fn ensure_renewal(&self) {
        let mut renewal = self.renewal();
        if renewal.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *renewal = Some(renewal::spawn_renewal(
            Arc::downgrade(&self.inner),
            self.inner.config.renewal_interval,
        ));
    }

    fn publish(&self, id: Option<UserId>) {
        self.inner.identity.send_if_modified(|current| {
            if *current == id {
                false
            } else {
                *current = id;
                true
            }
        });
    }

    fn report_auth_result(&self, result: &Result<UserProfile, SessionError>, greeting: &str) {
        match result {
            Ok(profile) => {
                info!(user_id = %profile.id, "Signed in");
                self.notify(Notification::success(format!("{greeting}, {}!", profile.name)));
            }
            Err(e) => {
                debug!(error = %e, "Authentication failed");
                self.notify(Notification::error(e.user_message()));
            }
        }
    }

    fn notify(&self, notification: Notification) {
        self.inner.notifier.notify(notification);
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn renewal(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner
            .renewal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<G> std::fmt::Debug for SessionManager<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SessionManager")
            .field("status", &state.status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests;
