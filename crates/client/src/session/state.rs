//! In-memory session state.

use cartwheel_core::UserProfile;
use chrono::{DateTime, Utc};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// Nothing has been restored yet.
    #[default]
    Uninitialized,
    /// Persisted state is being verified against the backend.
    Restoring,
    /// A verified user is signed in.
    Authenticated,
    /// No user is signed in.
    Unauthenticated,
}

/// The signed-in user and how much we trust it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserState {
    /// Restored from local storage, not yet confirmed by the backend.
    Tentative(UserProfile),
    /// Confirmed by the backend during this process.
    Verified(UserProfile),
}

impl UserState {
    #[must_use]
    pub const fn profile(&self) -> &UserProfile {
        match self {
            Self::Tentative(profile) | Self::Verified(profile) => profile,
        }
    }

    #[must_use]
    pub const fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }
}

#[derive(Debug, Default)]
pub(super) struct SessionState {
    pub status: SessionStatus,
    pub user: Option<UserState>,
    pub last_refresh_attempt: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Drop everything but the refresh bookkeeping.
    pub fn reset(&mut self) {
        self.status = SessionStatus::Unauthenticated;
        self.user = None;
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub user: Option<UserState>,
    pub last_refresh_attempt: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    /// The user's profile, tentative or verified.
    #[must_use]
    pub fn profile(&self) -> Option<&UserProfile> {
        self.user.as_ref().map(UserState::profile)
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self.status, SessionStatus::Uninitialized | SessionStatus::Restoring)
    }
}

impl From<&SessionState> for SessionSnapshot {
    fn from(state: &SessionState) -> Self {
        Self {
            status: state.status,
            user: state.user.clone(),
            last_refresh_attempt: state.last_refresh_attempt,
        }
    }
}
