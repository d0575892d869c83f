use std::sync::Arc;
use std::time::Duration;

use cartwheel_core::{UserId, UserProfile};
use secrecy::SecretString;
use tokio::sync::mpsc::UnboundedReceiver;

use super::*;
use crate::gateway::fake::{Call, Failure, FakeGateway, Op, user_record};
use crate::notify::{ChannelNotifier, NotificationLevel};
use crate::storage::{LocalStore, MemoryStore};

struct Harness {
    session: SessionManager<FakeGateway>,
    gateway: FakeGateway,
    store: Arc<MemoryStore>,
    notifications: UnboundedReceiver<Notification>,
}

impl Harness {
    fn new(gateway: FakeGateway) -> Self {
        let store = MemoryStore::shared();
        let (notifier, notifications) = ChannelNotifier::new();
        let session = SessionManager::new(
            gateway.clone(),
            CredentialVault::new(store.clone()),
            store.clone(),
            Arc::new(notifier),
            SessionConfig::default(),
        );
        Self {
            session,
            gateway,
            store,
            notifications,
        }
    }

    fn seed_credentials(&self, credentials: &Credentials) {
        storage::save(self.store.as_ref(), keys::CREDENTIALS, credentials).unwrap();
    }

    fn seed_user(&self, id: i64, email: &str) {
        let profile = UserProfile::from(user_record(id, email));
        storage::save(self.store.as_ref(), keys::USER, &profile).unwrap();
    }

    fn notifications(&mut self) -> Vec<Notification> {
        let mut drained = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            drained.push(notification);
        }
        drained
    }
}

fn password(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}

// =============================================================================
// Restore
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_restore_without_state_is_unauthenticated() {
    let h = Harness::new(FakeGateway::with_user());
    assert!(h.session.is_loading());

    h.session.restore().await;

    assert!(!h.session.is_loading());
    assert!(!h.session.is_authenticated());
    assert_eq!(h.session.snapshot().status, SessionStatus::Unauthenticated);
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restore_verifies_persisted_user() {
    let h = Harness::new(FakeGateway::with_user());
    h.seed_credentials(&Credentials::issued_now("a1", "r1"));
    h.seed_user(1, "jane@example.com");
    let identity = h.session.subscribe();

    h.session.restore().await;

    let snapshot = h.session.snapshot();
    assert!(snapshot.is_authenticated());
    assert!(snapshot.user.as_ref().unwrap().is_verified());
    assert_eq!(*identity.borrow(), Some(UserId::new(1)));
    assert_eq!(h.gateway.calls(), vec![Call::GetProfile]);
    assert!(h.session.is_renewing());
}

#[tokio::test(start_paused = true)]
async fn test_restore_with_expired_access_refreshes_then_refetches_profile() {
    let gateway = FakeGateway::with_user();
    let mut renamed = user_record(1, "jane@example.com");
    renamed.name = Some("Jane Q. Doe".to_string());
    gateway.set_user(Some(renamed));
    gateway.fail(Op::GetProfile, Failure::Unauthorized);

    let h = Harness::new(gateway);
    h.seed_credentials(&Credentials::issued_now("a1", "r1"));
    h.seed_user(1, "jane@example.com");

    h.session.restore().await;

    assert!(h.session.is_authenticated());
    assert_eq!(h.session.user().unwrap().name, "Jane Q. Doe");
    assert_eq!(
        h.gateway.calls(),
        vec![Call::GetProfile, Call::Refresh("r1".to_string()), Call::GetProfile]
    );
    let credentials = h.session.vault().current().unwrap();
    assert_eq!(credentials.access, "access-1");
    assert_eq!(credentials.refresh, "r1");

    let persisted: UserProfile = storage::load(h.store.as_ref(), keys::USER).unwrap();
    assert_eq!(persisted.name, "Jane Q. Doe");
}

#[tokio::test(start_paused = true)]
async fn test_restore_with_failed_refresh_clears_everything() {
    let gateway = FakeGateway::with_user();
    gateway.fail(Op::GetProfile, Failure::Unauthorized);
    gateway.fail(Op::Refresh, Failure::Unauthorized);

    let h = Harness::new(gateway);
    h.seed_credentials(&Credentials::issued_now("a1", "r1"));
    h.seed_user(1, "jane@example.com");

    h.session.restore().await;

    assert_eq!(h.session.snapshot().status, SessionStatus::Unauthenticated);
    assert!(h.session.user().is_none());
    assert!(h.session.vault().current().is_none());
    assert_eq!(h.store.read(keys::CREDENTIALS).unwrap(), None);
    assert_eq!(h.store.read(keys::USER).unwrap(), None);
    assert!(!h.session.is_renewing());
}

#[tokio::test(start_paused = true)]
async fn test_restore_credentials_only_refreshes() {
    let h = Harness::new(FakeGateway::with_user());
    h.seed_credentials(&Credentials::issued_now("a1", "r1"));

    h.session.restore().await;

    assert!(h.session.is_authenticated());
    assert_eq!(
        h.gateway.calls(),
        vec![Call::Refresh("r1".to_string()), Call::GetProfile]
    );
}

#[tokio::test(start_paused = true)]
async fn test_restore_refresh_without_profile_keeps_tentative_user_verified() {
    let gateway = FakeGateway::with_user();
    gateway.fail_times(Op::GetProfile, Failure::Server, 2);

    let h = Harness::new(gateway);
    h.seed_credentials(&Credentials::issued_now("a1", "r1"));
    h.seed_user(1, "jane@example.com");

    h.session.restore().await;

    assert!(h.session.is_authenticated());
    assert_eq!(h.session.user().unwrap().id, UserId::new(1));
}

#[tokio::test(start_paused = true)]
async fn test_restore_credentials_only_with_failed_profile_clears_session() {
    let gateway = FakeGateway::with_user();
    gateway.fail_times(Op::GetProfile, Failure::Server, 1);

    let h = Harness::new(gateway);
    h.seed_credentials(&Credentials::issued_now("a1", "r1"));
    let identity = h.session.subscribe();

    h.session.restore().await;

    assert_eq!(
        h.gateway.calls(),
        vec![Call::Refresh("r1".to_string()), Call::GetProfile]
    );
    assert_eq!(h.session.snapshot().status, SessionStatus::Unauthenticated);
    assert!(h.session.user().is_none());
    assert!(h.session.vault().current().is_none());
    assert_eq!(h.store.read(keys::CREDENTIALS).unwrap(), None);
    assert!(!h.session.is_renewing());
    assert_eq!(*identity.borrow(), None);
}

#[tokio::test(start_paused = true)]
async fn test_restore_discards_user_without_credentials() {
    let h = Harness::new(FakeGateway::with_user());
    h.seed_user(1, "jane@example.com");

    h.session.restore().await;

    assert!(!h.session.is_authenticated());
    assert_eq!(h.store.read(keys::USER).unwrap(), None);
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restored_user_is_tentative_until_verified() {
    let gateway = FakeGateway::with_user();
    gateway.set_latency(Duration::from_millis(100));

    let h = Harness::new(gateway);
    h.seed_credentials(&Credentials::issued_now("a1", "r1"));
    h.seed_user(1, "jane@example.com");
    let identity = h.session.subscribe();

    let session = h.session.clone();
    let restoring = tokio::spawn(async move { session.restore().await });
    for _ in 0..3 {
        tokio::task::yield_now().await;
    }

    let snapshot = h.session.snapshot();
    assert!(snapshot.is_loading());
    assert!(matches!(snapshot.user, Some(UserState::Tentative(_))));
    assert_eq!(*identity.borrow(), None);

    restoring.await.unwrap();
    assert!(h.session.is_authenticated());
    assert_eq!(*identity.borrow(), Some(UserId::new(1)));
}

// =============================================================================
// Sign in / sign up / sign out
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_sign_in_persists_and_notifies() {
    let mut h = Harness::new(FakeGateway::with_user());
    h.session.restore().await;

    let profile = h
        .session
        .sign_in("jane@example.com", &password("hunter2"))
        .await
        .unwrap();

    assert_eq!(profile.name, "Jane Doe");
    assert!(h.session.is_authenticated());
    assert!(h.session.is_renewing());

    let credentials: Credentials = storage::load(h.store.as_ref(), keys::CREDENTIALS).unwrap();
    assert_eq!(credentials.access, "access-1");
    assert!(credentials.obtained_at.is_some());
    let persisted: UserProfile = storage::load(h.store.as_ref(), keys::USER).unwrap();
    assert_eq!(persisted, profile);

    let notifications = h.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Success);
    assert_eq!(notifications[0].message, "Welcome back, Jane Doe!");
}

#[tokio::test(start_paused = true)]
async fn test_sign_in_validates_input_locally() {
    let mut h = Harness::new(FakeGateway::with_user());

    let err = h.session.sign_in("not-an-email", &password("x")).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidEmail(_)));

    let err = h.session.sign_in("jane@example.com", &password("")).await.unwrap_err();
    assert!(matches!(err, SessionError::EmptyPassword));

    assert!(h.gateway.calls().is_empty());
    assert_eq!(h.notifications().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sign_in_rejected_by_backend() {
    let mut h = Harness::new(FakeGateway::with_user());

    let err = h
        .session
        .sign_in("jane@example.com", &password("wrong"))
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Gateway(GatewayError::Validation { .. })));
    assert!(!h.session.is_authenticated());
    assert!(h.session.vault().current().is_none());

    let notifications = h.notifications();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].level, NotificationLevel::Error);
    assert_eq!(
        notifications[0].message,
        "No active account found with the given credentials"
    );
}

#[tokio::test(start_paused = true)]
async fn test_sign_up_normalizes_name() {
    let h = Harness::new(FakeGateway::new());

    let profile = h
        .session
        .sign_up(" Ada ", "Lovelace", "ada@example.com", &password("engine"))
        .await
        .unwrap();

    assert_eq!(profile.name, "Ada Lovelace");
    assert_eq!(profile.id, UserId::new(2));
    assert!(h.session.is_authenticated());
    assert_eq!(h.gateway.calls(), vec![Call::SignUp("ada@example.com".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_sign_up_requires_first_name() {
    let h = Harness::new(FakeGateway::new());
    let err = h
        .session
        .sign_up("  ", "Lovelace", "ada@example.com", &password("engine"))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::MissingField("First name")));
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_clears_everything() {
    let mut h = Harness::new(FakeGateway::with_user());
    h.session
        .sign_in("jane@example.com", &password("hunter2"))
        .await
        .unwrap();
    let identity = h.session.subscribe();
    h.notifications();

    h.session.sign_out();

    assert!(!h.session.is_authenticated());
    assert!(h.session.user().is_none());
    assert!(!h.session.is_renewing());
    assert_eq!(*identity.borrow(), None);
    assert_eq!(h.store.read(keys::CREDENTIALS).unwrap(), None);
    assert_eq!(h.store.read(keys::USER).unwrap(), None);
    assert_eq!(h.notifications(), vec![Notification::success("Signed out")]);
}

#[tokio::test(start_paused = true)]
async fn test_expire_notifies_session_expired() {
    let mut h = Harness::new(FakeGateway::with_user());
    h.session
        .sign_in("jane@example.com", &password("hunter2"))
        .await
        .unwrap();
    h.notifications();

    h.session.expire();

    assert!(!h.session.is_authenticated());
    let notifications = h.notifications();
    assert_eq!(notifications.len(), 1);
    assert!(notifications[0].message.contains("expired"));
}

// =============================================================================
// Refresh
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_refresh_token_is_debounced() {
    let h = Harness::new(FakeGateway::with_user());
    h.session
        .sign_in("jane@example.com", &password("hunter2"))
        .await
        .unwrap();
    h.gateway.clear_calls();

    assert!(h.session.refresh_token().await);
    assert!(h.session.refresh_token().await);
    assert_eq!(h.gateway.calls(), vec![Call::GetProfile]);
    assert!(h.session.snapshot().last_refresh_attempt.is_some());

    tokio::time::advance(Duration::from_millis(2_001)).await;
    assert!(h.session.refresh_token().await);
    assert_eq!(h.gateway.count(Op::GetProfile), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_refreshes_run_one_sequence() {
    let h = Harness::new(FakeGateway::with_user());
    h.session
        .sign_in("jane@example.com", &password("hunter2"))
        .await
        .unwrap();
    h.gateway.clear_calls();
    h.gateway.set_latency(Duration::from_millis(300));

    let (first, second) = tokio::join!(h.session.refresh_token(), h.session.refresh_token());

    assert!(first && second);
    assert_eq!(h.gateway.calls(), vec![Call::GetProfile]);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_token_with_stale_access_skips_verification() {
    let h = Harness::new(FakeGateway::with_user());
    h.seed_credentials(&Credentials {
        access: "a1".to_string(),
        refresh: "r1".to_string(),
        obtained_at: Some(Utc::now().timestamp() - 2 * 3600),
    });
    h.session.vault().restore();

    assert!(h.session.refresh_token().await);
    assert_eq!(
        h.gateway.calls(),
        vec![Call::Refresh("r1".to_string()), Call::GetProfile]
    );
}

#[tokio::test(start_paused = true)]
async fn test_refresh_token_falls_back_to_refresh_path() {
    let h = Harness::new(FakeGateway::with_user());
    h.session
        .sign_in("jane@example.com", &password("hunter2"))
        .await
        .unwrap();
    h.gateway.clear_calls();
    h.gateway.fail(Op::GetProfile, Failure::Unauthorized);

    assert!(h.session.refresh_token().await);
    assert_eq!(
        h.gateway.calls(),
        vec![
            Call::GetProfile,
            Call::Refresh("refresh-1".to_string()),
            Call::GetProfile
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_refresh_token_without_credentials_fails() {
    let h = Harness::new(FakeGateway::with_user());
    assert!(!h.session.refresh_token().await);
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_identity_publishes_only_user_changes() {
    let h = Harness::new(FakeGateway::with_user());
    let mut identity = h.session.subscribe();

    h.session
        .sign_in("jane@example.com", &password("hunter2"))
        .await
        .unwrap();
    assert!(identity.has_changed().unwrap());
    assert_eq!(*identity.borrow_and_update(), Some(UserId::new(1)));

    assert!(h.session.refresh_token().await);
    assert!(!identity.has_changed().unwrap());
}

// =============================================================================
// Renewal
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_renewal_refreshes_on_interval() {
    let h = Harness::new(FakeGateway::with_user());
    h.session
        .sign_in("jane@example.com", &password("hunter2"))
        .await
        .unwrap();
    h.gateway.clear_calls();

    tokio::time::sleep(Duration::from_secs(25 * 60) + Duration::from_millis(10)).await;

    assert_eq!(
        h.gateway.calls(),
        vec![Call::Refresh("refresh-1".to_string()), Call::GetProfile]
    );
    assert_eq!(h.session.vault().access_token().as_deref(), Some("access-2"));
    assert!(h.session.is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn test_failed_renewal_clears_session() {
    let h = Harness::new(FakeGateway::with_user());
    h.session
        .sign_in("jane@example.com", &password("hunter2"))
        .await
        .unwrap();
    h.gateway.fail(Op::Refresh, Failure::Unauthorized);

    tokio::time::sleep(Duration::from_secs(25 * 60) + Duration::from_millis(10)).await;

    assert!(!h.session.is_authenticated());
    assert!(h.session.vault().current().is_none());
    assert!(!h.session.is_renewing());
}

#[tokio::test(start_paused = true)]
async fn test_renewal_stops_when_session_dropped() {
    let gateway = FakeGateway::with_user();
    let h = Harness::new(gateway.clone());
    h.session
        .sign_in("jane@example.com", &password("hunter2"))
        .await
        .unwrap();
    gateway.clear_calls();

    drop(h);
    tokio::time::sleep(Duration::from_secs(60 * 60)).await;

    assert!(gateway.calls().is_empty());
}
