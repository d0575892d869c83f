//! Background credential renewal.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::{SessionInner, SessionManager};
use crate::gateway::RemoteGateway;

/// Spawn a task that renews the session's credentials every `period`.
///
/// The task holds only a weak reference; it exits once the session is
/// dropped or a renewal fails (which clears the session).
pub(super) fn spawn_renewal<G: RemoteGateway>(
    session: Weak<SessionInner<G>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let Some(inner) = session.upgrade() else {
                tracing::debug!("Session dropped, stopping renewal");
                break;
            };
            let manager = SessionManager { inner };

            if !manager.renew_on_schedule().await {
                tracing::info!("Scheduled renewal failed, stopping renewal");
                break;
            }
        }
    })
}
