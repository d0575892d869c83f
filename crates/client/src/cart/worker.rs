//! Background task keeping the backend cart in line with the local one.
//!
//! The worker is the only code that talks to the backend about the cart. It
//! reacts to three inputs, in priority order:
//!
//! 1. identity changes from the session (adopt or drop the account cart)
//! 2. commands from the [`CartSynchronizer`](super::CartSynchronizer) handle
//! 3. the debounce deadline, after which local edits are reconciled
//!
//! Reconciliation runs inline, so at most one sync round is in flight and
//! edits made meanwhile are picked up by the next round.
//!
//! Switching carts on an identity change replays the journaled edits made
//! under the new identity on top of the cart it installs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use cartwheel_core::{ProductId, UserId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, instrument, warn};

use super::diff::{LineChange, diff};
use super::model::Cart;
use super::CartShared;
use crate::config::{CartConfig, LoginCartPolicy};
use crate::gateway::{GatewayError, RemoteGateway};
use crate::notify::Notification;
use crate::session::SessionManager;
use crate::storage::{self, keys};

/// Messages from the handle to the worker.
#[derive(Debug)]
pub(super) enum SyncCommand {
    /// Local items changed.
    Changed,
    /// Reconcile now and report back.
    Flush(oneshot::Sender<()>),
}

/// Why a reconciliation round stopped early.
enum Abort {
    /// The session was expired; the identity change will reset the cart.
    Expired,
}

pub(super) struct SyncWorker<G> {
    gateway: G,
    session: SessionManager<G>,
    shared: Arc<CartShared>,
    commands: mpsc::UnboundedReceiver<SyncCommand>,
    identity: watch::Receiver<Option<UserId>>,
    config: CartConfig,
    /// Identity whose backend cart the local items track.
    user: Option<UserId>,
    /// Set until the account cart has been adopted.
    initial_load: bool,
    deadline: Option<Instant>,
}

impl<G: RemoteGateway> SyncWorker<G> {
    pub(super) fn new(
        gateway: G,
        session: SessionManager<G>,
        shared: Arc<CartShared>,
        commands: mpsc::UnboundedReceiver<SyncCommand>,
        config: CartConfig,
    ) -> Self {
        let identity = session.subscribe();
        Self {
            gateway,
            session,
            shared,
            commands,
            identity,
            config,
            user: None,
            initial_load: true,
            deadline: None,
        }
    }

    pub(super) async fn run(mut self) {
        let current = *self.identity.borrow_and_update();
        self.on_identity(current).await;

        let mut identity_open = true;
        loop {
            let deadline = self.deadline;

            tokio::select! {
                biased;

                changed = self.identity.changed(), if identity_open => {
                    if changed.is_err() {
                        debug!("Session dropped, cart stays in its current mode");
                        identity_open = false;
                        continue;
                    }
                    let current = *self.identity.borrow_and_update();
                    self.on_identity(current).await;
                }

                command = self.commands.recv() => match command {
                    Some(SyncCommand::Changed) => self.on_changed(),
                    Some(SyncCommand::Flush(done)) => {
                        self.deadline = None;
                        self.reconcile().await;
                        let _ = done.send(());
                    }
                    None => break,
                },

                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.deadline = None;
                    self.reconcile().await;
                }
            }
        }

        debug!("Cart sync worker stopped");
    }

    fn on_changed(&mut self) {
        if self.user.is_none() || self.initial_load {
            return;
        }
        self.deadline = Some(Instant::now() + self.config.sync_debounce);
    }

    async fn on_identity(&mut self, identity: Option<UserId>) {
        // An account whose cart was never adopted is left and entered again.
        if identity == self.user && (identity.is_none() || !self.initial_load) {
            self.shared.lock_journal().keep_only(identity);
            return;
        }
        if self.user.is_some() {
            self.leave_account(identity);
        }
        if let Some(user) = identity {
            self.enter_account(user).await;
        }
    }

    /// Drop everything tied to the previous account. Edits already made as a
    /// guest are kept; edits made under `next` wait for its cart.
    fn leave_account(&mut self, next: Option<UserId>) {
        info!(user_id = ?self.user, "Leaving account cart");
        self.user = None;
        self.initial_load = true;
        self.deadline = None;

        let guest = {
            let mut cart = self.shared.lock_cart();
            let mut journal = self.shared.lock_journal();
            journal.keep_only(next);
            journal.owner = None;
            cart.clear();
            if next.is_none() {
                for edit in journal.take(None) {
                    edit.apply_to(&mut cart);
                }
            }
            cart.clone()
        };
        self.shared.lock_synced().clear();

        if guest.is_empty() {
            storage::discard(self.shared.store.as_ref(), keys::CART);
        } else {
            debug!(lines = guest.lines().len(), "Kept guest edits made after sign-out");
            self.shared.persist(&guest);
        }
    }

    /// Adopt the backend cart of a newly verified user.
    #[instrument(skip(self))]
    async fn enter_account(&mut self, user: UserId) {
        self.user = Some(user);
        self.initial_load = true;
        self.deadline = None;

        if self.config.login_policy == LoginCartPolicy::MergeGuest
            && matches!(self.push_guest_lines(user).await, Err(Abort::Expired))
        {
            return;
        }

        let result = self.gateway.get_cart().await;

        // Signed out (or switched accounts) while the fetch was in flight.
        if *self.identity.borrow() != Some(user) {
            debug!("Identity changed during cart fetch, discarding result");
            return;
        }

        match result {
            Ok(lines) => {
                let mut adopted = Cart::from_remote(lines);
                let synced = adopted.quantities();
                info!(lines = adopted.lines().len(), "Adopted backend cart");

                let replayed = {
                    let mut cart = self.shared.lock_cart();
                    let mut journal = self.shared.lock_journal();
                    let edits = journal.take(Some(user));
                    for edit in &edits {
                        edit.apply_to(&mut adopted);
                    }
                    journal.owner = Some(user);
                    *cart = adopted.clone();
                    edits.len()
                };
                *self.shared.lock_synced() = synced;

                if replayed == 0 {
                    storage::discard(self.shared.store.as_ref(), keys::CART);
                } else {
                    debug!(edits = replayed, "Replayed edits made while the cart was loading");
                    self.shared.persist(&adopted);
                    self.deadline = Some(Instant::now() + self.config.sync_debounce);
                }
            }
            Err(e) if e.is_unauthorized() => {
                warn!(error = %e, "Cart fetch unauthorized, expiring session");
                self.session.expire();
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch backend cart, keeping local items");
                {
                    // The local lines already carry every journaled edit.
                    let _cart = self.shared.lock_cart();
                    let mut journal = self.shared.lock_journal();
                    journal.take(Some(user));
                    journal.owner = Some(user);
                }
                self.shared.lock_synced().clear();
                self.shared.notify(Notification::error(format!(
                    "Could not load your saved cart: {}",
                    e.user_message()
                )));
            }
        }

        self.initial_load = false;
    }

    /// Push local guest lines into the account cart before adopting it.
    async fn push_guest_lines(&self, user: UserId) -> Result<(), Abort> {
        let guest: Vec<(ProductId, u32)> = {
            let cart = self.shared.lock_cart();
            // Edits so far are part of the pushed lines; only later ones replay.
            self.shared.lock_journal().take(Some(user));
            cart.quantities().into_iter().collect()
        };
        if guest.is_empty() {
            return Ok(());
        }

        debug!(lines = guest.len(), "Merging guest cart into account cart");
        let mut first_error: Option<GatewayError> = None;
        for (id, quantity) in guest {
            if let Err(e) = self.gateway.add_line(id, quantity).await {
                if e.is_unauthorized() {
                    self.session.expire();
                    return Err(Abort::Expired);
                }
                warn!(product_id = %id, error = %e, "Failed to merge guest line");
                first_error.get_or_insert(e);
            }
        }

        if let Some(e) = first_error {
            self.shared.notify(Notification::error(format!(
                "Some items could not be added to your cart: {}",
                e.user_message()
            )));
        }
        Ok(())
    }

    /// Send the difference between the last synced state and the local items.
    async fn reconcile(&mut self) {
        if self.user.is_none() || self.initial_load {
            return;
        }

        let current = self.shared.lock_cart().quantities();
        let synced: BTreeMap<ProductId, u32> = self.shared.lock_synced().clone();
        let changes = diff(&synced, &current);
        if changes.is_empty() {
            debug!("Cart already in sync");
            return;
        }

        debug!(changes = changes.len(), "Reconciling cart");
        self.shared.syncing.store(true, Ordering::SeqCst);
        let outcome = self.apply(&changes).await;
        self.shared.syncing.store(false, Ordering::SeqCst);

        match outcome {
            Ok(None) => {
                *self.shared.lock_synced() = current;
            }
            Ok(Some(e)) => {
                *self.shared.lock_synced() = current;
                self.shared.notify(Notification::error(format!(
                    "Failed to sync your cart: {}",
                    e.user_message()
                )));
            }
            Err(Abort::Expired) => {}
        }
    }

    /// Run every change, returning the first non-fatal failure.
    async fn apply(&self, changes: &[LineChange]) -> Result<Option<GatewayError>, Abort> {
        let mut first_error = None;

        for &change in changes {
            let result = match change {
                LineChange::Remove(id) => self.gateway.remove_line(id).await,
                LineChange::Add(id, quantity) => self.gateway.add_line(id, quantity).await,
                LineChange::Update(id, quantity) => self.gateway.update_line(id, quantity).await,
            };

            if let Err(e) = result {
                if e.is_unauthorized() {
                    warn!(error = %e, "Cart sync unauthorized, expiring session");
                    self.session.expire();
                    return Err(Abort::Expired);
                }
                warn!(change = ?change, error = %e, "Cart sync call failed");
                first_error.get_or_insert(e);
            }
        }

        Ok(first_error)
    }
}
