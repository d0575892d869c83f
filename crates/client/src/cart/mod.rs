//! Shopping cart state and backend synchronization.
//!
//! [`CartSynchronizer`] owns the cart lines. Edits are applied and persisted
//! synchronously; while a verified user is signed in they are also pushed to
//! the backend as incremental add/remove/update calls once edits have been
//! quiet for the configured debounce period.
//!
//! # Modes
//!
//! - **Guest** - lines live only in local storage.
//! - **Account** - on sign-in the backend cart is adopted (see
//!   [`LoginCartPolicy`](crate::config::LoginCartPolicy)); on sign-out the
//!   cart is emptied.
//!
//! Edits made after an identity change but before the worker has caught up
//! with it are journaled and applied again on top of the cart the worker
//! installs, so they are never lost to the mode switch.

mod diff;
mod model;
mod worker;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cartwheel_core::{Price, ProductId, ProductSnapshot, UserId};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

pub use diff::{LineChange, diff};
pub use model::{AddOutcome, Cart, CartLine};
use model::CartEdit;

use crate::config::CartConfig;
use crate::gateway::RemoteGateway;
use crate::notify::{Notification, SharedNotifier};
use crate::session::SessionManager;
use crate::storage::{self, SharedStore, keys};
use worker::{SyncCommand, SyncWorker};

/// State shared between the handle and the sync worker.
///
/// Lock order: `cart` before `journal`.
struct CartShared {
    cart: Mutex<Cart>,
    journal: Mutex<Journal>,
    /// What the backend is believed to hold. Written only by the worker.
    synced: Mutex<BTreeMap<ProductId, u32>>,
    syncing: AtomicBool,
    store: SharedStore,
    notifier: SharedNotifier,
}

impl CartShared {
    fn lock_cart(&self) -> MutexGuard<'_, Cart> {
        self.cart.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_journal(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_synced(&self) -> MutexGuard<'_, BTreeMap<ProductId, u32>> {
        self.synced.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, notification: Notification) {
        self.notifier.notify(notification);
    }

    fn persist(&self, cart: &Cart) {
        if let Err(e) = storage::save(self.store.as_ref(), keys::CART, cart) {
            tracing::warn!(error = %e, "Failed to persist cart");
        }
    }
}

/// Edits waiting for the worker to switch the cart to their identity.
#[derive(Debug, Default)]
struct Journal {
    /// Identity the local lines belong to (`None` for the guest cart).
    owner: Option<UserId>,
    edits: Vec<(Option<UserId>, CartEdit)>,
}

impl Journal {
    /// Keep `edit` if it was made under an identity the lines don't belong to yet.
    fn record(&mut self, identity: Option<UserId>, edit: CartEdit) {
        if identity != self.owner {
            self.edits.push((identity, edit));
        }
    }

    /// Remove and return the edits made under `identity`.
    fn take(&mut self, identity: Option<UserId>) -> Vec<CartEdit> {
        let (taken, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.edits)
            .into_iter()
            .partition(|(made_under, _)| *made_under == identity);
        self.edits = rest;
        taken.into_iter().map(|(_, edit)| edit).collect()
    }

    /// Drop every edit not made under `identity`.
    fn keep_only(&mut self, identity: Option<UserId>) {
        self.edits.retain(|(made_under, _)| *made_under == identity);
    }
}

/// Cart handle.
///
/// Dropping the handle stops background synchronization.
pub struct CartSynchronizer {
    shared: Arc<CartShared>,
    commands: mpsc::UnboundedSender<SyncCommand>,
    identity: watch::Receiver<Option<UserId>>,
    worker: JoinHandle<()>,
}

impl CartSynchronizer {
    /// Load the persisted cart and start the sync worker.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn<G: RemoteGateway>(
        gateway: G,
        session: SessionManager<G>,
        store: SharedStore,
        notifier: SharedNotifier,
        config: CartConfig,
    ) -> Self {
        let cart: Cart = storage::load(store.as_ref(), keys::CART).unwrap_or_default();
        tracing::debug!(lines = cart.lines().len(), "Loaded persisted cart");

        let shared = Arc::new(CartShared {
            cart: Mutex::new(cart),
            journal: Mutex::new(Journal::default()),
            synced: Mutex::new(BTreeMap::new()),
            syncing: AtomicBool::new(false),
            store,
            notifier,
        });

        let identity = session.subscribe();
        let (commands, rx) = mpsc::unbounded_channel();
        let worker = SyncWorker::new(gateway, session, Arc::clone(&shared), rx, config);
        let worker = tokio::spawn(worker.run());

        Self {
            shared,
            commands,
            identity,
            worker,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current lines, in insertion order.
    #[must_use]
    pub fn items(&self) -> Vec<CartLine> {
        self.shared.lock_cart().lines().to_vec()
    }

    /// A copy of the whole cart.
    #[must_use]
    pub fn cart(&self) -> Cart {
        self.shared.lock_cart().clone()
    }

    /// Sum of quantities.
    #[must_use]
    pub fn total_items(&self) -> u32 {
        self.shared.lock_cart().total_items()
    }

    /// Sum of line subtotals.
    #[must_use]
    pub fn total_price(&self) -> Price {
        self.shared.lock_cart().total_price()
    }

    /// What the backend is believed to hold.
    #[must_use]
    pub fn synced_snapshot(&self) -> BTreeMap<ProductId, u32> {
        self.shared.lock_synced().clone()
    }

    /// Whether a reconciliation round is running.
    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.shared.syncing.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add `quantity` units of `product`.
    pub fn add_item(&self, product: ProductSnapshot, quantity: u32) {
        let name = product.name.clone();
        let edit = CartEdit::Add(product.clone(), quantity);
        let outcome = self.mutate(edit, |cart| Some(cart.add(product, quantity)));

        let message = match outcome {
            Some(AddOutcome::Added) => format!("Added {name} to cart"),
            Some(AddOutcome::Incremented) | None => format!("Updated {name} quantity in cart"),
        };
        self.shared.notify(Notification::success(message));
    }

    /// Remove a product. Does nothing if it is not in the cart.
    pub fn remove_item(&self, id: ProductId) {
        if let Some(line) = self.mutate(CartEdit::Remove(id), |cart| cart.remove(id)) {
            self.shared.notify(Notification::info(format!(
                "Removed {} from cart",
                line.product.name
            )));
        }
    }

    /// Set a product's quantity. Zero or less removes the product.
    pub fn update_quantity(&self, id: ProductId, quantity: i64) {
        if quantity <= 0 {
            self.remove_item(id);
            return;
        }
        let quantity = u32::try_from(quantity).unwrap_or(u32::MAX);
        self.mutate(CartEdit::SetQuantity(id, quantity), |cart| {
            cart.set_quantity(id, quantity).then_some(())
        });
    }

    /// Empty the cart.
    pub fn clear_cart(&self) {
        self.mutate(CartEdit::Clear, |cart| {
            cart.clear();
            Some(())
        });
        self.shared.notify(Notification::info("Cart cleared"));
    }

    /// Reconcile with the backend now and wait for the round to finish.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(SyncCommand::Flush(done)).is_err() {
            return;
        }
        let _ = wait.await;
    }

    /// Wait until the worker has caught up with the current identity.
    ///
    /// After a sign-in or restore this returns once the account cart has been
    /// adopted, so edits made afterwards apply to the cart the user will see.
    pub async fn ready(&self) {
        self.flush().await;
    }

    /// Run `apply`; `None` means nothing changed. `edit` describes the same
    /// change for the journal.
    fn mutate<R>(&self, edit: CartEdit, apply: impl FnOnce(&mut Cart) -> Option<R>) -> Option<R> {
        let (result, snapshot) = {
            let mut cart = self.shared.lock_cart();
            let result = apply(&mut cart)?;
            let identity = *self.identity.borrow();
            self.shared.lock_journal().record(identity, edit);
            (result, cart.clone())
        };

        self.shared.persist(&snapshot);
        if self.commands.send(SyncCommand::Changed).is_err() {
            tracing::debug!("Cart sync worker stopped, change stays local");
        }
        Some(result)
    }
}

impl Drop for CartSynchronizer {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

impl std::fmt::Debug for CartSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartSynchronizer")
            .field("lines", &self.shared.lock_cart().lines().len())
            .field("syncing", &self.is_syncing())
            .finish_non_exhaustive()
    }
}
