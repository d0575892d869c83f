//! Process-wide client state.

use std::sync::Arc;

use crate::cart::CartSynchronizer;
use crate::config::ClientConfig;
use crate::credentials::CredentialVault;
use crate::error::ClientError;
use crate::gateway::HttpGateway;
use crate::notify::SharedNotifier;
use crate::session::SessionManager;
use crate::storage::{FileStore, SharedStore};

/// The services a front end needs, wired to one store and one backend.
///
/// This struct is cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct ClientState {
    inner: Arc<ClientStateInner>,
}

struct ClientStateInner {
    config: ClientConfig,
    store: SharedStore,
    gateway: HttpGateway,
    session: SessionManager<HttpGateway>,
    cart: CartSynchronizer,
}

impl ClientState {
    /// Create client state persisting to `config.state_dir`.
    ///
    /// Must be called from within a tokio runtime. The session is not
    /// restored; call `session().restore()` before first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory cannot be created or the
    /// HTTP client fails to build.
    pub fn new(config: ClientConfig, notifier: SharedNotifier) -> Result<Self, ClientError> {
        let store: SharedStore = Arc::new(FileStore::open(&config.state_dir)?);
        Self::with_store(config, store, notifier)
    }

    /// Create client state on top of an existing store.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client fails to build.
    pub fn with_store(
        config: ClientConfig,
        store: SharedStore,
        notifier: SharedNotifier,
    ) -> Result<Self, ClientError> {
        let vault = CredentialVault::new(Arc::clone(&store));
        let gateway = HttpGateway::from_config(&config, vault.clone())?;

        let session = SessionManager::new(
            gateway.clone(),
            vault,
            Arc::clone(&store),
            Arc::clone(&notifier),
            config.session,
        );
        let cart = CartSynchronizer::spawn(
            gateway.clone(),
            session.clone(),
            Arc::clone(&store),
            notifier,
            config.cart,
        );

        Ok(Self {
            inner: Arc::new(ClientStateInner {
                config,
                store,
                gateway,
                session,
                cart,
            }),
        })
    }

    /// Get a reference to the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Get a reference to the persisted state store.
    #[must_use]
    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    /// Get a reference to the backend gateway.
    #[must_use]
    pub fn gateway(&self) -> &HttpGateway {
        &self.inner.gateway
    }

    /// Get a reference to the session manager.
    #[must_use]
    pub fn session(&self) -> &SessionManager<HttpGateway> {
        &self.inner.session
    }

    /// Get a reference to the cart synchronizer.
    #[must_use]
    pub fn cart(&self) -> &CartSynchronizer {
        &self.inner.cart
    }
}
