//! Integration tests for the Cartwheel client.
//!
//! Every test runs the real HTTP gateway against a [`wiremock`] backend, so
//! nothing here needs network access or a running server.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cartwheel-integration-tests
//! ```
//!
//! # Test Categories
//!
//! - `gateway` - request shape, credential renewal, error bodies
//! - `client_flow` - session and cart services wired through [`ClientState`]
//!
//! [`ClientState`]: cartwheel_client::ClientState

use std::sync::Arc;
use std::time::Duration;

use cartwheel_client::credentials::{CredentialVault, Credentials};
use cartwheel_client::gateway::HttpGateway;
use cartwheel_client::storage::{MemoryStore, SharedStore};
use serde_json::{Value, json};
use url::Url;
use wiremock::MockServer;

/// Path prefix the mock backend serves the API under.
pub const API_PREFIX: &str = "/api";

/// Base URL of the API on `server`, with the trailing slash joins rely on.
#[must_use]
pub fn api_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}{API_PREFIX}/", server.uri())).expect("mock server URI is a valid URL")
}

/// Full request path for an endpoint, for use with `wiremock::matchers::path`.
#[must_use]
pub fn endpoint(relative: &str) -> String {
    format!("{API_PREFIX}/{relative}")
}

/// An HTTP gateway pointed at `server`, with a vault holding `credentials`.
#[must_use]
pub fn gateway(server: &MockServer, credentials: Option<Credentials>) -> (HttpGateway, CredentialVault) {
    let store: SharedStore = MemoryStore::shared();
    let vault = CredentialVault::new(store);
    if let Some(credentials) = credentials {
        vault.replace(credentials);
    }

    let gateway = HttpGateway::new(api_url(server), vault.clone(), Duration::from_secs(5))
        .expect("HTTP client builds");
    (gateway, vault)
}

/// A fresh store for tests that wire up the whole client.
#[must_use]
pub fn memory_store() -> SharedStore {
    Arc::new(MemoryStore::new())
}

/// A user record in the backend's JSON shape.
#[must_use]
pub fn user_json(id: i64, email: &str, first_name: &str, last_name: &str) -> Value {
    json!({
        "id": id,
        "email": email,
        "first_name": first_name,
        "last_name": last_name,
    })
}

/// A backend cart line in the backend's JSON shape.
#[must_use]
pub fn cart_line_json(id: i64, name: &str, price: &str, quantity: u32) -> Value {
    json!({
        "product": { "id": id, "name": name, "price": price },
        "quantity": quantity,
    })
}

/// Sign-in / sign-up response body.
#[must_use]
pub fn auth_json(access: &str, refresh: &str, user: Value) -> Value {
    json!({ "access": access, "refresh": refresh, "user": user })
}
