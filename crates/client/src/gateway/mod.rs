//! Remote backend contract.
//!
//! [`RemoteGateway`] is the set of backend calls the session manager and the
//! cart synchronizer make. [`HttpGateway`] implements it over the REST API;
//! tests substitute an in-memory fake.
//!
//! Authenticated calls carry the vault's access token. A `401` triggers one
//! credential refresh and one retry before the failure is surfaced as
//! [`GatewayError::Unauthorized`].

mod error;
#[cfg(test)]
pub(crate) mod fake;
mod http;

use std::future::Future;

use cartwheel_core::{Email, ProductId, ProductSnapshot, UserRecord};
use secrecy::SecretString;
use serde::Deserialize;

pub use error::GatewayError;
pub use http::HttpGateway;

/// Tokens and user returned by sign-in and sign-up.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthPayload {
    pub access: String,
    pub refresh: String,
    pub user: UserRecord,
}

/// Response of the token refresh endpoint.
///
/// `refresh` is present only when the backend rotates refresh tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshPayload {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// A line of the backend cart.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteCartLine {
    pub product: ProductSnapshot,
    pub quantity: u32,
}

/// Fields submitted when registering a new account.
#[derive(Debug)]
pub struct Registration {
    pub first_name: String,
    pub last_name: String,
    pub email: Email,
    pub password: SecretString,
}

/// Backend operations used by the client services.
pub trait RemoteGateway: Clone + Send + Sync + 'static {
    /// Exchange email and password for credentials.
    fn sign_in(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> impl Future<Output = Result<AuthPayload, GatewayError>> + Send;

    /// Create an account and sign into it.
    fn sign_up(
        &self,
        registration: &Registration,
    ) -> impl Future<Output = Result<AuthPayload, GatewayError>> + Send;

    /// Fetch the profile of the signed-in user.
    fn get_profile(&self) -> impl Future<Output = Result<UserRecord, GatewayError>> + Send;

    /// Exchange a refresh token for a new access token.
    fn refresh(
        &self,
        refresh: &str,
    ) -> impl Future<Output = Result<RefreshPayload, GatewayError>> + Send;

    /// Fetch the signed-in user's backend cart.
    fn get_cart(&self) -> impl Future<Output = Result<Vec<RemoteCartLine>, GatewayError>> + Send;

    /// Add `quantity` units of a product to the backend cart.
    fn add_line(
        &self,
        product: ProductId,
        quantity: u32,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Remove a product from the backend cart.
    fn remove_line(&self, product: ProductId) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Set the quantity of a product already in the backend cart.
    fn update_line(
        &self,
        product: ProductId,
        quantity: u32,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;
}
