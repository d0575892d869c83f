//! REST implementation of [`RemoteGateway`].

use std::sync::Arc;
use std::time::Duration;

use cartwheel_core::{Email, ProductId, UserRecord};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

use super::{AuthPayload, GatewayError, RefreshPayload, Registration, RemoteCartLine, RemoteGateway};
use crate::config::ClientConfig;
use crate::credentials::CredentialVault;

mod endpoints {
    pub const LOGIN: &str = "auth/login/";
    pub const REGISTER: &str = "auth/register/";
    pub const PROFILE: &str = "auth/profile/";
    pub const TOKEN_REFRESH: &str = "auth/token/refresh/";
    pub const CART: &str = "orders/cart/";
    pub const CART_ADD: &str = "orders/cart/add/";
    pub const CART_REMOVE: &str = "orders/cart/remove/";
    pub const CART_UPDATE: &str = "orders/cart/update/";
}

/// `GET orders/cart/` returns either a bare list or an envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum CartResponse {
    Lines(Vec<RemoteCartLine>),
    Envelope { items: Vec<RemoteCartLine> },
}

impl CartResponse {
    fn into_lines(self) -> Vec<RemoteCartLine> {
        match self {
            Self::Lines(lines) | Self::Envelope { items: lines } => lines,
        }
    }
}

// =============================================================================
// HttpGateway
// =============================================================================

/// Backend client over HTTP.
///
/// Cheap to clone; clones share the connection pool and the vault.
#[derive(Clone)]
pub struct HttpGateway {
    inner: Arc<Inner>,
}

struct Inner {
    client: reqwest::Client,
    base_url: Url,
    vault: CredentialVault,
}

impl HttpGateway {
    /// Create a gateway for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(base_url: Url, vault: CredentialVault, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                base_url,
                vault,
            }),
        })
    }

    /// Create a gateway from client configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn from_config(config: &ClientConfig, vault: CredentialVault) -> Result<Self, GatewayError> {
        Self::new(config.api_url.clone(), vault, config.http_timeout)
    }

    /// The API base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    // =========================================================================
    // Request Execution
    // =========================================================================

    /// Send an authenticated request and decode the response.
    ///
    /// A `401` refreshes the access token once and retries once.
    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, GatewayError> {
        let url = self.inner.base_url.join(path)?;
        let access = self
            .inner
            .vault
            .access_token()
            .ok_or(GatewayError::NotAuthenticated)?;

        let response = self
            .send(method.clone(), url.clone(), body.as_ref(), Some(&access))
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return decode(response).await;
        }

        debug!(path, "Access token rejected, refreshing");
        let access = self.renew_access().await?;

        let response = self.send(method, url, body.as_ref(), Some(&access)).await?;
        decode(response).await
    }

    /// Send a request without credentials.
    async fn call_public<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, GatewayError> {
        let url = self.inner.base_url.join(path)?;
        let response = self.send(method, url, body.as_ref(), None).await?;
        decode(response).await
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        access: Option<&str>,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut request = self.inner.client.request(method, url);
        if let Some(access) = access {
            request = request.bearer_auth(access);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Exchange the vault's refresh token and store the new access token.
    async fn renew_access(&self) -> Result<String, GatewayError> {
        let refresh = self
            .inner
            .vault
            .refresh_token()
            .ok_or(GatewayError::NotAuthenticated)?;

        let body = json!({ "refresh": refresh });
        let payload: RefreshPayload = match self
            .call_public(Method::POST, endpoints::TOKEN_REFRESH, Some(body))
            .await
        {
            Ok(payload) => payload,
            Err(GatewayError::Http(e)) => return Err(GatewayError::Http(e)),
            Err(e) => {
                debug!(error = %e, "Credential refresh rejected");
                return Err(GatewayError::Unauthorized(e.user_message()));
            }
        };

        // The session may have been cleared while the refresh was in flight.
        if !self
            .inner
            .vault
            .set_access(payload.access.clone(), payload.refresh)
        {
            return Err(GatewayError::NotAuthenticated);
        }
        Ok(payload.access)
    }
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.inner.base_url.as_str())
            .finish_non_exhaustive()
    }
}

/// Decode a response body, mapping non-success statuses to errors.
///
/// An empty success body decodes as JSON `null`.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        debug!(
            status = %status,
            body = %text.chars().take(500).collect::<String>(),
            "Backend returned non-success status"
        );
        return Err(GatewayError::from_response(status.as_u16(), &text));
    }

    if text.trim().is_empty() {
        return Ok(serde_json::from_value(Value::Null)?);
    }
    Ok(serde_json::from_str(&text)?)
}

// =============================================================================
// RemoteGateway
// =============================================================================

impl RemoteGateway for HttpGateway {
    #[instrument(skip(self, password), fields(email = %email))]
    async fn sign_in(&self, email: &Email, password: &SecretString) -> Result<AuthPayload, GatewayError> {
        let body = json!({
            "email": email.as_str(),
            "password": password.expose_secret(),
        });
        self.call_public(Method::POST, endpoints::LOGIN, Some(body))
            .await
    }

    #[instrument(skip(self, registration), fields(email = %registration.email))]
    async fn sign_up(&self, registration: &Registration) -> Result<AuthPayload, GatewayError> {
        let body = json!({
            "first_name": registration.first_name,
            "last_name": registration.last_name,
            "email": registration.email.as_str(),
            "password": registration.password.expose_secret(),
        });
        self.call_public(Method::POST, endpoints::REGISTER, Some(body))
            .await
    }

    #[instrument(skip(self))]
    async fn get_profile(&self) -> Result<UserRecord, GatewayError> {
        self.call(Method::GET, endpoints::PROFILE, None)
            .await
    }

    #[instrument(skip(self, refresh))]
    async fn refresh(&self, refresh: &str) -> Result<RefreshPayload, GatewayError> {
        let body = json!({ "refresh": refresh });
        self.call_public(Method::POST, endpoints::TOKEN_REFRESH, Some(body))
            .await
    }

    #[instrument(skip(self))]
    async fn get_cart(&self) -> Result<Vec<RemoteCartLine>, GatewayError> {
        let response: CartResponse = self
            .call(Method::GET, endpoints::CART, None)
            .await?;
        Ok(response.into_lines())
    }

    #[instrument(skip(self), fields(product_id = %product))]
    async fn add_line(&self, product: ProductId, quantity: u32) -> Result<(), GatewayError> {
        let body = json!({ "product_id": product, "quantity": quantity });
        let _: IgnoredAny = self
            .call(Method::POST, endpoints::CART_ADD, Some(body))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(product_id = %product))]
    async fn remove_line(&self, product: ProductId) -> Result<(), GatewayError> {
        let body = json!({ "product_id": product });
        let _: IgnoredAny = self
            .call(Method::POST, endpoints::CART_REMOVE, Some(body))
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(product_id = %product))]
    async fn update_line(&self, product: ProductId, quantity: u32) -> Result<(), GatewayError> {
        let body = json!({ "product_id": product, "quantity": quantity });
        let _: IgnoredAny = self
            .call(Method::POST, endpoints::CART_UPDATE, Some(body))
            .await?;
        Ok(())
    }
}
