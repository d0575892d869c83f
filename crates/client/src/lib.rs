//! Cartwheel client library.
//!
//! The client-side state layer of the Cartwheel storefront: an
//! authentication [`session`], a [`cart`] that follows the user from guest
//! to account, and the [`gateway`] both use to reach the backend.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use cartwheel_client::{ClientConfig, ClientState, notify::TracingNotifier};
//!
//! let config = ClientConfig::from_env()?;
//! let client = ClientState::new(config, Arc::new(TracingNotifier))?;
//!
//! client.session().restore().await;
//! client.cart().add_item(product, 1);
//! client.cart().flush().await;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod session;
pub mod state;
pub mod storage;

pub use config::ClientConfig;
pub use error::ClientError;
pub use state::ClientState;
