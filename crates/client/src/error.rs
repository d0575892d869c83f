//! Umbrella error type for wiring the client together.

use thiserror::Error;

use crate::config::ConfigError;
use crate::gateway::GatewayError;
use crate::session::SessionError;
use crate::storage::StorageError;

/// Client-level error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Local state could not be read or written.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A backend call failed.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Sign-in or sign-up failed.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}
