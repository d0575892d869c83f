//! Command implementations.

pub mod auth;
pub mod cart;

use cartwheel_client::ClientError;
use cartwheel_client::session::SessionError;
use thiserror::Error;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CliError {
    /// The client could not be set up.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Sign-in or sign-up failed.
    #[error("{}", .0.user_message())]
    Session(#[from] SessionError),

    /// Reading the password failed.
    #[error("Failed to read password: {0}")]
    Io(#[from] std::io::Error),

    /// The `--price` argument is not a decimal number.
    #[error("Invalid price: {0}")]
    InvalidPrice(String),
}
