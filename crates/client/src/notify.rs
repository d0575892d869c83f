//! User-facing notifications.
//!
//! The services report outcomes ("Added Oolong to cart", "Session expired")
//! as [`Notification`] values. How they are shown is up to the front end.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Info,
    Error,
}

/// A message meant for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.level {
            NotificationLevel::Success => "ok",
            NotificationLevel::Info => "info",
            NotificationLevel::Error => "error",
        };
        write!(f, "[{tag}] {}", self.message)
    }
}

/// Sink for notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Shared handle to a notifier.
pub type SharedNotifier = Arc<dyn Notifier>;

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Error => tracing::warn!("{}", notification.message),
            NotificationLevel::Success | NotificationLevel::Info => {
                tracing::info!("{}", notification.message);
            }
        }
    }
}

/// Forwards notifications to a receiver, typically a UI loop.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    /// Create a notifier and the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        // A closed receiver just means nobody is listening any more.
        if self.tx.send(notification).is_err() {
            tracing::debug!("Notification receiver dropped");
        }
    }
}
