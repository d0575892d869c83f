//! Gateway error type and backend error-body parsing.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur when talking to the backend.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed (connection, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend rejected the credentials and they could not be renewed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The call needs credentials and none are held.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The backend rejected the request payload.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        fields: BTreeMap<String, Vec<String>>,
    },

    /// Any other non-success response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// A success response had an unexpected body.
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// An endpoint path could not be joined onto the base URL.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl GatewayError {
    /// Build the error for a non-success response.
    #[must_use]
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
        let message = error_message(&parsed).unwrap_or_else(|| status_text(status));

        match status {
            401 => Self::Unauthorized(message),
            400 | 422 => Self::Validation {
                message,
                fields: field_errors(&parsed),
            },
            _ => Self::Api { status, message },
        }
    }

    /// Whether the error means the session is no longer usable.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::NotAuthenticated)
    }

    /// Text suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Http(_) => "Could not reach the server. Please try again.".to_string(),
            Self::Unauthorized(message)
            | Self::Validation { message, .. }
            | Self::Api { message, .. } => message.clone(),
            Self::NotAuthenticated => "Please sign in to continue.".to_string(),
            Self::Decode(_) | Self::Url(_) => "Unexpected response from the server.".to_string(),
        }
    }
}

// =============================================================================
// Error Body Parsing
// =============================================================================

/// Pick the human-readable message out of an error body.
///
/// Looks at `detail`, `message` and `error` in that order, then falls back to
/// a summary of field errors (`email: Enter a valid email.; password: ...`).
pub(crate) fn error_message(body: &Value) -> Option<String> {
    let object = body.as_object()?;

    for key in ["detail", "message", "error"] {
        if let Some(text) = object.get(key).and_then(text_of)
            && !text.is_empty()
        {
            return Some(text);
        }
    }

    let summary = field_errors(body)
        .into_iter()
        .map(|(field, messages)| format!("{field}: {}", messages.join(", ")))
        .collect::<Vec<_>>()
        .join("; ");

    (!summary.is_empty()).then_some(summary)
}

/// Field-level validation messages, keyed by field name.
pub(crate) fn field_errors(body: &Value) -> BTreeMap<String, Vec<String>> {
    let Some(object) = body.as_object() else {
        return BTreeMap::new();
    };

    object
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), "detail" | "message" | "error" | "code"))
        .filter_map(|(key, value)| {
            let messages: Vec<String> = match value {
                Value::Array(items) => items.iter().filter_map(text_of).collect(),
                other => text_of(other).into_iter().collect(),
            };
            (!messages.is_empty()).then(|| (key.clone(), messages))
        })
        .collect()
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(text_of).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn status_text(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .map_or_else(|| format!("Request failed with status {status}"), str::to_string)
}
