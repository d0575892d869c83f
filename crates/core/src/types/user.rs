//! Signed-in user identity.

use serde::{Deserialize, Serialize};

use crate::{Email, UserId};

/// A user record as the backend returns it.
///
/// Sign-up responses and older backends omit `name`; see
/// [`UserProfile::from_record`] for how the display name is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub email: Email,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// A normalized user identity, as held in memory and persisted locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Backend user ID.
    pub id: UserId,
    /// Account email.
    pub email: Email,
    /// Display name (never empty).
    pub name: String,
    /// First name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Last name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl UserProfile {
    /// Normalize a backend record.
    ///
    /// The display name is the explicit `name` when present and non-blank,
    /// otherwise `"{first} {last}"` trimmed, otherwise the email local part.
    #[must_use]
    pub fn from_record(record: UserRecord) -> Self {
        let name = record
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| {
                let joined = format!(
                    "{} {}",
                    record.first_name.as_deref().unwrap_or(""),
                    record.last_name.as_deref().unwrap_or("")
                );
                let joined = joined.trim();
                if joined.is_empty() {
                    record.email.local_part().to_owned()
                } else {
                    joined.to_owned()
                }
            });

        Self {
            id: record.id,
            email: record.email,
            name,
            first_name: record.first_name,
            last_name: record.last_name,
        }
    }
}

impl From<UserRecord> for UserProfile {
    fn from(record: UserRecord) -> Self {
        Self::from_record(record)
    }
}
