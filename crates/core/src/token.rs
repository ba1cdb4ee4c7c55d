//! Bearer credentials.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// An opaque bearer credential with an optional expiry.
///
/// The transfer path attaches the secret to requests and checks expiry before
/// starting an operation; it never parses or persists the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    secret: String,
    /// When the token stops being accepted.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl Token {
    /// Create a token that never expires.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            expires_at: None,
        }
    }

    /// Create a token with an expiry.
    pub fn with_expiry(secret: impl Into<String>, expires_at: OffsetDateTime) -> Self {
        Self {
            secret: secret.into(),
            expires_at: Some(expires_at),
        }
    }

    /// The secret sent in the `Authorization` header.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Check expiry against a given instant.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    /// Check expiry against the current time.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
