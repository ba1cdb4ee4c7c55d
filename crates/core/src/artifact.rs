//! Artifact identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one logical artifact (one manifest) in a cache.
///
/// Typically the basename of a Nix store path (`<hash>-<name>`). A full
/// `/nix/store/...` path is accepted and reduced to its basename so the same
/// output maps to the same id regardless of how it was named on the command
/// line.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(String);

impl ArtifactId {
    /// The standard Nix store directory.
    pub const STORE_DIR: &'static str = "/nix/store";

    /// Maximum identifier length.
    pub const MAX_LEN: usize = 255;

    /// Create from a string, validating format.
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        let prefix = format!("{}/", Self::STORE_DIR);
        let id = match id.strip_prefix(&prefix) {
            Some(rest) => rest.trim_end_matches('/').to_string(),
            None => id,
        };

        if id.is_empty() {
            return Err(crate::Error::InvalidArtifactId(
                "artifact id cannot be empty".to_string(),
            ));
        }
        if !id.is_ascii() {
            return Err(crate::Error::InvalidArtifactId(
                "artifact id contains non-ASCII characters".to_string(),
            ));
        }
        if id.len() > Self::MAX_LEN {
            return Err(crate::Error::InvalidArtifactId(format!(
                "artifact id longer than {} chars",
                Self::MAX_LEN
            )));
        }
        if id.starts_with('.') {
            return Err(crate::Error::InvalidArtifactId(
                "artifact id cannot start with '.'".to_string(),
            ));
        }
        for c in id.chars() {
            if !matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '+') {
                return Err(crate::Error::InvalidArtifactId(format!(
                    "invalid character in artifact id: {c}"
                )));
            }
        }
        Ok(Self(id))
    }

    /// Get the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<ArtifactId> for String {
    fn from(value: ArtifactId) -> Self {
        value.0
    }
}

impl fmt::Debug for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArtifactId({})", self.0)
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
