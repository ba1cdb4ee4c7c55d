//! Chunk payload compression.
//!
//! A chunk is addressed by the hash of its raw bytes; compression only
//! changes how those bytes travel. The algorithm rides along with the
//! payload (as `Content-Encoding` on the wire) so a reader never has to
//! guess.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Compression applied to a chunk payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Zstd,
}

impl Compression {
    /// `Content-Encoding` value, or `None` for raw bytes.
    pub fn content_encoding(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Zstd => Some("zstd"),
        }
    }

    /// Parse a `Content-Encoding` header. Unknown encodings are `None`
    /// (the Rust kind), so callers can reject them.
    pub fn from_content_encoding(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => Some(Self::None),
            "zstd" => Some(Self::Zstd),
            _ => None,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Zstd => "zstd",
        })
    }
}

/// Chunk bytes as stored and sent, tagged with their compression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkPayload {
    pub compression: Compression,
    pub data: Bytes,
}

impl ChunkPayload {
    /// Uncompressed payload.
    pub fn raw(data: Bytes) -> Self {
        Self {
            compression: Compression::None,
            data,
        }
    }

    pub fn new(compression: Compression, data: Bytes) -> Self {
        Self { compression, data }
    }

    /// Bytes on the wire.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_encoding_mapping() {
        assert_eq!(Compression::Zstd.content_encoding(), Some("zstd"));
        assert_eq!(Compression::None.content_encoding(), None);
        assert_eq!(
            Compression::from_content_encoding("ZSTD"),
            Some(Compression::Zstd)
        );
        assert_eq!(
            Compression::from_content_encoding("identity"),
            Some(Compression::None)
        );
        assert_eq!(Compression::from_content_encoding("br"), None);
    }

    #[test]
    fn test_config_spelling() {
        let parsed: Compression = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(parsed, Compression::None);
        assert_eq!(Compression::default(), Compression::Zstd);
    }
}
