//! Chunks and the `(hash, offset, length)` references a manifest lists.

use crate::hash::ContentHash;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a chunk: the SHA-256 of its bytes. Equal hashes are the same
/// chunk whichever artifact they were cut from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkHash(ContentHash);

impl ChunkHash {
    pub fn compute(data: &[u8]) -> Self {
        Self(ContentHash::compute(data))
    }

    pub fn content_hash(&self) -> &ContentHash {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// `chunks/<aa>/<bb>/<hex>`, fanned out on the first two digest bytes.
    pub fn to_object_key(&self) -> String {
        let hex = self.to_hex();
        format!("chunks/{}/{}/{hex}", &hex[..2], &hex[2..4])
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({})", self.0.short())
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Position of a chunk inside an artifact: `(hash, offset, length)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRef {
    pub hash: ChunkHash,
    pub offset: u64,
    pub length: u64,
}

impl ChunkRef {
    pub fn new(hash: ChunkHash, offset: u64, length: u64) -> Self {
        Self {
            hash,
            offset,
            length,
        }
    }

    /// Offset one past the last byte of this chunk.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// A chunk cut from an artifact, payload included.
#[derive(Clone)]
pub struct Chunk {
    pub hash: ChunkHash,
    /// Where the chunk starts in its source artifact.
    pub offset: u64,
    pub data: Bytes,
}

impl Chunk {
    /// Hashes `data`; the offset is taken on trust from the caller.
    pub fn new(offset: u64, data: Bytes) -> Self {
        Self {
            hash: ChunkHash::compute(&data),
            offset,
            data,
        }
    }

    pub fn verify(&self, expected: &ChunkHash) -> crate::Result<()> {
        verify_payload(expected, &self.data)
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The `(hash, offset, length)` triple recorded in a manifest.
    pub fn to_ref(&self) -> ChunkRef {
        ChunkRef::new(self.hash, self.offset, self.size())
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("hash", &self.hash)
            .field("offset", &self.offset)
            .field("size", &self.data.len())
            .finish()
    }
}

/// Fails with [`crate::Error::HashMismatch`] unless `data` hashes to `expected`.
pub fn verify_payload(expected: &ChunkHash, data: &[u8]) -> crate::Result<()> {
    match ChunkHash::compute(data) {
        actual if actual == *expected => Ok(()),
        actual => Err(crate::Error::HashMismatch {
            expected: expected.to_hex(),
            actual: actual.to_hex(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_fans_out_on_prefix() {
        let hash = ChunkHash::compute(b"test");
        let hex = hash.to_hex();
        assert_eq!(
            hash.to_object_key(),
            format!("chunks/{}/{}/{hex}", &hex[0..2], &hex[2..4])
        );
    }

    #[test]
    fn test_chunk_verify() {
        let chunk = Chunk::new(0, Bytes::from_static(b"payload"));
        assert!(chunk.verify(&ChunkHash::compute(b"payload")).is_ok());
        assert!(matches!(
            chunk.verify(&ChunkHash::compute(b"other")),
            Err(crate::Error::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_chunk_ref_end() {
        let r = ChunkRef::new(ChunkHash::compute(b"a"), 100, 50);
        assert_eq!(r.end(), 150);
    }
}
