//! Manifest types.

use crate::artifact::ArtifactId;
use crate::chunk::{ChunkHash, ChunkRef};
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Current manifest schema version.
pub const MANIFEST_SCHEMA_VERSION: u16 = 1;

/// Signature attached to a manifest.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSignature {
    /// Name of the signing key, used to pick the matching trusted key.
    pub key_name: String,
    /// Base64-encoded ed25519 signature over [`Manifest::signable_bytes`].
    pub signature: String,
}

impl fmt::Debug for ManifestSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManifestSignature")
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}

/// Ordered description of how an artifact's chunks reconstruct it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Schema version of this manifest.
    pub version: u16,
    /// The artifact this manifest describes.
    pub artifact: ArtifactId,
    /// Chunks in artifact order.
    pub chunks: Vec<ChunkRef>,
    /// Total artifact size in bytes.
    pub total_size: u64,
    /// SHA-256 of the full artifact.
    pub root_hash: ContentHash,
    /// Signature, absent until the manifest is signed.
    #[serde(default)]
    pub signature: Option<ManifestSignature>,
}

/// The signed portion of a manifest, in a fixed field order.
#[derive(Serialize)]
struct SignableManifest<'a> {
    version: u16,
    artifact: &'a ArtifactId,
    chunks: &'a [ChunkRef],
    total_size: u64,
    root_hash: &'a ContentHash,
}

impl Manifest {
    /// Create an unsigned manifest at the current schema version.
    pub fn new(
        artifact: ArtifactId,
        chunks: Vec<ChunkRef>,
        total_size: u64,
        root_hash: ContentHash,
    ) -> Self {
        Self {
            version: MANIFEST_SCHEMA_VERSION,
            artifact,
            chunks,
            total_size,
            root_hash,
            signature: None,
        }
    }

    /// Get the number of chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Whether a signature is attached.
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Distinct chunk hashes, in first-occurrence order.
    pub fn unique_hashes(&self) -> Vec<ChunkHash> {
        let mut seen = HashSet::with_capacity(self.chunks.len());
        self.chunks
            .iter()
            .filter(|c| seen.insert(c.hash))
            .map(|c| c.hash)
            .collect()
    }

    /// Check that the chunk list tiles `0..total_size` exactly.
    pub fn validate_layout(&self) -> crate::Result<()> {
        let mut expected_offset = 0u64;
        for (i, chunk) in self.chunks.iter().enumerate() {
            if chunk.length == 0 {
                return Err(crate::Error::ManifestLayout(format!(
                    "chunk {i} has zero length"
                )));
            }
            if chunk.offset != expected_offset {
                return Err(crate::Error::ManifestLayout(format!(
                    "chunk {i} starts at {} but previous chunk ends at {expected_offset}",
                    chunk.offset
                )));
            }
            expected_offset = chunk.offset.checked_add(chunk.length).ok_or_else(|| {
                crate::Error::ManifestLayout(format!("chunk {i} overflows u64"))
            })?;
        }
        if expected_offset != self.total_size {
            return Err(crate::Error::ManifestLayout(format!(
                "chunks cover {expected_offset} bytes, manifest declares {}",
                self.total_size
            )));
        }
        Ok(())
    }

    /// Canonical bytes covered by the signature.
    ///
    /// CBOR of every field except `signature`, in declaration order, so the
    /// result does not depend on how the manifest was received.
    pub fn signable_bytes(&self) -> crate::Result<Vec<u8>> {
        let view = SignableManifest {
            version: self.version,
            artifact: &self.artifact,
            chunks: &self.chunks,
            total_size: self.total_size,
            root_hash: &self.root_hash,
        };
        crate::codec::to_cbor(&view)
    }
}
