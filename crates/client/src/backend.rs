//! The cache backend seam.

use crate::error::WireResult;
use async_trait::async_trait;
use bytes::Bytes;
use larder_core::{ArtifactId, ChunkHash, ChunkPayload, Manifest, Token};
use std::collections::HashSet;
use std::sync::Arc;

/// Result of storing a chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// The backend stored a new object.
    Created,
    /// The backend already held an identical object.
    AlreadyExists,
}

/// Remote cache operations used by the transfer engine.
///
/// Implementations never retry: a single call is a single request, and the
/// returned error's [`crate::WireError::kind`] tells the caller whether a
/// retry could help. Every call carries the caller's token.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// The subset of `hashes` the backend already holds.
    async fn query_existence(
        &self,
        token: &Token,
        hashes: &[ChunkHash],
    ) -> WireResult<HashSet<ChunkHash>>;

    /// Upload one chunk payload. `hash` addresses the uncompressed bytes.
    async fn put_chunk(
        &self,
        token: &Token,
        hash: &ChunkHash,
        payload: ChunkPayload,
    ) -> WireResult<PutOutcome>;

    /// Download one chunk payload, still in whatever compression the
    /// backend holds it. A missing chunk is [`crate::WireError::NotFound`].
    async fn get_chunk(&self, token: &Token, hash: &ChunkHash) -> WireResult<ChunkPayload>;

    /// Fetch the manifest for an artifact.
    async fn get_manifest(&self, token: &Token, artifact: &ArtifactId) -> WireResult<Manifest>;

    /// Publish a signed manifest. An existing manifest is [`crate::WireError::Conflict`].
    async fn put_manifest(&self, token: &Token, manifest: &Manifest) -> WireResult<()>;

    /// Download `bytes` bytes of filler for bandwidth estimation.
    async fn probe(&self, token: &Token, bytes: u64) -> WireResult<Bytes>;
}

#[async_trait]
impl<T: CacheBackend + ?Sized> CacheBackend for Arc<T> {
    async fn query_existence(
        &self,
        token: &Token,
        hashes: &[ChunkHash],
    ) -> WireResult<HashSet<ChunkHash>> {
        (**self).query_existence(token, hashes).await
    }

    async fn put_chunk(
        &self,
        token: &Token,
        hash: &ChunkHash,
        payload: ChunkPayload,
    ) -> WireResult<PutOutcome> {
        (**self).put_chunk(token, hash, payload).await
    }

    async fn get_chunk(&self, token: &Token, hash: &ChunkHash) -> WireResult<ChunkPayload> {
        (**self).get_chunk(token, hash).await
    }

    async fn get_manifest(&self, token: &Token, artifact: &ArtifactId) -> WireResult<Manifest> {
        (**self).get_manifest(token, artifact).await
    }

    async fn put_manifest(&self, token: &Token, manifest: &Manifest) -> WireResult<()> {
        (**self).put_manifest(token, manifest).await
    }

    async fn probe(&self, token: &Token, bytes: u64) -> WireResult<Bytes> {
        (**self).probe(token, bytes).await
    }
}
