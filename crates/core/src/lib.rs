//! Core domain types and shared logic for the larder cache client.
//!
//! This crate defines the data model used across all other crates:
//! - Artifact identifiers and content hashes
//! - Chunks, manifests and their layout invariants
//! - Chunk payload compression tags
//! - Content-defined chunking and reassembly
//! - The binary wire codec
//! - Bearer tokens and client configuration

pub mod artifact;
pub mod chunk;
pub mod chunker;
pub mod codec;
pub mod compression;
pub mod config;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod token;

pub use artifact::ArtifactId;
pub use chunk::{Chunk, ChunkHash, ChunkRef};
pub use chunker::{Chunker, ChunkerConfig, reassemble};
pub use compression::{ChunkPayload, Compression};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use hash::{ContentHash, ContentHasher};
pub use manifest::{MANIFEST_SCHEMA_VERSION, Manifest, ManifestSignature};
pub use token::Token;

/// Default target chunk size: 4 MiB
pub const DEFAULT_TARGET_CHUNK_SIZE: u64 = 4 * 1024 * 1024;
