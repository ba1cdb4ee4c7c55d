//! Manifest signing for larder.
//!
//! This crate provides:
//! - Ed25519 keys in the Nix `name:base64` format
//! - Signing of a manifest's canonical bytes
//! - Verification against a set of trusted keys

pub mod error;
pub mod key;
pub mod signer;

pub use error::{SignerError, SignerResult};
pub use key::{KeyPair, PublicKey, TrustedKeys};
pub use signer::{KeyProvider, ManifestSigner, StaticKeyProvider, verify, verify_manifest};
