//! Signer error types.

use thiserror::Error;

/// Key handling and manifest signature errors.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("key parsing error: {0}")]
    KeyParsing(String),

    #[error("no signing key configured")]
    NoSigningKey,

    #[error("manifest for {artifact} is not signed")]
    Unsigned { artifact: String },

    #[error("manifest for {artifact} signed by untrusted key {key_name}")]
    UntrustedKey { artifact: String, key_name: String },

    #[error("signature verification failed for {artifact} (key {key_name})")]
    VerificationFailed { artifact: String, key_name: String },

    #[error("invalid signature format: {0}")]
    InvalidSignature(String),

    #[error(transparent)]
    Core(#[from] larder_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for signing operations.
pub type SignerResult<T> = std::result::Result<T, SignerError>;
