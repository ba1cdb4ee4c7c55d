//! Transfer error types.

use crate::outcome::{ChunkFailure, TransferResult};
use larder_client::WireError;
use larder_signer::SignerError;
use thiserror::Error;

fn list_failures(failures: &[ChunkFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced by a push or pull.
#[derive(Debug, Error)]
pub enum TransferError {
    /// At least one chunk failed; every failure is listed, and `result`
    /// holds the outcome of every chunk that finished.
    #[error("{} chunk(s) failed for {artifact}: {}", failures.len(), list_failures(failures))]
    Failed {
        artifact: String,
        failures: Vec<ChunkFailure>,
        result: TransferResult,
    },

    #[error("transfer of {artifact} canceled ({completed} chunk(s) done, {remaining} not attempted)")]
    Canceled {
        artifact: String,
        completed: usize,
        remaining: usize,
    },

    #[error("manifest verification failed: {0}")]
    Verification(#[source] SignerError),

    #[error("integrity check failed for {artifact}: {detail}")]
    Integrity { artifact: String, detail: String },

    #[error("protocol version mismatch: {0}")]
    Schema(String),

    #[error("wire error: {0}")]
    Wire(#[source] WireError),

    #[error("signing failed: {0}")]
    Signing(#[source] SignerError),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(larder_core::Error),
}

impl From<WireError> for TransferError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::Schema(msg) => Self::Schema(msg),
            other => Self::Wire(other),
        }
    }
}

impl From<larder_core::Error> for TransferError {
    fn from(e: larder_core::Error) -> Self {
        match e {
            larder_core::Error::Integrity {
                artifact,
                expected,
                actual,
            } => Self::Integrity {
                artifact,
                detail: format!("expected root {expected}, got {actual}"),
            },
            larder_core::Error::Schema { .. } => Self::Schema(e.to_string()),
            larder_core::Error::Config(msg) => Self::Config(msg),
            other => Self::Core(other),
        }
    }
}

impl TransferError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }
}

/// Result type for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;
