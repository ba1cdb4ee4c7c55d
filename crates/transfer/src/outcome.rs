//! Per-chunk outcomes and the aggregate transfer result.

use larder_client::{ErrorKind, WireError};
use larder_core::ChunkHash;
use std::fmt;

/// Why a chunk needed no transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The backend already held the chunk.
    AlreadyPresent,
    /// A verified copy was found in the local chunk cache.
    LocallyPresent,
}

/// Why a chunk ended up failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// The backend or network refused the transfer.
    Wire { kind: ErrorKind, message: String },
    /// Downloaded bytes did not hash to the requested chunk hash.
    Integrity { actual: ChunkHash },
    /// Downloaded bytes could not be decompressed.
    Undecodable(String),
    /// The local bytes to upload could not be produced or did not match.
    Source(String),
}

impl FailureReason {
    /// Only transient wire failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Wire {
                kind: ErrorKind::Transient,
                ..
            }
        )
    }
}

impl From<WireError> for FailureReason {
    fn from(e: WireError) -> Self {
        Self::Wire {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wire { kind, message } => write!(f, "{kind} wire error: {message}"),
            Self::Integrity { actual } => write!(f, "payload hashed to {actual}"),
            Self::Undecodable(msg) => write!(f, "payload failed to decompress: {msg}"),
            Self::Source(msg) => write!(f, "source error: {msg}"),
        }
    }
}

/// A chunk that did not make it, with enough context to report it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkFailure {
    pub hash: ChunkHash,
    pub reason: FailureReason,
    /// Attempts made before giving up.
    pub attempts: u32,
}

impl fmt::Display for ChunkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk {} failed after {} attempt(s): {}",
            self.hash, self.attempts, self.reason
        )
    }
}

/// Final state of one chunk in a push or pull.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    Transferred { bytes: u64, attempts: u32 },
    Skipped(SkipReason),
    Failed(ChunkFailure),
}

impl ChunkOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Outcome of every distinct chunk of one artifact, in manifest order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferResult {
    outcomes: Vec<(ChunkHash, ChunkOutcome)>,
}

impl TransferResult {
    pub(crate) fn push(&mut self, hash: ChunkHash, outcome: ChunkOutcome) {
        self.outcomes.push((hash, outcome));
    }

    pub fn outcomes(&self) -> &[(ChunkHash, ChunkOutcome)] {
        &self.outcomes
    }

    pub fn outcome(&self, hash: &ChunkHash) -> Option<&ChunkOutcome> {
        self.outcomes
            .iter()
            .find(|(h, _)| h == hash)
            .map(|(_, outcome)| outcome)
    }

    /// True when every chunk was transferred or skipped.
    pub fn is_success(&self) -> bool {
        !self.outcomes.iter().any(|(_, o)| o.is_failed())
    }

    pub fn failures(&self) -> Vec<ChunkFailure> {
        self.outcomes
            .iter()
            .filter_map(|(_, o)| match o {
                ChunkOutcome::Failed(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn transferred_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, ChunkOutcome::Transferred { .. }))
            .count()
    }

    pub fn skipped_count(&self, reason: SkipReason) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == ChunkOutcome::Skipped(reason))
            .count()
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|(_, o)| match o {
                ChunkOutcome::Transferred { bytes, .. } => *bytes,
                _ => 0,
            })
            .sum()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_counts_and_success() {
        let a = ChunkHash::compute(b"a");
        let b = ChunkHash::compute(b"b");
        let c = ChunkHash::compute(b"c");

        let mut result = TransferResult::default();
        result.push(a, ChunkOutcome::Transferred { bytes: 10, attempts: 1 });
        result.push(b, ChunkOutcome::Skipped(SkipReason::AlreadyPresent));
        assert!(result.is_success());
        assert_eq!(result.bytes_transferred(), 10);

        result.push(
            c,
            ChunkOutcome::Failed(ChunkFailure {
                hash: c,
                reason: FailureReason::Wire {
                    kind: ErrorKind::Permanent,
                    message: "denied".into(),
                },
                attempts: 1,
            }),
        );
        assert!(!result.is_success());
        assert_eq!(result.failures().len(), 1);
        assert_eq!(result.transferred_count(), 1);
        assert_eq!(result.skipped_count(SkipReason::AlreadyPresent), 1);
        assert!(result.outcome(&c).unwrap().is_failed());
    }

    #[test]
    fn test_only_transient_is_retryable() {
        let transient: FailureReason = WireError::Network("reset".into()).into();
        assert!(transient.is_retryable());
        let missing: FailureReason = WireError::NotFound("x".into()).into();
        assert!(!missing.is_retryable());
        let corrupt = FailureReason::Integrity {
            actual: ChunkHash::compute(b"x"),
        };
        assert!(!corrupt.is_retryable());
        assert!(!FailureReason::Undecodable("truncated".into()).is_retryable());
    }
}
