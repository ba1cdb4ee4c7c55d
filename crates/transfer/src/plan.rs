//! Per-operation transfer plans.

use crate::bandwidth::Tuning;
use crate::outcome::SkipReason;
use larder_core::{ChunkHash, ChunkRef, Manifest};
use std::collections::{HashMap, HashSet};

/// What one push or pull has to move.
///
/// Built once per operation from the manifest and whatever is already known
/// to be present, then handed to the scheduler and dropped with it.
#[derive(Clone, Debug)]
pub struct TransferPlan {
    /// Distinct chunks needing transfer, in manifest order.
    pending: Vec<ChunkRef>,
    /// Distinct chunks that can be skipped, in manifest order.
    skipped: Vec<(ChunkHash, SkipReason)>,
    pub tuning: Tuning,
}

impl TransferPlan {
    /// Split a manifest's distinct chunks into pending and skipped.
    ///
    /// A chunk is skipped if it appears in `present`, with the reason given
    /// there; duplicates in the manifest are planned once.
    pub fn new(
        manifest: &Manifest,
        present: &HashMap<ChunkHash, SkipReason>,
        tuning: Tuning,
    ) -> Self {
        let mut seen = HashSet::with_capacity(manifest.chunks.len());
        let mut pending = Vec::new();
        let mut skipped = Vec::new();
        for chunk in &manifest.chunks {
            if !seen.insert(chunk.hash) {
                continue;
            }
            match present.get(&chunk.hash) {
                Some(reason) => skipped.push((chunk.hash, *reason)),
                None => pending.push(*chunk),
            }
        }
        Self {
            pending,
            skipped,
            tuning,
        }
    }

    pub fn pending(&self) -> &[ChunkRef] {
        &self.pending
    }

    pub fn skipped(&self) -> &[(ChunkHash, SkipReason)] {
        &self.skipped
    }

    pub fn pending_bytes(&self) -> u64 {
        self.pending.iter().map(|c| c.length).sum()
    }

    pub fn concurrency(&self) -> usize {
        self.tuning.concurrency
    }

    pub fn chunk_size_hint(&self) -> u64 {
        self.tuning.chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandwidth::ConcurrencySource;
    use larder_core::{ArtifactId, ContentHash};

    fn tuning() -> Tuning {
        Tuning {
            concurrency: 4,
            chunk_size: 4_000_000,
            tier: None,
            source: ConcurrencySource::Override,
        }
    }

    #[test]
    fn test_plan_dedups_and_splits() {
        let a = ChunkHash::compute(b"a");
        let b = ChunkHash::compute(b"b");
        let c = ChunkHash::compute(b"c");
        let manifest = Manifest::new(
            ArtifactId::new("pkg").unwrap(),
            vec![
                ChunkRef::new(a, 0, 1),
                ChunkRef::new(b, 1, 1),
                ChunkRef::new(a, 2, 1),
                ChunkRef::new(c, 3, 1),
            ],
            4,
            ContentHash::empty(),
        );
        let present = HashMap::from([(b, SkipReason::AlreadyPresent)]);
        let plan = TransferPlan::new(&manifest, &present, tuning());

        assert_eq!(
            plan.pending().iter().map(|c| c.hash).collect::<Vec<_>>(),
            vec![a, c]
        );
        assert_eq!(plan.skipped(), &[(b, SkipReason::AlreadyPresent)]);
        assert_eq!(plan.pending_bytes(), 2);
        assert_eq!(plan.concurrency(), 4);
    }
}
