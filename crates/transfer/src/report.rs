//! Operation summaries for callers and `--json` output.

use crate::bandwidth::Tuning;
use crate::outcome::{SkipReason, TransferResult};
use larder_core::{ChunkHash, Manifest};
use serde::Serialize;
use std::collections::HashMap;

/// What happened to the manifest at the end of a push.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestStatus {
    /// The backend accepted a new manifest.
    Published,
    /// An identical manifest (same root hash) was already published.
    AlreadyPublished,
}

/// Counters shared by push and pull reports.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TransferSummary {
    pub chunks: usize,
    pub transferred: usize,
    pub already_present: usize,
    pub locally_present: usize,
    pub bytes_transferred: u64,
    pub bytes_skipped: u64,
    pub concurrency: usize,
    pub concurrency_source: String,
    pub chunk_size_hint: u64,
}

impl TransferSummary {
    pub(crate) fn new(manifest: &Manifest, result: &TransferResult, tuning: &Tuning) -> Self {
        let lengths: HashMap<ChunkHash, u64> = manifest
            .chunks
            .iter()
            .map(|c| (c.hash, c.length))
            .collect();
        let bytes_skipped = result
            .outcomes()
            .iter()
            .filter(|(_, o)| matches!(o, crate::ChunkOutcome::Skipped(_)))
            .filter_map(|(hash, _)| lengths.get(hash))
            .sum();
        Self {
            chunks: result.len(),
            transferred: result.transferred_count(),
            already_present: result.skipped_count(SkipReason::AlreadyPresent),
            locally_present: result.skipped_count(SkipReason::LocallyPresent),
            bytes_transferred: result.bytes_transferred(),
            bytes_skipped,
            concurrency: tuning.concurrency,
            concurrency_source: tuning.source.to_string(),
            chunk_size_hint: tuning.chunk_size,
        }
    }
}

/// Summary of a successful push.
#[derive(Clone, Debug, Serialize)]
pub struct PushReport {
    pub artifact: String,
    pub root_hash: String,
    pub total_size: u64,
    pub key_name: String,
    pub manifest: ManifestStatus,
    #[serde(flatten)]
    pub summary: TransferSummary,
    #[serde(skip)]
    pub result: TransferResult,
}

/// Summary of a successful pull.
#[derive(Clone, Debug, Serialize)]
pub struct PullReport {
    pub artifact: String,
    pub root_hash: String,
    pub total_size: u64,
    pub key_name: String,
    #[serde(flatten)]
    pub summary: TransferSummary,
    #[serde(skip)]
    pub result: TransferResult,
}
