//! Transfer engine for larder.
//!
//! Pushes chunk an artifact, ask the backend which chunks it already holds,
//! upload the rest under a bounded concurrency budget and publish a signed
//! manifest. Pulls verify the manifest signature first, download missing
//! chunks the same way and only hand back bytes whose root hash checks out.

pub mod bandwidth;
pub mod compress;
pub mod engine;
pub mod error;
pub mod local_cache;
pub mod outcome;
pub mod plan;
pub mod report;
pub mod scheduler;
pub mod source;

pub use bandwidth::{
    BandwidthEstimator, BandwidthTier, ConcurrencySource, EstimateMemo, TierSpec, Tuning,
    TuningOverrides, recommend,
};
pub use engine::{EngineOptions, PulledArtifact, TransferEngine};
pub use error::{Result, TransferError};
pub use local_cache::LocalChunkCache;
pub use outcome::{ChunkFailure, ChunkOutcome, FailureReason, SkipReason, TransferResult};
pub use plan::TransferPlan;
pub use report::{ManifestStatus, PullReport, PushReport, TransferSummary};
pub use scheduler::{RetryPolicy, Scheduler, SchedulerRun};
pub use source::{ChunkSource, MemorySource};
