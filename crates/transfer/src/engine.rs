//! Top-level push and pull.

use crate::bandwidth::{BandwidthEstimator, EstimateMemo, Tuning, TuningOverrides};
use crate::compress::{compress, decompress};
use crate::error::{Result, TransferError};
use crate::local_cache::LocalChunkCache;
use crate::outcome::{ChunkFailure, ChunkOutcome, FailureReason, SkipReason, TransferResult};
use crate::plan::TransferPlan;
use crate::report::{ManifestStatus, PullReport, PushReport, TransferSummary};
use crate::scheduler::{RetryPolicy, Scheduler, SchedulerRun};
use crate::source::{ChunkSource, MemorySource};
use bytes::Bytes;
use larder_client::{CacheBackend, CredentialProvider, PutOutcome, WireError};
use larder_core::{
    ArtifactId, ChunkHash, ChunkRef, Chunker, ChunkerConfig, ClientConfig, Compression, Manifest,
    Token, reassemble,
};
use larder_signer::{KeyProvider, SignerError, verify_manifest};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Knobs for a [`TransferEngine`].
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Average chunk size for push. Fixed so that boundaries, and with them
    /// dedup, do not move with measured bandwidth.
    pub chunk_target: u64,
    /// Compression applied to uploaded chunks.
    pub compression: Compression,
    pub overrides: TuningOverrides,
    pub retry: RetryPolicy,
    pub estimator: BandwidthEstimator,
    pub local_cache: Option<LocalChunkCache>,
}

impl EngineOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            chunk_target: config.chunking.target_size,
            compression: config.transfer.compression,
            overrides: TuningOverrides::from(&config.transfer),
            retry: RetryPolicy::from(&config.transfer),
            estimator: BandwidthEstimator::new(&config.probe),
            local_cache: None,
        }
    }

    pub fn with_local_cache(mut self, cache: LocalChunkCache) -> Self {
        self.local_cache = Some(cache);
        self
    }
}

/// An artifact fetched, verified and reassembled by [`TransferEngine::pull`].
#[derive(Debug)]
pub struct PulledArtifact {
    pub data: Bytes,
    pub manifest: Manifest,
    pub report: PullReport,
}

/// Drives pushes and pulls against one cache backend.
pub struct TransferEngine {
    backend: Arc<dyn CacheBackend>,
    credentials: Arc<dyn CredentialProvider>,
    keys: Arc<dyn KeyProvider>,
    options: EngineOptions,
    memo: Option<Arc<EstimateMemo>>,
}

impl TransferEngine {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        credentials: Arc<dyn CredentialProvider>,
        keys: Arc<dyn KeyProvider>,
        options: EngineOptions,
    ) -> Self {
        Self {
            backend,
            credentials,
            keys,
            options,
            memo: None,
        }
    }

    /// Reuse bandwidth estimates across operations through `memo`.
    pub fn with_memo(mut self, memo: Arc<EstimateMemo>) -> Self {
        self.memo = Some(memo);
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    fn token(&self) -> Result<Token> {
        let token = self
            .credentials
            .current_token()
            .ok_or_else(|| TransferError::Credential("no token available".to_string()))?;
        if self.credentials.is_expired(&token) {
            return Err(TransferError::Credential("token has expired".to_string()));
        }
        Ok(token)
    }

    async fn tune(&self, token: &Token) -> Tuning {
        self.options
            .estimator
            .resolve(
                self.options.overrides,
                self.backend.as_ref(),
                token,
                self.memo.as_deref(),
            )
            .await
    }

    /// Resolve concurrency and chunk-size hint the way the next operation would.
    pub async fn resolve_tuning(&self) -> Result<Tuning> {
        let token = self.token()?;
        Ok(self.tune(&token).await)
    }

    /// Chunk, sign and upload an in-memory artifact, then publish its manifest.
    #[instrument(skip(self, data, cancel), fields(artifact = %artifact, size = data.len()))]
    pub async fn push(
        &self,
        artifact: ArtifactId,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<PushReport> {
        let token = self.token()?;
        let tuning = self.tune(&token).await;

        let chunker = Chunker::new(ChunkerConfig::from_target(self.options.chunk_target))?;
        let (mut manifest, chunks) = chunker.chunk_artifact(artifact, &data)?;
        debug!(
            chunks = chunks.len(),
            avg_size = chunker.config().avg_size(),
            root = %manifest.root_hash.short(),
            "chunked artifact"
        );

        let signer = self.keys.signer().map_err(TransferError::Signing)?;
        signer.sign(&mut manifest).map_err(TransferError::Signing)?;

        let source: Arc<dyn ChunkSource> = Arc::new(MemorySource::new(data));
        self.upload(&manifest, source, &token, tuning, cancel).await
    }

    /// Upload the chunks of an already signed manifest from `source`.
    #[instrument(skip(self, manifest, source, cancel), fields(artifact = %manifest.artifact))]
    pub async fn push_manifest(
        &self,
        manifest: &Manifest,
        source: Arc<dyn ChunkSource>,
        cancel: &CancellationToken,
    ) -> Result<PushReport> {
        let token = self.token()?;
        let tuning = self.tune(&token).await;
        self.upload(manifest, source, &token, tuning, cancel).await
    }

    async fn upload(
        &self,
        manifest: &Manifest,
        source: Arc<dyn ChunkSource>,
        token: &Token,
        tuning: Tuning,
        cancel: &CancellationToken,
    ) -> Result<PushReport> {
        let artifact = manifest.artifact.to_string();
        manifest.validate_layout()?;
        let key_name = match &manifest.signature {
            Some(signature) => signature.key_name.clone(),
            None => {
                return Err(TransferError::Signing(SignerError::Unsigned { artifact }));
            }
        };

        let hashes = manifest.unique_hashes();
        let retry = &self.options.retry;
        let remote = retry
            .run("existence query", || {
                self.backend.query_existence(token, &hashes)
            })
            .await?;
        let present: HashMap<ChunkHash, SkipReason> = remote
            .into_iter()
            .map(|hash| (hash, SkipReason::AlreadyPresent))
            .collect();

        let plan = TransferPlan::new(manifest, &present, tuning);
        info!(
            pending = plan.pending().len(),
            skipped = plan.skipped().len(),
            bytes = plan.pending_bytes(),
            concurrency = plan.concurrency(),
            source = %plan.tuning.source,
            "uploading missing chunks"
        );

        let scheduler = Scheduler::new(plan.concurrency(), retry.clone());
        let run = scheduler
            .run(plan.pending().to_vec(), cancel, |chunk| {
                let backend = self.backend.clone();
                let source = source.clone();
                let token = token.clone();
                let compression = self.options.compression;
                async move {
                    let data = source
                        .load(&chunk)
                        .map_err(|e| FailureReason::Source(e.to_string()))?;
                    let actual = ChunkHash::compute(&data);
                    if actual != chunk.hash {
                        return Err(FailureReason::Source(format!(
                            "local bytes hash to {actual}"
                        )));
                    }
                    let payload = compress(data, compression)
                        .await
                        .map_err(|e| FailureReason::Source(format!("compression failed: {e}")))?;
                    let outcome = backend.put_chunk(&token, &chunk.hash, payload).await?;
                    Ok::<_, FailureReason>(outcome)
                }
            })
            .await;

        let result = tally(manifest, &plan, &run, |chunk, outcome, attempts| match outcome {
            PutOutcome::Created => ChunkOutcome::Transferred {
                bytes: chunk.length,
                attempts,
            },
            PutOutcome::AlreadyExists => ChunkOutcome::Skipped(SkipReason::AlreadyPresent),
        });

        check_finished(&artifact, &run, &result, cancel)?;

        let status = self.publish(manifest, token).await?;
        let summary = TransferSummary::new(manifest, &result, &plan.tuning);
        info!(
            transferred = summary.transferred,
            skipped = summary.already_present,
            bytes = summary.bytes_transferred,
            status = ?status,
            "push complete"
        );

        Ok(PushReport {
            artifact,
            root_hash: manifest.root_hash.to_hex(),
            total_size: manifest.total_size,
            key_name,
            manifest: status,
            summary,
            result,
        })
    }

    async fn publish(&self, manifest: &Manifest, token: &Token) -> Result<ManifestStatus> {
        let retry = &self.options.retry;
        match retry
            .run("manifest publish", || self.backend.put_manifest(token, manifest))
            .await
        {
            Ok(()) => Ok(ManifestStatus::Published),
            Err(WireError::Conflict(msg)) => {
                let remote = retry
                    .run("manifest fetch", || {
                        self.backend.get_manifest(token, &manifest.artifact)
                    })
                    .await?;
                if remote.root_hash == manifest.root_hash && remote.total_size == manifest.total_size {
                    debug!("identical manifest already published");
                    Ok(ManifestStatus::AlreadyPublished)
                } else {
                    Err(WireError::Conflict(format!(
                        "{msg}; remote root {} differs from local {}",
                        remote.root_hash.short(),
                        manifest.root_hash.short()
                    ))
                    .into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch, verify, download and reassemble an artifact.
    ///
    /// The manifest signature is checked before any chunk is requested, and
    /// bytes are only returned once the reassembled root hash matches.
    #[instrument(skip(self, cancel), fields(artifact = %artifact))]
    pub async fn pull(
        &self,
        artifact: &ArtifactId,
        cancel: &CancellationToken,
    ) -> Result<PulledArtifact> {
        let token = self.token()?;
        let retry = &self.options.retry;
        let manifest = retry
            .run("manifest fetch", || self.backend.get_manifest(&token, artifact))
            .await?;
        manifest.validate_layout()?;
        verify_manifest(&manifest, self.keys.trusted_keys()).map_err(|e| {
            error!(error = %e, "rejecting manifest");
            TransferError::Verification(e)
        })?;
        let key_name = manifest
            .signature
            .as_ref()
            .map(|s| s.key_name.clone())
            .unwrap_or_default();

        let mut payloads: HashMap<ChunkHash, Bytes> = HashMap::new();
        let mut present = HashMap::new();
        if let Some(cache) = &self.options.local_cache {
            for hash in manifest.unique_hashes() {
                if let Some(data) = cache.get(&hash).await {
                    payloads.insert(hash, data);
                    present.insert(hash, SkipReason::LocallyPresent);
                }
            }
        }

        let tuning = self.tune(&token).await;
        let plan = TransferPlan::new(&manifest, &present, tuning);
        info!(
            pending = plan.pending().len(),
            cached = plan.skipped().len(),
            bytes = plan.pending_bytes(),
            concurrency = plan.concurrency(),
            source = %plan.tuning.source,
            "downloading chunks"
        );

        let scheduler = Scheduler::new(plan.concurrency(), retry.clone());
        let run = scheduler
            .run(plan.pending().to_vec(), cancel, |chunk| {
                let backend = self.backend.clone();
                let cache = self.options.local_cache.clone();
                let token = token.clone();
                async move {
                    let payload = backend.get_chunk(&token, &chunk.hash).await?;
                    let data = decompress(&payload, chunk.length)
                        .await
                        .map_err(|e| FailureReason::Undecodable(e.to_string()))?;
                    let actual = ChunkHash::compute(&data);
                    if actual != chunk.hash {
                        return Err(FailureReason::Integrity { actual });
                    }
                    if let Some(cache) = cache
                        && let Err(e) = cache.put(&chunk.hash, &data).await
                    {
                        warn!(chunk = %chunk.hash, error = %e, "failed to write local cache");
                    }
                    Ok::<_, FailureReason>(data)
                }
            })
            .await;

        let result = tally(&manifest, &plan, &run, |_, data, attempts| {
            ChunkOutcome::Transferred {
                bytes: data.len() as u64,
                attempts,
            }
        });

        let artifact_name = manifest.artifact.to_string();
        let corrupt: Vec<&ChunkFailure> = run
            .failures
            .iter()
            .filter(|f| {
                matches!(
                    f.reason,
                    FailureReason::Integrity { .. } | FailureReason::Undecodable(_)
                )
            })
            .collect();
        if !corrupt.is_empty() && !run.canceled {
            let detail = corrupt
                .iter()
                .map(|f| format!("chunk {} ({})", f.hash, f.reason))
                .collect::<Vec<_>>()
                .join("; ");
            error!(%detail, "backend returned corrupt chunks");
            return Err(TransferError::Integrity {
                artifact: artifact_name,
                detail,
            });
        }
        check_finished(&artifact_name, &run, &result, cancel)?;

        for (hash, (data, _)) in run.completed {
            payloads.insert(hash, data);
        }
        let ordered = manifest
            .chunks
            .iter()
            .map(|chunk| {
                payloads
                    .get(&chunk.hash)
                    .cloned()
                    .ok_or_else(|| TransferError::Integrity {
                        artifact: artifact_name.clone(),
                        detail: format!("no payload for chunk {}", chunk.hash),
                    })
            })
            .collect::<Result<Vec<Bytes>>>()?;
        let data = reassemble(&manifest, ordered)?;

        let summary = TransferSummary::new(&manifest, &result, &plan.tuning);
        info!(
            transferred = summary.transferred,
            cached = summary.locally_present,
            bytes = summary.bytes_transferred,
            "pull complete"
        );

        let report = PullReport {
            artifact: artifact_name,
            root_hash: manifest.root_hash.to_hex(),
            total_size: manifest.total_size,
            key_name,
            summary,
            result,
        };
        Ok(PulledArtifact {
            data,
            manifest,
            report,
        })
    }
}

/// Build per-chunk outcomes in manifest order.
fn tally<T>(
    manifest: &Manifest,
    plan: &TransferPlan,
    run: &SchedulerRun<T>,
    outcome_of: impl Fn(&ChunkRef, &T, u32) -> ChunkOutcome,
) -> TransferResult {
    let skipped: HashMap<ChunkHash, SkipReason> = plan.skipped().iter().copied().collect();
    let failed: HashMap<ChunkHash, &ChunkFailure> =
        run.failures.iter().map(|f| (f.hash, f)).collect();

    let mut seen = HashSet::new();
    let mut result = TransferResult::default();
    for chunk in &manifest.chunks {
        if !seen.insert(chunk.hash) {
            continue;
        }
        let outcome = if let Some(reason) = skipped.get(&chunk.hash) {
            ChunkOutcome::Skipped(*reason)
        } else if let Some((value, attempts)) = run.completed.get(&chunk.hash) {
            outcome_of(chunk, value, *attempts)
        } else if let Some(failure) = failed.get(&chunk.hash) {
            ChunkOutcome::Failed((*failure).clone())
        } else {
            // Left unfinished by cancellation.
            continue;
        };
        result.push(chunk.hash, outcome);
    }
    result
}

/// Turn a finished scheduler run into `Canceled` or `Failed` when it is one.
fn check_finished<T>(
    artifact: &str,
    run: &SchedulerRun<T>,
    result: &TransferResult,
    cancel: &CancellationToken,
) -> Result<()> {
    if run.canceled || cancel.is_cancelled() {
        let completed = result.len().saturating_sub(run.failures.len());
        for failure in &run.failures {
            error!(%failure, "chunk failed before cancellation");
        }
        warn!(
            completed,
            remaining = run.remaining.len(),
            "transfer canceled, manifest not published"
        );
        return Err(TransferError::Canceled {
            artifact: artifact.to_string(),
            completed,
            remaining: run.remaining.len(),
        });
    }
    if !result.is_success() {
        let failures = result.failures();
        for failure in &failures {
            error!(%failure, "chunk transfer failed");
        }
        return Err(TransferError::Failed {
            artifact: artifact.to_string(),
            failures,
            result: result.clone(),
        });
    }
    Ok(())
}
