use async_trait::async_trait;
use bytes::Bytes;
use larder_client::{CacheBackend, PutOutcome, StaticCredentials, WireError, WireResult};
use larder_core::{ArtifactId, ChunkHash, ChunkPayload, Compression, Manifest, Token};
use larder_signer::{ManifestSigner, StaticKeyProvider, TrustedKeys};
use larder_transfer::{
    BandwidthEstimator, EngineOptions, RetryPolicy, TransferEngine, TuningOverrides,
};
use larder_core::config::ProbeConfig;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TOKEN: &str = "test-token";

#[derive(Default)]
struct Faults {
    /// Remaining transient failures per chunk (put and get).
    transient: HashMap<ChunkHash, usize>,
    permanent: HashSet<ChunkHash>,
    corrupt: HashSet<ChunkHash>,
    truncate: HashSet<ChunkHash>,
    delay: Duration,
    probe_fails: bool,
}

/// In-memory cache backend with fault injection and call accounting.
#[allow(dead_code)]
#[derive(Default)]
pub struct MemoryBackend {
    chunks: Mutex<HashMap<ChunkHash, ChunkPayload>>,
    manifests: Mutex<HashMap<ArtifactId, Manifest>>,
    faults: Mutex<Faults>,
    pub existence_calls: AtomicUsize,
    pub put_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub manifest_puts: AtomicUsize,
    pub probe_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[allow(dead_code)]
impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_transient(&self, hash: ChunkHash, times: usize) {
        self.faults.lock().unwrap().transient.insert(hash, times);
    }

    pub fn fail_permanent(&self, hash: ChunkHash) {
        self.faults.lock().unwrap().permanent.insert(hash);
    }

    pub fn corrupt(&self, hash: ChunkHash) {
        self.faults.lock().unwrap().corrupt.insert(hash);
    }

    /// Serve only the first half of the stored payload.
    pub fn truncate(&self, hash: ChunkHash) {
        self.faults.lock().unwrap().truncate.insert(hash);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.faults.lock().unwrap().delay = delay;
    }

    pub fn fail_probe(&self) {
        self.faults.lock().unwrap().probe_fails = true;
    }

    pub fn insert_chunk(&self, data: Bytes) -> ChunkHash {
        let hash = ChunkHash::compute(&data);
        self.chunks
            .lock()
            .unwrap()
            .insert(hash, ChunkPayload::raw(data));
        hash
    }

    /// The payload as uploaded, still encoded.
    pub fn stored(&self, hash: &ChunkHash) -> Option<ChunkPayload> {
        self.chunks.lock().unwrap().get(hash).cloned()
    }

    pub fn remove_chunk(&self, hash: &ChunkHash) {
        self.chunks.lock().unwrap().remove(hash);
    }

    pub fn has_chunk(&self, hash: &ChunkHash) -> bool {
        self.chunks.lock().unwrap().contains_key(hash)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }

    pub fn insert_manifest(&self, manifest: Manifest) {
        self.manifests
            .lock()
            .unwrap()
            .insert(manifest.artifact.clone(), manifest);
    }

    pub fn manifest(&self, artifact: &ArtifactId) -> Option<Manifest> {
        self.manifests.lock().unwrap().get(artifact).cloned()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    /// Apply injected faults for a chunk request.
    async fn chunk_faults(&self, hash: &ChunkHash) -> WireResult<()> {
        let delay = self.faults.lock().unwrap().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut faults = self.faults.lock().unwrap();
        if faults.permanent.contains(hash) {
            return Err(WireError::Rejected {
                status: 403,
                body: "forbidden".to_string(),
            });
        }
        if let Some(remaining) = faults.transient.get_mut(hash)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(WireError::Server {
                status: 503,
                body: "unavailable".to_string(),
            });
        }
        Ok(())
    }
}

fn check_token(token: &Token) -> WireResult<()> {
    if token.secret() == TOKEN {
        Ok(())
    } else {
        Err(WireError::Auth {
            status: 401,
            body: "bad token".to_string(),
        })
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn query_existence(
        &self,
        token: &Token,
        hashes: &[ChunkHash],
    ) -> WireResult<HashSet<ChunkHash>> {
        check_token(token)?;
        self.existence_calls.fetch_add(1, Ordering::SeqCst);
        let chunks = self.chunks.lock().unwrap();
        Ok(hashes
            .iter()
            .filter(|h| chunks.contains_key(h))
            .copied()
            .collect())
    }

    async fn put_chunk(
        &self,
        token: &Token,
        hash: &ChunkHash,
        payload: ChunkPayload,
    ) -> WireResult<PutOutcome> {
        check_token(token)?;
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter();
        self.chunk_faults(hash).await?;
        let mut chunks = self.chunks.lock().unwrap();
        if chunks.contains_key(hash) {
            return Ok(PutOutcome::AlreadyExists);
        }
        chunks.insert(*hash, payload);
        Ok(PutOutcome::Created)
    }

    async fn get_chunk(&self, token: &Token, hash: &ChunkHash) -> WireResult<ChunkPayload> {
        check_token(token)?;
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.enter();
        self.chunk_faults(hash).await?;
        let payload = self
            .stored(hash)
            .ok_or_else(|| WireError::NotFound(format!("chunk {hash}")))?;
        let (corrupt, truncate) = {
            let faults = self.faults.lock().unwrap();
            (faults.corrupt.contains(hash), faults.truncate.contains(hash))
        };
        if corrupt {
            // Served as raw bytes, so only the hash check can catch it.
            let mut tampered = payload.data.to_vec();
            tampered.push(0xff);
            return Ok(ChunkPayload::raw(Bytes::from(tampered)));
        }
        if truncate {
            let cut = payload.data.slice(..payload.len() / 2);
            return Ok(ChunkPayload::new(payload.compression, cut));
        }
        Ok(payload)
    }

    async fn get_manifest(&self, token: &Token, artifact: &ArtifactId) -> WireResult<Manifest> {
        check_token(token)?;
        self.manifest(artifact)
            .ok_or_else(|| WireError::NotFound(format!("manifest for {artifact}")))
    }

    async fn put_manifest(&self, token: &Token, manifest: &Manifest) -> WireResult<()> {
        check_token(token)?;
        self.manifest_puts.fetch_add(1, Ordering::SeqCst);
        let mut manifests = self.manifests.lock().unwrap();
        if manifests.contains_key(&manifest.artifact) {
            return Err(WireError::Conflict(format!(
                "manifest for {} already published",
                manifest.artifact
            )));
        }
        manifests.insert(manifest.artifact.clone(), manifest.clone());
        Ok(())
    }

    async fn probe(&self, token: &Token, bytes: u64) -> WireResult<Bytes> {
        check_token(token)?;
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if self.faults.lock().unwrap().probe_fails {
            return Err(WireError::Network("connection reset".to_string()));
        }
        Ok(Bytes::from(vec![0u8; bytes as usize]))
    }
}

/// Deterministic filler bytes.
#[allow(dead_code)]
pub fn pseudo_random(len: usize, seed: u64) -> Bytes {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 32) as u8
        })
        .collect::<Vec<u8>>()
        .into()
}

#[allow(dead_code)]
pub fn artifact(name: &str) -> ArtifactId {
    ArtifactId::new(format!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-{name}")).unwrap()
}

#[allow(dead_code)]
pub fn options(concurrency: usize, chunk_target: u64) -> EngineOptions {
    EngineOptions {
        chunk_target,
        compression: Compression::Zstd,
        overrides: TuningOverrides {
            concurrency: Some(concurrency),
            bandwidth_mbps: None,
        },
        retry: RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(10),
        },
        estimator: BandwidthEstimator::new(&ProbeConfig::default()),
        local_cache: None,
    }
}

#[allow(dead_code)]
pub fn keys(signer: ManifestSigner) -> Arc<StaticKeyProvider> {
    Arc::new(StaticKeyProvider::new(Some(signer), TrustedKeys::new()))
}

#[allow(dead_code)]
pub fn engine(
    backend: Arc<MemoryBackend>,
    signer: ManifestSigner,
    options: EngineOptions,
) -> TransferEngine {
    TransferEngine::new(
        backend,
        Arc::new(StaticCredentials::new(Token::new(TOKEN))),
        keys(signer),
        options,
    )
}
