//! Bandwidth estimation and tier-based tuning.
//!
//! A short timed download from the backend's probe endpoint gives a
//! throughput estimate, which the fixed tier table turns into a concurrency
//! level and a chunk-size hint. Explicit overrides win over the probe, and a
//! failed or slow probe falls back to a CPU-derived concurrency instead of
//! failing the operation.

use larder_client::CacheBackend;
use larder_core::Token;
use larder_core::config::{ProbeConfig, TransferConfig};
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const MBPS: f64 = 1_000_000.0;

/// Bandwidth bracket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BandwidthTier {
    /// Below 1 Mbit/s.
    VerySlow,
    /// 1 to 10 Mbit/s.
    Slow,
    /// 10 to 100 Mbit/s.
    Medium,
    /// 100 to 500 Mbit/s.
    Fast,
    /// 500 Mbit/s and up.
    VeryFast,
}

/// One row of the tier table.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TierSpec {
    pub tier: BandwidthTier,
    /// Inclusive lower bound in bits per second.
    pub lower_bps: f64,
    /// Exclusive upper bound in bits per second.
    pub upper_bps: f64,
    pub concurrency: usize,
    /// Chunk-size hint in bytes.
    pub chunk_size: u64,
}

/// The fixed tier table, slowest first.
pub const TIERS: [TierSpec; 5] = [
    TierSpec {
        tier: BandwidthTier::VerySlow,
        lower_bps: 0.0,
        upper_bps: 1.0 * MBPS,
        concurrency: 1,
        chunk_size: 1_000_000,
    },
    TierSpec {
        tier: BandwidthTier::Slow,
        lower_bps: 1.0 * MBPS,
        upper_bps: 10.0 * MBPS,
        concurrency: 2,
        chunk_size: 2_000_000,
    },
    TierSpec {
        tier: BandwidthTier::Medium,
        lower_bps: 10.0 * MBPS,
        upper_bps: 100.0 * MBPS,
        concurrency: 4,
        chunk_size: 4_000_000,
    },
    TierSpec {
        tier: BandwidthTier::Fast,
        lower_bps: 100.0 * MBPS,
        upper_bps: 500.0 * MBPS,
        concurrency: 8,
        chunk_size: 8_000_000,
    },
    TierSpec {
        tier: BandwidthTier::VeryFast,
        lower_bps: 500.0 * MBPS,
        upper_bps: f64::INFINITY,
        concurrency: 16,
        chunk_size: 16_000_000,
    },
];

/// Chunk-size hint used when no tier was selected.
pub const FALLBACK_CHUNK_SIZE: u64 = 4_000_000;

/// Upper bound of the CPU-derived fallback concurrency.
pub const MAX_FALLBACK_CONCURRENCY: usize = 16;

/// Pick the tier for a bandwidth in bits per second.
///
/// NaN and negative values land in the slowest tier.
pub fn recommend(bits_per_sec: f64) -> TierSpec {
    TIERS
        .iter()
        .rev()
        .find(|row| bits_per_sec >= row.lower_bps)
        .copied()
        .unwrap_or(TIERS[0])
}

/// Concurrency derived from CPU parallelism: `min(max(ceil(cores * 1.5), 2), 16)`.
pub fn fallback_concurrency(cores: usize) -> usize {
    let scaled = (cores * 3).div_ceil(2);
    scaled.clamp(2, MAX_FALLBACK_CONCURRENCY)
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Where the chosen concurrency came from.
#[derive(Clone, Debug, PartialEq)]
pub enum ConcurrencySource {
    /// Explicit concurrency override.
    Override,
    /// Bandwidth override fed through the tier table.
    BandwidthOverride { mbps: f64 },
    /// Live probe fed through the tier table.
    Probe { bits_per_sec: f64, memoized: bool },
    /// CPU-derived fallback after the probe failed.
    Fallback { reason: String },
}

impl fmt::Display for ConcurrencySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Override => write!(f, "override"),
            Self::BandwidthOverride { mbps } => write!(f, "bandwidth override ({mbps:.1} Mbps)"),
            Self::Probe {
                bits_per_sec,
                memoized,
            } => {
                let mbps = bits_per_sec / MBPS;
                if *memoized {
                    write!(f, "probe ({mbps:.1} Mbps, cached)")
                } else {
                    write!(f, "probe ({mbps:.1} Mbps)")
                }
            }
            Self::Fallback { reason } => write!(f, "cpu fallback ({reason})"),
        }
    }
}

/// Concurrency and chunk-size hint for one operation.
#[derive(Clone, Debug, PartialEq)]
pub struct Tuning {
    pub concurrency: usize,
    /// Reported only. Chunk boundaries come from `chunking.target_size`.
    pub chunk_size: u64,
    pub tier: Option<BandwidthTier>,
    pub source: ConcurrencySource,
}

impl Tuning {
    fn from_tier(row: TierSpec, source: ConcurrencySource) -> Self {
        Self {
            concurrency: row.concurrency,
            chunk_size: row.chunk_size,
            tier: Some(row.tier),
            source,
        }
    }
}

/// Caller-supplied overrides, highest precedence first.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TuningOverrides {
    pub concurrency: Option<usize>,
    pub bandwidth_mbps: Option<f64>,
}

impl From<&TransferConfig> for TuningOverrides {
    fn from(config: &TransferConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            bandwidth_mbps: config.bandwidth_mbps,
        }
    }
}

/// A recent bandwidth estimate the caller may reuse across operations.
///
/// Owned by whoever runs several operations in a row; nothing here is
/// global.
#[derive(Debug)]
pub struct EstimateMemo {
    ttl: Duration,
    slot: Mutex<Option<(Instant, f64)>>,
}

impl EstimateMemo {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// The stored estimate, if it is younger than the TTL.
    pub fn get(&self) -> Option<f64> {
        let slot = self.slot.lock().ok()?;
        slot.and_then(|(at, bps)| (at.elapsed() < self.ttl).then_some(bps))
    }

    pub fn store(&self, bits_per_sec: f64) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some((Instant::now(), bits_per_sec));
        }
    }
}

/// Times a probe download against the backend.
#[derive(Clone, Debug)]
pub struct BandwidthEstimator {
    probe_bytes: u64,
    timeout: Duration,
    cores: usize,
}

impl BandwidthEstimator {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            probe_bytes: config.bytes,
            timeout: config.timeout(),
            cores: available_cores(),
        }
    }

    /// Override the detected core count.
    pub fn with_cores(mut self, cores: usize) -> Self {
        self.cores = cores;
        self
    }

    /// Measure throughput in bits per second.
    ///
    /// Bounded by the probe timeout; returns an error string rather than
    /// failing the caller.
    pub async fn estimate(
        &self,
        backend: &dyn CacheBackend,
        token: &Token,
    ) -> std::result::Result<f64, String> {
        let started = Instant::now();
        let body = tokio::time::timeout(self.timeout, backend.probe(token, self.probe_bytes))
            .await
            .map_err(|_| format!("probe exceeded {:?}", self.timeout))?
            .map_err(|e| e.to_string())?;
        if body.is_empty() {
            return Err("probe returned no data".to_string());
        }
        let elapsed = started.elapsed().max(Duration::from_millis(1));
        let bps = (body.len() as f64 * 8.0) / elapsed.as_secs_f64();
        debug!(bytes = body.len(), ?elapsed, bits_per_sec = bps, "bandwidth probe complete");
        Ok(bps)
    }

    /// Resolve concurrency and chunk-size hint for an operation.
    ///
    /// Precedence: concurrency override, bandwidth override, probe (memoized
    /// if a fresh estimate is available), CPU fallback. Never fails.
    pub async fn resolve(
        &self,
        overrides: TuningOverrides,
        backend: &dyn CacheBackend,
        token: &Token,
        memo: Option<&EstimateMemo>,
    ) -> Tuning {
        if let Some(concurrency) = overrides.concurrency.filter(|c| *c > 0) {
            // The chunk hint still follows bandwidth when that is known.
            let chunk_size = overrides
                .bandwidth_mbps
                .map(|mbps| recommend(mbps * MBPS).chunk_size)
                .unwrap_or(FALLBACK_CHUNK_SIZE);
            info!(concurrency, "using explicit concurrency override");
            return Tuning {
                concurrency,
                chunk_size,
                tier: None,
                source: ConcurrencySource::Override,
            };
        }

        if let Some(mbps) = overrides.bandwidth_mbps {
            let row = recommend(mbps * MBPS);
            info!(mbps, tier = ?row.tier, concurrency = row.concurrency, "using bandwidth override");
            return Tuning::from_tier(row, ConcurrencySource::BandwidthOverride { mbps });
        }

        if let Some(bps) = memo.and_then(EstimateMemo::get) {
            let row = recommend(bps);
            debug!(bits_per_sec = bps, tier = ?row.tier, "reusing recent bandwidth estimate");
            return Tuning::from_tier(
                row,
                ConcurrencySource::Probe {
                    bits_per_sec: bps,
                    memoized: true,
                },
            );
        }

        match self.estimate(backend, token).await {
            Ok(bps) => {
                if let Some(memo) = memo {
                    memo.store(bps);
                }
                let row = recommend(bps);
                info!(
                    mbps = bps / MBPS,
                    tier = ?row.tier,
                    concurrency = row.concurrency,
                    "detected bandwidth"
                );
                Tuning::from_tier(
                    row,
                    ConcurrencySource::Probe {
                        bits_per_sec: bps,
                        memoized: false,
                    },
                )
            }
            Err(reason) => {
                let concurrency = fallback_concurrency(self.cores);
                warn!(%reason, concurrency, "bandwidth probe failed, using CPU-based concurrency");
                Tuning {
                    concurrency,
                    chunk_size: FALLBACK_CHUNK_SIZE,
                    tier: None,
                    source: ConcurrencySource::Fallback { reason },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(recommend(0.0).tier, BandwidthTier::VerySlow);
        assert_eq!(recommend(999_999.0).tier, BandwidthTier::VerySlow);
        assert_eq!(recommend(1.0 * MBPS).tier, BandwidthTier::Slow);
        assert_eq!(recommend(50.0 * MBPS).tier, BandwidthTier::Medium);
        assert_eq!(recommend(100.0 * MBPS).tier, BandwidthTier::Fast);
        assert_eq!(recommend(499.9 * MBPS).tier, BandwidthTier::Fast);
        assert_eq!(recommend(500.0 * MBPS).tier, BandwidthTier::VeryFast);
        assert_eq!(recommend(10_000.0 * MBPS).concurrency, 16);
        assert_eq!(recommend(f64::NAN).tier, BandwidthTier::VerySlow);
        assert_eq!(recommend(-5.0).tier, BandwidthTier::VerySlow);
    }

    #[test]
    fn test_tier_table_values() {
        let expected = [(1, 1_000_000), (2, 2_000_000), (4, 4_000_000), (8, 8_000_000), (16, 16_000_000)];
        for (row, (concurrency, chunk)) in TIERS.iter().zip(expected) {
            assert_eq!(row.concurrency, concurrency);
            assert_eq!(row.chunk_size, chunk);
        }
    }

    #[test]
    fn test_recommend_is_monotonic() {
        let samples: Vec<f64> = (0..2000).map(|i| (i as f64) * 0.5 * MBPS).collect();
        for pair in samples.windows(2) {
            assert!(recommend(pair[0]).concurrency <= recommend(pair[1]).concurrency);
            assert!(recommend(pair[0]).chunk_size <= recommend(pair[1]).chunk_size);
        }
    }

    #[test]
    fn test_fallback_concurrency() {
        assert_eq!(fallback_concurrency(0), 2);
        assert_eq!(fallback_concurrency(1), 2);
        assert_eq!(fallback_concurrency(2), 3);
        assert_eq!(fallback_concurrency(3), 5);
        assert_eq!(fallback_concurrency(8), 12);
        assert_eq!(fallback_concurrency(11), 16);
        assert_eq!(fallback_concurrency(64), 16);
    }

    #[test]
    fn test_memo_expires() {
        let memo = EstimateMemo::new(Duration::from_millis(0));
        memo.store(5.0 * MBPS);
        assert_eq!(memo.get(), None);

        let memo = EstimateMemo::new(Duration::from_secs(60));
        assert_eq!(memo.get(), None);
        memo.store(5.0 * MBPS);
        assert_eq!(memo.get(), Some(5.0 * MBPS));
    }
}
