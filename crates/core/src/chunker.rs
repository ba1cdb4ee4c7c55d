//! Content-defined chunking and reassembly.
//!
//! Boundaries come from FastCDC's rolling gear hash over the content, so an
//! edit only disturbs the chunks next to it and near-identical artifacts share
//! most of their chunk hashes. The gear table and the size parameters fully
//! determine the cut points: the same bytes under the same [`ChunkerConfig`]
//! produce the same chunks on every machine and across restarts.

use crate::artifact::ArtifactId;
use crate::chunk::Chunk;
use crate::hash::{ContentHash, ContentHasher};
use crate::manifest::Manifest;
use bytes::{Bytes, BytesMut};
use fastcdc::v2020::StreamCDC;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Smallest minimum chunk size FastCDC accepts.
pub const MIN_SIZE_FLOOR: u32 = 64;
/// Largest minimum chunk size FastCDC accepts (1 MiB).
pub const MIN_SIZE_CEIL: u32 = 1_048_576;
/// Smallest average chunk size FastCDC accepts.
pub const AVG_SIZE_FLOOR: u32 = 256;
/// Largest average chunk size FastCDC accepts (4 MiB).
pub const AVG_SIZE_CEIL: u32 = 4_194_304;
/// Smallest maximum chunk size FastCDC accepts.
pub const MAX_SIZE_FLOOR: u32 = 1024;
/// Largest maximum chunk size FastCDC accepts (16 MiB).
pub const MAX_SIZE_CEIL: u32 = 16_777_216;

/// Size parameters for the chunker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    min_size: u32,
    avg_size: u32,
    max_size: u32,
}

impl ChunkerConfig {
    /// Create a config from explicit sizes.
    ///
    /// Sizes must satisfy `min <= avg <= max` and lie within FastCDC's
    /// supported ranges.
    pub fn new(min_size: u32, avg_size: u32, max_size: u32) -> crate::Result<Self> {
        let config = Self {
            min_size,
            avg_size,
            max_size,
        };
        config.validate()?;
        Ok(config)
    }

    /// Derive a config from a target (average) chunk size.
    ///
    /// Uses `min = target / 4` and `max = target * 4`, each clamped to the
    /// FastCDC bounds. Targets above 4 MiB are capped at 4 MiB.
    pub fn from_target(target: u64) -> Self {
        let avg = target.clamp(AVG_SIZE_FLOOR as u64, AVG_SIZE_CEIL as u64) as u32;
        let min = (avg / 4).clamp(MIN_SIZE_FLOOR, MIN_SIZE_CEIL);
        let max = avg
            .saturating_mul(4)
            .clamp(MAX_SIZE_FLOOR, MAX_SIZE_CEIL)
            .max(avg);
        Self {
            min_size: min,
            avg_size: avg,
            max_size: max,
        }
    }

    /// Check ordering and FastCDC bounds.
    pub fn validate(&self) -> crate::Result<()> {
        let err = |msg: String| Err(crate::Error::InvalidChunkerConfig(msg));
        if !(MIN_SIZE_FLOOR..=MIN_SIZE_CEIL).contains(&self.min_size) {
            return err(format!(
                "min size {} outside {MIN_SIZE_FLOOR}..={MIN_SIZE_CEIL}",
                self.min_size
            ));
        }
        if !(AVG_SIZE_FLOOR..=AVG_SIZE_CEIL).contains(&self.avg_size) {
            return err(format!(
                "average size {} outside {AVG_SIZE_FLOOR}..={AVG_SIZE_CEIL}",
                self.avg_size
            ));
        }
        if !(MAX_SIZE_FLOOR..=MAX_SIZE_CEIL).contains(&self.max_size) {
            return err(format!(
                "max size {} outside {MAX_SIZE_FLOOR}..={MAX_SIZE_CEIL}",
                self.max_size
            ));
        }
        if self.min_size > self.avg_size || self.avg_size > self.max_size {
            return err(format!(
                "sizes must satisfy min <= avg <= max (got {} / {} / {})",
                self.min_size, self.avg_size, self.max_size
            ));
        }
        Ok(())
    }

    /// Minimum chunk size in bytes (the final chunk may be shorter).
    pub fn min_size(&self) -> u32 {
        self.min_size
    }

    /// Target average chunk size in bytes.
    pub fn avg_size(&self) -> u32 {
        self.avg_size
    }

    /// Maximum chunk size in bytes.
    pub fn max_size(&self) -> u32 {
        self.max_size
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self::from_target(crate::DEFAULT_TARGET_CHUNK_SIZE)
    }
}

/// Content-defined chunker.
#[derive(Clone, Copy, Debug, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a chunker with a validated config.
    pub fn new(config: ChunkerConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The size parameters in use.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Start chunking a byte source.
    ///
    /// Chunks are produced lazily as the returned iterator is driven; calling
    /// `chunk` again on the same bytes starts over from the beginning.
    pub fn chunk<R: Read>(&self, reader: R) -> ChunkStream<R> {
        ChunkStream {
            inner: StreamCDC::new(
                reader,
                self.config.min_size,
                self.config.avg_size,
                self.config.max_size,
            ),
            root: ContentHash::hasher(),
            total_size: 0,
        }
    }

    /// Chunk an in-memory artifact and build its (unsigned) manifest.
    ///
    /// The returned chunk payloads are slices of `data`.
    pub fn chunk_artifact(
        &self,
        artifact: ArtifactId,
        data: &Bytes,
    ) -> crate::Result<(Manifest, Vec<Chunk>)> {
        let mut stream = self.chunk(std::io::Cursor::new(data.as_ref()));
        let mut chunks = Vec::new();
        for entry in stream.by_ref() {
            let entry = entry?;
            let start = entry.offset as usize;
            let end = start + entry.data.len();
            chunks.push(Chunk {
                hash: entry.hash,
                offset: entry.offset,
                data: data.slice(start..end),
            });
        }
        let summary = stream.finish();
        let refs = chunks.iter().map(Chunk::to_ref).collect();
        let manifest = Manifest::new(artifact, refs, summary.total_size, summary.root_hash);
        Ok((manifest, chunks))
    }
}

/// Lazy iterator over the chunks of a byte source.
pub struct ChunkStream<R: Read> {
    inner: StreamCDC<R>,
    root: ContentHasher,
    total_size: u64,
}

/// Root hash and size of everything a [`ChunkStream`] consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkingSummary {
    /// SHA-256 of the full artifact.
    pub root_hash: ContentHash,
    /// Total artifact size.
    pub total_size: u64,
}

impl<R: Read> ChunkStream<R> {
    /// Consume the stream and return the artifact's root hash and size.
    ///
    /// Only meaningful once the iterator has been fully drained.
    pub fn finish(self) -> ChunkingSummary {
        ChunkingSummary {
            root_hash: self.root.finalize(),
            total_size: self.total_size,
        }
    }
}

impl<R: Read> Iterator for ChunkStream<R> {
    type Item = crate::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok(entry) => {
                self.root.update(&entry.data);
                self.total_size += entry.length as u64;
                Some(Ok(Chunk::new(entry.offset, Bytes::from(entry.data))))
            }
            Err(fastcdc::v2020::Error::IoError(e)) => Some(Err(crate::Error::Io(e))),
            Err(e) => Some(Err(crate::Error::Codec(format!("chunking failed: {e}")))),
        }
    }
}

/// Concatenate chunk payloads in manifest order and check the root hash.
///
/// Fails with [`crate::Error::Integrity`] if the payload count, the total
/// length or the root hash disagree with the manifest. Nothing is returned
/// unless the bytes verify.
pub fn reassemble<I>(manifest: &Manifest, payloads: I) -> crate::Result<Bytes>
where
    I: IntoIterator<Item = Bytes>,
{
    let capacity = usize::try_from(manifest.total_size).map_err(|_| {
        crate::Error::ManifestLayout("artifact size exceeds platform limits".to_string())
    })?;
    let mut out = BytesMut::with_capacity(capacity);
    let mut hasher = ContentHash::hasher();
    let mut count = 0usize;

    for payload in payloads {
        hasher.update(&payload);
        out.extend_from_slice(&payload);
        count += 1;
    }

    let integrity = |actual: String| crate::Error::Integrity {
        artifact: manifest.artifact.to_string(),
        expected: manifest.root_hash.to_hex(),
        actual,
    };

    if count != manifest.chunks.len() {
        return Err(integrity(format!(
            "{count} payloads for {} chunks",
            manifest.chunks.len()
        )));
    }
    if out.len() as u64 != manifest.total_size {
        return Err(integrity(format!("{} bytes", out.len())));
    }
    let actual = hasher.finalize();
    if actual != manifest.root_hash {
        return Err(integrity(actual.to_hex()));
    }
    Ok(out.freeze())
}
