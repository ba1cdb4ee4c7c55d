//! Where push reads chunk payloads from.

use bytes::Bytes;
use larder_core::ChunkRef;

/// Supplies the bytes of a chunk by its position in the artifact.
pub trait ChunkSource: Send + Sync {
    fn load(&self, chunk: &ChunkRef) -> std::io::Result<Bytes>;
}

/// An artifact held in memory.
#[derive(Clone, Debug)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }
}

impl ChunkSource for MemorySource {
    fn load(&self, chunk: &ChunkRef) -> std::io::Result<Bytes> {
        let out_of_range = || {
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "chunk {}..{} outside artifact of {} bytes",
                    chunk.offset,
                    chunk.end(),
                    self.data.len()
                ),
            )
        };
        let start = usize::try_from(chunk.offset).map_err(|_| out_of_range())?;
        let end = usize::try_from(chunk.end()).map_err(|_| out_of_range())?;
        if end > self.data.len() {
            return Err(out_of_range());
        }
        Ok(self.data.slice(start..end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::ChunkHash;

    #[test]
    fn test_memory_source_slices() {
        let source = MemorySource::new(Bytes::from_static(b"hello world"));
        let chunk = ChunkRef::new(ChunkHash::compute(b"world"), 6, 5);
        assert_eq!(&source.load(&chunk).unwrap()[..], b"world");

        let past_end = ChunkRef::new(ChunkHash::compute(b"x"), 8, 5);
        assert!(source.load(&past_end).is_err());
    }
}
