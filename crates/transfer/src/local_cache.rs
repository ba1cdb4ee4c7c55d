//! On-disk chunk cache.

use bytes::Bytes;
use larder_core::ChunkHash;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Content-addressed chunk store under a local directory.
///
/// Chunks live at `<root>/chunks/<aa>/<bb>/<hash>`. Reads re-hash the
/// payload, so a damaged file is treated as absent rather than trusted.
#[derive(Clone, Debug)]
pub struct LocalChunkCache {
    root: PathBuf,
}

impl LocalChunkCache {
    /// Open (and create if needed) a cache directory.
    pub async fn open(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, hash: &ChunkHash) -> PathBuf {
        self.root.join(hash.to_object_key())
    }

    /// Read a chunk if present and intact.
    #[instrument(skip(self), fields(chunk = %hash))]
    pub async fn get(&self, hash: &ChunkHash) -> Option<Bytes> {
        let path = self.path_for(hash);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(error = %e, "failed to read cached chunk");
                return None;
            }
        };
        if larder_core::chunk::verify_payload(hash, &data).is_err() {
            warn!(path = %path.display(), "discarding corrupt cached chunk");
            let _ = fs::remove_file(&path).await;
            return None;
        }
        Some(Bytes::from(data))
    }

    /// Store a chunk. Concurrent writers of the same chunk are harmless.
    #[instrument(skip(self, data), fields(chunk = %hash, size = data.len()))]
    pub async fn put(&self, hash: &ChunkHash, data: &Bytes) -> std::io::Result<()> {
        let path = self.path_for(hash);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = path.with_file_name(format!("{hash}.tmp.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
        }
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalChunkCache::open(dir.path()).await.unwrap();
        let data = Bytes::from_static(b"cached chunk");
        let hash = ChunkHash::compute(&data);

        assert!(cache.get(&hash).await.is_none());
        cache.put(&hash, &data).await.unwrap();
        assert_eq!(cache.get(&hash).await.unwrap(), data);
        assert!(dir.path().join(hash.to_object_key()).exists());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalChunkCache::open(dir.path()).await.unwrap();
        let hash = ChunkHash::compute(b"expected");
        cache.put(&hash, &Bytes::from_static(b"tampered")).await.unwrap();

        assert!(cache.get(&hash).await.is_none());
        assert!(!dir.path().join(hash.to_object_key()).exists());
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalChunkCache::open(dir.path()).await.unwrap();
        let data = Bytes::from_static(b"x");
        let hash = ChunkHash::compute(&data);
        cache.put(&hash, &data).await.unwrap();
        cache.put(&hash, &data).await.unwrap();

        let parent = dir.path().join(hash.to_object_key());
        let entries: Vec<_> = std::fs::read_dir(parent.parent().unwrap())
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
