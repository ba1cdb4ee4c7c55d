//! Per-chunk zstd compression.
//!
//! Chunks are hashed before compression and after decompression, so the
//! encoding never touches addressing.

use async_compression::tokio::bufread::ZstdDecoder;
use async_compression::tokio::write::ZstdEncoder;
use bytes::Bytes;
use larder_core::{ChunkPayload, Compression};
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Encode `data` for upload. Falls back to raw bytes when compression does
/// not make the payload smaller.
pub async fn compress(data: Bytes, compression: Compression) -> io::Result<ChunkPayload> {
    match compression {
        Compression::None => Ok(ChunkPayload::raw(data)),
        Compression::Zstd => {
            let mut output = Vec::new();
            let mut encoder =
                ZstdEncoder::with_quality(&mut output, async_compression::Level::Default);
            encoder.write_all(&data).await?;
            encoder.shutdown().await?;
            if output.len() < data.len() {
                Ok(ChunkPayload::new(Compression::Zstd, Bytes::from(output)))
            } else {
                Ok(ChunkPayload::raw(data))
            }
        }
    }
}

/// Decode a downloaded payload. Zstd output must be exactly `expected_len`
/// bytes; reading stops one byte past it.
pub async fn decompress(payload: &ChunkPayload, expected_len: u64) -> io::Result<Bytes> {
    match payload.compression {
        Compression::None => Ok(payload.data.clone()),
        Compression::Zstd => {
            let decoder = ZstdDecoder::new(&payload.data[..]);
            let mut output = Vec::new();
            decoder
                .take(expected_len.saturating_add(1))
                .read_to_end(&mut output)
                .await?;
            if output.len() as u64 != expected_len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "decompressed to {} bytes, expected {expected_len}",
                        output.len()
                    ),
                ));
            }
            Ok(Bytes::from(output))
        }
    }
}
