//! HTTPS implementation of [`CacheBackend`].

use crate::backend::{CacheBackend, PutOutcome};
use crate::error::{WireError, WireResult};
use async_trait::async_trait;
use bytes::Bytes;
use larder_core::codec::{self, CONTENT_TYPE, ExistenceResponse};
use larder_core::{
    ArtifactId, ChunkHash, ChunkPayload, ClientConfig, Compression, Manifest, Token,
};
use reqwest::{StatusCode, Url, header};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, instrument};

const OCTET_STREAM: &str = "application/octet-stream";
const ACCEPTED_ENCODINGS: &str = "zstd, identity";

/// Connection settings for [`HttpCacheClient`].
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    /// Server base URL.
    pub base_url: String,
    /// Cache namespace sent with every request.
    pub cache: String,
    /// Timeout for each individual request.
    pub request_timeout: Duration,
    /// Maximum hashes per existence request.
    pub existence_batch_size: usize,
}

impl From<&ClientConfig> for HttpClientConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            base_url: config.server.clone(),
            cache: config.cache.clone(),
            request_timeout: config.request_timeout(),
            existence_batch_size: config.existence_batch_size,
        }
    }
}

/// Cache client over a pooled HTTP(S) connection.
///
/// Cheap to clone; clones share the connection pool and may be used from
/// many tasks at once.
#[derive(Clone)]
pub struct HttpCacheClient {
    http: reqwest::Client,
    base_url: Url,
    cache: String,
    batch_size: usize,
}

impl HttpCacheClient {
    pub fn new(config: HttpClientConfig) -> WireResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| WireError::InvalidRequest(format!("invalid server URL: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout.min(Duration::from_secs(30)))
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("larder/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WireError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url,
            cache: config.cache,
            batch_size: config.existence_batch_size.max(1),
        })
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> WireResult<Url> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| WireError::InvalidRequest(format!("failed to build URL: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("cache", &self.cache);
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send(&self, req: reqwest::RequestBuilder, token: &Token) -> WireResult<reqwest::Response> {
        Ok(req.bearer_auth(token.secret()).send().await?)
    }

    async fn error_body(response: reqwest::Response) -> String {
        response.text().await.unwrap_or_default()
    }

    async fn query_batch(
        &self,
        token: &Token,
        batch: &[ChunkHash],
    ) -> WireResult<Vec<ChunkHash>> {
        let joined = batch
            .iter()
            .map(ChunkHash::to_hex)
            .collect::<Vec<_>>()
            .join(",");
        let url = self.url("/v1/existence", &[("hashes", &joined)])?;
        let response = self
            .send(
                self.http.get(url).header(header::ACCEPT, CONTENT_TYPE),
                token,
            )
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WireError::from_status(status, Self::error_body(response).await));
        }
        let body = response.bytes().await?;
        let decoded: ExistenceResponse = codec::decode(&body)?;
        Ok(decoded.present)
    }
}

#[async_trait]
impl CacheBackend for HttpCacheClient {
    #[instrument(skip(self, token, hashes), fields(count = hashes.len()))]
    async fn query_existence(
        &self,
        token: &Token,
        hashes: &[ChunkHash],
    ) -> WireResult<HashSet<ChunkHash>> {
        let requested: HashSet<ChunkHash> = hashes.iter().copied().collect();
        let unique: Vec<ChunkHash> = requested.iter().copied().collect();
        let mut present = HashSet::new();

        for batch in unique.chunks(self.batch_size) {
            for hash in self.query_batch(token, batch).await? {
                // Ignore anything we did not ask about.
                if requested.contains(&hash) {
                    present.insert(hash);
                }
            }
        }

        debug!(present = present.len(), "existence query complete");
        Ok(present)
    }

    #[instrument(
        skip(self, token, payload),
        fields(chunk = %hash, size = payload.len(), compression = %payload.compression)
    )]
    async fn put_chunk(
        &self,
        token: &Token,
        hash: &ChunkHash,
        payload: ChunkPayload,
    ) -> WireResult<PutOutcome> {
        let url = self.url("/v1/chunk", &[("hash", &hash.to_hex())])?;
        let mut req = self.http.put(url).header(header::CONTENT_TYPE, OCTET_STREAM);
        if let Some(encoding) = payload.compression.content_encoding() {
            req = req.header(header::CONTENT_ENCODING, encoding);
        }
        let response = self.send(req.body(payload.data), token).await?;
        match response.status() {
            StatusCode::CREATED => Ok(PutOutcome::Created),
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(PutOutcome::AlreadyExists),
            status => Err(WireError::from_status(status, Self::error_body(response).await)),
        }
    }

    #[instrument(skip(self, token), fields(chunk = %hash))]
    async fn get_chunk(&self, token: &Token, hash: &ChunkHash) -> WireResult<ChunkPayload> {
        let url = self.url("/v1/chunk", &[("hash", &hash.to_hex())])?;
        let response = self
            .send(
                self.http
                    .get(url)
                    .header(header::ACCEPT_ENCODING, ACCEPTED_ENCODINGS),
                token,
            )
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(WireError::NotFound(format!("chunk {hash}")));
        }
        if !status.is_success() {
            return Err(WireError::from_status(status, Self::error_body(response).await));
        }
        let compression = match response.headers().get(header::CONTENT_ENCODING) {
            None => Compression::None,
            Some(value) => value
                .to_str()
                .ok()
                .and_then(Compression::from_content_encoding)
                .ok_or_else(|| {
                    WireError::Codec(format!("unsupported content encoding {value:?} for chunk {hash}"))
                })?,
        };
        Ok(ChunkPayload::new(compression, response.bytes().await?))
    }

    #[instrument(skip(self, token), fields(artifact = %artifact))]
    async fn get_manifest(&self, token: &Token, artifact: &ArtifactId) -> WireResult<Manifest> {
        let url = self.url("/v1/manifest", &[("artifact", artifact.as_str())])?;
        let response = self
            .send(
                self.http.get(url).header(header::ACCEPT, CONTENT_TYPE),
                token,
            )
            .await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(WireError::NotFound(format!("manifest for {artifact}")));
        }
        if !status.is_success() {
            return Err(WireError::from_status(status, Self::error_body(response).await));
        }
        let body = response.bytes().await?;
        let manifest = codec::decode_manifest(&body)?;
        if &manifest.artifact != artifact {
            return Err(WireError::Codec(format!(
                "requested manifest for {artifact}, received {}",
                manifest.artifact
            )));
        }
        Ok(manifest)
    }

    #[instrument(skip(self, token, manifest), fields(artifact = %manifest.artifact))]
    async fn put_manifest(&self, token: &Token, manifest: &Manifest) -> WireResult<()> {
        let body = codec::encode(manifest)?;
        let url = self.url("/v1/manifest", &[("artifact", manifest.artifact.as_str())])?;
        let response = self
            .send(
                self.http
                    .put(url)
                    .header(header::CONTENT_TYPE, CONTENT_TYPE)
                    .body(body),
                token,
            )
            .await?;
        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Err(WireError::Conflict(format!(
                "manifest for {} already published",
                manifest.artifact
            )));
        }
        if !status.is_success() {
            return Err(WireError::from_status(status, Self::error_body(response).await));
        }
        Ok(())
    }

    #[instrument(skip(self, token))]
    async fn probe(&self, token: &Token, bytes: u64) -> WireResult<Bytes> {
        let url = self.url("/v1/probe", &[("bytes", &bytes.to_string())])?;
        let response = self.send(self.http.get(url), token).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WireError::from_status(status, Self::error_body(response).await));
        }
        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> HttpCacheClient {
        HttpCacheClient::new(HttpClientConfig {
            base_url: base.to_string(),
            cache: "main".to_string(),
            request_timeout: Duration::from_secs(5),
            existence_batch_size: 2,
        })
        .unwrap()
    }

    #[test]
    fn test_url_carries_cache_and_params() {
        let c = client("https://cache.example.com/");
        let url = c.url("/v1/chunk", &[("hash", "abc")]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://cache.example.com/v1/chunk?cache=main&hash=abc"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let result = HttpCacheClient::new(HttpClientConfig {
            base_url: "not a url".to_string(),
            cache: "main".to_string(),
            request_timeout: Duration::from_secs(5),
            existence_batch_size: 256,
        });
        assert!(matches!(result, Err(WireError::InvalidRequest(_))));
    }
}
