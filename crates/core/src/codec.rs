//! Binary wire codec.
//!
//! Every protocol message travels as CBOR inside a small envelope:
//!
//! ```text
//! { "v": <u16 schema version>, "kind": <message name>, "body": <message> }
//! ```
//!
//! The envelope is decoded first and its `kind` and `v` are checked before the
//! body is interpreted, so a peer speaking a newer schema produces
//! [`crate::Error::Schema`] instead of a half-parsed message. Hashes are raw
//! 32-byte strings on this path; JSON is kept for diagnostics only.

use crate::chunk::ChunkHash;
use crate::manifest::{MANIFEST_SCHEMA_VERSION, Manifest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Media type used for every codec-encoded body.
pub const CONTENT_TYPE: &str = "application/cbor";

/// A message type that can travel over the wire.
pub trait WireMessage: Serialize + DeserializeOwned {
    /// Name recorded in the envelope.
    const KIND: &'static str;
    /// Schema version this build reads and writes.
    const VERSION: u16;
}

impl WireMessage for Manifest {
    const KIND: &'static str = "manifest";
    const VERSION: u16 = MANIFEST_SCHEMA_VERSION;
}

/// Response body for an existence query: the subset of queried hashes the
/// backend already holds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistenceResponse {
    pub present: Vec<ChunkHash>,
}

impl WireMessage for ExistenceResponse {
    const KIND: &'static str = "existence";
    const VERSION: u16 = 1;
}

#[derive(Serialize)]
struct EnvelopeOut<'a, T> {
    v: u16,
    kind: &'a str,
    body: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeIn {
    v: u16,
    kind: String,
    body: ciborium::Value,
}

/// Encode a message in its envelope.
pub fn encode<T: WireMessage>(message: &T) -> crate::Result<Vec<u8>> {
    to_cbor(&EnvelopeOut {
        v: T::VERSION,
        kind: T::KIND,
        body: message,
    })
}

/// Decode an enveloped message, rejecting other kinds and unknown versions.
pub fn decode<T: WireMessage>(bytes: &[u8]) -> crate::Result<T> {
    let envelope: EnvelopeIn = from_cbor(bytes)?;
    if envelope.kind != T::KIND {
        return Err(crate::Error::Codec(format!(
            "expected {} message, got {}",
            T::KIND,
            envelope.kind
        )));
    }
    if envelope.v != T::VERSION {
        return Err(crate::Error::Schema {
            kind: envelope.kind,
            found: envelope.v,
            supported: T::VERSION,
        });
    }
    envelope
        .body
        .deserialized()
        .map_err(|e| crate::Error::Codec(format!("invalid {} body: {e}", T::KIND)))
}

/// Decode a manifest and check its own version and chunk layout.
pub fn decode_manifest(bytes: &[u8]) -> crate::Result<Manifest> {
    let manifest: Manifest = decode(bytes)?;
    if manifest.version != MANIFEST_SCHEMA_VERSION {
        return Err(crate::Error::Schema {
            kind: Manifest::KIND.to_string(),
            found: manifest.version,
            supported: MANIFEST_SCHEMA_VERSION,
        });
    }
    manifest.validate_layout()?;
    Ok(manifest)
}

/// Plain CBOR encoding without an envelope.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> crate::Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out)
        .map_err(|e| crate::Error::Codec(format!("CBOR encode failed: {e}")))?;
    Ok(out)
}

/// Plain CBOR decoding without an envelope.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> crate::Result<T> {
    ciborium::from_reader(bytes).map_err(|e| crate::Error::Codec(format!("CBOR decode failed: {e}")))
}
