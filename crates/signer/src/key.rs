//! Ed25519 keys in the Nix `name:base64` text form.

use crate::error::{SignerError, SignerResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{SigningKey, VerifyingKey};
use std::fmt;
use std::path::Path;

/// Split `name:base64` into the name and decoded bytes of the expected length.
fn decode_named<const N: usize>(s: &str, what: &str) -> SignerResult<(String, [u8; N])> {
    let (name, b64) = s.trim().split_once(':').ok_or_else(|| {
        SignerError::KeyParsing(format!("{what}: expected 'keyname:base64' format"))
    })?;
    if name.is_empty() {
        return Err(SignerError::KeyParsing(format!("{what}: empty key name")));
    }
    let bytes = STANDARD
        .decode(b64)
        .map_err(|e| SignerError::KeyParsing(format!("{what}: invalid base64: {e}")))?;
    let bytes: [u8; N] = bytes.as_slice().try_into().map_err(|_| {
        SignerError::KeyParsing(format!("{what}: expected {N} bytes, got {}", bytes.len()))
    })?;
    Ok((name.to_string(), bytes))
}

/// A public key able to verify manifest signatures.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Parse `name:base64(public)`.
    pub fn from_nix_format(s: &str) -> SignerResult<(String, Self)> {
        let (name, bytes) = decode_named::<32>(s, "public key")?;
        let inner = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| SignerError::KeyParsing(format!("invalid public key: {e}")))?;
        Ok((name, Self { inner }))
    }

    /// Encode as `name:base64(public)`.
    pub fn to_nix_format(&self, key_name: &str) -> String {
        format!("{key_name}:{}", STANDARD.encode(self.inner.as_bytes()))
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.inner
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b64 = STANDARD.encode(self.inner.as_bytes());
        write!(f, "PublicKey({}...)", &b64[..8])
    }
}

/// A named signing key together with its public half.
pub struct KeyPair {
    /// The key name recorded in every signature (e.g. `cache.example.com-1`).
    pub name: String,
    secret: SigningKey,
}

impl KeyPair {
    /// Generate a new random key pair.
    pub fn generate(name: impl Into<String>) -> Self {
        let mut rng = rand_core::OsRng;
        Self {
            name: name.into(),
            secret: SigningKey::generate(&mut rng),
        }
    }

    /// Parse `name:base64(secret || public)`.
    ///
    /// The embedded public half must match the one derived from the secret.
    pub fn from_nix_secret_key(s: &str) -> SignerResult<Self> {
        let (name, bytes) = decode_named::<64>(s, "secret key")?;
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&bytes[..32]);
        let secret = SigningKey::from_bytes(&seed);
        if secret.verifying_key().as_bytes()[..] != bytes[32..] {
            return Err(SignerError::KeyParsing(
                "secret key: embedded public key does not match".to_string(),
            ));
        }
        Ok(Self { name, secret })
    }

    /// Read a secret key file.
    pub fn from_file(path: &Path) -> SignerResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_nix_secret_key(&contents)
    }

    /// Encode as `name:base64(secret || public)`.
    pub fn to_nix_secret_key(&self) -> String {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(self.secret.as_bytes());
        bytes.extend_from_slice(self.secret.verifying_key().as_bytes());
        format!("{}:{}", self.name, STANDARD.encode(&bytes))
    }

    /// Encode the public half as `name:base64(public)`.
    pub fn to_nix_public_key(&self) -> String {
        self.public_key().to_nix_format(&self.name)
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.secret.verifying_key(),
        }
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.secret
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("name", &self.name)
            .field("public", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Public keys a puller accepts manifests from.
///
/// Several keys may share a name (key rotation); a signature is accepted if
/// any of them verifies it.
#[derive(Clone, Debug, Default)]
pub struct TrustedKeys {
    keys: Vec<(String, PublicKey)>,
}

impl TrustedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a list of `name:base64` public keys.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> SignerResult<Self> {
        let mut trusted = Self::new();
        for entry in entries {
            let (name, key) = PublicKey::from_nix_format(entry.as_ref())?;
            trusted.insert(name, key);
        }
        Ok(trusted)
    }

    /// Add a key, ignoring exact duplicates.
    pub fn insert(&mut self, name: impl Into<String>, key: PublicKey) {
        let name = name.into();
        if !self.keys.iter().any(|(n, k)| *n == name && *k == key) {
            self.keys.push((name, key));
        }
    }

    /// Keys registered under `name`.
    pub fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a PublicKey> + 'a {
        self.keys.iter().filter(move |(n, _)| n == name).map(|(_, k)| k)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }
}
