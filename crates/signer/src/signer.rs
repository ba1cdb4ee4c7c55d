//! Manifest signing and verification.

use crate::error::{SignerError, SignerResult};
use crate::key::{KeyPair, PublicKey, TrustedKeys};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::Signer as _;
use ed25519_dalek::Verifier;
use larder_core::{Manifest, ManifestSignature};
use std::path::Path;

/// Signs manifests with one named key.
pub struct ManifestSigner {
    keypair: KeyPair,
}

impl ManifestSigner {
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    /// Create from a Nix-format secret key string.
    pub fn from_nix_secret_key(s: &str) -> SignerResult<Self> {
        Ok(Self::new(KeyPair::from_nix_secret_key(s)?))
    }

    /// Generate a signer with a fresh random key.
    pub fn generate(key_name: impl Into<String>) -> Self {
        Self::new(KeyPair::generate(key_name))
    }

    pub fn key_name(&self) -> &str {
        &self.keypair.name
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// Compute the signature for a manifest without attaching it.
    pub fn signature_for(&self, manifest: &Manifest) -> SignerResult<ManifestSignature> {
        let message = manifest.signable_bytes()?;
        let sig = self.keypair.signing_key().sign(&message);
        Ok(ManifestSignature {
            key_name: self.keypair.name.clone(),
            signature: STANDARD.encode(sig.to_bytes()),
        })
    }

    /// Sign a manifest in place, replacing any existing signature.
    pub fn sign(&self, manifest: &mut Manifest) -> SignerResult<()> {
        manifest.signature = Some(self.signature_for(manifest)?);
        Ok(())
    }
}

fn decode_signature(signature: &ManifestSignature) -> SignerResult<ed25519_dalek::Signature> {
    let bytes = STANDARD
        .decode(&signature.signature)
        .map_err(|e| SignerError::InvalidSignature(format!("invalid base64: {e}")))?;
    let bytes: [u8; 64] = bytes.as_slice().try_into().map_err(|_| {
        SignerError::InvalidSignature(format!("expected 64 bytes, got {}", bytes.len()))
    })?;
    Ok(ed25519_dalek::Signature::from_bytes(&bytes))
}

/// Check one signature against one public key.
///
/// Returns `false` for malformed signatures as well as wrong ones.
pub fn verify(manifest: &Manifest, signature: &ManifestSignature, public_key: &PublicKey) -> bool {
    let Ok(message) = manifest.signable_bytes() else {
        return false;
    };
    let Ok(sig) = decode_signature(signature) else {
        return false;
    };
    public_key.verifying_key().verify(&message, &sig).is_ok()
}

/// Verify a manifest's attached signature against the trusted key set.
///
/// Succeeds only if a trusted key carrying the signature's key name verifies
/// it.
pub fn verify_manifest(manifest: &Manifest, trusted: &TrustedKeys) -> SignerResult<()> {
    let artifact = manifest.artifact.to_string();
    let signature = manifest
        .signature
        .as_ref()
        .ok_or_else(|| SignerError::Unsigned {
            artifact: artifact.clone(),
        })?;

    let mut candidates = trusted.named(&signature.key_name).peekable();
    if candidates.peek().is_none() {
        return Err(SignerError::UntrustedKey {
            artifact,
            key_name: signature.key_name.clone(),
        });
    }
    if candidates.any(|key| verify(manifest, signature, key)) {
        return Ok(());
    }
    Err(SignerError::VerificationFailed {
        artifact,
        key_name: signature.key_name.clone(),
    })
}

/// Source of the signing key and the trusted public keys.
pub trait KeyProvider: Send + Sync {
    /// The signer used for pushes.
    fn signer(&self) -> SignerResult<&ManifestSigner>;

    /// Keys accepted on pull.
    fn trusted_keys(&self) -> &TrustedKeys;
}

/// Key provider backed by keys loaded once at startup.
#[derive(Default)]
pub struct StaticKeyProvider {
    signer: Option<ManifestSigner>,
    trusted: TrustedKeys,
}

impl StaticKeyProvider {
    /// Build from an optional signer and a trusted set.
    ///
    /// The signer's own public key is always trusted.
    pub fn new(signer: Option<ManifestSigner>, mut trusted: TrustedKeys) -> Self {
        if let Some(signer) = &signer {
            trusted.insert(signer.key_name(), signer.public_key());
        }
        Self { signer, trusted }
    }

    /// Load from a secret key file and `name:base64` public key strings.
    pub fn load<S: AsRef<str>>(
        signing_key_file: Option<&Path>,
        trusted_keys: &[S],
    ) -> SignerResult<Self> {
        let signer = signing_key_file
            .map(|path| KeyPair::from_file(path).map(ManifestSigner::new))
            .transpose()?;
        Ok(Self::new(signer, TrustedKeys::parse(trusted_keys)?))
    }
}

impl KeyProvider for StaticKeyProvider {
    fn signer(&self) -> SignerResult<&ManifestSigner> {
        self.signer.as_ref().ok_or(SignerError::NoSigningKey)
    }

    fn trusted_keys(&self) -> &TrustedKeys {
        &self.trusted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::{ArtifactId, ChunkHash, ChunkRef, ContentHash};

    fn manifest() -> Manifest {
        let data = b"hello manifest";
        Manifest::new(
            ArtifactId::new("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa-test").unwrap(),
            vec![ChunkRef::new(ChunkHash::compute(data), 0, data.len() as u64)],
            data.len() as u64,
            ContentHash::compute(data),
        )
    }

    fn trusted(signer: &ManifestSigner) -> TrustedKeys {
        let mut keys = TrustedKeys::new();
        keys.insert(signer.key_name(), signer.public_key());
        keys
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = ManifestSigner::generate("test-cache-1");
        let mut m = manifest();
        signer.sign(&mut m).unwrap();

        let sig = m.signature.clone().unwrap();
        assert_eq!(sig.key_name, "test-cache-1");
        assert!(verify(&m, &sig, &signer.public_key()));
        verify_manifest(&m, &trusted(&signer)).unwrap();
    }

    #[test]
    fn test_verify_with_wrong_key() {
        let signer1 = ManifestSigner::generate("key-1");
        let signer2 = ManifestSigner::generate("key-1");
        let mut m = manifest();
        signer1.sign(&mut m).unwrap();

        let sig = m.signature.clone().unwrap();
        assert!(!verify(&m, &sig, &signer2.public_key()));
        assert!(matches!(
            verify_manifest(&m, &trusted(&signer2)),
            Err(SignerError::VerificationFailed { .. })
        ));
    }

    #[test]
    fn test_tampered_manifest_fails() {
        let signer = ManifestSigner::generate("k");
        let mut m = manifest();
        signer.sign(&mut m).unwrap();
        m.total_size += 1;
        assert!(verify_manifest(&m, &trusted(&signer)).is_err());
    }

    #[test]
    fn test_unsigned_and_untrusted() {
        let signer = ManifestSigner::generate("k");
        let m = manifest();
        assert!(matches!(
            verify_manifest(&m, &trusted(&signer)),
            Err(SignerError::Unsigned { .. })
        ));

        let mut m = manifest();
        signer.sign(&mut m).unwrap();
        assert!(matches!(
            verify_manifest(&m, &TrustedKeys::new()),
            Err(SignerError::UntrustedKey { .. })
        ));
    }

    #[test]
    fn test_rotated_key_with_same_name() {
        let old = ManifestSigner::generate("cache");
        let new = ManifestSigner::generate("cache");
        let mut keys = trusted(&old);
        keys.insert(new.key_name(), new.public_key());

        let mut m = manifest();
        new.sign(&mut m).unwrap();
        verify_manifest(&m, &keys).unwrap();
    }

    #[test]
    fn test_garbage_signature_is_not_a_panic() {
        let signer = ManifestSigner::generate("k");
        let mut m = manifest();
        m.signature = Some(ManifestSignature {
            key_name: "k".to_string(),
            signature: "not base64 !!".to_string(),
        });
        assert!(verify_manifest(&m, &trusted(&signer)).is_err());
    }

    #[test]
    fn test_static_provider_trusts_own_key() {
        let provider = StaticKeyProvider::new(
            Some(ManifestSigner::generate("self")),
            TrustedKeys::new(),
        );
        let mut m = manifest();
        provider.signer().unwrap().sign(&mut m).unwrap();
        verify_manifest(&m, provider.trusted_keys()).unwrap();

        let empty = StaticKeyProvider::default();
        assert!(matches!(empty.signer(), Err(SignerError::NoSigningKey)));
    }
}
