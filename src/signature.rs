//! RSA-PSS release signatures.
//!
//! The catalog signs the SHA-256 digest of every artifact it publishes; the
//! updater checks the digest/signature pair against the embedded public key
//! before it downloads anything. The PSS message is the digest itself, so the
//! hash that is actually signed is SHA-256 of the digest.
//!
//! Both values travel as URL-safe, padded base64.

use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier as _};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::debug;

/// SHA-256 digest size in bytes.
pub const DIGEST_SIZE: usize = 32;

/// Embedded release signing key (RSA, PKCS#1 DER).
///
/// Only the catalog side signs. Regenerate with `handover-keygen`.
const RELEASE_SIGNING_KEY: &[u8] = include_bytes!("../keys/release_signing_key.der");

/// Embedded release verification key (RSA, PKCS#1 DER).
const RELEASE_VERIFYING_KEY: &[u8] = include_bytes!("../keys/release_signing_key.pub.der");

/// Compute the content digest of `content`.
#[must_use]
pub fn content_digest(content: &[u8]) -> [u8; DIGEST_SIZE] {
    Sha256::digest(content).into()
}

/// Encode raw bytes for transport.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

/// Decode a transported digest back into raw bytes.
///
/// # Errors
///
/// Returns [`Error::Verification`] if the value is not valid base64 or does
/// not have the size of a SHA-256 digest.
pub fn decode_digest(encoded: &str) -> Result<Vec<u8>> {
    let digest = URL_SAFE
        .decode(encoded)
        .map_err(|e| Error::Verification(format!("digest is not valid base64: {e}")))?;

    if digest.len() != DIGEST_SIZE {
        return Err(Error::Verification(format!(
            "invalid digest size: expected {DIGEST_SIZE}, got {}",
            digest.len()
        )));
    }

    Ok(digest)
}

/// A digest together with the signature over it, both raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDigest {
    /// SHA-256 of the signed content.
    pub digest: Vec<u8>,
    /// RSA-PSS signature over the digest.
    pub signature: Vec<u8>,
}

impl SignedDigest {
    /// Transport form of the digest.
    #[must_use]
    pub fn encoded_digest(&self) -> String {
        encode(&self.digest)
    }

    /// Transport form of the signature.
    #[must_use]
    pub fn encoded_signature(&self) -> String {
        encode(&self.signature)
    }
}

/// Signs content digests with a private release key.
pub struct Signer {
    key: BlindedSigningKey<Sha256>,
    public_key: RsaPublicKey,
}

impl Signer {
    /// Load the embedded release signing key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is missing or not valid PKCS#1 DER.
    pub fn embedded() -> Result<Self> {
        Self::from_pkcs1_der(RELEASE_SIGNING_KEY)
    }

    /// Load a signing key from PKCS#1 DER bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or cannot be parsed.
    pub fn from_pkcs1_der(der: &[u8]) -> Result<Self> {
        if der.is_empty() {
            return Err(Error::Crypto(
                "Release signing key not configured".to_string(),
            ));
        }

        let private_key = RsaPrivateKey::from_pkcs1_der(der)
            .map_err(|e| Error::Crypto(format!("Invalid release signing key: {e}")))?;
        let public_key = private_key.to_public_key();

        Ok(Self {
            key: BlindedSigningKey::<Sha256>::new(private_key),
            public_key,
        })
    }

    /// Digest `content` and sign the digest.
    ///
    /// Signing is randomized: two calls over the same content yield different
    /// signatures that both verify.
    ///
    /// # Errors
    ///
    /// Returns an error if the signing primitive fails.
    pub fn sign(&self, content: &[u8]) -> Result<SignedDigest> {
        let digest = content_digest(content);

        let signature = self
            .key
            .try_sign_with_rng(&mut rand::thread_rng(), &digest)
            .map_err(|e| Error::Crypto(format!("Signing failed: {e}")))?;

        Ok(SignedDigest {
            digest: digest.to_vec(),
            signature: signature.to_vec(),
        })
    }

    /// Read a file and sign its content.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or signing fails.
    pub fn sign_file(&self, path: &Path) -> Result<SignedDigest> {
        debug!("Signing: {}", path.display());

        let content = fs::read(path).map_err(|e| {
            Error::Crypto(format!("Failed to read binary '{}': {e}", path.display()))
        })?;

        self.sign(&content)
    }

    /// Verifier for the public half of this key.
    #[must_use]
    pub fn verifier(&self) -> Verifier {
        Verifier::from_public_key(self.public_key.clone())
    }
}

/// Checks a transported digest/signature pair against a release key.
pub trait ReleaseVerifier: Send + Sync {
    /// Verify an encoded digest/signature pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Verification`] on any decode failure or mismatch.
    fn verify_release(&self, digest: &str, signature: &str) -> Result<()>;
}

/// Verifies release signatures with a public key.
pub struct Verifier {
    key: VerifyingKey<Sha256>,
}

impl Verifier {
    /// Load the embedded release verification key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is missing or not valid PKCS#1 DER.
    pub fn embedded() -> Result<Self> {
        Self::from_pkcs1_der(RELEASE_VERIFYING_KEY)
    }

    /// Load a verification key from PKCS#1 DER bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is empty or cannot be parsed.
    pub fn from_pkcs1_der(der: &[u8]) -> Result<Self> {
        if der.is_empty() {
            return Err(Error::Crypto(
                "Release verification key not configured".to_string(),
            ));
        }

        let public_key = RsaPublicKey::from_pkcs1_der(der)
            .map_err(|e| Error::Crypto(format!("Invalid release verification key: {e}")))?;

        Ok(Self::from_public_key(public_key))
    }

    fn from_public_key(public_key: RsaPublicKey) -> Self {
        Self {
            key: VerifyingKey::<Sha256>::new(public_key),
        }
    }

    /// Verify an encoded digest against an encoded signature.
    ///
    /// Fails closed: malformed input is a verification failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Verification`] if either value cannot be decoded or
    /// the signature does not match the digest.
    pub fn verify(&self, digest: &str, signature: &str) -> Result<()> {
        let digest = decode_digest(digest)?;

        let signature = URL_SAFE
            .decode(signature)
            .map_err(|e| Error::Verification(format!("signature is not valid base64: {e}")))?;

        let signature = Signature::try_from(signature.as_slice())
            .map_err(|e| Error::Verification(format!("Invalid signature format: {e}")))?;

        self.key.verify(&digest, &signature).map_err(|_| {
            Error::Verification("signature does not match digest".to_string())
        })?;

        debug!("Signature verified successfully");
        Ok(())
    }
}

impl ReleaseVerifier for Verifier {
    fn verify_release(&self, digest: &str, signature: &str) -> Result<()> {
        self.verify(digest, signature)
    }
}
