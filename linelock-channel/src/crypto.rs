//! Cryptographic primitives for linelock.
//!
//! This module provides:
//! - Long-term identities: an Ed25519 signing key plus an X25519 static
//!   secret, the latter bound to the former by a signature
//! - One-shot "complex" sealing to a peer's X25519 key (ephemeral
//!   X25519 + HKDF-SHA256 + XChaCha20-Poly1305) for small payloads
//! - [`SymmetricKey`]: XChaCha20-Poly1305 with fresh 192-bit nonces and AAD
//! - Device-adaptive Argon2id key derivation
//!
//! # Security Notes
//!
//! - Sealed payloads are bounded by [`MAX_SEALED_PLAINTEXT`]; longer
//!   messages go through [`seal_chunked`]
//! - Ephemeral secrets are generated from `getrandom` and dropped after use
//! - Key material never appears in `Debug` output

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Key size for XChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// Ed25519 signature size.
pub const SIGNATURE_SIZE: usize = 64;

/// Ed25519 / X25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Largest plaintext accepted by [`seal`].
pub const MAX_SEALED_PLAINTEXT: usize = 190;

/// Bytes [`seal`] adds to the plaintext.
pub const SEAL_OVERHEAD: usize = PUBLIC_KEY_SIZE + NONCE_SIZE + TAG_SIZE;

/// Largest plaintext accepted by [`seal_chunked`].
pub const MAX_CHUNKED_PLAINTEXT: usize = 4096;

const SEAL_INFO: &[u8] = b"linelock-complex-v1";

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (authentication error).
    #[error("decryption failed: authentication error")]
    DecryptionFailed,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// A signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,

    /// A public key was malformed or low-order.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Plaintext too large for one-shot sealing.
    #[error("payload too large for sealing: {len} bytes (max {max})")]
    PayloadTooLarge {
        /// Offered length.
        len: usize,
        /// Limit.
        max: usize,
    },

    /// Sealed data too short or badly laid out.
    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    /// The OS random source failed.
    #[error("random source failed: {0}")]
    RandomFailed(String),
}

/// Fill an array from the OS random source.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes).map_err(|e| CryptoError::RandomFailed(e.to_string()))?;
    Ok(bytes)
}

/// Short hex fingerprint of a public signing key, for logs.
pub fn fingerprint(signing_key: &[u8; PUBLIC_KEY_SIZE]) -> String {
    let digest = Sha256::digest(signing_key);
    hex::encode(&digest[..8])
}

// ===========================================
// Identities
// ===========================================

/// A long-term keypair.
pub struct Identity {
    signing: SigningKey,
    exchange: StaticSecret,
}

impl Identity {
    /// Generate a fresh identity.
    pub fn generate() -> Result<Self, CryptoError> {
        let signing = random_bytes::<KEY_SIZE>()?;
        let exchange = random_bytes::<KEY_SIZE>()?;
        Ok(Self::from_secret_bytes(signing, exchange))
    }

    /// Rebuild an identity from its two 32-byte secrets.
    pub fn from_secret_bytes(signing: [u8; KEY_SIZE], exchange: [u8; KEY_SIZE]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&signing),
            exchange: StaticSecret::from(exchange),
        }
    }

    /// Ed25519 public key.
    pub fn signing_public(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.signing.verifying_key().to_bytes()
    }

    /// X25519 public key.
    pub fn exchange_public(&self) -> [u8; PUBLIC_KEY_SIZE] {
        PublicKey::from(&self.exchange).to_bytes()
    }

    /// Signature binding the exchange key to the signing key.
    pub fn binding(&self) -> [u8; SIGNATURE_SIZE] {
        self.sign(&self.exchange_public())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing.sign(message).to_bytes()
    }

    /// Public half as a peer would see it.
    pub fn peer(&self) -> PeerIdentity {
        PeerIdentity {
            verifying: self.signing.verifying_key(),
            exchange: PublicKey::from(&self.exchange),
        }
    }

    /// Open data sealed to this identity.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        open(&self.exchange, sealed)
    }

    /// Open data produced by [`seal_chunked`].
    pub fn open_chunked(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut out = Vec::new();
        let mut rest = sealed;
        while !rest.is_empty() {
            if rest.len() < 2 {
                return Err(CryptoError::Malformed("truncated chunk length".into()));
            }
            let len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            rest = &rest[2..];
            if rest.len() < len {
                return Err(CryptoError::Malformed("truncated chunk".into()));
            }
            out.extend(self.open(&rest[..len])?);
            if out.len() > MAX_CHUNKED_PLAINTEXT {
                return Err(CryptoError::PayloadTooLarge {
                    len: out.len(),
                    max: MAX_CHUNKED_PLAINTEXT,
                });
            }
            rest = &rest[len..];
        }
        Ok(out)
    }

    /// Short fingerprint for logs.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.signing_public())
    }
}

// Don't leak secret keys in debug output
impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identity({}, [REDACTED])", self.fingerprint())
    }
}

/// The public half of a peer's identity.
#[derive(Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    verifying: VerifyingKey,
    exchange: PublicKey,
}

impl PeerIdentity {
    /// Build from wire bytes, checking that `binding` is the signing key's
    /// signature over the exchange key.
    pub fn from_parts(
        signing: &[u8; PUBLIC_KEY_SIZE],
        exchange: &[u8; PUBLIC_KEY_SIZE],
        binding: &[u8; SIGNATURE_SIZE],
    ) -> Result<Self, CryptoError> {
        let verifying =
            VerifyingKey::from_bytes(signing).map_err(|_| CryptoError::InvalidPublicKey)?;
        let peer = Self {
            verifying,
            exchange: PublicKey::from(*exchange),
        };
        peer.verify(exchange, binding)?;
        Ok(peer)
    }

    /// Verify a signature by this peer.
    pub fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_SIZE]) -> Result<(), CryptoError> {
        let signature = Signature::from_bytes(signature);
        self.verifying
            .verify(message, &signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }

    /// Seal a small payload so only this peer can open it.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal(&self.exchange, plaintext)
    }

    /// Seal a payload of up to [`MAX_CHUNKED_PLAINTEXT`] bytes as a sequence
    /// of length-prefixed sealed chunks.
    pub fn seal_chunked(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        seal_chunked(&self.exchange, plaintext)
    }

    /// Ed25519 public key.
    pub fn signing_public(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.verifying.to_bytes()
    }

    /// X25519 public key.
    pub fn exchange_public(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.exchange.to_bytes()
    }

    /// Short fingerprint for logs.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.signing_public())
    }
}

impl std::fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerIdentity({})", self.fingerprint())
    }
}

// ===========================================
// One-shot sealing
// ===========================================

/// Seal `plaintext` to `recipient`.
///
/// Layout: `ephemeral public (32) || nonce (24) || ciphertext + tag`.
pub fn seal(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if plaintext.len() > MAX_SEALED_PLAINTEXT {
        return Err(CryptoError::PayloadTooLarge {
            len: plaintext.len(),
            max: MAX_SEALED_PLAINTEXT,
        });
    }

    let ephemeral = StaticSecret::from(random_bytes::<KEY_SIZE>()?);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidPublicKey);
    }

    let key = seal_key(shared.as_bytes(), &ephemeral_public, recipient)?;
    let sealed = key.encrypt(plaintext, ephemeral_public.as_bytes())?;

    let mut out = Vec::with_capacity(PUBLIC_KEY_SIZE + sealed.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend(sealed);
    Ok(out)
}

/// Open data produced by [`seal`] with the recipient's static secret.
pub fn open(secret: &StaticSecret, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CryptoError::Malformed(format!(
            "sealed payload of {} bytes is shorter than overhead",
            sealed.len()
        )));
    }
    let mut ephemeral = [0u8; PUBLIC_KEY_SIZE];
    ephemeral.copy_from_slice(&sealed[..PUBLIC_KEY_SIZE]);
    let ephemeral_public = PublicKey::from(ephemeral);
    let recipient = PublicKey::from(secret);

    let shared = secret.diffie_hellman(&ephemeral_public);
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidPublicKey);
    }
    let key = seal_key(shared.as_bytes(), &ephemeral_public, &recipient)?;
    key.decrypt(&sealed[PUBLIC_KEY_SIZE..], &ephemeral)
}

/// Seal in [`MAX_SEALED_PLAINTEXT`] pieces, each prefixed with a u16 length.
pub fn seal_chunked(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if plaintext.len() > MAX_CHUNKED_PLAINTEXT {
        return Err(CryptoError::PayloadTooLarge {
            len: plaintext.len(),
            max: MAX_CHUNKED_PLAINTEXT,
        });
    }
    let mut out = Vec::new();
    let mut push = |chunk: &[u8]| -> Result<(), CryptoError> {
        let sealed = seal(recipient, chunk)?;
        out.extend_from_slice(&(sealed.len() as u16).to_be_bytes());
        out.extend(sealed);
        Ok(())
    };
    if plaintext.is_empty() {
        push(&[])?;
    }
    for chunk in plaintext.chunks(MAX_SEALED_PLAINTEXT) {
        push(chunk)?;
    }
    Ok(out)
}

fn seal_key(
    shared: &[u8; KEY_SIZE],
    ephemeral: &PublicKey,
    recipient: &PublicKey,
) -> Result<SymmetricKey, CryptoError> {
    let mut salt = [0u8; 2 * PUBLIC_KEY_SIZE];
    salt[..PUBLIC_KEY_SIZE].copy_from_slice(ephemeral.as_bytes());
    salt[PUBLIC_KEY_SIZE..].copy_from_slice(recipient.as_bytes());
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut key = [0u8; KEY_SIZE];
    hkdf.expand(SEAL_INFO, &mut key)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(SymmetricKey::from_bytes(key))
}

// ===========================================
// Symmetric keys
// ===========================================

/// A 256-bit XChaCha20-Poly1305 key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Generate a random key.
    pub fn random() -> Result<Self, CryptoError> {
        Ok(Self(random_bytes()?))
    }

    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Wrap a slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(key))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Derive a labelled subkey with HKDF-SHA256.
    pub fn derive(&self, label: &[u8]) -> Result<Self, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(Some(b"linelock-subkey-v1"), &self.0);
        let mut key = [0u8; KEY_SIZE];
        hkdf.expand(label, &mut key)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Self(key))
    }

    /// Encrypt with a fresh random nonce.
    ///
    /// Returns `nonce || ciphertext + tag`.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce_bytes = random_bytes::<NONCE_SIZE>()?;
        let nonce = XNonce::from_slice(&nonce_bytes);

        let cipher = XChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend(ciphertext);
        Ok(out)
    }

    /// Decrypt `nonce || ciphertext + tag`.
    pub fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Malformed(format!(
                "ciphertext of {} bytes is too short",
                data.len()
            )));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        let cipher = XChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        cipher
            .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

// Don't leak keys in debug output
impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

// ===========================================
// Key derivation
// ===========================================

/// Argon2id parameters for device-adaptive key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
}

impl KdfParams {
    /// Create parameters based on available RAM in MB.
    ///
    /// Scaling:
    /// - < 2000 MB: 12 MiB, 3 iterations
    /// - < 4000 MB: 19 MiB, 2 iterations
    /// - < 8000 MB: 46 MiB, 1 iteration
    /// - >= 8000 MB: 64 MiB, 3 iterations
    pub fn for_ram_mb(ram_mb: u64) -> Self {
        let (memory_mib, iterations, parallelism) = if ram_mb < 2000 {
            (12, 3, 1)
        } else if ram_mb < 4000 {
            (19, 2, 1)
        } else if ram_mb < 8000 {
            (46, 1, 1)
        } else {
            (64, 3, 4)
        };
        Self {
            memory_kib: memory_mib * 1024,
            iterations,
            parallelism,
        }
    }

    /// Minimal parameters for tests and constrained hosts.
    pub fn low_memory() -> Self {
        Self {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Get memory in KiB.
    pub fn memory_kib(&self) -> u32 {
        self.memory_kib
    }

    /// Get iteration count.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Build an Argon2id hasher with these parameters.
    pub fn argon2(&self) -> Result<Argon2<'static>, CryptoError> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::for_ram_mb(detect_available_ram_mb())
    }
}

/// Detect available RAM in megabytes.
pub fn detect_available_ram_mb() -> u64 {
    use sysinfo::System;
    let sys = System::new_all();
    sys.total_memory() / (1024 * 1024)
}

/// Derive a symmetric key from a password and salt with Argon2id.
pub fn derive_key(password: &[u8], salt: &[u8], params: KdfParams) -> Result<SymmetricKey, CryptoError> {
    let mut output = [0u8; KEY_SIZE];
    params
        .argon2()?
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    let key = SymmetricKey::from_bytes(output);
    output.zeroize();
    Ok(key)
}
