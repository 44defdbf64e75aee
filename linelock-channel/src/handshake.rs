//! Handshake messages and the per-connection authentication state.
//!
//! ```text
//! client                                   host
//!   | <------------- banner (text) ----------- |
//!   | ------------- Hello ------------------>  |   Unauthenticated -> KeyExchanged
//!   | <------------ Hello -------------------  |
//!   | ------------- Proof (sealed) ---------> |   KeyExchanged -> MutuallyAuthenticated
//!   | <------------ Proof (sealed) ----------  |
//!   | <------------ KeyTransfer (sealed) ----  |   MutuallyAuthenticated -> Secured
//!   | ------------- Finished (record) ------> |
//! ```
//!
//! Every message after the hellos is bound to the transcript hash of both
//! hellos, so a proof or key transfer cannot be replayed into another
//! connection.

use sha2::{Digest, Sha256};

use crate::crypto::{
    CryptoError, Identity, PeerIdentity, SymmetricKey, KEY_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};

/// Handshake protocol version carried in every hello.
pub const PROTOCOL_VERSION: u8 = 1;

/// Nonce size in hello messages.
pub const HELLO_NONCE_SIZE: usize = 32;

/// Transcript hash size.
pub const TRANSCRIPT_SIZE: usize = 32;

/// Encoded hello length.
pub const HELLO_LEN: usize = 1 + 2 * PUBLIC_KEY_SIZE + SIGNATURE_SIZE + HELLO_NONCE_SIZE;

const TRANSCRIPT_LABEL: &[u8] = b"linelock-handshake-v1";
const PROOF_LABEL: &[u8] = b"proof";
const KEYS_LABEL: &[u8] = b"keys";

/// Authentication progress of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandshakeState {
    /// Nothing exchanged yet.
    Unauthenticated,
    /// Long-term public keys are known on both sides.
    KeyExchanged,
    /// Both sides proved possession of their private keys.
    MutuallyAuthenticated,
    /// Session keys are installed.
    Secured,
}

impl HandshakeState {
    /// The state that follows this one.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Unauthenticated => Some(Self::KeyExchanged),
            Self::KeyExchanged => Some(Self::MutuallyAuthenticated),
            Self::MutuallyAuthenticated => Some(Self::Secured),
            Self::Secured => None,
        }
    }

    /// Move to `to`, which must be the immediate successor.
    pub fn advance(&mut self, to: Self) -> Result<(), (Self, Self)> {
        if self.next() == Some(to) {
            *self = to;
            Ok(())
        } else {
            Err((*self, to))
        }
    }
}

/// Which side of the connection a message comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The connecting side.
    Client,
    /// The accepting side.
    Host,
}

impl Role {
    fn tag(self) -> u8 {
        match self {
            Self::Client => b'C',
            Self::Host => b'H',
        }
    }
}

/// First message from each side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Protocol version.
    pub version: u8,
    /// Ed25519 public key.
    pub signing: [u8; PUBLIC_KEY_SIZE],
    /// X25519 public key.
    pub exchange: [u8; PUBLIC_KEY_SIZE],
    /// Signature by `signing` over `exchange`.
    pub binding: [u8; SIGNATURE_SIZE],
    /// Fresh challenge for the peer.
    pub nonce: [u8; HELLO_NONCE_SIZE],
}

impl Hello {
    /// Build this side's hello with a fresh nonce.
    pub fn new(identity: &Identity) -> Result<Self, CryptoError> {
        Ok(Self {
            version: PROTOCOL_VERSION,
            signing: identity.signing_public(),
            exchange: identity.exchange_public(),
            binding: identity.binding(),
            nonce: crate::crypto::random_bytes()?,
        })
    }

    /// Encode as `version || signing || exchange || binding || nonce`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HELLO_LEN);
        out.push(self.version);
        out.extend_from_slice(&self.signing);
        out.extend_from_slice(&self.exchange);
        out.extend_from_slice(&self.binding);
        out.extend_from_slice(&self.nonce);
        out
    }

    /// Decode, without verifying anything.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != HELLO_LEN {
            return Err(CryptoError::Malformed(format!(
                "hello is {} bytes, expected {HELLO_LEN}",
                bytes.len()
            )));
        }
        let exchange_at = 1 + PUBLIC_KEY_SIZE;
        let binding_at = exchange_at + PUBLIC_KEY_SIZE;
        let nonce_at = binding_at + SIGNATURE_SIZE;
        let signing = array(&bytes[1..exchange_at]);
        let exchange = array(&bytes[exchange_at..binding_at]);
        let binding = array(&bytes[binding_at..nonce_at]);
        let nonce = array(&bytes[nonce_at..]);
        Ok(Self {
            version: bytes[0],
            signing,
            exchange,
            binding,
            nonce,
        })
    }

    /// Check the binding signature and return the peer identity.
    pub fn peer(&self) -> Result<PeerIdentity, CryptoError> {
        PeerIdentity::from_parts(&self.signing, &self.exchange, &self.binding)
    }
}

fn array<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

/// Hash of both hellos, client first.
pub fn transcript(client_hello: &Hello, host_hello: &Hello) -> [u8; TRANSCRIPT_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(TRANSCRIPT_LABEL);
    hasher.update(client_hello.to_bytes());
    hasher.update(host_hello.to_bytes());
    hasher.finalize().into()
}

fn proof_message(role: Role, transcript: &[u8; TRANSCRIPT_SIZE], peer_nonce: &[u8]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(PROOF_LABEL.len() + 1 + TRANSCRIPT_SIZE + peer_nonce.len());
    msg.extend_from_slice(PROOF_LABEL);
    msg.push(role.tag());
    msg.extend_from_slice(transcript);
    msg.extend_from_slice(peer_nonce);
    msg
}

/// Sign the peer's challenge and seal the signature to the peer.
pub fn make_proof(
    identity: &Identity,
    role: Role,
    transcript: &[u8; TRANSCRIPT_SIZE],
    peer: &PeerIdentity,
    peer_nonce: &[u8; HELLO_NONCE_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let signature = identity.sign(&proof_message(role, transcript, peer_nonce));
    peer.seal(&signature)
}

/// Open and check a proof made by `peer` against our nonce.
pub fn check_proof(
    identity: &Identity,
    sealed: &[u8],
    peer_role: Role,
    transcript: &[u8; TRANSCRIPT_SIZE],
    peer: &PeerIdentity,
    our_nonce: &[u8; HELLO_NONCE_SIZE],
) -> Result<(), CryptoError> {
    let signature = identity.open(sealed)?;
    let signature: [u8; SIGNATURE_SIZE] =
        signature
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: SIGNATURE_SIZE,
                actual: signature.len(),
            })?;
    peer.verify(&proof_message(peer_role, transcript, our_nonce), &signature)
}

/// The two session keys handed from host to client.
#[derive(Debug, Clone)]
pub struct SessionKeys {
    /// Inner-layer key, shared by both directions.
    pub inner: SymmetricKey,
    /// Outer-layer base key; each direction derives its own from it.
    pub outer: SymmetricKey,
}

impl SessionKeys {
    /// Generate fresh keys.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self {
            inner: SymmetricKey::random()?,
            outer: SymmetricKey::random()?,
        })
    }
}

fn keys_message(transcript: &[u8; TRANSCRIPT_SIZE], keys: &SessionKeys) -> Vec<u8> {
    let mut msg = Vec::with_capacity(KEYS_LABEL.len() + TRANSCRIPT_SIZE + 2 * KEY_SIZE);
    msg.extend_from_slice(KEYS_LABEL);
    msg.extend_from_slice(transcript);
    msg.extend_from_slice(keys.inner.as_bytes());
    msg.extend_from_slice(keys.outer.as_bytes());
    msg
}

/// Seal `inner || outer || signature` to the client.
pub fn make_key_transfer(
    host: &Identity,
    client: &PeerIdentity,
    transcript: &[u8; TRANSCRIPT_SIZE],
    keys: &SessionKeys,
) -> Result<Vec<u8>, CryptoError> {
    let signature = host.sign(&keys_message(transcript, keys));
    let mut plaintext = Vec::with_capacity(2 * KEY_SIZE + SIGNATURE_SIZE);
    plaintext.extend_from_slice(keys.inner.as_bytes());
    plaintext.extend_from_slice(keys.outer.as_bytes());
    plaintext.extend_from_slice(&signature);
    client.seal(&plaintext)
}

/// Open a key transfer and check the host's signature over it.
pub fn open_key_transfer(
    client: &Identity,
    host: &PeerIdentity,
    transcript: &[u8; TRANSCRIPT_SIZE],
    sealed: &[u8],
) -> Result<SessionKeys, CryptoError> {
    let plaintext = client.open(sealed)?;
    if plaintext.len() != 2 * KEY_SIZE + SIGNATURE_SIZE {
        return Err(CryptoError::Malformed("key transfer has wrong length".into()));
    }
    let keys = SessionKeys {
        inner: SymmetricKey::from_slice(&plaintext[..KEY_SIZE])?,
        outer: SymmetricKey::from_slice(&plaintext[KEY_SIZE..2 * KEY_SIZE])?,
    };
    let signature: [u8; SIGNATURE_SIZE] = array(&plaintext[2 * KEY_SIZE..]);
    host.verify(&keys_message(transcript, &keys), &signature)?;
    Ok(keys)
}
