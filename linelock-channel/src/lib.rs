//! # linelock-channel
//!
//! Byte transport for linelock, in three layers:
//!
//! - [`framing`] - length-prefixed text and raw frames over a stream socket,
//!   with timeout-based receive
//! - [`crypto`] - identities, one-shot sealing, AEAD keys and Argon2id
//! - [`handshake`] / [`channel`] - mutual authentication, the dual-layer
//!   encrypted record stream, sequence counters and key rotation
//!
//! Everything here is blocking std I/O. One thread reads a connection while
//! another writes it, so the secured channel is split into
//! [`SecureReader`] and [`SecureWriter`] halves.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod crypto;
pub mod framing;
pub mod handshake;

pub use channel::{
    refuse, ChannelError, Direction, HandshakeOptions, RecordKind, SecureChannel, SecureReader,
    SecureWriter,
};
pub use crypto::{CryptoError, Identity, KdfParams, PeerIdentity, SymmetricKey};
pub use framing::{Connection, Frame, FrameError, FrameReader, FrameWriter};
pub use handshake::HandshakeState;
