//! The secured record channel.
//!
//! After the handshake every application message travels as a record:
//!
//! ```text
//! plaintext  = kind (1) || body
//! inner      = inner_key.encrypt(plaintext, "linelock/<dir>/inner" || seq_be)
//! frame      = outer_key.encrypt(inner,     "linelock/<dir>/outer" || seq_be)
//! ```
//!
//! `seq` is the per-direction counter, incremented before each record. The
//! inner key is shared by both directions; each direction has its own outer
//! key so the two sides rotate independently. A `Rotate` record carries the
//! next outer key for its direction; both ends then reset that direction's
//! counter to zero.

use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::crypto::{fingerprint, CryptoError, Identity, PeerIdentity, SymmetricKey, KEY_SIZE};
use crate::framing::{Connection, Frame, FrameError, FrameReader, FrameWriter};
use crate::handshake::{
    self, check_proof, make_key_transfer, make_proof, open_key_transfer, transcript,
    HandshakeState, Hello, Role, SessionKeys, PROTOCOL_VERSION,
};

/// Greeting the host sends on accept.
pub const BANNER: &str = "LINELOCK/1";

/// Greeting sent instead of [`BANNER`] when the host is at capacity.
pub const FULL_NOTICE: &str = "FULL";

/// Default bound on the whole handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Channel errors.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Framing failure, including peer close.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Cryptographic failure outside record authentication.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// A record failed authentication. The connection must be dropped.
    #[error("record authentication failed ({direction}, sequence {sequence})")]
    Authentication {
        /// Direction label.
        direction: &'static str,
        /// Sequence number the record was checked against.
        sequence: u64,
    },

    /// The handshake could not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Handshake state machine misuse.
    #[error("invalid handshake transition {from:?} -> {to:?}")]
    State {
        /// Current state.
        from: HandshakeState,
        /// Requested state.
        to: HandshakeState,
    },

    /// The handshake did not finish in time.
    #[error("handshake timed out")]
    Timeout,

    /// The host refused the connection because it is full.
    #[error("host is full")]
    HostFull,

    /// The host's identity does not match the pinned key.
    #[error("unknown host identity {got} (expected {expected})")]
    UnknownHost {
        /// Fingerprint of the pinned key.
        expected: String,
        /// Fingerprint presented.
        got: String,
    },

    /// A record kind that is not valid at this point.
    #[error("unexpected record: {0}")]
    UnexpectedRecord(String),

    /// A data record was not UTF-8 where text was expected.
    #[error("record body is not valid UTF-8")]
    InvalidText,
}

/// Result alias for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Direction of a record stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to host.
    ClientToHost,
    /// Host to client.
    HostToClient,
}

impl Direction {
    /// Short label used in key derivation and AAD.
    pub fn label(self) -> &'static str {
        match self {
            Self::ClientToHost => "c2h",
            Self::HostToClient => "h2c",
        }
    }

    /// The other direction.
    pub fn opposite(self) -> Self {
        match self {
            Self::ClientToHost => Self::HostToClient,
            Self::HostToClient => Self::ClientToHost,
        }
    }
}

/// Record type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    /// Application data.
    Data = 0,
    /// Outer-key rotation.
    Rotate = 1,
    /// Handshake confirmation.
    Finished = 2,
}

impl RecordKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Data),
            1 => Some(Self::Rotate),
            2 => Some(Self::Finished),
            _ => None,
        }
    }
}

/// Handshake settings.
#[derive(Debug, Clone)]
pub struct HandshakeOptions {
    /// Bound on the whole handshake.
    pub timeout: Duration,
    /// If set, the client only accepts a host with this Ed25519 key.
    pub expected_host: Option<[u8; KEY_SIZE]>,
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            expected_host: None,
        }
    }
}

fn aad(direction: Direction, layer: &str, sequence: u64) -> Vec<u8> {
    let mut aad = format!("linelock/{}/{}", direction.label(), layer).into_bytes();
    aad.extend_from_slice(&sequence.to_be_bytes());
    aad
}

// ===========================================
// Record layer
// ===========================================

/// Output half of a security context.
#[derive(Debug)]
pub(crate) struct RecordSealer {
    inner: SymmetricKey,
    outer: SymmetricKey,
    direction: Direction,
    sequence: u64,
}

impl RecordSealer {
    pub(crate) fn new(inner: SymmetricKey, outer: SymmetricKey, direction: Direction) -> Self {
        Self {
            inner,
            outer,
            direction,
            sequence: 0,
        }
    }

    pub(crate) fn seal(&mut self, kind: RecordKind, body: &[u8]) -> Result<Vec<u8>> {
        let sequence = self.sequence + 1;
        let mut plaintext = Vec::with_capacity(1 + body.len());
        plaintext.push(kind as u8);
        plaintext.extend_from_slice(body);

        let inner = self
            .inner
            .encrypt(&plaintext, &aad(self.direction, "inner", sequence))?;
        let outer = self
            .outer
            .encrypt(&inner, &aad(self.direction, "outer", sequence))?;
        self.sequence = sequence;
        Ok(outer)
    }

    fn install_outer(&mut self, key: SymmetricKey) {
        self.outer = key;
        self.sequence = 0;
    }
}

/// An opened record.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Record {
    Data(Vec<u8>),
    Finished(Vec<u8>),
    Rotated,
}

/// Input half of a security context.
#[derive(Debug)]
pub(crate) struct RecordOpener {
    inner: SymmetricKey,
    outer: SymmetricKey,
    direction: Direction,
    sequence: u64,
}

impl RecordOpener {
    pub(crate) fn new(inner: SymmetricKey, outer: SymmetricKey, direction: Direction) -> Self {
        Self {
            inner,
            outer,
            direction,
            sequence: 0,
        }
    }

    pub(crate) fn open(&mut self, data: &[u8]) -> Result<Record> {
        let sequence = self.sequence + 1;
        let failed = || ChannelError::Authentication {
            direction: self.direction.label(),
            sequence,
        };
        let inner = self
            .outer
            .decrypt(data, &aad(self.direction, "outer", sequence))
            .map_err(|_| failed())?;
        let plaintext = self
            .inner
            .decrypt(&inner, &aad(self.direction, "inner", sequence))
            .map_err(|_| failed())?;
        self.sequence = sequence;

        let (&kind, body) = plaintext
            .split_first()
            .ok_or_else(|| ChannelError::UnexpectedRecord("empty record".into()))?;
        match RecordKind::from_byte(kind) {
            Some(RecordKind::Data) => Ok(Record::Data(body.to_vec())),
            Some(RecordKind::Finished) => Ok(Record::Finished(body.to_vec())),
            Some(RecordKind::Rotate) => {
                let key = SymmetricKey::from_slice(body)?;
                self.outer = key;
                self.sequence = 0;
                Ok(Record::Rotated)
            }
            None => Err(ChannelError::UnexpectedRecord(format!("kind {kind}"))),
        }
    }
}

// ===========================================
// Halves
// ===========================================

/// Sending half of a secured connection.
#[derive(Debug)]
pub struct SecureWriter {
    frames: FrameWriter<TcpStream>,
    sealer: RecordSealer,
}

impl SecureWriter {
    /// Send one application message.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.send_record(RecordKind::Data, data)
    }

    /// Send a text message.
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.send(text.as_bytes())
    }

    /// Replace this direction's outer key.
    ///
    /// The new key travels under the current keys; afterwards both ends
    /// count this direction from zero again.
    pub fn rotate(&mut self) -> Result<()> {
        let next = SymmetricKey::random()?;
        self.send_record(RecordKind::Rotate, next.as_bytes())?;
        self.sealer.install_outer(next);
        debug!(direction = self.sealer.direction.label(), "outer key rotated");
        Ok(())
    }

    /// Records sent under the current outer key.
    pub fn sequence(&self) -> u64 {
        self.sealer.sequence
    }

    /// Remote address.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.frames.get_ref().peer_addr().ok()
    }

    /// Close both directions of the socket. The reading half sees the
    /// connection as closed.
    pub fn shutdown(&self) {
        let _ = self.frames.get_ref().shutdown(Shutdown::Both);
    }

    fn send_record(&mut self, kind: RecordKind, body: &[u8]) -> Result<()> {
        let record = self.sealer.seal(kind, body)?;
        self.frames.send_raw(&record)?;
        Ok(())
    }
}

/// Receiving half of a secured connection.
#[derive(Debug)]
pub struct SecureReader {
    frames: FrameReader<TcpStream>,
    opener: RecordOpener,
}

impl SecureReader {
    /// Receive one application message, or `None` on timeout.
    ///
    /// Rotation records are applied and skipped. Any authentication failure
    /// is returned as [`ChannelError::Authentication`] and the connection
    /// should be dropped.
    pub fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        loop {
            match self.next_record(timeout)? {
                None => return Ok(None),
                Some(Record::Data(body)) => return Ok(Some(body)),
                Some(Record::Rotated) => {
                    debug!(direction = self.opener.direction.label(), "peer rotated outer key");
                }
                Some(Record::Finished(_)) => {
                    return Err(ChannelError::UnexpectedRecord(
                        "finished after handshake".into(),
                    ))
                }
            }
        }
    }

    /// Receive one text message, or `None` on timeout.
    pub fn receive_text(&mut self, timeout: Duration) -> Result<Option<String>> {
        match self.receive(timeout)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| ChannelError::InvalidText),
            None => Ok(None),
        }
    }

    /// Records received under the current outer key.
    pub fn sequence(&self) -> u64 {
        self.opener.sequence
    }

    fn next_record(&mut self, timeout: Duration) -> Result<Option<Record>> {
        match self.frames.receive(timeout)? {
            None => Ok(None),
            Some(Frame::Raw(bytes)) => self.opener.open(&bytes).map(Some),
            Some(Frame::Text(_)) => Err(ChannelError::UnexpectedRecord(
                "cleartext frame on secured channel".into(),
            )),
        }
    }
}

// ===========================================
// Handshake driver
// ===========================================

/// An established, mutually authenticated channel.
#[derive(Debug)]
pub struct SecureChannel {
    reader: SecureReader,
    writer: SecureWriter,
    peer: PeerIdentity,
}

impl SecureChannel {
    /// Run the client side of the handshake over a connected stream.
    pub fn initiate(
        stream: TcpStream,
        identity: &Identity,
        options: &HandshakeOptions,
    ) -> Result<Self> {
        let (mut reader, mut writer) = Connection::start(stream)?.split()?;
        let deadline = Instant::now() + options.timeout;
        let mut state = HandshakeState::Unauthenticated;

        match receive_before(&mut reader, deadline)? {
            Frame::Text(greeting) if greeting == BANNER => {}
            Frame::Text(greeting) if greeting == FULL_NOTICE => return Err(ChannelError::HostFull),
            _ => return Err(ChannelError::Handshake("unexpected greeting".into())),
        }

        let ours = Hello::new(identity)?;
        writer.send_raw(&ours.to_bytes())?;
        let theirs = receive_hello(&mut reader, deadline)?;
        let host = theirs.peer()?;
        if let Some(expected) = options.expected_host {
            if host.signing_public() != expected {
                return Err(ChannelError::UnknownHost {
                    expected: fingerprint(&expected),
                    got: host.fingerprint(),
                });
            }
        }
        step(&mut state, HandshakeState::KeyExchanged)?;

        let transcript = transcript(&ours, &theirs);
        writer.send_raw(&make_proof(
            identity,
            Role::Client,
            &transcript,
            &host,
            &theirs.nonce,
        )?)?;
        let proof = receive_raw(&mut reader, deadline)?;
        check_proof(identity, &proof, Role::Host, &transcript, &host, &ours.nonce)
            .map_err(|e| ChannelError::Handshake(format!("host proof rejected: {e}")))?;
        step(&mut state, HandshakeState::MutuallyAuthenticated)?;

        let transfer = receive_raw(&mut reader, deadline)?;
        let keys = open_key_transfer(identity, &host, &transcript, &transfer)
            .map_err(|e| ChannelError::Handshake(format!("key transfer rejected: {e}")))?;
        let mut channel = Self::install(reader, writer, keys, Direction::ClientToHost, host)?;
        channel
            .writer
            .send_record(RecordKind::Finished, &transcript)?;
        step(&mut state, HandshakeState::Secured)?;

        info!(host = %channel.peer.fingerprint(), "channel secured");
        Ok(channel)
    }

    /// Run the host side of the handshake over an accepted stream.
    pub fn accept(
        stream: TcpStream,
        identity: &Identity,
        options: &HandshakeOptions,
    ) -> Result<Self> {
        let (mut reader, mut writer) = Connection::start(stream)?.split()?;
        let deadline = Instant::now() + options.timeout;
        let mut state = HandshakeState::Unauthenticated;

        writer.send_text(BANNER)?;
        let theirs = receive_hello(&mut reader, deadline)?;
        let client = theirs.peer()?;
        let ours = Hello::new(identity)?;
        writer.send_raw(&ours.to_bytes())?;
        step(&mut state, HandshakeState::KeyExchanged)?;

        let transcript = transcript(&theirs, &ours);
        let proof = receive_raw(&mut reader, deadline)?;
        if let Err(e) = check_proof(identity, &proof, Role::Client, &transcript, &client, &ours.nonce)
        {
            warn!(client = %client.fingerprint(), error = %e, "client proof rejected");
            return Err(ChannelError::Handshake(format!("client proof rejected: {e}")));
        }
        writer.send_raw(&make_proof(
            identity,
            Role::Host,
            &transcript,
            &client,
            &theirs.nonce,
        )?)?;
        step(&mut state, HandshakeState::MutuallyAuthenticated)?;

        let keys = SessionKeys::generate()?;
        writer.send_raw(&make_key_transfer(identity, &client, &transcript, &keys)?)?;
        let mut channel = Self::install(reader, writer, keys, Direction::HostToClient, client)?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        match channel.reader.next_record(remaining)? {
            Some(Record::Finished(body)) if body == transcript => {}
            Some(_) => return Err(ChannelError::Handshake("bad finished record".into())),
            None => return Err(ChannelError::Timeout),
        }
        step(&mut state, HandshakeState::Secured)?;

        info!(client = %channel.peer.fingerprint(), "channel secured");
        Ok(channel)
    }

    fn install(
        reader: FrameReader<TcpStream>,
        writer: FrameWriter<TcpStream>,
        keys: SessionKeys,
        outgoing: Direction,
        peer: PeerIdentity,
    ) -> Result<Self> {
        let incoming = outgoing.opposite();
        let out_key = keys.outer.derive(outgoing.label().as_bytes())?;
        let in_key = keys.outer.derive(incoming.label().as_bytes())?;
        Ok(Self {
            writer: SecureWriter {
                frames: writer,
                sealer: RecordSealer::new(keys.inner.clone(), out_key, outgoing),
            },
            reader: SecureReader {
                frames: reader,
                opener: RecordOpener::new(keys.inner.clone(), in_key, incoming),
            },
            peer,
        })
    }

    /// The authenticated peer.
    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    /// Split into halves for separate threads.
    pub fn into_parts(self) -> (SecureReader, SecureWriter, PeerIdentity) {
        (self.reader, self.writer, self.peer)
    }
}

/// Turn a connection away with the "full" greeting.
pub fn refuse(stream: TcpStream) -> Result<()> {
    let mut connection = Connection::start(stream)?;
    connection.send_text(FULL_NOTICE)?;
    connection.end();
    Ok(())
}

fn step(state: &mut HandshakeState, to: HandshakeState) -> Result<()> {
    state
        .advance(to)
        .map_err(|(from, to)| ChannelError::State { from, to })
}

fn receive_before(reader: &mut FrameReader<TcpStream>, deadline: Instant) -> Result<Frame> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(ChannelError::Timeout);
    }
    reader.receive(remaining)?.ok_or(ChannelError::Timeout)
}

fn receive_raw(reader: &mut FrameReader<TcpStream>, deadline: Instant) -> Result<Vec<u8>> {
    match receive_before(reader, deadline)? {
        Frame::Raw(bytes) => Ok(bytes),
        Frame::Text(_) => Err(ChannelError::Handshake("expected binary frame".into())),
    }
}

fn receive_hello(reader: &mut FrameReader<TcpStream>, deadline: Instant) -> Result<Hello> {
    let hello = handshake::Hello::from_bytes(&receive_raw(reader, deadline)?)?;
    if hello.version != PROTOCOL_VERSION {
        return Err(ChannelError::Handshake(format!(
            "unsupported protocol version {}",
            hello.version
        )));
    }
    Ok(hello)
}
