//! Length-prefixed framing over a byte stream.
//!
//! ```text
//! text frame:  LLLL 0 <LLLL bytes of text>
//! raw frame:   LLLL 1 <LLLL bytes: decimal byte count N> <N bytes, written in 1024-byte chunks>
//! ```
//!
//! `LLLL` is a 4-digit zero-padded ASCII decimal length. A receive with a
//! timeout returns `Ok(None)` when nothing arrived in time; once the first
//! header byte is in, the rest of the frame is awaited within a bounded
//! stall budget.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use thiserror::Error;

/// Width of the length header.
pub const HEADER_DIGITS: usize = 4;

/// Largest text frame payload.
pub const MAX_TEXT_LEN: usize = 9999;

/// Raw payloads are written and read in blocks of this size.
pub const CHUNK_SIZE: usize = 1024;

/// Largest accepted raw payload.
pub const MAX_RAW_SIZE: usize = 16 * 1024 * 1024;

/// How long a blocked write may wait for the peer to drain its socket.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive read timeouts tolerated inside one frame.
const STALL_BUDGET: u32 = 50;

const TEXT_FLAG: u8 = b'0';
const RAW_FLAG: u8 = b'1';

/// Framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The connection was never started.
    #[error("connection not started")]
    NotStarted,

    /// The connection has been ended.
    #[error("connection ended")]
    Ended,

    /// The peer closed the stream.
    #[error("connection closed by peer")]
    Closed,

    /// The peer stopped sending in the middle of a frame.
    #[error("peer stalled mid-frame")]
    Stalled,

    /// Text payload exceeds the 4-digit header.
    #[error("text payload too long: {0} bytes (max {MAX_TEXT_LEN})")]
    TextTooLong(usize),

    /// Raw payload exceeds [`MAX_RAW_SIZE`].
    #[error("raw payload too large: {0} bytes")]
    RawTooLarge(usize),

    /// Header or count field is not what the format requires.
    #[error("malformed frame header: {0}")]
    InvalidHeader(String),

    /// A text frame was not UTF-8.
    #[error("text frame is not valid UTF-8")]
    InvalidUtf8,

    /// Socket error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Textual payload.
    Text(String),
    /// Binary payload.
    Raw(Vec<u8>),
}

impl Frame {
    /// The payload bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Text(text) => text.into_bytes(),
            Self::Raw(bytes) => bytes,
        }
    }
}

/// Streams whose reads can be bounded by a timeout.
pub trait TimeoutRead: Read {
    /// Set or clear the read timeout.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl TimeoutRead for TcpStream {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)
    }
}

/// Writing half.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Send a text frame.
    pub fn send_text(&mut self, text: &str) -> Result<(), FrameError> {
        if text.len() > MAX_TEXT_LEN {
            return Err(FrameError::TextTooLong(text.len()));
        }
        let mut frame = Vec::with_capacity(HEADER_DIGITS + 1 + text.len());
        write_header(&mut frame, text.len(), TEXT_FLAG);
        frame.extend_from_slice(text.as_bytes());
        self.inner.write_all(&frame)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Send a raw frame.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        if bytes.len() > MAX_RAW_SIZE {
            return Err(FrameError::RawTooLarge(bytes.len()));
        }
        let count = bytes.len().to_string();
        let mut header = Vec::with_capacity(HEADER_DIGITS + 1 + count.len());
        write_header(&mut header, count.len(), RAW_FLAG);
        header.extend_from_slice(count.as_bytes());
        self.inner.write_all(&header)?;
        for chunk in bytes.chunks(CHUNK_SIZE) {
            self.inner.write_all(chunk)?;
        }
        self.inner.flush()?;
        Ok(())
    }

    /// Get the wrapped writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

fn write_header(out: &mut Vec<u8>, len: usize, flag: u8) {
    out.extend_from_slice(format!("{:0width$}", len, width = HEADER_DIGITS).as_bytes());
    out.push(flag);
}

/// Reading half.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
}

impl<R: TimeoutRead> FrameReader<R> {
    /// Wrap a reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Receive one frame, or `None` if nothing arrived within `timeout`.
    pub fn receive(&mut self, timeout: Duration) -> Result<Option<Frame>, FrameError> {
        self.inner
            .set_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        let mut first = [0u8; 1];
        loop {
            match self.inner.read(&mut first) {
                Ok(0) => return Err(FrameError::Closed),
                Ok(_) => break,
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let mut rest = [0u8; HEADER_DIGITS];
        self.read_patiently(&mut rest)?;
        let mut digits = [0u8; HEADER_DIGITS];
        digits[0] = first[0];
        digits[1..].copy_from_slice(&rest[..HEADER_DIGITS - 1]);
        let len = parse_decimal(&digits)?;
        let flag = rest[HEADER_DIGITS - 1];

        match flag {
            TEXT_FLAG => {
                let mut payload = vec![0u8; len];
                self.read_patiently(&mut payload)?;
                let text = String::from_utf8(payload).map_err(|_| FrameError::InvalidUtf8)?;
                Ok(Some(Frame::Text(text)))
            }
            RAW_FLAG => {
                if len == 0 {
                    return Err(FrameError::InvalidHeader("empty raw count".into()));
                }
                let mut count = vec![0u8; len];
                self.read_patiently(&mut count)?;
                let count = parse_decimal(&count)?;
                if count > MAX_RAW_SIZE {
                    return Err(FrameError::RawTooLarge(count));
                }
                let mut payload = vec![0u8; count];
                for chunk in payload.chunks_mut(CHUNK_SIZE) {
                    self.read_patiently(chunk)?;
                }
                Ok(Some(Frame::Raw(payload)))
            }
            other => Err(FrameError::InvalidHeader(format!(
                "unknown flag byte 0x{other:02x}"
            ))),
        }
    }

    /// Fill `buf`, retrying read timeouts up to the stall budget.
    fn read_patiently(&mut self, buf: &mut [u8]) -> Result<(), FrameError> {
        let mut filled = 0;
        let mut stalls = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => return Err(FrameError::Closed),
                Ok(n) => {
                    filled += n;
                    stalls = 0;
                }
                Err(e) if is_timeout(&e) => {
                    stalls += 1;
                    if stalls >= STALL_BUDGET {
                        return Err(FrameError::Stalled);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Get the wrapped reader.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn parse_decimal(bytes: &[u8]) -> Result<usize, FrameError> {
    if bytes.is_empty() || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(FrameError::InvalidHeader(
            String::from_utf8_lossy(bytes).into_owned(),
        ));
    }
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| FrameError::InvalidHeader(String::from_utf8_lossy(bytes).into_owned()))
}

#[derive(Debug)]
enum ConnectionState {
    NotStarted,
    Started {
        reader: FrameReader<TcpStream>,
        writer: FrameWriter<TcpStream>,
    },
    Ended,
}

/// A framed TCP connection with an explicit lifecycle.
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
}

impl Connection {
    /// A connection that has not been started.
    pub fn idle() -> Self {
        Self {
            state: ConnectionState::NotStarted,
        }
    }

    /// Connect to a host.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, FrameError> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        Self::start(stream)
    }

    /// Start framing over an accepted stream.
    ///
    /// Writes fail after [`WRITE_TIMEOUT`] without progress.
    pub fn start(stream: TcpStream) -> Result<Self, FrameError> {
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        let reader = FrameReader::new(stream.try_clone()?);
        let writer = FrameWriter::new(stream);
        Ok(Self {
            state: ConnectionState::Started { reader, writer },
        })
    }

    /// Whether the connection is usable.
    pub fn is_started(&self) -> bool {
        matches!(self.state, ConnectionState::Started { .. })
    }

    /// Send a text frame.
    pub fn send_text(&mut self, text: &str) -> Result<(), FrameError> {
        self.writer()?.send_text(text)
    }

    /// Send a raw frame.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        self.writer()?.send_raw(bytes)
    }

    /// Receive one frame, `None` on timeout.
    pub fn receive(&mut self, timeout: Duration) -> Result<Option<Frame>, FrameError> {
        match &mut self.state {
            ConnectionState::Started { reader, .. } => reader.receive(timeout),
            ConnectionState::NotStarted => Err(FrameError::NotStarted),
            ConnectionState::Ended => Err(FrameError::Ended),
        }
    }

    /// Close the socket. Further use fails with [`FrameError::Ended`].
    pub fn end(&mut self) {
        if let ConnectionState::Started { writer, .. } = &self.state {
            let _ = writer.get_ref().shutdown(Shutdown::Both);
        }
        self.state = ConnectionState::Ended;
    }

    /// Split into independent halves for a reader thread and a writer.
    pub fn split(self) -> Result<(FrameReader<TcpStream>, FrameWriter<TcpStream>), FrameError> {
        match self.state {
            ConnectionState::Started { reader, writer } => Ok((reader, writer)),
            ConnectionState::NotStarted => Err(FrameError::NotStarted),
            ConnectionState::Ended => Err(FrameError::Ended),
        }
    }

    fn writer(&mut self) -> Result<&mut FrameWriter<TcpStream>, FrameError> {
        match &mut self.state {
            ConnectionState::Started { writer, .. } => Ok(writer),
            ConnectionState::NotStarted => Err(FrameError::NotStarted),
            ConnectionState::Ended => Err(FrameError::Ended),
        }
    }
}
