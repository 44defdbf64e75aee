//! Generic command encoding.
//!
//! Every command is one text record:
//!
//! ```text
//! HEADER::b64(command)->b64(arg1)->b64(arg2)...
//! ```
//!
//! The standard base64 alphabet never contains `-` or `>`, so splitting on
//! `->` is unambiguous. A command with no arguments has no `->` at all, while
//! a single empty argument produces a trailing `->`.

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::WireError;

const HEADER_SEPARATOR: &str = "::";
const FIELD_SEPARATOR: &str = "->";

/// Protocol family named by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// File listing, content and line-edit commands.
    Files,
    /// Account registration and login.
    Registration,
    /// Session-level control.
    Network,
}

impl Protocol {
    /// The header string.
    pub fn header(self) -> &'static str {
        match self {
            Self::Files => "FILES",
            Self::Registration => "REGISTRATION",
            Self::Network => "NETWORK",
        }
    }

    /// Parse a header string.
    pub fn from_header(s: &str) -> Result<Self, WireError> {
        match s {
            "FILES" => Ok(Self::Files),
            "REGISTRATION" => Ok(Self::Registration),
            "NETWORK" => Ok(Self::Network),
            other => Err(WireError::UnknownProtocol(other.to_string())),
        }
    }
}

/// A decoded but untyped command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand {
    /// Protocol family.
    pub protocol: Protocol,
    /// Command name.
    pub name: String,
    /// Decoded argument bytes.
    pub args: Vec<Vec<u8>>,
}

impl RawCommand {
    /// Create a command from a name and binary arguments.
    pub fn new(protocol: Protocol, name: impl Into<String>, args: Vec<Vec<u8>>) -> Self {
        Self {
            protocol,
            name: name.into(),
            args,
        }
    }

    /// Encode to the wire text form.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(16 + self.args.iter().map(|a| a.len() * 4 / 3 + 6).sum::<usize>());
        out.push_str(self.protocol.header());
        out.push_str(HEADER_SEPARATOR);
        out.push_str(&STANDARD.encode(self.name.as_bytes()));
        for arg in &self.args {
            out.push_str(FIELD_SEPARATOR);
            out.push_str(&STANDARD.encode(arg));
        }
        out
    }

    /// Decode the wire text form.
    pub fn parse(text: &str) -> Result<Self, WireError> {
        let (header, body) = text
            .split_once(HEADER_SEPARATOR)
            .ok_or(WireError::MissingHeader)?;
        let protocol = Protocol::from_header(header)?;

        let mut fields = body.split(FIELD_SEPARATOR);
        let name_field = fields.next().unwrap_or_default();
        let name = String::from_utf8(decode_field(name_field)?).map_err(|_| WireError::InvalidUtf8)?;
        let args = fields.map(decode_field).collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            protocol,
            name,
            args,
        })
    }
}

fn decode_field(field: &str) -> Result<Vec<u8>, WireError> {
    STANDARD
        .decode(field)
        .map_err(|e| WireError::InvalidBase64(e.to_string()))
}

/// Encode a headerless list of fields (`b64->b64->...`).
///
/// Used for payloads that are sealed before being carried as an argument.
pub fn encode_fields(fields: &[&[u8]]) -> String {
    fields
        .iter()
        .map(|f| STANDARD.encode(f))
        .collect::<Vec<_>>()
        .join(FIELD_SEPARATOR)
}

/// Decode a headerless field list produced by [`encode_fields`].
pub fn decode_fields(text: &str) -> Result<Vec<Vec<u8>>, WireError> {
    text.split(FIELD_SEPARATOR).map(decode_field).collect()
}
