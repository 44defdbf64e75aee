//! Error types for linelock wire handling.

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The message has no `::` header separator.
    #[error("missing protocol header separator")]
    MissingHeader,

    /// The header does not name a known protocol family.
    #[error("unknown protocol header: {0}")]
    UnknownProtocol(String),

    /// The command name is not part of the protocol's command table.
    #[error("unknown {protocol} command: {name}")]
    UnknownCommand {
        /// Protocol family header.
        protocol: &'static str,
        /// The unrecognized command name.
        name: String,
    },

    /// A field was not valid base64.
    #[error("invalid base64 field: {0}")]
    InvalidBase64(String),

    /// A textual field was not valid UTF-8.
    #[error("field is not valid UTF-8")]
    InvalidUtf8,

    /// A required argument is missing.
    #[error("{command}: missing argument #{index}")]
    MissingArgument {
        /// Command being decoded.
        command: &'static str,
        /// Zero-based argument index.
        index: usize,
    },

    /// An argument was present but malformed.
    #[error("{command}: invalid argument: {reason}")]
    InvalidArgument {
        /// Command being decoded.
        command: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// Line numbers on the wire are 1-based.
    #[error("invalid line number: {0}")]
    InvalidLineNumber(String),

    /// Project code could not be decoded into a socket address.
    #[error("invalid project code: {0}")]
    InvalidProjectCode(String),
}
