//! # linelock-types
//!
//! Wire format types for the linelock collaborative editing protocol.
//!
//! This crate provides the foundational types used across all linelock crates:
//! - [`ClientId`], [`UserId`], [`OffsetId`] - Identity and ordering types
//! - [`AccessLevel`], [`SharedAccess`] - Per-file visibility tiers
//! - [`LineNumber`] - 0-based internally, 1-based on the wire
//! - [`ProjectCode`] - Shareable connection token
//! - [`Message`] - Typed protocol commands and their `HEADER::b64->b64` encoding
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod access;
mod error;
mod ids;
mod line;
mod messages;
mod project_code;
pub mod wire;

pub use access::{AccessLevel, SharedAccess};
pub use error::WireError;
pub use ids::{ClientId, OffsetId, UserId};
pub use line::LineNumber;
pub use messages::{
    Credentials, FileEntry, FilesCommand, FilesMessage, Message, NetworkMessage,
    RegistrationCommand, RegistrationMessage,
};
pub use project_code::ProjectCode;
pub use wire::{Protocol, RawCommand};
