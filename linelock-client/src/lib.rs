//! # linelock-client
//!
//! Blocking client for the linelock collaborative editing protocol.
//!
//! ## Features
//!
//! - **Secured transport**: mutual authentication and dual-layer encrypted
//!   records from `linelock-channel`
//! - **Sealed credentials**: registration and login payloads are sealed to
//!   the host's key on top of the session encryption
//! - **Pure state machines**: connection lifecycle and the local file view
//!   come from `linelock-core`; this crate only performs I/O
//! - **Event stream**: everything the host tells us arrives as
//!   [`ClientEvent`]s on an `mpsc` receiver
//!
//! ## Example
//!
//! ```ignore
//! use linelock_client::{Client, ClientConfig, RegisterType};
//!
//! let config = ClientConfig::from_code("MTI3LjAuMC4xOjQ1Njc4", "alice_01", "Str0ngPass!", RegisterType::Login)?;
//! let (client, events) = Client::connect(config)?;
//!
//! client.request_file("main.py")?;
//! for event in events {
//!     println!("{event:?}");
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;

pub use client::{Client, ClientError};
pub use config::{ClientConfig, HostTarget, RegisterType};
pub use linelock_core::ClientEvent;
