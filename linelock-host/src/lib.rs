//! # linelock-host
//!
//! Host server for linelock collaborative editing.
//!
//! The host shares the top-level files of a project directory with
//! registered users. It:
//! - Accepts TCP connections and secures each with a mutual handshake
//! - Registers and logs in users against an encrypted flat-file database
//! - Serializes every file mutation through one command worker
//! - Persists edits to disk and appends them to per-file change logs
//!
//! ## Threads
//!
//! ```text
//!  accept ──spawn──► session (one per client) ──push──► command pool
//!                        │                                   │
//!                        └── ReqFiles answered inline        ▼
//!                                                     worker (one)
//!                                                          │
//!                                            Coordinator<DiskStore>
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod database;
pub mod disk;
pub mod error;
pub mod limits;
pub mod server;
mod session;
mod worker;

pub use config::{Config, ConfigError};
pub use database::{UserDatabase, UserRecord};
pub use disk::DiskStore;
pub use error::{DatabaseError, HostError, ProtocolError, Result};
pub use server::{Host, HostHandle, HostMetrics};
