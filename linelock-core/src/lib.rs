//! # linelock-core
//!
//! Pure logic for linelock (no I/O, instant tests).
//!
//! This crate implements the file model, the line-lock/edit protocol and the
//! offset reconciliation scheme without any network or socket I/O.
//!
//! ## Design Philosophy
//!
//! The host-side [`Coordinator`] and the client-side [`Workspace`] take
//! messages as input and produce actions or events as output. Persistence
//! goes through the [`ContentStore`] trait so the coordinator can be driven
//! against [`MemoryStore`] in tests.
//!
//! The actual I/O (sockets, disk, threads) is performed by `linelock-host`
//! and `linelock-client`, which interpret the values produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod changelog;
pub mod coordinator;
pub mod file;
pub mod identity;
pub mod offsets;
pub mod patch;
pub mod queue;
pub mod registry;
pub mod state;
pub mod store;
pub mod trust;
pub mod workspace;

pub use changelog::{ChangeEntry, ChangeLog};
pub use coordinator::{Action, ClientState, Command, Coordinator, Request};
pub use file::VirtualFile;
pub use identity::{validate_password, validate_username, PasswordError, UsernameError};
pub use offsets::{OffsetError, OffsetLedger, PendingOffset};
pub use patch::{Content, PatchError};
pub use queue::{CommandPool, PoolError};
pub use registry::{FileId, FileRegistry, RegistryError};
pub use state::{Action as StateAction, ConnectionState, Event, CONNECT_FAILED};
pub use store::{ContentStore, MemoryStore, StoreError};
pub use trust::{Penalty, TrustFactor};
pub use workspace::{ChosenBlock, ClientEvent, LocalFile, Workspace, WorkspaceError};
