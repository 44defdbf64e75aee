//! Client connection state machine.
//!
//! A pure, side-effect-free state machine for the client's session
//! lifecycle. It takes events as input and produces a new state plus a list
//! of actions to execute. `linelock-client` performs the actual I/O.

use crate::workspace::ClientEvent;

/// Message shown when a host cannot be reached.
pub const CONNECT_FAILED: &str = "could not connect — host may be offline or full";

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,
    /// TCP connection attempt in progress.
    Connecting,
    /// Connected, performing the security handshake.
    Handshaking,
    /// Secured, waiting for the registration/login verdict.
    Authenticating,
    /// Logged in.
    Connected {
        /// Authenticated username.
        username: String,
    },
}

impl ConnectionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            (Self::Disconnected, Event::ConnectRequested) => {
                (Self::Connecting, vec![Action::Connect])
            }

            (Self::Connecting, Event::ConnectSucceeded) => {
                (Self::Handshaking, vec![Action::StartHandshake])
            }
            (Self::Connecting, Event::ConnectFailed { error }) => (
                Self::Disconnected,
                vec![Action::ReportError {
                    message: format!("{CONNECT_FAILED} ({error})"),
                }],
            ),

            (Self::Handshaking, Event::HandshakeCompleted) => {
                (Self::Authenticating, vec![Action::SendCredentials])
            }
            (Self::Handshaking, Event::HandshakeFailed { error }) => (
                Self::Disconnected,
                vec![
                    Action::CloseTransport,
                    Action::ReportError {
                        message: format!("handshake failed: {error}"),
                    },
                ],
            ),

            (Self::Authenticating, Event::AuthAccepted { username }) => (
                Self::Connected {
                    username: username.clone(),
                },
                vec![
                    Action::StartReceiving,
                    Action::RequestFiles,
                    Action::EmitEvent(ClientEvent::Connected { username }),
                ],
            ),
            (Self::Authenticating, Event::AuthRejected { reason }) => (
                Self::Disconnected,
                vec![
                    Action::CloseTransport,
                    Action::ReportError { message: reason },
                ],
            ),

            (Self::Connected { .. }, Event::Disconnected { reason }) => (
                Self::Disconnected,
                vec![
                    Action::CloseTransport,
                    Action::EmitEvent(ClientEvent::Disconnected { reason }),
                ],
            ),
            (Self::Connected { .. }, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::SendDisconnect,
                    Action::CloseTransport,
                    Action::EmitEvent(ClientEvent::Disconnected {
                        reason: "user requested".into(),
                    }),
                ],
            ),

            // Connection lost before login completed
            (
                Self::Connecting | Self::Handshaking | Self::Authenticating,
                Event::Disconnected { reason },
            ) => (
                Self::Disconnected,
                vec![
                    Action::CloseTransport,
                    Action::ReportError {
                        message: format!("{CONNECT_FAILED} ({reason})"),
                    },
                ],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Check if currently trying to connect.
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Handshaking | Self::Authenticating
        )
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Events that can occur in the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// User requested connection.
    ConnectRequested,
    /// TCP connection succeeded.
    ConnectSucceeded,
    /// TCP connection failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Security handshake completed successfully.
    HandshakeCompleted,
    /// Security handshake failed.
    HandshakeFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Host accepted the registration or login.
    AuthAccepted {
        /// Authenticated username.
        username: String,
    },
    /// Host rejected the registration or login.
    AuthRejected {
        /// Host-supplied reason.
        reason: String,
    },
    /// Connection was lost.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// User requested disconnect.
    DisconnectRequested,
}

/// Actions to be executed by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the TCP connection.
    Connect,
    /// Run the security handshake.
    StartHandshake,
    /// Send sealed credentials.
    SendCredentials,
    /// Spawn the receive loop.
    StartReceiving,
    /// Ask for the shared file listing.
    RequestFiles,
    /// Send an orderly disconnect notice.
    SendDisconnect,
    /// Shut the transport down.
    CloseTransport,
    /// Record a user-visible error.
    ReportError {
        /// Error text.
        message: String,
    },
    /// Emit an event to the application.
    EmitEvent(ClientEvent),
}
