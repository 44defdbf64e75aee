//! Client - the main interface for linelock.
//!
//! # Architecture
//!
//! The client drives the pure [`ConnectionState`] machine from
//! `linelock-core` and interprets its actions as socket I/O. Host messages
//! are folded into a [`Workspace`] by a dedicated receive thread, which
//! forwards the resulting [`ClientEvent`]s to the application.
//!
//! ```text
//! Application → Client → SecureWriter → Network
//!      ↑                                   ↓
//!   events  ←  Workspace  ←  receive thread (SecureReader)
//! ```

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use linelock_channel::{
    ChannelError, CryptoError, Identity, PeerIdentity, SecureChannel, SecureReader, SecureWriter,
};
use linelock_core::{
    validate_password, validate_username, ClientEvent, ConnectionState, Event, StateAction,
    Workspace, WorkspaceError,
};
use linelock_types::{
    Credentials, FilesMessage, LineNumber, Message, NetworkMessage, OffsetId, RegistrationMessage,
    WireError,
};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, RegisterType};

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Not connected to a host.
    #[error("not connected")]
    NotConnected,

    /// The host could not be reached or the handshake failed.
    #[error("{0}")]
    ConnectionFailed(String),

    /// The host refused the registration or login.
    #[error("{0}")]
    Rejected(String),

    /// Secured channel error.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Invalid local edit operation.
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    /// Malformed configuration or message.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared with the receive thread.
struct Shared {
    state: Mutex<ConnectionState>,
    workspace: Mutex<Workspace>,
    writer: Mutex<SecureWriter>,
    events: Mutex<Sender<ClientEvent>>,
    last_error: Mutex<Option<String>>,
    running: AtomicBool,
}

impl Shared {
    /// Feed an event to the state machine and perform its actions.
    fn drive(&self, event: Event) {
        let actions = {
            let mut state = lock(&self.state);
            let (next, actions) = state.clone().on_event(event);
            *state = next;
            actions
        };
        for action in actions {
            self.perform(action);
        }
    }

    fn perform(&self, action: StateAction) {
        match action {
            StateAction::SendDisconnect => {
                let notice = Message::Network(NetworkMessage::Disconnect {
                    reason: "user requested".into(),
                });
                if let Err(e) = lock(&self.writer).send_text(&notice.to_wire()) {
                    debug!(error = %e, "disconnect notice not delivered");
                }
            }
            StateAction::CloseTransport => {
                self.running.store(false, Ordering::SeqCst);
                lock(&self.writer).shutdown();
            }
            StateAction::ReportError { message } => self.record_error(message),
            StateAction::EmitEvent(event) => self.emit(event),
            StateAction::RequestFiles => {
                let request = lock(&self.workspace).request_files();
                if let Err(e) = self.send(request) {
                    self.record_error(e.to_string());
                }
            }
            // Sequenced by `Client::connect` itself.
            StateAction::Connect
            | StateAction::StartHandshake
            | StateAction::SendCredentials
            | StateAction::StartReceiving => {}
        }
    }

    fn emit(&self, event: ClientEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = lock(&self.events).send(event);
    }

    fn record_error(&self, message: String) {
        warn!(error = %message, "client error");
        *lock(&self.last_error) = Some(message);
    }

    fn send(&self, message: FilesMessage) -> Result<(), ClientError> {
        let wire = Message::Files(message).to_wire();
        lock(&self.writer).send_text(&wire)?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).is_connected()
    }
}

/// A connected linelock client.
pub struct Client {
    shared: Arc<Shared>,
    receiver: Option<JoinHandle<()>>,
    server: PeerIdentity,
    username: String,
    fields: Map<String, Value>,
}

impl Client {
    /// Connect, authenticate and log in.
    ///
    /// On success the receive thread is running, the file list has been
    /// requested and a [`ClientEvent::Connected`] is already queued.
    pub fn connect(config: ClientConfig) -> Result<(Self, Receiver<ClientEvent>), ClientError> {
        if config.register_type == RegisterType::Register {
            validate_username(&config.username)
                .map_err(|e| ClientError::Rejected(format!("invalid username: {e}")))?;
            validate_password(&config.password)
                .map_err(|e| ClientError::Rejected(format!("invalid password: {e}")))?;
        }

        let mut state = ConnectionState::new();
        state = step(state, Event::ConnectRequested).0;

        let addr = config.target.resolve()?;
        let stream = match TcpStream::connect_timeout(&addr, config.connect_timeout) {
            Ok(stream) => stream,
            Err(e) => {
                let (_, actions) = step(state, Event::ConnectFailed { error: e.to_string() });
                return Err(ClientError::ConnectionFailed(reported(&actions)));
            }
        };
        state = step(state, Event::ConnectSucceeded).0;

        let identity = Identity::generate()?;
        let channel = match SecureChannel::initiate(stream, &identity, &config.handshake) {
            Ok(channel) => channel,
            Err(ChannelError::HostFull) => {
                let (_, actions) = step(
                    state,
                    Event::Disconnected {
                        reason: "host is full".into(),
                    },
                );
                return Err(ClientError::ConnectionFailed(reported(&actions)));
            }
            Err(e) => {
                let (_, actions) = step(state, Event::HandshakeFailed { error: e.to_string() });
                return Err(ClientError::ConnectionFailed(reported(&actions)));
            }
        };
        state = step(state, Event::HandshakeCompleted).0;
        let (mut reader, mut writer, server) = channel.into_parts();

        let verdict = authenticate(&config, &server, &mut reader, &mut writer)?;
        let (fields, field_error) = match verdict {
            Ok(detail) => match config.register_type {
                RegisterType::Register => (config.fields.clone(), None),
                RegisterType::Login => login_fields(&detail),
            },
            Err(reason) => {
                writer.shutdown();
                let (_, actions) = step(state, Event::AuthRejected { reason });
                return Err(ClientError::Rejected(reported(&actions)));
            }
        };

        let (sender, events) = mpsc::channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            workspace: Mutex::new(Workspace::new()),
            writer: Mutex::new(writer),
            events: Mutex::new(sender),
            last_error: Mutex::new(field_error),
            running: AtomicBool::new(true),
        });

        shared.drive(Event::AuthAccepted {
            username: config.username.clone(),
        });
        let receiver = {
            let shared = Arc::clone(&shared);
            let poll = config.receive_timeout;
            thread::Builder::new()
                .name(format!("linelock-client-{}", config.username))
                .spawn(move || receive_loop(&shared, reader, poll))
                .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?
        };

        info!(host = %server.fingerprint(), user = %config.username, "connected");

        Ok((
            Self {
                shared,
                receiver: Some(receiver),
                server,
                username: config.username,
                fields,
            },
            events,
        ))
    }

    /// Leave the session. Fails if not connected.
    pub fn disconnect(&mut self) -> Result<(), ClientError> {
        if !self.shared.is_connected() {
            self.shared.record_error("disconnect while not connected".into());
            return Err(ClientError::NotConnected);
        }
        self.shared.drive(Event::DisconnectRequested);
        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
        info!(user = %self.username, "disconnected");
        Ok(())
    }

    /// Ask for the shared file list.
    pub fn request_files(&self) -> Result<(), ClientError> {
        self.ensure_connected()?;
        let request = lock(&self.shared.workspace).request_files();
        self.send(request)
    }

    /// Open a shared file.
    pub fn request_file(&self, name: &str) -> Result<(), ClientError> {
        self.ensure_connected()?;
        let request = lock(&self.shared.workspace).request_file(name)?;
        self.send(request)
    }

    /// Ask for the lock on a line of the open file.
    pub fn request_line(&self, line: LineNumber) -> Result<(), ClientError> {
        self.ensure_connected()?;
        let request = lock(&self.shared.workspace).request_line(line)?;
        self.send(request)
    }

    /// Add one line to the held block. Returns the block length.
    pub fn extend_block(&self) -> Result<usize, ClientError> {
        Ok(lock(&self.shared.workspace).extend_block()?)
    }

    /// Commit new content for the held block.
    pub fn update_line(&self, lines: Vec<String>) -> Result<(), ClientError> {
        self.ensure_connected()?;
        let request = lock(&self.shared.workspace).commit(lines)?;
        self.send(request)
    }

    /// Give up the held block.
    pub fn discard_update(&self) -> Result<(), ClientError> {
        self.ensure_connected()?;
        let request = lock(&self.shared.workspace).discard()?;
        self.send(request)
    }

    /// Delete the held line, which must be empty.
    pub fn delete_line(&self) -> Result<(), ClientError> {
        self.ensure_connected()?;
        let request = lock(&self.shared.workspace).delete_line()?;
        self.send(request)
    }

    /// Accept the oldest pending offset.
    pub fn accept_offset(&self, offset: OffsetId) -> Result<(), ClientError> {
        self.ensure_connected()?;
        let (ack, events) = lock(&self.shared.workspace).accept_offset(offset)?;
        for event in events {
            self.shared.emit(event);
        }
        self.send(ack)
    }

    /// Rotate the outer key of the client-to-host direction.
    pub fn rotate_key(&self) -> Result<(), ClientError> {
        self.ensure_connected()?;
        lock(&self.shared.writer).rotate()?;
        Ok(())
    }

    /// The most recent error message, if any.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.last_error).clone()
    }

    /// Whether the session is live.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// The authenticated host identity.
    pub fn server_identity(&self) -> &PeerIdentity {
        &self.server
    }

    /// Logged-in username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Account fields stored by the host.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Inspect the local view.
    pub fn with_workspace<R>(&self, f: impl FnOnce(&Workspace) -> R) -> R {
        f(&lock(&self.shared.workspace))
    }

    fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.shared.is_connected() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    fn send(&self, message: FilesMessage) -> Result<(), ClientError> {
        self.shared.send(message).inspect_err(|e| {
            self.shared.record_error(e.to_string());
        })
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.shared.is_connected() {
            let _ = self.disconnect();
        } else {
            self.shared.running.store(false, Ordering::SeqCst);
            if let Some(handle) = self.receiver.take() {
                let _ = handle.join();
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("username", &self.username)
            .field("server", &self.server)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn step(state: ConnectionState, event: Event) -> (ConnectionState, Vec<StateAction>) {
    state.on_event(event)
}

/// The message of the first `ReportError` action.
fn reported(actions: &[StateAction]) -> String {
    actions
        .iter()
        .find_map(|a| match a {
            StateAction::ReportError { message } => Some(message.clone()),
            _ => None,
        })
        .unwrap_or_else(|| linelock_core::CONNECT_FAILED.to_string())
}

/// Account fields from a login verdict. Unreadable fields leave the map
/// empty and come back as the error to record.
fn login_fields(detail: &str) -> (Map<String, Value>, Option<String>) {
    match serde_json::from_str(detail) {
        Ok(fields) => (fields, None),
        Err(e) => {
            warn!(error = %e, "unreadable account fields in login verdict");
            (Map::new(), Some(format!("unreadable account fields: {e}")))
        }
    }
}

/// Send sealed credentials and wait for the verdict.
///
/// The outer `Result` is a transport failure; the inner one is the host's
/// answer (`Ok(detail)` on acceptance, `Err(reason)` on refusal).
fn authenticate(
    config: &ClientConfig,
    server: &PeerIdentity,
    reader: &mut SecureReader,
    writer: &mut SecureWriter,
) -> Result<Result<String, String>, ClientError> {
    let credentials = Credentials {
        username: config.username.clone(),
        password: config.password.clone(),
        fields: Value::Object(config.fields.clone()).to_string(),
    };
    let sealed = server.seal_chunked(&credentials.to_bytes())?;
    let request = match config.register_type {
        RegisterType::Register => RegistrationMessage::RegCMDUser { sealed },
        RegisterType::Login => RegistrationMessage::LogCMDUser { sealed },
    };
    writer.send_text(&Message::Registration(request).to_wire())?;

    let deadline = Instant::now() + config.auth_timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(Err("no answer to registration request".into()));
        }
        let Some(text) = reader.receive_text(remaining)? else {
            continue;
        };
        match Message::from_wire(&text) {
            Ok(Message::Registration(RegistrationMessage::RegRes { accepted, detail })) => {
                return Ok(if accepted { Ok(detail) } else { Err(detail) });
            }
            Ok(Message::Network(NetworkMessage::Disconnect { reason })) => {
                return Ok(Err(reason));
            }
            Ok(other) => debug!(protocol = ?other.protocol(), "ignoring message before login"),
            Err(e) => debug!(error = %e, "dropping malformed message"),
        }
    }
}

fn receive_loop(shared: &Shared, mut reader: SecureReader, poll: std::time::Duration) {
    while shared.running.load(Ordering::SeqCst) {
        let text = match reader.receive_text(poll) {
            Ok(Some(text)) => text,
            Ok(None) => continue,
            Err(e) => {
                if shared.running.load(Ordering::SeqCst) {
                    shared.drive(Event::Disconnected {
                        reason: e.to_string(),
                    });
                }
                break;
            }
        };
        match Message::from_wire(&text) {
            Ok(Message::Files(message)) => {
                let events = lock(&shared.workspace).apply(message);
                for event in events {
                    shared.emit(event);
                }
            }
            Ok(Message::Network(NetworkMessage::Disconnect { reason })) => {
                info!(%reason, "host closed the session");
                shared.drive(Event::Disconnected { reason });
                break;
            }
            Ok(Message::Registration(_)) => debug!("ignoring registration message"),
            Err(e) => debug!(error = %e, "dropping malformed message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{SocketAddr, TcpListener};

    #[test]
    fn invalid_username_is_rejected_before_connecting() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let config = ClientConfig::new(addr, "_bad", "pw", RegisterType::Register);
        let err = Client::connect(config).unwrap_err();
        assert!(matches!(err, ClientError::Rejected(ref m) if m.starts_with("invalid username")));
    }

    #[test]
    fn unreachable_host_reports_connect_failure() {
        // Bind then drop to get a port with nothing listening.
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let config = ClientConfig::new(addr, "alice_01", "Str0ngPass!", RegisterType::Login);
        let err = Client::connect(config).unwrap_err();
        assert!(
            err.to_string().starts_with(linelock_core::CONNECT_FAILED),
            "got {err}"
        );
    }

    #[test]
    fn login_fields_are_parsed() {
        let (fields, error) = login_fields(r#"{"color":"blue"}"#);
        assert_eq!(fields.get("color"), Some(&Value::from("blue")));
        assert!(error.is_none());
    }

    #[test]
    fn malformed_login_fields_are_reported() {
        for detail in ["{not json", "[1, 2]", ""] {
            let (fields, error) = login_fields(detail);
            assert!(fields.is_empty());
            let error = error.expect("malformed detail must be reported");
            assert!(error.starts_with("unreadable account fields"), "{error}");
        }
    }

    #[test]
    fn reported_falls_back_to_connect_failed() {
        assert_eq!(reported(&[]), linelock_core::CONNECT_FAILED);
        let actions = vec![StateAction::ReportError {
            message: "boom".into(),
        }];
        assert_eq!(reported(&actions), "boom");
    }
}
