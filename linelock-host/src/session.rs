//! Per-connection session thread.
//!
//! A session runs the handshake, then exactly one registration or login
//! exchange, then the receive loop until the peer leaves, the host stops or
//! the connection fails. File list requests are answered on this thread;
//! every other files message becomes a [`Command`] for the worker.

use std::net::{SocketAddr, TcpStream};
use std::sync::Mutex;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use linelock_channel::{HandshakeOptions, SecureChannel, SecureReader, SecureWriter};
use linelock_core::{Command, Penalty, Request};
use linelock_types::{
    ClientId, Credentials, FilesMessage, Message, NetworkMessage, RegistrationMessage,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{HostError, ProtocolError, Result};
use crate::server::{lock, write, ClientHandle, Host, HostMetrics};

/// Usernames held by sessions, from credential check to session end.
#[derive(Debug, Default)]
pub(crate) struct ActiveUsers {
    names: DashMap<String, ClientId>,
}

impl ActiveUsers {
    /// Claim `username` for `client`. Fails if another session holds it.
    pub(crate) fn reserve(&self, username: &str, client: ClientId) -> bool {
        match self.names.entry(username.to_string()) {
            Entry::Occupied(held) => *held.get() == client,
            Entry::Vacant(free) => {
                free.insert(client);
                true
            }
        }
    }

    /// Give up whatever name `client` holds.
    pub(crate) fn release(&self, client: ClientId) {
        self.names.retain(|_, holder| *holder != client);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.names.len()
    }
}

/// Registration verdict sent to the client.
enum Verdict {
    Accepted { username: String, fields: String },
    Rejected(String),
}

pub(crate) fn run(host: &Host, stream: TcpStream, addr: SocketAddr) {
    let options = HandshakeOptions {
        timeout: host.config.limits.handshake_timeout(),
        expected_host: None,
    };
    let channel = match SecureChannel::accept(stream, &host.identity, &options) {
        Ok(channel) => channel,
        Err(e) => {
            HostMetrics::bump(&host.metrics.handshake_failures);
            warn!(%addr, error = %e, "handshake failed");
            return;
        }
    };
    let (mut reader, mut writer, peer) = channel.into_parts();

    let client = ClientId::new();
    let username = match authenticate(host, client, &mut reader, &mut writer) {
        Ok(username) => username,
        Err(e) => {
            host.users.release(client);
            HostMetrics::bump(&host.metrics.login_failures);
            info!(%addr, peer = %peer.fingerprint(), error = %e, "login failed");
            writer.shutdown();
            return;
        }
    };
    HostMetrics::bump(&host.metrics.logins_total);

    host.clients.insert(
        client,
        ClientHandle {
            writer: Mutex::new(writer),
            username: username.clone(),
            addr,
        },
    );
    write(&host.coordinator).join(client, username.as_str());
    info!(%client, %addr, username, "client joined");

    receive_loop(host, client, &mut reader);

    if let Some((_, handle)) = host.clients.remove(&client) {
        lock(&handle.writer).shutdown();
    }
    host.users.release(client);
    if let Err(e) = host.enqueue(Command::from_client(client, Request::Leave)) {
        debug!(%client, error = %e, "leave not queued");
    }
    info!(%client, username, "client left");
}

/// Wait for one registration request and answer it.
fn authenticate(
    host: &Host,
    client: ClientId,
    reader: &mut SecureReader,
    writer: &mut SecureWriter,
) -> Result<String> {
    let deadline = Instant::now() + host.config.limits.handshake_timeout();
    let request = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ProtocolError::LoginTimeout.into());
        }
        let Some(text) = reader.receive_text(remaining)? else {
            continue;
        };
        match Message::from_wire(&text) {
            Ok(Message::Registration(RegistrationMessage::RegCMDUser { sealed })) => {
                break (sealed, true)
            }
            Ok(Message::Registration(RegistrationMessage::LogCMDUser { sealed })) => {
                break (sealed, false)
            }
            Ok(other) => {
                return Err(ProtocolError::ExpectedRegistration(format!("{:?}", other.protocol()))
                    .into())
            }
            Err(e) => debug!(error = %e, "dropping malformed message before login"),
        }
    };

    let (sealed, register) = request;
    let verdict = match decode_credentials(host, &sealed) {
        Ok(credentials) => check_credentials(host, client, &credentials, register),
        Err(e) => {
            warn!(error = %e, "unreadable credentials");
            Verdict::Rejected("invalid credentials".into())
        }
    };

    match verdict {
        Verdict::Accepted { username, fields } => {
            let reply = RegistrationMessage::RegRes {
                accepted: true,
                detail: fields,
            };
            writer.send_text(&Message::Registration(reply).to_wire())?;
            Ok(username)
        }
        Verdict::Rejected(reason) => {
            let reply = RegistrationMessage::RegRes {
                accepted: false,
                detail: reason.clone(),
            };
            writer.send_text(&Message::Registration(reply).to_wire())?;
            Err(ProtocolError::InvalidCredentials(reason).into())
        }
    }
}

fn decode_credentials(host: &Host, sealed: &[u8]) -> Result<Credentials> {
    let plaintext = host.identity.open_chunked(sealed)?;
    Credentials::from_bytes(&plaintext).map_err(|e| HostError::Protocol(e.into()))
}

/// Check credentials while holding the username, so two logins for one
/// account cannot both pass. The caller releases the name on rejection.
fn check_credentials(
    host: &Host,
    client: ClientId,
    credentials: &Credentials,
    register: bool,
) -> Verdict {
    let username = credentials.username.as_str();
    if !host.users.reserve(username, client) {
        return Verdict::Rejected(format!("{username} is already connected"));
    }

    let mut database = lock(&host.database);
    let result = if register {
        database.register(username, &credentials.password, &credentials.fields)
    } else {
        database.login(username, &credentials.password)
    };
    drop(database);

    match result {
        Ok(fields) => Verdict::Accepted {
            username: username.to_string(),
            fields: Value::Object(fields).to_string(),
        },
        Err(e) => {
            info!(username, error = %e, register, "registration rejected");
            Verdict::Rejected(e.to_string())
        }
    }
}

fn receive_loop(host: &Host, client: ClientId, reader: &mut SecureReader) {
    let poll = host.config.limits.receive_timeout();
    while host.is_running() {
        let bytes = match reader.receive(poll) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => continue,
            Err(e) => {
                if host.clients.contains_key(&client) {
                    info!(%client, error = %e, "connection closed");
                }
                return;
            }
        };
        HostMetrics::bump(&host.metrics.messages_received);

        if host.limits.check_message(client).is_err() {
            HostMetrics::bump(&host.metrics.rate_limit_hits);
            warn!(%client, "message rate limit exceeded");
            let penalty = Command::from_client(client, Request::Penalize(Penalty::RateLimited));
            if let Err(e) = host.enqueue(penalty) {
                debug!(%client, error = %e, "penalty not queued");
            }
            continue;
        }

        let Ok(text) = String::from_utf8(bytes) else {
            debug!(%client, "dropping non-text message");
            continue;
        };
        match Message::from_wire(&text) {
            Ok(Message::Files(FilesMessage::ReqFiles)) => host.share_files(client),
            Ok(Message::Files(message)) => {
                let command = message.command();
                if let Err(e) = host.enqueue(Command::from_client(client, Request::Files(message)))
                {
                    warn!(%client, ?command, error = %e, "dropping command");
                }
            }
            Ok(Message::Network(NetworkMessage::Disconnect { reason })) => {
                debug!(%client, reason, "client disconnecting");
                return;
            }
            Ok(Message::Registration(_)) => debug!(%client, "ignoring registration after login"),
            Err(e) => debug!(%client, error = %e, "dropping malformed message"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    // ===========================================
    // Username reservations
    // ===========================================

    #[test]
    fn name_is_held_until_released() {
        let users = ActiveUsers::default();
        let alice = ClientId::new();
        let other = ClientId::new();

        assert!(users.reserve("alice_01", alice));
        assert!(!users.reserve("alice_01", other));
        assert!(users.reserve("bob_02", other));

        users.release(alice);
        assert!(users.reserve("alice_01", ClientId::new()));
        assert_eq!(users.len(), 2);
    }

    #[test]
    fn simultaneous_claims_admit_one() {
        let users = ActiveUsers::default();
        let barrier = Barrier::new(8);
        let winners: usize = thread::scope(|scope| {
            let claims: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        users.reserve("alice_01", ClientId::new())
                    })
                })
                .collect();
            claims
                .into_iter()
                .map(|claim| usize::from(claim.join().unwrap()))
                .sum()
        });
        assert_eq!(winners, 1);
        assert_eq!(users.len(), 1);
    }

    #[test]
    fn releasing_unknown_client_keeps_others() {
        let users = ActiveUsers::default();
        assert!(users.reserve("alice_01", ClientId::new()));
        users.release(ClientId::new());
        assert_eq!(users.len(), 1);
    }
}
