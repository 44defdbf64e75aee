//! Host server: shared state, accept thread and the public handle.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dashmap::DashMap;
use linelock_channel::{refuse, Identity, SecureWriter};
use linelock_core::coordinator::disconnect_notice;
use linelock_core::{Action, Command, CommandPool, Coordinator, Request, VirtualFile};
use linelock_types::{AccessLevel, ClientId, FilesMessage, Message, ProjectCode};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::database::UserDatabase;
use crate::disk::DiskStore;
use crate::error::{DatabaseError, HostError, Result};
use crate::limits::RateLimits;
use crate::session::ActiveUsers;
use crate::{session, worker};

/// Sleep between polls of the non-blocking listener.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Reason sent to clients when the host stops.
const SHUTDOWN_REASON: &str = "host shutting down";

/// Reason logged when a client cannot be written to.
const SEND_FAILED_REASON: &str = "send failed";

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Operational counters.
#[derive(Debug, Default)]
pub struct HostMetrics {
    /// Connections accepted for a handshake.
    pub connections_total: AtomicU64,
    /// Connections turned away (full or rate limited).
    pub connections_refused: AtomicU64,
    /// Handshakes that failed.
    pub handshake_failures: AtomicU64,
    /// Successful registrations and logins.
    pub logins_total: AtomicU64,
    /// Rejected registrations and logins.
    pub login_failures: AtomicU64,
    /// Application messages received.
    pub messages_received: AtomicU64,
    /// Application messages sent.
    pub messages_sent: AtomicU64,
    /// Commands executed by the worker.
    pub commands_total: AtomicU64,
    /// Messages over the per-client rate limit.
    pub rate_limit_hits: AtomicU64,
}

impl HostMetrics {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A logged-in client connection.
pub(crate) struct ClientHandle {
    pub(crate) writer: Mutex<SecureWriter>,
    pub(crate) username: String,
    pub(crate) addr: SocketAddr,
}

impl ClientHandle {
    fn close(&self, reason: &str) {
        let mut writer = lock(&self.writer);
        if let Err(e) = writer.send_text(&disconnect_notice(reason).to_wire()) {
            debug!(username = %self.username, error = %e, "disconnect notice not delivered");
        }
        writer.shutdown();
    }
}

/// State shared by the accept thread, session threads and the worker.
pub struct Host {
    pub(crate) config: Config,
    pub(crate) identity: Identity,
    pub(crate) coordinator: RwLock<Coordinator<DiskStore>>,
    pub(crate) clients: DashMap<ClientId, ClientHandle>,
    pub(crate) users: ActiveUsers,
    pub(crate) pool: Mutex<CommandPool<Command>>,
    pub(crate) database: Mutex<UserDatabase>,
    pub(crate) limits: RateLimits,
    pub(crate) metrics: HostMetrics,
    running: AtomicBool,
    sessions: AtomicUsize,
    last_error: Mutex<Option<String>>,
    local_addr: SocketAddr,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("local_addr", &self.local_addr)
            .field("identity", &self.identity)
            .field("clients", &self.clients.len())
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Start a host: scan the project, bind, and spawn the accept and
    /// worker threads.
    ///
    /// # Errors
    ///
    /// Fails if the project directory or database cannot be opened, or the
    /// bind address is unavailable.
    pub fn start(config: Config) -> Result<HostHandle> {
        let store = DiskStore::open(&config.server.project_dir)?;
        let secret = config
            .database_secret()
            .ok_or(DatabaseError::MissingSecret)?;
        let database = UserDatabase::open(
            config.database_dir(),
            config.server.host_username.clone(),
            secret,
            config.kdf_params(),
        )?;

        let names = store.scan()?;
        let mut coordinator =
            Coordinator::new(store.clone()).with_initial_trust(config.limits.initial_trust);
        for name in &names {
            let file = VirtualFile::new(name.as_str(), config.access_for(name))
                .with_backing(store.file_path(name));
            coordinator.adopt_file(file)?;
        }

        let listener = TcpListener::bind(&config.server.bind_address)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let identity = Identity::generate()?;
        info!(
            addr = %local_addr,
            files = names.len(),
            identity = %identity.fingerprint(),
            "host listening"
        );

        let host = Arc::new(Self {
            limits: RateLimits::new(&config.limits),
            pool: Mutex::new(CommandPool::new(config.limits.pool_capacity)),
            config,
            identity,
            coordinator: RwLock::new(coordinator),
            clients: DashMap::new(),
            users: ActiveUsers::default(),
            database: Mutex::new(database),
            metrics: HostMetrics::default(),
            running: AtomicBool::new(true),
            sessions: AtomicUsize::new(0),
            last_error: Mutex::new(None),
            local_addr,
        });

        let accept = {
            let host = Arc::clone(&host);
            thread::Builder::new()
                .name("linelock-accept".into())
                .spawn(move || accept_loop(&host, listener))?
        };
        let worker = {
            let host = Arc::clone(&host);
            thread::Builder::new()
                .name("linelock-worker".into())
                .spawn(move || worker::run(&host))?
        };

        Ok(HostHandle {
            host,
            threads: vec![accept, worker],
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn record_error(&self, error: impl Into<String>) {
        *lock(&self.last_error) = Some(error.into());
    }

    /// Queue a command for the worker.
    pub(crate) fn enqueue(&self, command: Command) -> Result<()> {
        if !self.is_running() {
            return Err(HostError::NotRunning);
        }
        lock(&self.pool)
            .push(command)
            .map_err(|(e, _)| HostError::Pool(e))
    }

    /// Carry out coordinator actions.
    pub(crate) fn apply(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send { to, message } => self.send_to(to, &message),
                Action::Disconnect { client, reason } => self.drop_client(client, &reason),
            }
        }
    }

    pub(crate) fn send_to(&self, to: ClientId, message: &Message) {
        let result = match self.clients.get(&to) {
            Some(handle) => lock(&handle.writer).send_text(&message.to_wire()),
            None => {
                debug!(client = %to, "dropping message for departed client");
                return;
            }
        };
        match result {
            Ok(()) => HostMetrics::bump(&self.metrics.messages_sent),
            Err(e) => {
                warn!(client = %to, error = %e, "send failed");
                self.record_error(format!("send to {to}: {e}"));
                // no disconnect notice: the writer just failed
                if let Some((_, handle)) = self.clients.remove(&to) {
                    info!(
                        username = %handle.username,
                        addr = %handle.addr,
                        reason = SEND_FAILED_REASON,
                        "disconnecting client"
                    );
                    lock(&handle.writer).shutdown();
                }
            }
        }
    }

    /// Answer a file list request directly from the receive thread.
    pub(crate) fn share_files(&self, client: ClientId) {
        let files = write(&self.coordinator).share_files(client);
        self.send_to(client, &Message::Files(FilesMessage::ResFiles { files }));
    }

    /// Remove a client's handle and close its connection.
    pub(crate) fn drop_client(&self, client: ClientId, reason: &str) {
        if let Some((_, handle)) = self.clients.remove(&client) {
            info!(username = %handle.username, addr = %handle.addr, reason, "disconnecting client");
            handle.close(reason);
        }
    }

    fn admit(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = self.limits.check_connection(addr.ip()) {
            warn!(%addr, error = %e, "refusing connection");
            self.turn_away(stream);
            return;
        }
        let active = self.sessions.fetch_add(1, Ordering::SeqCst);
        if active >= self.config.server.max_clients {
            self.sessions.fetch_sub(1, Ordering::SeqCst);
            info!(%addr, active, "host full, refusing connection");
            self.turn_away(stream);
            return;
        }
        HostMetrics::bump(&self.metrics.connections_total);

        let slot = SessionSlot(Arc::clone(self));
        let spawned = thread::Builder::new()
            .name(format!("linelock-session-{addr}"))
            .spawn(move || {
                let host = &slot.0;
                session::run(host, stream, addr);
            });
        if let Err(e) = spawned {
            warn!(%addr, error = %e, "could not spawn session thread");
            self.record_error(format!("spawn session: {e}"));
        }
    }

    fn turn_away(&self, stream: TcpStream) {
        HostMetrics::bump(&self.metrics.connections_refused);
        if let Err(e) = refuse(stream) {
            debug!(error = %e, "refusal not delivered");
        }
    }

    fn advertised_addr(&self) -> SocketAddr {
        if let Some(text) = self.config.server.advertise_address.as_deref() {
            if let Ok(addr) = text.parse::<SocketAddr>() {
                return addr;
            }
            if let Ok(ip) = text.parse::<IpAddr>() {
                return SocketAddr::new(ip, self.local_addr.port());
            }
            warn!(advertise_address = text, "ignoring unparsable advertise address");
        }
        if !self.local_addr.ip().is_unspecified() {
            return self.local_addr;
        }
        let ip = outbound_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        SocketAddr::new(ip, self.local_addr.port())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let ids: Vec<ClientId> = self.clients.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.drop_client(id, SHUTDOWN_REASON);
        }
        lock(&self.pool).clear();
    }
}

/// Frees a session slot when the session thread ends.
struct SessionSlot(Arc<Host>);

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0.sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Address of the interface used for outbound traffic. No packet is sent.
fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

fn accept_loop(host: &Arc<Host>, listener: TcpListener) {
    while host.is_running() {
        match listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!(%addr, error = %e, "dropping connection");
                    continue;
                }
                debug!(%addr, "connection accepted");
                host.admit(stream, addr);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!(error = %e, "accept failed");
                host.record_error(format!("accept: {e}"));
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    debug!("accept loop stopped");
}

/// Owner's handle to a running host.
///
/// Host-side file operations go through the command queue, so they are
/// ordered with client edits and take effect once the worker reaches them.
#[derive(Debug)]
pub struct HostHandle {
    host: Arc<Host>,
    threads: Vec<JoinHandle<()>>,
}

impl HostHandle {
    /// Bound listening address.
    pub fn local_addr(&self) -> SocketAddr {
        self.host.local_addr
    }

    /// Shareable connection token for clients.
    pub fn project_code(&self) -> ProjectCode {
        ProjectCode::encode(self.host.advertised_addr())
    }

    /// The host's long-term identity.
    pub fn identity(&self) -> &Identity {
        &self.host.identity
    }

    /// Register a new (possibly empty) file.
    pub fn register_file(&self, name: &str, access: AccessLevel) -> Result<()> {
        self.host.enqueue(Command::from_host(Request::RegisterFile {
            name: name.to_string(),
            access,
        }))
    }

    /// Change a file's access level.
    pub fn set_access(&self, name: &str, access: AccessLevel) -> Result<()> {
        self.host.enqueue(Command::from_host(Request::SetAccess {
            name: name.to_string(),
            access,
        }))
    }

    /// Rename a file.
    pub fn rename_file(&self, old: &str, new: &str) -> Result<()> {
        self.host.enqueue(Command::from_host(Request::RenameFile {
            old: old.to_string(),
            new: new.to_string(),
        }))
    }

    /// Stop sharing a file.
    pub fn remove_file(&self, name: &str) -> Result<()> {
        self.host.enqueue(Command::from_host(Request::RemoveFile {
            name: name.to_string(),
        }))
    }

    /// Number of logged-in clients.
    pub fn client_count(&self) -> usize {
        self.host.clients.len()
    }

    /// Usernames of logged-in clients, sorted.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .host
            .clients
            .iter()
            .map(|entry| entry.value().username.clone())
            .collect();
        names.sort();
        names
    }

    /// Clients currently tracked by the message rate limiter.
    pub fn rate_limited_clients(&self) -> usize {
        self.host.limits.message_keys_count()
    }

    /// Most recent failure recorded by the host.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.host.last_error).clone()
    }

    /// Operational counters.
    pub fn metrics(&self) -> &HostMetrics {
        &self.host.metrics
    }

    /// Whether `username` is registered in the host's database.
    pub fn user_exists(&self, username: &str) -> bool {
        lock(&self.host.database).exists(username)
    }

    /// Inspect the coordinator under its read lock.
    pub fn with_coordinator<R>(&self, f: impl FnOnce(&Coordinator<DiskStore>) -> R) -> R {
        f(&read(&self.host.coordinator))
    }

    /// Whether the host is accepting connections.
    pub fn is_running(&self) -> bool {
        self.host.is_running()
    }

    /// Disconnect every client and stop the background threads.
    pub fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        info!(addr = %self.host.local_addr, "host shutting down");
        self.host.stop();
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                warn!("host thread panicked");
            }
        }
    }
}

impl Drop for HostHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
