//! Test harness: a real host on loopback plus real clients.
//!
//! Every host gets a fresh temporary project directory, the low-memory KDF
//! profile and short poll intervals so scenarios run in well under a second.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use linelock_client::{Client, ClientConfig, ClientError, ClientEvent, RegisterType};
use linelock_host::config::KdfProfile;
use linelock_host::{Config, Host, HostHandle};
use linelock_types::{AccessLevel, LineNumber};
use tempfile::TempDir;

/// Password used by every test account.
pub const PASSWORD: &str = "Str0ngPass!";

/// How long to wait for an event or condition before failing.
pub const WAIT: Duration = Duration::from_secs(5);

/// A running host and its project directory.
pub struct TestHost {
    /// Running host, dropped first.
    pub handle: HostHandle,
    /// Project directory.
    pub dir: TempDir,
}

impl TestHost {
    /// Project directory path.
    pub fn project(&self) -> &Path {
        self.dir.path()
    }

    /// Contents of a project file.
    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.project().join(name)).unwrap()
    }

    /// Path of a file's change log.
    pub fn changes_path(&self, name: &str) -> PathBuf {
        self.project().join(".changes").join(format!("{name}_changes.txt"))
    }

    /// Parsed change log of a file, empty if not written yet.
    pub fn changes(&self, name: &str) -> serde_json::Map<String, serde_json::Value> {
        match fs::read_to_string(self.changes_path(name)) {
            Ok(text) => serde_json::from_str(&text).unwrap(),
            Err(_) => serde_json::Map::new(),
        }
    }

    /// Client configuration pointing at this host.
    pub fn config(&self, username: &str, password: &str, kind: RegisterType) -> ClientConfig {
        ClientConfig::new(self.handle.local_addr(), username, password, kind)
            .with_receive_timeout(Duration::from_millis(50))
    }

    /// Register a fresh account and wait for the initial file list.
    pub fn join(&self, username: &str) -> (Client, Receiver<ClientEvent>) {
        let (client, events) = Client::connect(self.config(username, PASSWORD, RegisterType::Register))
            .unwrap_or_else(|e| panic!("{username} could not join: {e}"));
        expect_event(&events, |e| matches!(e, ClientEvent::Connected { .. }));
        expect_event(&events, |e| matches!(e, ClientEvent::FilesListed { .. }));
        (client, events)
    }

    /// Try to log in with an existing account.
    pub fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(Client, Receiver<ClientEvent>), ClientError> {
        Client::connect(self.config(username, password, RegisterType::Login))
    }
}

/// Builder for a test host.
pub struct HostBuilder {
    files: Vec<(String, String)>,
    access: Vec<(String, AccessLevel)>,
    max_clients: usize,
    messages_per_minute: u32,
}

impl HostBuilder {
    /// A host with no files.
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            access: Vec::new(),
            max_clients: 16,
            messages_per_minute: 100_000,
        }
    }

    /// Add a project file.
    pub fn file(mut self, name: &str, text: &str) -> Self {
        self.files.push((name.to_string(), text.to_string()));
        self
    }

    /// Set a file's access level.
    pub fn access(mut self, name: &str, access: AccessLevel) -> Self {
        self.access.push((name.to_string(), access));
        self
    }

    /// Limit concurrent sessions.
    pub fn max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    /// Limit messages per client per minute.
    pub fn messages_per_minute(mut self, limit: u32) -> Self {
        self.messages_per_minute = limit;
        self
    }

    /// Write the project and start the host.
    pub fn start(self) -> TestHost {
        let dir = tempfile::tempdir().unwrap();
        for (name, text) in &self.files {
            fs::write(dir.path().join(name), text).unwrap();
        }

        let mut config = Config::default();
        config.server.bind_address = "127.0.0.1:0".into();
        config.server.project_dir = dir.path().to_path_buf();
        config.server.max_clients = self.max_clients;
        config.database.secret = Some("test-db-secret".into());
        config.database.kdf_profile = KdfProfile::Low;
        config.limits.receive_timeout_ms = 50;
        config.limits.poll_interval_ms = 10;
        config.limits.connections_per_minute = 10_000;
        config.limits.messages_per_minute = self.messages_per_minute;
        config.limits.limiter_sweep_ms = 20;
        for (name, access) in self.access {
            config.files.access.insert(name, access);
        }

        let handle = Host::start(config).unwrap();
        TestHost { handle, dir }
    }
}

/// Wait for the first event matching `pred`, skipping others.
pub fn expect_event(
    events: &Receiver<ClientEvent>,
    pred: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) if pred(&event) => return event,
            Ok(event) => seen.push(event),
            Err(_) => panic!("expected event not received; saw {seen:?}"),
        }
    }
}

/// Poll `cond` until it holds.
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Open a file and wait for its content.
pub fn open(client: &Client, events: &Receiver<ClientEvent>, name: &str) -> Vec<String> {
    client.request_file(name).unwrap();
    match expect_event(events, |e| matches!(e, ClientEvent::FileSet { name: n, .. } if n == name)) {
        ClientEvent::FileSet { lines, .. } => lines,
        _ => unreachable!(),
    }
}

/// Wait for the verdict on a lock request: `true` if granted.
pub fn lock_verdict(events: &Receiver<ClientEvent>) -> bool {
    matches!(
        expect_event(events, |e| matches!(
            e,
            ClientEvent::LineGranted { .. } | ClientEvent::LineDenied { .. }
        )),
        ClientEvent::LineGranted { .. }
    )
}

/// A 1-based line number.
pub fn line(n: usize) -> LineNumber {
    LineNumber::from_wire(n).unwrap()
}

/// `count` numbered lines, newline terminated.
pub fn numbered(count: usize) -> String {
    (1..=count).map(|n| format!("line {n}\n")).collect()
}
