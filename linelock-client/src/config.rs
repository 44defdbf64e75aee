//! Client configuration.

use std::net::SocketAddr;
use std::time::Duration;

use linelock_channel::HandshakeOptions;
use linelock_types::{ProjectCode, WireError};
use serde_json::{Map, Value};

/// Where the host is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostTarget {
    /// A socket address.
    Address(SocketAddr),
    /// A shareable project code.
    Code(ProjectCode),
}

impl HostTarget {
    /// Resolve to a socket address.
    pub fn resolve(&self) -> Result<SocketAddr, WireError> {
        match self {
            Self::Address(addr) => Ok(*addr),
            Self::Code(code) => code.decode(),
        }
    }
}

impl From<SocketAddr> for HostTarget {
    fn from(addr: SocketAddr) -> Self {
        Self::Address(addr)
    }
}

impl From<ProjectCode> for HostTarget {
    fn from(code: ProjectCode) -> Self {
        Self::Code(code)
    }
}

/// Whether to create an account or log into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterType {
    /// Create a new account.
    Register,
    /// Log into an existing account.
    Login,
}

/// Configuration for [`Client`](crate::Client).
#[derive(Clone)]
pub struct ClientConfig {
    /// Host to connect to.
    pub target: HostTarget,
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
    /// Register or log in.
    pub register_type: RegisterType,
    /// Extra account fields sent on registration.
    pub fields: Map<String, Value>,
    /// Poll interval of the receive thread.
    pub receive_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// How long to wait for the registration verdict.
    pub auth_timeout: Duration,
    /// Handshake settings.
    pub handshake: HandshakeOptions,
}

impl ClientConfig {
    /// Create a configuration with default timeouts and no extra fields.
    pub fn new(
        target: impl Into<HostTarget>,
        username: &str,
        password: &str,
        register_type: RegisterType,
    ) -> Self {
        Self {
            target: target.into(),
            username: username.to_string(),
            password: password.to_string(),
            register_type,
            fields: Map::new(),
            receive_timeout: Duration::from_millis(200),
            connect_timeout: Duration::from_secs(5),
            auth_timeout: Duration::from_secs(10),
            handshake: HandshakeOptions::default(),
        }
    }

    /// Create a configuration from a project code string.
    pub fn from_code(
        code: &str,
        username: &str,
        password: &str,
        register_type: RegisterType,
    ) -> Result<Self, WireError> {
        let code: ProjectCode = code.parse()?;
        Ok(Self::new(code, username, password, register_type))
    }

    /// Set the extra account fields.
    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields = fields;
        self
    }

    /// Add one extra account field.
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Set the receive poll interval.
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Only accept a host presenting this Ed25519 key.
    pub fn with_expected_host(mut self, key: [u8; 32]) -> Self {
        self.handshake.expected_host = Some(key);
        self
    }
}

// Don't leak the password in debug output
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("target", &self.target)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("register_type", &self.register_type)
            .field("fields", &self.fields)
            .field("receive_timeout", &self.receive_timeout)
            .finish()
    }
}
