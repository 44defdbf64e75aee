//! Rate limiting for linelock-host.
//!
//! Connection attempts are limited per remote IP, application messages per
//! connected client. A client over its message budget is not cut off
//! directly; each rejected message costs trust instead, so a flood ends in
//! a trust-zero disconnect.
//!
//! Both limiters are governor keyed rate limiters backed by DashMap.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use linelock_types::ClientId;

use crate::config::LimitsConfig;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Rate limiters for the host.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits connection attempts per remote IP.
    connection_limiter: Arc<KeyedLimiter<IpAddr>>,

    /// Limits messages per connected client.
    message_limiter: Arc<KeyedLimiter<ClientId>>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("connection_limiter", &"KeyedLimiter<IpAddr>")
            .field("message_limiter", &"KeyedLimiter<ClientId>")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// A configured value of zero is treated as one.
    pub fn new(config: &LimitsConfig) -> Self {
        let connections = NonZeroU32::new(config.connections_per_minute).unwrap_or(NonZeroU32::MIN);
        let messages = NonZeroU32::new(config.messages_per_minute).unwrap_or(NonZeroU32::MIN);

        Self {
            connection_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(connections))),
            message_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(messages))),
        }
    }

    /// Check if a connection attempt from `ip` is allowed.
    pub fn check_connection(&self, ip: IpAddr) -> Result<(), RateLimitError> {
        self.connection_limiter
            .check_key(&ip)
            .map_err(|_| RateLimitError::ConnectionLimitExceeded)
    }

    /// Check if `client` may send another message.
    pub fn check_message(&self, client: ClientId) -> Result<(), RateLimitError> {
        self.message_limiter
            .check_key(&client)
            .map_err(|_| RateLimitError::MessageLimitExceeded)
    }

    /// Get the number of tracked message keys (for metrics).
    pub fn message_keys_count(&self) -> usize {
        self.message_limiter.len()
    }

    /// Evict entries whose budgets have fully recharged.
    pub fn shrink(&self) {
        self.connection_limiter.retain_recent();
        self.message_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// Too many connection attempts from this address.
    ConnectionLimitExceeded,
    /// Too many messages from this client.
    MessageLimitExceeded,
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionLimitExceeded => write!(f, "connection rate limit exceeded"),
            Self::MessageLimitExceeded => write!(f, "message rate limit exceeded"),
        }
    }
}

impl std::error::Error for RateLimitError {}
