//! Error types for linelock-host.

use std::path::PathBuf;

/// Main error type for linelock-host operations.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Registration database error.
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// Session protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Secure channel error.
    #[error("channel error: {0}")]
    Channel(#[from] linelock_channel::ChannelError),

    /// Cryptographic error.
    #[error("crypto error: {0}")]
    Crypto(#[from] linelock_channel::CryptoError),

    /// File registry rejected a host request.
    #[error("registry error: {0}")]
    Registry(#[from] linelock_core::RegistryError),

    /// Content store failure.
    #[error("store error: {0}")]
    Store(#[from] linelock_core::StoreError),

    /// The command pool is full.
    #[error("command pool error: {0}")]
    Pool(#[from] linelock_core::PoolError),

    /// The host has been shut down.
    #[error("host is not running")]
    NotRunning,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Registration database errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Username already registered under this host.
    #[error("username already taken: {0}")]
    UsernameTaken(String),

    /// Username failed format validation.
    #[error("invalid username: {0}")]
    InvalidUsername(#[from] linelock_core::UsernameError),

    /// Password failed validation.
    #[error("invalid password: {0}")]
    InvalidPassword(#[from] linelock_core::PasswordError),

    /// No such user.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Password did not match the stored hash.
    #[error("wrong password")]
    WrongPassword,

    /// Extra fields are not a JSON object.
    #[error("invalid fields: {0}")]
    InvalidFields(String),

    /// No secret configured for record encryption.
    #[error("no database secret configured (set database.secret or LINELOCK_DB_SECRET)")]
    MissingSecret,

    /// A database file could not be parsed or decrypted.
    #[error("corrupt database file {path}: {reason}")]
    Corrupt {
        /// Offending file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// Record key derivation or encryption failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] linelock_channel::CryptoError),

    /// Password hashing failed.
    #[error("password hashing failed: {0}")]
    Hash(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The peer sent something other than a registration request first.
    #[error("expected a registration request, got {0}")]
    ExpectedRegistration(String),

    /// The sealed credentials could not be opened or decoded.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The peer did not log in in time.
    #[error("login timed out")]
    LoginTimeout,

    /// Message could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(#[from] linelock_types::WireError),
}

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, HostError>;

/// Result type for database operations.
pub type DatabaseResult<T> = std::result::Result<T, DatabaseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_errors_convert_into_host_errors() {
        let err: HostError = DatabaseError::UsernameTaken("alice_01".into()).into();
        assert!(err.to_string().contains("alice_01"));
        assert!(matches!(err, HostError::Database(_)));
    }

    #[test]
    fn validation_errors_keep_their_reason() {
        let err: DatabaseError = linelock_core::validate_username("_alice").unwrap_err().into();
        assert!(err.to_string().starts_with("invalid username"));
    }
}
