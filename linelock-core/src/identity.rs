//! Username and password rules.

use thiserror::Error;

/// Minimum username length.
pub const MIN_USERNAME_LEN: usize = 3;
/// Maximum username length.
pub const MAX_USERNAME_LEN: usize = 20;
/// Maximum password length.
pub const MAX_PASSWORD_LEN: usize = 128;

/// Reasons a username is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsernameError {
    /// Fewer than three characters.
    #[error("username must be at least 3 characters")]
    TooShort,
    /// More than twenty characters.
    #[error("username must be at most 20 characters")]
    TooLong,
    /// Contains something other than letters, digits, `_` or `.`.
    #[error("username may only contain letters, digits, '_' and '.' (found {0:?})")]
    InvalidChar(char),
    /// Starts with `_` or `.`.
    #[error("username may not start with '_' or '.'")]
    LeadingSymbol,
    /// Ends with `.`.
    #[error("username may not end with '.'")]
    TrailingPeriod,
}

/// Reasons a password is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordError {
    /// Empty password.
    #[error("password must not be empty")]
    Empty,
    /// Longer than the maximum.
    #[error("password must be at most 128 characters")]
    TooLong,
}

/// Check a username against the registration rules.
pub fn validate_username(username: &str) -> Result<(), UsernameError> {
    let len = username.chars().count();
    if len < MIN_USERNAME_LEN {
        return Err(UsernameError::TooShort);
    }
    if len > MAX_USERNAME_LEN {
        return Err(UsernameError::TooLong);
    }
    if let Some(c) = username
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '.'))
    {
        return Err(UsernameError::InvalidChar(c));
    }
    if username.starts_with(['_', '.']) {
        return Err(UsernameError::LeadingSymbol);
    }
    if username.ends_with('.') {
        return Err(UsernameError::TrailingPeriod);
    }
    Ok(())
}

/// Check a password's length.
pub fn validate_password(password: &str) -> Result<(), PasswordError> {
    let len = password.chars().count();
    if len == 0 {
        return Err(PasswordError::Empty);
    }
    if len > MAX_PASSWORD_LEN {
        return Err(PasswordError::TooLong);
    }
    Ok(())
}
