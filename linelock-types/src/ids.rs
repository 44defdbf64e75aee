//! Identity and ordering types for linelock.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::WireError;

/// Host-assigned identifier of one connected client session.
///
/// UUID v4. The nil UUID is reserved for requests the host issues itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(uuid::Uuid);

impl ClientId {
    /// Create a new random ClientId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// The id used for host-originated requests.
    pub fn host() -> Self {
        Self(uuid::Uuid::nil())
    }

    /// Whether this id denotes the host itself.
    pub fn is_host(&self) -> bool {
        self.0.is_nil()
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = self.0.to_string();
        write!(f, "ClientId({})", &full[..8])
    }
}

/// Identifier of a registration record in the host's user database.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(uuid::Uuid);

impl UserId {
    /// Create a new random UserId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

/// A host-assigned, monotonically increasing offset identifier.
///
/// Ids start at 1 and are never reused within a host run.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OffsetId(u64);

impl OffsetId {
    /// Create an OffsetId with the given value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the numeric value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The id following this one.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl FromStr for OffsetId {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .ok()
            .filter(|v| *v > 0)
            .map(Self)
            .ok_or_else(|| WireError::InvalidArgument {
                command: "offset",
                reason: format!("not a valid offset id: {s:?}"),
            })
    }
}

impl fmt::Display for OffsetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for OffsetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OffsetId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_unique() {
        let a = ClientId::new();
        let b = ClientId::new();
        assert_ne!(a, b);
        assert!(!a.is_host());
    }

    #[test]
    fn host_id_is_nil() {
        assert!(ClientId::host().is_host());
        assert_eq!(ClientId::host(), ClientId::host());
    }

    #[test]
    fn client_id_debug_is_short() {
        let id = ClientId::new();
        let debug = format!("{:?}", id);
        assert!(debug.starts_with("ClientId("));
        assert_eq!(debug.len(), "ClientId(".len() + 8 + 1);
    }

    #[test]
    fn user_id_parses_display() {
        let id = UserId::new();
        let parsed: UserId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<UserId>().is_err());
    }

    #[test]
    fn offset_id_rejects_zero() {
        assert!("0".parse::<OffsetId>().is_err());
        assert!("abc".parse::<OffsetId>().is_err());
        assert_eq!("7".parse::<OffsetId>().unwrap(), OffsetId::new(7));
        assert_eq!(OffsetId::new(7).next(), OffsetId::new(8));
    }
}
