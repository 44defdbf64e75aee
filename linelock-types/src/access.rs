//! Per-file access levels.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::WireError;

/// Visibility/editability tier of a registered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessLevel {
    /// Host-only. Never leaves the host.
    #[serde(alias = "hidden")]
    Hidden,
    /// Shared and line-editable.
    #[serde(alias = "edit")]
    Edit,
    /// Shared read-only for non-host users.
    #[serde(alias = "limit")]
    Limit,
}

impl AccessLevel {
    /// The transmittable form of this level, `None` for [`AccessLevel::Hidden`].
    pub fn shared(self) -> Option<SharedAccess> {
        match self {
            Self::Hidden => None,
            Self::Edit => Some(SharedAccess::Edit),
            Self::Limit => Some(SharedAccess::Limit),
        }
    }

    /// Whether clients may see the file at all.
    pub fn is_visible(self) -> bool {
        !matches!(self, Self::Hidden)
    }

    /// Whether clients may lock and mutate lines.
    pub fn is_editable(self) -> bool {
        matches!(self, Self::Edit)
    }
}

impl Default for AccessLevel {
    fn default() -> Self {
        Self::Edit
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hidden => f.write_str("Hidden"),
            Self::Edit => f.write_str("Edit"),
            Self::Limit => f.write_str("Limit"),
        }
    }
}

/// The access levels that may appear on the wire.
///
/// Having no `Hidden` variant makes it impossible to transmit a hidden file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SharedAccess {
    /// Line-editable.
    Edit,
    /// Read-only.
    Limit,
}

impl SharedAccess {
    /// Wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Edit => "Edit",
            Self::Limit => "Limit",
        }
    }

    /// Parse the wire representation.
    pub fn parse(s: &str) -> Result<Self, WireError> {
        match s {
            "Edit" => Ok(Self::Edit),
            "Limit" => Ok(Self::Limit),
            other => Err(WireError::InvalidArgument {
                command: "access",
                reason: format!("not a shared access level: {other:?}"),
            }),
        }
    }

    /// Whether clients may lock and mutate lines.
    pub fn is_editable(self) -> bool {
        matches!(self, Self::Edit)
    }
}

impl From<SharedAccess> for AccessLevel {
    fn from(value: SharedAccess) -> Self {
        match value {
            SharedAccess::Edit => Self::Edit,
            SharedAccess::Limit => Self::Limit,
        }
    }
}

impl fmt::Display for SharedAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
