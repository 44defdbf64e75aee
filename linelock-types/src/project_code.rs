//! Shareable project codes.
//!
//! A project code is `BASE64("<ip>:<port>")`. The host displays it and a
//! client decodes it to find the host.

use base64::{engine::general_purpose::STANDARD, Engine};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::WireError;

/// A base64 connection token naming a host address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectCode(String);

impl ProjectCode {
    /// Encode a host address.
    pub fn encode(addr: SocketAddr) -> Self {
        Self(STANDARD.encode(addr.to_string()))
    }

    /// Decode the host address.
    pub fn decode(&self) -> Result<SocketAddr, WireError> {
        let bytes = STANDARD
            .decode(self.0.trim())
            .map_err(|e| WireError::InvalidProjectCode(format!("base64 decode: {e}")))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| WireError::InvalidProjectCode("not UTF-8".into()))?;
        text.parse::<SocketAddr>()
            .map_err(|e| WireError::InvalidProjectCode(format!("{text:?}: {e}")))
    }

    /// The encoded token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ProjectCode {
    type Err = WireError;

    /// Accept a token only if it decodes to an address.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = Self(s.trim().to_string());
        code.decode()?;
        Ok(code)
    }
}

impl fmt::Display for ProjectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
