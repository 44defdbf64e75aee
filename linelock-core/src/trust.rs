//! Per-client trust factor.

/// Default trust for a fresh session.
pub const DEFAULT_TRUST: u8 = 50;

/// Upper bound of the trust scale.
pub const MAX_TRUST: u8 = 100;

/// Misbehaviors that lower trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Penalty {
    /// Asked for a file that does not exist or is hidden.
    UnknownFile,
    /// Acknowledged an offset that was not the oldest pending one.
    BadOffsetAck,
    /// Tried to commit or delete a line without holding its lock.
    CommitWithoutLock,
    /// Sent a structurally invalid edit.
    MalformedEdit,
    /// Exceeded the message rate limit.
    RateLimited,
}

impl Penalty {
    /// Trust points this penalty costs.
    pub fn cost(self) -> u8 {
        match self {
            Self::UnknownFile => 10,
            Self::BadOffsetAck => 10,
            Self::CommitWithoutLock => 15,
            Self::MalformedEdit => 5,
            Self::RateLimited => 5,
        }
    }
}

/// Trust score clamped to `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TrustFactor(u8);

impl TrustFactor {
    /// Create with an initial value, clamped to the scale.
    pub fn new(value: u8) -> Self {
        Self(value.min(MAX_TRUST))
    }

    /// Current value.
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Apply a penalty. Returns the new value.
    pub fn penalize(&mut self, penalty: Penalty) -> u8 {
        self.0 = self.0.saturating_sub(penalty.cost());
        self.0
    }

    /// Raise trust, saturating at the maximum.
    pub fn reward(&mut self, points: u8) -> u8 {
        self.0 = self.0.saturating_add(points).min(MAX_TRUST);
        self.0
    }

    /// Whether trust has run out.
    pub fn is_exhausted(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TrustFactor {
    fn default() -> Self {
        Self(DEFAULT_TRUST)
    }
}
