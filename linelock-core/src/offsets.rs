//! Pending offset bookkeeping.
//!
//! When another client's commit changes a file's line count, the host issues
//! an offset to every viewer and records it here. A viewer's line numbers
//! lag the host's until it acknowledges the offset, so every line number it
//! sends is translated through the pending offsets in issue order.

use std::collections::VecDeque;

use linelock_types::{LineNumber, OffsetId};
use thiserror::Error;

use crate::registry::FileId;

/// Errors from acknowledging offsets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OffsetError {
    /// The offset is not pending (unknown, or already accepted).
    #[error("offset {0} is not pending")]
    NotPending(OffsetId),

    /// Offsets must be acknowledged oldest first.
    #[error("offset {got} acknowledged before {expected}")]
    OutOfOrder {
        /// The oldest pending offset.
        expected: OffsetId,
        /// The offset that was acknowledged.
        got: OffsetId,
    },
}

/// A line-count delta the client has not yet applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOffset {
    /// Host-assigned id.
    pub id: OffsetId,
    /// File the change happened in.
    pub file: FileId,
    /// Changed line, in host numbering at the time of the change.
    pub line: LineNumber,
    /// Line-count delta (`new_count - 1`).
    pub delta: isize,
}

/// FIFO of one client's pending offsets.
#[derive(Debug, Clone, Default)]
pub struct OffsetLedger {
    pending: VecDeque<PendingOffset>,
}

impl OffsetLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly issued offset.
    pub fn issue(&mut self, offset: PendingOffset) {
        self.pending.push_back(offset);
    }

    /// Acknowledge the oldest pending offset.
    pub fn accept(&mut self, id: OffsetId) -> Result<PendingOffset, OffsetError> {
        let front = self.pending.front().ok_or(OffsetError::NotPending(id))?;
        if front.id == id {
            return self.pending.pop_front().ok_or(OffsetError::NotPending(id));
        }
        if self.pending.iter().any(|o| o.id == id) {
            Err(OffsetError::OutOfOrder {
                expected: front.id,
                got: id,
            })
        } else {
            Err(OffsetError::NotPending(id))
        }
    }

    /// Translate a client line number into host numbering.
    ///
    /// Returns `None` if the referenced line was deleted by a pending change.
    pub fn translate(&self, file: FileId, line: LineNumber) -> Option<LineNumber> {
        let mut line = line;
        for offset in self.pending.iter().filter(|o| o.file == file) {
            if line > offset.line {
                line = line.shifted(offset.delta)?;
            } else if line == offset.line && offset.delta < 0 {
                return None;
            }
        }
        Some(line)
    }

    /// Rebase pending offsets after the client's own edit at `line`
    /// (client numbering) changed the line count by `delta`.
    pub fn rebase(&mut self, file: FileId, line: LineNumber, delta: isize) {
        if delta == 0 {
            return;
        }
        for offset in self.pending.iter_mut().filter(|o| o.file == file) {
            if offset.line > line {
                if let Some(shifted) = offset.line.shifted(delta) {
                    offset.line = shifted;
                }
            }
        }
    }

    /// Drop every pending offset for one file.
    pub fn clear_file(&mut self, file: FileId) {
        self.pending.retain(|o| o.file != file);
    }

    /// Drop every pending offset.
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Whether an offset is pending.
    pub fn contains(&self, id: OffsetId) -> bool {
        self.pending.iter().any(|o| o.id == id)
    }

    /// Number of pending offsets.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending offsets, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PendingOffset> {
        self.pending.iter()
    }
}
