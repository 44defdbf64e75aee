//! Per-file change log.
//!
//! Each committed edit is recorded under a timestamp key of the form
//! `"<secs>.<nanos>"`, zero padded so that the lexical order of keys in the
//! JSON object is chronological. Entries are never rewritten.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One committed edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// 1-based line the edit applied to.
    pub line: usize,
    /// Text of the line that was replaced or deleted.
    pub removed: String,
    /// Replacement lines, empty for a deletion.
    pub added: Vec<String>,
}

/// Timestamp-keyed, append-only edit history of one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeLog {
    entries: BTreeMap<String, ChangeEntry>,
}

impl ChangeLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a log file. Empty text is an empty log.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        if text.trim().is_empty() {
            return Ok(Self::new());
        }
        serde_json::from_str(text)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Record an entry at `at` (time since the Unix epoch).
    ///
    /// If the key is taken the timestamp is bumped by one nanosecond until a
    /// free key is found. Returns the key used.
    pub fn append(&mut self, at: Duration, entry: ChangeEntry) -> String {
        let mut at = at;
        let mut key = timestamp_key(at);
        while self.entries.contains_key(&key) {
            at += Duration::from_nanos(1);
            key = timestamp_key(at);
        }
        self.entries.insert(key.clone(), entry);
        key
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in chronological order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ChangeEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Format a timestamp key.
pub fn timestamp_key(at: Duration) -> String {
    format!("{:012}.{:09}", at.as_secs(), at.subsec_nanos())
}
