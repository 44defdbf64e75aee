//! Content persistence seam.
//!
//! The coordinator reads and writes file text and change-log entries only
//! through [`ContentStore`]. The host implements it over the project
//! directory; [`MemoryStore`] backs the unit tests.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::changelog::{ChangeEntry, ChangeLog};

/// Errors from a content store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No such file.
    #[error("file not found: {0}")]
    NotFound(String),

    /// Target name is taken.
    #[error("file already exists: {0}")]
    AlreadyExists(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Stored data could not be parsed.
    #[error("corrupt data: {0}")]
    Corrupt(String),
}

/// Backing storage for file content and change logs.
pub trait ContentStore {
    /// Read a file's text.
    fn load(&mut self, name: &str) -> Result<String, StoreError>;

    /// Overwrite a file's text.
    fn save(&mut self, name: &str, text: &str) -> Result<(), StoreError>;

    /// Append one entry to a file's change log.
    fn append_change(&mut self, name: &str, entry: &ChangeEntry) -> Result<(), StoreError>;

    /// Rename a file and its change log.
    fn rename(&mut self, old: &str, new: &str) -> Result<(), StoreError>;

    /// Create an empty file if it does not exist yet.
    fn create(&mut self, name: &str) -> Result<(), StoreError>;
}

/// In-memory [`ContentStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: HashMap<String, String>,
    changes: HashMap<String, ChangeLog>,
    fail_writes: bool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file.
    pub fn with_file(mut self, name: &str, text: &str) -> Self {
        self.files.insert(name.to_string(), text.to_string());
        self
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Current text of a file.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    /// Change log of a file.
    pub fn changes(&self, name: &str) -> Option<&ChangeLog> {
        self.changes.get(name)
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Io("store is read-only".into()));
        }
        Ok(())
    }
}

impl ContentStore for MemoryStore {
    fn load(&mut self, name: &str) -> Result<String, StoreError> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn save(&mut self, name: &str, text: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.files.insert(name.to_string(), text.to_string());
        Ok(())
    }

    fn append_change(&mut self, name: &str, entry: &ChangeEntry) -> Result<(), StoreError> {
        self.check_writable()?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        self.changes
            .entry(name.to_string())
            .or_default()
            .append(now, entry.clone());
        Ok(())
    }

    fn rename(&mut self, old: &str, new: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        if self.files.contains_key(new) {
            return Err(StoreError::AlreadyExists(new.to_string()));
        }
        let text = self
            .files
            .remove(old)
            .ok_or_else(|| StoreError::NotFound(old.to_string()))?;
        self.files.insert(new.to_string(), text);
        if let Some(log) = self.changes.remove(old) {
            self.changes.insert(new.to_string(), log);
        }
        Ok(())
    }

    fn create(&mut self, name: &str) -> Result<(), StoreError> {
        if self.files.contains_key(name) {
            return Ok(());
        }
        self.check_writable()?;
        self.files.insert(name.to_string(), String::new());
        Ok(())
    }
}
