//! Host-side virtual file.

use std::collections::BTreeSet;
use std::path::PathBuf;

use linelock_types::{AccessLevel, LineNumber};

use crate::patch::Content;

/// In-memory representation of one project file plus its lock state.
#[derive(Debug, Clone)]
pub struct VirtualFile {
    name: String,
    access: AccessLevel,
    locked: BTreeSet<LineNumber>,
    backing: Option<PathBuf>,
    content: Option<Content>,
}

impl VirtualFile {
    /// Create an unloaded file.
    pub fn new(name: impl Into<String>, access: AccessLevel) -> Self {
        Self {
            name: name.into(),
            access,
            locked: BTreeSet::new(),
            backing: None,
            content: None,
        }
    }

    /// Attach the on-disk path this file mirrors.
    pub fn with_backing(mut self, path: PathBuf) -> Self {
        self.backing = Some(path);
        self
    }

    /// File name including extension.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    /// Current access level.
    pub fn access(&self) -> AccessLevel {
        self.access
    }

    pub(crate) fn set_access(&mut self, access: AccessLevel) {
        self.access = access;
    }

    /// Backing path, if known.
    pub fn backing(&self) -> Option<&PathBuf> {
        self.backing.as_ref()
    }

    /// Cached content, `None` until first loaded.
    pub fn content(&self) -> Option<&Content> {
        self.content.as_ref()
    }

    /// Replace the cached content.
    pub fn set_content(&mut self, content: Content) {
        self.content = Some(content);
    }

    /// Drop the cached content.
    pub fn evict(&mut self) {
        self.content = None;
    }

    /// Lock a line. Returns false if it was already locked.
    pub fn lock_line(&mut self, line: LineNumber) -> bool {
        self.locked.insert(line)
    }

    /// Unlock a line. Returns false if it was not locked.
    pub fn unlock_line(&mut self, line: LineNumber) -> bool {
        self.locked.remove(&line)
    }

    /// Whether a line is locked.
    pub fn is_line_locked(&self, line: LineNumber) -> bool {
        self.locked.contains(&line)
    }

    /// Locked lines in ascending order.
    pub fn locked_lines(&self) -> impl Iterator<Item = LineNumber> + '_ {
        self.locked.iter().copied()
    }

    /// Release every lock.
    pub fn clear_locks(&mut self) {
        self.locked.clear();
    }

    /// Move locks on lines after `line` by `delta`.
    pub fn shift_after(&mut self, line: LineNumber, delta: isize) {
        if delta == 0 {
            return;
        }
        self.locked = self
            .locked
            .iter()
            .filter_map(|l| if *l > line { l.shifted(delta) } else { Some(*l) })
            .collect();
    }
}
