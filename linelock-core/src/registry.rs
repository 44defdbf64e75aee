//! File registry.
//!
//! Files live in a generational arena. A [`FileId`] held by a client session
//! stays safe after the file is unregistered: the slot's generation moves on
//! and stale ids simply stop resolving.

use std::collections::HashMap;

use linelock_types::{AccessLevel, FileEntry};
use thiserror::Error;

use crate::file::VirtualFile;

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A file with this name is already registered.
    #[error("file already registered: {0}")]
    DuplicateName(String),

    /// No file with this name.
    #[error("no such file: {0}")]
    NotFound(String),

    /// Names must be plain file names.
    #[error("invalid file name: {0:?}")]
    InvalidName(String),

    /// The backing store refused the change.
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Handle to a registered file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    index: u32,
    generation: u32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    file: Option<VirtualFile>,
}

/// Name-unique set of [`VirtualFile`]s.
#[derive(Debug, Default)]
pub struct FileRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_name: HashMap<String, FileId>,
}

impl FileRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file under its name.
    pub fn register(&mut self, file: VirtualFile) -> Result<FileId, RegistryError> {
        validate_file_name(file.name())?;
        if self.by_name.contains_key(file.name()) {
            return Err(RegistryError::DuplicateName(file.name().to_string()));
        }
        let name = file.name().to_string();
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.file = Some(file);
                FileId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    file: Some(file),
                });
                FileId {
                    index,
                    generation: 0,
                }
            }
        };
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Remove a file. Its id becomes stale.
    pub fn unregister(&mut self, name: &str) -> Result<VirtualFile, RegistryError> {
        let id = self
            .by_name
            .remove(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let slot = &mut self.slots[id.index as usize];
        let file = slot
            .file
            .take()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Ok(file)
    }

    /// Look up by id.
    pub fn get(&self, id: FileId) -> Option<&VirtualFile> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.file.as_ref())
    }

    /// Look up by id, mutably.
    pub fn get_mut(&mut self, id: FileId) -> Option<&mut VirtualFile> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.file.as_mut())
    }

    /// Find a file id by name.
    pub fn find(&self, name: &str) -> Option<FileId> {
        self.by_name.get(name).copied()
    }

    /// Rename a file, keeping its id.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<FileId, RegistryError> {
        validate_file_name(new)?;
        if self.by_name.contains_key(new) {
            return Err(RegistryError::DuplicateName(new.to_string()));
        }
        let id = self
            .by_name
            .remove(old)
            .ok_or_else(|| RegistryError::NotFound(old.to_string()))?;
        if let Some(file) = self.get_mut(id) {
            file.set_name(new.to_string());
        }
        self.by_name.insert(new.to_string(), id);
        Ok(id)
    }

    /// Change a file's access level, returning the previous one.
    pub fn set_access(
        &mut self,
        name: &str,
        access: AccessLevel,
    ) -> Result<AccessLevel, RegistryError> {
        let id = self
            .find(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let file = self
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let previous = file.access();
        file.set_access(access);
        Ok(previous)
    }

    /// Listing of every non-hidden file, sorted by name.
    pub fn shared(&self) -> Vec<FileEntry> {
        let mut entries: Vec<FileEntry> = self
            .iter()
            .filter_map(|(_, f)| {
                f.access().shared().map(|access| FileEntry {
                    name: f.name().to_string(),
                    access,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Iterate over registered files.
    pub fn iter(&self) -> impl Iterator<Item = (FileId, &VirtualFile)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.file.as_ref().map(|f| {
                (
                    FileId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    f,
                )
            })
        })
    }

    /// Number of registered files.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether no files are registered.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// File names are single path components that do not start with a dot.
pub fn validate_file_name(name: &str) -> Result<(), RegistryError> {
    let bad = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || name.chars().any(char::is_control);
    if bad {
        return Err(RegistryError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use linelock_types::SharedAccess;

    fn registry_with(files: &[(&str, AccessLevel)]) -> FileRegistry {
        let mut registry = FileRegistry::new();
        for (name, access) in files {
            registry.register(VirtualFile::new(*name, *access)).unwrap();
        }
        registry
    }

    #[test]
    fn names_are_unique() {
        let mut registry = registry_with(&[("main.py", AccessLevel::Edit)]);
        assert_eq!(
            registry.register(VirtualFile::new("main.py", AccessLevel::Limit)),
            Err(RegistryError::DuplicateName("main.py".into()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn hidden_files_are_not_shared() {
        let registry = registry_with(&[
            ("secret.env", AccessLevel::Hidden),
            ("main.py", AccessLevel::Edit),
            ("README.md", AccessLevel::Limit),
        ]);
        let shared = registry.shared();
        assert_eq!(shared.len(), 2);
        assert!(shared.iter().all(|f| f.name != "secret.env"));
        assert_eq!(shared[0].name, "README.md");
        assert_eq!(shared[0].access, SharedAccess::Limit);
        assert!(registry.find("secret.env").is_some());
    }

    #[test]
    fn stale_ids_stop_resolving() {
        let mut registry = registry_with(&[("a.txt", AccessLevel::Edit)]);
        let old = registry.find("a.txt").unwrap();
        registry.unregister("a.txt").unwrap();
        let new = registry
            .register(VirtualFile::new("b.txt", AccessLevel::Edit))
            .unwrap();
        assert!(registry.get(old).is_none());
        assert_eq!(registry.get(new).unwrap().name(), "b.txt");
        assert_ne!(old, new);
    }

    #[test]
    fn rename_keeps_id() {
        let mut registry = registry_with(&[
            ("a.txt", AccessLevel::Edit),
            ("c.txt", AccessLevel::Edit),
        ]);
        let id = registry.find("a.txt").unwrap();
        assert_eq!(registry.rename("a.txt", "b.txt").unwrap(), id);
        assert_eq!(registry.get(id).unwrap().name(), "b.txt");
        assert!(registry.find("a.txt").is_none());
        assert_eq!(
            registry.rename("b.txt", "c.txt"),
            Err(RegistryError::DuplicateName("c.txt".into()))
        );
        assert_eq!(
            registry.rename("zzz", "d.txt"),
            Err(RegistryError::NotFound("zzz".into()))
        );
    }

    #[test]
    fn set_access_returns_previous() {
        let mut registry = registry_with(&[("a.txt", AccessLevel::Edit)]);
        assert_eq!(
            registry.set_access("a.txt", AccessLevel::Hidden).unwrap(),
            AccessLevel::Edit
        );
        assert!(registry.shared().is_empty());
    }

    #[test]
    fn file_names_are_single_components() {
        assert!(validate_file_name("main.py").is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name(".env").is_err());
        assert!(validate_file_name("../etc/passwd").is_err());
        assert!(validate_file_name("a\\b").is_err());
    }
}
