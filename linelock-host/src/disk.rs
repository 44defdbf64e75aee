//! Project-directory [`ContentStore`].
//!
//! Shared files are the top-level regular files of the project directory.
//! Each file's change log lives at `.changes/<name>_changes.txt`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use linelock_core::registry::validate_file_name;
use linelock_core::{ChangeEntry, ChangeLog, ContentStore, StoreError};
use tracing::{debug, warn};

use crate::database::write_atomic;

/// Directory holding change logs, relative to the project root.
pub const CHANGES_DIR: &str = ".changes";

/// Suffix of a change-log file name.
pub const CHANGES_SUFFIX: &str = "_changes.txt";

/// Content store over a project directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Use `root` as the project directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_error(&root.display().to_string(), e))?;
        Ok(Self { root })
    }

    /// Project directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a shared file.
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Path of a file's change log.
    pub fn changes_path(&self, name: &str) -> PathBuf {
        self.root
            .join(CHANGES_DIR)
            .join(format!("{name}{CHANGES_SUFFIX}"))
    }

    /// Read a file's change log. A missing log is empty.
    pub fn change_log(&self, name: &str) -> Result<ChangeLog, StoreError> {
        let path = self.changes_path(name);
        match fs::read_to_string(&path) {
            Ok(text) => ChangeLog::from_json(&text)
                .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ChangeLog::new()),
            Err(e) => Err(io_error(name, e)),
        }
    }

    /// Names of the shareable files in the project directory, sorted.
    ///
    /// Hidden entries, directories and names the registry would reject are
    /// skipped.
    pub fn scan(&self) -> Result<Vec<String>, StoreError> {
        let entries =
            fs::read_dir(&self.root).map_err(|e| io_error(&self.root.display().to_string(), e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.root.display().to_string(), e))?;
            let Ok(name) = entry.file_name().into_string() else {
                debug!(path = %entry.path().display(), "skipping non UTF-8 file name");
                continue;
            };
            if name.starts_with('.') || name.ends_with(".tmp") {
                continue;
            }
            match entry.file_type() {
                Ok(kind) if kind.is_file() => {}
                _ => continue,
            }
            if let Err(e) = validate_file_name(&name) {
                warn!(name, error = %e, "skipping unshareable file");
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }
}

impl ContentStore for DiskStore {
    fn load(&mut self, name: &str) -> Result<String, StoreError> {
        fs::read_to_string(self.file_path(name)).map_err(|e| io_error(name, e))
    }

    fn save(&mut self, name: &str, text: &str) -> Result<(), StoreError> {
        write_atomic(&self.file_path(name), text.as_bytes()).map_err(|e| io_error(name, e))
    }

    fn append_change(&mut self, name: &str, entry: &ChangeEntry) -> Result<(), StoreError> {
        let mut log = self.change_log(name)?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        log.append(now, entry.clone());

        let text = log
            .to_json()
            .map_err(|e| StoreError::Corrupt(format!("{name}: {e}")))?;
        let dir = self.root.join(CHANGES_DIR);
        fs::create_dir_all(&dir).map_err(|e| io_error(name, e))?;
        write_atomic(&self.changes_path(name), text.as_bytes()).map_err(|e| io_error(name, e))
    }

    fn rename(&mut self, old: &str, new: &str) -> Result<(), StoreError> {
        let from = self.file_path(old);
        let to = self.file_path(new);
        if to.exists() {
            return Err(StoreError::AlreadyExists(new.to_string()));
        }
        fs::rename(&from, &to).map_err(|e| io_error(old, e))?;

        let log = self.changes_path(old);
        if log.exists() {
            fs::rename(&log, self.changes_path(new)).map_err(|e| io_error(old, e))?;
        }
        Ok(())
    }

    fn create(&mut self, name: &str) -> Result<(), StoreError> {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.file_path(name))
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(io_error(name, e)),
        }
    }
}

fn io_error(name: &str, e: std::io::Error) -> StoreError {
    match e.kind() {
        ErrorKind::NotFound => StoreError::NotFound(name.to_string()),
        _ => StoreError::Io(format!("{name}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, DiskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn entry(line: usize, added: &[&str]) -> ChangeEntry {
        ChangeEntry {
            line,
            removed: "old".into(),
            added: added.iter().map(|s| s.to_string()).collect(),
        }
    }

    // ===========================================
    // Scan
    // ===========================================

    #[test]
    fn scan_lists_top_level_visible_files() {
        let (dir, store) = store();
        fs::write(dir.path().join("main.py"), "print()\n").unwrap();
        fs::write(dir.path().join("README.md"), "# hi\n").unwrap();
        fs::write(dir.path().join(".env"), "SECRET=1\n").unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src").join("lib.rs"), "").unwrap();

        assert_eq!(store.scan().unwrap(), vec!["README.md", "main.py"]);
    }

    #[test]
    fn scan_skips_bookkeeping_directories() {
        let (dir, mut store) = store();
        fs::write(dir.path().join("a.txt"), "x\n").unwrap();
        store.append_change("a.txt", &entry(1, &["y"])).unwrap();
        fs::create_dir(dir.path().join(".database")).unwrap();

        assert_eq!(store.scan().unwrap(), vec!["a.txt"]);
    }

    // ===========================================
    // Content
    // ===========================================

    #[test]
    fn save_and_load() {
        let (dir, mut store) = store();
        store.create("a.txt").unwrap();
        assert_eq!(store.load("a.txt").unwrap(), "");

        store.save("a.txt", "one\ntwo\n").unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "one\ntwo\n");
        assert!(!dir.path().join("a.txt.tmp").exists());
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let (_dir, mut store) = store();
        assert_eq!(
            store.load("missing.txt"),
            Err(StoreError::NotFound("missing.txt".into()))
        );
    }

    #[test]
    fn create_keeps_existing_content() {
        let (dir, mut store) = store();
        fs::write(dir.path().join("a.txt"), "keep\n").unwrap();
        store.create("a.txt").unwrap();
        assert_eq!(store.load("a.txt").unwrap(), "keep\n");
    }

    // ===========================================
    // Change log
    // ===========================================

    #[test]
    fn change_log_is_append_only() {
        let (dir, mut store) = store();
        store.create("a.txt").unwrap();
        store.append_change("a.txt", &entry(5, &["x", "y"])).unwrap();
        store.append_change("a.txt", &entry(2, &[])).unwrap();

        let path = dir.path().join(".changes").join("a.txt_changes.txt");
        assert!(path.exists());

        let log = store.change_log("a.txt").unwrap();
        let lines: Vec<usize> = log.entries().map(|(_, e)| e.line).collect();
        assert_eq!(lines, vec![5, 2]);

        store.append_change("a.txt", &entry(9, &["z"])).unwrap();
        let log = store.change_log("a.txt").unwrap();
        assert_eq!(log.len(), 3);
        let first = log.entries().next().map(|(_, e)| e.clone()).unwrap();
        assert_eq!(first, entry(5, &["x", "y"]));
    }

    #[test]
    fn corrupt_change_log_is_reported() {
        let (dir, mut store) = store();
        fs::create_dir(dir.path().join(".changes")).unwrap();
        fs::write(dir.path().join(".changes").join("a.txt_changes.txt"), "{not json").unwrap();

        assert!(matches!(
            store.append_change("a.txt", &entry(1, &[])),
            Err(StoreError::Corrupt(_))
        ));
    }

    // ===========================================
    // Rename
    // ===========================================

    #[test]
    fn rename_moves_file_and_log() {
        let (dir, mut store) = store();
        fs::write(dir.path().join("a.txt"), "x\n").unwrap();
        store.append_change("a.txt", &entry(1, &["y"])).unwrap();

        store.rename("a.txt", "b.txt").unwrap();
        assert!(!dir.path().join("a.txt").exists());
        assert_eq!(store.load("b.txt").unwrap(), "x\n");
        assert_eq!(store.change_log("b.txt").unwrap().len(), 1);
        assert!(store.change_log("a.txt").unwrap().is_empty());
    }

    #[test]
    fn rename_onto_existing_file_fails() {
        let (dir, mut store) = store();
        fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        fs::write(dir.path().join("b.txt"), "b\n").unwrap();

        assert_eq!(
            store.rename("a.txt", "b.txt"),
            Err(StoreError::AlreadyExists("b.txt".into()))
        );
        assert_eq!(store.load("b.txt").unwrap(), "b\n");
    }
}
