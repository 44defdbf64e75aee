//! Client-side view of the shared project.
//!
//! The workspace tracks the file listing, the one file the user has open,
//! the lines other users hold, and the user's own lock ("chosen block").
//!
//! Line notifications from the host are in host numbering. While an offset
//! is pending, later notifications are held in an inbox behind it so that
//! they are applied in the numbering they were written in.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use linelock_types::{FileEntry, FilesMessage, LineNumber, OffsetId, SharedAccess};
use thiserror::Error;

use crate::patch::{self, Content};

/// Errors from workspace commands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkspaceError {
    /// No file is open.
    #[error("no file is open")]
    NoFile,

    /// The file is not in the shared listing.
    #[error("unknown file: {0}")]
    UnknownFile(String),

    /// The open file is read-only.
    #[error("{0} is read-only")]
    ReadOnly(String),

    /// The line does not exist.
    #[error("line {0} does not exist")]
    LineOutOfRange(LineNumber),

    /// Another user holds the line.
    #[error("line {0} is locked by another user")]
    LineLocked(LineNumber),

    /// A lock request is already in flight.
    #[error("a line request is already pending")]
    RequestPending,

    /// No line is held.
    #[error("no line is being edited")]
    NoBlock,

    /// A commit needs at least one line.
    #[error("an update must contain at least one line")]
    EmptyCommit,

    /// The replacement does not match the chosen block.
    #[error("block has {expected} lines but {got} were given")]
    BlockMismatch {
        /// Lines in the chosen block.
        expected: usize,
        /// Lines supplied.
        got: usize,
    },

    /// Only empty lines can be deleted.
    #[error("line {0} is not empty")]
    LineNotEmpty(LineNumber),

    /// The file's only line cannot be deleted.
    #[error("cannot delete the only line")]
    LastLine,

    /// The offset is not waiting to be applied.
    #[error("offset {0} is not pending")]
    NoPendingOffset(OffsetId),

    /// Offsets must be applied oldest first.
    #[error("offset {expected} must be applied before {got}")]
    OffsetOutOfOrder {
        /// The oldest pending offset.
        expected: OffsetId,
        /// The offset that was requested.
        got: OffsetId,
    },
}

/// Events for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Logged in and ready.
    Connected {
        /// Authenticated username.
        username: String,
    },
    /// The shared file listing arrived.
    FilesListed {
        /// Visible files.
        files: Vec<FileEntry>,
    },
    /// The requested file's content arrived.
    FileSet {
        /// File name.
        name: String,
        /// Access level.
        access: SharedAccess,
        /// Content lines.
        lines: Vec<String>,
        /// Lines held by other users.
        locked: Vec<LineNumber>,
    },
    /// A new file was shared.
    FileRegistered {
        /// File name.
        name: String,
        /// Access level.
        access: SharedAccess,
    },
    /// A file's access level changed.
    FileUpdated {
        /// File name.
        name: String,
        /// New access level.
        access: SharedAccess,
    },
    /// A file stopped being shared.
    FileRemoved {
        /// File name.
        name: String,
    },
    /// A file was renamed.
    FileRenamed {
        /// Previous name.
        old: String,
        /// New name.
        new: String,
    },
    /// The host granted a line lock.
    LineGranted {
        /// Granted line.
        line: LineNumber,
    },
    /// The host denied a line lock.
    LineDenied {
        /// Denied line.
        line: LineNumber,
    },
    /// Another user locked a line.
    LineLocked {
        /// Locked line.
        line: LineNumber,
    },
    /// A line was released.
    LineUnlocked {
        /// Released line.
        line: LineNumber,
    },
    /// Another user's edit was applied.
    LineUpdated {
        /// Replaced line.
        line: LineNumber,
        /// Replacement lines.
        lines: Vec<String>,
    },
    /// Another user's deletion was applied.
    LineDeleted {
        /// Deleted line.
        line: LineNumber,
    },
    /// The host applied the user's own commit.
    CommitConfirmed {
        /// Line the commit landed on, in host numbering.
        line: LineNumber,
    },
    /// A line-count change is waiting for [`Workspace::accept_offset`].
    OffsetPending {
        /// Offset to accept.
        offset: OffsetId,
        /// Changed line.
        line: LineNumber,
        /// Line-count delta.
        delta: isize,
    },
    /// The session ended.
    Disconnected {
        /// Why it ended.
        reason: String,
    },
}

/// The line range the user holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChosenBlock {
    /// First (granted) line.
    pub start: LineNumber,
    /// Number of lines being edited.
    pub len: usize,
}

/// The open file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    name: String,
    access: SharedAccess,
    content: Content,
    locked: BTreeSet<LineNumber>,
}

impl LocalFile {
    /// File name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Access level.
    pub fn access(&self) -> SharedAccess {
        self.access
    }

    /// Content lines.
    pub fn lines(&self) -> &[String] {
        &self.content.lines
    }

    /// Whether another user holds a line.
    pub fn is_line_locked(&self, line: LineNumber) -> bool {
        self.locked.contains(&line)
    }

    /// Lines other users hold.
    pub fn locked_lines(&self) -> impl Iterator<Item = LineNumber> + '_ {
        self.locked.iter().copied()
    }

    fn shift_locks(&mut self, after: LineNumber, delta: isize) {
        self.locked = self
            .locked
            .iter()
            .filter_map(|l| if *l > after { l.shifted(delta) } else { Some(*l) })
            .collect();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingRequest {
    sent: LineNumber,
    line: LineNumber,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Staged {
    Lock(LineNumber),
    Unlock(LineNumber),
    Update {
        line: LineNumber,
        lines: Vec<String>,
        offset: Option<OffsetId>,
    },
    Delete {
        line: LineNumber,
        offset: Option<OffsetId>,
    },
}

impl Staged {
    fn offset(&self) -> Option<OffsetId> {
        match self {
            Self::Update { offset, .. } | Self::Delete { offset, .. } => *offset,
            Self::Lock(_) | Self::Unlock(_) => None,
        }
    }

    /// Changed line and the line-count delta it brings.
    fn shift(&self) -> (LineNumber, isize) {
        match self {
            Self::Update { line, lines, .. } => (*line, lines.len() as isize - 1),
            Self::Delete { line, .. } => (*line, -1),
            Self::Lock(line) | Self::Unlock(line) => (*line, 0),
        }
    }

    fn rebase(&mut self, after: LineNumber, delta: isize) {
        let line = match self {
            Self::Lock(line) | Self::Unlock(line) => line,
            Self::Update { line, .. } | Self::Delete { line, .. } => line,
        };
        if *line > after {
            if let Some(shifted) = line.shifted(delta) {
                *line = shifted;
            }
        }
    }
}

/// Client-side session view.
#[derive(Debug, Default)]
pub struct Workspace {
    files: BTreeMap<String, SharedAccess>,
    local: Option<LocalFile>,
    requested: Option<String>,
    pending: Option<PendingRequest>,
    block: Option<ChosenBlock>,
    inbox: VecDeque<Staged>,
    unconfirmed: VecDeque<SentCommit>,
}

/// An own commit the host has not confirmed yet.
///
/// `line` is kept in the numbering the host's next broadcasts use, so it
/// moves with every line-count change that arrives before the confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SentCommit {
    line: LineNumber,
    delta: isize,
}

impl Workspace {
    /// Create an empty workspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared files as last reported by the host.
    pub fn files(&self) -> impl Iterator<Item = (&str, SharedAccess)> {
        self.files.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// The open file.
    pub fn local(&self) -> Option<&LocalFile> {
        self.local.as_ref()
    }

    /// The user's held block.
    pub fn block(&self) -> Option<ChosenBlock> {
        self.block
    }

    /// Whether a lock request is in flight.
    pub fn has_pending_request(&self) -> bool {
        self.pending.is_some()
    }

    /// Own commits still waiting for the host's confirmation.
    pub fn unconfirmed_commits(&self) -> usize {
        self.unconfirmed.len()
    }

    /// Offsets waiting to be accepted, oldest first.
    pub fn pending_offsets(&self) -> Vec<OffsetId> {
        self.inbox.iter().filter_map(Staged::offset).collect()
    }

    // ===========================================
    // Commands
    // ===========================================

    /// Build a listing request.
    pub fn request_files(&self) -> FilesMessage {
        FilesMessage::ReqFiles
    }

    /// Open a file. Closes the current one.
    pub fn request_file(&mut self, name: &str) -> Result<FilesMessage, WorkspaceError> {
        if !self.files.contains_key(name) {
            return Err(WorkspaceError::UnknownFile(name.to_string()));
        }
        self.close();
        self.requested = Some(name.to_string());
        Ok(FilesMessage::GetFileCont {
            name: name.to_string(),
        })
    }

    /// Ask for a line lock. Any held block is given up.
    pub fn request_line(&mut self, line: LineNumber) -> Result<FilesMessage, WorkspaceError> {
        let local = self.local.as_ref().ok_or(WorkspaceError::NoFile)?;
        if !local.access.is_editable() {
            return Err(WorkspaceError::ReadOnly(local.name.clone()));
        }
        if line.index() >= local.content.len() {
            return Err(WorkspaceError::LineOutOfRange(line));
        }
        if local.is_line_locked(line) {
            return Err(WorkspaceError::LineLocked(line));
        }
        if self.pending.is_some() {
            return Err(WorkspaceError::RequestPending);
        }
        let name = local.name.clone();
        self.block = None;
        self.pending = Some(PendingRequest { sent: line, line });
        Ok(FilesMessage::PrepUpdateLine { name, line })
    }

    /// Grow the chosen block by one line. Returns the new length.
    pub fn extend_block(&mut self) -> Result<usize, WorkspaceError> {
        let block = self.block.as_mut().ok_or(WorkspaceError::NoBlock)?;
        block.len += 1;
        Ok(block.len)
    }

    /// Submit the chosen block's new content.
    ///
    /// The edit is applied locally at once.
    pub fn commit(&mut self, lines: Vec<String>) -> Result<FilesMessage, WorkspaceError> {
        let block = self.block.ok_or(WorkspaceError::NoBlock)?;
        let lines = patch::sanitize_lines(lines);
        if lines.is_empty() {
            return Err(WorkspaceError::EmptyCommit);
        }
        if lines.len() != block.len {
            return Err(WorkspaceError::BlockMismatch {
                expected: block.len,
                got: lines.len(),
            });
        }
        let local = self.local.as_mut().ok_or(WorkspaceError::NoFile)?;
        local
            .content
            .splice(block.start, lines.clone())
            .map_err(|_| WorkspaceError::LineOutOfRange(block.start))?;
        let delta = lines.len() as isize - 1;
        local.shift_locks(block.start, delta);
        let name = local.name.clone();
        self.record_sent(block.start, delta);
        self.rebase_inbox(block.start, delta);
        self.block = None;
        Ok(FilesMessage::UpdateLine {
            name,
            line: block.start,
            lines,
            offset: None,
        })
    }

    /// Give up the held block or the in-flight request.
    pub fn discard(&mut self) -> Result<FilesMessage, WorkspaceError> {
        let local = self.local.as_ref().ok_or(WorkspaceError::NoFile)?;
        let line = match (self.block.take(), self.pending.take()) {
            (Some(block), _) => block.start,
            (None, Some(pending)) => pending.line,
            (None, None) => return Err(WorkspaceError::NoBlock),
        };
        Ok(FilesMessage::DisUpdateLine {
            name: local.name.clone(),
            line,
        })
    }

    /// Delete the held line. It must already be empty.
    pub fn delete_line(&mut self) -> Result<FilesMessage, WorkspaceError> {
        let block = self.block.ok_or(WorkspaceError::NoBlock)?;
        if block.len != 1 {
            return Err(WorkspaceError::BlockMismatch {
                expected: 1,
                got: block.len,
            });
        }
        let local = self.local.as_mut().ok_or(WorkspaceError::NoFile)?;
        let text = local
            .content
            .line(block.start)
            .ok_or(WorkspaceError::LineOutOfRange(block.start))?;
        if !patch::is_blank(text) {
            return Err(WorkspaceError::LineNotEmpty(block.start));
        }
        local
            .content
            .delete(block.start)
            .map_err(|_| WorkspaceError::LastLine)?;
        local.shift_locks(block.start, -1);
        let name = local.name.clone();
        self.record_sent(block.start, -1);
        self.rebase_inbox(block.start, -1);
        self.block = None;
        Ok(FilesMessage::DelLine {
            name,
            line: block.start,
            offset: None,
        })
    }

    /// Apply the oldest pending offset and everything queued behind it.
    ///
    /// Returns the acknowledgement for the host and the resulting events.
    pub fn accept_offset(
        &mut self,
        offset: OffsetId,
    ) -> Result<(FilesMessage, Vec<ClientEvent>), WorkspaceError> {
        match self.inbox.front().and_then(Staged::offset) {
            Some(front) if front == offset => {}
            Some(front) if self.pending_offsets().contains(&offset) => {
                return Err(WorkspaceError::OffsetOutOfOrder {
                    expected: front,
                    got: offset,
                })
            }
            _ => return Err(WorkspaceError::NoPendingOffset(offset)),
        }

        let mut events = Vec::new();
        if let Some(staged) = self.inbox.pop_front() {
            events.extend(self.apply_staged(staged));
        }
        while self.inbox.front().is_some_and(|s| s.offset().is_none()) {
            if let Some(staged) = self.inbox.pop_front() {
                events.extend(self.apply_staged(staged));
            }
        }
        Ok((FilesMessage::ApplyUpdateLine { offset }, events))
    }

    // ===========================================
    // Host messages
    // ===========================================

    /// Fold a host message into the view.
    pub fn apply(&mut self, message: FilesMessage) -> Vec<ClientEvent> {
        match message {
            FilesMessage::ResFiles { files } => {
                self.files = files.iter().map(|f| (f.name.clone(), f.access)).collect();
                vec![ClientEvent::FilesListed { files }]
            }
            FilesMessage::SetFileCont {
                name,
                access,
                lines,
                locked,
            } => {
                let wanted = self.requested.as_deref() == Some(name.as_str())
                    || self.local.as_ref().is_some_and(|l| l.name == name);
                if !wanted {
                    return Vec::new();
                }
                self.close();
                self.local = Some(LocalFile {
                    name: name.clone(),
                    access,
                    content: Content::from_lines(lines.clone()),
                    locked: locked.iter().copied().collect(),
                });
                vec![ClientEvent::FileSet {
                    name,
                    access,
                    lines,
                    locked,
                }]
            }
            FilesMessage::ResPrepUpdate {
                name,
                line,
                granted,
            } => {
                if !self.is_local(&name) {
                    return Vec::new();
                }
                match self.pending {
                    Some(pending) if pending.sent == line => {
                        self.pending = None;
                        if granted {
                            self.block = Some(ChosenBlock {
                                start: pending.line,
                                len: 1,
                            });
                            vec![ClientEvent::LineGranted { line: pending.line }]
                        } else {
                            vec![ClientEvent::LineDenied { line: pending.line }]
                        }
                    }
                    _ => Vec::new(),
                }
            }
            FilesMessage::LockLine { name, line } => self.receive(&name, Staged::Lock(line)),
            FilesMessage::UnlockLine { name, line } => self.receive(&name, Staged::Unlock(line)),
            FilesMessage::UpdateLine {
                name,
                line,
                lines,
                offset,
            } => self.receive(
                &name,
                Staged::Update {
                    line,
                    lines: patch::sanitize_lines(lines),
                    offset,
                },
            ),
            FilesMessage::DelLine { name, line, offset } => {
                self.receive(&name, Staged::Delete { line, offset })
            }
            FilesMessage::UpdateFile { name, access } => {
                let existed = self.files.insert(name.clone(), access).is_some();
                if let Some(local) = self.local.as_mut().filter(|l| l.name == name) {
                    local.access = access;
                    if !access.is_editable() {
                        self.block = None;
                        self.pending = None;
                    }
                }
                if existed {
                    vec![ClientEvent::FileUpdated { name, access }]
                } else {
                    vec![ClientEvent::FileRegistered { name, access }]
                }
            }
            FilesMessage::RemoveFile { name } => {
                self.files.remove(&name);
                if self.is_local(&name) || self.requested.as_deref() == Some(name.as_str()) {
                    self.close();
                }
                vec![ClientEvent::FileRemoved { name }]
            }
            FilesMessage::ChangeFileName { old, new } => {
                if let Some(access) = self.files.remove(&old) {
                    self.files.insert(new.clone(), access);
                }
                if let Some(local) = self.local.as_mut().filter(|l| l.name == old) {
                    local.name = new.clone();
                }
                if self.requested.as_deref() == Some(old.as_str()) {
                    self.requested = Some(new.clone());
                }
                vec![ClientEvent::FileRenamed { old, new }]
            }
            FilesMessage::ResUpdateLine { name, line } => {
                if !self.is_local(&name) || self.unconfirmed.pop_front().is_none() {
                    return Vec::new();
                }
                vec![ClientEvent::CommitConfirmed { line }]
            }
            FilesMessage::ReqFiles
            | FilesMessage::GetFileCont { .. }
            | FilesMessage::PrepUpdateLine { .. }
            | FilesMessage::DisUpdateLine { .. }
            | FilesMessage::ApplyUpdateLine { .. } => Vec::new(),
        }
    }

    fn receive(&mut self, name: &str, mut staged: Staged) -> Vec<ClientEvent> {
        if !self.is_local(name) {
            return Vec::new();
        }
        // The host numbered this before it saw our unconfirmed commits.
        let (host_line, host_delta) = staged.shift();
        for sent in self.unconfirmed.iter_mut() {
            staged.rebase(sent.line, sent.delta);
            if host_delta != 0 && sent.line > host_line {
                sent.line = sent.line.shifted(host_delta).unwrap_or(sent.line);
            }
        }
        if let Some(offset) = staged.offset() {
            let (line, delta) = staged.shift();
            self.inbox.push_back(staged);
            return vec![ClientEvent::OffsetPending {
                offset,
                line,
                delta,
            }];
        }
        if !self.inbox.is_empty() {
            self.inbox.push_back(staged);
            return Vec::new();
        }
        self.apply_staged(staged)
    }

    fn apply_staged(&mut self, staged: Staged) -> Vec<ClientEvent> {
        let Some(local) = self.local.as_mut() else {
            return Vec::new();
        };
        match staged {
            Staged::Lock(line) => {
                local.locked.insert(line);
                vec![ClientEvent::LineLocked { line }]
            }
            Staged::Unlock(line) => {
                local.locked.remove(&line);
                if self.block.is_some_and(|b| b.start == line) {
                    self.block = None;
                }
                vec![ClientEvent::LineUnlocked { line }]
            }
            Staged::Update { line, lines, .. } => {
                if lines.is_empty() || local.content.splice(line, lines.clone()).is_err() {
                    return Vec::new();
                }
                let delta = lines.len() as isize - 1;
                local.shift_locks(line, delta);
                self.shift_own(line, delta);
                vec![ClientEvent::LineUpdated { line, lines }]
            }
            Staged::Delete { line, .. } => {
                if local.content.delete(line).is_err() {
                    return Vec::new();
                }
                local.shift_locks(line, -1);
                self.shift_own(line, -1);
                vec![ClientEvent::LineDeleted { line }]
            }
        }
    }

    /// Move the user's own block and request after another user's edit.
    fn shift_own(&mut self, after: LineNumber, delta: isize) {
        if let Some(block) = self.block.as_mut() {
            if block.start > after {
                block.start = block.start.shifted(delta).unwrap_or(block.start);
            }
        }
        if let Some(pending) = self.pending.as_mut() {
            if pending.line > after {
                pending.line = pending.line.shifted(delta).unwrap_or(pending.line);
            }
        }
    }

    /// Remember an own commit at view line `line`, translated to host numbering.
    fn record_sent(&mut self, line: LineNumber, delta: isize) {
        let mut host_line = line;
        for staged in self.inbox.iter().filter(|s| s.offset().is_some()) {
            let (at, shift) = staged.shift();
            if host_line > at {
                host_line = host_line.shifted(shift).unwrap_or(host_line);
            }
        }
        self.unconfirmed.push_back(SentCommit {
            line: host_line,
            delta,
        });
    }

    fn rebase_inbox(&mut self, after: LineNumber, delta: isize) {
        if delta == 0 {
            return;
        }
        for staged in self.inbox.iter_mut() {
            staged.rebase(after, delta);
        }
    }

    fn is_local(&self, name: &str) -> bool {
        self.local.as_ref().is_some_and(|l| l.name == name)
    }

    fn close(&mut self) {
        self.local = None;
        self.requested = None;
        self.pending = None;
        self.block = None;
        self.inbox.clear();
        self.unconfirmed.clear();
    }
}
