//! Host-side authority over the line-lock/edit protocol.
//!
//! The coordinator owns the file registry and every client's session state.
//! It consumes client messages and host requests and returns [`Action`]s for
//! the I/O layer to carry out. It never touches a socket.
//!
//! Line numbers held here (locks, selected lines, offsets) are in host
//! numbering. Line numbers received from a client are translated through
//! that client's pending offsets before use.

use std::collections::{BTreeMap, HashMap};

use linelock_types::{
    AccessLevel, ClientId, FileEntry, FilesMessage, LineNumber, Message, NetworkMessage, OffsetId,
    SharedAccess,
};

use crate::changelog::ChangeEntry;
use crate::file::VirtualFile;
use crate::offsets::{OffsetLedger, PendingOffset};
use crate::patch::{self, Content};
use crate::registry::{FileId, FileRegistry, RegistryError};
use crate::store::{ContentStore, StoreError};
use crate::trust::{Penalty, TrustFactor};

/// Trust gained per successful commit.
const COMMIT_REWARD: u8 = 1;

/// Instructions for the I/O layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Deliver a message to one client.
    Send {
        /// Recipient.
        to: ClientId,
        /// Message to deliver.
        message: Message,
    },
    /// Close a client's connection.
    Disconnect {
        /// Client to drop.
        client: ClientId,
        /// Reason sent to the client.
        reason: String,
    },
}

impl Action {
    fn send(to: ClientId, message: FilesMessage) -> Self {
        Self::Send {
            to,
            message: Message::Files(message),
        }
    }
}

/// Work item for the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// A files protocol message from the client.
    Files(FilesMessage),
    /// The client lowered its trust outside the command path.
    Penalize(Penalty),
    /// The client's connection ended.
    Leave,
    /// Host registers a file.
    RegisterFile {
        /// File name.
        name: String,
        /// Initial access level.
        access: AccessLevel,
    },
    /// Host changes a file's access level.
    SetAccess {
        /// File name.
        name: String,
        /// New access level.
        access: AccessLevel,
    },
    /// Host renames a file.
    RenameFile {
        /// Current name.
        old: String,
        /// New name.
        new: String,
    },
    /// Host removes a file from the registry.
    RemoveFile {
        /// File name.
        name: String,
    },
}

/// A request tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Originating client, [`ClientId::host`] for host requests.
    pub client: ClientId,
    /// What to do.
    pub request: Request,
}

impl Command {
    /// A command from a client.
    pub fn from_client(client: ClientId, request: Request) -> Self {
        Self { client, request }
    }

    /// A command from the host itself.
    pub fn from_host(request: Request) -> Self {
        Self {
            client: ClientId::host(),
            request,
        }
    }
}

/// Host-side state of one connected client.
#[derive(Debug, Clone)]
pub struct ClientState {
    username: String,
    selected_file: Option<FileId>,
    selected_line: Option<LineNumber>,
    trust: TrustFactor,
    offsets: OffsetLedger,
    visible: BTreeMap<String, SharedAccess>,
}

impl ClientState {
    fn new(username: String, trust: TrustFactor) -> Self {
        Self {
            username,
            selected_file: None,
            selected_line: None,
            trust,
            offsets: OffsetLedger::new(),
            visible: BTreeMap::new(),
        }
    }

    /// Authenticated username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// File the client is viewing.
    pub fn selected_file(&self) -> Option<FileId> {
        self.selected_file
    }

    /// Line the client holds a lock on, in host numbering.
    pub fn selected_line(&self) -> Option<LineNumber> {
        self.selected_line
    }

    /// Current trust.
    pub fn trust(&self) -> TrustFactor {
        self.trust
    }

    /// Offsets not yet acknowledged.
    pub fn offsets(&self) -> &OffsetLedger {
        &self.offsets
    }

    /// Files this client has been told about.
    pub fn visible_files(&self) -> impl Iterator<Item = (&str, SharedAccess)> {
        self.visible.iter().map(|(k, v)| (k.as_str(), *v))
    }

    fn knows(&self, name: &str) -> bool {
        self.visible.contains_key(name)
    }
}

/// Authoritative host state.
#[derive(Debug)]
pub struct Coordinator<S> {
    registry: FileRegistry,
    clients: HashMap<ClientId, ClientState>,
    store: S,
    next_offset: OffsetId,
    initial_trust: TrustFactor,
    last_error: Option<String>,
}

impl<S: ContentStore> Coordinator<S> {
    /// Create a coordinator over a content store.
    pub fn new(store: S) -> Self {
        Self {
            registry: FileRegistry::new(),
            clients: HashMap::new(),
            store,
            next_offset: OffsetId::new(1),
            initial_trust: TrustFactor::default(),
            last_error: None,
        }
    }

    /// Set the trust new clients start with.
    pub fn with_initial_trust(mut self, trust: u8) -> Self {
        self.initial_trust = TrustFactor::new(trust);
        self
    }

    /// The file registry.
    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    /// The content store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The content store, mutably.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// State of one client.
    pub fn client(&self, id: ClientId) -> Option<&ClientState> {
        self.clients.get(&id)
    }

    /// Number of joined clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Most recent recorded failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Take the recorded failure, leaving none.
    pub fn take_last_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    // ===========================================
    // Session lifecycle
    // ===========================================

    /// Add an authenticated client.
    pub fn join(&mut self, client: ClientId, username: impl Into<String>) {
        self.clients
            .insert(client, ClientState::new(username.into(), self.initial_trust));
    }

    /// Remove a client, releasing its lock.
    pub fn leave(&mut self, client: ClientId) -> Vec<Action> {
        let mut actions = Vec::new();
        self.release_lock(client, &mut actions);
        self.clients.remove(&client);
        actions
    }

    /// The shared file listing for a client, recorded as its snapshot.
    pub fn share_files(&mut self, client: ClientId) -> Vec<FileEntry> {
        let files = self.registry.shared();
        if let Some(state) = self.clients.get_mut(&client) {
            state.visible = files.iter().map(|f| (f.name.clone(), f.access)).collect();
        }
        files
    }

    /// Lower a client's trust; disconnects it at zero.
    pub fn penalize(&mut self, client: ClientId, penalty: Penalty) -> Vec<Action> {
        let Some(state) = self.clients.get_mut(&client) else {
            return Vec::new();
        };
        state.trust.penalize(penalty);
        if state.trust.is_exhausted() {
            vec![Action::Disconnect {
                client,
                reason: "trust exhausted".into(),
            }]
        } else {
            Vec::new()
        }
    }

    /// Run one queued command.
    pub fn execute(&mut self, command: Command) -> Vec<Action> {
        let Command { client, request } = command;
        let result = match request {
            Request::Files(message) => return self.handle(client, message),
            Request::Penalize(penalty) => return self.penalize(client, penalty),
            Request::Leave => return self.leave(client),
            Request::RegisterFile { name, access } => self.register_file(&name, access),
            Request::SetAccess { name, access } => self.set_access(&name, access),
            Request::RenameFile { old, new } => self.rename_file(&old, &new),
            Request::RemoveFile { name } => self.remove_file(&name),
        };
        result.unwrap_or_else(|e| {
            self.last_error = Some(e.to_string());
            Vec::new()
        })
    }

    // ===========================================
    // Client messages
    // ===========================================

    /// Handle a files protocol message from a client.
    pub fn handle(&mut self, client: ClientId, message: FilesMessage) -> Vec<Action> {
        if !self.clients.contains_key(&client) {
            return Vec::new();
        }
        match message {
            FilesMessage::ReqFiles => {
                let files = self.share_files(client);
                vec![Action::send(client, FilesMessage::ResFiles { files })]
            }
            FilesMessage::GetFileCont { name } => self.get_file(client, &name),
            FilesMessage::PrepUpdateLine { name, line } => self.prepare_update(client, &name, line),
            FilesMessage::UpdateLine {
                name, line, lines, ..
            } => self.commit_update(client, &name, line, lines),
            FilesMessage::DelLine { name, line, .. } => self.commit_delete(client, &name, line),
            FilesMessage::DisUpdateLine { name, line } => self.discard_update(client, &name, line),
            FilesMessage::ApplyUpdateLine { offset } => self.apply_offset(client, offset),
            // Host-to-client notifications have no meaning in this direction.
            FilesMessage::ResFiles { .. }
            | FilesMessage::SetFileCont { .. }
            | FilesMessage::ResPrepUpdate { .. }
            | FilesMessage::LockLine { .. }
            | FilesMessage::UnlockLine { .. }
            | FilesMessage::UpdateFile { .. }
            | FilesMessage::RemoveFile { .. }
            | FilesMessage::ChangeFileName { .. }
            | FilesMessage::ResUpdateLine { .. } => Vec::new(),
        }
    }

    fn get_file(&mut self, client: ClientId, name: &str) -> Vec<Action> {
        let Some(id) = self.visible_file(name) else {
            return self.penalize(client, Penalty::UnknownFile);
        };
        if let Err(e) = self.ensure_loaded(id) {
            self.last_error = Some(format!("loading {name}: {e}"));
            return Vec::new();
        }

        let mut actions = Vec::new();
        self.release_lock(client, &mut actions);
        if let Some(state) = self.clients.get_mut(&client) {
            state.selected_file = Some(id);
            state.selected_line = None;
            state.offsets.clear();
        }
        if let Some(message) = self.file_content(id) {
            actions.push(Action::send(client, message));
        }
        actions
    }

    fn prepare_update(&mut self, client: ClientId, name: &str, line: LineNumber) -> Vec<Action> {
        let deny = |line: LineNumber| {
            vec![Action::send(
                client,
                FilesMessage::ResPrepUpdate {
                    name: name.to_string(),
                    line,
                    granted: false,
                },
            )]
        };

        let Some(id) = self.visible_file(name) else {
            return self.penalize(client, Penalty::UnknownFile);
        };
        if self.selected(client) != Some(id) {
            return deny(line);
        }
        let Some(host_line) = self.translate(client, id, line) else {
            return deny(line);
        };
        let Some(file) = self.registry.get(id) else {
            return deny(line);
        };
        let in_range = file
            .content()
            .is_some_and(|c| host_line.index() < c.len());
        if !file.access().is_editable() || !in_range {
            return deny(line);
        }

        let mut actions = Vec::new();
        let held = self.clients.get(&client).and_then(|s| s.selected_line);
        if held != Some(host_line) {
            self.release_lock(client, &mut actions);
            let Some(file) = self.registry.get_mut(id) else {
                return deny(line);
            };
            if !file.lock_line(host_line) {
                actions.extend(deny(line));
                return actions;
            }
            if let Some(state) = self.clients.get_mut(&client) {
                state.selected_line = Some(host_line);
            }
            for viewer in self.viewers(id, client) {
                actions.push(Action::send(
                    viewer,
                    FilesMessage::LockLine {
                        name: name.to_string(),
                        line: host_line,
                    },
                ));
            }
        }
        actions.push(Action::send(
            client,
            FilesMessage::ResPrepUpdate {
                name: name.to_string(),
                line,
                granted: true,
            },
        ));
        actions
    }

    fn commit_update(
        &mut self,
        client: ClientId,
        name: &str,
        line: LineNumber,
        lines: Vec<String>,
    ) -> Vec<Action> {
        if lines.is_empty() {
            return self.penalize(client, Penalty::MalformedEdit);
        }
        let lines = patch::sanitize_lines(lines);
        let (id, host_line) = match self.check_lock(client, name, line) {
            Ok(found) => found,
            Err(actions) => return actions,
        };

        let mut content = match self.registry.get(id).and_then(VirtualFile::content) {
            Some(content) => content.clone(),
            None => return Vec::new(),
        };
        let removed = match content.splice(host_line, lines.clone()) {
            Ok(removed) => removed,
            Err(e) => return self.reject_commit(client, id, host_line, e.to_string()),
        };
        let entry = ChangeEntry {
            line: host_line.to_wire(),
            removed,
            added: lines.clone(),
        };
        let delta = lines.len() as isize - 1;
        let broadcast = |offset: Option<OffsetId>| FilesMessage::UpdateLine {
            name: name.to_string(),
            line: host_line,
            lines: lines.clone(),
            offset,
        };
        self.finish_commit(client, id, line, host_line, content, entry, delta, broadcast)
    }

    fn commit_delete(&mut self, client: ClientId, name: &str, line: LineNumber) -> Vec<Action> {
        let (id, host_line) = match self.check_lock(client, name, line) {
            Ok(found) => found,
            Err(actions) => return actions,
        };

        let mut content = match self.registry.get(id).and_then(VirtualFile::content) {
            Some(content) => content.clone(),
            None => return Vec::new(),
        };
        let blank = content.line(host_line).is_some_and(patch::is_blank);
        if !blank {
            return self.reject_commit(client, id, host_line, format!("line {host_line} is not empty"));
        }
        let removed = match content.delete(host_line) {
            Ok(removed) => removed,
            Err(e) => return self.reject_commit(client, id, host_line, e.to_string()),
        };
        let entry = ChangeEntry {
            line: host_line.to_wire(),
            removed,
            added: Vec::new(),
        };
        let broadcast = |offset: Option<OffsetId>| FilesMessage::DelLine {
            name: name.to_string(),
            line: host_line,
            offset,
        };
        self.finish_commit(client, id, line, host_line, content, entry, -1, broadcast)
    }

    /// Persist a validated edit and fan it out.
    #[allow(clippy::too_many_arguments)]
    fn finish_commit(
        &mut self,
        client: ClientId,
        id: FileId,
        client_line: LineNumber,
        host_line: LineNumber,
        content: Content,
        entry: ChangeEntry,
        delta: isize,
        broadcast: impl Fn(Option<OffsetId>) -> FilesMessage,
    ) -> Vec<Action> {
        let name = match self.registry.get(id) {
            Some(file) => file.name().to_string(),
            None => return Vec::new(),
        };
        if let Err(e) = self.store.save(&name, &content.render()) {
            return self.reject_commit(client, id, host_line, format!("writing {name}: {e}"));
        }
        if let Err(e) = self.store.append_change(&name, &entry) {
            self.last_error = Some(format!("change log for {name}: {e}"));
        }

        if let Some(file) = self.registry.get_mut(id) {
            file.set_content(content);
            file.unlock_line(host_line);
            file.shift_after(host_line, delta);
        }
        if let Some(state) = self.clients.get_mut(&client) {
            state.selected_line = None;
            state.offsets.rebase(id, client_line, delta);
            state.trust.reward(COMMIT_REWARD);
        }

        let mut actions = vec![Action::send(
            client,
            FilesMessage::ResUpdateLine {
                name: name.clone(),
                line: host_line,
            },
        )];
        for viewer in self.viewers(id, client) {
            let offset = if delta != 0 {
                Some(self.issue_offset(viewer, id, host_line, delta))
            } else {
                None
            };
            if let Some(state) = self.clients.get_mut(&viewer) {
                if let Some(selected) = state.selected_line.filter(|l| *l > host_line) {
                    state.selected_line = selected.shifted(delta);
                }
            }
            actions.push(Action::send(
                viewer,
                FilesMessage::UnlockLine {
                    name: name.clone(),
                    line: host_line,
                },
            ));
            actions.push(Action::send(viewer, broadcast(offset)));
        }
        actions
    }

    /// Undo a failed commit: release the lock and resynchronize the client.
    fn reject_commit(
        &mut self,
        client: ClientId,
        id: FileId,
        host_line: LineNumber,
        reason: String,
    ) -> Vec<Action> {
        self.last_error = Some(reason);
        let mut actions = Vec::new();
        self.release_lock(client, &mut actions);
        if let Some(file) = self.registry.get_mut(id) {
            file.unlock_line(host_line);
        }
        if let Some(state) = self.clients.get_mut(&client) {
            state.offsets.clear_file(id);
        }
        if let Some(message) = self.file_content(id) {
            actions.push(Action::send(client, message));
        }
        actions
    }

    fn discard_update(&mut self, client: ClientId, name: &str, line: LineNumber) -> Vec<Action> {
        let Some(id) = self.visible_file(name) else {
            return Vec::new();
        };
        if self.selected(client) != Some(id) {
            return Vec::new();
        }
        let host_line = self.translate(client, id, line);
        let held = self.clients.get(&client).and_then(|s| s.selected_line);
        let mut actions = Vec::new();
        if host_line.is_some() && held == host_line {
            self.release_lock(client, &mut actions);
        }
        actions
    }

    fn apply_offset(&mut self, client: ClientId, offset: OffsetId) -> Vec<Action> {
        let accepted = self
            .clients
            .get_mut(&client)
            .map(|state| state.offsets.accept(offset));
        match accepted {
            Some(Ok(_)) => Vec::new(),
            Some(Err(e)) => {
                self.last_error = Some(format!("{}: {e}", client));
                self.penalize(client, Penalty::BadOffsetAck)
            }
            None => Vec::new(),
        }
    }

    // ===========================================
    // Host requests
    // ===========================================

    /// Register a file and announce it to clients if visible.
    pub fn register_file(
        &mut self,
        name: &str,
        access: AccessLevel,
    ) -> Result<Vec<Action>, RegistryError> {
        crate::registry::validate_file_name(name)?;
        if self.registry.find(name).is_some() {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        self.store
            .create(name)
            .map_err(|e| RegistryError::Storage(format!("{name}: {e}")))?;
        self.registry.register(VirtualFile::new(name, access))?;
        Ok(match access.shared() {
            Some(access) => self.announce(name, access),
            None => Vec::new(),
        })
    }

    /// Register a file that already exists in the store, without announcing.
    pub fn adopt_file(&mut self, file: VirtualFile) -> Result<FileId, RegistryError> {
        self.registry.register(file)
    }

    /// Change a file's access level.
    pub fn set_access(
        &mut self,
        name: &str,
        access: AccessLevel,
    ) -> Result<Vec<Action>, RegistryError> {
        let previous = self.registry.set_access(name, access)?;
        if previous == access {
            return Ok(Vec::new());
        }
        let id = self
            .registry
            .find(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        let mut actions = Vec::new();
        match access.shared() {
            None => actions.extend(self.withdraw(id, name)),
            Some(shared) => {
                if previous.is_editable() && !access.is_editable() {
                    self.revoke_locks(id, name, &mut actions);
                }
                actions.extend(self.announce(name, shared));
            }
        }
        Ok(actions)
    }

    /// Rename a file in the store and the registry.
    pub fn rename_file(&mut self, old: &str, new: &str) -> Result<Vec<Action>, RegistryError> {
        crate::registry::validate_file_name(new)?;
        if self.registry.find(new).is_some() {
            return Err(RegistryError::DuplicateName(new.to_string()));
        }
        let id = self
            .registry
            .find(old)
            .ok_or_else(|| RegistryError::NotFound(old.to_string()))?;
        self.store.rename(old, new).map_err(|e| match e {
            StoreError::AlreadyExists(n) => RegistryError::DuplicateName(n),
            other => RegistryError::Storage(format!("{old}: {other}")),
        })?;
        self.registry.rename(old, new)?;

        let mut actions = Vec::new();
        let visible = self
            .registry
            .get(id)
            .is_some_and(|f| f.access().is_visible());
        for (client, state) in self.clients.iter_mut() {
            if let Some(access) = state.visible.remove(old) {
                state.visible.insert(new.to_string(), access);
                if visible {
                    actions.push(Action::send(
                        *client,
                        FilesMessage::ChangeFileName {
                            old: old.to_string(),
                            new: new.to_string(),
                        },
                    ));
                }
            }
        }
        Ok(actions)
    }

    /// Unregister a file entirely.
    pub fn remove_file(&mut self, name: &str) -> Result<Vec<Action>, RegistryError> {
        let id = self
            .registry
            .find(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let actions = self.withdraw(id, name);
        self.registry.unregister(name)?;
        Ok(actions)
    }

    // ===========================================
    // Helpers
    // ===========================================

    /// Tell every client about a visible file.
    fn announce(&mut self, name: &str, access: SharedAccess) -> Vec<Action> {
        let mut actions = Vec::new();
        for (client, state) in self.clients.iter_mut() {
            state.visible.insert(name.to_string(), access);
            actions.push(Action::send(
                *client,
                FilesMessage::UpdateFile {
                    name: name.to_string(),
                    access,
                },
            ));
        }
        actions
    }

    /// Take a file away from every client.
    fn withdraw(&mut self, id: FileId, name: &str) -> Vec<Action> {
        let mut actions = Vec::new();
        if let Some(file) = self.registry.get_mut(id) {
            file.clear_locks();
            file.evict();
        }
        for (client, state) in self.clients.iter_mut() {
            if state.selected_file == Some(id) {
                state.selected_file = None;
                state.selected_line = None;
            }
            state.offsets.clear_file(id);
            if state.visible.remove(name).is_some() {
                actions.push(Action::send(
                    *client,
                    FilesMessage::RemoveFile {
                        name: name.to_string(),
                    },
                ));
            }
        }
        actions
    }

    /// Release every lock on a file that stops being editable.
    fn revoke_locks(&mut self, id: FileId, name: &str, actions: &mut Vec<Action>) {
        let locked: Vec<LineNumber> = match self.registry.get_mut(id) {
            Some(file) => {
                let locked = file.locked_lines().collect();
                file.clear_locks();
                locked
            }
            None => return,
        };
        for state in self.clients.values_mut() {
            if state.selected_file == Some(id) {
                state.selected_line = None;
            }
        }
        for viewer in self.viewers(id, ClientId::host()) {
            for line in &locked {
                actions.push(Action::send(
                    viewer,
                    FilesMessage::UnlockLine {
                        name: name.to_string(),
                        line: *line,
                    },
                ));
            }
        }
    }

    /// Release the client's held lock, notifying other viewers.
    fn release_lock(&mut self, client: ClientId, actions: &mut Vec<Action>) {
        let Some(state) = self.clients.get_mut(&client) else {
            return;
        };
        let (Some(id), Some(line)) = (state.selected_file, state.selected_line.take()) else {
            return;
        };
        let Some(file) = self.registry.get_mut(id) else {
            return;
        };
        if !file.unlock_line(line) {
            return;
        }
        let name = file.name().to_string();
        for viewer in self.viewers(id, client) {
            actions.push(Action::send(
                viewer,
                FilesMessage::UnlockLine {
                    name: name.clone(),
                    line,
                },
            ));
        }
    }

    /// Resolve a client edit to the lock it must hold.
    fn check_lock(
        &mut self,
        client: ClientId,
        name: &str,
        line: LineNumber,
    ) -> Result<(FileId, LineNumber), Vec<Action>> {
        let Some(id) = self.visible_file(name) else {
            return Err(self.penalize(client, Penalty::UnknownFile));
        };
        let editable = self
            .registry
            .get(id)
            .is_some_and(|f| f.access().is_editable());
        let host_line = self.translate(client, id, line);
        let held = self.clients.get(&client).and_then(|s| s.selected_line);
        let owns = self.selected(client) == Some(id)
            && host_line.is_some()
            && held == host_line
            && host_line.is_some_and(|l| self.registry.get(id).is_some_and(|f| f.is_line_locked(l)));
        match host_line {
            Some(host_line) if owns && editable => Ok((id, host_line)),
            _ => {
                let mut actions = self.penalize(client, Penalty::CommitWithoutLock);
                if self.selected(client) == Some(id) {
                    if let Some(state) = self.clients.get_mut(&client) {
                        state.offsets.clear_file(id);
                    }
                    if let Some(message) = self.file_content(id) {
                        actions.push(Action::send(client, message));
                    }
                }
                Err(actions)
            }
        }
    }

    fn issue_offset(
        &mut self,
        client: ClientId,
        file: FileId,
        line: LineNumber,
        delta: isize,
    ) -> OffsetId {
        let id = self.next_offset;
        self.next_offset = id.next();
        if let Some(state) = self.clients.get_mut(&client) {
            state.offsets.issue(PendingOffset {
                id,
                file,
                line,
                delta,
            });
        }
        id
    }

    fn ensure_loaded(&mut self, id: FileId) -> Result<(), StoreError> {
        let name = match self.registry.get(id) {
            Some(file) if file.content().is_none() => file.name().to_string(),
            _ => return Ok(()),
        };
        let text = self.store.load(&name)?;
        if let Some(file) = self.registry.get_mut(id) {
            file.set_content(Content::parse(&text));
        }
        Ok(())
    }

    fn file_content(&self, id: FileId) -> Option<FilesMessage> {
        let file = self.registry.get(id)?;
        let access = file.access().shared()?;
        let content = file.content()?;
        Some(FilesMessage::SetFileCont {
            name: file.name().to_string(),
            access,
            lines: content.lines.clone(),
            locked: file.locked_lines().collect(),
        })
    }

    fn visible_file(&self, name: &str) -> Option<FileId> {
        let id = self.registry.find(name)?;
        self.registry
            .get(id)
            .filter(|f| f.access().is_visible())
            .map(|_| id)
    }

    fn selected(&self, client: ClientId) -> Option<FileId> {
        self.clients.get(&client).and_then(|s| s.selected_file)
    }

    fn translate(&self, client: ClientId, file: FileId, line: LineNumber) -> Option<LineNumber> {
        self.clients.get(&client)?.offsets.translate(file, line)
    }

    fn viewers(&self, file: FileId, except: ClientId) -> Vec<ClientId> {
        let mut viewers: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(id, s)| **id != except && s.selected_file == Some(file))
            .map(|(id, _)| *id)
            .collect();
        viewers.sort();
        viewers
    }
}

/// Build the disconnect notice the I/O layer sends before closing.
pub fn disconnect_notice(reason: &str) -> Message {
    Message::Network(NetworkMessage::Disconnect {
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::workspace::{ClientEvent, Workspace};

    const MAIN: &str = "main.py";

    fn line(n: usize) -> LineNumber {
        LineNumber::from_index(n)
    }

    fn wire(n: usize) -> LineNumber {
        LineNumber::from_wire(n).unwrap()
    }

    fn main_text() -> String {
        (1..=8).map(|i| format!("line{i}\n")).collect()
    }

    fn coordinator() -> Coordinator<MemoryStore> {
        let store = MemoryStore::new()
            .with_file(MAIN, &main_text())
            .with_file("notes.md", "read me\n")
            .with_file("secret.env", "TOKEN=1\n");
        let mut c = Coordinator::new(store);
        c.adopt_file(VirtualFile::new(MAIN, AccessLevel::Edit)).unwrap();
        c.adopt_file(VirtualFile::new("notes.md", AccessLevel::Limit))
            .unwrap();
        c.adopt_file(VirtualFile::new("secret.env", AccessLevel::Hidden))
            .unwrap();
        c
    }

    fn joined(c: &mut Coordinator<MemoryStore>, name: &str) -> ClientId {
        let id = ClientId::new();
        c.join(id, name);
        c.share_files(id);
        id
    }

    fn open(c: &mut Coordinator<MemoryStore>, client: ClientId, name: &str) {
        let actions = c.handle(client, FilesMessage::GetFileCont { name: name.into() });
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::Send { to, message: Message::Files(FilesMessage::SetFileCont { .. }) } if *to == client
        )));
    }

    fn sent_to(actions: &[Action], client: ClientId) -> Vec<FilesMessage> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send {
                    to,
                    message: Message::Files(m),
                } if *to == client => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    fn request(c: &mut Coordinator<MemoryStore>, client: ClientId, at: LineNumber) -> bool {
        let actions = c.handle(
            client,
            FilesMessage::PrepUpdateLine {
                name: MAIN.into(),
                line: at,
            },
        );
        sent_to(&actions, client).iter().any(|m| {
            matches!(m, FilesMessage::ResPrepUpdate { granted: true, line, .. } if *line == at)
        })
    }

    // ===========================================
    // Listing and content
    // ===========================================

    #[test]
    fn hidden_file_never_listed() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let actions = c.handle(alice, FilesMessage::ReqFiles);
        let listed = sent_to(&actions, alice);
        let FilesMessage::ResFiles { files } = &listed[0] else {
            panic!("expected ResFiles");
        };
        assert!(files.iter().all(|f| f.name != "secret.env"));
        assert_eq!(files.len(), 2);
        assert!(c.registry().find("secret.env").is_some());
    }

    #[test]
    fn requesting_hidden_file_costs_trust_and_is_silent() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let actions = c.handle(
            alice,
            FilesMessage::GetFileCont {
                name: "secret.env".into(),
            },
        );
        assert!(actions.is_empty());
        assert_eq!(
            c.client(alice).unwrap().trust().value(),
            50 - Penalty::UnknownFile.cost()
        );
    }

    #[test]
    fn file_content_includes_locks() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let bob = joined(&mut c, "bob");
        open(&mut c, alice, MAIN);
        assert!(request(&mut c, alice, line(2)));

        let actions = c.handle(bob, FilesMessage::GetFileCont { name: MAIN.into() });
        let FilesMessage::SetFileCont { lines, locked, .. } = &sent_to(&actions, bob)[0] else {
            panic!("expected SetFileCont");
        };
        assert_eq!(lines.len(), 8);
        assert_eq!(locked, &vec![line(2)]);
    }

    // ===========================================
    // Locking
    // ===========================================

    #[test]
    fn lock_is_first_writer_wins() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let bob = joined(&mut c, "bob");
        open(&mut c, alice, MAIN);
        open(&mut c, bob, MAIN);

        assert!(request(&mut c, alice, line(4)));
        assert!(!request(&mut c, bob, line(4)));

        let id = c.registry().find(MAIN).unwrap();
        let file = c.registry().get(id).unwrap();
        assert_eq!(file.locked_lines().collect::<Vec<_>>(), vec![line(4)]);
        assert_eq!(c.client(alice).unwrap().selected_line(), Some(line(4)));
        assert_eq!(c.client(bob).unwrap().selected_line(), None);
    }

    #[test]
    fn lock_is_broadcast_to_other_viewers_only() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let bob = joined(&mut c, "bob");
        let carol = joined(&mut c, "carol");
        open(&mut c, alice, MAIN);
        open(&mut c, bob, MAIN);

        let actions = c.handle(
            alice,
            FilesMessage::PrepUpdateLine {
                name: MAIN.into(),
                line: line(1),
            },
        );
        assert_eq!(
            sent_to(&actions, bob),
            vec![FilesMessage::LockLine {
                name: MAIN.into(),
                line: line(1)
            }]
        );
        assert!(sent_to(&actions, carol).is_empty());
    }

    #[test]
    fn selecting_a_new_line_releases_the_old_one() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let bob = joined(&mut c, "bob");
        open(&mut c, alice, MAIN);
        open(&mut c, bob, MAIN);
        assert!(request(&mut c, alice, line(1)));

        let actions = c.handle(
            alice,
            FilesMessage::PrepUpdateLine {
                name: MAIN.into(),
                line: line(3),
            },
        );
        let to_bob = sent_to(&actions, bob);
        assert!(to_bob.contains(&FilesMessage::UnlockLine {
            name: MAIN.into(),
            line: line(1)
        }));
        assert!(to_bob.contains(&FilesMessage::LockLine {
            name: MAIN.into(),
            line: line(3)
        }));
        assert!(request(&mut c, bob, line(1)));
    }

    #[test]
    fn limit_files_cannot_be_locked() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        open(&mut c, alice, "notes.md");
        let actions = c.handle(
            alice,
            FilesMessage::PrepUpdateLine {
                name: "notes.md".into(),
                line: line(0),
            },
        );
        assert!(matches!(
            sent_to(&actions, alice)[0],
            FilesMessage::ResPrepUpdate { granted: false, .. }
        ));
    }

    #[test]
    fn lock_requires_viewing_the_file() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        assert!(!request(&mut c, alice, line(0)));
    }

    #[test]
    fn out_of_range_line_is_denied() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        open(&mut c, alice, MAIN);
        assert!(!request(&mut c, alice, line(8)));
    }

    #[test]
    fn discard_releases_lock() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let bob = joined(&mut c, "bob");
        open(&mut c, alice, MAIN);
        open(&mut c, bob, MAIN);
        assert!(request(&mut c, alice, line(2)));
        let actions = c.handle(
            alice,
            FilesMessage::DisUpdateLine {
                name: MAIN.into(),
                line: line(2),
            },
        );
        assert_eq!(
            sent_to(&actions, bob),
            vec![FilesMessage::UnlockLine {
                name: MAIN.into(),
                line: line(2)
            }]
        );
        assert!(request(&mut c, bob, line(2)));
    }

    #[test]
    fn leaving_releases_lock() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let bob = joined(&mut c, "bob");
        open(&mut c, alice, MAIN);
        open(&mut c, bob, MAIN);
        assert!(request(&mut c, alice, line(2)));
        let actions = c.execute(Command::from_client(alice, Request::Leave));
        assert_eq!(sent_to(&actions, bob).len(), 1);
        assert!(c.client(alice).is_none());
        assert!(request(&mut c, bob, line(2)));
    }

    // ===========================================
    // Commits and offsets
    // ===========================================

    #[test]
    fn full_edit_cycle() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let bob = joined(&mut c, "bob");
        open(&mut c, alice, MAIN);
        open(&mut c, bob, MAIN);

        assert!(request(&mut c, alice, wire(5)));
        let actions = c.handle(
            alice,
            FilesMessage::UpdateLine {
                name: MAIN.into(),
                line: wire(5),
                lines: vec!["l1".into(), "l2".into()],
                offset: None,
            },
        );

        let text = c.store().text(MAIN).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[4], "l1");
        assert_eq!(lines[5], "l2");
        assert_eq!(lines[6], "line6");
        assert_eq!(lines.len(), 9);

        let log = c.store().changes(MAIN).unwrap();
        assert_eq!(log.len(), 1);
        let (_, entry) = log.entries().next().unwrap();
        assert_eq!(entry.line, 5);
        assert_eq!(entry.removed, "line5");
        assert_eq!(entry.added, vec!["l1", "l2"]);

        let to_bob = sent_to(&actions, bob);
        assert_eq!(
            to_bob[0],
            FilesMessage::UnlockLine {
                name: MAIN.into(),
                line: wire(5)
            }
        );
        let FilesMessage::UpdateLine { offset, lines, .. } = &to_bob[1] else {
            panic!("expected UpdateLine");
        };
        assert_eq!(lines.len(), 2);
        let offset = offset.expect("line count changed");
        let pending = c.client(bob).unwrap().offsets().iter().next().copied().unwrap();
        assert_eq!(pending.id, offset);
        assert_eq!(pending.delta, 1);
        assert_eq!(
            sent_to(&actions, alice),
            vec![FilesMessage::ResUpdateLine {
                name: MAIN.into(),
                line: wire(5)
            }]
        );
        assert_eq!(c.client(alice).unwrap().selected_line(), None);
    }

    #[test]
    fn same_count_edit_issues_no_offset() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let bob = joined(&mut c, "bob");
        open(&mut c, alice, MAIN);
        open(&mut c, bob, MAIN);
        assert!(request(&mut c, alice, line(0)));
        let actions = c.handle(
            alice,
            FilesMessage::UpdateLine {
                name: MAIN.into(),
                line: line(0),
                lines: vec!["first".into()],
                offset: None,
            },
        );
        assert!(matches!(
            sent_to(&actions, bob)[1],
            FilesMessage::UpdateLine { offset: None, .. }
        ));
        assert!(c.client(bob).unwrap().offsets().is_empty());
    }

    #[test]
    fn offset_acceptance_is_not_repeatable() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let bob = joined(&mut c, "bob");
        open(&mut c, alice, MAIN);
        open(&mut c, bob, MAIN);
        assert!(request(&mut c, alice, line(3)));
        c.handle(
            alice,
            FilesMessage::UpdateLine {
                name: MAIN.into(),
                line: line(3),
                lines: vec!["a".into(), "b".into(), "c".into()],
                offset: None,
            },
        );
        let offset = c.client(bob).unwrap().offsets().iter().next().unwrap().id;

        assert!(c
            .handle(bob, FilesMessage::ApplyUpdateLine { offset })
            .is_empty());
        assert_eq!(c.client(bob).unwrap().trust().value(), 50);

        c.handle(bob, FilesMessage::ApplyUpdateLine { offset });
        assert_eq!(
            c.client(bob).unwrap().trust().value(),
            50 - Penalty::BadOffsetAck.cost()
        );
    }

    #[test]
    fn stale_line_numbers_are_translated() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let bob = joined(&mut c, "bob");
        open(&mut c, alice, MAIN);
        open(&mut c, bob, MAIN);

        // bob holds line 7 (host numbering) while alice inserts above it
        assert!(request(&mut c, bob, line(6)));
        assert!(request(&mut c, alice, line(1)));
        c.handle(
            alice,
            FilesMessage::UpdateLine {
                name: MAIN.into(),
                line: line(1),
                lines: vec!["x".into(), "y".into()],
                offset: None,
            },
        );
        assert_eq!(c.client(bob).unwrap().selected_line(), Some(line(7)));

        // bob has not applied the offset yet and still says line 6
        c.handle(
            bob,
            FilesMessage::UpdateLine {
                name: MAIN.into(),
                line: line(6),
                lines: vec!["edited".into()],
                offset: None,
            },
        );
        let text = c.store().text(MAIN).unwrap();
        assert_eq!(text.lines().nth(7), Some("edited"));
        assert_eq!(text.lines().nth(6), Some("line6"));
        assert_eq!(c.client(bob).unwrap().trust().value(), 51);
    }

    #[test]
    fn commit_without_lock_is_rejected() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        open(&mut c, alice, MAIN);
        let actions = c.handle(
            alice,
            FilesMessage::UpdateLine {
                name: MAIN.into(),
                line: line(0),
                lines: vec!["sneaky".into()],
                offset: None,
            },
        );
        assert_eq!(c.store().text(MAIN), Some(main_text().as_str()));
        assert_eq!(
            c.client(alice).unwrap().trust().value(),
            50 - Penalty::CommitWithoutLock.cost()
        );
        assert!(matches!(
            sent_to(&actions, alice)[0],
            FilesMessage::SetFileCont { .. }
        ));
    }

    #[test]
    fn empty_replacement_is_rejected() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        open(&mut c, alice, MAIN);
        assert!(request(&mut c, alice, line(0)));
        c.handle(
            alice,
            FilesMessage::UpdateLine {
                name: MAIN.into(),
                line: line(0),
                lines: vec![],
                offset: None,
            },
        );
        assert_eq!(c.store().text(MAIN), Some(main_text().as_str()));
        assert!(c.store().changes(MAIN).is_none());
    }

    #[test]
    fn change_log_counts_successful_commits() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        open(&mut c, alice, MAIN);
        for i in 0..5 {
            assert!(request(&mut c, alice, line(i)));
            c.handle(
                alice,
                FilesMessage::UpdateLine {
                    name: MAIN.into(),
                    line: line(i),
                    lines: vec![format!("edit{i}")],
                    offset: None,
                },
            );
        }
        // a rejected commit adds nothing
        c.handle(
            alice,
            FilesMessage::UpdateLine {
                name: MAIN.into(),
                line: line(0),
                lines: vec!["nope".into()],
                offset: None,
            },
        );
        assert_eq!(c.store().changes(MAIN).unwrap().len(), 5);
    }

    #[test]
    fn failed_write_releases_lock_and_keeps_content() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let bob = joined(&mut c, "bob");
        open(&mut c, alice, MAIN);
        open(&mut c, bob, MAIN);
        assert!(request(&mut c, alice, line(0)));
        c.store_mut().fail_writes(true);

        let actions = c.handle(
            alice,
            FilesMessage::UpdateLine {
                name: MAIN.into(),
                line: line(0),
                lines: vec!["lost".into()],
                offset: None,
            },
        );
        assert!(c.last_error().unwrap().contains("writing main.py"));
        assert!(sent_to(&actions, bob).contains(&FilesMessage::UnlockLine {
            name: MAIN.into(),
            line: line(0)
        }));
        let id = c.registry().find(MAIN).unwrap();
        let file = c.registry().get(id).unwrap();
        assert!(!file.is_line_locked(line(0)));
        assert_eq!(file.content().unwrap().lines[0], "line1");
    }

    #[test]
    fn delete_requires_blank_line() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        open(&mut c, alice, MAIN);
        assert!(request(&mut c, alice, line(2)));
        c.handle(
            alice,
            FilesMessage::DelLine {
                name: MAIN.into(),
                line: line(2),
                offset: None,
            },
        );
        assert_eq!(c.store().text(MAIN), Some(main_text().as_str()));

        // blank the line first, then delete it
        assert!(request(&mut c, alice, line(2)));
        c.handle(
            alice,
            FilesMessage::UpdateLine {
                name: MAIN.into(),
                line: line(2),
                lines: vec!["".into()],
                offset: None,
            },
        );
        let bob = joined(&mut c, "bob");
        open(&mut c, bob, MAIN);
        assert!(request(&mut c, alice, line(2)));
        let actions = c.handle(
            alice,
            FilesMessage::DelLine {
                name: MAIN.into(),
                line: line(2),
                offset: None,
            },
        );
        assert_eq!(c.store().text(MAIN).unwrap().lines().count(), 7);
        let FilesMessage::DelLine { offset, .. } = &sent_to(&actions, bob)[1] else {
            panic!("expected DelLine");
        };
        assert!(offset.is_some());
        assert_eq!(c.client(bob).unwrap().offsets().iter().next().unwrap().delta, -1);
    }

    #[test]
    fn later_locks_shift_with_the_commit() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let bob = joined(&mut c, "bob");
        open(&mut c, alice, MAIN);
        open(&mut c, bob, MAIN);
        assert!(request(&mut c, bob, line(5)));
        assert!(request(&mut c, alice, line(0)));
        c.handle(
            alice,
            FilesMessage::UpdateLine {
                name: MAIN.into(),
                line: line(0),
                lines: vec!["a".into(), "b".into(), "c".into()],
                offset: None,
            },
        );
        let id = c.registry().find(MAIN).unwrap();
        assert_eq!(
            c.registry().get(id).unwrap().locked_lines().collect::<Vec<_>>(),
            vec![line(7)]
        );
    }

    // ===========================================
    // Trust
    // ===========================================

    #[test]
    fn exhausted_trust_disconnects() {
        let mut c = coordinator().with_initial_trust(10);
        let alice = joined(&mut c, "alice");
        let actions = c.execute(Command::from_client(alice, Request::Penalize(Penalty::RateLimited)));
        assert!(actions.is_empty());
        let actions = c.execute(Command::from_client(alice, Request::Penalize(Penalty::RateLimited)));
        assert_eq!(
            actions,
            vec![Action::Disconnect {
                client: alice,
                reason: "trust exhausted".into()
            }]
        );
    }

    // ===========================================
    // Host requests
    // ===========================================

    #[test]
    fn hiding_a_file_removes_it_from_clients() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let bob = joined(&mut c, "bob");
        open(&mut c, alice, MAIN);
        assert!(request(&mut c, alice, line(0)));

        let actions = c.execute(Command::from_host(Request::SetAccess {
            name: MAIN.into(),
            access: AccessLevel::Hidden,
        }));
        for client in [alice, bob] {
            assert_eq!(
                sent_to(&actions, client),
                vec![FilesMessage::RemoveFile { name: MAIN.into() }]
            );
        }
        assert_eq!(c.client(alice).unwrap().selected_file(), None);
        assert!(c.registry().shared().iter().all(|f| f.name != MAIN));
    }

    #[test]
    fn limiting_a_file_revokes_locks() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let bob = joined(&mut c, "bob");
        open(&mut c, alice, MAIN);
        open(&mut c, bob, MAIN);
        assert!(request(&mut c, alice, line(3)));

        let actions = c
            .set_access(MAIN, AccessLevel::Limit)
            .unwrap();
        let to_alice = sent_to(&actions, alice);
        assert!(to_alice.contains(&FilesMessage::UnlockLine {
            name: MAIN.into(),
            line: line(3)
        }));
        assert!(to_alice.contains(&FilesMessage::UpdateFile {
            name: MAIN.into(),
            access: SharedAccess::Limit
        }));
        assert_eq!(c.client(alice).unwrap().selected_line(), None);
        assert!(!request(&mut c, bob, line(3)));
    }

    #[test]
    fn registering_a_file_announces_it() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let actions = c.register_file("new.rs", AccessLevel::Edit).unwrap();
        assert_eq!(
            sent_to(&actions, alice),
            vec![FilesMessage::UpdateFile {
                name: "new.rs".into(),
                access: SharedAccess::Edit
            }]
        );
        assert_eq!(c.store().text("new.rs"), Some(""));
        assert!(c.register_file("hidden.rs", AccessLevel::Hidden).unwrap().is_empty());
        assert!(matches!(
            c.register_file("new.rs", AccessLevel::Edit),
            Err(RegistryError::DuplicateName(_))
        ));
    }

    #[test]
    fn rename_is_announced_and_keeps_viewers() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        open(&mut c, alice, MAIN);
        let actions = c.rename_file(MAIN, "app.py").unwrap();
        assert_eq!(
            sent_to(&actions, alice),
            vec![FilesMessage::ChangeFileName {
                old: MAIN.into(),
                new: "app.py".into()
            }]
        );
        assert_eq!(c.store().text("app.py"), Some(main_text().as_str()));
        let id = c.registry().find("app.py").unwrap();
        assert_eq!(c.client(alice).unwrap().selected_file(), Some(id));
    }

    #[test]
    fn failed_host_request_is_recorded() {
        let mut c = coordinator();
        let actions = c.execute(Command::from_host(Request::RenameFile {
            old: "missing.txt".into(),
            new: "other.txt".into(),
        }));
        assert!(actions.is_empty());
        assert!(c.last_error().unwrap().contains("missing.txt"));
        assert!(c.take_last_error().is_some());
        assert!(c.last_error().is_none());
    }

    #[test]
    fn removing_a_file_invalidates_selection() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        open(&mut c, alice, MAIN);
        c.remove_file(MAIN).unwrap();
        assert!(c.registry().find(MAIN).is_none());
        assert_eq!(c.client(alice).unwrap().selected_file(), None);
    }

    // ===========================================
    // Client views
    // ===========================================

    fn deliver(ws: &mut Workspace, actions: &[Action], client: ClientId) -> Vec<ClientEvent> {
        sent_to(actions, client)
            .into_iter()
            .flat_map(|m| ws.apply(m))
            .collect()
    }

    fn host_lines(c: &Coordinator<MemoryStore>) -> Vec<String> {
        c.store().text(MAIN).unwrap().lines().map(String::from).collect()
    }

    /// Alice's workspace with line `at` granted.
    fn editing(c: &mut Coordinator<MemoryStore>, alice: ClientId, at: LineNumber) -> Workspace {
        let mut ws = Workspace::new();
        ws.apply(FilesMessage::ResFiles {
            files: c.share_files(alice),
        });
        let get = ws.request_file(MAIN).unwrap();
        let actions = c.handle(alice, get);
        deliver(&mut ws, &actions, alice);
        let prep = ws.request_line(at).unwrap();
        let actions = c.handle(alice, prep);
        assert_eq!(
            deliver(&mut ws, &actions, alice),
            vec![ClientEvent::LineGranted { line: at }]
        );
        ws
    }

    #[test]
    fn commit_in_flight_while_another_edit_lands() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let bob = joined(&mut c, "bob");
        let mut ws = editing(&mut c, alice, wire(2));
        open(&mut c, bob, MAIN);

        ws.extend_block().unwrap();
        let in_flight = ws.commit(vec!["a1".into(), "a2".into()]).unwrap();
        assert_eq!(ws.unconfirmed_commits(), 1);

        // bob's edit reaches the host first and is numbered without alice's lines
        let actions = c.handle(
            bob,
            FilesMessage::PrepUpdateLine {
                name: MAIN.into(),
                line: wire(6),
            },
        );
        deliver(&mut ws, &actions, alice);
        assert!(ws.local().unwrap().is_line_locked(wire(7)));
        let actions = c.handle(
            bob,
            FilesMessage::UpdateLine {
                name: MAIN.into(),
                line: wire(6),
                lines: vec!["b6".into()],
                offset: None,
            },
        );
        deliver(&mut ws, &actions, alice);

        let actions = c.handle(alice, in_flight);
        assert_eq!(
            deliver(&mut ws, &actions, alice),
            vec![ClientEvent::CommitConfirmed { line: wire(2) }]
        );
        assert_eq!(ws.unconfirmed_commits(), 0);

        let host = host_lines(&c);
        assert_eq!(host[6], "b6");
        assert_eq!(ws.local().unwrap().lines(), host.as_slice());
        assert!(!ws.local().unwrap().is_line_locked(wire(7)));
    }

    #[test]
    fn commit_in_flight_while_an_insert_lands() {
        let mut c = coordinator();
        let alice = joined(&mut c, "alice");
        let bob = joined(&mut c, "bob");
        let mut ws = editing(&mut c, alice, wire(2));
        open(&mut c, bob, MAIN);

        ws.extend_block().unwrap();
        let in_flight = ws.commit(vec!["a1".into(), "a2".into()]).unwrap();

        assert!(request(&mut c, bob, wire(6)));
        let actions = c.handle(
            bob,
            FilesMessage::UpdateLine {
                name: MAIN.into(),
                line: wire(6),
                lines: vec!["b6".into(), "b7".into()],
                offset: None,
            },
        );
        let events = deliver(&mut ws, &actions, alice);
        let Some(ClientEvent::OffsetPending { offset, line, .. }) = events.last().cloned() else {
            panic!("expected a pending offset, got {events:?}");
        };
        assert_eq!(line, wire(7));

        let actions = c.handle(alice, in_flight);
        deliver(&mut ws, &actions, alice);
        let (ack, _) = ws.accept_offset(offset).unwrap();
        assert!(c.handle(alice, ack).is_empty());

        let host = host_lines(&c);
        assert_eq!(host.len(), 10);
        assert_eq!(ws.local().unwrap().lines(), host.as_slice());
        assert!(c.client(alice).unwrap().offsets().is_empty());
    }
}
