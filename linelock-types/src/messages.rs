//! Typed protocol commands.
//!
//! Each protocol family has a closed command table. Decoding an unknown
//! name yields [`WireError::UnknownCommand`] so the receiver can drop it
//! without replying.

use crate::wire::{self, Protocol, RawCommand};
use crate::{LineNumber, OffsetId, SharedAccess, WireError};

/// One entry in a file listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// File name including extension.
    pub name: String,
    /// Access level as seen by clients.
    pub access: SharedAccess,
}

/// Command names of the files protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilesCommand {
    /// Client asks for the shared file list.
    ReqFiles,
    /// Host answers with the shared file list.
    ResFiles,
    /// Client asks for one file's content.
    GetFileCont,
    /// Host delivers one file's content.
    SetFileCont,
    /// Client asks to lock a line.
    PrepUpdateLine,
    /// Host answers a lock request.
    ResPrepUpdate,
    /// Host tells viewers a line is now locked.
    LockLine,
    /// Host tells viewers a line is free again.
    UnlockLine,
    /// Client commit, or host broadcast of one.
    UpdateLine,
    /// Client delete request, or host broadcast of one.
    DelLine,
    /// Client abandons its lock.
    DisUpdateLine,
    /// Host announces a new or re-leveled file.
    UpdateFile,
    /// Host withdraws a file.
    RemoveFile,
    /// Host announces a rename.
    ChangeFileName,
    /// Client acknowledges an offset.
    ApplyUpdateLine,
    /// Host confirms an applied commit to its author.
    ResUpdateLine,
}

impl FilesCommand {
    /// All command names, in table order.
    pub const ALL: [FilesCommand; 16] = [
        Self::ReqFiles,
        Self::ResFiles,
        Self::GetFileCont,
        Self::SetFileCont,
        Self::PrepUpdateLine,
        Self::ResPrepUpdate,
        Self::LockLine,
        Self::UnlockLine,
        Self::UpdateLine,
        Self::DelLine,
        Self::DisUpdateLine,
        Self::UpdateFile,
        Self::RemoveFile,
        Self::ChangeFileName,
        Self::ApplyUpdateLine,
        Self::ResUpdateLine,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReqFiles => "ReqFiles",
            Self::ResFiles => "ResFiles",
            Self::GetFileCont => "GetFileCont",
            Self::SetFileCont => "SetFileCont",
            Self::PrepUpdateLine => "PrepUpdateLine",
            Self::ResPrepUpdate => "ResPrepUpdate",
            Self::LockLine => "LockLine",
            Self::UnlockLine => "UnlockLine",
            Self::UpdateLine => "UpdateLine",
            Self::DelLine => "DelLine",
            Self::DisUpdateLine => "DisUpdateLine",
            Self::UpdateFile => "UpdateFile",
            Self::RemoveFile => "RemoveFile",
            Self::ChangeFileName => "ChangeFileName",
            Self::ApplyUpdateLine => "ApplyUpdateLine",
            Self::ResUpdateLine => "ResUpdateLine",
        }
    }

    /// Look up a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

/// Files protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilesMessage {
    /// Request the shared file list.
    ReqFiles,
    /// The shared file list.
    ResFiles {
        /// Visible files.
        files: Vec<FileEntry>,
    },
    /// Request file content.
    GetFileCont {
        /// File name.
        name: String,
    },
    /// File content and current lock state.
    SetFileCont {
        /// File name.
        name: String,
        /// Access level.
        access: SharedAccess,
        /// Content lines.
        lines: Vec<String>,
        /// Lines currently locked by other clients.
        locked: Vec<LineNumber>,
    },
    /// Request a line lock.
    PrepUpdateLine {
        /// File name.
        name: String,
        /// Requested line.
        line: LineNumber,
    },
    /// Lock request outcome.
    ResPrepUpdate {
        /// File name.
        name: String,
        /// Requested line.
        line: LineNumber,
        /// Whether the lock was granted.
        granted: bool,
    },
    /// A line became locked.
    LockLine {
        /// File name.
        name: String,
        /// Locked line.
        line: LineNumber,
    },
    /// A line became free.
    UnlockLine {
        /// File name.
        name: String,
        /// Released line.
        line: LineNumber,
    },
    /// Replace one line with `lines`.
    UpdateLine {
        /// File name.
        name: String,
        /// Replaced line.
        line: LineNumber,
        /// Replacement lines.
        lines: Vec<String>,
        /// Offset to acknowledge, set only on host broadcasts that shift lines.
        offset: Option<OffsetId>,
    },
    /// Delete one line.
    DelLine {
        /// File name.
        name: String,
        /// Deleted line.
        line: LineNumber,
        /// Offset to acknowledge, set only on host broadcasts.
        offset: Option<OffsetId>,
    },
    /// Abandon a held lock.
    DisUpdateLine {
        /// File name.
        name: String,
        /// Released line.
        line: LineNumber,
    },
    /// A file was registered or its access level changed.
    UpdateFile {
        /// File name.
        name: String,
        /// New access level.
        access: SharedAccess,
    },
    /// A file is no longer shared.
    RemoveFile {
        /// File name.
        name: String,
    },
    /// A file was renamed.
    ChangeFileName {
        /// Previous name.
        old: String,
        /// New name.
        new: String,
    },
    /// Acknowledge an offset.
    ApplyUpdateLine {
        /// Acknowledged offset.
        offset: OffsetId,
    },
    /// The author's own commit was applied.
    ResUpdateLine {
        /// File name.
        name: String,
        /// Line the commit landed on, in host numbering.
        line: LineNumber,
    },
}

impl FilesMessage {
    /// Command name of this message.
    pub fn command(&self) -> FilesCommand {
        match self {
            Self::ReqFiles => FilesCommand::ReqFiles,
            Self::ResFiles { .. } => FilesCommand::ResFiles,
            Self::GetFileCont { .. } => FilesCommand::GetFileCont,
            Self::SetFileCont { .. } => FilesCommand::SetFileCont,
            Self::PrepUpdateLine { .. } => FilesCommand::PrepUpdateLine,
            Self::ResPrepUpdate { .. } => FilesCommand::ResPrepUpdate,
            Self::LockLine { .. } => FilesCommand::LockLine,
            Self::UnlockLine { .. } => FilesCommand::UnlockLine,
            Self::UpdateLine { .. } => FilesCommand::UpdateLine,
            Self::DelLine { .. } => FilesCommand::DelLine,
            Self::DisUpdateLine { .. } => FilesCommand::DisUpdateLine,
            Self::UpdateFile { .. } => FilesCommand::UpdateFile,
            Self::RemoveFile { .. } => FilesCommand::RemoveFile,
            Self::ChangeFileName { .. } => FilesCommand::ChangeFileName,
            Self::ApplyUpdateLine { .. } => FilesCommand::ApplyUpdateLine,
            Self::ResUpdateLine { .. } => FilesCommand::ResUpdateLine,
        }
    }

    /// The file this message is about, if any.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Self::ReqFiles | Self::ResFiles { .. } | Self::ApplyUpdateLine { .. } => None,
            Self::ChangeFileName { old, .. } => Some(old),
            Self::GetFileCont { name }
            | Self::SetFileCont { name, .. }
            | Self::PrepUpdateLine { name, .. }
            | Self::ResPrepUpdate { name, .. }
            | Self::LockLine { name, .. }
            | Self::UnlockLine { name, .. }
            | Self::UpdateLine { name, .. }
            | Self::DelLine { name, .. }
            | Self::DisUpdateLine { name, .. }
            | Self::ResUpdateLine { name, .. }
            | Self::UpdateFile { name, .. }
            | Self::RemoveFile { name } => Some(name),
        }
    }

    fn into_raw(self) -> RawCommand {
        let command = self.command();
        let args: Vec<Vec<u8>> = match self {
            Self::ReqFiles => Vec::new(),
            Self::ResFiles { files } => files
                .into_iter()
                .flat_map(|f| [f.name.into_bytes(), f.access.as_str().as_bytes().to_vec()])
                .collect(),
            Self::GetFileCont { name } | Self::RemoveFile { name } => vec![name.into_bytes()],
            Self::SetFileCont {
                name,
                access,
                lines,
                locked,
            } => {
                let locked = locked
                    .iter()
                    .map(|l| l.to_wire().to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                let mut args = vec![
                    name.into_bytes(),
                    access.as_str().as_bytes().to_vec(),
                    locked.into_bytes(),
                ];
                args.extend(lines.into_iter().map(String::into_bytes));
                args
            }
            Self::PrepUpdateLine { name, line }
            | Self::LockLine { name, line }
            | Self::UnlockLine { name, line }
            | Self::DisUpdateLine { name, line }
            | Self::ResUpdateLine { name, line } => vec![name.into_bytes(), line_arg(line)],
            Self::ResPrepUpdate {
                name,
                line,
                granted,
            } => vec![name.into_bytes(), line_arg(line), flag_arg(granted)],
            Self::UpdateLine {
                name,
                line,
                lines,
                offset,
            } => {
                let mut args = vec![
                    name.into_bytes(),
                    line_arg(line),
                    offset_arg(offset),
                    lines.len().to_string().into_bytes(),
                ];
                args.extend(lines.into_iter().map(String::into_bytes));
                args
            }
            Self::DelLine { name, line, offset } => {
                vec![name.into_bytes(), line_arg(line), offset_arg(offset)]
            }
            Self::UpdateFile { name, access } => {
                vec![name.into_bytes(), access.as_str().as_bytes().to_vec()]
            }
            Self::ChangeFileName { old, new } => vec![old.into_bytes(), new.into_bytes()],
            Self::ApplyUpdateLine { offset } => vec![offset.to_string().into_bytes()],
        };
        RawCommand::new(Protocol::Files, command.as_str(), args)
    }

    fn from_raw(raw: RawCommand) -> Result<Self, WireError> {
        let command =
            FilesCommand::from_name(&raw.name).ok_or_else(|| WireError::UnknownCommand {
                protocol: Protocol::Files.header(),
                name: raw.name.clone(),
            })?;
        let name = command.as_str();
        let mut args = Args::new(name, raw.args);

        let message = match command {
            FilesCommand::ReqFiles => Self::ReqFiles,
            FilesCommand::ResFiles => {
                let mut files = Vec::new();
                while !args.is_empty() {
                    let name = args.text()?;
                    let access = SharedAccess::parse(&args.text()?)?;
                    files.push(FileEntry { name, access });
                }
                Self::ResFiles { files }
            }
            FilesCommand::GetFileCont => Self::GetFileCont { name: args.text()? },
            FilesCommand::SetFileCont => {
                let name = args.text()?;
                let access = SharedAccess::parse(&args.text()?)?;
                let locked_text = args.text()?;
                let locked = if locked_text.is_empty() {
                    Vec::new()
                } else {
                    locked_text
                        .split(',')
                        .map(LineNumber::parse_wire)
                        .collect::<Result<Vec<_>, _>>()?
                };
                let lines = args.rest_text()?;
                Self::SetFileCont {
                    name,
                    access,
                    lines,
                    locked,
                }
            }
            FilesCommand::PrepUpdateLine => Self::PrepUpdateLine {
                name: args.text()?,
                line: args.line()?,
            },
            FilesCommand::ResPrepUpdate => Self::ResPrepUpdate {
                name: args.text()?,
                line: args.line()?,
                granted: args.flag()?,
            },
            FilesCommand::LockLine => Self::LockLine {
                name: args.text()?,
                line: args.line()?,
            },
            FilesCommand::UnlockLine => Self::UnlockLine {
                name: args.text()?,
                line: args.line()?,
            },
            FilesCommand::UpdateLine => {
                let file = args.text()?;
                let line = args.line()?;
                let offset = args.optional_offset()?;
                let count_text = args.text()?;
                let count = count_text
                    .parse::<usize>()
                    .map_err(|_| args.invalid(format!("bad line count {count_text:?}")))?;
                let lines = args.rest_text()?;
                if lines.len() != count {
                    return Err(args.invalid(format!(
                        "declared {count} lines but carried {}",
                        lines.len()
                    )));
                }
                Self::UpdateLine {
                    name: file,
                    line,
                    lines,
                    offset,
                }
            }
            FilesCommand::DelLine => Self::DelLine {
                name: args.text()?,
                line: args.line()?,
                offset: args.optional_offset()?,
            },
            FilesCommand::DisUpdateLine => Self::DisUpdateLine {
                name: args.text()?,
                line: args.line()?,
            },
            FilesCommand::UpdateFile => Self::UpdateFile {
                name: args.text()?,
                access: SharedAccess::parse(&args.text()?)?,
            },
            FilesCommand::RemoveFile => Self::RemoveFile { name: args.text()? },
            FilesCommand::ChangeFileName => Self::ChangeFileName {
                old: args.text()?,
                new: args.text()?,
            },
            FilesCommand::ApplyUpdateLine => Self::ApplyUpdateLine {
                offset: args.text()?.parse()?,
            },
            FilesCommand::ResUpdateLine => Self::ResUpdateLine {
                name: args.text()?,
                line: args.line()?,
            },
        };
        args.finish()?;
        Ok(message)
    }
}

/// Command names of the registration protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationCommand {
    /// Create an account.
    RegCMDUser,
    /// Log into an existing account.
    LogCMDUser,
    /// Host verdict.
    RegRes,
}

impl RegistrationCommand {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RegCMDUser => "RegCMDUser",
            Self::LogCMDUser => "LogCMDUser",
            Self::RegRes => "RegRes",
        }
    }

    /// Look up a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::RegCMDUser, Self::LogCMDUser, Self::RegRes]
            .into_iter()
            .find(|c| c.as_str() == name)
    }
}

/// Registration protocol message.
///
/// Credential bodies are sealed to the host's key before they are placed
/// in the message, so they are opaque bytes at this layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationMessage {
    /// Sealed [`Credentials`] for a new account.
    RegCMDUser {
        /// Sealed credentials.
        sealed: Vec<u8>,
    },
    /// Sealed [`Credentials`] for a login.
    LogCMDUser {
        /// Sealed credentials.
        sealed: Vec<u8>,
    },
    /// Host verdict.
    RegRes {
        /// Whether the request succeeded.
        accepted: bool,
        /// Failure reason, or the stored fields JSON on login success.
        detail: String,
    },
}

impl RegistrationMessage {
    fn command(&self) -> RegistrationCommand {
        match self {
            Self::RegCMDUser { .. } => RegistrationCommand::RegCMDUser,
            Self::LogCMDUser { .. } => RegistrationCommand::LogCMDUser,
            Self::RegRes { .. } => RegistrationCommand::RegRes,
        }
    }

    fn into_raw(self) -> RawCommand {
        let command = self.command();
        let args = match self {
            Self::RegCMDUser { sealed } | Self::LogCMDUser { sealed } => vec![sealed],
            Self::RegRes { accepted, detail } => vec![flag_arg(accepted), detail.into_bytes()],
        };
        RawCommand::new(Protocol::Registration, command.as_str(), args)
    }

    fn from_raw(raw: RawCommand) -> Result<Self, WireError> {
        let command = RegistrationCommand::from_name(&raw.name).ok_or_else(|| {
            WireError::UnknownCommand {
                protocol: Protocol::Registration.header(),
                name: raw.name.clone(),
            }
        })?;
        let mut args = Args::new(command.as_str(), raw.args);
        let message = match command {
            RegistrationCommand::RegCMDUser => Self::RegCMDUser {
                sealed: args.bytes()?,
            },
            RegistrationCommand::LogCMDUser => Self::LogCMDUser {
                sealed: args.bytes()?,
            },
            RegistrationCommand::RegRes => Self::RegRes {
                accepted: args.flag()?,
                detail: args.text()?,
            },
        };
        args.finish()?;
        Ok(message)
    }
}

/// Username, password and free-form fields carried inside a sealed body.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Requested username.
    pub username: String,
    /// Plaintext password.
    pub password: String,
    /// JSON object of extra fields.
    pub fields: String,
}

impl Credentials {
    /// Encode as `b64(user)->b64(password)->b64(fields)`.
    pub fn to_bytes(&self) -> Vec<u8> {
        wire::encode_fields(&[
            self.username.as_bytes(),
            self.password.as_bytes(),
            self.fields.as_bytes(),
        ])
        .into_bytes()
    }

    /// Decode a body produced by [`Credentials::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8)?;
        let mut args = Args::new("credentials", wire::decode_fields(text)?);
        let credentials = Self {
            username: args.text()?,
            password: args.text()?,
            fields: args.text()?,
        };
        args.finish()?;
        Ok(credentials)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("fields", &self.fields)
            .finish()
    }
}

/// Network protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMessage {
    /// Orderly session close with a human-readable reason.
    Disconnect {
        /// Why the session is closing.
        reason: String,
    },
}

impl NetworkMessage {
    fn into_raw(self) -> RawCommand {
        match self {
            Self::Disconnect { reason } => {
                RawCommand::new(Protocol::Network, "Disconnect", vec![reason.into_bytes()])
            }
        }
    }

    fn from_raw(raw: RawCommand) -> Result<Self, WireError> {
        match raw.name.as_str() {
            "Disconnect" => {
                let mut args = Args::new("Disconnect", raw.args);
                let reason = args.text()?;
                args.finish()?;
                Ok(Self::Disconnect { reason })
            }
            _ => Err(WireError::UnknownCommand {
                protocol: Protocol::Network.header(),
                name: raw.name,
            }),
        }
    }
}

/// Any protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Files protocol.
    Files(FilesMessage),
    /// Registration protocol.
    Registration(RegistrationMessage),
    /// Network protocol.
    Network(NetworkMessage),
}

impl Message {
    /// Protocol family of this message.
    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Files(_) => Protocol::Files,
            Self::Registration(_) => Protocol::Registration,
            Self::Network(_) => Protocol::Network,
        }
    }

    /// Encode to wire text.
    pub fn to_wire(&self) -> String {
        let raw = match self.clone() {
            Self::Files(m) => m.into_raw(),
            Self::Registration(m) => m.into_raw(),
            Self::Network(m) => m.into_raw(),
        };
        raw.encode()
    }

    /// Decode wire text.
    pub fn from_wire(text: &str) -> Result<Self, WireError> {
        let raw = RawCommand::parse(text)?;
        match raw.protocol {
            Protocol::Files => FilesMessage::from_raw(raw).map(Self::Files),
            Protocol::Registration => RegistrationMessage::from_raw(raw).map(Self::Registration),
            Protocol::Network => NetworkMessage::from_raw(raw).map(Self::Network),
        }
    }
}

impl From<FilesMessage> for Message {
    fn from(value: FilesMessage) -> Self {
        Self::Files(value)
    }
}

impl From<RegistrationMessage> for Message {
    fn from(value: RegistrationMessage) -> Self {
        Self::Registration(value)
    }
}

impl From<NetworkMessage> for Message {
    fn from(value: NetworkMessage) -> Self {
        Self::Network(value)
    }
}

fn line_arg(line: LineNumber) -> Vec<u8> {
    line.to_wire().to_string().into_bytes()
}

fn flag_arg(flag: bool) -> Vec<u8> {
    if flag { b"1".to_vec() } else { b"0".to_vec() }
}

fn offset_arg(offset: Option<OffsetId>) -> Vec<u8> {
    offset.map(|o| o.to_string().into_bytes()).unwrap_or_default()
}

/// Sequential argument reader.
struct Args {
    command: &'static str,
    items: std::vec::IntoIter<Vec<u8>>,
    index: usize,
}

impl Args {
    fn new(command: &'static str, items: Vec<Vec<u8>>) -> Self {
        Self {
            command,
            items: items.into_iter(),
            index: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.items.len() == 0
    }

    fn bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let item = self.items.next().ok_or(WireError::MissingArgument {
            command: self.command,
            index: self.index,
        })?;
        self.index += 1;
        Ok(item)
    }

    fn text(&mut self) -> Result<String, WireError> {
        String::from_utf8(self.bytes()?).map_err(|_| WireError::InvalidUtf8)
    }

    fn rest_text(&mut self) -> Result<Vec<String>, WireError> {
        let mut out = Vec::with_capacity(self.items.len());
        while !self.is_empty() {
            out.push(self.text()?);
        }
        Ok(out)
    }

    fn line(&mut self) -> Result<LineNumber, WireError> {
        LineNumber::parse_wire(&self.text()?)
    }

    fn flag(&mut self) -> Result<bool, WireError> {
        match self.text()?.as_str() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(self.invalid(format!("bad flag {other:?}"))),
        }
    }

    fn optional_offset(&mut self) -> Result<Option<OffsetId>, WireError> {
        let text = self.text()?;
        if text.is_empty() {
            Ok(None)
        } else {
            text.parse().map(Some)
        }
    }

    fn invalid(&self, reason: String) -> WireError {
        WireError::InvalidArgument {
            command: self.command,
            reason,
        }
    }

    fn finish(self) -> Result<(), WireError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self.invalid(format!("{} unexpected trailing argument(s)", self.items.len())))
        }
    }
}
