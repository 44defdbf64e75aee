//! Encrypted flat-file registration database.
//!
//! Layout under the database directory:
//!
//! - `index.unk`: JSON `{ host username: { client username: uuid } }`
//! - `<uuid>.unk`: one user record, JSON `{ "salt": b64, "data": b64 }`
//!   where `data` is the XChaCha20-Poly1305 encryption (nonce prepended)
//!   of the serialized [`UserRecord`]
//!
//! Each record is encrypted under a key derived with Argon2id from the
//! database secret and the record's own salt, with the record's uuid as
//! associated data so records cannot be swapped between files. Passwords
//! are stored as Argon2id PHC strings inside the record.
//!
//! Every file is written to a temporary sibling and renamed into place.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use linelock_channel::crypto::{derive_key, random_bytes};
use linelock_channel::KdfParams;
use linelock_core::{validate_password, validate_username};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{DatabaseError, DatabaseResult};

/// Index file name.
pub const INDEX_FILE: &str = "index.unk";

/// Record file extension.
pub const RECORD_EXTENSION: &str = "unk";

/// Per-record salt length.
const SALT_SIZE: usize = 16;

type Index = BTreeMap<String, BTreeMap<String, Uuid>>;

/// Decrypted contents of a user record.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Seconds since the Unix epoch at registration.
    pub created_at: u64,
    /// Host username the account was created under.
    pub creator: String,
    /// Argon2id PHC string.
    pub password_hash: String,
    /// Free-form extra fields.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl std::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRecord")
            .field("created_at", &self.created_at)
            .field("creator", &self.creator)
            .field("password_hash", &"[REDACTED]")
            .field("fields", &self.fields)
            .finish()
    }
}

/// On-disk envelope of an encrypted record.
#[derive(Serialize, Deserialize)]
struct SealedRecord {
    salt: String,
    data: String,
}

/// Registration database of one host user.
pub struct UserDatabase {
    dir: PathBuf,
    host_user: String,
    secret: String,
    params: KdfParams,
    index: Index,
}

impl std::fmt::Debug for UserDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserDatabase")
            .field("dir", &self.dir)
            .field("host_user", &self.host_user)
            .field("users", &self.users().count())
            .finish_non_exhaustive()
    }
}

impl UserDatabase {
    /// Open (or create) the database in `dir` for `host_user`.
    ///
    /// # Errors
    ///
    /// Fails if the secret is empty, the directory cannot be created or
    /// the index cannot be parsed.
    pub fn open(
        dir: impl Into<PathBuf>,
        host_user: impl Into<String>,
        secret: impl Into<String>,
        params: KdfParams,
    ) -> DatabaseResult<Self> {
        let dir = dir.into();
        let secret = secret.into();
        if secret.is_empty() {
            return Err(DatabaseError::MissingSecret);
        }
        fs::create_dir_all(&dir)?;

        let index_path = dir.join(INDEX_FILE);
        let index = match fs::read_to_string(&index_path) {
            Ok(text) if text.trim().is_empty() => Index::new(),
            Ok(text) => serde_json::from_str(&text).map_err(|e| DatabaseError::Corrupt {
                path: index_path.clone(),
                reason: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Index::new(),
            Err(e) => return Err(e.into()),
        };

        let db = Self {
            dir,
            host_user: host_user.into(),
            secret,
            params,
            index,
        };
        debug!(dir = %db.dir.display(), users = db.users().count(), "opened user database");
        Ok(db)
    }

    /// Database directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether `username` is registered under this host.
    pub fn exists(&self, username: &str) -> bool {
        self.users_map().is_some_and(|users| users.contains_key(username))
    }

    /// Registered usernames, sorted.
    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.users_map()
            .into_iter()
            .flat_map(|users| users.keys().map(String::as_str))
    }

    /// Register a new user.
    ///
    /// `fields` is a JSON object; empty text is treated as `{}`.
    pub fn register(
        &mut self,
        username: &str,
        password: &str,
        fields: &str,
    ) -> DatabaseResult<Map<String, Value>> {
        validate_username(username)?;
        validate_password(password)?;
        let fields = parse_fields(fields)?;
        if self.exists(username) {
            return Err(DatabaseError::UsernameTaken(username.to_string()));
        }

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let record = UserRecord {
            created_at,
            creator: self.host_user.clone(),
            password_hash: self.hash_password(password)?,
            fields,
        };

        let id = Uuid::new_v4();
        self.write_record(id, &record)?;
        self.index
            .entry(self.host_user.clone())
            .or_default()
            .insert(username.to_string(), id);
        if let Err(e) = self.write_index() {
            let _ = fs::remove_file(self.record_path(id));
            if let Some(users) = self.index.get_mut(&self.host_user) {
                users.remove(username);
            }
            return Err(e);
        }

        info!(username, "registered user");
        Ok(record.fields)
    }

    /// Check a password, returning the user's stored fields.
    pub fn login(&self, username: &str, password: &str) -> DatabaseResult<Map<String, Value>> {
        let id = self.user_id(username)?;
        let record = self.read_record(id)?;
        let hash = PasswordHash::new(&record.password_hash).map_err(|e| DatabaseError::Corrupt {
            path: self.record_path(id),
            reason: e.to_string(),
        })?;
        self.params
            .argon2()?
            .verify_password(password.as_bytes(), &hash)
            .map_err(|_| DatabaseError::WrongPassword)?;

        debug!(username, "login verified");
        Ok(record.fields)
    }

    /// Replace a user's extra fields and re-encrypt the record.
    pub fn update_fields(&mut self, username: &str, fields: Map<String, Value>) -> DatabaseResult<()> {
        let id = self.user_id(username)?;
        let mut record = self.read_record(id)?;
        record.fields = fields;
        self.write_record(id, &record)
    }

    /// Decrypt a user's full record.
    pub fn record(&self, username: &str) -> DatabaseResult<UserRecord> {
        self.read_record(self.user_id(username)?)
    }

    // ===========================================
    // Internals
    // ===========================================

    fn users_map(&self) -> Option<&BTreeMap<String, Uuid>> {
        self.index.get(&self.host_user)
    }

    fn user_id(&self, username: &str) -> DatabaseResult<Uuid> {
        self.users_map()
            .and_then(|users| users.get(username))
            .copied()
            .ok_or_else(|| DatabaseError::UnknownUser(username.to_string()))
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.{RECORD_EXTENSION}"))
    }

    fn hash_password(&self, password: &str) -> DatabaseResult<String> {
        let salt = SaltString::encode_b64(&random_bytes::<SALT_SIZE>()?)
            .map_err(|e| DatabaseError::Hash(e.to_string()))?;
        let hash = self
            .params
            .argon2()?
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| DatabaseError::Hash(e.to_string()))?;
        Ok(hash.to_string())
    }

    fn write_record(&self, id: Uuid, record: &UserRecord) -> DatabaseResult<()> {
        let salt = random_bytes::<SALT_SIZE>()?;
        let key = derive_key(self.secret.as_bytes(), &salt, self.params)?;
        let plaintext = serde_json::to_vec(record).map_err(|e| DatabaseError::Corrupt {
            path: self.record_path(id),
            reason: e.to_string(),
        })?;
        let data = key.encrypt(&plaintext, id.to_string().as_bytes())?;
        let sealed = SealedRecord {
            salt: STANDARD.encode(salt),
            data: STANDARD.encode(data),
        };
        let text = serde_json::to_string(&sealed).map_err(|e| DatabaseError::Corrupt {
            path: self.record_path(id),
            reason: e.to_string(),
        })?;
        write_atomic(&self.record_path(id), text.as_bytes())?;
        Ok(())
    }

    fn read_record(&self, id: Uuid) -> DatabaseResult<UserRecord> {
        let path = self.record_path(id);
        let corrupt = |reason: String| DatabaseError::Corrupt {
            path: path.clone(),
            reason,
        };

        let text = fs::read_to_string(&path)?;
        let sealed: SealedRecord = serde_json::from_str(&text).map_err(|e| corrupt(e.to_string()))?;
        let salt = STANDARD
            .decode(&sealed.salt)
            .map_err(|e| corrupt(e.to_string()))?;
        let data = STANDARD
            .decode(&sealed.data)
            .map_err(|e| corrupt(e.to_string()))?;
        let key = derive_key(self.secret.as_bytes(), &salt, self.params)?;
        let plaintext = key
            .decrypt(&data, id.to_string().as_bytes())
            .map_err(|e| corrupt(e.to_string()))?;
        serde_json::from_slice(&plaintext).map_err(|e| corrupt(e.to_string()))
    }

    fn write_index(&self) -> DatabaseResult<()> {
        let text = serde_json::to_string_pretty(&self.index).map_err(|e| DatabaseError::Corrupt {
            path: self.dir.join(INDEX_FILE),
            reason: e.to_string(),
        })?;
        write_atomic(&self.dir.join(INDEX_FILE), text.as_bytes())?;
        Ok(())
    }
}

fn parse_fields(text: &str) -> DatabaseResult<Map<String, Value>> {
    if text.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(DatabaseError::InvalidFields("expected a JSON object".into())),
        Err(e) => Err(DatabaseError::InvalidFields(e.to_string())),
    }
}

/// Write `bytes` to a temporary sibling of `path`, then rename it into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}
