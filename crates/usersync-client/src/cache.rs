//! Local persistence of the user snapshot and its pending mutation.
//!
//! Two layers:
//!
//! ```text
//! UserCache (typed, bound to one UserId)
//!   ├── user()      ⇄ "entity:<id>"           JSON User
//!   └── pending()   ⇄ "pendingMutation:<id>"  JSON UserPatch
//!          │
//!          ▼
//! ByteStore (opaque get/set of byte blobs)
//!   ├── MemoryStore  process-local map
//!   └── FileStore    one file per key in a directory
//! ```
//!
//! The typed layer never propagates failures: a store error or a blob that no
//! longer decodes is logged and read as "absent", so a corrupted entry costs
//! that one value and nothing else.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};
use usersync_types::{User, UserId, UserPatch};

use crate::constants::{PENDING_KEY_PREFIX, USER_KEY_PREFIX};
use crate::lockout::Lockout;

// ============================================================================
// Byte store
// ============================================================================

/// Error from the underlying byte store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Opaque key → bytes persistence.
///
/// Implementations must be safe to call from several coordinators at once.
pub trait ByteStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`; `None` deletes the entry.
    fn set(&self, key: &str, value: Option<&[u8]>) -> Result<(), StoreError>;
}

/// In-memory byte store. Contents die with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl ByteStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Option<&[u8]>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        match value {
            Some(bytes) => {
                entries.insert(key.to_string(), bytes.to_vec());
            }
            None => {
                entries.remove(key);
            }
        }
        Ok(())
    }
}

/// Directory-backed byte store: one file per key.
///
/// Keys are escaped into file names (`entity:u1` → `entity%3Au1.json`).
/// Writes go to a temp file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", escape_key(key)))
    }
}

/// Escape a key into a portable file name.
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

impl ByteStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: Option<&[u8]>) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match value {
            Some(bytes) => {
                let tmp = path.with_extension("json.tmp");
                fs::write(&tmp, bytes)?;
                fs::rename(&tmp, &path)?;
            }
            None => match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }
}

// ============================================================================
// Typed layer
// ============================================================================

/// Failure reading or writing one typed cache entry.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Typed cache for one user: the last known snapshot plus at most one
/// pending mutation.
pub struct UserCache {
    id: UserId,
    store: Arc<dyn ByteStore>,
    /// Serializes every write, and lockout checks against them.
    write_lock: Mutex<()>,
}

impl UserCache {
    pub fn new(id: UserId, store: Arc<dyn ByteStore>) -> Self {
        Self {
            id,
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn id(&self) -> &UserId {
        &self.id
    }

    pub fn user_key(&self) -> String {
        format!("{USER_KEY_PREFIX}{}", self.id)
    }

    pub fn pending_key(&self) -> String {
        format!("{PENDING_KEY_PREFIX}{}", self.id)
    }

    /// The cached snapshot, if present, decodable, and owned by this id.
    pub fn user(&self) -> Option<User> {
        let user: User = self.load(&self.user_key())?;
        if user.id != self.id {
            warn!(expected = %self.id, got = %user.id, "Cached user has foreign id, ignoring");
            return None;
        }
        Some(user)
    }

    pub fn set_user(&self, user: Option<&User>) {
        let _guard = self.write_lock.lock();
        self.save(&self.user_key(), user);
    }

    /// The pending mutation, if present, owned by this id, and non-empty.
    pub fn pending(&self) -> Option<UserPatch> {
        let patch: UserPatch = self.load(&self.pending_key())?;
        if patch.id != self.id {
            warn!(expected = %self.id, got = %patch.id, "Stale pending mutation for another user, ignoring");
            return None;
        }
        if patch.is_empty() {
            return None;
        }
        Some(patch)
    }

    pub fn set_pending(&self, patch: Option<&UserPatch>) {
        let _guard = self.write_lock.lock();
        self.save(&self.pending_key(), patch);
    }

    /// Atomically replace the pending mutation with `f(current)`.
    pub fn update_pending(&self, f: impl FnOnce(Option<UserPatch>) -> UserPatch) -> UserPatch {
        let _guard = self.write_lock.lock();
        self.replace_pending(f)
    }

    /// Clear the pending mutation only if it still equals `snapshot`.
    ///
    /// Returns whether it was cleared. A mutation that changed after
    /// `snapshot` was taken survives for the next run.
    pub fn clear_pending_if(&self, snapshot: &UserPatch) -> bool {
        let _guard = self.write_lock.lock();
        self.clear_pending_matching(snapshot)
    }

    /// Drop both the snapshot and the pending mutation.
    pub fn reset(&self) {
        let _guard = self.write_lock.lock();
        self.clear_all();
    }

    // Lockout-aware writes. The lockout is checked under the write lock and
    // tripped under it too, so nothing lands after the reset in `lock_out`.

    /// [`UserCache::update_pending`], unless `lockout` has tripped.
    pub(crate) fn update_pending_unless_locked(
        &self,
        lockout: &Lockout,
        f: impl FnOnce(Option<UserPatch>) -> UserPatch,
    ) -> Option<UserPatch> {
        let _guard = self.write_lock.lock();
        if lockout.is_tripped() {
            return None;
        }
        Some(self.replace_pending(f))
    }

    /// Store a remote snapshot and clear the mutation it carried (if it is
    /// unchanged). Returns `false` without writing once `lockout` has tripped.
    pub(crate) fn commit(&self, lockout: &Lockout, user: &User, sent: Option<&UserPatch>) -> bool {
        let _guard = self.write_lock.lock();
        if lockout.is_tripped() {
            return false;
        }
        self.save(&self.user_key(), Some(user));
        if let Some(sent) = sent {
            self.clear_pending_matching(sent);
        }
        true
    }

    /// Trip `lockout` and clear both entries. Returns `true` only for the
    /// call that tripped it.
    pub(crate) fn lock_out(&self, lockout: &Lockout) -> bool {
        let _guard = self.write_lock.lock();
        let first = lockout.trip();
        self.clear_all();
        first
    }

    // Callers hold `write_lock`.

    fn replace_pending(&self, f: impl FnOnce(Option<UserPatch>) -> UserPatch) -> UserPatch {
        let next = f(self.pending());
        self.save(&self.pending_key(), Some(&next));
        next
    }

    fn clear_pending_matching(&self, snapshot: &UserPatch) -> bool {
        match self.pending() {
            Some(current) if current == *snapshot => {
                self.save::<UserPatch>(&self.pending_key(), None);
                true
            }
            Some(_) => {
                debug!(user = %self.id, "Pending mutation changed in flight, keeping it");
                false
            }
            None => false,
        }
    }

    fn clear_all(&self) {
        self.save::<User>(&self.user_key(), None);
        self.save::<UserPatch>(&self.pending_key(), None);
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_load(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, "Discarding unreadable cache entry: {e}");
                None
            }
        }
    }

    fn try_load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.store.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save<T: Serialize>(&self, key: &str, value: Option<&T>) {
        if let Err(e) = self.try_save(key, value) {
            warn!(key, "Failed to write cache entry: {e}");
        }
    }

    fn try_save<T: Serialize>(&self, key: &str, value: Option<&T>) -> Result<(), CacheError> {
        match value {
            Some(v) => {
                let bytes = serde_json::to_vec(v)?;
                self.store.set(key, Some(&bytes))?;
            }
            None => self.store.set(key, None)?,
        }
        Ok(())
    }
}

impl std::fmt::Debug for UserCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCache").field("id", &self.id).finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
