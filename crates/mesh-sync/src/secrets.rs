//! Small persistent key-value store for per-device secrets and identity.
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::{PeerId, RoomId};

/// Synchronous string store, in the spirit of a browser's local storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries.lock().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

/// All entries in one JSON object on disk, rewritten on every change.
///
/// Unreadable or unwritable files are logged and the store keeps working
/// from memory.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                warn!("Ignoring unreadable secrets file {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!("Failed to read secrets file {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) {
        let result = serde_json::to_string_pretty(entries)
            .map_err(std::io::Error::from)
            .and_then(|json| {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&self.path, json)
            });
        if let Err(e) = result {
            warn!("Failed to write secrets file {}: {}", self.path.display(), e);
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries);
    }

    fn remove(&self, key: &str) {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.flush(&entries);
        }
    }
}

const PEER_ID_KEY: &str = "peer_id";
const DISPLAY_NAME_KEY: &str = "display_name";

/// Typed, room-keyed view over a [`KeyValueStore`].
#[derive(Clone)]
pub struct LocalSecrets {
    store: Arc<dyn KeyValueStore>,
}

impl LocalSecrets {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn password_key(room: &RoomId) -> String {
        format!("room_password:{}", room)
    }

    fn creator_key(room: &RoomId) -> String {
        format!("room_creator:{}", room)
    }

    fn unlock_key(room: &RoomId) -> String {
        format!("room_unlock:{}", room)
    }

    pub fn is_creator(&self, room: &RoomId) -> bool {
        self.store.get(&Self::creator_key(room)).as_deref() == Some("true")
    }

    /// The room password, only if this device created the room.
    pub fn creator_password(&self, room: &RoomId) -> Option<String> {
        if !self.is_creator(room) {
            return None;
        }
        self.store.get(&Self::password_key(room))
    }

    pub fn set_creator_password(&self, room: &RoomId, password: &str) {
        self.store.set(&Self::password_key(room), password);
        self.store.set(&Self::creator_key(room), "true");
    }

    pub fn unlock_secret(&self, room: &RoomId) -> Option<String> {
        self.store.get(&Self::unlock_key(room))
    }

    pub fn set_unlock_secret(&self, room: &RoomId, secret: &str) {
        self.store.set(&Self::unlock_key(room), secret);
    }

    pub fn clear_unlock_secret(&self, room: &RoomId) {
        self.store.remove(&Self::unlock_key(room));
    }

    /// Forget everything recorded for one room.
    pub fn forget_room(&self, room: &RoomId) {
        self.store.remove(&Self::password_key(room));
        self.store.remove(&Self::creator_key(room));
        self.store.remove(&Self::unlock_key(room));
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.store.get(PEER_ID_KEY).map(PeerId)
    }

    pub fn set_peer_id(&self, peer_id: &PeerId) {
        self.store.set(PEER_ID_KEY, peer_id.as_str());
    }

    pub fn display_name(&self) -> Option<String> {
        self.store.get(DISPLAY_NAME_KEY)
    }

    pub fn set_display_name(&self, name: &str) {
        self.store.set(DISPLAY_NAME_KEY, name);
    }
}

impl std::fmt::Debug for LocalSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSecrets").finish_non_exhaustive()
    }
}
