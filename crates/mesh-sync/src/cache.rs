//! Cold-start cache of the last known element map per room.
//!
//! The cache only shortens the time to first paint after a restart. Peers
//! never see it, and a failing backend leaves the board fully usable.
use board::ElementMap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::warn;

use crate::{Result, RoomId, SyncError};

/// What gets written for one room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedBoard {
    room: RoomId,
    saved_at: DateTime<Utc>,
    elements: ElementMap,
}

#[derive(Debug, Clone)]
pub enum SnapshotCache {
    /// One JSON file per room under `dir`.
    Disk { dir: PathBuf },
    Memory(Arc<Mutex<HashMap<RoomId, ElementMap>>>),
    Disabled,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::Disabled
    }
}

impl SnapshotCache {
    pub fn disk(dir: impl AsRef<Path>) -> Self {
        Self::Disk {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn memory() -> Self {
        Self::Memory(Arc::new(Mutex::new(HashMap::new())))
    }

    pub fn disabled() -> Self {
        Self::Disabled
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// File used for `room` by the disk backend.
    ///
    /// The room id is hex encoded so distinct rooms never share a file, even
    /// on case-insensitive file systems.
    pub fn path_for(dir: &Path, room: &RoomId) -> PathBuf {
        let name: String = room
            .as_str()
            .bytes()
            .map(|b| format!("{:02x}", b))
            .collect();
        dir.join(format!("board_{}.json", name))
    }

    /// `Ok(None)` when nothing was cached for the room yet.
    pub async fn load(&self, room: &RoomId) -> Result<Option<ElementMap>> {
        match self {
            Self::Disabled => Ok(None),
            Self::Memory(rooms) => {
                let cached = rooms.lock().get(room).cloned();
                Ok(cached)
            }
            Self::Disk { dir } => {
                let path = Self::path_for(dir, room);
                let json = match fs::read_to_string(&path).await {
                    Ok(json) => json,
                    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(e.into()),
                };
                let cached: CachedBoard = serde_json::from_str(&json).map_err(|e| {
                    SyncError::Cache(format!("corrupt cache file {}: {}", path.display(), e))
                })?;
                if cached.room != *room {
                    warn!(
                        "Cache file {} belongs to room {}, not {}",
                        path.display(),
                        cached.room,
                        room
                    );
                    return Ok(None);
                }
                Ok(Some(cached.elements))
            }
        }
    }

    pub async fn store(&self, room: &RoomId, elements: &ElementMap) -> Result<()> {
        match self {
            Self::Disabled => Ok(()),
            Self::Memory(rooms) => {
                rooms.lock().insert(room.clone(), elements.clone());
                Ok(())
            }
            Self::Disk { dir } => {
                fs::create_dir_all(dir).await?;

                let cached = CachedBoard {
                    room: room.clone(),
                    saved_at: Utc::now(),
                    elements: elements.clone(),
                };
                let json = serde_json::to_string(&cached)?;

                // Write then rename so a crash never leaves a half-written file.
                let path = Self::path_for(dir, room);
                let tmp = path.with_extension("json.tmp");
                fs::write(&tmp, json).await?;
                fs::rename(&tmp, &path).await?;
                Ok(())
            }
        }
    }

    pub async fn remove(&self, room: &RoomId) -> Result<()> {
        match self {
            Self::Disabled => Ok(()),
            Self::Memory(rooms) => {
                rooms.lock().remove(room);
                Ok(())
            }
            Self::Disk { dir } => match fs::remove_file(Self::path_for(dir, room)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }
}
