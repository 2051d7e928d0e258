//! Tunables for a mesh session.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Result, SnapshotCache};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Namespace on the transport; peers only meet peers of the same app.
    pub app_id: String,

    /// Minimum gap between outgoing cursor frames.
    pub cursor_interval_ms: u64,

    /// How often the last local cursor is re-broadcast.
    pub cursor_resend_ms: u64,

    /// How often a changed board is written to the cold-start cache.
    pub persist_interval_ms: u64,

    /// Where caches and secrets live. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            app_id: "mesh-board".to_string(),
            cursor_interval_ms: 50,
            cursor_resend_ms: 2000,
            persist_interval_ms: 500,
            data_dir: dirs::data_local_dir().map(|dir| dir.join("mesh_board")),
        }
    }
}

impl SyncConfig {
    /// Config with no on-disk state, used by tests and the simulator.
    pub fn ephemeral() -> Self {
        Self {
            data_dir: None,
            ..Self::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn cursor_interval(&self) -> Duration {
        Duration::from_millis(self.cursor_interval_ms)
    }

    pub fn cursor_resend(&self) -> Duration {
        Duration::from_millis(self.cursor_resend_ms.max(1))
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_millis(self.persist_interval_ms.max(1))
    }

    pub fn snapshot_cache(&self) -> SnapshotCache {
        match &self.data_dir {
            Some(dir) => SnapshotCache::disk(dir.join("boards")),
            None => SnapshotCache::memory(),
        }
    }

    pub fn secrets_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join("secrets.json"))
    }
}
