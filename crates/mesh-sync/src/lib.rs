//! Peer-to-peer board synchronization over a serverless mesh.
//! Every peer owns a replica; snapshots merge by recency, edits broadcast as they happen.
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod protocol;
pub use protocol::*;

mod replica;
pub use replica::*;

mod merge;
pub use merge::*;

mod access;
pub use access::*;

mod presence;
pub use presence::*;

mod cache;
pub use cache::*;

mod secrets;
pub use secrets::*;

mod identity;
pub use identity::*;

mod transport;
pub use transport::*;

mod sync;
pub use sync::*;

mod session;
pub use session::*;

mod config;
pub use config::*;

pub use board::{BoardError, Element, ElementId, ElementKind, ElementMap, ElementPatch};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("room is locked: {0}")]
    AccessLocked(String),

    #[error("element not found: {0}")]
    ElementNotFound(ElementId),

    #[error("room {0} is already protected by a different password")]
    RoomProtected(RoomId),

    #[error("session closed for room {0}")]
    SessionClosed(RoomId),

    #[error("invalid operation: {0}")]
    InvalidOp(String),

    #[error(transparent)]
    Board(#[from] BoardError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Identifier a peer assigns itself and uses on the transport.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Logical board name peers meet under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
