//! Seam to the peer-to-peer transport.
//!
//! A transport joins a room under an application id and hands back a
//! [`RoomHandle`]: a connection to send text frames on and a stream of
//! membership and message events. Delivery is fire-and-forget.
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{PeerId, Result, RoomId, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    Message { from: PeerId, frame: String },
}

#[async_trait]
pub trait MeshTransport: Send + Sync {
    async fn join(&self, app_id: &str, room: &RoomId, local: &PeerId) -> Result<RoomHandle>;
}

/// Sending half of a joined room.
pub trait RoomLink: Send + Sync {
    fn local_peer(&self) -> &PeerId;

    /// `None` broadcasts to every connected peer. Frames to peers that are
    /// gone are dropped without error.
    fn send(&self, frame: String, target: Option<&PeerId>) -> Result<()>;

    /// Release the room. Must be safe to call more than once.
    fn leave(&self);
}

/// Owns a [`RoomLink`] and leaves the room when dropped.
pub struct RoomConnection {
    link: Arc<dyn RoomLink>,
}

impl RoomConnection {
    pub fn new(link: Arc<dyn RoomLink>) -> Self {
        Self { link }
    }

    pub fn local_peer(&self) -> &PeerId {
        self.link.local_peer()
    }

    pub fn send(&self, frame: String, target: Option<&PeerId>) -> Result<()> {
        self.link.send(frame, target)
    }

    pub fn leave(&self) {
        self.link.leave();
    }
}

impl Drop for RoomConnection {
    fn drop(&mut self) {
        self.link.leave();
    }
}

pub struct RoomHandle {
    pub connection: RoomConnection,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl RoomHandle {
    pub fn new(link: Arc<dyn RoomLink>, events: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self {
            connection: RoomConnection::new(link),
            events,
        }
    }

    pub fn send(&self, frame: String, target: Option<&PeerId>) -> Result<()> {
        self.connection.send(frame, target)
    }

    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

type RoomKey = (String, RoomId);
type Members = HashMap<PeerId, mpsc::UnboundedSender<TransportEvent>>;

/// In-process mesh: every joined peer of a room is directly reachable.
#[derive(Clone, Default)]
pub struct LoopbackMesh {
    rooms: Arc<Mutex<HashMap<RoomKey, Members>>>,
}

impl LoopbackMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peers currently joined to a room, in no particular order.
    pub fn peers_in(&self, app_id: &str, room: &RoomId) -> Vec<PeerId> {
        let key = (app_id.to_string(), room.clone());
        self.rooms
            .lock()
            .get(&key)
            .map(|members| members.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MeshTransport for LoopbackMesh {
    async fn join(&self, app_id: &str, room: &RoomId, local: &PeerId) -> Result<RoomHandle> {
        let key = (app_id.to_string(), room.clone());
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut rooms = self.rooms.lock();
            let members = rooms.entry(key.clone()).or_default();
            if members.contains_key(local) {
                return Err(SyncError::Transport(format!(
                    "peer {} already joined room {}",
                    local, room
                )));
            }
            for (peer, other) in members.iter() {
                let _ = other.send(TransportEvent::PeerJoined(local.clone()));
                let _ = tx.send(TransportEvent::PeerJoined(peer.clone()));
            }
            members.insert(local.clone(), tx);
        }
        debug!("Loopback peer {} joined {}/{}", local, app_id, room);

        let link = LoopbackLink {
            rooms: self.rooms.clone(),
            key,
            local: local.clone(),
            left: AtomicBool::new(false),
        };
        Ok(RoomHandle::new(Arc::new(link), rx))
    }
}

struct LoopbackLink {
    rooms: Arc<Mutex<HashMap<RoomKey, Members>>>,
    key: RoomKey,
    local: PeerId,
    left: AtomicBool,
}

impl RoomLink for LoopbackLink {
    fn local_peer(&self) -> &PeerId {
        &self.local
    }

    fn send(&self, frame: String, target: Option<&PeerId>) -> Result<()> {
        if self.left.load(Ordering::Acquire) {
            return Err(SyncError::Transport(format!(
                "peer {} already left room {}",
                self.local, self.key.1
            )));
        }
        let rooms = self.rooms.lock();
        let Some(members) = rooms.get(&self.key) else {
            return Ok(());
        };
        let message = |frame: String| TransportEvent::Message {
            from: self.local.clone(),
            frame,
        };
        match target {
            Some(peer) => {
                if let Some(tx) = members.get(peer) {
                    let _ = tx.send(message(frame));
                }
            }
            None => {
                for (peer, tx) in members {
                    if *peer != self.local {
                        let _ = tx.send(message(frame.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    fn leave(&self) {
        if self.left.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut rooms = self.rooms.lock();
        if let Some(members) = rooms.get_mut(&self.key) {
            members.remove(&self.local);
            for tx in members.values() {
                let _ = tx.send(TransportEvent::PeerLeft(self.local.clone()));
            }
            if members.is_empty() {
                rooms.remove(&self.key);
            }
        }
        debug!("Loopback peer {} left {}", self.local, self.key.1);
    }
}
