//! Room synchronization state machine.
//!
//! The engine is synchronous and does no I/O. Every input (a peer event, a
//! decoded action, a local intent) mutates the replica and returns the
//! messages to put on the wire. The session actor owns exactly one engine
//! per room and does the sending.
use board::{now_millis, Element, ElementId, ElementMap, ElementPatch};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::{
    AccessDecision, AccessGate, AccessStatus, Action, Cursor, CursorThrottle, LocalIdentity,
    MergeReport, Outbound, PeerId, Replica, Result, RoomId, SyncError,
};

pub struct SyncEngine {
    room: RoomId,
    identity: LocalIdentity,
    replica: Replica,
    gate: AccessGate,
    peers: BTreeSet<PeerId>,
    cursor_throttle: CursorThrottle,
    last_cursor: Option<Cursor>,
    /// Secret that just unlocked the room, waiting to be cached.
    verified_secret: Option<String>,
}

impl SyncEngine {
    pub fn new(
        room: RoomId,
        identity: LocalIdentity,
        gate: AccessGate,
        cursor_interval: Duration,
    ) -> Self {
        let mut replica = Replica::new();
        replica.set_host(gate.is_creator());
        Self {
            room,
            identity,
            replica,
            gate,
            peers: BTreeSet::new(),
            cursor_throttle: CursorThrottle::new(cursor_interval),
            last_cursor: None,
            verified_secret: None,
        }
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.identity.peer_id
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn elements(&self) -> &ElementMap {
        self.replica.elements()
    }

    pub fn cursors(&self) -> &BTreeMap<PeerId, Cursor> {
        self.replica.cursors()
    }

    pub fn peers(&self) -> &BTreeSet<PeerId> {
        &self.peers
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    pub fn access_status(&self) -> AccessStatus {
        self.gate.status()
    }

    pub fn is_host(&self) -> bool {
        self.replica.is_host()
    }

    /// Seed the replica from the cold-start cache before joining.
    pub fn restore(&mut self, cached: ElementMap) -> MergeReport {
        self.replica.restore(cached)
    }

    pub fn take_dirty_snapshot(&mut self) -> Option<ElementMap> {
        self.replica.take_dirty_snapshot()
    }

    pub fn take_verified_secret(&mut self) -> Option<String> {
        self.verified_secret.take()
    }

    /// Take the creator role for this room.
    pub fn create(&mut self, password: impl Into<String>) -> Result<()> {
        self.gate.create(&self.room, password)?;
        self.replica.set_host(true);
        Ok(())
    }

    /// First message after joining the transport.
    pub fn join_request(&self) -> Outbound {
        Outbound::broadcast(Action::sync_request(self.gate.request_secret()))
    }

    pub fn on_peer_join(&mut self, peer: PeerId) -> Vec<Outbound> {
        if peer == self.identity.peer_id {
            return Vec::new();
        }
        info!("Peer {} joined room {}", peer, self.room);
        self.peers.insert(peer.clone());

        let mut out = Vec::new();
        if self.gate.allows_push() && (!self.replica.is_empty() || self.replica.is_host()) {
            debug!("Pushing {} elements to {}", self.replica.len(), peer);
            out.push(Outbound::to(
                peer.clone(),
                Action::sync_response(self.replica.elements().clone()),
            ));
        }
        // The join broadcast may have gone out before anyone was listening.
        if !self.gate.has_received_snapshot() && !self.gate.is_locked() {
            out.push(Outbound::to(
                peer,
                Action::sync_request(self.gate.request_secret()),
            ));
        }
        out
    }

    pub fn on_peer_leave(&mut self, peer: &PeerId) {
        let known = self.peers.remove(peer);
        self.replica.remove_cursor(peer);
        if known {
            info!("Peer {} left room {}", peer, self.room);
        }
    }

    /// The mesh is gone: nobody is reachable and no remote cursor is live.
    pub fn on_transport_closed(&mut self) {
        self.peers.clear();
        self.replica.clear_cursors();
    }

    /// Decode a frame and handle it. Bad frames are logged and dropped.
    pub fn handle_frame(&mut self, from: &PeerId, frame: &str) -> Vec<Outbound> {
        match Action::decode(frame) {
            Ok(Some(action)) => self.handle(from, action),
            Ok(None) => {
                debug!("Ignoring frame of unknown type from {}", from);
                Vec::new()
            }
            Err(e) => {
                warn!("Dropping frame from {}: {}", from, e);
                Vec::new()
            }
        }
    }

    pub fn handle(&mut self, from: &PeerId, action: Action) -> Vec<Outbound> {
        debug!("{} from {} in room {}", action.name(), from, self.room);

        if action.is_element_edit() && self.gate.is_locked() {
            debug!("Room {} is locked, dropping {}", self.room, action.name());
            return Vec::new();
        }

        match action {
            Action::SyncRequest(request) => {
                match self.gate.evaluate(request.password.as_deref()) {
                    AccessDecision::Share => {
                        if self.gate.is_creator() {
                            self.replica.set_host(true);
                        }
                        vec![Outbound::to(
                            from.clone(),
                            Action::sync_response(self.replica.elements().clone()),
                        )]
                    }
                    AccessDecision::Deny(reason) => {
                        warn!("Denying sync request from {}: {}", from, reason);
                        vec![Outbound::to(from.clone(), Action::access_denied(reason))]
                    }
                    AccessDecision::Ignore => Vec::new(),
                }
            }
            Action::SyncResponse(response) => {
                if let Some(secret) = self.gate.on_sync_response(!response.elements.is_empty()) {
                    info!("Unlocked room {}", self.room);
                    self.verified_secret = Some(secret);
                }
                if self.gate.is_locked() {
                    debug!("Room {} is locked, dropping snapshot from {}", self.room, from);
                    return Vec::new();
                }
                let report = self.replica.merge_snapshot(response.elements);
                self.gate.on_snapshot_merged();
                debug!(
                    "Merged snapshot from {}: {} inserted, {} replaced, {} kept",
                    from, report.inserted, report.replaced, report.kept
                );
                Vec::new()
            }
            Action::AccessDenied(denied) => {
                if self.gate.on_access_denied(denied.reason.clone()) {
                    self.verified_secret = None;
                    warn!("Access to room {} denied by {}: {}", self.room, from, denied.reason);
                }
                Vec::new()
            }
            Action::AddElement(element) => {
                match element.validate() {
                    Ok(()) => self.replica.insert_element(element),
                    Err(e) => warn!("Dropping element from {}: {}", from, e),
                }
                Vec::new()
            }
            Action::UpdateElement(update) => {
                if !self.replica.update_element(&update.id, &update.updates) {
                    debug!("Update for unknown element {} ignored", update.id);
                }
                Vec::new()
            }
            Action::DeleteElement(target) => {
                self.replica.remove_element(&target.id);
                Vec::new()
            }
            Action::CursorMove(cursor) => {
                if cursor.peer_id != self.identity.peer_id {
                    self.replica.set_cursor(cursor);
                }
                Vec::new()
            }
        }
    }

    fn ensure_unlocked(&self) -> Result<()> {
        match self.gate.lock_reason() {
            Some(reason) => Err(SyncError::AccessLocked(reason.to_string())),
            None => Ok(()),
        }
    }

    pub fn add_element(&mut self, element: Element) -> Result<Outbound> {
        self.ensure_unlocked()?;
        element.validate()?;
        self.replica.insert_element(element.clone());
        Ok(Outbound::broadcast(Action::AddElement(element)))
    }

    /// Apply a local edit, stamping it so later snapshots cannot roll it back.
    pub fn update_element(&mut self, id: &ElementId, patch: ElementPatch) -> Result<Outbound> {
        self.ensure_unlocked()?;
        let patch = patch.touched(now_millis());
        if !self.replica.update_element(id, &patch) {
            return Err(SyncError::ElementNotFound(id.clone()));
        }
        Ok(Outbound::broadcast(Action::update(id.clone(), patch)))
    }

    pub fn delete_element(&mut self, id: &ElementId) -> Result<Outbound> {
        self.ensure_unlocked()?;
        if self.replica.remove_element(id).is_none() {
            return Err(SyncError::ElementNotFound(id.clone()));
        }
        Ok(Outbound::broadcast(Action::delete(id.clone())))
    }

    /// Remember the local pointer and emit it unless the throttle says wait.
    pub fn move_cursor(&mut self, x: f64, y: f64, now: Instant) -> Option<Outbound> {
        if self.gate.is_locked() {
            return None;
        }
        let cursor = self.identity.cursor_at(x, y);
        self.last_cursor = Some(cursor.clone());
        self.cursor_throttle
            .try_acquire(now)
            .then(|| Outbound::broadcast(Action::CursorMove(cursor)))
    }

    pub fn resend_cursor(&self) -> Option<Outbound> {
        if self.gate.is_locked() {
            return None;
        }
        self.last_cursor
            .clone()
            .map(|cursor| Outbound::broadcast(Action::CursorMove(cursor)))
    }

    pub fn retry_join(&mut self, password: Option<String>) -> Outbound {
        self.gate.retry(password);
        info!("Retrying join of room {}", self.room);
        self.join_request()
    }
}
