//! Live room sessions.
//!
//! Each joined room runs one actor task that exclusively owns its
//! [`SyncEngine`]. Callers talk to it through a [`RoomSession`] handle:
//! commands go over a mailbox with oneshot replies, and the board is
//! observed through a `watch` channel. Mutation is strictly sequential.
use board::{Element, ElementId, ElementMap, ElementPatch};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{
    AccessGate, AccessStatus, Cursor, JsonFileStore, LocalIdentity, LocalSecrets, MeshTransport,
    Outbound, PeerId, Result, RoomConnection, RoomHandle, RoomId, SnapshotCache, SyncConfig,
    SyncEngine, SyncError, TransportEvent,
};

const MAILBOX_CAPACITY: usize = 256;

/// What a UI renders for one room.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardState {
    pub room: RoomId,
    pub elements: ElementMap,
    pub cursors: BTreeMap<PeerId, Cursor>,
    pub peers: BTreeSet<PeerId>,
    pub access: AccessStatus,
    pub is_host: bool,
}

impl BoardState {
    fn of(engine: &SyncEngine) -> Self {
        Self {
            room: engine.room().clone(),
            elements: engine.elements().clone(),
            cursors: engine.cursors().clone(),
            peers: engine.peers().clone(),
            access: engine.access_status(),
            is_host: engine.is_host(),
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.access, AccessStatus::Locked { .. })
    }
}

enum Command {
    Add(Element, oneshot::Sender<Result<()>>),
    Update(ElementId, ElementPatch, oneshot::Sender<Result<()>>),
    Delete(ElementId, oneshot::Sender<Result<()>>),
    MoveCursor { x: f64, y: f64 },
    RetryJoin(Option<String>, oneshot::Sender<()>),
    Create(String, oneshot::Sender<Result<()>>),
    Flush(oneshot::Sender<()>),
    Leave(oneshot::Sender<()>),
}

/// Handle to a running room actor. Dropping every handle ends the session.
pub struct RoomSession {
    room: RoomId,
    local_peer: PeerId,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<BoardState>,
}

impl RoomSession {
    /// Load the cold-start cache, join the transport and start the actor.
    pub async fn start(
        room: RoomId,
        transport: Arc<dyn MeshTransport>,
        config: &SyncConfig,
        secrets: LocalSecrets,
        cache: SnapshotCache,
        identity: LocalIdentity,
    ) -> Result<Arc<Self>> {
        let gate = AccessGate::from_cached(
            secrets.creator_password(&room),
            secrets.unlock_secret(&room),
        );
        let local_peer = identity.peer_id.clone();
        let mut engine = SyncEngine::new(room.clone(), identity, gate, config.cursor_interval());

        match cache.load(&room).await {
            Ok(Some(cached)) => {
                let report = engine.restore(cached);
                info!("Restored {} cached elements for room {}", report.inserted, room);
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to load cache for room {}: {}", room, e),
        }

        // No transport is a valid single-peer board.
        let (connection, events) = match transport.join(&config.app_id, &room, &local_peer).await {
            Ok(RoomHandle { connection, events }) => (Some(connection), Some(events)),
            Err(e) => {
                warn!("Could not join room {} on the mesh, working offline: {}", room, e);
                (None, None)
            }
        };

        let (state_tx, state_rx) = watch::channel(BoardState::of(&engine));
        let (command_tx, command_rx) = mpsc::channel(MAILBOX_CAPACITY);

        let mut actor = RoomActor {
            engine,
            connection,
            secrets,
            cache,
            state: state_tx,
        };
        let join = actor.engine.join_request();
        actor.send(join);
        info!("Joined room {} as {}", room, local_peer);

        tokio::spawn(actor.run(config.clone(), command_rx, events));

        Ok(Arc::new(Self {
            room,
            local_peer,
            commands: command_tx,
            state: state_rx,
        }))
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Latest published board.
    pub fn state(&self) -> BoardState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<BoardState> {
        self.state.clone()
    }

    /// Resolve once the board satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl FnMut(&BoardState) -> bool) -> Result<BoardState> {
        let mut rx = self.subscribe();
        let state = rx.wait_for(predicate).await.map_err(|_| self.closed())?;
        Ok(state.clone())
    }

    fn closed(&self) -> SyncError {
        SyncError::SessionClosed(self.room.clone())
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())
    }

    pub async fn add_element(&self, element: Element) -> Result<()> {
        self.request(|reply| Command::Add(element, reply)).await?
    }

    pub async fn update_element(&self, id: ElementId, patch: ElementPatch) -> Result<()> {
        self.request(|reply| Command::Update(id, patch, reply)).await?
    }

    pub async fn delete_element(&self, id: ElementId) -> Result<()> {
        self.request(|reply| Command::Delete(id, reply)).await?
    }

    pub async fn move_cursor(&self, x: f64, y: f64) -> Result<()> {
        self.commands
            .send(Command::MoveCursor { x, y })
            .await
            .map_err(|_| self.closed())
    }

    pub async fn retry_join(&self, password: Option<String>) -> Result<()> {
        self.request(|reply| Command::RetryJoin(password, reply)).await
    }

    async fn create(&self, password: String) -> Result<()> {
        self.request(|reply| Command::Create(password, reply)).await?
    }

    /// Write the board to the cold-start cache now.
    pub async fn flush(&self) -> Result<()> {
        self.request(Command::Flush).await
    }

    /// Flush, release the transport and stop the actor.
    pub async fn leave(&self) -> Result<()> {
        match self.request(Command::Leave).await {
            Ok(()) | Err(SyncError::SessionClosed(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

struct RoomActor {
    engine: SyncEngine,
    connection: Option<RoomConnection>,
    secrets: LocalSecrets,
    cache: SnapshotCache,
    state: watch::Sender<BoardState>,
}

async fn next_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl RoomActor {
    async fn run(
        mut self,
        config: SyncConfig,
        mut commands: mpsc::Receiver<Command>,
        mut events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    ) {
        let mut persist = tokio::time::interval(config.persist_interval());
        persist.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut resend = tokio::time::interval(config.cursor_resend());
        resend.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Leave(reply)) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.on_command(command).await,
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                event = next_event(&mut events) => match event {
                    Some(event) => self.on_event(event),
                    None => {
                        warn!("Transport closed for room {}", self.engine.room());
                        self.engine.on_transport_closed();
                        self.publish();
                        events = None;
                    }
                },
                _ = persist.tick() => self.flush().await,
                _ = resend.tick() => {
                    if let Some(out) = self.engine.resend_cursor() {
                        self.send(out);
                    }
                }
            }
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Add(element, reply) => {
                let result = self.engine.add_element(element).map(|out| self.send(out));
                let _ = reply.send(result);
            }
            Command::Update(id, patch, reply) => {
                let result = self
                    .engine
                    .update_element(&id, patch)
                    .map(|out| self.send(out));
                let _ = reply.send(result);
            }
            Command::Delete(id, reply) => {
                let result = self.engine.delete_element(&id).map(|out| self.send(out));
                let _ = reply.send(result);
            }
            Command::MoveCursor { x, y } => {
                if let Some(out) = self.engine.move_cursor(x, y, Instant::now()) {
                    self.send(out);
                }
            }
            Command::RetryJoin(password, reply) => {
                let out = self.engine.retry_join(password);
                self.send(out);
                let _ = reply.send(());
            }
            Command::Create(password, reply) => {
                let _ = reply.send(self.engine.create(password));
            }
            Command::Flush(reply) => {
                self.flush().await;
                let _ = reply.send(());
            }
            Command::Leave(reply) => {
                let _ = reply.send(());
            }
        }
        self.publish();
    }

    fn on_event(&mut self, event: TransportEvent) {
        let was_locked = self.engine.gate().is_locked();
        match event {
            TransportEvent::PeerJoined(peer) => {
                for out in self.engine.on_peer_join(peer) {
                    self.send(out);
                }
            }
            TransportEvent::PeerLeft(peer) => self.engine.on_peer_leave(&peer),
            TransportEvent::Message { from, frame } => {
                for out in self.engine.handle_frame(&from, &frame) {
                    self.send(out);
                }
            }
        }
        if let Some(secret) = self.engine.take_verified_secret() {
            self.secrets.set_unlock_secret(self.engine.room(), &secret);
        }
        // A refused secret must not be replayed by the next session.
        if !was_locked && self.engine.gate().is_locked() {
            self.secrets.clear_unlock_secret(self.engine.room());
        }
        self.publish();
    }

    fn send(&self, out: Outbound) {
        let Some(connection) = &self.connection else {
            return;
        };
        let frame = match out.action.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode {}: {}", out.action.name(), e);
                return;
            }
        };
        if let Err(e) = connection.send(frame, out.target.as_ref()) {
            warn!("Failed to send {}: {}", out.action.name(), e);
        }
    }

    fn publish(&self) {
        let next = BoardState::of(&self.engine);
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    async fn flush(&mut self) {
        let Some(snapshot) = self.engine.take_dirty_snapshot() else {
            return;
        };
        let room = self.engine.room();
        match self.cache.store(room, &snapshot).await {
            Ok(()) => debug!("Cached {} elements for room {}", snapshot.len(), room),
            Err(e) => warn!("Failed to cache room {}: {}", room, e),
        }
    }

    async fn shutdown(&mut self) {
        self.flush().await;
        if let Some(connection) = self.connection.take() {
            connection.leave();
        }
        info!("Left room {}", self.engine.room());
    }
}

/// Entry point: one local identity taking part in any number of rooms.
pub struct Mesh {
    transport: Arc<dyn MeshTransport>,
    config: SyncConfig,
    secrets: LocalSecrets,
    cache: SnapshotCache,
    identity: LocalIdentity,
    rooms: Mutex<HashMap<RoomId, Arc<RoomSession>>>,
}

impl Mesh {
    /// Build from config: secrets and caches live under `data_dir` when set.
    pub fn new(transport: Arc<dyn MeshTransport>, config: SyncConfig) -> Self {
        let secrets = match config.secrets_path() {
            Some(path) => LocalSecrets::new(Arc::new(JsonFileStore::open(path))),
            None => LocalSecrets::in_memory(),
        };
        let identity = LocalIdentity::load_or_create(&secrets);
        let cache = config.snapshot_cache();
        Self::with_parts(transport, config, secrets, cache, identity)
    }

    pub fn with_parts(
        transport: Arc<dyn MeshTransport>,
        config: SyncConfig,
        secrets: LocalSecrets,
        cache: SnapshotCache,
        identity: LocalIdentity,
    ) -> Self {
        Self {
            transport,
            config,
            secrets,
            cache,
            identity,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn secrets(&self) -> &LocalSecrets {
        &self.secrets
    }

    /// Join `room`, or return the session already running for it.
    pub async fn join(&self, room: impl Into<RoomId>) -> Result<Arc<RoomSession>> {
        let room = room.into();
        let mut rooms = self.rooms.lock().await;
        if let Some(session) = rooms.get(&room) {
            if !session.is_closed() {
                return Ok(session.clone());
            }
        }

        let session = RoomSession::start(
            room.clone(),
            self.transport.clone(),
            &self.config,
            self.secrets.clone(),
            self.cache.clone(),
            self.identity.clone(),
        )
        .await?;
        rooms.insert(room, session.clone());
        Ok(session)
    }

    /// Create a room, optionally protected by `password`, and join it.
    pub async fn create_room(
        &self,
        room: impl Into<RoomId>,
        password: Option<String>,
    ) -> Result<Arc<RoomSession>> {
        let room = room.into();
        let Some(password) = password.filter(|p| !p.is_empty()) else {
            return self.join(room).await;
        };

        if let Some(existing) = self.secrets.creator_password(&room) {
            if existing != password {
                return Err(SyncError::RoomProtected(room));
            }
        }
        self.secrets.set_creator_password(&room, &password);

        let session = self.join(room).await?;
        session.create(password).await?;
        info!("Created protected room {}", session.room());
        Ok(session)
    }

    pub async fn leave(&self, room: &RoomId) -> Result<()> {
        let session = self.rooms.lock().await.remove(room);
        match session {
            Some(session) => session.leave().await,
            None => Ok(()),
        }
    }

    pub async fn rooms(&self) -> Vec<RoomId> {
        self.rooms.lock().await.keys().cloned().collect()
    }

    /// Leave every room.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.rooms.lock().await.drain().collect();
        for (room, session) in sessions {
            if let Err(e) = session.leave().await {
                warn!("Failed to leave room {}: {}", room, e);
            }
        }
    }
}
