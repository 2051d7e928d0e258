/// Multi-peer scenarios: handshake, password gate, merge races, presence,
/// and full sessions over the in-process mesh.
use board::{Element, ElementId, ElementKind, ElementMap, ElementPatch};
use mesh_sync::*;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Engines wired together by a FIFO queue of encoded frames. Recipients of
/// a broadcast are fixed when it is sent, as on a real mesh.
struct Net {
    engines: BTreeMap<PeerId, SyncEngine>,
    queue: VecDeque<(PeerId, Vec<PeerId>, String)>,
}

impl Net {
    fn new() -> Self {
        Self {
            engines: BTreeMap::new(),
            queue: VecDeque::new(),
        }
    }

    fn engine(peer: &str, gate: AccessGate) -> SyncEngine {
        SyncEngine::new(
            RoomId::from("room"),
            LocalIdentity::for_peer(PeerId::from(peer), peer),
            gate,
            Duration::from_millis(50),
        )
    }

    fn push(&mut self, from: PeerId, out: Outbound) {
        let targets = match out.target {
            Some(peer) => vec![peer],
            None => self.engines.keys().filter(|p| **p != from).cloned().collect(),
        };
        let frame = out.action.encode().unwrap();
        self.queue.push_back((from, targets, frame));
    }

    fn join(&mut self, mut engine: SyncEngine) {
        let peer = engine.local_peer().clone();
        let mut sent = vec![(peer.clone(), engine.join_request())];

        for (other, existing) in self.engines.iter_mut() {
            for out in existing.on_peer_join(peer.clone()) {
                sent.push((other.clone(), out));
            }
            for out in engine.on_peer_join(other.clone()) {
                sent.push((peer.clone(), out));
            }
        }
        for (from, out) in sent {
            self.push(from, out);
        }
        self.engines.insert(peer, engine);
    }

    fn leave(&mut self, peer: &str) -> SyncEngine {
        let peer = PeerId::from(peer);
        let engine = self.engines.remove(&peer).unwrap();
        for other in self.engines.values_mut() {
            other.on_peer_leave(&peer);
        }
        engine
    }

    fn send(&mut self, from: &str, out: Outbound) {
        self.push(PeerId::from(from), out);
    }

    fn peek(&self, peer: &str) -> &SyncEngine {
        &self.engines[&PeerId::from(peer)]
    }

    fn get(&mut self, peer: &str) -> &mut SyncEngine {
        self.engines.get_mut(&PeerId::from(peer)).unwrap()
    }

    /// Deliver until quiet.
    fn pump(&mut self) {
        while let Some((from, targets, frame)) = self.queue.pop_front() {
            for target in targets {
                let Some(engine) = self.engines.get_mut(&target) else {
                    continue;
                };
                let replies = engine.handle_frame(&from, &frame);
                for reply in replies {
                    self.push(target.clone(), reply);
                }
            }
        }
    }
}

fn element(id: &str, created_at: Option<i64>, last_modified_at: Option<i64>) -> Element {
    Element::new(ElementKind::Text, 0.0, 0.0, "a")
        .with_id(id)
        .with_created_at(created_at)
        .with_last_modified_at(last_modified_at)
}

fn snapshot(items: Vec<Element>) -> ElementMap {
    items.into_iter().map(|e| (e.id.clone(), e)).collect()
}

#[tokio::test]
async fn test_new_peer_receives_existing_board() {
    let mut net = Net::new();

    // A creates an open room and adds e1
    let mut a = Net::engine("a", AccessGate::unprotected());
    let e1 = element("e1", Some(100), None);
    a.add_element(e1.clone()).unwrap();
    net.join(a);

    // B joins
    net.join(Net::engine("b", AccessGate::unprotected()));
    net.pump();

    assert_eq!(net.get("b").elements().get(&e1.id), Some(&e1));
    assert_eq!(net.peek("a").elements(), net.peek("b").elements());
}

#[tokio::test]
async fn test_wrong_password_locks_and_retry_unlocks() {
    let mut net = Net::new();

    let mut a = Net::engine("a", AccessGate::creator("secret"));
    a.add_element(element("e1", Some(100), None)).unwrap();
    net.join(a);

    // B has no password
    net.join(Net::engine("b", AccessGate::unprotected()));
    net.pump();

    let b = net.get("b");
    assert_eq!(
        b.access_status(),
        AccessStatus::Locked {
            reason: "Incorrect Password".into()
        }
    );
    assert!(b.elements().is_empty());

    // B retries with the right password
    let retry = net.get("b").retry_join(Some("secret".into()));
    assert_eq!(retry.action, Action::sync_request(Some("secret".into())));
    net.send("b", retry);
    net.pump();

    let b = net.get("b");
    assert_eq!(b.access_status(), AccessStatus::Unlocked);
    assert!(b.elements().contains_key(&ElementId::from("e1")));
    assert_eq!(b.take_verified_secret(), Some("secret".into()));
}

#[tokio::test]
async fn test_password_gate_decisions() {
    let mut a = Net::engine("a", AccessGate::creator("P"));
    a.add_element(element("e1", Some(1), None)).unwrap();
    let b = PeerId::from("b");

    let out = a.handle(&b, Action::sync_request(Some("P".into())));
    assert!(matches!(&out[..], [Outbound { action: Action::SyncResponse(r), .. }] if r.elements.len() == 1));

    for supplied in [Some("Q".to_string()), None] {
        let out = a.handle(&b, Action::sync_request(supplied));
        assert_eq!(
            out,
            vec![Outbound::to(b.clone(), Action::access_denied("Incorrect Password"))]
        );
    }
}

#[tokio::test]
async fn test_open_room_peer_with_content_always_answers() {
    let mut a = Net::engine("a", AccessGate::unprotected());
    a.add_element(element("e1", Some(1), None)).unwrap();
    a.add_element(element("e2", Some(2), None)).unwrap();

    for supplied in [None, Some("anything".to_string())] {
        let out = a.handle(&PeerId::from("b"), Action::sync_request(supplied));
        match &out[..] {
            [Outbound { action: Action::SyncResponse(r), .. }] => {
                assert_eq!(&r.elements, a.elements())
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_stale_snapshot_does_not_roll_back() {
    let mut a = Net::engine("a", AccessGate::unprotected());
    a.add_element(element("e1", Some(100), Some(500))).unwrap();

    a.handle(
        &PeerId::from("c"),
        Action::sync_response(snapshot(vec![element("e1", Some(100), Some(300))])),
    );

    assert_eq!(a.elements()[&ElementId::from("e1")].last_modified_at, Some(500));
}

#[tokio::test]
async fn test_late_snapshot_resurrects_deleted_element() {
    let mut a = Net::engine("a", AccessGate::unprotected());
    a.add_element(element("e2", Some(100), Some(200))).unwrap();

    // A deletes e2 while C still has it
    let delete = a.delete_element(&ElementId::from("e2")).unwrap();
    assert_eq!(delete.action, Action::delete(ElementId::from("e2")));
    assert!(a.elements().is_empty());

    a.handle(
        &PeerId::from("c"),
        Action::sync_response(snapshot(vec![element("e2", Some(100), Some(200))])),
    );

    // Known gap: deletes leave no tombstone
    assert!(a.elements().contains_key(&ElementId::from("e2")));
}

#[tokio::test]
async fn test_last_received_cursor_wins() {
    let mut a = Net::engine("a", AccessGate::unprotected());
    let p = LocalIdentity::for_peer(PeerId::from("p"), "Brave Fox");

    // sent second, received first
    a.handle(&p.peer_id, Action::CursorMove(p.cursor_at(20.0, 20.0)));
    a.handle(&p.peer_id, Action::CursorMove(p.cursor_at(10.0, 10.0)));

    let cursor = &a.cursors()[&p.peer_id];
    assert_eq!((cursor.x, cursor.y), (10.0, 10.0));
    assert_eq!(a.cursors().len(), 1);
}

#[tokio::test]
async fn test_peer_leave_clears_cursor() {
    let mut net = Net::new();
    net.join(Net::engine("a", AccessGate::unprotected()));
    net.join(Net::engine("b", AccessGate::unprotected()));
    net.pump();

    let moved = net
        .get("b")
        .move_cursor(5.0, 6.0, std::time::Instant::now())
        .unwrap();
    net.send("b", moved);
    net.pump();
    assert!(net.get("a").cursors().contains_key(&PeerId::from("b")));

    net.leave("b");
    assert!(net.get("a").cursors().is_empty());
    assert!(net.get("a").peers().is_empty());

    // leaving without a prior join is harmless
    net.get("a").on_peer_leave(&PeerId::from("never-seen"));
}

#[tokio::test]
async fn test_edits_propagate_after_handshake() {
    let mut net = Net::new();
    net.join(Net::engine("a", AccessGate::unprotected()));
    net.join(Net::engine("b", AccessGate::unprotected()));
    net.pump();

    let sticky = Element::new(ElementKind::sticky("#FFD700"), 10.0, 10.0, "a").with_id("s1");
    let add = net.get("a").add_element(sticky).unwrap();
    net.send("a", add);
    net.pump();

    let id = ElementId::from("s1");
    let update = net
        .get("b")
        .update_element(&id, ElementPatch::content("hello"))
        .unwrap();
    net.send("b", update);
    net.pump();

    assert_eq!(net.get("a").elements()[&id].content, "hello");
    assert_eq!(net.peek("a").elements(), net.peek("b").elements());

    let delete = net.get("a").delete_element(&id).unwrap();
    net.send("a", delete);
    net.pump();
    assert!(net.get("b").elements().is_empty());
}

#[tokio::test]
async fn test_verified_guest_reseeds_room() {
    let mut net = Net::new();
    let mut a = Net::engine("a", AccessGate::creator("secret"));
    a.add_element(element("e1", Some(1), None)).unwrap();
    net.join(a);
    net.join(Net::engine("b", AccessGate::guest(Some("secret".into()))));
    net.pump();
    assert_eq!(net.get("b").access_status(), AccessStatus::Unlocked);

    // creator goes away; B now seeds newcomers under the same secret
    net.leave("a");
    net.join(Net::engine("c", AccessGate::guest(Some("secret".into()))));
    net.join(Net::engine("d", AccessGate::guest(Some("wrong".into()))));
    net.pump();

    assert!(net.get("c").elements().contains_key(&ElementId::from("e1")));
    // only the creator refuses; the re-seeding guests just stay silent
    assert!(net.get("d").elements().is_empty());
    assert_eq!(net.get("d").access_status(), AccessStatus::Pending);
}

#[tokio::test]
async fn test_open_newcomer_answer_does_not_let_wrong_password_in() {
    let mut net = Net::new();
    let mut a = Net::engine("a", AccessGate::creator("secret"));
    a.add_element(element("e1", Some(1), None)).unwrap();
    net.join(a);

    // D has never heard of a password and answers anyone with its empty board
    net.join(Net::engine("d", AccessGate::unprotected()));
    net.join(Net::engine("c", AccessGate::guest(Some("wrong".into()))));
    net.pump();

    let c = net.get("c");
    assert_eq!(
        c.access_status(),
        AccessStatus::Locked {
            reason: REASON_INCORRECT_PASSWORD.into()
        }
    );
    assert_eq!(c.take_verified_secret(), None);
    assert!(c.elements().is_empty());

    let add = net.get("a").add_element(element("e2", Some(2), None)).unwrap();
    net.send("a", add);
    net.pump();
    assert!(net.get("c").elements().is_empty());
    assert!(net.get("c").gate().is_locked());
}

#[tokio::test]
async fn test_locked_peer_ignores_broadcast_edits() {
    let mut net = Net::new();
    net.join(Net::engine("a", AccessGate::creator("secret")));
    net.join(Net::engine("b", AccessGate::unprotected()));
    net.pump();
    assert!(net.get("b").gate().is_locked());

    let add = net.get("a").add_element(element("e9", Some(1), None)).unwrap();
    net.send("a", add);
    net.pump();

    assert!(net.get("b").elements().is_empty());
}

// Full sessions over the loopback mesh

async fn eventually(
    session: &RoomSession,
    predicate: impl FnMut(&BoardState) -> bool,
) -> BoardState {
    tokio::time::timeout(Duration::from_secs(5), session.wait_for(predicate))
        .await
        .expect("board did not converge in time")
        .unwrap()
}

fn mesh_for(transport: &LoopbackMesh, peer: &str, cache: SnapshotCache) -> Mesh {
    Mesh::with_parts(
        Arc::new(transport.clone()),
        SyncConfig::ephemeral(),
        LocalSecrets::in_memory(),
        cache,
        LocalIdentity::for_peer(PeerId::from(peer), peer),
    )
}

#[tokio::test]
async fn test_sessions_converge_over_loopback() {
    let transport = LoopbackMesh::new();
    let alice = mesh_for(&transport, "alice", SnapshotCache::memory());
    let bob = mesh_for(&transport, "bob", SnapshotCache::memory());

    let a = alice.join("r1").await.unwrap();
    a.add_element(element("e1", Some(100), None)).await.unwrap();

    let b = bob.join("r1").await.unwrap();
    eventually(&b, |s| s.elements.contains_key(&ElementId::from("e1"))).await;

    b.add_element(Element::new(ElementKind::music(), 0.0, 0.0, "bob").with_id("m1"))
        .await
        .unwrap();
    eventually(&a, |s| s.elements.len() == 2).await;

    b.move_cursor(3.0, 4.0).await.unwrap();
    let state = eventually(&a, |s| s.cursors.contains_key(&PeerId::from("bob"))).await;
    assert!(state.peers.contains(&PeerId::from("bob")));

    bob.leave(&RoomId::from("r1")).await.unwrap();
    eventually(&a, |s| s.cursors.is_empty() && s.peers.is_empty()).await;
}

#[tokio::test]
async fn test_protected_room_over_loopback() {
    let transport = LoopbackMesh::new();
    let alice = mesh_for(&transport, "alice", SnapshotCache::memory());
    let bob = mesh_for(&transport, "bob", SnapshotCache::memory());

    let a = alice
        .create_room("r2", Some("secret".into()))
        .await
        .unwrap();
    a.add_element(element("e1", Some(100), None)).await.unwrap();

    let b = bob.join("r2").await.unwrap();
    let locked = eventually(&b, |s| s.is_locked()).await;
    assert!(locked.elements.is_empty());
    assert!(matches!(
        b.add_element(element("x", Some(1), None)).await,
        Err(SyncError::AccessLocked(_))
    ));

    b.retry_join(Some("secret".into())).await.unwrap();
    let unlocked = eventually(&b, |s| s.access == AccessStatus::Unlocked).await;
    assert!(unlocked.elements.contains_key(&ElementId::from("e1")));

    // the secret is remembered for the next session
    assert_eq!(
        bob.secrets().unlock_secret(&RoomId::from("r2")),
        Some("secret".into())
    );
}

#[tokio::test]
async fn test_refused_cached_secret_is_forgotten() {
    let transport = LoopbackMesh::new();
    let alice = mesh_for(&transport, "alice", SnapshotCache::memory());
    let bob = mesh_for(&transport, "bob", SnapshotCache::memory());
    let room = RoomId::from("r4");
    bob.secrets().set_unlock_secret(&room, "old");

    alice.create_room(room.clone(), Some("new".into())).await.unwrap();
    let b = bob.join(room.clone()).await.unwrap();
    let mut updates = b.subscribe();

    let locked = eventually(&b, |s| s.is_locked()).await;
    assert_eq!(
        locked.access,
        AccessStatus::Locked {
            reason: REASON_INCORRECT_PASSWORD.to_string()
        }
    );
    assert!(updates.borrow_and_update().is_locked());
    assert_eq!(bob.secrets().unlock_secret(&room), None);
}

#[tokio::test]
async fn test_cold_start_restores_cached_board() {
    let transport = LoopbackMesh::new();
    let cache = SnapshotCache::memory();
    let room = RoomId::from("r3");

    {
        let alice = mesh_for(&transport, "alice", cache.clone());
        let a = alice.join(room.clone()).await.unwrap();
        a.add_element(element("e1", Some(100), None)).await.unwrap();
        alice.leave(&room).await.unwrap();
    }
    assert!(cache.load(&room).await.unwrap().is_some());

    // nobody else is online; the cache alone brings the board back
    let alice = mesh_for(&transport, "alice", cache);
    let a = alice.join(room).await.unwrap();
    assert!(a.state().elements.contains_key(&ElementId::from("e1")));
}

#[tokio::test]
async fn test_disk_backed_mesh_remembers_identity() {
    let dir = tempfile::tempdir().unwrap();
    let config = SyncConfig {
        data_dir: Some(dir.path().to_path_buf()),
        ..SyncConfig::ephemeral()
    };
    let transport: Arc<dyn MeshTransport> = Arc::new(LoopbackMesh::new());

    let first = Mesh::new(transport.clone(), config.clone());
    let session = first.join("r4").await.unwrap();
    session
        .add_element(element("e1", Some(1), None))
        .await
        .unwrap();
    first.shutdown().await;

    let second = Mesh::new(transport, config);
    assert_eq!(first.identity(), second.identity());
    let session = second.join("r4").await.unwrap();
    assert_eq!(session.state().elements.len(), 1);
}
