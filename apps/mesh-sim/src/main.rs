//! Mesh board simulator
//! Runs several peers in one process over the loopback mesh and reports
//! whether their boards converge.

use anyhow::{bail, Context, Result};
use board::{Element, ElementKind, ElementPatch, Point};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use mesh_sync::{
    AccessStatus, BoardState, LocalIdentity, LocalSecrets, LoopbackMesh, Mesh, MeshTransport,
    RoomId, RoomSession, SnapshotCache, SyncConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mesh-sim")]
#[command(about = "Simulate peers editing a shared board over an in-process mesh")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a room, let peers edit it and check convergence
    Run {
        /// Number of peers, including the room creator
        #[arg(short, long, default_value_t = 3)]
        peers: usize,

        /// Room name
        #[arg(short, long, default_value = "demo")]
        room: String,

        /// Protect the room; guests first join without it and then retry
        #[arg(long)]
        password: Option<String>,

        /// Elements each peer adds
        #[arg(short, long, default_value_t = 2)]
        edits: usize,

        /// Seconds to wait for convergence
        #[arg(long, default_value_t = 5)]
        timeout: u64,

        /// JSON file with sync settings
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the converged board as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default sync settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mesh_sim=info,mesh_sync=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            peers,
            room,
            password,
            edits,
            timeout,
            config,
            json,
        } => {
            let config = match config {
                Some(path) => SyncConfig::from_json_file(&path)
                    .with_context(|| format!("reading config {}", path.display()))?,
                None => SyncConfig::ephemeral(),
            };
            run(
                config,
                peers,
                RoomId::new(room),
                password,
                edits,
                Duration::from_secs(timeout),
                json,
            )
            .await?;
            Ok(())
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&SyncConfig::default())?);
            Ok(())
        }
    }
}

async fn run(
    config: SyncConfig,
    peers: usize,
    room: RoomId,
    password: Option<String>,
    edits: usize,
    timeout: Duration,
    json: bool,
) -> Result<usize> {
    if peers == 0 {
        bail!("need at least one peer");
    }
    let transport: Arc<dyn MeshTransport> = Arc::new(LoopbackMesh::new());

    let meshes: Vec<Mesh> = (0..peers)
        .map(|i| {
            let identity = LocalIdentity::generate();
            info!("Peer {} is {} ({})", i, identity.display_name, identity.peer_id);
            Mesh::with_parts(
                transport.clone(),
                config.clone(),
                LocalSecrets::in_memory(),
                SnapshotCache::memory(),
                identity,
            )
        })
        .collect();

    // Creator goes first so guests have someone to ask.
    let creator = meshes[0]
        .create_room(room.clone(), password.clone())
        .await?;
    creator
        .add_element(
            Element::new(ElementKind::Text, 0.0, 0.0, creator.local_peer().as_str())
                .with_content(format!("Welcome to {}", room)),
        )
        .await?;

    let guests = join_all(
        meshes[1..]
            .iter()
            .map(|mesh| join_guest(mesh, room.clone(), password.clone(), timeout)),
    )
    .await
    .into_iter()
    .collect::<Result<Vec<_>>>()?;

    let mut sessions = vec![creator];
    sessions.extend(guests);

    join_all(sessions.iter().enumerate().map(|(i, s)| edit(s, i, edits)))
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let expected = 1 + peers * edits;
    let converged = await_convergence(&sessions, expected, timeout).await;

    let states: Vec<BoardState> = sessions.iter().map(|s| s.state()).collect();
    for (session, state) in sessions.iter().zip(&states) {
        println!(
            "{:<38} elements={:<4} cursors={:<3} peers={:<3} access={:?}",
            session.local_peer().as_str(),
            state.elements.len(),
            state.cursors.len(),
            state.peers.len(),
            state.access,
        );
    }

    if json {
        let board: Vec<&Element> = states[0].elements.values().collect();
        println!("{}", serde_json::to_string_pretty(&board)?);
    }

    for mesh in &meshes {
        mesh.shutdown().await;
    }

    converged?;
    println!("converged: {} elements on {} peers", expected, peers);
    Ok(expected)
}

async fn join_guest(
    mesh: &Mesh,
    room: RoomId,
    password: Option<String>,
    timeout: Duration,
) -> Result<Arc<RoomSession>> {
    let session = mesh.join(room).await?;
    let Some(password) = password else {
        return Ok(session);
    };

    // Without the password the creator refuses us.
    tokio::time::timeout(timeout, session.wait_for(|s| s.is_locked()))
        .await
        .context("guest was never refused")??;
    info!("{} is locked out, retrying with password", mesh.identity().display_name);

    session.retry_join(Some(password)).await?;
    tokio::time::timeout(
        timeout,
        session.wait_for(|s| s.access == AccessStatus::Unlocked),
    )
    .await
    .context("guest was never let in")??;
    Ok(session)
}

/// Each peer draws, drops a sticky, nudges it and waves its cursor.
async fn edit(session: &RoomSession, index: usize, edits: usize) -> Result<()> {
    let me = session.local_peer().as_str().to_string();
    let base = index as f64 * 100.0;

    for n in 0..edits {
        let offset = n as f64 * 20.0;
        let element = if n % 2 == 0 {
            Element::new(ElementKind::sticky("#FFD966"), base, offset, me.as_str())
                .with_content(format!("note {} from peer {}", n, index))
                .with_size(120.0, 80.0)
        } else {
            let points = (0..5)
                .map(|k| Point::new(base + k as f64 * 4.0, offset + (k % 2) as f64 * 4.0))
                .collect();
            Element::new(ElementKind::path(points), base, offset, me.as_str())
        };
        let id = element.id.clone();
        session.add_element(element).await?;
        session
            .update_element(id, ElementPatch::position(base + 5.0, offset + 5.0))
            .await?;
        session.move_cursor(base + offset, offset).await?;
    }
    Ok(())
}

async fn await_convergence(
    sessions: &[Arc<RoomSession>],
    expected: usize,
    timeout: Duration,
) -> Result<()> {
    if tokio::time::timeout(timeout, converge(sessions, expected))
        .await
        .is_err()
    {
        warn!("Peers did not converge within {:?}", timeout);
        bail!("{} peers did not converge on {} elements", sessions.len(), expected);
    }
    Ok(())
}

async fn converge(sessions: &[Arc<RoomSession>], expected: usize) {
    loop {
        let states: Vec<BoardState> = sessions.iter().map(|s| s.state()).collect();
        let first = &states[0].elements;
        if first.len() == expected && states.iter().all(|s| &s.elements == first) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
