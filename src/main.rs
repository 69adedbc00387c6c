//! # Actor Mesh Demo
//!
//! Three in-process nodes share a replicated chat-room directory:
//! 1. Every node asks for the same rooms at once; each room ends up on exactly one node.
//! 2. Posts travel to whichever node owns the room, locally or over a peer channel.
//! 3. A group query gathers the history length of every room.
//! 4. One room is removed cluster-wide, then the nodes shut down.

use actor_mesh::actor::{ActorEntity, ActorInit, ActorRef, ActorRepository, ContractId, NodeId};
use actor_mesh::coordination::{GroupHub, NodeInfo};
use actor_mesh::fiber::LockType;
use actor_mesh::lifecycle::{setup_tracing, CoordinationMode, Node};
use actor_mesh::message::{BincodeSerializer, MessageSerializer};
use actor_mesh::pipeline::HandlerConfig;
use actor_mesh::{Result, RuntimeConfig};
use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub user: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posted {
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetHistory;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History(pub Vec<String>);

actor_mesh::protocol! {
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub enum Chat {
        Post(Post),
        Posted(Posted),
        GetHistory(GetHistory),
        History(History),
    }
}

/// One chat room: an append-only message log.
struct ChatRoom {
    name: String,
    history: Mutex<Vec<String>>,
}

#[async_trait]
impl ActorEntity for ChatRoom {
    type Protocol = Chat;

    const PRIMARY_CONTRACT: ContractId = ContractId(1);

    fn create(init: &ActorInit) -> Result<Self> {
        Ok(Self {
            name: init.name.clone(),
            history: Mutex::new(Vec::new()),
        })
    }

    fn configure(self: Arc<Self>, handlers: HandlerConfig<Chat>) -> HandlerConfig<Chat> {
        let poster = self.clone();
        handlers
            .handle_request_sync(move |post: Post, _ctx| {
                let mut history = poster.history.lock();
                history.push(format!("{}: {}", post.user, post.text));
                info!(room = %poster.name, count = history.len(), "Message posted");
                Ok(Posted { count: history.len() })
            })
            .handle_request_sync(move |_: GetHistory, _ctx| Ok(History(self.history.lock().clone())))
            .lock::<GetHistory>(LockType::Read)
    }

    async fn on_created(&self, actor_ref: &ActorRef) -> Result<()> {
        info!(room = %self.name, key = %actor_ref.key, location = %actor_ref.location, "Room opened");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup tracing once for the entire application
    setup_tracing();

    let config = RuntimeConfig::default();
    let serializer: Arc<dyn MessageSerializer<Chat>> = Arc::new(BincodeSerializer::new(config.max_message_size));
    let hub = GroupHub::new();
    let contract = ChatRoom::PRIMARY_CONTRACT;

    let nodes = (1..=3)
        .map(|id| {
            Node::new(
                NodeInfo::new(NodeId(id), format!("mem://node-{id}")),
                config.clone(),
                ActorRepository::builder().register::<ChatRoom>(),
                serializer.clone(),
            )
        })
        .collect::<Result<Vec<_>>>()?;
    for (i, a) in nodes.iter().enumerate() {
        for b in &nodes[i + 1..] {
            Node::connect(a, b);
        }
    }
    for node in &nodes {
        node.start_coordinator(contract, CoordinationMode::replicated(Arc::new(hub.clone())))
            .await?;
    }

    // Every node races for every room.
    let rooms = ["lobby", "rust", "random"];
    let span = info_span!("placement");
    async {
        for room in rooms {
            let keys = try_join_all(nodes.iter().map(|node| async move {
                let proxy = node.get_or_create_actor(contract, room).await?;
                Ok::<_, actor_mesh::RuntimeError>(proxy.actor_ref().key)
            }))
            .await?;
            info!(%room, owner = %keys[0], agreed = keys.iter().all(|k| *k == keys[0]), "Room placed");
        }
        Ok::<_, actor_mesh::RuntimeError>(())
    }
    .instrument(span)
    .await?;

    for (i, node) in nodes.iter().enumerate() {
        let lobby = node.get_or_create_actor(contract, "lobby").await?;
        let posted: Posted = lobby
            .request(Post {
                user: format!("user-{}", i + 1),
                text: format!("hello from {}", node.node_id()),
            })
            .await?;
        info!(node = %node.node_id(), local = lobby.is_local(), count = posted.count, "Posted to lobby");
    }

    let sizes = nodes[0]
        .query_group(contract, |name, room| async move {
            let History(lines) = room.request(GetHistory).await?;
            Ok::<_, actor_mesh::RuntimeError>((name, lines.len()))
        })
        .await?;
    for (room, lines) in &sizes {
        info!(%room, lines, "Room history");
    }

    let coordinator = nodes[2].coordinator(contract)?;
    coordinator.remove_actor("random").await?;
    info!(remaining = coordinator.get_actors().await?.len(), "Room removed");

    for node in &nodes {
        node.shutdown().await;
    }
    Ok(())
}
