use crate::actor::{
    ActorKey, ActorProxy, ActorRef, ActorRepository, ActorRepositoryBuilder, ContractId, NetworkAddress, NodeId,
};
use crate::channel::NetChannel;
use crate::config::RuntimeConfig;
use crate::coordination::{
    ActorCoordinator, GroupCommunication, LocalOnlyCoordinator, NodeInfo, PlacementStrategy, RandomPlacement,
    ReplicatedCoordinator,
};
use crate::error::{Result, RuntimeError};
use crate::message::{MessageSerializer, Protocol};
use crate::pipeline::{Operation, PipelineBuilder, Processor};
use crate::transport::{memory_pipe, Inbound, TransportChannel};
use dashmap::DashMap;
use futures::future::{self, BoxFuture};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How a contract's names are coordinated.
#[derive(Clone)]
pub enum CoordinationMode {
    /// Single node: every actor is created here.
    LocalOnly,
    /// Cluster-wide, over a total-order group substrate.
    Replicated {
        group: Arc<dyn GroupCommunication>,
        placement: Arc<dyn PlacementStrategy>,
    },
}

impl CoordinationMode {
    /// Replicated coordination with random placement.
    pub fn replicated(group: Arc<dyn GroupCommunication>) -> Self {
        CoordinationMode::Replicated {
            group,
            placement: Arc::new(RandomPlacement),
        }
    }
}

/// The runtime orchestrator of one cluster node.
///
/// `Node` is responsible for:
/// - **Hosting**: the [`ActorRepository`] holding this node's actor instances.
/// - **Coordination**: one [`ActorCoordinator`] per primary contract.
/// - **Connectivity**: one [`NetChannel`] per peer node, whose inbound pipeline routes
///   operations to local actors by [`ActorKey`].
/// - **Proxies**: resolving a key to a local or remote [`ActorProxy`].
///
/// # Example
///
/// ```ignore
/// let node = Node::new(info, config, ActorRepository::builder().register::<Room>(), serializer)?;
/// node.start_coordinator(Room::PRIMARY_CONTRACT, CoordinationMode::LocalOnly).await?;
///
/// let room = node.get_or_create_actor(Room::PRIMARY_CONTRACT, "lobby").await?;
/// let reply: Joined = room.request(Join("alice".into())).await?;
///
/// node.shutdown().await;
/// ```
pub struct Node<P: Protocol> {
    info: NodeInfo,
    config: RuntimeConfig,
    repository: Arc<ActorRepository<P>>,
    serializer: Arc<dyn MessageSerializer<P>>,
    coordinators: RwLock<HashMap<ContractId, Arc<dyn ActorCoordinator>>>,
    peers: Arc<DashMap<NodeId, Peer<P>>>,
}

struct Peer<P: Protocol> {
    address: NetworkAddress,
    channel: Arc<NetChannel<P>>,
}

impl<P: Protocol> Node<P> {
    /// Builds the repository from `actors`. Fails if two actor types share a primary contract.
    pub fn new(
        info: NodeInfo,
        config: RuntimeConfig,
        actors: ActorRepositoryBuilder<P>,
        serializer: Arc<dyn MessageSerializer<P>>,
    ) -> Result<Self> {
        let repository = Arc::new(actors.build(info.clone(), config.clone())?);
        info!(node = %info.node_id, address = %info.address, "Node started");
        Ok(Self {
            info,
            config,
            repository,
            serializer,
            coordinators: RwLock::new(HashMap::new()),
            peers: Arc::new(DashMap::new()),
        })
    }

    pub fn info(&self) -> &NodeInfo {
        &self.info
    }

    pub fn node_id(&self) -> NodeId {
        self.info.node_id
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<ActorRepository<P>> {
        &self.repository
    }

    /// Wires two in-process nodes together with a memory pipe.
    pub fn connect(a: &Node<P>, b: &Node<P>) {
        let ((a_link, a_inbound), (b_link, b_inbound)) = memory_pipe();
        a.attach_peer(b.info().clone(), a_link, a_inbound);
        b.attach_peer(a.info().clone(), b_link, b_inbound);
    }

    /// Starts a channel to `peer` over an established connection. Replaces (and
    /// disposes) any previous channel to the same peer.
    pub fn attach_peer(&self, peer: NodeInfo, transport: Arc<dyn TransportChannel>, inbound: Inbound) -> Arc<NetChannel<P>> {
        let NodeInfo { node_id: peer, address } = peer;
        let repository = self.repository.clone();
        let local_node = self.node_id();
        let idle_timeout = self.config.idle_disconnect_timeout();

        let channel = NetChannel::spawn(
            Some(peer),
            transport,
            inbound,
            self.serializer.clone(),
            self.config.send_timeout(),
            move |channel, builder| {
                let mut builder = builder.use_tracing("net");
                if let Some(timeout) = idle_timeout {
                    builder = builder.use_idle_disconnect(timeout, move || {
                        if let Some(channel) = channel.upgrade() {
                            info!(%peer, ?timeout, "Disconnecting idle peer");
                            channel.dispose();
                        }
                    });
                }
                route_to_actors(builder, local_node, repository)
            },
        );

        let previous = self.peers.insert(
            peer,
            Peer {
                address,
                channel: channel.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.channel.dispose();
        }

        let peers = self.peers.clone();
        let watched = channel.clone();
        tokio::spawn(async move {
            watched.closed().await;
            peers.remove_if(&peer, |_, current| Arc::ptr_eq(&current.channel, &watched));
            debug!(%peer, "Peer channel removed");
        });

        info!(node = %local_node, %peer, "Peer attached");
        channel
    }

    pub fn peer(&self, peer: NodeId) -> Option<Arc<NetChannel<P>>> {
        self.peers.get(&peer).map(|entry| entry.channel.clone())
    }

    /// Starts the coordinator for `contract`. Starting one twice replaces nothing and
    /// returns the running coordinator.
    pub async fn start_coordinator(&self, contract: ContractId, mode: CoordinationMode) -> Result<Arc<dyn ActorCoordinator>> {
        let existing = self.coordinators.read().get(&contract).cloned();
        if let Some(existing) = existing {
            return Ok(existing);
        }
        if self.repository.description(contract).is_none() {
            return Err(RuntimeError::UnknownActorType(contract));
        }

        let coordinator: Arc<dyn ActorCoordinator> = match mode {
            CoordinationMode::LocalOnly => Arc::new(LocalOnlyCoordinator::new(contract, self.repository.clone())),
            CoordinationMode::Replicated { group, placement } => Arc::new(
                ReplicatedCoordinator::start(contract, self.repository.clone(), group.as_ref(), self.config.clone(), placement)
                    .await?,
            ),
        };

        let mut coordinators = self.coordinators.write();
        let coordinator = coordinators.entry(contract).or_insert(coordinator).clone();
        info!(node = %self.node_id(), %contract, "Coordinator started");
        Ok(coordinator)
    }

    pub fn coordinator(&self, contract: ContractId) -> Result<Arc<dyn ActorCoordinator>> {
        self.coordinators
            .read()
            .get(&contract)
            .cloned()
            .ok_or(RuntimeError::UnknownCoordinator(contract))
    }

    /// Resolves `key` to a proxy: the actor itself when hosted here, otherwise the
    /// channel to its owner.
    pub fn get_actor(&self, key: ActorKey) -> Result<ActorProxy<P>> {
        if key.owner_node_id == self.node_id() {
            return self
                .repository
                .try_get(key.local_actor_id)
                .map(ActorProxy::Local)
                .ok_or(RuntimeError::NonExistentActor(key));
        }

        let peer = self
            .peers
            .get(&key.owner_node_id)
            .ok_or(RuntimeError::NoRoute(key.owner_node_id))?;
        Ok(ActorProxy::Remote {
            actor_ref: ActorRef {
                location: peer.address.clone(),
                key,
            },
            channel: peer.channel.clone(),
        })
    }

    /// Resolves `name` through the contract's coordinator, creating the actor if needed.
    pub async fn get_or_create_actor(&self, contract: ContractId, name: &str) -> Result<ActorProxy<P>> {
        let key = self.coordinator(contract)?.get_or_create(name).await?;
        self.get_actor(key)
    }

    /// Calls `query` once per actor known to the contract's coordinator, concurrently.
    ///
    /// Replies come back in name order. The first failure fails the whole query.
    pub async fn query_group<T, F, Fut>(&self, contract: ContractId, query: F) -> Result<Vec<T>>
    where
        F: Fn(String, ActorProxy<P>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let actors = self.coordinator(contract)?.get_actors().await?;
        debug!(%contract, count = actors.len(), "Querying group");

        let calls = actors
            .into_iter()
            .map(|info| self.get_actor(info.key).map(|proxy| query(info.name, proxy)))
            .collect::<Result<Vec<_>>>()?;
        future::try_join_all(calls).await
    }

    /// Stops coordinators, disposes every hosted actor, then closes all peer channels.
    pub async fn shutdown(&self) {
        info!(node = %self.node_id(), "Shutting down node...");

        let coordinators: Vec<_> = self.coordinators.write().drain().map(|(_, c)| c).collect();
        for coordinator in coordinators {
            coordinator.shutdown().await;
        }

        self.repository.dispose_all();

        let peers: Vec<_> = self.peers.iter().map(|entry| entry.channel.clone()).collect();
        for channel in peers {
            channel.dispose();
        }
        self.peers.clear();

        info!(node = %self.node_id(), "Node shutdown complete.");
    }
}

/// Innermost channel stage: hands each operation to the local actor it targets.
fn route_to_actors<P: Protocol>(
    builder: PipelineBuilder<P>,
    local_node: NodeId,
    repository: Arc<ActorRepository<P>>,
) -> PipelineBuilder<P> {
    builder.use_stage(move |_next| -> Processor<P> {
        Arc::new(move |operation: Operation<P>| -> BoxFuture<'static, Result<Option<P>>> {
            let Some(key) = operation.context.target else {
                warn!(kind = ?operation.message.kind(), "Operation without target actor");
                return Box::pin(future::ready(Err(RuntimeError::UnexpectedMessage(
                    "operation without target actor".to_string(),
                ))));
            };
            match repository.try_get(key.local_actor_id).filter(|_| key.owner_node_id == local_node) {
                Some(actor) => actor.process(operation),
                None => {
                    debug!(%key, "Target actor not hosted here");
                    Box::pin(future::ready(Err(RuntimeError::NonExistentActor(key))))
                }
            }
        })
    })
}
