use super::group::{GroupChannel, GroupCommunication, GroupEvent};
use super::{ActorCoordinator, ActorEvent, ClusterView, NodeInfo, PlacementStrategy, EVENT_CAPACITY};
use crate::actor::{ActorKey, ActorRemoteInfo, ActorRepository, ContractId, NodeId};
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::message::Protocol;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Operations replicated through the group, in total order.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum CoordinationOp {
    CreateActor { name: String, target: NodeId },
    ActorCreated { name: String, key: ActorKey },
    RemoveActor { name: String },
}

#[derive(Debug, Clone)]
enum Readiness {
    /// Waiting for the first view.
    Joining,
    Ready(ClusterView),
    Closed,
}

struct Shared<P: Protocol> {
    contract: ContractId,
    node: NodeInfo,
    repository: Arc<ActorRepository<P>>,
    config: RuntimeConfig,
    placement: Arc<dyn PlacementStrategy>,
    channel: Arc<dyn GroupChannel>,
    actors_by_name: DashMap<String, ActorRemoteInfo>,
    pending: DashMap<String, Vec<oneshot::Sender<ActorRemoteInfo>>>,
    readiness: watch::Sender<Readiness>,
    events: broadcast::Sender<ActorEvent>,
    closed: AtomicBool,
}

/// Coordinator replicating the name map over a totally ordered group broadcast.
///
/// # Architecture Note
/// One task owns the group's event queue and applies every delivery, view change and
/// checkpoint in order. Callers of [`get_or_create`](ActorCoordinator::get_or_create)
/// never mutate the map themselves: they broadcast and wait for the event loop to
/// observe the outcome.
///
/// A placement proceeds as follows:
///
/// - **Target is remote**: broadcast `CreateActor(name, target)`. The target creates the
///   instance when that broadcast is delivered and broadcasts `ActorCreated`.
/// - **Target is local**: create the instance immediately, then broadcast `ActorCreated`.
///
/// Every member adds the first `ActorCreated` delivered for a name and ignores the rest.
/// A member that hosts a losing instance disposes it, so exactly one instance per name
/// survives. Each attempt waits `create_timeout`; after `create_attempts` attempts the
/// call fails with [`RuntimeError::CoordinationTimeout`].
///
/// Until the first view is delivered (and with it any checkpoint), every operation waits.
pub struct ReplicatedCoordinator<P: Protocol> {
    shared: Arc<Shared<P>>,
    task: JoinHandle<()>,
}

impl<P: Protocol> ReplicatedCoordinator<P> {
    /// Joins the coordination group of `contract` and starts the event loop.
    pub async fn start(
        contract: ContractId,
        repository: Arc<ActorRepository<P>>,
        group: &dyn GroupCommunication,
        config: RuntimeConfig,
        placement: Arc<dyn PlacementStrategy>,
    ) -> Result<Self> {
        let node = repository.node().clone();
        let membership = group.join(&format!("ActorCoordination-{}", contract.0), node.clone()).await?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (readiness, _) = watch::channel(Readiness::Joining);

        let shared = Arc::new(Shared {
            contract,
            node,
            repository,
            config,
            placement,
            channel: membership.channel,
            actors_by_name: DashMap::new(),
            pending: DashMap::new(),
            readiness,
            events,
            closed: AtomicBool::new(false),
        });
        let task = tokio::spawn(shared.clone().run(membership.events));
        info!(%contract, node = %shared.node.node_id, "Coordinator joined group");

        Ok(Self { shared, task })
    }

    /// The latest view, once the coordinator is ready.
    pub fn view(&self) -> Option<ClusterView> {
        match &*self.shared.readiness.borrow() {
            Readiness::Ready(view) => Some(view.clone()),
            _ => None,
        }
    }
}

impl<P: Protocol> Drop for ReplicatedCoordinator<P> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<P: Protocol> Shared<P> {
    async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<GroupEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                GroupEvent::Deliver { sender, payload } => match bincode::deserialize::<CoordinationOp>(&payload) {
                    Ok(op) => self.apply(op),
                    Err(e) => warn!(%sender, error = %e, "Dropping undecodable coordination op"),
                },
                GroupEvent::ViewChanged(view) => self.on_view_changed(view),
                GroupEvent::CheckpointRequested { respond_to } => match self.make_checkpoint() {
                    Ok(bytes) => {
                        let _ = respond_to.send(bytes);
                    }
                    Err(e) => warn!(error = %e, "Failed to make checkpoint"),
                },
                GroupEvent::LoadCheckpoint(checkpoint) => match checkpoint.await {
                    Ok(bytes) => self.load_checkpoint(&bytes),
                    Err(_) => warn!("Checkpoint source left before answering; starting empty"),
                },
            }
        }
        debug!(contract = %self.contract, "Coordinator event loop finished");
    }

    fn apply(self: &Arc<Self>, op: CoordinationOp) {
        match op {
            CoordinationOp::CreateActor { name, target } => self.on_create_actor(name, target),
            CoordinationOp::ActorCreated { name, key } => self.on_actor_created(ActorRemoteInfo { name, key }),
            CoordinationOp::RemoveActor { name } => self.on_remove_actor(&name),
        }
    }

    fn on_create_actor(self: &Arc<Self>, name: String, target: NodeId) {
        if target != self.node.node_id {
            return;
        }
        if self.actors_by_name.contains_key(&name) {
            debug!(%name, "Ignoring create for known actor");
            return;
        }
        debug!(%name, "Received create actor operation");
        let actor = match self.repository.create(&name, self.contract) {
            Ok(actor) => actor,
            Err(e) => {
                warn!(%name, error = %e, "Failed to create actor");
                return;
            }
        };

        // Broadcasting from inside the event loop would hold up delivery of everything else.
        let key = actor.actor_ref().key;
        let shared = self.clone();
        tokio::spawn(async move {
            if let Err(e) = shared.broadcast(&CoordinationOp::ActorCreated { name: name.clone(), key }).await {
                warn!(%name, error = %e, "Failed to announce actor; removing it");
                shared.repository.remove(key.local_actor_id);
            }
        });
    }

    fn on_actor_created(&self, info: ActorRemoteInfo) {
        let local = self.node.node_id;
        let winner = match self.actors_by_name.entry(info.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => Some(existing.get().key),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(info.clone());
                None
            }
        };

        match winner {
            None => {
                debug!(name = %info.name, key = %info.key, "Actor added");
                // Speculative local instances of a name won elsewhere are garbage.
                if info.key.owner_node_id != local {
                    self.repository.remove_by_name(self.contract, &info.name);
                }
                if let Some((_, waiters)) = self.pending.remove(&info.name) {
                    for waiter in waiters {
                        let _ = waiter.send(info.clone());
                    }
                }
                let _ = self.events.send(ActorEvent::Added(info));
            }
            Some(winner) => {
                debug!(name = %info.name, key = %info.key, %winner, "Received duplicate actor creation");
                if info.key.owner_node_id == local && info.key != winner {
                    self.repository.remove(info.key.local_actor_id);
                }
            }
        }
    }

    fn on_remove_actor(&self, name: &str) {
        let Some((_, info)) = self.actors_by_name.remove(name) else {
            debug!(%name, "Remove for unregistered actor");
            return;
        };
        if info.key.owner_node_id == self.node.node_id {
            self.repository.remove(info.key.local_actor_id);
        }
        debug!(%name, key = %info.key, "Actor removed");
        let _ = self.events.send(ActorEvent::Removed(info));
    }

    fn on_view_changed(&self, view: ClusterView) {
        for leaver in &view.leavers {
            let orphaned: Vec<String> = self
                .actors_by_name
                .iter()
                .filter(|entry| entry.key.owner_node_id == leaver.node_id)
                .map(|entry| entry.key().clone())
                .collect();
            for name in orphaned {
                if let Some((_, info)) = self.actors_by_name.remove(&name) {
                    info!(%name, owner = %leaver.node_id, "Purging actor of departed node");
                    let _ = self.events.send(ActorEvent::Removed(info));
                }
            }
        }

        info!(
            contract = %self.contract,
            view_id = view.view_id,
            members = view.members.len(),
            joiners = view.joiners.len(),
            leavers = view.leavers.len(),
            "Cluster view changed"
        );
        if !self.closed.load(Ordering::Acquire) {
            self.readiness.send_replace(Readiness::Ready(view));
        }
    }

    fn snapshot(&self) -> Vec<ActorRemoteInfo> {
        let mut actors: Vec<_> = self.actors_by_name.iter().map(|entry| entry.value().clone()).collect();
        actors.sort_by(|a, b| a.name.cmp(&b.name));
        actors
    }

    fn make_checkpoint(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&self.snapshot())?)
    }

    /// Adds every entry not already known; re-applying a checkpoint changes nothing.
    fn load_checkpoint(&self, bytes: &[u8]) {
        let actors: Vec<ActorRemoteInfo> = match bincode::deserialize(bytes) {
            Ok(actors) => actors,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable checkpoint");
                return;
            }
        };
        let mut added = 0;
        for info in actors {
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.actors_by_name.entry(info.name.clone()) {
                slot.insert(info);
                added += 1;
            }
        }
        info!(added, "Loaded coordination checkpoint");
    }

    async fn broadcast(&self, op: &CoordinationOp) -> Result<()> {
        let payload = bincode::serialize(op)?;
        self.channel.ordered_send(payload).await
    }

    async fn ready_view(&self) -> Result<ClusterView> {
        let mut readiness = self.readiness.subscribe();
        let state = readiness
            .wait_for(|state| !matches!(state, Readiness::Joining))
            .await
            .map_err(|_| RuntimeError::CoordinatorClosed)?;
        match &*state {
            Readiness::Ready(view) => Ok(view.clone()),
            _ => Err(RuntimeError::CoordinatorClosed),
        }
    }

    fn register_waiter(&self, name: &str) -> oneshot::Receiver<ActorRemoteInfo> {
        let (waiter, completion) = oneshot::channel();
        let mut waiters = self.pending.entry(name.to_string()).or_default();
        waiters.retain(|w| !w.is_closed());
        waiters.push(waiter);
        completion
    }

    /// Drops the waiter list of `name` once nobody is waiting on it any more.
    fn forget_closed_waiters(&self, name: &str) {
        self.pending
            .remove_if(name, |_, waiters| waiters.iter().all(|w| w.is_closed()));
    }

    async fn place(&self, name: &str, view: &ClusterView) -> Result<()> {
        let local = self.node.node_id;
        let target = self.placement.pick(view, local).map(|n| n.node_id).unwrap_or(local);
        debug!(%name, %target, "Placing actor");

        if target != local {
            return self
                .broadcast(&CoordinationOp::CreateActor {
                    name: name.to_string(),
                    target,
                })
                .await;
        }

        let actor = self.repository.create(name, self.contract)?;
        let key = actor.actor_ref().key;
        let announced = self
            .broadcast(&CoordinationOp::ActorCreated {
                name: name.to_string(),
                key,
            })
            .await;
        if announced.is_err() {
            self.repository.remove(key.local_actor_id);
        }
        announced
    }
}

#[async_trait]
impl<P: Protocol> ActorCoordinator for ReplicatedCoordinator<P> {
    fn contract(&self) -> ContractId {
        self.shared.contract
    }

    async fn get_or_create(&self, name: &str) -> Result<ActorKey> {
        let shared = &self.shared;
        shared.ready_view().await?;
        if let Some(info) = shared.actors_by_name.get(name) {
            debug!(%name, key = %info.key, "Resolved from cache");
            return Ok(info.key);
        }

        let attempts = shared.config.create_attempts.max(1);
        let mut backoff = shared.config.create_backoff();
        for attempt in 1..=attempts {
            let completion = shared.register_waiter(name);
            // The map is checked after registering so a concurrent ActorCreated is never missed.
            if let Some(info) = shared.actors_by_name.get(name) {
                return Ok(info.key);
            }

            let view = shared.ready_view().await?;
            shared.place(name, &view).await?;

            match tokio::time::timeout(shared.config.create_timeout(), completion).await {
                Ok(Ok(info)) => return Ok(info.key),
                Ok(Err(_)) => return Err(RuntimeError::CoordinatorClosed),
                Err(_) => {
                    warn!(%name, attempt, attempts, "Actor creation not observed in time");
                    if attempt < attempts {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        shared.forget_closed_waiters(name);
        match shared.actors_by_name.get(name) {
            Some(info) => Ok(info.key),
            None => Err(RuntimeError::CoordinationTimeout {
                name: name.to_string(),
                attempts,
            }),
        }
    }

    async fn remove_actor(&self, name: &str) -> Result<()> {
        let shared = &self.shared;
        shared.ready_view().await?;
        if !shared.actors_by_name.contains_key(name) {
            return Ok(());
        }

        let mut events = shared.events.subscribe();
        shared.broadcast(&CoordinationOp::RemoveActor { name: name.to_string() }).await?;

        let removed = async {
            loop {
                match events.recv().await {
                    Ok(ActorEvent::Removed(info)) if info.name == name => return Ok(()),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(_)) if !shared.actors_by_name.contains_key(name) => return Ok(()),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return Err(RuntimeError::CoordinatorClosed),
                }
            }
        };
        tokio::time::timeout(shared.config.create_timeout(), removed)
            .await
            .map_err(|_| RuntimeError::CoordinationTimeout {
                name: name.to_string(),
                attempts: 1,
            })?
    }

    async fn get_actors(&self) -> Result<Vec<ActorRemoteInfo>> {
        self.shared.ready_view().await?;
        Ok(self.shared.snapshot())
    }

    fn subscribe(&self) -> broadcast::Receiver<ActorEvent> {
        self.shared.events.subscribe()
    }

    async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.channel.leave().await;
        self.task.abort();
        self.shared.readiness.send_replace(Readiness::Closed);
        // Dropping the waiters fails their callers with CoordinatorClosed.
        self.shared.pending.clear();
        info!(contract = %self.shared.contract, "Coordinator shut down");
    }
}
