use super::{ActorCoordinator, ActorEvent, EVENT_CAPACITY};
use crate::actor::{ActorKey, ActorRemoteInfo, ActorRepository, ContractId};
use crate::error::{Result, RuntimeError};
use crate::message::Protocol;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Coordinator for a single node: every actor is created locally and tracked in one
/// lock-guarded map.
pub struct LocalOnlyCoordinator<P: Protocol> {
    contract: ContractId,
    repository: Arc<ActorRepository<P>>,
    actors: Mutex<HashMap<String, ActorRemoteInfo>>,
    events: broadcast::Sender<ActorEvent>,
    closed: AtomicBool,
}

impl<P: Protocol> LocalOnlyCoordinator<P> {
    pub fn new(contract: ContractId, repository: Arc<ActorRepository<P>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            contract,
            repository,
            actors: Mutex::new(HashMap::new()),
            events,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RuntimeError::CoordinatorClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl<P: Protocol> ActorCoordinator for LocalOnlyCoordinator<P> {
    fn contract(&self) -> ContractId {
        self.contract
    }

    async fn get_or_create(&self, name: &str) -> Result<ActorKey> {
        self.ensure_open()?;
        let mut actors = self.actors.lock();
        if let Some(info) = actors.get(name) {
            // An actor disposed behind our back is replaced.
            if self.repository.contains(info.key.local_actor_id) {
                return Ok(info.key);
            }
        }

        let actor = self.repository.create(name, self.contract)?;
        let info = ActorRemoteInfo {
            name: name.to_string(),
            key: actor.actor_ref().key,
        };
        actors.insert(name.to_string(), info.clone());
        debug!(%name, key = %info.key, "Created local actor");
        let _ = self.events.send(ActorEvent::Added(info.clone()));
        Ok(info.key)
    }

    async fn remove_actor(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        let removed = self.actors.lock().remove(name);
        if let Some(info) = removed {
            self.repository.remove(info.key.local_actor_id);
            let _ = self.events.send(ActorEvent::Removed(info));
        }
        Ok(())
    }

    async fn get_actors(&self) -> Result<Vec<ActorRemoteInfo>> {
        self.ensure_open()?;
        let mut actors: Vec<_> = self.actors.lock().values().cloned().collect();
        actors.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(actors)
    }

    fn subscribe(&self) -> broadcast::Receiver<ActorEvent> {
        self.events.subscribe()
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.actors.lock().clear();
    }
}
