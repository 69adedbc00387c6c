use super::{Actor, ActorDescription, ActorEntity, ActorInit, ActorKey, ActorRef, ContractId};
use crate::config::RuntimeConfig;
use crate::coordination::NodeInfo;
use crate::error::{Result, RuntimeError};
use crate::fiber::{Fiber, ReadWriteFiber};
use crate::message::Protocol;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

type FiberFactory = Arc<dyn Fn(&RuntimeConfig) -> Arc<dyn Fiber> + Send + Sync>;

/// Registers actor types before the repository is built.
pub struct ActorRepositoryBuilder<P: Protocol> {
    descriptions: Vec<ActorDescription<P>>,
    fiber_factory: FiberFactory,
}

impl<P: Protocol> ActorRepositoryBuilder<P> {
    pub fn new() -> Self {
        Self {
            descriptions: Vec::new(),
            fiber_factory: Arc::new(|config: &RuntimeConfig| -> Arc<dyn Fiber> {
                Arc::new(ReadWriteFiber::new(config.read_parallelism, config.max_queue_size))
            }),
        }
    }

    pub fn register<A: ActorEntity<Protocol = P>>(mut self) -> Self {
        self.descriptions.push(ActorDescription::of::<A>());
        self
    }

    /// Replaces the fiber given to each new actor.
    pub fn with_fiber_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&RuntimeConfig) -> Arc<dyn Fiber> + Send + Sync + 'static,
    {
        self.fiber_factory = Arc::new(factory);
        self
    }

    /// Fails with [`RuntimeError::DuplicateContract`] if two types share a primary contract.
    pub fn build(self, node: NodeInfo, config: RuntimeConfig) -> Result<ActorRepository<P>> {
        let mut descriptions = HashMap::new();
        for description in self.descriptions {
            let contract = description.primary_contract;
            if descriptions.insert(contract, Arc::new(description)).is_some() {
                return Err(RuntimeError::DuplicateContract(contract));
            }
        }
        Ok(ActorRepository {
            node,
            config,
            descriptions,
            fiber_factory: self.fiber_factory,
            actors: Mutex::new(HashMap::new()),
            next_local_id: AtomicU32::new(1),
        })
    }
}

impl<P: Protocol> Default for ActorRepositoryBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Node-local factory and registry of live actors.
///
/// Creation and removal are rare next to message traffic, so one mutex guards the whole
/// id map. The repository never checks name uniqueness; keeping one instance per name
/// is the coordinator's job.
pub struct ActorRepository<P: Protocol> {
    node: NodeInfo,
    config: RuntimeConfig,
    descriptions: HashMap<ContractId, Arc<ActorDescription<P>>>,
    fiber_factory: FiberFactory,
    actors: Mutex<HashMap<u32, Arc<Actor<P>>>>,
    next_local_id: AtomicU32,
}

impl<P: Protocol> ActorRepository<P> {
    pub fn builder() -> ActorRepositoryBuilder<P> {
        ActorRepositoryBuilder::new()
    }

    /// Instantiates a new actor of the type registered under `contract`.
    pub fn create(self: &Arc<Self>, name: &str, contract: ContractId) -> Result<Arc<Actor<P>>> {
        let description = self
            .descriptions
            .get(&contract)
            .cloned()
            .ok_or(RuntimeError::UnknownActorType(contract))?;

        let mut actors = self.actors.lock();
        let local_actor_id = self.next_local_id.fetch_add(1, Ordering::Relaxed);
        let init = ActorInit {
            name: name.to_string(),
            actor_ref: ActorRef {
                location: self.node.address.clone(),
                key: ActorKey::new(self.node.node_id, local_actor_id),
            },
            contract,
        };

        let fiber = (self.fiber_factory)(&self.config);
        let processor = description.instantiate(&init, fiber.clone())?;

        let repository = Arc::downgrade(self);
        let actor = Arc::new(Actor::new(
            init,
            description.clone(),
            fiber,
            processor,
            Box::new(move |local_actor_id| {
                if let Some(repository) = repository.upgrade() {
                    repository.actors.lock().remove(&local_actor_id);
                }
            }),
        ));
        actors.insert(local_actor_id, actor.clone());

        info!(
            %name,
            key = %actor.actor_ref().key,
            actor_type = description.type_name,
            size = actors.len(),
            "Actor created"
        );
        Ok(actor)
    }

    /// Forgets and disposes the actor with `local_actor_id`.
    pub fn remove(&self, local_actor_id: u32) -> Option<Arc<Actor<P>>> {
        let actor = self.actors.lock().remove(&local_actor_id)?;
        actor.dispose();
        Some(actor)
    }

    /// Removes the instance named `name` whose type implements `contract`.
    pub fn remove_by_name(&self, contract: ContractId, name: &str) -> Option<Arc<Actor<P>>> {
        let actor = {
            let mut actors = self.actors.lock();
            let local_actor_id = actors
                .iter()
                .find(|(_, actor)| actor.name() == name && actor.description().implements(contract))
                .map(|(id, _)| *id)?;
            actors.remove(&local_actor_id)?
        };
        debug!(%name, key = %actor.actor_ref().key, "Removing actor by name");
        actor.dispose();
        Some(actor)
    }

    pub fn try_get(&self, local_actor_id: u32) -> Option<Arc<Actor<P>>> {
        self.actors.lock().get(&local_actor_id).cloned()
    }

    pub fn contains(&self, local_actor_id: u32) -> bool {
        self.actors.lock().contains_key(&local_actor_id)
    }

    pub fn description(&self, contract: ContractId) -> Option<&ActorDescription<P>> {
        self.descriptions.get(&contract).map(|d| d.as_ref())
    }

    pub fn descriptions(&self) -> impl Iterator<Item = &ActorDescription<P>> {
        self.descriptions.values().map(|d| d.as_ref())
    }

    pub fn len(&self) -> usize {
        self.actors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node(&self) -> &NodeInfo {
        &self.node
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Disposes every hosted actor.
    pub fn dispose_all(&self) {
        let actors: Vec<_> = self.actors.lock().drain().map(|(_, actor)| actor).collect();
        for actor in &actors {
            actor.dispose();
        }
        if !actors.is_empty() {
            info!(count = actors.len(), "Disposed all actors");
        }
    }
}
