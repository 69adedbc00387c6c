use super::{ActorEntity, ActorInit, ContractId};
use crate::error::Result;
use crate::fiber::{Fiber, FiberExt, LockType};
use crate::message::Protocol;
use crate::pipeline::{HandlerConfig, PipelineBuilder, Processor};
use std::sync::Arc;
use tracing::{debug, warn};

type Factory<P> = Arc<dyn Fn(&ActorInit, Arc<dyn Fiber>) -> Result<Processor<P>> + Send + Sync>;

/// Static metadata about an actor type, derived once at registration.
pub struct ActorDescription<P: Protocol> {
    pub primary_contract: ContractId,
    /// Primary contract first, followed by every additional contract.
    pub contracts: Vec<ContractId>,
    pub type_name: &'static str,
    factory: Factory<P>,
}

impl<P: Protocol> ActorDescription<P> {
    pub fn of<A: ActorEntity<Protocol = P>>() -> Self {
        let type_name = std::any::type_name::<A>().split("::").last().unwrap_or("Unknown");

        let mut contracts = vec![A::PRIMARY_CONTRACT];
        for contract in A::CONTRACTS {
            if !contracts.contains(contract) {
                contracts.push(*contract);
            }
        }

        let factory: Factory<P> = Arc::new(move |init: &ActorInit, fiber: Arc<dyn Fiber>| -> Result<Processor<P>> {
            let entity = Arc::new(A::create(init)?);
            let handlers = entity.clone().configure(HandlerConfig::new());
            debug!(actor_type = type_name, handlers = handlers.len(), "Configured actor");

            // Queued before any message can reach the fiber.
            let actor_ref = init.actor_ref.clone();
            let created = fiber.call(LockType::Write, async move { entity.on_created(&actor_ref).await });
            let name = init.name.clone();
            tokio::spawn(async move {
                if let Err(e) = created.await {
                    warn!(actor_type = type_name, %name, error = %e, "on_created failed");
                }
            });

            Ok(PipelineBuilder::new()
                .use_fiber(fiber, handlers.lock_config())
                .use_dispatcher(handlers, true)
                .build())
        });

        Self {
            primary_contract: A::PRIMARY_CONTRACT,
            contracts,
            type_name,
            factory,
        }
    }

    pub fn implements(&self, contract: ContractId) -> bool {
        self.contracts.contains(&contract)
    }

    /// Creates the entity and builds its pipeline on `fiber`.
    pub(crate) fn instantiate(&self, init: &ActorInit, fiber: Arc<dyn Fiber>) -> Result<Processor<P>> {
        (self.factory)(init, fiber)
    }
}

impl<P: Protocol> std::fmt::Debug for ActorDescription<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorDescription")
            .field("primary_contract", &self.primary_contract)
            .field("contracts", &self.contracts)
            .field("type_name", &self.type_name)
            .finish()
    }
}
