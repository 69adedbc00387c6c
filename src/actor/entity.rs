use super::{ActorDescription, ActorRef, ContractId};
use crate::error::Result;
use crate::fiber::Fiber;
use crate::message::Protocol;
use crate::pipeline::{HandlerConfig, Operation, Processor};
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Everything an actor learns about itself at creation time.
#[derive(Debug, Clone)]
pub struct ActorInit {
    pub name: String,
    pub actor_ref: ActorRef,
    pub contract: ContractId,
}

/// Trait that every actor type implements to be hosted by an [`ActorRepository`](super::ActorRepository).
///
/// # Architecture Note
/// The entity holds only business state. Plumbing (the fiber, the pipeline, routing and
/// replies) belongs to the runtime, which wraps the entity in an [`Actor`].
///
/// Handlers receive the entity through `Arc<Self>`, so mutable state sits behind interior
/// mutability. The fiber already serializes Write handlers; the lock inside the entity
/// only has to satisfy the borrow checker and is never contended by two writers.
///
/// # Provided Methods (Hooks)
/// - [`ActorEntity::on_created`] runs as the first Write item on the actor's fiber, before
///   any message is handled.
#[async_trait]
pub trait ActorEntity: Send + Sync + Sized + 'static {
    type Protocol: Protocol;

    /// Contract under which instances are created and coordinated.
    const PRIMARY_CONTRACT: ContractId;

    /// Additional contracts the type implements.
    const CONTRACTS: &'static [ContractId] = &[];

    fn create(init: &ActorInit) -> Result<Self>;

    /// Registers message handlers and their fiber locks.
    fn configure(self: Arc<Self>, handlers: HandlerConfig<Self::Protocol>) -> HandlerConfig<Self::Protocol>;

    async fn on_created(&self, _actor_ref: &ActorRef) -> Result<()> {
        Ok(())
    }
}

type DisposeHook = Box<dyn FnOnce(u32) + Send>;

/// A live actor instance: its identity, fiber and built pipeline.
pub struct Actor<P: Protocol> {
    name: String,
    actor_ref: ActorRef,
    description: Arc<ActorDescription<P>>,
    fiber: Arc<dyn Fiber>,
    processor: Processor<P>,
    on_dispose: Mutex<Option<DisposeHook>>,
}

impl<P: Protocol> Actor<P> {
    pub(crate) fn new(
        init: ActorInit,
        description: Arc<ActorDescription<P>>,
        fiber: Arc<dyn Fiber>,
        processor: Processor<P>,
        on_dispose: DisposeHook,
    ) -> Self {
        Self {
            name: init.name,
            actor_ref: init.actor_ref,
            description,
            fiber,
            processor,
            on_dispose: Mutex::new(Some(on_dispose)),
        }
    }

    /// Feeds one operation through the actor's pipeline.
    pub fn process(&self, operation: Operation<P>) -> BoxFuture<'static, Result<Option<P>>> {
        (self.processor)(operation)
    }

    /// Stops the fiber and detaches the actor from its repository. Idempotent.
    ///
    /// Queued operations that have not started fail with `FiberStopped`.
    pub fn dispose(&self) {
        let Some(hook) = self.on_dispose.lock().take() else {
            return;
        };
        self.fiber.stop();
        hook(self.actor_ref.key.local_actor_id);
        info!(name = %self.name, key = %self.actor_ref.key, actor_type = self.description.type_name, "Actor disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.fiber.is_stopped()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn actor_ref(&self) -> &ActorRef {
        &self.actor_ref
    }

    pub fn description(&self) -> &ActorDescription<P> {
        &self.description
    }

    pub fn fiber(&self) -> &Arc<dyn Fiber> {
        &self.fiber
    }
}

impl<P: Protocol> std::fmt::Debug for Actor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("name", &self.name)
            .field("actor_ref", &self.actor_ref)
            .field("type_name", &self.description.type_name)
            .finish()
    }
}
