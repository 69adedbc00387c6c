//! # Node Lifecycle & Orchestration
//!
//! Actors, fibers and coordinators are simple on their own. Wiring them into a running
//! node is where the complexity lives, and this module owns that wiring.
//!
//! **Key Responsibilities:**
//! 1. **Hosting** - build the node's [`ActorRepository`](crate::actor::ActorRepository)
//!    from the registered actor types
//! 2. **Coordination** - start one coordinator per primary contract, local-only or replicated
//! 3. **Connectivity** - attach a [`NetChannel`](crate::channel::NetChannel) per peer and
//!    route inbound operations to local actors
//! 4. **Graceful Shutdown** - stop coordinators, dispose actors, then close peer channels
//! 5. **Observability Setup** - initialize tracing ([`setup_tracing`])
//!
//! ## Startup Sequence
//!
//! ```rust,ignore
//! let hub = GroupHub::new();
//! let a = Node::new(node_a, config.clone(), rooms(), serializer.clone())?;
//! let b = Node::new(node_b, config, rooms(), serializer)?;
//! Node::connect(&a, &b);
//!
//! for node in [&a, &b] {
//!     node.start_coordinator(Room::PRIMARY_CONTRACT, CoordinationMode::replicated(Arc::new(hub.clone())))
//!         .await?;
//! }
//! ```
//!
//! ## Shutdown Order
//!
//! Coordinators go first so no new placement lands on a node that is tearing down.
//! Queued operations on disposed actors fail with `FiberStopped`; requests still pending
//! on peer channels fail with `ChannelClosed`.

mod node;
pub mod tracing;

pub use self::tracing::setup_tracing;
pub use node::{CoordinationMode, Node};
