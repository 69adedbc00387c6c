//! # Actors
//!
//! An [`Actor`] is an addressable unit of state. It owns a [`Fiber`](crate::fiber::Fiber)
//! and a built pipeline, and exposes a single entry point: [`Actor::process`].
//!
//! Application code never builds actors directly. It implements [`ActorEntity`] for its
//! state type, registers the type with an [`ActorRepository`], and lets the repository
//! (driven by a coordinator) create instances by name.
//!
//! ## Identity
//!
//! - [`ActorKey`]: cluster-unique identity of one live instance, `(owner node, local id)`.
//! - [`ActorRef`]: a key plus the network address of its owner.
//! - [`ActorRemoteInfo`]: the coordinator's record binding a logical name to a key.

mod description;
mod entity;
mod proxy;
mod repository;

pub use description::ActorDescription;
pub use entity::{Actor, ActorEntity, ActorInit};
pub use proxy::ActorProxy;
pub use repository::{ActorRepository, ActorRepositoryBuilder};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Numeric id of an actor contract (the protocol family an actor type implements).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContractId(pub u32);

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contract-{}", self.0)
    }
}

/// Cluster-unique identity of a live actor instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorKey {
    pub owner_node_id: NodeId,
    pub local_actor_id: u32,
}

impl ActorKey {
    pub fn new(owner_node_id: NodeId, local_actor_id: u32) -> Self {
        Self {
            owner_node_id,
            local_actor_id,
        }
    }
}

impl fmt::Display for ActorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_node_id.0, self.local_actor_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkAddress(pub String);

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Routable reference to an actor. Carries no ownership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorRef {
    pub location: NetworkAddress,
    pub key: ActorKey,
}

/// Coordinator record binding a logical name to the winning instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorRemoteInfo {
    pub name: String,
    pub key: ActorKey,
}
