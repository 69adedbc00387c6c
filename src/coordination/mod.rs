//! # Actor Coordination
//!
//! A coordinator maps logical actor names to the single live instance that owns each name
//! across the cluster. One coordinator runs per primary contract on every node.
//!
//! ## Implementations
//!
//! - [`LocalOnlyCoordinator`]: one process-local map behind one lock. Every actor is
//!   created locally. Meant for single-node deployments and tests.
//! - [`ReplicatedCoordinator`]: replicates the name map over a totally ordered group
//!   broadcast (see [`group`]). Creations race freely; because every member sees the
//!   `ActorCreated` broadcasts for a name in the same order, the first one delivered wins
//!   everywhere and losers are torn down by their owners.
//!
//! Both publish [`ActorEvent`]s through a `tokio::sync::broadcast` channel.

pub mod group;
mod local;
mod replicated;

pub use group::{GroupChannel, GroupCommunication, GroupEvent, GroupHub, GroupMembership};
pub use local::LocalOnlyCoordinator;
pub use replicated::ReplicatedCoordinator;

use crate::actor::{ActorKey, ActorRemoteInfo, ContractId, NetworkAddress, NodeId};
use crate::error::Result;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A cluster member as seen by the group layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub address: NetworkAddress,
}

impl NodeInfo {
    pub fn new(node_id: NodeId, address: impl Into<String>) -> Self {
        Self {
            node_id,
            address: NetworkAddress(address.into()),
        }
    }
}

/// Immutable membership snapshot delivered on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterView {
    pub view_id: u64,
    pub leader_id: NodeId,
    /// Current members, oldest first.
    pub members: Vec<NodeInfo>,
    pub joiners: Vec<NodeInfo>,
    pub leavers: Vec<NodeInfo>,
}

impl ClusterView {
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.members.iter().any(|m| m.node_id == node_id)
    }

    pub fn member(&self, node_id: NodeId) -> Option<&NodeInfo> {
        self.members.iter().find(|m| m.node_id == node_id)
    }
}

/// Change to a coordinator's name map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorEvent {
    Added(ActorRemoteInfo),
    Removed(ActorRemoteInfo),
}

impl ActorEvent {
    pub fn info(&self) -> &ActorRemoteInfo {
        match self {
            ActorEvent::Added(info) | ActorEvent::Removed(info) => info,
        }
    }
}

pub(crate) const EVENT_CAPACITY: usize = 1024;

/// Cluster-wide name service for one primary contract.
#[async_trait]
pub trait ActorCoordinator: Send + Sync {
    fn contract(&self) -> ContractId;

    /// Returns the key of the instance owning `name`, creating one somewhere in the
    /// cluster if none exists.
    async fn get_or_create(&self, name: &str) -> Result<ActorKey>;

    /// Removes `name` cluster-wide and destroys its instance. Unknown names are a no-op.
    async fn remove_actor(&self, name: &str) -> Result<()>;

    /// Snapshot of the name map, sorted by name.
    async fn get_actors(&self) -> Result<Vec<ActorRemoteInfo>>;

    fn subscribe(&self) -> broadcast::Receiver<ActorEvent>;

    async fn shutdown(&self);
}

/// Chooses the node that should host a new actor.
pub trait PlacementStrategy: Send + Sync {
    fn pick(&self, view: &ClusterView, local: NodeId) -> Option<NodeInfo>;
}

/// Uniformly random member of the current view.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomPlacement;

impl PlacementStrategy for RandomPlacement {
    fn pick(&self, view: &ClusterView, _local: NodeId) -> Option<NodeInfo> {
        view.members.choose(&mut rand::thread_rng()).cloned()
    }
}

/// Always the calling node.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalPlacement;

impl PlacementStrategy for LocalPlacement {
    fn pick(&self, view: &ClusterView, local: NodeId) -> Option<NodeInfo> {
        view.member(local).cloned()
    }
}

impl<F> PlacementStrategy for F
where
    F: Fn(&ClusterView, NodeId) -> Option<NodeInfo> + Send + Sync,
{
    fn pick(&self, view: &ClusterView, local: NodeId) -> Option<NodeInfo> {
        self(view, local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> ClusterView {
        let members = vec![NodeInfo::new(NodeId(1), "a"), NodeInfo::new(NodeId(2), "b")];
        ClusterView {
            view_id: 2,
            leader_id: NodeId(1),
            joiners: vec![members[1].clone()],
            leavers: vec![],
            members,
        }
    }

    #[test]
    fn placement_strategies_pick_members() {
        let view = view();
        for _ in 0..20 {
            let picked = RandomPlacement.pick(&view, NodeId(1)).unwrap();
            assert!(view.contains(picked.node_id));
        }
        assert_eq!(LocalPlacement.pick(&view, NodeId(2)).unwrap().node_id, NodeId(2));
        assert!(LocalPlacement.pick(&view, NodeId(9)).is_none());

        let last = |view: &ClusterView, _: NodeId| view.members.last().cloned();
        assert_eq!(last.pick(&view, NodeId(1)).unwrap().node_id, NodeId(2));
    }
}
