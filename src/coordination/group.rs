//! # Group Communication
//!
//! The replicated coordinator is written against this narrow substrate: join a named
//! group, broadcast in total order, observe view changes, and transfer a checkpoint to
//! each joiner. Any implementation offering those guarantees can back it (a consensus
//! log, a partition-ordered broker, or the in-process [`GroupHub`] below).
//!
//! ## Event Model
//!
//! Everything a member observes arrives as a [`GroupEvent`] on one FIFO queue, consumed by
//! a single task. Deliveries, views and checkpoint traffic are therefore totally ordered
//! with respect to each other, with no callbacks running on foreign threads.
//!
//! ## Guarantees Expected From An Implementation
//!
//! 1. Every member delivers every `ordered_send` payload in one global order, including
//!    its own.
//! 2. A joiner's queue starts with [`GroupEvent::LoadCheckpoint`], whose bytes reflect
//!    exactly the broadcasts ordered before the join. Every later broadcast is delivered
//!    to the joiner after it.
//! 3. Membership changes are announced with [`GroupEvent::ViewChanged`] at the same point
//!    of the order on every member.

use super::{ClusterView, NodeInfo};
use crate::actor::NodeId;
use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

#[derive(Debug)]
pub enum GroupEvent {
    /// A payload broadcast by `sender`, in total order.
    Deliver { sender: NodeId, payload: Vec<u8> },
    ViewChanged(ClusterView),
    /// Produce a snapshot of the replicated state for a joiner.
    CheckpointRequested { respond_to: oneshot::Sender<Vec<u8>> },
    /// Install the snapshot before processing anything else. A dropped sender means the
    /// source member vanished; the joiner starts empty.
    LoadCheckpoint(oneshot::Receiver<Vec<u8>>),
}

/// A member's handle on a joined group.
pub struct GroupMembership {
    pub events: mpsc::UnboundedReceiver<GroupEvent>,
    pub channel: Arc<dyn GroupChannel>,
}

#[async_trait]
pub trait GroupCommunication: Send + Sync {
    async fn join(&self, group: &str, member: NodeInfo) -> Result<GroupMembership>;
}

#[async_trait]
pub trait GroupChannel: Send + Sync {
    /// Broadcasts `payload` to every member (sender included) in total order.
    async fn ordered_send(&self, payload: Vec<u8>) -> Result<()>;

    async fn leave(&self);
}

struct Member {
    info: NodeInfo,
    queue: mpsc::UnboundedSender<GroupEvent>,
}

#[derive(Default)]
struct GroupState {
    view_id: u64,
    members: Vec<Member>,
}

impl GroupState {
    fn view(&self, joiners: Vec<NodeInfo>, leavers: Vec<NodeInfo>) -> ClusterView {
        let members: Vec<NodeInfo> = self.members.iter().map(|m| m.info.clone()).collect();
        ClusterView {
            view_id: self.view_id,
            leader_id: members.first().map(|m| m.node_id).unwrap_or(NodeId(0)),
            members,
            joiners,
            leavers,
        }
    }

    /// Queues one event per member, built by `event`. Members whose queue is gone are
    /// dropped from the group and returned.
    fn deliver(&mut self, event: impl Fn() -> GroupEvent) -> Vec<NodeInfo> {
        let mut gone = Vec::new();
        self.members.retain(|member| {
            if member.queue.send(event()).is_ok() {
                true
            } else {
                gone.push(member.info.clone());
                false
            }
        });
        gone
    }

    /// Installs a new view without `leavers`, repeating until no further member is found gone.
    fn remove_members(&mut self, mut leavers: Vec<NodeInfo>) {
        while !leavers.is_empty() {
            self.members.retain(|m| !leavers.iter().any(|l| l.node_id == m.info.node_id));
            self.view_id += 1;
            let view = self.view(Vec::new(), leavers);
            info!(view_id = view.view_id, members = view.members.len(), leavers = view.leavers.len(), "Group view changed");
            leavers = self.deliver(|| GroupEvent::ViewChanged(view.clone()));
        }
    }
}

/// In-process leader-sequenced group substrate.
///
/// One lock orders every broadcast into every member queue, so all members observe one
/// global order. Used by tests and single-process deployments; clones share state.
#[derive(Clone, Default)]
pub struct GroupHub {
    groups: Arc<Mutex<HashMap<String, GroupState>>>,
}

impl GroupHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn join_group(&self, group: &str, member: NodeInfo) -> Result<GroupMembership> {
        let (queue, events) = mpsc::unbounded_channel();
        let mut groups = self.groups.lock();
        let state = groups.entry(group.to_string()).or_default();
        if state.members.iter().any(|m| m.info.node_id == member.node_id) {
            return Err(RuntimeError::Broadcast(format!("{} already joined {group}", member.node_id)));
        }

        // The oldest member answers the checkpoint; its queue holds every earlier
        // broadcast ahead of the request.
        if let Some(oldest) = state.members.first() {
            let (respond_to, checkpoint) = oneshot::channel();
            if oldest.queue.send(GroupEvent::CheckpointRequested { respond_to }).is_ok() {
                let _ = queue.send(GroupEvent::LoadCheckpoint(checkpoint));
            }
        }

        state.members.push(Member {
            info: member.clone(),
            queue,
        });
        state.view_id += 1;
        let view = state.view(vec![member.clone()], Vec::new());
        info!(%group, node = %member.node_id, view_id = view.view_id, members = view.members.len(), "Member joined group");
        let gone = state.deliver(|| GroupEvent::ViewChanged(view.clone()));
        state.remove_members(gone);

        Ok(GroupMembership {
            events,
            channel: Arc::new(HubChannel {
                hub: self.clone(),
                group: group.to_string(),
                node_id: member.node_id,
            }),
        })
    }

    fn broadcast(&self, group: &str, sender: NodeId, payload: Vec<u8>) -> Result<()> {
        let mut groups = self.groups.lock();
        let state = groups
            .get_mut(group)
            .filter(|state| state.members.iter().any(|m| m.info.node_id == sender))
            .ok_or_else(|| RuntimeError::Broadcast(format!("{sender} is not a member of {group}")))?;

        let gone = state.deliver(|| GroupEvent::Deliver {
            sender,
            payload: payload.clone(),
        });
        state.remove_members(gone);
        Ok(())
    }

    fn leave_group(&self, group: &str, node_id: NodeId) {
        let mut groups = self.groups.lock();
        let Some(state) = groups.get_mut(group) else {
            return;
        };
        let leavers: Vec<NodeInfo> = state
            .members
            .iter()
            .filter(|m| m.info.node_id == node_id)
            .map(|m| m.info.clone())
            .collect();
        debug!(%group, node = %node_id, "Member leaving group");
        state.remove_members(leavers);
    }

    /// Reports `node_id` as failed in every group it belongs to.
    pub fn fail_node(&self, node_id: NodeId) {
        let groups: Vec<String> = self.groups.lock().keys().cloned().collect();
        for group in groups {
            self.leave_group(&group, node_id);
        }
    }

    pub fn members(&self, group: &str) -> Vec<NodeInfo> {
        self.groups
            .lock()
            .get(group)
            .map(|state| state.members.iter().map(|m| m.info.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl GroupCommunication for GroupHub {
    async fn join(&self, group: &str, member: NodeInfo) -> Result<GroupMembership> {
        self.join_group(group, member)
    }
}

struct HubChannel {
    hub: GroupHub,
    group: String,
    node_id: NodeId,
}

#[async_trait]
impl GroupChannel for HubChannel {
    async fn ordered_send(&self, payload: Vec<u8>) -> Result<()> {
        self.hub.broadcast(&self.group, self.node_id, payload)
    }

    async fn leave(&self) {
        self.hub.leave_group(&self.group, self.node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64) -> NodeInfo {
        NodeInfo::new(NodeId(id), format!("node-{id}"))
    }

    #[tokio::test]
    async fn joiner_loads_checkpoint_before_later_broadcasts() {
        let hub = GroupHub::new();
        let mut first = hub.join("g", node(1)).await.unwrap();
        first.channel.ordered_send(vec![1]).await.unwrap();

        let mut second = hub.join("g", node(2)).await.unwrap();
        first.channel.ordered_send(vec![2]).await.unwrap();

        // First member: view(1), deliver(1), checkpoint request, view(2), deliver(2).
        assert!(matches!(first.events.recv().await, Some(GroupEvent::ViewChanged(v)) if v.view_id == 1));
        assert!(matches!(first.events.recv().await, Some(GroupEvent::Deliver { payload, .. }) if payload == vec![1]));
        match first.events.recv().await {
            Some(GroupEvent::CheckpointRequested { respond_to }) => respond_to.send(vec![42]).unwrap(),
            other => panic!("unexpected event: {other:?}"),
        }

        match second.events.recv().await {
            Some(GroupEvent::LoadCheckpoint(checkpoint)) => assert_eq!(checkpoint.await.unwrap(), vec![42]),
            other => panic!("unexpected event: {other:?}"),
        }
        match second.events.recv().await {
            Some(GroupEvent::ViewChanged(view)) => {
                assert_eq!(view.view_id, 2);
                assert_eq!(view.leader_id, NodeId(1));
                assert_eq!(view.joiners, vec![node(2)]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(second.events.recv().await, Some(GroupEvent::Deliver { payload, .. }) if payload == vec![2]));
    }

    #[tokio::test]
    async fn failed_node_is_reported_as_leaver() {
        let hub = GroupHub::new();
        let mut first = hub.join("g", node(1)).await.unwrap();
        let _second = hub.join("g", node(2)).await.unwrap();

        hub.fail_node(NodeId(2));
        assert_eq!(hub.members("g"), vec![node(1)]);

        let mut last_view = None;
        while let Ok(event) = first.events.try_recv() {
            if let GroupEvent::ViewChanged(view) = event {
                last_view = Some(view);
            }
        }
        let view = last_view.unwrap();
        assert_eq!(view.leavers, vec![node(2)]);
        assert!(!view.contains(NodeId(2)));

        assert!(hub.broadcast("g", NodeId(2), vec![]).is_err());
    }
}
