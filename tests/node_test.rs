mod common;

use actor_mesh::actor::{ActorEntity, ActorKey, ContractId, NodeId};
use actor_mesh::coordination::{ClusterView, GroupHub, PlacementStrategy};
use actor_mesh::error::ErrorCode;
use actor_mesh::lifecycle::{CoordinationMode, Node};
use actor_mesh::{RuntimeConfig, RuntimeError};
use common::*;
use std::sync::Arc;

const CONTRACT: ContractId = Counter::PRIMARY_CONTRACT;

#[tokio::test]
async fn test_single_node_round_trip() {
    let node = node(1, test_config());
    assert!(matches!(
        node.get_or_create_actor(CONTRACT, "c").await,
        Err(RuntimeError::UnknownCoordinator(CONTRACT))
    ));
    assert!(matches!(
        node.start_coordinator(ContractId(77), CoordinationMode::LocalOnly).await,
        Err(RuntimeError::UnknownActorType(ContractId(77)))
    ));

    node.start_coordinator(CONTRACT, CoordinationMode::LocalOnly)
        .await
        .expect("Failed to start coordinator");
    let counter = node.get_or_create_actor(CONTRACT, "c").await.expect("Failed to get actor");
    assert!(counter.is_local());
    assert_eq!(counter.actor_ref().location.0, "mem://node-1");

    let Count(value) = counter.request(Increment(4)).await.expect("Increment failed");
    assert_eq!(value, 4);

    let again = node.get_or_create_actor(CONTRACT, "c").await.unwrap();
    assert_eq!(again.actor_ref(), counter.actor_ref());
    let Count(value) = again.request(GetCount).await.unwrap();
    assert_eq!(value, 4);
}

#[tokio::test]
async fn test_routing_failures() {
    let a = node(1, test_config());
    let b = node(2, test_config());
    Node::connect(&a, &b);

    // Routed to B, which does not host the key.
    let missing = a.get_actor(ActorKey::new(NodeId(2), 42)).expect("B should be routable");
    let err = missing.request::<_, Count>(GetCount).await.unwrap_err();
    assert!(err.is_code(ErrorCode::NonExistentActor), "{err:?}");

    assert!(matches!(
        a.get_actor(ActorKey::new(NodeId(3), 1)),
        Err(RuntimeError::NoRoute(NodeId(3)))
    ));
    assert!(matches!(
        a.get_actor(ActorKey::new(NodeId(1), 1)),
        Err(RuntimeError::NonExistentActor(_))
    ));
}

#[tokio::test]
async fn test_query_group_fans_out_in_name_order() {
    let hub = GroupHub::new();
    let spread: Arc<dyn PlacementStrategy> = Arc::new(|view: &ClusterView, local: NodeId| view.member(local).cloned());
    let nodes = replicated_cluster(&hub, 2, spread).await;

    // Each name is created by (and so lives on) the node that asked first.
    for (i, name) in ["gamma", "alpha", "beta"].into_iter().enumerate() {
        let proxy = nodes[i % 2].get_or_create_actor(CONTRACT, name).await.unwrap();
        proxy.request::<_, Count>(Increment(i as u64 + 1)).await.unwrap();
    }

    let counts = nodes[0]
        .query_group(CONTRACT, |name, counter| async move {
            let Count(value) = counter.request(GetCount).await?;
            Ok::<_, RuntimeError>((name, value))
        })
        .await
        .expect("query_group failed");
    assert_eq!(
        counts,
        vec![("alpha".to_string(), 2), ("beta".to_string(), 3), ("gamma".to_string(), 1)]
    );

    let err = nodes[1]
        .query_group(CONTRACT, |_, counter| async move { counter.request::<_, Count>(Reject("no".into())).await })
        .await
        .unwrap_err();
    assert!(err.is_code(REJECTED));
}

#[tokio::test]
async fn test_shutdown_releases_everything() {
    let a = node(1, test_config());
    let b = node(2, test_config());
    Node::connect(&a, &b);
    a.start_coordinator(CONTRACT, CoordinationMode::LocalOnly).await.unwrap();

    let counter = a.get_or_create_actor(CONTRACT, "c").await.unwrap();
    let peer = a.peer(NodeId(2)).expect("peer channel missing");

    a.shutdown().await;

    assert!(matches!(counter.request::<_, Count>(GetCount).await, Err(RuntimeError::FiberStopped)));
    assert!(!peer.is_connected());
    assert!(a.peer(NodeId(2)).is_none());
    assert!(a.repository().is_empty());
    assert!(matches!(a.coordinator(CONTRACT), Err(RuntimeError::UnknownCoordinator(_))));

    // B notices the disconnect.
    let b = &b;
    assert!(eventually(|| async move { b.peer(NodeId(1)).is_none() }).await);
}

#[tokio::test]
async fn test_idle_peers_are_disconnected() {
    let config = RuntimeConfig {
        idle_disconnect_timeout_ms: Some(100),
        ..test_config()
    };
    let a = node(1, config.clone());
    let b = node(2, config);
    Node::connect(&a, &b);
    assert!(a.peer(NodeId(2)).is_some());

    let (a, b) = (&a, &b);
    assert!(eventually(|| async move { a.peer(NodeId(2)).is_none() && b.peer(NodeId(1)).is_none() }).await);
}
