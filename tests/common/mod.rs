#![allow(dead_code)]

use actor_mesh::actor::{ActorEntity, ActorInit, ActorRef, ActorRepository, ContractId, NodeId};
use actor_mesh::coordination::{GroupHub, NodeInfo, PlacementStrategy};
use actor_mesh::error::ErrorCode;
use actor_mesh::fiber::LockType;
use actor_mesh::lifecycle::{CoordinationMode, Node};
use actor_mesh::message::{BincodeSerializer, MessageSerializer};
use actor_mesh::pipeline::HandlerConfig;
use actor_mesh::{Result, RuntimeConfig, RuntimeError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Increment(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetCount;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Count(pub u64);

/// Fails with an application error code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reject(pub String);

/// Replies after sleeping for the given number of milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sleep(pub u64);

/// One-way: bumps the counter without replying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Touch;

/// Request whose handler returns an unexpected (non-processing) error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explode;

actor_mesh::protocol! {
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub enum CounterProtocol {
        Increment(Increment),
        GetCount(GetCount),
        Count(Count),
        Reject(Reject),
        Sleep(Sleep),
        Touch(Touch),
        Explode(Explode),
    }
}

pub const REJECTED: ErrorCode = ErrorCode::Application(7);

pub struct Counter {
    pub name: String,
    value: Mutex<u64>,
}

#[async_trait]
impl ActorEntity for Counter {
    type Protocol = CounterProtocol;

    const PRIMARY_CONTRACT: ContractId = ContractId(10);

    const CONTRACTS: &'static [ContractId] = &[ContractId(11)];

    fn create(init: &ActorInit) -> Result<Self> {
        Ok(Self {
            name: init.name.clone(),
            value: Mutex::new(0),
        })
    }

    fn configure(self: Arc<Self>, handlers: HandlerConfig<CounterProtocol>) -> HandlerConfig<CounterProtocol> {
        let (inc, get, touch) = (self.clone(), self.clone(), self);
        handlers
            .handle_request_sync(move |Increment(by): Increment, _ctx| {
                let mut value = inc.value.lock();
                *value += by;
                Ok(Count(*value))
            })
            .handle_request_sync(move |_: GetCount, _ctx| Ok(Count(*get.value.lock())))
            .handle_request_sync(|Reject(reason): Reject, _ctx| -> Result<Count> {
                Err(RuntimeError::processing(REJECTED, reason))
            })
            .handle_request(|Sleep(ms): Sleep, _ctx| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(Count(ms))
            })
            .handle_message_sync(move |_: Touch, _ctx| {
                *touch.value.lock() += 1;
                Ok(())
            })
            .handle_request_sync(|_: Explode, _ctx| -> Result<Count> {
                Err(RuntimeError::UnexpectedMessage("exploded".to_string()))
            })
            .lock::<GetCount>(LockType::Read)
            .lock::<Sleep>(LockType::None)
    }

    async fn on_created(&self, _actor_ref: &ActorRef) -> Result<()> {
        *self.value.lock() = 0;
        Ok(())
    }
}

pub fn node_info(id: u64) -> NodeInfo {
    NodeInfo::new(NodeId(id), format!("mem://node-{id}"))
}

pub fn test_config() -> RuntimeConfig {
    RuntimeConfig {
        send_timeout_ms: 2_000,
        create_timeout_ms: 1_000,
        create_backoff_ms: 20,
        ..RuntimeConfig::default()
    }
}

pub fn serializer() -> Arc<dyn MessageSerializer<CounterProtocol>> {
    Arc::new(BincodeSerializer::default())
}

pub fn repository(id: u64) -> Arc<ActorRepository<CounterProtocol>> {
    Arc::new(
        ActorRepository::builder()
            .register::<Counter>()
            .build(node_info(id), test_config())
            .expect("Failed to build repository"),
    )
}

pub fn node(id: u64, config: RuntimeConfig) -> Node<CounterProtocol> {
    Node::new(
        node_info(id),
        config,
        ActorRepository::builder().register::<Counter>(),
        serializer(),
    )
    .expect("Failed to build node")
}

/// `count` fully connected nodes with a replicated coordinator for [`Counter`].
pub async fn replicated_cluster(
    hub: &GroupHub,
    count: u64,
    placement: Arc<dyn PlacementStrategy>,
) -> Vec<Node<CounterProtocol>> {
    let nodes: Vec<_> = (1..=count).map(|id| node(id, test_config())).collect();
    for (i, a) in nodes.iter().enumerate() {
        for b in &nodes[i + 1..] {
            Node::connect(a, b);
        }
    }
    for node in &nodes {
        node.start_coordinator(
            Counter::PRIMARY_CONTRACT,
            CoordinationMode::Replicated {
                group: Arc::new(hub.clone()),
                placement: placement.clone(),
            },
        )
        .await
        .expect("Failed to start coordinator");
    }
    nodes
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
