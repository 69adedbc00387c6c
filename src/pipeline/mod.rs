//! # Message Processing Pipeline
//!
//! A pipeline is a chain of stages built once per actor (or per channel) and invoked for
//! every incoming [`Operation`]. Each stage receives the next processor in the chain and
//! returns a new processor wrapping it.
//!
//! ## Composition Order
//!
//! Stages are folded from the right: the **first** stage added is the **outermost** one,
//! and the last stage added sees no `next` at all. The usual actor chain is therefore:
//!
//! ```text
//! use_tracing ──► use_fiber ──► use_dispatcher
//! (outermost)                   (innermost, next = None)
//! ```
//!
//! ## Eager Invocation
//!
//! A stage must call `next` synchronously, inside the processor call, and only then
//! return a future. Fibers schedule work at call time, so this is what keeps the order
//! in which messages reach the fiber equal to the order in which they arrived.

mod dispatch;
mod stages;

pub use dispatch::{HandlerConfig, LockConfig, LockedOperation};

use crate::actor::{ActorKey, NodeId};
use crate::error::Result;
use crate::message::{OperationHeader, OperationType};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Metadata accompanying a message through the pipeline.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub request_id: Option<Uuid>,
    pub activity_id: Uuid,
    pub op_type: OperationType,
    /// Actor the message was addressed to, if any.
    pub target: Option<ActorKey>,
    /// Node the message came from; `None` for local calls.
    pub source: Option<NodeId>,
    pub started: Instant,
}

impl OperationContext {
    pub fn from_header(header: OperationHeader, target: Option<ActorKey>, source: Option<NodeId>) -> Self {
        Self {
            request_id: header.request_id,
            activity_id: header.activity_id,
            op_type: header.op_type,
            target,
            source,
            started: Instant::now(),
        }
    }

    /// Context for a request issued in-process.
    pub fn local_request(target: Option<ActorKey>) -> Self {
        Self::from_header(OperationHeader::request(Uuid::new_v4(), Uuid::new_v4()), target, None)
    }

    /// Context for a one-way message issued in-process.
    pub fn local_one_way(target: Option<ActorKey>) -> Self {
        Self::from_header(OperationHeader::one_way(Uuid::new_v4()), target, None)
    }

    pub fn reply_required(&self) -> bool {
        self.op_type == OperationType::Request
    }
}

/// A message and its context.
#[derive(Debug)]
pub struct Operation<P> {
    pub message: P,
    pub context: OperationContext,
}

impl<P> Operation<P> {
    pub fn new(message: P, context: OperationContext) -> Self {
        Self { message, context }
    }
}

/// A built pipeline (or any stage of one): turns an operation into an optional reply.
pub type Processor<P> = Arc<dyn Fn(Operation<P>) -> BoxFuture<'static, Result<Option<P>>> + Send + Sync>;

type Chainer<P> = Box<dyn FnOnce(Option<Processor<P>>) -> Processor<P> + Send>;

/// Collects stages and folds them into a single [`Processor`].
pub struct PipelineBuilder<P> {
    chainers: Vec<Chainer<P>>,
}

impl<P: Send + 'static> PipelineBuilder<P> {
    pub fn new() -> Self {
        Self { chainers: Vec::new() }
    }

    /// Adds a stage. `chainer` receives the rest of the chain (or `None` if this stage
    /// ends up innermost) and returns the wrapping processor.
    pub fn use_stage<F>(mut self, chainer: F) -> Self
    where
        F: FnOnce(Option<Processor<P>>) -> Processor<P> + Send + 'static,
    {
        self.chainers.push(Box::new(chainer));
        self
    }

    pub fn len(&self) -> usize {
        self.chainers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chainers.is_empty()
    }

    /// Folds the stages right to left. An empty pipeline answers every operation with
    /// `Ok(None)`.
    pub fn build(self) -> Processor<P> {
        let processor = self
            .chainers
            .into_iter()
            .rev()
            .fold(None, |next, chainer| Some(chainer(next)));

        processor.unwrap_or_else(|| {
            Arc::new(|_: Operation<P>| -> BoxFuture<'static, Result<Option<P>>> {
                Box::pin(futures::future::ready(Ok(None)))
            })
        })
    }
}

impl<P: Send + 'static> Default for PipelineBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}
