//! # Net Channels
//!
//! A [`NetChannel`] is one peer connection seen from the runtime. It does two jobs:
//!
//! - **Outbound correlation.** [`NetChannel::send_request`] tags the message with a fresh
//!   request id, parks a [`PendingOperation`] and waits. The matching reply completes it;
//!   an error reply fails it with [`RuntimeError::Processing`]; the expiration timer fails
//!   it with [`RuntimeError::Timeout`]. Replies nobody waits for are logged and dropped.
//! - **Inbound processing.** Requests and one-way messages go through the channel's
//!   pipeline. The returned reply (or error) is sent back for requests.
//!
//! A timeout only releases the waiting caller. The remote handler keeps running and its
//! late reply is dropped.

use crate::actor::{ActorKey, NodeId};
use crate::error::{ErrorCode, Result, RuntimeError};
use crate::fiber::panic_message;
use crate::message::{Body, Envelope, MessageSerializer, OperationHeader, OperationType, Protocol};
use crate::pipeline::{Operation, OperationContext, PipelineBuilder, Processor};
use crate::transport::{Inbound, TransportChannel};
use dashmap::DashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Caller-side record of one outstanding request.
pub struct PendingOperation<P> {
    completion: oneshot::Sender<Result<P>>,
    started: Instant,
    expiration: Option<AbortHandle>,
}

impl<P> PendingOperation<P> {
    fn complete(self, result: Result<P>) {
        if let Some(expiration) = &self.expiration {
            expiration.abort();
        }
        let _ = self.completion.send(result);
    }
}

pub struct NetChannel<P: Protocol> {
    peer: Option<NodeId>,
    transport: Arc<dyn TransportChannel>,
    serializer: Arc<dyn MessageSerializer<P>>,
    processor: Processor<P>,
    pending: DashMap<Uuid, PendingOperation<P>>,
    send_timeout: Duration,
    connected: AtomicBool,
    closed: watch::Sender<bool>,
}

impl<P: Protocol> NetChannel<P> {
    /// Wraps a connection and starts its read loop.
    ///
    /// `configure` builds the inbound pipeline. It receives a weak handle to the channel
    /// being built, for stages that need to act on it (e.g. closing it when idle).
    pub fn spawn<F>(
        peer: Option<NodeId>,
        transport: Arc<dyn TransportChannel>,
        inbound: Inbound,
        serializer: Arc<dyn MessageSerializer<P>>,
        send_timeout: Duration,
        configure: F,
    ) -> Arc<Self>
    where
        F: FnOnce(Weak<Self>, PipelineBuilder<P>) -> PipelineBuilder<P>,
    {
        let (closed, _) = watch::channel(false);
        let channel = Arc::new_cyclic(|weak| Self {
            peer,
            transport,
            serializer,
            processor: configure(weak.clone(), PipelineBuilder::new()).build(),
            pending: DashMap::new(),
            send_timeout,
            connected: AtomicBool::new(true),
            closed,
        });
        tokio::spawn(channel.clone().read_loop(inbound));
        channel
    }

    async fn read_loop(self: Arc<Self>, mut inbound: Inbound) {
        let mut closed = self.closed.subscribe();
        if !*closed.borrow() {
            loop {
                tokio::select! {
                    bytes = inbound.recv() => match bytes {
                        Some(bytes) => self.on_bytes(&bytes),
                        None => break,
                    },
                    _ = closed.changed() => break,
                }
            }
        }
        debug!(peer = ?self.peer, "Read loop finished");
        self.dispose();
    }

    fn on_bytes(self: &Arc<Self>, bytes: &[u8]) {
        let envelope = match self.serializer.deserialize(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(peer = ?self.peer, error = %e, len = bytes.len(), "Dropping undecodable message");
                return;
            }
        };
        match envelope.header.op_type {
            OperationType::Reply => self.on_reply(envelope),
            OperationType::Request | OperationType::OneWay => self.on_operation(envelope),
        }
    }

    fn on_reply(&self, envelope: Envelope<P>) {
        let Some(request_id) = envelope.header.request_id else {
            warn!(peer = ?self.peer, "Dropping reply without request id");
            return;
        };
        let Some((_, pending)) = self.pending.remove(&request_id) else {
            warn!(peer = ?self.peer, %request_id, "Received reply for unknown request; dropping");
            return;
        };

        let elapsed = pending.started.elapsed();
        let result = match envelope.body {
            Body::Message(message) => {
                debug!(%request_id, ?elapsed, "Request completed");
                Ok(message)
            }
            Body::Error { code, description } => {
                debug!(%request_id, ?elapsed, ?code, "Request failed");
                Err(RuntimeError::Processing { code, description })
            }
        };
        pending.complete(result);
    }

    fn on_operation(self: &Arc<Self>, envelope: Envelope<P>) {
        let message = match envelope.body {
            Body::Message(message) => message,
            Body::Error { code, .. } => {
                warn!(peer = ?self.peer, ?code, "Dropping error body outside a reply");
                return;
            }
        };
        let context = OperationContext::from_header(envelope.header, envelope.target, self.peer);
        // Invoked before spawning so the pipeline sees operations in arrival order.
        let work = (self.processor)(Operation::new(message, context.clone()));

        let channel = self.clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(work)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(RuntimeError::HandlerPanicked(panic_message(panic))));
            match result {
                Ok(Some(reply)) => {
                    if let Err(e) = channel.reply(&context, reply) {
                        warn!(error = %e, "Failed to send reply");
                    }
                }
                Ok(None) => {
                    if context.reply_required() {
                        warn!(request_id = ?context.request_id, "Request produced no reply");
                    }
                }
                Err(e) => {
                    error!(peer = ?channel.peer, request_id = ?context.request_id, error = %e, "Operation processing failed");
                    let description = match &e {
                        RuntimeError::Processing { description, .. } => description.clone(),
                        other if cfg!(debug_assertions) => other.to_string(),
                        _ => "internal error".to_string(),
                    };
                    if let Err(e) = channel.reply_with_error(&context, e.error_code(), description) {
                        warn!(error = %e, "Failed to send error reply");
                    }
                }
            }
        });
    }

    /// Sends `message` to `target` and waits for the correlated reply.
    pub async fn send_request(self: &Arc<Self>, target: Option<ActorKey>, message: P) -> Result<P> {
        if !self.is_connected() {
            return Err(RuntimeError::ChannelClosed);
        }
        let request_id = Uuid::new_v4();
        let bytes = self.serializer.serialize(&Envelope {
            header: OperationHeader::request(request_id, request_id),
            target,
            body: Body::Message(message),
        })?;

        let (completion, reply) = oneshot::channel();
        self.pending.insert(
            request_id,
            PendingOperation {
                completion,
                started: Instant::now(),
                expiration: None,
            },
        );
        let expiration = self.arm_expiration(request_id);
        match self.pending.get_mut(&request_id) {
            Some(mut pending) => pending.expiration = Some(expiration),
            None => expiration.abort(),
        }

        if let Err(e) = self.transport.send(bytes) {
            if let Some((_, pending)) = self.pending.remove(&request_id) {
                pending.complete(Err(RuntimeError::ChannelClosed));
            }
            return Err(e);
        }
        debug!(peer = ?self.peer, %request_id, "Request sent");
        reply.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    fn arm_expiration(self: &Arc<Self>, request_id: Uuid) -> AbortHandle {
        let channel = Arc::downgrade(self);
        let after = self.send_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let Some(channel) = channel.upgrade() else {
                return;
            };
            if let Some((_, pending)) = channel.pending.remove(&request_id) {
                warn!(peer = ?channel.peer, %request_id, ?after, "Request timed out");
                let _ = pending.completion.send(Err(RuntimeError::Timeout { request_id, after }));
            }
        })
        .abort_handle()
    }

    pub fn send_one_way(&self, target: Option<ActorKey>, message: P) -> Result<()> {
        let bytes = self.serializer.serialize(&Envelope {
            header: OperationHeader::one_way(Uuid::new_v4()),
            target,
            body: Body::Message(message),
        })?;
        self.transport.send(bytes)
    }

    /// Sends `message` as the reply to `context`. One-way operations cannot be replied to.
    pub fn reply(&self, context: &OperationContext, message: P) -> Result<()> {
        self.send_reply(context, Body::Message(message))
    }

    pub fn reply_with_error(&self, context: &OperationContext, code: ErrorCode, description: impl Into<String>) -> Result<()> {
        self.send_reply(
            context,
            Body::Error {
                code,
                description: description.into(),
            },
        )
    }

    fn send_reply(&self, context: &OperationContext, body: Body<P>) -> Result<()> {
        let (true, Some(request_id)) = (context.reply_required(), context.request_id) else {
            warn!(activity_id = %context.activity_id, "Cannot reply to one-way message");
            return Ok(());
        };
        let bytes = self.serializer.serialize(&Envelope {
            header: OperationHeader::reply(request_id, context.activity_id),
            target: None,
            body,
        })?;
        self.transport.send(bytes)
    }

    /// Closes the connection and fails every pending request with
    /// [`RuntimeError::ChannelClosed`]. Idempotent.
    pub fn dispose(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        self.closed.send_replace(true);
        self.transport.close();

        let request_ids: Vec<Uuid> = self.pending.iter().map(|entry| *entry.key()).collect();
        for request_id in &request_ids {
            if let Some((_, pending)) = self.pending.remove(request_id) {
                pending.complete(Err(RuntimeError::ChannelClosed));
            }
        }
        info!(peer = ?self.peer, failed_requests = request_ids.len(), "Net channel closed");
    }

    /// Resolves once the channel is disposed.
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn peer(&self) -> Option<NodeId> {
        self.peer
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
