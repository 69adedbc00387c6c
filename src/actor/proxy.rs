use super::{Actor, ActorRef};
use crate::channel::NetChannel;
use crate::error::{Result, RuntimeError};
use crate::message::{Protocol, Variant};
use crate::pipeline::{Operation, OperationContext};
use std::sync::Arc;

/// Location-transparent handle for sending messages to one actor.
///
/// Local actors are called straight through their pipeline; remote ones over the
/// [`NetChannel`] to their owner node. Callers see the same API either way.
#[derive(Clone)]
pub enum ActorProxy<P: Protocol> {
    Local(Arc<Actor<P>>),
    Remote { actor_ref: ActorRef, channel: Arc<NetChannel<P>> },
}

impl<P: Protocol> ActorProxy<P> {
    pub fn actor_ref(&self) -> &ActorRef {
        match self {
            ActorProxy::Local(actor) => actor.actor_ref(),
            ActorProxy::Remote { actor_ref, .. } => actor_ref,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ActorProxy::Local(_))
    }

    /// Sends a request and waits for its reply.
    pub async fn send(&self, message: P) -> Result<P> {
        match self {
            ActorProxy::Local(actor) => {
                let context = OperationContext::local_request(Some(actor.actor_ref().key));
                actor
                    .process(Operation::new(message, context))
                    .await?
                    .ok_or_else(|| RuntimeError::UnexpectedMessage("no reply".to_string()))
            }
            ActorProxy::Remote { actor_ref, channel } => channel.send_request(Some(actor_ref.key), message).await,
        }
    }

    /// Fire-and-forget. Local handler failures are logged, not returned.
    pub fn send_one_way(&self, message: P) -> Result<()> {
        match self {
            ActorProxy::Local(actor) => {
                let key = actor.actor_ref().key;
                let work = actor.process(Operation::new(message, OperationContext::local_one_way(Some(key))));
                tokio::spawn(async move {
                    if let Err(e) = work.await {
                        tracing::warn!(%key, error = %e, "One-way message failed");
                    }
                });
                Ok(())
            }
            ActorProxy::Remote { actor_ref, channel } => channel.send_one_way(Some(actor_ref.key), message),
        }
    }

    /// Typed request: wraps `request` into the protocol and unwraps the expected reply.
    pub async fn request<Req, Rep>(&self, request: Req) -> Result<Rep>
    where
        Req: Variant<P>,
        Rep: Variant<P>,
    {
        let reply = self.send(request.into_message()).await?;
        Rep::from_message(reply).map_err(|other| RuntimeError::UnexpectedMessage(format!("{:?}", other.kind())))
    }
}

impl<P: Protocol> std::fmt::Debug for ActorProxy<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorProxy::Local(actor) => f.debug_tuple("Local").field(&actor.actor_ref().key).finish(),
            ActorProxy::Remote { actor_ref, .. } => f.debug_tuple("Remote").field(&actor_ref.key).finish(),
        }
    }
}
