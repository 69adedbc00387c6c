use super::{Operation, OperationContext, PipelineBuilder, Processor};
use crate::error::{ErrorCode, Result, RuntimeError};
use crate::fiber::{Fiber, FiberExt, LockType};
use crate::message::{Protocol, Variant};
use futures::future::{self, BoxFuture};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

type HandlerFn<P> = Arc<dyn Fn(Operation<P>) -> BoxFuture<'static, Result<Option<P>>> + Send + Sync>;

/// A handler bound to the fiber lock it must run under.
pub struct LockedOperation<P> {
    pub process: HandlerFn<P>,
    pub lock: LockType,
    /// Registered through `handle_message*`; never produces a reply.
    pub one_way: bool,
}

impl<P> Clone for LockedOperation<P> {
    fn clone(&self) -> Self {
        Self {
            process: self.process.clone(),
            lock: self.lock,
            one_way: self.one_way,
        }
    }
}

/// Per-kind lock table used by [`PipelineBuilder::use_fiber`]. Unlisted kinds lock Write.
pub struct LockConfig<P: Protocol> {
    locks: HashMap<P::Kind, LockType>,
}

impl<P: Protocol> LockConfig<P> {
    pub fn new() -> Self {
        Self { locks: HashMap::new() }
    }

    pub fn lock<M: Variant<P>>(mut self, lock: LockType) -> Self {
        self.locks.insert(M::kind(), lock);
        self
    }

    pub fn lock_for(&self, kind: P::Kind) -> LockType {
        self.locks.get(&kind).copied().unwrap_or_default()
    }
}

impl<P: Protocol> Default for LockConfig<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Protocol> Clone for LockConfig<P> {
    fn clone(&self) -> Self {
        Self { locks: self.locks.clone() }
    }
}

/// Fluent table of message handlers, keyed by protocol variant.
///
/// Registering a second handler for the same variant replaces the first.
///
/// ```rust,ignore
/// let handlers = HandlerConfig::new()
///     .handle_request(|req: GetState, _ctx| async move { Ok(State { .. }) })
///     .handle_message_sync(|note: Touch, _ctx| { .. ; Ok(()) })
///     .lock::<GetState>(LockType::Read);
/// ```
pub struct HandlerConfig<P: Protocol> {
    handlers: HashMap<P::Kind, LockedOperation<P>>,
    locks: LockConfig<P>,
}

impl<P: Protocol> HandlerConfig<P> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            locks: LockConfig::new(),
        }
    }

    /// Registers an async handler whose result is sent back as the reply.
    pub fn handle_request<Req, Rep, F, Fut>(self, handler: F) -> Self
    where
        Req: Variant<P>,
        Rep: Variant<P>,
        F: Fn(Req, OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Rep>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.insert::<Req, _>(false, move |request, context| {
            let handler = handler.clone();
            Box::pin(async move { Ok(Some(handler(request, context).await?.into_message())) })
        })
    }

    pub fn handle_request_sync<Req, Rep, F>(self, handler: F) -> Self
    where
        Req: Variant<P>,
        Rep: Variant<P>,
        F: Fn(Req, OperationContext) -> Result<Rep> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.insert::<Req, _>(false, move |request, context| {
            let handler = handler.clone();
            Box::pin(async move { Ok(Some(handler(request, context)?.into_message())) })
        })
    }

    /// Registers an async handler for a message that expects no reply.
    pub fn handle_message<Req, F, Fut>(self, handler: F) -> Self
    where
        Req: Variant<P>,
        F: Fn(Req, OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.insert::<Req, _>(true, move |request, context| {
            let handler = handler.clone();
            Box::pin(async move {
                handler(request, context).await?;
                Ok(None)
            })
        })
    }

    pub fn handle_message_sync<Req, F>(self, handler: F) -> Self
    where
        Req: Variant<P>,
        F: Fn(Req, OperationContext) -> Result<()> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        self.insert::<Req, _>(true, move |request, context| {
            let handler = handler.clone();
            Box::pin(async move {
                handler(request, context)?;
                Ok(None)
            })
        })
    }

    /// Sets the fiber lock for `Req`. Handlers default to Write.
    pub fn lock<Req: Variant<P>>(mut self, lock: LockType) -> Self {
        if let Some(handler) = self.handlers.get_mut(&Req::kind()) {
            handler.lock = lock;
        }
        self.locks = self.locks.lock::<Req>(lock);
        self
    }

    pub fn lock_config(&self) -> LockConfig<P> {
        self.locks.clone()
    }

    pub fn handles(&self, kind: P::Kind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn insert<Req, F>(mut self, one_way: bool, typed: F) -> Self
    where
        Req: Variant<P>,
        F: Fn(Req, OperationContext) -> BoxFuture<'static, Result<Option<P>>> + Send + Sync + 'static,
    {
        let kind = Req::kind();
        let process: HandlerFn<P> = Arc::new(move |operation: Operation<P>| -> BoxFuture<'static, Result<Option<P>>> {
            let Operation { message, context } = operation;
            match Req::from_message(message) {
                Ok(request) => typed(request, context),
                Err(other) => Box::pin(future::ready(Err(RuntimeError::UnexpectedMessage(format!(
                    "{:?}",
                    other.kind()
                ))))),
            }
        });
        self.handlers.insert(
            kind,
            LockedOperation {
                process,
                lock: self.locks.lock_for(kind),
                one_way,
            },
        );
        self
    }
}

impl<P: Protocol> Default for HandlerConfig<P> {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatcher<P: Protocol>(
    handlers: HashMap<P::Kind, LockedOperation<P>>,
    fiber: Option<Arc<dyn Fiber>>,
    next: Option<Processor<P>>,
    throw_if_unhandled: bool,
) -> Processor<P> {
    Arc::new(move |operation: Operation<P>| -> BoxFuture<'static, Result<Option<P>>> {
        let kind = operation.message.kind();
        if let Some(handler) = handlers.get(&kind) {
            debug!(?kind, lock = ?handler.lock, "Dispatch");
            let work = (handler.process)(operation);
            return match &fiber {
                Some(fiber) => fiber.call(handler.lock, work),
                None => work,
            };
        }
        match &next {
            Some(next) => next(operation),
            None if throw_if_unhandled => Box::pin(future::ready(Err(RuntimeError::processing(
                ErrorCode::DispatcherFuncNotFound,
                format!("no handler registered for {kind:?}"),
            )))),
            None => Box::pin(future::ready(Ok(None))),
        }
    })
}

impl<P: Protocol> PipelineBuilder<P> {
    /// Dispatches by message kind, running handlers inline.
    ///
    /// Unhandled kinds go to the next stage; with no next stage they fail with
    /// [`ErrorCode::DispatcherFuncNotFound`] when `throw_if_unhandled` is set and are
    /// silently answered with no reply otherwise.
    pub fn use_dispatcher(self, handlers: HandlerConfig<P>, throw_if_unhandled: bool) -> Self {
        self.use_stage(move |next| dispatcher(handlers.handlers, None, next, throw_if_unhandled))
    }

    /// Like [`use_dispatcher`](Self::use_dispatcher) but each handler runs on `fiber`
    /// under its own configured lock.
    pub fn use_fibered_dispatcher(
        self,
        fiber: Arc<dyn Fiber>,
        handlers: HandlerConfig<P>,
        throw_if_unhandled: bool,
    ) -> Self {
        self.use_stage(move |next| dispatcher(handlers.handlers, Some(fiber), next, throw_if_unhandled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Add(i64, i64);
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Sum(i64);
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Note(String);

    crate::protocol! {
        #[derive(Debug, Clone, Serialize, Deserialize)]
        pub enum Calc {
            Add(Add),
            Sum(Sum),
            Note(Note),
        }
    }

    fn op(message: Calc) -> Operation<Calc> {
        Operation::new(message, OperationContext::local_request(None))
    }

    #[tokio::test]
    async fn routes_to_registered_handler() {
        let handlers = HandlerConfig::<Calc>::new()
            .handle_request_sync(|Add(a, b): Add, _ctx| Ok(Sum(a + b)))
            .lock::<Add>(LockType::Read);
        assert!(handlers.handles(CalcKind::Add));
        assert_eq!(handlers.lock_config().lock_for(CalcKind::Add), LockType::Read);
        assert_eq!(handlers.lock_config().lock_for(CalcKind::Note), LockType::Write);

        let pipeline = PipelineBuilder::new().use_dispatcher(handlers, true).build();
        let reply = pipeline(op(Calc::Add(Add(2, 3)))).await.unwrap();
        assert!(matches!(reply, Some(Calc::Sum(Sum(5)))));
    }

    #[tokio::test]
    async fn unhandled_kinds_follow_throw_flag() {
        let strict = PipelineBuilder::new()
            .use_dispatcher(HandlerConfig::<Calc>::new(), true)
            .build();
        let err = strict(op(Calc::Note(Note("hi".into())))).await.unwrap_err();
        assert!(err.is_code(ErrorCode::DispatcherFuncNotFound));

        let lenient = PipelineBuilder::new()
            .use_dispatcher(HandlerConfig::<Calc>::new(), false)
            .build();
        assert!(lenient(op(Calc::Note(Note("hi".into())))).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn message_handlers_produce_no_reply() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handlers = HandlerConfig::<Calc>::new().handle_message(move |Note(text): Note, _ctx| {
            let sink = sink.clone();
            async move {
                sink.lock().push(text);
                Ok(())
            }
        });

        let pipeline = PipelineBuilder::new().use_dispatcher(handlers, true).build();
        let reply = pipeline(op(Calc::Note(Note("logged".into())))).await.unwrap();

        assert!(reply.is_none());
        assert_eq!(*seen.lock(), vec!["logged".to_string()]);
        assert_eq!(Calc::Note(Note(String::new())).kind(), CalcKind::Note);
    }
}
