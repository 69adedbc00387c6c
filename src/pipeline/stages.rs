use super::{LockConfig, Operation, PipelineBuilder};
use crate::error::Result;
use crate::fiber::{Fiber, FiberExt};
use crate::message::Protocol;
use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, Instrument};

impl<P: Protocol> PipelineBuilder<P> {
    /// Runs the rest of the chain on `fiber`, under the lock `locks` declares for the
    /// message kind.
    pub fn use_fiber(self, fiber: Arc<dyn Fiber>, locks: LockConfig<P>) -> Self {
        self.use_stage(move |next| {
            Arc::new(move |operation: Operation<P>| -> BoxFuture<'static, Result<Option<P>>> {
                let Some(next) = &next else {
                    return Box::pin(future::ready(Ok(None)));
                };
                let lock = locks.lock_for(operation.message.kind());
                fiber.call(lock, next(operation))
            })
        })
    }

    /// Calls `on_idle` once if no operation passes through this stage for `timeout`.
    ///
    /// The watchdog checks at most once a second and stops when the pipeline is dropped.
    /// Must be built inside a tokio runtime.
    pub fn use_idle_disconnect<F>(self, timeout: Duration, on_idle: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.use_stage(move |next| {
            let last_received = Arc::new(Mutex::new(Instant::now()));
            tokio::spawn(watch_idle(Arc::downgrade(&last_received), timeout, on_idle));

            Arc::new(move |operation: Operation<P>| -> BoxFuture<'static, Result<Option<P>>> {
                *last_received.lock() = Instant::now();
                match &next {
                    Some(next) => next(operation),
                    None => Box::pin(future::ready(Ok(None))),
                }
            })
        })
    }

    /// Wraps every operation in an `operation` span labelled with `label`.
    pub fn use_tracing(self, label: &'static str) -> Self {
        self.use_stage(move |next| {
            Arc::new(move |operation: Operation<P>| -> BoxFuture<'static, Result<Option<P>>> {
                let kind = operation.message.kind();
                let span = info_span!(
                    "operation",
                    label,
                    ?kind,
                    activity_id = %operation.context.activity_id,
                );
                let started = operation.context.started;
                let inner = match &next {
                    Some(next) => span.in_scope(|| next(operation)),
                    None => return Box::pin(future::ready(Ok(None))),
                };
                Box::pin(
                    async move {
                        let result = inner.await;
                        debug!(ok = result.is_ok(), elapsed = ?started.elapsed(), "Operation finished");
                        result
                    }
                    .instrument(span),
                )
            })
        })
    }
}

async fn watch_idle<F: FnOnce()>(last_received: Weak<Mutex<Instant>>, timeout: Duration, on_idle: F) {
    let mut ticks = tokio::time::interval(timeout.min(Duration::from_secs(1)));
    loop {
        ticks.tick().await;
        let Some(last_received) = last_received.upgrade() else {
            return;
        };
        let idle_for = last_received.lock().elapsed();
        if idle_for > timeout {
            info!(?idle_for, "Idle timeout reached");
            on_idle();
            return;
        }
    }
}
