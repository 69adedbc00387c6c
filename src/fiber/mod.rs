//! # Fibers
//!
//! A fiber is the per-actor scheduler. Every unit of work submitted to it declares a
//! [`LockType`]:
//!
//! - **Write**: exclusive. Runs alone, in submission order relative to every other
//!   queued item of the same fiber.
//! - **Read**: shared. May overlap other Read items (up to the fiber's read parallelism)
//!   but never a Write item.
//! - **None**: bypasses the queue and runs inline on the caller until its first
//!   suspension point, unordered. Meant for lightweight notifications.
//!
//! A Write item that awaits keeps its exclusivity until it completes. Long awaits inside
//! Write handlers therefore stall the whole actor; that is the price of sequential
//! consistency for mutating operations.
//!
//! Two implementations are provided: [`ReadWriteFiber`] for tokio hosts and
//! [`PollingFiber`] for hosts that must pump work explicitly.

mod polling;
mod read_write;

pub use polling::PollingFiber;
pub use read_write::ReadWriteFiber;

use crate::error::{Result, RuntimeError};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::oneshot;

/// A lazily started unit of work.
pub type Work = BoxFuture<'static, ()>;

/// Lock mode requested by a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LockType {
    None,
    Read,
    #[default]
    Write,
}

/// Single-owner scheduler enforcing [`LockType`] semantics for one actor.
pub trait Fiber: Send + Sync {
    /// Queues `work` under `lock`. Fails with [`RuntimeError::FiberStopped`] after
    /// [`Fiber::stop`].
    fn process_async(&self, work: Work, lock: LockType) -> Result<()>;

    /// Forbids further scheduling and cancels items that have not started yet, including
    /// items already waiting for their lock.
    fn stop(&self);

    fn is_stopped(&self) -> bool;
}

/// Helpers layered over [`Fiber::process_async`].
pub trait FiberExt: Fiber {
    /// Schedules `work` now and returns a future resolving with its result.
    ///
    /// Scheduling happens at call time, not on first poll, so the order of `call`
    /// invocations is the order the fiber sees.
    fn call<T, Fut>(&self, lock: LockType, work: Fut) -> BoxFuture<'static, Result<T>>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (respond_to, response) = oneshot::channel();
        let wrapped = async move {
            let result = AssertUnwindSafe(work)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(RuntimeError::HandlerPanicked(panic_message(panic))));
            let _ = respond_to.send(result);
        };
        let scheduled = self.process_async(Box::pin(wrapped), lock);

        Box::pin(async move {
            scheduled?;
            response.await.map_err(|_| RuntimeError::FiberStopped)?
        })
    }

    /// Schedules a synchronous closure.
    fn process<F>(&self, lock: LockType, func: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.process_async(Box::pin(async move { func() }), lock)
    }
}

impl<F: Fiber + ?Sized> FiberExt for F {}

/// Submits `work` to `fiber` after `delay`.
pub fn schedule<Fut>(
    fiber: std::sync::Arc<dyn Fiber>,
    delay: Duration,
    lock: LockType,
    work: Fut,
) -> tokio::task::JoinHandle<Result<()>>
where
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        fiber.process_async(Box::pin(work), lock)
    })
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
