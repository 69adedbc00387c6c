//! Fiber for hosts without a dedicated thread pool.

use super::{Fiber, LockType, Work};
use crate::error::{Result, RuntimeError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

/// Degenerate fiber that only queues work; the host runs it by calling [`PollingFiber::pump`].
///
/// Every item, whatever its lock type, runs sequentially in submission order, so all
/// lock modes collapse to Write semantics.
pub struct PollingFiber {
    queue: Mutex<VecDeque<Work>>,
    stopped: AtomicBool,
    batch_limit: usize,
}

impl PollingFiber {
    pub fn new(batch_limit: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            stopped: AtomicBool::new(false),
            batch_limit: batch_limit.max(1),
        }
    }

    /// Runs up to `batch_limit` queued items and returns how many ran.
    pub async fn pump(&self) -> usize {
        let mut executed = 0;
        while executed < self.batch_limit && !self.is_stopped() {
            let next = self.queue.lock().pop_front();
            let Some(work) = next else {
                break;
            };
            work.await;
            executed += 1;
        }
        if executed > 0 {
            trace!(executed, "Pumped fiber");
        }
        executed
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Default for PollingFiber {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl Fiber for PollingFiber {
    fn process_async(&self, work: Work, _lock: LockType) -> Result<()> {
        if self.is_stopped() {
            return Err(RuntimeError::FiberStopped);
        }
        self.queue.lock().push_back(work);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.queue.lock().clear();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
