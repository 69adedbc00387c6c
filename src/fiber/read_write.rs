//! Thread-pool fiber built on an ordered queue and a reader/writer lock.

use super::{Fiber, LockType, Work};
use crate::error::{Result, RuntimeError};
use futures::FutureExt;
use parking_lot::RwLock as SyncRwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::{debug, trace};

/// How a queued item shares the fiber. None-locked work never reaches the queue.
#[derive(Debug, Clone, Copy)]
enum Grade {
    Exclusive,
    Shared,
}

/// Fiber that runs Write items exclusively and Read items concurrently.
///
/// # Architecture Note
/// A single dispatcher task drains one bounded FIFO queue. Before starting an item it
/// acquires an owned guard of a shared `tokio::sync::RwLock<()>`: a write guard for Write
/// items, a read guard plus a semaphore permit for Read items. The item is then spawned
/// holding its guard, and the dispatcher moves on. Because the dispatcher takes guards in
/// queue order, Write items run strictly in submission order and a Read item queued after
/// a Write item waits for it.
///
/// Must be created inside a tokio runtime.
pub struct ReadWriteFiber {
    queue: SyncRwLock<Option<mpsc::Sender<(Work, Grade)>>>,
    stopped: Arc<AtomicBool>,
}

impl ReadWriteFiber {
    pub fn new(read_parallelism: usize, max_queue_size: usize) -> Self {
        let (sender, receiver) = mpsc::channel(max_queue_size.max(1));
        let stopped = Arc::new(AtomicBool::new(false));
        tokio::spawn(Self::run(receiver, read_parallelism.max(1), stopped.clone()));
        Self {
            queue: SyncRwLock::new(Some(sender)),
            stopped,
        }
    }

    async fn run(
        mut receiver: mpsc::Receiver<(Work, Grade)>,
        read_parallelism: usize,
        stopped: Arc<AtomicBool>,
    ) {
        let lock = Arc::new(RwLock::new(()));
        let readers = Arc::new(Semaphore::new(read_parallelism));

        while let Some((work, grade)) = receiver.recv().await {
            if stopped.load(Ordering::Acquire) {
                // Dropping the work cancels whoever awaits it.
                trace!("Dropping work queued before stop");
                continue;
            }
            match grade {
                Grade::Exclusive => {
                    let guard = lock.clone().write_owned().await;
                    if stopped.load(Ordering::Acquire) {
                        trace!("Dropping work stopped while waiting for its lock");
                        continue;
                    }
                    tokio::spawn(async move {
                        work.await;
                        drop(guard);
                    });
                }
                Grade::Shared => {
                    let Ok(permit) = readers.clone().acquire_owned().await else {
                        break;
                    };
                    let guard = lock.clone().read_owned().await;
                    if stopped.load(Ordering::Acquire) {
                        trace!("Dropping work stopped while waiting for its lock");
                        continue;
                    }
                    tokio::spawn(async move {
                        work.await;
                        drop(guard);
                        drop(permit);
                    });
                }
            }
        }
        debug!("Fiber dispatcher finished");
    }
}

impl Default for ReadWriteFiber {
    fn default() -> Self {
        Self::new(10, 10_000)
    }
}

impl Fiber for ReadWriteFiber {
    fn process_async(&self, work: Work, lock: LockType) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(RuntimeError::FiberStopped);
        }
        let grade = match lock {
            LockType::Write => Grade::Exclusive,
            LockType::Read => Grade::Shared,
            LockType::None => {
                // Runs inline up to its first suspension point; only the rest is spawned.
                let mut work = work;
                if (&mut work).now_or_never().is_none() {
                    tokio::spawn(work);
                }
                return Ok(());
            }
        };

        let queue = self.queue.read();
        let sender = queue.as_ref().ok_or(RuntimeError::FiberStopped)?;
        sender.try_send((work, grade)).map_err(|e| match e {
            TrySendError::Full(_) => RuntimeError::FiberOverloaded,
            TrySendError::Closed(_) => RuntimeError::FiberStopped,
        })
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        // Closing the queue lets the dispatcher drain what is left and exit.
        self.queue.write().take();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
