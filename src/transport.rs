//! # Transport
//!
//! The runtime never touches sockets. A peer connection is a [`TransportChannel`] for
//! outbound bytes plus an `mpsc::UnboundedReceiver<Vec<u8>>` of inbound bytes. The
//! receiver ending is the disconnect signal.
//!
//! [`memory_pipe`] wires two in-process ends together for tests and single-process
//! clusters.

use crate::error::{Result, RuntimeError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound half of a peer connection.
pub trait TransportChannel: Send + Sync {
    fn send(&self, bytes: Vec<u8>) -> Result<()>;

    /// Closes the connection; the peer's inbound stream ends.
    fn close(&self);

    fn is_connected(&self) -> bool;
}

/// Inbound half of a peer connection.
pub type Inbound = mpsc::UnboundedReceiver<Vec<u8>>;

/// One end of an in-memory pipe.
pub struct MemoryLink {
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl TransportChannel for MemoryLink {
    fn send(&self, bytes: Vec<u8>) -> Result<()> {
        let outbound = self.outbound.lock();
        let sender = outbound.as_ref().ok_or(RuntimeError::ChannelClosed)?;
        sender.send(bytes).map_err(|_| RuntimeError::ChannelClosed)
    }

    fn close(&self) {
        self.outbound.lock().take();
    }

    fn is_connected(&self) -> bool {
        self.outbound.lock().as_ref().is_some_and(|sender| !sender.is_closed())
    }
}

/// Two cross-wired ends: bytes sent on one arrive on the other's inbound stream.
pub fn memory_pipe() -> ((Arc<MemoryLink>, Inbound), (Arc<MemoryLink>, Inbound)) {
    let (to_b, b_inbound) = mpsc::unbounded_channel();
    let (to_a, a_inbound) = mpsc::unbounded_channel();
    let a = Arc::new(MemoryLink {
        outbound: Mutex::new(Some(to_b)),
    });
    let b = Arc::new(MemoryLink {
        outbound: Mutex::new(Some(to_a)),
    });
    ((a, a_inbound), (b, b_inbound))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closing_one_end_ends_the_peer_stream() {
        let ((a, mut a_in), (b, mut b_in)) = memory_pipe();
        a.send(vec![1, 2]).unwrap();
        b.send(vec![3]).unwrap();
        assert_eq!(b_in.recv().await, Some(vec![1, 2]));
        assert_eq!(a_in.recv().await, Some(vec![3]));

        a.close();
        assert!(!a.is_connected());
        assert!(matches!(a.send(vec![]), Err(RuntimeError::ChannelClosed)));
        assert_eq!(b_in.recv().await, None);
    }
}
