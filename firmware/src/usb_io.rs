//! CDC-ACM byte channel between the async USB endpoints and the synchronous
//! protocol core.

use heapless::Vec;
use picoisp_core::HostIo;

use crate::config::{HOST_RX_STAGE, HOST_TX_STAGE};

/// Staging buffers for one service pass: received packets land in `rx`,
/// responses collect in `tx` until the bridge task ships them. `flush` is a
/// marker only; the actual endpoint write happens in async context right
/// after each service pass, preserving response order.
pub struct CdcHost {
    rx: Vec<u8, HOST_RX_STAGE>,
    tx: Vec<u8, HOST_TX_STAGE>,
}

impl CdcHost {
    pub fn new() -> Self {
        Self {
            rx: Vec::new(),
            tx: Vec::new(),
        }
    }

    /// Queue host→device bytes for the next service pass. Overflow drops at
    /// the tail; the host's timeout recovers the session.
    pub fn push(&mut self, bytes: &[u8]) {
        let room = HOST_RX_STAGE - self.rx.len();
        let take = bytes.len().min(room);
        self.rx.extend_from_slice(&bytes[..take]).ok();
    }

    /// Response bytes waiting to go out.
    pub fn pending_tx(&self) -> &[u8] {
        &self.tx
    }

    /// Discard `n` shipped bytes from the front of the out queue.
    pub fn consume_tx(&mut self, n: usize) {
        let n = n.min(self.tx.len());
        self.tx.copy_within(n.., 0);
        let rest = self.tx.len() - n;
        self.tx.truncate(rest);
    }
}

impl HostIo for CdcHost {
    fn poll(&mut self) -> usize {
        self.rx.len()
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.rx.len());
        buf[..n].copy_from_slice(&self.rx[..n]);
        self.rx.copy_within(n.., 0);
        let rest = self.rx.len() - n;
        self.rx.truncate(rest);
        n
    }

    fn write(&mut self, bytes: &[u8]) {
        // Tail-drop on overflow, like the rx side.
        let room = HOST_TX_STAGE - self.tx.len();
        let take = bytes.len().min(room);
        self.tx.extend_from_slice(&bytes[..take]).ok();
    }

    fn flush(&mut self) {}
}
