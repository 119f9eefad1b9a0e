//! Per-client message id allocation.
//!
//! Purely arithmetic and reactor-local: one allocator per client endpoint,
//! no locking. Collision handling after wraparound is the client's concern
//! (see `bus::rpc::RpcClient::call`).

/// Monotonic 32-bit identifier generator, wrapping to 1 (not 0) so that a
/// zero msgid can double as a "no id" sentinel elsewhere in the wire format.
#[derive(Debug, Clone, Copy)]
pub struct MsgIdAllocator {
    next: u32,
}

impl MsgIdAllocator {
    /// `start == 0` means "auto" — begin at 1. A nonzero start lets a
    /// gateway partition the id space across multiplexed upstreams.
    pub fn new(start: u32) -> Self {
        Self { next: if start == 0 { 1 } else { start } }
    }

    pub fn next(&mut self) -> u32 {
        let id = self.next;
        self.next = if self.next == u32::MAX { 1 } else { self.next + 1 };
        id
    }
}

impl Default for MsgIdAllocator {
    fn default() -> Self {
        Self::new(0)
    }
}
