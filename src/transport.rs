//! External-collaborator contracts for the receive and send loops (§6): what
//! this engine needs from a transport, and the per-delivery attachment slot
//! a host's link/session object hangs off of (§4.7).

use std::future::Future;
use std::io;
use std::sync::Mutex;

use crate::content::{Content, WeakContent};

/// Outcome of one [`RecvTransport::recv`] call. Distinguished from the send
/// side's `Result<usize, io::Error>` because the receive loop (§4.4) cares
/// about end-of-stream and "nothing right now" as outcomes in their own
/// right, not just a byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    /// `n` bytes were written into the caller's buffer, `n > 0`.
    Read(usize),
    /// The transport has no more bytes for this delivery; it is complete.
    Eos,
    /// The peer aborted the delivery; no further bytes will arrive.
    Aborted,
    /// No bytes available right now, no EOS. The receive loop flushes what
    /// it has and returns; the host resumes the loop on the next readable
    /// notification.
    WouldBlock,
}

/// What the receive loop (C7) needs from the inbound transport.
pub trait RecvTransport: Send {
    /// Reads up to `buf.len()` bytes for the delivery this transport is
    /// bound to.
    fn recv(&mut self, buf: &mut [u8]) -> impl Future<Output = io::Result<RecvOutcome>> + Send;
}

/// What the send loop (C8) needs from the outbound transport.
///
/// The negative-count sentinel of the component this trait is grounded on
/// becomes `Err` here (§4.5 Rust expansion note); `Ok(0)` with bytes still
/// pending plays the role of "transport full".
pub trait SendTransport: Send {
    /// Offers up to `buf.len()` bytes; returns how many were accepted.
    fn send(&mut self, buf: &[u8]) -> impl Future<Output = io::Result<usize>> + Send;

    /// Aborts the outbound delivery. Called once `aborted` latches, either
    /// from a send failure or from the inbound side propagating an abort.
    fn abort(&mut self) -> impl Future<Output = ()> + Send;

    /// Bytes currently queued on the underlying session, used against the
    /// Q3-upper threshold (`EngineConfig::q3_upper_bytes`).
    fn session_outgoing_bytes(&self) -> usize;
}

/// Per-delivery attachment slot a host's link/session object owns (§4.7).
/// The receive loop binds a [`WeakContent`] here on the first byte of a new
/// delivery and clears it at receive-complete; other code reading the slot
/// (e.g. to wire a Q2-unblocker back into the link) upgrades to a live
/// [`Content`] only for as long as it needs one.
#[derive(Default)]
pub struct DeliveryContext {
    slot: Mutex<Option<WeakContent>>,
}

impl DeliveryContext {
    pub fn new() -> Self {
        Self { slot: Mutex::new(None) }
    }

    pub fn bind(&self, content: &Content) {
        *self.slot.lock().expect("DeliveryContext mutex poisoned") = Some(content.downgrade());
    }

    pub fn unbind(&self) {
        *self.slot.lock().expect("DeliveryContext mutex poisoned") = None;
    }

    /// Upgrades the bound weak reference, if any and if it is still live.
    pub fn content(&self) -> Option<Content> {
        self.slot
            .lock()
            .expect("DeliveryContext mutex poisoned")
            .as_ref()
            .and_then(WeakContent::upgrade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn bind_then_content_upgrades_to_the_same_content() {
        let ctx = DeliveryContext::new();
        assert!(ctx.content().is_none());
        let content = Content::new(EngineConfig::default());
        ctx.bind(&content);
        assert!(ctx.content().is_some());
    }

    #[test]
    fn unbind_clears_the_slot() {
        let ctx = DeliveryContext::new();
        let content = Content::new(EngineConfig::default());
        ctx.bind(&content);
        ctx.unbind();
        assert!(ctx.content().is_none());
    }

    #[test]
    fn dropping_the_last_content_handle_makes_the_slot_go_stale() {
        let ctx = DeliveryContext::new();
        let content = Content::new(EngineConfig::default());
        ctx.bind(&content);
        drop(content);
        assert!(ctx.content().is_none());
    }
}
