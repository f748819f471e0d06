//! Per-consumer message handle (C6): a view onto a shared [`Content`] with
//! its own read cursor, send progress, and annotation overrides.
//!
//! A handle is either the receiver's sole writer handle (created directly
//! over a freshly-allocated `Content`) or a reader handle produced by
//! [`Message::copy`] for an outbound fanout copy. Only a handle that has
//! been through [`Message::add_fanout`] participates in the buffer release
//! walk on drop (§4.3).

use std::collections::VecDeque;

use crate::composer::AnnotationOverrides;
use crate::content::{Content, Depth};
use crate::cursor::Cursor;
use crate::error::EngineError;
use crate::send::PendingPrefix;
use crate::stream::StreamData;

/// A handle over one [`Content`]. Cloning the underlying `Arc` (via
/// [`Message::copy`]) is how this engine represents "another consumer of the
/// same received message" — there is no separate manual ref count (§4.3
/// Rust expansion).
pub struct Message {
    pub(crate) content: Content,
    pub(crate) cursor: Option<Cursor>,
    pub(crate) sent_depth: Depth,
    pub(crate) send_complete: bool,
    /// Latched when this handle's own outbound delivery fails or is told to
    /// abort — independent of `content.aborted`, which is the *inbound*
    /// latch shared by every handle over this `Content` (one fanout copy
    /// failing its send must not affect the others).
    pub(crate) send_aborted: bool,
    pub(crate) is_fanout: bool,
    pub overrides: AnnotationOverrides,
    pub(crate) body_cursor: Option<Cursor>,
    pub(crate) streams: VecDeque<StreamData>,
    pub(crate) q3_stalled: bool,
    pub(crate) prefix: Option<PendingPrefix>,
}

impl Message {
    /// Creates the receiver's sole writer handle over a freshly allocated
    /// `Content`. Never a fanout participant itself.
    pub fn new(content: Content) -> Self {
        Self {
            content,
            cursor: None,
            sent_depth: Depth::Header,
            send_complete: false,
            send_aborted: false,
            is_fanout: false,
            overrides: AnnotationOverrides::default(),
            body_cursor: None,
            streams: VecDeque::new(),
            q3_stalled: false,
            prefix: None,
        }
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn is_send_complete(&self) -> bool {
        self.send_complete
    }

    pub fn is_send_aborted(&self) -> bool {
        self.send_aborted
    }

    pub fn is_q3_stalled(&self) -> bool {
        self.q3_stalled
    }

    /// Classifies why this handle's send will never complete, if it won't,
    /// as a typed value instead of the caller re-deriving it from the
    /// individual latches. `None` covers both "still in progress" and
    /// "completed successfully" — check [`Message::is_send_complete`] first.
    pub fn send_error(&self) -> Option<EngineError> {
        if self.content.is_oversize() {
            Some(EngineError::Oversize)
        } else if self.send_aborted || self.content.is_aborted() {
            Some(EngineError::Aborted)
        } else {
            None
        }
    }

    /// Produces a reader handle over the same `Content`: clones the `Arc`
    /// (bumping its strong count, the Rust-expansion stand-in for a manual
    /// `ref_count`), copies the cursor and overrides, but does not yet
    /// participate in fanout — call [`Message::add_fanout`] before using it
    /// to stream output.
    pub fn copy(&self) -> Self {
        Self {
            content: self.content.clone(),
            cursor: self.cursor,
            sent_depth: self.sent_depth,
            send_complete: self.send_complete,
            send_aborted: false,
            is_fanout: false,
            overrides: self.overrides.clone(),
            body_cursor: self.body_cursor,
            streams: VecDeque::new(),
            q3_stalled: false,
            prefix: None,
        }
    }

    /// Marks this handle as a fanout participant: flushes any pending
    /// receive buffer into the chain, positions the cursor at the chain
    /// head, and increments every currently-buffered buffer's fanout count
    /// so none of them are freed before this handle has seen them. A no-op
    /// if already a fanout participant.
    pub fn add_fanout(&mut self) {
        if self.is_fanout {
            return;
        }
        let head = self.content.with_locked(|inner| {
            inner.flush_pending();
            let head_seq = inner.chain.front_seq().unwrap_or(0);
            let mut seq = head_seq;
            while let Some(buf) = inner.chain.get_mut(seq) {
                buf.inc_fanout();
                seq += 1;
            }
            inner.fanout += 1;
            Cursor::new(head_seq, 0)
        });
        self.cursor = Some(head);
        self.is_fanout = true;
    }
}

impl Drop for Message {
    /// Runs the per-handle release walk (§4.3): every buffer from this
    /// handle's read cursor onward has its fanout decremented; once this was
    /// the last fanout handle, the pass-through sections' `protect_buffers`
    /// pins are given back too; drained buffers at the chain head are
    /// unlinked, and the Q2-unblocker (if the chain fell below the low
    /// watermark) is captured under lock and fired after the guard drops.
    /// Non-fanout handles never touched any buffer's fanout, so they have
    /// nothing to release.
    fn drop(&mut self) {
        if !self.is_fanout {
            return;
        }
        let unblocker = self.content.with_locked(|inner| {
            if let Some(cur) = self.cursor {
                let mut seq = cur.buf_seq;
                while let Some(buf) = inner.chain.get_mut(seq) {
                    buf.dec_fanout();
                    seq += 1;
                }
            }
            inner.fanout = inner.fanout.saturating_sub(1);
            // Once no fanout handle remains, the pass-through sections'
            // protect_buffers pins (held for as long as a handle might still
            // be streaming past them) have nothing left to protect against.
            inner.release_passthrough_if_last_fanout();
            inner.sweep_drained_front();
            inner.take_q2_unblocker_if_cleared()
        });
        if let Some(mut cb) = unblocker {
            cb();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn copy_does_not_bump_fanout_until_add_fanout_is_called() {
        let content = Content::new(EngineConfig::default());
        let writer = Message::new(content.clone());
        assert_eq!(content.fanout(), 0);
        let mut reader = writer.copy();
        assert_eq!(content.fanout(), 0);
        reader.add_fanout();
        assert_eq!(content.fanout(), 1);
    }

    #[test]
    fn dropping_a_fanout_handle_decrements_content_fanout() {
        let content = Content::new(EngineConfig::default());
        let writer = Message::new(content.clone());
        let mut reader = writer.copy();
        reader.add_fanout();
        assert_eq!(content.fanout(), 1);
        drop(reader);
        assert_eq!(content.fanout(), 0);
    }

    #[test]
    fn dropping_a_non_fanout_handle_leaves_fanout_untouched() {
        let content = Content::new(EngineConfig::default());
        let writer = Message::new(content.clone());
        let reader = writer.copy();
        drop(reader);
        assert_eq!(content.fanout(), 0);
    }
}
