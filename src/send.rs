//! Send loop (C8): streams one handle's view of a message to an outbound
//! transport in two phases — a once-per-handle annotation rewrite (Phase A)
//! followed by a byte-faithful stream of everything after it (Phase B),
//! stalling at the Q3 threshold so a slow link never grows the chain
//! without bound.

use bytes::BytesMut;

use crate::composer::{self, SectionComposer};
use crate::config::EngineConfig;
use crate::content::Depth;
use crate::cursor::Cursor;
use crate::message::Message;
use crate::transport::SendTransport;

/// The composed annotation-rewrite prefix (header through message-
/// annotations) a handle has not yet fully flushed to its transport, kept
/// across `send_loop` calls so a stall mid-prefix resumes exactly where it
/// left off rather than recomposing or re-sending from the start.
pub(crate) struct PendingPrefix {
    bytes: Vec<u8>,
    offset: usize,
    skip_end: Cursor,
}

/// Drives one handle's send side against `transport` until it completes,
/// aborts, or stalls (Q3 threshold, or the transport itself has no more
/// room right now). Safe to call again on the same handle to resume.
pub async fn send_loop(msg: &mut Message, transport: &mut impl SendTransport, composer: &dyn SectionComposer) {
    if msg.send_complete {
        return;
    }

    let config = msg.content.with_locked(|inner| inner.config.clone());

    if msg.sent_depth < Depth::MessageAnnotations && !phase_a(msg, transport, composer, &config).await {
        return;
    }

    msg.q3_stalled = false;
    phase_b(msg, transport, &config).await;
}

/// Builds the annotation-rewrite prefix: the inbound header and delivery-
/// annotations sections verbatim, followed by either a header-only
/// passthrough (strip, or nothing to add) or a freshly composed map
/// carrying this handle's overrides alongside the inbound user entries.
/// Also returns the cursor the byte-faithful phase should resume from —
/// the first byte after the original message-annotations section, or
/// after whichever of delivery-annotations/header is the last one present,
/// or the chain head if the message has none of the three.
fn compose_prefix(msg: &Message, composer: &dyn SectionComposer, strip_annotations: bool) -> (Vec<u8>, Cursor) {
    msg.content.with_locked(|inner| {
        let mut out = BytesMut::new();

        if let Some(loc) = inner.sections.header {
            out.extend_from_slice(&inner.section_bytes(&loc));
        }
        if let Some(loc) = inner.sections.delivery_annotations {
            out.extend_from_slice(&inner.section_bytes(&loc));
        }

        let ma = inner.sections.message_annotations;
        match ma {
            Some(loc) => {
                let (count, entries) = inner.map_entries_bytes(&loc.body);
                if strip_annotations || composer::overrides_are_empty(&msg.overrides) {
                    composer.compose_passthrough_header(loc.body.tag, count, entries.len(), &mut out);
                    out.extend_from_slice(&entries);
                } else {
                    composer.compose_message_annotations(&msg.overrides, count, &entries, &mut out);
                }
            }
            None if !strip_annotations && !composer::overrides_are_empty(&msg.overrides) => {
                composer.compose_message_annotations(&msg.overrides, 0, &[], &mut out);
            }
            None => {}
        }

        let skip_end = ma
            .map(|l| l.end(&inner.chain))
            .or_else(|| inner.sections.delivery_annotations.map(|l| l.end(&inner.chain)))
            .or_else(|| inner.sections.header.map(|l| l.end(&inner.chain)))
            .unwrap_or_else(|| Cursor::new(inner.chain.front_seq().unwrap_or(0), 0));

        (out.to_vec(), skip_end)
    })
}

/// Returns `true` once the handle is ready to stream the remainder
/// (Phase B); `false` if this call should stop here (aborted, send
/// failure, or the transport had no room for the rest of the prefix).
async fn phase_a(
    msg: &mut Message,
    transport: &mut impl SendTransport,
    composer: &dyn SectionComposer,
    config: &EngineConfig,
) -> bool {
    if msg.content.is_aborted() {
        msg.send_complete = true;
        transport.abort().await;
        return false;
    }

    if msg.prefix.is_none() {
        let (bytes, skip_end) = compose_prefix(msg, composer, config.strip_annotations);
        msg.prefix = Some(PendingPrefix { bytes, offset: 0, skip_end });
    }

    loop {
        let pending = msg.prefix.as_mut().expect("set above");
        if pending.offset == pending.bytes.len() {
            break;
        }
        match transport.send(&pending.bytes[pending.offset..]).await {
            Ok(0) => {
                tracing::debug!("output limit reached");
                return false;
            }
            Ok(n) => pending.offset += n,
            Err(err) => {
                tracing::warn!(error = %err, "send failed");
                msg.send_aborted = true;
                msg.send_complete = true;
                transport.abort().await;
                return false;
            }
        }
    }

    let skip_end = msg.prefix.take().expect("loop only exits once full").skip_end;
    msg.cursor = Some(skip_end);
    msg.sent_depth = Depth::MessageAnnotations;
    true
}

/// What to do with the handle's cursor on the next iteration, decided
/// under the Content lock without holding it across the `transport.send`
/// call that follows.
enum Step {
    /// Cursor has caught up to a buffer boundary the chain already has a
    /// successor for; move straight there without sending anything.
    Advance(Cursor),
    /// Bytes are available at the cursor; send them.
    Send { chunk: Vec<u8>, buf_filled: usize, has_next: bool },
    /// Caught up to what has been received so far; nothing to do yet.
    WaitForMore,
    /// Caught up to the end of a fully received chain; nothing left ever.
    Done,
}

async fn phase_b(msg: &mut Message, transport: &mut impl SendTransport, config: &EngineConfig) {
    loop {
        if msg.content.is_aborted() || msg.send_aborted {
            msg.send_complete = true;
            transport.abort().await;
            return;
        }

        let Some(cursor) = msg.cursor else {
            msg.send_complete = true;
            return;
        };

        if transport.session_outgoing_bytes() >= config.q3_upper_bytes() {
            msg.q3_stalled = true;
            return;
        }

        let step = msg.content.with_locked(|inner| {
            let Some(buf) = inner.chain.get(cursor.buf_seq) else {
                return if inner.receive_complete { Step::Done } else { Step::WaitForMore };
            };
            let buf_filled = buf.filled();
            let has_next = inner.chain.get(cursor.buf_seq + 1).is_some();
            if cursor.offset == buf_filled {
                if has_next {
                    return Step::Advance(Cursor::new(cursor.buf_seq + 1, 0));
                }
                return if inner.receive_complete { Step::Done } else { Step::WaitForMore };
            }
            let chunk = buf.as_slice()[cursor.offset..buf_filled].to_vec();
            Step::Send { chunk, buf_filled, has_next }
        });

        match step {
            Step::Advance(next) => {
                msg.cursor = Some(next);
            }
            Step::Done => {
                msg.cursor = None;
                msg.send_complete = true;
                return;
            }
            Step::WaitForMore => return,
            Step::Send { chunk, buf_filled, has_next } => match transport.send(&chunk).await {
                Ok(0) => {
                    tracing::debug!("output limit reached");
                    return;
                }
                Ok(n) => advance_after_send(msg, cursor, n, buf_filled, has_next),
                Err(err) => {
                    tracing::warn!(error = %err, "send failed");
                    msg.send_aborted = true;
                    msg.send_complete = true;
                    transport.abort().await;
                    return;
                }
            },
        }
    }
}

/// Applies the result of one accepted `send` call: advances the cursor,
/// and — if the whole buffer was consumed and either a successor exists or
/// the message is fully received — releases this handle's claim on the
/// buffer and moves on.
fn advance_after_send(msg: &mut Message, cursor: Cursor, accepted: usize, buf_filled: usize, has_next: bool) {
    let new_offset = cursor.offset + accepted;
    let fully_consumed = new_offset == buf_filled;

    if !fully_consumed {
        msg.cursor = Some(Cursor::new(cursor.buf_seq, new_offset));
        return;
    }

    // Only a fanout participant ever bumped a buffer's fanout count in the
    // first place (§4.3); the sole writer handle streaming its own receive
    // has nothing to give back.
    let is_fanout = msg.is_fanout;
    let (next_cursor, unblocker) = msg.content.with_locked(|inner| {
        let receive_complete = inner.receive_complete;
        if !has_next && !receive_complete {
            // Buffer exhausted but the chain has nothing more yet and the
            // message isn't done; nothing to release until more arrives.
            return (Some(Cursor::new(cursor.buf_seq, new_offset)), None);
        }
        let unblocker = if is_fanout {
            if let Some(buf) = inner.chain.get_mut(cursor.buf_seq) {
                buf.dec_fanout();
            }
            inner.sweep_drained_front();
            inner.take_q2_unblocker_if_cleared()
        } else {
            None
        };
        let next = if has_next { Some(Cursor::new(cursor.buf_seq + 1, 0)) } else { None };
        (next, unblocker)
    });

    msg.cursor = next_cursor;
    if msg.cursor.is_none() {
        msg.send_complete = true;
    }
    if let Some(mut cb) = unblocker {
        cb();
    }
}
