//! Body-streaming cursor (C9): yields a message's body one body-data chunk
//! at a time (or the footer, once the body is exhausted) without requiring
//! the whole message to be buffered at once, and releases chain buffers as
//! each chunk is consumed.

use crate::content::{ContentInner, Depth, DepthStatus};
use crate::cursor::Cursor;
use crate::error::SectionError;
use crate::message::Message;
use crate::section::{self, SectionCode, SectionStatus};
use crate::tag::FieldLocation;

/// One yielded unit of body content: either a body-data chunk or the
/// footer, returned as an opaque, `Copy`-able handle. Read its bytes with
/// [`stream_bytes`]; release the buffers it pins with [`release_front`].
#[derive(Debug, Clone, Copy)]
pub struct StreamData {
    section_start: Cursor,
    payload: FieldLocation,
    is_footer: bool,
}

impl StreamData {
    pub fn is_footer(&self) -> bool {
        self.is_footer
    }

    pub fn len(&self) -> usize {
        self.payload.content_length
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one [`next_stream_data`] call.
#[derive(Debug, Clone, Copy)]
pub enum StreamStatus {
    Data(StreamData),
    /// The matched pattern is not yet fully buffered; retry once more bytes
    /// have arrived (mirrors `check_depth`'s `Incomplete`).
    Incomplete,
    /// No more body-data chunks and no footer: the message body is
    /// exhausted.
    NoMore,
}

/// Matches one section descriptor at `cursor`. Unlike the pass-through
/// sections `Content::check_depth` resolves, a match here is not pinned
/// with `protect_buffers` — body-data and footer buffers are already held
/// by this handle's own `add_fanout` claim and are released incrementally
/// by [`release_front`] as each chunk is consumed, not held for the
/// content's whole lifetime. The transient `NEED_MORE` case is passed
/// through as a [`SectionStatus`] rather than folded into an `Err` here —
/// whether it means "wait for more bytes" or "the stream is over, there is
/// no such section" depends on `receive_complete`, which only the caller
/// (having tried every candidate section) is in a position to check.
fn probe_section(
    inner: &mut ContentInner,
    cursor: &mut Cursor,
    code: SectionCode,
) -> Result<SectionStatus, SectionError> {
    section::message_section_check(&inner.chain, cursor, code, section::allowed_tags(code))
}

/// Advances the handle's body-streaming cursor by one unit and returns it.
///
/// A body-value message cannot be streamed this way — body-value carries a
/// single opaque typed value rather than a sequence of octet chunks, so it
/// is reported as invalid here even though `check_depth` happily accepts it
/// as a body variant.
pub fn next_stream_data(msg: &mut Message) -> Result<StreamStatus, SectionError> {
    match msg.content.check_depth(Depth::Body)? {
        DepthStatus::Incomplete => return Ok(StreamStatus::Incomplete),
        DepthStatus::Ok => {}
    }

    if msg.body_cursor.is_none() {
        let (next_cursor, first) =
            msg.content
                .with_locked(|inner| -> Result<(Cursor, Option<StreamData>), SectionError> {
                    match inner.sections.body_kind {
                        Some(SectionCode::BodyValue) => Err(SectionError::Invalid {
                            reason: "body-value sections cannot be streamed as body-data chunks",
                        }),
                        Some(SectionCode::BodyData) => {
                            let loc =
                                inner.sections.body.expect("BodyData implies sections.body is set");
                            let end = loc.end(&inner.chain);
                            let sd = StreamData {
                                section_start: loc.start,
                                payload: loc.body,
                                is_footer: false,
                            };
                            Ok((end, Some(sd)))
                        }
                        Some(SectionCode::BodySequence) | None => {
                            let start = inner
                                .sections
                                .body
                                .map(|l| l.end(&inner.chain))
                                .unwrap_or_else(|| {
                                    Cursor::new(inner.chain.front_seq().unwrap_or(0), 0)
                                });
                            Ok((start, None))
                        }
                        Some(_) => unreachable!("body_kind is only ever a body variant"),
                    }
                })?;
        msg.body_cursor = Some(next_cursor);
        if let Some(sd) = first {
            msg.streams.push_back(sd);
            return Ok(StreamStatus::Data(sd));
        }
    }

    let mut cursor = msg.body_cursor.expect("set above");
    let outcome = msg
        .content
        .with_locked(|inner| -> Result<StreamStatus, SectionError> {
            let body_status = probe_section(inner, &mut cursor, SectionCode::BodyData)?;
            if let SectionStatus::Match(loc) = body_status {
                return Ok(StreamStatus::Data(StreamData {
                    section_start: loc.start,
                    payload: loc.body,
                    is_footer: false,
                }));
            }

            let footer_status = probe_section(inner, &mut cursor, SectionCode::Footer)?;
            if let SectionStatus::Match(loc) = footer_status {
                inner.sections.footer = Some(loc);
                return Ok(StreamStatus::Data(StreamData {
                    section_start: loc.start,
                    payload: loc.body,
                    is_footer: true,
                }));
            }

            // Neither candidate matched. If either probe came back NEED_MORE
            // because it ran off the end of the chain, that end-of-chain is
            // only the true end of the body (NO_MORE) once the receiver has
            // latched receive_complete — otherwise more bytes may yet arrive
            // and this call must be retried.
            let need_more = matches!(body_status, SectionStatus::NeedMore)
                || matches!(footer_status, SectionStatus::NeedMore);
            if need_more && !inner.receive_complete {
                Ok(StreamStatus::Incomplete)
            } else {
                Ok(StreamStatus::NoMore)
            }
        });

    match outcome? {
        StreamStatus::Data(sd) => {
            msg.body_cursor = Some(cursor);
            msg.streams.push_back(sd);
            Ok(StreamStatus::Data(sd))
        }
        other => Ok(other),
    }
}

/// Reads the raw content bytes (descriptor and tag header stripped) a
/// [`StreamData`] covers.
pub fn stream_bytes(msg: &Message, sd: &StreamData) -> Vec<u8> {
    msg.content.with_locked(|inner| inner.field_content_bytes(&sd.payload))
}

/// Releases the oldest outstanding [`StreamData`] for this handle. Computes
/// `[start_buf, stop_buf)` from the front entry's section start up to
/// either the next still-outstanding entry's section start or, if none is
/// queued, the handle's live body cursor — buffers genuinely exclusive to
/// the released chunk. A no-op if nothing is queued or the handle never
/// became a fanout participant (a non-fanout handle never bumped any
/// buffer's fanout, so it has nothing to give back).
pub fn release_front(msg: &mut Message) -> Option<StreamData> {
    let front = msg.streams.pop_front()?;
    if !msg.is_fanout {
        return Some(front);
    }

    let stop_buf = msg
        .streams
        .front()
        .map(|next| next.section_start.buf_seq)
        .or(msg.body_cursor.map(|c| c.buf_seq))
        .unwrap_or(front.section_start.buf_seq);

    let unblocker = msg.content.with_locked(|inner| {
        let mut seq = front.section_start.buf_seq;
        while seq < stop_buf {
            if let Some(buf) = inner.chain.get_mut(seq) {
                buf.dec_fanout();
            }
            seq += 1;
        }
        inner.sweep_drained_front();
        inner.take_q2_unblocker_if_cleared()
    });
    if let Some(mut cb) = unblocker {
        cb();
    }
    Some(front)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::content::Content;
    use crate::tag;

    fn push_bytes(content: &Content, bytes: &[u8]) {
        content.with_locked(|inner| {
            let mut pending = inner.pending.take().unwrap_or_else(|| inner.chain.new_buffer());
            let mut offset = 0;
            while offset < bytes.len() {
                let take = pending.remaining_capacity().min(bytes.len() - offset);
                pending.spare_mut()[..take].copy_from_slice(&bytes[offset..offset + take]);
                pending.commit(take);
                offset += take;
                if pending.is_full() || offset == bytes.len() {
                    let fanout = inner.fanout;
                    let mut full = std::mem::replace(&mut pending, inner.chain.new_buffer());
                    full.set_fanout(fanout);
                    inner.chain.push(full);
                }
            }
            inner.pending = None;
            inner.receive_complete = true;
        });
    }

    fn minimal_message_bytes(body: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0x00, 0x53, 0x70, tag::LIST0]; // empty header
        bytes.extend_from_slice(&[0x00, 0x53, 0x75, tag::VBIN8, body.len() as u8]);
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn single_body_data_chunk_then_no_more() {
        let content = Content::new(EngineConfig::default());
        push_bytes(&content, &minimal_message_bytes(b"hello"));
        let mut msg = Message::new(content);

        let first = next_stream_data(&mut msg).unwrap();
        match first {
            StreamStatus::Data(sd) => {
                assert!(!sd.is_footer());
                assert_eq!(stream_bytes(&msg, &sd), b"hello");
            }
            other => panic!("expected Data, got {other:?}"),
        }

        let second = next_stream_data(&mut msg).unwrap();
        assert!(matches!(second, StreamStatus::NoMore));
    }

    #[test]
    fn footer_is_yielded_after_the_last_body_chunk() {
        let content = Content::new(EngineConfig::default());
        let mut bytes = minimal_message_bytes(b"x");
        bytes.extend_from_slice(&[0x00, 0x53, 0x78, tag::MAP8, 0x01, 0x00]);
        push_bytes(&content, &bytes);
        let mut msg = Message::new(content);

        let _ = next_stream_data(&mut msg).unwrap();
        let footer = next_stream_data(&mut msg).unwrap();
        match footer {
            StreamStatus::Data(sd) => assert!(sd.is_footer()),
            other => panic!("expected footer Data, got {other:?}"),
        }
        assert!(matches!(next_stream_data(&mut msg).unwrap(), StreamStatus::NoMore));
    }

    #[test]
    fn body_value_is_rejected_for_streaming() {
        let content = Content::new(EngineConfig::default());
        push_bytes(&content, &[0x00, 0x53, 0x77, tag::NULL]);
        let mut msg = Message::new(content);
        let err = next_stream_data(&mut msg).unwrap_err();
        assert!(matches!(err, SectionError::Invalid { .. }));
    }

    #[test]
    fn releasing_a_fanout_handles_chunk_frees_its_buffer() {
        let content = Content::new(EngineConfig::default());
        push_bytes(&content, &minimal_message_bytes(b"hello"));
        let writer = Message::new(content.clone());
        let mut reader = writer.copy();
        reader.add_fanout();

        let _ = next_stream_data(&mut reader).unwrap();
        assert!(matches!(next_stream_data(&mut reader).unwrap(), StreamStatus::NoMore));
        release_front(&mut reader);
        // With body_cursor at chain end and only one buffer total, the
        // release should have brought the chain down as far as the shared
        // tail buffer still pinned by the core chain's own bookkeeping.
        assert!(content.chain_len() <= 1);
    }
}
