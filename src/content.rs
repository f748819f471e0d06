//! The shared, reference-counted backing for one received message (C5):
//! buffer chain, incremental parse state, per-section field locations, and
//! the flow-control flags every handle over this message observes.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::buffer::{Buffer, BufferChain};
use crate::config::EngineConfig;
use crate::cursor::{self, Cursor};
use crate::error::SectionError;
use crate::section::{self, SectionCode, SectionLocation, SectionStatus};
use crate::tag::{self, FieldLocation};

/// How far the depth-driven parser has gotten through the fixed AMQP
/// section order. Declared in that order so `Depth` derives a correct
/// `Ord` — `parse_depth` only ever moves forward (§3 invariant). Also reused
/// as the outbound `sent_depth` marker on [`crate::message::Message`]; the
/// send path walks the same fixed section order in the same direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Depth {
    Header,
    DeliveryAnnotations,
    MessageAnnotations,
    Properties,
    ApplicationProperties,
    Body,
    Footer,
    Done,
}

impl Depth {
    fn next(self) -> Depth {
        use Depth::*;
        match self {
            Header => DeliveryAnnotations,
            DeliveryAnnotations => MessageAnnotations,
            MessageAnnotations => Properties,
            Properties => ApplicationProperties,
            ApplicationProperties => Body,
            Body => Footer,
            Footer => Done,
            Done => Done,
        }
    }
}

/// Outcome of a [`Content::check_depth`] call. `Invalid` is surfaced as an
/// `Err(SectionError::Invalid)` rather than a variant, since the message is
/// ruined either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DepthStatus {
    Ok,
    Incomplete,
}

/// Number of positional elements in the AMQP properties list this engine
/// tracks (message-id through reply-to-group-id).
pub(crate) const PROPERTY_FIELD_COUNT: usize = 13;

pub const PROP_MESSAGE_ID: usize = 0;
pub const PROP_USER_ID: usize = 1;
pub const PROP_TO: usize = 2;
pub const PROP_SUBJECT: usize = 3;
pub const PROP_REPLY_TO: usize = 4;
pub const PROP_CORRELATION_ID: usize = 5;
pub const PROP_CONTENT_TYPE: usize = 6;
pub const PROP_CONTENT_ENCODING: usize = 7;
pub const PROP_ABSOLUTE_EXPIRY_TIME: usize = 8;
pub const PROP_CREATION_TIME: usize = 9;
pub const PROP_GROUP_ID: usize = 10;
pub const PROP_GROUP_SEQUENCE: usize = 11;
pub const PROP_REPLY_TO_GROUP_ID: usize = 12;

#[derive(Default)]
pub(crate) struct SectionSlots {
    pub(crate) header: Option<SectionLocation>,
    pub(crate) delivery_annotations: Option<SectionLocation>,
    pub(crate) message_annotations: Option<SectionLocation>,
    pub(crate) properties: Option<SectionLocation>,
    pub(crate) application_properties: Option<SectionLocation>,
    pub(crate) body: Option<SectionLocation>,
    pub(crate) body_kind: Option<SectionCode>,
    pub(crate) footer: Option<SectionLocation>,
}

pub(crate) struct ContentInner {
    pub(crate) chain: BufferChain,
    pub(crate) pending: Option<Buffer>,
    pub(crate) bytes_received: u64,
    pub(crate) sections: SectionSlots,
    pub(crate) properties_subfields: [Option<FieldLocation>; PROPERTY_FIELD_COUNT],
    pub(crate) properties_parsed_upto: usize,
    pub(crate) properties_list_count: Option<u32>,
    pub(crate) parse_cursor: Option<Cursor>,
    pub(crate) parse_depth: Depth,
    pub(crate) fanout: u32,
    pub(crate) q2_input_holdoff: bool,
    pub(crate) discard: bool,
    pub(crate) oversize: bool,
    pub(crate) aborted: bool,
    pub(crate) receive_complete: bool,
    pub(crate) no_body: bool,
    /// Set once the pass-through sections' `protect_buffers` pins have been
    /// given back (see `release_passthrough_if_last_fanout`), so a second
    /// fanout handle dropping after the last one doesn't double-release.
    pub(crate) passthrough_released: bool,
    pub(crate) q2_unblocker: Option<Box<dyn FnMut() + Send>>,
    pub(crate) config: EngineConfig,
}

impl ContentInner {
    fn new(config: EngineConfig) -> Self {
        Self {
            chain: BufferChain::new(config.buffer_size),
            pending: None,
            bytes_received: 0,
            sections: SectionSlots::default(),
            properties_subfields: [None; PROPERTY_FIELD_COUNT],
            properties_parsed_upto: 0,
            properties_list_count: None,
            parse_cursor: None,
            parse_depth: Depth::Header,
            fanout: 0,
            q2_input_holdoff: false,
            discard: false,
            oversize: false,
            aborted: false,
            receive_complete: false,
            no_body: false,
            passthrough_released: false,
            q2_unblocker: None,
            config,
        }
    }

    /// Ensures a pending (not-yet-appended) receive buffer exists, allocating
    /// one from the chain if needed.
    pub(crate) fn ensure_pending(&mut self) {
        if self.pending.is_none() {
            self.pending = Some(self.chain.new_buffer());
        }
    }

    /// Appends `pending` to the chain if it is full, tagging it with the
    /// current fanout count (§3 invariant: a buffer's fanout at append time
    /// equals the number of outbound consumers that still need to see it).
    /// Returns whether an append happened.
    pub(crate) fn append_pending_if_full(&mut self) -> bool {
        let is_full = self.pending.as_ref().is_some_and(Buffer::is_full);
        if !is_full {
            return false;
        }
        let mut buf = self.pending.take().expect("checked above");
        buf.set_fanout(self.fanout);
        self.chain.push(buf);
        true
    }

    /// Appends a non-empty `pending` to the chain unconditionally (used when
    /// the receive loop pauses for lack of bytes, or when a new fanout
    /// consumer needs to observe everything received so far). A pending
    /// buffer with no bytes in it is simply dropped.
    pub(crate) fn flush_pending(&mut self) {
        let Some(mut buf) = self.pending.take() else {
            return;
        };
        if buf.filled() == 0 {
            return;
        }
        buf.set_fanout(self.fanout);
        self.chain.push(buf);
    }

    /// If Q2 holdoff is set and the chain has fallen below the low
    /// watermark, clears the holdoff and returns the registered callback so
    /// the caller can invoke it *outside* the lock.
    pub(crate) fn take_q2_unblocker_if_cleared(&mut self) -> Option<Box<dyn FnMut() + Send>> {
        if self.q2_input_holdoff && self.chain.len() < self.config.q2_lower {
            self.q2_input_holdoff = false;
            self.q2_unblocker.take()
        } else {
            None
        }
    }

    /// Frees every buffer at the head of the chain whose fanout has reached
    /// zero. Call after decrementing fanout counts; returns whether any
    /// buffer was freed (callers use this to decide whether to recheck Q2).
    pub(crate) fn sweep_drained_front(&mut self) -> bool {
        let mut freed = false;
        while self.chain.pop_front_if_drained() {
            freed = true;
        }
        freed
    }

    fn start_cursor(&self) -> Cursor {
        self.parse_cursor
            .unwrap_or_else(|| Cursor::new(self.chain.front_seq().unwrap_or(0), 0))
    }

    /// Advances `parse_depth` toward `target`, one optional section at a
    /// time, stopping at the first `NEED_MORE`. Matched and skipped-absent
    /// sections are both terminal for that depth (parsing never backtracks).
    pub(crate) fn check_depth(&mut self, target: Depth) -> Result<DepthStatus, SectionError> {
        loop {
            if self.parse_depth >= target {
                return Ok(DepthStatus::Ok);
            }

            // Once body streaming has released the buffers the shared parse
            // cursor pointed at, there is nothing left to re-parse here; the
            // depth was already advanced by whoever streamed it.
            if matches!(self.parse_depth, Depth::Body | Depth::Footer) {
                if let Some(pc) = self.parse_cursor {
                    if self.chain.get(pc.buf_seq).is_none() {
                        self.parse_depth = target;
                        return Ok(DepthStatus::Ok);
                    }
                }
            }

            let mut cursor = self.start_cursor();
            let depth = self.parse_depth;

            let advanced = match depth {
                Depth::Header => self.try_optional(&mut cursor, SectionCode::Header, |s, loc| {
                    s.sections.header = Some(loc)
                })?,
                Depth::DeliveryAnnotations => {
                    self.try_optional(&mut cursor, SectionCode::DeliveryAnnotations, |s, loc| {
                        s.sections.delivery_annotations = Some(loc)
                    })?
                }
                Depth::MessageAnnotations => {
                    self.try_optional(&mut cursor, SectionCode::MessageAnnotations, |s, loc| {
                        s.sections.message_annotations = Some(loc)
                    })?
                }
                Depth::Properties => self.try_optional(&mut cursor, SectionCode::Properties, |s, loc| {
                    s.sections.properties = Some(loc)
                })?,
                Depth::ApplicationProperties => {
                    self.try_optional(&mut cursor, SectionCode::ApplicationProperties, |s, loc| {
                        s.sections.application_properties = Some(loc)
                    })?
                }
                Depth::Body => self.try_body(&mut cursor)?,
                Depth::Footer => {
                    // Footer is optional; absence simply means the message
                    // ends after the body. Like the body, its buffers are
                    // not pinned with protect_buffers — released
                    // incrementally alongside the rest of the stream instead
                    // of held for the content's whole lifetime.
                    match section::message_section_check(
                        &self.chain,
                        &mut cursor,
                        SectionCode::Footer,
                        section::allowed_tags(SectionCode::Footer),
                    )? {
                        SectionStatus::Match(loc) => {
                            self.sections.footer = Some(loc);
                            true
                        }
                        SectionStatus::NoMatch => true,
                        // No bytes left to decide with. If the receiver has
                        // latched receive_complete, none ever will — an
                        // optional trailing section absent at end-of-stream
                        // resolves to "absent", not a forever-incomplete wait.
                        SectionStatus::NeedMore => self.receive_complete,
                    }
                }
                Depth::Done => unreachable!(),
            };

            if !advanced {
                return Ok(DepthStatus::Incomplete);
            }

            self.parse_cursor = Some(cursor);
            self.parse_depth = depth.next();
        }
    }

    /// Runs one optional-section attempt, calling `record` to stash the
    /// location on a match. Returns `true` if the depth resolved (matched,
    /// confirmed absent, or confirmed absent-forever by `receive_complete`)
    /// or `false` on a `NEED_MORE` that might still be satisfied by bytes yet
    /// to arrive (caller should report `Incomplete` without advancing).
    fn try_optional(
        &mut self,
        cursor: &mut Cursor,
        code: SectionCode,
        record: impl FnOnce(&mut Self, SectionLocation),
    ) -> Result<bool, SectionError> {
        match section::message_section_check(&self.chain, cursor, code, section::allowed_tags(code))? {
            SectionStatus::Match(loc) => {
                self.protect_buffers(&loc);
                record(self, loc);
                Ok(true)
            }
            SectionStatus::NoMatch => Ok(true),
            SectionStatus::NeedMore => Ok(self.receive_complete),
        }
    }

    /// Tries body-data, then body-sequence, then body-value, in that order,
    /// treating a complete failure of all three as invalid. Returns `false`
    /// on `NeedMore` (caller should report `Incomplete` without advancing).
    ///
    /// Unlike the pass-through sections `try_optional` handles, a matched
    /// body location is not pinned with `protect_buffers` here — its buffers
    /// are already held by this handle's own `add_fanout` claim, and are
    /// released incrementally as the body is streamed or sent rather than
    /// held for the content's whole lifetime.
    fn try_body(&mut self, cursor: &mut Cursor) -> Result<bool, SectionError> {
        for code in [SectionCode::BodyData, SectionCode::BodySequence, SectionCode::BodyValue] {
            match section::message_section_check(&self.chain, cursor, code, section::allowed_tags(code))? {
                SectionStatus::Match(loc) => {
                    self.sections.body = Some(loc);
                    self.sections.body_kind = Some(code);
                    return Ok(true);
                }
                SectionStatus::NoMatch => continue,
                SectionStatus::NeedMore => return Ok(false),
            }
        }
        self.no_body = true;
        Err(SectionError::Invalid {
            reason: "no body variant (data/sequence/value) matched",
        })
    }

    /// Walks every buffer a section spans, applying `f` to each. Shared by
    /// `protect_buffers` and `unprotect_buffers` so the two stay in lockstep
    /// about exactly which buffers a location covers.
    fn for_each_spanned_buffer(&mut self, loc: &SectionLocation, mut f: impl FnMut(&mut Buffer)) {
        let mut cursor = loc.start;
        let mut remaining = loc.total_length();
        let mut first = true;
        loop {
            let Some(buf) = self.chain.get_mut(cursor.buf_seq) else {
                break;
            };
            f(buf);
            // The section's first buffer only offers its bytes from
            // cursor.offset onward; later buffers in the span offer their
            // full capacity.
            let avail = if first {
                buf.capacity().saturating_sub(cursor.offset)
            } else {
                buf.capacity()
            };
            first = false;
            if remaining <= avail {
                break;
            }
            remaining = remaining.saturating_sub(avail);
            cursor.buf_seq += 1;
            if self.chain.get(cursor.buf_seq).is_none() {
                break;
            }
        }
    }

    /// Increments the fanout of every buffer a just-matched pass-through
    /// section (header through application-properties) spans, pinning them
    /// against release for as long as the content itself lives — these
    /// sections stay readable via `section_bytes`/`property_field` long
    /// after a streaming or send cursor has moved past them. Body and
    /// footer sections are never passed here (see `try_body`); their
    /// buffers are released incrementally instead.
    pub(crate) fn protect_buffers(&mut self, loc: &SectionLocation) {
        self.for_each_spanned_buffer(loc, |buf| {
            buf.inc_fanout();
        });
    }

    /// Gives back a `protect_buffers` pin. Called once, on every recorded
    /// pass-through section, when the last fanout handle over this content
    /// goes away (see `release_passthrough_if_last_fanout`) — at that point
    /// no handle's read cursor can still be racing ahead of these sections,
    /// so there is nothing left for the pin to protect against.
    fn unprotect_buffers(&mut self, loc: &SectionLocation) {
        self.for_each_spanned_buffer(loc, |buf| {
            buf.dec_fanout();
        });
    }

    /// Releases every recorded pass-through section's `protect_buffers` pin,
    /// exactly once, the first time this is called after fanout has dropped
    /// to zero. A no-op otherwise, and a no-op on a second call (guarded by
    /// `passthrough_released`) so multiple fanout handles dropping in
    /// sequence don't double-release.
    pub(crate) fn release_passthrough_if_last_fanout(&mut self) {
        if self.fanout != 0 || self.passthrough_released {
            return;
        }
        self.passthrough_released = true;
        for loc in [
            self.sections.header,
            self.sections.delivery_annotations,
            self.sections.message_annotations,
            self.sections.properties,
            self.sections.application_properties,
        ]
        .into_iter()
        .flatten()
        {
            self.unprotect_buffers(&loc);
        }
        self.sweep_drained_front();
    }

    /// Lazily walks the properties list up to and including element `index`,
    /// recording each positional field. Returns `None` if the list is
    /// shorter than `index` or the element's tag is AMQP null.
    pub(crate) fn property_field(&mut self, index: usize) -> Result<Option<FieldLocation>, SectionError> {
        debug_assert!(index < PROPERTY_FIELD_COUNT);
        if let Some(loc) = self.properties_subfields[index] {
            return Ok(Some(loc).filter(|l| l.tag != tag::NULL));
        }
        let Some(props) = self.sections.properties else {
            return Ok(None);
        };
        if self.properties_list_count.is_none() {
            self.properties_list_count = tag::get_list_count(&self.chain, &props.body);
        }
        let Some(count) = self.properties_list_count else {
            return Ok(None);
        };
        if index as u32 >= count {
            return Ok(None);
        }

        let mut cursor = props.body.content_start(&self.chain);
        // Skip the count sub-field itself for list8/list32.
        match props.body.tag {
            tag::LIST8 => {
                cursor::advance(&self.chain, &mut cursor, 1);
            }
            tag::LIST32 => {
                cursor::advance(&self.chain, &mut cursor, 4);
            }
            _ => {}
        }
        for i in self.properties_parsed_upto..=index {
            let Some(loc) = tag::traverse_field(&self.chain, &mut cursor)? else {
                return Ok(None);
            };
            self.properties_subfields[i] = Some(loc);
        }
        self.properties_parsed_upto = index + 1;
        Ok(self.properties_subfields[index].filter(|l| l.tag != tag::NULL))
    }

    /// Copies the raw bytes (descriptor + tag header + content) of a
    /// recorded section out of the chain. Used by the send path to emit
    /// pass-through sections verbatim, and by diagnostics callers that want
    /// the bytes of a section without reaching into chain internals.
    pub(crate) fn section_bytes(&self, loc: &SectionLocation) -> Vec<u8> {
        let mut out = Vec::with_capacity(loc.total_length());
        let mut cursor = loc.start;
        cursor::advance_guarded(&self.chain, &mut cursor, loc.total_length(), |chunk| {
            out.extend_from_slice(chunk)
        });
        out
    }

    /// Splits a map field's content into its element count and the raw
    /// key/value bytes that follow the count sub-field. Used by the send
    /// path to separate the inbound message-annotations map's own entries
    /// from the router-specific keys it composes alongside them.
    pub(crate) fn map_entries_bytes(&self, loc: &FieldLocation) -> (u32, Vec<u8>) {
        let (count, skip) = match loc.tag {
            tag::MAP8 => {
                let start = loc.content_start(&self.chain);
                let c = cursor::peek(&self.chain, &start, 1).map_or(0, |b| b[0] as u32);
                (c, 1)
            }
            tag::MAP32 => {
                let start = loc.content_start(&self.chain);
                let c = cursor::peek(&self.chain, &start, 4)
                    .map_or(0, |b| u32::from_be_bytes(b.try_into().expect("peek returned 4 bytes")));
                (c, 4)
            }
            _ => (0, 0),
        };

        let mut cur = loc.content_start(&self.chain);
        cursor::advance(&self.chain, &mut cur, skip);
        let remaining = loc.content_length - skip;
        let mut out = Vec::with_capacity(remaining);
        cursor::advance_guarded(&self.chain, &mut cur, remaining, |chunk| out.extend_from_slice(chunk));
        (count, out)
    }

    /// Copies the raw content bytes (header stripped) of a parsed field.
    /// Used for properties subfields and for reading the message-annotations
    /// map content when composing the outbound section.
    pub(crate) fn field_content_bytes(&self, loc: &FieldLocation) -> Vec<u8> {
        let mut out = Vec::with_capacity(loc.content_length);
        let mut cursor = loc.content_start(&self.chain);
        cursor::advance_guarded(&self.chain, &mut cursor, loc.content_length, |chunk| {
            out.extend_from_slice(chunk)
        });
        out
    }
}

/// Shared, `Arc`-counted backing for one received message. Cloning a
/// `Content` clones the `Arc` — there is no separate manual ref count; the
/// Rust expansion uses `Arc::strong_count`'s own atomics for that (§4.3).
#[derive(Clone)]
pub struct Content {
    pub(crate) inner: Arc<Mutex<ContentInner>>,
}

/// A non-owning reference to a [`Content`], held by the transport's
/// per-delivery attachment slot (§4.7). Upgrading after `receive_complete`
/// has cleared the slot returns `None`.
#[derive(Clone)]
pub struct WeakContent {
    inner: Weak<Mutex<ContentInner>>,
}

impl WeakContent {
    pub fn upgrade(&self) -> Option<Content> {
        self.inner.upgrade().map(|inner| Content { inner })
    }
}

impl Content {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ContentInner::new(config))),
        }
    }

    pub fn downgrade(&self) -> WeakContent {
        WeakContent {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ContentInner> {
        self.inner.lock().expect("Content mutex poisoned")
    }

    pub(crate) fn with_locked<R>(&self, f: impl FnOnce(&mut ContentInner) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    pub(crate) fn check_depth(&self, target: Depth) -> Result<DepthStatus, SectionError> {
        self.with_locked(|inner| inner.check_depth(target))
    }

    pub fn is_aborted(&self) -> bool {
        self.with_locked(|inner| inner.aborted)
    }

    pub fn is_receive_complete(&self) -> bool {
        self.with_locked(|inner| inner.receive_complete)
    }

    pub fn is_oversize(&self) -> bool {
        self.with_locked(|inner| inner.oversize)
    }

    pub fn is_discarded(&self) -> bool {
        self.with_locked(|inner| inner.discard)
    }

    pub fn is_q2_holdoff(&self) -> bool {
        self.with_locked(|inner| inner.q2_input_holdoff)
    }

    pub fn fanout(&self) -> u32 {
        self.with_locked(|inner| inner.fanout)
    }

    pub fn chain_len(&self) -> usize {
        self.with_locked(|inner| inner.chain.len())
    }

    pub fn bytes_received(&self) -> u64 {
        self.with_locked(|inner| inner.bytes_received)
    }

    /// Installs the Q2-unblocker callback, replacing any previous one.
    pub fn set_q2_unblocker(&self, handler: impl FnMut() + Send + 'static) {
        self.with_locked(|inner| inner.q2_unblocker = Some(Box::new(handler)));
    }

    /// Positional properties-list accessor (message-id through
    /// reply-to-group-id; see the `PROP_*` constants). Out of scope per §1,
    /// decoding the field's bytes into a typed value is left to the host's
    /// shared field representation — this returns only the byte range.
    pub fn property_field(&self, index: usize) -> Result<Option<PropertyField>, SectionError> {
        self.with_locked(|inner| inner.property_field(index)).map(|opt| opt.map(PropertyField))
    }

    pub fn property_bytes(&self, loc: &PropertyField) -> Vec<u8> {
        self.with_locked(|inner| inner.field_content_bytes(&loc.0))
    }
}

/// Opaque handle to one properties-list field, returned by
/// [`Content::property_field`]. Pass it back to [`Content::property_bytes`]
/// to read its raw content bytes.
#[derive(Debug, Clone, Copy)]
pub struct PropertyField(FieldLocation);

#[cfg(test)]
mod tests {
    use super::*;

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
        });
    }

    #[test]
    fn minimal_message_reaches_body_depth() {
        let content = Content::new(EngineConfig::default());
        // short header (list0), short properties (list8 with one empty string "to"),
        // short body-data (vbin8 zero length).
        let bytes = [
            0x00, 0x53, 0x70, tag::LIST0, 0x00, 0x53, 0x73, tag::LIST8, 0x03, 0x01, tag::STR8,
            0x00, 0x00, 0x53, 0x75, tag::VBIN8, 0x00,
        ];
        push_bytes(&content, &bytes);
        let status = content.check_depth(Depth::Body).unwrap();
        assert_eq!(status, DepthStatus::Ok);
        content.with_locked(|inner| {
            assert_eq!(inner.sections.body_kind, Some(SectionCode::BodyData));
            assert_eq!(inner.sections.body.unwrap().body.content_length, 0);
        });
    }

    #[test]
    fn incomplete_descriptor_yields_incomplete_not_invalid() {
        let content = Content::new(EngineConfig::default());
        push_bytes(&content, &[0x00, 0x53]);
        let status = content.check_depth(Depth::Header).unwrap();
        assert_eq!(status, DepthStatus::Incomplete);
    }

    #[test]
    fn body_value_is_invalid_only_for_streaming_not_for_depth() {
        let content = Content::new(EngineConfig::default());
        let bytes = [0x00, 0x53, 0x77, tag::NULL];
        push_bytes(&content, &bytes);
        let status = content.check_depth(Depth::Body).unwrap();
        assert_eq!(status, DepthStatus::Ok);
        content.with_locked(|inner| {
            assert_eq!(inner.sections.body_kind, Some(SectionCode::BodyValue));
        });
    }

    #[test]
    fn section_bytes_round_trips_the_inbound_descriptor_form() {
        let content = Content::new(EngineConfig::default());
        let mut bytes = vec![0x00, 0x80, 0, 0, 0, 0, 0, 0, 0, 0x70];
        bytes.push(tag::LIST0);
        push_bytes(&content, &bytes);
        content.check_depth(Depth::Header).unwrap();
        content.with_locked(|inner| {
            let loc = inner.sections.header.unwrap();
            assert!(loc.is_long_form());
            assert_eq!(inner.section_bytes(&loc), bytes);
        });
    }
}
