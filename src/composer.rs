//! Composer glue (C10): assembles the rewritten message-annotations section
//! the send path emits in place of the inbound one.
//!
//! The typed field composer itself is an external collaborator (§1 OUT OF
//! SCOPE) — a host crate normally reuses whatever encoder it already has for
//! building outbound AMQP fields. [`SectionComposer`] is the narrow contract
//! this engine needs from it; [`DefaultComposer`] is a small, dependency-free
//! implementation good enough to exercise the send path end to end and to
//! drive this crate's own tests.

use bytes::{BufMut, BytesMut};

use crate::tag;

/// Per-handle overrides for the outbound message-annotations section (§3
/// Message data model). `None` means "this handle does not set this key" —
/// distinct from an empty string, which is a legitimate override value.
#[derive(Debug, Clone, Default)]
pub struct AnnotationOverrides {
    pub to_override: Option<String>,
    pub trace: Option<String>,
    pub ingress: Option<String>,
    pub phase: Option<i32>,
    pub stream: Option<String>,
}

impl AnnotationOverrides {
    fn is_empty(&self) -> bool {
        self.to_override.is_none()
            && self.trace.is_none()
            && self.ingress.is_none()
            && self.phase.is_none()
            && self.stream.is_none()
    }
}

/// The router-specific annotation keys reserved by this engine, in the fixed
/// order `compose_message_annotations` emits them. A non-stripping send
/// pads the composed map out to cover exactly the keys present on the
/// handle, in this order — never more.
pub const RESERVED_ANNOTATION_KEYS: [&str; 5] =
    ["x-opt-to-override", "x-opt-trace", "x-opt-ingress", "x-opt-phase", "x-opt-stream"];

/// The narrow contract the send path (C8) needs from an AMQP field
/// composer: build the bytes of one rewritten section. Everything about how
/// a symbol or a map entry is actually encoded stays behind this trait.
pub trait SectionComposer: Send + Sync {
    /// Appends a complete message-annotations section — descriptor, map
    /// tag/size/count, router keys present on `overrides`, followed by
    /// `user_map_content` (the inbound map's own raw key/value bytes, copied
    /// verbatim) — to `out`.
    fn compose_message_annotations(
        &self,
        overrides: &AnnotationOverrides,
        user_map_count: u32,
        user_map_content: &[u8],
        out: &mut BytesMut,
    );

    /// Appends a message-annotations section whose header alone is rebuilt
    /// (same element count and content length as the inbound section, same
    /// map tag width, short descriptor form) — used for `strip_annotations
    /// = true`, where the router never injects its own keys and the caller
    /// appends `user_map_content` immediately afterward.
    fn compose_passthrough_header(
        &self,
        original_tag: u8,
        user_map_count: u32,
        user_map_content_len: usize,
        out: &mut BytesMut,
    );
}

/// Reference [`SectionComposer`]. Encodes symbol keys as `sym8`, strings as
/// `str8`/`str32`, and the `phase` override as a `uint`/`smalluint` — enough
/// fidelity to be decoded by any AMQP 1.0 peer without pulling in a full
/// codec crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultComposer;

impl DefaultComposer {
    fn put_symbol(out: &mut BytesMut, sym: &str) {
        out.put_u8(tag::SYM8);
        out.put_u8(sym.len() as u8);
        out.put_slice(sym.as_bytes());
    }

    fn put_string(out: &mut BytesMut, s: &str) {
        if s.len() <= u8::MAX as usize {
            out.put_u8(tag::STR8);
            out.put_u8(s.len() as u8);
        } else {
            out.put_u8(tag::STR32);
            out.put_u32(s.len() as u32);
        }
        out.put_slice(s.as_bytes());
    }

    fn put_int(out: &mut BytesMut, v: i32) {
        out.put_u8(0x71); // "int", fixed-4
        out.put_i32(v);
    }

    /// Encodes one reserved key/value pair; returns the number of bytes
    /// written, or 0 if `overrides` has nothing for this key (the caller
    /// skips the pair entirely — absent keys are not emitted as nulls).
    fn put_reserved(out: &mut BytesMut, key: &str, overrides: &AnnotationOverrides) -> usize {
        let start = out.len();
        match key {
            "x-opt-to-override" => {
                if let Some(v) = &overrides.to_override {
                    Self::put_symbol(out, key);
                    Self::put_string(out, v);
                }
            }
            "x-opt-trace" => {
                if let Some(v) = &overrides.trace {
                    Self::put_symbol(out, key);
                    Self::put_string(out, v);
                }
            }
            "x-opt-ingress" => {
                if let Some(v) = &overrides.ingress {
                    Self::put_symbol(out, key);
                    Self::put_string(out, v);
                }
            }
            "x-opt-phase" => {
                if let Some(v) = overrides.phase {
                    Self::put_symbol(out, key);
                    Self::put_int(out, v);
                }
            }
            "x-opt-stream" => {
                if let Some(v) = &overrides.stream {
                    Self::put_symbol(out, key);
                    Self::put_string(out, v);
                }
            }
            _ => unreachable!("not one of RESERVED_ANNOTATION_KEYS"),
        }
        out.len() - start
    }
}

impl SectionComposer for DefaultComposer {
    fn compose_message_annotations(
        &self,
        overrides: &AnnotationOverrides,
        user_map_count: u32,
        user_map_content: &[u8],
        out: &mut BytesMut,
    ) {
        let mut router_pairs = BytesMut::new();
        let mut router_entries: u32 = 0;
        for key in RESERVED_ANNOTATION_KEYS {
            let before = router_pairs.len();
            Self::put_reserved(&mut router_pairs, key, overrides);
            if router_pairs.len() > before {
                router_entries += 2; // key + value each count as one list element
            }
        }

        let total_count = user_map_count + router_entries;
        let content_len = router_pairs.len() + user_map_content.len();

        out.put_u8(0x00);
        out.put_u8(0x53);
        out.put_u8(crate::section::MESSAGE_ANNOTATIONS_CODE);

        if total_count <= 255 && content_len + 1 <= 255 {
            out.put_u8(tag::MAP8);
            out.put_u8((content_len + 1) as u8); // +1 for the count byte itself
            out.put_u8(total_count as u8);
        } else {
            out.put_u8(tag::MAP32);
            out.put_u32((content_len + 4) as u32);
            out.put_u32(total_count);
        }
        out.put_slice(&router_pairs);
        out.put_slice(user_map_content);
    }

    fn compose_passthrough_header(
        &self,
        original_tag: u8,
        user_map_count: u32,
        user_map_content_len: usize,
        out: &mut BytesMut,
    ) {
        out.put_u8(0x00);
        out.put_u8(0x53);
        out.put_u8(crate::section::MESSAGE_ANNOTATIONS_CODE);
        match original_tag {
            tag::MAP8 => {
                out.put_u8(tag::MAP8);
                out.put_u8((user_map_content_len + 1) as u8);
                out.put_u8(user_map_count as u8);
            }
            _ => {
                out.put_u8(tag::MAP32);
                out.put_u32((user_map_content_len + 4) as u32);
                out.put_u32(user_map_count);
            }
        }
    }
}

/// Returns true if `overrides` has nothing set — the caller can then skip
/// straight to the passthrough-header path even when `strip_annotations =
/// false`, since an empty override set composes to an empty router-keys map.
pub fn overrides_are_empty(overrides: &AnnotationOverrides) -> bool {
    overrides.is_empty()
}
