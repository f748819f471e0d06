//! AMQP 1.0 type-tag parsing (C3): derives a field's on-wire size from its
//! tag byte without decoding the value itself.

use crate::cursor::{self, Cursor};
use crate::buffer::BufferChain;

// Fixed-width tags, by high nibble.
pub(crate) const NULL: u8 = 0x40;
pub(crate) const LIST0: u8 = 0x45;
pub(crate) const BOOL_TRUE: u8 = 0x41;
pub(crate) const BOOL_FALSE: u8 = 0x42;
pub(crate) const BOOL: u8 = 0x56;
pub(crate) const TIMESTAMP: u8 = 0x83;

// Variable-width tags referenced directly by the section table.
pub(crate) const STR8: u8 = 0xA1;
pub(crate) const STR32: u8 = 0xB1;
pub(crate) const SYM8: u8 = 0xA3;
pub(crate) const SYM32: u8 = 0xB3;
pub(crate) const VBIN8: u8 = 0xA0;
pub(crate) const VBIN32: u8 = 0xB0;
pub(crate) const LIST8: u8 = 0xC0;
pub(crate) const LIST32: u8 = 0xD0;
pub(crate) const MAP8: u8 = 0xC1;
pub(crate) const MAP32: u8 = 0xD1;
pub(crate) const ARRAY8: u8 = 0xE0;
pub(crate) const ARRAY32: u8 = 0xF0;

/// How a tag's content length is derived: no bytes, a fixed byte count, or a
/// size prefix of one or four big-endian bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldWidth {
    Fixed(usize),
    VarU8,
    VarU32,
    Unknown,
}

pub(crate) fn field_width(tag: u8) -> FieldWidth {
    if tag == LIST0 {
        return FieldWidth::Fixed(0);
    }
    match tag & 0xF0 {
        0x40 => FieldWidth::Fixed(0),
        0x50 => FieldWidth::Fixed(1),
        0x60 => FieldWidth::Fixed(2),
        0x70 => FieldWidth::Fixed(4),
        0x80 => FieldWidth::Fixed(8),
        0x90 => FieldWidth::Fixed(16),
        0xA0 | 0xC0 | 0xE0 => FieldWidth::VarU8,
        0xB0 | 0xD0 | 0xF0 => FieldWidth::VarU32,
        _ => FieldWidth::Unknown,
    }
}

/// A contiguous, immutable-once-parsed framed region within a chain. The
/// region (header bytes + content bytes) may span multiple buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FieldLocation {
    pub(crate) buf_seq: u64,
    pub(crate) offset: usize,
    pub(crate) hdr_length: usize,
    pub(crate) content_length: usize,
    pub(crate) tag: u8,
    pub(crate) parsed: bool,
}

impl FieldLocation {
    pub(crate) fn total_length(&self) -> usize {
        self.hdr_length + self.content_length
    }

    /// Cursor positioned just past the header, at the first content byte.
    pub(crate) fn content_start(&self, chain: &BufferChain) -> Cursor {
        let mut c = Cursor::new(self.buf_seq, self.offset);
        cursor::advance(chain, &mut c, self.hdr_length);
        c
    }

    /// Cursor positioned one past the last byte of the field (start of the
    /// next field, possibly the first byte of the next buffer).
    pub(crate) fn end(&self, chain: &BufferChain) -> Cursor {
        let mut c = Cursor::new(self.buf_seq, self.offset);
        cursor::advance(chain, &mut c, self.total_length());
        c
    }
}

/// Reads one tagged field at `cursor` without mutating it unless the field
/// is fully buffered. Returns `Ok(None)` on NEED_MORE, `Ok(Some(loc))` with
/// the cursor advanced past the field on success, `Err` for a tag this
/// engine does not know the width of.
pub(crate) fn traverse_field(
    chain: &BufferChain,
    cursor: &mut Cursor,
) -> Result<Option<FieldLocation>, crate::error::SectionError> {
    let start = *cursor;
    let Some(tag) = cursor::next_octet(chain, cursor) else {
        *cursor = start;
        return Ok(None);
    };

    let (hdr_length, content_length) = match field_width(tag) {
        FieldWidth::Fixed(n) => (1, n),
        FieldWidth::VarU8 => {
            let Some(n) = cursor::next_octet(chain, cursor) else {
                *cursor = start;
                return Ok(None);
            };
            (2, n as usize)
        }
        FieldWidth::VarU32 => {
            let Some(bytes) = cursor::peek(chain, cursor, 4) else {
                *cursor = start;
                return Ok(None);
            };
            let n = u32::from_be_bytes(bytes.try_into().expect("peek returned 4 bytes"));
            cursor::advance(chain, cursor, 4);
            (5, n as usize)
        }
        FieldWidth::Unknown => {
            *cursor = start;
            return Err(crate::error::SectionError::Invalid {
                reason: "unrecognized type tag",
            });
        }
    };

    if !cursor::advance(chain, cursor, content_length) {
        *cursor = start;
        return Ok(None);
    }

    Ok(Some(FieldLocation {
        buf_seq: start.buf_seq,
        offset: start.offset,
        hdr_length,
        content_length,
        tag,
        parsed: true,
    }))
}

/// Additionally returns the element count for list0/list8/list32, by peeking
/// the count sub-field at the front of the list's content (list8/list32
/// store it as the first 1 or 4 content bytes; list0 has none).
pub(crate) fn get_list_count(chain: &BufferChain, loc: &FieldLocation) -> Option<u32> {
    match loc.tag {
        LIST0 => Some(0),
        LIST8 => {
            let start = loc.content_start(chain);
            let probe = Cursor::new(start.buf_seq, start.offset);
            cursor::peek(chain, &probe, 1).map(|b| b[0] as u32)
        }
        LIST32 => {
            let start = loc.content_start(chain);
            let probe = Cursor::new(start.buf_seq, start.offset);
            cursor::peek(chain, &probe, 4).map(|b| u32::from_be_bytes(b.try_into().unwrap()))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferChain;

    fn chain_with(bytes: &[u8]) -> BufferChain {
        let mut chain = BufferChain::new(4096);
        let mut b = chain.new_buffer();
        b.spare_mut()[..bytes.len()].copy_from_slice(bytes);
        b.commit(bytes.len());
        chain.push(b);
        chain
    }

    #[test]
    fn traverse_field_reads_zero_length_string() {
        let chain = chain_with(&[STR8, 0x00]);
        let mut cur = Cursor::new(0, 0);
        let loc = traverse_field(&chain, &mut cur).unwrap().unwrap();
        assert_eq!(loc.tag, STR8);
        assert_eq!(loc.content_length, 0);
        assert_eq!(loc.hdr_length, 2);
        assert_eq!(cur, Cursor::new(0, 2));
    }

    #[test]
    fn traverse_field_reports_need_more_for_split_var32_header() {
        let chain = chain_with(&[VBIN32, 0x00, 0x00]);
        let mut cur = Cursor::new(0, 0);
        assert!(traverse_field(&chain, &mut cur).unwrap().is_none());
        assert_eq!(cur, Cursor::new(0, 0), "cursor must not move on NEED_MORE");
    }

    #[test]
    fn list8_count_is_first_content_byte() {
        let chain = chain_with(&[LIST8, 0x03, 0x01, 0xAB, 0xCD]);
        let mut cur = Cursor::new(0, 0);
        let loc = traverse_field(&chain, &mut cur).unwrap().unwrap();
        assert_eq!(get_list_count(&chain, &loc), Some(1));
    }
}
