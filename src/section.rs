//! AMQP 1.0 section framing (C4): descriptor matching and the body-tag
//! validation that turns a tagged field into a recorded section.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::buffer::BufferChain;
use crate::cursor::{self, Cursor};
use crate::error::SectionError;
use crate::tag::{self, FieldLocation};

/// The nine AMQP message sections, identified by their descriptor code byte
/// (0x70..0x78). Parsed from the code byte with `num_enum`, the same way
/// wire command identifiers are turned into enums elsewhere in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub(crate) enum SectionCode {
    Header = 0x70,
    DeliveryAnnotations = 0x71,
    MessageAnnotations = 0x72,
    Properties = 0x73,
    ApplicationProperties = 0x74,
    BodyData = 0x75,
    BodySequence = 0x76,
    BodyValue = 0x77,
    Footer = 0x78,
}

/// Descriptor code byte for the message-annotations section, re-exported
/// for the composer (C10), which builds one from scratch on the send path.
pub(crate) const MESSAGE_ANNOTATIONS_CODE: u8 = SectionCode::MessageAnnotations as u8;

/// Body tags accepted for each section, or `None` to mean "any recognized
/// primitive or compound tag" (body-value only).
pub(crate) fn allowed_tags(code: SectionCode) -> Option<&'static [u8]> {
    use tag::{LIST0, LIST8, LIST32, MAP8, MAP32, VBIN8, VBIN32};
    match code {
        SectionCode::Header | SectionCode::Properties | SectionCode::BodySequence => {
            Some(&[LIST0, LIST8, LIST32])
        }
        SectionCode::DeliveryAnnotations
        | SectionCode::MessageAnnotations
        | SectionCode::ApplicationProperties
        | SectionCode::Footer => Some(&[MAP8, MAP32]),
        SectionCode::BodyData => Some(&[VBIN8, VBIN32]),
        SectionCode::BodyValue => None,
    }
}

/// A fully framed section: the descriptor's extent plus the body tag's own
/// [`FieldLocation`]. Keeping the descriptor separate from the body lets the
/// send path reproduce the exact inbound bytes (short or long descriptor
/// form) for pass-through sections, while the body streamer only ever needs
/// `body` to strip tag/length framing off a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SectionLocation {
    /// First byte of the descriptor (`0x00`).
    pub(crate) start: Cursor,
    /// 3 for the short descriptor form, 10 for the long form.
    pub(crate) descriptor_len: u8,
    pub(crate) body: FieldLocation,
}

impl SectionLocation {
    pub(crate) fn total_length(&self) -> usize {
        self.descriptor_len as usize + self.body.total_length()
    }

    pub(crate) fn is_long_form(&self) -> bool {
        self.descriptor_len == 10
    }

    /// Cursor one past the last byte of the section (descriptor + body).
    pub(crate) fn end(&self, chain: &BufferChain) -> Cursor {
        let mut c = self.start;
        cursor::advance(chain, &mut c, self.total_length());
        c
    }
}

/// Outcome of one [`message_section_check`] attempt. `Invalid` is raised as
/// an `Err(SectionError::Invalid)` instead of a variant here, since it is
/// always fatal for the owning message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SectionStatus {
    /// Descriptor and body tag matched; body fully buffered. The cursor
    /// passed to `message_section_check` has been advanced past the whole
    /// section.
    Match(SectionLocation),
    /// This section's descriptor is not at the cursor (a different section's
    /// descriptor, or non-descriptor data).
    NoMatch,
    /// The descriptor (or its body header) is partially present; retry once
    /// more bytes arrive. The cursor is left unchanged.
    NeedMore,
}

/// Attempts to match `code`'s descriptor (short or long form) at `cursor`,
/// then its body tag against `allowed`. Never leaves `cursor` advanced
/// except on `Match`.
pub(crate) fn message_section_check(
    chain: &BufferChain,
    cursor: &mut Cursor,
    code: SectionCode,
    allowed: Option<&[u8]>,
) -> Result<SectionStatus, SectionError> {
    let start = *cursor;
    let mut probe = *cursor;

    let Some(b0) = cursor::next_octet(chain, &mut probe) else {
        return Ok(SectionStatus::NeedMore);
    };
    if b0 != 0x00 {
        return Ok(SectionStatus::NoMatch);
    }

    let Some(b1) = cursor::next_octet(chain, &mut probe) else {
        return Ok(SectionStatus::NeedMore);
    };

    let code_byte: u8 = code.into();
    let descriptor_len: u8 = match b1 {
        0x53 => {
            let Some(actual) = cursor::next_octet(chain, &mut probe) else {
                return Ok(SectionStatus::NeedMore);
            };
            if actual != code_byte {
                return Ok(SectionStatus::NoMatch);
            }
            3
        }
        0x80 => {
            // 8 zero-padding bytes then the code byte: 9 more bytes total.
            if cursor::peek(chain, &probe, 9).is_none() {
                return Ok(SectionStatus::NeedMore);
            }
            for _ in 0..8 {
                cursor::next_octet(chain, &mut probe);
            }
            let actual = cursor::next_octet(chain, &mut probe).expect("checked by peek above");
            if actual != code_byte {
                return Ok(SectionStatus::NoMatch);
            }
            10
        }
        _ => return Ok(SectionStatus::NoMatch),
    };

    match tag::traverse_field(chain, &mut probe)? {
        None => Ok(SectionStatus::NeedMore),
        Some(body) => {
            if let Some(allowed) = allowed {
                if !allowed.contains(&body.tag) {
                    return Err(SectionError::Invalid {
                        reason: "unexpected body tag for section",
                    });
                }
            }
            *cursor = probe;
            Ok(SectionStatus::Match(SectionLocation {
                start,
                descriptor_len,
                body,
            }))
        }
    }
}
