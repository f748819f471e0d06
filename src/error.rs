//! Error taxonomy for the engine, grouped by the two places failures surface:
//! the section parser (transient-or-fatal, per call) and the receive/send
//! loops (the one-way latches described by the flow-control design).

use thiserror::Error;

/// Outcome of a single parse attempt at the current section depth.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SectionError {
    /// The section pattern is present but not fully buffered yet. Transient:
    /// retried on the next `check_depth` call as more bytes arrive.
    #[error("section parse incomplete")]
    Incomplete,

    /// The section pattern matched but the body tag was unexpected, the
    /// section was duplicated, or no body variant matched for the body
    /// section. Fatal for the owning message.
    #[error("invalid section: {reason}")]
    Invalid { reason: &'static str },
}

/// Fatal, message-level failures raised by the receive or send loop.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Cumulative received size exceeded `max_message_size`.
    #[error("message exceeds configured max_message_size")]
    Oversize,

    /// The transport latched `aborted`; all sends must abort the outbound
    /// delivery.
    #[error("delivery aborted by transport")]
    Aborted,

    /// The transport refused further bytes on send.
    #[error("send failed: {0}")]
    SendFailed(#[from] std::io::Error),

    /// The section parser raised a fatal, non-transient error.
    #[error(transparent)]
    Section(#[from] SectionError),
}
