//! A streaming message engine for AMQP 1.0 routing nodes.
//!
//! A delivery is held in a [`content::Content`]: a shared, sequence-numbered
//! chain of fixed-capacity buffers that the receive loop fills and the send
//! loop (and the body streamer) drain without ever copying the whole message
//! into one contiguous buffer. Each consumer of a delivery — the router
//! itself, and every outbound fanout copy — gets its own [`message::Message`]
//! handle: a read cursor, send progress, and annotation overrides layered
//! over the same `Content`.
//!
//! The pieces:
//!
//! - [`buffer`], [`cursor`]: the buffer chain and its cursor primitives.
//! - [`tag`], [`section`]: the AMQP type-tag alphabet and the incremental,
//!   resumable section parser built on it.
//! - [`content`]: `Content`/`ContentInner`, the shared state a delivery's
//!   handles all see, plus the Q2/Q3 flow-control bookkeeping.
//! - [`message`]: `Message`, the per-consumer handle.
//! - [`receive`]: the receive loop (C7).
//! - [`send`]: the send loop (C8), including annotation rewriting.
//! - [`stream`]: the body-streaming cursor (C9).
//! - [`composer`]: builds the message-annotations section a send applies.
//! - [`transport`]: the `RecvTransport`/`SendTransport` contracts a host
//!   implements, and `DeliveryContext` for binding a delivery to its
//!   transport-level identity.
//! - [`config`]: host-tunable thresholds ([`config::EngineConfig`]).
//! - [`error`]: the parse-level and message-level error taxonomies.

mod buffer;
pub mod composer;
pub mod config;
pub mod content;
mod cursor;
pub mod error;
pub mod message;
pub mod receive;
mod section;
pub mod send;
pub mod stream;
mod tag;
#[cfg(test)]
mod tests;
pub mod transport;

pub use composer::{AnnotationOverrides, DefaultComposer, SectionComposer};
pub use config::EngineConfig;
pub use content::{Content, PropertyField, WeakContent};
pub use error::{EngineError, SectionError};
pub use message::Message;
pub use receive::receive_loop;
pub use send::send_loop;
pub use stream::{StreamStatus, next_stream_data, release_front, stream_bytes};
pub use transport::{DeliveryContext, RecvOutcome, RecvTransport, SendTransport};
