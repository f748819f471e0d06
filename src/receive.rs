//! Receive loop (C7): pulls bytes from an inbound transport into a
//! [`Message`]'s `Content`, enforcing the oversize limit and the Q2
//! input-holdoff, until the delivery completes, stalls on Q2, or the
//! transport has nothing more to offer right now.

use crate::message::Message;
use crate::transport::{DeliveryContext, RecvOutcome, RecvTransport};

/// Scratch-buffer size used to drain a discarded delivery without growing
/// the chain.
const DISCARD_SCRATCH_LEN: usize = 4096;

/// Drives `msg`'s receive side against `transport` until one of the
/// terminal conditions in §4.4 is reached. Returns normally in every case —
/// transport failures and oversize are absorbed into `Content`'s one-way
/// latches (`aborted`, `oversize`, `receive_complete`), not propagated as an
/// error, since the Content's state is the only contract the rest of the
/// engine (and the host) observes.
pub async fn receive_loop(msg: &mut Message, transport: &mut impl RecvTransport, ctx: &DeliveryContext) {
    loop {
        let discarding = msg.content.with_locked(|inner| inner.discard);
        if discarding {
            if drain_discarded(msg, transport, ctx).await {
                return;
            }
            continue;
        }

        let holdoff = msg.content.with_locked(|inner| {
            inner.ensure_pending();
            if inner.append_pending_if_full()
                && !inner.config.disable_q2_holdoff
                && inner.chain.len() >= inner.config.q2_upper
            {
                inner.q2_input_holdoff = true;
                true
            } else {
                false
            }
        });
        if holdoff {
            return;
        }

        let remaining = msg
            .content
            .with_locked(|inner| inner.pending.as_ref().map_or(0, |b| b.remaining_capacity()));
        if remaining == 0 {
            continue;
        }

        let mut scratch = vec![0u8; remaining];
        let outcome = transport.recv(&mut scratch).await;
        match outcome {
            Ok(RecvOutcome::Read(n)) => {
                let oversize = msg.content.with_locked(|inner| {
                    let pending = inner.pending.as_mut().expect("ensured above");
                    pending.spare_mut()[..n].copy_from_slice(&scratch[..n]);
                    pending.commit(n);
                    inner.bytes_received += n as u64;
                    let limit = inner.config.max_message_size;
                    if limit > 0 && inner.bytes_received > limit {
                        inner.discard = true;
                        inner.oversize = true;
                        Some((inner.bytes_received, limit))
                    } else {
                        None
                    }
                });
                if let Some((bytes_received, limit)) = oversize {
                    tracing::warn!(bytes_received, limit, "max message size exceeded");
                }
            }
            Ok(RecvOutcome::WouldBlock) => {
                msg.content.with_locked(|inner| inner.flush_pending());
                return;
            }
            Ok(RecvOutcome::Eos) => {
                complete(msg, ctx, false);
                return;
            }
            Ok(RecvOutcome::Aborted) => {
                complete(msg, ctx, true);
                return;
            }
            Err(err) => {
                tracing::debug!(error = %err, "receive transport error, treating delivery as aborted");
                complete(msg, ctx, true);
                return;
            }
        }
    }
}

/// Routes bytes into a fixed-size throwaway buffer until EOS/abort, without
/// growing the chain. Returns `true` once the delivery has terminated.
async fn drain_discarded(msg: &mut Message, transport: &mut impl RecvTransport, ctx: &DeliveryContext) -> bool {
    let mut scratch = [0u8; DISCARD_SCRATCH_LEN];
    match transport.recv(&mut scratch).await {
        Ok(RecvOutcome::Read(_)) => false,
        Ok(RecvOutcome::WouldBlock) => false,
        Ok(RecvOutcome::Eos) => {
            complete(msg, ctx, false);
            true
        }
        Ok(RecvOutcome::Aborted) | Err(_) => {
            complete(msg, ctx, true);
            true
        }
    }
}

fn complete(msg: &mut Message, ctx: &DeliveryContext, aborted: bool) {
    msg.content.with_locked(|inner| {
        inner.flush_pending();
        inner.receive_complete = true;
        inner.aborted = aborted;
        inner.q2_unblocker = None;
    });
    ctx.unbind();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::content::Content;
    use std::io;

    struct ScriptedTransport {
        chunks: Vec<RecvOutcome>,
        data: Vec<Vec<u8>>,
    }

    impl RecvTransport for ScriptedTransport {
        async fn recv(&mut self, buf: &mut [u8]) -> io::Result<RecvOutcome> {
            let outcome = self.chunks.remove(0);
            if let RecvOutcome::Read(n) = outcome {
                let chunk = self.data.remove(0);
                buf[..n].copy_from_slice(&chunk[..n]);
            }
            Ok(outcome)
        }
    }

    #[tokio::test]
    async fn eos_latches_receive_complete_without_abort() {
        let content = Content::new(EngineConfig::default());
        let mut msg = Message::new(content.clone());
        let ctx = DeliveryContext::new();
        ctx.bind(&content);
        let mut transport = ScriptedTransport {
            chunks: vec![RecvOutcome::Read(4), RecvOutcome::Eos],
            data: vec![b"abcd".to_vec()],
        };

        receive_loop(&mut msg, &mut transport, &ctx).await;

        assert!(content.is_receive_complete());
        assert!(!content.is_aborted());
        assert_eq!(content.bytes_received(), 4);
        assert!(ctx.content().is_none());
    }

    #[tokio::test]
    async fn would_block_returns_without_completing() {
        let content = Content::new(EngineConfig::default());
        let mut msg = Message::new(content.clone());
        let ctx = DeliveryContext::new();
        let mut transport = ScriptedTransport {
            chunks: vec![RecvOutcome::WouldBlock],
            data: vec![],
        };

        receive_loop(&mut msg, &mut transport, &ctx).await;

        assert!(!content.is_receive_complete());
    }

    #[tokio::test]
    async fn exceeding_max_message_size_latches_discard_and_oversize() {
        let config = EngineConfig {
            max_message_size: 2,
            ..EngineConfig::default()
        };
        let content = Content::new(config);
        let mut msg = Message::new(content.clone());
        let ctx = DeliveryContext::new();
        let mut transport = ScriptedTransport {
            chunks: vec![RecvOutcome::Read(4), RecvOutcome::Eos],
            data: vec![b"abcd".to_vec()],
        };

        receive_loop(&mut msg, &mut transport, &ctx).await;

        assert!(content.is_oversize());
        assert!(content.is_discarded());
    }
}
