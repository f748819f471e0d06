//! Integration tests for the receive/send loops and body streamer, driven
//! against in-memory mock transports end to end rather than unit-by-unit.

#[cfg(test)]
mod integration_tests {
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use crate::composer::{AnnotationOverrides, DefaultComposer};
    use crate::config::EngineConfig;
    use crate::content::{Content, Depth};
    use crate::message::Message;
    use crate::receive::receive_loop;
    use crate::send::send_loop;
    use crate::stream::{next_stream_data, release_front, stream_bytes, StreamStatus};
    use crate::tag;
    use crate::transport::{DeliveryContext, RecvOutcome, RecvTransport, SendTransport};

    /// Serves a fixed byte slice in `chunk`-sized reads, then `after_data`
    /// (`Eos` or `Aborted`) forever after.
    struct ChunkedTransport {
        data: Vec<u8>,
        offset: usize,
        chunk: usize,
        after_data: RecvOutcome,
    }

    impl ChunkedTransport {
        fn new(data: Vec<u8>, chunk: usize, after_data: RecvOutcome) -> Self {
            Self { data, offset: 0, chunk, after_data }
        }
    }

    impl RecvTransport for ChunkedTransport {
        async fn recv(&mut self, buf: &mut [u8]) -> io::Result<RecvOutcome> {
            if self.offset >= self.data.len() {
                return Ok(self.after_data);
            }
            let n = self.chunk.min(buf.len()).min(self.data.len() - self.offset);
            buf[..n].copy_from_slice(&self.data[self.offset..self.offset + n]);
            self.offset += n;
            Ok(RecvOutcome::Read(n))
        }
    }

    /// Always fills the whole requested buffer with a filler byte and never
    /// reports EOS; used to drive the chain past the Q2 upper watermark
    /// without caring about well-formed section framing.
    struct RepeatTransport;

    impl RecvTransport for RepeatTransport {
        async fn recv(&mut self, buf: &mut [u8]) -> io::Result<RecvOutcome> {
            buf.fill(0xAB);
            Ok(RecvOutcome::Read(buf.len()))
        }
    }

    /// Accepts everything offered, never stalls, records what it was sent.
    #[derive(Default)]
    struct CollectingTransport {
        sent: Vec<u8>,
        aborted: bool,
    }

    impl SendTransport for CollectingTransport {
        async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.sent.extend_from_slice(buf);
            Ok(buf.len())
        }

        async fn abort(&mut self) {
            self.aborted = true;
        }

        fn session_outgoing_bytes(&self) -> usize {
            0
        }
    }

    fn header_bytes() -> Vec<u8> {
        vec![0x00, 0x53, 0x70, tag::LIST0]
    }

    fn body_data_bytes(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0x00, 0x53, 0x75];
        if payload.len() < 256 {
            out.push(tag::VBIN8);
            out.push(payload.len() as u8);
        } else {
            out.push(tag::VBIN32);
            out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        }
        out.extend_from_slice(payload);
        out
    }

    fn footer_bytes() -> Vec<u8> {
        vec![0x00, 0x53, 0x78, tag::MAP8, 0x01, 0x00]
    }

    fn minimal_properties_bytes() -> Vec<u8> {
        // list8, one element: an empty "to" string.
        vec![0x00, 0x53, 0x73, tag::LIST8, 0x03, 0x01, tag::STR8, 0x00]
    }

    // 1. Minimal message fed one byte at a time: the depth-driven parser and
    // the body streamer must both tolerate arbitrarily fine-grained input.
    #[tokio::test]
    async fn minimal_message_arrives_one_byte_at_a_time() {
        let mut bytes = header_bytes();
        bytes.extend_from_slice(&body_data_bytes(&[]));

        let content = Content::new(EngineConfig::default());
        let mut msg = Message::new(content.clone());
        let ctx = DeliveryContext::new();
        ctx.bind(&content);
        let mut transport = ChunkedTransport::new(bytes, 1, RecvOutcome::Eos);

        receive_loop(&mut msg, &mut transport, &ctx).await;

        assert!(content.is_receive_complete());
        assert!(!content.is_aborted());
        assert_eq!(content.check_depth(Depth::Body).unwrap(), crate::content::DepthStatus::Ok);

        match next_stream_data(&mut msg).unwrap() {
            StreamStatus::Data(sd) => {
                assert!(!sd.is_footer());
                assert!(sd.is_empty());
                assert!(stream_bytes(&msg, &sd).is_empty());
            }
            other => panic!("expected the zero-length body chunk, got {other:?}"),
        }
        assert!(matches!(next_stream_data(&mut msg).unwrap(), StreamStatus::NoMore));
    }

    // 2a. Three fanout consumers draining at different rates: a buffer is
    // only freed once every consumer's cursor has passed it, never sooner.
    #[tokio::test]
    async fn fanout_consumers_free_buffers_only_once_all_have_passed() {
        let config = EngineConfig { buffer_size: 8, ..EngineConfig::default() };
        let content = Content::new(config);
        let mut writer = Message::new(content.clone());
        let ctx = DeliveryContext::new();
        ctx.bind(&content);

        let mut bytes = header_bytes();
        bytes.extend_from_slice(&body_data_bytes(&[0xCC; 20]));
        let mut transport = ChunkedTransport::new(bytes, 4096, RecvOutcome::Eos);
        receive_loop(&mut writer, &mut transport, &ctx).await;
        assert!(content.is_receive_complete());
        assert_eq!(content.chain_len(), 4);

        let mut r1 = writer.copy();
        r1.add_fanout();
        let mut r2 = writer.copy();
        r2.add_fanout();
        let mut r3 = writer.copy();
        r3.add_fanout();
        assert_eq!(content.fanout(), 3);

        let composer = DefaultComposer;

        let mut sink1 = CollectingTransport::default();
        send_loop(&mut r1, &mut sink1, &composer).await;
        assert!(r1.is_send_complete());
        assert_eq!(content.chain_len(), 4, "two consumers still hold every buffer's fanout");

        let mut sink2 = CollectingTransport::default();
        send_loop(&mut r2, &mut sink2, &composer).await;
        assert!(r2.is_send_complete());
        assert_eq!(content.chain_len(), 4, "the slowest consumer still hasn't passed");

        let mut sink3 = CollectingTransport::default();
        send_loop(&mut r3, &mut sink3, &composer).await;
        assert!(r3.is_send_complete());
        assert_eq!(content.chain_len(), 0, "all three consumers have passed every buffer");

        assert_eq!(sink1.sent, sink2.sent);
        assert_eq!(sink2.sent, sink3.sent);
    }

    // 2b. Q2 input holdoff engages once the chain reaches the upper
    // watermark, and clears (firing the registered unblocker) once a fanout
    // consumer's release walk brings the chain back below the lower one.
    #[tokio::test]
    async fn q2_holdoff_engages_and_clears_as_a_consumer_drains() {
        let config = EngineConfig {
            buffer_size: 4,
            q2_upper: 3,
            q2_lower: 2,
            ..EngineConfig::default()
        };
        let content = Content::new(config);
        let mut writer = Message::new(content.clone());
        let ctx = DeliveryContext::new();
        ctx.bind(&content);

        let unblocked = Arc::new(AtomicBool::new(false));
        let flag = unblocked.clone();
        content.set_q2_unblocker(move || flag.store(true, Ordering::SeqCst));

        let mut transport = RepeatTransport;
        receive_loop(&mut writer, &mut transport, &ctx).await;

        assert!(content.is_q2_holdoff());
        assert_eq!(content.chain_len(), 3);
        assert!(!content.is_receive_complete());

        let mut reader = writer.copy();
        reader.add_fanout();
        let composer = DefaultComposer;
        let mut sink = CollectingTransport::default();
        send_loop(&mut reader, &mut sink, &composer).await;

        assert!(!content.is_q2_holdoff());
        assert!(unblocked.load(Ordering::SeqCst));
        assert_eq!(content.chain_len(), 1, "only the buffer with no successor yet stays pinned");
    }

    // 3. A delivery whose cumulative size exceeds max_message_size is
    // latched oversize/discard and its remaining bytes are drained rather
    // than buffered.
    #[tokio::test]
    async fn oversize_message_is_discarded_and_drained_to_completion() {
        let config = EngineConfig { max_message_size: 1024, ..EngineConfig::default() };
        let content = Content::new(config);
        let mut msg = Message::new(content.clone());
        let ctx = DeliveryContext::new();
        ctx.bind(&content);

        let mut bytes = header_bytes();
        bytes.extend_from_slice(&body_data_bytes(&vec![0xEE; 2048]));
        let mut transport = ChunkedTransport::new(bytes, 512, RecvOutcome::Eos);

        receive_loop(&mut msg, &mut transport, &ctx).await;

        assert!(content.is_oversize());
        assert!(content.is_discarded());
        assert!(content.is_receive_complete());
        assert!(!content.is_aborted());
    }

    // 4. A transport that aborts mid-section leaves the delivery complete
    // and aborted, with whatever partial bytes arrived simply left in place
    // (no panic walking the half-buffered section again).
    #[tokio::test]
    async fn abort_mid_body_section_completes_the_delivery_as_aborted() {
        let content = Content::new(EngineConfig::default());
        let mut msg = Message::new(content.clone());
        let ctx = DeliveryContext::new();
        ctx.bind(&content);

        let mut bytes = header_bytes();
        // Advertise a 100-byte body-data section but only ever deliver 40
        // bytes of it before the transport reports Aborted.
        let mut body_header = vec![0x00, 0x53, 0x75, tag::VBIN8, 100u8];
        body_header.extend_from_slice(&[0xDD; 40]);
        bytes.extend_from_slice(&body_header);

        let mut transport = ChunkedTransport::new(bytes, 4096, RecvOutcome::Aborted);
        receive_loop(&mut msg, &mut transport, &ctx).await;

        assert!(content.is_aborted());
        assert!(content.is_receive_complete());
        assert!(!content.is_oversize());
        assert_eq!(content.check_depth(Depth::Body).unwrap(), crate::content::DepthStatus::Incomplete);
    }

    // 5. Rewriting message-annotations on send preserves the inbound user
    // entries verbatim alongside the router's own override keys, and every
    // section after message-annotations streams byte-for-byte unchanged.
    #[tokio::test]
    async fn annotation_rewrite_preserves_user_entries_and_leaves_the_tail_untouched() {
        let header = header_bytes();
        // message-annotations: { "x-custom": "u" }
        let ma = vec![
            0x00, 0x53, 0x72, tag::MAP8, 0x0E, 0x02, tag::SYM8, 0x08, b'x', b'-', b'c', b'u', b's', b't', b'o',
            b'm', tag::STR8, 0x01, b'u',
        ];
        let properties = minimal_properties_bytes();
        let body = body_data_bytes(&[]);

        let mut bytes = header.clone();
        bytes.extend_from_slice(&ma);
        bytes.extend_from_slice(&properties);
        bytes.extend_from_slice(&body);

        let config = EngineConfig { strip_annotations: false, ..EngineConfig::default() };
        let content = Content::new(config);
        let mut writer = Message::new(content.clone());
        let ctx = DeliveryContext::new();
        ctx.bind(&content);
        let mut transport = ChunkedTransport::new(bytes.clone(), 4096, RecvOutcome::Eos);
        receive_loop(&mut writer, &mut transport, &ctx).await;
        content.check_depth(Depth::Footer).unwrap();

        let mut msg = Message::new(content);
        msg.overrides = AnnotationOverrides { trace: Some("node-a".to_string()), ..Default::default() };
        let mut sink = CollectingTransport::default();
        let composer = DefaultComposer;
        send_loop(&mut msg, &mut sink, &composer).await;

        assert!(msg.is_send_complete());
        assert_eq!(&sink.sent[..header.len()], &header[..], "header passes through verbatim");

        let needle_present = |needle: &[u8]| sink.sent.windows(needle.len()).any(|w| w == needle);
        assert!(needle_present(b"x-custom"), "inbound user key must survive the rewrite");
        assert!(needle_present(b"u"), "inbound user value must survive the rewrite");
        assert!(needle_present(b"x-opt-trace"), "the trace override must be injected");
        assert!(needle_present(b"node-a"), "the trace override's value must be injected");

        let tail_len = properties.len() + body.len();
        assert_eq!(
            &sink.sent[sink.sent.len() - tail_len..],
            &bytes[bytes.len() - tail_len..],
            "properties and body stream unchanged after the rewritten section"
        );
    }

    // 6. Once every body-data chunk has been streamed, the next call yields
    // the footer and only then reports the body exhausted.
    #[tokio::test]
    async fn footer_is_yielded_once_past_the_last_body_chunk_then_exhausted() {
        let mut bytes = header_bytes();
        bytes.extend_from_slice(&body_data_bytes(b"payload"));
        bytes.extend_from_slice(&footer_bytes());

        let content = Content::new(EngineConfig::default());
        let mut writer = Message::new(content.clone());
        let ctx = DeliveryContext::new();
        ctx.bind(&content);
        let mut transport = ChunkedTransport::new(bytes, 1, RecvOutcome::Eos);
        receive_loop(&mut writer, &mut transport, &ctx).await;
        assert!(content.is_receive_complete());

        let mut reader = writer.copy();
        reader.add_fanout();

        match next_stream_data(&mut reader).unwrap() {
            StreamStatus::Data(sd) => {
                assert!(!sd.is_footer());
                assert_eq!(stream_bytes(&reader, &sd), b"payload");
                release_front(&mut reader);
            }
            other => panic!("expected the body-data chunk, got {other:?}"),
        }

        match next_stream_data(&mut reader).unwrap() {
            StreamStatus::Data(sd) => {
                assert!(sd.is_footer());
                release_front(&mut reader);
            }
            other => panic!("expected the footer chunk, got {other:?}"),
        }

        assert!(matches!(next_stream_data(&mut reader).unwrap(), StreamStatus::NoMore));
        assert!(content.chain_len() <= 1, "only the shared tail buffer may still be pinned");

        drop(reader);
        assert_eq!(content.chain_len(), 0, "dropping the handle releases whatever streaming couldn't");
    }
}
