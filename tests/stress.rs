use bytes::BytesMut;
use parallel_protocol::core::codec::MessageCodec;
use parallel_protocol::core::message::{DataMessage, DataMessageType, Message, MessageType};
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn stress_message_encode_decode_large_series() {
    // Heavy burst of frames; no panics and every frame decodes back
    let mut codec = MessageCodec::default();
    let mut buf = BytesMut::new();

    for size in [0usize, 1, 64, 512, 4096, 65536, 1_048_576] {
        for i in 0..200 {
            let msg = DataMessage::new(DataMessageType::CameraData, vec![(i & 0xFF) as u8; size])
                .into_message();
            codec.encode(msg, &mut buf).unwrap();
            let decoded = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded.message_type, MessageType::Data);
            assert_eq!(decoded.content.len(), size + 4);
            assert!(buf.is_empty());
        }
    }
}

#[test]
fn stress_many_small_frames_in_one_buffer() {
    let mut codec = MessageCodec::default();
    let mut buf = BytesMut::new();
    let count = 100_000u32;

    for i in 0..count {
        codec
            .encode(
                Message::new(MessageType::NConnections, i.to_le_bytes().to_vec()),
                &mut buf,
            )
            .unwrap();
    }

    let mut next = 0u32;
    while let Some(msg) = codec.decode(&mut buf).unwrap() {
        assert_eq!(msg.content, next.to_le_bytes());
        next += 1;
    }
    assert_eq!(next, count);
}
