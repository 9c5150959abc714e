#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use parallel_protocol::core::codec::MessageCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Decode every frame in the input; errors are fine, panics are not
    let mut codec = MessageCodec::new(64 * 1024);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(msg)) = codec.decode(&mut buf) {
        // Data envelopes may still be malformed inside a valid frame
        let _ = msg.clone().into_data_message();
        let bytes = msg.to_bytes().expect("decoded frames fit the size limit");
        assert_eq!(bytes.len(), msg.frame_len());
    }
});
