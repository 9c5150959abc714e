//! Frame codec for [`Message`] over a byte stream.
//!
//! ```text
//! [Type(4, LE)] [Length(4, LE)] [Content(N)]
//! ```
//!
//! `decode` returns `Ok(None)` until a whole frame is buffered, so it is safe
//! to feed it partial reads. The declared length is checked against the
//! configured maximum before anything is reserved for the body.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::config::{HEADER_SIZE, MAX_MESSAGE_SIZE};
use crate::core::message::{Message, MessageType};
use crate::error::{ProtocolError, Result};

#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    max_message_size: usize,
}

impl MessageCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Peek the header; nothing is consumed until the whole frame is here.
        let mut header = &src[..HEADER_SIZE];
        let message_type = MessageType::try_from(header.get_u32_le())?;
        let length = header.get_u32_le() as usize;

        if length > self.max_message_size {
            return Err(ProtocolError::OversizedMessage(length));
        }

        let frame_len = HEADER_SIZE + length;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let content = src.split_to(length).to_vec();
        trace!(kind = message_type.name(), bytes = length, "Decoded frame");

        Ok(Some(Message::new(message_type, content)))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        if item.content.len() > self.max_message_size {
            return Err(ProtocolError::OversizedMessage(item.content.len()));
        }

        dst.reserve(item.frame_len());
        dst.put_u32_le(item.message_type.tag());
        dst.put_u32_le(item.content.len() as u32);
        dst.extend_from_slice(&item.content);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn test_encoder_matches_to_bytes() {
        let msg = Message::new(MessageType::HostshipRequest, vec![1; 32]);
        let mut buf = BytesMut::new();
        MessageCodec::default().encode(msg.clone(), &mut buf).unwrap();
        assert_eq!(&buf[..], &msg.to_bytes().unwrap()[..]);
    }

    #[test]
    fn test_header_only_waits_for_body() {
        let mut codec = MessageCodec::default();
        let frame = Message::new(MessageType::Data, vec![0; 16]).to_bytes().unwrap();
        let mut buf = BytesMut::from(&frame[..HEADER_SIZE]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), HEADER_SIZE);
        assert!(buf.capacity() >= frame.len());
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::new();
        buf.put_u32_le(42);
        buf.put_u32_le(0);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::UnknownMessageType(42))
        ));
    }

    #[test]
    fn test_limit_is_per_codec() {
        let mut codec = MessageCodec::new(8);
        let mut buf = BytesMut::from(&Message::new(MessageType::Data, vec![0; 9]).to_bytes().unwrap()[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::OversizedMessage(9))
        ));

        let mut out = BytesMut::new();
        assert!(codec
            .encode(Message::new(MessageType::Data, vec![0; 9]), &mut out)
            .is_err());
        assert!(out.is_empty());
    }
}
