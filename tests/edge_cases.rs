#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for framing, control payloads and the data channel
//! Tests boundary sizes, hostile headers, malformed payloads and dispatch misses

use bytes::BytesMut;
use parallel_protocol::config::{HEADER_SIZE, MAX_MESSAGE_SIZE, MAX_NAME_LENGTH};
use parallel_protocol::core::codec::MessageCodec;
use parallel_protocol::core::message::{DataMessage, DataMessageType, Message, MessageType};
use parallel_protocol::error::ProtocolError;
use parallel_protocol::protocol::control::{
    AuthenticationResult, ControlEvent, Credentials, HostshipClaim, HostshipVerdict, StatusUpdate,
};
use parallel_protocol::protocol::dispatcher::DataChannel;
use parallel_protocol::protocol::status::Status;
use tokio_util::codec::Decoder;

fn header(tag: u32, length: u32) -> Vec<u8> {
    let mut bytes = tag.to_le_bytes().to_vec();
    bytes.extend_from_slice(&length.to_le_bytes());
    bytes
}

// ============================================================================
// FRAME CODEC EDGE CASES
// ============================================================================

#[test]
fn test_empty_content() {
    let msg = Message::empty(MessageType::HostshipResignation);
    let bytes = msg.to_bytes().unwrap();
    assert_eq!(bytes.len(), HEADER_SIZE);

    let decoded = Message::from_bytes(&bytes).unwrap().unwrap();
    assert_eq!(decoded, msg);
}

#[test]
fn test_empty_buffer_is_incomplete() {
    assert!(Message::from_bytes(&[]).unwrap().is_none());
}

#[test]
fn test_truncated_header_is_incomplete() {
    let bytes = header(1, 4);
    for len in 0..HEADER_SIZE {
        assert!(Message::from_bytes(&bytes[..len]).unwrap().is_none());
    }
}

#[test]
fn test_oversized_header_rejected_without_allocating() {
    // Header claims ~4 GiB; only the header is present.
    let mut buf = BytesMut::from(&header(1, u32::MAX)[..]);
    let capacity_before = buf.capacity();

    let result = MessageCodec::default().decode(&mut buf);

    assert!(matches!(
        result,
        Err(ProtocolError::OversizedMessage(n)) if n == u32::MAX as usize
    ));
    assert!(buf.capacity() <= capacity_before.max(HEADER_SIZE * 2));
}

#[test]
fn test_length_exactly_at_limit_is_accepted() {
    let mut codec = MessageCodec::new(16);
    let msg = Message::new(MessageType::Data, vec![0; 16]);
    let mut buf = BytesMut::from(&msg.to_bytes().unwrap()[..]);
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(msg));
}

#[test]
fn test_length_one_past_limit_is_rejected() {
    let mut codec = MessageCodec::new(16);
    let mut buf = BytesMut::from(&header(1, 17)[..]);
    assert!(matches!(
        codec.decode(&mut buf),
        Err(ProtocolError::OversizedMessage(17))
    ));
}

#[test]
fn test_default_limit_is_sixteen_mebibytes() {
    assert_eq!(MessageCodec::default().max_message_size(), MAX_MESSAGE_SIZE);
    assert_eq!(MAX_MESSAGE_SIZE, 16 * 1024 * 1024);
}

#[test]
fn test_unknown_tag_rejected_before_body_arrives() {
    let mut buf = BytesMut::from(&header(6, 1000)[..]);
    let err = MessageCodec::default().decode(&mut buf).unwrap_err();
    assert!(matches!(err, ProtocolError::UnknownMessageType(6)));
    assert!(err.is_fatal());
    assert!(err.is_protocol_violation());
}

#[test]
fn test_unknown_data_sub_type() {
    let mut content = 3u32.to_le_bytes().to_vec();
    content.extend_from_slice(b"payload");
    let msg = Message::new(MessageType::Data, content);

    assert!(matches!(
        msg.into_data_message(),
        Err(ProtocolError::UnknownDataMessageType(3))
    ));
}

#[test]
fn test_data_message_shorter_than_sub_type() {
    let msg = Message::new(MessageType::Data, vec![0, 0]);
    assert!(matches!(
        msg.into_data_message(),
        Err(ProtocolError::MalformedPayload(_))
    ));
}

#[test]
fn test_data_message_with_empty_payload() {
    let data = DataMessage::new(DataMessageType::ScriptData, vec![]);
    let msg = data.clone().into_message();
    assert_eq!(msg.content.len(), 4);
    assert_eq!(msg.into_data_message().unwrap(), data);
}

#[test]
fn test_wire_layout_is_little_endian() {
    let msg = DataMessage::new(DataMessageType::TimeData, vec![0xAA]).into_message();
    assert_eq!(
        msg.to_bytes().unwrap(),
        vec![1, 0, 0, 0, 5, 0, 0, 0, 1, 0, 0, 0, 0xAA]
    );
}

// ============================================================================
// CONTROL PAYLOAD EDGE CASES
// ============================================================================

#[test]
fn test_credentials_name_at_limit() {
    let name = "n".repeat(MAX_NAME_LENGTH);
    let msg = Credentials::new("pw", "hostpw", name.clone())
        .to_message()
        .unwrap();
    assert_eq!(Credentials::from_message(&msg).unwrap().name, name);
}

#[test]
fn test_credentials_name_over_limit() {
    let name = "n".repeat(MAX_NAME_LENGTH + 1);
    assert!(Credentials::new("pw", "hostpw", name).to_message().is_err());
}

#[test]
fn test_truncated_credentials() {
    let msg = Credentials::new("pw", "hostpw", "node").to_message().unwrap();
    let truncated = Message::new(
        MessageType::Authentication,
        msg.content[..msg.content.len() - 1].to_vec(),
    );
    assert!(matches!(
        Credentials::from_message(&truncated),
        Err(ProtocolError::MalformedPayload(_))
    ));
}

#[test]
fn test_status_update_with_unknown_status() {
    let mut content = 9u32.to_le_bytes().to_vec();
    content.extend_from_slice(&0u32.to_le_bytes());
    let msg = Message::new(MessageType::ConnectionStatus, content);
    assert!(matches!(
        StatusUpdate::from_message(&msg),
        Err(ProtocolError::MalformedPayload(_))
    ));
}

#[test]
fn test_status_update_with_non_utf8_name() {
    let mut content = Status::ClientWithHost.as_u32().to_le_bytes().to_vec();
    content.extend_from_slice(&2u32.to_le_bytes());
    content.extend_from_slice(&[0xFF, 0xFE]);
    let msg = Message::new(MessageType::ConnectionStatus, content);
    assert!(StatusUpdate::from_message(&msg).is_err());
}

#[test]
fn test_hostship_claim_wrong_length() {
    let msg = Message::new(MessageType::HostshipRequest, vec![0; 31]);
    assert!(HostshipClaim::from_message(&msg).is_err());
}

#[test]
fn test_verdict_with_unknown_value() {
    let msg = Message::new(MessageType::HostshipRequest, 7u32.to_le_bytes().to_vec());
    assert!(HostshipVerdict::from_message(&msg).is_err());
}

#[test]
fn test_control_event_rejects_resignation_and_data() {
    assert!(matches!(
        ControlEvent::from_message(&Message::empty(MessageType::HostshipResignation)),
        Err(ProtocolError::UnexpectedMessage)
    ));
    let data = DataMessage::new(DataMessageType::CameraData, vec![]).into_message();
    assert!(matches!(
        ControlEvent::from_message(&data),
        Err(ProtocolError::UnexpectedMessage)
    ));
}

#[test]
fn test_control_event_decodes_server_messages() {
    assert_eq!(
        ControlEvent::from_message(&AuthenticationResult::Accepted.to_message()).unwrap(),
        ControlEvent::Authentication(AuthenticationResult::Accepted)
    );
    assert_eq!(
        ControlEvent::from_message(&HostshipVerdict::Denied.to_message()).unwrap(),
        ControlEvent::HostshipVerdict(HostshipVerdict::Denied)
    );
}

// ============================================================================
// DATA CHANNEL EDGE CASES
// ============================================================================

#[test]
fn test_dispatch_without_handler() {
    let channel = DataChannel::new();
    let err = channel
        .dispatch(&DataMessage::new(DataMessageType::CameraData, vec![1]))
        .unwrap_err();
    assert!(matches!(err, ProtocolError::UnexpectedMessage));
    assert!(!err.is_fatal());
}

#[test]
fn test_handler_replacement() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let channel = DataChannel::new();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let counter = first.clone();
    channel
        .register(DataMessageType::TimeData, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    let counter = second.clone();
    channel
        .register(DataMessageType::TimeData, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    channel
        .dispatch(&DataMessage::new(DataMessageType::TimeData, vec![]))
        .unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[test]
fn test_handler_error_is_returned() {
    let channel = DataChannel::new();
    channel
        .register(DataMessageType::ScriptData, |_| {
            Err(ProtocolError::Custom("bad script".into()))
        })
        .unwrap();
    assert!(matches!(
        channel.dispatch(&DataMessage::new(DataMessageType::ScriptData, vec![])),
        Err(ProtocolError::Custom(_))
    ));
}
