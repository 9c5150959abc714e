//! Protocol envelopes.
//!
//! [`Message`] is the outer envelope carried by every frame; [`DataMessage`]
//! is the typed sub-envelope carried inside `Message { Data }`.

use bytes::{Buf, BufMut, BytesMut};

use crate::config::{HEADER_SIZE, MAX_MESSAGE_SIZE};
use crate::core::codec::MessageCodec;
use crate::error::{ProtocolError, Result};
use tokio_util::codec::Decoder;

/// Size of the sub-type tag at the front of a data message.
pub const DATA_TYPE_SIZE: usize = 4;

/// Outer message kinds, one per wire tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageType {
    Authentication = 0,
    Data = 1,
    ConnectionStatus = 2,
    HostshipRequest = 3,
    HostshipResignation = 4,
    /// Number of authenticated peers in the session, announced by the server.
    NConnections = 5,
}

impl MessageType {
    /// Wire tag for this kind.
    #[inline]
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Whether this kind drives the session state machine.
    #[inline]
    pub fn is_control(self) -> bool {
        !matches!(self, MessageType::Data)
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Authentication => "Authentication",
            MessageType::Data => "Data",
            MessageType::ConnectionStatus => "ConnectionStatus",
            MessageType::HostshipRequest => "HostshipRequest",
            MessageType::HostshipResignation => "HostshipResignation",
            MessageType::NConnections => "NConnections",
        }
    }
}

impl TryFrom<u32> for MessageType {
    type Error = ProtocolError;

    fn try_from(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(MessageType::Authentication),
            1 => Ok(MessageType::Data),
            2 => Ok(MessageType::ConnectionStatus),
            3 => Ok(MessageType::HostshipRequest),
            4 => Ok(MessageType::HostshipResignation),
            5 => Ok(MessageType::NConnections),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// Application sub-tags multiplexed over `Message { Data }`.
///
/// The payload of each kind is opaque to this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DataMessageType {
    CameraData = 0,
    TimeData = 1,
    ScriptData = 2,
}

impl DataMessageType {
    #[inline]
    pub fn tag(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for DataMessageType {
    type Error = ProtocolError;

    fn try_from(tag: u32) -> Result<Self> {
        match tag {
            0 => Ok(DataMessageType::CameraData),
            1 => Ok(DataMessageType::TimeData),
            2 => Ok(DataMessageType::ScriptData),
            other => Err(ProtocolError::UnknownDataMessageType(other)),
        }
    }
}

/// Generic protocol envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_type: MessageType,
    pub content: Vec<u8>,
}

impl Message {
    pub fn new(message_type: MessageType, content: Vec<u8>) -> Self {
        Self {
            message_type,
            content,
        }
    }

    /// A message with no content.
    pub fn empty(message_type: MessageType) -> Self {
        Self::new(message_type, Vec::new())
    }

    /// Size of this message once framed.
    #[inline]
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.content.len()
    }

    /// Encode into a standalone frame.
    ///
    /// Fails with `OversizedMessage` past `MAX_MESSAGE_SIZE`, like the codec.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.content.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::OversizedMessage(self.content.len()));
        }
        let mut buf = Vec::with_capacity(self.frame_len());
        buf.put_u32_le(self.message_type.tag());
        buf.put_u32_le(self.content.len() as u32);
        buf.extend_from_slice(&self.content);
        Ok(buf)
    }

    /// Decode the first frame in `bytes`.
    ///
    /// Returns `Ok(None)` when `bytes` does not yet hold a complete frame.
    /// Trailing bytes after the first frame are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<Option<Self>> {
        let mut codec = MessageCodec::new(MAX_MESSAGE_SIZE);
        let mut buf = BytesMut::from(bytes);
        codec.decode(&mut buf)
    }

    /// Unwrap the data sub-envelope of a `Data` message.
    pub fn into_data_message(self) -> Result<DataMessage> {
        if self.message_type != MessageType::Data {
            return Err(ProtocolError::UnexpectedMessage);
        }
        DataMessage::from_content(&self.content)
    }
}

impl From<DataMessage> for Message {
    fn from(data: DataMessage) -> Self {
        data.into_message()
    }
}

/// Typed payload carried as the content of `Message { Data }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    pub data_type: DataMessageType,
    pub content: Vec<u8>,
}

impl DataMessage {
    pub fn new(data_type: DataMessageType, content: Vec<u8>) -> Self {
        Self { data_type, content }
    }

    /// Wrap into the outer `Data` envelope.
    pub fn into_message(self) -> Message {
        let mut content = Vec::with_capacity(DATA_TYPE_SIZE + self.content.len());
        content.put_u32_le(self.data_type.tag());
        content.extend_from_slice(&self.content);
        Message::new(MessageType::Data, content)
    }

    /// Parse the content of an outer `Data` message.
    pub fn from_content(mut content: &[u8]) -> Result<Self> {
        if content.len() < DATA_TYPE_SIZE {
            return Err(ProtocolError::MalformedPayload(
                crate::error::constants::ERR_TRUNCATED_PAYLOAD,
            ));
        }
        let data_type = DataMessageType::try_from(content.get_u32_le())?;
        Ok(Self::new(data_type, content.to_vec()))
    }
}
