//! Control message payloads.
//!
//! Each type here is the typed body of one control [`Message`]. Integers are
//! little-endian `u32`; strings are a `u32` byte length followed by UTF-8;
//! passwords travel only as SHA-256 digests.
//!
//! | message | direction | body |
//! |---|---|---|
//! | `Authentication` | peer → server | [`Credentials`] |
//! | `Authentication` | server → peer | [`AuthenticationResult`] |
//! | `ConnectionStatus` | server → peer | [`StatusUpdate`] |
//! | `HostshipRequest` | peer → server | [`HostshipClaim`] |
//! | `HostshipRequest` | server → peer | [`HostshipVerdict`] |
//! | `HostshipResignation` | peer → server | empty |
//! | `NConnections` | server → peer | [`ConnectionCount`] |

use bytes::{Buf, BufMut};
use sha2::{Digest, Sha256};

use crate::config::MAX_NAME_LENGTH;
use crate::core::message::{Message, MessageType};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::status::Status;

/// Length of a password digest on the wire.
pub const DIGEST_LEN: usize = 32;

pub type PasswordDigest = [u8; DIGEST_LEN];

/// SHA-256 of a password.
pub fn password_digest(password: &str) -> PasswordDigest {
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(&Sha256::digest(password.as_bytes()));
    out
}

/// Bounds-checked cursor over a control payload.
struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(ProtocolError::MalformedPayload(
                constants::ERR_TRUNCATED_PAYLOAD,
            ));
        }
        Ok(())
    }

    fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    fn digest(&mut self) -> Result<PasswordDigest> {
        self.need(DIGEST_LEN)?;
        let mut out = [0u8; DIGEST_LEN];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    fn name(&mut self) -> Result<String> {
        let len = self.u32()? as usize;
        if len > MAX_NAME_LENGTH {
            return Err(ProtocolError::MalformedPayload(constants::ERR_NAME_TOO_LONG));
        }
        self.need(len)?;
        let raw = self.buf[..len].to_vec();
        self.buf.advance(len);
        String::from_utf8(raw)
            .map_err(|_| ProtocolError::MalformedPayload(constants::ERR_NAME_NOT_UTF8))
    }

    fn finish(self) -> Result<()> {
        if self.buf.has_remaining() {
            return Err(ProtocolError::MalformedPayload(constants::ERR_TRAILING_BYTES));
        }
        Ok(())
    }
}

fn put_name(buf: &mut Vec<u8>, name: &str) -> Result<()> {
    if name.len() > MAX_NAME_LENGTH {
        return Err(ProtocolError::MalformedPayload(constants::ERR_NAME_TOO_LONG));
    }
    buf.put_u32_le(name.len() as u32);
    buf.extend_from_slice(name.as_bytes());
    Ok(())
}

fn expect_type(msg: &Message, expected: MessageType) -> Result<()> {
    if msg.message_type != expected {
        return Err(ProtocolError::UnexpectedMessage);
    }
    Ok(())
}

/// What a peer presents when joining a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub password: PasswordDigest,
    pub host_password: PasswordDigest,
    pub name: String,
}

impl Credentials {
    pub fn new(password: &str, host_password: &str, name: impl Into<String>) -> Self {
        Self {
            password: password_digest(password),
            host_password: password_digest(host_password),
            name: name.into(),
        }
    }

    pub fn to_message(&self) -> Result<Message> {
        if self.name.is_empty() {
            return Err(ProtocolError::MalformedPayload(constants::ERR_NAME_EMPTY));
        }
        let mut content = Vec::with_capacity(2 * DIGEST_LEN + 4 + self.name.len());
        content.extend_from_slice(&self.password);
        content.extend_from_slice(&self.host_password);
        put_name(&mut content, &self.name)?;
        Ok(Message::new(MessageType::Authentication, content))
    }

    pub fn from_message(msg: &Message) -> Result<Self> {
        expect_type(msg, MessageType::Authentication)?;
        let mut reader = PayloadReader::new(&msg.content);
        let password = reader.digest()?;
        let host_password = reader.digest()?;
        let name = reader.name()?;
        reader.finish()?;
        // An empty name reads back as "no host" in status updates.
        if name.is_empty() {
            return Err(ProtocolError::MalformedPayload(constants::ERR_NAME_EMPTY));
        }
        Ok(Self {
            password,
            host_password,
            name,
        })
    }
}

/// Server's answer to [`Credentials`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthenticationResult {
    Accepted,
    Rejected,
}

impl AuthenticationResult {
    pub fn to_message(self) -> Message {
        let code: u32 = match self {
            AuthenticationResult::Accepted => 1,
            AuthenticationResult::Rejected => 0,
        };
        Message::new(MessageType::Authentication, code.to_le_bytes().to_vec())
    }

    pub fn from_message(msg: &Message) -> Result<Self> {
        expect_type(msg, MessageType::Authentication)?;
        let mut reader = PayloadReader::new(&msg.content);
        let result = match reader.u32()? {
            1 => AuthenticationResult::Accepted,
            0 => AuthenticationResult::Rejected,
            _ => return Err(ProtocolError::MalformedPayload(constants::ERR_UNKNOWN_RESULT)),
        };
        reader.finish()?;
        Ok(result)
    }
}

/// A peer's role as decided by the server, plus the current host's name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: Status,
    pub host_name: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: Status, host_name: Option<String>) -> Self {
        Self { status, host_name }
    }

    pub fn to_message(&self) -> Result<Message> {
        let name = self.host_name.as_deref().unwrap_or("");
        let mut content = Vec::with_capacity(8 + name.len());
        content.put_u32_le(self.status.as_u32());
        put_name(&mut content, name)?;
        Ok(Message::new(MessageType::ConnectionStatus, content))
    }

    pub fn from_message(msg: &Message) -> Result<Self> {
        expect_type(msg, MessageType::ConnectionStatus)?;
        let mut reader = PayloadReader::new(&msg.content);
        let status = Status::try_from(reader.u32()?)?;
        let name = reader.name()?;
        reader.finish()?;
        let host_name = if name.is_empty() { None } else { Some(name) };
        Ok(Self { status, host_name })
    }
}

/// A peer's request to become host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostshipClaim {
    pub host_password: PasswordDigest,
}

impl HostshipClaim {
    pub fn new(host_password: PasswordDigest) -> Self {
        Self { host_password }
    }

    pub fn to_message(&self) -> Message {
        Message::new(MessageType::HostshipRequest, self.host_password.to_vec())
    }

    pub fn from_message(msg: &Message) -> Result<Self> {
        expect_type(msg, MessageType::HostshipRequest)?;
        let mut reader = PayloadReader::new(&msg.content);
        let host_password = reader.digest()?;
        reader.finish()?;
        Ok(Self { host_password })
    }
}

/// Server's answer to a [`HostshipClaim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostshipVerdict {
    Granted,
    Denied,
}

impl HostshipVerdict {
    pub fn to_message(self) -> Message {
        let code: u32 = match self {
            HostshipVerdict::Granted => 1,
            HostshipVerdict::Denied => 0,
        };
        Message::new(MessageType::HostshipRequest, code.to_le_bytes().to_vec())
    }

    pub fn from_message(msg: &Message) -> Result<Self> {
        expect_type(msg, MessageType::HostshipRequest)?;
        let mut reader = PayloadReader::new(&msg.content);
        let verdict = match reader.u32()? {
            1 => HostshipVerdict::Granted,
            0 => HostshipVerdict::Denied,
            _ => return Err(ProtocolError::MalformedPayload(constants::ERR_UNKNOWN_RESULT)),
        };
        reader.finish()?;
        Ok(verdict)
    }
}

/// Number of authenticated peers in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionCount(pub u32);

impl ConnectionCount {
    pub fn to_message(self) -> Message {
        Message::new(MessageType::NConnections, self.0.to_le_bytes().to_vec())
    }

    pub fn from_message(msg: &Message) -> Result<Self> {
        expect_type(msg, MessageType::NConnections)?;
        let mut reader = PayloadReader::new(&msg.content);
        let count = reader.u32()?;
        reader.finish()?;
        Ok(Self(count))
    }
}

/// A control message as seen by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Authentication(AuthenticationResult),
    StatusUpdate(StatusUpdate),
    HostshipVerdict(HostshipVerdict),
    ConnectionCount(u32),
}

impl ControlEvent {
    /// Decode a server-to-peer control message.
    ///
    /// `Data` and `HostshipResignation` are not control events on the peer
    /// side and yield [`ProtocolError::UnexpectedMessage`].
    pub fn from_message(msg: &Message) -> Result<Self> {
        match msg.message_type {
            MessageType::Authentication => {
                AuthenticationResult::from_message(msg).map(ControlEvent::Authentication)
            }
            MessageType::ConnectionStatus => {
                StatusUpdate::from_message(msg).map(ControlEvent::StatusUpdate)
            }
            MessageType::HostshipRequest => {
                HostshipVerdict::from_message(msg).map(ControlEvent::HostshipVerdict)
            }
            MessageType::NConnections => {
                ConnectionCount::from_message(msg).map(|c| ControlEvent::ConnectionCount(c.0))
            }
            MessageType::Data | MessageType::HostshipResignation => {
                Err(ProtocolError::UnexpectedMessage)
            }
        }
    }
}
