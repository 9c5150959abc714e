//! # Core Protocol Components
//!
//! Message envelopes and the frame codec.
//!
//! ## Components
//! - **Message**: outer envelope (`MessageType` + opaque content) and the
//!   `DataMessage` sub-envelope carried inside `Data` messages
//! - **Codec**: Tokio codec for framing messages over byte streams
//!
//! ## Wire Format
//! ```text
//! [Type(4)] [Length(4)] [Content(N)]
//! ```
//! All integers are little-endian. Data message content is
//! `[SubType(4)] [Payload]`.
//!
//! ## Limits
//! - Maximum content size: 16MB by default, configurable per codec
//! - Length validated before allocation

pub mod codec;
pub mod message;
