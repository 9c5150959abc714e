//! # Transport Layer
//!
//! [`Connection`] owns one byte stream and exchanges whole [`Message`]s over
//! it using the frame codec. It is generic over the stream so the same code
//! runs over TCP sockets and in-memory duplex pipes.
//!
//! [`Message`]: crate::core::message::Message

pub mod connection;

pub use connection::Connection;
