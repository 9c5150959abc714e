//! # Parallel Protocol
//!
//! Session protocol for mirrored visualization nodes: a set of peers joins a
//! rendezvous server, at most one of them holds *hostship*, and the host's
//! camera, time and script updates are relayed to everyone else.
//!
//! ## Layers
//! - [`core`]: message envelopes and the length-prefixed frame codec
//! - [`transport`]: [`Connection`](transport::Connection), one framed stream
//! - [`protocol`]: session roles, control payloads, hostship and data routing
//! - [`service`]: the [`ParallelPeer`](service::ParallelPeer) client and the
//!   [`ParallelServer`](service::ParallelServer) rendezvous
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging,
//!   timeouts and metrics
//!
//! ## Example
//! ```rust,no_run
//! use parallel_protocol::config::SessionConfig;
//! use parallel_protocol::core::message::{DataMessage, DataMessageType};
//! use parallel_protocol::service::{ParallelPeer, PeerEvent};
//! use parallel_protocol::Status;
//!
//! # async fn run() -> parallel_protocol::error::Result<()> {
//! let config = SessionConfig::from_env()?;
//! let (peer, mut events) = ParallelPeer::connect(&config.peer, &config.transport).await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         PeerEvent::StatusChanged { to, .. } if to.is_client() => {
//!             peer.request_hostship().await?;
//!         }
//!         PeerEvent::StatusChanged { to: Status::Host, .. } => {
//!             let time = DataMessage::new(DataMessageType::TimeData, 0f64.to_le_bytes().to_vec());
//!             peer.send_data(time).await?;
//!         }
//!         PeerEvent::Disconnected => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::core::message::{DataMessage, DataMessageType, Message, MessageType};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::status::Status;
