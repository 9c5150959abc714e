//! # Session Services
//!
//! The two ends of a parallel session.
//!
//! - **Peer**: one node's connection to a session, exposing its role and
//!   hostship operations and surfacing session changes as events
//! - **Server**: the rendezvous point that authenticates peers, arbitrates
//!   hostship and relays the host's data to everyone else

pub mod peer;
pub mod server;

pub use peer::{ParallelPeer, PeerEvent};
pub use server::{start_server, start_server_with_shutdown, ParallelServer};
