//! # Session Protocol
//!
//! Roles, control payloads and data routing for one node of a parallel
//! session.
//!
//! ## Components
//! - **Status**: the five session roles and an atomic cell holding one
//! - **Control**: typed bodies of the control messages
//! - **Session**: the role state machine driven by control messages
//! - **Hostship**: building hostship requests/resignations and applying verdicts
//! - **Dispatcher**: the data channel, routing data messages by sub-type
//!
//! Control messages never cause a fatal error by arriving at the wrong time;
//! they are discarded as state conflicts. Malformed control payloads are
//! protocol errors.

pub mod control;
pub mod dispatcher;
pub mod hostship;
pub mod session;
pub mod status;
