#![no_main]

use libfuzzer_sys::fuzz_target;
use parallel_protocol::core::message::{Message, MessageType};
use parallel_protocol::protocol::control::{ControlEvent, Credentials, HostshipClaim};

fuzz_target!(|data: &[u8]| {
    // Control payload parsers must reject garbage without panicking
    for kind in [
        MessageType::Authentication,
        MessageType::ConnectionStatus,
        MessageType::HostshipRequest,
        MessageType::NConnections,
    ] {
        let msg = Message::new(kind, data.to_vec());
        let _ = ControlEvent::from_message(&msg);
        let _ = Credentials::from_message(&msg);
        let _ = HostshipClaim::from_message(&msg);
    }
});
