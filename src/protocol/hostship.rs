//! Hostship negotiation, local side.
//!
//! The arbiter validates local requests against the [`Session`], builds the
//! messages to send, and applies the server's verdicts. Which request wins is
//! decided by the rendezvous server; this side only has to ask correctly and
//! react correctly.

use std::sync::Arc;

use tracing::{info, warn};

use crate::core::message::{Message, MessageType};
use crate::error::Result;
use crate::protocol::control::{password_digest, ControlEvent, HostshipClaim, HostshipVerdict};
use crate::protocol::session::{Session, Transition};
use crate::utils::metrics::global_metrics;

#[derive(Debug, Clone)]
pub struct HostshipArbiter {
    session: Arc<Session>,
    claim: HostshipClaim,
}

impl HostshipArbiter {
    pub fn new(session: Arc<Session>, host_password: &str) -> Self {
        Self {
            session,
            claim: HostshipClaim::new(password_digest(host_password)),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Build a `HostshipRequest`. Valid only from the client roles.
    ///
    /// The session stays a client until the server's verdict arrives.
    pub fn request(&self) -> Result<Message> {
        self.session.mark_hostship_requested()?;
        global_metrics().hostship_request();
        info!(node = %self.session.local_name(), "Requesting hostship");
        Ok(self.claim.to_message())
    }

    /// Give up hostship immediately and build the `HostshipResignation`.
    ///
    /// Resignation cannot be refused, so the local status drops to
    /// `ClientWithoutHost` before anything is sent.
    pub fn resign(&self) -> Result<(Transition, Message)> {
        let transition = self.session.resign()?;
        info!(node = %self.session.local_name(), "Resigned hostship");
        Ok((transition, Message::empty(MessageType::HostshipResignation)))
    }

    /// Apply the server's answer to an earlier request.
    pub fn on_verdict(&self, verdict: HostshipVerdict) -> Result<Transition> {
        let transition = self
            .session
            .apply(&ControlEvent::HostshipVerdict(verdict))?;
        match verdict {
            HostshipVerdict::Granted => {
                global_metrics().hostship_grant();
                info!(node = %self.session.local_name(), "Hostship granted");
            }
            HostshipVerdict::Denied => {
                global_metrics().hostship_denial();
                warn!(node = %self.session.local_name(), "Hostship denied");
            }
        }
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::error::ProtocolError;
    use crate::protocol::control::AuthenticationResult;
    use crate::protocol::status::Status;

    fn client(name: &str) -> HostshipArbiter {
        let session = Arc::new(Session::new(name));
        session.begin_connecting().unwrap();
        session
            .apply(&ControlEvent::Authentication(AuthenticationResult::Accepted))
            .unwrap();
        HostshipArbiter::new(session, "hostpw")
    }

    #[test]
    fn test_request_carries_host_password_digest() {
        let arbiter = client("node");
        let msg = arbiter.request().unwrap();
        assert_eq!(msg.message_type, MessageType::HostshipRequest);
        assert_eq!(
            HostshipClaim::from_message(&msg).unwrap().host_password,
            password_digest("hostpw")
        );
        assert!(arbiter.session().hostship_pending());
    }

    #[test]
    fn test_request_rejected_outside_client_roles() {
        let arbiter = HostshipArbiter::new(Arc::new(Session::new("node")), "");
        assert!(matches!(
            arbiter.request(),
            Err(ProtocolError::StateConflict {
                status: Status::Disconnected,
                ..
            })
        ));
    }

    #[test]
    fn test_resign_is_immediate() {
        let arbiter = client("node");
        arbiter.request().unwrap();
        arbiter.on_verdict(HostshipVerdict::Granted).unwrap();
        assert_eq!(arbiter.session().status(), Status::Host);

        let (transition, msg) = arbiter.resign().unwrap();
        assert_eq!(transition.to, Status::ClientWithoutHost);
        assert_eq!(msg, Message::empty(MessageType::HostshipResignation));
        assert_eq!(arbiter.session().status(), Status::ClientWithoutHost);
        assert!(arbiter.resign().is_err());
    }
}
