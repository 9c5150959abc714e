//! Session state machine.
//!
//! A [`Session`] is one node's view of its membership: its [`Status`], who the
//! host is, whether a hostship request is outstanding and how many peers the
//! server last reported. Remote-driven transitions go through
//! [`Session::apply`]; the only local transitions are connecting, resigning
//! (see [`HostshipArbiter`](crate::protocol::hostship::HostshipArbiter)) and
//! [`Session::reset`].
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──auth accepted──▶ ClientWithoutHost
//!      ▲                        │                              ▲   │
//!      │                   auth rejected          status update│   │status update
//!      └────────────────────────┘                              │   ▼
//!                                   Host ◀──grant / status── ClientWithHost
//! ```
//!
//! Any event that is illegal in the current state yields
//! [`ProtocolError::StateConflict`] and leaves the session untouched.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;

use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::protocol::control::{AuthenticationResult, ControlEvent, HostshipVerdict, StatusUpdate};
use crate::protocol::status::{Status, StatusCell};

/// A status change, or the lack of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Status,
    pub to: Status,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

fn conflict(status: Status, reason: &'static str) -> ProtocolError {
    ProtocolError::StateConflict { status, reason }
}

#[derive(Debug)]
pub struct Session {
    local_name: String,
    status: StatusCell,
    host_name: RwLock<Option<String>>,
    hostship_pending: AtomicBool,
    /// Set by a local resignation until the server stops calling us host.
    resigned: AtomicBool,
    connection_count: AtomicU32,
}

impl Session {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            local_name: local_name.into(),
            status: StatusCell::new(Status::Disconnected),
            host_name: RwLock::new(None),
            hostship_pending: AtomicBool::new(false),
            resigned: AtomicBool::new(false),
            connection_count: AtomicU32::new(0),
        }
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn status(&self) -> Status {
        self.status.load()
    }

    pub fn is_host(&self) -> bool {
        self.status() == Status::Host
    }

    /// Name of the current host as last reported, if any.
    pub fn host_name(&self) -> Option<String> {
        self.host_name.read().ok().and_then(|h| h.clone())
    }

    pub fn connection_count(&self) -> u32 {
        self.connection_count.load(Ordering::Acquire)
    }

    pub fn hostship_pending(&self) -> bool {
        self.hostship_pending.load(Ordering::Acquire)
    }

    fn set_host_name(&self, name: Option<String>) {
        if let Ok(mut host) = self.host_name.write() {
            *host = name;
        }
    }

    fn commit(&self, from: Status, to: Status) -> Transition {
        if from != to {
            debug!(%from, %to, node = %self.local_name, "Session transition");
        }
        Transition { from, to }
    }

    /// `Disconnected → Connecting`, once the socket is up.
    pub fn begin_connecting(&self) -> Result<Transition> {
        let (from, to) = self.status.transition(|current| match current {
            Status::Disconnected => Ok(Status::Connecting),
            other => Err(conflict(other, "already connected or connecting")),
        })?;
        Ok(self.commit(from, to))
    }

    /// Apply a control event received from the server.
    pub fn apply(&self, event: &ControlEvent) -> Result<Transition> {
        match event {
            ControlEvent::Authentication(result) => self.apply_authentication(*result),
            ControlEvent::StatusUpdate(update) => self.apply_status_update(update),
            ControlEvent::HostshipVerdict(verdict) => self.apply_verdict(*verdict),
            ControlEvent::ConnectionCount(count) => {
                let current = self.status();
                if !current.is_authenticated() {
                    return Err(conflict(current, "connection count before authentication"));
                }
                self.connection_count.store(*count, Ordering::Release);
                Ok(Transition {
                    from: current,
                    to: current,
                })
            }
        }
    }

    fn apply_authentication(&self, result: AuthenticationResult) -> Result<Transition> {
        let (from, to) = self.status.transition(|current| {
            if current != Status::Connecting {
                return Err(conflict(current, "authentication result outside connecting"));
            }
            Ok(match result {
                AuthenticationResult::Accepted => Status::ClientWithoutHost,
                AuthenticationResult::Rejected => Status::Disconnected,
            })
        })?;
        Ok(self.commit(from, to))
    }

    fn apply_status_update(&self, update: &StatusUpdate) -> Result<Transition> {
        let (from, to) = self.status.transition(|current| {
            if !current.is_authenticated() {
                return Err(conflict(current, "status update before authentication"));
            }
            if !update.status.is_authenticated() {
                return Err(conflict(current, "status update names a non-member role"));
            }
            if update.status == Status::Host && self.resigned.load(Ordering::Acquire) {
                return Err(conflict(current, "host status sent before the resignation"));
            }
            Ok(update.status)
        })?;
        if update.status != Status::Host {
            self.resigned.store(false, Ordering::Release);
        }

        let host = match to {
            Status::Host => Some(
                update
                    .host_name
                    .clone()
                    .unwrap_or_else(|| self.local_name.clone()),
            ),
            Status::ClientWithHost => update.host_name.clone(),
            _ => None,
        };
        self.set_host_name(host);
        if to == Status::Host {
            self.hostship_pending.store(false, Ordering::Release);
        }
        Ok(self.commit(from, to))
    }

    fn apply_verdict(&self, verdict: HostshipVerdict) -> Result<Transition> {
        if !self.hostship_pending.swap(false, Ordering::AcqRel) {
            return Err(conflict(self.status(), "hostship verdict without a request"));
        }

        match verdict {
            HostshipVerdict::Granted => {
                let (from, to) = self.status.transition(|current| {
                    if current.is_client() {
                        Ok(Status::Host)
                    } else {
                        Err(conflict(current, "hostship granted outside client roles"))
                    }
                })?;
                self.set_host_name(Some(self.local_name.clone()));
                Ok(self.commit(from, to))
            }
            HostshipVerdict::Denied => {
                let current = self.status();
                Ok(Transition {
                    from: current,
                    to: current,
                })
            }
        }
    }

    /// Record an outgoing hostship request. Only clients may ask.
    pub(crate) fn mark_hostship_requested(&self) -> Result<()> {
        let current = self.status();
        if !current.is_client() {
            return Err(conflict(current, crate::error::constants::ERR_NOT_AUTHENTICATED));
        }
        self.hostship_pending.store(true, Ordering::Release);
        self.resigned.store(false, Ordering::Release);
        Ok(())
    }

    /// `Host → ClientWithoutHost` without waiting for the server.
    pub(crate) fn resign(&self) -> Result<Transition> {
        let (from, to) = self.status.transition(|current| match current {
            Status::Host => Ok(Status::ClientWithoutHost),
            other => Err(conflict(other, crate::error::constants::ERR_NOT_HOST)),
        })?;
        self.set_host_name(None);
        self.resigned.store(true, Ordering::Release);
        Ok(self.commit(from, to))
    }

    /// Back to `Disconnected`, dropping everything learned from the server.
    pub fn reset(&self) -> Transition {
        let from = self.status.swap(Status::Disconnected);
        self.set_host_name(None);
        self.hostship_pending.store(false, Ordering::Release);
        self.resigned.store(false, Ordering::Release);
        self.connection_count.store(0, Ordering::Release);
        self.commit(from, Status::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn authenticated(name: &str) -> Session {
        let session = Session::new(name);
        session.begin_connecting().unwrap();
        session
            .apply(&ControlEvent::Authentication(AuthenticationResult::Accepted))
            .unwrap();
        session
    }

    #[test]
    fn test_connect_and_authenticate() {
        let session = Session::new("node");
        assert_eq!(session.status(), Status::Disconnected);

        let t = session.begin_connecting().unwrap();
        assert_eq!((t.from, t.to), (Status::Disconnected, Status::Connecting));
        assert!(session.begin_connecting().is_err());

        let t = session
            .apply(&ControlEvent::Authentication(AuthenticationResult::Accepted))
            .unwrap();
        assert_eq!(t.to, Status::ClientWithoutHost);
    }

    #[test]
    fn test_rejected_authentication_disconnects() {
        let session = Session::new("node");
        session.begin_connecting().unwrap();
        let t = session
            .apply(&ControlEvent::Authentication(AuthenticationResult::Rejected))
            .unwrap();
        assert_eq!(t.to, Status::Disconnected);
    }

    #[test]
    fn test_status_update_tracks_host_name() {
        let session = authenticated("node");
        session
            .apply(&ControlEvent::StatusUpdate(StatusUpdate::new(
                Status::ClientWithHost,
                Some("dome".into()),
            )))
            .unwrap();
        assert_eq!(session.status(), Status::ClientWithHost);
        assert_eq!(session.host_name().as_deref(), Some("dome"));

        session
            .apply(&ControlEvent::StatusUpdate(StatusUpdate::new(
                Status::ClientWithoutHost,
                None,
            )))
            .unwrap();
        assert_eq!(session.host_name(), None);
    }

    #[test]
    fn test_status_update_cannot_demote_to_disconnected() {
        let session = authenticated("node");
        let err = session
            .apply(&ControlEvent::StatusUpdate(StatusUpdate::new(
                Status::Disconnected,
                None,
            )))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::StateConflict { .. }));
        assert_eq!(session.status(), Status::ClientWithoutHost);
    }

    #[test]
    fn test_verdict_requires_pending_request() {
        let session = authenticated("node");
        assert!(session
            .apply(&ControlEvent::HostshipVerdict(HostshipVerdict::Granted))
            .is_err());
        assert_eq!(session.status(), Status::ClientWithoutHost);

        session.mark_hostship_requested().unwrap();
        let t = session
            .apply(&ControlEvent::HostshipVerdict(HostshipVerdict::Granted))
            .unwrap();
        assert_eq!(t.to, Status::Host);
        assert_eq!(session.host_name().as_deref(), Some("node"));
        assert!(!session.hostship_pending());
    }

    #[test]
    fn test_denied_verdict_clears_request_only() {
        let session = authenticated("node");
        session.mark_hostship_requested().unwrap();
        let t = session
            .apply(&ControlEvent::HostshipVerdict(HostshipVerdict::Denied))
            .unwrap();
        assert!(!t.changed());
        assert!(!session.hostship_pending());
    }

    #[test]
    fn test_reset_clears_everything() {
        let session = authenticated("node");
        session.apply(&ControlEvent::ConnectionCount(4)).unwrap();
        session.mark_hostship_requested().unwrap();

        let t = session.reset();
        assert_eq!(t.to, Status::Disconnected);
        assert_eq!(session.connection_count(), 0);
        assert!(!session.hostship_pending());
        assert!(session.begin_connecting().is_ok());
    }
}
