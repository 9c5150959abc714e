//! Session roles.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{constants, ProtocolError, Result};

/// The local node's role in its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum Status {
    #[default]
    Disconnected = 0,
    Connecting = 1,
    ClientWithoutHost = 2,
    ClientWithHost = 3,
    Host = 4,
}

impl Status {
    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Whether the session has confirmed this node's membership.
    #[inline]
    pub fn is_authenticated(self) -> bool {
        matches!(
            self,
            Status::ClientWithoutHost | Status::ClientWithHost | Status::Host
        )
    }

    /// Whether this node may ask for hostship.
    #[inline]
    pub fn is_client(self) -> bool {
        matches!(self, Status::ClientWithoutHost | Status::ClientWithHost)
    }
}

impl TryFrom<u32> for Status {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Status::Disconnected),
            1 => Ok(Status::Connecting),
            2 => Ok(Status::ClientWithoutHost),
            3 => Ok(Status::ClientWithHost),
            4 => Ok(Status::Host),
            _ => Err(ProtocolError::MalformedPayload(constants::ERR_UNKNOWN_STATUS)),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Disconnected => "disconnected",
            Status::Connecting => "connecting",
            Status::ClientWithoutHost => "client without host",
            Status::ClientWithHost => "client with host",
            Status::Host => "host",
        };
        f.write_str(name)
    }
}

/// Atomically updated [`Status`].
///
/// Readers may observe a value that changes right after they load it; every
/// write is a single atomic step.
#[derive(Debug, Default)]
pub struct StatusCell(AtomicU32);

impl StatusCell {
    pub fn new(status: Status) -> Self {
        Self(AtomicU32::new(status.as_u32()))
    }

    pub fn load(&self) -> Status {
        // Only values produced by `Status::as_u32` are ever stored.
        Status::try_from(self.0.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Unconditionally replace the status, returning the previous one.
    pub fn swap(&self, status: Status) -> Status {
        Status::try_from(self.0.swap(status.as_u32(), Ordering::AcqRel)).unwrap_or_default()
    }

    /// Apply `f` to the current status as one atomic read-modify-write.
    ///
    /// `f` returns `Ok(next)` to commit or an error to leave the status
    /// untouched. On success returns `(previous, next)`.
    pub fn transition<F>(&self, mut f: F) -> Result<(Status, Status)>
    where
        F: FnMut(Status) -> Result<Status>,
    {
        let mut failure = None;
        let mut committed = Status::Disconnected;
        let outcome = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                let current = Status::try_from(raw).unwrap_or_default();
                match f(current) {
                    Ok(next) => {
                        committed = next;
                        Some(next.as_u32())
                    }
                    Err(e) => {
                        failure = Some(e);
                        None
                    }
                }
            });

        match outcome {
            Ok(raw) => {
                let previous = Status::try_from(raw).unwrap_or_default();
                Ok((previous, committed))
            }
            Err(raw) => Err(failure.unwrap_or(ProtocolError::StateConflict {
                status: Status::try_from(raw).unwrap_or_default(),
                reason: "transition rejected",
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_status_wire_values() {
        for status in [
            Status::Disconnected,
            Status::Connecting,
            Status::ClientWithoutHost,
            Status::ClientWithHost,
            Status::Host,
        ] {
            assert_eq!(Status::try_from(status.as_u32()).unwrap(), status);
        }
        assert!(Status::try_from(5).is_err());
    }

    #[test]
    fn test_transition_commits_or_leaves_untouched() {
        let cell = StatusCell::new(Status::Host);

        let err = cell
            .transition(|s| {
                Err(ProtocolError::StateConflict {
                    status: s,
                    reason: "nope",
                })
            })
            .unwrap_err();
        assert!(matches!(err, ProtocolError::StateConflict { .. }));
        assert_eq!(cell.load(), Status::Host);

        let (from, to) = cell.transition(|_| Ok(Status::ClientWithoutHost)).unwrap();
        assert_eq!(from, Status::Host);
        assert_eq!(to, Status::ClientWithoutHost);
        assert_eq!(cell.load(), Status::ClientWithoutHost);
    }
}
