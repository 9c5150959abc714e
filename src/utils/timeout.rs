//! Timeout constants and helpers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default timeout for establishing connections
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default limit on how long a single send may block on back-pressure
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default grace period for peers to leave during server shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `fut` with a deadline, mapping an elapsed deadline to
/// [`ProtocolError::Timeout`].
pub async fn with_timeout<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| ProtocolError::Timeout)
}

/// Like [`with_timeout`] for futures that already return a crate `Result`.
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_timeout(fut, duration).await?
}
