//! Connection Initiator
//!
//! Opens outbound connections to a Unix socket endpoint within a timeout
//! and hands back a [`Connection`] in the `Open` phase.
//!
//! Each initiator caps the number of live connections per endpoint
//! (`max_outbound_connections_per_endpoint`). A connection holds its permit
//! until its socket is released, so waiting for a free slot spends the same
//! connect budget as the connect itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use socket2::SockRef;
use tokio::net::UnixStream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info};

use super::budget::{DisplayTimeout, TimeoutBudget};
use super::config::ConnectionSettings;
use super::connection::Connection;
use super::endpoint::Endpoint;
use super::error::{SocketFault, TransportError};
use super::fault;

/// Dials Unix socket endpoints
#[derive(Debug)]
pub struct ConnectionInitiator {
    settings: ConnectionSettings,
    limits: Mutex<HashMap<Endpoint, Arc<Semaphore>>>,
}

impl Default for ConnectionInitiator {
    fn default() -> Self {
        Self::new(ConnectionSettings::default())
    }
}

impl ConnectionInitiator {
    /// Create an initiator applying `settings` to every connection it opens
    #[must_use]
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            limits: Mutex::new(HashMap::new()),
        }
    }

    /// Settings applied to new connections
    #[must_use]
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Open a connection to `endpoint`
    ///
    /// A zero timeout fails immediately without touching the OS. An infinite
    /// timeout ([`super::budget::INFINITE`]) waits as long as it takes.
    ///
    /// # Errors
    ///
    /// - `Timeout` if the budget ran out waiting for a permit or for the
    ///   connect to finish
    /// - `EndpointNotFound` if nothing listens at the path
    /// - `InsufficientResources` if the kernel is out of buffers
    /// - `CommunicationFault` for anything else
    pub async fn connect(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Connection, TransportError> {
        if timeout.is_zero() {
            return Err(TransportError::timeout(format!(
                "connecting to {endpoint} timed out: no time was left of its timeout"
            )));
        }

        let budget = TimeoutBudget::start(timeout);
        let permit = self.acquire_permit(endpoint, &budget).await?;

        let connecting = UnixStream::connect(endpoint.path());
        let result = if budget.is_infinite() {
            connecting.await
        } else {
            match tokio::time::timeout(budget.remaining(), connecting).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(TransportError::timeout(format!(
                        "connecting to {endpoint} timed out after {}",
                        DisplayTimeout(timeout)
                    )));
                }
            }
        };

        let stream = result.map_err(|err| {
            let err = fault::translate_connect(&SocketFault::from(err), endpoint, &budget);
            debug!(%endpoint, error = %err, "connect failed");
            err
        })?;

        apply_buffer_size(&stream, self.settings.buffer_size);

        let connection = Connection::new(
            stream,
            Some(endpoint.clone()),
            self.settings.clone(),
            Some(permit),
        );
        info!(
            conn_id = %connection.id(),
            %endpoint,
            elapsed = ?budget.elapsed(),
            "connection established"
        );
        Ok(connection)
    }

    async fn acquire_permit(
        &self,
        endpoint: &Endpoint,
        budget: &TimeoutBudget,
    ) -> Result<OwnedSemaphorePermit, TransportError> {
        let max = self.settings.pool.max_outbound_connections_per_endpoint;
        let semaphore = Arc::clone(
            self.limits
                .lock()
                .entry(endpoint.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(max))),
        );

        let closed = || {
            TransportError::communication(format!(
                "outbound connection limit for {endpoint} is no longer available"
            ))
        };

        match Arc::clone(&semaphore).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(closed()),
            Err(TryAcquireError::NoPermits) => {}
        }

        debug!(%endpoint, max, "outbound connection limit reached; waiting");
        let waiting = semaphore.acquire_owned();
        let acquired = if budget.is_infinite() {
            waiting.await
        } else {
            tokio::time::timeout(budget.remaining(), waiting)
                .await
                .map_err(|_| {
                    TransportError::timeout(format!(
                        "connecting to {endpoint} timed out after {} waiting for one of {max} outbound connections to free up",
                        DisplayTimeout(budget.original())
                    ))
                })?
        };
        acquired.map_err(|_| closed())
    }
}

/// Open a connection with default settings
///
/// # Errors
///
/// See [`ConnectionInitiator::connect`].
pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Connection, TransportError> {
    ConnectionInitiator::default().connect(endpoint, timeout).await
}

/// Size the kernel buffers; failures only cost throughput
pub(crate) fn apply_buffer_size(stream: &UnixStream, size: usize) {
    let socket = SockRef::from(stream);
    if let Err(err) = socket.set_send_buffer_size(size) {
        debug!(size, error = %err, "setting send buffer size failed");
    }
    if let Err(err) = socket.set_recv_buffer_size(size) {
        debug!(size, error = %err, "setting receive buffer size failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::budget::INFINITE;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_zero_timeout_fails_fast() {
        let endpoint = Endpoint::new("/nonexistent/duplex.sock");
        let err = connect(&endpoint, Duration::ZERO).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_missing_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let endpoint = Endpoint::new(dir.path().join("missing.sock"));

        let err = connect(&endpoint, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::EndpointNotFound { .. }));
        assert!(err.to_string().contains(" after "));

        let err = connect(&endpoint, INFINITE).await.unwrap_err();
        assert!(matches!(err, TransportError::EndpointNotFound { .. }));
        assert!(!err.to_string().contains(" after "));
    }

    #[tokio::test]
    async fn test_connect_applies_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peer.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let initiator = ConnectionInitiator::new(ConnectionSettings::new().with_buffer_size(16 * 1024));
        let endpoint = Endpoint::new(&path);
        let (conn, accepted) = tokio::join!(initiator.connect(&endpoint, Duration::from_secs(1)), listener.accept());
        let conn = conn.unwrap();
        let _peer = accepted.unwrap();

        assert_eq!(conn.settings().buffer_size, 16 * 1024);
        assert_eq!(conn.remote_identity().endpoint.as_ref(), Some(&endpoint));
        assert_eq!(conn.remote_identity().to_string(), endpoint.to_string());
    }

    #[tokio::test]
    async fn test_outbound_cap_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capped.sock");
        let _listener = UnixListener::bind(&path).unwrap();

        let initiator = ConnectionInitiator::new(ConnectionSettings::new().with_max_outbound_connections(1));
        let endpoint = Endpoint::new(&path);

        let first = initiator.connect(&endpoint, Duration::from_secs(1)).await.unwrap();
        let err = initiator
            .connect(&endpoint, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("outbound connections"));

        first.abort();
        let second = initiator.connect(&endpoint, Duration::from_secs(1)).await;
        assert!(second.is_ok());
    }
}
