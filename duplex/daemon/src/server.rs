//! Echo Server
//!
//! Accepts duplex connections and echoes every byte back. When a peer
//! half-closes, the server closes gracefully in turn, which is exactly the
//! FIN exchange a `Connection::close` on the other side waits for.
//!
//! ```text
//!                     DaemonServer
//!                          │
//!          ┌───────────────┼───────────────┐
//!          │               │               │
//!       conn-1          conn-2          conn-3
//!    read → write    read → write    read → write
//!    FIN  → close    FIN  → close    FIN  → close
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use dashmap::DashMap;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn, Instrument};

use duplex_core::{
    Connection, ConnectionId, ConnectionListener, DuplexConfig, TransportError,
};

/// Connection state tracking
struct ConnectionState {
    /// When the connection was accepted
    connected_at: Instant,
    /// The live connection, aborted on shutdown
    connection: Connection,
    /// Handle to abort the connection task
    abort_handle: Option<AbortHandle>,
}

/// The echo server
pub struct DaemonServer {
    /// Resolved configuration
    config: DuplexConfig,
    /// Active connections
    connection_states: Arc<DashMap<ConnectionId, ConnectionState>>,
}

impl DaemonServer {
    /// Create a new server
    pub fn new(config: DuplexConfig) -> Self {
        Self {
            config,
            connection_states: Arc::new(DashMap::new()),
        }
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut listener =
            ConnectionListener::bind(self.config.connection.clone(), &self.config.listener)
                .context("Failed to bind listener")?;
        info!(path = %listener.local_path().display(), "Ready to accept connections");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, stopping accept loop");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok(connection) => self.spawn_handler(connection),
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
            }
        }

        self.shutdown(&mut listener);
        Ok(())
    }

    fn spawn_handler(&self, connection: Connection) {
        let conn_id = connection.id();
        info!(
            conn_id = %conn_id,
            peer = %connection.remote_identity(),
            active_connections = self.connection_count() + 1,
            "New connection accepted"
        );

        self.connection_states.insert(
            conn_id,
            ConnectionState {
                connected_at: Instant::now(),
                connection: connection.clone(),
                abort_handle: None,
            },
        );

        let states = Arc::clone(&self.connection_states);
        let task = tokio::spawn(
            handle_connection(connection, states)
                .instrument(tracing::info_span!("connection", %conn_id)),
        );

        // The handler may already have finished and removed itself
        if let Some(mut state) = self.connection_states.get_mut(&conn_id) {
            state.abort_handle = Some(task.abort_handle());
        }
    }

    fn shutdown(&self, listener: &mut ConnectionListener) {
        info!("Initiating shutdown");

        let conn_ids: Vec<ConnectionId> = self.connection_states.iter().map(|r| *r.key()).collect();
        for conn_id in conn_ids {
            if let Some((_, state)) = self.connection_states.remove(&conn_id) {
                info!(
                    conn_id = %conn_id,
                    uptime = ?state.connected_at.elapsed(),
                    "Aborting connection"
                );
                state.connection.abort();
                if let Some(handle) = state.abort_handle {
                    handle.abort();
                }
            }
        }

        listener.shutdown();
        info!("Shutdown complete");
    }

    /// Get number of active connections
    pub fn connection_count(&self) -> usize {
        self.connection_states.len()
    }
}

/// Echo until the peer finishes, then close
async fn handle_connection(
    connection: Connection,
    states: Arc<DashMap<ConnectionId, ConnectionState>>,
) {
    match echo(&connection).await {
        Ok(bytes) => info!(bytes, "Peer finished; connection closed"),
        Err(e) => warn!(error = %e, "Connection failed"),
    }

    states.remove(&connection.id());
    debug!(
        active_connections = states.len(),
        stats = ?connection.stats(),
        "Connection handler finished"
    );
}

async fn echo(connection: &Connection) -> Result<u64, TransportError> {
    let settings = connection.settings().clone();
    let mut buf = vec![0u8; settings.buffer_size];
    let mut total = 0u64;

    loop {
        let n = connection.read(&mut buf, settings.read_timeout()).await?;
        if n == 0 {
            connection.close(settings.close_timeout()).await?;
            return Ok(total);
        }
        connection
            .write(&buf[..n], true, settings.write_timeout())
            .await?;
        total += n as u64;
    }
}
