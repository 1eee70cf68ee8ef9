//! Accept side
//!
//! Binds a Unix socket path and turns each accepted peer into an `Open`
//! [`Connection`] with fresh timers and no fault history.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use super::config::{ConnectionSettings, ListenerSettings};
use super::connection::Connection;
use super::error::{SocketFault, TransportError};
use super::fault;
use super::initiator::apply_buffer_size;

/// A bound Unix socket accepting duplex connections
#[derive(Debug)]
pub struct ConnectionListener {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    settings: ConnectionSettings,
    require_same_uid: bool,
}

impl ConnectionListener {
    /// Bind at the configured (or default) socket path
    ///
    /// Creates parent directories, removes a stale socket file and
    /// restricts the new one to `socket_mode`.
    ///
    /// # Errors
    ///
    /// `CommunicationFault` if the directory, the stale file or the bind
    /// cannot be handled; `InsufficientResources` if the kernel is out of
    /// buffers.
    pub fn bind(
        settings: ConnectionSettings,
        listener_settings: &ListenerSettings,
    ) -> Result<Self, TransportError> {
        let socket_path = listener_settings.resolved_socket_path();

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TransportError::communication(format!(
                    "failed to create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        if socket_path.exists() {
            std::fs::remove_file(&socket_path).map_err(|e| {
                TransportError::communication(format!(
                    "failed to remove old socket {}: {e}",
                    socket_path.display()
                ))
            })?;
        }

        let listener = UnixListener::bind(&socket_path)
            .map_err(|e| fault::translate_accept(&SocketFault::from(e), &socket_path))?;

        let perms = std::fs::Permissions::from_mode(listener_settings.socket_mode);
        std::fs::set_permissions(&socket_path, perms).map_err(|e| {
            TransportError::communication(format!(
                "failed to restrict permissions on {}: {e}",
                socket_path.display()
            ))
        })?;

        info!(path = %socket_path.display(), "listening on unix socket");
        Ok(Self {
            socket_path,
            listener: Some(listener),
            settings,
            require_same_uid: listener_settings.require_same_uid,
        })
    }

    /// Path of the bound socket file
    #[must_use]
    pub fn local_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept the next peer
    ///
    /// # Errors
    ///
    /// `Disposed` after [`ConnectionListener::shutdown`], otherwise the
    /// translated accept fault. A rejected peer is a `CommunicationFault`;
    /// the listener stays usable.
    pub async fn accept(&self) -> Result<Connection, TransportError> {
        let listener = self.listener.as_ref().ok_or_else(|| TransportError::Disposed {
            message: format!("listener on {} was shut down", self.socket_path.display()),
        })?;

        let (stream, _addr) = listener
            .accept()
            .await
            .map_err(|e| fault::translate_accept(&SocketFault::from(e), &self.socket_path))?;

        if self.require_same_uid {
            validate_peer(&stream)?;
        }

        apply_buffer_size(&stream, self.settings.buffer_size);

        let connection = Connection::new(stream, None, self.settings.clone(), None);
        debug!(conn_id = %connection.id(), peer = %connection.remote_identity(), "accepted connection");
        Ok(connection)
    }

    /// Stop accepting and remove the socket file
    pub fn shutdown(&mut self) {
        if self.listener.take().is_some() {
            remove_socket_file(&self.socket_path);
        }
    }
}

impl Drop for ConnectionListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn remove_socket_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed socket file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove socket file"),
    }
}

/// Reject peers running as a different user
#[cfg(target_os = "linux")]
fn validate_peer(stream: &UnixStream) -> Result<(), TransportError> {
    let cred = stream.peer_cred().map_err(|e| {
        TransportError::communication(format!("failed to get peer credentials: {e}"))
    })?;

    // SAFETY: getuid has no preconditions and cannot fail
    let my_uid = unsafe { libc::getuid() };

    if cred.uid() != my_uid {
        warn!(
            peer_uid = cred.uid(),
            my_uid,
            "rejecting connection from different user"
        );
        return Err(TransportError::communication(format!(
            "peer uid {} does not match listener uid {my_uid}",
            cred.uid()
        )));
    }

    Ok(())
}

/// Filesystem permissions are the only check off Linux
#[cfg(not(target_os = "linux"))]
fn validate_peer(_stream: &UnixStream) -> Result<(), TransportError> {
    Ok(())
}
