//! Duplex Unix Socket Transport
//!
//! A timeout-aware, bidirectional byte stream over a Unix domain socket:
//! - [`ConnectionInitiator`]: opens outbound connections within a timeout
//! - [`ConnectionListener`]: binds a socket path and accepts peers
//! - [`Connection`]: concurrent read/write, graceful close, idempotent abort
//!
//! # Timeouts
//!
//! Every operation takes an explicit timeout. [`budget::INFINITE`]
//! (`Duration::MAX`) waits forever; `Duration::ZERO` fails immediately with
//! `Timeout` without touching the socket. A timer that expires during a
//! transfer aborts the whole connection and the timeout is recorded, so every
//! later fault on that connection names it as the root cause.
//!
//! # Security
//!
//! - The listener validates the peer UID with `SO_PEERCRED` on Linux
//! - Socket files are created with 0600 permissions
//! - No network exposure: Unix domain sockets only

pub mod budget;
pub(crate) mod completion;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod fault;
pub mod initiator;
pub mod listener;
pub(crate) mod timer;

// Re-exports for convenience
pub use budget::{TimeoutBudget, INFINITE};
pub use config::{
    default_socket_path, ConnectionSettings, ListenerSettings, PoolSettings, DEFAULT_BUFFER_SIZE,
};
pub use connection::{
    Connection, ConnectionId, ConnectionPhase, ConnectionStats, PeerCredentials, RemoteIdentity,
};
pub use endpoint::Endpoint;
pub use error::{SocketErrorFamily, SocketFault, TransportError};
pub use fault::{OperationKind, TimeoutRecord};
pub use initiator::{connect, ConnectionInitiator};
pub use listener::ConnectionListener;
pub use timer::{needs_reprogram, DEFAULT_COALESCING_DIVISOR};
