//! Connection Settings
//!
//! Tuning applied to every connection an initiator or listener creates, plus
//! the pool tuning surface consumed by the connection pool that sits above
//! this transport.
//!
//! Timeouts are stored in milliseconds; `0` means no timeout.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::budget::INFINITE;
use super::timer::DEFAULT_COALESCING_DIVISOR;

/// Default socket send/receive buffer size (64 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

fn millis(ms: u64) -> Duration {
    if ms == 0 {
        INFINITE
    } else {
        Duration::from_millis(ms)
    }
}

/// Pool tuning surface
///
/// The pool itself lives above this crate. The transport honours
/// `max_outbound_connections_per_endpoint` directly and exposes
/// [`Connection::is_stale`](super::Connection::is_stale) for the idle and
/// lease timeouts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Logical pool partition key
    pub group_name: String,

    /// How long a pooled connection may sit unused (milliseconds)
    pub idle_timeout_ms: u64,

    /// Maximum lifetime of a pooled connection (milliseconds)
    pub lease_timeout_ms: u64,

    /// Concurrent outbound connections allowed per endpoint
    pub max_outbound_connections_per_endpoint: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            group_name: "default".to_string(),
            idle_timeout_ms: 120_000,
            lease_timeout_ms: 300_000,
            max_outbound_connections_per_endpoint: 10,
        }
    }
}

impl PoolSettings {
    /// Idle timeout as a duration
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        millis(self.idle_timeout_ms)
    }

    /// Lease timeout as a duration
    #[must_use]
    pub fn lease_timeout(&self) -> Duration {
        millis(self.lease_timeout_ms)
    }
}

/// Per-connection settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Socket send and receive buffer size in bytes
    pub buffer_size: usize,

    /// Deadline drift tolerated before a timer is reprogrammed, as a divisor
    /// of the remaining time (0 = always reprogram)
    pub timer_coalescing_divisor: u32,

    /// Default connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Default read timeout in milliseconds
    pub read_timeout_ms: u64,

    /// Default write timeout in milliseconds
    pub write_timeout_ms: u64,

    /// Default close timeout in milliseconds
    pub close_timeout_ms: u64,

    /// Pool tuning
    pub pool: PoolSettings,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            timer_coalescing_divisor: DEFAULT_COALESCING_DIVISOR,
            connect_timeout_ms: 5000,
            read_timeout_ms: 60_000,
            write_timeout_ms: 60_000,
            close_timeout_ms: 10_000,
            pool: PoolSettings::default(),
        }
    }
}

impl ConnectionSettings {
    /// Create settings with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the socket buffer size
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the timer coalescing divisor
    #[must_use]
    pub fn with_timer_coalescing_divisor(mut self, divisor: u32) -> Self {
        self.timer_coalescing_divisor = divisor;
        self
    }

    /// Set the per-endpoint outbound connection cap
    #[must_use]
    pub fn with_max_outbound_connections(mut self, max: usize) -> Self {
        self.pool.max_outbound_connections_per_endpoint = max;
        self
    }

    /// Set the pool group name
    #[must_use]
    pub fn with_group_name(mut self, name: impl Into<String>) -> Self {
        self.pool.group_name = name.into();
        self
    }

    /// Default connect timeout
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        millis(self.connect_timeout_ms)
    }

    /// Default read timeout
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        millis(self.read_timeout_ms)
    }

    /// Default write timeout
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        millis(self.write_timeout_ms)
    }

    /// Default close timeout
    #[must_use]
    pub fn close_timeout(&self) -> Duration {
        millis(self.close_timeout_ms)
    }
}

/// Accept-side settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerSettings {
    /// Socket path (None = use default)
    ///
    /// Default: $XDG_RUNTIME_DIR/duplex/duplex.sock
    /// Fallback: /tmp/duplex-$UID/duplex.sock
    pub socket_path: Option<PathBuf>,

    /// Reject peers running as a different user (Linux only)
    pub require_same_uid: bool,

    /// Permission bits applied to the socket file
    pub socket_mode: u32,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            socket_path: None,
            require_same_uid: true,
            socket_mode: 0o600,
        }
    }
}

impl ListenerSettings {
    /// The configured socket path, or the default one
    #[must_use]
    pub fn resolved_socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(default_socket_path)
    }
}

/// Get the default Unix socket path
///
/// Uses XDG_RUNTIME_DIR if available, otherwise /tmp/duplex-$UID/
#[must_use]
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("duplex").join("duplex.sock")
    } else {
        // SAFETY: getuid has no preconditions and cannot fail
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/duplex-{uid}/duplex.sock"))
    }
}
