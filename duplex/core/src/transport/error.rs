//! Transport Fault Taxonomy
//!
//! Two layers of error types live here:
//!
//! - [`SocketFault`]: a native socket failure, classified into a closed set of
//!   portable [`SocketErrorFamily`] tags at the point of the OS call. Nothing
//!   above the completion adapter ever matches on raw errno values.
//! - [`TransportError`]: the public taxonomy every operation of a
//!   [`Connection`](super::Connection) reports. No raw `io::Error` crosses the
//!   public boundary.
//!
//! The mapping between the two is done by [`super::fault`].

use std::io;

use thiserror::Error;

// =============================================================================
// Native Fault Classification
// =============================================================================

/// Portable classification of a native socket error
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketErrorFamily {
    /// The descriptor is stale or not a socket (`EBADF`, `ENOTSOCK`)
    InvalidHandle,
    /// The peer reset the connection or vanished (`ECONNRESET`, `EPIPE`)
    ConnectionReset,
    /// The connection was aborted locally (`ECONNABORTED`)
    ConnectionAborted,
    /// The network dropped the connection (`ENETRESET`)
    NetworkReset,
    /// The kernel gave up waiting (`ETIMEDOUT`)
    TimedOut,
    /// Nobody is listening on the address (`ECONNREFUSED`)
    ConnectionRefused,
    /// The address does not exist or cannot be reached
    /// (`ENOENT`, `EADDRNOTAVAIL`, `ENETUNREACH`, `EHOSTUNREACH`, ...)
    AddressUnavailable,
    /// Kernel buffers or memory are exhausted (`ENOBUFS`, `ENOMEM`)
    NoBufferSpace,
    /// Anything else
    Other,
}

impl SocketErrorFamily {
    /// Classify an I/O error, preferring the raw OS code when present
    #[must_use]
    pub fn classify(err: &io::Error) -> Self {
        match err.raw_os_error() {
            Some(code) => Self::from_errno(code),
            None => Self::from_kind(err.kind()),
        }
    }

    /// Classify a raw `errno` value
    #[must_use]
    pub fn from_errno(code: i32) -> Self {
        match code {
            libc::EBADF | libc::ENOTSOCK => Self::InvalidHandle,
            libc::ECONNRESET | libc::EPIPE => Self::ConnectionReset,
            libc::ECONNABORTED => Self::ConnectionAborted,
            libc::ENETRESET => Self::NetworkReset,
            libc::ETIMEDOUT => Self::TimedOut,
            libc::ECONNREFUSED => Self::ConnectionRefused,
            libc::ENOENT
            | libc::ENOTDIR
            | libc::EADDRNOTAVAIL
            | libc::ENETUNREACH
            | libc::ENETDOWN
            | libc::EHOSTUNREACH
            | libc::EHOSTDOWN => Self::AddressUnavailable,
            libc::ENOBUFS | libc::ENOMEM => Self::NoBufferSpace,
            _ => Self::Other,
        }
    }

    /// Classify an error that carries no OS code
    #[must_use]
    pub fn from_kind(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => Self::ConnectionReset,
            io::ErrorKind::ConnectionAborted => Self::ConnectionAborted,
            io::ErrorKind::TimedOut => Self::TimedOut,
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            io::ErrorKind::NotFound | io::ErrorKind::AddrNotAvailable => Self::AddressUnavailable,
            io::ErrorKind::OutOfMemory => Self::NoBufferSpace,
            _ => Self::Other,
        }
    }

    /// Whether this family means the stream was torn down underneath us
    #[must_use]
    pub fn is_reset(self) -> bool {
        matches!(
            self,
            Self::ConnectionReset | Self::ConnectionAborted | Self::NetworkReset
        )
    }
}

/// A native socket failure with its portable family and OS error code
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct SocketFault {
    family: SocketErrorFamily,
    code: Option<i32>,
    message: String,
}

impl SocketFault {
    /// Build a fault from its parts
    pub fn new(family: SocketErrorFamily, code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            family,
            code,
            message: message.into(),
        }
    }

    /// Build a fault from a raw `errno` value
    #[must_use]
    pub fn from_errno(code: i32) -> Self {
        Self::from(io::Error::from_raw_os_error(code))
    }

    /// The portable family
    #[must_use]
    pub fn family(&self) -> SocketErrorFamily {
        self.family
    }

    /// The native OS error code, if the failure came from the OS
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Human-readable description of the native failure
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for SocketFault {
    fn from(err: io::Error) -> Self {
        Self {
            family: SocketErrorFamily::classify(&err),
            code: err.raw_os_error(),
            message: err.to_string(),
        }
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors reported by connection operations
///
/// `Timeout` and `CommunicationFault` may wrap an inner `TransportError`
/// (available through [`std::error::Error::source`]): a close that timed out
/// wraps the timeout of its drain read, and an operation that failed because
/// the *other* direction timed out wraps that recorded timeout.
#[derive(Clone, Debug, Error)]
pub enum TransportError {
    /// The operation did not complete within its timeout
    #[error("{message}")]
    Timeout {
        /// Description naming the operation, peer and timeout
        message: String,
        /// Lower-level timeout this one wraps
        #[source]
        source: Option<Box<TransportError>>,
    },

    /// The connection was aborted while or before the operation ran
    #[error("{message}")]
    Aborted {
        /// Description naming the operation and peer
        message: String,
    },

    /// The stream failed or the peer violated the close protocol
    #[error("{message}")]
    CommunicationFault {
        /// Description of the failure
        message: String,
        /// Native OS error code, when one caused the fault
        code: Option<i32>,
        /// Root cause recorded elsewhere on the connection
        #[source]
        source: Option<Box<TransportError>>,
    },

    /// Nothing is listening at the endpoint or it cannot be reached
    #[error("{message}")]
    EndpointNotFound {
        /// Description naming the endpoint
        message: String,
        /// Native OS error code
        code: Option<i32>,
    },

    /// Kernel buffers or memory were exhausted
    #[error("{message}")]
    InsufficientResources {
        /// Description of the failure
        message: String,
        /// Native OS error code
        code: Option<i32>,
    },

    /// The socket handle was stale or invalid
    #[error("{message}")]
    InvalidHandle {
        /// Description of the failure
        message: String,
        /// Native OS error code
        code: Option<i32>,
    },

    /// The caller passed an unusable argument; never a socket fault
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The connection was closed gracefully before the operation
    #[error("{message}")]
    Disposed {
        /// Description naming the operation and peer
        message: String,
    },
}

impl TransportError {
    /// A timeout with no wrapped cause
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
            source: None,
        }
    }

    /// A communication fault with no native code or wrapped cause
    pub fn communication(message: impl Into<String>) -> Self {
        Self::CommunicationFault {
            message: message.into(),
            code: None,
            source: None,
        }
    }

    /// Whether this is a [`TransportError::Timeout`]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this is a [`TransportError::Aborted`]
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Native OS error code carried by this error, if any
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::CommunicationFault { code, .. }
            | Self::EndpointNotFound { code, .. }
            | Self::InsufficientResources { code, .. }
            | Self::InvalidHandle { code, .. } => *code,
            _ => None,
        }
    }

    /// The wrapped inner error, if any
    #[must_use]
    pub fn inner(&self) -> Option<&TransportError> {
        match self {
            Self::Timeout { source, .. } | Self::CommunicationFault { source, .. } => {
                source.as_deref()
            }
            _ => None,
        }
    }
}
