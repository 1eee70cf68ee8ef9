//! Fault Translation
//!
//! Pure functions mapping a native failure plus the connection's fault
//! bookkeeping to a [`TransportError`]. Nothing here touches a socket.
//!
//! # Transfer priority
//!
//! 1. A stale/invalid handle is always `InvalidHandle`.
//! 2. A recorded timeout is `Timeout` for the direction that timed out, and a
//!    `CommunicationFault` wrapping that timeout for the other direction.
//! 3. An explicit abort is `Aborted`.
//! 4. Otherwise classify by native family.
//!
//! Connect and accept faults use their own, simpler mapping.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use super::budget::{DisplayTimeout, TimeoutBudget};
use super::endpoint::Endpoint;
use super::error::{SocketErrorFamily, SocketFault, TransportError};

/// Direction of a transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Receive side
    Read,
    /// Send side
    Write,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// A timeout recorded on the connection when a timer aborted it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeoutRecord {
    kind: OperationKind,
    description: String,
}

impl TimeoutRecord {
    /// Record a timeout of `kind`
    pub fn new(kind: OperationKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    /// Which direction timed out
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Description naming the operation, peer and timeout
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// How a transfer failed before translation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferFailure {
    /// The OS reported an error
    Socket(SocketFault),
    /// The handle was torn down (abort, timeout or close) under the transfer
    Disposed,
}

/// Connection state a transfer fault is interpreted against
#[derive(Clone, Copy, Debug)]
pub struct FaultContext<'a> {
    /// The failing operation
    pub operation: OperationKind,
    /// Peer description used in messages
    pub peer: &'a str,
    /// Timeout recorded by the timer that aborted the connection, if any
    pub timeout_fault: Option<&'a TimeoutRecord>,
    /// Whether the connection was aborted
    pub aborted: bool,
    /// Budget left for the failing operation
    pub remaining: Duration,
}

/// Translate a failed read or write
#[must_use]
pub fn translate_transfer(failure: &TransferFailure, ctx: &FaultContext<'_>) -> TransportError {
    let op = ctx.operation;
    let peer = ctx.peer;

    if let TransferFailure::Socket(fault) = failure {
        if fault.family() == SocketErrorFamily::InvalidHandle {
            return TransportError::InvalidHandle {
                message: format!("{op} on {peer} used an invalid socket handle: {fault}"),
                code: fault.code(),
            };
        }
    }

    if let Some(record) = ctx.timeout_fault {
        if record.kind() == op {
            return TransportError::timeout(record.description());
        }
        return TransportError::CommunicationFault {
            message: format!(
                "{op} on {peer} failed because a {} on the same connection timed out",
                record.kind()
            ),
            code: None,
            source: Some(Box::new(TransportError::timeout(record.description()))),
        };
    }

    if ctx.aborted {
        return aborted(op, peer);
    }

    match failure {
        TransferFailure::Disposed => TransportError::Disposed {
            message: format!("{op} on {peer} was attempted after the connection was closed"),
        },
        TransferFailure::Socket(fault) => translate_native(fault, ctx),
    }
}

fn translate_native(fault: &SocketFault, ctx: &FaultContext<'_>) -> TransportError {
    let op = ctx.operation;
    let peer = ctx.peer;

    match fault.family() {
        // An aborted connection never gets here, so a reset is the peer's doing
        family if family.is_reset() => TransportError::CommunicationFault {
            message: format!("the connection to {peer} was reset during {op}: {fault}"),
            code: fault.code(),
            source: None,
        },
        SocketErrorFamily::TimedOut if ctx.remaining.is_zero() => TransportError::timeout(
            format!("{op} on {peer} timed out: {fault}"),
        ),
        _ => TransportError::CommunicationFault {
            message: format!("{op} on {peer} failed: {fault}"),
            code: fault.code(),
            source: None,
        },
    }
}

fn aborted(op: OperationKind, peer: &str) -> TransportError {
    TransportError::Aborted {
        message: format!("{op} on {peer} failed because the connection was aborted"),
    }
}

/// Translate a failed connect
///
/// Bounded budgets report the time spent; unbounded ones do not.
#[must_use]
pub fn translate_connect(
    fault: &SocketFault,
    endpoint: &Endpoint,
    budget: &TimeoutBudget,
) -> TransportError {
    let spent = if budget.is_infinite() {
        String::new()
    } else {
        format!(
            " after {:?} of {}",
            budget.elapsed(),
            DisplayTimeout(budget.original())
        )
    };

    match fault.family() {
        SocketErrorFamily::ConnectionRefused | SocketErrorFamily::AddressUnavailable => {
            TransportError::EndpointNotFound {
                message: format!("could not connect to {endpoint}{spent}: {fault}"),
                code: fault.code(),
            }
        }
        SocketErrorFamily::NoBufferSpace => TransportError::InsufficientResources {
            message: format!("insufficient resources connecting to {endpoint}{spent}: {fault}"),
            code: fault.code(),
        },
        _ => TransportError::CommunicationFault {
            message: format!("connecting to {endpoint} failed{spent}: {fault}"),
            code: fault.code(),
            source: None,
        },
    }
}

/// Translate a failed accept on the listener bound at `socket_path`
#[must_use]
pub fn translate_accept(fault: &SocketFault, socket_path: &Path) -> TransportError {
    let socket = socket_path.display();
    match fault.family() {
        SocketErrorFamily::InvalidHandle => TransportError::InvalidHandle {
            message: format!("listener on {socket} has an invalid handle: {fault}"),
            code: fault.code(),
        },
        SocketErrorFamily::NoBufferSpace => TransportError::InsufficientResources {
            message: format!("insufficient resources accepting on {socket}: {fault}"),
            code: fault.code(),
        },
        _ => TransportError::CommunicationFault {
            message: format!("accepting on {socket} failed: {fault}"),
            code: fault.code(),
            source: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: &str = "unix:///tmp/peer.sock";

    fn ctx<'a>(
        operation: OperationKind,
        timeout_fault: Option<&'a TimeoutRecord>,
        aborted: bool,
    ) -> FaultContext<'a> {
        FaultContext {
            operation,
            peer: PEER,
            timeout_fault,
            aborted,
            remaining: Duration::from_secs(1),
        }
    }

    fn socket(code: i32) -> TransferFailure {
        TransferFailure::Socket(SocketFault::from_errno(code))
    }

    #[test]
    fn test_invalid_handle_wins_over_everything() {
        let record = TimeoutRecord::new(OperationKind::Read, "read timed out");
        let err = translate_transfer(
            &socket(libc::EBADF),
            &ctx(OperationKind::Read, Some(&record), true),
        );
        assert!(matches!(err, TransportError::InvalidHandle { code: Some(libc::EBADF), .. }));
    }

    #[test]
    fn test_recorded_timeout_same_direction() {
        let record = TimeoutRecord::new(OperationKind::Read, "read on peer timed out after 1s");
        let err = translate_transfer(
            &TransferFailure::Disposed,
            &ctx(OperationKind::Read, Some(&record), true),
        );
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "read on peer timed out after 1s");
    }

    #[test]
    fn test_recorded_timeout_other_direction() {
        let record = TimeoutRecord::new(OperationKind::Read, "read on peer timed out after 1s");
        let err = translate_transfer(
            &TransferFailure::Disposed,
            &ctx(OperationKind::Write, Some(&record), true),
        );

        match &err {
            TransportError::CommunicationFault { source, .. } => {
                let inner = source.as_deref().unwrap();
                assert!(inner.is_timeout());
                assert_eq!(inner.to_string(), "read on peer timed out after 1s");
            }
            other => panic!("expected communication fault, got {other:?}"),
        }
    }

    #[test]
    fn test_abort_without_timeout() {
        let err = translate_transfer(&socket(libc::ECONNRESET), &ctx(OperationKind::Write, None, true));
        assert!(err.is_aborted());

        let err = translate_transfer(&TransferFailure::Disposed, &ctx(OperationKind::Read, None, true));
        assert!(err.is_aborted());
    }

    #[test]
    fn test_disposed_after_graceful_close() {
        let err = translate_transfer(&TransferFailure::Disposed, &ctx(OperationKind::Read, None, false));
        assert!(matches!(err, TransportError::Disposed { .. }));
    }

    #[test]
    fn test_reset_is_communication_fault() {
        let err = translate_transfer(&socket(libc::EPIPE), &ctx(OperationKind::Write, None, false));
        assert!(matches!(
            err,
            TransportError::CommunicationFault { code: Some(libc::EPIPE), source: None, .. }
        ));
    }

    #[test]
    fn test_reset_after_abort_is_aborted() {
        for code in [libc::ECONNRESET, libc::ECONNABORTED, libc::EPIPE] {
            let err = translate_transfer(&socket(code), &ctx(OperationKind::Read, None, true));
            assert!(err.is_aborted(), "errno {code}: {err:?}");

            let err = translate_transfer(&socket(code), &ctx(OperationKind::Read, None, false));
            assert!(matches!(err, TransportError::CommunicationFault { .. }), "errno {code}: {err:?}");
        }
    }

    #[test]
    fn test_native_timeout_needs_exhausted_budget() {
        let mut context = ctx(OperationKind::Read, None, false);
        let err = translate_transfer(&socket(libc::ETIMEDOUT), &context);
        assert!(matches!(err, TransportError::CommunicationFault { .. }));

        context.remaining = Duration::ZERO;
        let err = translate_transfer(&socket(libc::ETIMEDOUT), &context);
        assert!(err.is_timeout());
    }

    #[test]
    fn test_other_native_error_keeps_code() {
        let err = translate_transfer(&socket(libc::EINVAL), &ctx(OperationKind::Read, None, false));
        assert_eq!(err.code(), Some(libc::EINVAL));
        assert!(err.to_string().contains(PEER));
    }

    #[test]
    fn test_connect_mapping() {
        let endpoint = Endpoint::new("/tmp/missing.sock");
        let bounded = TimeoutBudget::start(Duration::from_secs(5));
        let unbounded = TimeoutBudget::start(super::super::budget::INFINITE);

        let err = translate_connect(&SocketFault::from_errno(libc::ENOENT), &endpoint, &bounded);
        assert!(matches!(err, TransportError::EndpointNotFound { .. }));
        assert!(err.to_string().contains(" after "));

        let err = translate_connect(&SocketFault::from_errno(libc::ECONNREFUSED), &endpoint, &unbounded);
        assert!(matches!(err, TransportError::EndpointNotFound { .. }));
        assert!(!err.to_string().contains(" after "));

        let err = translate_connect(&SocketFault::from_errno(libc::ENOBUFS), &endpoint, &bounded);
        assert!(matches!(err, TransportError::InsufficientResources { .. }));

        let err = translate_connect(&SocketFault::from_errno(libc::EACCES), &endpoint, &bounded);
        assert!(matches!(err, TransportError::CommunicationFault { .. }));
    }

    #[test]
    fn test_accept_mapping() {
        let path = Path::new("/tmp/listener.sock");
        let err = translate_accept(&SocketFault::from_errno(libc::ENOMEM), path);
        assert!(matches!(err, TransportError::InsufficientResources { .. }));

        let err = translate_accept(&SocketFault::from_errno(libc::ECONNABORTED), path);
        assert!(matches!(err, TransportError::CommunicationFault { .. }));
    }
}
