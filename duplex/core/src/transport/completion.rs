//! Awaitable socket completions
//!
//! [`Receive`] and [`SendAll`] turn one socket transfer into a future that
//! resolves exactly once. Both try the transfer before waiting on readiness,
//! so a transfer the kernel can satisfy immediately completes inline on the
//! first poll without a trip through the reactor. Neither captures any
//! ambient context; the connection owns timeout and cancellation.
//!
//! [`CompletionSlot`] is the per-direction bookkeeping a connection keeps for
//! these futures: at most one transfer per direction is in flight, and the
//! slot is reset to idle when the transfer's guard drops.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll};

use tokio::net::UnixStream;

use super::error::{SocketErrorFamily, SocketFault};
use super::fault::OperationKind;

/// Outcome of a completed transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Completion {
    /// Bytes moved
    pub bytes: usize,
    /// Whether the transfer finished on its first poll
    pub inline: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Idle,
    Pending,
    Completed,
}

/// Receive into `buf`
pub(crate) fn receive<'a>(socket: &'a UnixStream, buf: &'a mut [u8]) -> Receive<'a> {
    Receive {
        socket,
        buf,
        stage: Stage::Idle,
    }
}

/// Send all of `buf`
pub(crate) fn send<'a>(socket: &'a UnixStream, buf: &'a [u8]) -> SendAll<'a> {
    SendAll {
        socket,
        buf,
        written: 0,
        stage: Stage::Idle,
    }
}

/// Future for a single receive
#[derive(Debug)]
pub(crate) struct Receive<'a> {
    socket: &'a UnixStream,
    buf: &'a mut [u8],
    stage: Stage,
}

impl Future for Receive<'_> {
    type Output = Result<Completion, SocketFault>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        debug_assert_ne!(this.stage, Stage::Completed, "receive polled after completion");

        let inline = this.stage == Stage::Idle;
        this.stage = Stage::Pending;

        loop {
            match this.socket.try_read(this.buf) {
                Ok(bytes) => {
                    this.stage = Stage::Completed;
                    return Poll::Ready(Ok(Completion { bytes, inline }));
                }
                Err(ref err) if retryable(err) => {}
                Err(err) => {
                    this.stage = Stage::Completed;
                    return Poll::Ready(Err(SocketFault::from(err)));
                }
            }

            match this.socket.poll_read_ready(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(err)) => {
                    this.stage = Stage::Completed;
                    return Poll::Ready(Err(SocketFault::from(err)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Future for sending a whole buffer
#[derive(Debug)]
pub(crate) struct SendAll<'a> {
    socket: &'a UnixStream,
    buf: &'a [u8],
    written: usize,
    stage: Stage,
}

impl Future for SendAll<'_> {
    type Output = Result<Completion, SocketFault>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        debug_assert_ne!(this.stage, Stage::Completed, "send polled after completion");

        let inline = this.stage == Stage::Idle;
        this.stage = Stage::Pending;

        while this.written < this.buf.len() {
            match this.socket.try_write(&this.buf[this.written..]) {
                Ok(0) => {
                    this.stage = Stage::Completed;
                    return Poll::Ready(Err(SocketFault::new(
                        SocketErrorFamily::ConnectionReset,
                        None,
                        "socket accepted zero bytes",
                    )));
                }
                Ok(n) => {
                    this.written += n;
                    continue;
                }
                Err(ref err) if retryable(err) => {}
                Err(err) => {
                    this.stage = Stage::Completed;
                    return Poll::Ready(Err(SocketFault::from(err)));
                }
            }

            match this.socket.poll_write_ready(cx) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(err)) => {
                    this.stage = Stage::Completed;
                    return Poll::Ready(Err(SocketFault::from(err)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        this.stage = Stage::Completed;
        Poll::Ready(Ok(Completion {
            bytes: this.written,
            inline,
        }))
    }
}

fn retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

// =============================================================================
// Per-direction slots
// =============================================================================

const SLOT_IDLE: u8 = 0;
const SLOT_BUSY: u8 = 1;

/// Tracks the single in-flight transfer of one direction
#[derive(Debug)]
pub(crate) struct CompletionSlot {
    kind: OperationKind,
    state: AtomicU8,
}

impl CompletionSlot {
    pub(crate) fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            state: AtomicU8::new(SLOT_IDLE),
        }
    }

    /// Claim the slot for one transfer
    ///
    /// Overlapping transfers in the same direction are a caller bug; debug
    /// builds assert on them.
    pub(crate) fn begin(&self) -> SlotGuard<'_> {
        let previous = self.state.swap(SLOT_BUSY, Ordering::AcqRel);
        debug_assert_eq!(
            previous, SLOT_IDLE,
            "overlapping {} operations on one connection",
            self.kind
        );
        SlotGuard { slot: self }
    }

    /// Whether a transfer currently holds the slot
    pub(crate) fn is_busy(&self) -> bool {
        self.state.load(Ordering::Acquire) == SLOT_BUSY
    }

    fn reset(&self) {
        self.state.store(SLOT_IDLE, Ordering::Release);
    }
}

/// Resets its slot to idle on drop
#[derive(Debug)]
pub(crate) struct SlotGuard<'a> {
    slot: &'a CompletionSlot,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.reset();
    }
}
