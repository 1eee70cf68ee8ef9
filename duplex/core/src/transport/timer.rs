//! Timeout Scheduler
//!
//! Each connection owns two deadline timers, one per direction. A timer is
//! a background task sleeping until its *programmed* instant; the logical
//! deadline of the current operation lives next to it in [`TimerState`],
//! guarded by the connection lock.
//!
//! # Coalescing
//!
//! Consecutive operations with the same timeout produce deadlines that drift
//! forward by a few microseconds each. Reprogramming the sleeping task for
//! every one of them is wasted work, so [`TimerState::arm`] only asks for a
//! reprogram when the new deadline differs from the programmed one by more
//! than `remaining / divisor`. Disarming just clears the `armed` flag and
//! leaves the task sleeping; a firing that finds the flag cleared is a no-op.
//!
//! ```text
//!   arm(d1) ──► programmed = d1 (reprogram)
//!   disarm  ──► armed = false       (task keeps sleeping)
//!   arm(d2) ──► |d2 - d1| small ──► armed = true, deadline = d2 (no reprogram)
//!   fire(d1) ─► armed && now >= d2 ─► expire
//!           └─► armed && now <  d2 ─► reprogram to d2
//!           └─► !armed            ─► stale, ignore
//! ```

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::fault::OperationKind;

/// Default coalescing divisor: tolerate drift of 1/16th of the remaining time
pub const DEFAULT_COALESCING_DIVISOR: u32 = 16;

/// Whether a timer programmed for `programmed` must move to `requested`
///
/// A divisor of zero disables coalescing.
#[must_use]
pub fn needs_reprogram(programmed: Instant, requested: Instant, now: Instant, divisor: u32) -> bool {
    if divisor == 0 {
        return programmed != requested;
    }
    let remaining = programmed.saturating_duration_since(now);
    let drift = if requested > programmed {
        requested - programmed
    } else {
        programmed - requested
    };
    drift > remaining / divisor
}

/// What a firing timer should do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Firing {
    /// Disarmed or superseded; nothing to do
    Stale,
    /// Fired before the logical deadline; sleep again until it
    Reprogram(Instant),
    /// The armed operation ran out of time
    Expired {
        /// Timeout the operation was armed with
        timeout: Duration,
    },
}

/// Timer bookkeeping for one direction
#[derive(Clone, Debug, Default)]
pub(crate) struct TimerState {
    armed: bool,
    deadline: Option<Instant>,
    timeout: Duration,
    programmed: Option<Instant>,
}

impl TimerState {
    /// Arm for an operation with `timeout` ending at `deadline`
    ///
    /// Returns `true` when the sleeping task has to be reprogrammed.
    pub(crate) fn arm(
        &mut self,
        now: Instant,
        deadline: Instant,
        timeout: Duration,
        divisor: u32,
    ) -> bool {
        self.armed = true;
        self.deadline = Some(deadline);
        self.timeout = timeout;

        let reprogram = match self.programmed {
            Some(programmed) => needs_reprogram(programmed, deadline, now, divisor),
            None => true,
        };
        if reprogram {
            self.programmed = Some(deadline);
        }
        reprogram
    }

    /// Mark the timer meaningless; safe to call any number of times
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
        self.deadline = None;
    }

    /// Disarm and forget the programmed instant
    pub(crate) fn cancel(&mut self) {
        self.disarm();
        self.programmed = None;
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.armed
    }

    pub(crate) fn programmed(&self) -> Option<Instant> {
        self.programmed
    }

    /// Handle the task waking up for `fired_at`
    pub(crate) fn on_fire(&mut self, now: Instant, fired_at: Instant) -> Firing {
        if self.programmed != Some(fired_at) {
            return Firing::Stale;
        }
        self.programmed = None;

        if !self.armed {
            return Firing::Stale;
        }

        match self.deadline {
            Some(deadline) if deadline > now => {
                self.programmed = Some(deadline);
                Firing::Reprogram(deadline)
            }
            _ => {
                self.disarm();
                Firing::Expired {
                    timeout: self.timeout,
                }
            }
        }
    }
}

// =============================================================================
// Timer task
// =============================================================================

/// What the timer task should do next
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Schedule {
    /// Sleep until woken
    Idle,
    /// Sleep until the instant or until woken
    At(Instant),
    /// The owner is gone or closed; exit
    Stop,
}

/// The owner of a pair of timers
pub(crate) trait TimerHost: Send + Sync + 'static {
    /// Current schedule of the `kind` timer
    fn schedule(&self, kind: OperationKind) -> Schedule;

    /// The `kind` timer reached the instant it was programmed for
    fn fire(&self, kind: OperationKind, fired_at: Instant);
}

/// Spawn the task driving the `kind` timer of `host`
///
/// The task holds only a weak reference, so it never keeps its host alive.
/// `wake` must be notified whenever the schedule changes and when the host
/// closes or drops.
pub(crate) fn spawn<H: TimerHost>(
    host: Weak<H>,
    kind: OperationKind,
    wake: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(run(host, kind, wake))
}

async fn run<H: TimerHost>(host: Weak<H>, kind: OperationKind, wake: Arc<Notify>) {
    loop {
        let schedule = match host.upgrade() {
            Some(host) => host.schedule(kind),
            None => Schedule::Stop,
        };

        match schedule {
            Schedule::Stop => break,
            Schedule::Idle => wake.notified().await,
            Schedule::At(at) => {
                tokio::select! {
                    () = tokio::time::sleep_until(at.into()) => {
                        match host.upgrade() {
                            Some(host) => host.fire(kind, at),
                            None => break,
                        }
                    }
                    () = wake.notified() => {}
                }
            }
        }
    }

    tracing::trace!(%kind, "timer task exiting");
}
