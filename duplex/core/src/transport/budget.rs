//! Timeout budgets
//!
//! A [`TimeoutBudget`] tracks how much of a caller-supplied timeout is left as
//! an operation moves through several steps (a close spends part of its budget
//! on the half-close and hands the rest to the drain read and the linger).
//!
//! `Duration::MAX` is the infinite timeout throughout the transport.

use std::fmt;
use std::time::{Duration, Instant};

/// The infinite timeout
pub const INFINITE: Duration = Duration::MAX;

/// Whether `timeout` means "wait forever"
#[must_use]
pub fn is_infinite(timeout: Duration) -> bool {
    timeout == INFINITE
}

/// Absolute deadline for `timeout` starting at `now`, `None` when unbounded
#[must_use]
pub fn deadline_after(now: Instant, timeout: Duration) -> Option<Instant> {
    if is_infinite(timeout) {
        None
    } else {
        now.checked_add(timeout)
    }
}

/// Remaining portion of a timeout started at a fixed instant
#[derive(Clone, Copy, Debug)]
pub struct TimeoutBudget {
    original: Duration,
    started: Instant,
    deadline: Option<Instant>,
}

impl TimeoutBudget {
    /// Start spending `timeout` now
    #[must_use]
    pub fn start(timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            original: timeout,
            started,
            deadline: deadline_after(started, timeout),
        }
    }

    /// The timeout the budget was started with
    #[must_use]
    pub fn original(&self) -> Duration {
        self.original
    }

    /// Whether the budget never runs out
    #[must_use]
    pub fn is_infinite(&self) -> bool {
        self.deadline.is_none()
    }

    /// Time left before the deadline; [`INFINITE`] for unbounded budgets
    #[must_use]
    pub fn remaining(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => INFINITE,
        }
    }

    /// Time spent since the budget started
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether a bounded budget has nothing left
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        !self.is_infinite() && self.remaining().is_zero()
    }
}

/// Renders a timeout for fault messages (`"infinite"` for [`INFINITE`])
#[derive(Clone, Copy, Debug)]
pub struct DisplayTimeout(pub Duration);

impl fmt::Display for DisplayTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if is_infinite(self.0) {
            write!(f, "infinite")
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}
