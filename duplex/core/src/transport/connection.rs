//! Duplex Connection
//!
//! A [`Connection`] owns one Unix stream socket and moves opaque byte buffers
//! over it. Reads and writes may overlap each other, but never themselves.
//!
//! # Lifecycle
//!
//! ```text
//!            close()                 drain read sees FIN
//!   Open ───────────────► Closing ─────────────────────► Closed
//!     │                      │                            ▲
//!     └──────────────────────┴──── abort() / timeout ─────┘
//! ```
//!
//! The socket handle is released exactly once, by whichever of abort,
//! timeout, fault or graceful close reaches `Closed` first; everyone else
//! finds the slot empty. In-flight transfers are woken through a watch
//! channel when that happens and report a fault derived from the recorded
//! abort/timeout state rather than a bare "handle gone" error.
//!
//! # Timeouts
//!
//! A timeout always aborts the whole connection: there is no way to cancel a
//! single in-flight transfer without tearing down the socket. The timeout is
//! recorded on the connection so every other operation observes the same
//! root cause.

use std::fmt;
use std::future::Future;
use std::net::Shutdown;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use socket2::SockRef;
use tokio::net::unix::UCred;
use tokio::net::UnixStream;
use tokio::sync::{watch, Notify, OwnedSemaphorePermit};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::budget::{self, DisplayTimeout, TimeoutBudget};
use super::completion::{self, Completion, CompletionSlot};
use super::config::ConnectionSettings;
use super::endpoint::Endpoint;
use super::error::{SocketFault, TransportError};
use super::fault::{self, FaultContext, OperationKind, TimeoutRecord, TransferFailure};
use super::timer::{self, Firing, Schedule, TimerHost, TimerState};

/// Longest linger period handed to the kernel
const MAX_LINGER: Duration = Duration::from_secs(u16::MAX as u64);

// =============================================================================
// Public Types
// =============================================================================

/// Unique identifier for a connection, used as the log correlation field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle phase of a connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Reads and writes are allowed
    Open,
    /// The send side is shut down and the close drain is running
    Closing,
    /// The socket has been released
    Closed,
}

/// Credentials of the process on the other end of the socket
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerCredentials {
    /// Peer user id
    pub uid: u32,
    /// Peer group id
    pub gid: u32,
    /// Peer process id, where the platform reports it
    pub pid: Option<i32>,
}

impl From<UCred> for PeerCredentials {
    fn from(cred: UCred) -> Self {
        Self {
            uid: cred.uid(),
            gid: cred.gid(),
            pid: cred.pid(),
        }
    }
}

/// Who is on the other end of a connection
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteIdentity {
    /// Endpoint the connection was dialled to (outbound connections)
    pub endpoint: Option<Endpoint>,
    /// Path the peer socket is bound to, if any
    pub peer_path: Option<PathBuf>,
    /// Peer process credentials
    pub credentials: Option<PeerCredentials>,
}

impl fmt::Display for RemoteIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(endpoint) = &self.endpoint {
            return write!(f, "{endpoint}");
        }
        if let Some(path) = &self.peer_path {
            return write!(f, "{}", Endpoint::new(path.clone()));
        }
        match self.credentials {
            Some(PeerCredentials { uid, pid: Some(pid), .. }) => {
                write!(f, "unix socket peer (pid {pid}, uid {uid})")
            }
            Some(PeerCredentials { uid, pid: None, .. }) => {
                write!(f, "unix socket peer (uid {uid})")
            }
            None => write!(f, "unnamed unix socket peer"),
        }
    }
}

/// Snapshot of a connection's counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Bytes received
    pub bytes_read: u64,
    /// Bytes sent
    pub bytes_written: u64,
    /// Completed reads
    pub reads: u64,
    /// Completed writes
    pub writes: u64,
    /// Transfers that completed on their first poll
    pub inline_completions: u64,
    /// Times a timer task had to be reprogrammed
    pub timer_reprograms: u64,
    /// Times the socket handle was released (0 or 1)
    pub handle_releases: u64,
}

#[derive(Debug, Default)]
struct StatsAtomic {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    inline_completions: AtomicU64,
    timer_reprograms: AtomicU64,
    handle_releases: AtomicU64,
}

impl StatsAtomic {
    fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            inline_completions: self.inline_completions.load(Ordering::Relaxed),
            timer_reprograms: self.timer_reprograms.load(Ordering::Relaxed),
            handle_releases: self.handle_releases.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

/// The socket plus the outbound permit that lives exactly as long as it
struct OwnedSocket {
    stream: Arc<UnixStream>,
    _permit: Option<OwnedSemaphorePermit>,
}

/// Everything guarded by the connection lock
struct ConnectionState {
    phase: ConnectionPhase,
    aborted: bool,
    timeout_fault: Option<TimeoutRecord>,
    socket: Option<OwnedSocket>,
    read_timer: TimerState,
    write_timer: TimerState,
}

impl ConnectionState {
    fn timer(&self, kind: OperationKind) -> &TimerState {
        match kind {
            OperationKind::Read => &self.read_timer,
            OperationKind::Write => &self.write_timer,
        }
    }

    fn timer_mut(&mut self, kind: OperationKind) -> &mut TimerState {
        match kind {
            OperationKind::Read => &mut self.read_timer,
            OperationKind::Write => &mut self.write_timer,
        }
    }

    /// First caller moves to `Closed` and gets the socket to release
    fn abort(&mut self, timeout: Option<TimeoutRecord>) -> Option<OwnedSocket> {
        if self.phase == ConnectionPhase::Closed {
            return None;
        }
        self.phase = ConnectionPhase::Closed;
        self.aborted = true;
        if self.timeout_fault.is_none() {
            self.timeout_fault = timeout;
        }
        self.read_timer.cancel();
        self.write_timer.cancel();
        self.socket.take()
    }
}

struct ConnectionInner {
    id: ConnectionId,
    endpoint: Option<Endpoint>,
    settings: ConnectionSettings,
    state: Mutex<ConnectionState>,
    torn_down: watch::Sender<bool>,
    read_wake: Arc<Notify>,
    write_wake: Arc<Notify>,
    read_slot: CompletionSlot,
    write_slot: CompletionSlot,
    stats: StatsAtomic,
    identity: OnceLock<RemoteIdentity>,
    label: OnceLock<String>,
    created_at: Instant,
    last_activity_nanos: AtomicU64,
}

/// Disarms its timer when dropped, whichever way the transfer ends
struct ArmedTimer<'a> {
    inner: &'a ConnectionInner,
    kind: OperationKind,
}

impl Drop for ArmedTimer<'_> {
    fn drop(&mut self) {
        self.inner.state.lock().timer_mut(self.kind).disarm();
    }
}

impl ConnectionInner {
    fn wake(&self, kind: OperationKind) -> &Arc<Notify> {
        match kind {
            OperationKind::Read => &self.read_wake,
            OperationKind::Write => &self.write_wake,
        }
    }

    fn slot(&self, kind: OperationKind) -> &CompletionSlot {
        match kind {
            OperationKind::Read => &self.read_slot,
            OperationKind::Write => &self.write_slot,
        }
    }

    fn identity(&self) -> &RemoteIdentity {
        self.identity.get_or_init(|| self.resolve_identity())
    }

    fn resolve_identity(&self) -> RemoteIdentity {
        let stream = self
            .state
            .lock()
            .socket
            .as_ref()
            .map(|socket| Arc::clone(&socket.stream));

        let (peer_path, credentials) = match stream {
            Some(stream) => (
                stream
                    .peer_addr()
                    .ok()
                    .and_then(|addr| addr.as_pathname().map(Path::to_path_buf)),
                stream.peer_cred().ok().map(PeerCredentials::from),
            ),
            None => (None, None),
        };

        RemoteIdentity {
            endpoint: self.endpoint.clone(),
            peer_path,
            credentials,
        }
    }

    /// Peer description for messages; never call with the state lock held
    fn peer_label(&self) -> &str {
        self.label.get_or_init(|| self.identity().to_string())
    }

    fn touch(&self) {
        let nanos = u64::try_from(self.created_at.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last_activity_nanos.store(nanos, Ordering::Relaxed);
    }

    fn idle_time(&self) -> Duration {
        let last = Duration::from_nanos(self.last_activity_nanos.load(Ordering::Relaxed));
        self.created_at.elapsed().saturating_sub(last)
    }

    /// Socket for a new transfer, or the fault explaining why there is none
    fn acquire(&self, kind: OperationKind, peer: &str) -> Result<Arc<UnixStream>, TransportError> {
        let state = self.state.lock();
        match (state.phase, &state.socket) {
            (ConnectionPhase::Closing, _) if kind == OperationKind::Write => {
                Err(TransportError::Disposed {
                    message: format!("write on {peer} was attempted after close began"),
                })
            }
            (ConnectionPhase::Open | ConnectionPhase::Closing, Some(socket)) => {
                Ok(Arc::clone(&socket.stream))
            }
            _ => Err(fault::translate_transfer(
                &TransferFailure::Disposed,
                &FaultContext {
                    operation: kind,
                    peer,
                    timeout_fault: state.timeout_fault.as_ref(),
                    aborted: state.aborted,
                    remaining: Duration::ZERO,
                },
            )),
        }
    }

    fn arm(
        &self,
        kind: OperationKind,
        timeout: Duration,
        peer: &str,
    ) -> Result<ArmedTimer<'_>, TransportError> {
        if timeout.is_zero() {
            return Err(TransportError::timeout(format!(
                "{kind} on {peer} timed out before it started: its timeout was already spent"
            )));
        }

        let armed = ArmedTimer { inner: self, kind };
        let now = Instant::now();

        let Some(deadline) = budget::deadline_after(now, timeout) else {
            self.state.lock().timer_mut(kind).disarm();
            return Ok(armed);
        };

        let reprogram = {
            let mut state = self.state.lock();
            if state.phase == ConnectionPhase::Closed {
                false
            } else {
                state.timer_mut(kind).arm(
                    now,
                    deadline,
                    timeout,
                    self.settings.timer_coalescing_divisor,
                )
            }
        };

        if reprogram {
            self.stats.timer_reprograms.fetch_add(1, Ordering::Relaxed);
            trace!(conn_id = %self.id, %kind, timeout = ?timeout, "timer reprogrammed");
            self.wake(kind).notify_one();
        }

        Ok(armed)
    }

    async fn run_transfer<F>(&self, transfer: F) -> Result<Completion, TransferFailure>
    where
        F: Future<Output = Result<Completion, SocketFault>>,
    {
        let torn_down = self.torn_down.subscribe();
        tokio::select! {
            biased;
            () = wait_torn_down(torn_down) => Err(TransferFailure::Disposed),
            result = transfer => result.map_err(TransferFailure::Socket),
        }
    }

    async fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        let peer = self.peer_label();
        let socket = self.acquire(OperationKind::Read, peer)?;
        let _slot = self.slot(OperationKind::Read).begin();
        let budget = TimeoutBudget::start(timeout);
        let armed = self.arm(OperationKind::Read, timeout, peer)?;

        let outcome = self
            .run_transfer(completion::receive(&socket, buf))
            .await;
        drop(armed);

        self.finish(OperationKind::Read, outcome, &budget, peer)
    }

    async fn write(
        &self,
        buf: &[u8],
        immediate: bool,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let peer = self.peer_label();
        let socket = self.acquire(OperationKind::Write, peer)?;
        let _slot = self.slot(OperationKind::Write).begin();
        let budget = TimeoutBudget::start(timeout);
        let armed = self.arm(OperationKind::Write, timeout, peer)?;

        trace!(conn_id = %self.id, bytes = buf.len(), immediate, "write");
        let outcome = self.run_transfer(completion::send(&socket, buf)).await;
        drop(armed);

        self.finish(OperationKind::Write, outcome, &budget, peer)
            .map(|_| ())
    }

    fn finish(
        &self,
        kind: OperationKind,
        outcome: Result<Completion, TransferFailure>,
        budget: &TimeoutBudget,
        peer: &str,
    ) -> Result<usize, TransportError> {
        match outcome {
            Ok(done) => {
                self.record(kind, done);
                Ok(done.bytes)
            }
            Err(failure) => {
                let err = self.translate(kind, &failure, budget, peer);
                debug!(conn_id = %self.id, %kind, error = %err, "transfer failed");
                if matches!(failure, TransferFailure::Socket(_)) {
                    self.abort(None);
                }
                Err(err)
            }
        }
    }

    fn record(&self, kind: OperationKind, done: Completion) {
        let bytes = done.bytes as u64;
        match kind {
            OperationKind::Read => {
                self.stats.bytes_read.fetch_add(bytes, Ordering::Relaxed);
                self.stats.reads.fetch_add(1, Ordering::Relaxed);
            }
            OperationKind::Write => {
                self.stats.bytes_written.fetch_add(bytes, Ordering::Relaxed);
                self.stats.writes.fetch_add(1, Ordering::Relaxed);
            }
        }
        if done.inline {
            self.stats.inline_completions.fetch_add(1, Ordering::Relaxed);
        }
        self.touch();
    }

    fn translate(
        &self,
        kind: OperationKind,
        failure: &TransferFailure,
        budget: &TimeoutBudget,
        peer: &str,
    ) -> TransportError {
        let state = self.state.lock();
        fault::translate_transfer(
            failure,
            &FaultContext {
                operation: kind,
                peer,
                timeout_fault: state.timeout_fault.as_ref(),
                aborted: state.aborted,
                remaining: budget.remaining(),
            },
        )
    }

    fn abort(&self, timeout: Option<TimeoutRecord>) {
        let released = self.state.lock().abort(timeout);
        if released.is_some() {
            debug!(
                conn_id = %self.id,
                read_pending = self.read_slot.is_busy(),
                write_pending = self.write_slot.is_busy(),
                "connection aborted"
            );
        }
        self.finish_teardown(released, Duration::ZERO, true);
    }

    /// Release the socket taken by whoever won the race to `Closed`
    fn finish_teardown(&self, released: Option<OwnedSocket>, linger: Duration, forced: bool) {
        let Some(socket) = released else {
            return;
        };

        // Counted before waking anyone: a transfer woken here reports a
        // fault that must already see the release
        let sock = SockRef::from(&*socket.stream);
        if let Err(err) = sock.set_linger(Some(linger.min(MAX_LINGER))) {
            trace!(conn_id = %self.id, error = %err, "setting linger failed");
        }
        self.stats.handle_releases.fetch_add(1, Ordering::Relaxed);

        // Wake before shutdown so a pending read never mistakes it for FIN
        self.torn_down.send_replace(true);
        self.read_wake.notify_one();
        self.write_wake.notify_one();

        if forced {
            if let Err(err) = sock.shutdown(Shutdown::Both) {
                trace!(conn_id = %self.id, error = %err, "shutdown during abort failed");
            }
        }
        drop(socket);
    }

    async fn close(&self, timeout: Duration) -> Result<(), TransportError> {
        let peer = self.peer_label();
        let budget = TimeoutBudget::start(timeout);

        let socket = {
            let mut state = self.state.lock();
            if state.phase != ConnectionPhase::Open {
                return Ok(());
            }
            let Some(socket) = state.socket.as_ref().map(|s| Arc::clone(&s.stream)) else {
                return Ok(());
            };
            state.phase = ConnectionPhase::Closing;
            socket
        };
        debug!(conn_id = %self.id, peer, timeout = %DisplayTimeout(timeout), "closing connection");

        // Half-close: the peer sees end of stream, we can still read
        if let Err(err) = SockRef::from(&*socket).shutdown(Shutdown::Write) {
            let failure = TransferFailure::Socket(SocketFault::from(err));
            return Err(self.translate(OperationKind::Write, &failure, &budget, peer));
        }
        drop(socket);

        let mut drain = [0u8; 1];
        match self.read(&mut drain, budget.remaining()).await {
            Ok(0) => {}
            Ok(_) => {
                return Err(TransportError::communication(format!(
                    "{peer} sent data after the connection began closing; expected end of stream"
                )));
            }
            Err(err) if err.is_timeout() => {
                return Err(TransportError::Timeout {
                    message: format!(
                        "closing the connection to {peer} did not complete within {}",
                        DisplayTimeout(budget.original())
                    ),
                    source: Some(Box::new(err)),
                });
            }
            Err(err) => return Err(err),
        }

        let released = {
            let mut state = self.state.lock();
            if state.phase == ConnectionPhase::Closed {
                None
            } else {
                state.phase = ConnectionPhase::Closed;
                state.read_timer.cancel();
                state.write_timer.cancel();
                state.socket.take()
            }
        };
        self.finish_teardown(released, budget.remaining(), false);

        info!(conn_id = %self.id, peer, "connection closed");
        Ok(())
    }
}

impl TimerHost for ConnectionInner {
    fn schedule(&self, kind: OperationKind) -> Schedule {
        let state = self.state.lock();
        if state.phase == ConnectionPhase::Closed {
            return Schedule::Stop;
        }
        match state.timer(kind).programmed() {
            Some(at) => Schedule::At(at),
            None => Schedule::Idle,
        }
    }

    fn fire(&self, kind: OperationKind, fired_at: Instant) {
        let peer = self.peer_label();
        let now = Instant::now();

        let (firing, released) = {
            let mut state = self.state.lock();
            if state.phase == ConnectionPhase::Closed {
                return;
            }
            let firing = state.timer_mut(kind).on_fire(now, fired_at);
            let released = match firing {
                Firing::Expired { timeout } => state.abort(Some(TimeoutRecord::new(
                    kind,
                    format!("{kind} on {peer} timed out after {}", DisplayTimeout(timeout)),
                ))),
                Firing::Stale | Firing::Reprogram(_) => None,
            };
            (firing, released)
        };

        match firing {
            Firing::Stale => {}
            Firing::Reprogram(at) => {
                self.stats.timer_reprograms.fetch_add(1, Ordering::Relaxed);
                trace!(conn_id = %self.id, %kind, remaining = ?at.saturating_duration_since(now), "timer fired early; reprogrammed");
            }
            Firing::Expired { timeout } => {
                warn!(
                    conn_id = %self.id,
                    %kind,
                    peer,
                    timeout = %DisplayTimeout(timeout),
                    "operation timed out; aborting connection"
                );
                self.finish_teardown(released, Duration::ZERO, true);
            }
        }
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        // Let both timer tasks notice the connection is gone
        self.read_wake.notify_one();
        self.write_wake.notify_one();
    }
}

async fn wait_torn_down(mut torn_down: watch::Receiver<bool>) {
    let _ = torn_down.wait_for(|down| *down).await;
}

// =============================================================================
// Connection
// =============================================================================

/// One live duplex stream over a Unix domain socket
///
/// Cloning is cheap and every clone drives the same socket, so a connection
/// can be read on one task, written on another and aborted from a third.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Wrap a connected stream
    ///
    /// Must be called from within a Tokio runtime: the read and write timer
    /// tasks are spawned here.
    pub(crate) fn new(
        stream: UnixStream,
        endpoint: Option<Endpoint>,
        settings: ConnectionSettings,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        let (torn_down, _) = watch::channel(false);
        let inner = Arc::new(ConnectionInner {
            id: ConnectionId::new(),
            endpoint,
            settings,
            state: Mutex::new(ConnectionState {
                phase: ConnectionPhase::Open,
                aborted: false,
                timeout_fault: None,
                socket: Some(OwnedSocket {
                    stream: Arc::new(stream),
                    _permit: permit,
                }),
                read_timer: TimerState::default(),
                write_timer: TimerState::default(),
            }),
            torn_down,
            read_wake: Arc::new(Notify::new()),
            write_wake: Arc::new(Notify::new()),
            read_slot: CompletionSlot::new(OperationKind::Read),
            write_slot: CompletionSlot::new(OperationKind::Write),
            stats: StatsAtomic::default(),
            identity: OnceLock::new(),
            label: OnceLock::new(),
            created_at: Instant::now(),
            last_activity_nanos: AtomicU64::new(0),
        });

        for kind in [OperationKind::Read, OperationKind::Write] {
            timer::spawn(Arc::downgrade(&inner), kind, Arc::clone(inner.wake(kind)));
        }

        Self { inner }
    }

    /// Connection id
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Current lifecycle phase
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        self.inner.state.lock().phase
    }

    /// Whether the connection was aborted (explicitly, by timeout or by a fault)
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.inner.state.lock().aborted
    }

    /// The timeout that aborted this connection, if one did
    #[must_use]
    pub fn timeout_fault(&self) -> Option<TimeoutRecord> {
        self.inner.state.lock().timeout_fault.clone()
    }

    /// Settings the connection was created with
    #[must_use]
    pub fn settings(&self) -> &ConnectionSettings {
        &self.inner.settings
    }

    /// Who is on the other end; resolved on first use and cached
    #[must_use]
    pub fn remote_identity(&self) -> &RemoteIdentity {
        self.inner.identity()
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> ConnectionStats {
        self.inner.stats.snapshot()
    }

    /// Time since the connection was established
    #[must_use]
    pub fn age(&self) -> Duration {
        self.inner.created_at.elapsed()
    }

    /// Time since the last completed transfer (or since creation)
    #[must_use]
    pub fn idle_time(&self) -> Duration {
        self.inner.idle_time()
    }

    /// Whether the connection outlived `idle_timeout` or `lease_timeout`
    #[must_use]
    pub fn is_stale(&self, idle_timeout: Duration, lease_timeout: Duration) -> bool {
        self.idle_time() > idle_timeout || self.age() > lease_timeout
    }

    /// [`Connection::is_stale`] against the configured pool timeouts
    #[must_use]
    pub fn is_expired(&self) -> bool {
        let pool = &self.inner.settings.pool;
        self.is_stale(pool.idle_timeout(), pool.lease_timeout())
    }

    /// Read into `buf`, returning the byte count (0 means the peer sent FIN)
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty buffer; otherwise the translated fault.
    /// Any fault other than a usage error leaves the connection aborted.
    pub async fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransportError> {
        if buf.is_empty() {
            return Err(TransportError::InvalidArgument(
                "read buffer must not be empty".to_string(),
            ));
        }
        self.inner.read(buf, timeout).await
    }

    /// Write all of `buf`
    ///
    /// `immediate` asks for the bytes to go out without batching; stream
    /// sockets never batch below this layer, so it is only traced.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty buffer, before any timer is armed or
    /// socket call made; otherwise the translated fault.
    pub async fn write(
        &self,
        buf: &[u8],
        immediate: bool,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        if buf.is_empty() {
            return Err(TransportError::InvalidArgument(
                "write buffer must not be empty".to_string(),
            ));
        }
        self.inner.write(buf, immediate, timeout).await
    }

    /// Close gracefully: half-close, wait for the peer's FIN, release
    ///
    /// A no-op once closing or closed. On failure the connection is aborted
    /// before the fault is returned.
    ///
    /// # Errors
    ///
    /// `Timeout` (wrapping the drain read's timeout) if the peer does not
    /// finish in time, `CommunicationFault` if it sends data instead.
    pub async fn close(&self, timeout: Duration) -> Result<(), TransportError> {
        let result = self.inner.close(timeout).await;
        if result.is_err() {
            self.inner.abort(None);
        }
        result
    }

    /// Tear the connection down immediately; idempotent and infallible
    pub fn abort(&self) {
        self.inner.abort(None);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.endpoint)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
