//! End-to-end connection tests over real Unix domain sockets
//!
//! Each test binds its own socket under a temporary directory.

use std::time::{Duration, Instant};

use duplex_core::transport::{
    Connection, ConnectionInitiator, ConnectionListener, ConnectionPhase, ConnectionSettings,
    ConnectionStats, Endpoint, ListenerSettings, TransportError, INFINITE,
};
use pretty_assertions::assert_eq;
use rand::Rng;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;

const SECOND: Duration = Duration::from_secs(1);

// =============================================================================
// Helpers
// =============================================================================

struct Pair {
    _dir: TempDir,
    endpoint: Endpoint,
    client: Connection,
    server: Connection,
}

async fn connected_pair(settings: ConnectionSettings) -> Pair {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("duplex.sock");
    let listener = ConnectionListener::bind(
        settings.clone(),
        &ListenerSettings {
            socket_path: Some(path.clone()),
            ..Default::default()
        },
    )
    .unwrap();

    let initiator = ConnectionInitiator::new(settings);
    let endpoint = Endpoint::new(&path);
    let (client, server) = tokio::join!(
        initiator.connect(&endpoint, 5 * SECOND),
        listener.accept()
    );

    Pair {
        _dir: dir,
        endpoint,
        client: client.unwrap(),
        server: server.unwrap(),
    }
}

/// Echo until FIN, then close like a well-behaved peer
async fn echo_then_close(conn: Connection) -> Result<u64, TransportError> {
    let mut buf = vec![0u8; conn.settings().buffer_size];
    let mut total = 0;
    loop {
        let n = conn.read(&mut buf, 5 * SECOND).await?;
        if n == 0 {
            conn.close(5 * SECOND).await?;
            return Ok(total);
        }
        conn.write(&buf[..n], true, 5 * SECOND).await?;
        total += n as u64;
    }
}

async fn read_exact(conn: &Connection, len: usize) -> Result<Vec<u8>, TransportError> {
    let mut out = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = conn.read(&mut out[filled..], 5 * SECOND).await?;
        assert_ne!(n, 0, "peer closed after {filled} of {len} bytes");
        filled += n;
    }
    Ok(out)
}

// =============================================================================
// Abort
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abort_from_many_threads_releases_once() {
    let pair = connected_pair(ConnectionSettings::default()).await;

    let reader = pair.client.clone();
    let pending = tokio::spawn(async move {
        let mut buf = [0u8; 16];
        reader.read(&mut buf, 30 * SECOND).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let conn = pair.client.clone();
            scope.spawn(move || conn.abort());
        }
    });

    assert_eq!(pair.client.stats().handle_releases, 1);
    assert_eq!(pair.client.phase(), ConnectionPhase::Closed);

    let result = tokio::time::timeout(SECOND, pending).await.unwrap().unwrap();
    assert!(result.unwrap_err().is_aborted());

    let mut buf = [0u8; 4];
    let err = pair.client.read(&mut buf, SECOND).await.unwrap_err();
    assert!(err.is_aborted());
}

// =============================================================================
// Timeouts
// =============================================================================

#[tokio::test]
async fn test_read_timeout_fails_blocked_write_with_wrapped_timeout() {
    let pair = connected_pair(ConnectionSettings::new().with_buffer_size(4096)).await;

    // Far more than the socket buffers hold; the server never reads
    let payload = vec![0x5au8; 8 * 1024 * 1024];
    let mut buf = [0u8; 16];

    let (read, write) = tokio::join!(
        pair.client.read(&mut buf, Duration::from_millis(50)),
        pair.client.write(&payload, false, 30 * SECOND)
    );

    let read_err = read.unwrap_err();
    assert!(read_err.is_timeout(), "read: {read_err:?}");

    let write_err = write.unwrap_err();
    match &write_err {
        TransportError::CommunicationFault { source, .. } => {
            let inner = source.as_deref().unwrap();
            assert!(inner.is_timeout());
            assert!(inner.to_string().contains(&pair.endpoint.to_string()));
        }
        other => panic!("expected communication fault, got {other:?}"),
    }

    let record = pair.client.timeout_fault().unwrap();
    assert_eq!(record.kind(), duplex_core::OperationKind::Read);
    assert_eq!(pair.client.stats().handle_releases, 1);
}

#[tokio::test]
async fn test_sequential_reads_coalesce_timer_reprograms() {
    let pair = connected_pair(ConnectionSettings::default()).await;

    pair.server.write(&[7u8; 1000], true, SECOND).await.unwrap();

    let mut byte = [0u8; 1];
    for _ in 0..1000 {
        let n = pair.client.read(&mut byte, 30 * SECOND).await.unwrap();
        assert_eq!(n, 1);
    }

    let stats = pair.client.stats();
    assert_eq!(stats.reads, 1000);
    assert!(
        stats.timer_reprograms <= 10,
        "timer reprogrammed {} times",
        stats.timer_reprograms
    );
}

#[tokio::test]
async fn test_disabled_coalescing_reprograms_every_read() {
    let settings = ConnectionSettings::new().with_timer_coalescing_divisor(0);
    let pair = connected_pair(settings).await;

    pair.server.write(&[1u8; 20], true, SECOND).await.unwrap();

    let mut byte = [0u8; 1];
    for _ in 0..20 {
        pair.client.read(&mut byte, 30 * SECOND).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert!(pair.client.stats().timer_reprograms > 10);
}

// =============================================================================
// Usage errors
// =============================================================================

#[tokio::test]
async fn test_zero_length_write_has_no_side_effects() {
    let pair = connected_pair(ConnectionSettings::default()).await;

    let err = pair.client.write(&[], true, SECOND).await.unwrap_err();
    assert!(matches!(err, TransportError::InvalidArgument(_)));

    assert_eq!(pair.client.stats(), ConnectionStats::default());
    assert_eq!(pair.client.phase(), ConnectionPhase::Open);
    assert!(!pair.client.is_aborted());
}

// =============================================================================
// Graceful close
// =============================================================================

#[tokio::test]
async fn test_close_drains_fin_promptly() {
    let pair = connected_pair(ConnectionSettings::default()).await;
    let server = tokio::spawn(echo_then_close(pair.server.clone()));

    let started = Instant::now();
    pair.client.close(5 * SECOND).await.unwrap();
    assert!(started.elapsed() < SECOND, "close took {:?}", started.elapsed());

    assert_eq!(server.await.unwrap().unwrap(), 0);
    assert_eq!(pair.client.phase(), ConnectionPhase::Closed);
    assert!(!pair.client.is_aborted());
    assert_eq!(pair.client.stats().handle_releases, 1);

    let mut buf = [0u8; 4];
    let err = pair.client.read(&mut buf, SECOND).await.unwrap_err();
    assert!(matches!(err, TransportError::Disposed { .. }));
}

#[tokio::test]
async fn test_late_data_during_close_is_a_fault() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("late.sock");
    let listener = UnixListener::bind(&path).unwrap();
    let endpoint = Endpoint::new(&path);

    let peer = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        stream.write_all(b"late").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let conn = ConnectionInitiator::default()
        .connect(&endpoint, SECOND)
        .await
        .unwrap();

    let err = conn.close(5 * SECOND).await.unwrap_err();
    assert!(matches!(err, TransportError::CommunicationFault { .. }));
    assert!(err.to_string().contains(&endpoint.to_string()));
    assert!(conn.is_aborted());

    peer.await.unwrap();
}

#[tokio::test]
async fn test_close_timeout_wraps_drain_timeout() {
    let pair = connected_pair(ConnectionSettings::default()).await;

    let err = pair.client.close(Duration::from_millis(50)).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(err.inner().is_some_and(TransportError::is_timeout));
    assert!(pair.client.is_aborted());
}

// =============================================================================
// Data transfer
// =============================================================================

#[tokio::test]
async fn test_round_trip_around_buffer_size() {
    let buffer_size = 4096;
    let settings = ConnectionSettings::new().with_buffer_size(buffer_size);

    for len in [1, buffer_size - 1, buffer_size, buffer_size + 1, 10 * buffer_size] {
        let pair = connected_pair(settings.clone()).await;
        let server = tokio::spawn(echo_then_close(pair.server.clone()));

        let mut payload = vec![0u8; len];
        rand::thread_rng().fill(&mut payload[..]);

        let (written, echoed) = tokio::join!(
            pair.client.write(&payload, true, 5 * SECOND),
            read_exact(&pair.client, len)
        );
        written.unwrap();
        assert_eq!(echoed.unwrap(), payload, "payload of {len} bytes");

        pair.client.close(5 * SECOND).await.unwrap();
        assert_eq!(server.await.unwrap().unwrap(), len as u64);

        let stats = pair.client.stats();
        assert_eq!(stats.bytes_written, len as u64);
        assert_eq!(stats.bytes_read, len as u64);
    }
}

// =============================================================================
// Connect
// =============================================================================

#[tokio::test]
async fn test_zero_timeout_connect_is_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = Endpoint::new(dir.path().join("missing.sock"));

    let err = ConnectionInitiator::default()
        .connect(&endpoint, Duration::ZERO)
        .await
        .unwrap_err();

    // A missing endpoint would otherwise be EndpointNotFound
    assert!(err.is_timeout(), "unexpected error: {err:?}");
}

#[tokio::test]
async fn test_missing_endpoint_reports_time_spent_only_when_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = Endpoint::new(dir.path().join("missing.sock"));
    let initiator = ConnectionInitiator::default();

    let bounded = initiator.connect(&endpoint, SECOND).await.unwrap_err();
    assert!(matches!(bounded, TransportError::EndpointNotFound { .. }));
    assert!(bounded.to_string().contains(" after "));

    let unbounded = initiator.connect(&endpoint, INFINITE).await.unwrap_err();
    assert!(matches!(unbounded, TransportError::EndpointNotFound { .. }));
    assert!(!unbounded.to_string().contains(" after "));
}

#[tokio::test]
async fn test_endpoint_uri_parsing_connects() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("uri.sock");
    let _listener = UnixListener::bind(&path).unwrap();

    let endpoint: Endpoint = format!("unix://{}", path.display()).parse().unwrap();
    let conn = duplex_core::connect(&endpoint, SECOND).await.unwrap();
    assert_eq!(conn.phase(), ConnectionPhase::Open);
    assert_eq!(conn.remote_identity().to_string(), endpoint.to_string());
}
