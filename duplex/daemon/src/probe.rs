//! Probe Client
//!
//! Sends random bytes through an echo peer while reading the echo back,
//! compares, then closes gracefully.

use std::time::{Duration, Instant};

use anyhow::{bail, ensure, Context, Result};
use rand::Rng;
use tracing::debug;

use duplex_core::{Connection, ConnectionInitiator, ConnectionSettings, ConnectionStats, Endpoint};

/// Outcome of a successful probe
#[derive(Debug)]
pub struct ProbeReport {
    /// Bytes sent and verified
    pub bytes: usize,
    /// Connect to close
    pub elapsed: Duration,
    /// Counters of the probe connection
    pub stats: ConnectionStats,
}

/// Probe the echo peer at `endpoint` with `bytes` random bytes
pub async fn run(
    endpoint: &Endpoint,
    settings: ConnectionSettings,
    bytes: usize,
    timeout: Duration,
) -> Result<ProbeReport> {
    ensure!(bytes > 0, "probe needs at least one byte");

    let started = Instant::now();
    let close_timeout = settings.close_timeout();
    let connect_timeout = settings.connect_timeout();

    let initiator = ConnectionInitiator::new(settings);
    let connection = initiator
        .connect(endpoint, connect_timeout)
        .await
        .with_context(|| format!("Failed to connect to {endpoint}"))?;

    let mut payload = vec![0u8; bytes];
    rand::thread_rng().fill(&mut payload[..]);

    // Write and read concurrently so payloads larger than the socket
    // buffers cannot deadlock against the echo
    let (written, echoed) = tokio::join!(
        connection.write(&payload, true, timeout),
        read_exact(&connection, bytes, timeout)
    );
    written.context("Failed to send probe payload")?;
    let echoed = echoed?;

    if echoed != payload {
        connection.abort();
        let first = payload
            .iter()
            .zip(&echoed)
            .position(|(a, b)| a != b)
            .unwrap_or(0);
        bail!("echo from {endpoint} differs from the payload at byte {first}");
    }

    connection
        .close(close_timeout)
        .await
        .context("Failed to close probe connection")?;

    Ok(ProbeReport {
        bytes,
        elapsed: started.elapsed(),
        stats: connection.stats(),
    })
}

async fn read_exact(connection: &Connection, bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
    let mut echoed = vec![0u8; bytes];
    let mut filled = 0;

    while filled < bytes {
        let n = connection
            .read(&mut echoed[filled..], timeout)
            .await
            .context("Failed to read echo")?;
        if n == 0 {
            bail!("peer closed after echoing {filled} of {bytes} bytes");
        }
        filled += n;
        debug!(filled, bytes, "echo progress");
    }

    Ok(echoed)
}
