//! Duplex Core - Timeout-Aware Unix Socket Connections
//!
//! This crate provides a duplex, stream-oriented transport connection over
//! Unix domain sockets: concurrent reads and writes, per-operation timeouts,
//! a graceful close that waits for the peer's end of stream, and an abort
//! that can be issued from anywhere at any time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                   Connection Initiator / Listener                 │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ Open
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                          Connection                               │
//! │  ┌──────────────┐  ┌──────────────┐  ┌─────────────────────────┐ │
//! │  │ read / write │  │    close     │  │ abort (any thread, any  │ │
//! │  │  completions │  │ half-close + │  │ state, exactly one      │ │
//! │  │              │  │ FIN drain    │  │ handle release)         │ │
//! │  └──────┬───────┘  └──────┬───────┘  └────────────┬────────────┘ │
//! │         │                 │                       │              │
//! │  ┌──────┴─────────────────┴───────────────────────┴───────────┐  │
//! │  │  read timer │ write timer  (coalesced, expiry = abort)      │  │
//! │  └─────────────────────────────────────────────────────────────┘  │
//! │                                 │                                 │
//! │                      fault translation                           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use duplex_core::{ConnectionInitiator, ConnectionSettings, Endpoint};
//!
//! let initiator = ConnectionInitiator::new(ConnectionSettings::default());
//! let endpoint: Endpoint = "unix:///run/user/1000/duplex/duplex.sock".parse()?;
//!
//! let conn = initiator.connect(&endpoint, Duration::from_secs(5)).await?;
//! conn.write(b"hello", true, Duration::from_secs(1)).await?;
//!
//! let mut buf = [0u8; 64];
//! let n = conn.read(&mut buf, Duration::from_secs(1)).await?;
//!
//! conn.close(Duration::from_secs(10)).await?;
//! ```
//!
//! # Module Overview
//!
//! - [`transport`]: connections, initiator, listener, timers and fault translation
//! - [`config`]: TOML/env configuration loading

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod transport;

// Transport exports
pub use transport::{
    connect, Connection, ConnectionId, ConnectionInitiator, ConnectionListener, ConnectionPhase,
    ConnectionSettings, ConnectionStats, Endpoint, ListenerSettings, OperationKind, PoolSettings,
    RemoteIdentity, TimeoutRecord, TransportError, INFINITE,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, DuplexConfig, DuplexToml,
};
