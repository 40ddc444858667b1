//! `abp-over-udp` — a reliable, in-order byte stream between one client and
//! one server, built on UDP with the alternating-bit protocol.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐  connect()        accept()  ┌──────────┐
//!  │  client  │──────────┐      ┌───────────│  server  │
//!  └──────────┘          ▼      ▼           └──────────┘
//!                  ┌──────────────────┐
//!                  │    Connection    │  write / read / read_exact
//!                  │ Sender, Receiver │  ── run() ──▶ Session
//!                  └────────┬─────────┘
//!                           │ encode / parse
//!                  ┌────────▼─────────┐
//!                  │      packet      │── checksum
//!                  └────────┬─────────┘
//!                           │ raw datagrams
//!                  ┌────────▼─────────┐
//!                  │    Simulator     │  (loss + stats)
//!                  │      Socket      │  (tokio UdpSocket)
//!                  └──────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`checksum`]    — 16-bit one's-complement checksum
//! - [`packet`]      — wire format, sequence bit, protocol constants
//! - [`config`]      — per-endpoint parameters
//! - [`connection`]  — stop-and-wait send/receive/retry state machine
//! - [`client`]      — active handshake
//! - [`server`]      — passive handshake, single-client lifetime
//! - [`session`]     — concurrent mode with a background receive task
//! - [`sender`]      — outbound sequence state and the in-flight packet
//! - [`receiver`]    — inbound sequence state and the application buffer
//! - [`state`]       — connection life-cycle states
//! - [`simulator`]   — random packet loss and traffic counters
//! - [`socket`]      — async UDP socket abstraction
//!
//! ```ignore
//! let mut server = Server::bind("0.0.0.0:8080".parse()?, EndpointConfig::default()).await?;
//! server.accept().await?;
//! let greeting = server.read().await?;
//!
//! // elsewhere
//! let mut conn = client::connect(server_addr, EndpointConfig::default()).await?;
//! conn.write(b"hello world").await?;
//! ```

pub mod checksum;
pub mod client;
pub mod config;
pub mod connection;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;

pub use config::{EndpointConfig, Retransmit};
pub use connection::{ConnError, Connection, HandshakeError};
pub use server::Server;
pub use session::Session;
pub use simulator::Stats;
