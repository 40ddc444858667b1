//! Per-connection transport endpoint: the alternating-bit send/receive/retry
//! state machine shared by both roles.
//!
//! A [`Connection`] is created by a successful handshake, either actively
//! ([`Connection::connect`], see [`crate::client`]) or passively
//! ([`crate::server::Server::accept`]).  From then on both roles expose the
//! same contract:
//!
//! - [`write`](Connection::write) splits data into chunks of at most
//!   `chunk_size` bytes.  Each chunk is sent with the current `write_seq` and
//!   retransmitted unchanged until an ack for `write_seq` arrives; only then
//!   does the next chunk start.  There is no pipelining.
//! - [`read`](Connection::read) / [`read_exact`](Connection::read_exact)
//!   wait for in-sequence data, ack it and toggle `read_seq`.  Duplicates are
//!   re-acked with the other bit and not delivered again.  Corrupt datagrams
//!   are dropped without an ack; the sender's timeout covers them.
//!
//! Datagrams from any address other than the peer fixed at handshake are
//! ignored.
//!
//! # Synchronous design
//!
//! One task drives a `Connection` at a time (`&mut self`).  While a write
//! waits for its ack it still applies the receive rules to incoming data and
//! buffers it for the next read, so two peers that both write never deadlock
//! on a lost ack.  For a background receiver see [`Connection::run`].

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{timeout_at, Instant};

use crate::config::{EndpointConfig, Retransmit};
use crate::packet::{Packet, PacketError};
use crate::receiver::{Delivery, Receiver};
use crate::sender::Sender;
use crate::simulator::{Simulator, Stats};
use crate::socket::SocketError;
use crate::state::ConnectionState;

/// Which side of the handshake an endpoint played.  Only used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub(crate) fn tag(self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Server => "server",
        }
    }
}

/// Why a handshake was rejected.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("no handshake response before the timeout")]
    Timeout,

    #[error("handshake response from {actual}, expected {expected}")]
    UnexpectedPeer {
        expected: SocketAddr,
        actual: SocketAddr,
    },

    #[error("malformed handshake response: {0}")]
    Malformed(PacketError),

    #[error("handshake response carried the wrong marker")]
    WrongMarker,
}

/// Errors surfaced by connection operations.
///
/// Lost, corrupt and duplicate datagrams are never errors; they show up only
/// as retransmissions.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error("handshake failed: {0}")]
    HandshakeFailed(#[from] HandshakeError),

    /// A bounded write gave up.  Delivery of the last chunk is unknown.
    #[error("no acknowledgment after {attempts} transmissions")]
    MaxRetriesExceeded { attempts: u32 },

    #[error("server already accepted a client")]
    AlreadyConnected,

    #[error("no client accepted yet")]
    NotConnected,

    #[error("connection is broken after an unacknowledged write")]
    Broken,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("session receive task has stopped")]
    SessionClosed,
}

/// What one bounded wait on the socket produced.
enum Incoming {
    Packet(Packet),
    Corrupt,
    TimedOut,
}

/// An established alternating-bit connection to exactly one peer.
#[derive(Debug)]
pub struct Connection {
    /// Current life-cycle state.
    pub state: ConnectionState,

    /// Outbound sequence state and in-flight packet.
    pub sender: Sender,

    /// Inbound sequence state and delivered-but-unread bytes.
    pub receiver: Receiver,

    link: Simulator,
    peer: SocketAddr,
    config: EndpointConfig,
    role: Role,
}

impl Connection {
    /// Wrap a link whose handshake with `peer` just completed.
    pub(crate) fn established(
        link: Simulator,
        peer: SocketAddr,
        config: EndpointConfig,
        role: Role,
    ) -> Self {
        log::info!("[{}] established with {peer}", role.tag());
        Self {
            state: ConnectionState::Established,
            sender: Sender::new(),
            receiver: Receiver::new(),
            link,
            peer,
            config,
            role,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.link.local_addr()
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn stats(&self) -> Stats {
        self.link.stats()
    }

    /// Split into the parts a [`crate::session::Session`] is built from.
    pub(crate) fn into_parts(self) -> (Simulator, SocketAddr, EndpointConfig, Role, Sender, Receiver) {
        (
            self.link,
            self.peer,
            self.config,
            self.role,
            self.sender,
            self.receiver,
        )
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Reliably deliver `data`, chunk by chunk.
    ///
    /// Returns once every chunk is acknowledged.  With
    /// [`Retransmit::Bounded`] a chunk that stays unacknowledged fails the
    /// call with [`ConnError::MaxRetriesExceeded`] and leaves the connection
    /// [`ConnectionState::Broken`]; chunks before it were delivered, the
    /// failing one may or may not have been.  An empty `data` sends nothing.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), ConnError> {
        self.ensure_established()?;

        for chunk in data.chunks(self.config.chunk_size) {
            self.send_chunk(chunk).await?;
        }
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), ConnError> {
        let bytes = self.sender.load(chunk)?.to_vec();
        let seq = self.sender.write_seq;

        loop {
            if let Retransmit::Bounded(max) = self.config.retransmit {
                let attempts = self.sender.retransmit_count();
                if attempts >= max {
                    self.sender.abandon();
                    self.state = ConnectionState::Broken;
                    log::warn!(
                        "[{}] giving up on seq={seq} after {attempts} transmissions",
                        self.role.tag()
                    );
                    return Err(ConnError::MaxRetriesExceeded { attempts });
                }
            }

            self.sender.on_transmit();
            let sent = self.link.send(&bytes, self.peer).await?;
            log::debug!(
                "[{}] → DATA seq={seq} len={} try={}{}",
                self.role.tag(),
                chunk.len(),
                self.sender.retransmit_count(),
                if sent { "" } else { " (lost)" }
            );

            if self.await_ack().await? {
                log::debug!("[{}] ← ACK seq={seq}", self.role.tag());
                return Ok(());
            }
        }
    }

    /// Wait one timeout period for the in-flight packet's ack.
    ///
    /// Returns `Ok(false)` when the caller should retransmit: the wait timed
    /// out, or the datagram that arrived was not the ack.
    async fn await_ack(&mut self) -> Result<bool, ConnError> {
        match self.recv_packet(true).await? {
            Incoming::Packet(pkt) if pkt.is_ack() => Ok(self.sender.on_ack(pkt.seq)),
            Incoming::Packet(pkt) => {
                self.on_data(&pkt).await?;
                Ok(false)
            }
            Incoming::Corrupt | Incoming::TimedOut => Ok(false),
        }
    }

    // -----------------------------------------------------------------------
    // Receiving
    // -----------------------------------------------------------------------

    /// Receive the next delivered data.
    ///
    /// Returns everything already buffered if there is anything, otherwise
    /// waits (without a deadline) for the next in-sequence packet.
    pub async fn read(&mut self) -> Result<Vec<u8>, ConnError> {
        self.ensure_established()?;

        while self.receiver.buffered() == 0 {
            self.pump().await?;
        }
        Ok(self.receiver.drain())
    }

    /// Receive exactly `n` bytes, waiting as long as it takes.
    ///
    /// Bytes beyond `n` that arrived in the same packet stay buffered for
    /// the next read.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, ConnError> {
        self.ensure_established()?;

        loop {
            if let Some(bytes) = self.receiver.take(n) {
                return Ok(bytes);
            }
            self.pump().await?;
        }
    }

    /// Keep acknowledging the peer for `period` before the connection is
    /// dropped.
    ///
    /// The ack for the last chunk a peer sends goes out once; if it is lost
    /// the peer retransmits and needs another ack for its write to finish.
    /// Call this on the side that reads last.  Data that arrives meanwhile
    /// is buffered as usual.
    pub async fn linger(&mut self, period: Duration) -> Result<(), ConnError> {
        self.ensure_established()?;

        let deadline = Instant::now() + period;
        log::debug!("[{}] lingering for {period:?}", self.role.tag());
        loop {
            match timeout_at(deadline, self.pump()).await {
                Ok(pumped) => pumped?,
                Err(_elapsed) => return Ok(()),
            }
        }
    }

    /// Process one datagram from the peer while waiting for data.
    async fn pump(&mut self) -> Result<(), ConnError> {
        match self.recv_packet(false).await? {
            Incoming::Packet(pkt) if pkt.is_ack() => {
                // A late duplicate ack for our last write.
                log::trace!("[{}] stray ACK seq={}", self.role.tag(), pkt.seq);
            }
            Incoming::Packet(pkt) => self.on_data(&pkt).await?,
            Incoming::Corrupt | Incoming::TimedOut => {}
        }
        Ok(())
    }

    /// Apply the receive rules to a data packet and ack it.
    async fn on_data(&mut self, pkt: &Packet) -> Result<(), ConnError> {
        let delivery = self.receiver.on_packet(pkt);
        match delivery {
            Delivery::Accepted { ack } => log::debug!(
                "[{}] ← DATA seq={ack} len={}; → ACK",
                self.role.tag(),
                pkt.payload.len()
            ),
            Delivery::Duplicate { ack } => log::debug!(
                "[{}] ← duplicate seq={}; → ACK seq={ack}",
                self.role.tag(),
                pkt.seq
            ),
        }
        let ack = Packet::ack(delivery.ack()).encode()?;
        self.link.send(&ack, self.peer).await?;
        Ok(())
    }

    /// Receive the next datagram from the peer and parse it.
    ///
    /// With `bounded` the wait ends after the configured timeout; datagrams
    /// from other addresses are skipped without restarting the clock.
    async fn recv_packet(&mut self, bounded: bool) -> Result<Incoming, ConnError> {
        let deadline = Instant::now() + self.config.timeout;

        loop {
            let (bytes, from) = if bounded {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self.link.recv_timeout(remaining).await? {
                    Some(received) => received,
                    None => return Ok(Incoming::TimedOut),
                }
            } else {
                self.link.recv_from().await?
            };

            if from != self.peer {
                log::trace!("[{}] ignoring datagram from {from}", self.role.tag());
                continue;
            }

            return Ok(match Packet::parse(&bytes) {
                Ok(pkt) => Incoming::Packet(pkt),
                Err(e) => {
                    log::debug!("[{}] dropping corrupt datagram: {e}", self.role.tag());
                    Incoming::Corrupt
                }
            });
        }
    }

    fn ensure_established(&self) -> Result<(), ConnError> {
        match self.state {
            ConnectionState::Established => Ok(()),
            ConnectionState::Broken => Err(ConnError::Broken),
            ConnectionState::Listening => Err(ConnError::NotConnected),
        }
    }
}
