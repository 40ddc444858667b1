//! Passive open: the server half of the handshake.
//!
//! A [`Server`] binds once and serves exactly one client for its lifetime.
//! [`accept`](Server::accept) waits without a deadline for a valid
//! handshake request (sequence 0, request marker), fixes the sender as the
//! sole peer and replies with the handshake response at sequence 1.  The
//! per-attempt timeout applies only to the traffic that follows.
//!
//! After `accept` the server exposes the same `write`/`read` contract as the
//! client side.

use std::net::SocketAddr;

use crate::config::EndpointConfig;
use crate::connection::{ConnError, Connection, Role};
use crate::packet::{self, SeqBit, HANDSHAKE_REQUEST, HANDSHAKE_RESPONSE};
use crate::simulator::{Simulator, Stats};
use crate::socket::Socket;
use crate::state::ConnectionState;

/// A single-client server endpoint.
#[derive(Debug)]
pub struct Server {
    /// Bound link while waiting for the handshake.  `None` once accepted.
    listener: Option<Simulator>,
    conn: Option<Connection>,
    local_addr: SocketAddr,
    config: EndpointConfig,
}

impl Server {
    /// Bind to `addr`.  Port 0 lets the OS pick one; see
    /// [`local_addr`](Self::local_addr).
    pub async fn bind(addr: SocketAddr, config: EndpointConfig) -> Result<Self, ConnError> {
        config.validate()?;
        let socket = Socket::bind(addr).await?;
        let local_addr = socket.local_addr;
        log::info!("[server] listening on {local_addr}");
        Ok(Self {
            listener: Some(Simulator::new(socket, &config)),
            conn: None,
            local_addr,
            config,
        })
    }

    /// Wait for a client's handshake and make it the sole peer.
    ///
    /// Returns [`ConnError::AlreadyConnected`] if a client was already
    /// accepted.
    pub async fn accept(&mut self) -> Result<SocketAddr, ConnError> {
        let Some(link) = self.listener.as_ref() else {
            return Err(ConnError::AlreadyConnected);
        };

        let peer = loop {
            let (bytes, from) = link.recv_from().await?;
            match packet::decode(SeqBit::Zero, &bytes) {
                Ok(payload) if payload == HANDSHAKE_REQUEST => break from,
                Ok(_) => log::debug!("[server] ignoring non-handshake datagram from {from}"),
                Err(e) if e.is_corrupt() => {
                    log::debug!("[server] ignoring invalid datagram from {from}: {e}")
                }
                Err(e) => log::debug!("[server] ignoring out-of-sequence datagram from {from}: {e}"),
            }
        };
        log::debug!("[server] ← handshake request from {peer}");

        let response = packet::encode(SeqBit::One, HANDSHAKE_RESPONSE)?;
        link.send_reliable(&response, peer).await?;
        log::debug!("[server] → handshake response to {peer}");

        if let Some(link) = self.listener.take() {
            self.conn = Some(Connection::established(
                link,
                peer,
                self.config.clone(),
                Role::Server,
            ));
        }
        Ok(peer)
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<(), ConnError> {
        self.connection_mut()?.write(data).await
    }

    pub async fn read(&mut self) -> Result<Vec<u8>, ConnError> {
        self.connection_mut()?.read().await
    }

    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, ConnError> {
        self.connection_mut()?.read_exact(n).await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The accepted client, if any.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.conn.as_ref().map(Connection::peer_addr)
    }

    pub fn state(&self) -> ConnectionState {
        self.conn
            .as_ref()
            .map_or(ConnectionState::Listening, |c| c.state)
    }

    pub fn stats(&self) -> Stats {
        match (&self.listener, &self.conn) {
            (Some(link), _) => link.stats(),
            (None, Some(conn)) => conn.stats(),
            (None, None) => Stats::default(),
        }
    }

    /// The accepted connection, if any.
    pub fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    /// Hand over the accepted connection, e.g. to call
    /// [`Connection::run`].
    pub fn into_connection(self) -> Result<Connection, ConnError> {
        self.conn.ok_or(ConnError::NotConnected)
    }

    fn connection_mut(&mut self) -> Result<&mut Connection, ConnError> {
        self.conn.as_mut().ok_or(ConnError::NotConnected)
    }
}
