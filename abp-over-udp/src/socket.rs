//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that moves raw
//! datagrams.  Decoding is left to the caller because whether a packet is
//! valid depends on the sequence bit the caller expects.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;

/// Receive buffer size.  Larger than [`crate::packet::MAX_PACKET`] so that an
/// oversized datagram is seen whole and rejected by the codec instead of
/// being silently truncated into something that might parse.
const RECV_BUF: usize = 2048;

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An async, datagram-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared across tasks.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Send `bytes` as a single UDP datagram to `dest`.
    pub async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }

    /// Receive the next datagram.  Returns `(bytes, sender_address)`.
    pub async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr), SocketError> {
        let mut buf = vec![0u8; RECV_BUF];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }

    /// Like [`recv_from`](Self::recv_from) but gives up after `wait`.
    ///
    /// `Ok(None)` means the timeout elapsed with nothing received.
    pub async fn recv_timeout(
        &self,
        wait: Duration,
    ) -> Result<Option<(Vec<u8>, SocketAddr)>, SocketError> {
        match tokio::time::timeout(wait, self.recv_from()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }
}
