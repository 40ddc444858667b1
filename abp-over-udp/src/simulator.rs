//! Lossy network layer.
//!
//! Real networks drop packets.  To exercise the retry logic without depending
//! on actual network conditions, every post-handshake datagram goes through a
//! [`Simulator`] that wraps a [`Socket`] and drops each outgoing datagram
//! independently with probability `loss_rate`.  Data packets and
//! acknowledgments are treated identically.
//!
//! The simulator also keeps the endpoint's traffic counters ([`Stats`]).
//! Counters are atomics so the foreground writer and a background receive
//! task can share one simulator behind an `Arc`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::EndpointConfig;
use crate::socket::{Socket, SocketError};

/// Snapshot of an endpoint's traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Calls to "transmit a datagram", before loss simulation.
    pub send_attempts: u64,
    /// Datagrams actually put on the wire.
    pub sent: u64,
    /// Datagrams received from the socket, valid or not.
    pub received: u64,
}

#[derive(Debug, Default)]
struct Counters {
    send_attempts: AtomicU64,
    sent: AtomicU64,
    received: AtomicU64,
}

/// A fault-injecting wrapper around the socket layer.
#[derive(Debug)]
pub struct Simulator {
    socket: Socket,
    loss_rate: f64,
    rng: Mutex<StdRng>,
    counters: Counters,
}

impl Simulator {
    /// Wrap `socket`, taking the loss rate and seed from `config`.
    pub fn new(socket: Socket, config: &EndpointConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            socket,
            loss_rate: config.loss_rate,
            rng: Mutex::new(rng),
            counters: Counters::default(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Send a datagram through the simulated network.
    ///
    /// Returns `Ok(false)` when the datagram was dropped.
    pub async fn send(&self, bytes: &[u8], dest: SocketAddr) -> Result<bool, SocketError> {
        self.counters.send_attempts.fetch_add(1, Ordering::Relaxed);
        if self.drop_next() {
            log::trace!("[sim] dropped {} byte datagram to {dest}", bytes.len());
            return Ok(false);
        }
        self.transmit(bytes, dest).await?;
        Ok(true)
    }

    /// Send a datagram bypassing loss simulation (handshake traffic).
    pub async fn send_reliable(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.counters.send_attempts.fetch_add(1, Ordering::Relaxed);
        self.transmit(bytes, dest).await
    }

    /// Receive the next datagram.
    pub async fn recv_from(&self) -> Result<(Vec<u8>, SocketAddr), SocketError> {
        let received = self.socket.recv_from().await?;
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        Ok(received)
    }

    /// Receive with a timeout; `Ok(None)` when nothing arrived in time.
    pub async fn recv_timeout(
        &self,
        wait: Duration,
    ) -> Result<Option<(Vec<u8>, SocketAddr)>, SocketError> {
        let received = self.socket.recv_timeout(wait).await?;
        if received.is_some() {
            self.counters.received.fetch_add(1, Ordering::Relaxed);
        }
        Ok(received)
    }

    pub fn stats(&self) -> Stats {
        Stats {
            send_attempts: self.counters.send_attempts.load(Ordering::Relaxed),
            sent: self.counters.sent.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
        }
    }

    async fn transmit(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        self.socket.send_to(bytes, dest).await?;
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn drop_next(&self) -> bool {
        if self.loss_rate <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.random::<f64>() < self.loss_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sim(config: &EndpointConfig) -> Simulator {
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        Simulator::new(socket, config)
    }

    #[tokio::test]
    async fn lossless_sends_everything() {
        let a = sim(&EndpointConfig::default()).await;
        let b = sim(&EndpointConfig::default()).await;
        for _ in 0..10 {
            assert!(a.send(b"x", b.local_addr()).await.unwrap());
        }
        let stats = a.stats();
        assert_eq!(stats.send_attempts, 10);
        assert_eq!(stats.sent, 10);
    }

    #[tokio::test]
    async fn lossy_sends_drop_some() {
        let cfg = EndpointConfig::default().with_loss_rate(0.5).with_seed(42);
        let a = sim(&cfg).await;
        let b = sim(&EndpointConfig::default()).await;
        for _ in 0..200 {
            a.send(b"x", b.local_addr()).await.unwrap();
        }
        let stats = a.stats();
        assert_eq!(stats.send_attempts, 200);
        assert!(stats.sent > 0 && stats.sent < 200, "sent = {}", stats.sent);
    }

    #[tokio::test]
    async fn same_seed_drops_same_datagrams() {
        let cfg = EndpointConfig::default().with_loss_rate(0.3).with_seed(9);
        let a = sim(&cfg).await;
        let b = sim(&cfg).await;
        let pattern_a: Vec<bool> = (0..50).map(|_| a.drop_next()).collect();
        let pattern_b: Vec<bool> = (0..50).map(|_| b.drop_next()).collect();
        assert_eq!(pattern_a, pattern_b);
    }

    #[tokio::test]
    async fn reliable_send_ignores_loss_and_recv_counts() {
        let cfg = EndpointConfig::default().with_loss_rate(0.9).with_seed(1);
        let a = sim(&cfg).await;
        let b = sim(&EndpointConfig::default()).await;
        a.send_reliable(b"hs", b.local_addr()).await.unwrap();
        let (bytes, _) = b.recv_from().await.unwrap();
        assert_eq!(bytes, b"hs");
        assert_eq!(b.stats().received, 1);
        assert_eq!(a.stats().sent, 1);
    }
}
