//! Concurrent mode: a background task owns the receive path.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │ write(data)                 │ read(n)
//!      ▼                             ▼
//!  Session ── send ──▶ Arc<Simulator> ◀── recv ── receive_loop task
//!      ▲                                              │
//!      │   acks (mpsc)                                │ data
//!      └──────────────────────────────────────────────┤
//!                                                     ▼
//!                              Inbound { Mutex<Receiver>, Notify }
//! ```
//!
//! Only the background task reads the socket.  It acks and buffers in-order
//! data under the inbound lock, then wakes the reader; acknowledgments go to
//! the writer over a channel.  The lock is never held across an `.await`, so
//! exactly one of {receive task, reader} touches the buffer at a time and
//! neither blocks the other for longer than a memcpy.  Readers sleep on
//! [`Notify`] instead of polling.
//!
//! ```ignore
//! let mut session = Connection::connect(socket, peer, config).await?.run();
//! session.write(b"ping").await?;
//! let reply = session.read(4).await?;
//! session.close().await;
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::{EndpointConfig, Retransmit};
use crate::connection::{ConnError, Connection, Role};
use crate::packet::{Packet, SeqBit};
use crate::receiver::{Delivery, Receiver};
use crate::sender::Sender;
use crate::simulator::{Simulator, Stats};

/// Receive state shared between the background task and the reader.
#[derive(Debug)]
struct Inbound {
    receiver: Mutex<Receiver>,
    notify: Notify,
    closed: AtomicBool,
}

impl Inbound {
    fn lock(&self) -> MutexGuard<'_, Receiver> {
        self.receiver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

impl Connection {
    /// Spawn a background receive task and return a [`Session`] handle.
    ///
    /// Bytes already buffered by this connection carry over.  Must be called
    /// inside a tokio runtime.
    pub fn run(self) -> Session {
        let (link, peer, config, role, sender, receiver) = self.into_parts();
        let link = Arc::new(link);
        let inbound = Arc::new(Inbound {
            receiver: Mutex::new(receiver),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(receive_loop(
            Arc::clone(&link),
            peer,
            role,
            Arc::clone(&inbound),
            ack_tx,
        ));

        Session {
            link,
            peer,
            config,
            role,
            sender,
            ack_rx,
            inbound,
            broken: false,
            handle,
        }
    }
}

/// Handle returned by [`Connection::run`].
///
/// Dropping the session stops the background task.
#[derive(Debug)]
pub struct Session {
    link: Arc<Simulator>,
    peer: SocketAddr,
    config: EndpointConfig,
    role: Role,
    sender: Sender,
    ack_rx: mpsc::UnboundedReceiver<SeqBit>,
    inbound: Arc<Inbound>,
    broken: bool,
    handle: JoinHandle<()>,
}

impl Session {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn stats(&self) -> Stats {
        self.link.stats()
    }

    /// Sequence bit of the next outgoing chunk.
    pub fn write_seq(&self) -> SeqBit {
        self.sender.write_seq
    }

    /// Sequence bit of the next expected incoming chunk.
    pub fn read_seq(&self) -> SeqBit {
        self.inbound.lock().read_seq
    }

    /// Reliably deliver `data`; same chunking and retry contract as
    /// [`Connection::write`].
    pub async fn write(&mut self, data: &[u8]) -> Result<(), ConnError> {
        if self.broken {
            return Err(ConnError::Broken);
        }
        for chunk in data.chunks(self.config.chunk_size) {
            self.send_chunk(chunk).await?;
        }
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: &[u8]) -> Result<(), ConnError> {
        // Acks queued before this chunk exists cannot be for it.
        while self.ack_rx.try_recv().is_ok() {}

        let bytes = self.sender.load(chunk)?.to_vec();
        let seq = self.sender.write_seq;

        loop {
            if let Retransmit::Bounded(max) = self.config.retransmit {
                let attempts = self.sender.retransmit_count();
                if attempts >= max {
                    self.sender.abandon();
                    self.broken = true;
                    log::warn!(
                        "[session:{}] giving up on seq={seq} after {attempts} transmissions",
                        self.role.tag()
                    );
                    return Err(ConnError::MaxRetriesExceeded { attempts });
                }
            }

            self.sender.on_transmit();
            self.link.send(&bytes, self.peer).await?;
            log::debug!(
                "[session:{}] → DATA seq={seq} len={} try={}",
                self.role.tag(),
                chunk.len(),
                self.sender.retransmit_count()
            );

            match timeout(self.config.timeout, self.ack_rx.recv()).await {
                Ok(Some(ack)) => {
                    if self.sender.on_ack(ack) {
                        log::debug!("[session:{}] ← ACK seq={seq}", self.role.tag());
                        return Ok(());
                    }
                }
                Ok(None) => return Err(ConnError::SessionClosed),
                Err(_elapsed) => {}
            }
        }
    }

    /// Wait until `n` bytes have been delivered and return them in order.
    pub async fn read(&mut self, n: usize) -> Result<Vec<u8>, ConnError> {
        loop {
            let ready = self.inbound.lock().take(n);
            if let Some(bytes) = ready {
                return Ok(bytes);
            }
            if self.inbound.closed.load(Ordering::Acquire) {
                return Err(ConnError::SessionClosed);
            }
            self.inbound.notify.notified().await;
        }
    }

    /// Wait for at least one delivered byte and return everything buffered.
    pub async fn read_available(&mut self) -> Result<Vec<u8>, ConnError> {
        loop {
            let ready = {
                let mut receiver = self.inbound.lock();
                (receiver.buffered() > 0).then(|| receiver.drain())
            };
            if let Some(bytes) = ready {
                return Ok(bytes);
            }
            if self.inbound.closed.load(Ordering::Acquire) {
                return Err(ConnError::SessionClosed);
            }
            self.inbound.notify.notified().await;
        }
    }

    /// Stop the background task and wait for it to finish.
    pub async fn close(mut self) {
        self.handle.abort();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn receive_loop(
    link: Arc<Simulator>,
    peer: SocketAddr,
    role: Role,
    inbound: Arc<Inbound>,
    ack_tx: mpsc::UnboundedSender<SeqBit>,
) {
    let tag = role.tag();

    loop {
        let (bytes, from) = match link.recv_from().await {
            Ok(received) => received,
            Err(e) => {
                log::warn!("[session:{tag}] receive failed: {e}");
                break;
            }
        };
        if from != peer {
            continue;
        }

        let pkt = match Packet::parse(&bytes) {
            Ok(pkt) => pkt,
            Err(e) => {
                log::debug!("[session:{tag}] dropping corrupt datagram: {e}");
                continue;
            }
        };

        if pkt.is_ack() {
            // The writer may be gone between writes; acks then go nowhere.
            let _ = ack_tx.send(pkt.seq);
            continue;
        }

        let delivery = inbound.lock().on_packet(&pkt);
        if let Delivery::Accepted { ack } = delivery {
            log::debug!("[session:{tag}] ← DATA seq={ack} len={}", pkt.payload.len());
            inbound.notify.notify_one();
        } else {
            log::debug!("[session:{tag}] ← duplicate seq={}", pkt.seq);
        }

        let ack = match Packet::ack(delivery.ack()).encode() {
            Ok(ack) => ack,
            Err(e) => {
                log::warn!("[session:{tag}] cannot encode ack: {e}");
                break;
            }
        };
        if let Err(e) = link.send(&ack, peer).await {
            log::warn!("[session:{tag}] sending ack failed: {e}");
            break;
        }
    }

    inbound.close();
}
