//! Outbound packet state for stop-and-wait reliability.
//!
//! [`Sender`] tracks `write_seq` and the single in-flight packet.  It does
//! **not** touch the socket; [`crate::connection::Connection`] and
//! [`crate::session::Session`] call these methods and own the actual
//! send/receive loop.
//!
//! # Stop-and-Wait contract
//! - At most **one** packet is in flight at any moment (`unacked`).
//! - A new packet may only be built once `unacked` is `None`.
//! - On an ack for `write_seq`: toggle `write_seq`; clear `unacked`.
//! - On timeout: increment `tx_count`; resend the same bytes unchanged.

use crate::packet::{self, PacketError, SeqBit};

/// A packet that has been built but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetransmitEntry {
    /// Encoded datagram, resent byte-for-byte on every attempt.
    pub bytes: Vec<u8>,
    /// Sequence bit carried by `bytes`.
    pub seq: SeqBit,
    /// How many times this packet has been handed to the network.
    pub tx_count: u32,
}

/// Stop-and-wait send-side state for one connection.
#[derive(Debug, Default)]
pub struct Sender {
    /// Sequence bit of the next (or current in-flight) packet.
    pub write_seq: SeqBit,

    /// The in-flight packet, or `None` when the sender is idle.
    pub unacked: Option<RetransmitEntry>,
}

impl Sender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `chunk` with the current `write_seq` and place it in the
    /// in-flight slot.  Returns the bytes to transmit.
    ///
    /// Panics in debug mode if a packet is already in flight.
    pub fn load(&mut self, chunk: &[u8]) -> Result<&[u8], PacketError> {
        debug_assert!(
            self.unacked.is_none(),
            "load called while a packet is already in flight"
        );
        let bytes = packet::encode(self.write_seq, chunk)?;
        let entry = self.unacked.insert(RetransmitEntry {
            bytes,
            seq: self.write_seq,
            tx_count: 0,
        });
        Ok(entry.bytes.as_slice())
    }

    /// Record one more transmission of the in-flight packet.
    pub fn on_transmit(&mut self) {
        if let Some(ref mut e) = self.unacked {
            e.tx_count += 1;
        }
    }

    /// Process an inbound acknowledgment carrying `seq`.
    ///
    /// Returns `true` if it acknowledges the in-flight packet; `write_seq`
    /// then advances and the slot is cleared.  Stale acks return `false`.
    pub fn on_ack(&mut self, seq: SeqBit) -> bool {
        match self.unacked {
            Some(ref entry) if entry.seq == seq => {
                self.unacked = None;
                self.write_seq.toggle();
                true
            }
            _ => false,
        }
    }

    /// Drop the in-flight packet without advancing `write_seq`.
    pub fn abandon(&mut self) {
        self.unacked = None;
    }

    /// Returns the number of times the in-flight packet has been sent,
    /// or `0` if the sender is idle.
    pub fn retransmit_count(&self) -> u32 {
        self.unacked.as_ref().map_or(0, |e| e.tx_count)
    }
}
