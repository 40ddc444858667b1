//! Inbound packet state and the application receive buffer.
//!
//! The [`Receiver`] applies the alternating-bit receive rules to a packet
//! that already passed its checksum:
//! - `seq == read_seq`: deliver the payload, ack `read_seq`, toggle it.
//! - otherwise: a retransmission of something already delivered (our ack got
//!   lost).  Re-ack the other bit, deliver nothing, keep state.
//!
//! Corrupt packets never reach this module; the caller drops them without
//! acknowledgment.  The [`Receiver`] does **not** send acks itself; it
//! returns the sequence bit to acknowledge.

use std::collections::VecDeque;

use crate::packet::{Packet, SeqBit};

/// What the receive rules decided for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// New data, appended to the buffer.  Ack `ack`.
    Accepted { ack: SeqBit },
    /// Duplicate of the previous packet.  Ack `ack` again; nothing delivered.
    Duplicate { ack: SeqBit },
}

impl Delivery {
    /// Sequence bit the caller must acknowledge.
    pub fn ack(self) -> SeqBit {
        match self {
            Delivery::Accepted { ack } | Delivery::Duplicate { ack } => ack,
        }
    }
}

/// Receive-side state for a single connection.
#[derive(Debug, Default)]
pub struct Receiver {
    /// Sequence bit of the next packet to deliver.
    pub read_seq: SeqBit,

    /// Delivered bytes not yet consumed by the application, in order.
    pub app_buffer: VecDeque<u8>,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the receive rules to a checksum-verified data packet.
    pub fn on_packet(&mut self, packet: &Packet) -> Delivery {
        if packet.seq == self.read_seq {
            self.app_buffer.extend(packet.payload.iter().copied());
            let ack = self.read_seq;
            self.read_seq.toggle();
            Delivery::Accepted { ack }
        } else {
            Delivery::Duplicate {
                ack: self.read_seq.other(),
            }
        }
    }

    /// Number of buffered bytes.
    pub fn buffered(&self) -> usize {
        self.app_buffer.len()
    }

    /// Remove and return everything buffered.
    pub fn drain(&mut self) -> Vec<u8> {
        self.app_buffer.drain(..).collect()
    }

    /// Remove and return exactly `n` bytes, or `None` if fewer are buffered.
    pub fn take(&mut self, n: usize) -> Option<Vec<u8>> {
        if self.app_buffer.len() < n {
            return None;
        }
        Some(self.app_buffer.drain(..n).collect())
    }
}
