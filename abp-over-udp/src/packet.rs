//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers is a [`Packet`]: a fixed 6-byte
//! header followed by up to [`MAX_PAYLOAD`] bytes.  This module is
//! responsible for:
//! - Defining the on-wire layout and the protocol constants.
//! - Serialising a sequence bit and payload into a checksummed buffer.
//! - Parsing a raw datagram back, rejecting corrupt or malformed input.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **little-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Checksum            |     Sequence (0 or 1) ...     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        ... Sequence           |          Payload ...          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The checksum covers every byte after the checksum field.  Since the field
//! sits on a word boundary this equals the checksum of the whole packet with
//! the field held at zero.
//!
//! The sequence field is 32 bits wide but only ever carries 0 or 1.  A single
//! bit is enough because at most one packet per direction is unacknowledged;
//! pipelining would need a wider sequence space.

use std::fmt;

use thiserror::Error;

use crate::checksum;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 6;

/// Largest payload carried by one packet.
pub const MAX_PAYLOAD: usize = 1024;

/// Largest datagram the protocol ever produces.
pub const MAX_PACKET: usize = HEADER_LEN + MAX_PAYLOAD;

/// Payload of every acknowledgment packet.
pub const ACK_MARKER: &[u8] = b"MAGIC_ABOBA_ACK";

/// Payload of the client's handshake request (sent with sequence 0).
pub const HANDSHAKE_REQUEST: &[u8] = b"hello";

/// Payload of the server's handshake response (sent with sequence 1).
pub const HANDSHAKE_RESPONSE: &[u8] = b"world";

// Byte offsets of each field within the serialised header.
const OFF_CHECKSUM: usize = 0;
const OFF_SEQ: usize = 2;

/// The single-bit sequence number of the alternating-bit protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SeqBit {
    #[default]
    Zero,
    One,
}

impl SeqBit {
    /// The other sequence value.
    pub fn other(self) -> Self {
        match self {
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }

    /// Advance in place (mod 2).
    pub fn toggle(&mut self) {
        *self = self.other();
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
        }
    }
}

impl TryFrom<u32> for SeqBit {
    type Error = PacketError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Zero),
            1 => Ok(Self::One),
            other => Err(PacketError::InvalidSequence(other)),
        }
    }
}

impl fmt::Display for SeqBit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// A parsed, checksum-verified datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: SeqBit,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(seq: SeqBit, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            seq,
            payload: payload.into(),
        }
    }

    /// An acknowledgment for `seq`.
    pub fn ack(seq: SeqBit) -> Self {
        Self::new(seq, ACK_MARKER)
    }

    /// `true` if the payload is the acknowledgment marker.
    pub fn is_ack(&self) -> bool {
        self.payload == ACK_MARKER
    }

    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        encode(self.seq, &self.payload)
    }

    /// Parse a [`Packet`] from a raw datagram.
    ///
    /// Verifies length and checksum but not the sequence expectation; use
    /// [`decode`] for that.  Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`] or longer than [`MAX_PACKET`],
    /// - the checksum does not verify, or
    /// - the sequence field is neither 0 nor 1.
    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }
        if buf.len() > MAX_PACKET {
            return Err(PacketError::BufferTooLong(buf.len()));
        }

        let (cs, rest) = buf.split_at(OFF_SEQ);
        let stored = u16::from_le_bytes([cs[0], cs[1]]);
        if !checksum::verify(stored, rest) {
            return Err(PacketError::ChecksumFailed);
        }

        let raw_seq = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
        let seq = SeqBit::try_from(raw_seq)?;

        Ok(Packet {
            seq,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Build a checksummed packet carrying `payload` with sequence `seq`.
///
/// Total size is `HEADER_LEN + payload.len()`; payloads longer than
/// [`MAX_PAYLOAD`] are rejected.
pub fn encode(seq: SeqBit, payload: &[u8]) -> Result<Vec<u8>, PacketError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(PacketError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let mut buf = vec![0u8; HEADER_LEN + payload.len()];
    buf[OFF_SEQ..HEADER_LEN].copy_from_slice(&seq.as_u32().to_le_bytes());
    buf[HEADER_LEN..].copy_from_slice(payload);

    // Checksum field is zero while computing the checksum.
    let csum = checksum::compute(&buf);
    buf[OFF_CHECKSUM..OFF_SEQ].copy_from_slice(&csum.to_le_bytes());

    Ok(buf)
}

/// Parse `buf` and accept it only if it carries sequence `expected`.
///
/// `Ok(payload)` is a valid packet.  Every `Err` means "not valid"; the
/// variant tells a corrupt packet ([`PacketError::is_corrupt`]) apart from a
/// well-formed one with the wrong sequence bit
/// ([`PacketError::SequenceMismatch`]).
pub fn decode(expected: SeqBit, buf: &[u8]) -> Result<Vec<u8>, PacketError> {
    let packet = Packet::parse(buf)?;
    if packet.seq != expected {
        return Err(PacketError::SequenceMismatch {
            expected,
            actual: packet.seq,
        });
    }
    Ok(packet.payload)
}

/// Errors that can arise when building or parsing a datagram.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("buffer too short to contain a header")]
    BufferTooShort,

    #[error("datagram of {0} bytes exceeds the maximum packet size")]
    BufferTooLong(usize),

    #[error("checksum verification failed")]
    ChecksumFailed,

    #[error("sequence field holds {0}, expected 0 or 1")]
    InvalidSequence(u32),

    #[error("sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: SeqBit, actual: SeqBit },

    #[error("payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },
}

impl PacketError {
    /// `true` for anything other than a sequence mismatch.  Corrupt packets
    /// are dropped without acknowledgment.
    pub fn is_corrupt(&self) -> bool {
        !matches!(self, PacketError::SequenceMismatch { .. })
    }
}
