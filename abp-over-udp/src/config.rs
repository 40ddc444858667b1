//! Per-endpoint configuration.
//!
//! Every [`crate::connection::Connection`] and [`crate::server::Server`] takes
//! an [`EndpointConfig`] at construction and never reads process-wide state,
//! so independent connections in one process may use different parameters.
//! There is no runtime reconfiguration.

use std::time::Duration;

use crate::connection::ConnError;
use crate::packet::MAX_PAYLOAD;

/// What a write does when a chunk keeps going unacknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retransmit {
    /// Give up after this many transmissions of one chunk.
    ///
    /// The write then fails with [`ConnError::MaxRetriesExceeded`] and the
    /// connection is marked broken.  The sender cannot tell "peer stopped
    /// reading" from "every ack was lost", so the chunk may or may not have
    /// been delivered.
    Bounded(u32),
    /// Retransmit until acknowledged.
    Unbounded,
}

/// Adjustable protocol parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    /// How long one blocking receive waits before the retry loop decides
    /// what to do next.
    pub timeout: Duration,
    /// Probability in `[0.0, 1.0)` that an outgoing datagram is dropped.
    pub loss_rate: f64,
    /// Largest payload put in one packet; writes are split into chunks of
    /// this size.
    pub chunk_size: usize,
    /// Retransmission policy for writes.
    pub retransmit: Retransmit,
    /// Seed for the loss simulator.  `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(50),
            loss_rate: 0.0,
            chunk_size: MAX_PAYLOAD,
            retransmit: Retransmit::Bounded(100),
            seed: None,
        }
    }
}

impl EndpointConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_loss_rate(mut self, loss_rate: f64) -> Self {
        self.loss_rate = loss_rate;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_retransmit(mut self, retransmit: Retransmit) -> Self {
        self.retransmit = retransmit;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Reject parameter combinations the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ConnError> {
        if self.timeout.is_zero() {
            return Err(ConnError::InvalidConfig("timeout must be non-zero"));
        }
        if !(0.0..1.0).contains(&self.loss_rate) {
            return Err(ConnError::InvalidConfig("loss rate must be in [0, 1)"));
        }
        if self.chunk_size == 0 || self.chunk_size > MAX_PAYLOAD {
            return Err(ConnError::InvalidConfig("chunk size must be in 1..=1024"));
        }
        if self.retransmit == Retransmit::Bounded(0) {
            return Err(ConnError::InvalidConfig("retransmit bound must be positive"));
        }
        Ok(())
    }
}
