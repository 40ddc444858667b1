//! Connection life-cycle states.
//!
//! ```text
//!  server:  Listening ──valid handshake request──▶ Established
//!  client:  (connect succeeds) ─────────────────▶ Established
//!
//!  Established ──bounded write exhausted──▶ Broken
//! ```
//!
//! There is no teardown handshake: a connection lives until its owner drops
//! it.

/// All possible states of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Bound, waiting for a handshake request (server only).
    #[default]
    Listening,
    /// Handshake complete; data transfer allowed.
    Established,
    /// A bounded write gave up.  Sequence state can no longer be trusted, so
    /// every further read or write fails.
    Broken,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
