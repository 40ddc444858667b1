//! Active open: the client half of the handshake.
//!
//! ```text
//!  client                              server
//!    │── seq=0 "hello" ──────────────────▶│
//!    │◀────────────────── seq=1 "world" ──│
//!  Established                        Established
//! ```
//!
//! The client waits for exactly one reply, bounded by the configured
//! timeout.  Anything other than a valid response from the address it
//! contacted fails the connect; the handshake itself is never retried.
//! Handshake datagrams bypass loss simulation.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::config::EndpointConfig;
use crate::connection::{ConnError, Connection, HandshakeError, Role};
use crate::packet::{self, SeqBit, HANDSHAKE_REQUEST, HANDSHAKE_RESPONSE};
use crate::simulator::Simulator;
use crate::socket::Socket;

impl Connection {
    /// Perform the handshake with `peer` over an already bound `socket`.
    pub async fn connect(
        socket: Socket,
        peer: SocketAddr,
        config: EndpointConfig,
    ) -> Result<Self, ConnError> {
        config.validate()?;
        let link = Simulator::new(socket, &config);

        let request = packet::encode(SeqBit::Zero, HANDSHAKE_REQUEST)?;
        link.send_reliable(&request, peer).await?;
        log::debug!("[client] → handshake request to {peer}");

        let (bytes, from) = link
            .recv_timeout(config.timeout)
            .await?
            .ok_or(HandshakeError::Timeout)?;
        check_response(peer, from, &bytes)?;
        log::debug!("[client] ← handshake response from {from}");

        Ok(Connection::established(link, peer, config, Role::Client))
    }
}

/// Bind an ephemeral socket of the right address family and connect to
/// `peer`.
pub async fn connect(peer: SocketAddr, config: EndpointConfig) -> Result<Connection, ConnError> {
    let unspecified = match peer.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let socket = Socket::bind(SocketAddr::new(unspecified, 0)).await?;
    Connection::connect(socket, peer, config).await
}

fn check_response(expected: SocketAddr, from: SocketAddr, bytes: &[u8]) -> Result<(), HandshakeError> {
    if from != expected {
        return Err(HandshakeError::UnexpectedPeer {
            expected,
            actual: from,
        });
    }
    let payload = packet::decode(SeqBit::One, bytes).map_err(HandshakeError::Malformed)?;
    if payload != HANDSHAKE_RESPONSE {
        return Err(HandshakeError::WrongMarker);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn valid_response_is_accepted() {
        let bytes = packet::encode(SeqBit::One, HANDSHAKE_RESPONSE).unwrap();
        assert!(check_response(addr("127.0.0.1:9000"), addr("127.0.0.1:9000"), &bytes).is_ok());
    }

    #[test]
    fn response_from_other_address_is_rejected() {
        let bytes = packet::encode(SeqBit::One, HANDSHAKE_RESPONSE).unwrap();
        let err = check_response(addr("127.0.0.1:9000"), addr("127.0.0.1:9001"), &bytes).unwrap_err();
        assert!(matches!(err, HandshakeError::UnexpectedPeer { .. }));
    }

    #[test]
    fn response_with_wrong_sequence_is_malformed() {
        let bytes = packet::encode(SeqBit::Zero, HANDSHAKE_RESPONSE).unwrap();
        let err = check_response(addr("127.0.0.1:9000"), addr("127.0.0.1:9000"), &bytes).unwrap_err();
        assert!(matches!(err, HandshakeError::Malformed(_)));
    }

    #[test]
    fn response_with_wrong_marker_is_rejected() {
        let bytes = packet::encode(SeqBit::One, b"nope").unwrap();
        let err = check_response(addr("127.0.0.1:9000"), addr("127.0.0.1:9000"), &bytes).unwrap_err();
        assert!(matches!(err, HandshakeError::WrongMarker));
    }
}
