//! Receive rules as seen on the wire after the handshake.
//!
//! A raw `Socket` plays the client so each test controls exactly which
//! datagrams reach the endpoint and can inspect every ack that comes back.

use std::net::SocketAddr;
use std::time::Duration;

use abp_over_udp::{
    packet::{self, Packet, SeqBit, HANDSHAKE_REQUEST, HANDSHAKE_RESPONSE},
    socket::Socket,
    EndpointConfig, Server,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const QUIET: Duration = Duration::from_millis(200);

fn config() -> EndpointConfig {
    EndpointConfig::default().with_timeout(Duration::from_millis(200))
}

async fn ephemeral() -> Socket {
    Socket::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap())
        .await
        .expect("bind socket")
}

/// Accept a raw socket as the server's peer by hand-rolling the handshake.
async fn raw_client() -> (Server, Socket, SocketAddr) {
    let mut server = Server::bind("127.0.0.1:0".parse().unwrap(), config())
        .await
        .expect("bind server");
    let server_addr = server.local_addr();

    let peer = ephemeral().await;
    let request = packet::encode(SeqBit::Zero, HANDSHAKE_REQUEST).unwrap();
    peer.send_to(&request, server_addr).await.unwrap();
    server.accept().await.expect("accept");

    let (reply, _) = peer.recv_from().await.unwrap();
    assert_eq!(packet::decode(SeqBit::One, &reply).unwrap(), HANDSHAKE_RESPONSE);
    (server, peer, server_addr)
}

async fn expect_ack(peer: &Socket, seq: SeqBit) {
    let (bytes, _) = peer
        .recv_timeout(Duration::from_secs(2))
        .await
        .unwrap()
        .expect("no ack arrived");
    let ack = Packet::parse(&bytes).expect("ack parses");
    assert!(ack.is_ack(), "expected an ack, got {ack:?}");
    assert_eq!(ack.seq, seq);
}

async fn expect_silence(sock: &Socket) {
    let got = sock.recv_timeout(QUIET).await.unwrap();
    assert!(got.is_none(), "unexpected reply: {got:?}");
}

/// Drive the peer side through every receive rule in order:
/// corrupt, first chunk, stranger, duplicate, second chunk.
async fn exercise_receive_rules(peer: &Socket, server_addr: SocketAddr) {
    // Corrupt data is dropped without an ack.
    let mut corrupt = packet::encode(SeqBit::Zero, b"first").unwrap();
    corrupt[packet::HEADER_LEN] ^= 0x01;
    peer.send_to(&corrupt, server_addr).await.unwrap();
    expect_silence(peer).await;

    let first = packet::encode(SeqBit::Zero, b"first").unwrap();
    peer.send_to(&first, server_addr).await.unwrap();
    expect_ack(peer, SeqBit::Zero).await;

    // A stranger sending the next expected bit is neither acked nor delivered.
    let stranger = ephemeral().await;
    let evil = packet::encode(SeqBit::One, b"evil").unwrap();
    stranger.send_to(&evil, server_addr).await.unwrap();
    expect_silence(&stranger).await;

    // A retransmission of the first chunk is re-acked with its own bit.
    peer.send_to(&first, server_addr).await.unwrap();
    expect_ack(peer, SeqBit::Zero).await;

    let second = packet::encode(SeqBit::One, b"second").unwrap();
    peer.send_to(&second, server_addr).await.unwrap();
    expect_ack(peer, SeqBit::One).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connection_applies_receive_rules() {
    let (mut server, peer, server_addr) = raw_client().await;

    let reader = tokio::spawn(async move {
        let first = server.read().await.expect("first read");
        let second = server.read().await.expect("second read");
        (server, first, second)
    });

    exercise_receive_rules(&peer, server_addr).await;

    let (server, first, second) = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("reader timed out")
        .unwrap();
    assert_eq!(first, b"first");
    assert_eq!(second, b"second", "duplicate or stranger data was delivered");

    let conn = server.connection().unwrap();
    assert_eq!(conn.receiver.read_seq, SeqBit::Zero);
    assert_eq!(conn.receiver.buffered(), 0);
}

#[tokio::test]
async fn session_applies_receive_rules() {
    let (server, peer, server_addr) = raw_client().await;
    let mut session = server.into_connection().expect("accepted").run();

    exercise_receive_rules(&peer, server_addr).await;

    let first = session.read(5).await.expect("first read");
    assert_eq!(first, b"first");
    let second = tokio::time::timeout(Duration::from_secs(5), session.read(6))
        .await
        .expect("session read timed out")
        .expect("second read");
    assert_eq!(second, b"second", "duplicate or stranger data was delivered");
    assert_eq!(session.read_seq(), SeqBit::Zero);

    session.close().await;
}
