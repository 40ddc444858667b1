//! Integration tests for the concurrent `Session` mode.
//!
//! Both endpoints run a background receive task, so acknowledgments keep
//! flowing even while the application is busy elsewhere.

use std::time::Duration;

use abp_over_udp::{
    client, connection::ConnError, packet::SeqBit, EndpointConfig, Retransmit, Server, Session,
};

async fn sessions(server_cfg: EndpointConfig, client_cfg: EndpointConfig) -> (Session, Session) {
    let mut server = Server::bind("127.0.0.1:0".parse().unwrap(), server_cfg)
        .await
        .expect("bind server");
    let server_addr = server.local_addr();

    let client_task = tokio::spawn(async move { client::connect(server_addr, client_cfg).await });
    server.accept().await.expect("accept");
    let client = client_task.await.unwrap().expect("connect");

    let server = server.into_connection().expect("accepted").run();
    (server, client.run())
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 253) as u8).collect()
}

#[tokio::test]
async fn session_basic_send_recv() {
    let cfg = EndpointConfig::default().with_timeout(Duration::from_millis(200));
    let (mut server, mut client) = sessions(cfg.clone(), cfg).await;

    client.write(b"Ping!").await.expect("client write");
    let got = tokio::time::timeout(Duration::from_secs(5), server.read(5))
        .await
        .expect("server read timed out")
        .expect("server read");
    assert_eq!(got, b"Ping!");

    server.write(b"Pong!").await.expect("server write");
    let reply = client.read_available().await.expect("client read");
    assert_eq!(reply, b"Pong!");

    assert_eq!(client.write_seq(), SeqBit::One);
    assert_eq!(client.read_seq(), SeqBit::One);
    assert_eq!(server.write_seq(), SeqBit::One);
    assert_eq!(server.read_seq(), SeqBit::One);

    client.close().await;
    server.close().await;
}

/// A reader waiting before any data exists is woken when it arrives.
#[tokio::test]
async fn reader_waits_for_enough_bytes() {
    let cfg = EndpointConfig::default().with_timeout(Duration::from_millis(200));
    let (mut server, mut client) = sessions(cfg.clone(), cfg).await;

    let reader = tokio::spawn(async move { server.read(3000).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let first = pattern(1500);
    let second: Vec<u8> = pattern(1500).into_iter().rev().collect();
    client.write(&first).await.expect("first write");
    client.write(&second).await.expect("second write");

    let got = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("reader timed out")
        .unwrap()
        .expect("server read");
    assert_eq!(got, [first, second].concat());
}

/// Echo a payload both ways over a 30% lossy link.
#[tokio::test]
async fn lossy_echo_roundtrip() {
    const LEN: usize = 8_000;
    let lossy = |seed| {
        EndpointConfig::default()
            .with_timeout(Duration::from_millis(20))
            .with_loss_rate(0.3)
            .with_retransmit(Retransmit::Unbounded)
            .with_seed(seed)
    };
    let (mut server, mut client) = sessions(lossy(11), lossy(12)).await;
    let payload = pattern(LEN);

    let echo = tokio::spawn(async move {
        let data = server.read(LEN).await.expect("server read");
        server.write(&data).await.expect("server write");
        server
    });

    client.write(&payload).await.expect("client write");
    let reply = tokio::time::timeout(Duration::from_secs(30), client.read(LEN))
        .await
        .expect("client read timed out")
        .expect("client read");
    assert_eq!(reply, payload);

    // The client's receive task keeps acking until the server's last chunk
    // is confirmed.
    let server = tokio::time::timeout(Duration::from_secs(30), echo)
        .await
        .expect("server timed out")
        .unwrap();

    let stats = client.stats();
    assert!(stats.send_attempts > stats.sent, "{stats:?}");
    assert!(stats.received > 0, "{stats:?}");

    server.close().await;
    client.close().await;
}

/// A bounded session write gives up when the peer never acknowledges.
#[tokio::test]
async fn session_write_gives_up() {
    let mut server = Server::bind(
        "127.0.0.1:0".parse().unwrap(),
        EndpointConfig::default().with_timeout(Duration::from_millis(200)),
    )
    .await
    .unwrap();
    let server_addr = server.local_addr();
    let cfg = EndpointConfig::default()
        .with_timeout(Duration::from_millis(10))
        .with_retransmit(Retransmit::Bounded(3));

    let client_task = tokio::spawn(async move { client::connect(server_addr, cfg).await });
    server.accept().await.unwrap();
    // The server stays in synchronous mode and never reads.
    let mut client = client_task.await.unwrap().unwrap().run();

    let result = client.write(b"hello?").await;
    assert!(
        matches!(result, Err(ConnError::MaxRetriesExceeded { attempts: 3 })),
        "got: {result:?}"
    );
    assert!(matches!(client.write(b"again").await, Err(ConnError::Broken)));
    drop(server);
}

/// Bytes a synchronous connection already buffered survive `run()`.
#[tokio::test]
async fn buffered_bytes_carry_over_into_session() {
    let cfg = EndpointConfig::default().with_timeout(Duration::from_millis(200));
    let mut server = Server::bind("127.0.0.1:0".parse().unwrap(), cfg.clone())
        .await
        .unwrap();
    let server_addr = server.local_addr();

    let client_task = tokio::spawn(async move { client::connect(server_addr, cfg).await });
    server.accept().await.unwrap();
    let mut client = client_task.await.unwrap().unwrap();

    let writer = tokio::spawn(async move {
        client.write(b"abcdef").await.expect("client write");
        client
    });
    let head = server.read_exact(2).await.expect("server read");
    assert_eq!(head, b"ab");
    let _client = writer.await.unwrap();

    let mut session = server.into_connection().unwrap().run();
    let tail = session.read(4).await.expect("session read");
    assert_eq!(tail, b"cdef");
}
