//! Entry point for `abp-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode.  Each side optionally sends a file and optionally receives one, as a
//! 4-byte little-endian length followed by the bytes.  The client sends
//! first, the server receives first.  All protocol work is delegated to the
//! library; `main.rs` owns only process setup (logging, argument parsing,
//! file I/O).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use abp_over_udp::{client, ConnError, Connection, EndpointConfig, Retransmit, Server, Stats};

/// Reliable byte stream over UDP (alternating-bit protocol).
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,

    #[command(flatten)]
    proto: ProtoArgs,
}

#[derive(Subcommand)]
enum Mode {
    /// Accept one client, receive then send.
    Server {
        /// Local address to bind (e.g. 0.0.0.0:8080).
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        bind: SocketAddr,
        /// Write the received blob here.
        #[arg(long)]
        recv: Option<PathBuf>,
        /// Send this file after receiving.
        #[arg(long)]
        send: Option<PathBuf>,
    },
    /// Connect to a server, send then receive.
    Client {
        /// Remote server address (e.g. 127.0.0.1:8080).
        #[arg(short, long)]
        server: SocketAddr,
        /// Send this file.
        #[arg(long)]
        send: Option<PathBuf>,
        /// Write the received blob here.
        #[arg(long)]
        recv: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ProtoArgs {
    /// Per-attempt receive timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 50)]
    timeout_ms: u64,
    /// Probability of dropping an outgoing datagram.
    #[arg(long, global = true, default_value_t = 0.3)]
    loss: f64,
    /// Largest payload per packet.
    #[arg(long, global = true, default_value_t = 1024)]
    chunk_size: usize,
    /// Transmissions per chunk before a write gives up (0 = never give up).
    #[arg(long, global = true, default_value_t = 100)]
    max_retries: u32,
    /// Seed for the loss simulator.
    #[arg(long, global = true)]
    seed: Option<u64>,
}

impl ProtoArgs {
    fn config(&self) -> EndpointConfig {
        let retransmit = match self.max_retries {
            0 => Retransmit::Unbounded,
            n => Retransmit::Bounded(n),
        };
        let config = EndpointConfig::default()
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_loss_rate(self.loss)
            .with_chunk_size(self.chunk_size)
            .with_retransmit(retransmit);
        match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.proto.config();

    let stats = match cli.mode {
        Mode::Server { bind, recv, send } => {
            log::info!("Starting server on {bind}");
            let mut server = Server::bind(bind, config).await?;
            let peer = server.accept().await?;
            log::info!("Accepted client {peer}");
            let conn = server.into_connection()?;
            transfer(conn, recv.as_deref(), send.as_deref(), Order::RecvFirst).await?
        }
        Mode::Client { server, send, recv } => {
            log::info!("Starting client, connecting to {server}");
            let conn = client::connect(server, config).await?;
            transfer(conn, recv.as_deref(), send.as_deref(), Order::SendFirst).await?
        }
    };

    log::info!(
        "attempts to send: {}, packets sent: {}, packets received: {}",
        stats.send_attempts,
        stats.sent,
        stats.received
    );
    Ok(())
}

/// Timeout periods the last reader keeps re-acking before it exits.
const LINGER_TIMEOUTS: u32 = 20;

enum Order {
    SendFirst,
    RecvFirst,
}

async fn transfer(
    mut conn: Connection,
    recv: Option<&Path>,
    send: Option<&Path>,
    order: Order,
) -> Result<Stats> {
    let mut read_last = false;
    if let Order::SendFirst = order {
        if let Some(path) = send {
            send_file(&mut conn, path).await?;
        }
    }
    if let Some(path) = recv {
        recv_file(&mut conn, path).await?;
        read_last = true;
    }
    if let Order::RecvFirst = order {
        if let Some(path) = send {
            send_file(&mut conn, path).await?;
            read_last = false;
        }
    }

    // The peer's final chunk may still be waiting for an ack that was lost.
    if read_last {
        let period = conn.config().timeout * LINGER_TIMEOUTS;
        conn.linger(period).await?;
    }
    Ok(conn.stats())
}

async fn send_file(conn: &mut Connection, path: &Path) -> Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let len = u32::try_from(data.len()).context("file larger than 4 GiB")?;

    log::info!("Sending {} ({} bytes)", path.display(), data.len());
    conn.write(&len.to_le_bytes()).await?;
    match conn.write(&data).await {
        Err(ConnError::MaxRetriesExceeded { attempts }) => {
            anyhow::bail!("peer stopped acknowledging after {attempts} transmissions")
        }
        other => other?,
    }
    log::info!("Sent {}", path.display());
    Ok(())
}

async fn recv_file(conn: &mut Connection, path: &Path) -> Result<()> {
    let header = conn.read_exact(4).await?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;

    log::info!("Receiving {len} bytes into {}", path.display());
    let data = conn.read_exact(len).await?;
    tokio::fs::write(path, &data)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    log::info!("Got {}", path.display());
    Ok(())
}
