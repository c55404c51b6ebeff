//! meshtxd — chunked payload transfer over an emulated mesh link.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;

use meshtx_core::config::MeshTxConfig;
use meshtx_core::receiver::Receiver;
use meshtx_core::sender::ChunkedSender;
use meshtx_core::transport::NodeId;
use meshtx_core::wire::MAX_PAYLOAD;
use meshtx_services::{collect_replies, send_paced, Node, SpoolSink, UdpMeshTransport};

// ── Config ────────────────────────────────────────────────────────────────────

fn load_config(explicit: Option<&Path>) -> Result<MeshTxConfig> {
    if let Some(path) = explicit {
        return MeshTxConfig::load_from(path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }
    if let Err(e) = MeshTxConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    Ok(MeshTxConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeshTxConfig::default()
    }))
}

async fn bind_link(config: &MeshTxConfig, addr: SocketAddr) -> Result<UdpMeshTransport> {
    UdpMeshTransport::bind(
        config.node.node_id,
        addr,
        config.peers.iter().map(|p| (p.node_id, p.addr)),
    )
    .await
}

/// `send` takes an ephemeral port on the configured interface, so it can run
/// next to a `listen` that owns the configured port. Receivers learn the
/// reply address from the datagrams themselves.
fn send_bind_addr(config: &MeshTxConfig) -> SocketAddr {
    SocketAddr::new(config.node.bind.ip(), 0)
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn cmd_listen(config: MeshTxConfig) -> Result<()> {
    let link = Arc::new(bind_link(&config, config.node.bind).await?);

    let spool_dir = config.receiver.spool_dir.clone();
    match &spool_dir {
        Some(dir) => tracing::info!(path = %dir.display(), "spooling delivered payloads"),
        None => tracing::info!("spool disabled, payloads are logged only"),
    }
    let receiver = Receiver::with_options(SpoolSink::new(spool_dir), config.receiver.options());
    let node = Node::new(link, receiver);

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let stats = node.run(shutdown_tx.subscribe()).await?;
    tracing::info!(completed = stats.completed, "meshtxd stopped");
    Ok(())
}

async fn cmd_send(config: MeshTxConfig, dest: &str, file: &str, as_hex: bool) -> Result<()> {
    let dest: NodeId = dest
        .parse()
        .with_context(|| format!("invalid node id '{dest}'"))?;

    let raw = std::fs::read(file).with_context(|| format!("failed to read {file}"))?;
    let payload = if as_hex {
        let text = String::from_utf8(raw).context("hex input is not UTF-8")?;
        let compact: String = text.split_whitespace().collect();
        hex::decode(compact).context("hex input is not valid hex")?
    } else {
        raw
    };
    if payload.len() > MAX_PAYLOAD {
        anyhow::bail!(
            "payload is {} bytes, the limit is {}",
            payload.len(),
            MAX_PAYLOAD
        );
    }

    let link = bind_link(&config, send_bind_addr(&config)).await?;
    if !dest.is_broadcast() && link.peer_addr(dest).is_none() {
        anyhow::bail!("no link address configured for {dest}, add it under [[peers]]");
    }

    let mut sender = ChunkedSender::from_entropy(config.transfer.pacing());
    let plan = sender.plan(dest, Bytes::from(payload))?;
    println!(
        "Sending {} bytes to {} as transfer {:08x} ({} chunks, checksum 0x{:08x})",
        plan.total_len,
        dest,
        plan.transfer_id,
        plan.chunk_count(),
        plan.checksum
    );

    let report = send_paced(&link, &plan).await?;
    if report.chunks_skipped > 0 {
        println!("  {} chunk(s) failed to send", report.chunks_skipped);
    }

    let window = config.transfer.reply_wait();
    if window.is_zero() {
        println!("  Sent {} frames, not waiting for replies", report.frames_sent);
        return Ok(());
    }

    let replies = collect_replies(&link, plan.transfer_id, window).await;
    for message in &replies.errors {
        println!("  ERROR from receiver: {message}");
    }
    if replies.confirmed() {
        println!("  Receiver confirmed the transfer");
    } else if replies.errors.is_empty() {
        println!(
            "  {} ACK(s) within {}ms, delivery unconfirmed",
            replies.acks,
            window.as_millis()
        );
    } else {
        anyhow::bail!("receiver rejected transfer {:08x}", plan.transfer_id);
    }
    Ok(())
}

fn print_usage() {
    println!("Usage: meshtxd [--config <path>] <command>");
    println!();
    println!("Commands:");
    println!("  listen                          Receive transfers until Ctrl-C (default)");
    println!("  send <node-id> <file> [--hex]   Send a file's bytes to a node");
    println!("  help                            Show this message");
    println!();
    println!("Node ids: !0000abcd, 0xabcd, or decimal. !ffffffff broadcasts.");
    println!("Log level: RUST_LOG=meshtx_core=debug,meshtx_services=debug");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --config option
    let mut config_path: Option<PathBuf> = None;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--config" {
            i += 1;
            config_path = Some(args.get(i).context("--config requires a value")?.into());
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        ["listen"] | [] => cmd_listen(load_config(config_path.as_deref())?).await,
        ["send", dest, file] => {
            cmd_send(load_config(config_path.as_deref())?, dest, file, false).await
        }
        ["send", dest, file, "--hex"] | ["send", "--hex", dest, file] => {
            cmd_send(load_config(config_path.as_deref())?, dest, file, true).await
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
