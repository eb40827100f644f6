//! gatekeeper-ctl: host-side receiver and controller for gatekeeperd.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use gatekeeper_core::codec::StreamDecoder;
use gatekeeper_core::config::GatekeeperConfig;
use gatekeeper_core::wire::{DeviceMessage, HostCommand};
use gatekeeper_services::{HostEvent, HostVerifier};

// ── Receipt ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Receipt {
    transfer: u64,
    file: String,
    bytes: u64,
    frames: u64,
    expected_hash: String,
    computed_hash: String,
    decision: &'static str,
}

fn save_transfer(
    out_dir: &Path,
    transfer: u64,
    ciphertext: &[u8],
    mut receipt: Receipt,
) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let bin = out_dir.join(format!("received_{transfer}.bin"));
    std::fs::write(&bin, ciphertext).with_context(|| format!("failed to write {}", bin.display()))?;
    receipt.file = bin.display().to_string();

    let json = out_dir.join(format!("received_{transfer}.json"));
    let text = serde_json::to_string_pretty(&receipt).context("failed to serialize receipt")?;
    std::fs::write(&json, text).with_context(|| format!("failed to write {}", json.display()))?;
    Ok(json)
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn connect(addr: &str) -> Result<TcpStream> {
    TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to gatekeeperd at {addr}; is it running?"))
}

/// Verifier matching the device's frame limit and digest.
fn host_verifier(config: &GatekeeperConfig) -> HostVerifier {
    HostVerifier::new(
        StreamDecoder::new(config.link.max_frame_payload),
        config.session.digest.running_digest(),
    )
}

/// Receive transfers, verify each digest, and answer ALLOW or CUT.
async fn cmd_watch(
    config: &GatekeeperConfig,
    addr: &str,
    out_dir: &Path,
    force_cut: bool,
) -> Result<()> {
    let mut stream = connect(addr).await?;
    println!(
        "Connected to {addr} ({:?} digest). Waiting for a drive...",
        config.session.digest
    );

    let mut verifier = host_verifier(config);
    let mut transfers: u64 = 0;
    let mut buf = vec![0u8; 16 * 1024];

    loop {
        let n = stream.read(&mut buf).await.context("link read failed")?;
        if n == 0 {
            println!("Device closed the link.");
            return Ok(());
        }
        verifier.feed(&buf[..n]);

        while let Some(event) = verifier.next_event() {
            match event {
                HostEvent::Device(msg) => print_device(&msg),
                HostEvent::Frame { len, total } => {
                    tracing::debug!(len, total, "frame received");
                }
                HostEvent::Verdict {
                    decision,
                    expected,
                    computed,
                } => {
                    let decision = if force_cut { HostCommand::Cut } else { decision };
                    transfers += 1;
                    let frames = verifier.frames();
                    let ciphertext = verifier.take_ciphertext();

                    println!("  device hash   : {}", hex::encode(expected));
                    println!("  computed hash : {}", hex::encode(computed));
                    println!("  → {}", decision.as_str());
                    stream
                        .write_all(decision.to_line().as_bytes())
                        .await
                        .context("failed to send verdict")?;

                    let receipt = Receipt {
                        transfer: transfers,
                        file: String::new(),
                        bytes: ciphertext.len() as u64,
                        frames,
                        expected_hash: hex::encode(expected),
                        computed_hash: hex::encode(computed),
                        decision: decision.as_str(),
                    };
                    match save_transfer(out_dir, transfers, &ciphertext, receipt) {
                        Ok(path) => println!("  receipt       : {}", path.display()),
                        Err(e) => eprintln!("  could not save transfer: {e:#}"),
                    }
                }
                HostEvent::Unrecognized(line) => println!("  ? {line}"),
                HostEvent::Framing(e) => eprintln!("  framing error: {e}"),
            }
        }
    }
}

/// Send CUT and print whatever the device answers within a second.
async fn cmd_cut(config: &GatekeeperConfig, addr: &str) -> Result<()> {
    let mut stream = connect(addr).await?;
    stream
        .write_all(HostCommand::Cut.to_line().as_bytes())
        .await
        .context("failed to send CUT")?;

    let mut verifier = host_verifier(config);
    let mut buf = vec![0u8; 4096];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while let Ok(read) = tokio::time::timeout_at(deadline, stream.read(&mut buf)).await {
        let n = read.context("link read failed")?;
        if n == 0 {
            break;
        }
        verifier.feed(&buf[..n]);
        while let Some(event) = verifier.next_event() {
            if let HostEvent::Device(msg) = event {
                print_device(&msg);
            }
        }
    }
    Ok(())
}

fn print_device(msg: &DeviceMessage) {
    match msg {
        DeviceMessage::UsbInserted => println!("═══════════════════════════════════════\n  Drive inserted"),
        DeviceMessage::Error(_) => eprintln!("  {msg}"),
        DeviceMessage::Progress(bytes) => println!("  … {bytes} bytes"),
        _ => println!("  {msg}"),
    }
}

fn print_usage(default_addr: &str) {
    println!("Usage: gatekeeper-ctl [--addr <host:port>] [--out <dir>] <command>");
    println!();
    println!("Commands:");
    println!("  watch         Receive transfers and answer ALLOW when the hash verifies");
    println!("  watch --cut   Receive transfers but always answer CUT");
    println!("  cut           Disconnect the drive now");
    println!();
    println!("Options:");
    println!("  --addr <host:port>   Device link address (default: {default_addr})");
    println!("  --out <dir>          Where received_<n>.bin and receipts go (default: .)");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = GatekeeperConfig::load().context("invalid gatekeeper config")?;
    let default_addr = config.link.listen_addr.clone();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut addr = default_addr.clone();
    let mut out_dir = PathBuf::from(".");
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" => {
                i += 1;
                addr = args.get(i).context("--addr requires a value")?.clone();
            }
            "--out" => {
                i += 1;
                out_dir = PathBuf::from(args.get(i).context("--out requires a value")?);
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["watch"] | [] => cmd_watch(&config, &addr, &out_dir, false).await,
        ["watch", "--cut"] => cmd_watch(&config, &addr, &out_dir, true).await,
        ["cut"] => cmd_cut(&config, &addr).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage(&default_addr);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            print_usage(&default_addr);
            std::process::exit(1);
        }
    }
}
