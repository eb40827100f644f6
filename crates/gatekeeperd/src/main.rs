//! gatekeeperd: USB gatekeeper device daemon.

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use gatekeeper_core::config::GatekeeperConfig;
use gatekeeper_core::crypto::Blake3Keystream;
use gatekeeper_services::{Gatekeeper, MachineConfig, Peripherals, SecureStream};

mod auth;
mod drive;
mod gpio;
mod link;
mod scan;

use auth::SimulatedFingerprint;
use drive::ImageDrive;
use gpio::GpioActuator;
use link::{LinkStatus, LinkWriter};
use scan::SignatureScanner;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = GatekeeperConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = GatekeeperConfig::load().context("invalid gatekeeper config")?;
    let signatures = config
        .scan
        .decoded()
        .context("invalid scan signatures in config")?;

    tracing::info!(
        listen = %config.link.listen_addr,
        drive = %config.drive.image_path.display(),
        auth_mode = ?config.auth.mode,
        digest = ?config.session.digest,
        chunk_capacity = config.session.chunk_capacity,
        "gatekeeperd starting"
    );

    // ── Host link ────────────────────────────────────────────────────────────
    let listener = TcpListener::bind(&config.link.listen_addr)
        .await
        .with_context(|| format!("failed to bind host link on {}", config.link.listen_addr))?;

    let status = LinkStatus::default();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (conn_tx, conn_rx) = mpsc::unbounded_channel();
    let (in_tx, mut in_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (down_tx, mut down_rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(link::writer_loop(
        out_rx,
        conn_rx,
        status.clone(),
        down_tx.clone(),
    ));

    // ── State machine ────────────────────────────────────────────────────────
    let peripherals = Peripherals {
        drive: Box::new(ImageDrive::new(&config.drive.image_path)),
        authenticator: Box::new(SimulatedFingerprint::new(&config.auth)),
        scanner: Box::new(SignatureScanner::new(&config.drive.image_path, signatures)),
    };
    let pipeline = SecureStream::new(
        Box::new(Blake3Keystream::new()),
        config.session.digest.running_digest(),
        config.session.chunk_capacity,
    );
    let mut machine = Gatekeeper::new(
        Box::new(GpioActuator::new(config.relay.gpio_value_path.clone())),
        LinkWriter::new(out_tx, status.clone()),
        peripherals,
        MachineConfig::from_config(&config),
    )
    .with_pipeline(pipeline);

    let mut ticker = tokio::time::interval(config.session.tick_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut reader: Option<JoinHandle<()>> = None;
    let mut conn: u64 = 0;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                if let Some(previous) = reader.take() {
                    previous.abort();
                }
                if status.is_up() {
                    status.set_up(false);
                    machine.link_lost("host connection replaced");
                }
                conn += 1;
                tracing::info!(%peer, conn, "host connected");
                let (rd, wr) = stream.into_split();
                if conn_tx.send((conn, wr)).is_err() {
                    anyhow::bail!("host link writer stopped");
                }
                status.set_up(true);
                reader = Some(tokio::spawn(link::reader_loop(
                    conn,
                    rd,
                    in_tx.clone(),
                    down_tx.clone(),
                )));
            }
            Some(bytes) = in_rx.recv() => {
                machine.receive(&bytes);
            }
            Some(down) = down_rx.recv() => {
                // Reports from a connection already replaced are stale.
                if down.conn == conn {
                    status.set_up(false);
                    machine.link_lost(&down.reason);
                }
            }
            _ = ticker.tick() => {
                machine.tick();
            }
        }
    }

    machine.shutdown();
    drop(machine);
    if let Some(reader) = reader {
        reader.abort();
    }
    // The writer drains what the machine queued on shutdown, then stops.
    drop(conn_tx);
    if let Err(e) = writer_task.await {
        tracing::warn!(error = %e, "link writer task failed");
    }
    tracing::info!("gatekeeperd stopped");
    Ok(())
}
