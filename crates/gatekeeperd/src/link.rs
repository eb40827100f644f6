//! Host link plumbing between the synchronous state machine and tokio.
//!
//! Outbound bytes leave the machine through `LinkWriter` (a `std::io::Write`
//! over an unbounded channel) and are written to whichever host connection
//! is current. Inbound bytes are read by a per-connection task and forwarded
//! to the machine's task.
//!
//! Either side noticing the connection is gone reports a `LinkDown` tagged
//! with the connection number, and `LinkStatus` flips to down so the
//! machine's next write fails instead of vanishing.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

/// Whether a host connection is currently usable. Shared by the accept loop,
/// the writer task, and `LinkWriter`.
#[derive(Clone, Default)]
pub struct LinkStatus(Arc<AtomicBool>);

impl LinkStatus {
    pub fn set_up(&self, up: bool) {
        self.0.store(up, Ordering::SeqCst);
    }

    pub fn is_up(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A host connection ended. `conn` is the number the accept loop gave it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDown {
    pub conn: u64,
    pub reason: String,
}

/// Machine-side sink. Writes fail while no host is connected.
#[derive(Clone)]
pub struct LinkWriter {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    status: LinkStatus,
}

impl LinkWriter {
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>, status: LinkStatus) -> Self {
        Self { tx, status }
    }
}

impl io::Write for LinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.status.is_up() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "no host connected"));
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "host link writer stopped"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Forward outbound bytes to the current host connection.
/// Bytes still queued when a connection fails are dropped.
pub async fn writer_loop(
    mut out_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut conn_rx: mpsc::UnboundedReceiver<(u64, OwnedWriteHalf)>,
    status: LinkStatus,
    down_tx: mpsc::UnboundedSender<LinkDown>,
) {
    let mut conn: Option<(u64, OwnedWriteHalf)> = None;
    let mut dropped: u64 = 0;
    loop {
        tokio::select! {
            // A new connection must be installed before bytes queued after it.
            biased;
            Some(next) = conn_rx.recv() => {
                if dropped > 0 {
                    tracing::warn!(bytes = dropped, "output dropped while no host was connected");
                    dropped = 0;
                }
                conn = Some(next);
            }
            bytes = out_rx.recv() => {
                let Some(bytes) = bytes else { break };
                let Some((id, w)) = conn.as_mut() else {
                    dropped += bytes.len() as u64;
                    continue;
                };
                if let Err(e) = w.write_all(&bytes).await {
                    tracing::warn!(conn = *id, error = %e, "host write failed, dropping connection");
                    status.set_up(false);
                    let _ = down_tx.send(LinkDown {
                        conn: *id,
                        reason: format!("write failed: {e}"),
                    });
                    conn = None;
                }
            }
        }
    }
    tracing::debug!("link writer stopped");
}

/// Read host bytes until EOF or error, forward them, then report the loss.
pub async fn reader_loop(
    conn: u64,
    mut rd: OwnedReadHalf,
    in_tx: mpsc::UnboundedSender<Vec<u8>>,
    down_tx: mpsc::UnboundedSender<LinkDown>,
) {
    let mut buf = vec![0u8; 1024];
    let reason = loop {
        match rd.read(&mut buf).await {
            Ok(0) => break "host closed the connection".to_string(),
            Ok(n) => {
                if in_tx.send(buf[..n].to_vec()).is_err() {
                    return;
                }
            }
            Err(e) => break format!("read failed: {e}"),
        }
    };
    tracing::info!(conn, %reason, "host disconnected");
    let _ = down_tx.send(LinkDown { conn, reason });
}
