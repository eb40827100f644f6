//! Host link channel.
//!
//! Outbound: control lines and binary frames, written in call order to one
//! byte sink. Inbound: raw bytes from the host, decoded into commands. The
//! host only ever sends lines, so the default inbound decoder is line-only.
//!
//! The channel does no I/O scheduling of its own. The daemon feeds inbound
//! bytes and flushes the sink; tests use a `Vec<u8>`.

use std::io::{self, Write};

use gatekeeper_core::codec::{CodecError, StreamDecoder, Unit};
use gatekeeper_core::wire::{DeviceMessage, Frame, HostCommand};

/// One decoded unit from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Command(HostCommand),
    /// A well-formed line outside the command vocabulary.
    Unrecognized(String),
    /// The host sent a binary frame. Only reported by a frame-capable decoder.
    UnexpectedFrame(usize),
    /// Bytes the decoder had to discard.
    Framing(CodecError),
}

pub struct Channel<W: Write> {
    out: W,
    decoder: StreamDecoder,
    frames_sent: u64,
    bytes_sent: u64,
}

impl<W: Write> Channel<W> {
    pub fn new(out: W) -> Self {
        Self::with_decoder(out, StreamDecoder::lines_only())
    }

    pub fn with_decoder(out: W, decoder: StreamDecoder) -> Self {
        Self {
            out,
            decoder,
            frames_sent: 0,
            bytes_sent: 0,
        }
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Buffer bytes received from the host.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.decoder.extend(bytes);
    }

    /// Next complete inbound unit, in arrival order.
    pub fn next_inbound(&mut self) -> Option<Inbound> {
        let unit = self.decoder.next_unit()?;
        Some(match unit {
            Ok(Unit::Line(line)) => match line.parse::<HostCommand>() {
                Ok(cmd) => Inbound::Command(cmd),
                Err(_) => Inbound::Unrecognized(line),
            },
            Ok(Unit::Frame(payload)) => Inbound::UnexpectedFrame(payload.len()),
            Err(e) => Inbound::Framing(e),
        })
    }

    /// Drain every buffered inbound unit.
    pub fn drain_inbound(&mut self) -> Vec<Inbound> {
        std::iter::from_fn(|| self.next_inbound()).collect()
    }

    /// Drop partially received input, e.g. from a connection that is gone.
    pub fn discard_inbound(&mut self) {
        self.decoder.clear();
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    pub fn send_message(&mut self, msg: &DeviceMessage) -> io::Result<()> {
        tracing::debug!(line = %msg, "→ host");
        self.out.write_all(msg.to_line().as_bytes())?;
        self.out.flush()
    }

    /// Write one frame as a single contiguous buffer.
    pub fn send_frame(&mut self, frame: &Frame) -> io::Result<()> {
        self.out.write_all(&frame.encode())?;
        self.out.flush()?;
        self.frames_sent += 1;
        self.bytes_sent += frame.len() as u64;
        Ok(())
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn sink(&self) -> &W {
        &self.out
    }
}
