//! Host-side verifier.
//!
//! Consumes the device → host byte stream, reassembles the ciphertext of the
//! current transfer, recomputes the running digest, and decides ALLOW or CUT
//! when the device announces its own digest.

use gatekeeper_core::codec::{CodecError, StreamDecoder, Unit};
use gatekeeper_core::crypto::{Blake3Digest, RunningDigest};
use gatekeeper_core::wire::{DeviceMessage, Digest, HostCommand};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Device(DeviceMessage),
    /// One frame received. `total` is the transfer's ciphertext size so far.
    Frame { len: usize, total: u64 },
    /// The device announced its digest; `decision` is the line to send back.
    Verdict {
        decision: HostCommand,
        expected: Digest,
        computed: Digest,
    },
    Unrecognized(String),
    Framing(CodecError),
}

pub struct HostVerifier {
    decoder: StreamDecoder,
    digest: Box<dyn RunningDigest>,
    ciphertext: Vec<u8>,
    frames: u64,
}

impl Default for HostVerifier {
    fn default() -> Self {
        Self::new(StreamDecoder::default(), Box::new(Blake3Digest::new()))
    }
}

impl HostVerifier {
    pub fn new(decoder: StreamDecoder, digest: Box<dyn RunningDigest>) -> Self {
        Self {
            decoder,
            digest,
            ciphertext: Vec::new(),
            frames: 0,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.decoder.extend(bytes);
    }

    pub fn next_event(&mut self) -> Option<HostEvent> {
        let unit = match self.decoder.next_unit()? {
            Ok(unit) => unit,
            Err(e) => return Some(HostEvent::Framing(e)),
        };

        let event = match unit {
            Unit::Frame(payload) => {
                self.digest.update(&payload);
                self.ciphertext.extend_from_slice(&payload);
                self.frames += 1;
                HostEvent::Frame {
                    len: payload.len(),
                    total: self.ciphertext.len() as u64,
                }
            }
            Unit::Line(line) => match line.parse::<DeviceMessage>() {
                Ok(DeviceMessage::Hash(expected)) => {
                    let computed = self.digest.finalize();
                    let decision = if computed == expected {
                        HostCommand::Allow
                    } else {
                        HostCommand::Cut
                    };
                    HostEvent::Verdict {
                        decision,
                        expected,
                        computed,
                    }
                }
                Ok(DeviceMessage::UsbInserted) => {
                    self.reset();
                    HostEvent::Device(DeviceMessage::UsbInserted)
                }
                Ok(msg) => HostEvent::Device(msg),
                Err(_) => HostEvent::Unrecognized(line),
            },
        };
        Some(event)
    }

    /// Frames received in the current transfer.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Hand over the reassembled ciphertext and start a fresh transfer.
    pub fn take_ciphertext(&mut self) -> Vec<u8> {
        let out = std::mem::take(&mut self.ciphertext);
        self.reset();
        out
    }

    fn reset(&mut self) {
        self.digest.reset();
        self.ciphertext.clear();
        self.frames = 0;
    }
}
