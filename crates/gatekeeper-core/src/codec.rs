//! Incremental stream codec for the multiplexed host link.
//!
//! Bytes arrive in arbitrary pieces. `StreamDecoder` accumulates them and
//! yields one complete unit at a time: a control line or a binary frame.
//! A unit starting with START_MARK is a frame; anything else is line text.
//!
//! Malformed input never poisons the decoder. The offending bytes are dropped
//! and decoding resumes at the next start marker or line.
//!
//! The host → device direction carries only control lines. A decoder built
//! with `lines_only` never buffers toward a declared frame length: a start
//! marker, or any other byte that cannot appear in a line, is reported as
//! stray at once, so a truncated frame cannot hold back the command after it.
//! Noise is never dropped past a '\n'.

use bytes::{Buf, Bytes, BytesMut};
use zerocopy::FromBytes;

use crate::wire::{
    FrameHeader, END_MARK, FRAME_HEADER_LEN, FRAME_TRAILER_LEN, MAX_FRAME_PAYLOAD, MAX_LINE_LEN,
    START_MARK,
};

/// One decoded unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unit {
    /// A control line with the terminator (and any trailing '\r') stripped.
    Line(String),
    /// The ciphertext of a well-formed binary frame.
    Frame(Bytes),
}

/// Recoverable framing faults. Each one has already been resynchronized past.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("frame of declared length {declared} ended with 0x{found:02x}, not the end marker")]
    BadEndMarker { declared: usize, found: u8 },

    #[error("declared frame length {declared} exceeds maximum {max}")]
    Oversize { declared: usize, max: usize },

    #[error("control line exceeds {} bytes", MAX_LINE_LEN)]
    LineTooLong,

    #[error("control line is not printable ASCII")]
    InvalidLine,

    #[error("{0} stray bytes before a start marker")]
    Stray(usize),
}

/// Accumulating decoder. Feed bytes with `extend`, drain units with `next_unit`.
#[derive(Debug)]
pub struct StreamDecoder {
    buf: BytesMut,
    max_payload: usize,
    frames: bool,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_PAYLOAD)
    }
}

impl StreamDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(MAX_LINE_LEN),
            max_payload,
            frames: true,
        }
    }

    /// Decoder for a line-only stream. Frames are never assembled.
    pub fn lines_only() -> Self {
        Self {
            buf: BytesMut::with_capacity(MAX_LINE_LEN),
            max_payload: 0,
            frames: false,
        }
    }

    /// Append newly received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet decoded.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Decode the next complete unit.
    ///
    /// Returns `None` when more bytes are needed. A `Some(Err(_))` reports a
    /// framing fault that has already been discarded; keep calling.
    pub fn next_unit(&mut self) -> Option<Result<Unit, CodecError>> {
        loop {
            let first = *self.buf.first()?;
            if !self.frames {
                if let Some(noise) = self.leading_noise() {
                    self.buf.advance(noise);
                    return Some(Err(CodecError::Stray(noise)));
                }
            } else if first == START_MARK {
                return self.next_frame();
            }
            match self.next_line() {
                // Blank line: skip and keep decoding.
                Some(Ok(Unit::Line(line))) if line.is_empty() => continue,
                other => return other,
            }
        }
    }

    /// Length of the prefix of the current line that ends with its last
    /// non-line byte, if it has one. Only the tail after it can still be a
    /// command.
    fn leading_noise(&self) -> Option<usize> {
        let end = self
            .buf
            .iter()
            .position(|&b| b == b'\n')
            .unwrap_or(self.buf.len());
        if let Some(total) = self.buffered_frame_len() {
            if total <= end {
                return Some(total);
            }
        }
        self.buf[..end]
            .iter()
            .rposition(|&b| !is_line_byte(b))
            .map(|last| last + 1)
    }

    /// Length of a complete, well-formed frame at the front of the buffer.
    fn buffered_frame_len(&self) -> Option<usize> {
        if self.buf.first() != Some(&START_MARK) || self.buf.len() < FRAME_HEADER_LEN {
            return None;
        }
        let header = FrameHeader::read_from(&self.buf[..FRAME_HEADER_LEN])?;
        let total = FRAME_HEADER_LEN
            .checked_add(header.length())?
            .checked_add(FRAME_TRAILER_LEN)?;
        (self.buf.len() >= total && self.buf[total - 1] == END_MARK).then_some(total)
    }

    fn next_frame(&mut self) -> Option<Result<Unit, CodecError>> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return None;
        }
        let header = FrameHeader::read_from(&self.buf[..FRAME_HEADER_LEN])?;
        let declared = header.length();

        if declared > self.max_payload {
            // Not a real frame. Drop the start byte and rescan.
            self.buf.advance(1);
            return Some(Err(CodecError::Oversize {
                declared,
                max: self.max_payload,
            }));
        }

        let total = FRAME_HEADER_LEN + declared + FRAME_TRAILER_LEN;
        if self.buf.len() < total {
            return None;
        }

        let found = self.buf[total - 1];
        if found != END_MARK {
            self.buf.advance(total);
            return Some(Err(CodecError::BadEndMarker { declared, found }));
        }

        let mut unit = self.buf.split_to(total);
        unit.advance(FRAME_HEADER_LEN);
        unit.truncate(declared);
        Some(Ok(Unit::Frame(unit.freeze())))
    }

    fn next_line(&mut self) -> Option<Result<Unit, CodecError>> {
        let stop = self
            .buf
            .iter()
            .position(|&b| b == b'\n' || b == START_MARK);

        let Some(stop) = stop else {
            if self.buf.len() > MAX_LINE_LEN {
                self.buf.clear();
                return Some(Err(CodecError::LineTooLong));
            }
            return None;
        };

        if self.buf[stop] == START_MARK {
            // Text cut short by a frame: the fragment is unusable.
            self.buf.advance(stop);
            return Some(Err(CodecError::Stray(stop)));
        }

        let raw = self.buf.split_to(stop + 1);
        let mut text = &raw[..stop];
        if let Some(stripped) = text.strip_suffix(b"\r") {
            text = stripped;
        }
        if text.len() > MAX_LINE_LEN {
            return Some(Err(CodecError::LineTooLong));
        }
        if !text.iter().all(|&b| b.is_ascii_graphic() || b == b' ') {
            return Some(Err(CodecError::InvalidLine));
        }
        // All bytes checked ASCII above.
        let line = String::from_utf8_lossy(text).into_owned();
        Some(Ok(Unit::Line(line)))
    }
}

fn is_line_byte(b: u8) -> bool {
    b.is_ascii_graphic() || b == b' ' || b == b'\r'
}

impl Iterator for StreamDecoder {
    type Item = Result<Unit, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_unit()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
