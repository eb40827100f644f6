//! Gatekeeper wire format: everything that crosses the host link.
//!
//! Two message families share one duplex byte stream:
//!
//!   Binary frame (device → host only):
//!     [0xAA] [length: u32 BE] [ciphertext; length] [0x55]
//!
//!   Control line (both directions): ASCII text terminated by '\n'.
//!
//! These types ARE the protocol. The byte values and line spellings must stay
//! bit-compatible with every deployed host receiver.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// First byte of every binary frame.
pub const START_MARK: u8 = 0xAA;

/// Last byte of every binary frame.
pub const END_MARK: u8 = 0x55;

/// Default plaintext chunk capacity. Bounds device RAM per chunk.
pub const CHUNK_CAPACITY: usize = 4096;

/// Hard ceiling on a declared frame length accepted by the codec.
pub const MAX_FRAME_PAYLOAD: usize = 64 * 1024;

/// Longest control line (excluding the terminator) the codec will buffer.
pub const MAX_LINE_LEN: usize = 128;

/// Start marker + big-endian length.
pub const FRAME_HEADER_LEN: usize = 5;

/// End marker.
pub const FRAME_TRAILER_LEN: usize = 1;

/// Size of the running integrity digest.
pub const DIGEST_LEN: usize = 32;

/// The running integrity digest over a session's ciphertext.
pub type Digest = [u8; DIGEST_LEN];

// ── Frame Header ──────────────────────────────────────────────────────────────

/// Fixed prefix of a binary frame.
///
/// Wire size: 5 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct FrameHeader {
    /// Always START_MARK on a well-formed frame.
    pub start: u8,
    /// Ciphertext length in bytes, big-endian.
    pub length: U32<BigEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(FrameHeader, [u8; FRAME_HEADER_LEN]);

impl FrameHeader {
    pub fn new(length: u32) -> Self {
        Self {
            start: START_MARK,
            length: U32::new(length),
        }
    }

    pub fn length(&self) -> usize {
        self.length.get() as usize
    }
}

// ── Frame ─────────────────────────────────────────────────────────────────────

/// The wire form of one ciphertext chunk.
///
/// Frames carry no sequence number. The receiver rebuilds the stream purely by
/// concatenating frames in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    ciphertext: Bytes,
}

impl Frame {
    /// Wrap ciphertext in a frame, enforcing the chunk capacity.
    pub fn new(ciphertext: impl Into<Bytes>, capacity: usize) -> Result<Self, WireError> {
        let ciphertext = ciphertext.into();
        if ciphertext.len() > capacity {
            return Err(WireError::FrameTooLarge {
                len: ciphertext.len(),
                max: capacity,
            });
        }
        Ok(Self { ciphertext })
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    pub fn len(&self) -> usize {
        self.ciphertext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }

    /// Total bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_LEN + self.ciphertext.len() + FRAME_TRAILER_LEN
    }

    /// Append the wire encoding to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        // Length is bounded by the capacity checked in `new`, far below u32::MAX.
        let header = FrameHeader::new(self.ciphertext.len() as u32);
        out.reserve(self.wire_len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.ciphertext);
        out.push(END_MARK);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_len());
        self.encode_into(&mut out);
        out
    }
}

// ── Device → Host lines ───────────────────────────────────────────────────────

/// Diagnostic codes carried by `ERROR:<code>` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Drive read failed mid-session.
    Read,
    /// Cipher or digest primitive rejected the context or input.
    Crypto,
    /// The outbound host link failed.
    Link,
    /// The host never answered the final hash.
    Timeout,
    /// The host sent a command that does not apply to the current state.
    Protocol,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Crypto => "CRYPTO",
            Self::Link => "LINK",
            Self::Timeout => "TIMEOUT",
            Self::Protocol => "PROTOCOL",
        }
    }
}

impl FromStr for ErrorCode {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READ" => Ok(Self::Read),
            "CRYPTO" => Ok(Self::Crypto),
            "LINK" => Ok(Self::Link),
            "TIMEOUT" => Ok(Self::Timeout),
            "PROTOCOL" => Ok(Self::Protocol),
            other => Err(WireError::UnknownLine(format!("ERROR:{other}"))),
        }
    }
}

/// Control lines sent by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceMessage {
    UsbInserted,
    UsbRemoved,
    AuthOk,
    AuthFail,
    Ready,
    Threat,
    ChunkStart,
    ChunkEnd,
    Progress(u64),
    Hash(Digest),
    Complete,
    RelayCut,
    RelayAllow,
    Error(ErrorCode),
}

impl DeviceMessage {
    /// Render as a wire line including the trailing '\n'.
    pub fn to_line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for DeviceMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UsbInserted => f.write_str("EVENT:USB_INSERTED"),
            Self::UsbRemoved => f.write_str("EVENT:USB_REMOVED"),
            Self::AuthOk => f.write_str("AUTH:OK"),
            Self::AuthFail => f.write_str("AUTH:FAIL"),
            Self::Ready => f.write_str("STATUS:READY"),
            Self::Threat => f.write_str("STATUS:THREAT"),
            Self::ChunkStart => f.write_str("CHUNK_START"),
            Self::ChunkEnd => f.write_str("CHUNK_END"),
            Self::Progress(bytes) => write!(f, "PROGRESS:{bytes}"),
            Self::Hash(digest) => write!(f, "HASH:{}", hex::encode(digest)),
            Self::Complete => f.write_str("STATUS:COMPLETE"),
            Self::RelayCut => f.write_str("ACTION:RELAY_CUT"),
            Self::RelayAllow => f.write_str("ACTION:RELAY_ALLOW"),
            Self::Error(code) => write!(f, "ERROR:{}", code.as_str()),
        }
    }
}

impl FromStr for DeviceMessage {
    type Err = WireError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        let msg = match line {
            "EVENT:USB_INSERTED" => Self::UsbInserted,
            "EVENT:USB_REMOVED" => Self::UsbRemoved,
            "AUTH:OK" => Self::AuthOk,
            "AUTH:FAIL" => Self::AuthFail,
            "STATUS:READY" => Self::Ready,
            "STATUS:THREAT" => Self::Threat,
            "CHUNK_START" => Self::ChunkStart,
            "CHUNK_END" => Self::ChunkEnd,
            "STATUS:COMPLETE" => Self::Complete,
            "ACTION:RELAY_CUT" => Self::RelayCut,
            "ACTION:RELAY_ALLOW" => Self::RelayAllow,
            other => {
                if let Some(hex_digest) = other.strip_prefix("HASH:") {
                    return parse_digest(hex_digest).map(Self::Hash);
                }
                if let Some(bytes) = other.strip_prefix("PROGRESS:") {
                    return bytes
                        .parse()
                        .map(Self::Progress)
                        .map_err(|_| WireError::UnknownLine(other.to_string()));
                }
                if let Some(code) = other.strip_prefix("ERROR:") {
                    return code.parse().map(Self::Error);
                }
                return Err(WireError::UnknownLine(other.to_string()));
            }
        };
        Ok(msg)
    }
}

fn parse_digest(text: &str) -> Result<Digest, WireError> {
    let bytes = hex::decode(text).map_err(|_| WireError::BadDigest(text.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| WireError::BadDigest(text.to_string()))
}

// ── Host → Device lines ───────────────────────────────────────────────────────

/// Commands the host may send. The vocabulary is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    /// Keep the relay connected and release the drive to the host.
    Allow,
    /// Disconnect the relay now, from any state.
    Cut,
}

impl HostCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Cut => "CUT",
        }
    }

    pub fn to_line(self) -> String {
        format!("{}\n", self.as_str())
    }
}

impl FromStr for HostCommand {
    type Err = WireError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        match line.trim() {
            "ALLOW" => Ok(Self::Allow),
            "CUT" => Ok(Self::Cut),
            other => Err(WireError::UnknownLine(other.to_string())),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when building or interpreting wire data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame payload {len} exceeds capacity {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("unrecognized control line: {0:?}")]
    UnknownLine(String),

    #[error("malformed digest: {0:?}")]
    BadDigest(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
