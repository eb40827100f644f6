//! Collaborator ports: the narrow contracts the orchestrator drives.
//!
//! Drive access, biometric authentication, and malware scanning live outside
//! the core. Hardware adapters implement these traits; tests script them.

use thiserror::Error;

/// Result of one drive read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkRead {
    /// Up to `max` bytes of plaintext. May be empty.
    Data(Vec<u8>),
    EndOfFile,
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("drive I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("drive is not ready")]
    NotReady,
}

/// The mass-storage drive behind the relay.
pub trait Drive: Send {
    /// Cheap presence check, polled every tick.
    fn is_present(&mut self) -> bool;

    /// Position the content stream at its start. Called once per session
    /// before the first read.
    fn rewind(&mut self) -> Result<(), ReadError> {
        Ok(())
    }

    /// Read the next chunk of at most `max` bytes.
    fn read_next_chunk(&mut self, max: usize) -> Result<ChunkRead, ReadError>;
}

/// Answer from a non-blocking authentication poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPoll {
    Pending,
    Granted,
    Denied,
}

/// Biometric authentication, split into start / poll / cancel so the tick
/// loop never blocks on the sensor.
pub trait Authenticator: Send {
    /// Start a fresh attempt, discarding any previous one.
    fn begin(&mut self);

    fn poll(&mut self) -> AuthPoll;

    /// Abandon the attempt in progress. Safe to call when none is running.
    fn cancel(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanVerdict {
    Clean,
    Threat,
}

/// Malware pre-scan. Synchronous, single verdict per session.
pub trait ThreatScanner: Send {
    fn scan(&mut self) -> Result<ScanVerdict, ReadError>;
}
