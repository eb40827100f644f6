//! Secure streaming pipeline: plaintext chunks in, ciphertext frames out,
//! one running digest over the ciphertext.
//!
//! Lifecycle per session: `begin` → `push`* → `finish`. Every push advances the
//! keystream and the digest, so pushes are never idempotent. Any error leaves
//! the pipeline closed; the session that owned it is over.

use gatekeeper_core::crypto::{
    check_context, Blake3Digest, Blake3Keystream, CryptoContext, CryptoError, RunningDigest,
    StreamCipher,
};
use gatekeeper_core::wire::{Digest, Frame};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Open { next_seq: u64, bytes: u64 },
    Finished,
}

pub struct SecureStream {
    cipher: Box<dyn StreamCipher>,
    digest: Box<dyn RunningDigest>,
    capacity: usize,
    phase: Phase,
}

impl SecureStream {
    pub fn new(
        cipher: Box<dyn StreamCipher>,
        digest: Box<dyn RunningDigest>,
        capacity: usize,
    ) -> Self {
        Self {
            cipher,
            digest,
            capacity,
            phase: Phase::Closed,
        }
    }

    /// BLAKE3 keystream + BLAKE3 digest.
    pub fn blake3(capacity: usize) -> Self {
        Self::new(
            Box::new(Blake3Keystream::new()),
            Box::new(Blake3Digest::new()),
            capacity,
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_open(&self) -> bool {
        matches!(self.phase, Phase::Open { .. })
    }

    /// Sequence number the next pushed chunk will carry.
    pub fn next_sequence(&self) -> Option<u64> {
        match self.phase {
            Phase::Open { next_seq, .. } => Some(next_seq),
            _ => None,
        }
    }

    /// Reset cipher and digest for a new session.
    pub fn begin(&mut self, ctx: &CryptoContext) -> Result<(), PipelineError> {
        self.abort();
        check_context(self.cipher.as_ref(), ctx).map_err(PipelineError::InvalidContext)?;
        self.cipher
            .reset(ctx)
            .map_err(PipelineError::InvalidContext)?;
        self.digest.reset();
        self.phase = Phase::Open {
            next_seq: 0,
            bytes: 0,
        };
        Ok(())
    }

    /// Encrypt `chunk` in place, fold the ciphertext into the digest, and
    /// wrap it as a frame.
    pub fn push(&mut self, mut chunk: Vec<u8>) -> Result<Frame, PipelineError> {
        let (next_seq, bytes) = match self.phase {
            Phase::Open { next_seq, bytes } => (next_seq, bytes),
            Phase::Closed => return Err(PipelineError::NotOpen),
            Phase::Finished => return Err(PipelineError::Finished),
        };
        if chunk.len() > self.capacity {
            return Err(PipelineError::ChunkTooLarge {
                len: chunk.len(),
                max: self.capacity,
            });
        }

        if let Err(e) = self.cipher.apply(&mut chunk) {
            self.abort();
            return Err(PipelineError::Crypto(e));
        }
        self.digest.update(&chunk);

        let len = chunk.len() as u64;
        let frame = Frame::new(chunk, self.capacity).map_err(|_| PipelineError::ChunkTooLarge {
            len: len as usize,
            max: self.capacity,
        })?;
        self.phase = Phase::Open {
            next_seq: next_seq + 1,
            bytes: bytes + len,
        };
        Ok(frame)
    }

    /// Digest over every ciphertext byte pushed since `begin`.
    pub fn finish(&mut self) -> Result<Digest, PipelineError> {
        match self.phase {
            Phase::Open { next_seq, bytes } => {
                let digest = self.digest.finalize();
                self.cipher.clear();
                self.phase = Phase::Finished;
                tracing::debug!(chunks = next_seq, bytes, "pipeline finished");
                Ok(digest)
            }
            Phase::Closed => Err(PipelineError::NotOpen),
            Phase::Finished => Err(PipelineError::Finished),
        }
    }

    /// Drop all session state. Safe in any phase.
    pub fn abort(&mut self) {
        self.cipher.clear();
        self.digest.reset();
        self.phase = Phase::Closed;
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("invalid crypto context: {0}")]
    InvalidContext(CryptoError),

    #[error("pipeline has not been started")]
    NotOpen,

    #[error("pipeline already finished; begin a new session first")]
    Finished,

    #[error("chunk of {len} bytes exceeds capacity {max}")]
    ChunkTooLarge { len: usize, max: usize },

    #[error("encryption failed: {0}")]
    Crypto(CryptoError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
