//! Cryptographic capabilities for the secure streaming pipeline.
//!
//! The gatekeeper depends on three narrow contracts:
//!   1. `KeySource`: a fresh key + IV per session
//!   2. `StreamCipher`: in-place keystream encryption, position carried across chunks
//!   3. `RunningDigest`: one incremental digest over the ciphertext stream
//!
//! The default implementations are all built on BLAKE3; SHA-256 is available
//! as the running digest for hosts that verify with it. The keystream cipher
//! (keyed BLAKE3 in XOF mode over the IV) is a placeholder: deterministic and
//! interchangeable, not a certified construction. Swap in a vetted cipher by
//! implementing `StreamCipher`; nothing upstream changes.
//!
//! Key material derives ZeroizeOnDrop and is wiped from memory when dropped.

use std::fmt;

use rand::RngCore;
use sha2::{Digest as _, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::config::DigestAlgorithm;
use crate::wire::Digest;

/// Key length required by the default cipher.
pub const KEY_LEN: usize = 32;

/// IV length required by the default cipher.
pub const IV_LEN: usize = 16;

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> Digest {
    *blake3::hash(data).as_bytes()
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Key and IV scoped to exactly one session.
///
/// Deliberately not `Clone`: a context is created once, handed to the
/// pipeline, and wiped when the session ends.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct CryptoContext {
    key: Vec<u8>,
    iv: Vec<u8>,
}

impl CryptoContext {
    pub fn new(key: Vec<u8>, iv: Vec<u8>) -> Self {
        Self { key, iv }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Non-secret identifier for reuse detection: BLAKE3(key || iv).
    pub fn fingerprint(&self) -> Digest {
        let mut h = blake3::Hasher::new();
        h.update(&self.key);
        h.update(&self.iv);
        *h.finalize().as_bytes()
    }
}

impl fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoContext")
            .field("key_len", &self.key.len())
            .field("iv_len", &self.iv.len())
            .finish()
    }
}

// ── Capabilities ──────────────────────────────────────────────────────────────

/// Supplies one fresh context per session.
pub trait KeySource: Send {
    fn fresh_context(&mut self) -> Result<CryptoContext, CryptoError>;
}

/// Stream cipher operating in place. Each `apply` continues the keystream
/// where the previous call stopped, so the same bytes pushed twice encrypt
/// differently.
pub trait StreamCipher: Send {
    fn key_len(&self) -> usize;
    fn iv_len(&self) -> usize;

    /// Load a context and rewind the keystream to position zero.
    fn reset(&mut self, ctx: &CryptoContext) -> Result<(), CryptoError>;

    fn apply(&mut self, data: &mut [u8]) -> Result<(), CryptoError>;

    /// Forget all keystream state.
    fn clear(&mut self);
}

/// Incremental integrity digest.
pub trait RunningDigest: Send {
    fn reset(&mut self);
    fn update(&mut self, data: &[u8]);
    fn finalize(&mut self) -> Digest;
}

/// Check a context against a cipher's required sizes.
pub fn check_context(cipher: &dyn StreamCipher, ctx: &CryptoContext) -> Result<(), CryptoError> {
    if ctx.key().len() != cipher.key_len() {
        return Err(CryptoError::InvalidContext {
            field: "key",
            expected: cipher.key_len(),
            actual: ctx.key().len(),
        });
    }
    if ctx.iv().len() != cipher.iv_len() {
        return Err(CryptoError::InvalidContext {
            field: "iv",
            expected: cipher.iv_len(),
            actual: ctx.iv().len(),
        });
    }
    Ok(())
}

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Draws key and IV from the thread-local CSPRNG.
#[derive(Debug, Default)]
pub struct RandomKeys;

impl KeySource for RandomKeys {
    fn fresh_context(&mut self) -> Result<CryptoContext, CryptoError> {
        let mut rng = rand::thread_rng();
        let mut key = vec![0u8; KEY_LEN];
        let mut iv = vec![0u8; IV_LEN];
        rng.try_fill_bytes(&mut key)
            .map_err(|e| CryptoError::Entropy(e.to_string()))?;
        rng.try_fill_bytes(&mut iv)
            .map_err(|e| CryptoError::Entropy(e.to_string()))?;
        Ok(CryptoContext::new(key, iv))
    }
}

/// Keyed BLAKE3 XOF keystream: keystream = BLAKE3-keyed(key, iv) read as XOF.
#[derive(Default)]
pub struct Blake3Keystream {
    reader: Option<blake3::OutputReader>,
}

impl Blake3Keystream {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamCipher for Blake3Keystream {
    fn key_len(&self) -> usize {
        KEY_LEN
    }

    fn iv_len(&self) -> usize {
        IV_LEN
    }

    fn reset(&mut self, ctx: &CryptoContext) -> Result<(), CryptoError> {
        check_context(&*self, ctx)?;
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(ctx.key());
        let mut hasher = blake3::Hasher::new_keyed(&key);
        hasher.update(ctx.iv());
        self.reader = Some(hasher.finalize_xof());
        Ok(())
    }

    fn apply(&mut self, data: &mut [u8]) -> Result<(), CryptoError> {
        let reader = self.reader.as_mut().ok_or(CryptoError::NotInitialized)?;
        let mut keystream = Zeroizing::new(vec![0u8; data.len()]);
        reader.fill(&mut keystream);
        for (byte, k) in data.iter_mut().zip(keystream.iter()) {
            *byte ^= k;
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.reader = None;
    }
}

/// Incremental BLAKE3 over everything passed to `update` since `reset`.
#[derive(Default)]
pub struct Blake3Digest(blake3::Hasher);

impl Blake3Digest {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }
}

impl RunningDigest for Blake3Digest {
    fn reset(&mut self) {
        self.0.reset();
    }

    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(&mut self) -> Digest {
        *self.0.finalize().as_bytes()
    }
}

/// Incremental SHA-256, for hosts that check `HASH:` with it.
#[derive(Default)]
pub struct Sha256Digest(Sha256);

impl Sha256Digest {
    pub fn new() -> Self {
        Self(Sha256::new())
    }
}

impl RunningDigest for Sha256Digest {
    fn reset(&mut self) {
        sha2::Digest::reset(&mut self.0);
    }

    fn update(&mut self, data: &[u8]) {
        sha2::Digest::update(&mut self.0, data);
    }

    fn finalize(&mut self) -> Digest {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0.clone().finalize());
        out
    }
}

impl DigestAlgorithm {
    pub fn running_digest(self) -> Box<dyn RunningDigest> {
        match self {
            Self::Blake3 => Box::new(Blake3Digest::new()),
            Self::Sha256 => Box::new(Sha256Digest::new()),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid context: {field} is {actual} bytes, cipher requires {expected}")]
    InvalidContext {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("cipher used before a context was loaded")]
    NotInitialized,

    #[error("entropy source failed: {0}")]
    Entropy(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
