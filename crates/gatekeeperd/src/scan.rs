//! Byte-signature pre-scan over the drive image.
//!
//! A stand-in for the real malware heuristic: any configured signature found
//! anywhere in the image is a threat. Reads in blocks and keeps a tail of
//! `longest - 1` bytes so signatures spanning a block boundary still match.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use gatekeeper_services::{ReadError, ScanVerdict, ThreatScanner};

const SCAN_BLOCK: usize = 64 * 1024;

pub struct SignatureScanner {
    path: PathBuf,
    signatures: Vec<Vec<u8>>,
    longest: usize,
}

impl SignatureScanner {
    pub fn new(path: impl Into<PathBuf>, signatures: Vec<Vec<u8>>) -> Self {
        let signatures: Vec<Vec<u8>> = signatures.into_iter().filter(|s| !s.is_empty()).collect();
        let longest = signatures.iter().map(Vec::len).max().unwrap_or(0);
        Self {
            path: path.into(),
            signatures,
            longest,
        }
    }

    fn matches(&self, haystack: &[u8]) -> bool {
        self.signatures
            .iter()
            .any(|sig| haystack.windows(sig.len()).any(|w| w == sig.as_slice()))
    }
}

impl ThreatScanner for SignatureScanner {
    fn scan(&mut self) -> Result<ScanVerdict, ReadError> {
        if self.signatures.is_empty() {
            return Ok(ScanVerdict::Clean);
        }
        let mut file = File::open(&self.path)?;
        let keep = self.longest - 1;
        let mut block = vec![0u8; SCAN_BLOCK];
        let mut window: Vec<u8> = Vec::with_capacity(SCAN_BLOCK + keep);
        let mut scanned: u64 = 0;

        loop {
            let n = file.read(&mut block)?;
            if n == 0 {
                break;
            }
            scanned += n as u64;
            window.extend_from_slice(&block[..n]);
            if self.matches(&window) {
                tracing::warn!(path = %self.path.display(), offset_hint = scanned, "signature match");
                return Ok(ScanVerdict::Threat);
            }
            let cut = window.len().saturating_sub(keep);
            window.drain(..cut);
        }

        tracing::info!(path = %self.path.display(), bytes = scanned, "scan clean");
        Ok(ScanVerdict::Clean)
    }
}
