//! Gatekeeper integration test harness.
//!
//! Every test drives a real `Gatekeeper` in-process. Collaborators are
//! scripted through shared handles so a test can flip drive presence, hold
//! or resolve authentication, and inject read failures between ticks.
//! Device output is decoded with the same `HostVerifier` the host uses.
//!
//!   cargo test --test integration

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use gatekeeper_core::config::DigestAlgorithm;
use gatekeeper_core::crypto::Blake3Keystream;
use gatekeeper_core::wire::{DeviceMessage, HostCommand};
use gatekeeper_services::{
    AuthPoll, Authenticator, ChunkRead, Drive, Gatekeeper, HostEvent, HostVerifier,
    LatchActuator, MachineConfig, Peripherals, ReadError, RelayProbe, ScanVerdict,
    SecureStream, State, ThreatScanner,
};

mod cut;
mod removal;
mod scenarios;
mod timeouts;

// ── Output capture ────────────────────────────────────────────────────────────

/// Clonable byte sink. `fail` makes every later write return BrokenPipe.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
    fail: Arc<AtomicBool>,
}

impl SharedBuffer {
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }

    pub fn break_link(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link down"));
        }
        self.bytes.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ── Scripted collaborators ────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct DriveScript {
    pub present: Arc<AtomicBool>,
    pub chunks: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Fail the read after this many successful reads.
    pub fail_after: Arc<Mutex<Option<usize>>>,
    pub reads: Arc<AtomicUsize>,
}

impl DriveScript {
    pub fn load(&self, chunks: &[Vec<u8>]) {
        *self.chunks.lock().unwrap() = chunks.iter().cloned().collect();
    }

    pub fn insert(&self) {
        self.present.store(true, Ordering::SeqCst);
    }

    pub fn remove(&self) {
        self.present.store(false, Ordering::SeqCst);
    }
}

struct ScriptedDrive {
    script: DriveScript,
    pending: VecDeque<Vec<u8>>,
}

impl Drive for ScriptedDrive {
    fn is_present(&mut self) -> bool {
        self.script.present.load(Ordering::SeqCst)
    }

    fn rewind(&mut self) -> Result<(), ReadError> {
        self.pending = self.script.chunks.lock().unwrap().clone();
        Ok(())
    }

    fn read_next_chunk(&mut self, max: usize) -> Result<ChunkRead, ReadError> {
        let done = self.script.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.script.fail_after.lock().unwrap() {
            if done >= limit {
                return Err(ReadError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "media error",
                )));
            }
        }
        match self.pending.pop_front() {
            Some(chunk) => {
                assert!(chunk.len() <= max, "scripted chunk exceeds capacity");
                Ok(ChunkRead::Data(chunk))
            }
            None => Ok(ChunkRead::EndOfFile),
        }
    }
}

#[derive(Clone)]
pub struct AuthScript {
    pub answer: Arc<Mutex<AuthPoll>>,
    pub begins: Arc<AtomicUsize>,
    pub cancels: Arc<AtomicUsize>,
}

impl AuthScript {
    pub fn set(&self, answer: AuthPoll) {
        *self.answer.lock().unwrap() = answer;
    }
}

struct ScriptedAuth(AuthScript);

impl Authenticator for ScriptedAuth {
    fn begin(&mut self) {
        self.0.begins.fetch_add(1, Ordering::SeqCst);
    }

    fn poll(&mut self) -> AuthPoll {
        *self.0.answer.lock().unwrap()
    }

    fn cancel(&mut self) {
        self.0.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedScan {
    verdict: ScanVerdict,
    scans: Arc<AtomicUsize>,
}

impl ThreatScanner for ScriptedScan {
    fn scan(&mut self) -> Result<ScanVerdict, ReadError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        Ok(self.verdict)
    }
}

// ── Rig ───────────────────────────────────────────────────────────────────────

pub struct Rig {
    pub gk: Gatekeeper<SharedBuffer>,
    pub out: SharedBuffer,
    pub relay: RelayProbe,
    pub drive: DriveScript,
    pub auth: AuthScript,
    pub scans: Arc<AtomicUsize>,
    pub now: Instant,
}

pub struct RigBuilder {
    chunks: Vec<Vec<u8>>,
    auth: AuthPoll,
    verdict: ScanVerdict,
    config: MachineConfig,
    digest: DigestAlgorithm,
}

impl RigBuilder {
    pub fn chunks(mut self, chunks: Vec<Vec<u8>>) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn auth(mut self, answer: AuthPoll) -> Self {
        self.auth = answer;
        self
    }

    pub fn verdict(mut self, verdict: ScanVerdict) -> Self {
        self.verdict = verdict;
        self
    }

    pub fn digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    pub fn config(mut self, f: impl FnOnce(&mut MachineConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn build(self) -> Rig {
        let out = SharedBuffer::default();
        let actuator = LatchActuator::new();
        let relay = actuator.probe();

        let drive = DriveScript::default();
        drive.load(&self.chunks);
        drive.insert();

        let auth = AuthScript {
            answer: Arc::new(Mutex::new(self.auth)),
            begins: Arc::default(),
            cancels: Arc::default(),
        };
        let scans = Arc::new(AtomicUsize::new(0));

        let peripherals = Peripherals {
            drive: Box::new(ScriptedDrive {
                script: drive.clone(),
                pending: VecDeque::new(),
            }),
            authenticator: Box::new(ScriptedAuth(auth.clone())),
            scanner: Box::new(ScriptedScan {
                verdict: self.verdict,
                scans: scans.clone(),
            }),
        };
        let pipeline = SecureStream::new(
            Box::new(Blake3Keystream::new()),
            self.digest.running_digest(),
            self.config.chunk_capacity,
        );
        let gk = Gatekeeper::new(Box::new(actuator), out.clone(), peripherals, self.config)
            .with_pipeline(pipeline);

        Rig {
            gk,
            out,
            relay,
            drive,
            auth,
            scans,
            now: Instant::now(),
        }
    }
}

pub fn rig() -> RigBuilder {
    RigBuilder {
        chunks: Vec::new(),
        auth: AuthPoll::Granted,
        verdict: ScanVerdict::Clean,
        config: MachineConfig::default(),
        digest: DigestAlgorithm::Blake3,
    }
}

impl Rig {
    /// One tick, with the rig's clock advanced by 1 ms.
    pub fn tick(&mut self) {
        self.now += Duration::from_millis(1);
        self.gk.tick_at(self.now);
    }

    pub fn tick_after(&mut self, elapsed: Duration) {
        self.now += elapsed;
        self.gk.tick_at(self.now);
    }

    /// Tick until the machine reaches `state`, failing after `limit` ticks.
    pub fn run_until(&mut self, state: State, limit: usize) {
        for _ in 0..limit {
            if self.gk.state() == state {
                return;
            }
            self.tick();
        }
        assert_eq!(self.gk.state(), state, "state not reached in {limit} ticks");
    }

    pub fn send(&mut self, cmd: HostCommand) {
        self.gk.receive(cmd.to_line().as_bytes());
    }

    /// Everything the device has sent so far, decoded as the host sees it.
    pub fn events(&self) -> Vec<HostEvent> {
        let mut verifier = HostVerifier::default();
        verifier.feed(&self.out.snapshot());
        std::iter::from_fn(|| verifier.next_event()).collect()
    }

    /// Control lines only, in order.
    pub fn lines(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HostEvent::Device(msg) => Some(msg.to_string()),
                HostEvent::Verdict { expected, .. } => {
                    Some(DeviceMessage::Hash(expected).to_string())
                }
                _ => None,
            })
            .collect()
    }

    pub fn frames(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, HostEvent::Frame { .. }))
            .count()
    }

    pub fn reads(&self) -> usize {
        self.drive.reads.load(Ordering::SeqCst)
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}
