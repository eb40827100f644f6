//! One drive insertion's lifetime: state, key material, and counters.

use std::fmt;
use std::time::Instant;

use gatekeeper_core::crypto::CryptoContext;
use gatekeeper_core::wire::Digest;

/// Monotonic session number, unique per daemon run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Idle,
    Authenticating,
    Scanning,
    Streaming,
    AwaitingHostDecision,
}

impl State {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Authenticating => "authenticating",
            Self::Scanning => "scanning",
            Self::Streaming => "streaming",
            Self::AwaitingHostDecision => "awaiting_host_decision",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a session ended, as far as the relay is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    #[default]
    Pending,
    Allowed,
    Cut,
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    pub(crate) state: State,
    pub(crate) context: CryptoContext,
    started_at: Instant,
    /// Deadline of the current wait (authentication or host decision).
    pub(crate) deadline: Option<Instant>,
    pub(crate) chunks_sent: u64,
    pub(crate) bytes_sent: u64,
    pub(crate) outcome: Outcome,
    pub(crate) digest: Option<Digest>,
}

impl Session {
    pub(crate) fn new(id: SessionId, context: CryptoContext, now: Instant) -> Self {
        Self {
            id,
            state: State::Authenticating,
            context,
            started_at: now,
            deadline: None,
            chunks_sent: 0,
            bytes_sent: 0,
            outcome: Outcome::Pending,
            digest: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Final digest, once streaming has completed.
    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    pub(crate) fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }
}
