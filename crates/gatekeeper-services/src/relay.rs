//! Relay Safety Controller: sole owner of the VBUS relay.
//!
//! Fail-closed by construction: the actuator is driven Disconnected when the
//! controller is created and again when it is dropped. `disconnect` has no
//! preconditions and can be called from any fault path. `allow` is
//! crate-private so only the state machine can connect the drive.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Physical relay position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayState {
    #[default]
    Disconnected,
    Connected,
}

/// The hardware line behind the relay. Writes must not fail from the
/// controller's point of view; implementations log their own I/O errors.
pub trait Actuator: Send {
    fn drive(&mut self, connected: bool);
}

pub struct RelayController {
    actuator: Box<dyn Actuator>,
    state: RelayState,
}

impl RelayController {
    /// Take ownership of the actuator and force it Disconnected.
    pub fn new(mut actuator: Box<dyn Actuator>) -> Self {
        actuator.drive(false);
        Self {
            actuator,
            state: RelayState::Disconnected,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == RelayState::Connected
    }

    /// Cut VBUS. Idempotent; always re-asserts the line.
    pub fn disconnect(&mut self) {
        self.actuator.drive(false);
        if self.state != RelayState::Disconnected {
            tracing::info!("relay disconnected");
        }
        self.state = RelayState::Disconnected;
    }

    /// Connect VBUS. Only the state machine may call this.
    pub(crate) fn allow(&mut self) {
        self.actuator.drive(true);
        if self.state != RelayState::Connected {
            tracing::info!("relay connected");
        }
        self.state = RelayState::Connected;
    }
}

impl Drop for RelayController {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for RelayController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayController")
            .field("state", &self.state)
            .finish()
    }
}

// ── In-memory actuator ────────────────────────────────────────────────────────

/// Actuator that latches the last written level in shared memory.
/// Used by tests and by bench setups without relay hardware.
#[derive(Debug, Clone, Default)]
pub struct LatchActuator {
    line: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

/// Read-only view of a `LatchActuator` line.
#[derive(Debug, Clone)]
pub struct RelayProbe {
    line: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl LatchActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self) -> RelayProbe {
        RelayProbe {
            line: self.line.clone(),
            writes: self.writes.clone(),
        }
    }
}

impl Actuator for LatchActuator {
    fn drive(&mut self, connected: bool) {
        self.line.store(connected, Ordering::SeqCst);
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl RelayProbe {
    /// True when the physical line is energized.
    pub fn is_connected(&self) -> bool {
        self.line.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}
