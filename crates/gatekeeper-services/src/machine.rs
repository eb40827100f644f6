//! Gatekeeper state machine.
//!
//! Single-threaded and tick-driven. Each tick services, in priority order:
//!   1. inbound host units, in arrival order (a CUT preempts everything)
//!   2. drive presence edges
//!   3. one step of the active state (auth poll, scan, one chunk, deadline)
//!
//! Nothing inside a tick blocks. Authentication is polled; its deadline is
//! checked like any other. Every session-fatal path goes through `abort`,
//! which is the only place a live session is torn down with the relay cut.

use std::collections::HashSet;
use std::io::Write;
use std::time::{Duration, Instant};

use gatekeeper_core::config::GatekeeperConfig;
use gatekeeper_core::crypto::{KeySource, RandomKeys};
use gatekeeper_core::wire::{DeviceMessage, Digest, HostCommand, CHUNK_CAPACITY};

use crate::fault::Fault;
use crate::pipeline::SecureStream;
use crate::ports::{AuthPoll, Authenticator, ChunkRead, Drive, ScanVerdict, ThreatScanner};
use crate::relay::{Actuator, RelayController, RelayState};
use crate::session::{Outcome, Session, SessionId, State};
use crate::transport::{Channel, Inbound};

/// The external collaborators the machine drives.
pub struct Peripherals {
    pub drive: Box<dyn Drive>,
    pub authenticator: Box<dyn Authenticator>,
    pub scanner: Box<dyn ThreatScanner>,
}

#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub chunk_capacity: usize,
    pub auth_timeout: Duration,
    /// None = wait for the host indefinitely.
    pub decision_timeout: Option<Duration>,
    pub progress_lines: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: CHUNK_CAPACITY,
            auth_timeout: Duration::from_secs(10),
            decision_timeout: Some(Duration::from_secs(30)),
            progress_lines: false,
        }
    }
}

impl MachineConfig {
    pub fn from_config(config: &GatekeeperConfig) -> Self {
        Self {
            chunk_capacity: config.session.chunk_capacity,
            auth_timeout: config.auth.timeout(),
            decision_timeout: config.session.decision_timeout(),
            progress_lines: config.link.progress_lines,
        }
    }
}

pub struct Gatekeeper<W: Write> {
    config: MachineConfig,
    relay: RelayController,
    channel: Channel<W>,
    drive: Box<dyn Drive>,
    authenticator: Box<dyn Authenticator>,
    scanner: Box<dyn ThreatScanner>,
    keys: Box<dyn KeySource>,
    pipeline: SecureStream,

    session: Option<Session>,
    drive_present: bool,
    /// Drive left connected after a host ALLOW, with no live session.
    released: bool,
    next_id: u64,
    last_outcome: Outcome,
    last_fault: Option<Fault>,
    used_contexts: HashSet<Digest>,
}

impl<W: Write> Gatekeeper<W> {
    pub fn new(
        actuator: Box<dyn Actuator>,
        out: W,
        peripherals: Peripherals,
        config: MachineConfig,
    ) -> Self {
        let pipeline = SecureStream::blake3(config.chunk_capacity);
        Self {
            relay: RelayController::new(actuator),
            channel: Channel::new(out),
            drive: peripherals.drive,
            authenticator: peripherals.authenticator,
            scanner: peripherals.scanner,
            keys: Box::new(RandomKeys),
            pipeline,
            config,
            session: None,
            drive_present: false,
            released: false,
            next_id: 1,
            last_outcome: Outcome::Pending,
            last_fault: None,
            used_contexts: HashSet::new(),
        }
    }

    pub fn with_key_source(mut self, keys: Box<dyn KeySource>) -> Self {
        self.keys = keys;
        self
    }

    /// Replace the default BLAKE3 pipeline. Capacity is taken from the
    /// pipeline passed in.
    pub fn with_pipeline(mut self, pipeline: SecureStream) -> Self {
        self.config.chunk_capacity = pipeline.capacity();
        self.pipeline = pipeline;
        self
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> State {
        self.session.as_ref().map_or(State::Idle, Session::state)
    }

    pub fn relay_state(&self) -> RelayState {
        self.relay.state()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Outcome of the live session, or of the last one if none is live.
    pub fn outcome(&self) -> Outcome {
        self.session
            .as_ref()
            .map_or(self.last_outcome, Session::outcome)
    }

    pub fn last_fault(&self) -> Option<&Fault> {
        self.last_fault.as_ref()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn channel(&self) -> &Channel<W> {
        &self.channel
    }

    // ── Driving ───────────────────────────────────────────────────────────────

    /// Buffer bytes received from the host. They are acted on at the next tick.
    pub fn receive(&mut self, bytes: &[u8]) {
        self.channel.feed(bytes);
    }

    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        self.service_inbound();
        self.service_presence(now);
        if let Err(fault) = self.step(now) {
            self.fail(fault);
        }
    }

    /// Cut the relay and end any live session. Used on daemon shutdown.
    pub fn shutdown(&mut self) {
        tracing::info!(state = %self.state(), "gatekeeper shutting down");
        self.authenticator.cancel();
        self.pipeline.abort();
        self.relay.disconnect();
        self.released = false;
        if let Some(session) = self.session.take() {
            self.close(session, Outcome::Cut);
            self.send_best_effort(&DeviceMessage::RelayCut);
        }
    }

    /// The host link dropped. A live session is aborted with
    /// `Fault::LinkFailure`; a drive already released by ALLOW stays connected.
    pub fn link_lost(&mut self, reason: &str) {
        self.channel.discard_inbound();
        if self.session.is_some() {
            self.abort(Fault::LinkFailure(reason.to_string()));
        } else {
            tracing::info!(reason, released = self.released, "host link lost with no live session");
        }
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    fn service_inbound(&mut self) {
        while let Some(unit) = self.channel.next_inbound() {
            match unit {
                Inbound::Command(HostCommand::Cut) => self.host_cut(),
                Inbound::Command(HostCommand::Allow) => self.host_allow(),
                Inbound::Unrecognized(line) => {
                    self.fail(Fault::ProtocolViolation(format!("unrecognized line {line:?}")))
                }
                Inbound::UnexpectedFrame(len) => self.fail(Fault::ProtocolViolation(format!(
                    "host sent a {len}-byte binary frame"
                ))),
                Inbound::Framing(e) => self.fail(Fault::FramingError(e)),
            }
        }
    }

    fn host_cut(&mut self) {
        if self.session.is_some() {
            self.abort(Fault::HostCut);
            return;
        }
        tracing::info!(released = self.released, "host cut with no live session");
        self.relay.disconnect();
        self.released = false;
        self.last_outcome = Outcome::Cut;
        self.send_best_effort(&DeviceMessage::RelayCut);
    }

    fn host_allow(&mut self) {
        let awaiting = self
            .session
            .as_ref()
            .is_some_and(|s| s.state == State::AwaitingHostDecision);
        if !awaiting {
            self.fail(Fault::ProtocolViolation(format!(
                "ALLOW while {}",
                self.state()
            )));
            return;
        }
        let Some(session) = self.session.take() else {
            return;
        };
        self.relay.allow();
        self.released = true;
        self.close(session, Outcome::Allowed);
        if let Err(fault) = self.emit(&DeviceMessage::RelayAllow) {
            // The drive stays released; the host can no longer be told.
            tracing::warn!(%fault, "could not acknowledge ALLOW");
            self.last_fault = Some(fault);
        }
    }

    fn fail(&mut self, fault: Fault) {
        if fault.is_session_fatal() {
            self.abort(fault);
        } else {
            self.report(fault);
        }
    }

    /// Non-fatal: log, tell the host, change nothing.
    fn report(&mut self, fault: Fault) {
        tracing::warn!(%fault, state = %self.state(), "ignored host input");
        if let Some(msg) = fault.diagnostic() {
            self.send_best_effort(&msg);
        }
        self.last_fault = Some(fault);
    }

    // ── Presence ──────────────────────────────────────────────────────────────

    fn service_presence(&mut self, now: Instant) {
        let present = self.drive.is_present();
        let was_present = std::mem::replace(&mut self.drive_present, present);
        match (was_present, present) {
            (false, true) => self.drive_inserted(now),
            (true, false) => self.drive_removed(),
            _ => {}
        }
    }

    fn drive_inserted(&mut self, now: Instant) {
        if self.session.is_some() {
            return;
        }
        if let Err(fault) = self.start_session(now) {
            self.fail(fault);
        }
    }

    fn drive_removed(&mut self) {
        if self.session.is_some() {
            self.abort(Fault::DriveRemoved);
        } else if self.released {
            tracing::info!("released drive removed, cutting relay");
            self.relay.disconnect();
            self.released = false;
            self.send_best_effort(&DeviceMessage::UsbRemoved);
            self.send_best_effort(&DeviceMessage::RelayCut);
        }
    }

    fn start_session(&mut self, now: Instant) -> Result<(), Fault> {
        // A new drive supersedes any drive previously released.
        self.relay.disconnect();
        self.released = false;

        self.last_fault = None;
        self.emit(&DeviceMessage::UsbInserted)?;

        let context = self
            .keys
            .fresh_context()
            .map_err(|e| Fault::CryptoFailure(e.to_string()))?;
        if !self.used_contexts.insert(context.fingerprint()) {
            return Err(Fault::CryptoFailure("key source repeated a context".into()));
        }

        let id = SessionId(self.next_id);
        self.next_id += 1;
        let mut session = Session::new(id, context, now);
        session.deadline = Some(now + self.config.auth_timeout);
        self.session = Some(session);

        tracing::info!(session = %id, "drive inserted, authenticating");
        self.authenticator.begin();
        Ok(())
    }

    // ── Active step ───────────────────────────────────────────────────────────

    fn step(&mut self, now: Instant) -> Result<(), Fault> {
        match self.state() {
            State::Idle => Ok(()),
            State::Authenticating => self.step_auth(now),
            State::Scanning => self.step_scan(),
            State::Streaming => self.step_stream(now),
            State::AwaitingHostDecision => self.step_await(now),
        }
    }

    fn step_auth(&mut self, now: Instant) -> Result<(), Fault> {
        match self.authenticator.poll() {
            AuthPoll::Granted => {
                self.emit(&DeviceMessage::AuthOk)?;
                self.set_state(State::Scanning, None);
                Ok(())
            }
            AuthPoll::Denied => Err(Fault::AuthFailure { timed_out: false }),
            AuthPoll::Pending => {
                if self.session.as_ref().is_some_and(|s| s.expired(now)) {
                    Err(Fault::AuthFailure { timed_out: true })
                } else {
                    Ok(())
                }
            }
        }
    }

    fn step_scan(&mut self) -> Result<(), Fault> {
        match self.scanner.scan() {
            Ok(ScanVerdict::Clean) => {}
            Ok(ScanVerdict::Threat) => return Err(Fault::ThreatDetected),
            Err(e) => return Err(Fault::ReadFailure(e.to_string())),
        }

        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };
        self.pipeline.begin(&session.context)?;
        self.drive
            .rewind()
            .map_err(|e| Fault::ReadFailure(e.to_string()))?;

        self.emit(&DeviceMessage::Ready)?;
        self.relay.allow();
        self.set_state(State::Streaming, None);
        self.emit(&DeviceMessage::ChunkStart)
    }

    fn step_stream(&mut self, now: Instant) -> Result<(), Fault> {
        let read = self
            .drive
            .read_next_chunk(self.config.chunk_capacity)
            .map_err(|e| Fault::ReadFailure(e.to_string()))?;

        match read {
            ChunkRead::Data(chunk) => {
                let frame = self.pipeline.push(chunk)?;
                self.channel
                    .send_frame(&frame)
                    .map_err(|e| Fault::LinkFailure(e.to_string()))?;

                let Some(session) = self.session.as_mut() else {
                    return Ok(());
                };
                session.chunks_sent += 1;
                session.bytes_sent += frame.len() as u64;
                tracing::debug!(
                    session = %session.id(),
                    seq = session.chunks_sent - 1,
                    len = frame.len(),
                    "frame sent"
                );
                let total = session.bytes_sent;
                if self.config.progress_lines {
                    self.emit(&DeviceMessage::Progress(total))?;
                }
                Ok(())
            }
            ChunkRead::EndOfFile => {
                let digest = self.pipeline.finish()?;
                self.emit(&DeviceMessage::ChunkEnd)?;
                self.emit(&DeviceMessage::Hash(digest))?;
                self.emit(&DeviceMessage::Complete)?;

                let deadline = self.config.decision_timeout.map(|t| now + t);
                if let Some(session) = self.session.as_mut() {
                    session.digest = Some(digest);
                    tracing::info!(
                        session = %session.id(),
                        chunks = session.chunks_sent,
                        bytes = session.bytes_sent,
                        hash = %hex::encode(digest),
                        "stream complete, awaiting host decision"
                    );
                }
                self.set_state(State::AwaitingHostDecision, deadline);
                Ok(())
            }
        }
    }

    fn step_await(&mut self, now: Instant) -> Result<(), Fault> {
        if self.session.as_ref().is_some_and(|s| s.expired(now)) {
            return Err(Fault::DecisionTimeout);
        }
        Ok(())
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// End the live session on a fatal fault: relay cut first, then the
    /// diagnostic and the cut acknowledgement.
    fn abort(&mut self, fault: Fault) {
        self.authenticator.cancel();
        self.pipeline.abort();
        self.relay.disconnect();
        self.released = false;

        tracing::warn!(%fault, state = %self.state(), "session aborted");
        if let Some(msg) = fault.diagnostic() {
            self.send_best_effort(&msg);
        }
        self.send_best_effort(&DeviceMessage::RelayCut);

        match self.session.take() {
            Some(session) => self.close(session, Outcome::Cut),
            None => self.last_outcome = Outcome::Cut,
        }
        self.last_fault = Some(fault);
    }

    fn close(&mut self, mut session: Session, outcome: Outcome) {
        session.outcome = outcome;
        session.deadline = None;
        tracing::info!(
            session = %session.id(),
            outcome = ?outcome,
            chunks = session.chunks_sent(),
            bytes = session.bytes_sent(),
            elapsed_ms = session.started_at().elapsed().as_millis() as u64,
            "session closed"
        );
        self.last_outcome = outcome;
        // Dropping the session zeroizes its crypto context.
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn set_state(&mut self, state: State, deadline: Option<Instant>) {
        if let Some(session) = self.session.as_mut() {
            tracing::info!(session = %session.id(), from = %session.state, to = %state, "transition");
            session.state = state;
            session.deadline = deadline;
        }
    }

    fn emit(&mut self, msg: &DeviceMessage) -> Result<(), Fault> {
        self.channel
            .send_message(msg)
            .map_err(|e| Fault::LinkFailure(e.to_string()))
    }

    fn send_best_effort(&mut self, msg: &DeviceMessage) {
        if let Err(e) = self.channel.send_message(msg) {
            tracing::warn!(line = %msg, error = %e, "host link write failed");
        }
    }
}

impl<W: Write> Drop for Gatekeeper<W> {
    fn drop(&mut self) {
        self.authenticator.cancel();
        self.relay.disconnect();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
