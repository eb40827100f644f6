//! Simulated fingerprint sensor.
//!
//! Stands in for the optical reader until the sensor driver lands. After a
//! configurable delay the attempt resolves according to `AuthMode`. In
//! `token_file` mode a touch is simulated by creating the token file; the
//! token is consumed on use.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use gatekeeper_core::config::{AuthConfig, AuthMode};
use gatekeeper_services::{AuthPoll, Authenticator};

pub struct SimulatedFingerprint {
    mode: AuthMode,
    delay: Duration,
    token_path: PathBuf,
    started: Option<Instant>,
}

impl SimulatedFingerprint {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            mode: config.mode,
            delay: config.delay(),
            token_path: config.token_path.clone(),
            started: None,
        }
    }
}

impl Authenticator for SimulatedFingerprint {
    fn begin(&mut self) {
        tracing::info!(mode = ?self.mode, "place finger on sensor");
        self.started = Some(Instant::now());
    }

    fn poll(&mut self) -> AuthPoll {
        let Some(started) = self.started else {
            return AuthPoll::Pending;
        };
        if started.elapsed() < self.delay {
            return AuthPoll::Pending;
        }
        let answer = match self.mode {
            AuthMode::Accept => AuthPoll::Granted,
            AuthMode::Reject => AuthPoll::Denied,
            AuthMode::TokenFile => {
                if !self.token_path.exists() {
                    return AuthPoll::Pending;
                }
                if let Err(e) = std::fs::remove_file(&self.token_path) {
                    tracing::warn!(error = %e, path = %self.token_path.display(), "could not consume token");
                }
                AuthPoll::Granted
            }
        };
        self.started = None;
        answer
    }

    fn cancel(&mut self) {
        if self.started.take().is_some() {
            tracing::debug!("authentication attempt cancelled");
        }
    }
}
