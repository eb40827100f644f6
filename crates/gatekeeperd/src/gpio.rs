//! VBUS relay line over sysfs GPIO.

use std::path::PathBuf;

use gatekeeper_services::Actuator;

pub struct GpioActuator {
    value_path: Option<PathBuf>,
}

impl GpioActuator {
    /// `None` runs without hardware: every write is only logged.
    pub fn new(value_path: Option<PathBuf>) -> Self {
        if value_path.is_none() {
            tracing::warn!("no relay GPIO configured, relay writes are log-only");
        }
        Self { value_path }
    }
}

impl Actuator for GpioActuator {
    fn drive(&mut self, connected: bool) {
        let Some(path) = &self.value_path else {
            tracing::debug!(connected, "relay line");
            return;
        };
        let level: &[u8] = if connected { b"1" } else { b"0" };
        if let Err(e) = std::fs::write(path, level) {
            tracing::error!(error = %e, path = %path.display(), connected, "relay GPIO write failed");
        }
    }
}
