//! Configuration system for the gatekeeper.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $GATEKEEPER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/gatekeeper/config.toml
//!   3. ~/.config/gatekeeper/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::wire::{CHUNK_CAPACITY, MAX_FRAME_PAYLOAD};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    pub link: LinkConfig,
    pub session: SessionConfig,
    pub auth: AuthConfig,
    pub drive: DriveConfig,
    pub scan: ScanConfig,
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Address the host link listens on (serial-over-TCP bridge).
    pub listen_addr: String,
    /// Emit PROGRESS:<bytes> lines between frames.
    pub progress_lines: bool,
    /// Largest declared frame length the decoder will buffer.
    pub max_frame_payload: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Plaintext bytes per chunk, and the frame length ceiling.
    pub chunk_capacity: usize,
    /// How long to wait for ALLOW/CUT after the final hash. 0 = forever.
    pub decision_timeout_ms: u64,
    /// Tick period of the orchestrator loop.
    pub tick_interval_ms: u64,
    /// Running digest announced in `HASH:`. Host and device must agree.
    pub digest: DigestAlgorithm,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestAlgorithm {
    #[default]
    Blake3,
    Sha256,
}

/// How the simulated fingerprint reader answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Accept,
    Reject,
    /// Grant once `token_path` exists.
    TokenFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Upper bound on one authentication attempt. Timeout = failure.
    pub timeout_ms: u64,
    pub mode: AuthMode,
    /// Simulated sensor latency.
    pub delay_ms: u64,
    pub token_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Block device or image file standing in for the mass-storage drive.
    pub image_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Hex-encoded byte signatures. Any match is a threat.
    pub signatures: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// sysfs GPIO value file driving the VBUS relay. None = log only.
    pub gpio_value_path: Option<PathBuf>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7300".to_string(),
            progress_lines: false,
            max_frame_payload: MAX_FRAME_PAYLOAD,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: CHUNK_CAPACITY,
            decision_timeout_ms: 30_000,
            tick_interval_ms: 10,
            digest: DigestAlgorithm::Blake3,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            mode: AuthMode::TokenFile,
            delay_ms: 500,
            token_path: data_dir().join("fingerprint.ok"),
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            image_path: PathBuf::from("/dev/sda"),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            // EICAR test-file prefix: "X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR"
            signatures: vec![hex::encode(br"X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR")],
        }
    }
}

impl SessionConfig {
    /// None when the host may take as long as it likes.
    pub fn decision_timeout(&self) -> Option<Duration> {
        (self.decision_timeout_ms > 0).then(|| Duration::from_millis(self.decision_timeout_ms))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl AuthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl ScanConfig {
    /// Decoded signatures. Malformed entries are reported, not skipped.
    pub fn decoded(&self) -> Result<Vec<Vec<u8>>, ConfigError> {
        self.signatures
            .iter()
            .map(|s| hex::decode(s).map_err(|_| ConfigError::Invalid(format!("scan signature {s:?} is not hex"))))
            .collect()
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("gatekeeper")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("gatekeeper")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl GatekeeperConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit file path, then apply env overrides and validate.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            GatekeeperConfig::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("GATEKEEPER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&GatekeeperConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Reject settings the pipeline cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.chunk_capacity == 0 {
            return Err(ConfigError::Invalid("session.chunk_capacity must be > 0".into()));
        }
        if self.session.chunk_capacity > self.link.max_frame_payload {
            return Err(ConfigError::Invalid(format!(
                "session.chunk_capacity {} exceeds link.max_frame_payload {}",
                self.session.chunk_capacity, self.link.max_frame_payload
            )));
        }
        if self.link.max_frame_payload > u32::MAX as usize {
            return Err(ConfigError::Invalid("link.max_frame_payload must fit in u32".into()));
        }
        self.scan.decoded()?;
        Ok(())
    }

    /// Apply GATEKEEPER_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GATEKEEPER_LINK__LISTEN_ADDR") {
            self.link.listen_addr = v;
        }
        if let Ok(v) = std::env::var("GATEKEEPER_LINK__PROGRESS_LINES") {
            self.link.progress_lines = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("GATEKEEPER_SESSION__CHUNK_CAPACITY") {
            if let Ok(n) = v.parse() {
                self.session.chunk_capacity = n;
            }
        }
        if let Ok(v) = std::env::var("GATEKEEPER_SESSION__DECISION_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.session.decision_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("GATEKEEPER_SESSION__DIGEST") {
            match v.as_str() {
                "blake3" => self.session.digest = DigestAlgorithm::Blake3,
                "sha256" => self.session.digest = DigestAlgorithm::Sha256,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("GATEKEEPER_AUTH__TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.auth.timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("GATEKEEPER_AUTH__MODE") {
            match v.as_str() {
                "accept" => self.auth.mode = AuthMode::Accept,
                "reject" => self.auth.mode = AuthMode::Reject,
                "token_file" => self.auth.mode = AuthMode::TokenFile,
                _ => {}
            }
        }
        if let Ok(v) = std::env::var("GATEKEEPER_DRIVE__IMAGE_PATH") {
            self.drive.image_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GATEKEEPER_RELAY__GPIO_VALUE_PATH") {
            self.relay.gpio_value_path = Some(PathBuf::from(v));
        }
    }
}
