//! Session faults and their host-visible diagnostics.

use gatekeeper_core::codec::CodecError;
use gatekeeper_core::wire::{DeviceMessage, ErrorCode};
use thiserror::Error;

use crate::pipeline::PipelineError;

/// Everything that can end a session early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("authentication failed (timed out: {timed_out})")]
    AuthFailure { timed_out: bool },

    #[error("threat detected by pre-scan")]
    ThreatDetected,

    #[error("drive read failed: {0}")]
    ReadFailure(String),

    #[error("crypto failure: {0}")]
    CryptoFailure(String),

    #[error("framing error on host link: {0}")]
    FramingError(CodecError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("drive removed")]
    DriveRemoved,

    #[error("host requested cut")]
    HostCut,

    #[error("host did not answer the final hash in time")]
    DecisionTimeout,

    #[error("host link failed: {0}")]
    LinkFailure(String),
}

impl Fault {
    /// Framing errors and protocol violations are reported but do not end
    /// the session. Everything else cuts the relay.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(self, Self::FramingError(_) | Self::ProtocolViolation(_))
    }

    /// Line sent to the host before `ACTION:RELAY_CUT`, if any.
    pub fn diagnostic(&self) -> Option<DeviceMessage> {
        match self {
            Self::AuthFailure { .. } => Some(DeviceMessage::AuthFail),
            Self::ThreatDetected => Some(DeviceMessage::Threat),
            Self::ReadFailure(_) => Some(DeviceMessage::Error(ErrorCode::Read)),
            Self::CryptoFailure(_) => Some(DeviceMessage::Error(ErrorCode::Crypto)),
            Self::FramingError(_) | Self::ProtocolViolation(_) => {
                Some(DeviceMessage::Error(ErrorCode::Protocol))
            }
            Self::DriveRemoved => Some(DeviceMessage::UsbRemoved),
            Self::HostCut => None,
            Self::DecisionTimeout => Some(DeviceMessage::Error(ErrorCode::Timeout)),
            // Best effort; the link is probably gone.
            Self::LinkFailure(_) => Some(DeviceMessage::Error(ErrorCode::Link)),
        }
    }
}

impl From<PipelineError> for Fault {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::ChunkTooLarge { .. } => Self::ReadFailure(e.to_string()),
            other => Self::CryptoFailure(other.to_string()),
        }
    }
}
