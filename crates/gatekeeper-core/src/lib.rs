//! gatekeeper-core: wire format, stream codec, crypto capabilities, and config.
//! All other gatekeeper crates depend on this one.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod wire;

pub use codec::{CodecError, StreamDecoder, Unit};
pub use wire::{DeviceMessage, Digest, ErrorCode, Frame, HostCommand};
