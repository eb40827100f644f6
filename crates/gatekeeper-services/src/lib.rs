//! gatekeeper-services: the relay controller, streaming pipeline, host link
//! channel, and the state machine that orchestrates them.
//! Hardware adapters plug in through the traits in `ports`.

pub mod fault;
pub mod host;
pub mod machine;
pub mod pipeline;
pub mod ports;
pub mod relay;
pub mod session;
pub mod transport;

pub use fault::Fault;
pub use host::{HostEvent, HostVerifier};
pub use machine::{Gatekeeper, MachineConfig, Peripherals};
pub use pipeline::{PipelineError, SecureStream};
pub use ports::{AuthPoll, Authenticator, ChunkRead, Drive, ReadError, ScanVerdict, ThreatScanner};
pub use relay::{Actuator, LatchActuator, RelayController, RelayProbe, RelayState};
pub use session::{Outcome, Session, SessionId, State};
pub use transport::{Channel, Inbound};
