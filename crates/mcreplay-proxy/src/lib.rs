//! Session engine of the record/replay proxy.
//!
//! In record mode the [`SessionManager`] accepts clients, pairs each with a
//! backend connection and runs a [`RelayEngine`] that forwards both
//! directions while the [`Recorder`] captures the serverbound stream. In
//! replay mode a [`ReplaySession`] drives the backend from a saved
//! [`SessionRecord`], answering the liveness packets a real client would.

pub mod error;
pub mod gate;
pub mod phase;
pub mod record;
pub mod recorder;
pub mod relay;
pub mod replay;
pub mod session;

pub use error::ProxyError;
pub use gate::{Peer, StopReason, TerminationGate, join_until};
pub use phase::{Phase, SharedPhase};
pub use record::{LoginPosition, RecordError, RecordedPacket, SessionRecord, indexed_path};
pub use recorder::Recorder;
pub use relay::{Direction, RelayEngine};
pub use replay::{ReplayReport, ReplaySession};
pub use session::{
    Session, SessionHandle, SessionManager, SessionState, frame_config, socket_config,
};
