//! Device session state machine
//!
//! Negotiates the capture stream and the virtual source, then mutes and
//! unmutes the virtual source on every button release:
//! - Disconnected -> ContextConnecting -> RemappedProbe
//! - RemappedProbe -> [RemappedCreating ->] StreamConnecting -> Ready
//! - any non-terminal state -> Failed

mod error;
mod machine;

pub use error::SessionError;
pub use machine::{ConnectionState, DeviceSession, PendingOp, REMAP_MODULE};
