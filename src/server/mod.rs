//! Audio server boundary
//!
//! Every operation is submitted without blocking and identified by an
//! [`OpId`]. Results come back later as [`ServerEvent`]s on a channel that
//! the event loop drains one message at a time.

mod pulse;
mod stream;
mod worker;

#[cfg(test)]
pub(crate) mod mock;

pub use pulse::DEFAULT_SOURCE;
pub use stream::{Fragment, RecordStream};
pub use worker::PulseServer;

use std::io;

/// Identifier of a submitted operation awaiting completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u64);

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sample layout requested from a record stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSpec {
    /// Frames per second
    pub rate: u32,
    /// Interleaved channels per frame, always signed 16-bit native-endian
    pub channels: u8,
}

/// Capture source as reported by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub index: u32,
    pub name: String,
}

/// Successful result of a submitted operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Source lookup found the device
    Source(SourceInfo),
    /// Module loaded with the given index
    ModuleLoaded(u32),
    /// Command acknowledged
    Done,
}

/// Object class of a subscription event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facility {
    Source,
    Sink,
    SourceOutput,
    SinkInput,
    Module,
    Client,
    Card,
    Server,
    Other,
}

/// What happened to the object named by a subscription event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    New,
    Change,
    Remove,
}

/// Notification from a subscription feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionEvent {
    pub facility: Facility,
    pub kind: ChangeKind,
    pub index: u32,
}

/// Messages delivered to the event loop by a [`DeviceServer`]
#[derive(Debug)]
pub enum ServerEvent {
    /// Context is connected and accepts operations
    ContextReady,
    /// Context could not be established
    ContextFailed(ServerError),
    /// A submitted operation finished
    Completed {
        id: OpId,
        result: Result<Reply, ServerError>,
    },
    /// Record stream reached the ready state
    StreamReady(RecordStream),
    /// Record stream failed before becoming ready
    StreamFailed(ServerError),
    /// Change notification from the subscription feed
    Subscription(SubscriptionEvent),
    /// Subscription stopped delivering after it was established
    SubscriptionLost(ServerError),
}

/// Errors reported by the audio server or its transport
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("No such entity")]
    NoEntity,

    #[error("{0}")]
    Failure(String),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("server connection closed")]
    Closed,

    #[error("stream ended")]
    EndOfStream,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ServerError {
    /// Whether this is the server's "no such device" condition
    pub fn is_no_entity(&self) -> bool {
        matches!(self, ServerError::NoEntity)
    }
}

/// Asynchronous operations the session needs from the audio server
///
/// Submissions return immediately. Their outcome arrives later as a
/// [`ServerEvent`] on the channel handed out when the server was created.
pub trait DeviceServer {
    /// Begin connecting; answered by `ContextReady` or `ContextFailed`
    fn connect(&mut self);

    /// Look up a capture source by name
    fn lookup_source(&mut self, name: &str) -> OpId;

    /// Load a server module with the given argument string
    fn load_module(&mut self, module: &str, args: &str) -> OpId;

    /// Set the mute state of a capture source
    fn set_source_mute(&mut self, name: &str, mute: bool) -> OpId;

    /// Subscribe to source change notifications
    fn subscribe_sources(&mut self) -> OpId;

    /// Open a record stream; answered by `StreamReady` or `StreamFailed`
    fn connect_record(&mut self, device: &str, spec: SampleSpec) -> Result<(), ServerError>;

    /// Release the context and every helper it owns
    fn disconnect(&mut self);
}
