//! Failures that end a session

use crate::server::ServerError;

/// Every error here is terminal; the tool exits and relies on its supervisor
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no device provided, pass the capture source name as the first argument")]
    Configuration,

    #[error("{operation} failed: {source}")]
    DeviceOpen {
        operation: &'static str,
        #[source]
        source: ServerError,
    },

    #[error("lookup of {name} failed: {source}")]
    Lookup {
        name: String,
        #[source]
        source: ServerError,
    },

    #[error("creating virtual source {name} failed: {source}")]
    Creation {
        name: String,
        #[source]
        source: ServerError,
    },

    #[error("reading record stream failed: {source}")]
    Stream {
        #[source]
        source: ServerError,
    },

    #[error("{operation} failed: {source}")]
    Command {
        operation: &'static str,
        #[source]
        source: ServerError,
    },

    #[error("server event channel closed")]
    Disconnected,
}
