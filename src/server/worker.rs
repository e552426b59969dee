//! Server thread owning the one connection every operation goes through
//!
//! ```text
//!  event loop                     server thread
//!      │  Request (FIFO queue)         │
//!      ├──────────────────────────────▶│ Connection::submit, in order
//!      │                               │ Connection::pump (mainloop I/O)
//!      │◀──────────────────────────────┤
//!      │  ServerEvent (mpsc channel)   │
//! ```
//!
//! Requests are applied one at a time in submission order on a single
//! context, so the server sees commands in the order the session issued
//! them.

use std::sync::mpsc as queue;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::pulse::PulseConnection;
use super::{DeviceServer, OpId, SampleSpec, ServerError, ServerEvent};

/// Capacity of the server -> event loop channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Longest the thread waits on server I/O before checking for requests
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Operation that completes with a [`ServerEvent::Completed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    LookupSource { name: String },
    LoadModule { module: String, args: String },
    SetSourceMute { name: String, mute: bool },
    SubscribeSources,
}

#[derive(Debug)]
pub(crate) enum Request {
    Connect,
    Submit { id: OpId, command: Command },
    Record { device: String, spec: SampleSpec },
    Stop,
}

/// A server connection driven from the server thread
pub(crate) trait Connection {
    /// Begin connecting; readiness is reported from `pump`
    fn connect(&mut self) -> Result<(), ServerError>;

    /// Start an operation; its completion is posted when the server answers
    fn submit(&mut self, id: OpId, command: Command);

    /// Open a record stream; readiness is reported from `pump`
    fn connect_record(&mut self, device: &str, spec: SampleSpec) -> Result<(), ServerError>;

    /// Run server I/O for at most `timeout`. An error means the connection is gone.
    fn pump(&mut self, timeout: Duration) -> Result<(), ServerError>;

    /// Release the stream, then the context
    fn disconnect(&mut self);
}

/// [`DeviceServer`] backed by a PulseAudio context on its own thread
pub struct PulseServer {
    requests: queue::Sender<Request>,
    next_id: u64,
    thread: Option<JoinHandle<()>>,
}

impl PulseServer {
    /// Start the server thread and return the receiver its events arrive on
    pub fn new() -> Result<(Self, mpsc::Receiver<ServerEvent>), ServerError> {
        Self::with_connection(PulseConnection::new)
    }

    /// Start the server thread around a connection built on that thread
    pub(crate) fn with_connection<C, F>(make: F) -> Result<(Self, mpsc::Receiver<ServerEvent>), ServerError>
    where
        C: Connection,
        F: FnOnce(mpsc::Sender<ServerEvent>) -> C + Send + 'static,
    {
        let (events, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (requests, incoming) = queue::channel();

        let thread = thread::Builder::new()
            .name("mictoggle-server".to_string())
            .spawn(move || {
                let connection = make(events.clone());
                serve(connection, incoming, events);
            })?;

        let server = Self {
            requests,
            next_id: 0,
            thread: Some(thread),
        };
        Ok((server, rx))
    }

    fn next_op(&mut self) -> OpId {
        self.next_id += 1;
        OpId(self.next_id)
    }

    fn submit(&mut self, command: Command) -> OpId {
        let id = self.next_op();
        debug!(%id, ?command, "submitting");
        if self.requests.send(Request::Submit { id, command }).is_err() {
            // The thread dropped its event sender on the way out, so the
            // event loop sees the channel close
            warn!(%id, "server thread has exited");
        }
        id
    }
}

impl DeviceServer for PulseServer {
    fn connect(&mut self) {
        if self.requests.send(Request::Connect).is_err() {
            warn!("server thread has exited");
        }
    }

    fn lookup_source(&mut self, name: &str) -> OpId {
        self.submit(Command::LookupSource { name: name.to_string() })
    }

    fn load_module(&mut self, module: &str, args: &str) -> OpId {
        self.submit(Command::LoadModule {
            module: module.to_string(),
            args: args.to_string(),
        })
    }

    fn set_source_mute(&mut self, name: &str, mute: bool) -> OpId {
        self.submit(Command::SetSourceMute {
            name: name.to_string(),
            mute,
        })
    }

    fn subscribe_sources(&mut self) -> OpId {
        self.submit(Command::SubscribeSources)
    }

    fn connect_record(&mut self, device: &str, spec: SampleSpec) -> Result<(), ServerError> {
        if spec.rate == 0 || spec.channels == 0 {
            return Err(ServerError::Failure(format!("invalid sample spec {spec:?}")));
        }
        info!(device, rate = spec.rate, channels = spec.channels, "record stream connecting");
        self.requests
            .send(Request::Record {
                device: device.to_string(),
                spec,
            })
            .map_err(|_| ServerError::Closed)
    }

    fn disconnect(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.requests.send(Request::Stop);
        debug!("waiting for server thread to stop");
        if thread.join().is_err() {
            error!("server thread panicked");
        }
        info!("server context released");
    }
}

impl Drop for PulseServer {
    fn drop(&mut self) {
        if self.thread.is_some() {
            warn!("server dropped without disconnect");
            self.disconnect();
        }
    }
}

/// Apply requests in arrival order, running server I/O between them
fn serve<C: Connection>(mut connection: C, requests: queue::Receiver<Request>, events: mpsc::Sender<ServerEvent>) {
    'serve: loop {
        loop {
            let request = match requests.try_recv() {
                Ok(request) => request,
                Err(queue::TryRecvError::Empty) => break,
                Err(queue::TryRecvError::Disconnected) => break 'serve,
            };

            match request {
                Request::Connect => {
                    if let Err(e) = connection.connect() {
                        post(&events, ServerEvent::ContextFailed(e));
                        break 'serve;
                    }
                }
                Request::Submit { id, command } => connection.submit(id, command),
                Request::Record { device, spec } => {
                    if let Err(e) = connection.connect_record(&device, spec) {
                        post(&events, ServerEvent::StreamFailed(e));
                    }
                }
                Request::Stop => break 'serve,
            }
        }

        if let Err(e) = connection.pump(POLL_INTERVAL) {
            post(&events, ServerEvent::ContextFailed(e));
            break;
        }
    }

    connection.disconnect();
    debug!("server thread exiting");
}

/// Deliver an event from the server thread
///
/// A closed channel means the event loop has exited and nobody is listening.
pub(crate) fn post(events: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    if events.blocking_send(event).is_err() {
        debug!("event loop gone, dropping server event");
    }
}
