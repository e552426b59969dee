//! PulseAudio connection through `libpulse-binding`
//!
//! Lives on the server thread. The standard mainloop is driven in slices by
//! [`Connection::pump`]; context and stream state are checked after every
//! slice and reported as [`ServerEvent`]s. Operation callbacks post their
//! completions directly.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use libpulse_binding as pulse;
use pulse::callbacks::ListResult;
use pulse::context::subscribe::{
    Facility as PaFacility, InterestMaskSet, Operation as PaOperation,
};
use pulse::context::{Context, FlagSet as ContextFlagSet, State as ContextState};
use pulse::def::INVALID_INDEX;
use pulse::error::{Code, PAErr};
use pulse::mainloop::standard::Mainloop;
use pulse::sample::{Format, Spec};
use pulse::stream::{FlagSet as StreamFlagSet, PeekResult, State as StreamState, Stream};
use pulse::time::MicroSeconds;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use super::stream::Fragment;
use super::worker::{post, Command, Connection};
use super::{
    ChangeKind, Facility, OpId, RecordStream, Reply, SampleSpec, ServerError, ServerEvent,
    SourceInfo, SubscriptionEvent,
};

/// Name the server resolves to its configured default capture source
pub const DEFAULT_SOURCE: &str = "@DEFAULT_SOURCE@";

const CLIENT_NAME: &str = "mictoggle";
const STREAM_NAME: &str = "mictoggle read";

/// Fragments queued between the server thread and the event loop
const FRAGMENT_QUEUE: usize = 8;

impl From<PAErr> for ServerError {
    fn from(err: PAErr) -> Self {
        if err.0.abs() == Code::NoEntity as i32 {
            ServerError::NoEntity
        } else {
            ServerError::Failure(format!("{err}"))
        }
    }
}

/// Record stream and the queue feeding its consumer
struct Recording {
    stream: Stream,
    /// Set once the stream is ready and handed to the event loop
    fragments: Option<mpsc::Sender<Fragment>>,
}

/// One context plus its mainloop and record stream
///
/// Field order is teardown order: stream, context, mainloop.
pub(crate) struct PulseConnection {
    events: mpsc::Sender<ServerEvent>,
    recording: Option<Recording>,
    context: Option<Rc<RefCell<Context>>>,
    mainloop: Option<Mainloop>,
    context_ready: bool,
    subscribed: bool,
}

impl PulseConnection {
    pub(crate) fn new(events: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            events,
            recording: None,
            context: None,
            mainloop: None,
            context_ready: false,
            subscribed: false,
        }
    }

    fn context(&self) -> Result<&Rc<RefCell<Context>>, ServerError> {
        self.context
            .as_ref()
            .ok_or_else(|| ServerError::Failure("not connected".to_string()))
    }

    fn complete(&self, id: OpId, result: Result<Reply, ServerError>) {
        post(&self.events, ServerEvent::Completed { id, result });
    }

    fn lookup_source(&self, id: OpId, name: &str) -> Result<(), ServerError> {
        let context = Rc::clone(self.context()?);
        let events = self.events.clone();
        let mut found = false;

        let introspect = context.borrow().introspect();
        introspect.get_source_info_by_name(name, move |result| match result {
            ListResult::Item(info) => {
                found = true;
                let reply = Reply::Source(SourceInfo {
                    index: info.index,
                    name: info.name.as_deref().unwrap_or_default().to_string(),
                });
                post(&events, ServerEvent::Completed { id, result: Ok(reply) });
            }
            ListResult::End => {
                if !found {
                    post(&events, ServerEvent::Completed { id, result: Err(ServerError::NoEntity) });
                }
            }
            ListResult::Error => {
                let error = last_error(&context);
                post(&events, ServerEvent::Completed { id, result: Err(error) });
            }
        });
        Ok(())
    }

    fn load_module(&self, id: OpId, module: &str, args: &str) -> Result<(), ServerError> {
        let context = Rc::clone(self.context()?);
        let events = self.events.clone();

        let mut introspect = context.borrow().introspect();
        introspect.load_module(module, args, move |index| {
            let result = if index == INVALID_INDEX {
                Err(last_error(&context))
            } else {
                Ok(Reply::ModuleLoaded(index))
            };
            post(&events, ServerEvent::Completed { id, result });
        });
        Ok(())
    }

    fn set_source_mute(&self, id: OpId, name: &str, mute: bool) -> Result<(), ServerError> {
        let context = Rc::clone(self.context()?);
        let events = self.events.clone();

        let mut introspect = context.borrow().introspect();
        introspect.set_source_mute_by_name(
            name,
            mute,
            Some(Box::new(move |success| {
                let result = if success {
                    Ok(Reply::Done)
                } else {
                    Err(last_error(&context))
                };
                post(&events, ServerEvent::Completed { id, result });
            })),
        );
        Ok(())
    }

    fn subscribe_sources(&mut self, id: OpId) -> Result<(), ServerError> {
        let context = Rc::clone(self.context()?);
        let events = self.events.clone();
        let feed = self.events.clone();

        let mut ctx = context
            .try_borrow_mut()
            .map_err(|_| ServerError::Failure("context busy".to_string()))?;
        ctx.set_subscribe_callback(Some(Box::new(move |facility, operation, index| {
            let Some(kind) = operation.map(change_kind) else {
                return;
            };
            let event = SubscriptionEvent {
                facility: facility.map(facility_of).unwrap_or(Facility::Other),
                kind,
                index,
            };
            post(&feed, ServerEvent::Subscription(event));
        })));

        let callback_context = Rc::clone(&context);
        ctx.subscribe(InterestMaskSet::SOURCE, move |success| {
            let result = if success {
                Ok(Reply::Done)
            } else {
                Err(last_error(&callback_context))
            };
            post(&events, ServerEvent::Completed { id, result });
        });
        self.subscribed = true;
        Ok(())
    }

    /// Report context state changes; an error means the context is gone
    fn check_context(&mut self) -> Result<(), ServerError> {
        let Some(context) = self.context.as_ref() else {
            return Ok(());
        };
        let state = context.borrow().get_state();

        match state {
            ContextState::Ready if !self.context_ready => {
                self.context_ready = true;
                info!("connection established");
                post(&self.events, ServerEvent::ContextReady);
                Ok(())
            }
            ContextState::Failed | ContextState::Terminated => {
                let error = last_error(context);
                if self.subscribed {
                    post(&self.events, ServerEvent::SubscriptionLost(ServerError::Closed));
                }
                Err(error)
            }
            _ => Ok(()),
        }
    }

    /// Report stream state changes and move data toward the event loop
    fn check_stream(&mut self) {
        let Some(recording) = self.recording.as_mut() else {
            return;
        };

        match recording.stream.get_state() {
            StreamState::Ready => {
                if recording.fragments.is_none() {
                    let (tx, stream) = RecordStream::channel(FRAGMENT_QUEUE);
                    recording.fragments = Some(tx);
                    info!("record stream ready");
                    post(&self.events, ServerEvent::StreamReady(stream));
                }
                if let Err(e) = forward_fragments(recording) {
                    warn!(%e, "record stream read failed");
                    if let Some(tx) = recording.fragments.as_ref() {
                        let _ = tx.try_send(Err(e));
                    }
                    self.recording = None;
                }
            }
            StreamState::Failed | StreamState::Terminated => {
                let error = self
                    .context
                    .as_ref()
                    .map(last_error)
                    .unwrap_or(ServerError::EndOfStream);
                warn!(%error, "record stream failed");
                match recording.fragments.take() {
                    Some(tx) => {
                        let _ = tx.try_send(Err(error));
                    }
                    None => post(&self.events, ServerEvent::StreamFailed(error)),
                }
                self.recording = None;
            }
            _ => {}
        }
    }
}

impl Connection for PulseConnection {
    fn connect(&mut self) -> Result<(), ServerError> {
        let mainloop = Mainloop::new()
            .ok_or_else(|| ServerError::Failure("failed to create mainloop".to_string()))?;
        let mut context = Context::new(&mainloop, CLIENT_NAME)
            .ok_or_else(|| ServerError::Failure("failed to create context".to_string()))?;
        context.connect(None, ContextFlagSet::NOFLAGS, None)?;
        debug!("connecting to server");

        self.context = Some(Rc::new(RefCell::new(context)));
        self.mainloop = Some(mainloop);
        Ok(())
    }

    fn submit(&mut self, id: OpId, command: Command) {
        trace!(%id, ?command, "applying");
        let submitted = match &command {
            Command::LookupSource { name } => self.lookup_source(id, name),
            Command::LoadModule { module, args } => self.load_module(id, module, args),
            Command::SetSourceMute { name, mute } => self.set_source_mute(id, name, *mute),
            Command::SubscribeSources => self.subscribe_sources(id),
        };
        if let Err(e) = submitted {
            self.complete(id, Err(e));
        }
    }

    fn connect_record(&mut self, device: &str, spec: SampleSpec) -> Result<(), ServerError> {
        let context = Rc::clone(self.context()?);
        let sample_spec = Spec {
            format: Format::S16NE,
            channels: spec.channels,
            rate: spec.rate,
        };
        if !sample_spec.is_valid() {
            return Err(ServerError::Failure(format!("invalid sample spec {spec:?}")));
        }

        let mut stream = {
            let mut ctx = context
                .try_borrow_mut()
                .map_err(|_| ServerError::Failure("context busy".to_string()))?;
            Stream::new(&mut ctx, STREAM_NAME, &sample_spec, None)
                .ok_or_else(|| ServerError::Failure("failed to create record stream".to_string()))?
        };
        stream.connect_record(Some(device), None, StreamFlagSet::NOFLAGS)?;

        self.recording = Some(Recording {
            stream,
            fragments: None,
        });
        Ok(())
    }

    fn pump(&mut self, timeout: Duration) -> Result<(), ServerError> {
        let Some(mainloop) = self.mainloop.as_mut() else {
            std::thread::sleep(timeout);
            return Ok(());
        };

        let micros = u64::try_from(timeout.as_micros()).unwrap_or(u64::MAX);
        mainloop.prepare(Some(MicroSeconds(micros)))?;
        mainloop.poll()?;
        mainloop.dispatch()?;

        self.check_context()?;
        self.check_stream();
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(mut recording) = self.recording.take() {
            if let Err(e) = recording.stream.disconnect() {
                debug!(%e, "record stream already gone");
            }
            info!("record stream released");
        }
        if let Some(context) = self.context.take() {
            if let Ok(mut context) = context.try_borrow_mut() {
                context.disconnect();
            }
            info!("server context released");
        }
        self.mainloop = None;
        self.context_ready = false;
        self.subscribed = false;
    }
}

impl Drop for PulseConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Copy ready fragments into the consumer's queue
///
/// Stops when the queue is full so unread data stays at the server.
fn forward_fragments(recording: &mut Recording) -> Result<(), ServerError> {
    let Some(tx) = recording.fragments.as_ref() else {
        return Ok(());
    };

    loop {
        let Ok(permit) = tx.try_reserve() else {
            // Full, or the consumer is gone and teardown is coming
            return Ok(());
        };
        match recording.stream.peek()? {
            PeekResult::Empty => return Ok(()),
            PeekResult::Hole(len) => {
                trace!(len, "skipping hole in record stream");
                drop(permit);
            }
            PeekResult::Data(data) => permit.send(Ok(data.to_vec())),
        }
        recording.stream.discard()?;
    }
}

/// The context's last error, or a generic failure while it is borrowed
fn last_error(context: &Rc<RefCell<Context>>) -> ServerError {
    match context.try_borrow() {
        Ok(context) => context.errno().into(),
        Err(_) => ServerError::Failure("server error".to_string()),
    }
}

fn facility_of(facility: PaFacility) -> Facility {
    match facility {
        PaFacility::Source => Facility::Source,
        PaFacility::Sink => Facility::Sink,
        PaFacility::SourceOutput => Facility::SourceOutput,
        PaFacility::SinkInput => Facility::SinkInput,
        PaFacility::Module => Facility::Module,
        PaFacility::Client => Facility::Client,
        PaFacility::Card => Facility::Card,
        PaFacility::Server => Facility::Server,
        _ => Facility::Other,
    }
}

fn change_kind(operation: PaOperation) -> ChangeKind {
    match operation {
        PaOperation::New => ChangeKind::New,
        PaOperation::Changed => ChangeKind::Change,
        PaOperation::Removed => ChangeKind::Remove,
    }
}
