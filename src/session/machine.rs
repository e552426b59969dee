//! Core session state machine
//!
//! Every server operation is submitted without blocking and remembered in
//! `pending` under its id. Completions arrive as [`ServerEvent`]s and are
//! matched back to the operation that caused them.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::events::Edge;
use crate::notify::Notifier;
use crate::server::{
    ChangeKind, DeviceServer, Facility, OpId, RecordStream, Reply, SampleSpec, ServerError,
    ServerEvent, SubscriptionEvent,
};

use super::SessionError;

/// Server module that creates the virtual source
pub const REMAP_MODULE: &str = "module-remap-source";

/// Connection progress of a [`DeviceSession`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing submitted yet
    #[default]
    Disconnected,
    /// Waiting for the server context
    ContextConnecting,
    /// Checking whether the virtual source exists
    RemappedProbe,
    /// Loading the remap module to create the virtual source
    RemappedCreating,
    /// Waiting for the server to report the record stream ready
    StreamConnecting,
    /// Streaming; button releases toggle the mute state
    Ready,
    /// Terminal
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::ContextConnecting => write!(f, "ContextConnecting"),
            ConnectionState::RemappedProbe => write!(f, "RemappedProbe"),
            ConnectionState::RemappedCreating => write!(f, "RemappedCreating"),
            ConnectionState::StreamConnecting => write!(f, "StreamConnecting"),
            ConnectionState::Ready => write!(f, "Ready"),
            ConnectionState::Failed => write!(f, "Failed"),
        }
    }
}

/// Operation awaiting a completion from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOp {
    /// Does the virtual source exist?
    VirtualLookup,
    /// Loading the remap module
    VirtualCreate,
    /// Index of the raw capture source, needed to filter change events
    RawLookup,
    /// Source change subscription for the raw source at `index`
    Subscribe { index: u32 },
    /// Mute command for the virtual source
    SetMute { target: bool },
}

/// Owns the server connection, the record stream and the mute state
pub struct DeviceSession<S> {
    server: S,
    state: ConnectionState,
    state_entered_at: Instant,
    raw_source_name: String,
    virtual_source_name: String,
    /// Known once the source change subscription is in place
    raw_source_index: Option<u32>,
    /// Last commanded mute state, ahead of the server until confirmed
    muted: bool,
    spec: SampleSpec,
    pending: HashMap<OpId, PendingOp>,
    stream: Option<RecordStream>,
    notifier: Box<dyn Notifier>,
}

impl<S: DeviceServer> DeviceSession<S> {
    pub fn new(server: S, config: &Config, notifier: Box<dyn Notifier>) -> Self {
        Self {
            server,
            state: ConnectionState::Disconnected,
            state_entered_at: Instant::now(),
            raw_source_name: config.device_name.clone(),
            virtual_source_name: config.virtual_source_name.clone(),
            raw_source_index: None,
            muted: true,
            spec: config.spec,
            pending: HashMap::new(),
            stream: None,
            notifier,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn raw_source_index(&self) -> Option<u32> {
        self.raw_source_index
    }

    pub fn virtual_source_name(&self) -> &str {
        &self.virtual_source_name
    }

    pub fn pending(&self) -> &HashMap<OpId, PendingOp> {
        &self.pending
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    /// Begin connecting to the server
    pub fn start(&mut self) {
        if self.state != ConnectionState::Disconnected {
            warn!(state = %self.state, "session already started");
            return;
        }
        self.transition_to(ConnectionState::ContextConnecting);
        self.server.connect();
    }

    /// Apply one message from the server
    ///
    /// An error moves the session to `Failed`; the caller is expected to
    /// tear down and exit.
    pub fn handle_event(&mut self, event: ServerEvent) -> Result<(), SessionError> {
        if self.state == ConnectionState::Failed {
            debug!(?event, "ignoring event after failure");
            return Ok(());
        }

        let outcome = match event {
            ServerEvent::ContextReady => {
                self.on_context_ready();
                Ok(())
            }
            ServerEvent::ContextFailed(source) => Err(SessionError::DeviceOpen {
                operation: "server connection",
                source,
            }),
            ServerEvent::Completed { id, result } => self.on_completed(id, result),
            ServerEvent::StreamReady(stream) => {
                self.on_stream_ready(stream);
                Ok(())
            }
            ServerEvent::StreamFailed(source) => Err(SessionError::DeviceOpen {
                operation: "record stream",
                source,
            }),
            ServerEvent::Subscription(event) => {
                self.on_subscription(event);
                Ok(())
            }
            ServerEvent::SubscriptionLost(source) => Err(SessionError::Command {
                operation: "source subscription",
                source,
            }),
        };

        outcome.map_err(|e| self.fail(e))
    }

    /// React to a classified button edge
    pub fn handle_edge(&mut self, edge: Edge) {
        match edge {
            Edge::PressDetected => debug!("button down"),
            Edge::ReleaseDetected => {
                debug!("button up");
                self.toggle_mute();
            }
        }
    }

    /// Flip the mute state and command the server to match
    ///
    /// The local flag flips immediately. A second toggle before the first
    /// is confirmed computes its target from the unconfirmed flag.
    pub fn toggle_mute(&mut self) {
        if self.state != ConnectionState::Ready {
            debug!(state = %self.state, "ignoring toggle before stream is ready");
            return;
        }
        self.muted = !self.muted;
        self.submit_mute();
    }

    /// Wait for capture data; never resolves while no stream is open
    pub async fn readable(&mut self) -> Result<usize, SessionError> {
        let Some(stream) = self.stream.as_mut() else {
            return std::future::pending().await;
        };
        let result = stream.readable().await;
        match result {
            Ok(available) => Ok(available),
            Err(source) => Err(self.fail(SessionError::Stream { source })),
        }
    }

    /// Buffered capture data not yet acknowledged
    pub fn peek(&self) -> &[u8] {
        self.stream.as_ref().map(RecordStream::peek).unwrap_or_default()
    }

    /// Acknowledge processed capture data so the stream keeps flowing
    pub fn drop_fragment(&mut self, len: usize) {
        if let Some(stream) = self.stream.as_mut() {
            stream.drop_fragment(len);
        }
    }

    /// Release everything in reverse acquisition order: stream, then context
    pub fn close(mut self) -> S {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("record stream released");
        }
        self.pending.clear();
        self.server.disconnect();
        self.server
    }

    fn on_context_ready(&mut self) {
        if self.state != ConnectionState::ContextConnecting {
            warn!(state = %self.state, "unexpected context ready");
            return;
        }
        info!("server context ready");
        self.transition_to(ConnectionState::RemappedProbe);

        let id = self.server.lookup_source(&self.virtual_source_name);
        self.pending.insert(id, PendingOp::VirtualLookup);

        let id = self.server.lookup_source(&self.raw_source_name);
        self.pending.insert(id, PendingOp::RawLookup);
    }

    fn on_completed(&mut self, id: OpId, result: Result<Reply, ServerError>) -> Result<(), SessionError> {
        let Some(op) = self.pending.remove(&id) else {
            warn!(%id, "completion for unknown operation");
            return Ok(());
        };
        trace!(%id, ?op, ok = result.is_ok(), "operation completed");

        match (op, result) {
            (PendingOp::VirtualLookup, Ok(_)) => {
                info!(name = %self.virtual_source_name, "remapped device exists; connecting stream");
                self.connect_stream()
            }
            (PendingOp::VirtualLookup, Err(e)) if e.is_no_entity() => {
                info!(
                    name = %self.virtual_source_name,
                    "remapped device does not exist; loading {REMAP_MODULE}"
                );
                self.transition_to(ConnectionState::RemappedCreating);
                let args = remap_args(&self.virtual_source_name, &self.raw_source_name);
                let id = self.server.load_module(REMAP_MODULE, &args);
                self.pending.insert(id, PendingOp::VirtualCreate);
                Ok(())
            }
            (PendingOp::VirtualLookup, Err(source)) => Err(SessionError::Lookup {
                name: self.virtual_source_name.clone(),
                source,
            }),

            (PendingOp::VirtualCreate, Ok(reply)) => {
                info!(?reply, "remapped device created; connecting stream");
                self.connect_stream()
            }
            (PendingOp::VirtualCreate, Err(source)) => Err(SessionError::Creation {
                name: self.virtual_source_name.clone(),
                source,
            }),

            (PendingOp::RawLookup, Ok(Reply::Source(info))) => {
                debug!(index = info.index, name = %info.name, "raw source found");
                let id = self.server.subscribe_sources();
                self.pending.insert(id, PendingOp::Subscribe { index: info.index });
                Ok(())
            }
            (PendingOp::RawLookup, Ok(reply)) => Err(SessionError::Lookup {
                name: self.raw_source_name.clone(),
                source: ServerError::UnexpectedReply(format!("{reply:?}")),
            }),
            (PendingOp::RawLookup, Err(source)) => Err(SessionError::Lookup {
                name: self.raw_source_name.clone(),
                source,
            }),

            (PendingOp::Subscribe { index }, Ok(_)) => {
                info!(index, "subscribed to source events");
                self.raw_source_index = Some(index);
                Ok(())
            }
            (PendingOp::Subscribe { .. }, Err(source)) => Err(SessionError::Command {
                operation: "source subscription",
                source,
            }),

            (PendingOp::SetMute { target }, Ok(_)) => {
                info!("mic is now {}", if target { "muted" } else { "unmuted" });
                self.notifier.mute_changed(target);
                Ok(())
            }
            (PendingOp::SetMute { target }, Err(source)) => Err(SessionError::Command {
                operation: if target { "mute" } else { "unmute" },
                source,
            }),
        }
    }

    fn connect_stream(&mut self) -> Result<(), SessionError> {
        self.transition_to(ConnectionState::StreamConnecting);
        self.server
            .connect_record(&self.raw_source_name, self.spec)
            .map_err(|source| SessionError::DeviceOpen {
                operation: "record stream connect",
                source,
            })
    }

    fn on_stream_ready(&mut self, stream: RecordStream) {
        if self.state != ConnectionState::StreamConnecting {
            warn!(state = %self.state, "unexpected record stream, dropping it");
            return;
        }
        self.stream = Some(stream);
        info!("connected to stream");
        self.transition_to(ConnectionState::Ready);

        // Every session starts muted
        self.muted = true;
        self.submit_mute();
    }

    fn on_subscription(&mut self, event: SubscriptionEvent) {
        let ours = self.raw_source_index == Some(event.index)
            && event.facility == Facility::Source
            && event.kind == ChangeKind::Change;
        if ours {
            info!(index = event.index, "received source changed event");
        } else {
            trace!(?event, "ignoring subscription event");
        }
    }

    fn submit_mute(&mut self) {
        let target = self.muted;
        let id = self.server.set_source_mute(&self.virtual_source_name, target);
        debug!(%id, target, "mute command submitted");
        self.pending.insert(id, PendingOp::SetMute { target });
    }

    fn fail(&mut self, error: SessionError) -> SessionError {
        self.transition_to(ConnectionState::Failed);
        error
    }

    fn transition_to(&mut self, new_state: ConnectionState) {
        let old_state = self.state;
        let duration_ms = self.state_entered_at.elapsed().as_millis() as u64;

        info!(
            from = %old_state,
            to = %new_state,
            duration_ms = duration_ms,
            "session transition"
        );

        self.state = new_state;
        self.state_entered_at = Instant::now();
    }
}

/// Module arguments remapping the raw source's stereo channels 1:1
pub fn remap_args(virtual_name: &str, master: &str) -> String {
    format!(
        "source_name={virtual_name} master={master} \
         master_channel_map=front-left,front-right channel_map=front-left,front-right"
    )
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::server::mock::{MockServer, Submitted};
    use crate::server::SourceInfo;

    const RAW: &str = "alsa_input.usb-headset";
    const VIRTUAL: &str = "mictoggle_remapped";

    #[derive(Clone, Default)]
    struct RecordingNotifier(Arc<Mutex<Vec<bool>>>);

    impl Notifier for RecordingNotifier {
        fn mute_changed(&mut self, muted: bool) {
            self.0.lock().unwrap().push(muted);
        }
    }

    fn config() -> Config {
        Config {
            device_name: RAW.to_string(),
            virtual_source_name: VIRTUAL.to_string(),
            spec: SampleSpec { rate: 4096, channels: 2 },
            block_size: 64,
            threshold_percent: 95,
            required_blocks: 5,
            notifications: true,
        }
    }

    fn create_session() -> (DeviceSession<MockServer>, RecordingNotifier) {
        let notifier = RecordingNotifier::default();
        let session = DeviceSession::new(MockServer::default(), &config(), Box::new(notifier.clone()));
        (session, notifier)
    }

    fn complete(session: &mut DeviceSession<MockServer>, id: OpId, result: Result<Reply, ServerError>) -> Result<(), SessionError> {
        session.handle_event(ServerEvent::Completed { id, result })
    }

    fn source(index: u32, name: &str) -> Reply {
        Reply::Source(SourceInfo {
            index,
            name: name.to_string(),
        })
    }

    /// Drive a session through the happy path up to `Ready`
    fn ready_session() -> (DeviceSession<MockServer>, RecordingNotifier) {
        let (mut session, notifier) = create_session();
        session.start();
        session.handle_event(ServerEvent::ContextReady).unwrap();

        let virtual_id = session.server().lookup_id(VIRTUAL).unwrap();
        complete(&mut session, virtual_id, Ok(source(9, VIRTUAL))).unwrap();
        let raw_id = session.server().lookup_id(RAW).unwrap();
        complete(&mut session, raw_id, Ok(source(3, RAW))).unwrap();

        let Some(Submitted::Subscribe { id }) = session.server().submitted.last().cloned() else {
            panic!("expected a subscription");
        };
        complete(&mut session, id, Ok(Reply::Done)).unwrap();

        // Sender dropped: the stream ends once read
        let (_, stream) = RecordStream::channel(1);
        session.handle_event(ServerEvent::StreamReady(stream)).unwrap();
        (session, notifier)
    }

    #[test]
    fn test_initial_state() {
        let (session, _) = create_session();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.muted());
        assert!(session.server().submitted.is_empty());
    }

    #[test]
    fn test_start_connects_context() {
        let (mut session, _) = create_session();
        session.start();
        assert_eq!(session.state(), ConnectionState::ContextConnecting);
        assert_eq!(session.server().submitted, vec![Submitted::Connect]);
    }

    #[test]
    fn test_context_ready_probes_both_sources() {
        let (mut session, _) = create_session();
        session.start();
        session.handle_event(ServerEvent::ContextReady).unwrap();

        assert_eq!(session.state(), ConnectionState::RemappedProbe);
        let virtual_id = session.server().lookup_id(VIRTUAL).unwrap();
        let raw_id = session.server().lookup_id(RAW).unwrap();
        assert_eq!(session.pending()[&virtual_id], PendingOp::VirtualLookup);
        assert_eq!(session.pending()[&raw_id], PendingOp::RawLookup);
    }

    #[test]
    fn test_context_failure() {
        let (mut session, _) = create_session();
        session.start();
        let err = session
            .handle_event(ServerEvent::ContextFailed(ServerError::Failure("Connection refused".into())))
            .unwrap_err();

        assert!(matches!(err, SessionError::DeviceOpen { .. }));
        assert!(err.to_string().contains("Connection refused"));
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_existing_virtual_source_connects_stream() {
        let (mut session, _) = create_session();
        session.start();
        session.handle_event(ServerEvent::ContextReady).unwrap();

        let virtual_id = session.server().lookup_id(VIRTUAL).unwrap();
        complete(&mut session, virtual_id, Ok(source(9, VIRTUAL))).unwrap();

        assert_eq!(session.state(), ConnectionState::StreamConnecting);
        assert_eq!(
            session.server().submitted.last(),
            Some(&Submitted::ConnectRecord {
                device: RAW.to_string(),
                spec: SampleSpec { rate: 4096, channels: 2 },
            })
        );
    }

    #[test]
    fn test_missing_virtual_source_is_created() {
        let (mut session, _) = create_session();
        session.start();
        session.handle_event(ServerEvent::ContextReady).unwrap();

        let virtual_id = session.server().lookup_id(VIRTUAL).unwrap();
        complete(&mut session, virtual_id, Err(ServerError::NoEntity)).unwrap();
        assert_eq!(session.state(), ConnectionState::RemappedCreating);

        let Some(Submitted::LoadModule { id, module, args }) = session.server().submitted.last().cloned() else {
            panic!("expected a module load");
        };
        assert_eq!(module, REMAP_MODULE);
        assert!(args.contains(&format!("source_name={VIRTUAL}")));
        assert!(args.contains(&format!("master={RAW}")));
        assert!(args.contains("master_channel_map=front-left,front-right"));
        assert!(args.contains(" channel_map=front-left,front-right"));

        complete(&mut session, id, Ok(Reply::ModuleLoaded(27))).unwrap();
        assert_eq!(session.state(), ConnectionState::StreamConnecting);
    }

    #[test]
    fn test_virtual_lookup_failure_is_fatal() {
        let (mut session, _) = create_session();
        session.start();
        session.handle_event(ServerEvent::ContextReady).unwrap();

        let virtual_id = session.server().lookup_id(VIRTUAL).unwrap();
        let err = complete(&mut session, virtual_id, Err(ServerError::Failure("Access denied".into()))).unwrap_err();

        assert!(matches!(err, SessionError::Lookup { .. }));
        assert_eq!(session.state(), ConnectionState::Failed);
        assert!(!session.server().submitted.iter().any(|s| matches!(s, Submitted::LoadModule { .. })));
    }

    #[test]
    fn test_creation_failure_is_fatal() {
        let (mut session, _) = create_session();
        session.start();
        session.handle_event(ServerEvent::ContextReady).unwrap();

        let virtual_id = session.server().lookup_id(VIRTUAL).unwrap();
        complete(&mut session, virtual_id, Err(ServerError::NoEntity)).unwrap();
        let create_id = session.server().last_id();
        let err = complete(
            &mut session,
            create_id,
            Err(ServerError::Failure("Module initialization failed".into())),
        )
        .unwrap_err();

        assert!(matches!(err, SessionError::Creation { .. }));
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_record_connect_failure_is_fatal() {
        let (mut session, _) = create_session();
        session.start();
        session.handle_event(ServerEvent::ContextReady).unwrap();

        let virtual_id = session.server().lookup_id(VIRTUAL).unwrap();
        session.server.fail_connect_record = Some("Bad state".into());
        let err = complete(&mut session, virtual_id, Ok(source(9, VIRTUAL))).unwrap_err();

        assert!(matches!(err, SessionError::DeviceOpen { .. }));
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_stream_failure_is_fatal() {
        let (mut session, _) = create_session();
        session.start();
        session.handle_event(ServerEvent::ContextReady).unwrap();
        let virtual_id = session.server().lookup_id(VIRTUAL).unwrap();
        complete(&mut session, virtual_id, Ok(source(9, VIRTUAL))).unwrap();

        let err = session
            .handle_event(ServerEvent::StreamFailed(ServerError::Failure("Stream error: No such entity".into())))
            .unwrap_err();
        assert!(matches!(err, SessionError::DeviceOpen { .. }));
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_raw_lookup_subscribes() {
        let (mut session, _) = create_session();
        session.start();
        session.handle_event(ServerEvent::ContextReady).unwrap();

        let raw_id = session.server().lookup_id(RAW).unwrap();
        complete(&mut session, raw_id, Ok(source(3, RAW))).unwrap();

        assert_eq!(session.state(), ConnectionState::RemappedProbe);
        let Some(Submitted::Subscribe { id }) = session.server().submitted.last().cloned() else {
            panic!("expected a subscription");
        };
        assert_eq!(session.pending()[&id], PendingOp::Subscribe { index: 3 });
        // Not usable for filtering until the subscription is confirmed
        assert_eq!(session.raw_source_index(), None);

        let err = complete(&mut session, id, Err(ServerError::Failure("Access denied".into()))).unwrap_err();
        assert!(matches!(err, SessionError::Command { .. }));
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_raw_index_set_when_subscription_confirmed() {
        let (mut session, _) = create_session();
        session.start();
        session.handle_event(ServerEvent::ContextReady).unwrap();

        let raw_id = session.server().lookup_id(RAW).unwrap();
        complete(&mut session, raw_id, Ok(source(3, RAW))).unwrap();
        let subscribe_id = session.server().last_id();
        complete(&mut session, subscribe_id, Ok(Reply::Done)).unwrap();

        assert_eq!(session.raw_source_index(), Some(3));
        assert!(session.pending().values().all(|op| !matches!(op, PendingOp::Subscribe { .. })));
    }

    #[test]
    fn test_raw_lookup_failure_is_fatal() {
        let (mut session, _) = create_session();
        session.start();
        session.handle_event(ServerEvent::ContextReady).unwrap();

        let raw_id = session.server().lookup_id(RAW).unwrap();
        let err = complete(&mut session, raw_id, Err(ServerError::NoEntity)).unwrap_err();
        assert!(matches!(err, SessionError::Lookup { ref name, .. } if name == RAW));
    }

    #[test]
    fn test_ready_forces_initial_mute() {
        let (session, notifier) = ready_session();

        assert_eq!(session.state(), ConnectionState::Ready);
        assert!(session.muted());
        let commands = session.server().mute_commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].1);
        assert!(notifier.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_mute_confirmation_notifies() {
        let (mut session, notifier) = ready_session();
        let (initial, _) = session.server().mute_commands()[0];
        complete(&mut session, initial, Ok(Reply::Done)).unwrap();

        session.handle_edge(Edge::ReleaseDetected);
        assert!(!session.muted());
        let (toggle, target) = session.server().mute_commands()[1];
        assert!(!target);
        complete(&mut session, toggle, Ok(Reply::Done)).unwrap();

        assert_eq!(*notifier.0.lock().unwrap(), vec![true, false]);
        assert!(session.pending().values().all(|op| !matches!(op, PendingOp::SetMute { .. })));
    }

    #[test]
    fn test_press_does_not_toggle() {
        let (mut session, _) = ready_session();
        session.handle_edge(Edge::PressDetected);
        assert!(session.muted());
        assert_eq!(session.server().mute_commands().len(), 1);
    }

    #[test]
    fn test_no_mute_command_before_ready() {
        let (mut session, _) = create_session();
        session.handle_edge(Edge::ReleaseDetected);
        session.start();
        session.handle_edge(Edge::ReleaseDetected);
        session.handle_event(ServerEvent::ContextReady).unwrap();
        session.handle_edge(Edge::ReleaseDetected);

        assert!(session.server().mute_commands().is_empty());
        assert!(session.muted());
    }

    #[test]
    fn test_rapid_toggles_follow_unconfirmed_flag() {
        let (mut session, notifier) = ready_session();

        session.toggle_mute();
        session.toggle_mute();
        let commands = session.server().mute_commands();
        let (first, first_target) = commands[1];
        let (_, second_target) = commands[2];
        assert!(!first_target);
        assert!(second_target);

        // Confirming the first command does not pull the flag back to it
        complete(&mut session, first, Ok(Reply::Done)).unwrap();
        assert_eq!(session.muted(), second_target);
        assert_eq!(*notifier.0.lock().unwrap(), vec![false]);
    }

    #[test]
    fn test_mute_failure_is_fatal() {
        let (mut session, _) = ready_session();
        session.toggle_mute();
        let (id, _) = session.server().mute_commands()[1];

        let err = complete(&mut session, id, Err(ServerError::NoEntity)).unwrap_err();
        assert!(matches!(err, SessionError::Command { operation: "unmute", .. }));
        assert_eq!(session.state(), ConnectionState::Failed);

        // Terminal: nothing else is acted upon
        session.toggle_mute();
        assert_eq!(session.server().mute_commands().len(), 2);
    }

    #[test]
    fn test_source_change_is_inert() {
        let (mut session, _) = ready_session();
        let submitted = session.server().submitted.len();

        for event in [
            SubscriptionEvent { facility: Facility::Source, kind: ChangeKind::Change, index: 3 },
            SubscriptionEvent { facility: Facility::Source, kind: ChangeKind::Change, index: 9 },
            SubscriptionEvent { facility: Facility::Sink, kind: ChangeKind::Remove, index: 3 },
        ] {
            session.handle_event(ServerEvent::Subscription(event)).unwrap();
        }

        assert_eq!(session.state(), ConnectionState::Ready);
        assert_eq!(session.server().submitted.len(), submitted);
    }

    #[test]
    fn test_subscription_lost_is_fatal() {
        let (mut session, _) = ready_session();
        let err = session
            .handle_event(ServerEvent::SubscriptionLost(ServerError::EndOfStream))
            .unwrap_err();
        assert!(matches!(err, SessionError::Command { .. }));
    }

    #[test]
    fn test_unknown_completion_ignored() {
        let (mut session, _) = ready_session();
        complete(&mut session, OpId(999), Err(ServerError::NoEntity)).unwrap();
        assert_eq!(session.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_stream_end_is_fatal() {
        let (mut session, _) = ready_session();
        let err = session.readable().await.unwrap_err();
        assert!(matches!(err, SessionError::Stream { .. }));
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_close_releases_context_last() {
        let (session, _) = ready_session();
        let server = session.close();
        assert_eq!(server.submitted.last(), Some(&Submitted::Disconnect));
    }

    #[test]
    fn test_remap_args() {
        assert_eq!(
            remap_args("v", "m"),
            "source_name=v master=m master_channel_map=front-left,front-right channel_map=front-left,front-right"
        );
    }
}
