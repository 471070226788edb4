//! Transaction session driver
//!
//! Every submitted [`Transaction`](crate::Transaction) is driven by one
//! task running [`Driver::run`]. The task owns the session's signal
//! subscriptions and is the only writer of its event stream.
//!
//! ## Lifecycle
//!
//! ```text
//! Unbound ─► Binding ─► Bound ─► Dispatching ─► Active ─► Finished ─► Released
//!    │          │                     │
//!    └──────────┴── (known tid) ──────┴── failure ─► Finished
//! ```
//!
//! - A session without a transaction id asks the daemon for one
//!   (`Binding`); one created with an id goes straight to `Bound`.
//! - Binding detects the signal generation, sends hints, fetches the
//!   property snapshot and subscribes to property changes, the signals the
//!   caller connected, errors, completion and destruction.
//! - A request stored before binding is dispatched as soon as the session
//!   is bound; one issued later is dispatched when it arrives.
//! - Exactly one `Finished` event is published, whichever path ends the
//!   session, and nothing is published after it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use pkclient_core::domain::{
    ClientError, ErrorCode, EventKind, Exit, InternalError, TransactionEvent, TransactionRecord,
    WireValue,
};
use pkclient_core::ports::{
    MethodCall, RpcChannel, SignalMatch, SignalMessage, SignalSink, SubscriptionId,
};

use crate::daemon::DaemonEvent;
use crate::properties::{TransactionProperties, TRANSACTION_PROPERTIES};
use crate::request::TransactionRequest;
use crate::router::{
    SignalDecoder, SignalGeneration, ALWAYS_SUBSCRIBED, DESTROY_SIGNAL, PLURAL_SIGNALS_HINT,
};
use crate::{DBUS_PROPERTIES, PK_INTERFACE, PK_NAME, PK_PATH, PK_TRANSACTION_INTERFACE};

// ============================================================================
// Phases
// ============================================================================

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionPhase {
    /// Not submitted, or submitted without a transaction id yet
    #[default]
    Unbound,
    /// Waiting for the daemon to hand out a transaction id
    Binding,
    /// Attached to the transaction object
    Bound,
    /// The role's method call is in flight
    Dispatching,
    /// The service accepted the request and is streaming results
    Active,
    /// The completion event was published
    Finished,
    /// Subscriptions dropped; the handle is inert
    Released,
}

impl SessionPhase {
    /// Whether the session currently has a live transaction object
    pub fn is_bound(self) -> bool {
        matches!(
            self,
            SessionPhase::Bound | SessionPhase::Dispatching | SessionPhase::Active
        )
    }

    /// Whether the session can no longer publish events
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Finished | SessionPhase::Released)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Unbound => "unbound",
            SessionPhase::Binding => "binding",
            SessionPhase::Bound => "bound",
            SessionPhase::Dispatching => "dispatching",
            SessionPhase::Active => "active",
            SessionPhase::Finished => "finished",
            SessionPhase::Released => "released",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Shared state
// ============================================================================

/// What a session needs from the registry that created it
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub channel: Arc<dyn RpcChannel>,
    /// Global hints at the time the session was created
    pub hints: Vec<String>,
    pub daemon_events: broadcast::Sender<DaemonEvent>,
}

/// Instructions from the handle to its driver
#[derive(Debug)]
pub(crate) enum Command {
    /// The caller connected a new event kind
    Subscribe(EventKind),
    /// The caller issued the role's request
    Dispatch,
}

#[derive(Default)]
pub(crate) struct SessionState {
    pub phase: SessionPhase,
    pub tid: Option<String>,
    pub request: Option<TransactionRequest>,
    pub request_sent: bool,
    pub kinds: BTreeSet<EventKind>,
    /// Session-specific hints, sent after the global ones
    pub hints: Vec<String>,
    pub internal_error: InternalError,
    pub error_message: Option<String>,
    pub submitted: bool,
    pub commands: Option<mpsc::UnboundedSender<Command>>,
}

/// State shared between a [`Transaction`](crate::Transaction) handle and
/// its driver
pub(crate) struct SessionShared {
    pub ctx: SessionContext,
    pub state: Mutex<SessionState>,
    pub properties: RwLock<TransactionProperties>,
    pub record: Option<TransactionRecord>,
}

impl SessionShared {
    pub fn new(ctx: SessionContext, state: SessionState, record: Option<TransactionRecord>) -> Self {
        Self {
            ctx,
            state: Mutex::new(state),
            properties: RwLock::new(TransactionProperties::default()),
            record,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn properties(&self) -> TransactionProperties {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_phase(&self, phase: SessionPhase) {
        let mut state = self.lock();
        trace!(tid = ?state.tid, from = %state.phase, to = %phase, "Session phase");
        state.phase = phase;
    }
}

/// Asks the daemon for a new transaction object
pub(crate) async fn create_transaction_id(channel: &dyn RpcChannel) -> Result<String, ClientError> {
    let reply = channel
        .call(MethodCall::new(PK_NAME, PK_PATH, PK_INTERFACE, "CreateTransaction"))
        .await?;

    reply
        .first()
        .and_then(WireValue::as_str)
        .filter(|tid| !tid.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ClientError::InvalidReply("CreateTransaction returned no object path".into()))
}

/// Starts the driver task and returns the session's event stream
pub(crate) fn spawn(
    shared: Arc<SessionShared>,
    commands: mpsc::UnboundedReceiver<Command>,
) -> mpsc::UnboundedReceiver<TransactionEvent> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let driver = Driver::new(shared, events_tx);
    tokio::spawn(driver.run(commands));
    events_rx
}

// ============================================================================
// Driver
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct Driver {
    shared: Arc<SessionShared>,
    channel: Arc<dyn RpcChannel>,
    events: mpsc::UnboundedSender<TransactionEvent>,
    signals_tx: SignalSink,
    signals_rx: mpsc::UnboundedReceiver<SignalMessage>,
    subscriptions: Vec<SubscriptionId>,
    subscribed: BTreeSet<EventKind>,
    decoder: Arc<dyn SignalDecoder>,
    tid: String,
    sent_finished: bool,
}

impl Driver {
    fn new(shared: Arc<SessionShared>, events: mpsc::UnboundedSender<TransactionEvent>) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let channel = Arc::clone(&shared.ctx.channel);

        Self {
            shared,
            channel,
            events,
            signals_tx,
            signals_rx,
            subscriptions: Vec::new(),
            subscribed: BTreeSet::new(),
            decoder: SignalGeneration::Discrete.decoder(),
            tid: String::new(),
            sent_finished: false,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut daemon_events = self.shared.ctx.daemon_events.subscribe();

        // The service can vanish while a start call is still waiting for
        // its reply.
        let started = tokio::select! {
            result = self.start() => Some(result),
            () = service_down(&mut daemon_events) => None,
        };

        match started {
            Some(Ok(())) => self.serve(&mut commands, &mut daemon_events).await,
            Some(Err(e)) => self.fail(e),
            None => self.daemon_quit(),
        }

        self.release().await;
    }

    /// Transaction id, binding and the queued request
    async fn start(&mut self) -> Result<(), ClientError> {
        let known_tid = self.shared.lock().tid.clone();

        self.tid = match known_tid {
            Some(tid) => tid,
            None => {
                self.shared.set_phase(SessionPhase::Binding);
                let tid = create_transaction_id(self.channel.as_ref()).await?;
                debug!(tid = %tid, "Transaction id assigned");
                self.shared.lock().tid = Some(tid.clone());
                tid
            }
        };

        self.bind().await?;
        self.dispatch().await
    }

    async fn bind(&mut self) -> Result<(), ClientError> {
        let generation = SignalGeneration::introspect(self.channel.as_ref(), &self.tid).await;
        self.decoder = generation.decoder();

        let mut hints = self.shared.ctx.hints.clone();
        hints.extend(self.shared.lock().hints.iter().cloned());
        if generation == SignalGeneration::Batched {
            hints.push(PLURAL_SIGNALS_HINT.to_string());
        }
        if let Err(e) = self.set_hints(hints).await {
            warn!(tid = %self.tid, error = %e, "Failed to set transaction hints");
        }

        self.fetch_properties().await;

        self.subscribe_signal(DBUS_PROPERTIES, "PropertiesChanged")
            .await?;

        let kinds = self.shared.lock().kinds.clone();
        for kind in kinds {
            self.subscribe_kind(kind).await?;
        }
        for member in ALWAYS_SUBSCRIBED {
            self.subscribe_signal(PK_TRANSACTION_INTERFACE, member)
                .await?;
        }
        self.subscribe_signal(PK_TRANSACTION_INTERFACE, DESTROY_SIGNAL)
            .await?;

        self.shared.set_phase(SessionPhase::Bound);
        debug!(tid = %self.tid, generation = ?generation, "Session bound");
        Ok(())
    }

    async fn set_hints(&self, hints: Vec<String>) -> Result<(), ClientError> {
        if hints.is_empty() {
            return Ok(());
        }
        let call = MethodCall::new(PK_NAME, &self.tid, PK_TRANSACTION_INTERFACE, "SetHints")
            .arg(WireValue::str_list(hints));
        self.channel.call(call).await?;
        Ok(())
    }

    async fn fetch_properties(&mut self) {
        let call = MethodCall::new(PK_NAME, &self.tid, DBUS_PROPERTIES, "GetAll")
            .arg(PK_TRANSACTION_INTERFACE);

        match self.channel.call(call).await {
            Ok(reply) => match reply.first().and_then(WireValue::as_map) {
                Some(properties) => self.apply_properties(properties),
                None => warn!(tid = %self.tid, "GetAll reply is not a property map"),
            },
            Err(e) => warn!(tid = %self.tid, error = %e, "Failed to fetch transaction properties"),
        }
    }

    async fn subscribe_signal(&mut self, interface: &str, member: &str) -> Result<(), ClientError> {
        let rule = SignalMatch::new(PK_NAME, &self.tid, interface, member);
        let id = self.channel.subscribe(rule, self.signals_tx.clone()).await?;
        self.subscriptions.push(id);
        Ok(())
    }

    /// Subscribes to the wire signals of `kind`, once per session
    async fn subscribe_kind(&mut self, kind: EventKind) -> Result<(), ClientError> {
        if !self.subscribed.insert(kind) {
            return Ok(());
        }

        for member in self.decoder.signals_for(kind) {
            if ALWAYS_SUBSCRIBED.contains(member) {
                continue;
            }
            self.subscribe_signal(PK_TRANSACTION_INTERFACE, member)
                .await?;
        }
        trace!(tid = %self.tid, kind = ?kind, "Event kind connected");
        Ok(())
    }

    /// Sends the stored request, if there is one that was not sent yet
    async fn dispatch(&mut self) -> Result<(), ClientError> {
        let request = {
            let mut state = self.shared.lock();
            if state.request_sent {
                return Ok(());
            }
            let Some(request) = state.request.clone() else {
                return Ok(());
            };
            state.request_sent = true;
            request
        };

        self.shared.set_phase(SessionPhase::Dispatching);
        info!(tid = %self.tid, role = %request.role(), "Dispatching transaction");

        let call = MethodCall::new(PK_NAME, &self.tid, PK_TRANSACTION_INTERFACE, request.method())
            .with_args(request.args());
        self.channel.call(call).await?;

        self.shared.set_phase(SessionPhase::Active);
        Ok(())
    }

    async fn serve(
        &mut self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        daemon_events: &mut broadcast::Receiver<DaemonEvent>,
    ) {
        loop {
            tokio::select! {
                biased;

                Some(message) = self.signals_rx.recv() => {
                    if self.on_signal(message) == Flow::Stop {
                        break;
                    }
                }
                Some(command) = commands.recv() => {
                    if self.on_command(command).await == Flow::Stop {
                        break;
                    }
                }
                Some(event) = next_daemon_event(daemon_events) => {
                    if event == DaemonEvent::ServiceDown {
                        self.daemon_quit();
                        break;
                    }
                }
            }
        }
    }

    async fn on_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Subscribe(kind) => {
                if let Err(e) = self.subscribe_kind(kind).await {
                    warn!(tid = %self.tid, kind = ?kind, error = %e, "Failed to connect event kind");
                }
                Flow::Continue
            }
            Command::Dispatch => match self.dispatch().await {
                Ok(()) => Flow::Continue,
                Err(e) => {
                    self.fail(e);
                    Flow::Stop
                }
            },
        }
    }

    fn on_signal(&mut self, message: SignalMessage) -> Flow {
        if message.interface == DBUS_PROPERTIES {
            self.on_properties_changed(&message.args);
            return Flow::Continue;
        }

        if message.member == DESTROY_SIGNAL {
            if !self.sent_finished {
                debug!(tid = %self.tid, "Transaction destroyed before finishing");
                self.finish(Exit::Unknown, 0);
            }
            return Flow::Stop;
        }

        let events = match self.decoder.decode(&message.member, &message.args) {
            Ok(events) => events,
            Err(e) => {
                warn!(tid = %self.tid, signal = %message.member, error = %e, "Dropping undecodable signal");
                return Flow::Continue;
            }
        };

        for event in events {
            if let TransactionEvent::Finished { exit, runtime } = event {
                self.finish(exit, runtime);
                return Flow::Stop;
            }
            self.emit(event);
        }
        Flow::Continue
    }

    fn on_properties_changed(&mut self, args: &[WireValue]) {
        let (Some(interface), Some(changed)) = (
            args.first().and_then(WireValue::as_str),
            args.get(1).and_then(WireValue::as_map),
        ) else {
            warn!(tid = %self.tid, "Malformed PropertiesChanged signal");
            return;
        };

        if interface != PK_TRANSACTION_INTERFACE {
            warn!(tid = %self.tid, interface = %interface, "Properties of unexpected interface");
            return;
        }
        self.apply_properties(changed);
    }

    fn apply_properties(&mut self, properties: &BTreeMap<String, WireValue>) {
        let changed = TRANSACTION_PROPERTIES.apply(&self.shared.properties, properties);
        for property in changed {
            self.emit(TransactionEvent::PropertyChanged(property));
        }
        if !properties.is_empty() {
            self.emit(TransactionEvent::Changed);
        }
    }

    fn emit(&self, event: TransactionEvent) {
        if self.sent_finished {
            return;
        }
        // The caller may have dropped the stream; the session still runs
        // to completion.
        let _ = self.events.send(event);
    }

    fn finish(&mut self, exit: Exit, runtime: u32) {
        if self.sent_finished {
            return;
        }
        info!(tid = %self.tid, exit = %exit, runtime, "Transaction finished");
        let _ = self.events.send(TransactionEvent::Finished { exit, runtime });
        self.sent_finished = true;
        self.shared.set_phase(SessionPhase::Finished);
    }

    /// Publishes a local failure the way the service reports its own
    fn fail(&mut self, error: ClientError) {
        let internal = error.internal_error();
        warn!(tid = %self.tid, error = %error, internal = %internal, "Transaction failed");

        {
            let mut state = self.shared.lock();
            state.internal_error = internal;
            state.error_message = Some(error.to_string());
        }

        self.emit(TransactionEvent::ErrorCode {
            error: internal.error_code(),
            details: error.to_string(),
        });
        self.finish(Exit::Failed, 0);
    }

    fn daemon_quit(&mut self) {
        if self.sent_finished {
            return;
        }
        warn!(tid = %self.tid, "Package service quit during transaction");
        self.emit(TransactionEvent::ErrorCode {
            error: ErrorCode::ProcessKill,
            details: "The package service quit".to_string(),
        });
        self.finish(Exit::Killed, 0);
    }

    async fn release(&mut self) {
        for id in self.subscriptions.drain(..) {
            if let Err(e) = self.channel.unsubscribe(id).await {
                debug!(subscription = %id, error = %e, "Failed to unsubscribe");
            }
        }

        let mut state = self.shared.lock();
        state.phase = SessionPhase::Released;
        state.commands = None;
        trace!(tid = ?state.tid, "Session released");
    }
}

async fn next_daemon_event(rx: &mut broadcast::Receiver<DaemonEvent>) -> Option<DaemonEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Session lagged behind daemon events");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Resolves once the registry reports the service gone
async fn service_down(rx: &mut broadcast::Receiver<DaemonEvent>) {
    while let Some(event) = next_daemon_event(rx).await {
        if event == DaemonEvent::ServiceDown {
            return;
        }
    }
    std::future::pending::<()>().await
}
