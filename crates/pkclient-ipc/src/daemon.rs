//! Daemon registry
//!
//! [`Daemon`] is the client's view of the package service as a whole:
//! whether it is running, what its backend can do, the daemon-level
//! methods, and the factories for [`Transaction`]s.
//!
//! ## Design Notes
//!
//! - A `Daemon` is an explicit context object. Tests build one over any
//!   [`RpcChannel`]; applications usually go through [`Daemon::global`].
//! - One background task watches ownership of the service name and the
//!   daemon object's signals. It holds a weak reference, so dropping every
//!   `Daemon` handle stops it.
//! - The capability snapshot is replaced one batch at a time. A failed
//!   fetch is logged and leaves the last good snapshot in place.
//! - Live transactions learn about the service going away through the
//!   [`DaemonEvent::ServiceDown`] broadcast.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::sync::{broadcast, mpsc, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pkclient_core::config::ClientConfig;
use pkclient_core::domain::{
    Authorize, Bitfield, ClientError, Filters, Network, Role, TransactionRecord, WireValue,
};
use pkclient_core::ports::{MethodCall, OwnerChange, RpcChannel, SignalMatch, SignalMessage};

use crate::bus::ZbusChannel;
use crate::offline::Offline;
use crate::properties::{Applied, PropertySetter, PropertyTable};
use crate::request::{RoleRequests, TransactionRequest};
use crate::session::{self, SessionContext};
use crate::transaction::Transaction;
use crate::{DBUS_PROPERTIES, PK_INTERFACE, PK_NAME, PK_OFFLINE_INTERFACE, PK_PATH};

const EVENT_CAPACITY: usize = 64;

/// Signals of the daemon interface the registry listens to
const DAEMON_SIGNALS: [&str; 4] = [
    "RepoListChanged",
    "RestartSchedule",
    "TransactionListChanged",
    "UpdatesChanged",
];

static GLOBAL: OnceCell<Daemon> = OnceCell::const_new();

/// Notifications from the [`Daemon`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonEvent {
    /// The service quit or was replaced; live transactions are over
    ServiceDown,
    /// Reachability changed
    RunningChanged(bool),
    /// A capability batch was applied
    Changed,
    NetworkStateChanged(Network),
    /// Paths of the transactions the service is running
    TransactionListChanged(Vec<String>),
    RepoListChanged,
    /// A restart was scheduled, usually because the service was updated
    RestartScheduled,
    UpdatesChanged,
}

// ============================================================================
// Capabilities
// ============================================================================

/// What the service and its backend advertise
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub backend_author: String,
    pub backend_description: String,
    pub backend_name: String,
    /// e.g. `fedora;41;x86_64`
    pub distro_id: String,
    pub filters: Filters,
    /// Group positions, see [`Group`](pkclient_core::domain::Group)
    pub groups: Bitfield,
    /// Whether the backend holds its package database lock
    pub locked: bool,
    pub mime_types: Vec<String>,
    pub network_state: Network,
    /// Role positions, see [`Role`]
    pub roles: Bitfield,
    pub version_major: u32,
    pub version_minor: u32,
    pub version_micro: u32,
}

impl Capabilities {
    pub fn version(&self) -> semver::Version {
        semver::Version::new(
            u64::from(self.version_major),
            u64::from(self.version_minor),
            u64::from(self.version_micro),
        )
    }

    /// Whether the backend implements `role`
    pub fn supports(&self, role: Role) -> bool {
        self.roles.contains(role.as_u32())
    }
}

type CapApplied = Applied<&'static str>;

fn text(
    v: &WireValue,
    name: &'static str,
    field: impl FnOnce(String),
) -> CapApplied {
    v.as_str().map_or(Applied::WrongType, |s| {
        field(s.to_string());
        Applied::Changed(name)
    })
}

fn number(v: &WireValue, name: &'static str, field: impl FnOnce(u32)) -> CapApplied {
    v.as_u32().map_or(Applied::WrongType, |n| {
        field(n);
        Applied::Changed(name)
    })
}

fn bits(v: &WireValue, name: &'static str, field: impl FnOnce(u64)) -> CapApplied {
    v.as_u64().map_or(Applied::WrongType, |n| {
        field(n);
        Applied::Changed(name)
    })
}

fn backend_author(c: &mut Capabilities, v: &WireValue) -> CapApplied {
    text(v, "BackendAuthor", |s| c.backend_author = s)
}

fn backend_description(c: &mut Capabilities, v: &WireValue) -> CapApplied {
    text(v, "BackendDescription", |s| c.backend_description = s)
}

fn backend_name(c: &mut Capabilities, v: &WireValue) -> CapApplied {
    text(v, "BackendName", |s| c.backend_name = s)
}

fn distro_id(c: &mut Capabilities, v: &WireValue) -> CapApplied {
    text(v, "DistroId", |s| c.distro_id = s)
}

fn filters(c: &mut Capabilities, v: &WireValue) -> CapApplied {
    bits(v, "Filters", |n| c.filters = Filters::from_bits_retain(n))
}

fn groups(c: &mut Capabilities, v: &WireValue) -> CapApplied {
    bits(v, "Groups", |n| c.groups = Bitfield::new(n))
}

fn locked(c: &mut Capabilities, v: &WireValue) -> CapApplied {
    v.as_bool().map_or(Applied::WrongType, |b| {
        c.locked = b;
        Applied::Changed("Locked")
    })
}

fn mime_types(c: &mut Capabilities, v: &WireValue) -> CapApplied {
    v.as_str_list().map_or(Applied::WrongType, |types| {
        c.mime_types = types;
        Applied::Changed("MimeTypes")
    })
}

fn network_state(c: &mut Capabilities, v: &WireValue) -> CapApplied {
    number(v, "NetworkState", |n| c.network_state = Network::from_u32(n))
}

fn roles(c: &mut Capabilities, v: &WireValue) -> CapApplied {
    bits(v, "Roles", |n| c.roles = Bitfield::new(n))
}

fn version_major(c: &mut Capabilities, v: &WireValue) -> CapApplied {
    number(v, "VersionMajor", |n| c.version_major = n)
}

fn version_micro(c: &mut Capabilities, v: &WireValue) -> CapApplied {
    number(v, "VersionMicro", |n| c.version_micro = n)
}

fn version_minor(c: &mut Capabilities, v: &WireValue) -> CapApplied {
    number(v, "VersionMinor", |n| c.version_minor = n)
}

static CAPABILITY_ENTRIES: [(&str, PropertySetter<Capabilities, &'static str>); 13] = [
    ("BackendAuthor", backend_author),
    ("BackendDescription", backend_description),
    ("BackendName", backend_name),
    ("DistroId", distro_id),
    ("Filters", filters),
    ("Groups", groups),
    ("Locked", locked),
    ("MimeTypes", mime_types),
    ("NetworkState", network_state),
    ("Roles", roles),
    ("VersionMajor", version_major),
    ("VersionMicro", version_micro),
    ("VersionMinor", version_minor),
];

/// Properties of `org.freedesktop.PackageKit`
pub static CAPABILITY_PROPERTIES: PropertyTable<Capabilities, &'static str> =
    PropertyTable::new(PK_INTERFACE, &CAPABILITY_ENTRIES);

// ============================================================================
// Daemon
// ============================================================================

struct DaemonInner {
    channel: Arc<dyn RpcChannel>,
    config: ClientConfig,
    running: AtomicBool,
    capabilities: RwLock<Capabilities>,
    hints: RwLock<Vec<String>>,
    events: broadcast::Sender<DaemonEvent>,
    offline: Offline,
    shutdown: CancellationToken,
}

impl Drop for DaemonInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Client-side registry of the package service
#[derive(Clone)]
pub struct Daemon {
    inner: Arc<DaemonInner>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("running", &self.is_running())
            .field("backend", &self.backend_name())
            .finish()
    }
}

impl Daemon {
    /// Creates a registry over `channel`
    ///
    /// Starts watching the service, subscribes to the daemon object's
    /// signals and fetches the first capability snapshot. An unreachable
    /// service is not an error here; the registry reports it as not running
    /// and picks it up once it appears.
    ///
    /// # Errors
    /// Returns an error if the name watch or a subscription cannot be set up.
    pub async fn connect(
        channel: Arc<dyn RpcChannel>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let offline = Offline::new(
            Arc::clone(&channel),
            config.timeouts.offline_upgrade_trigger(),
        );
        let hints = config.hint_list();

        let inner = Arc::new(DaemonInner {
            channel,
            config,
            running: AtomicBool::new(false),
            capabilities: RwLock::new(Capabilities::default()),
            hints: RwLock::new(hints),
            events,
            offline,
            shutdown: CancellationToken::new(),
        });

        let (owner_tx, owner_rx) = mpsc::unbounded_channel();
        inner.channel.watch_name(PK_NAME, owner_tx).await?;

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        inner
            .channel
            .subscribe(
                SignalMatch::new(PK_NAME, PK_PATH, DBUS_PROPERTIES, "PropertiesChanged"),
                signals_tx.clone(),
            )
            .await?;
        for member in DAEMON_SIGNALS {
            inner
                .channel
                .subscribe(
                    SignalMatch::new(PK_NAME, PK_PATH, PK_INTERFACE, member),
                    signals_tx.clone(),
                )
                .await?;
        }

        let daemon = Self { inner };
        daemon.refresh().await;
        daemon.inner.offline.refresh().await;

        tokio::spawn(watch(
            Arc::downgrade(&daemon.inner),
            daemon.inner.shutdown.clone(),
            owner_rx,
            signals_rx,
        ));

        info!(
            running = daemon.is_running(),
            backend = %daemon.backend_name(),
            "Package service registry started"
        );
        Ok(daemon)
    }

    /// Creates a registry over a new bus connection described by `config`
    pub async fn connect_with_config(config: ClientConfig) -> Result<Self, ClientError> {
        let channel =
            ZbusChannel::connect(config.bus, config.timeouts.method_call()).await?;
        Self::connect(Arc::new(channel), config).await
    }

    /// The process-wide registry
    ///
    /// Created with the default configuration on first use, unless one was
    /// installed with [`Daemon::set_global`] before.
    pub async fn global() -> Result<&'static Daemon, ClientError> {
        GLOBAL
            .get_or_try_init(|| Daemon::connect_with_config(ClientConfig::default()))
            .await
    }

    /// Installs `daemon` as the process-wide registry
    ///
    /// Gives `daemon` back if a registry was already installed.
    pub fn set_global(daemon: Daemon) -> Result<(), Daemon> {
        GLOBAL.set(daemon).map_err(|e| match e {
            tokio::sync::SetError::AlreadyInitializedError(d)
            | tokio::sync::SetError::InitializingError(d) => d,
        })
    }

    /// Subscribes to registry notifications
    pub fn events(&self) -> broadcast::Receiver<DaemonEvent> {
        self.inner.events.subscribe()
    }

    /// Offline update state, fed by the same watch
    pub fn offline(&self) -> &Offline {
        &self.inner.offline
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Capability accessors
    // ------------------------------------------------------------------

    /// Whether the service is currently reachable
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Snapshot of every advertised capability
    pub fn capabilities(&self) -> Capabilities {
        self.inner
            .capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn roles(&self) -> Bitfield {
        self.capabilities().roles
    }

    pub fn filters(&self) -> Filters {
        self.capabilities().filters
    }

    pub fn groups(&self) -> Bitfield {
        self.capabilities().groups
    }

    pub fn mime_types(&self) -> Vec<String> {
        self.capabilities().mime_types
    }

    pub fn network_state(&self) -> Network {
        self.capabilities().network_state
    }

    pub fn distro_id(&self) -> String {
        self.capabilities().distro_id
    }

    pub fn backend_name(&self) -> String {
        self.capabilities().backend_name
    }

    pub fn backend_description(&self) -> String {
        self.capabilities().backend_description
    }

    pub fn backend_author(&self) -> String {
        self.capabilities().backend_author
    }

    pub fn locked(&self) -> bool {
        self.capabilities().locked
    }

    pub fn version_major(&self) -> u32 {
        self.capabilities().version_major
    }

    pub fn version_minor(&self) -> u32 {
        self.capabilities().version_minor
    }

    pub fn version_micro(&self) -> u32 {
        self.capabilities().version_micro
    }

    pub fn version(&self) -> semver::Version {
        self.capabilities().version()
    }

    // ------------------------------------------------------------------
    // Hints
    // ------------------------------------------------------------------

    /// Replaces the hints sent to every transaction created from now on
    pub fn set_hints<I, S>(&self, hints: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hints: Vec<String> = hints.into_iter().map(Into::into).collect();
        debug!(hints = ?hints, "Global hints set");
        *self
            .inner
            .hints
            .write()
            .unwrap_or_else(PoisonError::into_inner) = hints;
    }

    pub fn hints(&self) -> Vec<String> {
        self.inner
            .hints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    fn session_context(&self) -> SessionContext {
        SessionContext {
            channel: Arc::clone(&self.inner.channel),
            hints: self.hints(),
            daemon_events: self.inner.events.clone(),
        }
    }

    /// Asks the service for a new transaction object
    ///
    /// # Returns
    /// The object path of the transaction
    ///
    /// # Errors
    /// [`ClientError::DaemonUnreachable`] if the service is absent.
    pub async fn create_transaction_id(&self) -> Result<String, ClientError> {
        session::create_transaction_id(self.inner.channel.as_ref()).await
    }

    /// Creates a transaction object and returns a handle bound to it
    ///
    /// The role is issued later through the handle's own
    /// [`RoleRequests`] methods.
    pub async fn new_transaction(&self) -> Result<Transaction, ClientError> {
        let tid = self.create_transaction_id().await?;
        Ok(self.attach(tid))
    }

    /// A handle for an existing transaction object
    pub fn attach(&self, tid: impl Into<String>) -> Transaction {
        Transaction::attached(self.session_context(), tid.into())
    }

    /// A handle for a transaction from the service's history
    pub fn replay(&self, record: &TransactionRecord) -> Transaction {
        Transaction::historical(self.session_context(), record.clone())
    }

    // ------------------------------------------------------------------
    // Daemon methods
    // ------------------------------------------------------------------

    fn daemon_call(&self, method: &str) -> MethodCall {
        MethodCall::new(PK_NAME, PK_PATH, PK_INTERFACE, method)
    }

    /// Whether the caller may perform a PolicyKit action
    pub async fn can_authorize(&self, action_id: &str) -> Result<Authorize, ClientError> {
        let reply = self
            .inner
            .channel
            .call(self.daemon_call("CanAuthorize").arg(action_id))
            .await?;
        first_u32(&reply, "CanAuthorize").map(Authorize::from_u32)
    }

    /// Seconds since `role` last ran
    pub async fn get_time_since_action(&self, role: Role) -> Result<u32, ClientError> {
        let reply = self
            .inner
            .channel
            .call(self.daemon_call("GetTimeSinceAction").arg(role.as_u32()))
            .await?;
        first_u32(&reply, "GetTimeSinceAction")
    }

    /// Paths of the transactions the service is running
    pub async fn get_transaction_list(&self) -> Result<Vec<String>, ClientError> {
        let reply = self
            .inner
            .channel
            .call(self.daemon_call("GetTransactionList"))
            .await?;
        reply
            .first()
            .and_then(WireValue::as_str_list)
            .ok_or_else(|| ClientError::InvalidReply("GetTransactionList".into()))
    }

    /// Sets the proxies the backend uses for downloads
    pub async fn set_proxy(
        &self,
        http: &str,
        https: &str,
        ftp: &str,
        socks: &str,
        no_proxy: &str,
        pac: &str,
    ) -> Result<(), ClientError> {
        let call = self
            .daemon_call("SetProxy")
            .with_args([http, https, ftp, socks, no_proxy, pac].map(WireValue::from).to_vec());
        self.inner.channel.call(call).await?;
        Ok(())
    }

    /// Tells the service that system state changed
    ///
    /// # Arguments
    /// * `reason` - `resume` or `network`
    pub async fn state_has_changed(&self, reason: &str) -> Result<(), ClientError> {
        self.inner
            .channel
            .call(self.daemon_call("StateHasChanged").arg(reason))
            .await?;
        Ok(())
    }

    /// Asks the service to quit once it is idle
    pub async fn suggest_daemon_quit(&self) -> Result<(), ClientError> {
        self.inner
            .channel
            .call(self.daemon_call("SuggestDaemonQuit"))
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Snapshot maintenance
    // ------------------------------------------------------------------

    async fn refresh(&self) {
        refresh(&self.inner).await;
    }
}

impl RoleRequests for Daemon {
    type Output = Transaction;

    /// Creates a queued transaction for `request`
    fn issue(&self, request: TransactionRequest) -> Transaction {
        Transaction::queued(self.session_context(), request)
    }
}

fn first_u32(reply: &[WireValue], method: &str) -> Result<u32, ClientError> {
    reply
        .first()
        .and_then(WireValue::as_u32)
        .ok_or_else(|| ClientError::InvalidReply(format!("{method} returned no number")))
}

fn emit(inner: &DaemonInner, event: DaemonEvent) {
    // No receivers is fine; events are advisory.
    let _ = inner.events.send(event);
}

fn set_running(inner: &DaemonInner, running: bool) {
    if inner.running.swap(running, Ordering::SeqCst) != running {
        info!(running, "Package service reachability changed");
        emit(inner, DaemonEvent::RunningChanged(running));
    }
}

async fn refresh(inner: &DaemonInner) {
    let call = MethodCall::new(PK_NAME, PK_PATH, DBUS_PROPERTIES, "GetAll").arg(PK_INTERFACE);

    match inner.channel.call(call).await {
        Ok(reply) => match reply.first().and_then(WireValue::as_map) {
            Some(properties) => apply_capabilities(inner, properties),
            None => warn!("Daemon GetAll reply is not a property map"),
        },
        Err(e) => warn!(error = %e, "Failed to fetch daemon properties"),
    }
}

fn apply_capabilities(inner: &DaemonInner, properties: &BTreeMap<String, WireValue>) {
    set_running(inner, true);

    let changed = CAPABILITY_PROPERTIES.apply(&inner.capabilities, properties);
    if changed.contains(&"NetworkState") {
        let state = inner
            .capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .network_state;
        emit(inner, DaemonEvent::NetworkStateChanged(state));
    }
    if !properties.is_empty() {
        emit(inner, DaemonEvent::Changed);
    }
}

// ============================================================================
// Watch task
// ============================================================================

async fn watch(
    inner: Weak<DaemonInner>,
    shutdown: CancellationToken,
    mut owners: mpsc::UnboundedReceiver<OwnerChange>,
    mut signals: mpsc::UnboundedReceiver<SignalMessage>,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(change) = owners.recv() => {
                let Some(inner) = inner.upgrade() else { break };
                on_owner_change(&inner, change).await;
            }
            Some(message) = signals.recv() => {
                let Some(inner) = inner.upgrade() else { break };
                on_signal(&inner, message);
            }
            else => break,
        }
    }
    debug!("Package service watch stopped");
}

async fn on_owner_change(inner: &DaemonInner, change: OwnerChange) {
    debug!(
        old_owner = ?change.old_owner,
        new_owner = ?change.new_owner,
        "Package service owner changed"
    );

    if change.new_owner.is_none() || change.old_owner.is_some() {
        warn!("Package service went away");
        emit(inner, DaemonEvent::ServiceDown);
    }

    if change.new_owner.is_some() {
        emit(inner, DaemonEvent::TransactionListChanged(Vec::new()));
        refresh(inner).await;
        inner.offline.refresh().await;
        set_running(inner, true);
    } else {
        set_running(inner, false);
    }
}

fn on_signal(inner: &DaemonInner, message: SignalMessage) {
    if message.interface == DBUS_PROPERTIES {
        on_properties_changed(inner, &message.args);
        return;
    }

    let event = match message.member.as_str() {
        "RepoListChanged" => DaemonEvent::RepoListChanged,
        "RestartSchedule" => DaemonEvent::RestartScheduled,
        "UpdatesChanged" => DaemonEvent::UpdatesChanged,
        "TransactionListChanged" => {
            let tids = message
                .args
                .first()
                .and_then(WireValue::as_str_list)
                .unwrap_or_default();
            DaemonEvent::TransactionListChanged(tids)
        }
        other => {
            debug!(signal = %other, "Ignoring daemon signal");
            return;
        }
    };
    emit(inner, event);
}

fn on_properties_changed(inner: &DaemonInner, args: &[WireValue]) {
    let (Some(interface), Some(changed)) = (
        args.first().and_then(WireValue::as_str),
        args.get(1).and_then(WireValue::as_map),
    ) else {
        warn!("Malformed PropertiesChanged signal on the daemon object");
        return;
    };
    let invalidated = args
        .get(2)
        .and_then(WireValue::as_str_list)
        .unwrap_or_default();

    match interface {
        PK_INTERFACE => apply_capabilities(inner, changed),
        PK_OFFLINE_INTERFACE => inner
            .offline
            .on_properties_changed(interface, changed, &invalidated),
        other => warn!(interface = %other, "Properties of unknown interface"),
    }
}
