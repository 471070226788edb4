//! Offline updates
//!
//! The service prepares updates and release upgrades while the system runs
//! and applies them on the next boot. [`Offline`] mirrors that state from
//! the `org.freedesktop.PackageKit.Offline` interface on the daemon object
//! and exposes the calls that schedule or cancel the offline run.
//!
//! ## Design Notes
//!
//! - Property changes arrive on the daemon object's shared
//!   `PropertiesChanged` signal. The [`Daemon`](crate::Daemon) subscribes
//!   once and hands this interface's batches over.
//! - Every call allows interactive authorization; scheduling reboots is a
//!   privileged action.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use pkclient_core::domain::{
    enum_from_string, ClientError, OfflineAction, PreparedUpgrade, WireValue,
};
use pkclient_core::ports::{MethodCall, RpcChannel};

use crate::properties::{Applied, PropertySetter, PropertyTable};
use crate::{DBUS_PROPERTIES, PK_NAME, PK_OFFLINE_INTERFACE, PK_PATH};

const EVENT_CAPACITY: usize = 32;

/// Offline update state published by the service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OfflineState {
    /// Release prepared for an offline upgrade, empty if none
    pub prepared_upgrade: PreparedUpgrade,
    /// What happens once the offline run is done
    pub trigger_action: OfflineAction,
    pub update_prepared: bool,
    pub update_triggered: bool,
    pub upgrade_prepared: bool,
    pub upgrade_triggered: bool,
}

/// Notifications from [`Offline`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineEvent {
    /// One property changed
    PropertyChanged(&'static str),
    /// A property batch was applied
    Changed,
    /// Reply of [`Offline::get_prepared`]
    PreparedUpdates(Vec<String>),
}

// ============================================================================
// Property table
// ============================================================================

type OfflineApplied = Applied<&'static str>;

fn flag(
    value: &WireValue,
    name: &'static str,
    field: impl FnOnce(bool),
) -> OfflineApplied {
    value.as_bool().map_or(Applied::WrongType, |v| {
        field(v);
        Applied::Changed(name)
    })
}

fn prepared_upgrade(s: &mut OfflineState, v: &WireValue) -> OfflineApplied {
    let Some(map) = v.as_map() else {
        return Applied::WrongType;
    };
    let text = |key: &str| {
        map.get(key)
            .and_then(WireValue::as_str)
            .unwrap_or_default()
            .to_string()
    };
    s.prepared_upgrade = PreparedUpgrade {
        name: text("name"),
        version: text("version"),
    };
    Applied::Changed("PreparedUpgrade")
}

fn trigger_action(s: &mut OfflineState, v: &WireValue) -> OfflineApplied {
    v.as_str().map_or(Applied::WrongType, |action| {
        s.trigger_action = enum_from_string::<OfflineAction>(action);
        Applied::Changed("TriggerAction")
    })
}

fn update_prepared(s: &mut OfflineState, v: &WireValue) -> OfflineApplied {
    flag(v, "UpdatePrepared", |b| s.update_prepared = b)
}

fn update_triggered(s: &mut OfflineState, v: &WireValue) -> OfflineApplied {
    flag(v, "UpdateTriggered", |b| s.update_triggered = b)
}

fn upgrade_prepared(s: &mut OfflineState, v: &WireValue) -> OfflineApplied {
    flag(v, "UpgradePrepared", |b| s.upgrade_prepared = b)
}

fn upgrade_triggered(s: &mut OfflineState, v: &WireValue) -> OfflineApplied {
    flag(v, "UpgradeTriggered", |b| s.upgrade_triggered = b)
}

static OFFLINE_ENTRIES: [(&str, PropertySetter<OfflineState, &'static str>); 6] = [
    ("PreparedUpgrade", prepared_upgrade),
    ("TriggerAction", trigger_action),
    ("UpdatePrepared", update_prepared),
    ("UpdateTriggered", update_triggered),
    ("UpgradePrepared", upgrade_prepared),
    ("UpgradeTriggered", upgrade_triggered),
];

/// Properties of `org.freedesktop.PackageKit.Offline`
pub static OFFLINE_PROPERTIES: PropertyTable<OfflineState, &'static str> =
    PropertyTable::new(PK_OFFLINE_INTERFACE, &OFFLINE_ENTRIES);

// ============================================================================
// Offline
// ============================================================================

struct OfflineInner {
    channel: Arc<dyn RpcChannel>,
    state: RwLock<OfflineState>,
    events: broadcast::Sender<OfflineEvent>,
    upgrade_timeout: Duration,
}

/// Offline update state and scheduling
#[derive(Clone)]
pub struct Offline {
    inner: Arc<OfflineInner>,
}

impl std::fmt::Debug for Offline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Offline")
            .field("state", &self.state())
            .finish()
    }
}

impl Offline {
    pub(crate) fn new(channel: Arc<dyn RpcChannel>, upgrade_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(OfflineInner {
                channel,
                state: RwLock::new(OfflineState::default()),
                events,
                upgrade_timeout,
            }),
        }
    }

    /// Fetches the full property set
    ///
    /// Failures are logged and leave the previous state in place.
    pub(crate) async fn refresh(&self) {
        let call = MethodCall::new(PK_NAME, PK_PATH, DBUS_PROPERTIES, "GetAll")
            .arg(PK_OFFLINE_INTERFACE);

        match self.inner.channel.call(call).await {
            Ok(reply) => match reply.first().and_then(WireValue::as_map) {
                Some(properties) => self.apply(properties),
                None => warn!("Offline GetAll reply is not a property map"),
            },
            Err(e) => warn!(error = %e, "Failed to fetch offline properties"),
        }
    }

    /// Handles one `PropertiesChanged` batch
    pub(crate) fn on_properties_changed(
        &self,
        interface: &str,
        changed: &BTreeMap<String, WireValue>,
        invalidated: &[String],
    ) {
        if interface != PK_OFFLINE_INTERFACE {
            warn!(interface = %interface, "Cannot apply properties of another interface");
            return;
        }
        if !invalidated.is_empty() {
            warn!(properties = ?invalidated, "Offline properties could not be invalidated");
        }
        self.apply(changed);
    }

    fn apply(&self, properties: &BTreeMap<String, WireValue>) {
        for name in OFFLINE_PROPERTIES.apply(&self.inner.state, properties) {
            let _ = self.inner.events.send(OfflineEvent::PropertyChanged(name));
        }
        if !properties.is_empty() {
            let _ = self.inner.events.send(OfflineEvent::Changed);
        }
    }

    /// Subscribes to offline notifications
    pub fn events(&self) -> broadcast::Receiver<OfflineEvent> {
        self.inner.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Snapshot of the whole state
    pub fn state(&self) -> OfflineState {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn prepared_upgrade(&self) -> PreparedUpgrade {
        self.state().prepared_upgrade
    }

    pub fn trigger_action(&self) -> OfflineAction {
        self.state().trigger_action
    }

    pub fn update_prepared(&self) -> bool {
        self.state().update_prepared
    }

    pub fn update_triggered(&self) -> bool {
        self.state().update_triggered
    }

    pub fn upgrade_prepared(&self) -> bool {
        self.state().upgrade_prepared
    }

    pub fn upgrade_triggered(&self) -> bool {
        self.state().upgrade_triggered
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn call(&self, method: &str) -> MethodCall {
        MethodCall::new(PK_NAME, PK_PATH, PK_OFFLINE_INTERFACE, method).interactive()
    }

    /// Schedules the prepared updates for the next boot
    ///
    /// # Arguments
    /// * `action` - What to do after the updates are applied
    ///
    /// # Errors
    /// [`ClientError::InvalidArgument`] for [`OfflineAction::Unset`]; any
    /// bus failure otherwise.
    pub async fn trigger(&self, action: OfflineAction) -> Result<(), ClientError> {
        let call = self.call("Trigger").arg(action_arg(action)?);
        self.inner.channel.call(call).await?;
        info!(action = %action, "Offline update triggered");
        Ok(())
    }

    /// Schedules the prepared release upgrade for the next boot
    ///
    /// The service may still download parts of the release before it
    /// replies, so this call has its own long timeout.
    pub async fn trigger_upgrade(&self, action: OfflineAction) -> Result<(), ClientError> {
        let call = self
            .call("TriggerUpgrade")
            .arg(action_arg(action)?)
            .with_timeout(self.inner.upgrade_timeout);
        self.inner.channel.call(call).await?;
        info!(action = %action, "Offline upgrade triggered");
        Ok(())
    }

    /// Unschedules the offline run
    pub async fn cancel(&self) -> Result<(), ClientError> {
        self.inner.channel.call(self.call("Cancel")).await?;
        Ok(())
    }

    /// Removes the results of the last offline run
    pub async fn clear_results(&self) -> Result<(), ClientError> {
        self.inner.channel.call(self.call("ClearResults")).await?;
        Ok(())
    }

    /// Package ids prepared for the next offline update
    ///
    /// A failed call is logged and yields an empty list. The result is
    /// also published as [`OfflineEvent::PreparedUpdates`].
    pub async fn get_prepared(&self) -> Vec<String> {
        let call = MethodCall::new(PK_NAME, PK_PATH, PK_OFFLINE_INTERFACE, "GetPrepared");

        let package_ids = match self.inner.channel.call(call).await {
            Ok(reply) => reply
                .first()
                .and_then(WireValue::as_str_list)
                .unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Failed to get prepared updates");
                Vec::new()
            }
        };

        debug!(count = package_ids.len(), "Prepared updates");
        let _ = self
            .inner
            .events
            .send(OfflineEvent::PreparedUpdates(package_ids.clone()));
        package_ids
    }
}

fn action_arg(action: OfflineAction) -> Result<WireValue, ClientError> {
    match action {
        OfflineAction::Unset => Err(ClientError::InvalidArgument(
            "an offline action must be power-off or reboot".to_string(),
        )),
        action => Ok(WireValue::from(action.to_string())),
    }
}
