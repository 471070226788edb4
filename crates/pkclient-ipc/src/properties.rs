//! Property tables
//!
//! The daemon object, the offline interface and every transaction object
//! publish state as D-Bus properties: a full snapshot through `GetAll` and
//! increments through `PropertiesChanged`. A [`PropertyTable`] maps wire
//! property names to typed field updates on a snapshot struct.
//!
//! ## Design Notes
//!
//! - A batch is applied to a copy of the snapshot and the copy replaces
//!   the shared one in a single write, so readers never see half a batch.
//! - Unknown names and values of the wrong type are logged and skipped.
//! - The caller gets one notification per updated field back, and decides
//!   itself about the aggregate "changed" notification.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use tracing::{trace, warn};

use pkclient_core::domain::{Role, Status, TransactionFlags, TransactionProperty, WireValue};

/// Outcome of applying one property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied<E> {
    /// The field was updated
    Changed(E),
    /// The value was valid but deliberately not applied
    Ignored,
    /// The value does not have the property's type
    WrongType,
}

/// Applies one wire value to a snapshot field
pub type PropertySetter<T, E> = fn(&mut T, &WireValue) -> Applied<E>;

/// Name-keyed setters for one interface's properties
pub struct PropertyTable<T: 'static, E: 'static> {
    interface: &'static str,
    entries: &'static [(&'static str, PropertySetter<T, E>)],
}

impl<T: Clone, E> PropertyTable<T, E> {
    pub const fn new(
        interface: &'static str,
        entries: &'static [(&'static str, PropertySetter<T, E>)],
    ) -> Self {
        Self { interface, entries }
    }

    /// Applies a batch to `state` as a whole
    ///
    /// # Arguments
    /// * `state` - Shared snapshot to update
    /// * `properties` - Property name to new value
    ///
    /// # Returns
    /// One notification per field that changed, in name order
    pub fn apply(&self, state: &RwLock<T>, properties: &BTreeMap<String, WireValue>) -> Vec<E> {
        if properties.is_empty() {
            return Vec::new();
        }

        let mut next = state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut changed = Vec::new();

        for (name, value) in properties {
            let Some((_, setter)) = self.entries.iter().find(|(key, _)| *key == name) else {
                warn!(interface = self.interface, property = %name, value = ?value, "Unknown property");
                continue;
            };

            match setter(&mut next, value) {
                Applied::Changed(event) => changed.push(event),
                Applied::Ignored => {
                    trace!(interface = self.interface, property = %name, "Property update ignored");
                }
                Applied::WrongType => {
                    warn!(interface = self.interface, property = %name, value = ?value, "Property has unexpected type");
                }
            }
        }

        *state.write().unwrap_or_else(PoisonError::into_inner) = next;
        changed
    }
}

// ============================================================================
// Transaction properties
// ============================================================================

/// Live state of a transaction object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionProperties {
    pub allow_cancel: bool,
    pub caller_active: bool,
    pub download_size_remaining: u64,
    /// Seconds since the transaction started
    pub elapsed_time: u32,
    pub last_package: String,
    /// 0-100, or 101 when unknown
    pub percentage: u32,
    /// Estimated seconds left, 0 when unknown
    pub remaining_time: u32,
    pub role: Role,
    /// Bytes per second
    pub speed: u32,
    pub status: Status,
    pub transaction_flags: TransactionFlags,
    pub uid: u32,
}

type TxApplied = Applied<TransactionProperty>;

fn with_bool(value: &WireValue, apply: impl FnOnce(bool) -> TransactionProperty) -> TxApplied {
    value.as_bool().map_or(Applied::WrongType, |v| Applied::Changed(apply(v)))
}

fn with_u32(value: &WireValue, apply: impl FnOnce(u32) -> TransactionProperty) -> TxApplied {
    value.as_u32().map_or(Applied::WrongType, |v| Applied::Changed(apply(v)))
}

fn allow_cancel(p: &mut TransactionProperties, v: &WireValue) -> TxApplied {
    with_bool(v, |v| {
        p.allow_cancel = v;
        TransactionProperty::AllowCancel(v)
    })
}

fn caller_active(p: &mut TransactionProperties, v: &WireValue) -> TxApplied {
    with_bool(v, |v| {
        p.caller_active = v;
        TransactionProperty::CallerActive(v)
    })
}

fn download_size_remaining(p: &mut TransactionProperties, v: &WireValue) -> TxApplied {
    v.as_u64().map_or(Applied::WrongType, |size| {
        p.download_size_remaining = size;
        Applied::Changed(TransactionProperty::DownloadSizeRemaining(size))
    })
}

fn elapsed_time(p: &mut TransactionProperties, v: &WireValue) -> TxApplied {
    with_u32(v, |v| {
        p.elapsed_time = v;
        TransactionProperty::ElapsedTime(v)
    })
}

fn last_package(p: &mut TransactionProperties, v: &WireValue) -> TxApplied {
    v.as_str().map_or(Applied::WrongType, |id| {
        p.last_package = id.to_string();
        Applied::Changed(TransactionProperty::LastPackage(id.to_string()))
    })
}

fn percentage(p: &mut TransactionProperties, v: &WireValue) -> TxApplied {
    with_u32(v, |v| {
        p.percentage = v;
        TransactionProperty::Percentage(v)
    })
}

fn remaining_time(p: &mut TransactionProperties, v: &WireValue) -> TxApplied {
    with_u32(v, |v| {
        p.remaining_time = v;
        TransactionProperty::RemainingTime(v)
    })
}

fn role(p: &mut TransactionProperties, v: &WireValue) -> TxApplied {
    match v.as_u32().map(Role::from_u32) {
        // The role of a session never changes once known.
        Some(role) if p.role == Role::Unknown => {
            p.role = role;
            Applied::Changed(TransactionProperty::Role(role))
        }
        Some(_) => Applied::Ignored,
        None => Applied::WrongType,
    }
}

fn speed(p: &mut TransactionProperties, v: &WireValue) -> TxApplied {
    with_u32(v, |v| {
        p.speed = v;
        TransactionProperty::Speed(v)
    })
}

fn status(p: &mut TransactionProperties, v: &WireValue) -> TxApplied {
    with_u32(v, |v| {
        p.status = Status::from_u32(v);
        TransactionProperty::Status(p.status)
    })
}

fn transaction_flags(p: &mut TransactionProperties, v: &WireValue) -> TxApplied {
    v.as_u64().map_or(Applied::WrongType, |bits| {
        p.transaction_flags = TransactionFlags::from_bits_retain(bits);
        Applied::Changed(TransactionProperty::TransactionFlags(p.transaction_flags))
    })
}

fn uid(p: &mut TransactionProperties, v: &WireValue) -> TxApplied {
    with_u32(v, |v| {
        p.uid = v;
        TransactionProperty::Uid(v)
    })
}

static TRANSACTION_ENTRIES: [(&str, PropertySetter<TransactionProperties, TransactionProperty>);
    12] = [
    ("AllowCancel", allow_cancel),
    ("CallerActive", caller_active),
    ("DownloadSizeRemaining", download_size_remaining),
    ("ElapsedTime", elapsed_time),
    ("LastPackage", last_package),
    ("Percentage", percentage),
    ("RemainingTime", remaining_time),
    ("Role", role),
    ("Speed", speed),
    ("Status", status),
    ("TransactionFlags", transaction_flags),
    ("Uid", uid),
];

/// Properties of `org.freedesktop.PackageKit.Transaction`
pub static TRANSACTION_PROPERTIES: PropertyTable<TransactionProperties, TransactionProperty> =
    PropertyTable::new(crate::PK_TRANSACTION_INTERFACE, &TRANSACTION_ENTRIES);
