//! zbus adapter for the RPC channel port
//!
//! [`ZbusChannel`] implements [`RpcChannel`] over one `zbus::Connection`.
//!
//! ## Design Notes
//!
//! - A single dispatcher task reads the connection's message stream and
//!   fans signals out to the registered subscriptions. Every subscription
//!   that shares a sink therefore sees messages in bus order.
//! - Match rules are registered with the bus daemon per subscription and
//!   removed on unsubscribe; the local table is the authority on delivery.
//! - Arguments and replies are converted between [`WireValue`] and
//!   `zvariant::Value` here, so the rest of the crate never sees zvariant.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use zbus::zvariant::{self, Array, Dict, ObjectPath, Signature, StructureBuilder, Value};
use zbus::{MatchRule, MessageStream};

use pkclient_core::config::BusKind;
use pkclient_core::domain::{RpcError, WireValue};
use pkclient_core::ports::{
    MethodCall, OwnerChange, RpcChannel, SignalMatch, SignalMessage, SignalSink, SubscriptionId,
};

const DBUS_NAME: &str = "org.freedesktop.DBus";
const DBUS_PATH: &str = "/org/freedesktop/DBus";
const DBUS_INTERFACE: &str = "org.freedesktop.DBus";
const DBUS_INTROSPECTABLE: &str = "org.freedesktop.DBus.Introspectable";
const DBUS_SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";

/// Messages buffered by the connection before the dispatcher catches up
const MAX_QUEUED: usize = 1024;

// ============================================================================
// ZbusChannel
// ============================================================================

struct Subscription {
    rule: SignalMatch,
    match_rule: MatchRule<'static>,
    sink: SignalSink,
}

/// [`RpcChannel`] over a zbus connection
pub struct ZbusChannel {
    conn: zbus::Connection,
    dbus: zbus::fdo::DBusProxy<'static>,
    subscriptions: Arc<DashMap<SubscriptionId, Subscription>>,
    next_id: AtomicU64,
    default_timeout: Duration,
    cancel: CancellationToken,
}

impl ZbusChannel {
    /// Connects to the given bus with a default call timeout
    pub async fn connect(bus: BusKind, default_timeout: Duration) -> Result<Self, RpcError> {
        let builder = match bus {
            BusKind::System => zbus::connection::Builder::system(),
            BusKind::Session => zbus::connection::Builder::session(),
        }
        .map_err(map_zbus_error)?;

        let conn = builder
            .max_queued(MAX_QUEUED)
            .build()
            .await
            .map_err(map_zbus_error)?;

        debug!(bus = ?bus, "Connected to message bus");
        Self::new(conn, default_timeout).await
    }

    /// Wraps an existing connection
    ///
    /// Spawns the signal dispatcher on the current tokio runtime. It stops
    /// when the channel is dropped.
    pub async fn new(conn: zbus::Connection, default_timeout: Duration) -> Result<Self, RpcError> {
        let dbus = zbus::fdo::DBusProxy::new(&conn)
            .await
            .map_err(map_zbus_error)?;

        let subscriptions: Arc<DashMap<SubscriptionId, Subscription>> = Arc::new(DashMap::new());
        let cancel = CancellationToken::new();

        tokio::spawn(dispatch_signals(
            MessageStream::from(&conn),
            Arc::clone(&subscriptions),
            cancel.clone(),
        ));

        Ok(Self {
            conn,
            dbus,
            subscriptions,
            next_id: AtomicU64::new(1),
            default_timeout,
            cancel,
        })
    }

    async fn add_subscription(
        &self,
        rule: SignalMatch,
        match_rule: MatchRule<'static>,
        sink: SignalSink,
    ) -> Result<SubscriptionId, RpcError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        // Registered locally first so nothing sent after the bus accepts the
        // rule can be missed.
        self.subscriptions.insert(
            id,
            Subscription {
                rule: rule.clone(),
                match_rule: match_rule.clone(),
                sink,
            },
        );

        if let Err(e) = self.dbus.add_match_rule(match_rule).await {
            self.subscriptions.remove(&id);
            return Err(map_fdo_error(e));
        }

        trace!(subscription = %id, member = %rule.member, path = %rule.path, "Subscribed");
        Ok(id)
    }
}

impl Drop for ZbusChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait::async_trait]
impl RpcChannel for ZbusChannel {
    async fn call(&self, call: MethodCall) -> Result<Vec<WireValue>, RpcError> {
        let timeout = call.timeout.unwrap_or(self.default_timeout);
        trace!(call = %call, "Calling method");

        match tokio::time::timeout(timeout, self.call_inner(&call)).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout(timeout.as_secs())),
        }
    }

    async fn subscribe(
        &self,
        rule: SignalMatch,
        sink: SignalSink,
    ) -> Result<SubscriptionId, RpcError> {
        let match_rule = signal_rule(&rule, None)?;
        self.add_subscription(rule, match_rule, sink).await
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), RpcError> {
        let Some((_, subscription)) = self.subscriptions.remove(&id) else {
            return Ok(());
        };

        trace!(subscription = %id, member = %subscription.rule.member, "Unsubscribed");
        self.dbus
            .remove_match_rule(subscription.match_rule)
            .await
            .map_err(map_fdo_error)
    }

    async fn watch_name(
        &self,
        name: &str,
        sink: mpsc::UnboundedSender<OwnerChange>,
    ) -> Result<(), RpcError> {
        let rule = SignalMatch::new(DBUS_NAME, DBUS_PATH, DBUS_INTERFACE, "NameOwnerChanged");
        let match_rule = signal_rule(&rule, Some(name))?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = self.add_subscription(rule, match_rule, tx).await?;

        let watched = name.to_string();
        let subscriptions = Arc::clone(&self.subscriptions);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = cancel.cancelled() => break,
                    message = rx.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };

                let Some(change) = owner_change(&message.args) else {
                    warn!(args = ?message.args, "Malformed NameOwnerChanged signal");
                    continue;
                };
                if change.name != watched {
                    continue;
                }
                if sink.send(change).is_err() {
                    break;
                }
            }
            subscriptions.remove(&id);
            debug!(name = %watched, "Stopped watching bus name");
        });

        Ok(())
    }

    async fn introspect(&self, service: &str, path: &str) -> Result<String, RpcError> {
        let reply = self
            .call(MethodCall::new(service, path, DBUS_INTROSPECTABLE, "Introspect"))
            .await?;

        reply
            .first()
            .and_then(WireValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| RpcError::Decode("Introspect reply is not a string".into()))
    }
}

impl ZbusChannel {
    async fn call_inner(&self, call: &MethodCall) -> Result<Vec<WireValue>, RpcError> {
        let body = args_to_structure(&call.args)?;

        if call.allow_interactive_auth {
            let proxy = zbus::Proxy::new(
                &self.conn,
                call.service.as_str(),
                call.path.as_str(),
                call.interface.as_str(),
            )
            .await
            .map_err(map_zbus_error)?;

            let flags = zbus::proxy::MethodFlags::AllowInteractiveAuth.into();
            // Interactive methods of the service have no return values.
            let _: Option<()> = match body {
                Some(body) => proxy
                    .call_with_flags(call.method.as_str(), flags, &body)
                    .await
                    .map_err(map_zbus_error)?,
                None => proxy
                    .call_with_flags(call.method.as_str(), flags, &())
                    .await
                    .map_err(map_zbus_error)?,
            };
            return Ok(Vec::new());
        }

        let service = Some(call.service.as_str());
        let interface = Some(call.interface.as_str());
        let reply = match body {
            Some(body) => {
                self.conn
                    .call_method(service, call.path.as_str(), interface, call.method.as_str(), &body)
                    .await
            }
            None => {
                self.conn
                    .call_method(service, call.path.as_str(), interface, call.method.as_str(), &())
                    .await
            }
        }
        .map_err(map_zbus_error)?;

        message_values(&reply)
    }
}

// ============================================================================
// Signal dispatch
// ============================================================================

async fn dispatch_signals(
    mut stream: MessageStream,
    subscriptions: Arc<DashMap<SubscriptionId, Subscription>>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = stream.next() => match message {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    warn!(error = %e, "Error reading from message bus");
                    continue;
                }
                None => break,
            },
        };

        if message.message_type() != zbus::message::Type::Signal {
            continue;
        }

        let header = message.header();
        let (Some(path), Some(interface), Some(member)) =
            (header.path(), header.interface(), header.member())
        else {
            continue;
        };

        let mut signal = SignalMessage {
            path: path.to_string(),
            interface: interface.to_string(),
            member: member.to_string(),
            args: Vec::new(),
        };

        let sinks: Vec<SignalSink> = subscriptions
            .iter()
            .filter(|entry| entry.rule.matches(&signal))
            .map(|entry| entry.sink.clone())
            .collect();
        if sinks.is_empty() {
            continue;
        }

        signal.args = match message_values(&message) {
            Ok(args) => args,
            Err(e) => {
                warn!(member = %signal.member, error = %e, "Cannot decode signal body");
                continue;
            }
        };

        for sink in sinks {
            let _ = sink.send(signal.clone());
        }
    }
    debug!("Signal dispatcher stopped");
}

fn signal_rule(rule: &SignalMatch, arg0: Option<&str>) -> Result<MatchRule<'static>, RpcError> {
    let mut builder = MatchRule::builder()
        .msg_type(zbus::message::Type::Signal)
        .sender(rule.service.as_str())
        .and_then(|b| b.path(rule.path.as_str()))
        .and_then(|b| b.interface(rule.interface.as_str()))
        .and_then(|b| b.member(rule.member.as_str()))
        .map_err(map_zbus_error)?;

    if let Some(arg0) = arg0 {
        builder = builder.arg(0, arg0).map_err(map_zbus_error)?;
    }

    Ok(builder.build().into_owned())
}

fn owner_change(args: &[WireValue]) -> Option<OwnerChange> {
    let [name, old_owner, new_owner] = args else {
        return None;
    };
    let owner = |value: &WireValue| {
        value
            .as_str()
            .map(|s| (!s.is_empty()).then(|| s.to_string()))
    };

    Some(OwnerChange {
        name: name.as_str()?.to_string(),
        old_owner: owner(old_owner)?,
        new_owner: owner(new_owner)?,
    })
}

// ============================================================================
// Value conversion
// ============================================================================

/// Decodes the body of a reply or signal into positional values
fn message_values(message: &zbus::Message) -> Result<Vec<WireValue>, RpcError> {
    let empty = message
        .header()
        .signature()
        .map_or(true, |signature| signature.as_str().is_empty());
    if empty {
        return Ok(Vec::new());
    }

    let body = message.body();
    let fields: zvariant::Structure<'_> = body
        .deserialize()
        .map_err(|e| RpcError::Decode(e.to_string()))?;

    fields.fields().iter().map(value_to_wire).collect()
}

fn value_to_wire(value: &Value<'_>) -> Result<WireValue, RpcError> {
    let wire = match value {
        Value::Bool(b) => WireValue::Bool(*b),
        Value::U8(v) => WireValue::U32(u32::from(*v)),
        Value::U16(v) => WireValue::U32(u32::from(*v)),
        Value::U32(v) => WireValue::U32(*v),
        Value::U64(v) => WireValue::U64(*v),
        Value::I16(v) => WireValue::I32(i32::from(*v)),
        Value::I32(v) => WireValue::I32(*v),
        Value::I64(v) => WireValue::I64(*v),
        Value::F64(v) => WireValue::Double(*v),
        Value::Str(s) => WireValue::Str(s.as_str().to_string()),
        Value::Signature(s) => WireValue::Str(s.as_str().to_string()),
        Value::ObjectPath(p) => WireValue::ObjectPath(p.as_str().to_string()),
        Value::Value(inner) => value_to_wire(inner)?,
        Value::Array(array) => WireValue::List(
            array
                .iter()
                .map(value_to_wire)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Dict(dict) => {
            let mut map = BTreeMap::new();
            for (key, value) in dict.iter() {
                let key = match value_to_wire(key)? {
                    WireValue::Str(s) | WireValue::ObjectPath(s) => s,
                    other => {
                        return Err(RpcError::Decode(format!(
                            "unsupported dictionary key {other:?}"
                        )))
                    }
                };
                map.insert(key, value_to_wire(value)?);
            }
            WireValue::Map(map)
        }
        Value::Structure(structure) => WireValue::Struct(
            structure
                .fields()
                .iter()
                .map(value_to_wire)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        other => {
            return Err(RpcError::Decode(format!(
                "unsupported value of type {}",
                other.value_signature()
            )))
        }
    };
    Ok(wire)
}

/// Builds the call body; `None` for a call without arguments
fn args_to_structure(args: &[WireValue]) -> Result<Option<zvariant::Structure<'static>>, RpcError> {
    if args.is_empty() {
        return Ok(None);
    }

    let mut builder = StructureBuilder::new();
    for arg in args {
        builder = builder.append_field(wire_to_value(arg)?);
    }
    Ok(Some(builder.build()))
}

fn wire_to_value(value: &WireValue) -> Result<Value<'static>, RpcError> {
    let encode_err = |e: zvariant::Error| RpcError::Transport(e.to_string());

    let value = match value {
        WireValue::Bool(b) => Value::Bool(*b),
        WireValue::U32(v) => Value::U32(*v),
        WireValue::U64(v) => Value::U64(*v),
        WireValue::I32(v) => Value::I32(*v),
        WireValue::I64(v) => Value::I64(*v),
        WireValue::Double(v) => Value::F64(*v),
        WireValue::Str(s) => Value::from(s.clone()),
        WireValue::ObjectPath(p) => {
            Value::ObjectPath(ObjectPath::try_from(p.clone()).map_err(encode_err)?)
        }
        WireValue::List(items) => {
            let elements = items
                .iter()
                .map(wire_to_value)
                .collect::<Result<Vec<_>, _>>()?;
            let signature = match elements.first() {
                Some(first) => {
                    Signature::from_string_unchecked(first.value_signature().as_str().to_string())
                }
                None => Signature::from_static_str_unchecked("s"),
            };
            let mut array = Array::new(signature);
            for element in elements {
                array.append(element).map_err(encode_err)?;
            }
            Value::Array(array)
        }
        WireValue::Map(map) => {
            let mut dict = Dict::new(
                Signature::from_static_str_unchecked("s"),
                Signature::from_static_str_unchecked("v"),
            );
            for (key, item) in map {
                dict.append(
                    Value::from(key.clone()),
                    Value::Value(Box::new(wire_to_value(item)?)),
                )
                .map_err(encode_err)?;
            }
            Value::Dict(dict)
        }
        WireValue::Struct(fields) => {
            let mut builder = StructureBuilder::new();
            for field in fields {
                builder = builder.append_field(wire_to_value(field)?);
            }
            Value::Structure(builder.build())
        }
    };
    Ok(value)
}

// ============================================================================
// Error mapping
// ============================================================================

fn map_zbus_error(err: zbus::Error) -> RpcError {
    match err {
        zbus::Error::MethodError(name, message, _) => {
            let name = name.as_str().to_string();
            if name == DBUS_SERVICE_UNKNOWN {
                RpcError::ServiceUnknown(message.unwrap_or(name))
            } else {
                RpcError::Remote {
                    name,
                    message: message.unwrap_or_default(),
                }
            }
        }
        zbus::Error::FDO(e) => map_fdo_error(*e),
        other => RpcError::Transport(other.to_string()),
    }
}

fn map_fdo_error(err: zbus::fdo::Error) -> RpcError {
    use zbus::DBusError;

    match err {
        zbus::fdo::Error::ServiceUnknown(message) => RpcError::ServiceUnknown(message),
        zbus::fdo::Error::ZBus(e) => map_zbus_error(e),
        other => RpcError::Remote {
            name: other.name().as_str().to_string(),
            message: other.description().unwrap_or_default().to_string(),
        },
    }
}
