//! RPC channel port (driven/secondary port)
//!
//! This module defines the interface the client uses to reach the package
//! service: addressed method calls, signal subscriptions, name ownership
//! tracking and introspection. The IPC crate implements it over D-Bus;
//! tests implement it in memory.
//!
//! ## Design Notes
//!
//! - Arguments and replies are [`WireValue`]s so nothing above this port
//!   depends on zbus.
//! - Subscriptions deliver into a caller-supplied unbounded channel. All
//!   subscriptions sharing one sink receive messages in transport order,
//!   which is what keeps a session's signals and property changes ordered.
//! - Errors are [`RpcError`] rather than `anyhow::Error` because the
//!   session state machine branches on them (absent service, remote error
//!   names).

use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::domain::{RpcError, WireValue};

// ============================================================================
// MethodCall
// ============================================================================

/// A fully addressed method call
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    /// Well-known bus name of the service
    pub service: String,
    /// Object path
    pub path: String,
    /// Interface name
    pub interface: String,
    /// Method name
    pub method: String,
    /// Positional arguments
    pub args: Vec<WireValue>,
    /// Lets the service start an interactive authorization dialog
    pub allow_interactive_auth: bool,
    /// Overrides the channel's default timeout
    pub timeout: Option<Duration>,
}

impl MethodCall {
    /// Creates a call with no arguments
    pub fn new(
        service: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            path: path.into(),
            interface: interface.into(),
            method: method.into(),
            args: Vec::new(),
            allow_interactive_auth: false,
            timeout: None,
        }
    }

    /// Appends one argument
    pub fn arg(mut self, value: impl Into<WireValue>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Replaces the argument list
    pub fn with_args(mut self, args: Vec<WireValue>) -> Self {
        self.args = args;
        self
    }

    /// Sets the allow-interactive-authorization flag
    pub fn interactive(mut self) -> Self {
        self.allow_interactive_auth = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Display for MethodCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} on {}", self.interface, self.method, self.path)
    }
}

// ============================================================================
// Signals
// ============================================================================

/// Which signals a subscription receives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignalMatch {
    /// Sender bus name
    pub service: String,
    pub path: String,
    pub interface: String,
    /// Signal name
    pub member: String,
}

impl SignalMatch {
    pub fn new(
        service: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
        }
    }

    /// Whether a received signal matches this rule
    ///
    /// The sender is not compared: signals arrive from the unique name of
    /// whoever owns `service`.
    pub fn matches(&self, message: &SignalMessage) -> bool {
        self.path == message.path
            && self.interface == message.interface
            && self.member == message.member
    }
}

/// A received signal
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMessage {
    pub path: String,
    pub interface: String,
    pub member: String,
    pub args: Vec<WireValue>,
}

/// Handle returned by [`RpcChannel::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Receiving end type for signal subscriptions
pub type SignalSink = mpsc::UnboundedSender<SignalMessage>;

// ============================================================================
// Name ownership
// ============================================================================

/// A change of owner of a watched bus name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerChange {
    pub name: String,
    pub old_owner: Option<String>,
    pub new_owner: Option<String>,
}

impl OwnerChange {
    /// The name had no owner and now has one
    pub fn appeared(&self) -> bool {
        self.old_owner.is_none() && self.new_owner.is_some()
    }

    /// The name had an owner and now has none
    pub fn disappeared(&self) -> bool {
        self.old_owner.is_some() && self.new_owner.is_none()
    }
}

// ============================================================================
// RpcChannel trait
// ============================================================================

/// Port trait for talking to the package service
///
/// ## Implementation Notes
///
/// - `call` returns the reply's positional values. A service that is not
///   running and cannot be activated must be reported as
///   [`RpcError::ServiceUnknown`].
/// - `subscribe` must not deliver a message to a sink after `unsubscribe`
///   for that subscription returned.
/// - `watch_name` delivers every owner change of `name` for the lifetime
///   of the channel, until the sink is dropped.
#[async_trait::async_trait]
pub trait RpcChannel: Send + Sync {
    /// Performs a method call and waits for the reply
    ///
    /// # Arguments
    /// * `call` - The addressed call, including flags and timeout
    ///
    /// # Returns
    /// The reply's values in order
    async fn call(&self, call: MethodCall) -> Result<Vec<WireValue>, RpcError>;

    /// Starts delivering signals matching `rule` into `sink`
    ///
    /// # Arguments
    /// * `rule` - Sender, path, interface and member to match
    /// * `sink` - Where matching signals are sent
    async fn subscribe(
        &self,
        rule: SignalMatch,
        sink: SignalSink,
    ) -> Result<SubscriptionId, RpcError>;

    /// Stops a subscription; unknown ids are ignored
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), RpcError>;

    /// Reports owner changes of a bus name
    ///
    /// # Arguments
    /// * `name` - Well-known bus name to watch
    /// * `sink` - Where owner changes are sent
    async fn watch_name(
        &self,
        name: &str,
        sink: mpsc::UnboundedSender<OwnerChange>,
    ) -> Result<(), RpcError>;

    /// Returns the introspection XML of an object
    async fn introspect(&self, service: &str, path: &str) -> Result<String, RpcError>;
}
