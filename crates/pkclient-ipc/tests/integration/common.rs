//! Shared test helpers for session and registry integration tests
//!
//! Provides [`FakeChannel`], an in-memory [`RpcChannel`] that plays the
//! package service: canned replies per method, recorded calls, signal
//! emission to live subscriptions and owner changes.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use pkclient_core::config::ClientConfig;
use pkclient_core::domain::{RpcError, TransactionEvent, WireValue};
use pkclient_core::ports::{
    MethodCall, OwnerChange, RpcChannel, SignalMatch, SignalMessage, SignalSink, SubscriptionId,
};
use pkclient_ipc::{
    Daemon, DBUS_PROPERTIES, PK_INTERFACE, PK_NAME, PK_PATH, PK_TRANSACTION_INTERFACE,
};

/// Transaction path handed out by `CreateTransaction` in most tests
pub const TID: &str = "/1_abcdef";

const WAIT: Duration = Duration::from_secs(5);

type Reply = Result<Vec<WireValue>, RpcError>;

/// Scriptable stand-in for the package service
#[derive(Default)]
pub struct FakeChannel {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<MethodCall>>,
    subscriptions: Mutex<Vec<(SubscriptionId, SignalMatch, SignalSink)>>,
    owner_sinks: Mutex<Vec<mpsc::UnboundedSender<OwnerChange>>>,
    introspection: Mutex<String>,
    hung: Mutex<HashSet<String>>,
    next_id: AtomicU64,
}

/// Replies are keyed by method name; `GetAll` also by interface
fn reply_key(call: &MethodCall) -> String {
    match call.args.first() {
        Some(WireValue::Str(interface)) if call.method == "GetAll" => {
            format!("GetAll {interface}")
        }
        _ => call.method.clone(),
    }
}

#[allow(dead_code)]
impl FakeChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a reply for `method`; the last queued reply repeats
    pub fn reply(&self, method: &str, values: Vec<WireValue>) {
        self.push(method.to_string(), Ok(values));
    }

    /// Queues an error for `method`
    pub fn fail(&self, method: &str, error: RpcError) {
        self.push(method.to_string(), Err(error));
    }

    /// Queues a `GetAll` reply for `interface`
    pub fn reply_properties(&self, interface: &str, properties: &[(&str, WireValue)]) {
        self.push(
            format!("GetAll {interface}"),
            Ok(vec![WireValue::Map(property_map(properties))]),
        );
    }

    /// Hands out [`TID`] for `CreateTransaction`
    pub fn with_transaction(self: Arc<Self>) -> Arc<Self> {
        self.reply("CreateTransaction", vec![WireValue::object_path(TID)]);
        self
    }

    fn push(&self, key: String, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(reply);
    }

    /// Makes calls to `method` wait forever instead of replying
    pub fn hang(&self, method: &str) {
        self.hung.lock().unwrap().insert(method.to_string());
    }

    pub fn set_introspection(&self, xml: &str) {
        *self.introspection.lock().unwrap() = xml.to_string();
    }

    pub fn calls(&self) -> Vec<MethodCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<MethodCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method == method)
            .collect()
    }

    /// Live subscriptions for one signal on one object
    pub fn subscription_count(&self, path: &str, member: &str) -> usize {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, rule, _)| rule.path == path && rule.member == member)
            .count()
    }

    /// Live subscriptions on one object
    pub fn subscriptions_on(&self, path: &str) -> usize {
        self.subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, rule, _)| rule.path == path)
            .count()
    }

    /// Delivers a signal to every matching subscription
    ///
    /// # Returns
    /// How many subscriptions received it
    pub fn emit(&self, path: &str, interface: &str, member: &str, args: Vec<WireValue>) -> usize {
        let message = SignalMessage {
            path: path.to_string(),
            interface: interface.to_string(),
            member: member.to_string(),
            args,
        };

        let subscriptions = self.subscriptions.lock().unwrap();
        subscriptions
            .iter()
            .filter(|(_, rule, _)| rule.matches(&message))
            .filter(|(_, _, sink)| sink.send(message.clone()).is_ok())
            .count()
    }

    /// Emits a signal of the transaction interface on `path`
    pub fn emit_transaction(&self, path: &str, member: &str, args: Vec<WireValue>) -> usize {
        self.emit(path, PK_TRANSACTION_INTERFACE, member, args)
    }

    /// Emits `PropertiesChanged` for `interface` on `path`
    pub fn emit_properties(
        &self,
        path: &str,
        interface: &str,
        properties: &[(&str, WireValue)],
    ) -> usize {
        self.emit(
            path,
            DBUS_PROPERTIES,
            "PropertiesChanged",
            vec![
                WireValue::from(interface),
                WireValue::Map(property_map(properties)),
                WireValue::str_list(Vec::<String>::new()),
            ],
        )
    }

    /// Emits a signal of the daemon interface
    pub fn emit_daemon(&self, member: &str, args: Vec<WireValue>) -> usize {
        self.emit(PK_PATH, PK_INTERFACE, member, args)
    }

    pub fn owner_change(&self, old_owner: Option<&str>, new_owner: Option<&str>) {
        let change = OwnerChange {
            name: PK_NAME.to_string(),
            old_owner: old_owner.map(str::to_string),
            new_owner: new_owner.map(str::to_string),
        };
        for sink in self.owner_sinks.lock().unwrap().iter() {
            let _ = sink.send(change.clone());
        }
    }

    /// Waits until `method` was called and returns the first such call
    pub async fn wait_for_call(&self, method: &str) -> MethodCall {
        tokio::time::timeout(WAIT, async {
            loop {
                if let Some(call) = self.calls_to(method).into_iter().next() {
                    return call;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{method} was never called"))
    }

    /// Waits until a subscription for `member` on `path` exists
    pub async fn wait_for_subscription(&self, path: &str, member: &str) {
        tokio::time::timeout(WAIT, async {
            while self.subscription_count(path, member) == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no subscription for {member} on {path}"));
    }
}

#[async_trait::async_trait]
impl RpcChannel for FakeChannel {
    async fn call(&self, call: MethodCall) -> Result<Vec<WireValue>, RpcError> {
        let key = reply_key(&call);
        self.calls.lock().unwrap().push(call);

        let hung = self.hung.lock().unwrap().contains(&key);
        if hung {
            std::future::pending::<()>().await;
        }

        let mut replies = self.replies.lock().unwrap();
        match replies.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Ok(Vec::new())),
            Some(queue) => queue.front().cloned().unwrap_or(Ok(Vec::new())),
            None => Ok(Vec::new()),
        }
    }

    async fn subscribe(
        &self,
        rule: SignalMatch,
        sink: SignalSink,
    ) -> Result<SubscriptionId, RpcError> {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscriptions.lock().unwrap().push((id, rule, sink));
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), RpcError> {
        self.subscriptions
            .lock()
            .unwrap()
            .retain(|(existing, _, _)| *existing != id);
        Ok(())
    }

    async fn watch_name(
        &self,
        _name: &str,
        sink: mpsc::UnboundedSender<OwnerChange>,
    ) -> Result<(), RpcError> {
        self.owner_sinks.lock().unwrap().push(sink);
        Ok(())
    }

    async fn introspect(&self, _service: &str, _path: &str) -> Result<String, RpcError> {
        Ok(self.introspection.lock().unwrap().clone())
    }
}

pub fn property_map(properties: &[(&str, WireValue)]) -> BTreeMap<String, WireValue> {
    properties
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Routes library logs to the test output, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A registry over `fake` with the default configuration
pub async fn daemon(fake: &Arc<FakeChannel>) -> Daemon {
    init_tracing();
    let channel: Arc<dyn RpcChannel> = fake.clone();
    Daemon::connect(channel, ClientConfig::default())
        .await
        .expect("Failed to start registry")
}

/// Reads a session's stream until it ends
pub async fn collect(events: &mut mpsc::UnboundedReceiver<TransactionEvent>) -> Vec<TransactionEvent> {
    tokio::time::timeout(WAIT, async {
        let mut collected = Vec::new();
        while let Some(event) = events.recv().await {
            collected.push(event);
        }
        collected
    })
    .await
    .expect("Event stream did not end")
}

/// Next event of a session's stream
#[allow(dead_code)]
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<TransactionEvent>) -> TransactionEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("No event arrived")
        .expect("Event stream ended")
}

/// Waits for a broadcast event matching `predicate`
#[allow(dead_code)]
pub async fn wait_for<T, F>(events: &mut broadcast::Receiver<T>, predicate: F) -> T
where
    T: Clone,
    F: Fn(&T) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("Event channel closed"),
            }
        }
    })
    .await
    .expect("Expected event never arrived")
}
