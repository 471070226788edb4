//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the interfaces the client core depends on but whose
//! implementations live elsewhere.
//!
//! ## Ports Overview
//!
//! - [`RpcChannel`] - Method calls, signal subscriptions, name ownership
//!   and introspection against the package service

pub mod rpc_channel;

pub use rpc_channel::{
    MethodCall, OwnerChange, RpcChannel, SignalMatch, SignalMessage, SignalSink, SubscriptionId,
};
