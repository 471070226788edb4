//! pkclient Core - Domain types and ports for the PackageKit client
//!
//! This crate contains everything the client needs that does not touch the
//! message bus:
//! - **Domain types** - roles, statuses, filters, groups and the other wire
//!   enumerations, package identifiers, detail records, decoded events
//! - **Wire strings** - kebab-case conversion between enum values and the
//!   strings the service speaks
//! - **Errors** - the client-side error taxonomy and wire error parsing
//! - **Port definitions** - the [`RpcChannel`](ports::RpcChannel) trait that
//!   the IPC crate implements over D-Bus and that tests implement in memory
//!
//! # Architecture
//!
//! Like a hexagonal core, nothing here knows about zbus. The IPC crate
//! adapts the bus to [`ports::RpcChannel`]; the session state machine is
//! written purely against that trait.

pub mod config;
pub mod domain;
pub mod ports;
