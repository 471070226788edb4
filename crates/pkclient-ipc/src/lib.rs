//! pkclient IPC - PackageKit client over D-Bus
//!
//! Provides the async client API for the PackageKit system service:
//! - [`Daemon`] - the process-wide registry: reachability, advertised
//!   capabilities, daemon methods and the transaction factories
//! - [`Transaction`] - one operation on the service, with its decoded
//!   event stream
//! - [`Offline`] - scheduled offline update and upgrade state
//! - [`ZbusChannel`] - the [`RpcChannel`](pkclient_core::ports::RpcChannel)
//!   implementation over a zbus connection
//!
//! # Interfaces
//! - `org.freedesktop.PackageKit` - daemon methods and capabilities
//! - `org.freedesktop.PackageKit.Transaction` - per-transaction objects
//! - `org.freedesktop.PackageKit.Offline` - offline updates

pub mod bus;
pub mod daemon;
pub mod offline;
pub mod properties;
pub mod request;
pub mod router;
pub mod transaction;

mod session;

pub use bus::ZbusChannel;
pub use daemon::{Daemon, DaemonEvent};
pub use offline::{Offline, OfflineEvent};
pub use request::{RoleRequests, TransactionRequest};
pub use router::{BatchedDecoder, DiscreteDecoder, SignalDecoder, SignalGeneration};
pub use session::SessionPhase;
pub use transaction::Transaction;

/// Well-known bus name of the service
pub const PK_NAME: &str = "org.freedesktop.PackageKit";
/// Object path of the daemon object
pub const PK_PATH: &str = "/org/freedesktop/PackageKit";
/// Daemon interface
pub const PK_INTERFACE: &str = "org.freedesktop.PackageKit";
/// Interface of transaction objects
pub const PK_TRANSACTION_INTERFACE: &str = "org.freedesktop.PackageKit.Transaction";
/// Offline update interface, served on [`PK_PATH`]
pub const PK_OFFLINE_INTERFACE: &str = "org.freedesktop.PackageKit.Offline";
/// Standard properties interface
pub const DBUS_PROPERTIES: &str = "org.freedesktop.DBus.Properties";
