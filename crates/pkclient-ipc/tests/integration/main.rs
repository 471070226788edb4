//! Integration tests for pkclient-ipc
//!
//! Uses an in-memory RpcChannel to play the package service and verifies
//! end-to-end behavior of the registry, transaction sessions and the
//! offline interface.

mod common;

mod test_daemon_registry;
mod test_offline;
mod test_transaction_lifecycle;
