//! Error types
//!
//! Three layers of errors live here:
//!
//! - [`RpcError`]: what the bus transport reports for a call or subscription
//! - [`ClientError`]: what the public API returns synchronously
//! - [`DecodeError`]: a signal whose arguments do not have the expected shape
//!
//! [`InternalError`] is the client-side classification of a failure. It is
//! not an error type itself; sessions record it and use it to pick the
//! error code of the synthesized error event.

use std::fmt;

use thiserror::Error;
use tracing::warn;

use super::enums::ErrorCode;

/// Errors reported by an [`RpcChannel`](crate::ports::RpcChannel)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Nobody owns the service name and it could not be activated
    #[error("Service is not available: {0}")]
    ServiceUnknown(String),

    /// No reply arrived in time
    #[error("Call timed out after {0}s")]
    Timeout(u64),

    /// The remote side replied with an error
    #[error("{name}: {message}")]
    Remote {
        /// Wire error name, e.g. `org.freedesktop.PackageKit.Transaction.RefusedByPolicy`
        name: String,
        /// Free-form message from the service
        message: String,
    },

    /// Connection or marshalling failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The reply did not have the expected shape
    #[error("Cannot decode reply: {0}")]
    Decode(String),
}

const DBUS_SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
const DBUS_NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";

impl RpcError {
    /// Classifies this failure for the session that observed it
    pub fn internal_error(&self) -> InternalError {
        match self {
            RpcError::ServiceUnknown(_) => InternalError::DaemonUnreachable,
            RpcError::Remote { name, .. } => InternalError::parse(name),
            RpcError::Timeout(_) | RpcError::Transport(_) | RpcError::Decode(_) => {
                InternalError::Failed
            }
        }
    }
}

/// Errors returned by the public client API
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The package service is not running and could not be started
    #[error("Package service is unreachable")]
    DaemonUnreachable,

    /// A bus call failed
    #[error("Bus call failed: {0}")]
    Rpc(RpcError),

    /// The handle has no live transaction object
    #[error("Transaction is not bound to a service object")]
    NoTransaction,

    /// The handle's event stream was already taken
    #[error("Transaction was already submitted")]
    AlreadySubmitted,

    /// A role-specific request was issued on a handle that already has one
    #[error("Transaction already has role {0}")]
    RoleAlreadySet(String),

    /// A reply was received but did not have the expected shape
    #[error("Invalid reply: {0}")]
    InvalidReply(String),

    /// An argument cannot be expressed on the wire
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<RpcError> for ClientError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::ServiceUnknown(_) => ClientError::DaemonUnreachable,
            RpcError::Remote { ref name, .. }
                if name == DBUS_SERVICE_UNKNOWN || name == DBUS_NAME_HAS_NO_OWNER =>
            {
                ClientError::DaemonUnreachable
            }
            other => ClientError::Rpc(other),
        }
    }
}

impl ClientError {
    /// Classifies this failure for the session that observed it
    pub fn internal_error(&self) -> InternalError {
        match self {
            ClientError::DaemonUnreachable => InternalError::DaemonUnreachable,
            ClientError::Rpc(err) => err.internal_error(),
            ClientError::NoTransaction => InternalError::NoTid,
            ClientError::AlreadySubmitted => InternalError::AlreadyTid,
            ClientError::RoleAlreadySet(_) => InternalError::RoleUnknown,
            ClientError::InvalidReply(_) => InternalError::Failed,
            ClientError::InvalidArgument(_) => InternalError::InvalidInput,
        }
    }
}

/// A signal whose arguments could not be decoded
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Signal {signal} expects {expected} arguments, got {got}")]
    ArgumentCount {
        signal: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Signal {signal}: argument {index} has the wrong type")]
    ArgumentType { signal: &'static str, index: usize },
}

/// Client-side classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InternalError {
    #[default]
    None,
    Unknown,
    Failed,
    FailedAuth,
    NoTid,
    AlreadyTid,
    RoleUnknown,
    CannotStartDaemon,
    InvalidInput,
    InvalidFile,
    FunctionNotSupported,
    DaemonUnreachable,
}

impl InternalError {
    /// Classifies a wire error name
    ///
    /// Unknown names classify as [`InternalError::Failed`] and are logged.
    pub fn parse(error_name: &str) -> Self {
        if error_name.starts_with("org.freedesktop.packagekit.") {
            return InternalError::FailedAuth;
        }

        if error_name == DBUS_SERVICE_UNKNOWN || error_name == DBUS_NAME_HAS_NO_OWNER {
            return InternalError::DaemonUnreachable;
        }

        let error = error_name
            .strip_prefix("org.freedesktop.PackageKit.Transaction.")
            .unwrap_or(error_name);
        let starts_with_any = |prefixes: &[&str]| prefixes.iter().any(|p| error.starts_with(p));

        if starts_with_any(&["PermissionDenied", "RefusedByPolicy"]) {
            InternalError::FailedAuth
        } else if starts_with_any(&[
            "PackageIdInvalid",
            "SearchInvalid",
            "FilterInvalid",
            "InvalidProvide",
            "InputInvalid",
        ]) {
            InternalError::InvalidInput
        } else if starts_with_any(&["PackInvalid", "NoSuchFile", "NoSuchDirectory"]) {
            InternalError::InvalidFile
        } else if error.starts_with("NotSupported") {
            InternalError::FunctionNotSupported
        } else {
            warn!(error = %error_name, "Unknown error name from package service");
            InternalError::Failed
        }
    }

    /// Error code of the event synthesized for a local failure
    pub fn error_code(self) -> ErrorCode {
        match self {
            InternalError::FailedAuth => ErrorCode::NotAuthorized,
            _ => ErrorCode::InternalError,
        }
    }
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InternalError::None => "none",
            InternalError::Unknown => "unknown",
            InternalError::Failed => "failed",
            InternalError::FailedAuth => "failed-auth",
            InternalError::NoTid => "no-tid",
            InternalError::AlreadyTid => "already-tid",
            InternalError::RoleUnknown => "role-unknown",
            InternalError::CannotStartDaemon => "cannot-start-daemon",
            InternalError::InvalidInput => "invalid-input",
            InternalError::InvalidFile => "invalid-file",
            InternalError::FunctionNotSupported => "function-not-supported",
            InternalError::DaemonUnreachable => "daemon-unreachable",
        };
        f.write_str(text)
    }
}
