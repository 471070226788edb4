//! Domain types and pure logic
//!
//! This module contains the client-side model of the package service:
//! - Wire enumerations and their string conversion
//! - Flag sets and position bitfields
//! - Package identifier parsing
//! - Detail and update-detail records
//! - Decoded transaction events
//! - Error types

pub mod details;
pub mod enum_string;
pub mod enums;
pub mod errors;
pub mod events;
pub mod flags;
pub mod package_id;
pub mod value;

// Re-export commonly used types
pub use details::Details;
pub use enum_string::{enum_from_string, enum_to_string, WireEnum};
pub use enums::{
    Authorize, DistroUpgrade, ErrorCode, Exit, Filter, Group, Info, MediaType, Network,
    OfflineAction, Restart, Role, SigType, Status, TransactionFlag, UpdateState, UpgradeKind,
};
pub use errors::{ClientError, DecodeError, InternalError, RpcError};
pub use events::{
    parse_iso8601, Category, DistroUpgradeInfo, EulaRequired, EventKind, Files, ItemProgress,
    MediaChangeRequired, Package, PreparedUpgrade, RepoDetail, RepoSignatureRequired,
    RequireRestart, TransactionEvent, TransactionProperty, TransactionRecord, UpdateDetail,
};
pub use flags::{Bitfield, Filters, TransactionFlags};
pub use package_id::PackageId;
pub use value::WireValue;
