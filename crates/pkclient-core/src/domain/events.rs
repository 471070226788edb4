//! Events published by transaction sessions
//!
//! A session turns the service's signal stream into [`TransactionEvent`]s.
//! Result signals (packages, details, update details, ...) are opt-in:
//! callers name the [`EventKind`]s they want before the session binds, and
//! only those signals are subscribed. Property changes, errors and the
//! final [`TransactionEvent::Finished`] are always delivered.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use super::details::Details;
use super::enums::{
    DistroUpgrade, ErrorCode, Exit, Info, MediaType, Restart, Role, SigType, Status, UpdateState,
};
use super::flags::TransactionFlags;

// ============================================================================
// Event kinds
// ============================================================================

/// Opt-in result event kinds
///
/// Each kind corresponds to one or two wire signals; the mapping lives in
/// the router of the IPC crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Package,
    Details,
    Category,
    DistroUpgrade,
    ErrorCode,
    EulaRequired,
    MediaChangeRequired,
    ItemProgress,
    Files,
    RepoDetail,
    RepoSignatureRequired,
    RequireRestart,
    Transaction,
    UpdateDetail,
}

impl EventKind {
    pub const ALL: &'static [EventKind] = &[
        EventKind::Package,
        EventKind::Details,
        EventKind::Category,
        EventKind::DistroUpgrade,
        EventKind::ErrorCode,
        EventKind::EulaRequired,
        EventKind::MediaChangeRequired,
        EventKind::ItemProgress,
        EventKind::Files,
        EventKind::RepoDetail,
        EventKind::RepoSignatureRequired,
        EventKind::RequireRestart,
        EventKind::Transaction,
        EventKind::UpdateDetail,
    ];
}

// ============================================================================
// Event payloads
// ============================================================================

/// A package reported by a query or touched by a modifying role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub info: Info,
    pub package_id: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub parent_id: String,
    pub cat_id: String,
    pub name: String,
    pub summary: String,
    pub icon: String,
}

/// A distribution release the system can be upgraded to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistroUpgradeInfo {
    pub kind: DistroUpgrade,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EulaRequired {
    pub eula_id: String,
    pub package_id: String,
    pub vendor_name: String,
    pub license_agreement: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChangeRequired {
    pub media_type: MediaType,
    pub media_id: String,
    pub media_text: String,
}

/// Progress of one item inside a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemProgress {
    pub item_id: String,
    pub status: Status,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Files {
    pub package_id: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoDetail {
    pub repo_id: String,
    pub description: String,
    pub enabled: bool,
}

/// A repository key must be accepted before the transaction can go on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSignatureRequired {
    pub package_id: String,
    pub repository_name: String,
    pub key_url: String,
    pub key_userid: String,
    pub key_id: String,
    pub key_fingerprint: String,
    pub key_timestamp: String,
    pub sig_type: SigType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequireRestart {
    pub restart: Restart,
    pub package_id: String,
}

/// A past transaction, as reported by `GetOldTransactions`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub tid: String,
    pub timespec: Option<DateTime<Utc>>,
    pub succeeded: bool,
    pub role: Role,
    /// Run time in milliseconds
    pub duration: u32,
    pub data: String,
    pub uid: u32,
    pub cmdline: String,
}

/// Update metadata for one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDetail {
    pub package_id: String,
    pub updates: Vec<String>,
    pub obsoletes: Vec<String>,
    pub vendor_urls: Vec<String>,
    pub bugzilla_urls: Vec<String>,
    pub cve_urls: Vec<String>,
    pub restart: Restart,
    pub update_text: String,
    pub changelog: String,
    pub state: UpdateState,
    /// `None` when the service sent an empty or unparsable date
    pub issued: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

/// Name and version of the release prepared for an offline upgrade
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedUpgrade {
    pub name: String,
    pub version: String,
}

impl PreparedUpgrade {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.version.is_empty()
    }
}

/// One changed transaction property, with its new value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionProperty {
    AllowCancel(bool),
    CallerActive(bool),
    DownloadSizeRemaining(u64),
    ElapsedTime(u32),
    LastPackage(String),
    Percentage(u32),
    RemainingTime(u32),
    Role(Role),
    Speed(u32),
    Status(Status),
    TransactionFlags(TransactionFlags),
    Uid(u32),
}

// ============================================================================
// TransactionEvent
// ============================================================================

/// Everything a session can publish
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionEvent {
    Package(Package),
    Details(Details),
    Category(Category),
    DistroUpgrade(DistroUpgradeInfo),
    /// Reported by the service, or synthesized for a local failure
    ErrorCode { error: ErrorCode, details: String },
    EulaRequired(EulaRequired),
    MediaChangeRequired(MediaChangeRequired),
    ItemProgress(ItemProgress),
    Files(Files),
    RepoDetail(RepoDetail),
    RepoSignatureRequired(RepoSignatureRequired),
    RequireRestart(RequireRestart),
    Transaction(TransactionRecord),
    UpdateDetail(UpdateDetail),
    /// One field of the property snapshot changed
    PropertyChanged(TransactionProperty),
    /// A property batch was applied
    Changed,
    /// Always the last event of a session
    Finished { exit: Exit, runtime: u32 },
}

impl TransactionEvent {
    /// The opt-in kind this event belongs to, if any
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            TransactionEvent::Package(_) => Some(EventKind::Package),
            TransactionEvent::Details(_) => Some(EventKind::Details),
            TransactionEvent::Category(_) => Some(EventKind::Category),
            TransactionEvent::DistroUpgrade(_) => Some(EventKind::DistroUpgrade),
            TransactionEvent::ErrorCode { .. } => Some(EventKind::ErrorCode),
            TransactionEvent::EulaRequired(_) => Some(EventKind::EulaRequired),
            TransactionEvent::MediaChangeRequired(_) => Some(EventKind::MediaChangeRequired),
            TransactionEvent::ItemProgress(_) => Some(EventKind::ItemProgress),
            TransactionEvent::Files(_) => Some(EventKind::Files),
            TransactionEvent::RepoDetail(_) => Some(EventKind::RepoDetail),
            TransactionEvent::RepoSignatureRequired(_) => Some(EventKind::RepoSignatureRequired),
            TransactionEvent::RequireRestart(_) => Some(EventKind::RequireRestart),
            TransactionEvent::Transaction(_) => Some(EventKind::Transaction),
            TransactionEvent::UpdateDetail(_) => Some(EventKind::UpdateDetail),
            TransactionEvent::PropertyChanged(_)
            | TransactionEvent::Changed
            | TransactionEvent::Finished { .. } => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TransactionEvent::Finished { .. })
    }
}

// ============================================================================
// Date parsing
// ============================================================================

/// Parses an ISO-8601 date or date-time as sent by the service
///
/// Accepts RFC 3339, a date-time without offset (read as UTC) and a bare
/// date (midnight UTC). Anything else, including an empty string, is `None`.
pub fn parse_iso8601(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
