//! Signal routing for transaction objects
//!
//! Translates the service's transaction signals into [`TransactionEvent`]s.
//!
//! Two generations of the signal set exist:
//! - **Discrete**: one signal per result (`Package`, `UpdateDetail`), with
//!   positional scalar arguments
//! - **Batched**: results that come in volume arrive as an array of
//!   records in one signal (`Packages`, `UpdateDetails`); every other
//!   signal keeps its discrete shape
//!
//! Which one a transaction object speaks is detected once per session from
//! its introspection data, and the matching [`SignalDecoder`] is used for
//! the rest of the session.
//!
//! ## Design Notes
//!
//! - Event kinds map to wire signal names through exhaustive `match`es, so
//!   adding an [`EventKind`] fails to compile until both tables know it.
//! - Numeric codes are converted with the enums' `from_u32`, which never
//!   fails; unknown numbers become the domain's unknown value.
//! - Dates are ISO-8601 text; unparsable text becomes `None`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use pkclient_core::domain::{
    parse_iso8601, Category, DecodeError, Details, DistroUpgrade, DistroUpgradeInfo, ErrorCode,
    EulaRequired, EventKind, Exit, Files, Group, Info, ItemProgress, MediaChangeRequired,
    MediaType, Package, RepoDetail, RepoSignatureRequired, RequireRestart, Restart, Role, SigType,
    Status, TransactionEvent, TransactionRecord, UpdateDetail, UpdateState, WireValue,
};
use pkclient_core::ports::RpcChannel;

use crate::PK_NAME;

/// Signals every session subscribes to, whatever the caller asked for
pub const ALWAYS_SUBSCRIBED: &[&str] = &["ErrorCode", "Finished"];

/// Signal announcing the transaction object is gone
pub const DESTROY_SIGNAL: &str = "Destroy";

/// Hint telling the service this client understands batched signals
pub const PLURAL_SIGNALS_HINT: &str = "supports-plural-signals=true";

// ============================================================================
// Generations and decoders
// ============================================================================

/// Signal set spoken by a transaction object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalGeneration {
    /// One signal per result
    Discrete,
    /// Packages and update details arrive as record arrays
    Batched,
}

impl SignalGeneration {
    /// Detects the generation from an object's introspection XML
    pub fn detect(introspection: &str) -> Self {
        if introspection.contains("<signal name=\"Packages\"") {
            SignalGeneration::Batched
        } else {
            SignalGeneration::Discrete
        }
    }

    /// Introspects `path` and detects its generation
    ///
    /// Falls back to [`SignalGeneration::Discrete`] when introspection
    /// fails, since every service understands it.
    pub async fn introspect(channel: &dyn RpcChannel, path: &str) -> Self {
        match channel.introspect(PK_NAME, path).await {
            Ok(xml) => {
                let generation = Self::detect(&xml);
                debug!(tid = %path, generation = ?generation, "Detected signal generation");
                generation
            }
            Err(e) => {
                warn!(tid = %path, error = %e, "Introspection failed, assuming discrete signals");
                SignalGeneration::Discrete
            }
        }
    }

    /// The decoder for this generation
    pub fn decoder(self) -> Arc<dyn SignalDecoder> {
        match self {
            SignalGeneration::Discrete => Arc::new(DiscreteDecoder),
            SignalGeneration::Batched => Arc::new(BatchedDecoder),
        }
    }
}

/// Decode strategy for one signal generation
pub trait SignalDecoder: Send + Sync {
    /// Wire signals that carry events of `kind`
    fn signals_for(&self, kind: EventKind) -> &'static [&'static str];

    /// Decodes one signal into zero or more events, in record order
    ///
    /// # Arguments
    /// * `member` - Signal name
    /// * `args` - Positional arguments as received
    ///
    /// # Returns
    /// The decoded events; signals this decoder does not know yield none
    fn decode(&self, member: &str, args: &[WireValue])
        -> Result<Vec<TransactionEvent>, DecodeError>;
}

/// Decoder for the one-signal-per-result generation
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscreteDecoder;

impl SignalDecoder for DiscreteDecoder {
    fn signals_for(&self, kind: EventKind) -> &'static [&'static str] {
        common_signals(kind)
    }

    fn decode(
        &self,
        member: &str,
        args: &[WireValue],
    ) -> Result<Vec<TransactionEvent>, DecodeError> {
        decode_discrete(member, args).map(|event| event.into_iter().collect())
    }
}

/// Decoder for the generation with batched package and update records
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchedDecoder;

impl SignalDecoder for BatchedDecoder {
    fn signals_for(&self, kind: EventKind) -> &'static [&'static str] {
        match kind {
            EventKind::Package => &["Package", "Packages"],
            EventKind::UpdateDetail => &["UpdateDetail", "UpdateDetails"],
            other => common_signals(other),
        }
    }

    fn decode(
        &self,
        member: &str,
        args: &[WireValue],
    ) -> Result<Vec<TransactionEvent>, DecodeError> {
        match member {
            "Packages" => decode_records("Packages", args, 3, |a| {
                package(a).map(TransactionEvent::Package)
            }),
            "UpdateDetails" => decode_records("UpdateDetails", args, 12, |a| {
                update_detail(a).map(TransactionEvent::UpdateDetail)
            }),
            // A batched service still emits the singular forms for some roles.
            _ => decode_discrete(member, args).map(|event| event.into_iter().collect()),
        }
    }
}

/// The one-record-per-signal form of every kind
fn common_signals(kind: EventKind) -> &'static [&'static str] {
    match kind {
        EventKind::Package => &["Package"],
        EventKind::Details => &["Details"],
        EventKind::Category => &["Category"],
        EventKind::DistroUpgrade => &["DistroUpgrade"],
        EventKind::ErrorCode => &["ErrorCode"],
        EventKind::EulaRequired => &["EulaRequired"],
        EventKind::MediaChangeRequired => &["MediaChangeRequired"],
        EventKind::ItemProgress => &["ItemProgress"],
        EventKind::Files => &["Files"],
        EventKind::RepoDetail => &["RepoDetail"],
        EventKind::RepoSignatureRequired => &["RepoSignatureRequired"],
        EventKind::RequireRestart => &["RequireRestart"],
        EventKind::Transaction => &["Transaction"],
        EventKind::UpdateDetail => &["UpdateDetail"],
    }
}

// ============================================================================
// Discrete decoding
// ============================================================================

fn decode_discrete(
    member: &str,
    args: &[WireValue],
) -> Result<Option<TransactionEvent>, DecodeError> {
    let event = match member {
        "Package" => TransactionEvent::Package(package(Args::new("Package", args, 3)?)?),
        "Details" => TransactionEvent::Details(details(args)?),
        "Category" => {
            let a = Args::new("Category", args, 5)?;
            TransactionEvent::Category(Category {
                parent_id: a.str(0)?,
                cat_id: a.str(1)?,
                name: a.str(2)?,
                summary: a.str(3)?,
                icon: a.str(4)?,
            })
        }
        "DistroUpgrade" => {
            let a = Args::new("DistroUpgrade", args, 3)?;
            TransactionEvent::DistroUpgrade(DistroUpgradeInfo {
                kind: DistroUpgrade::from_u32(a.u32(0)?),
                name: a.str(1)?,
                description: a.str(2)?,
            })
        }
        "ErrorCode" => {
            let a = Args::new("ErrorCode", args, 2)?;
            TransactionEvent::ErrorCode {
                error: ErrorCode::from_u32(a.u32(0)?),
                details: a.str(1)?,
            }
        }
        "EulaRequired" => {
            let a = Args::new("EulaRequired", args, 4)?;
            TransactionEvent::EulaRequired(EulaRequired {
                eula_id: a.str(0)?,
                package_id: a.str(1)?,
                vendor_name: a.str(2)?,
                license_agreement: a.str(3)?,
            })
        }
        "MediaChangeRequired" => {
            let a = Args::new("MediaChangeRequired", args, 3)?;
            TransactionEvent::MediaChangeRequired(MediaChangeRequired {
                media_type: MediaType::from_u32(a.u32(0)?),
                media_id: a.str(1)?,
                media_text: a.str(2)?,
            })
        }
        "ItemProgress" => {
            let a = Args::new("ItemProgress", args, 3)?;
            TransactionEvent::ItemProgress(ItemProgress {
                item_id: a.str(0)?,
                status: Status::from_u32(a.u32(1)?),
                percentage: a.u32(2)?,
            })
        }
        "Files" => {
            let a = Args::new("Files", args, 2)?;
            TransactionEvent::Files(Files {
                package_id: a.str(0)?,
                files: a.str_list(1)?,
            })
        }
        "RepoDetail" => {
            let a = Args::new("RepoDetail", args, 3)?;
            TransactionEvent::RepoDetail(RepoDetail {
                repo_id: a.str(0)?,
                description: a.str(1)?,
                enabled: a.bool(2)?,
            })
        }
        "RepoSignatureRequired" => {
            let a = Args::new("RepoSignatureRequired", args, 8)?;
            TransactionEvent::RepoSignatureRequired(RepoSignatureRequired {
                package_id: a.str(0)?,
                repository_name: a.str(1)?,
                key_url: a.str(2)?,
                key_userid: a.str(3)?,
                key_id: a.str(4)?,
                key_fingerprint: a.str(5)?,
                key_timestamp: a.str(6)?,
                sig_type: SigType::from_u32(a.u32(7)?),
            })
        }
        "RequireRestart" => {
            let a = Args::new("RequireRestart", args, 2)?;
            TransactionEvent::RequireRestart(RequireRestart {
                restart: Restart::from_u32(a.u32(0)?),
                package_id: a.str(1)?,
            })
        }
        "Transaction" => {
            let a = Args::new("Transaction", args, 8)?;
            TransactionEvent::Transaction(TransactionRecord {
                tid: a.str(0)?,
                timespec: parse_iso8601(&a.str(1)?),
                succeeded: a.bool(2)?,
                role: Role::from_u32(a.u32(3)?),
                duration: a.u32(4)?,
                data: a.str(5)?,
                uid: a.u32(6)?,
                cmdline: a.str(7)?,
            })
        }
        "UpdateDetail" => {
            TransactionEvent::UpdateDetail(update_detail(Args::new("UpdateDetail", args, 12)?)?)
        }
        "Finished" => {
            let a = Args::new("Finished", args, 2)?;
            TransactionEvent::Finished {
                exit: Exit::from_u32(a.u32(0)?),
                runtime: a.u32(1)?,
            }
        }
        other => {
            debug!(signal = %other, "Ignoring unrouted signal");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

fn package(a: Args<'_>) -> Result<Package, DecodeError> {
    Ok(Package {
        info: Info::from_u32(a.u32(0)?),
        package_id: a.str(1)?,
        summary: a.str(2)?,
    })
}

fn update_detail(a: Args<'_>) -> Result<UpdateDetail, DecodeError> {
    Ok(UpdateDetail {
        package_id: a.str(0)?,
        updates: a.str_list(1)?,
        obsoletes: a.str_list(2)?,
        vendor_urls: a.str_list(3)?,
        bugzilla_urls: a.str_list(4)?,
        cve_urls: a.str_list(5)?,
        restart: Restart::from_u32(a.u32(6)?),
        update_text: a.str(7)?,
        changelog: a.str(8)?,
        state: UpdateState::from_u32(a.u32(9)?),
        issued: parse_iso8601(&a.str(10)?),
        updated: parse_iso8601(&a.str(11)?),
    })
}

/// `Details` is an `a{sv}` bag; older services send six positional fields
fn details(args: &[WireValue]) -> Result<Details, DecodeError> {
    if args.len() == 1 {
        let a = Args::new("Details", args, 1)?;
        return Ok(Details::from_map(a.map(0)?));
    }

    let a = Args::new("Details", args, 6)?;
    let mut map = BTreeMap::new();
    map.insert("package-id".to_string(), WireValue::Str(a.str(0)?));
    map.insert("license".to_string(), WireValue::Str(a.str(1)?));
    map.insert(
        "group".to_string(),
        WireValue::U32(Group::from_u32(a.u32(2)?).as_u32()),
    );
    map.insert("description".to_string(), WireValue::Str(a.str(3)?));
    map.insert("url".to_string(), WireValue::Str(a.str(4)?));
    map.insert("size".to_string(), WireValue::U64(a.u64(5)?));
    Ok(Details::from_map(map))
}

/// Unpacks an array of records, one event per record in array order
fn decode_records(
    signal: &'static str,
    args: &[WireValue],
    fields_per_record: usize,
    decode: fn(Args<'_>) -> Result<TransactionEvent, DecodeError>,
) -> Result<Vec<TransactionEvent>, DecodeError> {
    let a = Args::new(signal, args, 1)?;
    let records = a.items(0)?;

    records
        .iter()
        .map(|record| {
            let fields = record
                .as_items()
                .ok_or(DecodeError::ArgumentType { signal, index: 0 })?;
            decode(Args::new(signal, fields, fields_per_record)?)
        })
        .collect()
}

// ============================================================================
// Argument access
// ============================================================================

/// Positional arguments of one signal, checked for count up front
#[derive(Clone, Copy)]
struct Args<'a> {
    signal: &'static str,
    args: &'a [WireValue],
}

impl<'a> Args<'a> {
    fn new(
        signal: &'static str,
        args: &'a [WireValue],
        expected: usize,
    ) -> Result<Self, DecodeError> {
        if args.len() != expected {
            return Err(DecodeError::ArgumentCount {
                signal,
                expected,
                got: args.len(),
            });
        }
        Ok(Self { signal, args })
    }

    fn type_error(&self, index: usize) -> DecodeError {
        DecodeError::ArgumentType {
            signal: self.signal,
            index,
        }
    }

    fn str(&self, index: usize) -> Result<String, DecodeError> {
        self.args[index]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.type_error(index))
    }

    fn u32(&self, index: usize) -> Result<u32, DecodeError> {
        self.args[index].as_u32().ok_or_else(|| self.type_error(index))
    }

    fn u64(&self, index: usize) -> Result<u64, DecodeError> {
        self.args[index].as_u64().ok_or_else(|| self.type_error(index))
    }

    fn bool(&self, index: usize) -> Result<bool, DecodeError> {
        self.args[index].as_bool().ok_or_else(|| self.type_error(index))
    }

    fn str_list(&self, index: usize) -> Result<Vec<String>, DecodeError> {
        self.args[index]
            .as_str_list()
            .ok_or_else(|| self.type_error(index))
    }

    fn items(&self, index: usize) -> Result<&'a [WireValue], DecodeError> {
        self.args[index]
            .as_items()
            .ok_or_else(|| self.type_error(index))
    }

    fn map(&self, index: usize) -> Result<BTreeMap<String, WireValue>, DecodeError> {
        self.args[index]
            .as_map()
            .cloned()
            .ok_or_else(|| self.type_error(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package_args(info: Info, id: &str) -> Vec<WireValue> {
        vec![
            WireValue::U32(info.as_u32()),
            WireValue::from(id),
            WireValue::from("summary"),
        ]
    }

    fn update_detail_args(id: &str, issued: &str) -> Vec<WireValue> {
        vec![
            WireValue::from(id),
            WireValue::str_list(["vim;9.0;x86_64;fedora"]),
            WireValue::str_list(Vec::<String>::new()),
            WireValue::str_list(["https://vendor.example"]),
            WireValue::str_list(Vec::<String>::new()),
            WireValue::str_list(["CVE-2024-0001"]),
            WireValue::U32(Restart::System.as_u32()),
            WireValue::from("Security fix"),
            WireValue::from(""),
            WireValue::U32(UpdateState::Stable.as_u32()),
            WireValue::from(issued),
            WireValue::from(""),
        ]
    }

    #[test]
    fn test_detect_generation() {
        let batched = r#"<node><interface name="org.freedesktop.PackageKit.Transaction">
            <signal name="Package"/><signal name="Packages"/></interface></node>"#;
        assert_eq!(SignalGeneration::detect(batched), SignalGeneration::Batched);

        let discrete = r#"<node><signal name="Package"/></node>"#;
        assert_eq!(SignalGeneration::detect(discrete), SignalGeneration::Discrete);
    }

    #[test]
    fn test_signals_for_differ_only_in_batched_kinds() {
        let discrete = DiscreteDecoder;
        let batched = BatchedDecoder;

        assert_eq!(discrete.signals_for(EventKind::Package), &["Package"]);
        assert_eq!(batched.signals_for(EventKind::Package), &["Package", "Packages"]);
        assert_eq!(
            batched.signals_for(EventKind::UpdateDetail),
            &["UpdateDetail", "UpdateDetails"]
        );

        for kind in EventKind::ALL {
            if !matches!(kind, EventKind::Package | EventKind::UpdateDetail) {
                assert_eq!(discrete.signals_for(*kind), batched.signals_for(*kind));
            }
        }
    }

    #[test]
    fn test_batched_decoder_accepts_singular_signals() {
        let events = BatchedDecoder
            .decode("Package", &package_args(Info::Installed, "vim;9.0;x86_64;installed"))
            .unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], TransactionEvent::Package(p) if p.info == Info::Installed));
    }

    #[test]
    fn test_decode_package() {
        let events = DiscreteDecoder
            .decode("Package", &package_args(Info::Available, "vim;9.0;x86_64;fedora"))
            .unwrap();

        assert_eq!(
            events,
            vec![TransactionEvent::Package(Package {
                info: Info::Available,
                package_id: "vim;9.0;x86_64;fedora".into(),
                summary: "summary".into(),
            })]
        );
    }

    #[test]
    fn test_decode_batched_packages_keeps_order() {
        let records = WireValue::List(vec![
            WireValue::Struct(package_args(Info::Installed, "a;1;x86_64;installed")),
            WireValue::Struct(package_args(Info::Available, "b;1;x86_64;fedora")),
            WireValue::Struct(package_args(Info::Security, "c;1;x86_64;updates")),
        ]);

        let events = BatchedDecoder.decode("Packages", &[records]).unwrap();
        let ids: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                TransactionEvent::Package(p) => Some(p.package_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["a;1;x86_64;installed", "b;1;x86_64;fedora", "c;1;x86_64;updates"]);
    }

    #[test]
    fn test_decode_update_details_in_both_generations() {
        let args = update_detail_args("vim;9.1;x86_64;updates", "2024-03-01T10:00:00Z");
        let discrete = DiscreteDecoder.decode("UpdateDetail", &args).unwrap();

        let batched = BatchedDecoder
            .decode("UpdateDetails", &[WireValue::List(vec![WireValue::Struct(args)])])
            .unwrap();
        assert_eq!(discrete, batched);

        let TransactionEvent::UpdateDetail(detail) = &discrete[0] else {
            panic!("expected an update detail");
        };
        assert_eq!(detail.restart, Restart::System);
        assert!(detail.issued.is_some());
        assert!(detail.updated.is_none());
    }

    #[test]
    fn test_decode_invalid_date_is_none() {
        let args = update_detail_args("vim;9.1;x86_64;updates", "yesterday");
        let events = DiscreteDecoder.decode("UpdateDetail", &args).unwrap();
        let TransactionEvent::UpdateDetail(detail) = &events[0] else {
            panic!("expected an update detail");
        };
        assert!(detail.issued.is_none());
    }

    #[test]
    fn test_decode_details_bag_and_legacy() {
        let mut bag = BTreeMap::new();
        bag.insert("package-id".to_string(), WireValue::from("vim;9.0;x86_64;fedora"));
        bag.insert("size".to_string(), WireValue::U64(4096));
        bag.insert("homepage-rating".to_string(), WireValue::U32(5));

        let events = DiscreteDecoder.decode("Details", &[WireValue::Map(bag)]).unwrap();
        let TransactionEvent::Details(details) = &events[0] else {
            panic!("expected details");
        };
        assert_eq!(details.size, Some(4096));
        assert!(details.extra.contains_key("homepage-rating"));

        let legacy = vec![
            WireValue::from("vim;9.0;x86_64;fedora"),
            WireValue::from("Vim"),
            WireValue::U32(Group::Programming.as_u32()),
            WireValue::from("An editor"),
            WireValue::from("https://www.vim.org"),
            WireValue::U64(1024),
        ];
        let events = DiscreteDecoder.decode("Details", &legacy).unwrap();
        let TransactionEvent::Details(details) = &events[0] else {
            panic!("expected details");
        };
        assert_eq!(details.group, Some(Group::Programming));
        assert_eq!(details.license.as_deref(), Some("Vim"));
    }

    #[test]
    fn test_decode_transaction_record() {
        let args = vec![
            WireValue::object_path("/1_abc"),
            WireValue::from("2024-03-01T10:00:00Z"),
            WireValue::Bool(true),
            WireValue::U32(Role::InstallPackages.as_u32()),
            WireValue::U32(3500),
            WireValue::from("vim;9.0;x86_64;fedora"),
            WireValue::U32(1000),
            WireValue::from("pkcon install vim"),
        ];
        let events = DiscreteDecoder.decode("Transaction", &args).unwrap();
        let TransactionEvent::Transaction(record) = &events[0] else {
            panic!("expected a transaction record");
        };
        assert_eq!(record.tid, "/1_abc");
        assert_eq!(record.role, Role::InstallPackages);
        assert!(record.succeeded);
    }

    #[test]
    fn test_decode_finished_and_error() {
        let events = DiscreteDecoder
            .decode("Finished", &[WireValue::U32(1), WireValue::U32(250)])
            .unwrap();
        assert_eq!(
            events,
            vec![TransactionEvent::Finished {
                exit: Exit::Success,
                runtime: 250
            }]
        );

        let events = BatchedDecoder
            .decode("ErrorCode", &[WireValue::U32(8), WireValue::from("no such package")])
            .unwrap();
        assert_eq!(
            events,
            vec![TransactionEvent::ErrorCode {
                error: ErrorCode::PackageNotFound,
                details: "no such package".into()
            }]
        );
    }

    #[test]
    fn test_decode_errors() {
        let err = DiscreteDecoder
            .decode("Package", &[WireValue::U32(1)])
            .unwrap_err();
        assert_eq!(
            err,
            DecodeError::ArgumentCount {
                signal: "Package",
                expected: 3,
                got: 1
            }
        );

        let err = DiscreteDecoder
            .decode(
                "RepoDetail",
                &[WireValue::from("fedora"), WireValue::from("Fedora"), WireValue::U32(1)],
            )
            .unwrap_err();
        assert_eq!(
            err,
            DecodeError::ArgumentType {
                signal: "RepoDetail",
                index: 2
            }
        );
    }

    #[test]
    fn test_unknown_signal_yields_nothing() {
        let events = DiscreteDecoder
            .decode("Message", &[WireValue::U32(1), WireValue::from("hello")])
            .unwrap();
        assert!(events.is_empty());
    }
}
