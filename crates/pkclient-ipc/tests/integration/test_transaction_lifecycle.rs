//! Integration tests for the transaction session lifecycle
//!
//! Drives sessions against [`FakeChannel`](crate::common::FakeChannel):
//! - Queued search with streamed packages and completion
//! - Service disappearing while a transaction runs
//! - Transaction id and dispatch failures
//! - Destruction without completion and duplicate completions
//! - Property batches, lazy subscription, both signal generations
//! - The immediate protocol, cancellation and hints

use pkclient_core::domain::{
    ClientError, ErrorCode, EventKind, Exit, Filters, Group, Info, InternalError, RpcError,
    Status, TransactionEvent, TransactionFlags, TransactionProperty, WireValue,
};
use pkclient_ipc::{RoleRequests, SessionPhase, PK_TRANSACTION_INTERFACE};

use crate::common::{self, FakeChannel, TID};

fn package_args(info: Info, package_id: &str, summary: &str) -> Vec<WireValue> {
    vec![
        WireValue::U32(info.as_u32()),
        WireValue::from(package_id),
        WireValue::from(summary),
    ]
}

fn finished_args(exit: Exit, runtime: u32) -> Vec<WireValue> {
    vec![WireValue::U32(exit.as_u32()), WireValue::U32(runtime)]
}

fn packages(events: &[TransactionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            TransactionEvent::Package(p) => Some(p.package_id.clone()),
            _ => None,
        })
        .collect()
}

fn finished_count(events: &[TransactionEvent]) -> usize {
    events.iter().filter(|e| e.is_finished()).count()
}

#[tokio::test]
async fn test_search_names_streams_packages_then_finishes() {
    let fake = FakeChannel::new().with_transaction();
    let daemon = common::daemon(&fake).await;

    let tx = daemon.search_names(Filters::empty(), ["vim"]);
    assert_eq!(tx.phase(), SessionPhase::Unbound);
    assert!(tx.tid().is_none());

    tx.connect(EventKind::Package);
    let mut events = tx.events().unwrap();

    let call = fake.wait_for_call("SearchNames").await;
    assert_eq!(call.path, TID);
    assert_eq!(call.interface, PK_TRANSACTION_INTERFACE);
    assert_eq!(
        call.args,
        vec![
            WireValue::U64(Filters::NONE.bits()),
            WireValue::str_list(["vim"]),
        ]
    );
    assert!(!call.allow_interactive_auth);

    fake.emit_transaction(
        TID,
        "Package",
        package_args(Info::Available, "vim;9.1;x86_64;fedora", "Vi IMproved"),
    );
    fake.emit_transaction(
        TID,
        "Package",
        package_args(Info::Installed, "vim-minimal;9.1;x86_64;installed", "A minimal vim"),
    );
    fake.emit_transaction(TID, "Finished", finished_args(Exit::Success, 420));

    let events = common::collect(&mut events).await;
    assert_eq!(
        packages(&events),
        vec!["vim;9.1;x86_64;fedora", "vim-minimal;9.1;x86_64;installed"]
    );
    assert_eq!(
        events.last(),
        Some(&TransactionEvent::Finished {
            exit: Exit::Success,
            runtime: 420
        })
    );
    assert_eq!(events.len(), 3);

    assert_eq!(tx.tid().as_deref(), Some(TID));
    assert_eq!(tx.phase(), SessionPhase::Released);
    assert_eq!(fake.subscriptions_on(TID), 0);
}

#[tokio::test]
async fn test_bind_sends_hints_and_fetches_properties_before_dispatch() {
    let fake = FakeChannel::new().with_transaction();
    let daemon = common::daemon(&fake).await;

    let tx = daemon.get_updates(Filters::empty());
    let _events = tx.events().unwrap();
    fake.wait_for_call("GetUpdates").await;

    let order: Vec<String> = fake
        .calls()
        .into_iter()
        .filter(|c| c.path == TID)
        .map(|c| c.method)
        .collect();
    assert_eq!(order, vec!["SetHints", "GetAll", "GetUpdates"]);

    let hints = fake.calls_to("SetHints").remove(0);
    assert_eq!(hints.args, vec![WireValue::str_list(daemon.hints())]);
}

#[tokio::test]
async fn test_service_down_while_active_kills_transaction() {
    let fake = FakeChannel::new().with_transaction();
    let daemon = common::daemon(&fake).await;

    let tx = daemon.install_packages(TransactionFlags::empty(), ["vim;9.1;x86_64;fedora"]);
    let mut events = tx.events().unwrap();
    fake.wait_for_call("InstallPackages").await;

    fake.owner_change(Some(":1.42"), None);

    let events = common::collect(&mut events).await;
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        TransactionEvent::ErrorCode {
            error: ErrorCode::ProcessKill,
            ..
        }
    ));
    assert_eq!(
        events[1],
        TransactionEvent::Finished {
            exit: Exit::Killed,
            runtime: 0
        }
    );
    assert!(!daemon.is_running());
}

fn assert_killed(events: &[TransactionEvent]) {
    assert_eq!(events.len(), 2, "unexpected events: {events:?}");
    assert!(matches!(
        &events[0],
        TransactionEvent::ErrorCode {
            error: ErrorCode::ProcessKill,
            ..
        }
    ));
    assert_eq!(
        events[1],
        TransactionEvent::Finished {
            exit: Exit::Killed,
            runtime: 0
        }
    );
}

#[tokio::test]
async fn test_service_down_while_dispatching_kills_transaction() {
    let fake = FakeChannel::new().with_transaction();
    fake.hang("Resolve");
    let daemon = common::daemon(&fake).await;

    let tx = daemon.resolve(Filters::empty(), ["vim"]);
    let mut events = tx.events().unwrap();
    fake.wait_for_call("Resolve").await;
    assert_eq!(tx.phase(), SessionPhase::Dispatching);

    fake.owner_change(Some(":1.42"), None);

    assert_killed(&common::collect(&mut events).await);
    assert_eq!(tx.phase(), SessionPhase::Released);
    assert_eq!(fake.subscriptions_on(TID), 0);
}

#[tokio::test]
async fn test_service_down_while_binding_kills_transaction() {
    let fake = FakeChannel::new();
    fake.hang("CreateTransaction");
    let daemon = common::daemon(&fake).await;

    let tx = daemon.search_names(Filters::empty(), ["vim"]);
    let mut events = tx.events().unwrap();
    fake.wait_for_call("CreateTransaction").await;
    assert_eq!(tx.phase(), SessionPhase::Binding);

    fake.owner_change(Some(":1.42"), None);

    assert_killed(&common::collect(&mut events).await);
    assert_eq!(tx.tid(), None);
    assert!(fake.calls_to("SearchNames").is_empty());
}

#[tokio::test]
async fn test_transaction_id_failure_finishes_without_binding() {
    let fake = FakeChannel::new();
    fake.fail(
        "CreateTransaction",
        RpcError::ServiceUnknown("org.freedesktop.PackageKit".into()),
    );
    let daemon = common::daemon(&fake).await;

    let tx = daemon.search_names(Filters::empty(), ["vim"]);
    tx.connect(EventKind::Package);
    let mut events = tx.events().unwrap();

    let events = common::collect(&mut events).await;
    assert_eq!(events.len(), 2);
    assert!(matches!(
        &events[0],
        TransactionEvent::ErrorCode {
            error: ErrorCode::InternalError,
            ..
        }
    ));
    assert_eq!(
        events[1],
        TransactionEvent::Finished {
            exit: Exit::Failed,
            runtime: 0
        }
    );

    assert!(fake.calls_to("SearchNames").is_empty());
    assert!(fake.calls_to("SetHints").is_empty());
    assert_eq!(tx.internal_error(), InternalError::DaemonUnreachable);
    assert!(tx.tid().is_none());
    assert_eq!(tx.phase(), SessionPhase::Released);
}

#[tokio::test]
async fn test_dispatch_refused_by_policy_is_not_authorized() {
    let fake = FakeChannel::new().with_transaction();
    fake.fail(
        "RemovePackages",
        RpcError::Remote {
            name: "org.freedesktop.PackageKit.Transaction.RefusedByPolicy".into(),
            message: "Not allowed".into(),
        },
    );
    let daemon = common::daemon(&fake).await;

    let tx = daemon.remove_packages(
        TransactionFlags::empty(),
        ["vim;9.1;x86_64;installed"],
        false,
        true,
    );
    let mut events = tx.events().unwrap();

    let events = common::collect(&mut events).await;
    assert!(matches!(
        &events[0],
        TransactionEvent::ErrorCode {
            error: ErrorCode::NotAuthorized,
            ..
        }
    ));
    assert_eq!(finished_count(&events), 1);
    assert_eq!(
        events.last(),
        Some(&TransactionEvent::Finished {
            exit: Exit::Failed,
            runtime: 0
        })
    );
    assert_eq!(tx.internal_error(), InternalError::FailedAuth);
}

#[tokio::test]
async fn test_dispatch_failure_is_internal_error() {
    let fake = FakeChannel::new().with_transaction();
    fake.fail(
        "Resolve",
        RpcError::Remote {
            name: "org.freedesktop.PackageKit.Transaction.InputInvalid".into(),
            message: "Bad package name".into(),
        },
    );
    let daemon = common::daemon(&fake).await;

    let tx = daemon.resolve(Filters::empty(), ["not a package"]);
    let mut events = tx.events().unwrap();

    let events = common::collect(&mut events).await;
    assert!(matches!(
        &events[0],
        TransactionEvent::ErrorCode {
            error: ErrorCode::InternalError,
            details,
        } if details.contains("Bad package name")
    ));
    assert_eq!(finished_count(&events), 1);
    assert_eq!(tx.internal_error(), InternalError::InvalidInput);
    assert!(tx.internal_error_message().is_some());
}

#[tokio::test]
async fn test_destroy_without_finished_synthesizes_unknown_exit() {
    let fake = FakeChannel::new().with_transaction();
    let daemon = common::daemon(&fake).await;

    let tx = daemon.refresh_cache(false);
    let mut events = tx.events().unwrap();
    fake.wait_for_call("RefreshCache").await;

    fake.emit_transaction(TID, "Destroy", Vec::new());

    let events = common::collect(&mut events).await;
    assert_eq!(
        events,
        vec![TransactionEvent::Finished {
            exit: Exit::Unknown,
            runtime: 0
        }]
    );
}

#[tokio::test]
async fn test_finished_is_delivered_once() {
    let fake = FakeChannel::new().with_transaction();
    let daemon = common::daemon(&fake).await;

    let tx = daemon.get_packages(Filters::INSTALLED);
    tx.connect(EventKind::Package);
    let mut events = tx.events().unwrap();
    fake.wait_for_call("GetPackages").await;

    fake.emit_transaction(TID, "Finished", finished_args(Exit::Success, 10));
    fake.emit_transaction(TID, "Finished", finished_args(Exit::Failed, 20));
    fake.emit_transaction(
        TID,
        "Package",
        package_args(Info::Installed, "bash;5.2;x86_64;installed", "The shell"),
    );
    fake.emit_transaction(TID, "Destroy", Vec::new());

    let events = common::collect(&mut events).await;
    assert_eq!(
        events,
        vec![TransactionEvent::Finished {
            exit: Exit::Success,
            runtime: 10
        }]
    );
}

#[tokio::test]
async fn test_property_batch_is_applied_before_notifications() {
    let fake = FakeChannel::new().with_transaction();
    let daemon = common::daemon(&fake).await;

    let tx = daemon.download_packages(true, ["vim;9.1;x86_64;fedora"]);
    let mut events = tx.events().unwrap();
    fake.wait_for_call("DownloadPackages").await;

    fake.emit_properties(
        TID,
        PK_TRANSACTION_INTERFACE,
        &[
            ("Percentage", WireValue::U32(50)),
            ("Status", WireValue::U32(Status::Download.as_u32())),
        ],
    );

    let first = common::next_event(&mut events).await;
    assert_eq!(
        first,
        TransactionEvent::PropertyChanged(TransactionProperty::Percentage(50))
    );
    // The whole batch is visible as soon as the first notification is.
    assert_eq!(tx.percentage(), 50);
    assert_eq!(tx.status(), Status::Download);

    assert_eq!(
        common::next_event(&mut events).await,
        TransactionEvent::PropertyChanged(TransactionProperty::Status(Status::Download))
    );
    assert_eq!(common::next_event(&mut events).await, TransactionEvent::Changed);
}

#[tokio::test]
async fn test_properties_of_other_interfaces_are_ignored() {
    let fake = FakeChannel::new().with_transaction();
    let daemon = common::daemon(&fake).await;

    let tx = daemon.get_categories();
    let mut events = tx.events().unwrap();
    fake.wait_for_call("GetCategories").await;

    fake.emit_properties(TID, "org.example.Other", &[("Percentage", WireValue::U32(10))]);
    fake.emit_transaction(TID, "Finished", finished_args(Exit::Success, 1));

    let events = common::collect(&mut events).await;
    assert_eq!(events.len(), 1);
    assert_eq!(tx.percentage(), 0);
}

#[tokio::test]
async fn test_initial_snapshot_fills_accessors() {
    let fake = FakeChannel::new().with_transaction();
    fake.reply_properties(
        PK_TRANSACTION_INTERFACE,
        &[
            ("AllowCancel", WireValue::Bool(true)),
            ("Role", WireValue::U32(pkclient_core::domain::Role::GetUpdates.as_u32())),
            ("Uid", WireValue::U32(1000)),
        ],
    );
    let daemon = common::daemon(&fake).await;

    let tx = daemon.get_updates(Filters::empty());
    let mut events = tx.events().unwrap();

    let mut seen = Vec::new();
    while seen.last() != Some(&TransactionEvent::Changed) {
        seen.push(common::next_event(&mut events).await);
    }
    assert_eq!(seen.len(), 4);
    assert!(tx.allow_cancel());
    assert_eq!(tx.uid(), 1000);
}

#[tokio::test]
async fn test_result_signals_are_subscribed_lazily() {
    let fake = FakeChannel::new().with_transaction();
    let daemon = common::daemon(&fake).await;

    let tx = daemon.get_details(["vim;9.1;x86_64;fedora"]);
    let _events = tx.events().unwrap();
    fake.wait_for_call("GetDetails").await;

    assert_eq!(fake.subscription_count(TID, "Details"), 0);
    assert_eq!(fake.subscription_count(TID, "Finished"), 1);
    assert_eq!(fake.subscription_count(TID, "ErrorCode"), 1);
    assert_eq!(fake.subscription_count(TID, "Destroy"), 1);
    assert_eq!(fake.subscription_count(TID, "PropertiesChanged"), 1);

    tx.connect(EventKind::Details);
    fake.wait_for_subscription(TID, "Details").await;
    tx.connect(EventKind::Details);
    tokio::task::yield_now().await;
    assert_eq!(fake.subscription_count(TID, "Details"), 1);
}

#[tokio::test]
async fn test_batched_generation_unpacks_records_in_order() {
    let fake = FakeChannel::new().with_transaction();
    fake.set_introspection(
        r#"<node><interface name="org.freedesktop.PackageKit.Transaction">
             <signal name="Packages"><arg type="a(uss)"/></signal>
           </interface></node>"#,
    );
    let daemon = common::daemon(&fake).await;

    let tx = daemon.search_files(Filters::empty(), ["/usr/bin/vim"]);
    tx.connect(EventKind::Package);
    let mut events = tx.events().unwrap();
    fake.wait_for_call("SearchFiles").await;

    assert_eq!(fake.subscription_count(TID, "Packages"), 1);
    assert_eq!(fake.subscription_count(TID, "Package"), 1);

    let hints = fake.calls_to("SetHints").remove(0);
    let sent = hints.args[0].as_str_list().unwrap();
    assert_eq!(sent.last().map(String::as_str), Some("supports-plural-signals=true"));

    let record = |id: &str| {
        WireValue::Struct(package_args(Info::Available, id, "summary"))
    };
    fake.emit_transaction(
        TID,
        "Packages",
        vec![WireValue::List(vec![
            record("vim;9.1;x86_64;fedora"),
            record("vim-common;9.1;x86_64;fedora"),
            record("vim-data;9.1;noarch;fedora"),
        ])],
    );
    fake.emit_transaction(TID, "Finished", finished_args(Exit::Success, 5));

    let events = common::collect(&mut events).await;
    assert_eq!(
        packages(&events),
        vec![
            "vim;9.1;x86_64;fedora",
            "vim-common;9.1;x86_64;fedora",
            "vim-data;9.1;noarch;fedora",
        ]
    );
}

#[tokio::test]
async fn test_batched_generation_delivers_singular_signals() {
    let fake = FakeChannel::new().with_transaction();
    fake.set_introspection(
        r#"<node><interface name="org.freedesktop.PackageKit.Transaction">
             <signal name="Package"/><signal name="Packages"/>
             <signal name="UpdateDetail"/><signal name="UpdateDetails"/>
           </interface></node>"#,
    );
    let daemon = common::daemon(&fake).await;

    let tx = daemon.resolve(Filters::empty(), ["vim"]);
    tx.connect(EventKind::Package);
    let mut events = tx.events().unwrap();
    fake.wait_for_call("Resolve").await;

    assert_eq!(
        fake.emit_transaction(
            TID,
            "Package",
            package_args(Info::Available, "vim;9.1;x86_64;fedora", "Vi IMproved"),
        ),
        1
    );
    fake.emit_transaction(
        TID,
        "Packages",
        vec![WireValue::List(vec![WireValue::Struct(package_args(
            Info::Available,
            "vim-common;9.1;x86_64;fedora",
            "Common files",
        ))])],
    );
    fake.emit_transaction(TID, "Finished", finished_args(Exit::Success, 3));

    let events = common::collect(&mut events).await;
    assert_eq!(
        packages(&events),
        vec!["vim;9.1;x86_64;fedora", "vim-common;9.1;x86_64;fedora"]
    );
}

#[tokio::test]
async fn test_group_set_search_sends_group_names() {
    let fake = FakeChannel::new().with_transaction();
    let daemon = common::daemon(&fake).await;

    let groups = [Group::AdminTools, Group::Games, Group::Education]
        .into_iter()
        .map(Group::as_u32)
        .collect();
    let tx = daemon.search_group_set(Filters::empty(), groups);
    let _events = tx.events().unwrap();

    let call = fake.wait_for_call("SearchGroups").await;
    assert_eq!(
        call.args[1],
        WireValue::str_list(["admin-tools", "education", "games"])
    );
}

#[tokio::test]
async fn test_immediate_protocol_issues_role_on_handle() {
    let fake = FakeChannel::new().with_transaction();
    let daemon = common::daemon(&fake).await;

    let tx = daemon.new_transaction().await.unwrap();
    assert_eq!(tx.tid().as_deref(), Some(TID));

    tx.connect(EventKind::Package);
    let mut events = tx.events().unwrap();
    fake.wait_for_subscription(TID, "Destroy").await;

    tx.resolve(Filters::NEWEST, ["vim"]).unwrap();
    let call = fake.wait_for_call("Resolve").await;
    assert_eq!(call.path, TID);

    assert!(matches!(
        tx.search_names(Filters::empty(), ["emacs"]),
        Err(ClientError::RoleAlreadySet(_))
    ));

    fake.emit_transaction(
        TID,
        "Package",
        package_args(Info::Available, "vim;9.1;x86_64;fedora", "Vi IMproved"),
    );
    fake.emit_transaction(TID, "Finished", finished_args(Exit::Success, 7));

    let events = common::collect(&mut events).await;
    assert_eq!(packages(&events), vec!["vim;9.1;x86_64;fedora"]);
    assert_eq!(fake.calls_to("Resolve").len(), 1);
    assert!(matches!(
        tx.get_updates(Filters::empty()),
        Err(ClientError::RoleAlreadySet(_))
    ));
}

#[tokio::test]
async fn test_issue_after_session_ended_is_rejected() {
    let fake = FakeChannel::new().with_transaction();
    let daemon = common::daemon(&fake).await;

    let tx = daemon.attach(TID);
    let mut events = tx.events().unwrap();
    fake.wait_for_subscription(TID, "Destroy").await;
    fake.emit_transaction(TID, "Destroy", Vec::new());
    common::collect(&mut events).await;

    assert!(matches!(
        tx.get_categories(),
        Err(ClientError::NoTransaction)
    ));
}

#[tokio::test]
async fn test_events_can_be_taken_once() {
    let fake = FakeChannel::new().with_transaction();
    let daemon = common::daemon(&fake).await;

    let tx = daemon.get_repo_list(Filters::empty());
    let _events = tx.events().unwrap();
    assert!(matches!(tx.events(), Err(ClientError::AlreadySubmitted)));
    assert!(matches!(tx.clone().events(), Err(ClientError::AlreadySubmitted)));
}

#[tokio::test]
async fn test_cancel_requires_live_transaction() {
    let fake = FakeChannel::new().with_transaction();
    let daemon = common::daemon(&fake).await;

    let tx = daemon.update_packages(TransactionFlags::empty(), ["vim;9.1;x86_64;fedora"]);
    assert!(matches!(tx.cancel().await, Err(ClientError::NoTransaction)));

    let _events = tx.events().unwrap();
    fake.wait_for_call("UpdatePackages").await;
    tx.cancel().await.unwrap();

    let cancel = fake.wait_for_call("Cancel").await;
    assert_eq!(cancel.path, TID);
}

#[tokio::test]
async fn test_global_hints_apply_to_later_sessions_only() {
    let fake = FakeChannel::new().with_transaction();
    let daemon = common::daemon(&fake).await;

    let before = daemon.get_distro_upgrades();
    daemon.set_hints(["locale=de_DE.UTF-8", "interactive=false"]);
    let after = daemon.get_distro_upgrades();

    let _first = before.events().unwrap();
    fake.wait_for_call("GetDistroUpgrades").await;
    let _second = after.events().unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while fake.calls_to("GetDistroUpgrades").len() < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();

    let hints = fake.calls_to("SetHints");
    assert_ne!(hints[0].args, hints[1].args);
    assert_eq!(
        hints[1].args,
        vec![WireValue::str_list(["locale=de_DE.UTF-8", "interactive=false"])]
    );
}

#[tokio::test]
async fn test_session_hints_follow_global_hints() {
    let fake = FakeChannel::new().with_transaction();
    let daemon = common::daemon(&fake).await;
    daemon.set_hints(["locale=C"]);

    let tx = daemon.refresh_cache(true);
    tx.set_hints(["cache-age=3600"]).await.unwrap();
    assert!(fake.calls_to("SetHints").is_empty());

    let _events = tx.events().unwrap();
    fake.wait_for_call("RefreshCache").await;

    let hints = fake.calls_to("SetHints").remove(0);
    assert_eq!(
        hints.args,
        vec![WireValue::str_list(["locale=C", "cache-age=3600"])]
    );
}

#[tokio::test]
async fn test_replay_exposes_history_record() {
    use pkclient_core::domain::{Role, TransactionRecord};

    let fake = FakeChannel::new();
    let daemon = common::daemon(&fake).await;

    let record = TransactionRecord {
        tid: "/17_history".into(),
        timespec: pkclient_core::domain::parse_iso8601("2024-03-01T10:00:00Z"),
        succeeded: true,
        role: Role::InstallPackages,
        duration: 12_000,
        data: "installing;vim;9.1;x86_64;fedora".into(),
        uid: 1000,
        cmdline: "pkcon install vim".into(),
    };

    let tx = daemon.replay(&record);
    assert_eq!(tx.tid().as_deref(), Some("/17_history"));
    assert_eq!(tx.role(), Role::InstallPackages);
    assert!(tx.succeeded());
    assert_eq!(tx.duration(), 12_000);
    assert_eq!(tx.uid(), 1000);
    assert_eq!(tx.cmdline(), Some("pkcon install vim"));
    assert!(tx.timespec().is_some());
    assert_eq!(tx.phase(), SessionPhase::Unbound);
    assert!(fake.calls_to("CreateTransaction").is_empty());
}
