//! Integration tests for the daemon registry
//!
//! Verifies capability snapshots, owner changes, the shared
//! PropertiesChanged channel and the daemon-level methods.

use pkclient_core::domain::{
    Authorize, ClientError, Filters, Group, Network, Role, RpcError, WireValue,
};
use pkclient_ipc::{DaemonEvent, OfflineEvent, PK_INTERFACE, PK_OFFLINE_INTERFACE, PK_PATH};

use crate::common::{self, FakeChannel};

fn daemon_properties() -> Vec<(&'static str, WireValue)> {
    vec![
        ("BackendName", WireValue::from("dnf")),
        ("BackendDescription", WireValue::from("DNF")),
        ("BackendAuthor", WireValue::from("Someone")),
        ("DistroId", WireValue::from("fedora;41;x86_64")),
        (
            "Roles",
            WireValue::U64((1 << Role::Resolve.as_u32()) | (1 << Role::SearchName.as_u32())),
        ),
        (
            "Groups",
            WireValue::U64(1 << Group::Games.as_u32()),
        ),
        (
            "Filters",
            WireValue::U64((Filters::INSTALLED | Filters::NOT_INSTALLED).bits()),
        ),
        ("MimeTypes", WireValue::str_list(["application/x-rpm"])),
        ("NetworkState", WireValue::U32(Network::Online.as_u32())),
        ("Locked", WireValue::Bool(false)),
        ("VersionMajor", WireValue::U32(1)),
        ("VersionMinor", WireValue::U32(2)),
        ("VersionMicro", WireValue::U32(8)),
    ]
}

#[tokio::test]
async fn test_connect_fetches_capabilities() {
    let fake = FakeChannel::new();
    fake.reply_properties(PK_INTERFACE, &daemon_properties());

    let daemon = common::daemon(&fake).await;

    assert!(daemon.is_running());
    assert_eq!(daemon.backend_name(), "dnf");
    assert_eq!(daemon.backend_description(), "DNF");
    assert_eq!(daemon.backend_author(), "Someone");
    assert_eq!(daemon.distro_id(), "fedora;41;x86_64");
    assert!(daemon.roles().contains(Role::Resolve.as_u32()));
    assert!(!daemon.roles().contains(Role::InstallPackages.as_u32()));
    assert!(daemon.groups().contains(Group::Games.as_u32()));
    assert_eq!(daemon.filters(), Filters::INSTALLED | Filters::NOT_INSTALLED);
    assert_eq!(daemon.mime_types(), vec!["application/x-rpm".to_string()]);
    assert_eq!(daemon.network_state(), Network::Online);
    assert!(!daemon.locked());
    assert_eq!(daemon.version(), semver::Version::new(1, 2, 8));
    assert!(daemon.capabilities().supports(Role::SearchName));
}

#[tokio::test]
async fn test_unreachable_service_keeps_defaults() {
    let fake = FakeChannel::new();
    fake.fail(
        "GetAll org.freedesktop.PackageKit",
        RpcError::ServiceUnknown("org.freedesktop.PackageKit".into()),
    );

    let daemon = common::daemon(&fake).await;

    assert!(!daemon.is_running());
    assert_eq!(daemon.backend_name(), "");
    assert_eq!(daemon.network_state(), Network::Unknown);
    assert_eq!(daemon.version(), semver::Version::new(0, 0, 0));
}

#[tokio::test]
async fn test_service_appearing_refetches_snapshot() {
    let fake = FakeChannel::new();
    let daemon = common::daemon(&fake).await;
    assert!(!daemon.is_running());

    let mut events = daemon.events();
    fake.reply_properties(PK_INTERFACE, &daemon_properties());
    fake.owner_change(None, Some(":1.7"));

    let first = common::wait_for(&mut events, |_| true).await;
    assert_eq!(first, DaemonEvent::TransactionListChanged(Vec::new()));
    common::wait_for(&mut events, |e| *e == DaemonEvent::RunningChanged(true)).await;
    common::wait_for(&mut events, |e| *e == DaemonEvent::Changed).await;

    assert!(daemon.is_running());
    assert_eq!(daemon.backend_name(), "dnf");
}

#[tokio::test]
async fn test_service_disappearing_reports_service_down() {
    let fake = FakeChannel::new();
    fake.reply_properties(PK_INTERFACE, &daemon_properties());
    let daemon = common::daemon(&fake).await;
    assert!(daemon.is_running());

    let mut events = daemon.events();
    fake.owner_change(Some(":1.7"), None);

    assert_eq!(
        common::wait_for(&mut events, |_| true).await,
        DaemonEvent::ServiceDown
    );
    assert_eq!(
        common::wait_for(&mut events, |_| true).await,
        DaemonEvent::RunningChanged(false)
    );
    assert!(!daemon.is_running());
    // The last snapshot stays available.
    assert_eq!(daemon.backend_name(), "dnf");
}

#[tokio::test]
async fn test_service_replaced_reports_down_then_up() {
    let fake = FakeChannel::new();
    fake.reply_properties(PK_INTERFACE, &daemon_properties());
    let daemon = common::daemon(&fake).await;

    let mut events = daemon.events();
    fake.owner_change(Some(":1.7"), Some(":1.9"));

    assert_eq!(
        common::wait_for(&mut events, |_| true).await,
        DaemonEvent::ServiceDown
    );
    common::wait_for(&mut events, |e| *e == DaemonEvent::Changed).await;
    assert!(daemon.is_running());
}

#[tokio::test]
async fn test_properties_changed_is_routed_by_interface() {
    let fake = FakeChannel::new();
    let daemon = common::daemon(&fake).await;
    let mut daemon_events = daemon.events();
    let mut offline_events = daemon.offline().events();

    fake.emit_properties(
        PK_PATH,
        PK_INTERFACE,
        &[
            ("Locked", WireValue::Bool(true)),
            ("NetworkState", WireValue::U32(Network::Wifi.as_u32())),
        ],
    );
    common::wait_for(&mut daemon_events, |e| {
        *e == DaemonEvent::NetworkStateChanged(Network::Wifi)
    })
    .await;
    common::wait_for(&mut daemon_events, |e| *e == DaemonEvent::Changed).await;
    assert!(daemon.locked());
    assert!(daemon.is_running());

    fake.emit_properties(
        PK_PATH,
        PK_OFFLINE_INTERFACE,
        &[("UpdatePrepared", WireValue::Bool(true))],
    );
    common::wait_for(&mut offline_events, |e| *e == OfflineEvent::Changed).await;
    assert!(daemon.offline().update_prepared());

    fake.emit_properties(
        PK_PATH,
        "org.example.Unknown",
        &[("Locked", WireValue::Bool(false))],
    );
    fake.emit_daemon("UpdatesChanged", Vec::new());
    common::wait_for(&mut daemon_events, |e| *e == DaemonEvent::UpdatesChanged).await;
    assert!(daemon.locked());
}

#[tokio::test]
async fn test_daemon_signals_become_events() {
    let fake = FakeChannel::new();
    let daemon = common::daemon(&fake).await;
    let mut events = daemon.events();

    fake.emit_daemon("RepoListChanged", Vec::new());
    fake.emit_daemon("RestartSchedule", Vec::new());
    fake.emit_daemon(
        "TransactionListChanged",
        vec![WireValue::str_list(["/3_aaaa", "/4_bbbb"])],
    );

    assert_eq!(
        common::wait_for(&mut events, |_| true).await,
        DaemonEvent::RepoListChanged
    );
    assert_eq!(
        common::wait_for(&mut events, |_| true).await,
        DaemonEvent::RestartScheduled
    );
    assert_eq!(
        common::wait_for(&mut events, |_| true).await,
        DaemonEvent::TransactionListChanged(vec!["/3_aaaa".into(), "/4_bbbb".into()])
    );
}

#[tokio::test]
async fn test_daemon_methods() {
    let fake = FakeChannel::new();
    fake.reply("CanAuthorize", vec![WireValue::U32(Authorize::Interactive.as_u32())]);
    fake.reply("GetTimeSinceAction", vec![WireValue::U32(3600)]);
    fake.reply(
        "GetTransactionList",
        vec![WireValue::List(vec![WireValue::object_path("/5_cccc")])],
    );
    let daemon = common::daemon(&fake).await;

    assert_eq!(
        daemon
            .can_authorize("org.freedesktop.packagekit.package-install")
            .await
            .unwrap(),
        Authorize::Interactive
    );
    assert_eq!(
        daemon.get_time_since_action(Role::RefreshCache).await.unwrap(),
        3600
    );
    assert_eq!(
        daemon.get_transaction_list().await.unwrap(),
        vec!["/5_cccc".to_string()]
    );

    daemon
        .set_proxy("http://proxy:3128", "", "", "", "localhost", "")
        .await
        .unwrap();
    daemon.state_has_changed("network").await.unwrap();
    daemon.suggest_daemon_quit().await.unwrap();

    let proxy = fake.calls_to("SetProxy").remove(0);
    assert_eq!(proxy.args.len(), 6);
    assert_eq!(proxy.path, PK_PATH);
    assert_eq!(
        fake.calls_to("GetTimeSinceAction")[0].args,
        vec![WireValue::U32(Role::RefreshCache.as_u32())]
    );
    assert_eq!(
        fake.calls_to("StateHasChanged")[0].args,
        vec![WireValue::from("network")]
    );
    assert_eq!(fake.calls_to("SuggestDaemonQuit").len(), 1);
}

#[tokio::test]
async fn test_create_transaction_id_unreachable() {
    let fake = FakeChannel::new();
    fake.fail(
        "CreateTransaction",
        RpcError::ServiceUnknown("org.freedesktop.PackageKit".into()),
    );
    let daemon = common::daemon(&fake).await;

    assert_eq!(
        daemon.create_transaction_id().await,
        Err(ClientError::DaemonUnreachable)
    );
    assert!(matches!(
        daemon.new_transaction().await,
        Err(ClientError::DaemonUnreachable)
    ));
}

#[tokio::test]
async fn test_malformed_replies_are_invalid() {
    let fake = FakeChannel::new();
    fake.reply("CanAuthorize", vec![WireValue::from("yes")]);
    fake.reply("CreateTransaction", Vec::new());
    let daemon = common::daemon(&fake).await;

    assert!(matches!(
        daemon.can_authorize("org.freedesktop.packagekit.system-update").await,
        Err(ClientError::InvalidReply(_))
    ));
    assert!(matches!(
        daemon.create_transaction_id().await,
        Err(ClientError::InvalidReply(_))
    ));
}
