//! Integration tests for offline updates
//!
//! Verifies the initial snapshot, call flags and timeouts, and the
//! fallback of `GetPrepared`.

use std::time::Duration;

use pkclient_core::domain::{ClientError, OfflineAction, RpcError, WireValue};
use pkclient_ipc::{OfflineEvent, DBUS_PROPERTIES, PK_OFFLINE_INTERFACE, PK_PATH};

use crate::common::{self, FakeChannel};

#[tokio::test]
async fn test_initial_snapshot() {
    let fake = FakeChannel::new();
    fake.reply_properties(
        PK_OFFLINE_INTERFACE,
        &[
            (
                "PreparedUpgrade",
                WireValue::Map(common::property_map(&[
                    ("name", WireValue::from("Fedora Linux")),
                    ("version", WireValue::from("41")),
                ])),
            ),
            ("TriggerAction", WireValue::from("power-off")),
            ("UpgradePrepared", WireValue::Bool(true)),
        ],
    );

    let daemon = common::daemon(&fake).await;
    let offline = daemon.offline();

    assert_eq!(offline.prepared_upgrade().name, "Fedora Linux");
    assert_eq!(offline.prepared_upgrade().version, "41");
    assert_eq!(offline.trigger_action(), OfflineAction::PowerOff);
    assert!(offline.upgrade_prepared());
    assert!(!offline.update_prepared());
    assert!(!offline.update_triggered());
    assert!(!offline.upgrade_triggered());
}

#[tokio::test]
async fn test_trigger_allows_interactive_auth() {
    let fake = FakeChannel::new();
    let daemon = common::daemon(&fake).await;

    daemon.offline().trigger(OfflineAction::Reboot).await.unwrap();

    let call = fake.calls_to("Trigger").remove(0);
    assert_eq!(call.path, PK_PATH);
    assert_eq!(call.interface, PK_OFFLINE_INTERFACE);
    assert_eq!(call.args, vec![WireValue::from("reboot")]);
    assert!(call.allow_interactive_auth);
    assert_eq!(call.timeout, None);
}

#[tokio::test]
async fn test_trigger_upgrade_uses_long_timeout() {
    let fake = FakeChannel::new();
    let daemon = common::daemon(&fake).await;

    daemon
        .offline()
        .trigger_upgrade(OfflineAction::PowerOff)
        .await
        .unwrap();

    let call = fake.calls_to("TriggerUpgrade").remove(0);
    assert_eq!(call.args, vec![WireValue::from("power-off")]);
    assert!(call.allow_interactive_auth);
    assert_eq!(call.timeout, Some(Duration::from_secs(24 * 60 * 60)));
}

#[tokio::test]
async fn test_trigger_unset_is_rejected_locally() {
    let fake = FakeChannel::new();
    let daemon = common::daemon(&fake).await;

    assert!(matches!(
        daemon.offline().trigger(OfflineAction::Unset).await,
        Err(ClientError::InvalidArgument(_))
    ));
    assert!(fake.calls_to("Trigger").is_empty());
}

#[tokio::test]
async fn test_cancel_and_clear_results() {
    let fake = FakeChannel::new();
    fake.fail(
        "ClearResults",
        RpcError::Remote {
            name: "org.freedesktop.PackageKit.Offline.Failed".into(),
            message: "nothing to clear".into(),
        },
    );
    let daemon = common::daemon(&fake).await;

    daemon.offline().cancel().await.unwrap();
    assert!(fake.calls_to("Cancel")[0].allow_interactive_auth);

    assert!(matches!(
        daemon.offline().clear_results().await,
        Err(ClientError::Rpc(RpcError::Remote { .. }))
    ));
    assert!(fake.calls_to("ClearResults")[0].allow_interactive_auth);
}

#[tokio::test]
async fn test_get_prepared() {
    let fake = FakeChannel::new();
    fake.reply(
        "GetPrepared",
        vec![WireValue::str_list(["vim;9.1;x86_64;updates"])],
    );
    let daemon = common::daemon(&fake).await;
    let mut events = daemon.offline().events();

    let prepared = daemon.offline().get_prepared().await;
    assert_eq!(prepared, vec!["vim;9.1;x86_64;updates".to_string()]);
    assert_eq!(
        common::wait_for(&mut events, |_| true).await,
        OfflineEvent::PreparedUpdates(prepared)
    );
}

#[tokio::test]
async fn test_get_prepared_failure_is_empty() {
    let fake = FakeChannel::new();
    fake.fail("GetPrepared", RpcError::Timeout(25));
    let daemon = common::daemon(&fake).await;

    assert!(daemon.offline().get_prepared().await.is_empty());
}

#[tokio::test]
async fn test_invalidated_properties_do_not_reset_state() {
    let fake = FakeChannel::new();
    fake.reply_properties(PK_OFFLINE_INTERFACE, &[("UpdateTriggered", WireValue::Bool(true))]);
    let daemon = common::daemon(&fake).await;
    let mut events = daemon.offline().events();

    fake.emit(
        PK_PATH,
        DBUS_PROPERTIES,
        "PropertiesChanged",
        vec![
            WireValue::from(PK_OFFLINE_INTERFACE),
            WireValue::Map(common::property_map(&[(
                "UpdatePrepared",
                WireValue::Bool(true),
            )])),
            WireValue::str_list(["UpdateTriggered"]),
        ],
    );

    common::wait_for(&mut events, |e| *e == OfflineEvent::Changed).await;
    assert!(daemon.offline().update_prepared());
    assert!(daemon.offline().update_triggered());
}
