//! End-to-end: device output -> store -> fake switch over TCP.

mod common;

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use common::{ENABLE_SECRET, FakeSwitch, PASSWORD, SwitchOptions, credentials, fast_provider};
use tempfile::TempDir;
use vlansync::device::{ConnectError, PrivilegeError, ProjectError};
use vlansync::inventory::Inventory;
use vlansync::parser::VlanParser;
use vlansync::service::{SyncError, VlanSyncService};
use vlansync::store::SqliteStore;

const SHOW_VLAN: &str = "\
VLAN Name                             Description
---- -------------------------------- ------------------
10   USERS                            Office users
20   VOICE
30   MGMT                             Management network
";

async fn synced_service() -> (VlanSyncService, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("vlan.db")).await.unwrap();
    let service = VlanSyncService::new(Arc::new(store), VlanParser::show_vlan().unwrap());
    service.sync_text(SHOW_VLAN).await.unwrap();
    (service, dir)
}

#[tokio::test]
async fn test_push_configures_every_vlan() {
    let (service, _dir) = synced_service().await;
    let switch = FakeSwitch::start(SwitchOptions::default()).await;

    let report = service
        .push(
            fast_provider(),
            &switch.address,
            &credentials(PASSWORD, Some(ENABLE_SECRET)),
        )
        .await
        .unwrap();

    assert!(report.is_clean());
    assert_eq!(report.succeeded, vec![10, 20, 30]);

    let state = switch.state.lock().unwrap();
    assert_eq!(
        state.vlans.get(&10),
        Some(&("USERS".to_string(), "Office users".to_string()))
    );
    assert_eq!(state.vlans.get(&20), Some(&("VOICE".to_string(), String::new())));
    assert_eq!(
        state.config_lines.iter().filter(|l| *l == "no description").count(),
        1
    );
    assert_eq!(state.config_lines.len(), 9);
    drop(state);
    assert_eq!(switch.exits().await, 1);
}

#[tokio::test]
async fn test_rejected_vlan_is_isolated() {
    let (service, _dir) = synced_service().await;
    let switch = FakeSwitch::start(SwitchOptions {
        reject: HashSet::from([20]),
        ..Default::default()
    })
    .await;

    let report = service
        .push(
            fast_provider(),
            &switch.address,
            &credentials(PASSWORD, Some(ENABLE_SECRET)),
        )
        .await
        .unwrap();

    assert_eq!(report.succeeded, vec![10, 30]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].vlan_id, 20);
    assert!(report.failures[0].cause.contains("Invalid input"));

    let state = switch.state.lock().unwrap();
    assert!(state.vlans.contains_key(&30));
    assert!(!state.config_lines.iter().any(|l| l == "name VOICE"));
    drop(state);
    assert_eq!(switch.exits().await, 1);
}

#[tokio::test]
async fn test_bad_password_is_an_authentication_error() {
    let (service, _dir) = synced_service().await;
    let switch = FakeSwitch::start(SwitchOptions::default()).await;

    let err = service
        .push(
            fast_provider(),
            &switch.address,
            &credentials("wrong", Some(ENABLE_SECRET)),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::Project(ProjectError::Connect(ConnectError::Authentication { .. }))
    ));
    assert!(switch.state.lock().unwrap().config_lines.is_empty());
}

#[tokio::test]
async fn test_bad_enable_secret_is_a_privilege_error() {
    let (service, _dir) = synced_service().await;
    let switch = FakeSwitch::start(SwitchOptions::default()).await;

    let err = service
        .push(
            fast_provider(),
            &switch.address,
            &credentials(PASSWORD, Some("nope")),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::Project(ProjectError::Privilege(PrivilegeError::Refused { .. }))
    ));
    assert!(switch.state.lock().unwrap().config_lines.is_empty());
    // The session was still closed with an exit from user mode
    assert_eq!(switch.exits().await, 1);
}

#[tokio::test]
async fn test_silent_device_times_out() {
    let (service, _dir) = synced_service().await;
    let switch = FakeSwitch::start(SwitchOptions {
        silent: true,
        ..Default::default()
    })
    .await;

    let err = service
        .push(
            fast_provider(),
            &switch.address,
            &credentials(PASSWORD, Some(ENABLE_SECRET)),
        )
        .await
        .unwrap_err();

    match err {
        SyncError::Project(ProjectError::Connect(ConnectError::Io { source, .. })) => {
            assert_eq!(source.kind(), io::ErrorKind::TimedOut);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_device() {
    let (service, _dir) = synced_service().await;
    // Bind and release a port so nothing listens on it
    let address = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };

    let err = service
        .push(
            fast_provider(),
            &address,
            &credentials(PASSWORD, Some(ENABLE_SECRET)),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SyncError::Project(ProjectError::Connect(ConnectError::Io { .. }))
    ));
}

#[tokio::test]
async fn test_push_through_inventory() {
    let (service, _dir) = synced_service().await;
    let switch = FakeSwitch::start(SwitchOptions::default()).await;
    let (host, port) = switch.address.rsplit_once(':').unwrap();

    let inventory: Inventory = format!(
        r#"
        [defaults]
        username = "netops"
        password = "{PASSWORD}"
        enable_secret = "{ENABLE_SECRET}"
        command_timeout_secs = 2

        [devices.lab-sw]
        address = "{host}"
        port = {port}
        "#
    )
    .parse()
    .unwrap();
    let target = inventory.resolve_with("lab-sw", |_| None).unwrap();

    let report = service.push_target(&target).await.unwrap();
    assert_eq!(report.succeeded, vec![10, 20, 30]);
    assert_eq!(report.device, "lab-sw");
}

#[tokio::test]
async fn test_resync_then_push_reflects_pruning() {
    let (service, _dir) = synced_service().await;
    let report = service
        .sync_text("10 STAFF Office staff\n")
        .await
        .unwrap();
    assert_eq!((report.updated, report.deleted), (1, 2));

    let switch = FakeSwitch::start(SwitchOptions::default()).await;
    let report = service
        .push(
            fast_provider(),
            &switch.address,
            &credentials(PASSWORD, Some(ENABLE_SECRET)),
        )
        .await
        .unwrap();

    assert_eq!(report.succeeded, vec![10]);
    let state = switch.state.lock().unwrap();
    assert_eq!(
        state.vlans.get(&10),
        Some(&("STAFF".to_string(), "Office staff".to_string()))
    );
}

#[tokio::test]
async fn test_emptied_description_is_cleared_on_device() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("vlan.db")).await.unwrap();
    let service = VlanSyncService::new(Arc::new(store), VlanParser::show_vlan().unwrap());
    let switch = FakeSwitch::start(SwitchOptions::default()).await;
    let creds = credentials(PASSWORD, Some(ENABLE_SECRET));

    service.sync_text("10 USERS Old description\n").await.unwrap();
    service.push(fast_provider(), &switch.address, &creds).await.unwrap();
    assert_eq!(
        switch.state.lock().unwrap().vlans.get(&10),
        Some(&("USERS".to_string(), "Old description".to_string()))
    );

    service.sync_text("10 USERS\n").await.unwrap();
    let report = service.push(fast_provider(), &switch.address, &creds).await.unwrap();
    assert_eq!(report.succeeded, vec![10]);
    assert_eq!(
        switch.state.lock().unwrap().vlans.get(&10),
        Some(&("USERS".to_string(), String::new()))
    );
}

#[tokio::test]
async fn test_slow_reply_does_not_shift_later_results() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("vlan.db")).await.unwrap();
    let service = VlanSyncService::new(Arc::new(store), VlanParser::show_vlan().unwrap());
    service
        .sync_text("10 USERS Office\n20 VOICE Phones\n30 MGMT Management\n40 GUEST Visitors\n")
        .await
        .unwrap();

    // Answers 300ms after the 500ms command timeout
    let switch = FakeSwitch::start(SwitchOptions {
        stall_on: Some(("name USERS".to_string(), Duration::from_millis(800))),
        ..Default::default()
    })
    .await;

    let report = service
        .push(
            fast_provider(),
            &switch.address,
            &credentials(PASSWORD, Some(ENABLE_SECRET)),
        )
        .await
        .unwrap();

    assert_eq!(report.succeeded, vec![20, 30, 40]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].vlan_id, 10);
    assert!(report.failures[0].cause.contains("in time"));

    let state = switch.state.lock().unwrap();
    for (id, name) in [(20, "VOICE"), (30, "MGMT"), (40, "GUEST")] {
        assert_eq!(state.vlans.get(&id).map(|v| v.0.as_str()), Some(name));
    }
    drop(state);
    assert_eq!(switch.exits().await, 1);
}

#[tokio::test]
async fn test_line_password_login() {
    let (service, _dir) = synced_service().await;
    let switch = FakeSwitch::start(SwitchOptions {
        password_only: true,
        ..Default::default()
    })
    .await;

    let report = service
        .push(
            fast_provider(),
            &switch.address,
            &credentials(PASSWORD, Some(ENABLE_SECRET)),
        )
        .await
        .unwrap();

    assert_eq!(report.succeeded, vec![10, 20, 30]);
}
