//! End-to-end scenarios over a real unix control socket.

use std::time::Duration;

use passage_protocol::protocol::{Auth, Status, StatusResponse};
use passage_tests::helpers::harness::{authed_config, open_config};
use passage_tests::{wait_for, TestHarness};

#[tokio::test]
async fn auth_disabled_basic_start() {
    let harness = TestHarness::new(&open_config()).await;
    let mut client = harness.client().await;

    let resp = client.start("p1").await.unwrap();
    assert_eq!(resp.status, Status::Ok);
    assert!(resp.error.is_none());

    let status: StatusResponse = client.status("p1").await.unwrap().decode_data().unwrap();
    assert!(status.running);
    assert_eq!(Some(status.pid), harness.backend.pid_of("p1"));
    assert_eq!(status.active_host, "h1");
}

#[tokio::test]
async fn unknown_proxy_info() {
    let harness = TestHarness::new(&open_config()).await;
    let mut client = harness.client().await;

    let resp = client.info("ghost").await.unwrap();
    assert_eq!(resp.status, Status::Error);
    assert_eq!(resp.error.as_deref(), Some("unknown proxy"));
}

#[tokio::test]
async fn bad_token_leaves_the_connection_usable() {
    let harness = TestHarness::new(&authed_config()).await;
    let mut client = harness.client_as("alice", "bad").await;

    let resp = client.list().await.unwrap();
    assert_eq!(resp.error.as_deref(), Some("invalid credentials"));

    // Same connection, corrected credentials.
    client.set_auth(Some(Auth {
        user: "bob".into(),
        token: "B".into(),
    }));
    let resp = client.list().await.unwrap();
    assert_eq!(resp.status, Status::Ok);
}

#[tokio::test]
async fn deny_rule_beats_group_allow() {
    let harness = TestHarness::new(&authed_config()).await;
    let mut client = harness.client_as("alice", "T").await;

    let resp = client.start("p1").await.unwrap();
    assert_eq!(resp.error.as_deref(), Some("not allowed"));

    // The admins allow rule still covers everything it does not deny.
    let resp = client.info("p1").await.unwrap();
    assert_eq!(resp.status, Status::Ok);
}

#[tokio::test]
async fn setactive_requires_an_existing_host() {
    let harness = TestHarness::new(&open_config()).await;
    let mut client = harness.client().await;

    client.start("p1").await.unwrap();
    let pid_before = harness.backend.pid_of("p1");

    let resp = client.set_active("p1", "h3").await.unwrap();
    assert_eq!(resp.error.as_deref(), Some("unknown host"));

    // No state change: same tunnel, same host, same config default.
    assert_eq!(harness.backend.pid_of("p1"), pid_before);
    assert_eq!(harness.manager.active_host("p1").as_deref(), Some("h1"));
    assert_eq!(harness.config.read().proxies.proxies["p1"].default, "h1");
}

#[tokio::test]
async fn setactive_rehomes_to_an_allowed_host() {
    let harness = TestHarness::new(&open_config()).await;
    let mut client = harness.client().await;

    client.start("p1").await.unwrap();
    let resp = client.set_active("p1", "h2").await.unwrap();
    assert_eq!(resp.status, Status::Ok);

    let status: StatusResponse = client.status("p1").await.unwrap().decode_data().unwrap();
    assert!(status.running);
    assert_eq!(status.active_host, "h2");
}

#[tokio::test]
async fn unexpected_exit_triggers_restart() {
    let harness = TestHarness::new(&open_config()).await;
    let mut client = harness.client().await;

    client.start("p1").await.unwrap();
    let first_pid = harness.backend.pid_of("p1").unwrap();

    harness.backend.kill("p1");

    let backend = std::sync::Arc::clone(&harness.backend);
    assert!(
        wait_for(
            move || backend.pid_of("p1").is_some_and(|pid| pid != first_pid),
            Duration::from_secs(5),
        )
        .await,
        "proxy was not restarted with a fresh tunnel"
    );
    assert_eq!(harness.manager.active_host("p1").as_deref(), Some("h1"));

    let status: StatusResponse = client.status("p1").await.unwrap().decode_data().unwrap();
    assert!(status.running);
}
