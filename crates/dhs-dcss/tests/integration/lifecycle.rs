//! Connection retry, ordering and graceful shutdown.

use std::time::Duration;

use dhs_core::{TransportConfig, TransportState};
use dhs_dcss::messages::HtosNote;
use dhs_dcss::OperationHandlers;

use crate::harness::{connect, eventually, start_dhs, FakeDcss, CONNECTION};

fn note(message: &str) -> HtosNote {
    HtosNote {
        message: message.into(),
    }
}

#[tokio::test]
async fn test_connect_retries_until_server_appears() {
    // Reserve a port, then free it so the first attempts are refused.
    let port = FakeDcss::bind().await.port;
    let dhs = start_dhs(OperationHandlers::new());
    let conn = dhs
        .context()
        .create_connection(CONNECTION, dhs_dcss::PROTOCOL, &format!("dcss://127.0.0.1:{port}"), TransportConfig::fast())
        .unwrap();
    conn.connect();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(conn.state(), TransportState::Connecting);

    let server = FakeDcss::bind_port(port).await;
    let _peer = server.accept().await;
    assert!(conn
        .control()
        .wait_for_state(TransportState::Connected, Duration::from_secs(2))
        .await);

    dhs.shutdown();
    dhs.wait().await;
}

#[tokio::test]
async fn test_connect_timeout_gives_up() {
    let port = FakeDcss::bind().await.port;
    let dhs = start_dhs(OperationHandlers::new());
    let config = TransportConfig {
        connect_timeout_ms: Some(200),
        ..TransportConfig::fast()
    };
    let conn = dhs
        .context()
        .create_connection(CONNECTION, dhs_dcss::PROTOCOL, &format!("dcss://127.0.0.1:{port}"), config)
        .unwrap();
    conn.connect();

    assert!(eventually(Duration::from_millis(100), || conn.state() == TransportState::Connecting).await);
    assert!(eventually(Duration::from_secs(2), || conn.state() == TransportState::Disconnected).await);

    dhs.shutdown();
    dhs.wait().await;
}

#[tokio::test]
async fn test_messages_arrive_in_send_order() {
    let server = FakeDcss::bind().await;
    let dhs = start_dhs(OperationHandlers::new());
    let (_conn, mut peer) = connect(&dhs, &server).await;

    for i in 0..20 {
        dhs.context()
            .send::<String, _>(CONNECTION, note(&format!("n{i}")))
            .unwrap();
    }
    for i in 0..20 {
        assert_eq!(peer.recv().await, format!("htos_note n{i}"));
    }

    dhs.shutdown();
    dhs.wait().await;
}

#[tokio::test]
async fn test_messages_queued_while_disconnected_are_sent_after_connect() {
    let server = FakeDcss::bind().await;
    let dhs = start_dhs(OperationHandlers::new());
    let conn = dhs
        .context()
        .create_connection(CONNECTION, dhs_dcss::PROTOCOL, &server.url(), TransportConfig::fast())
        .unwrap();

    dhs.context().send::<String, _>(CONNECTION, note("held")).unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    conn.connect();
    let mut peer = server.accept().await;
    assert_eq!(peer.recv().await, "htos_note held");

    dhs.shutdown();
    dhs.wait().await;
}

#[tokio::test]
async fn test_message_sent_during_link_drop_is_delivered_after_reconnect() {
    let server = FakeDcss::bind().await;
    let dhs = start_dhs(OperationHandlers::new());
    // A long fetch wait keeps the write worker parked in the queue across the drop.
    let config = TransportConfig {
        blocking_timeout_ms: 3_000,
        reconnect_delay_ms: 500,
        ..TransportConfig::fast()
    };
    let conn = dhs
        .context()
        .create_connection(CONNECTION, dhs_dcss::PROTOCOL, &server.url(), config)
        .unwrap();
    conn.connect();
    let peer = server.accept().await;
    assert!(eventually(Duration::from_secs(2), || conn.state() == TransportState::Connected).await);

    drop(peer);
    assert!(eventually(Duration::from_secs(2), || conn.state() == TransportState::Disconnected).await);
    dhs.context().send::<String, _>(CONNECTION, note("after_drop")).unwrap();
    dhs.context().send::<String, _>(CONNECTION, note("after_drop_2")).unwrap();

    let mut peer = server.accept().await;
    assert_eq!(peer.recv().await, "htos_note after_drop");
    assert_eq!(peer.recv().await, "htos_note after_drop_2");

    dhs.shutdown();
    dhs.wait().await;
}

#[tokio::test]
async fn test_graceful_shutdown_closes_socket() {
    let server = FakeDcss::bind().await;
    let dhs = start_dhs(OperationHandlers::new());
    let (conn, mut peer) = connect(&dhs, &server).await;

    dhs.shutdown();
    // Every worker observes cancellation within one blocking timeout.
    tokio::time::timeout(Duration::from_secs(1), dhs.wait())
        .await
        .expect("workers did not stop");
    assert_eq!(conn.state(), TransportState::Disconnected);
    assert!(peer.closed().await);

    assert!(matches!(
        dhs.context()
            .create_connection("late", dhs_dcss::PROTOCOL, &server.url(), TransportConfig::fast()),
        Err(dhs_core::ContextError::ShutDown)
    ));
}
