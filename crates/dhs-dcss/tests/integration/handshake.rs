//! Client type handshake and frame version negotiation.

use std::time::Duration;

use dhs_core::TransportState;
use dhs_dcss::messages::HtosNote;
use dhs_dcss::OperationHandlers;

use crate::harness::{connect, eventually, start_dhs, FakeDcss, CONNECTION, DHS_NAME};

#[tokio::test]
async fn test_v1_handshake() {
    let server = FakeDcss::bind().await;
    let dhs = start_dhs(OperationHandlers::new());
    let (_conn, mut peer) = connect(&dhs, &server).await;

    peer.send_v1("stoc_send_client_type").await;
    let (version, reply) = peer.recv_frame().await;
    assert_eq!(version, 1);
    assert_eq!(reply, format!("htos_client_is_hardware {DHS_NAME}"));

    dhs.shutdown();
    dhs.wait().await;
}

#[tokio::test]
async fn test_v2_peer_upgrades_write_framing() {
    let server = FakeDcss::bind().await;
    let dhs = start_dhs(OperationHandlers::new());
    let (_conn, mut peer) = connect(&dhs, &server).await;

    // Nothing read yet, so outbound framing is still v1.
    dhs.context()
        .send::<String, _>(CONNECTION, HtosNote { message: "early".into() })
        .unwrap();
    assert_eq!(peer.recv_frame().await, (1, "htos_note early".to_string()));

    peer.send_v2("stoc_send_client_type").await;
    let (version, reply) = peer.recv_frame().await;
    assert_eq!(version, 2);
    assert_eq!(reply, format!("htos_client_is_hardware {DHS_NAME}"));

    // Sticky: a later v1 frame from the peer does not downgrade.
    peer.send_v1("stoc_send_client_type").await;
    assert_eq!(peer.recv_frame().await.0, 2);

    dhs.shutdown();
    dhs.wait().await;
}

#[tokio::test]
async fn test_version_resets_on_new_socket() {
    let server = FakeDcss::bind().await;
    let dhs = start_dhs(OperationHandlers::new());
    let (conn, mut peer) = connect(&dhs, &server).await;

    peer.send_v2("stoc_send_client_type").await;
    assert_eq!(peer.recv_frame().await.0, 2);

    // Peer drops the socket; the transport reconnects with a fresh codec.
    drop(peer);
    let mut peer = server.accept().await;
    assert!(eventually(Duration::from_secs(2), || conn.state() == TransportState::Connected).await);

    peer.send_v1("stoc_send_client_type").await;
    assert_eq!(peer.recv_frame().await.0, 1);

    dhs.shutdown();
    dhs.wait().await;
}

#[tokio::test]
async fn test_unknown_messages_are_ignored() {
    let server = FakeDcss::bind().await;
    let dhs = start_dhs(OperationHandlers::new());
    let (_conn, mut peer) = connect(&dhs, &server).await;

    peer.send_v1("stoh_something_new a b c").await;
    peer.send_v1("stoh_register_operation").await;
    peer.send_v1("stoc_send_client_type").await;
    assert_eq!(peer.recv().await, format!("htos_client_is_hardware {DHS_NAME}"));

    dhs.shutdown();
    dhs.wait().await;
}
