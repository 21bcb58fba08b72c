//! Image streaming through AutoML while `collectLoopImages` runs.

use std::time::Duration;

use dhs_core::TransportState;
use loop_dhs::JPEG_RECEIVER_CONN;

use crate::harness::{Setup, RECV_TIMEOUT};

const JPEG: &[u8] = b"\xff\xd8\xff\xe0fake jpeg";
const LOOP_INFO_1: &str = "LOOP_INFO 1 normal 0.5 0.2 0.111 0.222 0.4 0.1 0.5 0.6 0.2 0.4 1";

#[tokio::test]
async fn test_collect_rebox_and_stop() {
    let mut s = Setup::start(std::path::Path::new("unused.jpg")).await;
    let ctx = s.dhs.context().clone();

    s.peer.send("stoh_start_operation collectLoopImages 1.1 0").await;
    assert_eq!(
        s.peer.recv().await,
        "htos_operation_update collectLoopImages 1.1 start_oscillation"
    );

    assert_eq!(s.post_image(JPEG).await, 200);
    assert_eq!(
        s.peer.recv().await,
        format!("htos_operation_update collectLoopImages 1.1 {LOOP_INFO_1}")
    );
    let keys = s.automl.keys();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].len(), 12);
    assert_eq!(ctx.state().images().number_of_images(), 1);

    s.peer.send("stoh_start_operation reboxLoopImage 1.2 1 0.51 0.56").await;
    assert_eq!(
        s.peer.recv().await,
        "htos_operation_completed reboxLoopImage 1.2 normal 1 0.2 0.6 0.4"
    );

    s.peer.send("stoh_start_operation reboxLoopImage 1.3 9 0.51 0.56").await;
    assert_eq!(
        s.peer.recv().await,
        "htos_operation_completed reboxLoopImage 1.3 error no result for image 9"
    );

    s.peer.send("stoh_start_operation stopCollectLoopImages 1.4").await;
    assert_eq!(
        s.peer.recv().await,
        "htos_operation_completed stopCollectLoopImages 1.4 normal flag set"
    );
    assert_eq!(
        s.peer.recv().await,
        "htos_operation_completed collectLoopImages 1.1 normal done"
    );
    assert!(ctx.active_operations(None, None).is_empty());
    assert!(ctx.state().is_stopped());

    let receiver = ctx.handle(JPEG_RECEIVER_CONN).unwrap();
    assert!(
        receiver
            .control()
            .wait_for_state(TransportState::Disconnected, RECV_TIMEOUT)
            .await
    );

    s.stop().await;
}

#[tokio::test]
async fn test_images_after_stop_are_not_analysed() {
    let mut s = Setup::start(std::path::Path::new("unused.jpg")).await;
    let ctx = s.dhs.context().clone();

    s.peer.send("stoh_start_operation collectLoopImages 2.1").await;
    assert_eq!(
        s.peer.recv().await,
        "htos_operation_update collectLoopImages 2.1 start_oscillation"
    );
    ctx.state().set_stopped(true);

    assert_eq!(s.post_image(JPEG).await, 200);
    // Stored for rebox, never sent to AutoML.
    let stored = crate::harness::eventually(RECV_TIMEOUT, || ctx.state().images().number_of_images() == 1).await;
    assert!(stored);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(s.automl.keys().is_empty());

    s.stop().await;
}
