//! Start operations answered without the image stream.

use std::io::Write;

use dhs_core::TransportState;

use crate::harness::{Setup, RECV_TIMEOUT};

#[tokio::test]
async fn test_hello_world() {
    let mut s = Setup::start(std::path::Path::new("unused.jpg")).await;

    s.peer.send("stoh_start_operation helloWorld 1.1").await;
    assert_eq!(s.peer.recv().await, "htos_operation_update helloWorld 1.1 working on things");
    assert_eq!(s.peer.recv().await, "htos_operation_completed helloWorld 1.1 normal h1");

    s.stop().await;
}

#[tokio::test]
async fn test_predict_one_completes_with_top_detection() {
    let mut image = tempfile::NamedTempFile::new().unwrap();
    image.write_all(b"\xff\xd8\xff\xe0nylon loop").unwrap();
    let mut s = Setup::start(image.path()).await;

    s.peer.send("stoh_start_operation predictOne 3.1").await;
    assert_eq!(
        s.peer.recv().await,
        "htos_operation_update predictOne 3.1 about to predict one test image"
    );
    assert_eq!(
        s.peer.recv().await,
        "htos_operation_completed predictOne 3.1 normal THE-TEST-IMAGE 0.97 0.1 0.2 0.5 0.6 mitegen"
    );
    assert_eq!(s.automl.keys(), vec!["THE-TEST-IMAGE".to_string()]);

    s.stop().await;
}

#[tokio::test]
async fn test_predict_one_without_image_fails() {
    let mut s = Setup::start(std::path::Path::new("/nonexistent/loop.jpg")).await;

    s.peer.send("stoh_start_operation predictOne 3.2").await;
    s.peer.recv().await;
    assert_eq!(
        s.peer.recv().await,
        "htos_operation_completed predictOne 3.2 error cannot read test image"
    );
    assert!(s.dhs.context().active_operations(None, None).is_empty());

    s.stop().await;
}

#[tokio::test]
async fn test_predict_one_fails_on_model_error() {
    let mut image = tempfile::NamedTempFile::new().unwrap();
    image.write_all(b"\xff\xd8\xff\xe0nylon loop").unwrap();
    let mut s = Setup::start(image.path()).await;
    s.automl.fail_predictions();

    s.peer.send("stoh_start_operation predictOne 3.3").await;
    s.peer.recv().await;
    assert_eq!(
        s.peer.recv().await,
        r#"htos_operation_completed predictOne 3.3 error automl returned 500: {"error":"model crashed"}"#
    );
    assert_eq!(s.automl.keys(), vec!["THE-TEST-IMAGE".to_string()]);
    assert!(s.dhs.context().active_operations(None, None).is_empty());

    s.stop().await;
}

#[tokio::test]
async fn test_predict_one_fails_when_automl_down() {
    let mut image = tempfile::NamedTempFile::new().unwrap();
    image.write_all(b"\xff\xd8\xff\xe0nylon loop").unwrap();
    let mut s = Setup::start(image.path()).await;
    let automl = s.dhs.context().handle(loop_dhs::AUTOML_CONN).unwrap();
    automl.disconnect();
    assert!(
        automl
            .control()
            .wait_for_state(TransportState::Disconnected, RECV_TIMEOUT)
            .await
    );

    s.peer.send("stoh_start_operation predictOne 3.4").await;
    s.peer.recv().await;
    assert_eq!(
        s.peer.recv().await,
        "htos_operation_completed predictOne 3.4 error automl not connected"
    );
    assert!(s.automl.keys().is_empty());
    assert!(s.dhs.context().active_operations(None, None).is_empty());

    s.stop().await;
}

#[tokio::test]
async fn test_loop_tip_and_info_not_implemented() {
    let mut s = Setup::start(std::path::Path::new("unused.jpg")).await;

    s.peer.send("stoh_start_operation getLoopTip 4.1 0").await;
    assert_eq!(
        s.peer.recv().await,
        "htos_operation_completed getLoopTip 4.1 failed not implemented"
    );
    s.peer.send("stoh_start_operation getLoopInfo 4.2").await;
    assert_eq!(
        s.peer.recv().await,
        "htos_operation_completed getLoopInfo 4.2 failed not implemented"
    );

    s.stop().await;
}
