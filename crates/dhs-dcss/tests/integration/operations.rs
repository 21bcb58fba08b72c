//! Start-operation routing and active operation bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use dhs_core::{ActiveOperation, HandlerError};
use dhs_dcss::messages::{HtosOperationCompleted, StohStartOperation};
use dhs_dcss::OperationHandlers;

use crate::harness::{connect, eventually, start_dhs, FakeDcss, TestContext, CONNECTION};

fn handlers() -> OperationHandlers<(), ()> {
    let mut ops = OperationHandlers::new();
    ops.register(
        "helloWorld",
        |msg: &StohStartOperation, _: &Arc<ActiveOperation<()>>, ctx: &TestContext| -> Result<(), HandlerError> {
            ctx.send::<String, _>(CONNECTION, msg.update("hello"))?;
            ctx.send::<String, _>(CONNECTION, msg.completed("world"))?;
            Ok(())
        },
    );
    // Left running until the test completes it.
    ops.register(
        "collectLoopImages",
        |msg: &StohStartOperation, _: &Arc<ActiveOperation<()>>, ctx: &TestContext| -> Result<(), HandlerError> {
            ctx.send::<String, _>(CONNECTION, msg.update("start_oscillation"))?;
            Ok(())
        },
    );
    ops
}

#[tokio::test]
async fn test_operation_update_then_completion() {
    let server = FakeDcss::bind().await;
    let dhs = start_dhs(handlers());
    let (_conn, mut peer) = connect(&dhs, &server).await;

    peer.send_v1("stoh_start_operation helloWorld 1.1").await;
    assert_eq!(peer.recv().await, "htos_operation_update helloWorld 1.1 hello");
    assert_eq!(peer.recv().await, "htos_operation_completed helloWorld 1.1 normal world");
    assert!(dhs.context().active_operations(Some("helloWorld"), None).is_empty());

    dhs.shutdown();
    dhs.wait().await;
}

#[tokio::test]
async fn test_active_operation_lifecycle() {
    let server = FakeDcss::bind().await;
    let dhs = start_dhs(handlers());
    let ctx = dhs.context().clone();
    let (_conn, mut peer) = connect(&dhs, &server).await;

    peer.send_v1("stoh_start_operation collectLoopImages 1.1").await;
    assert_eq!(peer.recv().await, "htos_operation_update collectLoopImages 1.1 start_oscillation");

    let active = ctx.active_operations(Some("collectLoopImages"), Some("1.1"));
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].trigger_as::<StohStartOperation>().unwrap().operation_handle, "1.1");

    ctx.send::<String, _>(CONNECTION, HtosOperationCompleted::normal("collectLoopImages", "1.1", ""))
        .unwrap();
    // Removed on enqueue, not on delivery.
    assert!(ctx.active_operations(Some("collectLoopImages"), Some("1.1")).is_empty());
    assert_eq!(peer.recv().await, "htos_operation_completed collectLoopImages 1.1 normal");

    dhs.shutdown();
    dhs.wait().await;
}

#[tokio::test]
async fn test_concurrent_operations_complete_independently() {
    let server = FakeDcss::bind().await;
    let dhs = start_dhs(handlers());
    let ctx = dhs.context().clone();
    let (_conn, mut peer) = connect(&dhs, &server).await;

    peer.send_v1("stoh_start_operation collectLoopImages 1.1").await;
    peer.send_v1("stoh_start_operation collectLoopImages 1.2").await;
    peer.recv().await;
    peer.recv().await;
    assert!(eventually(Duration::from_secs(1), || ctx.active_operations(Some("collectLoopImages"), None).len() == 2).await);

    ctx.send::<String, _>(CONNECTION, HtosOperationCompleted::normal("collectLoopImages", "1.2", ""))
        .unwrap();
    let left = ctx.active_operations(Some("collectLoopImages"), None);
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].handle(), "1.1");

    ctx.send::<String, _>(CONNECTION, HtosOperationCompleted::failed("collectLoopImages", "1.1", "aborted", ""))
        .unwrap();
    assert!(ctx.active_operations(None, None).is_empty());

    assert_eq!(peer.recv().await, "htos_operation_completed collectLoopImages 1.2 normal");
    assert_eq!(peer.recv().await, "htos_operation_completed collectLoopImages 1.1 aborted");

    dhs.shutdown();
    dhs.wait().await;
}

#[tokio::test]
async fn test_unregistered_operation_is_not_tracked() {
    let server = FakeDcss::bind().await;
    let dhs = start_dhs(handlers());
    let (_conn, mut peer) = connect(&dhs, &server).await;

    peer.send_v1("stoh_start_operation noSuchOperation 1.1").await;
    peer.send_v1("stoh_start_operation helloWorld 1.2").await;
    assert_eq!(peer.recv().await, "htos_operation_update helloWorld 1.2 hello");
    assert!(dhs.context().active_operations(None, None).is_empty());

    dhs.shutdown();
    dhs.wait().await;
}
