//! Message and start-operation handlers of the loop DHS.
//!
//! `collectLoopImages` opens the image receiver and asks DCSS to start
//! oscillating the sample. Each image posted by the video server is stored
//! and forwarded to AutoML; each prediction that comes back is turned into a
//! `LOOP_INFO` update on every active `collectLoopImages`.
//! `stopCollectLoopImages` closes the receiver and completes them.

use std::sync::Arc;
use std::time::Duration;

use dhs_core::http::HttpRequest;
use dhs_core::{ActiveOperation, HandlerRegistry, Outbound, TransportState};
use dhs_dcss::messages::{
    HtosClientIsHardware, HtosOperationCompleted, HtosOperationUpdate, StocSendClientType, StohRegisterOperation,
    StohStartOperation,
};
use dhs_dcss::OperationHandlers;
use dhs_services::automl::{AutomlPredictRequest, AutomlPredictResponse};
use dhs_services::image_receiver::ImagePostRequest;
use rand::Rng;

use crate::state::{LoopInfo, LoopOperationState, LoopState};
use crate::{LoopContext, AUTOML_CONN, DCSS_CONN, JPEG_RECEIVER_CONN};

pub const HELLO_WORLD: &str = "helloWorld";
pub const PREDICT_ONE: &str = "predictOne";
pub const COLLECT_LOOP_IMAGES: &str = "collectLoopImages";
pub const STOP_COLLECT_LOOP_IMAGES: &str = "stopCollectLoopImages";
pub const REBOX_LOOP_IMAGE: &str = "reboxLoopImage";
pub const GET_LOOP_TIP: &str = "getLoopTip";
pub const GET_LOOP_INFO: &str = "getLoopInfo";

const PREDICT_ONE_KEY: &str = "THE-TEST-IMAGE";
const IMAGE_KEY_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const IMAGE_KEY_LEN: usize = 12;
const RECEIVER_START_TIMEOUT: Duration = Duration::from_secs(5);

type LoopOperation = Arc<ActiveOperation<LoopOperationState>>;

/// Register the message handlers on the default dispatcher.
pub fn register(h: &mut HandlerRegistry<LoopContext>) {
    h.register(send_client_type)
        .register(register_operation)
        .register(automl_predict_response)
        .register(image_post);
}

/// Start-operation handlers keyed by DCSS operation name.
pub fn operations() -> OperationHandlers<LoopState, LoopOperationState> {
    let mut ops = OperationHandlers::new();
    ops.register(HELLO_WORLD, hello_world)
        .register(PREDICT_ONE, predict_one)
        .register(COLLECT_LOOP_IMAGES, collect_loop_images)
        .register(STOP_COLLECT_LOOP_IMAGES, stop_collect_loop_images)
        .register(REBOX_LOOP_IMAGE, rebox_loop_image)
        .register(GET_LOOP_TIP, not_implemented)
        .register(GET_LOOP_INFO, not_implemented);
    ops
}

fn send_dcss(ctx: &LoopContext, msg: impl Outbound<String>) -> anyhow::Result<()> {
    ctx.send::<String, _>(DCSS_CONN, msg)?;
    Ok(())
}

fn random_image_key() -> String {
    let mut rng = rand::thread_rng();
    (0..IMAGE_KEY_LEN)
        .map(|_| IMAGE_KEY_CHARSET[rng.gen_range(0..IMAGE_KEY_CHARSET.len())] as char)
        .collect()
}

fn send_client_type(_: &StocSendClientType, ctx: &LoopContext) -> anyhow::Result<()> {
    send_dcss(ctx, HtosClientIsHardware::new(ctx.name()))
}

fn register_operation(msg: &StohRegisterOperation, _: &LoopContext) -> anyhow::Result<()> {
    tracing::info!(operation = %msg.operation_name, hardware = %msg.hardware_name, "operation registered");
    Ok(())
}

fn hello_world(msg: &StohStartOperation, _: &LoopOperation, ctx: &LoopContext) -> anyhow::Result<()> {
    send_dcss(ctx, msg.update("working on things"))?;
    send_dcss(ctx, msg.completed("h1"))
}

/// Send the configured test image to AutoML; the response completes the operation.
fn predict_one(msg: &StohStartOperation, op: &LoopOperation, ctx: &LoopContext) -> anyhow::Result<()> {
    send_dcss(ctx, msg.update("about to predict one test image"))?;
    if ctx.handle(AUTOML_CONN)?.state() != TransportState::Connected {
        tracing::warn!(connection = AUTOML_CONN, "automl not connected, cannot predict");
        return send_dcss(ctx, msg.failed("error", "automl not connected"));
    }

    // The image is read off the dispatcher so other messages keep flowing.
    let (msg, op, ctx) = (msg.clone(), op.clone(), ctx.clone());
    tokio::spawn(async move {
        if let Err(e) = request_test_prediction(&msg, &op, &ctx).await {
            tracing::error!(handle = %msg.operation_handle, "cannot answer predictOne: {e}");
        }
    });
    Ok(())
}

async fn request_test_prediction(msg: &StohStartOperation, op: &LoopOperation, ctx: &LoopContext) -> anyhow::Result<()> {
    let path = ctx.state().test_image();
    let image = match tokio::fs::read(path).await {
        Ok(image) => image,
        Err(e) => {
            tracing::error!(image = %path.display(), "cannot read test image: {e}");
            return send_dcss(ctx, msg.failed("error", "cannot read test image"));
        }
    };
    *op.state() = LoopOperationState::Predicting {
        key: PREDICT_ONE_KEY.into(),
    };
    if let Err(e) = ctx.send::<HttpRequest, _>(AUTOML_CONN, AutomlPredictRequest::new(PREDICT_ONE_KEY, image)) {
        tracing::error!(connection = AUTOML_CONN, "cannot queue prediction: {e}");
        return send_dcss(ctx, msg.failed("error", "cannot send to automl"));
    }
    Ok(())
}

fn collect_loop_images(msg: &StohStartOperation, op: &LoopOperation, ctx: &LoopContext) -> anyhow::Result<()> {
    tracing::info!(handle = %msg.operation_handle, args = ?msg.args, "collecting loop images");
    ctx.state().reset_images();
    ctx.state().set_stopped(false);
    *op.state() = LoopOperationState::Collecting { images: 0 };

    let receiver = ctx.handle(JPEG_RECEIVER_CONN)?;
    receiver.connect();

    // DCSS starts the video stream on this update, so hold it until the receiver listens.
    let ctx = ctx.clone();
    let msg = msg.clone();
    tokio::spawn(async move {
        let listening = receiver
            .control()
            .wait_for_state(TransportState::Connected, RECEIVER_START_TIMEOUT)
            .await;
        let reply = if listening {
            send_dcss(&ctx, msg.update("start_oscillation"))
        } else {
            tracing::error!(connection = JPEG_RECEIVER_CONN, "image receiver did not start");
            send_dcss(&ctx, msg.failed("error", "image receiver not listening"))
        };
        if let Err(e) = reply {
            tracing::error!(handle = %msg.operation_handle, "cannot answer collectLoopImages: {e}");
        }
    });
    Ok(())
}

fn stop_collect_loop_images(msg: &StohStartOperation, _: &LoopOperation, ctx: &LoopContext) -> anyhow::Result<()> {
    ctx.state().set_stopped(true);
    ctx.handle(JPEG_RECEIVER_CONN)?.disconnect();
    send_dcss(ctx, msg.completed("flag set"))?;

    for op in ctx.active_operations(Some(COLLECT_LOOP_IMAGES), None) {
        let images = match *op.state() {
            LoopOperationState::Collecting { images } => images,
            _ => 0,
        };
        tracing::info!(handle = %op.handle(), images, "collectLoopImages done");
        send_dcss(ctx, HtosOperationCompleted::normal(COLLECT_LOOP_IMAGES, op.handle(), "done"))?;
    }
    Ok(())
}

/// Answer with the stored result for the image index in the first argument.
fn rebox_loop_image(msg: &StohStartOperation, _: &LoopOperation, ctx: &LoopContext) -> anyhow::Result<()> {
    let Some(index) = msg.args.first().and_then(|a| a.parse::<usize>().ok()) else {
        return send_dcss(ctx, msg.failed("error", "missing image index"));
    };
    let result = ctx.state().images().result(index).map(LoopInfo::rebox);
    match result {
        Some(rebox) => {
            tracing::info!(index, result = %rebox, "rebox");
            send_dcss(ctx, msg.completed(rebox))
        }
        None => send_dcss(ctx, msg.failed("error", format!("no result for image {index}"))),
    }
}

fn not_implemented(msg: &StohStartOperation, _: &LoopOperation, ctx: &LoopContext) -> anyhow::Result<()> {
    tracing::warn!(operation = %msg.operation_name, "operation not implemented");
    send_dcss(ctx, msg.failed("failed", "not implemented"))
}

/// Whether `op` is a `predictOne` waiting on this response. Failed exchanges
/// carry no key and answer every waiting prediction.
fn awaits(op: &LoopOperation, msg: &AutomlPredictResponse) -> bool {
    match &*op.state() {
        LoopOperationState::Predicting { key } => msg.error().is_some() || key == msg.key(),
        _ => false,
    }
}

fn automl_predict_response(msg: &AutomlPredictResponse, ctx: &LoopContext) -> anyhow::Result<()> {
    let top = msg.top();

    for op in ctx.active_operations(Some(PREDICT_ONE), None) {
        if !awaits(&op, msg) {
            continue;
        }
        let reply = match (msg.error(), &top) {
            (Some(error), _) => HtosOperationCompleted::failed(PREDICT_ONE, op.handle(), "error", error),
            (None, Some(top)) => {
                let [b0, b1, b2, b3] = top.bbox;
                let result = format!("{} {} {b0} {b1} {b2} {b3} {}", msg.key(), top.score, top.class);
                tracing::info!(handle = %op.handle(), %result, "prediction");
                HtosOperationCompleted::normal(PREDICT_ONE, op.handle(), result)
            }
            (None, None) => HtosOperationCompleted::failed(PREDICT_ONE, op.handle(), "error", "no detections"),
        };
        send_dcss(ctx, reply)?;
    }

    if let Some(error) = msg.error() {
        tracing::warn!(status = msg.status, "prediction failed: {error}");
        return Ok(());
    }
    let Some(top) = top else {
        tracing::info!(key = %msg.key(), "prediction without detections");
        return Ok(());
    };
    if ctx.state().is_stopped() {
        return Ok(());
    }
    let collecting = ctx.active_operations(Some(COLLECT_LOOP_IMAGES), None);
    if collecting.is_empty() {
        return Ok(());
    }
    let info = {
        let mut images = ctx.state().images();
        let info = LoopInfo::from_detection(images.number_of_images(), &top);
        images.add_result(info.clone());
        info
    };
    tracing::debug!(key = %msg.key(), %info, "loop info");
    for op in collecting {
        send_dcss(ctx, HtosOperationUpdate::new(COLLECT_LOOP_IMAGES, op.handle(), info.to_string()))?;
    }
    Ok(())
}

/// Store the posted image for the active collection and forward it to AutoML.
fn image_post(msg: &ImagePostRequest, ctx: &LoopContext) -> anyhow::Result<()> {
    let collecting = ctx.active_operations(Some(COLLECT_LOOP_IMAGES), None);
    if !collecting.is_empty() {
        ctx.state().images().add_image(msg.image.clone());
        for op in &collecting {
            if let LoopOperationState::Collecting { images } = &mut *op.state() {
                *images += 1;
            }
        }
    }
    tracing::debug!(bytes = msg.image.len(), collecting = collecting.len(), "image received");

    if ctx.state().is_stopped() {
        return Ok(());
    }
    ctx.send::<HttpRequest, _>(AUTOML_CONN, AutomlPredictRequest::new(random_image_key(), msg.image.clone()))?;
    Ok(())
}
