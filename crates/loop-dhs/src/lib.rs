//! Loop DHS: loop detection for sample centering.
//!
//! Connects to DCSS as a hardware server, receives the sample camera's
//! image stream and reports AutoML loop detections back as operation
//! updates. `main.rs` is a thin CLI over [`build`] and [`open_connections`].

pub mod config;
pub mod handlers;
pub mod state;

use std::sync::Arc;

use dhs_core::{Context, Dhs, DhsBuilder, MessageRegistry, TransportConfig};
use dhs_services::{automl, axis, image_receiver};

use crate::config::LoopConfig;
use crate::state::{LoopOperationState, LoopState};

pub const DCSS_CONN: &str = "dcss_conn";
pub const AUTOML_CONN: &str = "automl_conn";
pub const AXIS_CONN: &str = "axis_conn";
pub const JPEG_RECEIVER_CONN: &str = "jpeg_receiver_conn";

pub type LoopContext = Context<LoopState, LoopOperationState>;
pub type LoopDhs = Dhs<LoopState, LoopOperationState>;

/// Register every message kind, connection scheme and handler, then start
/// the dispatcher. No connection exists yet.
pub fn build(dhs_name: &str, config: &LoopConfig) -> anyhow::Result<LoopDhs> {
    let mut dcss = MessageRegistry::new();
    dhs_dcss::register_messages(&mut dcss)?;
    let mut http = MessageRegistry::new();
    automl::register_messages(&mut http)?;
    axis::register_messages(&mut http)?;
    let mut receiver = MessageRegistry::new();
    image_receiver::register_messages(&mut receiver)?;

    let dhs = DhsBuilder::new(dhs_name, LoopState::new(&config.automl.test_image))
        .connection_scheme(dhs_dcss::PROTOCOL, dhs_dcss::scheme(dhs_dcss::message_factory(&dcss)))
        .connection_scheme(automl::PROTOCOL, automl::scheme(&http))
        .connection_scheme(axis::PROTOCOL, axis::scheme(&http))
        .connection_scheme(image_receiver::PROTOCOL, image_receiver::scheme(&receiver))
        .blocking_timeout(config.transport.blocking_timeout())
        .handlers(handlers::register)
        .hook(Arc::new(handlers::operations().into_router()))
        .start();
    Ok(dhs)
}

/// Create the four connections and connect DCSS and AutoML. The image
/// receiver only listens while `collectLoopImages` runs.
pub fn open_connections(ctx: &LoopContext, config: &LoopConfig) -> anyhow::Result<()> {
    let transport: &TransportConfig = &config.transport;

    ctx.create_connection(DCSS_CONN, dhs_dcss::PROTOCOL, &config.dcss_url(), transport.clone())?
        .connect();
    ctx.create_connection(AUTOML_CONN, automl::PROTOCOL, &config.automl_url(), config.automl_transport())?
        .connect();
    ctx.create_connection(AXIS_CONN, axis::PROTOCOL, &config.axis_url(), transport.clone())?;
    ctx.create_connection(
        JPEG_RECEIVER_CONN,
        image_receiver::PROTOCOL,
        &config.jpeg_receiver_url(),
        transport.clone(),
    )?;
    Ok(())
}
