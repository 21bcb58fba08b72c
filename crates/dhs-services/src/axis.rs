//! Still images from an Axis video server.

use bytes::Bytes;
use dhs_core::http::{HttpRequest, HttpResponse};
use dhs_core::{ConnectionFactory, Inbound, MessageFactory, MessageKind, MessageRegistry, Outbound, Parse, RegistryError};

pub const PROTOCOL: &str = "axis";
pub const IMAGE_PATH: &str = "/axis-cgi/jpg/image.cgi";

/// Grab one JPEG from `camera`.
#[derive(Debug, Clone)]
pub struct AxisImageRequest {
    pub camera: String,
}

impl AxisImageRequest {
    pub fn new(camera: impl Into<String>) -> Self {
        Self { camera: camera.into() }
    }
}

impl MessageKind for AxisImageRequest {
    const TYPE_ID: &'static str = "axis_image_request";
}

impl Outbound<HttpRequest> for AxisImageRequest {
    fn message_type(&self) -> &'static str {
        Self::TYPE_ID
    }

    fn write(&self) -> HttpRequest {
        HttpRequest::get(Self::TYPE_ID, IMAGE_PATH).with_query("camera", &self.camera)
    }
}

#[derive(Debug, Clone)]
pub struct AxisImageResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub image: Bytes,
}

impl AxisImageResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl MessageKind for AxisImageResponse {
    const TYPE_ID: &'static str = "axis_image_response";
}

impl Inbound for AxisImageResponse {
    fn message_type(&self) -> &'static str {
        Self::TYPE_ID
    }
}

impl Parse<HttpResponse> for AxisImageResponse {
    fn parse(raw: &HttpResponse) -> Option<Self> {
        Some(Self {
            status: raw.status,
            content_type: raw.content_type.clone(),
            image: raw.body.clone(),
        })
    }
}

pub fn register_messages(registry: &mut MessageRegistry<HttpResponse>) -> Result<(), RegistryError> {
    registry.register::<AxisImageResponse>(PROTOCOL)
}

pub fn message_factory(registry: &MessageRegistry<HttpResponse>) -> MessageFactory<HttpResponse> {
    registry.factory(PROTOCOL, HttpResponse::type_id)
}

/// Connection factory for an Axis video server.
pub fn scheme<P: Send + 'static>(registry: &MessageRegistry<HttpResponse>) -> ConnectionFactory<P> {
    crate::http_scheme(message_factory(registry))
}
