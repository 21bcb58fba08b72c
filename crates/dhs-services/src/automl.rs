//! Object detection through an AutoML edge model served over HTTP.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use dhs_core::http::{HttpRequest, HttpResponse};
use dhs_core::{ConnectionFactory, Inbound, MessageFactory, MessageKind, MessageRegistry, Outbound, Parse, RegistryError};
use serde::Deserialize;
use serde_json::json;

pub const PROTOCOL: &str = "automl";
pub const PREDICT_PATH: &str = "/v1/models/default:predict";
/// Liveness path of the model server.
pub const HEALTH_PATH: &str = "/v1/models/default";

const MAX_BOUNDING_BOX_COUNT: &str = "10";

/// Send one image for prediction. `key` comes back in the response.
#[derive(Debug, Clone)]
pub struct AutomlPredictRequest {
    pub key: String,
    pub image: Bytes,
}

impl AutomlPredictRequest {
    pub fn new(key: impl Into<String>, image: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            image: image.into(),
        }
    }
}

impl MessageKind for AutomlPredictRequest {
    const TYPE_ID: &'static str = "automl_predict_request";
}

impl Outbound<HttpRequest> for AutomlPredictRequest {
    fn message_type(&self) -> &'static str {
        Self::TYPE_ID
    }

    fn write(&self) -> HttpRequest {
        let body = json!({
            "instances": [{
                "image_bytes": { "b64": STANDARD.encode(&self.image) },
                "key": self.key,
            }],
            "params": [{ "max_bounding_box_count": MAX_BOUNDING_BOX_COUNT }],
        });
        HttpRequest::post_json(Self::TYPE_ID, PREDICT_PATH, body)
    }
}

/// Box corners normalised to the image, origin top left:
/// `[min_y, min_x, max_y, max_x]`.
pub type BoundingBox = [f64; 4];

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Prediction {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub detection_scores: Vec<f64>,
    #[serde(default)]
    pub detection_boxes: Vec<BoundingBox>,
    #[serde(default)]
    pub detection_classes: Vec<f64>,
    #[serde(default)]
    pub detection_classes_as_text: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection<'a> {
    pub score: f64,
    pub bbox: BoundingBox,
    pub class: &'a str,
}

#[derive(Debug, Deserialize)]
struct PredictBody {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

/// Detections for one image, sorted by descending score.
///
/// A failed exchange still yields a response so whoever waits on it can be
/// answered: `error` is set and the prediction is empty, key included.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomlPredictResponse {
    pub status: u16,
    pub prediction: Prediction,
    pub error: Option<String>,
}

impl AutomlPredictResponse {
    fn failure(status: u16, error: impl Into<String>) -> Self {
        Self {
            status,
            prediction: Prediction::default(),
            error: Some(error.into()),
        }
    }

    pub fn key(&self) -> &str {
        &self.prediction.key
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The `n`th detection, if every field is present for it.
    pub fn detection(&self, n: usize) -> Option<Detection<'_>> {
        let p = &self.prediction;
        Some(Detection {
            score: *p.detection_scores.get(n)?,
            bbox: *p.detection_boxes.get(n)?,
            class: p.detection_classes_as_text.get(n)?,
        })
    }

    pub fn top(&self) -> Option<Detection<'_>> {
        self.detection(0)
    }

    pub fn top_score(&self) -> Option<f64> {
        self.top().map(|d| d.score)
    }

    pub fn top_box(&self) -> Option<BoundingBox> {
        self.top().map(|d| d.bbox)
    }

    pub fn top_classification(&self) -> Option<&str> {
        self.top().map(|d| d.class)
    }
}

impl MessageKind for AutomlPredictResponse {
    const TYPE_ID: &'static str = "automl_predict_response";
}

impl Inbound for AutomlPredictResponse {
    fn message_type(&self) -> &'static str {
        Self::TYPE_ID
    }
}

impl Parse<HttpResponse> for AutomlPredictResponse {
    fn parse(raw: &HttpResponse) -> Option<Self> {
        if !raw.is_success() {
            tracing::warn!(status = raw.status, "prediction request failed");
            let detail = String::from_utf8_lossy(&raw.body);
            let error = match detail.trim() {
                "" => format!("automl returned {}", raw.status),
                detail => format!("automl returned {}: {detail}", raw.status),
            };
            return Some(Self::failure(raw.status, error));
        }
        let body: PredictBody = match raw.json() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("unreadable prediction response: {e}");
                return Some(Self::failure(raw.status, "unreadable automl response"));
            }
        };
        match body.predictions.into_iter().next() {
            Some(prediction) => Some(Self {
                status: raw.status,
                prediction,
                error: None,
            }),
            None => Some(Self::failure(raw.status, "automl returned no predictions")),
        }
    }
}

pub fn register_messages(registry: &mut MessageRegistry<HttpResponse>) -> Result<(), RegistryError> {
    registry.register::<AutomlPredictResponse>(PROTOCOL)
}

pub fn message_factory(registry: &MessageRegistry<HttpResponse>) -> MessageFactory<HttpResponse> {
    registry.factory(PROTOCOL, HttpResponse::type_id)
}

/// Connection factory for the AutoML model server.
pub fn scheme<P: Send + 'static>(registry: &MessageRegistry<HttpResponse>) -> ConnectionFactory<P> {
    crate::http_scheme(message_factory(registry))
}
