//! Fake DCSS and AutoML peers around a loop DHS started from config.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::Json;
use dhs_core::{TransportConfig, TransportState};
use loop_dhs::config::{AutomlSection, Endpoint, LoopConfig};
use loop_dhs::LoopDhs;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const DHS_NAME: &str = "loop";
pub const RECV_TIMEOUT: Duration = Duration::from_secs(3);
const V1_FRAME_SIZE: usize = 200;

/// Listens on an ephemeral port; the DHS only ever sees v1 frames from it.
pub struct FakeDcss {
    listener: TcpListener,
    pub port: u16,
}

impl FakeDcss {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self { listener, port }
    }

    pub async fn accept(&self) -> Peer {
        let (sock, _) = tokio::time::timeout(RECV_TIMEOUT, self.listener.accept())
            .await
            .expect("dhs did not connect")
            .unwrap();
        Peer { sock }
    }
}

pub struct Peer {
    sock: TcpStream,
}

impl Peer {
    pub async fn send(&mut self, text: &str) {
        let mut frame = text.as_bytes().to_vec();
        frame.resize(V1_FRAME_SIZE, 0);
        self.sock.write_all(&frame).await.unwrap();
    }

    pub async fn recv(&mut self) -> String {
        let mut frame = [0u8; V1_FRAME_SIZE];
        tokio::time::timeout(RECV_TIMEOUT, self.sock.read_exact(&mut frame))
            .await
            .expect("no frame from dhs")
            .unwrap();
        String::from_utf8_lossy(&frame).trim_end_matches('\0').to_string()
    }
}

/// Model server answering every prediction with one fixed detection, or
/// with a 500 once `fail_predictions` is called.
pub struct FakeAutoml {
    pub port: u16,
    model: ModelState,
}

#[derive(Clone, Default)]
struct ModelState {
    keys: Arc<Mutex<Vec<String>>>,
    failing: Arc<AtomicBool>,
}

pub const DETECTION_BOX: [f64; 4] = [0.1, 0.2, 0.5, 0.6];

async fn model(
    State(model): State<ModelState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if method != Method::POST {
        return (StatusCode::OK, Json(json!({"model_version_status": []})));
    }
    assert_eq!(uri.path(), "/v1/models/default:predict");
    let request: Value = serde_json::from_slice(&body).unwrap();
    let key = request["instances"][0]["key"].as_str().unwrap().to_string();
    model.keys.lock().unwrap().push(key.clone());
    if model.failing.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "model crashed"})));
    }
    let prediction = json!({"predictions": [{
        "key": key,
        "detection_scores": [0.97],
        "detection_boxes": [DETECTION_BOX],
        "detection_classes": [1.0],
        "detection_classes_as_text": ["mitegen"],
    }]});
    (StatusCode::OK, Json(prediction))
}

impl FakeAutoml {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let model = ModelState::default();
        let app = axum::Router::new().fallback(self::model).with_state(model.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { port, model }
    }

    pub fn keys(&self) -> Vec<String> {
        self.model.keys.lock().unwrap().clone()
    }

    /// Answer every later prediction with a server error.
    pub fn fail_predictions(&self) {
        self.model.failing.store(true, Ordering::SeqCst);
    }
}

/// A port nothing listens on right now.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn config(dcss: &FakeDcss, automl: &FakeAutoml, receiver_port: u16, test_image: &std::path::Path) -> LoopConfig {
    LoopConfig {
        dcss: Endpoint {
            host: "127.0.0.1".into(),
            port: dcss.port,
        },
        automl: AutomlSection {
            host: "127.0.0.1".into(),
            port: automl.port,
            heartbeat_path: "/v1/models/default".into(),
            test_image: test_image.to_path_buf(),
        },
        axis: Endpoint {
            host: "127.0.0.1".into(),
            port: 9,
        },
        jpeg_receiver: Endpoint {
            host: "127.0.0.1".into(),
            port: receiver_port,
        },
        transport: TransportConfig::fast(),
    }
}

/// A running DHS with a handshaken DCSS peer and AutoML reachable.
pub struct Setup {
    pub dhs: LoopDhs,
    pub peer: Peer,
    pub automl: FakeAutoml,
    pub receiver_port: u16,
    _dcss: FakeDcss,
}

impl Setup {
    pub async fn start(test_image: &std::path::Path) -> Self {
        let dcss = FakeDcss::bind().await;
        let automl = FakeAutoml::start().await;
        let receiver_port = free_port().await;
        let cfg = config(&dcss, &automl, receiver_port, test_image);

        let dhs = loop_dhs::build(DHS_NAME, &cfg).unwrap();
        loop_dhs::open_connections(dhs.context(), &cfg).unwrap();

        let mut peer = dcss.accept().await;
        peer.send("stoc_send_client_type").await;
        assert_eq!(peer.recv().await, format!("htos_client_is_hardware {DHS_NAME}"));

        let automl_conn = dhs.context().handle(loop_dhs::AUTOML_CONN).unwrap();
        assert!(
            automl_conn
                .control()
                .wait_for_state(TransportState::Connected, RECV_TIMEOUT)
                .await
        );
        Self {
            dhs,
            peer,
            automl,
            receiver_port,
            _dcss: dcss,
        }
    }

    pub async fn post_image(&self, image: &'static [u8]) -> reqwest::StatusCode {
        reqwest::Client::new()
            .post(format!("http://127.0.0.1:{}/image", self.receiver_port))
            .header("content-type", "image/jpeg")
            .body(image)
            .send()
            .await
            .unwrap()
            .status()
    }

    pub async fn stop(self) {
        self.dhs.shutdown();
        self.dhs.wait().await;
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
