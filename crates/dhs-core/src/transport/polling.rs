//! HTTP client transport.
//!
//! There is no persistent socket: "connected" means the last liveness probe
//! succeeded. `send` performs the whole exchange and parks the response in
//! an internal queue for `receive`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse, Method, RequestBody, REQUEST_TYPE_HEADER, RESPONSE_TYPE_HEADER};
use crate::queue::BlockingQueue;
use crate::transport::link::{LinkDriver, LinkWorker};
use crate::transport::{Transport, TransportControl};
use crate::worker::Worker;

pub struct PollingTransport {
    control: Arc<TransportControl>,
    base: Url,
    client: Client,
    config: TransportConfig,
    responses: BlockingQueue<HttpResponse>,
}

impl PollingTransport {
    pub fn new(name: impl Into<String>, base: Url, config: TransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            control: Arc::new(TransportControl::new(name)),
            base,
            client,
            config,
            responses: BlockingQueue::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn heartbeat_url(&self) -> Result<Url, TransportError> {
        match &self.config.heartbeat_path {
            Some(path) => join(&self.base, path),
            None => Ok(self.base.clone()),
        }
    }

    fn build(&self, req: &HttpRequest) -> Result<reqwest::RequestBuilder, TransportError> {
        let url = join(&self.base, &req.path)?;
        let builder = match req.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        let builder = builder
            .query(&req.query)
            .header(REQUEST_TYPE_HEADER, req.request_type_id)
            .header(RESPONSE_TYPE_HEADER, req.response_type_id());
        Ok(match &req.body {
            RequestBody::Empty => builder,
            RequestBody::Json(json) => builder.json(json),
            RequestBody::Form(form) => builder.form(form),
        })
    }
}

fn join(base: &Url, path: &str) -> Result<Url, TransportError> {
    base.join(path)
        .map_err(|e| TransportError::Codec(format!("invalid path {path}: {e}")))
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() || err.is_request() {
        TransportError::ConnectionAborted(err.to_string())
    } else {
        TransportError::Http(err)
    }
}

struct Probe {
    client: Client,
    url: Url,
    interval: Duration,
}

impl Probe {
    async fn get(&self) -> Result<(), TransportError> {
        tracing::debug!(url = %self.url, "probing");
        let resp = self.client.get(self.url.clone()).send().await.map_err(classify)?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::ConnectionAborted(format!(
                "probe returned {}",
                resp.status()
            )))
        }
    }
}

#[async_trait::async_trait]
impl LinkDriver for Probe {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.get().await
    }

    async fn close(&mut self) {}

    fn heartbeat_interval(&self) -> Option<Duration> {
        Some(self.interval)
    }

    async fn probe(&mut self) -> Result<(), TransportError> {
        self.get().await
    }
}

#[async_trait::async_trait]
impl Transport for PollingTransport {
    type Raw = HttpResponse;
    type Wire = HttpRequest;

    const HOLD_WHILE_DISCONNECTED: bool = false;

    fn control(&self) -> &Arc<TransportControl> {
        &self.control
    }

    fn start(self: Arc<Self>, cancel: &CancellationToken) -> Worker {
        let url = self.heartbeat_url().unwrap_or_else(|e| {
            tracing::warn!(connection = %self.control.name(), "bad heartbeat path, probing base url: {e}");
            self.base.clone()
        });
        let probe = Probe {
            client: self.client.clone(),
            url,
            interval: self.config.heartbeat_delay(),
        };
        Worker::spawn(
            format!("{} link", self.control.name()),
            cancel,
            LinkWorker::new(self.control.clone(), self.config.clone(), probe),
        )
    }

    async fn send(&self, req: HttpRequest) -> Result<(), TransportError> {
        if !self.control.is_connected() {
            tracing::warn!(
                connection = %self.control.name(),
                type_id = req.request_type_id,
                "not connected, request not sent"
            );
            return Err(TransportError::NotConnected);
        }

        let response_type_id = req.response_type_id();
        let resp = self.build(&req)?.send().await.map_err(classify)?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes().await.map_err(classify)?;
        tracing::debug!(
            connection = %self.control.name(),
            type_id = %response_type_id,
            status,
            bytes = body.len(),
            "response received"
        );
        self.responses.enqueue(HttpResponse {
            response_type_id: Some(response_type_id),
            status,
            content_type,
            body,
        });
        Ok(())
    }

    async fn receive(&self) -> Result<HttpResponse, TransportError> {
        Ok(self.responses.fetch(self.config.blocking_timeout()).await?)
    }
}
