//! Raw HTTP exchange shapes shared by polling transports and HTTP servers.
//!
//! Outbound requests declare their request type id in a custom header; the
//! expected response type id is derived from it so replies can be routed to
//! a parser without a lookup table on the client side.

use bytes::Bytes;
use serde::de::DeserializeOwned;

pub const REQUEST_TYPE_HEADER: &str = "DHS-Request-Type-Id";
pub const RESPONSE_TYPE_HEADER: &str = "DHS-Response-Type-Id";

const REQUEST_SUFFIX: &str = "_request";
const RESPONSE_SUFFIX: &str = "_response";

/// `foo_request` -> `foo_response`; anything else gets `_response` appended.
pub fn response_type_for(request_type_id: &str) -> String {
    let stem = request_type_id
        .strip_suffix(REQUEST_SUFFIX)
        .unwrap_or(request_type_id);
    format!("{stem}{RESPONSE_SUFFIX}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// An outbound HTTP request, relative to the connection's base url.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub request_type_id: &'static str,
}

impl HttpRequest {
    pub fn get(request_type_id: &'static str, path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            request_type_id,
        }
    }

    pub fn post_json(
        request_type_id: &'static str,
        path: impl Into<String>,
        json: serde_json::Value,
    ) -> Self {
        Self {
            method: Method::Post,
            body: RequestBody::Json(json),
            ..Self::get(request_type_id, path)
        }
    }

    pub fn post_form(
        request_type_id: &'static str,
        path: impl Into<String>,
        form: Vec<(String, String)>,
    ) -> Self {
        Self {
            method: Method::Post,
            body: RequestBody::Form(form),
            ..Self::get(request_type_id, path)
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn response_type_id(&self) -> String {
        response_type_for(self.request_type_id)
    }
}

/// A completed HTTP exchange as seen by the message factory.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub response_type_id: Option<String>,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Type id extractor for factories over HTTP responses.
    pub fn type_id(raw: &HttpResponse) -> Option<&str> {
        raw.response_type_id.as_deref()
    }
}

/// An inbound request accepted by an embedded HTTP server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRequest {
    pub type_id: Option<&'static str>,
    pub method: String,
    pub path: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl ServerRequest {
    pub fn type_id(raw: &ServerRequest) -> Option<&str> {
        raw.type_id
    }
}
