//! What a route handler receives and what it may return.

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use storefront_transport::{ApiError, HttpClient, ResponseEnvelope};

/// Upper bound on inbound bodies read by `RouteRequest`.
pub const BODY_LIMIT: usize = 2 * 1024 * 1024;

/// The inbound request, with its body still unread.
#[derive(Debug)]
pub struct RouteRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Resolved dynamic path segments, by parameter name.
    pub params: HashMap<String, String>,
    pub body: Body,
}

impl RouteRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub async fn bytes(self) -> Result<Bytes, ApiError> {
        axum::body::to_bytes(self.body, BODY_LIMIT)
            .await
            .map_err(|e| ApiError::status(400, format!("unreadable request body: {e}")))
    }

    /// Decode the body as JSON. Malformed input is a 400.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::status(400, format!("invalid JSON body: {e}")))
    }
}

/// Everything a handler gets: an upstream client that speaks for the
/// caller, the request, and its method.
#[derive(Debug)]
pub struct RouteContext {
    pub api: HttpClient,
    pub req: RouteRequest,
    pub method: Method,
}

/// A handler's answer. Which fields are set decides the response shape:
/// `xml` + `status` writes raw XML, no `data` ends with an empty body, and
/// `data` is serialized as JSON.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteReply {
    pub data: Option<Value>,
    pub status: Option<StatusCode>,
    pub headers: Option<HeaderMap>,
    pub xml: Option<String>,
}

impl RouteReply {
    pub fn json(status: StatusCode, data: Value) -> Self {
        Self {
            data: Some(data),
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn xml(status: StatusCode, xml: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            xml: Some(xml.into()),
            ..Default::default()
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Relay an upstream response: its payload, status and headers (the
    /// latter so `Set-Cookie` reaches the browser).
    pub fn from_envelope(envelope: &ResponseEnvelope) -> Self {
        Self {
            data: Some(envelope.data.to_value()),
            status: StatusCode::from_u16(envelope.status).ok(),
            headers: Some(envelope.headers.clone()),
            xml: None,
        }
    }
}
