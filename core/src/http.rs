//! HTTP transport types shared by the fetch primitive and the client.
//!
//! # Design
//! `FetchRequest` / `RawResponse` describe one physical attempt and are what
//! a `Fetch` implementation consumes and produces. `RequestOptions` and
//! `ResponseEnvelope` are the caller-facing shapes: options are merged from
//! instance defaults and per-call config, and every completed request comes
//! back wrapped in an envelope.
//!
//! Headers use `http::HeaderMap`, so name lookups are case-insensitive.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use http::HeaderMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{ApiError, FetchError};

/// Raw response body as a stream of chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send>>;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    #[default]
    Get,
    Put,
    Patch,
    Post,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for http::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Patch => http::Method::PATCH,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Delete => http::Method::DELETE,
        }
    }
}

/// How the response body is read into `ResponseEnvelope::data`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
    #[default]
    Text,
    Json,
    Stream,
    Blob,
    ArrayBuffer,
    FormData,
}

/// Request payload.
///
/// `Json` values are encoded by the client and get an
/// `application/json` content type. `Raw` bytes (binary uploads,
/// pre-encoded multipart forms) are sent untouched with whatever
/// content type the caller set.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Raw(Bytes),
}

impl From<Value> for RequestBody {
    fn from(value: Value) -> Self {
        RequestBody::Json(value)
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Raw(bytes)
    }
}

/// Per-request configuration. Every field is optional so that instance
/// defaults and call-site config can be layered.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub url: String,
    /// Defaults to GET when unset.
    pub method: Option<HttpMethod>,
    /// Prefixed verbatim onto `url`.
    pub base_url: Option<String>,
    pub headers: HeaderMap,
    pub body: Option<RequestBody>,
    pub response_type: Option<ResponseType>,
    /// Value for the `authorization` header; overrides any header set.
    pub auth: Option<String>,
    /// Route through the retrying primitive.
    pub retry: Option<bool>,
    /// Retry budget beyond the first attempt.
    pub retries: Option<u32>,
    /// Per-attempt timeout.
    pub timeout: Option<Duration>,
    pub params: Option<Vec<(String, String)>>,
    pub signal: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Layer `config` over `self`. Set fields in `config` win; headers are
    /// merged by name with `config`'s values replacing ours.
    pub fn merged(&self, config: &RequestOptions) -> RequestOptions {
        let mut headers = self.headers.clone();
        for name in config.headers.keys() {
            headers.remove(name);
            for value in config.headers.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        RequestOptions {
            url: if config.url.is_empty() {
                self.url.clone()
            } else {
                config.url.clone()
            },
            method: config.method.or(self.method),
            base_url: config.base_url.clone().or_else(|| self.base_url.clone()),
            headers,
            body: config.body.clone().or_else(|| self.body.clone()),
            response_type: config.response_type.or(self.response_type),
            auth: config.auth.clone().or_else(|| self.auth.clone()),
            retry: config.retry.or(self.retry),
            retries: config.retries.or(self.retries),
            timeout: config.timeout.or(self.timeout),
            params: config.params.clone().or_else(|| self.params.clone()),
            signal: config.signal.clone().or_else(|| self.signal.clone()),
        }
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Add a header, replacing any existing value under the same name.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, ApiError> {
        let name = http::HeaderName::try_from(name)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid header name: {e}")))?;
        let value = http::HeaderValue::try_from(value)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    pub fn auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    pub fn retry(mut self, retry: bool) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .get_or_insert_with(Vec::new)
            .push((name.into(), value.into()));
        self
    }

    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// One physical request, as handed to a `Fetch` implementation.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Raw response from a `Fetch` implementation.
pub struct RawResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub url: String,
    pub redirected: bool,
    pub body: Option<ByteStream>,
}

impl RawResponse {
    /// Synthetic response returned once every attempt has timed out.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self {
            status: 408,
            status_text: "Request timeout".to_string(),
            headers: HeaderMap::new(),
            url: url.into(),
            redirected: false,
            body: None,
        }
    }

    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .field("url", &self.url)
            .field("redirected", &self.redirected)
            .field("body", &self.body.as_ref().map(|_| "<stream>"))
            .finish()
    }
}

/// Decoded response payload.
pub enum ResponseData {
    Json(Value),
    Text(String),
    Bytes(Bytes),
    Form(Vec<(String, String)>),
    /// The unconsumed body, for `ResponseType::Stream`.
    Stream(ByteStream),
    Empty,
}

impl ResponseData {
    /// JSON view of the payload, used for error bodies and diagnostics.
    /// Streams and empty bodies map to `null`.
    pub fn to_value(&self) -> Value {
        match self {
            ResponseData::Json(value) => value.clone(),
            ResponseData::Text(text) => Value::String(text.clone()),
            ResponseData::Bytes(bytes) => {
                Value::String(String::from_utf8_lossy(bytes).into_owned())
            }
            ResponseData::Form(pairs) => Value::Object(
                pairs
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
            ResponseData::Stream(_) | ResponseData::Empty => Value::Null,
        }
    }
}

impl fmt::Debug for ResponseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseData::Json(value) => f.debug_tuple("Json").field(value).finish(),
            ResponseData::Text(text) => f.debug_tuple("Text").field(text).finish(),
            ResponseData::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            ResponseData::Form(pairs) => f.debug_tuple("Form").field(pairs).finish(),
            ResponseData::Stream(_) => f.write_str("Stream(<stream>)"),
            ResponseData::Empty => f.write_str("Empty"),
        }
    }
}

/// Normalized wrapper returned by every successful request.
///
/// The raw body lives in `data` when `response_type` is `Stream`; otherwise
/// it has been consumed and `body_used` is set.
#[derive(Debug)]
pub struct ResponseEnvelope {
    pub ok: bool,
    pub status: u16,
    pub status_text: String,
    pub config: RequestOptions,
    pub data: ResponseData,
    pub headers: HeaderMap,
    pub redirected: bool,
    pub url: String,
    pub response_type: ResponseType,
    pub body_used: bool,
}

impl ResponseEnvelope {
    /// Decode the JSON payload into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        match &self.data {
            ResponseData::Json(value) => serde_json::from_value(value.clone())
                .map_err(|e| ApiError::DeserializationError(e.to_string())),
            other => Err(ApiError::DeserializationError(format!(
                "response from {} is not JSON: {other:?}",
                self.url
            ))),
        }
    }
}
