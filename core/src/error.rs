//! Error types for the storefront transport.
//!
//! # Design
//! Every failure surfaced by the client is an `ApiError`. Upstream non-2xx
//! responses (including the synthetic 408 produced when retries run out)
//! become a `TransportError`, built once at the point of detection and never
//! mutated afterwards. Physical-attempt failures that never produced a
//! response stay as `FetchError` so callers can tell an abort from a broken
//! connection.
//!
//! Code that only sees a serialized error (e.g. a JSON payload relayed from
//! another service) can recognise the shape with `is_request_error`.

use std::time::Duration;

use http::HeaderMap;
use serde::Serialize;
use serde_json::Value;

/// Prefix shared by every `TransportError::name`.
pub const REQUEST_ERROR_PREFIX: &str = "RequestError:";

/// Failure of a single physical attempt, before any response was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The caller's cancellation token fired.
    #[error("request aborted")]
    Aborted,

    /// The per-attempt timer fired before a response arrived.
    #[error("request timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    /// DNS, connection, TLS or protocol failure.
    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    /// True for both caller-driven and timer-driven aborts.
    pub fn is_abort(&self) -> bool {
        matches!(self, FetchError::Aborted | FetchError::TimedOut(_))
    }
}

/// The context a `TransportError` is built from.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FailureContext {
    pub url: String,
    pub method: String,
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub data: Value,
    #[serde(skip)]
    pub body: Option<Value>,
}

/// Structured error for a non-2xx upstream response.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{name}: {message}")]
pub struct TransportError {
    pub name: String,
    pub message: String,
    pub status: u16,
    pub body: Value,
    pub meta: FailureContext,
}

impl TransportError {
    pub fn new(context: FailureContext) -> Self {
        let status = match context.status {
            Some(status) if status != 0 => status,
            _ => 500,
        };
        let message = match &context.data {
            Value::Null => String::new(),
            data => data.to_string(),
        };
        Self {
            name: format!(
                "{REQUEST_ERROR_PREFIX} {} {status} {}",
                context.method, context.url
            ),
            message,
            status,
            body: context
                .body
                .clone()
                .unwrap_or_else(|| Value::String(String::new())),
            meta: context,
        }
    }
}

/// Returns true if `value` looks like a serialized `TransportError`: an
/// object with a numeric `status` and a `name` starting with
/// `RequestError:`.
pub fn is_request_error(value: &Value) -> bool {
    let has_status = value.get("status").is_some_and(Value::is_u64);
    let has_name = value
        .get("name")
        .and_then(Value::as_str)
        .is_some_and(|name| name.starts_with(REQUEST_ERROR_PREFIX));
    has_status && has_name
}

/// Errors returned by the HTTP client and accepted from route handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The upstream answered with a non-2xx status.
    #[error(transparent)]
    Transport(Box<TransportError>),

    /// No response was received.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A status-bearing error raised directly by a handler.
    #[error("HTTP {status}: {message}")]
    Status {
        status: u16,
        message: String,
        headers: HeaderMap,
    },

    /// The request could not be assembled (bad header value, bad URL).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    SerializationError(String),

    /// A response payload did not match the expected type.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),
}

impl ApiError {
    /// Shorthand for a handler-raised error without extra headers.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        ApiError::Status {
            status,
            message: message.into(),
            headers: HeaderMap::new(),
        }
    }

    /// The HTTP status carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Transport(err) => Some(err.status),
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Custom headers a handler attached to the error.
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            ApiError::Status { headers, .. } if !headers.is_empty() => Some(headers),
            _ => None,
        }
    }

    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            ApiError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        ApiError::Transport(Box::new(err))
    }
}
