//! Configured HTTP client instances.
//!
//! # Design
//! `HttpClient` is a value: a transport, a set of default `RequestOptions`
//! and a few settings. It carries no mutable state between calls, so the
//! process-wide default instance can be shared freely, while instances that
//! hold per-caller identity (see `context`) are built fresh for every
//! inbound request and dropped afterwards.
//!
//! Every verb funnels into `send`, which merges options, encodes the body,
//! assembles the URL, dispatches through `fetch_with_retry` and turns the
//! raw response into a `ResponseEnvelope`. A non-2xx envelope becomes a
//! `TransportError`.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::HeaderValue;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::config::TransportConfig;
use crate::error::{ApiError, FailureContext, FetchError, TransportError};
use crate::fetch::{fetch_with_retry, Backoff, Fetch, ReqwestFetch, RetryPolicy};
use crate::http::{
    ByteStream, FetchRequest, HttpMethod, RawResponse, RequestBody, RequestOptions, ResponseData,
    ResponseEnvelope, ResponseType,
};

/// Instance-wide behaviour that is not part of a single request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Retry budget used when a retried request doesn't set its own.
    pub retries: u32,
    /// Per-attempt timeout used when a retried request doesn't set its own.
    pub timeout: Duration,
    pub backoff: Backoff,
    /// Emit one diagnostic event per request.
    pub diagnostics: bool,
    /// Include the decoded payload in the diagnostic event.
    pub log_payload: bool,
}

impl ClientSettings {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            retries: 1,
            timeout: config.default_timeout(),
            backoff: Backoff::default(),
            diagnostics: config.diagnostics_enabled(),
            log_payload: false,
        }
    }

    pub fn log_payload(mut self, log_payload: bool) -> Self {
        self.log_payload = log_payload;
        self
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}

/// First argument of `send`: either a URL or a full options object.
#[derive(Debug, Clone)]
pub enum RequestTarget {
    Url(String),
    Config(RequestOptions),
}

impl From<&str> for RequestTarget {
    fn from(url: &str) -> Self {
        RequestTarget::Url(url.to_string())
    }
}

impl From<String> for RequestTarget {
    fn from(url: String) -> Self {
        RequestTarget::Url(url)
    }
}

impl From<RequestOptions> for RequestTarget {
    fn from(options: RequestOptions) -> Self {
        RequestTarget::Config(options)
    }
}

/// An HTTP client bound to default options.
#[derive(Clone)]
pub struct HttpClient {
    fetcher: Arc<dyn Fetch>,
    defaults: RequestOptions,
    settings: ClientSettings,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("defaults", &self.defaults)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

static DEFAULT_CLIENT: OnceLock<HttpClient> = OnceLock::new();

/// The process-wide instance for calls that carry no caller identity.
pub fn default_client() -> &'static HttpClient {
    DEFAULT_CLIENT.get_or_init(|| {
        let config = TransportConfig::from_env();
        HttpClient::new(
            Arc::new(ReqwestFetch::default()),
            RequestOptions::default().base_url(config.api_url.clone()),
            ClientSettings::from_config(&config).log_payload(true),
        )
    })
}

impl HttpClient {
    pub fn new(
        fetcher: Arc<dyn Fetch>,
        defaults: RequestOptions,
        settings: ClientSettings,
    ) -> Self {
        Self {
            fetcher,
            defaults,
            settings,
        }
    }

    /// A new instance sharing this one's transport, with `overrides`
    /// layered over the current defaults.
    pub fn create(&self, overrides: RequestOptions) -> HttpClient {
        HttpClient {
            fetcher: Arc::clone(&self.fetcher),
            defaults: self.defaults.merged(&overrides),
            settings: self.settings.clone(),
        }
    }

    pub fn with_settings(mut self, settings: ClientSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn defaults(&self) -> &RequestOptions {
        &self.defaults
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub async fn get(
        &self,
        target: impl Into<RequestTarget>,
    ) -> Result<ResponseEnvelope, ApiError> {
        self.send(target, RequestOptions::default(), HttpMethod::Get, None)
            .await
    }

    pub async fn delete(
        &self,
        target: impl Into<RequestTarget>,
    ) -> Result<ResponseEnvelope, ApiError> {
        self.send(target, RequestOptions::default(), HttpMethod::Delete, None)
            .await
    }

    pub async fn post(
        &self,
        target: impl Into<RequestTarget>,
        data: impl Into<RequestBody>,
    ) -> Result<ResponseEnvelope, ApiError> {
        self.send(target, RequestOptions::default(), HttpMethod::Post, Some(data.into()))
            .await
    }

    pub async fn put(
        &self,
        target: impl Into<RequestTarget>,
        data: impl Into<RequestBody>,
    ) -> Result<ResponseEnvelope, ApiError> {
        self.send(target, RequestOptions::default(), HttpMethod::Put, Some(data.into()))
            .await
    }

    pub async fn patch(
        &self,
        target: impl Into<RequestTarget>,
        data: impl Into<RequestBody>,
    ) -> Result<ResponseEnvelope, ApiError> {
        self.send(target, RequestOptions::default(), HttpMethod::Patch, Some(data.into()))
            .await
    }

    /// Issue a request described entirely by `options`.
    pub async fn request(&self, options: RequestOptions) -> Result<ResponseEnvelope, ApiError> {
        let method = options.method.unwrap_or_default();
        self.send(options, RequestOptions::default(), method, None)
            .await
    }

    /// The core request function behind every verb.
    pub async fn send(
        &self,
        target: impl Into<RequestTarget>,
        config: RequestOptions,
        method: HttpMethod,
        data: Option<RequestBody>,
    ) -> Result<ResponseEnvelope, ApiError> {
        let config = match target.into() {
            RequestTarget::Url(url) => RequestOptions { url, ..config },
            RequestTarget::Config(target) => target.merged(&config),
        };
        let mut options = self.defaults.merged(&config);
        options.method = Some(method);
        if data.is_some() {
            options.body = data;
        }

        let request = build_request(&options)?;
        let span = tracing::debug_span!("http_request", request_id = %Uuid::new_v4());
        self.dispatch(request, options).instrument(span).await
    }

    async fn dispatch(
        &self,
        request: FetchRequest,
        options: RequestOptions,
    ) -> Result<ResponseEnvelope, ApiError> {
        let policy = self.policy_for(&options);
        let method = request.method;
        let url = request.url.clone();

        let started = Instant::now();
        let raw = fetch_with_retry(
            self.fetcher.as_ref(),
            request,
            &policy,
            options.signal.as_ref(),
        )
        .await?;
        let envelope = read_envelope(raw, options, policy.timeout).await?;
        let duration = started.elapsed();

        if self.settings.diagnostics {
            if self.settings.log_payload {
                debug!(
                    method = %method,
                    status = envelope.status,
                    url = %url,
                    payload = %envelope.data.to_value(),
                    "request completed"
                );
            } else {
                debug!(method = %method, status = envelope.status, url = %url, "request completed");
            }
        }

        if !envelope.ok {
            let data = envelope.data.to_value();
            return Err(TransportError::new(FailureContext {
                url,
                method: method.to_string(),
                status: Some(envelope.status),
                duration_ms: Some(duration.as_millis() as u64),
                body: Some(data.clone()),
                data,
            })
            .into());
        }
        Ok(envelope)
    }

    fn policy_for(&self, options: &RequestOptions) -> RetryPolicy {
        if options.retry.unwrap_or(false) {
            RetryPolicy {
                retries: options.retries.unwrap_or(self.settings.retries),
                timeout: Some(options.timeout.unwrap_or(self.settings.timeout)),
                backoff: self.settings.backoff,
            }
        } else {
            RetryPolicy::single(options.timeout)
        }
    }
}

/// Turn merged options into one physical request.
fn build_request(options: &RequestOptions) -> Result<FetchRequest, ApiError> {
    let mut headers = options.headers.clone();

    // Only structured payloads are JSON-encoded; scalars go out as their text.
    let body = match &options.body {
        Some(RequestBody::Json(value @ (Value::Object(_) | Value::Array(_)))) => {
            let encoded = serde_json::to_vec(value)
                .map_err(|e| ApiError::SerializationError(e.to_string()))?;
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            Some(Bytes::from(encoded))
        }
        Some(RequestBody::Json(Value::Null)) | None => None,
        Some(RequestBody::Json(Value::String(text))) => Some(Bytes::from(text.clone())),
        Some(RequestBody::Json(scalar)) => Some(Bytes::from(scalar.to_string())),
        Some(RequestBody::Raw(bytes)) => Some(bytes.clone()),
    };

    if let Some(auth) = &options.auth {
        let value = HeaderValue::try_from(auth.as_str())
            .map_err(|e| ApiError::InvalidRequest(format!("invalid authorization value: {e}")))?;
        headers.insert(AUTHORIZATION, value);
    }

    let mut url = match &options.base_url {
        Some(base) => format!("{base}{}", options.url),
        None => options.url.clone(),
    };
    if let Some(params) = options.params.as_ref().filter(|p| !p.is_empty()) {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&query);
    }

    Ok(FetchRequest {
        method: options.method.unwrap_or_default(),
        url,
        headers,
        body,
    })
}

/// Buffer or hand over the response body. Buffering is bounded by the
/// caller's signal and the first attempt's timeout.
async fn read_envelope(
    raw: RawResponse,
    config: RequestOptions,
    limit: Option<Duration>,
) -> Result<ResponseEnvelope, ApiError> {
    let response_type = config.response_type.unwrap_or_default();
    let ok = raw.ok();

    let (data, body_used) = match (response_type, raw.body) {
        (_, None) => (ResponseData::Empty, false),
        (ResponseType::Stream, Some(stream)) => (ResponseData::Stream(stream), false),
        (response_type, Some(stream)) => {
            let bytes = buffer(stream, config.signal.as_ref(), limit).await?;
            (decode(response_type, bytes), true)
        }
    };

    Ok(ResponseEnvelope {
        ok,
        status: raw.status,
        status_text: raw.status_text,
        config,
        data,
        headers: raw.headers,
        redirected: raw.redirected,
        url: raw.url,
        response_type,
        body_used,
    })
}

async fn buffer(
    stream: ByteStream,
    signal: Option<&CancellationToken>,
    limit: Option<Duration>,
) -> Result<Bytes, FetchError> {
    let caller = signal.cloned().unwrap_or_default();
    let read = stream.try_fold(BytesMut::new(), |mut acc, chunk| async move {
        acc.extend_from_slice(&chunk);
        Ok(acc)
    });
    let timer = async {
        match limit {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        bytes = read => bytes.map(BytesMut::freeze),
        _ = caller.cancelled() => Err(FetchError::Aborted),
        _ = timer => Err(FetchError::TimedOut(limit.unwrap_or_default())),
    }
}

/// Decode a buffered body. Text that isn't JSON is kept as text.
fn decode(response_type: ResponseType, bytes: Bytes) -> ResponseData {
    match response_type {
        ResponseType::Blob | ResponseType::ArrayBuffer => ResponseData::Bytes(bytes),
        ResponseType::FormData => {
            ResponseData::Form(url::form_urlencoded::parse(&bytes).into_owned().collect())
        }
        ResponseType::Text | ResponseType::Json | ResponseType::Stream => {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => ResponseData::Json(value),
                Err(_) => ResponseData::Text(text),
            }
        }
    }
}
