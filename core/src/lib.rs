//! HTTP transport core for the marketplace storefront.
//!
//! # Overview
//! Builds and issues outbound HTTP calls to the marketplace API on behalf of
//! page-level data loading and server-side route handlers, and provides the
//! cookie rewriting those handlers need when relaying upstream responses to
//! the browser.
//!
//! # Design
//! - `Fetch` is the only place that touches the network; everything above
//!   it is deterministic and tested against scripted transports.
//! - `fetch_with_retry` bounds each physical attempt with a timer and
//!   retries only timeout-driven aborts, one attempt at a time.
//! - `HttpClient` is an immutable value bound to default options. The
//!   process-wide `default_client()` carries no identity; `context_client`
//!   builds a fresh instance per inbound request so headers and cookies
//!   never leak between requests.
//! - Every non-2xx response becomes a `TransportError`; callers see a
//!   single `ApiError` type.

pub mod client;
pub mod config;
pub mod context;
pub mod cookies;
pub mod error;
pub mod fetch;
pub mod http;

pub use client::{default_client, ClientSettings, HttpClient, RequestTarget};
pub use config::{Environment, TransportConfig};
pub use context::{context_client, context_options, ContextOverrides};
pub use cookies::{ensure_secure, rewrite_domain};
pub use error::{is_request_error, ApiError, FailureContext, FetchError, TransportError};
pub use fetch::{fetch_with_retry, Backoff, Fetch, ReqwestFetch, RetryPolicy};
pub use crate::http::{
    ByteStream, FetchRequest, HttpMethod, RawResponse, RequestBody, RequestOptions, ResponseData,
    ResponseEnvelope, ResponseType,
};
