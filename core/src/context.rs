//! Clients that act on behalf of an inbound request.
//!
//! # Design
//! Server-side calls must reach the upstream API as if the browser had made
//! them: same authorization, same session cookie, same apparent host. That
//! identity is per-request state, so `context_client` builds a fresh
//! `HttpClient` every time and never caches one. Two concurrent inbound
//! requests can't see each other's headers.

use http::header::{AUTHORIZATION, COOKIE, HOST};
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::client::HttpClient;
use crate::config::TransportConfig;
use crate::error::ApiError;
use crate::http::RequestOptions;

pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Explicit overrides for a context client.
#[derive(Debug, Clone, Default)]
pub struct ContextOverrides {
    /// Authorization value to send instead of the inbound one.
    pub token: Option<String>,
    /// Base URL to use instead of `TransportConfig::api_url`.
    pub url: Option<String>,
}

/// Build the default options that impersonate `inbound`.
pub fn context_options(
    inbound: Option<&HeaderMap>,
    overrides: &ContextOverrides,
    config: &TransportConfig,
) -> Result<RequestOptions, ApiError> {
    let base_url = overrides
        .url
        .clone()
        .unwrap_or_else(|| config.api_url.clone());
    let mut options = RequestOptions::default().base_url(base_url);

    if let Some(inbound) = inbound {
        if let Some(auth) = inbound.get(AUTHORIZATION) {
            let auth = auth.to_str().map_err(|e| {
                ApiError::InvalidRequest(format!("inbound authorization is not ASCII: {e}"))
            })?;
            options.auth = Some(auth.to_string());
        }
        if let Some(cookie) = inbound.get(COOKIE) {
            options.headers.insert(COOKIE, cookie.clone());
        }
    }
    if let Some(token) = &overrides.token {
        options.auth = Some(token.clone());
    }

    if let Some(host) = &config.host_override {
        options.headers.insert(HOST, header_value(host)?);
    }
    if let Some(forwarded_host) = &config.forwarded_host {
        options
            .headers
            .insert(X_FORWARDED_HOST, header_value(forwarded_host)?);
    }

    let proto = inbound
        .and_then(|headers| headers.get(&X_FORWARDED_PROTO))
        .filter(|proto| !proto.as_bytes().eq_ignore_ascii_case(b"http"))
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("https"));
    options.headers.insert(X_FORWARDED_PROTO, proto);

    Ok(options)
}

/// A fresh client carrying the identity of `inbound`, derived from `base`
/// (which supplies the transport and settings). Payloads of server-side
/// calls are never logged.
pub fn context_client(
    base: &HttpClient,
    inbound: Option<&HeaderMap>,
    overrides: &ContextOverrides,
    config: &TransportConfig,
) -> Result<HttpClient, ApiError> {
    let options = context_options(inbound, overrides, config)?;
    let settings = base.settings().clone().log_payload(false);
    Ok(base.create(options).with_settings(settings))
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::try_from(value)
        .map_err(|e| ApiError::InvalidRequest(format!("invalid header value {value:?}: {e}")))
}
