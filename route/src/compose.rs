//! The route composition wrapper.
//!
//! # Design
//! `compose` turns a handler returning `Result<Option<RouteReply>, ApiError>`
//! into an axum handler. It is the only place internal errors become HTTP
//! responses:
//!
//! - `Ok(None)` is 405, a handler must opt into every method it serves;
//! - a 408 from the transport becomes 503;
//! - a 400 echoes the upstream validation errors as one flat object;
//! - every other error, and any panic, becomes 503, with custom headers
//!   from a status-bearing error forwarded.
//!
//! Each invocation gets its own context client, built from the inbound
//! headers, and drops it when the response is written.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::{FromRequestParts, MatchedPath, RawPathParams, Request};
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Map, Value};
use storefront_transport::{
    context_client, ensure_secure, rewrite_domain, ApiError, ClientSettings, ContextOverrides,
    Fetch, HttpClient, ReqwestFetch, RequestOptions, TransportConfig,
};
use tracing::{debug, warn};

use crate::request::{RouteContext, RouteReply, RouteRequest};

/// Shared, read-only inputs for every composed route.
#[derive(Debug, Clone)]
pub struct RouteState {
    pub config: Arc<TransportConfig>,
    base: HttpClient,
}

impl RouteState {
    pub fn new(config: TransportConfig, fetcher: Arc<dyn Fetch>) -> Self {
        let settings = ClientSettings::from_config(&config);
        Self {
            base: HttpClient::new(fetcher, RequestOptions::default(), settings),
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> Self {
        Self::new(TransportConfig::from_env(), Arc::new(ReqwestFetch::default()))
    }

    /// Per-request client impersonating `inbound`.
    pub fn client_for(&self, inbound: &HeaderMap) -> Result<HttpClient, ApiError> {
        context_client(
            &self.base,
            Some(inbound),
            &ContextOverrides::default(),
            &self.config,
        )
    }
}

/// Wrap `handler` so it can be mounted with `axum::routing::any` (or any
/// other method router).
pub fn compose<F, Fut>(
    state: RouteState,
    handler: F,
) -> impl Fn(Request) -> BoxFuture<'static, Response> + Clone + Send + Sync + 'static
where
    F: Fn(RouteContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Option<RouteReply>, ApiError>> + Send + 'static,
{
    move |req: Request| {
        let state = state.clone();
        let handler = handler.clone();
        async move { invoke(state, handler, req).await }.boxed()
    }
}

async fn invoke<F, Fut>(state: RouteState, handler: F, req: Request) -> Response
where
    F: Fn(RouteContext) -> Fut,
    Fut: std::future::Future<Output = Result<Option<RouteReply>, ApiError>> + Send,
{
    let (mut parts, body) = req.into_parts();
    let route = route_name(&parts);
    let params: HashMap<String, String> = RawPathParams::from_request_parts(&mut parts, &())
        .await
        .map(|raw| {
            raw.iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let api = match state.client_for(&parts.headers) {
        Ok(api) => api,
        Err(err) => return error_response(&route, &err, &state.config),
    };
    let context = RouteContext {
        api,
        method: parts.method.clone(),
        req: RouteRequest {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            params,
            body,
        },
    };

    match AssertUnwindSafe(handler(context)).catch_unwind().await {
        Ok(Ok(Some(reply))) => reply_response(reply, &state.config),
        Ok(Ok(None)) => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        Ok(Err(err)) => error_response(&route, &err, &state.config),
        Err(_) => {
            warn!(route = %route, "route handler panicked");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// Name used when logging a failed route: the matched pattern with its
/// `{param}` placeholders, or the bare path when nothing matched.
fn route_name(parts: &Parts) -> String {
    parts
        .extensions
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string())
}

fn reply_response(reply: RouteReply, config: &TransportConfig) -> Response {
    let RouteReply {
        data,
        status,
        headers,
        xml,
    } = reply;

    if let (Some(xml), Some(status)) = (xml, status) {
        let mut response = (status, xml).into_response();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        if let Some(headers) = headers {
            response.headers_mut().extend(headers);
        }
        return response;
    }

    let Some(data) = data else {
        return status.unwrap_or(StatusCode::OK).into_response();
    };

    let mut response = (status.unwrap_or(StatusCode::OK), Json(data)).into_response();
    if let Some(headers) = &headers {
        for cookie in relay_cookies(headers, config) {
            match HeaderValue::try_from(cookie) {
                Ok(value) => {
                    response.headers_mut().append(SET_COOKIE, value);
                }
                Err(e) => debug!(error = %e, "dropping unrepresentable cookie"),
            }
        }
    }
    response
}

/// Upstream `Set-Cookie` values, rewritten for the browser.
pub fn relay_cookies(headers: &HeaderMap, config: &TransportConfig) -> Vec<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| {
            if config.is_development() {
                rewrite_domain(raw)
            } else {
                ensure_secure(raw)
            }
        })
        .collect()
}

fn error_response(route: &str, err: &ApiError, config: &TransportConfig) -> Response {
    let status = err.status_code();
    if config.debug {
        warn!(route = %route, status = ?status, error = %err, "route handler failed");
    } else {
        debug!(route = %route, status = ?status, error = %err, "route handler failed");
    }

    match status {
        Some(400) => (StatusCode::BAD_REQUEST, Json(validation_body(err))).into_response(),
        Some(408) | None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        Some(_) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            if let Some(headers) = err.headers() {
                response.headers_mut().extend(headers.clone());
            }
            response
        }
    }
}

/// Message for a 400 that carried no payload. The error's own text names the
/// upstream URL, which stays in the logs.
const BAD_REQUEST_MESSAGE: &str = "Bad request";

/// Body for a 400: the upstream `errors` list merged into one object, or a
/// `{message}` wrapper when all we have is a string.
fn validation_body(err: &ApiError) -> Value {
    let body = match err {
        ApiError::Transport(transport) => transport
            .body
            .get("errors")
            .or_else(|| transport.meta.data.get("errors"))
            .map(merge_errors)
            .unwrap_or_else(|| transport.meta.data.clone()),
        ApiError::Status { message, .. } => Value::String(message.clone()),
        other => Value::String(other.to_string()),
    };
    match body {
        Value::String(message) => json!({ "message": message }),
        Value::Null => json!({ "message": BAD_REQUEST_MESSAGE }),
        other => other,
    }
}

fn merge_errors(errors: &Value) -> Value {
    match errors {
        Value::Array(items) => {
            let mut merged = Map::new();
            for item in items {
                if let Value::Object(fields) = item {
                    merged.extend(fields.clone());
                }
            }
            Value::Object(merged)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storefront_transport::{FailureContext, FetchError, TransportError};

    fn transport_error(status: u16, data: Value) -> ApiError {
        TransportError::new(FailureContext {
            url: "https://api.example.com/offers".to_string(),
            method: "POST".to_string(),
            status: Some(status),
            body: Some(data.clone()),
            data,
            ..Default::default()
        })
        .into()
    }

    fn development() -> TransportConfig {
        TransportConfig {
            environment: storefront_transport::Environment::Development,
            ..TransportConfig::default()
        }
    }

    #[tokio::test]
    async fn route_name_uses_matched_pattern() {
        use axum::routing::get;
        use http_body_util::BodyExt;
        use tower::ServiceExt;

        let app = axum::Router::new().route(
            "/api/listings/{mint}",
            get(|req: Request| async move { route_name(&req.into_parts().0) }),
        );
        let request = Request::builder()
            .uri("/api/listings/mint-ape-1?sort=price")
            .body(axum::body::Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let name = response.into_body().collect().await.unwrap().to_bytes();

        assert_eq!(&name[..], b"/api/listings/{mint}");
    }

    #[test]
    fn route_name_falls_back_to_path_without_query() {
        let (parts, _) = Request::builder()
            .uri("/a/b?x=1")
            .body(axum::body::Body::empty())
            .unwrap()
            .into_parts();

        assert_eq!(route_name(&parts), "/a/b");
    }

    #[test]
    fn empty_validation_error_keeps_upstream_url_out_of_body() {
        let body = validation_body(&transport_error(400, Value::Null));

        assert_eq!(body, json!({"message": "Bad request"}));
        assert!(!body.to_string().contains("api.example.com"));
    }

    #[test]
    fn merges_single_key_error_objects() {
        let err = transport_error(
            400,
            json!({"errors": [{"name": "name is required"}, {"price": "too low"}]}),
        );
        assert_eq!(
            validation_body(&err),
            json!({"name": "name is required", "price": "too low"})
        );
    }

    #[test]
    fn falls_back_to_meta_data_errors() {
        let err: ApiError = TransportError::new(FailureContext {
            status: Some(400),
            data: json!({"errors": [{"field": "bad"}]}),
            ..Default::default()
        })
        .into();
        assert_eq!(validation_body(&err), json!({"field": "bad"}));
    }

    #[test]
    fn string_errors_are_wrapped() {
        let err = transport_error(400, json!({"errors": "slug taken"}));
        assert_eq!(validation_body(&err), json!({"message": "slug taken"}));

        let err = ApiError::status(400, "invalid JSON body");
        assert_eq!(validation_body(&err), json!({"message": "invalid JSON body"}));
    }

    #[test]
    fn missing_errors_uses_whole_payload() {
        let err = transport_error(400, json!({"reason": "bad mint"}));
        assert_eq!(validation_body(&err), json!({"reason": "bad mint"}));
    }

    #[test]
    fn timeout_maps_to_503() {
        let err = transport_error(408, Value::Null);
        let response = error_response("/api/x", &err, &TransportConfig::default());
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn other_statuses_map_to_503_with_custom_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("30"));
        let err = ApiError::Status {
            status: 429,
            message: "slow down".to_string(),
            headers,
        };

        let response = error_response("/api/x", &err, &TransportConfig::default());

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()["retry-after"], "30");
    }

    #[test]
    fn statusless_errors_map_to_503() {
        let err = ApiError::from(FetchError::Network("refused".into()));
        let response = error_response("/api/x", &err, &TransportConfig::default());
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn relays_cookies_with_secure_in_production() {
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("sid=1; Domain=api.example.com; Path=/"),
        );
        headers.append(SET_COOKIE, HeaderValue::from_static("theme=dark; Secure"));

        assert_eq!(
            relay_cookies(&headers, &TransportConfig::default()),
            vec!["sid=1; Domain=api.example.com; Path=/; Secure", "theme=dark; Secure"]
        );
    }

    #[test]
    fn relays_cookies_to_localhost_in_development() {
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("sid=1; Domain=api.example.com; Path=/"),
        );

        assert_eq!(
            relay_cookies(&headers, &development()),
            vec!["sid=1; Domain=localhost; Path=/; Secure"]
        );
    }

    #[test]
    fn no_cookies_means_no_header() {
        let response = reply_response(
            RouteReply::json(StatusCode::OK, json!({})).with_headers(HeaderMap::new()),
            &TransportConfig::default(),
        );
        assert!(response.headers().get(SET_COOKIE).is_none());
    }
}
