//! Server-side route handlers for the storefront.
//!
//! # Overview
//! A route handler talks to the marketplace API on behalf of the browser
//! that called it. `compose` gives each invocation a client carrying the
//! caller's identity, runs the handler, and turns whatever it returns
//! (data, a bare status, raw XML or an error) into a uniform HTTP
//! response. Upstream cookies are relayed with `Secure` set and, in
//! development, with their domain pointed at `localhost`.

pub mod compose;
pub mod request;

pub use compose::{compose, relay_cookies, RouteState};
pub use request::{RouteContext, RouteReply, RouteRequest, BODY_LIMIT};
