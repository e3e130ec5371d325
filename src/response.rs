//! Pluggable rendering of rate limiter verdicts.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::TurnpikeError;

/// Trait for turning a verdict into wire bytes.
///
/// Implementations must not leak internal error detail to the client; the
/// default writer renders fixed bodies only. A custom writer may choose to
/// render the block expiry, the default one does not.
pub trait ResponseWriter: Send + Sync {
    /// Render the rejection sent when an identity is rate limited.
    fn write_blocked(&self) -> Response;

    /// Render the failure sent when the engine or storage errored.
    fn write_error(&self, err: &TurnpikeError) -> Response;
}

const BLOCKED_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";
const ERROR_MESSAGE: &str = "internal server error";

/// Default writer: 429 with a fixed body for blocks, 500 for errors.
#[derive(Debug, Default)]
pub struct DefaultResponseWriter;

impl DefaultResponseWriter {
    pub fn new() -> Self {
        Self
    }
}

impl ResponseWriter for DefaultResponseWriter {
    fn write_blocked(&self) -> Response {
        (StatusCode::TOO_MANY_REQUESTS, BLOCKED_MESSAGE).into_response()
    }

    fn write_error(&self, _err: &TurnpikeError) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, ERROR_MESSAGE).into_response()
    }
}
