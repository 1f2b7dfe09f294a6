//! Request-scoped context extracted from HTTP requests.

use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::api::error::ApiError;
use crate::server::CallContext;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout-ms";

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// Deadline budget for the call; `None` leaves it unbounded.
    pub timeout: Option<Duration>,
}

impl RequestContext {
    /// Start the deadline clock and hand the call to the server.
    pub fn call_context(&self) -> CallContext {
        let ctx = CallContext::new(self.request_id.clone());
        match self.timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        }
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn timeout_from_headers(
    headers: &HeaderMap,
    default: Duration,
    request_id: &str,
) -> Result<Option<Duration>, ApiError> {
    let Some(raw) = header_string(headers, REQUEST_TIMEOUT_HEADER) else {
        return Ok((!default.is_zero()).then_some(default));
    };

    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Some(Duration::from_millis(ms))),
        _ => Err(ApiError::bad_request(
            "invalid_timeout",
            format!("{REQUEST_TIMEOUT_HEADER} must be a positive integer (milliseconds)"),
        )
        .with_request_id(request_id.to_string())),
    }
}

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let request_id = header_string(&parts.headers, REQUEST_ID_HEADER)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| ulid::Ulid::new().to_string());

        let timeout = timeout_from_headers(&parts.headers, state.request_timeout(), &request_id)?;

        Ok(Self {
            request_id,
            timeout,
        })
    }
}
