//! axum middleware putting a limiter in front of a route group.

use axum::extract::{Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub use crate::ratelimit::retry_after_secs;
use crate::ratelimit::{HttpRateLimiter, Outcome, RateLimitInfo};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Body of a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TooManyRequestsBody {
    pub error: String,
    pub message: String,
    /// Seconds until the window resets
    pub retry_after: u64,
}

/// ISO-8601 rendering of a reset time, e.g. `2024-01-01T00:15:00.000Z`.
pub fn format_reset_time(reset_time: DateTime<Utc>) -> String {
    reset_time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Attach the quota of `info` as response headers.
pub fn apply_quota_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(info.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(info.remaining));
    if let Ok(reset) = HeaderValue::from_str(&format_reset_time(info.reset_time)) {
        headers.insert(X_RATELIMIT_RESET, reset);
    }
}

/// Check the request against `limiter` before handing it on.
///
/// Denied requests get a 429 with a JSON body and `Retry-After`. Every
/// response carries the quota headers.
pub async fn rate_limit(
    State(limiter): State<Arc<HttpRateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let mut info = limiter.check_limit(&request);

    if !info.allowed {
        let retry_after = retry_after_secs(info.reset_time, limiter.now());
        debug!(
            key = %info.key,
            path = %request.uri().path(),
            retry_after = retry_after,
            "Rejecting request"
        );
        return too_many_requests(&info, retry_after);
    }

    let mut response = next.run(request).await;

    let config = limiter.config();
    if config.skip_successful_requests || config.skip_failed_requests {
        let status = response.status();
        let outcome = if status.is_client_error() || status.is_server_error() {
            Outcome::Failure
        } else {
            Outcome::Success
        };
        info.remaining = limiter.record_outcome(&info, outcome);
    }

    apply_quota_headers(response.headers_mut(), &info);
    response
}

fn too_many_requests(info: &RateLimitInfo, retry_after: u64) -> Response {
    let body = TooManyRequestsBody {
        error: "Too Many Requests".to_string(),
        message: "Too many requests from this client, please try again later.".to_string(),
        retry_after,
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_quota_headers(headers, info);
    headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}
