//! HTTP transport: middleware, routes and server.

mod middleware;
mod routes;
mod server;

pub use middleware::{
    apply_quota_headers, format_reset_time, rate_limit, retry_after_secs, TooManyRequestsBody,
    X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use server::HttpServer;
