//! HTTP server implementation.

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::rate_limit;
use super::routes;
use crate::error::{Result, WindowgateError};
use crate::ratelimit::{HttpRateLimiter, LimiterSet};

/// HTTP gateway with one limiter per route group.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The limiters guarding each route group
    limiters: LimiterSet,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, limiters: LimiterSet) -> Self {
        Self { addr, limiters }
    }

    /// Build the router with every route group behind its limiter.
    pub fn router(&self) -> Router {
        let auth = Router::new()
            .route("/auth/login", post(routes::login))
            .route("/auth/signup", post(routes::signup));
        let api = Router::new().route("/api/status", get(routes::api_status));
        let upload = Router::new().route("/upload", post(routes::upload));
        let search = Router::new().route("/search", get(routes::search));
        let admin = Router::new()
            .route("/admin/suspicious", get(routes::suspicious_clients))
            .with_state(self.limiters.suspicious.clone());

        Router::new()
            .route("/health", get(routes::health))
            .merge(guarded(auth, &self.limiters.auth))
            .merge(guarded(api, &self.limiters.api))
            .merge(guarded(upload, &self.limiters.upload))
            .merge(guarded(search, &self.limiters.search))
            .merge(admin)
    }

    /// Start the server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind");
            WindowgateError::Io(e)
        })?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            WindowgateError::Io(e)
        })
    }
}

fn guarded(routes: Router, limiter: &Arc<HttpRateLimiter>) -> Router {
    routes.route_layer(from_fn_with_state(limiter.clone(), rate_limit))
}
